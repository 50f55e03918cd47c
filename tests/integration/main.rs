//! Integration tests against mock HTTP servers

mod fetch_tests;
mod pipeline_tests;
