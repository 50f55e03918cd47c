/// Checks if a host matches a wildcard pattern
///
/// Two kinds of pattern are supported:
/// 1. Exact: "example.com" matches only "example.com"
/// 2. Wildcard: "*.example.com" matches "example.com" and any subdomain of it
///
/// Hosts are expected to be lowercase already (see [`super::host_of`]).
///
/// # Examples
///
/// ```
/// use sumi_delve::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "notexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base
            || candidate
                .strip_suffix(base)
                .is_some_and(|prefix| prefix.ends_with('.'))
    } else {
        candidate == pattern
    }
}

/// Returns true if the host matches any of the patterns
pub fn matches_any<S: AsRef<str>>(patterns: &[S], host: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| matches_wildcard(pattern.as_ref(), host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_wildcard("example.com", "example.com"));
        assert!(!matches_wildcard("example.com", "blog.example.com"));
        assert!(!matches_wildcard("blog.example.com", "example.com"));
    }

    #[test]
    fn test_wildcard_matches_bare_and_nested() {
        assert!(matches_wildcard("*.example.com", "example.com"));
        assert!(matches_wildcard("*.example.com", "blog.example.com"));
        assert!(matches_wildcard("*.example.com", "deep.nested.sub.example.com"));
    }

    #[test]
    fn test_wildcard_rejects_partial_labels() {
        assert!(!matches_wildcard("*.example.com", "myexample.com"));
        assert!(!matches_wildcard("*.example.com", "example.com.org"));
        assert!(!matches_wildcard("*.example.com", "example.org"));
    }

    #[test]
    fn test_multi_label_suffix() {
        assert!(matches_wildcard("*.co.uk", "example.co.uk"));
        assert!(!matches_wildcard("*.co.uk", "co.jp"));
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec!["*.pinterest.com".to_string(), "quora.com".to_string()];
        assert!(matches_any(&patterns, "pinterest.com"));
        assert!(matches_any(&patterns, "quora.com"));
        assert!(!matches_any(&patterns, "en.quora.com"));

        let empty: Vec<String> = Vec::new();
        assert!(!matches_any(&empty, "example.com"));
    }
}
