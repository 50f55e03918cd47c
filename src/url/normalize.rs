use crate::{UrlError, UrlResult};
use url::Url;

/// Tracking query parameters dropped during normalization
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "mc_eid", "mc_cid", "ref", "ref_src", "igshid", "_hsenc", "_hsmi",
];

/// Normalizes a URL so that trivially different spellings collapse to one key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject anything that is not HTTP(S) or has no host
/// 2. Lowercase the host and drop a leading `www.`
/// 3. Drop default ports
/// 4. Normalize the path: collapse empty and `.` segments, resolve `..`,
///    drop a trailing slash (root stays `/`)
/// 5. Drop the fragment
/// 6. Drop tracking parameters (`utm_*` and a fixed list), sort the rest
///
/// The scheme is preserved: `http://` and `https://` variants stay distinct
/// because hostile hosts often serve different content on each.
///
/// # Examples
///
/// ```
/// use sumi_delve::url::normalize_url;
///
/// let url = normalize_url("https://WWW.EXAMPLE.COM/a/../page/?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page");
/// ```
pub fn normalize_url(url_str: &str) -> UrlResult<Url> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingHost)?;
    let host = match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => host,
    };
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    if url.port() == url.port_or_known_default() && url.port().is_some() {
        // Explicit default port, e.g. https://example.com:443/
        let _ = url.set_port(None);
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);
    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            let query = params
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{}={}", k, v)
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query));
        }
    }

    Ok(url)
}

/// Returns the deduplication key for a URL string, or `None` if it cannot be normalized
pub fn dedup_key(url_str: &str) -> Option<String> {
    normalize_url(url_str).ok().map(String::from)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Filters out tracking parameters and sorts the remaining ones
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
