use url::Url;

/// Extracts the host key from a parsed URL
///
/// The host is lowercased and stripped of a leading `www.` so that
/// `www.example.com` and `example.com` share breaker, policy and pacing state.
/// Ports are ignored.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_delve::url::host_of_url;
///
/// let url = Url::parse("https://WWW.Example.com:8443/path").unwrap();
/// assert_eq!(host_of_url(&url), Some("example.com".to_string()));
/// ```
pub fn host_of_url(url: &Url) -> Option<String> {
    url.host_str().map(|h| {
        let host = h.to_lowercase();
        match host.strip_prefix("www.") {
            Some(rest) if !rest.is_empty() => rest.to_string(),
            _ => host,
        }
    })
}

/// Extracts the host key from a URL string
///
/// Returns `None` for unparseable URLs or URLs without a host.
pub fn host_of(url_str: &str) -> Option<String> {
    Url::parse(url_str).ok().as_ref().and_then(host_of_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_host() {
        assert_eq!(host_of("https://example.com/"), Some("example.com".to_string()));
    }

    #[test]
    fn test_subdomain_kept() {
        assert_eq!(
            host_of("https://blog.example.com/post"),
            Some("blog.example.com".to_string())
        );
    }

    #[test]
    fn test_www_stripped() {
        assert_eq!(
            host_of("https://www.example.com/a"),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn test_port_ignored() {
        assert_eq!(
            host_of("http://127.0.0.1:8080/x"),
            Some("127.0.0.1".to_string())
        );
    }

    #[test]
    fn test_uppercase_lowered() {
        assert_eq!(host_of("https://EXAMPLE.COM/"), Some("example.com".to_string()));
    }

    #[test]
    fn test_invalid_url() {
        assert_eq!(host_of("not a url"), None);
        assert_eq!(host_of("mailto:someone@example.com"), None);
    }
}
