use url::Url;

/// Extracts the lowercase host from a URL
///
/// Returns `None` for URLs without a host (`data:`, `about:blank`).
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Checks if a host matches a pattern
///
/// `"*.example.com"` matches `example.com` and every subdomain of it; any other
/// pattern must match exactly.
///
/// # Examples
///
/// ```
/// use statecrawl::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.example.com", "api.example.com"));
/// assert!(!matches_wildcard("example.com", "api.example.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || candidate
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => candidate == pattern,
    }
}
