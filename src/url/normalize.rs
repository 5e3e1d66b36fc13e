use crate::UrlError;
use url::Url;

/// Normalizes a URL so that equivalent page addresses compare equal
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Require an http or https scheme
/// 3. Lowercase the host
/// 4. Drop the port when it is the scheme default (done by `Url` on parse)
/// 5. Empty path becomes /
/// 6. Remove the fragment (client-side routes keep their query)
///
/// Unlike a link crawler this keeps `http`, `www.` and trailing slashes
/// intact: a web application may route on any of them.
///
/// # Arguments
///
/// * `url_str` - The URL string to normalize
///
/// # Returns
///
/// * `Ok(Url)` - Normalized URL
/// * `Err(UrlError)` - Failed to parse or normalize the URL
///
/// # Examples
///
/// ```
/// use statecrawl::url::normalize_url;
///
/// let url = normalize_url("http://LOCALHOST:80/app#top").unwrap();
/// assert_eq!(url.as_str(), "http://localhost/app");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_parsed(url)
}

/// Resolves a (possibly relative) reference against a base page URL and normalizes it
pub fn resolve_url(base: &Url, reference: &str) -> Result<Url, UrlError> {
    let url = base
        .join(reference.trim())
        .map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_parsed(url)
}

fn normalize_parsed(mut url: Url) -> Result<Url, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = match url.host_str() {
        Some(host) => host.to_lowercase(),
        None => return Err(UrlError::MissingHost),
    };
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    if url.path().is_empty() {
        url.set_path("/");
    }

    url.set_fragment(None);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_http() {
        let result = normalize_url("http://example.com/page").unwrap();
        assert_eq!(result.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_keeps_www_and_trailing_slash() {
        let result = normalize_url("https://www.example.com/app/").unwrap();
        assert_eq!(result.as_str(), "https://www.example.com/app/");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("http://localhost:8085/index.html#section").unwrap();
        assert_eq!(result.as_str(), "http://localhost:8085/index.html");
    }

    #[test]
    fn test_drop_default_port() {
        let result = normalize_url("https://example.com:443/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_keep_custom_port() {
        let result = normalize_url("http://0.0.0.0:8085/").unwrap();
        assert_eq!(result.as_str(), "http://0.0.0.0:8085/");
    }

    #[test]
    fn test_lowercase_host_only() {
        let result = normalize_url("https://EXAMPLE.COM/Page?Q=1").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Page?Q=1");
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let result = normalize_url("https://example.com").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.com/page");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_resolve_relative() {
        let base = Url::parse("http://localhost:8085/app/list").unwrap();
        let result = resolve_url(&base, "../about#team").unwrap();
        assert_eq!(result.as_str(), "http://localhost:8085/about");
    }

    #[test]
    fn test_resolve_rejects_javascript() {
        let base = Url::parse("http://localhost:8085/").unwrap();
        assert!(resolve_url(&base, "javascript:void(0)").is_err());
    }
}
