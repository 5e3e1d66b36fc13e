//! URL handling module
//!
//! This module provides URL normalization, host extraction, wildcard host
//! matching, and the crawl scope that decides which navigations stay inside
//! the application under test.

mod host;
mod normalize;

use crate::config::Config;
use crate::UrlResult;
use url::Url;

// Re-export main functions
pub use host::{extract_host, matches_wildcard};
pub use normalize::{normalize_url, resolve_url};

/// Where a URL lies relative to the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlScope {
    /// Same application: may be navigated to and yields states
    InScope,
    /// Another host: never navigated to
    External,
    /// Not an http(s) location (`mailto:`, `tel:`, `javascript:`, `data:`)
    Unsupported,
}

impl UrlScope {
    /// Returns true if the crawler may navigate to the URL
    pub fn is_crawlable(&self) -> bool {
        matches!(self, Self::InScope)
    }
}

/// The set of hosts a crawl is confined to
///
/// The target URL's host is always in scope; `site.allowed-hosts` patterns add
/// more.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    target: Url,
    target_host: String,
    allowed_hosts: Vec<String>,
}

impl CrawlScope {
    /// Creates a scope from the target URL and extra host patterns
    ///
    /// # Arguments
    ///
    /// * `target` - The URL the crawl starts from
    /// * `allowed_hosts` - Additional host patterns (`*.` wildcards allowed)
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlScope)` - The scope
    /// * `Err(UrlError)` - The target URL is not a valid http(s) URL
    pub fn new(target: &str, allowed_hosts: &[String]) -> UrlResult<Self> {
        let target = normalize_url(target)?;
        let target_host = extract_host(&target).ok_or(crate::UrlError::MissingHost)?;
        Ok(Self {
            target,
            target_host,
            allowed_hosts: allowed_hosts.iter().map(|h| h.to_lowercase()).collect(),
        })
    }

    /// Builds the scope of a configuration
    pub fn from_config(config: &Config) -> UrlResult<Self> {
        Self::new(&config.site.url, &config.site.allowed_hosts)
    }

    /// The normalized target URL (root state location)
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Classifies an absolute URL string
    pub fn classify(&self, url: &str) -> UrlScope {
        match normalize_url(url) {
            Ok(url) => self.classify_url(&url),
            Err(_) => UrlScope::Unsupported,
        }
    }

    /// Classifies a parsed URL
    pub fn classify_url(&self, url: &Url) -> UrlScope {
        if url.scheme() != "http" && url.scheme() != "https" {
            return UrlScope::Unsupported;
        }

        match extract_host(url) {
            Some(host) if self.host_allowed(&host) => UrlScope::InScope,
            Some(_) => UrlScope::External,
            None => UrlScope::Unsupported,
        }
    }

    /// Resolves `href` against the page it was found on and classifies it
    ///
    /// Returns the resolved URL together with its scope, or `Unsupported` with
    /// no URL when the reference cannot be resolved to http(s).
    pub fn classify_href(&self, page: &Url, href: &str) -> (Option<Url>, UrlScope) {
        let href = href.trim();
        if href.is_empty() {
            return (None, UrlScope::Unsupported);
        }

        match resolve_url(page, href) {
            Ok(url) => {
                let scope = self.classify_url(&url);
                (Some(url), scope)
            }
            Err(_) => (None, UrlScope::Unsupported),
        }
    }

    fn host_allowed(&self, host: &str) -> bool {
        host == self.target_host
            || self
                .allowed_hosts
                .iter()
                .any(|pattern| matches_wildcard(pattern, host))
    }
}
