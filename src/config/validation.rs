use crate::config::types::{
    BrowserConfig, BrowserType, Config, CrawlRules, Limit, LimitsConfig, StateAbstractionConfig,
};
use crate::config::FormFillMode;
use crate::fingerprint::FingerprintStrategy;
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site(config)?;
    validate_crawl_rules(&config.crawl_rules)?;
    validate_limits(&config.limits)?;
    validate_browser(&config.browser)?;
    validate_proxy(config)?;
    validate_state_abstraction(&config.state_abstraction)?;
    validate_form_inputs(config)?;
    validate_output(config)?;
    Ok(())
}

fn validate_site(config: &Config) -> Result<(), ConfigError> {
    let url = Url::parse(&config.site.url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid site url '{}': {}", config.site.url, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Site url '{}' must use http or https",
            config.site.url
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Site url '{}' has no host",
            config.site.url
        )));
    }

    for pattern in &config.site.allowed_hosts {
        validate_host_pattern(pattern)?;
    }

    Ok(())
}

fn validate_crawl_rules(rules: &CrawlRules) -> Result<(), ConfigError> {
    if !rules.click_default_elements && rules.click.is_empty() {
        return Err(ConfigError::Validation(
            "click-default-elements is off and no click selectors are given; nothing would be clicked"
                .to_string(),
        ));
    }

    for selector in rules
        .click
        .iter()
        .chain(&rules.dont_click)
        .chain(&rules.dont_click_children_of)
    {
        validate_selector(selector)?;
    }

    if rules.max_dispatch_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max-dispatch-retries must be at most 10, got {}",
            rules.max_dispatch_retries
        )));
    }

    Ok(())
}

/// Zero is not a usable bound for states or runtime; `"unlimited"` switches them off
fn validate_limits(limits: &LimitsConfig) -> Result<(), ConfigError> {
    if limits.max_states == Limit::Bounded(0) {
        return Err(ConfigError::Validation(
            "max-states must be at least 1 or \"unlimited\"".to_string(),
        ));
    }
    if limits.max_runtime_secs == Limit::Bounded(0) {
        return Err(ConfigError::Validation(
            "max-runtime-secs must be at least 1 or \"unlimited\"".to_string(),
        ));
    }
    Ok(())
}

fn validate_browser(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.count < 1 || config.count > 16 {
        return Err(ConfigError::Validation(format!(
            "browser count must be between 1 and 16, got {}",
            config.count
        )));
    }

    if config.browser_type == BrowserType::Remote && config.driver_url.is_none() {
        return Err(ConfigError::Validation(
            "remote browser requires driver-url".to_string(),
        ));
    }

    if config.browser_type == BrowserType::Remote && config.driver_binary.is_some() {
        return Err(ConfigError::Validation(
            "driver-binary cannot be used with a remote browser".to_string(),
        ));
    }

    if let Some(driver_url) = &config.driver_url {
        Url::parse(driver_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid driver-url '{}': {}", driver_url, e))
        })?;
    }

    if config.page_load_timeout_ms < 1000 {
        return Err(ConfigError::Validation(format!(
            "page-load-timeout-ms must be >= 1000ms, got {}ms",
            config.page_load_timeout_ms
        )));
    }

    Ok(())
}

fn validate_proxy(config: &Config) -> Result<(), ConfigError> {
    if config.proxy.enabled {
        if config.proxy.host.is_empty() {
            return Err(ConfigError::Validation(
                "proxy host cannot be empty".to_string(),
            ));
        }
        if config.proxy.port == 0 {
            return Err(ConfigError::Validation("proxy port cannot be 0".to_string()));
        }
    }
    Ok(())
}

fn validate_state_abstraction(config: &StateAbstractionConfig) -> Result<(), ConfigError> {
    if config.similarity_threshold > 64 {
        return Err(ConfigError::Validation(format!(
            "similarity-threshold must be between 0 and 64, got {}",
            config.similarity_threshold
        )));
    }

    if config.similarity_threshold > 0 && config.strategy != FingerprintStrategy::PerceptualHash {
        return Err(ConfigError::Validation(
            "similarity-threshold only applies to the perceptual-hash strategy".to_string(),
        ));
    }

    for selector in &config.ignore_selectors {
        validate_selector(selector)?;
    }

    Ok(())
}

fn validate_form_inputs(config: &Config) -> Result<(), ConfigError> {
    for entry in &config.form_inputs {
        if entry.field.trim().is_empty() {
            return Err(ConfigError::Validation(
                "form-input field cannot be empty".to_string(),
            ));
        }
    }

    if config.crawl_rules.form_fill_mode == FormFillMode::Manual && config.form_inputs.is_empty() {
        tracing::warn!("form-fill-mode is manual but no form-input entries are configured");
    }

    Ok(())
}

fn validate_output(config: &Config) -> Result<(), ConfigError> {
    let directory = config.output.directory.trim();
    if directory.is_empty() {
        return Err(ConfigError::Validation(
            "output directory cannot be empty".to_string(),
        ));
    }
    if directory == "/" {
        return Err(ConfigError::Validation(
            "output directory cannot be the filesystem root".to_string(),
        ));
    }
    Ok(())
}

/// Validates a CSS selector by compiling it
fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}

/// Validates a host pattern (supports a leading `*.` wildcard)
fn validate_host_pattern(pattern: &str) -> Result<(), ConfigError> {
    let host = pattern.strip_prefix("*.").unwrap_or(pattern);

    if host.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Host pattern '{}' is empty",
            pattern
        )));
    }

    if !host
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "Host pattern '{}' contains invalid characters",
            pattern
        )));
    }

    if host.starts_with('.') || host.ends_with('.') || host.contains("..") {
        return Err(ConfigError::Validation(format!(
            "Host pattern '{}' is malformed",
            pattern
        )));
    }

    Ok(())
}
