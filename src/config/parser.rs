use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

/// Values given on the command line that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Proxy port (second positional argument)
    pub proxy_port: Option<u16>,

    /// Target URL replacing `site.url`
    pub url: Option<String>,
}

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use statecrawl::config::load_config;
///
/// let config = load_config(Path::new("crawl.toml")).unwrap();
/// println!("Target: {}", config.site.url);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Stored with every run so crawls made with different settings can be told apart.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

impl Config {
    /// Applies command-line overrides, re-validates, and freezes the configuration
    ///
    /// The returned value is the only configuration the crawl ever sees.
    pub fn freeze(mut self, overrides: &Overrides) -> Result<Arc<Config>, ConfigError> {
        if let Some(port) = overrides.proxy_port {
            self.proxy.port = port;
        }
        if let Some(url) = &overrides.url {
            self.site.url = url.clone();
        }
        validate(&self)?;
        Ok(Arc::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrowserType, FormFillMode, FrontierOrder, Limit};
    use crate::fingerprint::FingerprintStrategy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[site]
url = "http://0.0.0.0:8085/"

[crawl-rules]
form-fill-mode = "normal"
click-default-elements = true
crawl-hidden-anchors = true
crawl-frames = false
click-elements-in-random-order = false
wait-after-reload-ms = 200
wait-after-event-ms = 200

[limits]
max-states = "unlimited"
max-depth = "unlimited"
max-runtime-secs = "unlimited"

[browser]
type = "chrome"
count = 1

[proxy]
host = "0.0.0.0"
port = 8080

[state-abstraction]
strategy = "perceptual-hash"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.site.url, "http://0.0.0.0:8085/");
        assert_eq!(config.crawl_rules.form_fill_mode, FormFillMode::Normal);
        assert!(config.crawl_rules.crawl_hidden_anchors);
        assert!(!config.crawl_rules.crawl_frames);
        assert_eq!(config.crawl_rules.wait_after_event_ms, 200);
        assert_eq!(config.limits.max_states, Limit::Unlimited);
        assert_eq!(config.limits.max_depth, Limit::Unlimited);
        assert_eq!(config.browser.browser_type, BrowserType::Chrome);
        assert_eq!(config.proxy.address(), Some("0.0.0.0:8080".to_string()));
        assert_eq!(
            config.state_abstraction.strategy,
            FingerprintStrategy::PerceptualHash
        );
    }

    #[test]
    fn test_defaults_for_minimal_config() {
        let config = parse_config("[site]\nurl = \"http://localhost:3000/\"\n").unwrap();

        assert!(config.crawl_rules.click_default_elements);
        assert!(config.crawl_rules.crawl_frames);
        assert!(!config.crawl_rules.crawl_hidden_anchors);
        assert_eq!(config.crawl_rules.frontier_order, FrontierOrder::BreadthFirst);
        assert_eq!(config.crawl_rules.wait_after_reload_ms, 500);
        assert_eq!(config.limits.max_depth, Limit::Bounded(2));
        assert_eq!(config.limits.max_runtime_secs, Limit::Bounded(3600));
        assert_eq!(config.browser.count, 1);
        assert_eq!(config.proxy.port, 8080);
        assert_eq!(config.output.directory, "out");
    }

    #[test]
    fn test_bounded_limits() {
        let config = parse_config(
            r#"
[site]
url = "http://localhost:3000/"

[limits]
max-states = 10
max-depth = 5
"#,
        )
        .unwrap();

        assert_eq!(config.limits.max_states, Limit::Bounded(10));
        assert_eq!(config.limits.max_depth, Limit::Bounded(5));
    }

    #[test]
    fn test_invalid_limit_word() {
        let result = parse_config(
            r#"
[site]
url = "http://localhost:3000/"

[limits]
max-states = "lots"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_manual_form_inputs() {
        let config = parse_config(
            r#"
[site]
url = "http://localhost:3000/"

[crawl-rules]
form-fill-mode = "manual"

[[form-input]]
field = "email"
value = "someone@example.com"

[[form-input]]
field = "password"
value = "hunter2"
"#,
        )
        .unwrap();

        assert_eq!(config.crawl_rules.form_fill_mode, FormFillMode::Manual);
        assert_eq!(config.form_inputs.len(), 2);
        assert_eq!(config.form_inputs[0].field, "email");
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/crawl.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config(
            r#"
[site]
url = "http://localhost:3000/"

[browser]
count = 0
"#,
        );
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_freeze_applies_overrides() {
        let config = parse_config("[site]\nurl = \"http://localhost:3000/\"\n").unwrap();
        let overrides = Overrides {
            proxy_port: Some(9090),
            url: Some("http://127.0.0.1:8085/".to_string()),
        };

        let frozen = config.freeze(&overrides).unwrap();

        assert_eq!(frozen.proxy.port, 9090);
        assert_eq!(frozen.site.url, "http://127.0.0.1:8085/");
    }

    #[test]
    fn test_freeze_rejects_invalid_override() {
        let config = parse_config("[site]\nurl = \"http://localhost:3000/\"\n").unwrap();
        let overrides = Overrides {
            proxy_port: None,
            url: Some("not a url".to_string()),
        };

        assert!(config.freeze(&overrides).is_err());
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
