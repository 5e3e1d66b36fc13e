//! Configuration module
//!
//! This module handles loading, parsing, and validating TOML crawl
//! configuration files, and freezing them into the immutable value shared by
//! every component of a run.
//!
//! # Example
//!
//! ```no_run
//! use statecrawl::config::{load_config, Overrides};
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! let config = config.freeze(&Overrides::default()).unwrap();
//! println!("Crawling {} with {} browser(s)", config.site.url, config.browser.count);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrowserConfig, BrowserType, Config, CrawlRules, FormFillMode, FormInputEntry, FrontierOrder,
    Limit, LimitsConfig, OutputConfig, PluginsConfig, ProxyConfig, SiteConfig,
    StateAbstractionConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config, Overrides};
