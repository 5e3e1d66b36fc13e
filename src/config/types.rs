use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Main configuration structure
///
/// Loaded once from TOML, adjusted by command-line overrides, then shared
/// read-only (as `Arc<Config>`) with every component of the crawl.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub site: SiteConfig,
    #[serde(rename = "crawl-rules", default)]
    pub crawl_rules: CrawlRules,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(rename = "state-abstraction", default)]
    pub state_abstraction: StateAbstractionConfig,
    #[serde(rename = "form-input", default)]
    pub form_inputs: Vec<FormInputEntry>,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Target site configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// URL the crawl starts from (the root state)
    pub url: String,

    /// Additional hosts the crawler may follow anchors to
    #[serde(rename = "allowed-hosts", default)]
    pub allowed_hosts: Vec<String>,
}

/// Rules deciding which elements are exercised and how
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlRules {
    #[serde(rename = "form-fill-mode", default)]
    pub form_fill_mode: FormFillMode,

    /// Click anchors, buttons and submit inputs
    #[serde(rename = "click-default-elements", default = "default_true")]
    pub click_default_elements: bool,

    /// Extra CSS selectors added to the click set
    #[serde(default)]
    pub click: Vec<String>,

    /// CSS selectors that are never clicked
    #[serde(rename = "dont-click", default)]
    pub dont_click: Vec<String>,

    /// CSS selectors whose descendants are never clicked
    #[serde(rename = "dont-click-children-of", default)]
    pub dont_click_children_of: Vec<String>,

    #[serde(rename = "crawl-hidden-anchors", default)]
    pub crawl_hidden_anchors: bool,

    #[serde(rename = "crawl-frames", default = "default_true")]
    pub crawl_frames: bool,

    #[serde(rename = "click-elements-in-random-order", default)]
    pub click_elements_in_random_order: bool,

    #[serde(rename = "frontier-order", default)]
    pub frontier_order: FrontierOrder,

    /// Settle time after loading the root URL (milliseconds)
    #[serde(rename = "wait-after-reload-ms", default = "default_wait_ms")]
    pub wait_after_reload_ms: u64,

    /// Settle time after firing an event (milliseconds)
    #[serde(rename = "wait-after-event-ms", default = "default_wait_ms")]
    pub wait_after_event_ms: u64,

    /// Retries of a failed dispatch before the action is given up
    #[serde(rename = "max-dispatch-retries", default = "default_dispatch_retries")]
    pub max_dispatch_retries: u32,

    /// Seed for random click order, random frontier order and random form values
    #[serde(rename = "random-seed", default)]
    pub random_seed: u64,
}

impl CrawlRules {
    pub fn wait_after_reload(&self) -> Duration {
        Duration::from_millis(self.wait_after_reload_ms)
    }

    pub fn wait_after_event(&self) -> Duration {
        Duration::from_millis(self.wait_after_event_ms)
    }
}

impl Default for CrawlRules {
    fn default() -> Self {
        Self {
            form_fill_mode: FormFillMode::default(),
            click_default_elements: true,
            click: Vec::new(),
            dont_click: Vec::new(),
            dont_click_children_of: Vec::new(),
            crawl_hidden_anchors: false,
            crawl_frames: true,
            click_elements_in_random_order: false,
            frontier_order: FrontierOrder::default(),
            wait_after_reload_ms: default_wait_ms(),
            wait_after_event_ms: default_wait_ms(),
            max_dispatch_retries: default_dispatch_retries(),
            random_seed: 0,
        }
    }
}

/// How form fields are filled before an action is fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormFillMode {
    /// Plausible values derived from field type and name
    #[default]
    Normal,
    /// Random values, stable per field
    Random,
    /// Values supplied in `[[form-input]]` only
    Manual,
}

/// Order in which queued actions leave the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrontierOrder {
    #[default]
    BreadthFirst,
    DepthFirst,
    Random,
}

/// A crawl bound that may be switched off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "LimitRepr")]
pub enum Limit {
    Unlimited,
    Bounded(u32),
}

impl Limit {
    /// Returns true if `value` has reached this limit
    pub fn is_reached(&self, value: u32) -> bool {
        match self {
            Self::Unlimited => false,
            Self::Bounded(max) => value >= *max,
        }
    }

    pub fn bound(&self) -> Option<u32> {
        match self {
            Self::Unlimited => None,
            Self::Bounded(max) => Some(*max),
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Bounded(max) => write!(f, "{}", max),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Count(u32),
    Word(String),
}

impl TryFrom<LimitRepr> for Limit {
    type Error = ConfigError;

    fn try_from(repr: LimitRepr) -> Result<Self, Self::Error> {
        match repr {
            LimitRepr::Count(max) => Ok(Limit::Bounded(max)),
            LimitRepr::Word(word) if word.eq_ignore_ascii_case("unlimited") => {
                Ok(Limit::Unlimited)
            }
            LimitRepr::Word(word) => Err(ConfigError::InvalidLimit(word)),
        }
    }
}

/// Termination bounds
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(rename = "max-states", default = "default_max_states")]
    pub max_states: Limit,

    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: Limit,

    #[serde(rename = "max-runtime-secs", default = "default_max_runtime")]
    pub max_runtime_secs: Limit,
}

impl LimitsConfig {
    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_secs
            .bound()
            .map(|secs| Duration::from_secs(u64::from(secs)))
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_states: default_max_states(),
            max_depth: default_max_depth(),
            max_runtime_secs: default_max_runtime(),
        }
    }
}

/// Browser backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserType {
    #[default]
    Chrome,
    Firefox,
    /// An already running WebDriver endpoint (Selenium grid, remote chromedriver)
    Remote,
}

impl BrowserType {
    /// WebDriver endpoint used when none is configured
    pub fn default_driver_url(&self) -> Option<&'static str> {
        match self {
            Self::Chrome => Some("http://localhost:9515"),
            Self::Firefox => Some("http://localhost:4444"),
            Self::Remote => None,
        }
    }
}

impl fmt::Display for BrowserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chrome => write!(f, "chrome"),
            Self::Firefox => write!(f, "firefox"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Browser pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(rename = "type", default)]
    pub browser_type: BrowserType,

    /// Number of concurrent browser sessions (one worker each)
    #[serde(default = "default_browser_count")]
    pub count: u32,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// WebDriver endpoint; defaults per browser type
    #[serde(rename = "driver-url", default)]
    pub driver_url: Option<String>,

    /// chromedriver/geckodriver binary to spawn instead of connecting to a running one
    #[serde(rename = "driver-binary", default)]
    pub driver_binary: Option<String>,

    #[serde(rename = "remote-browser-name", default = "default_remote_browser")]
    pub remote_browser_name: String,

    #[serde(rename = "page-load-timeout-ms", default = "default_page_load_timeout")]
    pub page_load_timeout_ms: u64,

    /// Replacement sessions allowed after browsers die
    #[serde(rename = "max-session-restarts", default = "default_session_restarts")]
    pub max_session_restarts: u32,
}

impl BrowserConfig {
    /// Returns the configured WebDriver endpoint or the browser type's default
    pub fn effective_driver_url(&self) -> Option<String> {
        self.driver_url
            .clone()
            .or_else(|| self.browser_type.default_driver_url().map(str::to_string))
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser_type: BrowserType::default(),
            count: default_browser_count(),
            headless: true,
            driver_url: None,
            driver_binary: None,
            remote_browser_name: default_remote_browser(),
            page_load_timeout_ms: default_page_load_timeout(),
            max_session_restarts: default_session_restarts(),
        }
    }
}

/// Proxy all browser traffic is routed through
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_proxy_host")]
    pub host: String,

    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

impl ProxyConfig {
    /// Returns `host:port`, or None when the proxy is disabled
    pub fn address(&self) -> Option<String> {
        self.enabled.then(|| format!("{}:{}", self.host, self.port))
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_proxy_host(),
            port: default_proxy_port(),
        }
    }
}

/// How states are told apart
#[derive(Debug, Clone, Deserialize)]
pub struct StateAbstractionConfig {
    #[serde(default)]
    pub strategy: crate::fingerprint::FingerprintStrategy,

    /// Maximum Hamming distance at which perceptual hashes are the same state
    #[serde(rename = "similarity-threshold", default)]
    pub similarity_threshold: u32,

    /// Subtrees removed before hashing (ads, clocks, counters)
    #[serde(rename = "ignore-selectors", default)]
    pub ignore_selectors: Vec<String>,
}

impl Default for StateAbstractionConfig {
    fn default() -> Self {
        Self {
            strategy: crate::fingerprint::FingerprintStrategy::default(),
            similarity_threshold: 0,
            ignore_selectors: Vec::new(),
        }
    }
}

/// A manually supplied form value
#[derive(Debug, Clone, Deserialize)]
pub struct FormInputEntry {
    /// Field `name` or `id`
    pub field: String,
    pub value: String,
}

/// Built-in plugins
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginsConfig {
    #[serde(rename = "crawl-overview", default)]
    pub crawl_overview: bool,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory created (or emptied) at the start of every crawl
    #[serde(default = "default_output_dir")]
    pub directory: String,

    /// Capture a screenshot of every new state
    #[serde(default)]
    pub screenshots: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            screenshots: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_wait_ms() -> u64 {
    500
}

fn default_dispatch_retries() -> u32 {
    2
}

fn default_max_states() -> Limit {
    Limit::Unlimited
}

fn default_max_depth() -> Limit {
    Limit::Bounded(2)
}

fn default_max_runtime() -> Limit {
    Limit::Bounded(3600)
}

fn default_browser_count() -> u32 {
    1
}

fn default_remote_browser() -> String {
    "chrome".to_string()
}

fn default_page_load_timeout() -> u64 {
    30_000
}

fn default_session_restarts() -> u32 {
    2
}

fn default_proxy_host() -> String {
    "127.0.0.1".to_string()
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_output_dir() -> String {
    "out".to_string()
}
