//! Browser module
//!
//! This module puts real browsers behind a small async interface so the
//! crawler never depends on a particular automation protocol.
//!
//! # Components
//!
//! - `BrowserDriver`: One controllable browser (navigate, capture, fire)
//! - `DriverFactory`: Launches drivers for the slots of the pool
//! - `WebDriverFactory`: W3C WebDriver implementation (chromedriver,
//!   geckodriver, Selenium grid)
//! - `BrowserSession`: A driver plus its health, settle waits and the replay
//!   logic that walks it back to a known state
//! - `SessionPool`: The fixed-size set of sessions shared by the workers

mod pool;
mod session;
mod webdriver;

use crate::candidates::Action;
use crate::fingerprint::PageCapture;
use crate::forms::FilledInput;
use crate::{BrowserError, SessionFatalError};
use async_trait::async_trait;

pub use pool::SessionPool;
pub use session::BrowserSession;
pub use webdriver::WebDriverFactory;

/// What a capture should include besides the top-level DOM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureOptions {
    /// Capture the documents of (nested) frames
    pub frames: bool,
    /// Sample a luminance raster for perceptual fingerprints
    pub raster: bool,
    /// Take a PNG screenshot
    pub screenshot: bool,
}

/// A single controllable browser
///
/// Implementations own one browser window. All methods are called from one
/// worker at a time.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Loads `url` and waits for the document to be ready
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Captures the page currently shown
    async fn capture(&mut self, options: CaptureOptions) -> Result<PageCapture, BrowserError>;

    /// Fills `inputs` and then performs `action`
    async fn fire(&mut self, action: &Action, inputs: &[FilledInput]) -> Result<(), BrowserError>;

    /// URL of the page currently shown
    async fn current_url(&mut self) -> Result<String, BrowserError>;

    /// Ends the browser session; the driver is unusable afterwards
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Starts browsers
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Launches the browser for pool slot `slot`
    async fn launch(&self, slot: usize) -> Result<Box<dyn BrowserDriver>, SessionFatalError>;
}
