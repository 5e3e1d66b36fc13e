//! W3C WebDriver client
//!
//! Speaks the WebDriver HTTP protocol to chromedriver, geckodriver or a
//! Selenium grid. One `WebDriverSession` is one browser window.
//!
//! # Error Mapping
//!
//! | WebDriver error | Result |
//! |-----------------|--------|
//! | `no such element`, `stale element reference` | `ElementNotFound` |
//! | `element not interactable`, `element click intercepted`, `invalid element state` | `NotInteractable` |
//! | `no such frame` | `FrameUnavailable` |
//! | `timeout` | `NavigationTimeout` |
//! | `javascript error`, `script timeout` | `Script` |
//! | `invalid session id`, `session not created`, `no such window`, connection lost | fatal `Crashed` |
//! | anything else | `Browser` |

use super::{BrowserDriver, CaptureOptions, DriverFactory};
use crate::candidates::{Action, ActionKind};
use crate::config::{BrowserType, Config};
use crate::fingerprint::{FrameCapture, PageCapture, Raster};
use crate::forms::{FieldValue, FilledInput};
use crate::{BrowserError, DispatchError, SessionFatalError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use url::Url;

/// Key under which WebDriver returns element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735d46c0d4";

const SCRIPT_TIMEOUT_MS: u64 = 30_000;
const DRIVER_START_TIMEOUT: Duration = Duration::from_secs(10);
const DRIVER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Frames nested deeper than this are not captured
const MAX_FRAME_DEPTH: usize = 4;

const DOM_SCRIPT: &str = "return document.documentElement ? document.documentElement.outerHTML : '';";

const FRAME_COUNT_SCRIPT: &str = "return window.frames.length;";

const SELECT_SCRIPT: &str = "arguments[0].value = arguments[1];\
    arguments[0].dispatchEvent(new Event('input', { bubbles: true }));\
    arguments[0].dispatchEvent(new Event('change', { bubbles: true }));";

/// Samples a 64x48 luminance grid of the viewport from computed styles
const RASTER_SCRIPT: &str = r#"
const W = 64, H = 48;
const vw = Math.max(1, window.innerWidth), vh = Math.max(1, window.innerHeight);
const shade = (el) => {
  for (let node = el; node && node.nodeType === 1; node = node.parentElement) {
    const m = getComputedStyle(node).backgroundColor.match(/rgba?\(([\d.]+),\s*([\d.]+),\s*([\d.]+)(?:,\s*([\d.]+))?/);
    if (m && (m[4] === undefined || parseFloat(m[4]) > 0)) {
      return 0.299 * m[1] + 0.587 * m[2] + 0.114 * m[3];
    }
  }
  return 255;
};
const luma = [];
for (let y = 0; y < H; y++) {
  for (let x = 0; x < W; x++) {
    const el = document.elementFromPoint((x + 0.5) * vw / W, (y + 0.5) * vh / H);
    let v = shade(el);
    if (el && /^(IMG|SVG|CANVAS|VIDEO)$/i.test(el.tagName)) {
      v *= 0.5;
    } else if (el && Array.from(el.childNodes).some(n => n.nodeType === 3 && n.textContent.trim())) {
      v *= 0.7;
    }
    luma.push(Math.max(0, Math.min(255, Math.round(v))));
  }
}
return { width: W, height: H, luma: luma };
"#;

#[derive(Deserialize)]
struct RasterReply {
    width: u32,
    height: u32,
    luma: Vec<u8>,
}

/// Starts WebDriver sessions from the browser configuration
pub struct WebDriverFactory {
    config: Arc<Config>,
    client: Client,
}

impl WebDriverFactory {
    /// Creates a factory
    ///
    /// # Returns
    ///
    /// * `Ok(WebDriverFactory)` - Ready factory
    /// * `Err(reqwest::Error)` - The HTTP client could not be built
    pub fn new(config: Arc<Config>) -> Result<Self, reqwest::Error> {
        let page_load = Duration::from_millis(config.browser.page_load_timeout_ms);
        let client = Client::builder()
            .timeout(page_load + Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { config, client })
    }

    /// First port of spawned drivers; slot `n` listens on `base + n`
    fn base_port(&self) -> u16 {
        self.config
            .browser
            .effective_driver_url()
            .and_then(|url| Url::parse(&url).ok())
            .and_then(|url| url.port_or_known_default())
            .unwrap_or(9515)
    }

    async fn spawn_driver(
        &self,
        binary: &str,
        slot: usize,
    ) -> Result<(String, Child), SessionFatalError> {
        let port = self.base_port().saturating_add(slot as u16);
        let child = Command::new(binary)
            .arg(format!("--port={}", port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionFatalError::StartFailed {
                slot,
                message: format!("failed to spawn {}: {}", binary, e),
            })?;

        let base = format!("http://127.0.0.1:{}", port);
        wait_until_ready(&self.client, &base)
            .await
            .map_err(|message| SessionFatalError::StartFailed { slot, message })?;

        tracing::debug!("Driver for session {} listening on port {}", slot, port);
        Ok((base, child))
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    async fn launch(&self, slot: usize) -> Result<Box<dyn BrowserDriver>, SessionFatalError> {
        let (base, process) = match &self.config.browser.driver_binary {
            Some(binary) => {
                let (base, child) = self.spawn_driver(binary, slot).await?;
                (base, Some(child))
            }
            None => {
                let base = self.config.browser.effective_driver_url().ok_or_else(|| {
                    SessionFatalError::StartFailed {
                        slot,
                        message: "no driver-url configured".to_string(),
                    }
                })?;
                (base, None)
            }
        };
        let base = base.trim_end_matches('/').to_string();

        let reply = request(
            &self.client,
            Method::POST,
            &format!("{}/session", base),
            Some(capabilities(&self.config)),
        )
        .await
        .map_err(|e| SessionFatalError::StartFailed {
            slot,
            message: e.to_string(),
        })?;

        let session_id = reply
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionFatalError::StartFailed {
                slot,
                message: "driver returned no session id".to_string(),
            })?
            .to_string();

        tracing::info!(
            "Started {} session {} ({})",
            self.config.browser.browser_type,
            slot,
            session_id
        );

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base,
            session_id,
            slot,
            process,
        }))
    }
}

/// Builds the `New Session` payload
fn capabilities(config: &Config) -> Value {
    let browser = &config.browser;
    let browser_name = match browser.browser_type {
        BrowserType::Chrome => "chrome",
        BrowserType::Firefox => "firefox",
        BrowserType::Remote => browser.remote_browser_name.as_str(),
    };

    let mut caps = json!({
        "browserName": browser_name,
        "acceptInsecureCerts": true,
        "pageLoadStrategy": "normal",
        "timeouts": {
            "pageLoad": browser.page_load_timeout_ms,
            "script": SCRIPT_TIMEOUT_MS,
            "implicit": 0,
        },
    });

    if let Some(address) = config.proxy.address() {
        caps["proxy"] = json!({
            "proxyType": "manual",
            "httpProxy": address,
            "sslProxy": address,
        });
    }

    match browser_name {
        "chrome" | "chromium" | "MicrosoftEdge" => {
            let mut args = vec!["--window-size=1280,960", "--disable-gpu", "--no-sandbox"];
            if browser.headless {
                args.push("--headless=new");
            }
            caps["goog:chromeOptions"] = json!({ "args": args });
        }
        "firefox" => {
            let mut args = vec!["-width=1280", "-height=960"];
            if browser.headless {
                args.push("-headless");
            }
            caps["moz:firefoxOptions"] = json!({ "args": args });
        }
        _ => {}
    }

    json!({ "capabilities": { "alwaysMatch": caps } })
}

/// Polls `{base}/status` until the driver reports ready
async fn wait_until_ready(client: &Client, base: &str) -> Result<(), String> {
    let status_url = format!("{}/status", base);
    let poll = async {
        loop {
            if let Ok(value) = request(client, Method::GET, &status_url, None).await {
                if value.get("ready").and_then(Value::as_bool).unwrap_or(true) {
                    return;
                }
            }
            tokio::time::sleep(DRIVER_POLL_INTERVAL).await;
        }
    };

    tokio::time::timeout(DRIVER_START_TIMEOUT, poll)
        .await
        .map_err(|_| format!("driver at {} not ready after {:?}", base, DRIVER_START_TIMEOUT))
}

/// Failure of a single WebDriver request
#[derive(Debug, Clone, PartialEq)]
enum WireError {
    /// The driver did not answer in time
    Timeout(String),
    /// The driver could not be reached
    Transport(String),
    /// The driver answered with a WebDriver error
    Protocol { error: String, message: String },
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(m) => write!(f, "timed out: {}", m),
            Self::Transport(m) => write!(f, "connection failed: {}", m),
            Self::Protocol { error, message } => write!(f, "{}: {}", error, message),
        }
    }
}

impl From<reqwest::Error> for WireError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// What a command was aimed at, for error reporting
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Element(&'a str),
    Navigation(&'a str),
    Frame(&'a str),
    Page,
}

impl Target<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Element(s) | Self::Navigation(s) | Self::Frame(s) => s.to_string(),
            Self::Page => "page".to_string(),
        }
    }
}

impl WireError {
    fn into_browser_error(self, slot: usize, target: Target<'_>) -> BrowserError {
        let (error, message) = match self {
            Self::Transport(message) => {
                return SessionFatalError::Crashed { slot, message }.into();
            }
            Self::Timeout(message) => {
                return match target {
                    Target::Navigation(url) => DispatchError::NavigationTimeout {
                        url: url.to_string(),
                    },
                    _ => DispatchError::Browser(format!("command timed out: {}", message)),
                }
                .into();
            }
            Self::Protocol { error, message } => (error, message),
        };

        let dispatch = match error.as_str() {
            "invalid session id" | "session not created" | "no such window" => {
                return SessionFatalError::Crashed {
                    slot,
                    message: format!("{}: {}", error, message),
                }
                .into();
            }
            "no such element" | "stale element reference" => DispatchError::ElementNotFound {
                selector: target.describe(),
            },
            "element not interactable" | "element click intercepted" | "invalid element state" => {
                DispatchError::NotInteractable {
                    selector: target.describe(),
                    message,
                }
            }
            "no such frame" => DispatchError::FrameUnavailable {
                frame: target.describe(),
            },
            "timeout" => DispatchError::NavigationTimeout {
                url: target.describe(),
            },
            "javascript error" | "script timeout" => DispatchError::Script(message),
            _ => DispatchError::Browser(format!("{}: {}", error, message)),
        };
        dispatch.into()
    }
}

/// Sends one WebDriver request and unwraps the `value` member of the reply
async fn request(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, WireError> {
    let mut builder = client.request(method, url);
    if let Some(body) = body {
        builder = builder.json(&body);
    }

    let response = builder.send().await?;
    let status = response.status();
    let text = response.text().await?;
    let mut payload: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
    Err(WireError::Protocol {
        error: field("error").unwrap_or_else(|| format!("http {}", status.as_u16())),
        message: field("message").unwrap_or(text),
    })
}

/// Parses an index path such as `"1/0"`
fn parse_frame_path(frame: &str) -> Result<Vec<usize>, DispatchError> {
    frame
        .split('/')
        .map(|part| {
            part.parse::<usize>()
                .map_err(|_| DispatchError::FrameUnavailable {
                    frame: frame.to_string(),
                })
        })
        .collect()
}

fn join_path(path: &[usize]) -> String {
    path.iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

/// One browser window controlled over WebDriver
pub(crate) struct WebDriverSession {
    client: Client,
    base: String,
    session_id: String,
    slot: usize,
    /// Driver process spawned for this session, killed on drop
    process: Option<Child>,
}

impl WebDriverSession {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        target: Target<'_>,
    ) -> Result<Value, BrowserError> {
        let url = format!("{}/session/{}{}", self.base, self.session_id, path);
        request(&self.client, method, &url, body)
            .await
            .map_err(|e| e.into_browser_error(self.slot, target))
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, BrowserError> {
        self.send(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
            Target::Page,
        )
        .await
    }

    async fn top_frame(&self) -> Result<(), BrowserError> {
        self.send(Method::POST, "/frame", Some(json!({ "id": null })), Target::Page)
            .await
            .map(|_| ())
    }

    /// Switches to the frame at `path`, starting from the top document
    async fn switch_to_path(&self, path: &[usize]) -> Result<(), BrowserError> {
        self.top_frame().await?;
        let described = join_path(path);
        for index in path {
            self.send(
                Method::POST,
                "/frame",
                Some(json!({ "id": index })),
                Target::Frame(&described),
            )
            .await?;
        }
        Ok(())
    }

    async fn find(&self, selector: &str) -> Result<String, BrowserError> {
        let value = self
            .send(
                Method::POST,
                "/element",
                Some(json!({ "using": "css selector", "value": selector })),
                Target::Element(selector),
            )
            .await?;

        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                DispatchError::ElementNotFound {
                    selector: selector.to_string(),
                }
                .into()
            })
    }

    async fn click(&self, element: &str, selector: &str) -> Result<(), BrowserError> {
        self.send(
            Method::POST,
            &format!("/element/{}/click", element),
            Some(json!({})),
            Target::Element(selector),
        )
        .await
        .map(|_| ())
    }

    async fn fill(&self, input: &FilledInput) -> Result<(), BrowserError> {
        let selector = input.selector.as_str();
        let element = self.find(selector).await?;

        match &input.value {
            FieldValue::Text(text) => {
                self.send(
                    Method::POST,
                    &format!("/element/{}/clear", element),
                    Some(json!({})),
                    Target::Element(selector),
                )
                .await?;
                self.send(
                    Method::POST,
                    &format!("/element/{}/value", element),
                    Some(json!({ "text": text })),
                    Target::Element(selector),
                )
                .await?;
            }
            FieldValue::Checked(wanted) => {
                let selected = self
                    .send(
                        Method::GET,
                        &format!("/element/{}/selected", element),
                        None,
                        Target::Element(selector),
                    )
                    .await?;
                if selected.as_bool() != Some(*wanted) {
                    self.click(&element, selector).await?;
                }
            }
            FieldValue::Select(option) => {
                self.execute(SELECT_SCRIPT, vec![json!({ ELEMENT_KEY: element }), json!(option)])
                    .await?;
            }
        }
        Ok(())
    }

    async fn document(&self) -> Result<String, BrowserError> {
        let value = self.execute(DOM_SCRIPT, Vec::new()).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Captures every reachable frame, breadth first
    async fn capture_frames(&self) -> Result<Vec<FrameCapture>, BrowserError> {
        let mut frames = Vec::new();
        let mut parents: VecDeque<Vec<usize>> = VecDeque::from([Vec::new()]);

        while let Some(parent) = parents.pop_front() {
            self.switch_to_path(&parent).await?;
            let count = self
                .execute(FRAME_COUNT_SCRIPT, Vec::new())
                .await?
                .as_u64()
                .unwrap_or(0);

            for index in 0..count as usize {
                let mut path = parent.clone();
                path.push(index);

                match self.switch_to_path(&path).await {
                    Ok(()) => {}
                    Err(BrowserError::Dispatch(e)) => {
                        tracing::debug!("Skipping frame {}: {}", join_path(&path), e);
                        continue;
                    }
                    Err(e) => return Err(e),
                }

                frames.push(FrameCapture {
                    path: join_path(&path),
                    dom: self.document().await?,
                });
                if path.len() < MAX_FRAME_DEPTH {
                    parents.push_back(path);
                }
            }
        }

        self.top_frame().await?;
        Ok(frames)
    }

    async fn raster(&self) -> Result<Raster, BrowserError> {
        let value = self.execute(RASTER_SCRIPT, Vec::new()).await?;
        let reply: RasterReply = serde_json::from_value(value)
            .map_err(|e| DispatchError::Script(format!("unexpected raster reply: {}", e)))?;
        Ok(Raster::new(reply.width, reply.height, reply.luma))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let value = self
            .send(Method::GET, "/screenshot", None, Target::Page)
            .await?;
        let encoded = value.as_str().unwrap_or_default();
        STANDARD
            .decode(encoded)
            .map_err(|e| DispatchError::Browser(format!("invalid screenshot data: {}", e)).into())
    }
}

#[async_trait]
impl BrowserDriver for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.send(
            Method::POST,
            "/url",
            Some(json!({ "url": url })),
            Target::Navigation(url),
        )
        .await
        .map(|_| ())
    }

    async fn capture(&mut self, options: CaptureOptions) -> Result<PageCapture, BrowserError> {
        self.top_frame().await?;
        let url = self.current_url().await?;
        let dom = self.document().await?;

        let frames = if options.frames {
            self.capture_frames().await?
        } else {
            Vec::new()
        };
        let raster = if options.raster {
            Some(self.raster().await?)
        } else {
            None
        };
        let screenshot = if options.screenshot {
            Some(self.screenshot().await?)
        } else {
            None
        };

        Ok(PageCapture {
            url,
            dom,
            frames,
            raster,
            screenshot,
        })
    }

    async fn fire(&mut self, action: &Action, inputs: &[FilledInput]) -> Result<(), BrowserError> {
        if action.kind == ActionKind::FollowHref {
            let href = action.href.as_deref().ok_or_else(|| DispatchError::ElementNotFound {
                selector: action.selector.clone(),
            })?;
            self.top_frame().await?;
            return self.navigate(href).await;
        }

        let path = match action.frame.as_deref() {
            Some(frame) => parse_frame_path(frame)?,
            None => Vec::new(),
        };
        self.switch_to_path(&path).await?;

        for input in inputs {
            self.fill(input).await?;
        }

        let element = self.find(&action.selector).await?;
        self.click(&element, &action.selector).await?;
        self.top_frame().await
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        let value = self.send(Method::GET, "/url", None, Target::Page).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let url = format!("{}/session/{}", self.base, self.session_id);
        let result = request(&self.client, Method::DELETE, &url, None).await;

        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill().await {
                tracing::debug!("Driver process for session {} already gone: {}", self.slot, e);
            }
        }

        result
            .map(|_| ())
            .map_err(|e| e.into_browser_error(self.slot, Target::Page))
    }
}
