//! State fingerprinting module
//!
//! This module reduces a captured page to a fingerprint that decides whether
//! two visits show the same application state.
//!
//! # Strategies
//!
//! - `DomHash`: SHA-256 over a canonical walk of the DOM (and frame DOMs)
//! - `PerceptualHash`: 64-bit difference hash of the rendered page, compared
//!   within a Hamming-distance threshold
//!
//! Both are pure functions of the capture: the same content always yields the
//! same fingerprint.

mod dom_hash;
mod perceptual;

use crate::config::StateAbstractionConfig;
use crate::{CaptureError, ConfigError};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use dom_hash::canonical_dom;
pub use perceptual::{difference_hash, Raster};

/// State abstraction strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FingerprintStrategy {
    #[default]
    DomHash,
    PerceptualHash,
}

impl fmt::Display for FingerprintStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DomHash => write!(f, "dom-hash"),
            Self::PerceptualHash => write!(f, "perceptual-hash"),
        }
    }
}

/// A captured frame document, addressed by its index path from the top page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCapture {
    /// Index path such as `"0"` or `"1/0"`
    pub path: String,
    pub dom: String,
}

/// Everything a browser reports about the page it currently shows
#[derive(Debug, Clone, Default)]
pub struct PageCapture {
    pub url: String,
    pub dom: String,
    pub frames: Vec<FrameCapture>,
    pub raster: Option<Raster>,
    /// PNG bytes, when screenshots are enabled
    pub screenshot: Option<Vec<u8>>,
}

impl PageCapture {
    /// Creates a capture holding only a top-level document
    pub fn from_dom(url: impl Into<String>, dom: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dom: dom.into(),
            ..Self::default()
        }
    }
}

/// A state fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    Dom([u8; 32]),
    Perceptual(u64),
}

impl Fingerprint {
    /// Hamming distance between two fingerprints of the same kind
    ///
    /// Returns None when the kinds differ.
    pub fn distance(&self, other: &Fingerprint) -> Option<u32> {
        match (self, other) {
            (Self::Dom(a), Self::Dom(b)) => Some(
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| (x ^ y).count_ones())
                    .sum(),
            ),
            (Self::Perceptual(a), Self::Perceptual(b)) => Some((a ^ b).count_ones()),
            _ => None,
        }
    }

    /// Returns true if `other` denotes the same state under `threshold`
    ///
    /// DOM hashes are only ever equal or different; the threshold applies to
    /// perceptual hashes.
    pub fn is_similar(&self, other: &Fingerprint, threshold: u32) -> bool {
        match (self, other) {
            (Self::Dom(a), Self::Dom(b)) => a == b,
            (Self::Perceptual(_), Self::Perceptual(_)) => {
                self.distance(other).is_some_and(|d| d <= threshold)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dom(bytes) => write!(f, "dom:{}", hex::encode(bytes)),
            Self::Perceptual(bits) => write!(f, "phash:{:016x}", bits),
        }
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(digest) = s.strip_prefix("dom:") {
            let bytes = hex::decode(digest).map_err(|e| format!("bad dom fingerprint: {}", e))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| "dom fingerprint must be 32 bytes".to_string())?;
            return Ok(Self::Dom(bytes));
        }
        if let Some(bits) = s.strip_prefix("phash:") {
            return u64::from_str_radix(bits, 16)
                .map(Self::Perceptual)
                .map_err(|e| format!("bad perceptual fingerprint: {}", e));
        }
        Err(format!("unknown fingerprint format: {}", s))
    }
}

/// Computes fingerprints according to the state abstraction settings
#[derive(Debug)]
pub struct Fingerprinter {
    strategy: FingerprintStrategy,
    threshold: u32,
    ignore: Vec<Selector>,
}

impl Fingerprinter {
    /// Creates a fingerprinter, compiling the ignore selectors
    pub fn new(config: &StateAbstractionConfig) -> Result<Self, ConfigError> {
        let ignore = config
            .ignore_selectors
            .iter()
            .map(|s| {
                Selector::parse(s)
                    .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", s, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            strategy: config.strategy,
            threshold: config.similarity_threshold,
            ignore,
        })
    }

    pub fn strategy(&self) -> FingerprintStrategy {
        self.strategy
    }

    /// Hamming distance under which two perceptual fingerprints are one state
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Returns true if the browser must sample a raster for this strategy
    pub fn needs_raster(&self) -> bool {
        self.strategy == FingerprintStrategy::PerceptualHash
    }

    /// Computes the fingerprint of a capture
    ///
    /// # Returns
    ///
    /// * `Ok(Fingerprint)` - The fingerprint
    /// * `Err(CaptureError)` - The capture has no document, or no usable raster
    ///   for the perceptual strategy
    pub fn fingerprint(&self, capture: &PageCapture) -> Result<Fingerprint, CaptureError> {
        if capture.dom.trim().is_empty() {
            return Err(CaptureError::Empty {
                url: capture.url.clone(),
            });
        }

        match self.strategy {
            FingerprintStrategy::DomHash => Ok(Fingerprint::Dom(dom_hash::hash_capture(
                capture,
                &self.ignore,
            ))),
            FingerprintStrategy::PerceptualHash => {
                let raster = capture
                    .raster
                    .as_ref()
                    .ok_or_else(|| CaptureError::Unreadable {
                        url: capture.url.clone(),
                        message: "no raster was captured".to_string(),
                    })?;
                difference_hash(raster)
                    .map(Fingerprint::Perceptual)
                    .ok_or_else(|| CaptureError::Unreadable {
                        url: capture.url.clone(),
                        message: format!(
                            "raster {}x{} is too small to hash",
                            raster.width, raster.height
                        ),
                    })
            }
        }
    }
}
