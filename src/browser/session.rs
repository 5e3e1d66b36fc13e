use super::{BrowserDriver, CaptureOptions};
use crate::candidates::Action;
use crate::config::CrawlRules;
use crate::fingerprint::{Fingerprinter, PageCapture};
use crate::forms::FilledInput;
use crate::graph::{StateGraph, StateId};
use crate::state::SessionHealth;
use crate::{BrowserError, DispatchError};
use std::time::{Duration, Instant};

/// A browser driver together with its position in the state graph
///
/// Applies the configured settle waits and knows how to bring the browser
/// back to any recorded state by replaying the edge path from the root.
pub struct BrowserSession {
    slot: usize,
    driver: Box<dyn BrowserDriver>,
    root_url: String,
    wait_after_reload: Duration,
    wait_after_event: Duration,
    options: CaptureOptions,
    health: SessionHealth,
}

impl BrowserSession {
    /// Wraps a freshly launched driver
    ///
    /// # Arguments
    ///
    /// * `slot` - Pool slot the driver was launched for
    /// * `driver` - The browser
    /// * `rules` - Source of the settle waits
    /// * `root_url` - URL of the root state
    /// * `options` - What every capture includes
    pub fn new(
        slot: usize,
        driver: Box<dyn BrowserDriver>,
        rules: &CrawlRules,
        root_url: impl Into<String>,
        options: CaptureOptions,
    ) -> Self {
        Self {
            slot,
            driver,
            root_url: root_url.into(),
            wait_after_reload: rules.wait_after_reload(),
            wait_after_event: rules.wait_after_event(),
            options,
            health: SessionHealth::new(),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn health(&self) -> &SessionHealth {
        &self.health
    }

    pub fn health_mut(&mut self) -> &mut SessionHealth {
        &mut self.health
    }

    /// Loads the root URL and waits for the page to settle
    pub async fn reset(&mut self) -> Result<(), BrowserError> {
        self.health.clear_position();
        self.driver.navigate(&self.root_url).await?;
        settle(self.wait_after_reload).await;
        Ok(())
    }

    /// Captures the current page with the session's capture options
    pub async fn capture(&mut self) -> Result<PageCapture, BrowserError> {
        self.driver.capture(self.options).await
    }

    /// Fills `inputs`, fires `action` and waits for the page to settle
    pub async fn fire(&mut self, action: &Action, inputs: &[FilledInput]) -> Result<(), BrowserError> {
        self.health.record_dispatch(Instant::now());
        self.driver.fire(action, inputs).await?;
        settle(self.wait_after_event).await;
        Ok(())
    }

    /// Brings the browser to `target`
    ///
    /// Nothing happens when the browser already shows `target`. Otherwise the
    /// session resets to the root and replays the recorded path, then checks
    /// that the page it ends on fingerprints to `target`.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The browser shows `target`
    /// * `Err(BrowserError::Dispatch(ReplayDiverged))` - No path is recorded,
    ///   a replayed action failed, or the page is a different state
    /// * `Err(BrowserError::Fatal)` - The browser died
    pub async fn reach(
        &mut self,
        target: StateId,
        graph: &StateGraph,
        fingerprinter: &Fingerprinter,
    ) -> Result<(), BrowserError> {
        if self.health.current_state == Some(target) {
            return Ok(());
        }

        let diverged = || BrowserError::from(DispatchError::ReplayDiverged { state: target.0 });
        let path = graph.path_to(target).ok_or_else(diverged)?;

        self.reset().await?;
        for transition in &path {
            match self.fire(&transition.action, &transition.inputs).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        "Replay to {} failed at {} in session {}: {}",
                        target,
                        transition.action.signature(),
                        self.slot,
                        e
                    );
                    return Err(diverged());
                }
            }
        }

        let capture = self.capture().await?;
        let reached = fingerprinter
            .fingerprint(&capture)
            .ok()
            .and_then(|fp| graph.find_state(&fp));

        if reached != Some(target) {
            tracing::debug!(
                "Replay to {} in session {} ended on {:?}",
                target,
                self.slot,
                reached
            );
            return Err(diverged());
        }

        self.health.record_success(target);
        Ok(())
    }

    /// Ends the browser session
    pub async fn close(mut self) {
        if let Err(e) = self.driver.close().await {
            tracing::debug!("Closing session {}: {}", self.slot, e);
        }
    }
}

async fn settle(wait: Duration) {
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }
}
