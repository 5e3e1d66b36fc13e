use super::{BrowserSession, CaptureOptions, DriverFactory};
use crate::config::CrawlRules;
use crate::SessionFatalError;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

/// The set of browser sessions of a run
///
/// Sessions are handed out to workers at launch and come back only when they
/// fail fatally, to be replaced while the restart budget lasts. Once the
/// budget is spent a failed session is retired and the pool shrinks.
pub struct SessionPool {
    factory: Arc<dyn DriverFactory>,
    rules: CrawlRules,
    root_url: String,
    options: CaptureOptions,
    restarts_left: AtomicU32,
    live: AtomicUsize,
}

impl SessionPool {
    /// Creates an empty pool
    ///
    /// # Arguments
    ///
    /// * `factory` - Launches the browsers
    /// * `rules` - Settle waits applied by every session
    /// * `root_url` - URL sessions reset to
    /// * `options` - What every capture includes
    /// * `max_restarts` - Replacement launches allowed over the whole run
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        rules: CrawlRules,
        root_url: impl Into<String>,
        options: CaptureOptions,
        max_restarts: u32,
    ) -> Self {
        Self {
            factory,
            rules,
            root_url: root_url.into(),
            options,
            restarts_left: AtomicU32::new(max_restarts),
            live: AtomicUsize::new(0),
        }
    }

    /// Launches `count` sessions concurrently
    ///
    /// Slots that fail to start are logged and left out.
    ///
    /// # Returns
    ///
    /// * `Ok(sessions)` - At least one session started, ordered by slot
    /// * `Err(SessionFatalError)` - No session could be started
    pub async fn launch_all(&self, count: usize) -> Result<Vec<BrowserSession>, SessionFatalError> {
        let mut launches = JoinSet::new();
        for slot in 0..count {
            let factory = Arc::clone(&self.factory);
            launches.spawn(async move { (slot, factory.launch(slot).await) });
        }

        let mut sessions = Vec::with_capacity(count);
        let mut first_error = None;
        while let Some(joined) = launches.join_next().await {
            match joined {
                Ok((slot, Ok(driver))) => sessions.push(self.wrap(slot, driver)),
                Ok((slot, Err(e))) => {
                    tracing::warn!("Session {} failed to start: {}", slot, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    tracing::warn!("Session launch task failed: {}", e);
                }
            }
        }

        if sessions.is_empty() {
            return Err(first_error.unwrap_or(SessionFatalError::StartFailed {
                slot: 0,
                message: "no browser sessions requested".to_string(),
            }));
        }

        sessions.sort_by_key(BrowserSession::slot);
        self.live.store(sessions.len(), Ordering::SeqCst);
        tracing::info!("{} of {} browser session(s) started", sessions.len(), count);
        Ok(sessions)
    }

    fn wrap(&self, slot: usize, driver: Box<dyn super::BrowserDriver>) -> BrowserSession {
        BrowserSession::new(slot, driver, &self.rules, self.root_url.clone(), self.options)
    }

    /// Replaces a session that failed fatally
    ///
    /// Returns the new session, or None when the restart budget is spent or
    /// every attempt failed; the pool has then shrunk by one.
    pub async fn replace(&self, failed: BrowserSession) -> Option<BrowserSession> {
        let slot = failed.slot();
        failed.close().await;

        while self.take_restart() {
            match self.factory.launch(slot).await {
                Ok(driver) => {
                    tracing::info!("Session {} restarted", slot);
                    return Some(self.wrap(slot, driver));
                }
                Err(e) => tracing::warn!("Restarting session {} failed: {}", slot, e),
            }
        }

        let remaining = self.shrink();
        tracing::warn!(
            "Session {} retired, {} session(s) remain",
            slot,
            remaining
        );
        None
    }

    /// Closes a session at the end of the run
    pub async fn retire(&self, session: BrowserSession) {
        session.close().await;
        self.shrink();
    }

    /// Number of sessions currently alive
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn restarts_left(&self) -> u32 {
        self.restarts_left.load(Ordering::SeqCst)
    }

    fn take_restart(&self) -> bool {
        self.restarts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn shrink(&self) -> usize {
        let previous = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}
