//! Crawl workers
//!
//! Every worker owns one browser session and walks the scheduler phase
//! machine in a loop:
//!
//! 1. `Dispatching`: take the next action from the shared frontier
//! 2. `AwaitingResult`: bring the browser to the action's source state, fill
//!    the form, fire the action and capture the page it leads to
//! 3. `Integrating`: fingerprint the page, add the state and the edge to the
//!    graph, expand a newly found state, or retry / give up on failure
//!
//! Only step 2 talks to the browser.

use crate::browser::{BrowserSession, CaptureOptions, DriverFactory, SessionPool};
use crate::candidates::CandidateExtractor;
use crate::config::Config;
use crate::crawler::scheduler::{Frontier, QueuedAction};
use crate::crawler::TerminationReason;
use crate::fingerprint::{Fingerprint, Fingerprinter, PageCapture};
use crate::forms::{FilledInput, FormFillPolicy};
use crate::graph::{GraphView, ObservedState, StateGraph, StateId, StateLimitReached};
use crate::plugins::PluginRegistry;
use crate::state::{CandidateState, SchedulerPhase};
use crate::storage::{FailedActionRecord, SqliteStorage, Storage};
use crate::url::CrawlScope;
use crate::{BrowserError, CaptureError, CrawlError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Why an action produced no state
pub(crate) enum Failure {
    Browser(BrowserError),
    Capture(CaptureError),
    /// The action led to a page outside the crawl scope
    OutOfScope(String),
}

impl From<Failure> for CrawlError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Browser(e) => e.into(),
            Failure::Capture(e) => e.into(),
            Failure::OutOfScope(url) => CaptureError::Unreadable {
                url,
                message: "page is outside the crawl scope".to_string(),
            }
            .into(),
        }
    }
}

/// Everything the workers of a run share
pub(crate) struct CrawlContext {
    pub config: Arc<Config>,
    pub graph: StateGraph,
    pub frontier: Frontier,
    pub pool: SessionPool,
    pub plugins: PluginRegistry,
    fingerprinter: Fingerprinter,
    extractor: CandidateExtractor,
    forms: FormFillPolicy,
    scope: CrawlScope,
    storage: Arc<Mutex<SqliteStorage>>,
    run_id: i64,
    started: Instant,
    termination: Mutex<Option<TerminationReason>>,
    processed: AtomicUsize,
    failed: AtomicUsize,
}

impl CrawlContext {
    /// Builds the components of a run from the frozen configuration
    pub fn new(
        config: Arc<Config>,
        factory: Arc<dyn DriverFactory>,
        plugins: PluginRegistry,
        storage: Arc<Mutex<SqliteStorage>>,
        run_id: i64,
    ) -> Result<Self, CrawlError> {
        let scope = CrawlScope::from_config(&config)?;
        let fingerprinter = Fingerprinter::new(&config.state_abstraction)?;
        let extractor = CandidateExtractor::new(&config.crawl_rules, scope.clone())?;
        let forms = FormFillPolicy::new(
            config.crawl_rules.form_fill_mode,
            &config.form_inputs,
            config.crawl_rules.random_seed,
        );

        let options = CaptureOptions {
            frames: extractor.crawls_frames(),
            raster: fingerprinter.needs_raster(),
            screenshot: config.output.screenshots,
        };
        let pool = SessionPool::new(
            factory,
            config.crawl_rules.clone(),
            scope.target().as_str(),
            options,
            config.browser.max_session_restarts,
        );

        Ok(Self {
            graph: StateGraph::new(config.limits.max_states, fingerprinter.threshold()),
            frontier: Frontier::new(
                config.crawl_rules.frontier_order,
                config.crawl_rules.random_seed,
            ),
            pool,
            plugins,
            fingerprinter,
            extractor,
            forms,
            scope,
            storage,
            run_id,
            started: Instant::now(),
            termination: Mutex::new(None),
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            config,
        })
    }

    fn lock_termination(&self) -> MutexGuard<'_, Option<TerminationReason>> {
        self.termination
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Ends the run; the first reason given is the one reported
    pub fn terminate(&self, reason: TerminationReason) {
        {
            let mut termination = self.lock_termination();
            if termination.is_none() {
                tracing::info!("Stopping crawl: {}", reason);
                *termination = Some(reason);
            }
        }
        self.frontier.stop();
    }

    /// Why the run ended; an unstopped run ran out of work
    pub fn termination(&self) -> TerminationReason {
        self.lock_termination()
            .unwrap_or(TerminationReason::FrontierExhausted)
    }

    /// Number of actions given up or skipped
    pub fn failed_actions(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Captures the page a session shows and fingerprints it
    ///
    /// A capture that cannot be fingerprinted is taken once more before the
    /// error is returned.
    pub async fn capture_state(
        &self,
        session: &mut BrowserSession,
    ) -> Result<(PageCapture, Fingerprint), Failure> {
        match self.try_capture(session).await? {
            Ok(captured) => Ok(captured),
            Err(first) => {
                tracing::debug!(
                    "Capture in session {} failed, retrying: {}",
                    session.slot(),
                    first
                );
                self.try_capture(session).await?.map_err(Failure::Capture)
            }
        }
    }

    async fn try_capture(
        &self,
        session: &mut BrowserSession,
    ) -> Result<Result<(PageCapture, Fingerprint), CaptureError>, Failure> {
        let capture = session.capture().await.map_err(Failure::Browser)?;
        if !self.scope.classify(&capture.url).is_crawlable() {
            return Err(Failure::OutOfScope(capture.url));
        }
        Ok(self
            .fingerprinter
            .fingerprint(&capture)
            .map(|fingerprint| (capture, fingerprint)))
    }

    /// Adds the captured page to the graph as a state at `depth`
    ///
    /// Plugins hear about new states; reaching `max-states` ends the run.
    pub fn record_state(
        &self,
        fingerprint: Fingerprint,
        capture: &mut PageCapture,
        depth: u32,
    ) -> Result<(StateId, bool), StateLimitReached> {
        let observed = ObservedState {
            url: capture.url.clone(),
            depth,
            dom: Arc::from(capture.dom.as_str()),
            screenshot: capture.screenshot.take().map(Arc::from),
        };

        let result = self.graph.add_state(fingerprint, observed);
        if let Ok((id, true)) = result {
            if let Some(vertex) = self.graph.state(id) {
                tracing::info!("Discovered {} at depth {} ({})", id, depth, vertex.url);
                self.plugins.state_discovered(&self.graph, &vertex);
            }
        }
        if self.graph.limit_reached() {
            self.terminate(TerminationReason::StateLimit);
        }
        result
    }

    /// Queues the actions of a state, once per state and only above
    /// `max-depth`
    pub fn expand(&self, state: StateId, depth: u32, capture: &PageCapture) {
        if self.config.limits.max_depth.is_reached(depth) {
            tracing::debug!("{} is at the depth limit, not expanded", state);
            return;
        }
        // A state is expanded once, at the depth it was first discovered;
        // a later, shorter path to it does not expand it again
        if !self.graph.claim_expansion(state) {
            return;
        }

        let taken = self.graph.taken_signatures(state);
        let candidates = self
            .extractor
            .extract(capture, u64::from(state.0), &taken);
        tracing::debug!("{} offers {} action(s)", state, candidates.len());

        self.graph.register_candidates(state, candidates.len());
        self.frontier
            .push_all(state, depth, candidates.into_iter().map(|c| c.action));
    }

    /// Loads the root URL and records the root state
    ///
    /// Failures are retried up to `max-dispatch-retries` times. A session that
    /// fails fatally is replaced from the pool or, once the restart budget is
    /// spent, dropped in favour of the next launched session.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The root state is in the graph and its actions are queued
    /// * `Err(CrawlError::AllSessionsLost)` - No session is left
    /// * `Err(CrawlError)` - The last non-fatal failure once retries ran out
    pub async fn index_root(&self, sessions: &mut Vec<BrowserSession>) -> Result<(), CrawlError> {
        let retries = self.config.crawl_rules.max_dispatch_retries;
        let mut failures = 0;

        loop {
            let Some(session) = sessions.first_mut() else {
                tracing::error!("No browser session left to load the root");
                return Err(CrawlError::AllSessionsLost);
            };

            match self.try_index_root(session).await {
                Ok(()) => return Ok(()),
                Err(Failure::Browser(e)) if e.is_fatal() => {
                    tracing::warn!("Session {} lost while loading the root: {}", session.slot(), e);
                    let failed = sessions.remove(0);
                    if let Some(replacement) = self.pool.replace(failed).await {
                        sessions.insert(0, replacement);
                    }
                }
                Err(failure) => {
                    failures += 1;
                    if failures > retries {
                        return Err(failure.into());
                    }
                    let error = CrawlError::from(failure);
                    tracing::warn!(
                        "Loading the root failed (attempt {}), retrying: {}",
                        failures,
                        error
                    );
                    session.health_mut().record_failure();
                }
            }
        }
    }

    async fn try_index_root(&self, session: &mut BrowserSession) -> Result<(), Failure> {
        session.reset().await.map_err(Failure::Browser)?;
        let (mut capture, fingerprint) = self.capture_state(session).await?;
        match self.record_state(fingerprint, &mut capture, 0) {
            Ok((root, _)) => {
                session.health_mut().record_success(root);
                self.expand(root, 0, &capture);
            }
            Err(e) => tracing::warn!("Root state not recorded: {}", e),
        }
        Ok(())
    }

    /// Brings the session to the source state, fires the action and captures
    /// the result
    async fn dispatch(
        &self,
        session: &mut BrowserSession,
        item: &QueuedAction,
    ) -> Result<(PageCapture, Fingerprint, Vec<FilledInput>), Failure> {
        session
            .reach(item.source, &self.graph, &self.fingerprinter)
            .await
            .map_err(Failure::Browser)?;

        let inputs = self.forms.fill(&item.action.form_fields);
        tracing::trace!(
            "Session {} fires {} from {} (attempt {})",
            session.slot(),
            item.signature(),
            item.source,
            item.attempts + 1
        );
        session
            .fire(&item.action, &inputs)
            .await
            .map_err(Failure::Browser)?;

        let (capture, fingerprint) = self.capture_state(session).await?;
        Ok((capture, fingerprint, inputs))
    }

    fn integrate(
        &self,
        session: &mut BrowserSession,
        mut item: QueuedAction,
        mut capture: PageCapture,
        fingerprint: Fingerprint,
        inputs: Vec<FilledInput>,
    ) {
        let depth = item.depth + 1;
        let signature = item.signature();

        match self.record_state(fingerprint, &mut capture, depth) {
            Ok((to, is_new)) => {
                session.health_mut().record_success(to);
                item.state = CandidateState::Taken;

                if let Some(transition) =
                    self.graph
                        .add_edge(item.source, to, item.action.clone(), inputs)
                {
                    tracing::debug!("{} -> {} via {}", item.source, to, signature);
                    self.plugins.edge_added(&self.graph, &transition);
                }
                self.graph.resolve_candidate(item.source, &signature);

                if is_new {
                    self.expand(to, depth, &capture);
                }
            }
            Err(limit) => {
                // The browser shows a state that is not in the graph
                session.health_mut().clear_position();
                tracing::debug!("{} from {} not recorded: {}", signature, item.source, limit);
                self.graph.resolve_candidate(item.source, &signature);
            }
        }

        self.frontier.complete();
    }

    /// Records an action that reached a terminal outcome without a transition
    fn give_up(&self, mut item: QueuedAction, outcome: CandidateState, error: Option<String>) {
        item.state = outcome;
        let signature = item.signature();
        self.graph.resolve_candidate(item.source, &signature);
        self.failed.fetch_add(1, Ordering::SeqCst);

        match outcome {
            CandidateState::Skipped => tracing::debug!(
                "Skipped {} from {}: {}",
                signature,
                item.source,
                error.as_deref().unwrap_or("out of scope")
            ),
            _ => tracing::warn!(
                "Giving up on {} from {} after {} attempt(s): {}",
                signature,
                item.source,
                item.attempts + 1,
                error.as_deref().unwrap_or("unknown error")
            ),
        }

        let record = FailedActionRecord {
            source: item.source,
            signature,
            selector: item.action.selector.clone(),
            outcome,
            attempts: item.attempts + 1,
            error,
        };
        {
            let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = storage.record_failed_action(self.run_id, &record) {
                tracing::error!("Failed to record action outcome: {}", e);
            }
        }

        self.frontier.complete();
    }

    /// Puts a failed action back on the frontier while retries remain
    fn retry_or_give_up(&self, item: QueuedAction, error: &BrowserError) {
        if item.attempts < self.config.crawl_rules.max_dispatch_retries {
            tracing::debug!(
                "Dispatch of {} failed (attempt {}), requeued: {}",
                item.signature(),
                item.attempts + 1,
                error
            );
            self.frontier.requeue(item);
        } else {
            self.give_up(item, CandidateState::Failed, Some(error.to_string()));
        }
    }

    fn report_progress(&self) {
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;

        // Progress reporting every 10 actions
        if processed % 10 == 0 {
            let elapsed = self.started.elapsed();
            let rate = processed as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            tracing::info!(
                "Progress: {} actions, {} states, {} edges, {} in frontier, {:.2} actions/sec",
                processed,
                self.graph.state_count(),
                self.graph.edge_count(),
                self.frontier.len(),
                rate
            );
        }
    }
}

/// Runs one worker until the frontier is exhausted, the run is stopped, or
/// its session is lost for good
pub(crate) async fn run_worker(
    ctx: Arc<CrawlContext>,
    mut session: BrowserSession,
) -> Result<(), CrawlError> {
    let mut phase = SchedulerPhase::Idle;
    phase.transition(SchedulerPhase::Dispatching)?;
    tracing::debug!("Worker {} started", session.slot());

    while let Some(item) = ctx.frontier.next().await {
        phase.transition(SchedulerPhase::AwaitingResult)?;
        let result = ctx.dispatch(&mut session, &item).await;
        phase.transition(SchedulerPhase::Integrating)?;

        match result {
            Ok((capture, fingerprint, inputs)) => {
                ctx.integrate(&mut session, item, capture, fingerprint, inputs);
            }
            Err(Failure::OutOfScope(url)) => {
                session.health_mut().clear_position();
                ctx.give_up(
                    item,
                    CandidateState::Skipped,
                    Some(format!("led outside the crawl scope to {}", url)),
                );
            }
            Err(Failure::Capture(e)) => {
                session.health_mut().record_failure();
                ctx.give_up(item, CandidateState::Failed, Some(e.to_string()));
            }
            Err(Failure::Browser(e)) if e.is_fatal() => {
                tracing::warn!("Session {} lost: {}", session.slot(), e);
                ctx.retry_or_give_up(item, &e);

                session = match ctx.pool.replace(session).await {
                    Some(replacement) => replacement,
                    None => {
                        if ctx.pool.live() == 0 {
                            tracing::error!("No browser session left");
                            ctx.terminate(TerminationReason::AllSessionsLost);
                        }
                        phase.transition(SchedulerPhase::Terminated)?;
                        return Ok(());
                    }
                };
            }
            Err(Failure::Browser(e)) => {
                session.health_mut().record_failure();
                ctx.retry_or_give_up(item, &e);
            }
        }

        ctx.report_progress();
        phase.transition(SchedulerPhase::Dispatching)?;
    }

    phase.transition(SchedulerPhase::Terminated)?;
    let health = session.health();
    tracing::debug!(
        "Worker {} finished: {} dispatches, {:.1}% failed",
        session.slot(),
        health.dispatch_count,
        health.failure_rate() * 100.0
    );
    ctx.pool.retire(session).await;
    Ok(())
}
