//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the run controller that coordinates all aspects of
//! the crawl, including:
//! - Preparing the output directory and the run record
//! - Launching the browser session pool
//! - Indexing the root state
//! - Spawning one worker per session and enforcing the runtime limit and the
//!   stop signal
//! - Persisting the final graph and generating output

use crate::browser::{DriverFactory, WebDriverFactory};
use crate::config::Config;
use crate::crawler::worker::{run_worker, CrawlContext};
use crate::crawler::{RunOutcome, TerminationReason};
use crate::graph::GraphView;
use crate::output;
use crate::plugins::{CrawlPlugin, PluginRegistry};
use crate::storage::{open_storage, RunStatus, SqliteStorage, Storage, DATABASE_FILE};
use crate::CrawlError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinSet;

/// Asks a running crawl to stop
///
/// Workers finish the action they are firing and pick no new one.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once `stop` was called
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    factory: Arc<dyn DriverFactory>,
    plugins: PluginRegistry,
    stop: StopHandle,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The frozen crawler configuration
    /// * `config_hash` - Hash of the configuration file, stored with the run
    /// * `factory` - Launches the browsers of the session pool
    pub fn new(
        config: Arc<Config>,
        config_hash: impl Into<String>,
        factory: Arc<dyn DriverFactory>,
    ) -> Self {
        let plugins = PluginRegistry::from_config(&config, Path::new(&config.output.directory));
        Self {
            config,
            config_hash: config_hash.into(),
            factory,
            plugins,
            stop: StopHandle::default(),
        }
    }

    /// Registers an additional plugin after the configured ones
    pub fn with_plugin(mut self, plugin: impl CrawlPlugin + 'static) -> Self {
        self.plugins.register(plugin);
        self
    }

    /// Handle that stops the run from another task
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn output_dir(&self) -> &Path {
        Path::new(&self.config.output.directory)
    }

    /// Runs the crawl to completion
    ///
    /// # Returns
    ///
    /// * `Ok(RunOutcome)` - The run ended (check `is_success` for the loss of
    ///   every browser session)
    /// * `Err(CrawlError)` - The run could not start or its results could not
    ///   be persisted
    pub async fn run(self) -> Result<RunOutcome, CrawlError> {
        let output_dir = prepare_output_dir(self.output_dir())?;

        let mut storage = open_storage(&output_dir.join(DATABASE_FILE))?;
        let run_id = storage.create_run(&self.config_hash, &self.config.site.url)?;
        let storage = Arc::new(Mutex::new(storage));
        tracing::info!("Starting crawl run {} of {}", run_id, self.config.site.url);

        match self.crawl(run_id, Arc::clone(&storage), &output_dir).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let mut storage = storage.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(finish_error) = storage.finish_run(run_id, RunStatus::Failed, "error") {
                    tracing::error!("Failed to mark run {} as failed: {}", run_id, finish_error);
                }
                Err(e)
            }
        }
    }

    async fn crawl(
        self,
        run_id: i64,
        storage: Arc<Mutex<SqliteStorage>>,
        output_dir: &Path,
    ) -> Result<RunOutcome, CrawlError> {
        let start_time = Instant::now();
        let ctx = Arc::new(CrawlContext::new(
            Arc::clone(&self.config),
            Arc::clone(&self.factory),
            self.plugins,
            Arc::clone(&storage),
            run_id,
        )?);

        let mut sessions = match ctx.pool.launch_all(self.config.browser.count as usize).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!("No browser session could be started: {}", e);
                return Err(e.into());
            }
        };

        if let Err(e) = ctx.index_root(&mut sessions).await {
            tracing::error!("Root state could not be indexed: {}", e);
            for session in sessions {
                ctx.pool.retire(session).await;
            }
            return Err(e);
        }

        // Runtime limit and operator stop
        let monitor = {
            let ctx = Arc::clone(&ctx);
            let stop = self.stop.clone();
            let max_runtime = self.config.limits.max_runtime();
            tokio::spawn(async move {
                let runtime = async {
                    match max_runtime {
                        Some(limit) => tokio::time::sleep(limit).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = runtime => ctx.terminate(TerminationReason::RuntimeLimit),
                    _ = stop.stopped() => ctx.terminate(TerminationReason::Stopped),
                }
            })
        };

        let mut workers = JoinSet::new();
        for session in sessions {
            workers.spawn(run_worker(Arc::clone(&ctx), session));
        }
        tracing::info!("{} worker(s) crawling", workers.len());

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Worker failed: {}", e),
                Err(e) => tracing::error!("Worker task panicked: {}", e),
            }
        }
        monitor.abort();

        let termination = ctx.termination();
        let status = termination.run_status();
        if ctx.graph.has_unvisited_frontier() && termination == TerminationReason::FrontierExhausted {
            tracing::warn!("Workers stopped with unresolved actions");
        }

        let outcome = RunOutcome {
            run_id,
            status,
            termination,
            states: ctx.graph.state_count(),
            edges: ctx.graph.edge_count(),
            failed_actions: ctx.failed_actions(),
            elapsed: start_time.elapsed(),
        };

        // Persist the final graph
        {
            let mut storage = storage.lock().unwrap_or_else(PoisonError::into_inner);
            storage.save_graph(run_id, &ctx.graph.export())?;
            storage.finish_run(run_id, status, termination.as_str())?;
        }

        ctx.plugins.run_terminated(&ctx.graph, &outcome);

        {
            let storage = storage.lock().unwrap_or_else(PoisonError::into_inner);
            let written = output::write_reports(&*storage, run_id, output_dir)?;
            tracing::info!("Wrote {} report(s) to {}", written.len(), output_dir.display());
        }

        tracing::info!(
            "Crawl finished ({}): {} states, {} edges, {} failed actions in {:?}",
            outcome.termination,
            outcome.states,
            outcome.edges,
            outcome.failed_actions,
            outcome.elapsed
        );
        Ok(outcome)
    }
}

/// Creates the output directory, or empties it
///
/// The crawl database is kept so that earlier runs stay queryable.
fn prepare_output_dir(path: &Path) -> Result<PathBuf, CrawlError> {
    let wrap = |source| CrawlError::OutputDirectory {
        path: path.display().to_string(),
        source,
    };

    std::fs::create_dir_all(path).map_err(wrap)?;
    for entry in std::fs::read_dir(path).map_err(wrap)? {
        let entry = entry.map_err(wrap)?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(DATABASE_FILE) {
            continue;
        }

        let entry_path = entry.path();
        let removed = if entry.file_type().map_err(wrap)?.is_dir() {
            std::fs::remove_dir_all(&entry_path)
        } else {
            std::fs::remove_file(&entry_path)
        };
        removed.map_err(wrap)?;
    }

    tracing::debug!("Output directory {} ready", path.display());
    Ok(path.to_path_buf())
}

/// Runs a complete crawl against real browsers
///
/// This function orchestrates the entire crawl process:
///
/// 1. Prepare the output directory and create the run record
/// 2. Launch the WebDriver session pool
/// 3. Index the root state and queue its actions
/// 4. Spawn one worker per session:
///    a. Take the next action from the frontier
///    b. Replay the path to its source state
///    c. Fill forms and fire the action
///    d. Capture and fingerprint the resulting page
///    e. Record the state and the transition
///    f. Queue the actions of new states
/// 5. Persist the graph and mark the run finished
/// 6. Generate summary output
///
/// # Arguments
///
/// * `config` - The frozen crawler configuration
/// * `config_hash` - Hash of the configuration file
///
/// # Example
///
/// ```no_run
/// use statecrawl::config::{load_config_with_hash, Overrides};
/// use statecrawl::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("crawl.toml"))?;
/// let outcome = run_crawl(config.freeze(&Overrides::default())?, &hash).await?;
/// println!("{} states", outcome.states);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Arc<Config>, config_hash: &str) -> Result<RunOutcome, CrawlError> {
    let factory = WebDriverFactory::new(Arc::clone(&config))?;
    Coordinator::new(config, config_hash, Arc::new(factory))
        .run()
        .await
}
