//! Integration tests for the crawler
//!
//! These tests replace the WebDriver backend with a scripted application:
//! a small finite state machine of HTML pages whose buttons lead to other
//! pages. The full crawl cycle (session pool, workers, graph, storage and
//! reports) runs against it end-to-end.

use async_trait::async_trait;
use statecrawl::browser::{BrowserDriver, CaptureOptions, DriverFactory};
use statecrawl::candidates::Action;
use statecrawl::config::{parse_config, Config, Limit, Overrides};
use statecrawl::crawler::{Coordinator, TerminationReason};
use statecrawl::fingerprint::PageCapture;
use statecrawl::forms::FilledInput;
use statecrawl::state::CandidateState;
use statecrawl::storage::{RunStatus, SqliteStorage, Storage, DATABASE_FILE};
use statecrawl::{BrowserError, CrawlError, DispatchError, SessionFatalError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const ROOT_URL: &str = "http://app.test/";
const EXTERNAL_URL: &str = "http://elsewhere.test/";

// ===== Scripted application =====

/// One page of the scripted application
struct Page {
    /// Buttons as (element id, target page)
    buttons: Vec<(&'static str, &'static str)>,
    /// Renders a counter that changes on every capture
    clock: bool,
}

/// A web application as a state machine of pages
///
/// Shared by every driver the factory launches, so failures scripted for a
/// selector are consumed across sessions.
struct ScriptedApp {
    pages: HashMap<&'static str, Page>,
    root: &'static str,
    /// Remaining dispatch failures per selector
    flaky: Mutex<HashMap<String, usize>>,
    /// Remaining session crashes per selector
    crashing: Mutex<HashMap<String, usize>>,
    /// Remaining empty renders per page
    blank: Mutex<HashMap<&'static str, usize>>,
    /// Pages served from a host outside the crawl scope
    external: HashSet<&'static str>,
    /// Remaining root loads that time out
    failing_navigations: AtomicUsize,
    captures: AtomicUsize,
    launches: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedApp {
    fn new(root: &'static str) -> Self {
        Self {
            pages: HashMap::new(),
            root,
            flaky: Mutex::new(HashMap::new()),
            crashing: Mutex::new(HashMap::new()),
            blank: Mutex::new(HashMap::new()),
            external: HashSet::new(),
            failing_navigations: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    fn page(mut self, name: &'static str, buttons: Vec<(&'static str, &'static str)>) -> Self {
        self.pages.insert(
            name,
            Page {
                buttons,
                clock: false,
            },
        );
        self
    }

    fn with_clock(mut self, name: &'static str) -> Self {
        if let Some(page) = self.pages.get_mut(name) {
            page.clock = true;
        }
        self
    }

    fn flaky(self, selector: &str, failures: usize) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(selector.to_string(), failures);
        self
    }

    fn crashing(self, selector: &str, crashes: usize) -> Self {
        self.crashing
            .lock()
            .unwrap()
            .insert(selector.to_string(), crashes);
        self
    }

    fn blank(self, name: &'static str, renders: usize) -> Self {
        self.blank.lock().unwrap().insert(name, renders);
        self
    }

    fn external(mut self, name: &'static str) -> Self {
        self.external.insert(name);
        self
    }

    fn failing_navigations(self, count: usize) -> Self {
        self.failing_navigations.store(count, Ordering::SeqCst);
        self
    }

    fn render(&self, name: &'static str) -> String {
        {
            let mut blank = self.blank.lock().unwrap();
            if let Some(remaining) = blank.get_mut(name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return String::new();
                }
            }
        }

        let page = &self.pages[name];
        let mut html = format!(
            "<html><head><title>{}</title></head><body><h1>{}</h1>",
            name, name
        );
        if page.clock {
            let tick = self.captures.fetch_add(1, Ordering::SeqCst);
            html.push_str(&format!("<span class=\"clock\">{}</span>", tick));
        }
        for (id, target) in &page.buttons {
            html.push_str(&format!("<button id=\"{}\">Go to {}</button>", id, target));
        }
        html.push_str("</body></html>");
        html
    }

    fn url_of(&self, name: &str) -> String {
        if self.external.contains(name) {
            format!("{}{}", EXTERNAL_URL, name)
        } else if name == self.root {
            ROOT_URL.to_string()
        } else {
            format!("{}{}", ROOT_URL, name)
        }
    }

    /// Consumes one scripted failure for `selector` from `table`
    fn take(table: &Mutex<HashMap<String, usize>>, selector: &str) -> bool {
        let mut table = table.lock().unwrap();
        match table.get_mut(selector) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// A driver showing one page of the scripted application
struct ScriptedDriver {
    app: Arc<ScriptedApp>,
    slot: usize,
    current: &'static str,
    crashed: bool,
}

impl ScriptedDriver {
    fn ensure_alive(&self) -> Result<(), BrowserError> {
        if self.crashed {
            return Err(SessionFatalError::Crashed {
                slot: self.slot,
                message: "browser is gone".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.ensure_alive()?;
        assert_eq!(url, ROOT_URL, "sessions only ever load the root URL");
        let timed_out = self
            .app
            .failing_navigations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if timed_out {
            return Err(DispatchError::NavigationTimeout {
                url: url.to_string(),
            }
            .into());
        }
        self.current = self.app.root;
        Ok(())
    }

    async fn capture(&mut self, _options: CaptureOptions) -> Result<PageCapture, BrowserError> {
        self.ensure_alive()?;
        Ok(PageCapture::from_dom(
            self.app.url_of(self.current),
            self.app.render(self.current),
        ))
    }

    async fn fire(&mut self, action: &Action, _inputs: &[FilledInput]) -> Result<(), BrowserError> {
        self.ensure_alive()?;

        if ScriptedApp::take(&self.app.crashing, &action.selector) {
            self.crashed = true;
            return Err(SessionFatalError::Crashed {
                slot: self.slot,
                message: format!("crashed on {}", action.selector),
            }
            .into());
        }
        if ScriptedApp::take(&self.app.flaky, &action.selector) {
            return Err(DispatchError::NotInteractable {
                selector: action.selector.clone(),
                message: "element is covered".to_string(),
            }
            .into());
        }

        let page = &self.app.pages[self.current];
        let target = page
            .buttons
            .iter()
            .find(|(id, _)| action.selector == format!("#{}", id))
            .map(|(_, target)| *target)
            .ok_or_else(|| DispatchError::ElementNotFound {
                selector: action.selector.clone(),
            })?;

        self.current = self
            .app
            .pages
            .get_key_value(target)
            .map(|(name, _)| *name)
            .unwrap_or(self.app.root);
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        self.ensure_alive()?;
        Ok(self.app.url_of(self.current))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.app.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Launches scripted drivers; launches past `max_launches` fail to start
struct ScriptedFactory {
    app: Arc<ScriptedApp>,
    max_launches: usize,
}

#[async_trait]
impl DriverFactory for ScriptedFactory {
    async fn launch(&self, slot: usize) -> Result<Box<dyn BrowserDriver>, SessionFatalError> {
        let launched = self.app.launches.fetch_add(1, Ordering::SeqCst);
        if launched >= self.max_launches {
            return Err(SessionFatalError::StartFailed {
                slot,
                message: "no more browsers".to_string(),
            });
        }
        Ok(Box::new(ScriptedDriver {
            app: Arc::clone(&self.app),
            slot,
            current: self.app.root,
            crashed: false,
        }))
    }
}

// ===== Helpers =====

/// Five pages: index -> a, b; a -> c; b -> c; c -> d; d -> index
fn create_test_app() -> ScriptedApp {
    ScriptedApp::new("index")
        .page("index", vec![("to-a", "a"), ("to-b", "b")])
        .page("a", vec![("to-c", "c")])
        .page("b", vec![("to-c", "c")])
        .page("c", vec![("to-d", "d")])
        .page("d", vec![("home", "index")])
}

/// Creates a test configuration writing into `dir`
fn create_test_config(dir: &TempDir, extra: &str) -> Config {
    let content = format!(
        r#"
[site]
url = "{}"

[crawl-rules]
wait-after-reload-ms = 0
wait-after-event-ms = 0
max-dispatch-retries = 2

[limits]
max-states = "unlimited"
max-depth = "unlimited"
max-runtime-secs = 60

{}
"#,
        ROOT_URL, extra
    );
    let mut config = parse_config(&content).expect("test config parses");
    config.output.directory = dir.path().display().to_string();
    config
}

fn create_factory(app: &Arc<ScriptedApp>) -> Arc<ScriptedFactory> {
    Arc::new(ScriptedFactory {
        app: Arc::clone(app),
        max_launches: usize::MAX,
    })
}

fn open_database(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::new(&dir.path().join(DATABASE_FILE)).expect("crawl database opens")
}

/// Collects the (from, to) pairs of a run's transitions by page path
fn edges_by_title(storage: &SqliteStorage, run_id: i64) -> HashSet<(String, String)> {
    let graph = storage.load_graph(run_id).unwrap();
    let title = |id| {
        let state = graph.state(id).expect("transition endpoints are states");
        state.url.trim_start_matches(ROOT_URL).to_string()
    };
    graph
        .transitions
        .iter()
        .map(|t| (title(t.from), title(t.to)))
        .collect()
}

// ===== Tests =====

#[tokio::test]
async fn test_full_crawl_discovers_every_state() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app());

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .expect("crawl succeeds");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.termination, TerminationReason::FrontierExhausted);
    assert_eq!(outcome.states, 5);
    assert_eq!(outcome.edges, 6);
    assert_eq!(outcome.failed_actions, 0);
    assert!(outcome.is_success());

    let storage = open_database(&dir);
    let run = storage.get_run(outcome.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(storage.count_states(outcome.run_id).unwrap(), 5);
    assert_eq!(storage.count_transitions(outcome.run_id).unwrap(), 6);

    let expected: HashSet<(String, String)> = [
        ("", "a"),
        ("", "b"),
        ("a", "c"),
        ("b", "c"),
        ("c", "d"),
        ("d", ""),
    ]
    .iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect();
    assert_eq!(edges_by_title(&storage, outcome.run_id), expected);
}

#[tokio::test]
async fn test_depths_follow_shortest_discovery() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app());

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    let storage = open_database(&dir);
    let breakdown = storage.get_depth_breakdown(outcome.run_id).unwrap();
    assert_eq!(breakdown.get(&0), Some(&1));
    assert_eq!(breakdown.get(&1), Some(&2));
    assert_eq!(breakdown.get(&2), Some(&1));
    assert_eq!(breakdown.get(&3), Some(&1));
}

#[tokio::test]
async fn test_state_limit_stops_crawl() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "");
    config.limits.max_states = Limit::Bounded(3);
    let config = config.freeze(&Overrides::default()).unwrap();
    let app = Arc::new(create_test_app());

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.termination, TerminationReason::StateLimit);
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.states, 3);

    let storage = open_database(&dir);
    assert_eq!(storage.count_states(outcome.run_id).unwrap(), 3);
}

#[tokio::test]
async fn test_depth_limit_stops_expansion() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, "");
    config.limits.max_depth = Limit::Bounded(1);
    let config = config.freeze(&Overrides::default()).unwrap();
    let app = Arc::new(create_test_app());

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    // Depth-1 states are recorded but their actions are never fired
    assert_eq!(outcome.termination, TerminationReason::FrontierExhausted);
    assert_eq!(outcome.states, 3);
    assert_eq!(outcome.edges, 2);
}

#[tokio::test]
async fn test_dispatch_error_is_retried() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app().flaky("#to-a", 1));

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.states, 5);
    assert_eq!(outcome.edges, 6);
    assert_eq!(outcome.failed_actions, 0);

    let storage = open_database(&dir);
    assert!(storage.get_failed_actions(outcome.run_id).unwrap().is_empty());
    let edges = edges_by_title(&storage, outcome.run_id);
    assert!(edges.contains(&("".to_string(), "a".to_string())));
}

#[tokio::test]
async fn test_action_given_up_after_retries() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    // Fails on every attempt: the first one plus two retries
    let app = Arc::new(create_test_app().flaky("#to-b", 3));

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    // b is unreachable, c is still found through a
    assert_eq!(outcome.states, 4);
    assert_eq!(outcome.edges, 4);
    assert_eq!(outcome.failed_actions, 1);
    assert_eq!(outcome.status, RunStatus::Completed);

    let storage = open_database(&dir);
    let failed = storage.get_failed_actions(outcome.run_id).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].selector, "#to-b");
    assert_eq!(failed[0].outcome, CandidateState::Failed);
    assert_eq!(failed[0].attempts, 3);
    assert!(failed[0].error.as_deref().unwrap().contains("covered"));
}

#[tokio::test]
async fn test_crashed_session_is_replaced() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app().crashing("#to-c", 1));

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.states, 5);
    assert_eq!(outcome.edges, 6);
    // One initial launch plus one replacement
    assert_eq!(app.launches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_losing_every_session_fails_run() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "[browser]\nmax-session-restarts = 0\n")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app().crashing("#to-a", 1));

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.termination, TerminationReason::AllSessionsLost);
    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(!outcome.is_success());
    assert_eq!(outcome.states, 1);

    let storage = open_database(&dir);
    let run = storage.get_run(outcome.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_no_browser_starts() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app());
    let factory = Arc::new(ScriptedFactory {
        app: Arc::clone(&app),
        max_launches: 0,
    });

    let result = Coordinator::new(config, "test-hash", factory).run().await;
    assert!(result.is_err());

    let storage = open_database(&dir);
    let run = storage.get_latest_run().unwrap().expect("run was recorded");
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_concurrent_browsers_find_same_graph() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "[browser]\ncount = 3\n")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app());

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    assert_eq!(app.launches.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.states, 5);
    assert_eq!(outcome.edges, 6);

    // Every action of every state is fired into the graph at most once
    let storage = open_database(&dir);
    let graph = storage.load_graph(outcome.run_id).unwrap();
    let mut seen = HashSet::new();
    for transition in &graph.transitions {
        assert!(
            seen.insert((transition.from, transition.signature.clone())),
            "duplicate transition {} from {}",
            transition.signature,
            transition.from
        );
    }
}

#[tokio::test]
async fn test_ignored_subtrees_do_not_split_states() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "[state-abstraction]\nignore-selectors = [\".clock\"]\n")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app().with_clock("index").with_clock("c"));

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    // Returning to index from d yields the root state again
    assert_eq!(outcome.states, 5);
    assert_eq!(outcome.edges, 6);
}

#[tokio::test]
async fn test_stop_handle_ends_crawl() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app());

    let coordinator = Coordinator::new(config, "test-hash", create_factory(&app));
    coordinator.stop_handle().stop();
    let outcome = coordinator.run().await.unwrap();

    assert_eq!(outcome.termination, TerminationReason::Stopped);
    assert_eq!(outcome.status, RunStatus::Stopped);
    assert!(outcome.is_success());
    assert!(outcome.states >= 1);
}

#[tokio::test]
async fn test_output_files_written() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("stale.txt"), "from an earlier run").unwrap();
    let config = create_test_config(&dir, "[plugins]\ncrawl-overview = true\n")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app());

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    assert!(!dir.path().join("stale.txt").exists());
    assert!(dir.path().join(DATABASE_FILE).exists());
    assert!(dir.path().join("overview.md").exists());

    let summary = std::fs::read_to_string(dir.path().join("summary.md")).unwrap();
    assert!(summary.contains("# Statecrawl Crawl Summary"));
    assert!(summary.contains(ROOT_URL));

    let json = std::fs::read_to_string(dir.path().join("state-graph.json")).unwrap();
    let document: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(document["run_id"], outcome.run_id);
    assert_eq!(document["states"].as_array().unwrap().len(), 5);
    assert_eq!(document["transitions"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_second_run_keeps_history() {
    let dir = TempDir::new().unwrap();
    let app = Arc::new(create_test_app());

    let first = Coordinator::new(
        create_test_config(&dir, "")
            .freeze(&Overrides::default())
            .unwrap(),
        "hash-1",
        create_factory(&app),
    )
    .run()
    .await
    .unwrap();
    let second = Coordinator::new(
        create_test_config(&dir, "")
            .freeze(&Overrides::default())
            .unwrap(),
        "hash-2",
        create_factory(&app),
    )
    .run()
    .await
    .unwrap();

    assert_ne!(first.run_id, second.run_id);

    let storage = open_database(&dir);
    let latest = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(latest.id, second.run_id);
    assert_eq!(storage.count_states(first.run_id).unwrap(), 5);
    assert_eq!(storage.count_states(second.run_id).unwrap(), 5);
}

#[tokio::test]
async fn test_root_load_is_retried() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app().failing_navigations(1));

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .expect("a single root timeout is retried");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.states, 5);
    assert_eq!(outcome.edges, 6);
}

#[tokio::test]
async fn test_root_load_gives_up_and_closes_sessions() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "[browser]\ncount = 2\n")
        .freeze(&Overrides::default())
        .unwrap();
    // The first load plus two retries all time out
    let app = Arc::new(create_test_app().failing_navigations(3));

    let result = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await;

    assert!(matches!(
        result,
        Err(CrawlError::Dispatch(DispatchError::NavigationTimeout { .. }))
    ));
    assert_eq!(app.launches.load(Ordering::SeqCst), 2);
    assert_eq!(app.closes.load(Ordering::SeqCst), 2);

    let storage = open_database(&dir);
    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(storage.count_states(run.id).unwrap(), 0);
}

#[tokio::test]
async fn test_blank_capture_is_taken_again() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app().blank("a", 1));

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.states, 5);
    assert_eq!(outcome.edges, 6);
    assert_eq!(outcome.failed_actions, 0);
}

#[tokio::test]
async fn test_unreadable_page_fails_action() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(create_test_app().blank("b", usize::MAX));

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    // The crawl goes on without b; c is still reached through a
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.termination, TerminationReason::FrontierExhausted);
    assert_eq!(outcome.states, 4);
    assert_eq!(outcome.edges, 4);
    assert_eq!(outcome.failed_actions, 1);

    let storage = open_database(&dir);
    let failed = storage.get_failed_actions(outcome.run_id).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].selector, "#to-b");
    assert_eq!(failed[0].outcome, CandidateState::Failed);
    assert_eq!(failed[0].attempts, 1);
    assert!(failed[0].error.as_deref().unwrap().contains("empty"));
}

#[tokio::test]
async fn test_leaving_scope_skips_action() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "")
        .freeze(&Overrides::default())
        .unwrap();
    let app = Arc::new(
        ScriptedApp::new("index")
            .page("index", vec![("to-a", "a"), ("to-b", "b"), ("partner", "ext")])
            .page("a", vec![("to-c", "c")])
            .page("b", vec![("to-c", "c")])
            .page("c", vec![("to-d", "d")])
            .page("d", vec![("home", "index")])
            .page("ext", vec![])
            .external("ext"),
    );

    let outcome = Coordinator::new(config, "test-hash", create_factory(&app))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.states, 5);
    assert_eq!(outcome.edges, 6);
    assert_eq!(outcome.failed_actions, 1);

    let storage = open_database(&dir);
    let graph = storage.load_graph(outcome.run_id).unwrap();
    assert!(graph.states.iter().all(|s| !s.url.starts_with(EXTERNAL_URL)));

    let failed = storage.get_failed_actions(outcome.run_id).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].selector, "#partner");
    assert_eq!(failed[0].outcome, CandidateState::Skipped);
}
