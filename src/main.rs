//! Statecrawl main entry point
//!
//! This is the command-line interface for the Statecrawl web application
//! crawler.

use anyhow::{bail, Context};
use clap::Parser;
use statecrawl::browser::WebDriverFactory;
use statecrawl::config::{load_config_with_hash, Config, Overrides};
use statecrawl::crawler::Coordinator;
use statecrawl::output::{export_latest, load_statistics, print_statistics};
use statecrawl::storage::{SqliteStorage, DATABASE_FILE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Statecrawl: a state-exploring web application crawler
///
/// Statecrawl drives browsers through a web application, clicking elements
/// and filling forms, and records every distinct state it reaches together
/// with the actions leading between them. All browser traffic goes through
/// the configured proxy.
#[derive(Parser, Debug)]
#[command(name = "statecrawl")]
#[command(version = "1.0.0")]
#[command(about = "A state-exploring web application crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Port of the local proxy, overriding `proxy.port`
    #[arg(value_name = "PROXY_PORT")]
    proxy_port: Option<u16>,

    /// Target URL, overriding `site.url`
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "export_summary"])]
    dry_run: bool,

    /// Show statistics of the latest run in the output database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export_summary"])]
    stats: bool,

    /// Regenerate summary.md and state-graph.json from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    export_summary: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;

    let overrides = Overrides {
        proxy_port: cli.proxy_port,
        url: cli.url.clone(),
    };
    let config = config
        .freeze(&overrides)
        .context("Invalid configuration after command-line overrides")?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.export_summary {
        handle_export_summary(&config)
    } else {
        handle_crawl(config, config_hash).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("statecrawl=info,warn"),
            1 => EnvFilter::new("statecrawl=debug,info"),
            2 => EnvFilter::new("statecrawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn database_path(config: &Config) -> PathBuf {
    Path::new(&config.output.directory).join(DATABASE_FILE)
}

/// Handles the --dry-run mode: prints the frozen configuration
fn handle_dry_run(config: &Config) {
    println!("=== Statecrawl Dry Run ===\n");

    println!("Target:");
    println!("  URL: {}", config.site.url);
    if !config.site.allowed_hosts.is_empty() {
        println!("  Also allowed: {}", config.site.allowed_hosts.join(", "));
    }

    let rules = &config.crawl_rules;
    println!("\nCrawl Rules:");
    println!("  Form fill mode: {:?}", rules.form_fill_mode);
    println!("  Click default elements: {}", rules.click_default_elements);
    println!("  Extra click selectors: {}", rules.click.len());
    println!("  Excluded selectors: {}", rules.dont_click.len());
    println!("  Excluded containers: {}", rules.dont_click_children_of.len());
    println!("  Hidden anchors: {}", rules.crawl_hidden_anchors);
    println!("  Frames: {}", rules.crawl_frames);
    println!("  Random click order: {}", rules.click_elements_in_random_order);
    println!("  Frontier order: {:?}", rules.frontier_order);
    println!("  Wait after reload: {}ms", rules.wait_after_reload_ms);
    println!("  Wait after event: {}ms", rules.wait_after_event_ms);
    println!("  Dispatch retries: {}", rules.max_dispatch_retries);

    println!("\nLimits:");
    println!("  Max states: {}", config.limits.max_states);
    println!("  Max depth: {}", config.limits.max_depth);
    println!("  Max runtime (s): {}", config.limits.max_runtime_secs);

    println!("\nBrowser:");
    println!("  Type: {}", config.browser.browser_type);
    println!("  Count: {}", config.browser.count);
    println!("  Headless: {}", config.browser.headless);
    if let Some(driver_url) = config.browser.effective_driver_url() {
        println!("  Driver: {}", driver_url);
    }
    if let Some(binary) = &config.browser.driver_binary {
        println!("  Driver binary: {}", binary);
    }

    println!("\nProxy:");
    match config.proxy.address() {
        Some(address) => println!("  {}", address),
        None => println!("  disabled"),
    }

    println!("\nState Abstraction:");
    println!("  Strategy: {}", config.state_abstraction.strategy);
    println!(
        "  Similarity threshold: {}",
        config.state_abstraction.similarity_threshold
    );

    println!("\nForm Inputs ({}):", config.form_inputs.len());
    for input in &config.form_inputs {
        println!("  - {} = {}", input.field, input.value);
    }

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory);
    println!("  Screenshots: {}", config.output.screenshots);
    println!("  Crawl overview: {}", config.plugins.crawl_overview);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let path = database_path(config);
    println!("Database: {}\n", path.display());

    let storage = SqliteStorage::new(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    match load_statistics(&storage)? {
        Some(stats) => print_statistics(&stats),
        None => println!("No crawl runs recorded yet."),
    }
    Ok(())
}

/// Handles the --export-summary mode: regenerates the reports
fn handle_export_summary(config: &Config) -> anyhow::Result<()> {
    let path = database_path(config);
    println!("=== Exporting Crawl Summary ===\n");
    println!("Database: {}", path.display());
    println!("Output: {}", config.output.directory);
    println!();

    let storage = SqliteStorage::new(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    tracing::info!("Loading crawl data from database...");
    let written = export_latest(&storage, Path::new(&config.output.directory))?;
    for file in written {
        println!("✓ Exported {}", file.display());
    }
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Arc<Config>, config_hash: String) -> anyhow::Result<()> {
    tracing::info!(
        "Crawling {} with {} {} browser(s)",
        config.site.url,
        config.browser.count,
        config.browser.browser_type
    );
    if let Some(proxy) = config.proxy.address() {
        tracing::info!("Routing browser traffic through {}", proxy);
    }

    let factory = WebDriverFactory::new(Arc::clone(&config)).context("Failed to build HTTP client")?;
    let coordinator = Coordinator::new(config, config_hash, Arc::new(factory));

    // Ctrl-C finishes in-flight actions and then stops
    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight actions");
            stop.stop();
        }
    });

    let outcome = coordinator.run().await.context("Crawl failed")?;
    if !outcome.is_success() {
        bail!(
            "Crawl ended with {}: {} states, {} edges recorded",
            outcome.termination,
            outcome.states,
            outcome.edges
        );
    }

    tracing::info!(
        "Crawl completed ({}): {} states, {} edges",
        outcome.termination,
        outcome.states,
        outcome.edges
    );
    Ok(())
}
