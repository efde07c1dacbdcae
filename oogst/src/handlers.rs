use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use oogst_core::config::{HarvestConfig, expand_path};
use oogst_core::frontier::{Frontier, FrontierEntry};
use oogst_core::harvest::{
    BatchMode, DiscoverReport, HarvestProgressCallback, Harvester, ProcessReport, ShutdownSignal,
};
use oogst_core::progress::ProgressSnapshot;
use oogst_scanner::chromium::{ChromiumOptions, ChromiumSession};
use oogst_scanner::paginator::SearchPaginator;
use oogst_scanner::visitor::DetailVisitor;
use oogst_tui::monitor::{MonitorOptions, run_monitor, run_plain_monitor};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Batch size for `process --claim` without `--limit`.
pub const DEFAULT_CLAIM_BATCH: usize = 100;

const BANNER: &str = r#"
   ___   ___   __ _ ___| |_
  / _ \ / _ \ / _` / __| __|
 | (_) | (_) | (_| \__ \ |_
  \___/ \___/ \__, |___/\__|
              |___/
"#;

/// Effective configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: HarvestConfig,
    pub database: PathBuf,
}

/// Load the config file (if any) and apply the database override.
///
/// The database path comes from `--database`/`OOGST_DATABASE` when given,
/// otherwise from the config file, otherwise the default.
pub fn resolve_settings(config_path: Option<&Path>, database: Option<&str>) -> Result<Settings> {
    let config_path = config_path.map(|p| expand_path(&p.to_string_lossy()));
    let config = HarvestConfig::load_or_default(config_path.as_deref())?;
    let database = match database {
        Some(raw) => expand_path(raw),
        None => config.database_path(),
    };
    Ok(Settings { config, database })
}

pub fn chromium_options(config: &HarvestConfig) -> ChromiumOptions {
    ChromiumOptions {
        headless: config.browser.headless,
        user_agent: config.site.user_agent.clone(),
        chrome_executable: config.browser.chrome_executable.clone(),
        chrome_args: config.browser.chrome_args.clone(),
        remote_url: config.browser.remote_url.clone(),
        request_timeout: Duration::from_secs(config.timing.navigation_timeout_secs),
    }
}

pub fn print_banner() {
    println!("{}", BANNER.bright_green().bold());
    println!(
        "  {} {}",
        "oogst".bright_white().bold(),
        format!("v{} - catalog harvester", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message.to_string());
    spinner
}

fn spinner_callback(spinner: &ProgressBar) -> HarvestProgressCallback {
    let spinner = spinner.clone();
    Arc::new(move |message: String| spinner.set_message(message))
}

fn open_frontier(settings: &Settings) -> Result<Arc<Frontier>> {
    let frontier = Frontier::open(&settings.database)
        .with_context(|| format!("Failed to open database {}", settings.database.display()))?;
    Ok(Arc::new(frontier))
}

/// Remove a database file together with its WAL side files.
pub fn remove_database(path: &Path) -> io::Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut os = path.as_os_str().to_os_string();
        os.push(suffix);
        let file = PathBuf::from(os);
        if file.exists() {
            fs::remove_file(&file)?;
        }
    }
    Ok(())
}

pub fn handle_init(settings: &Settings, force: bool) -> Result<()> {
    print_divider();
    println!("{}", "  OOGST INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let db_path = settings.database.as_path();
    println!(
        "{} Target: {}",
        "→".blue(),
        db_path.display().to_string().bright_white()
    );

    if Frontier::exists(db_path) {
        if !force {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Database already exists; leaving it untouched. Use --force to recreate it.");
            return Ok(());
        }
        println!(
            "{} Deleting existing database (force mode)",
            "→".yellow().bold()
        );
        remove_database(db_path)
            .with_context(|| format!("Failed to remove {}", db_path.display()))?;
    }

    let frontier = open_frontier(settings)?;
    let stats = frontier.stats(Duration::ZERO)?;
    println!(
        "{} Database ready ({} entries)",
        "✓".green().bold(),
        stats.total
    );
    Ok(())
}

pub async fn handle_discover(
    settings: &Settings,
    max_pages: Option<u32>,
    shutdown: ShutdownSignal,
) -> Result<DiscoverReport> {
    let frontier = open_frontier(settings)?;
    let paginator = SearchPaginator::new(settings.config.search_options())?;

    let progress = spinner("Launching browser...");
    let session = ChromiumSession::launch(&chromium_options(&settings.config)).await?;

    let result = async {
        let page = session.new_page().await?;
        let harvester = Harvester::new(frontier, settings.config.harvest_options())
            .with_shutdown(shutdown)
            .with_progress_callback(spinner_callback(&progress));
        progress.set_message("Collecting URLs...");
        Ok::<_, anyhow::Error>(harvester.discover(&page, &paginator, max_pages).await?)
    }
    .await;

    session.close().await;
    progress.finish_and_clear();

    let report = result?;
    println!(
        "{} Visited {} search pages: {} links, {} new URLs",
        "✓".green().bold(),
        report.pages_visited.to_string().bright_white(),
        report.links_found.to_string().bright_white(),
        report.new_urls.to_string().bright_green()
    );
    Ok(report)
}

pub fn batch_mode(limit: Option<usize>, claim: bool, lease: Duration) -> BatchMode {
    if claim {
        BatchMode::Claim {
            limit: limit.unwrap_or(DEFAULT_CLAIM_BATCH),
            lease,
        }
    } else {
        BatchMode::Next { limit }
    }
}

pub async fn handle_process(
    settings: &Settings,
    mode: BatchMode,
    shutdown: ShutdownSignal,
) -> Result<ProcessReport> {
    let frontier = open_frontier(settings)?;

    let progress = spinner("Launching browser...");
    let session = ChromiumSession::launch(&chromium_options(&settings.config)).await?;

    let result = async {
        let page = session.new_page().await?;
        let mut visitor = DetailVisitor::new(settings.config.visit_options());
        let harvester = Harvester::new(frontier, settings.config.harvest_options())
            .with_shutdown(shutdown)
            .with_progress_callback(spinner_callback(&progress));
        progress.set_message("Processing URLs...");
        Ok::<_, anyhow::Error>(harvester.process(&page, &mut visitor, mode).await?)
    }
    .await;

    session.close().await;
    progress.finish_and_clear();

    let report = result?;
    if report.attempted == 0 {
        println!("{} No unprocessed URLs found", "ℹ".blue());
        return Ok(report);
    }
    println!(
        "{} Processed {}/{} URLs",
        "✓".green().bold(),
        report.processed.to_string().bright_green(),
        report.attempted
    );
    if report.visit_errors > 0 {
        println!(
            "{} {} pages failed to load (stored with their error)",
            "⚠".yellow().bold(),
            report.visit_errors
        );
    }
    if report.storage_errors > 0 {
        println!(
            "{} {} results could not be stored; those URLs stay queued",
            "✗".red().bold(),
            report.storage_errors
        );
    }
    Ok(report)
}

pub fn stats_line(frontier: &Frontier, window: Duration) -> Result<String> {
    let stats = frontier.stats(window)?;
    Ok(ProgressSnapshot::new(stats, window).render_line())
}

pub fn handle_stats(settings: &Settings, window_mins: Option<u64>) -> Result<()> {
    let window = window_mins
        .map(|m| Duration::from_secs(m * 60))
        .unwrap_or_else(|| settings.config.recent_window());
    let frontier = open_frontier(settings)?;
    println!("{}", stats_line(&frontier, window)?);
    Ok(())
}

pub async fn handle_monitor(
    settings: &Settings,
    interval_secs: Option<u64>,
    plain: bool,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let frontier = open_frontier(settings)?;
    let options = MonitorOptions {
        poll_interval: interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| settings.config.poll_interval()),
        window: settings.config.recent_window(),
    };

    let last = if plain {
        println!("oogst - Progress Monitor");
        println!("{}", "=".repeat(50));
        run_plain_monitor(frontier, options, shutdown.flag(), &mut io::stdout()).await?
    } else {
        let flag = shutdown.flag();
        tokio::task::spawn_blocking(move || run_monitor(frontier, options, flag)).await??
    };

    match last {
        Some(snapshot) if snapshot.is_complete() => {
            info!("Monitor finished: nothing left to process");
            if !plain {
                println!("{}", snapshot.render_line());
                println!("{} All URLs processed!", "✓".green().bold());
            }
        }
        Some(snapshot) => println!("{}", snapshot.render_line()),
        None => warn!("Monitor stopped before the first poll"),
    }
    Ok(())
}

pub fn lookup_entry(frontier: &Frontier, url: &str) -> Result<FrontierEntry> {
    frontier
        .get(url)?
        .ok_or_else(|| anyhow!("{} is not in the frontier", url))
}

pub fn handle_show(settings: &Settings, url: &str) -> Result<()> {
    let frontier = open_frontier(settings)?;
    let entry = lookup_entry(&frontier, url)?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}
