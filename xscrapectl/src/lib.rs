use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as log_fmt, EnvFilter};
use xscrape_core::browser::{
    verify_logged_in, AutomationTelemetry, BrowserAutomation, BrowserError, BrowserLauncher,
    BrowserProfilePage, CancelSignal, FileSessionProvisioner, LaunchOverrides, RunContext,
    SessionProvisioner, TelemetryError,
};
use xscrape_core::timeline::{
    AccountScraper, FileResultSink, Orchestrator, RunReport, StatsCollector,
};
use xscrape_core::{load_scraper_config, ConfigError, ScraperConfig};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to initialise logging: {0}")]
    Logging(String),
    #[error("no accounts specified; pass --accounts or list them in the config file")]
    NoAccounts,
    #[error("{0} already exists (use --force to overwrite)")]
    AlreadyExists(PathBuf),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Scrapes public posts from X profile timelines", long_about = None)]
pub struct Cli {
    /// Config file (TOML, or JSON when it ends in .json)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,
    /// Saved browser session (storage state JSON)
    #[arg(long, global = true)]
    pub session: Option<PathBuf>,
    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,
    /// Only warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scrape the configured accounts
    Scrape(ScrapeArgs),
    /// Open a browser window to log in by hand and save the session
    Login,
    /// Check that the saved session is still signed in
    VerifySession,
    /// Write a sample config file
    InitConfig(InitConfigArgs),
    /// Show recent per-account run records
    History(HistoryArgs),
    /// Print shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug, Default)]
pub struct ScrapeArgs {
    /// Comma-separated handles, overriding the config list
    #[arg(short, long, value_delimiter = ',')]
    pub accounts: Vec<String>,
    /// Output directory
    #[arg(short, long)]
    pub out: Option<PathBuf>,
    /// Posts to collect per account
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    /// Run the browser without a window
    #[arg(long, conflicts_with = "headful")]
    pub headless: bool,
    /// Show the browser window
    #[arg(long)]
    pub headful: bool,
    /// Only keep posts from the last N days
    #[arg(long)]
    pub days: Option<u32>,
}

impl ScrapeArgs {
    /// Layers command-line values over `config` and revalidates.
    pub fn apply(&self, mut config: ScraperConfig) -> Result<ScraperConfig> {
        if !self.accounts.is_empty() {
            config.accounts = self.accounts.clone();
        }
        if let Some(out) = &self.out {
            config.output_dir = out.clone();
        }
        if let Some(limit) = self.limit {
            config.posts_per_account = limit;
        }
        if self.headless {
            config.browser.headless = true;
        } else if self.headful {
            config.browser.headless = false;
        }
        if let Some(days) = self.days {
            config.date_cutoff_days = Some(days);
        }
        Ok(config.validated()?)
    }
}

#[derive(Args, Debug)]
pub struct InitConfigArgs {
    /// Where to write the sample
    #[arg(long, default_value = "config.toml")]
    pub path: PathBuf,
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "xscrapectl", &mut io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = base_config(&cli)?;
    let directive = filter_directive(
        cli.verbose,
        cli.quiet,
        std::env::var("RUST_LOG").ok(),
        &config.logging.level,
    );
    let log_file = cli.log_file.clone().or_else(|| config.logging.file.clone());
    init_tracing(&directive, log_file.as_deref())?;

    match &cli.command {
        Commands::Scrape(args) => {
            config = args.apply(config)?;
            scrape(config).await
        }
        Commands::Login => login(config).await,
        Commands::VerifySession => verify_session(config).await,
        Commands::InitConfig(args) => {
            let path = init_config(args)?;
            info!(path = %path.display(), "sample config written; add your accounts and run `xscrapectl scrape`");
            Ok(ExitCode::SUCCESS)
        }
        Commands::History(args) => {
            let telemetry = open_telemetry(&config)?;
            let runs = telemetry.recent_runs(args.limit)?;
            render(&RunHistory { runs }, args.format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions(_) => Ok(ExitCode::SUCCESS),
    }
}

/// Config file (or defaults) with the global `--session` applied.
fn base_config(cli: &Cli) -> Result<ScraperConfig> {
    let mut config = match &cli.config {
        Some(path) => load_scraper_config(path)?,
        None => ScraperConfig::default(),
    };
    if let Some(session) = &cli.session {
        config.session.storage_state = Some(session.clone());
    }
    Ok(config)
}

/// `--verbose`/`--quiet` win over `RUST_LOG`, which wins over the config.
pub fn filter_directive(
    verbose: bool,
    quiet: bool,
    env: Option<String>,
    configured: &str,
) -> String {
    if verbose {
        return "debug".to_string();
    }
    if quiet {
        return "warn".to_string();
    }
    env.filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| configured.to_string())
}

fn init_tracing(directive: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                log_fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(log_fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|err| AppError::Logging(err.to_string()))
}

fn open_telemetry(config: &ScraperConfig) -> Result<Arc<AutomationTelemetry>> {
    let telemetry = AutomationTelemetry::new(
        &config.observability.failure_log,
        &config.observability.metrics_db,
    )?;
    Ok(Arc::new(telemetry))
}

async fn scrape(config: ScraperConfig) -> Result<ExitCode> {
    if config.accounts.is_empty() {
        return Err(AppError::NoAccounts);
    }
    let config = Arc::new(config);
    let telemetry = open_telemetry(&config)?;
    let provisioner = FileSessionProvisioner::new(config.session.storage_state.clone());
    if !provisioner.has_saved_state() {
        warn!(
            path = %provisioner.path().display(),
            "no saved session, timelines may be truncated; run `xscrapectl login` first"
        );
    }

    let launcher = BrowserLauncher::new(Arc::clone(&config));
    let automation = launcher.launch(&provisioner.context_options(&config)).await?;
    let outcome = scrape_with(&automation, &config, &provisioner, telemetry).await;
    if let Err(err) = automation.shutdown().await {
        warn!(error = %err, "browser did not shut down cleanly");
    }

    let report = outcome?;
    log_summary(&report);
    Ok(ExitCode::from(report.exit_code()))
}

async fn scrape_with(
    automation: &BrowserAutomation,
    config: &ScraperConfig,
    provisioner: &FileSessionProvisioner,
    telemetry: Arc<AutomationTelemetry>,
) -> Result<RunReport> {
    let state = provisioner.load_state()?;
    let context = automation.new_context(state.as_ref()).await?;
    let mut page = BrowserProfilePage::new(context);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing up");
            let _ = cancel_tx.send(true);
        }
    });

    let scraper = AccountScraper::from_config(config)
        .with_metrics(automation.metrics_handle())
        .with_telemetry(Arc::clone(&telemetry))
        .with_cancel(CancelSignal::new(cancel_rx));
    let sink = Arc::new(FileResultSink::new(&config.output_dir));
    let stats = Arc::new(StatsCollector::new());
    let mut orchestrator = Orchestrator::new(scraper, sink, stats).with_telemetry(telemetry);

    let report = orchestrator
        .run(&mut page, &config.accounts, config.cutoff(Utc::now()))
        .await;
    interrupt.abort();

    if provisioner.has_saved_state() {
        match page.context().storage_state().await {
            Ok(state) => {
                if let Err(err) = provisioner.persist(&state) {
                    warn!(error = %err, "failed to refresh saved session");
                }
            }
            Err(err) => warn!(error = %err, "could not read session state from browser"),
        }
    }
    Ok(report)
}

fn log_summary(report: &RunReport) {
    let stats = &report.stats;
    info!(
        run_id = %report.run_id,
        accounts_processed = stats.accounts_processed,
        accounts_failed = stats.accounts_failed,
        total_posts = stats.total_posts,
        duration_secs = stats.duration_secs.unwrap_or_default(),
        "run summary"
    );
    for outcome in &report.outcomes {
        info!(
            handle = %outcome.handle,
            posts = outcome.posts.len(),
            reason = %outcome.reason,
            "account result"
        );
    }
    for (handle, location) in &report.per_account {
        info!(handle = %handle, json = %location.json.display(), csv = %location.csv.display(), "saved");
    }
    if let Some(combined) = &report.combined {
        info!(json = %combined.json.display(), csv = %combined.csv.display(), "combined results saved");
    }
    for failure in &stats.failures {
        warn!(handle = %failure.handle, reason = %failure.reason, "account yielded no posts");
    }
    for message in &stats.errors {
        error!(error = %message, "run error");
    }
    let metrics = &report.metrics;
    info!(
        navigations = metrics.navigations,
        timeouts = metrics.navigation_timeouts,
        rate_limits = metrics.rate_limit_hits,
        scrolls = metrics.scroll_passes,
        duplicates = metrics.duplicates_skipped,
        rejects = metrics.extraction_rejects,
        "browser metrics"
    );
}

async fn login(config: ScraperConfig) -> Result<ExitCode> {
    let config = Arc::new(config);
    let provisioner = FileSessionProvisioner::new(config.session.storage_state.clone());
    let launcher = BrowserLauncher::new(Arc::clone(&config));
    let automation = launcher
        .launch_with_overrides(
            &provisioner.context_options(&config),
            LaunchOverrides {
                headless: Some(false),
            },
        )
        .await?;
    let outcome = login_with(&automation, &config, &provisioner).await;
    if let Err(err) = automation.shutdown().await {
        warn!(error = %err, "browser did not shut down cleanly");
    }

    if outcome? {
        info!(path = %provisioner.path().display(), "login saved, you can now run `xscrapectl scrape`");
        Ok(ExitCode::SUCCESS)
    } else {
        error!("could not confirm the login, session saved anyway; try `xscrapectl verify-session`");
        Ok(ExitCode::FAILURE)
    }
}

async fn login_with(
    automation: &BrowserAutomation,
    config: &ScraperConfig,
    provisioner: &FileSessionProvisioner,
) -> Result<bool> {
    let state = provisioner.load_state()?;
    let context = automation.new_context(state.as_ref()).await?;
    context.goto(&format!("{}/login", config.base_url)).await?;

    info!("log in using the browser window");
    tokio::task::spawn_blocking(wait_for_enter)
        .await
        .map_err(|err| AppError::Io(io::Error::new(io::ErrorKind::Other, err)))??;

    let mut page = BrowserProfilePage::new(context);
    let home = format!("{}/home", config.base_url);
    let wait = Duration::from_millis(config.timeouts.page_ms);
    let logged_in = match verify_logged_in(&mut page, &home, wait).await {
        Ok(logged_in) => logged_in,
        Err(err) => {
            warn!(error = %err, "could not check login state");
            false
        }
    };
    let state = page.context().storage_state().await?;
    provisioner.persist(&state)?;
    Ok(logged_in)
}

fn wait_for_enter() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "\n>>> Press ENTER after you have logged in... ")?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

async fn verify_session(config: ScraperConfig) -> Result<ExitCode> {
    let config = Arc::new(config);
    let provisioner = FileSessionProvisioner::new(config.session.storage_state.clone());
    if !provisioner.has_saved_state() {
        warn!(path = %provisioner.path().display(), "no saved session found; run `xscrapectl login`");
        return Ok(ExitCode::FAILURE);
    }

    let launcher = BrowserLauncher::new(Arc::clone(&config));
    let automation = launcher.launch(&provisioner.context_options(&config)).await?;
    let outcome = async {
        let state = provisioner.load_state()?;
        let context = automation.new_context(state.as_ref()).await?;
        let mut page = BrowserProfilePage::new(context);
        let home = format!("{}/home", config.base_url);
        let wait = Duration::from_millis(config.timeouts.page_ms);
        Ok::<bool, AppError>(verify_logged_in(&mut page, &home, wait).await?)
    }
    .await;
    if let Err(err) = automation.shutdown().await {
        warn!(error = %err, "browser did not shut down cleanly");
    }

    if outcome? {
        info!("session is valid");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("session is invalid or expired");
        Ok(ExitCode::FAILURE)
    }
}

const SAMPLE_HEADER: &str = "\
# Sample scraper configuration.
# List handles under `accounts`, then run `xscrapectl scrape -c <this file>`.
# Every section is optional; omitted values use the built-in defaults.

";

/// Writes the sample config as TOML, or JSON for a `.json` path.
pub fn init_config(args: &InitConfigArgs) -> Result<PathBuf> {
    if args.path.exists() && !args.force {
        return Err(AppError::AlreadyExists(args.path.clone()));
    }
    let sample = ScraperConfig::sample();
    let is_json = args
        .path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let body = if is_json {
        serde_json::to_string_pretty(&sample)?
    } else {
        format!("{SAMPLE_HEADER}{}", sample.to_toml_string()?)
    };
    if let Some(parent) = args.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&args.path, body)?;
    Ok(args.path.clone())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + fmt::Display,
{
    match format {
        OutputFormat::Text => println!("{value}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct RunHistory {
    pub runs: Vec<RunContext>,
}

impl fmt::Display for RunHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.runs.is_empty() {
            return write!(f, "No runs recorded");
        }
        for (index, run) in self.runs.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{} | {} | @{} | {} | posts={} | {}ms",
                run.timestamp.format("%Y-%m-%d %H:%M:%S"),
                run.run_id,
                run.handle,
                run.reason,
                run.posts,
                run.duration_ms
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_scrape_overrides() {
        let cli = Cli::try_parse_from([
            "xscrapectl",
            "scrape",
            "--accounts",
            "nasa,@rustlang",
            "--limit",
            "5",
            "--headful",
            "--days",
            "7",
            "-o",
            "out",
        ])
        .unwrap();
        let Commands::Scrape(args) = cli.command else {
            panic!("expected scrape");
        };
        assert_eq!(args.accounts, vec!["nasa", "@rustlang"]);

        let config = args.apply(ScraperConfig::default()).unwrap();
        assert_eq!(config.accounts, vec!["nasa", "rustlang"]);
        assert_eq!(config.posts_per_account, 5);
        assert!(!config.browser.headless);
        assert_eq!(config.date_cutoff_days, Some(7));
        assert_eq!(config.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn headless_and_headful_conflict() {
        let result = Cli::try_parse_from(["xscrapectl", "scrape", "--headless", "--headful"]);
        assert!(result.is_err());
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["xscrapectl", "-v", "-q", "login"]).is_err());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "xscrapectl",
            "verify-session",
            "--session",
            "state.json",
            "--log-file",
            "logs/run.log",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::VerifySession));
        assert_eq!(cli.session, Some(PathBuf::from("state.json")));
        assert_eq!(cli.log_file, Some(PathBuf::from("logs/run.log")));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let args = ScrapeArgs {
            limit: Some(0),
            ..ScrapeArgs::default()
        };
        assert!(matches!(
            args.apply(ScraperConfig::default()),
            Err(AppError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn log_level_precedence() {
        assert_eq!(filter_directive(true, false, Some("trace".into()), "info"), "debug");
        assert_eq!(filter_directive(false, true, None, "info"), "warn");
        assert_eq!(
            filter_directive(false, false, Some("xscrape_core=trace".into()), "info"),
            "xscrape_core=trace"
        );
        assert_eq!(filter_directive(false, false, Some(" ".into()), "error"), "error");
    }

    #[test]
    fn init_config_writes_a_loadable_sample() {
        let dir = tempdir().unwrap();
        let args = InitConfigArgs {
            path: dir.path().join("conf/config.toml"),
            force: false,
        };
        let path = init_config(&args).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Sample scraper configuration."));

        let config = load_scraper_config(&path).unwrap();
        assert_eq!(config.accounts, vec!["nasa", "rustlang"]);

        assert!(matches!(init_config(&args), Err(AppError::AlreadyExists(_))));
    }

    #[test]
    fn init_config_supports_json() {
        let dir = tempdir().unwrap();
        let args = InitConfigArgs {
            path: dir.path().join("config.json"),
            force: false,
        };
        let path = init_config(&args).unwrap();
        let config = load_scraper_config(&path).unwrap();
        assert_eq!(config.posts_per_account, 25);
    }

    #[test]
    fn history_renders_runs() {
        let empty = RunHistory { runs: Vec::new() };
        assert_eq!(empty.to_string(), "No runs recorded");

        let history = RunHistory {
            runs: vec![RunContext {
                timestamp: Utc::now(),
                run_id: "abc".into(),
                handle: "nasa".into(),
                reason: "limit_reached".into(),
                posts: 20,
                success: true,
                duration_ms: 1_500,
            }],
        };
        let text = history.to_string();
        assert!(text.contains("@nasa"));
        assert!(text.contains("posts=20"));
    }
}
