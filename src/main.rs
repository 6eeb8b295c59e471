//! Retainless - Privacy-Preserving Retention Analytics
//!
//! Entry point for the period processor and the cohort report commands.
//! Logs go to stderr; reports are written to stdout as CSV.

use chrono::{DateTime, NaiveDate, Offset, Utc};
use clap::{Args, Parser, Subcommand};
use retainless_core::{
    error::{RetainlessError, Result},
    load_report_rows, CohortReport, LogSource, Notifier, PeriodJob, ReportKind, RetainlessConfig,
    SecretRing, SqliteStore, TracingNotifier, W3cLogBackend, WebhookNotifier, WindowedLogSource,
};
use retainless_core::ingest::IngestSettings;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "retainless")]
#[command(about = "Privacy-preserving visitor retention analytics", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Config file (defaults to ./retainless.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config and default)
    #[arg(long, global = true, env = "RETAINLESS_DB_PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Args)]
struct ReportRange {
    /// First cohort day (YYYY-MM-DD)
    #[arg(long)]
    start: NaiveDate,

    /// Last day whose periods are included (YYYY-MM-DD, inclusive)
    #[arg(long)]
    end: NaiveDate,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// Process one period of access logs
    Process {
        /// Period end (RFC 3339); defaults to the start of today
        #[arg(long)]
        period_end: Option<DateTime<Utc>>,

        /// W3C access log file or directory (overrides config)
        #[arg(long)]
        log_path: Option<PathBuf>,
    },

    /// Visitors active on each day after their first visit
    DailyRetention(ReportRange),

    /// Visitors that have not yet churned, with the pool they survived from
    DailyChurnRate(ReportRange),

    /// Visitors returning in each week after their first visit
    WeeklyRetention(ReportRange),
}

async fn open_store(config: &RetainlessConfig) -> Result<SqliteStore> {
    let store = SqliteStore::open(config.database_path())?;
    store.run_migrations().await?;
    Ok(store)
}

async fn process(
    config: RetainlessConfig,
    period_end: Option<DateTime<Utc>>,
    log_path: Option<PathBuf>,
) -> Result<()> {
    let now = Utc::now();
    let period_end = period_end.unwrap_or_else(|| config.default_period_end(now));

    let log_path = log_path.or_else(|| config.log_path.clone()).ok_or_else(|| {
        RetainlessError::Config(config::ConfigError::Message(
            "No access logs configured. Pass --log-path or set RETAINLESS_LOG_PATH".to_string(),
        ))
    })?;

    let secrets = SecretRing::from_config(&config.secrets)?;
    let store = Arc::new(open_store(&config).await?);
    let backend = W3cLogBackend::open(&log_path).await?;
    let logs: Arc<dyn LogSource> = Arc::new(WindowedLogSource::new(
        Arc::new(backend),
        IngestSettings::from_config(&config),
    ));
    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(TracingNotifier),
    };

    let job = PeriodJob::new(config, secrets, store, logs, notifier);
    let summary = job.run(period_end, now).await?;
    debug!("Run summary: {}", serde_json::to_string(&summary)?);
    Ok(())
}

async fn report(config: RetainlessConfig, kind: ReportKind, range: ReportRange) -> Result<()> {
    let utc_offset = config.utc_offset().unwrap_or_else(|| Utc.fix());
    let store = open_store(&config).await?;

    let rows = load_report_rows(&store, range.start, range.end, utc_offset).await?;
    info!("Folding {} rows", rows.len());

    let report = CohortReport::fold(kind, &rows, utc_offset);
    report.write_csv(std::io::stdout().lock())?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!(
        "retainless={level},retainless_core={level}",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Retainless v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = RetainlessConfig::load(cli.config.as_deref())?;
    if let Some(db_path) = cli.db_path {
        config.database_path = Some(db_path);
    }

    match cli.command {
        Commands::Init => {
            open_store(&config).await?;
            println!("Initialized {}", config.database_path().display());
            Ok(())
        }
        Commands::Process {
            period_end,
            log_path,
        } => process(config, period_end, log_path).await,
        Commands::DailyRetention(range) => report(config, ReportKind::DailyRetention, range).await,
        Commands::DailyChurnRate(range) => report(config, ReportKind::DailySurvival, range).await,
        Commands::WeeklyRetention(range) => {
            report(config, ReportKind::WeeklyRetention, range).await
        }
    }
}
