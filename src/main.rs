use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teamarr::{
    config::{Config, LogFormat},
    database::Database,
    epg::EpgOrchestrator,
    errors::AppError,
    manager::{ManagerApi, ManagerClient},
    models::RunStatus,
    providers::ProviderRegistry,
    services::{SportsDataService, TeamLeagueCache},
};

const EXIT_SUCCESS: u8 = 0;
const EXIT_ABORTED: u8 = 2;
const EXIT_GENERATION_ERROR: u8 = 3;
const EXIT_MISCONFIGURATION: u8 = 4;

/// Cache entries older than this trigger a rebuild before generation.
const CACHE_MAX_AGE_DAYS: i64 = 7;

#[derive(Parser)]
#[command(name = "teamarr")]
#[command(about = "Sports EPG generator with stream matching and channel lifecycle management")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (overrides config)
    #[arg(short = 'v', long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one EPG generation
    Generate {
        /// Emit progress events while generating
        #[arg(long)]
        stream: bool,
    },
    /// Cancel the in-flight generation run
    Abort,
    /// Team/league cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Rebuild the team/league cache from all providers
    Refresh,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    std::env::set_var("CONFIG_FILE", &cli.config);
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::from(EXIT_MISCONFIGURATION);
        }
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("teamarr={level}").into());

    let log_file = match &config.logging.dir {
        Some(dir) => {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("Failed to create log directory {}: {e}", dir.display());
                return ExitCode::from(EXIT_MISCONFIGURATION);
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("teamarr.log"))
            {
                Ok(file) => Some(Arc::new(file)),
                Err(e) => {
                    eprintln!("Failed to open log file in {}: {e}", dir.display());
                    return ExitCode::from(EXIT_MISCONFIGURATION);
                }
            }
        }
        None => None,
    };

    match (config.logging.format, log_file) {
        (LogFormat::Json, Some(file)) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(file))
                .init();
        }
        (LogFormat::Json, None) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        (LogFormat::Text, Some(file)) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(file),
                )
                .init();
        }
        (LogFormat::Text, None) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!("Starting teamarr v{}", env!("CARGO_PKG_VERSION"));

    match run_command(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            let code = match e {
                AppError::Configuration { .. } => EXIT_MISCONFIGURATION,
                AppError::Canceled => EXIT_ABORTED,
                _ => EXIT_GENERATION_ERROR,
            };
            ExitCode::from(code)
        }
    }
}

async fn run_command(cli: Cli, config: Config) -> Result<ExitCode, AppError> {
    let database = Database::new(&config.database)
        .await
        .map_err(|e| AppError::configuration(format!("database: {e}")))?;
    database
        .migrate()
        .await
        .map_err(|e| AppError::internal(format!("migrations: {e}")))?;
    info!("Database ready (schema v{})", database.schema_version().await.unwrap_or(0));

    match cli.command {
        Command::Abort => {
            database
                .request_abort()
                .await
                .map_err(|e| AppError::internal(format!("abort flag: {e}")))?;
            info!("Abort requested; the running generation will stop shortly");
            Ok(ExitCode::from(EXIT_SUCCESS))
        }
        Command::Cache {
            command: CacheCommand::Refresh,
        } => {
            let registry = Arc::new(ProviderRegistry::with_defaults(&config.providers));
            let team_cache = Arc::new(TeamLeagueCache::new(database, registry).await?);
            team_cache.refresh(&CancellationToken::new()).await?;
            Ok(ExitCode::from(EXIT_SUCCESS))
        }
        Command::Generate { stream } => generate(config, database, stream).await,
    }
}

async fn generate(
    config: Config,
    database: Database,
    stream_progress: bool,
) -> Result<ExitCode, AppError> {
    let registry = Arc::new(ProviderRegistry::with_defaults(&config.providers));
    let overrides = database
        .league_provider_overrides()
        .await
        .map_err(|e| AppError::internal(format!("league overrides: {e}")))?;
    let data = Arc::new(SportsDataService::new(registry.clone(), overrides));

    let team_cache = Arc::new(TeamLeagueCache::new(database.clone(), registry).await?);
    let manager: Option<Arc<dyn ManagerApi>> = match config.manager.as_ref() {
        Some(mc) => {
            url::Url::parse(&mc.base_url).map_err(|e| {
                AppError::configuration(format!("manager base_url '{}': {e}", mc.base_url))
            })?;
            Some(Arc::new(ManagerClient::new(mc)) as Arc<dyn ManagerApi>)
        }
        None => None,
    };

    let orchestrator = EpgOrchestrator::new(
        database.clone(),
        data,
        team_cache.clone(),
        manager,
        config.output.xmltv_path.clone(),
        Vec::new(),
    );

    let cancel = CancellationToken::new();

    // Ctrl-C aborts cleanly: flag the store and trip the token
    {
        let cancel = cancel.clone();
        let database = database.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, aborting run");
                let _ = database.request_abort().await;
                cancel.cancel();
            }
        });
    }

    team_cache
        .ensure_fresh(chrono::Duration::days(CACHE_MAX_AGE_DAYS), &cancel)
        .await?;

    let progress_task = stream_progress.then(|| {
        let mut rx = orchestrator.progress().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                println!(
                    "{} {}/{} ({:.0}%) {}",
                    event.phase, event.current, event.total, event.percent, event.label
                );
            }
        })
    });

    let record = orchestrator.run(cancel).await?;
    if let Some(task) = progress_task {
        task.abort();
    }

    info!(
        "Run {}: {} programmes, {} events, {} matched / {} unmatched streams, {} issues",
        record.generation,
        record.counters.programmes_emitted,
        record.counters.events_processed,
        record.counters.streams_matched,
        record.counters.streams_unmatched,
        record.issues.len()
    );
    for issue in &record.issues {
        info!("issue: {issue}");
    }

    let code = match record.status {
        RunStatus::Success => EXIT_SUCCESS,
        RunStatus::Aborted => EXIT_ABORTED,
        RunStatus::Failed => EXIT_GENERATION_ERROR,
    };
    Ok(ExitCode::from(code))
}
