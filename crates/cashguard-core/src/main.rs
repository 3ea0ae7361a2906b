//! CashGuard CLI
//!
//! Command-line interface for the CashGuard alerting engine.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use cashguard::alerting::{
    AlertStateStore, EmailChannel, InMemoryAlertStore, LogChannel, NotificationChannel,
    PostgresAlertStore, RetrySweeper, StaticRecipients, TriggerEvaluationService, WebhookChannel,
};
use cashguard::api::HttpServer;
use cashguard::config::{ChannelKind, Config, LoggingConfig};
use cashguard::metrics::HttpMetricsProvider;
use cashguard::models::MetricsSnapshot;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// CashGuard - cash-runway alerting
#[derive(Parser)]
#[command(name = "cashguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "CASHGUARD_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use the in-memory store instead of Postgres
    #[arg(long, global = true)]
    memory: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and the retry sweeper
    Serve {
        /// HTTP API port
        #[arg(long, env = "CASHGUARD_HTTP_PORT")]
        port: Option<u16>,

        /// Do not run the retry sweeper in this process
        #[arg(long)]
        no_sweeper: bool,
    },

    /// Evaluate an organization's metrics now
    Evaluate {
        /// Organization id
        organization_id: String,

        /// Cash balance (fetched from the metrics provider when omitted)
        #[arg(long, requires = "burn")]
        balance: Option<f64>,

        /// Monthly burn rate
        #[arg(long, requires = "balance")]
        burn: Option<f64>,

        /// Precomputed runway in days
        #[arg(long)]
        runway_days: Option<f64>,

        /// Only evaluate conditions of this family
        #[arg(long)]
        family: Option<String>,
    },

    /// Retry failed alert deliveries for an organization
    Retry {
        /// Organization id
        organization_id: String,
    },

    /// Database management
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging, cli.verbose);

    let result = match cli.command {
        Commands::Serve { port, no_sweeper } => run_serve(config, cli.memory, port, no_sweeper).await,
        Commands::Evaluate {
            organization_id,
            balance,
            burn,
            runway_days,
            family,
        } => {
            run_evaluate(
                config,
                cli.memory,
                &organization_id,
                balance.zip(burn),
                runway_days,
                family.as_deref(),
                cli.format,
            )
            .await
        }
        Commands::Retry { organization_id } => {
            run_retry(config, cli.memory, &organization_id, cli.format).await
        }
        Commands::Db { command } => run_db(config, command).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_store(config: &Config, memory: bool) -> anyhow::Result<Arc<dyn AlertStateStore>> {
    if memory {
        warn!("Using in-memory alert store; state is lost on exit");
        return Ok(Arc::new(InMemoryAlertStore::new()));
    }

    let store = PostgresAlertStore::connect(&config.database)
        .await
        .context("connecting to database")?;
    Ok(Arc::new(store))
}

fn build_channel(config: &Config) -> anyhow::Result<Arc<dyn NotificationChannel>> {
    let notification = &config.notification;
    let channel: Arc<dyn NotificationChannel> = match notification.channel {
        ChannelKind::Email => Arc::new(EmailChannel::new(notification.email.clone())?),
        ChannelKind::Webhook => Arc::new(WebhookChannel::new(notification.webhook.clone())?),
        ChannelKind::Log => Arc::new(LogChannel),
    };
    Ok(channel)
}

fn build_service(
    config: &Config,
    store: Arc<dyn AlertStateStore>,
) -> anyhow::Result<TriggerEvaluationService> {
    let recipients = StaticRecipients::new(
        config.notification.recipients.clone(),
        config.notification.default_recipients.clone(),
    );

    let mut service = TriggerEvaluationService::new(
        config.rule_set(),
        store,
        build_channel(config)?,
        Arc::new(recipients),
    );

    if let Some(provider) = HttpMetricsProvider::from_config(&config.metrics)? {
        service = service.with_metrics_provider(Arc::new(provider));
    }

    Ok(service)
}

async fn run_serve(
    config: Config,
    memory: bool,
    port: Option<u16>,
    no_sweeper: bool,
) -> anyhow::Result<()> {
    let store = build_store(&config, memory).await?;
    let service = Arc::new(build_service(&config, store.clone())?);

    let sweeper_handle = if no_sweeper {
        None
    } else {
        let sweeper = RetrySweeper::new(
            service.clone(),
            store,
            config.alerting.retry_sweep_interval,
        );
        Some(tokio::spawn(async move { sweeper.start().await }))
    };

    let addr = format!("{}:{}", config.server.host, port.unwrap_or(config.server.port));
    info!(channel = ?config.notification.channel, "Starting CashGuard on {}", addr);

    let server = HttpServer::new(service);

    tokio::select! {
        result = server.serve(&addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down...");
        }
    }

    if let Some(handle) = sweeper_handle {
        handle.abort();
    }

    Ok(())
}

async fn run_evaluate(
    config: Config,
    memory: bool,
    organization_id: &str,
    figures: Option<(f64, f64)>,
    runway_days: Option<f64>,
    family: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let store = build_store(&config, memory).await?;
    let service = build_service(&config, store)?;

    let result = match figures {
        Some((balance, burn)) => {
            let mut snapshot = MetricsSnapshot::new(organization_id, balance, burn);
            snapshot.runway_days = runway_days;
            service
                .evaluate_family(organization_id, &snapshot, family)
                .await?
        }
        None => service.evaluate_current(organization_id, family).await?,
    };

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => {
            println!("Organization:    {organization_id}");
            println!("Newly triggered: {}", result.newly_triggered.join(", "));
            println!("Newly resolved:  {}", result.newly_resolved.join(", "));
            println!("Still active:    {}", result.still_active.join(", "));
            for failure in &result.failures {
                println!(
                    "Failed:          {} ({:?}): {}",
                    failure.condition_id, failure.kind, failure.reason
                );
            }
        }
    }

    Ok(())
}

async fn run_retry(
    config: Config,
    memory: bool,
    organization_id: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let store = build_store(&config, memory).await?;
    let service = build_service(&config, store)?;

    let result = service
        .send_alerts_for_matching_conditions(organization_id)
        .await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => {
            println!("Redelivered: {}", result.redelivered.join(", "));
            for failure in &result.failures {
                println!("Failed:      {}: {}", failure.condition_id, failure.reason);
            }
        }
    }

    Ok(())
}

async fn run_db(config: Config, command: DbCommands) -> anyhow::Result<()> {
    match command {
        DbCommands::Migrate => {
            let store = PostgresAlertStore::connect(&config.database)
                .await
                .context("connecting to database")?;
            store.migrate().await?;
            println!("Migrations applied");
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
