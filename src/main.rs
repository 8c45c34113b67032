use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use downwind::approach::ApproachStateStore;
use downwind::config::AppConfig;
use downwind::dispatcher::{Dispatcher, ReqwestTransport};
use downwind::model::IntegrationKind;
use downwind::persistence::{JsonFilePersistence, NoPersistence, StatePersistence};
use downwind::position_source::AdsbLolClient;
use downwind::registry::ConfigRegistry;
use downwind::scheduler::{Scheduler, SchedulerConfig};

#[derive(Parser)]
#[command(name = "downwind", about = "Landing-approach alert service", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "downwind.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the tracking scheduler until interrupted
    Run,
    /// Send a test notification to a webhook URL and exit
    CheckWebhook {
        /// Integration kind: discord, slack or teams
        #[arg(long)]
        kind: IntegrationKind,
        /// Webhook URL to post to
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::CheckWebhook { kind, url } => check_webhook(config, kind, &url).await,
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let targets = config
        .tracking_targets()
        .context("invalid tenant configuration")?;
    info!(
        tenants = targets.len(),
        aircraft = targets.iter().map(|t| t.aircraft.len()).sum::<usize>(),
        "loaded tracking configuration"
    );

    let http = reqwest::Client::new();
    let source = Arc::new(AdsbLolClient::new(
        http.clone(),
        config.position_source_url.clone(),
        config.position_query_timeout(),
    ));
    let transport = Arc::new(ReqwestTransport::new(http, config.delivery_timeout()));

    let persistence: Arc<dyn StatePersistence> = match &config.state_file {
        Some(state_file) => {
            let log_path = config
                .notification_log
                .clone()
                .unwrap_or_else(|| state_file.with_file_name("notifications.jsonl"));
            info!(
                state_file = %state_file.display(),
                "approach state will survive restarts"
            );
            Arc::new(JsonFilePersistence::new(state_file.clone(), log_path))
        }
        None => {
            info!("no state file configured; approach state is in-memory only");
            Arc::new(NoPersistence)
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(transport, Arc::clone(&persistence)));
    let registry = Arc::new(ConfigRegistry::new(targets));

    let scheduler_config = SchedulerConfig {
        poll_interval: config.poll_interval(),
        registry_refresh: config.registry_refresh(),
        query_timeout: config.position_query_timeout(),
        idle_eviction: config.idle_eviction(),
        detector: config.detector_config(),
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(
        registry,
        source,
        dispatcher,
        persistence,
        ApproachStateStore::new(),
        scheduler_config,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received shutdown signal, finishing current tick...");
                signal_token.cancel();
            }
            Err(e) => error!("unable to listen for shutdown signal: {}", e),
        }
    });

    scheduler.run(shutdown).await?;
    info!("scheduler stopped");
    Ok(())
}

async fn check_webhook(config: AppConfig, kind: IntegrationKind, url: &str) -> Result<()> {
    let transport = Arc::new(ReqwestTransport::new(
        reqwest::Client::new(),
        config.delivery_timeout(),
    ));
    let dispatcher = Dispatcher::new(transport, Arc::new(NoPersistence));

    match dispatcher.send_test_message(kind, url).await {
        Ok(()) => {
            info!("test notification delivered via {}", kind);
            Ok(())
        }
        Err(e) => {
            error!("test notification failed: {}", e);
            anyhow::bail!("webhook check failed: {}", e)
        }
    }
}
