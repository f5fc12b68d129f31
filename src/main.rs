use anyhow::{bail, Context, Result};
use clap::Parser;
use spot_executor::adapters::{start_api_server, BinanceRestClient};
use spot_executor::cli::{Cli, Commands};
use spot_executor::config::{AppConfig, LoggingConfig};
use spot_executor::persistence::Stores;
use spot_executor::strategy::Executor;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("failed to load config from {}", cli.config_dir))?;
    init_logging(&config.logging);
    if let Some(profile) = config.strategy.profile.as_deref() {
        info!(profile, "strategy profile active");
    }

    if let Err(problems) = config.validate() {
        for problem in &problems {
            error!(problem = %problem, "invalid configuration");
        }
        bail!("configuration has {} problem(s)", problems.len());
    }

    match cli.command {
        None => run_server(config).await,
        Some(Commands::Serve { port }) => {
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        Some(Commands::State(cmd)) => {
            let stores = Stores::connect(&config.store).await?;
            cmd.run(&stores).await
        }
        Some(Commands::Idempotency(cmd)) => {
            let stores = Stores::connect(&config.store).await?;
            cmd.run(&stores, config.store.idempotency_ttl_ms).await
        }
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    if config.auth.secret.trim().is_empty() {
        warn!("auth.secret is empty; every /execute request will be rejected");
    }
    if config.venues.allow_mainnet && config.venues.allow_live {
        warn!("mainnet live trading is enabled");
    }

    let stores = Stores::connect(&config.store).await?;
    let gateway = BinanceRestClient::new(config.exchange.clone(), config.strategy.qty_decimals)?;
    let config = Arc::new(config);
    let executor = Arc::new(Executor::new(config.clone(), stores, Arc::new(gateway)));

    info!(
        port = config.server.port,
        backend = ?config.store.backend,
        allowlist = ?config.strategy.symbol_allowlist,
        allow_mainnet = config.venues.allow_mainnet,
        allow_live = config.venues.allow_live,
        "starting spot executor"
    );

    let cleanup = (config.store.cleanup_interval_ms > 0).then(|| {
        executor.spawn_cleanup_task(Duration::from_millis(config.store.cleanup_interval_ms))
    });

    let served = start_api_server(executor, config, shutdown_signal()).await;
    if let Some(task) = cleanup {
        task.abort();
    }
    served?;
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},spot_executor={},sqlx=warn",
            logging.level, logging.level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
