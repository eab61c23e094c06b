//! HPoint relay
//!
//! Moves value between the coin chain and the point chain by reconciling
//! each contract's pending request list against the other ledger:
//! 1. Read the origin contract's pending list
//! 2. Pay the batch out on the destination (mint points / emit coin)
//! 3. Write the destination tx hash back so the origin clears the batch
//!
//! Both directions run on the same period, half a period apart. A direction
//! that cannot prove where a batch ended up halts until an operator resumes
//! it through the API.

use std::sync::Arc;

use relay::api;
use relay::config::{Config, LogFormat};
use relay::ledger::coin::CoinLedger;
use relay::ledger::point::PointLedger;
use relay::ledger::RequestFeed;
use relay::listener::run_fast_path;
use relay::metrics;
use relay::types::Direction;
use relay::Relay;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    let config = Config::load()?;
    init_logging(config.log_format);

    info!("Starting HPoint relay");
    info!(
        coin_chain_id = config.coin.chain_id,
        point_chain_id = config.point.chain_id,
        coin_bridge = %config.coin.bridge_address,
        point_bridge = %config.point.bridge_address,
        point_token = %config.point.token_address,
        polling_interval_ms = config.relay.polling_interval_ms,
        max_batch_size = config.relay.max_batch_size,
        fast_path = config.relay.fast_path_enabled,
        "Configuration loaded"
    );

    let timeouts = config.relay.timeouts();
    let coin = Arc::new(CoinLedger::new(&config.coin, timeouts)?);
    let point = Arc::new(PointLedger::new(&config.point, timeouts)?);
    coin.verify_chain_id().await?;
    point.verify_chain_id().await?;
    info!("Both ledgers reachable, chain ids verified");

    let relay = Relay::new(coin.clone(), point.clone(), &config.relay);
    let guards = relay.guards();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    if config.relay.fast_path_enabled {
        let feeds: [(Direction, Arc<dyn RequestFeed>); 2] = [
            (Direction::CoinToPoint, coin.clone()),
            (Direction::PointToCoin, point.clone()),
        ];
        for (direction, feed) in feeds {
            let cycle = relay.cycle(direction).clone();
            let guard = guards.get(direction).clone();
            let poll_interval = config.relay.event_poll_interval();
            let shutdown = shutdown_rx.clone();
            tasks.spawn(async move {
                run_fast_path(feed, &cycle, guard, poll_interval, shutdown).await
            });
        }
    }

    let api_config = config.api.clone();
    let api_guards = guards.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(&api_config, api_guards).await {
            error!(error = %e, "API server error");
        }
    });

    tasks.spawn(relay.run(shutdown_rx));
    metrics::UP.set(1.0);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Relay task failed");
        }
    }

    metrics::UP.set(0.0);
    info!("HPoint relay stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hpoint_relay=debug,relay=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
