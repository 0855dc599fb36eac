//! Bridge Relayer
//!
//! Watches `BridgeRequested` events on the source chain and releases the
//! matching funds on the destination chain.

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use bridge_relayer::api;
use bridge_relayer::checkpoint::{
    relay_key, CheckpointStore, MemoryCheckpointStore, PgCheckpointStore,
};
use bridge_relayer::config::Config;
use bridge_relayer::decoder::{bridge_requested_topic, EventDecoder};
use bridge_relayer::deployment::{
    BroadcastResolver, Deployment, DeploymentResolver, StaticResolver,
};
use bridge_relayer::destination::EvmDestination;
use bridge_relayer::executor::RelayExecutor;
use bridge_relayer::metrics;
use bridge_relayer::relay::{start_checkpoint, RelayCore, RelayLoop, RelayStatus};
use bridge_relayer::source;
use bridge_relayer::watcher::LogWatcher;

fn main() -> Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_logging();

    info!("Starting Bridge Relayer");

    let config = Config::load()?;
    info!(
        source_chain = config.source.chain_id,
        dest_chain = config.destination.chain_id,
        source_rpcs = config.source.all_rpc_urls().len(),
        durable_checkpoint = config.database.is_some(),
        "Configuration loaded"
    );

    // Deployment lookup is fatal on failure
    let broadcast = BroadcastResolver::new(
        &config.deployment.broadcast_dir,
        &config.deployment.deploy_script,
    );
    let source_deployment = resolve(
        config.source.bridge_address.as_deref(),
        &broadcast,
        config.source.chain_id,
    )?;
    let dest_deployment = resolve(
        config.destination.bridge_address.as_deref(),
        &broadcast,
        config.destination.chain_id,
    )?;
    info!(
        source_bridge = %source_deployment.address,
        dest_bridge = %dest_deployment.address,
        "Bridge contracts resolved"
    );

    let token_map = Arc::new(config.token_map()?);
    info!(entries = token_map.len(), "Token map loaded");

    let source = Arc::new(source::connect(
        config.source.chain_id,
        &config.source.all_rpc_urls(),
    )?);
    let destination = Arc::new(EvmDestination::new(
        config.destination.chain_id,
        &config.destination.rpc_url,
        dest_deployment.address,
        &config.destination.private_key,
        config.confirmation_timeout(),
    )?);

    let store: Arc<dyn CheckpointStore> = match &config.database {
        Some(db) => Arc::new(PgCheckpointStore::connect(&db.url).await?),
        None => {
            warn!("DATABASE_URL not set; checkpoint is kept in memory and restarts replay from the start block");
            Arc::new(MemoryCheckpointStore::new())
        }
    };

    let watcher = LogWatcher::new(
        source,
        source_deployment.address,
        vec![bridge_requested_topic()],
        config.watcher_config(),
    );
    let key = relay_key(config.source.chain_id, &source_deployment.address);
    let default_checkpoint = start_checkpoint(
        store.as_ref(),
        &key,
        config.relay.start_block,
        source_deployment.deploy_block,
        &watcher,
        &config.retry_config(),
    )
    .await
    .wrap_err("Failed to determine start block")?;

    let status = Arc::new(RwLock::new(RelayStatus::new(
        &key,
        config.source.chain_id,
        config.destination.chain_id,
    )));

    let core = RelayCore::init(
        key,
        watcher,
        EventDecoder::new(config.source.chain_id, config.destination.chain_id, token_map),
        RelayExecutor::new(destination, config.retry_config(), config.revert_classifier()),
        store,
        default_checkpoint,
        status.clone(),
    )
    .await
    .wrap_err("Failed to load checkpoint")?;

    let relay = RelayLoop::new(core, config.poll_interval(), config.shutdown_grace());

    // Start API server
    let bind_address = config.api.bind_address.clone();
    let port = config.api.port;
    let api_status = status.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_server(&bind_address, port, api_status).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    metrics::UP.set(1.0);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    // Handle signals
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    relay.run(shutdown_rx).await?;

    info!("Bridge Relayer stopped");
    Ok(())
}

/// Configured address wins; otherwise read the broadcast artifact
fn resolve(
    configured: Option<&str>,
    broadcast: &BroadcastResolver,
    chain_id: u64,
) -> Result<Deployment> {
    let resolver: Box<dyn DeploymentResolver> = match configured {
        Some(address) => {
            let address = Address::from_str(address)
                .map_err(|e| eyre!("Invalid bridge address for chain {}: {}", chain_id, e))?;
            Box::new(StaticResolver::new().with(chain_id, address))
        }
        None => Box::new(broadcast.clone()),
    };
    resolver
        .resolve(chain_id)
        .wrap_err_with(|| format!("Unable to resolve bridge deployment for chain {}", chain_id))
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
