use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use cast_responderd::config::Config;
use cast_responderd::connector::{Connector, ConnectorParts};
use cast_responderd::controller::Controller;
use cast_responderd::discovery::process::ProcessDiscoveryService;
use cast_responderd::dispatcher::{EventDispatcher, LoggingObserver};
use cast_responderd::identity::IdentityResolver;
use cast_responderd::platform::device::SystemDeviceInfo;
use cast_responderd::platform::network::{run_monitor, NetworkManager, SystemNetwork};
use cast_responderd::platform::power::{run_power_bridge, LocalPowerManager, PowerRequestHandler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cast_responderd=info"))
        )
        .init();

    tracing::info!("Starting cast-responderd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/cast-responder/responderd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Inbound cast events
    let dispatcher = EventDispatcher::spawn(config.discovery.event_queue_capacity);
    dispatcher.register(Arc::new(LoggingObserver));

    let power = Arc::new(LocalPowerManager::new(
        config.power.initial_state,
        config.power.network_standby,
    ));
    dispatcher.register(Arc::new(PowerRequestHandler::new(power.clone())));

    let network: Arc<dyn NetworkManager> = Arc::new(SystemNetwork::new());
    let connector = Connector::new(
        ConnectorParts {
            network: network.clone(),
            device: Arc::new(SystemDeviceInfo::new(config.identity.serial_number_files.clone())),
            identity: Arc::new(IdentityResolver::new(&config.identity)),
            service: Box::new(ProcessDiscoveryService::new(
                config.discovery.program.clone(),
                dispatcher.clone(),
            )),
            properties_file: config.device.properties_file.clone(),
        },
        config.features.clone(),
        config.network.clone(),
        &config.retry,
    );

    let (digest_tx, mut digest_rx) = watch::channel(String::new());
    let controller = Controller::new(&config, connector, power.clone(), digest_tx);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let (handle, controller_task) = controller.spawn(cancel.clone());

    let monitor_cancel = cancel.clone();
    let monitor_handle = handle.clone();
    let poll_interval = Duration::from_secs(config.network.poll_interval_secs.max(1));
    let monitor_task = tokio::spawn(async move {
        if let Err(e) = run_monitor(network, monitor_handle, poll_interval, monitor_cancel).await {
            tracing::error!("Network monitor error: {}", e);
        }
    });

    let bridge_cancel = cancel.clone();
    let bridge_handle = handle.clone();
    let bridge_power = power.clone();
    let bridge_task = tokio::spawn(async move {
        if let Err(e) = run_power_bridge(bridge_power, bridge_handle, bridge_cancel).await {
            tracing::error!("Power bridge error: {}", e);
        }
    });

    let digest_cancel = cancel.clone();
    let digest_task = tokio::spawn(async move {
        tracing::info!("Initial registry digest: {}", *digest_rx.borrow_and_update());
        loop {
            tokio::select! {
                changed = digest_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    tracing::info!("Registry digest now {}", *digest_rx.borrow_and_update());
                }
                _ = digest_cancel.cancelled() => break,
            }
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    match handle.status().await {
        Ok(status) => match serde_json::to_string(&status) {
            Ok(json) => tracing::info!("Final status: {}", json),
            Err(e) => tracing::warn!("Failed to encode status: {}", e),
        },
        Err(e) => tracing::warn!("Failed to read status: {}", e),
    }

    cancel.cancel();

    let _ = tokio::join!(controller_task, monitor_task, bridge_task, digest_task);

    tracing::info!("Shutdown complete");
    Ok(())
}
