use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use serde::Serialize;
use tokio::time::Instant;
use shared::protocol::{ControlRequest, DEFAULT_PROTOCOL_VERSION, INTERFACE_ETHERNET, INTERFACE_WIFI, IP_VERSION_V4};
use crate::config::{FeatureConfig, NetworkConfig, RetryConfig};
use crate::discovery::{DiscoveryService, LaunchArgs};
use crate::enablement::ActivationContext;
use crate::identity::IdentityResolver;
use crate::platform::device::{DeviceInfo, DeviceProperties};
use crate::platform::network::{IpSettings, NetworkManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPhase {
    Idle,
    WaitingFirst,
    WaitingSecond,
    Connected,
}

/// Connect-retry schedule: one attempt after the first interval, then one
/// every second interval until a connect succeeds.
#[derive(Debug)]
pub struct RetryTimer {
    phase: RetryPhase,
    deadline: Option<Instant>,
    first: Duration,
    second: Duration,
}

impl RetryTimer {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            phase: RetryPhase::Idle,
            deadline: None,
            first: Duration::from_millis(config.first_interval_ms),
            second: Duration::from_millis(config.second_interval_ms),
        }
    }

    /// (Re)arm at the first interval.
    pub fn start(&mut self) {
        self.phase = RetryPhase::WaitingFirst;
        self.deadline = Some(Instant::now() + self.first);
    }

    /// Last attempt failed; rearm at the second interval.
    pub fn retry(&mut self) {
        self.phase = RetryPhase::WaitingSecond;
        self.deadline = Some(Instant::now() + self.second);
    }

    pub fn connected(&mut self) {
        self.phase = RetryPhase::Connected;
        self.deadline = None;
    }

    pub fn stop(&mut self) {
        self.phase = RetryPhase::Idle;
        self.deadline = None;
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn phase(&self) -> RetryPhase {
        self.phase
    }
}

/// Collaborators the connector needs to launch the discovery service.
pub struct ConnectorParts {
    pub network: Arc<dyn NetworkManager>,
    pub device: Arc<dyn DeviceInfo>,
    pub identity: Arc<IdentityResolver>,
    pub service: Box<dyn DiscoveryService>,
    pub properties_file: PathBuf,
}

/// Sole owner of the discovery-service handle. Every push to the service
/// goes through here.
pub struct Connector {
    network: Arc<dyn NetworkManager>,
    device: Arc<dyn DeviceInfo>,
    identity: Arc<IdentityResolver>,
    service: Box<dyn DiscoveryService>,
    properties_file: PathBuf,
    features: FeatureConfig,
    interfaces: NetworkConfig,
    pub timer: RetryTimer,
}

impl Connector {
    pub fn new(parts: ConnectorParts, features: FeatureConfig, interfaces: NetworkConfig, retry: &RetryConfig) -> Self {
        Self {
            network: parts.network,
            device: parts.device,
            identity: parts.identity,
            service: parts.service,
            properties_file: parts.properties_file,
            features,
            interfaces,
            timer: RetryTimer::new(retry),
        }
    }

    /// Logical name (ETHERNET / WIFI) of a physical interface, or "" when
    /// the interface is neither.
    pub fn interface_type(&self, interface: &str) -> &'static str {
        if interface == self.interfaces.ethernet_interface {
            INTERFACE_ETHERNET
        } else if interface == self.interfaces.wifi_interface {
            INTERFACE_WIFI
        } else {
            ""
        }
    }

    /// Find a usable interface and launch the discovery service on it.
    /// Expected failures (no interface, no valid IPv4 setup, launch failure)
    /// return false and leave everything untouched.
    pub async fn try_connect(&mut self, ctx: &mut ActivationContext) -> bool {
        if !self.features.enable {
            tracing::info!("Casting disabled by device configuration, not starting discovery service");
            return true;
        }

        let lookup = gather_launch_environment(
            self.network.clone(),
            self.device.clone(),
            self.identity.clone(),
            self.properties_file.clone(),
        );
        let Some(env) = lookup.await else {
            return false;
        };

        let args = self.launch_args(ctx, &env);
        if !self.service.is_running() {
            if let Err(e) = self.service.start(&args) {
                tracing::error!("Failed to start discovery service: {:#}", e);
                return false;
            }
        }

        ctx.active_interface = self.interface_type(&env.interface).to_string();
        tracing::info!(
            "Discovery service running on {} ({}/{}), logical interface [{}]",
            env.interface,
            env.settings.address,
            env.settings.prefix,
            ctx.active_interface
        );
        true
    }

    fn launch_args(&self, ctx: &mut ActivationContext, env: &LaunchEnvironment) -> LaunchArgs {
        if ctx.model_name.is_empty() {
            ctx.model_name = env.properties.get("MODEL_NUM").unwrap_or_default().to_string();
        }
        if ctx.manufacturer_name.is_empty() {
            ctx.manufacturer_name = env.properties.get("MFG_NAME").unwrap_or_default().to_string();
        }

        LaunchArgs {
            interface: env.interface.clone(),
            uuid: env.uuid.clone(),
            model: ctx.model_name.clone(),
            manufacturer: ctx.manufacturer_name.clone(),
            friendly_name: default_friendly_name(&ctx.model_name, &ctx.manufacturer_name),
            app_list: self.features.app_list.clone(),
            feature_friendly_name: self.features.friendly_name,
            feature_wol_wake: self.features.wol_wake && ctx.network_standby_mode,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.service.is_running()
    }

    /// Connected by schedule, but the service instance has gone away.
    pub fn service_lost(&self) -> bool {
        self.features.enable && self.timer.phase() == RetryPhase::Connected && !self.service.is_running()
    }

    pub fn send(&mut self, request: ControlRequest) -> Result<()> {
        self.service.send(request)
    }

    pub fn teardown(&mut self) {
        self.service.stop();
    }

    pub fn protocol_version(&self) -> String {
        self.service
            .protocol_version()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string())
    }
}

/// What the blocking lookups found for one connect attempt.
struct LaunchEnvironment {
    interface: String,
    settings: IpSettings,
    properties: DeviceProperties,
    uuid: String,
}

/// Network lookups shell out and identity lookups read files, so they run
/// on the blocking pool.
async fn gather_launch_environment(
    network: Arc<dyn NetworkManager>,
    device: Arc<dyn DeviceInfo>,
    identity: Arc<IdentityResolver>,
    properties_file: PathBuf,
) -> Option<LaunchEnvironment> {
    let lookup = tokio::task::spawn_blocking(move || {
        let (interface, settings) = usable_interface(network.as_ref())?;
        Some(LaunchEnvironment {
            interface,
            settings,
            properties: DeviceProperties::load(&properties_file),
            uuid: identity.resolve(device.as_ref()),
        })
    });

    match lookup.await {
        Ok(env) => env,
        Err(e) => {
            tracing::error!("Launch environment lookup failed: {}", e);
            None
        }
    }
}

fn usable_interface(network: &dyn NetworkManager) -> Option<(String, IpSettings)> {
    let interface = match network.primary_interface() {
        Ok(i) if !i.is_empty() => i,
        Ok(_) => {
            tracing::info!("No primary network interface");
            return None;
        }
        Err(e) => {
            tracing::info!("Primary network interface unavailable: {:#}", e);
            return None;
        }
    };

    let settings = match network.ip_settings(&interface, IP_VERSION_V4) {
        Ok(s) => s,
        Err(e) => {
            tracing::info!("No IPv4 settings for {}: {:#}", interface, e);
            return None;
        }
    };

    if settings.address.is_empty() {
        tracing::info!("{} has no IPv4 address", interface);
        return None;
    }
    if settings.ip_version != IP_VERSION_V4 {
        tracing::info!("{} reported {} settings, need IPv4", interface, settings.ip_version);
        return None;
    }
    if !(1..=32).contains(&settings.prefix) {
        tracing::info!("{} has invalid IPv4 prefix {}", interface, settings.prefix);
        return None;
    }

    Some((interface, settings))
}

fn default_friendly_name(model: &str, manufacturer: &str) -> String {
    if model.is_empty() && manufacturer.is_empty() {
        return hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    format!("{}_{}", model, manufacturer)
}
