use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use shared::protocol::{ControlRequest, IP_VERSION_V4};
use shared::types::{AppEntry, AppErrorCode, AppState, PowerState, StandbyBehavior};
use crate::config::Config;
use crate::connector::{Connector, RetryPhase};
use crate::enablement::{ActivationContext, EnablementEngine, ReconcileAction};
use crate::error::{CastError, Result};
use crate::platform::power::PowerManager;
use crate::registry::AppRegistry;

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Commands processed by the controller task, one at a time
pub enum Command {
    SetEnabled(bool, oneshot::Sender<Result<()>>),
    GetEnabled(oneshot::Sender<bool>),
    SetStandbyBehavior(StandbyBehavior, oneshot::Sender<Result<()>>),
    GetStandbyBehavior(oneshot::Sender<StandbyBehavior>),
    SetFriendlyName(String, oneshot::Sender<Result<()>>),
    GetFriendlyName(oneshot::Sender<String>),
    SetManufacturerName(String, oneshot::Sender<Result<()>>),
    GetManufacturerName(oneshot::Sender<String>),
    SetModelName(String, oneshot::Sender<Result<()>>),
    GetModelName(oneshot::Sender<String>),
    RegisterApplications(Vec<AppEntry>, oneshot::Sender<Result<()>>),
    UnregisterApplications(Vec<String>, oneshot::Sender<Result<()>>),
    GetApplications(oneshot::Sender<Vec<AppEntry>>),
    SetApplicationState {
        name: String,
        state: AppState,
        id: String,
        error: AppErrorCode,
        reply: oneshot::Sender<Result<()>>,
    },
    GetProtocolVersion(oneshot::Sender<String>),
    Status(oneshot::Sender<ControllerStatus>),
    PowerModeChanged {
        previous: PowerState,
        current: PowerState,
    },
    NetworkStandbyModeChanged(bool),
    ActiveInterfaceChanged {
        previous: String,
        current: String,
    },
    IpAddressChanged {
        interface: String,
        ip_version: String,
        address: String,
        acquired: bool,
    },
    Shutdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub enabled: bool,
    pub standby_behavior: StandbyBehavior,
    pub power_state: PowerState,
    pub network_standby_mode: bool,
    pub should_be_active: bool,
    pub applied_activation: Option<bool>,
    pub retry_phase: RetryPhase,
    pub connected: bool,
    pub connected_since: Option<DateTime<Utc>>,
    pub active_interface: String,
    pub applications: usize,
    pub registry_digest: String,
}

/// Cloneable entry point into the controller task. Setters return once
/// their reconciliation has been applied.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

impl ControllerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| CastError::ControllerGone)?;
        rx.await.map_err(|_| CastError::ControllerGone)
    }

    async fn notify(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| CastError::ControllerGone)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetEnabled(enabled, reply)).await?
    }

    pub async fn enabled(&self) -> Result<bool> {
        self.request(Command::GetEnabled).await
    }

    pub async fn set_standby_behavior(&self, behavior: StandbyBehavior) -> Result<()> {
        self.request(|reply| Command::SetStandbyBehavior(behavior, reply)).await?
    }

    pub async fn standby_behavior(&self) -> Result<StandbyBehavior> {
        self.request(Command::GetStandbyBehavior).await
    }

    pub async fn set_friendly_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.request(|reply| Command::SetFriendlyName(name, reply)).await?
    }

    pub async fn friendly_name(&self) -> Result<String> {
        self.request(Command::GetFriendlyName).await
    }

    pub async fn set_manufacturer_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.request(|reply| Command::SetManufacturerName(name, reply)).await?
    }

    pub async fn manufacturer_name(&self) -> Result<String> {
        self.request(Command::GetManufacturerName).await
    }

    pub async fn set_model_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.request(|reply| Command::SetModelName(name, reply)).await?
    }

    pub async fn model_name(&self) -> Result<String> {
        self.request(Command::GetModelName).await
    }

    pub async fn register_applications(&self, entries: Vec<AppEntry>) -> Result<()> {
        self.request(|reply| Command::RegisterApplications(entries, reply)).await?
    }

    /// Fails with `NotFound` only when none of `names` is registered.
    pub async fn unregister_applications(&self, names: Vec<String>) -> Result<()> {
        self.request(|reply| Command::UnregisterApplications(names, reply)).await?
    }

    pub async fn applications(&self) -> Result<Vec<AppEntry>> {
        self.request(Command::GetApplications).await
    }

    /// Report an application's lifecycle state to remote clients.
    /// `state` is running/stopped/suspended, `error` one of
    /// none/forbidden/unavailable/invalid/internal.
    pub async fn set_application_state(&self, name: &str, state: &str, id: &str, error: &str) -> Result<()> {
        if name.is_empty() {
            return Err(CastError::InvalidInput("application name is empty".to_string()));
        }
        let state: AppState = state.parse()?;
        let error: AppErrorCode = error.parse()?;
        let (name, id) = (name.to_string(), id.to_string());
        self.request(|reply| Command::SetApplicationState { name, state, id, error, reply })
            .await?
    }

    pub async fn protocol_version(&self) -> Result<String> {
        self.request(Command::GetProtocolVersion).await
    }

    pub async fn status(&self) -> Result<ControllerStatus> {
        self.request(Command::Status).await
    }

    pub async fn power_mode_changed(&self, previous: PowerState, current: PowerState) -> Result<()> {
        self.notify(Command::PowerModeChanged { previous, current }).await
    }

    pub async fn network_standby_mode_changed(&self, enabled: bool) -> Result<()> {
        self.notify(Command::NetworkStandbyModeChanged(enabled)).await
    }

    pub async fn active_interface_changed(&self, previous: String, current: String) -> Result<()> {
        self.notify(Command::ActiveInterfaceChanged { previous, current }).await
    }

    pub async fn ip_address_changed(
        &self,
        interface: String,
        ip_version: String,
        address: String,
        acquired: bool,
    ) -> Result<()> {
        self.notify(Command::IpAddressChanged { interface, ip_version, address, acquired })
            .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.notify(Command::Shutdown).await
    }
}

/// Owns the activation context, the application registry and the
/// connector. Every mutation happens on the controller task.
pub struct Controller {
    ctx: ActivationContext,
    engine: EnablementEngine,
    registry: AppRegistry,
    /// Registry was changed at runtime and must be pushed to every new
    /// service instance
    dynamic_registrations: bool,
    connector: Connector,
    power: Arc<dyn PowerManager>,
    restart_pause: Duration,
    digest_tx: watch::Sender<String>,
    connected_since: Option<DateTime<Utc>>,
}

impl Controller {
    pub fn new(
        config: &Config,
        connector: Connector,
        power: Arc<dyn PowerManager>,
        digest_tx: watch::Sender<String>,
    ) -> Self {
        let registry = AppRegistry::new();
        digest_tx.send_replace(registry.digest());
        Self {
            ctx: ActivationContext::from_config(config),
            engine: EnablementEngine::new(),
            registry,
            dynamic_registrations: false,
            connector,
            power,
            restart_pause: Duration::from_millis(config.retry.restart_pause_ms),
            digest_tx,
            connected_since: None,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> (ControllerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let task = tokio::spawn(self.run(rx, cancel));
        (ControllerHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        self.refresh_power_states();
        self.initialize().await;

        loop {
            let deadline = self.connector.timer.deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd).await,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_retry_timer().await;
                }
            }
        }

        tracing::info!("Controller shutting down");
        self.connector.timer.stop();
        self.connector.teardown();
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::SetEnabled(enabled, reply) => {
                tracing::info!("Responder {}", if enabled { "enabled" } else { "disabled" });
                self.ctx.enabled = enabled;
                if enabled {
                    self.refresh_power_states();
                }
                self.reconcile();
                let _ = reply.send(Ok(()));
            }
            Command::GetEnabled(reply) => {
                let _ = reply.send(self.ctx.enabled);
            }
            Command::SetStandbyBehavior(behavior, reply) => {
                self.ctx.standby_behavior = behavior;
                self.reconcile();
                let _ = reply.send(Ok(()));
            }
            Command::GetStandbyBehavior(reply) => {
                let _ = reply.send(self.ctx.standby_behavior);
            }
            Command::SetFriendlyName(name, reply) => {
                let result = if name.is_empty() {
                    Err(CastError::InvalidInput("friendly name is empty".to_string()))
                } else {
                    self.ctx.friendly_name = name;
                    self.reconcile();
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::GetFriendlyName(reply) => {
                let _ = reply.send(self.ctx.friendly_name.clone());
            }
            Command::SetManufacturerName(name, reply) => {
                self.ctx.manufacturer_name = name.clone();
                self.push(ControlRequest::SetManufacturerName { name });
                let _ = reply.send(Ok(()));
            }
            Command::GetManufacturerName(reply) => {
                let _ = reply.send(self.ctx.manufacturer_name.clone());
            }
            Command::SetModelName(name, reply) => {
                self.ctx.model_name = name.clone();
                self.push(ControlRequest::SetModelName { name });
                let _ = reply.send(Ok(()));
            }
            Command::GetModelName(reply) => {
                let _ = reply.send(self.ctx.model_name.clone());
            }
            Command::RegisterApplications(entries, reply) => {
                let result = self.register_applications(entries);
                let _ = reply.send(result);
            }
            Command::UnregisterApplications(names, reply) => {
                let result = self.unregister_applications(&names);
                let _ = reply.send(result);
            }
            Command::GetApplications(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::SetApplicationState { name, state, id, error, reply } => {
                let result = self.set_application_state(name, state, id, error);
                let _ = reply.send(result);
            }
            Command::GetProtocolVersion(reply) => {
                let _ = reply.send(self.connector.protocol_version());
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::PowerModeChanged { previous, current } => {
                self.on_power_mode_changed(previous, current).await;
            }
            Command::NetworkStandbyModeChanged(enabled) => {
                tracing::info!("Network standby mode changed to {}", enabled);
                self.ctx.network_standby_mode = enabled;
                self.reconcile();
            }
            Command::ActiveInterfaceChanged { previous, current } => {
                tracing::info!("Active interface changed: [{}] -> [{}]", previous, current);
                self.on_connectivity_changed(&current, true, "");
            }
            Command::IpAddressChanged { interface, ip_version, address, acquired } => {
                if ip_version == IP_VERSION_V4 && acquired {
                    let connected = !address.is_empty();
                    self.on_connectivity_changed(&interface, connected, &address);
                }
            }
            Command::Shutdown => {}
        }
    }

    async fn initialize(&mut self) {
        if self.connector.try_connect(&mut self.ctx).await {
            self.on_connected();
        } else {
            tracing::info!("Discovery service not available yet, starting retry timer");
            self.connector.timer.start();
        }
    }

    async fn on_retry_timer(&mut self) {
        if self.connector.try_connect(&mut self.ctx).await {
            tracing::info!("Connect attempt succeeded");
            self.on_connected();
        } else {
            self.connector.timer.retry();
            tracing::info!("Connect attempt failed, phase {:?}", self.connector.timer.phase());
        }
    }

    fn on_connected(&mut self) {
        self.connector.timer.connected();
        self.engine.forget_applied();
        if !self.connector.is_connected() {
            return;
        }

        self.connected_since = Some(Utc::now());
        // the launch arguments already carried the standby mode
        self.engine
            .mark_applied(&ReconcileAction::SetNetworkStandbyMode(self.ctx.network_standby_mode));
        if self.dynamic_registrations {
            self.push_registry();
        }
        self.reconcile();
    }

    fn teardown(&mut self) {
        self.connector.teardown();
        self.engine.forget_applied();
        self.connected_since = None;
    }

    async fn on_power_mode_changed(&mut self, previous: PowerState, current: PowerState) {
        tracing::info!("Power state changed: {} -> {}", previous, current);
        self.ctx.power_state = current;

        if self.engine.observe_power_state(previous, current) {
            tracing::info!("Back from deep sleep, restarting discovery service");
            self.connector.timer.stop();
            self.teardown();
            tokio::time::sleep(self.restart_pause).await;
            self.initialize().await;
        }

        self.reconcile();
    }

    fn on_connectivity_changed(&mut self, interface: &str, connected: bool, address: &str) {
        let logical = self.connector.interface_type(interface);
        if !connected || logical.is_empty() {
            tracing::warn!("Connectivity on [{}] is not usable for casting", interface);
            return;
        }
        if self.connector.timer.is_active() {
            return;
        }
        if logical == self.ctx.active_interface && address.is_empty() {
            tracing::debug!("Interface [{}] unchanged, no reconnect needed", logical);
            return;
        }

        tracing::info!("Network changed to [{}] {}, reconnecting discovery service", logical, address);
        self.teardown();
        self.connector.timer.start();
    }

    fn refresh_power_states(&mut self) {
        match self.power.power_state() {
            Ok((current, _)) => self.ctx.power_state = current,
            Err(e) => tracing::error!("Failed to read power state: {:#}", e),
        }
        match self.power.network_standby_mode() {
            Ok(enabled) => self.ctx.network_standby_mode = enabled,
            Err(e) => tracing::error!("Failed to read network standby mode: {:#}", e),
        }
    }

    /// Push whatever differs between the decision and the service's state.
    fn reconcile(&mut self) {
        if self.connector.service_lost() {
            tracing::warn!("Discovery service exited unexpectedly, reconnecting");
            self.teardown();
            self.connector.timer.start();
            return;
        }
        if !self.connector.is_connected() {
            tracing::debug!(
                "Discovery service not connected, decision active={} deferred",
                self.ctx.should_be_active()
            );
            return;
        }

        for action in self.engine.plan(&self.ctx) {
            self.apply(action);
        }
    }

    fn apply(&mut self, action: ReconcileAction) {
        let request = match &action {
            ReconcileAction::SetActivation { active, friendly_name } => {
                tracing::info!("Setting responder active={} name={}", active, friendly_name);
                ControlRequest::SetActivation {
                    active: *active,
                    friendly_name: friendly_name.clone(),
                }
            }
            ReconcileAction::SetNetworkStandbyMode(enabled) => {
                tracing::info!("Propagating network standby mode {}", enabled);
                ControlRequest::SetNetworkStandbyMode { enabled: *enabled }
            }
        };
        if self.push(request) {
            self.engine.mark_applied(&action);
        }
    }

    /// Force the responder inactive around a registry mutation.
    fn deactivate(&mut self) {
        if !self.connector.is_connected() {
            return;
        }
        if let Some(action) = self.engine.activation_action(false, &self.ctx.friendly_name) {
            self.apply(action);
        }
    }

    fn push(&mut self, request: ControlRequest) -> bool {
        if !self.connector.is_connected() {
            return false;
        }
        match self.connector.send(request) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Discovery service request failed: {:#}", e);
                false
            }
        }
    }

    fn push_registry(&mut self) {
        let applications = self.registry.snapshot();
        tracing::info!("Pushing {} application(s) to discovery service", applications.len());
        self.push(ControlRequest::SetApplications { applications });
    }

    fn registry_changed(&mut self, label: &str) {
        self.dynamic_registrations = true;
        self.registry.dump(label);
        self.digest_tx.send_replace(self.registry.digest());
        self.push_registry();
    }

    fn register_applications(&mut self, entries: Vec<AppEntry>) -> Result<()> {
        if entries.iter().any(|e| e.name.is_empty()) {
            return Err(CastError::InvalidInput("application name is empty".to_string()));
        }

        self.deactivate();
        self.registry.replace_or_merge(entries);
        self.registry_changed("register");
        self.reconcile();
        Ok(())
    }

    fn unregister_applications(&mut self, names: &[String]) -> Result<()> {
        self.deactivate();
        let removed = self.registry.delete(names);
        self.registry_changed("unregister");
        self.reconcile();

        if removed == 0 {
            return Err(CastError::NotFound(format!("no registered application in {:?}", names)));
        }
        Ok(())
    }

    fn set_application_state(&mut self, name: String, state: AppState, id: String, error: AppErrorCode) -> Result<()> {
        if !self.connector.is_connected() {
            return Err(CastError::Unavailable("discovery service is not running".to_string()));
        }
        tracing::info!("Application {} ({}) is {}", name, id, state.wire_name());
        let request = ControlRequest::ApplicationStateChanged {
            application_name: name,
            state: state.wire_name().to_string(),
            application_id: id,
            error: error.wire_name().to_string(),
        };
        if self.push(request) {
            Ok(())
        } else {
            Err(CastError::Unavailable("application state could not be delivered".to_string()))
        }
    }

    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            enabled: self.ctx.enabled,
            standby_behavior: self.ctx.standby_behavior,
            power_state: self.ctx.power_state,
            network_standby_mode: self.ctx.network_standby_mode,
            should_be_active: self.ctx.should_be_active(),
            applied_activation: self.engine.applied_activation(),
            retry_phase: self.connector.timer.phase(),
            connected: self.connector.is_connected(),
            connected_since: self.connected_since,
            active_interface: self.ctx.active_interface.clone(),
            applications: self.registry.len(),
            registry_digest: self.digest_tx.borrow().clone(),
        }
    }
}
