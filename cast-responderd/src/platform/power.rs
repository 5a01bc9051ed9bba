use std::sync::Arc;
use anyhow::Result;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use shared::types::PowerState;
use crate::controller::ControllerHandle;
use crate::dispatcher::CastObserver;

/// Power subsystem boundary.
pub trait PowerManager: Send + Sync {
    /// Current and previous power state
    fn power_state(&self) -> Result<(PowerState, PowerState)>;
    fn network_standby_mode(&self) -> Result<bool>;
    fn set_power_state(&self, state: PowerState, reason: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerTransition {
    pub current: PowerState,
    pub previous: PowerState,
}

/// In-process power subsystem. State lives in watch channels so change
/// notifications can be bridged to the controller.
pub struct LocalPowerManager {
    state: watch::Sender<PowerTransition>,
    network_standby: watch::Sender<bool>,
}

impl LocalPowerManager {
    pub fn new(initial: PowerState, network_standby: bool) -> Self {
        let (state, _) = watch::channel(PowerTransition {
            current: initial,
            previous: PowerState::Unknown,
        });
        let (network_standby, _) = watch::channel(network_standby);
        Self { state, network_standby }
    }

    pub fn subscribe(&self) -> watch::Receiver<PowerTransition> {
        self.state.subscribe()
    }

    pub fn subscribe_network_standby(&self) -> watch::Receiver<bool> {
        self.network_standby.subscribe()
    }

    pub fn set_network_standby_mode(&self, enabled: bool) {
        self.network_standby.send_if_modified(|current| {
            if *current == enabled {
                return false;
            }
            *current = enabled;
            true
        });
    }
}

impl PowerManager for LocalPowerManager {
    fn power_state(&self) -> Result<(PowerState, PowerState)> {
        let t = *self.state.borrow();
        Ok((t.current, t.previous))
    }

    fn network_standby_mode(&self) -> Result<bool> {
        Ok(*self.network_standby.borrow())
    }

    fn set_power_state(&self, state: PowerState, reason: &str) -> Result<()> {
        let changed = self.state.send_if_modified(|t| {
            if t.current == state {
                return false;
            }
            t.previous = t.current;
            t.current = state;
            true
        });
        if changed {
            tracing::info!("Power state set to {} ({})", state, reason);
        }
        Ok(())
    }
}

/// Forwards power mode and network-standby changes to the controller.
pub async fn run_power_bridge(
    power: Arc<LocalPowerManager>,
    controller: ControllerHandle,
    cancel: CancellationToken,
) -> Result<()> {
    let mut modes = power.subscribe();
    let mut standby = power.subscribe_network_standby();
    modes.borrow_and_update();
    standby.borrow_and_update();

    loop {
        tokio::select! {
            changed = modes.changed() => {
                if changed.is_err() {
                    break;
                }
                let t = *modes.borrow_and_update();
                controller.power_mode_changed(t.previous, t.current).await?;
            }
            changed = standby.changed() => {
                if changed.is_err() {
                    break;
                }
                let enabled = *standby.borrow_and_update();
                controller.network_standby_mode_changed(enabled).await?;
            }
            _ = cancel.cancelled() => {
                tracing::info!("Power bridge shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Applies power state requests arriving from remote cast clients.
pub struct PowerRequestHandler {
    power: Arc<dyn PowerManager>,
}

impl PowerRequestHandler {
    pub fn new(power: Arc<dyn PowerManager>) -> Self {
        Self { power }
    }

    /// `ON`, `STANDBY` or `TOGGLE`; anything else is ignored. Returns false
    /// only when the power subsystem rejects the change.
    pub fn handle(&self, requested: &str) -> bool {
        let current = match self.power.power_state() {
            Ok((current, _)) => current,
            Err(e) => {
                tracing::error!("Failed to read power state: {}", e);
                PowerState::Unknown
            }
        };

        let target = match requested {
            "ON" => PowerState::On,
            "STANDBY" => PowerState::Standby,
            "TOGGLE" if current == PowerState::On => PowerState::Standby,
            "TOGGLE" => PowerState::On,
            other => {
                tracing::warn!("Ignoring unsupported power state request {:?}", other);
                return true;
            }
        };

        if target == current {
            return true;
        }

        match self.power.set_power_state(target, "cast request") {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to set power state {}: {}", target, e);
                false
            }
        }
    }
}

impl CastObserver for PowerRequestHandler {
    fn on_power_state_request(&self, power_state: &str) {
        self.handle(power_state);
    }
}
