//! Hand-written fakes for the platform and discovery boundaries.

use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use anyhow::{anyhow, bail, Result};
use tokio::time::Instant;
use shared::protocol::ControlRequest;
use shared::types::PowerState;
use crate::discovery::{DiscoveryService, LaunchArgs};
use crate::platform::device::DeviceInfo;
use crate::platform::network::{IpSettings, NetworkManager};
use crate::platform::power::PowerManager;

#[derive(Default)]
pub struct FakeNetwork {
    settings: Mutex<Option<IpSettings>>,
    attempts: Mutex<Vec<Instant>>,
    lookup_threads: Mutex<Vec<ThreadId>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, interface: &str, address: &str, ip_version: &str, prefix: u32) {
        *self.settings.lock().unwrap() = Some(IpSettings {
            interface: interface.to_string(),
            ip_version: ip_version.to_string(),
            address: address.to_string(),
            prefix,
            ..Default::default()
        });
    }

    pub fn clear(&self) {
        *self.settings.lock().unwrap() = None;
    }

    /// When each primary-interface lookup happened
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    /// Which thread served each primary-interface lookup
    pub fn lookup_threads(&self) -> Vec<ThreadId> {
        self.lookup_threads.lock().unwrap().clone()
    }
}

impl NetworkManager for FakeNetwork {
    fn primary_interface(&self) -> Result<String> {
        self.attempts.lock().unwrap().push(Instant::now());
        self.lookup_threads.lock().unwrap().push(std::thread::current().id());
        self.settings
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.interface.clone())
            .ok_or_else(|| anyhow!("network down"))
    }

    fn ip_settings(&self, interface: &str, _ip_version: &str) -> Result<IpSettings> {
        match self.settings.lock().unwrap().as_ref() {
            Some(s) if s.interface == interface => Ok(s.clone()),
            _ => bail!("no settings for {}", interface),
        }
    }
}

pub struct FakeDevice {
    serial: String,
}

impl FakeDevice {
    pub fn new(serial: &str) -> Self {
        Self { serial: serial.to_string() }
    }
}

impl DeviceInfo for FakeDevice {
    fn serial_number(&self) -> Result<String> {
        Ok(self.serial.clone())
    }
}

#[derive(Default)]
struct DiscoveryState {
    running: bool,
    starts: Vec<LaunchArgs>,
    stops: usize,
    requests: Vec<ControlRequest>,
    fail_next_start: bool,
    protocol_version: Option<String>,
}

/// Records everything the connector does to the discovery service. Clones
/// share state so a test can keep one while the connector owns another.
#[derive(Clone, Default)]
pub struct FakeDiscovery {
    state: Arc<Mutex<DiscoveryState>>,
}

impl FakeDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().unwrap().starts.len()
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    pub fn last_args(&self) -> Option<LaunchArgs> {
        self.state.lock().unwrap().starts.last().cloned()
    }

    pub fn requests(&self) -> Vec<ControlRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    pub fn fail_next_start(&self) {
        self.state.lock().unwrap().fail_next_start = true;
    }

    pub fn set_protocol_version(&self, version: &str) {
        self.state.lock().unwrap().protocol_version = Some(version.to_string());
    }

    /// Simulate the service process dying on its own
    pub fn crash(&self) {
        self.state.lock().unwrap().running = false;
    }
}

impl DiscoveryService for FakeDiscovery {
    fn start(&mut self, args: &LaunchArgs) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_start) {
            bail!("launch failed");
        }
        state.running = true;
        state.starts.push(args.clone());
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.running {
            state.running = false;
            state.stops += 1;
        }
    }

    fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    fn send(&mut self, request: ControlRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.running {
            bail!("not running");
        }
        state.requests.push(request);
        Ok(())
    }

    fn protocol_version(&self) -> Option<String> {
        self.state.lock().unwrap().protocol_version.clone()
    }
}

pub struct FakePower {
    state: Mutex<(PowerState, PowerState)>,
    network_standby: Mutex<bool>,
}

impl FakePower {
    pub fn new(current: PowerState, network_standby: bool) -> Self {
        Self {
            state: Mutex::new((current, PowerState::Unknown)),
            network_standby: Mutex::new(network_standby),
        }
    }

    pub fn set_network_standby(&self, enabled: bool) {
        *self.network_standby.lock().unwrap() = enabled;
    }
}

impl PowerManager for FakePower {
    fn power_state(&self) -> Result<(PowerState, PowerState)> {
        Ok(*self.state.lock().unwrap())
    }

    fn network_standby_mode(&self) -> Result<bool> {
        Ok(*self.network_standby.lock().unwrap())
    }

    fn set_power_state(&self, state: PowerState, _reason: &str) -> Result<()> {
        let mut current = self.state.lock().unwrap();
        *current = (state, current.0);
        Ok(())
    }
}
