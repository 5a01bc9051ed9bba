use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::types::{PowerState, StandbyBehavior};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub power: PowerConfig,
}

/// Operator intent at startup
#[derive(Debug, Clone, Deserialize)]
pub struct ResponderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub standby_behavior: StandbyBehavior,
    #[serde(default = "default_friendly_name")]
    pub friendly_name: String,
}

/// Device configuration parameters, read once per connect attempt
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureConfig {
    /// Master switch; when off the discovery service is never started
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_true")]
    pub friendly_name: bool,
    #[serde(default = "default_true")]
    pub wol_wake: bool,
    #[serde(default)]
    pub app_list: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_first_interval")]
    pub first_interval_ms: u64,
    #[serde(default = "default_second_interval")]
    pub second_interval_ms: u64,
    /// Pause between teardown and relaunch after a deep-sleep cycle
    #[serde(default = "default_restart_pause")]
    pub restart_pause_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_ethernet_interface")]
    pub ethernet_interface: String,
    #[serde(default = "default_wifi_interface")]
    pub wifi_interface: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_device_id_file")]
    pub device_id_file: PathBuf,
    #[serde(default = "default_fallback_files")]
    pub fallback_files: Vec<PathBuf>,
    #[serde(default = "default_serial_number_files")]
    pub serial_number_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_properties_file")]
    pub properties_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_program")]
    pub program: PathBuf,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PowerConfig {
    #[serde(default = "default_power_state")]
    pub initial_state: PowerState,
    #[serde(default)]
    pub network_standby: bool,
}

fn default_true() -> bool {
    true
}

fn default_friendly_name() -> String {
    "Living Room".to_string()
}

fn default_first_interval() -> u64 {
    5000
}

fn default_second_interval() -> u64 {
    10000
}

fn default_restart_pause() -> u64 {
    1000
}

fn default_ethernet_interface() -> String {
    "eth0".to_string()
}

fn default_wifi_interface() -> String {
    "wlan0".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_device_id_file() -> PathBuf {
    PathBuf::from("/tmp/gpid.txt")
}

fn default_fallback_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/opt/www/authService/deviceid.dat"),
        PathBuf::from("/opt/www/whitebox/wbdevice.dat"),
    ]
}

fn default_serial_number_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/sys/firmware/devicetree/base/serial-number"),
        PathBuf::from("/sys/class/dmi/id/product_serial"),
    ]
}

fn default_properties_file() -> PathBuf {
    PathBuf::from("/etc/device.properties")
}

fn default_program() -> PathBuf {
    PathBuf::from("/usr/bin/dial-server")
}

fn default_event_queue_capacity() -> usize {
    256
}

fn default_power_state() -> PowerState {
    PowerState::On
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            standby_behavior: StandbyBehavior::default(),
            friendly_name: default_friendly_name(),
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            enable: true,
            friendly_name: true,
            wol_wake: true,
            app_list: String::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            first_interval_ms: default_first_interval(),
            second_interval_ms: default_second_interval(),
            restart_pause_ms: default_restart_pause(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ethernet_interface: default_ethernet_interface(),
            wifi_interface: default_wifi_interface(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            device_id_file: default_device_id_file(),
            fallback_files: default_fallback_files(),
            serial_number_files: default_serial_number_files(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            properties_file: default_properties_file(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            initial_state: default_power_state(),
            network_standby: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert!(!config.responder.enabled);
        assert_eq!(config.responder.friendly_name, "Living Room");
        assert_eq!(config.retry.first_interval_ms, 5000);
        assert_eq!(config.retry.second_interval_ms, 10000);
        assert!(config.features.enable);
        assert_eq!(config.power.initial_state, PowerState::On);
        assert_eq!(config.identity.fallback_files.len(), 2);
    }

    #[test]
    fn test_load_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[responder]
enabled = true
standby_behavior = "active"

[features]
wol_wake = false
app_list = "YouTube,Netflix"

[power]
initial_state = "STANDBY"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert!(config.responder.enabled);
        assert_eq!(config.responder.standby_behavior, StandbyBehavior::Active);
        assert!(!config.features.wol_wake);
        assert!(config.features.friendly_name);
        assert_eq!(config.features.app_list, "YouTube,Netflix");
        assert_eq!(config.power.initial_state, PowerState::Standby);
        assert_eq!(config.network.ethernet_interface, "eth0");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load("/nonexistent/responderd.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
