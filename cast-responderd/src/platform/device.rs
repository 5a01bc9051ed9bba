use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::{bail, Result};

/// Device registry boundary: source of the hardware serial number.
pub trait DeviceInfo: Send + Sync {
    /// May fail, or succeed with an empty string on devices without one
    fn serial_number(&self) -> Result<String>;
}

/// Reads the serial number from the first non-empty file among a list of
/// well-known sysfs/device-tree locations.
pub struct SystemDeviceInfo {
    serial_files: Vec<PathBuf>,
}

impl SystemDeviceInfo {
    pub fn new(serial_files: Vec<PathBuf>) -> Self {
        Self { serial_files }
    }
}

impl DeviceInfo for SystemDeviceInfo {
    fn serial_number(&self) -> Result<String> {
        for path in &self.serial_files {
            match std::fs::read_to_string(path) {
                Ok(raw) => {
                    // device-tree strings carry a trailing NUL
                    let serial = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
                    if !serial.is_empty() {
                        return Ok(serial.to_string());
                    }
                }
                Err(e) => {
                    tracing::debug!("Serial number not readable from {}: {}", path.display(), e);
                }
            }
        }
        bail!("serial number not available from any configured source")
    }
}

/// `KEY=VALUE` device properties file (MODEL_NUM, MFG_NAME, ...).
#[derive(Debug, Clone, Default)]
pub struct DeviceProperties {
    values: HashMap<String, String>,
}

impl DeviceProperties {
    /// A missing or unreadable file yields an empty property set.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) => {
                tracing::warn!("Device properties unavailable at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// The first occurrence of a key wins.
    pub fn parse(contents: &str) -> Self {
        let mut values = HashMap::new();
        for line in contents.lines() {
            if let Some((key, value)) = line.split_once('=') {
                if !key.is_empty() {
                    values
                        .entry(key.to_string())
                        .or_insert_with(|| value.to_string());
                }
            }
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}
