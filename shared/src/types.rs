use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Upper bounds (in bytes) for the string fields of an application entry.
/// Longer values are truncated on a character boundary.
pub const MAX_APP_NAME_LEN: usize = 255;
pub const MAX_URL_PREFIX_LEN: usize = 255;
pub const MAX_CORS_ORIGIN_LEN: usize = 255;
pub const MAX_LAUNCH_QUERY_LEN: usize = 1023;
pub const MAX_LAUNCH_PAYLOAD_LEN: usize = 1023;

/// A castable application registered with the responder.
/// `name` is the identity key: case-sensitive and unique within a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    /// Application name, e.g. "YouTube"
    pub name: String,

    /// URL prefix the application is reachable under
    #[serde(default)]
    pub url_prefix: String,

    /// Allowed CORS origin, e.g. ".youtube.com"
    #[serde(default)]
    pub cors_origin: String,

    /// Query string appended on launch
    #[serde(default)]
    pub launch_query: String,

    /// Payload handed over on launch
    #[serde(default)]
    pub launch_payload: String,

    /// Whether a remote client may stop the application
    #[serde(default)]
    pub allow_stop: bool,
}

impl AppEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_prefix: String::new(),
            cors_origin: String::new(),
            launch_query: String::new(),
            launch_payload: String::new(),
            allow_stop: false,
        }
    }

    /// Clamp every string field to its length bound.
    pub fn bounded(mut self) -> Self {
        truncate_utf8(&mut self.name, MAX_APP_NAME_LEN);
        truncate_utf8(&mut self.url_prefix, MAX_URL_PREFIX_LEN);
        truncate_utf8(&mut self.cors_origin, MAX_CORS_ORIGIN_LEN);
        truncate_utf8(&mut self.launch_query, MAX_LAUNCH_QUERY_LEN);
        truncate_utf8(&mut self.launch_payload, MAX_LAUNCH_PAYLOAD_LEN);
        self
    }
}

fn truncate_utf8(value: &mut String, max: usize) {
    if value.len() <= max {
        return;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value.truncate(end);
}

/// Error for string values that name no known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

/// Device power state as reported by the power subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    On,
    Standby,
    StandbyDeepSleep,
    Off,
    Unknown,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "ON",
            PowerState::Standby => "STANDBY",
            PowerState::StandbyDeepSleep => "STANDBY_DEEP_SLEEP",
            PowerState::Off => "OFF",
            PowerState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON" => Ok(PowerState::On),
            "STANDBY" => Ok(PowerState::Standby),
            "STANDBY_DEEP_SLEEP" => Ok(PowerState::StandbyDeepSleep),
            "OFF" => Ok(PowerState::Off),
            "UNKNOWN" => Ok(PowerState::Unknown),
            other => Err(UnknownValue::new("power state", other)),
        }
    }
}

/// Whether the responder stays active while the device is not powered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandbyBehavior {
    Active,
    #[default]
    Inactive,
}

impl StandbyBehavior {
    pub fn is_active(&self) -> bool {
        matches!(self, StandbyBehavior::Active)
    }
}

impl FromStr for StandbyBehavior {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(StandbyBehavior::Active),
            "inactive" => Ok(StandbyBehavior::Inactive),
            other => Err(UnknownValue::new("standby behavior", other)),
        }
    }
}

/// Lifecycle state of a launched application, reported back to remote clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    Running,
    Stopped,
    Hidden,
}

impl AppState {
    /// Name used on the discovery-service control channel.
    pub fn wire_name(&self) -> &'static str {
        match self {
            AppState::Running => "running",
            AppState::Stopped => "stopped",
            AppState::Hidden => "suspended",
        }
    }
}

impl FromStr for AppState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(AppState::Running),
            "stopped" => Ok(AppState::Stopped),
            "suspended" | "hidden" => Ok(AppState::Hidden),
            other => Err(UnknownValue::new("application state", other)),
        }
    }
}

/// Error qualifier attached to an application state report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppErrorCode {
    None,
    Forbidden,
    Unavailable,
    Invalid,
    Internal,
}

impl AppErrorCode {
    pub fn wire_name(&self) -> &'static str {
        match self {
            AppErrorCode::None => "none",
            AppErrorCode::Forbidden => "forbidden",
            AppErrorCode::Unavailable => "unavailable",
            AppErrorCode::Invalid => "invalid",
            AppErrorCode::Internal => "internal",
        }
    }
}

impl FromStr for AppErrorCode {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AppErrorCode::None),
            "forbidden" => Ok(AppErrorCode::Forbidden),
            "unavailable" => Ok(AppErrorCode::Unavailable),
            "invalid" => Ok(AppErrorCode::Invalid),
            "internal" => Ok(AppErrorCode::Internal),
            other => Err(UnknownValue::new("error code", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_truncates_long_fields() {
        let mut entry = AppEntry::new("x".repeat(400));
        entry.launch_payload = "p".repeat(2000);

        let entry = entry.bounded();

        assert_eq!(entry.name.len(), MAX_APP_NAME_LEN);
        assert_eq!(entry.launch_payload.len(), MAX_LAUNCH_PAYLOAD_LEN);
    }

    #[test]
    fn test_bounded_respects_char_boundaries() {
        // 'é' is two bytes; 128 of them is 256 bytes, one past the bound
        let entry = AppEntry::new("é".repeat(128)).bounded();

        assert_eq!(entry.name.len(), 254);
        assert!(entry.name.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_power_state_round_trips_through_strings() {
        for state in [
            PowerState::On,
            PowerState::Standby,
            PowerState::StandbyDeepSleep,
            PowerState::Off,
            PowerState::Unknown,
        ] {
            assert_eq!(state.as_str().parse::<PowerState>().unwrap(), state);
        }
        assert!("SLEEPY".parse::<PowerState>().is_err());
    }

    #[test]
    fn test_app_state_wire_names() {
        assert_eq!(AppState::Hidden.wire_name(), "suspended");
        assert_eq!("suspended".parse::<AppState>().unwrap(), AppState::Hidden);
        assert!("paused".parse::<AppState>().is_err());
    }

    #[test]
    fn test_unknown_error_code_is_rejected() {
        let err = "teapot".parse::<AppErrorCode>().unwrap_err();
        assert_eq!(err.kind, "error code");
        assert_eq!(err.value, "teapot");
    }

    #[test]
    fn test_app_entry_deserializes_with_defaults() {
        let entry: AppEntry = serde_json::from_str(r#"{"name":"Netflix"}"#).unwrap();
        assert_eq!(entry, AppEntry::new("Netflix"));
    }
}
