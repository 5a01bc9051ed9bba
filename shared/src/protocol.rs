use serde::{Serialize, Deserialize};
use crate::types::AppEntry;

/// Protocol version reported when the discovery service has not told us its own
pub const DEFAULT_PROTOCOL_VERSION: &str = "2.1";

/// Logical interface names
pub const INTERFACE_ETHERNET: &str = "ETHERNET";
pub const INTERFACE_WIFI: &str = "WIFI";

/// IP version label used when querying the network subsystem
pub const IP_VERSION_V4: &str = "IPv4";

/// Launch arguments understood by the discovery-service executable
pub const ARG_INTERFACE: &str = "-I";
pub const ARG_UUID: &str = "-U";
pub const ARG_MODEL: &str = "-M";
pub const ARG_MANUFACTURER: &str = "-R";
pub const ARG_FRIENDLY_NAME: &str = "-F";
pub const ARG_APP_LIST: &str = "-A";
pub const FLAG_FRIENDLY_NAME: &str = "--feature-friendlyname";
pub const FLAG_WOL_WAKE: &str = "--feature-wolwake";

/// Requests written to the discovery service, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum ControlRequest {
    #[serde(rename_all = "camelCase")]
    SetApplications { applications: Vec<AppEntry> },
    #[serde(rename_all = "camelCase")]
    SetActivation { active: bool, friendly_name: String },
    SetManufacturerName { name: String },
    SetModelName { name: String },
    SetNetworkStandbyMode { enabled: bool },
    #[serde(rename_all = "camelCase")]
    ApplicationStateChanged {
        application_name: String,
        state: String,
        application_id: String,
        error: String,
    },
    Shutdown,
}

/// Messages read from the discovery service, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params", rename_all = "camelCase")]
pub enum ServiceMessage {
    #[serde(rename_all = "camelCase")]
    Ready { protocol_version: String },
    #[serde(rename_all = "camelCase")]
    LaunchRequest { app_name: String, parameter: String },
    #[serde(rename_all = "camelCase")]
    LaunchRequestWithParams {
        app_name: String,
        payload: String,
        query: String,
        additional_data_url: String,
    },
    #[serde(rename_all = "camelCase")]
    StopRequest { app_name: String, app_id: String },
    #[serde(rename_all = "camelCase")]
    HideRequest { app_name: String, app_id: String },
    #[serde(rename_all = "camelCase")]
    ResumeRequest { app_name: String, app_id: String },
    #[serde(rename_all = "camelCase")]
    StateRequest { app_name: String, app_id: String },
    #[serde(rename_all = "camelCase")]
    PowerStateRequest { power_state: String },
}

/// An inbound event fanned out to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastEvent {
    LaunchRequest { app_name: String, parameter: String },
    LaunchRequestWithParams {
        app_name: String,
        payload: String,
        query: String,
        additional_data_url: String,
    },
    StopRequest { app_name: String, app_id: String },
    HideRequest { app_name: String, app_id: String },
    ResumeRequest { app_name: String, app_id: String },
    StateRequest { app_name: String, app_id: String },
    PowerStateRequest { power_state: String },
}

impl CastEvent {
    /// Short kind label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            CastEvent::LaunchRequest { .. } => "launch",
            CastEvent::LaunchRequestWithParams { .. } => "launch-with-params",
            CastEvent::StopRequest { .. } => "stop",
            CastEvent::HideRequest { .. } => "hide",
            CastEvent::ResumeRequest { .. } => "resume",
            CastEvent::StateRequest { .. } => "state",
            CastEvent::PowerStateRequest { .. } => "power-state",
        }
    }
}

impl ServiceMessage {
    /// The observer-facing event carried by this message, if any.
    pub fn into_event(self) -> Option<CastEvent> {
        match self {
            ServiceMessage::Ready { .. } => None,
            ServiceMessage::LaunchRequest { app_name, parameter } => {
                Some(CastEvent::LaunchRequest { app_name, parameter })
            }
            ServiceMessage::LaunchRequestWithParams { app_name, payload, query, additional_data_url } => {
                Some(CastEvent::LaunchRequestWithParams { app_name, payload, query, additional_data_url })
            }
            ServiceMessage::StopRequest { app_name, app_id } => Some(CastEvent::StopRequest { app_name, app_id }),
            ServiceMessage::HideRequest { app_name, app_id } => Some(CastEvent::HideRequest { app_name, app_id }),
            ServiceMessage::ResumeRequest { app_name, app_id } => Some(CastEvent::ResumeRequest { app_name, app_id }),
            ServiceMessage::StateRequest { app_name, app_id } => Some(CastEvent::StateRequest { app_name, app_id }),
            ServiceMessage::PowerStateRequest { power_state } => Some(CastEvent::PowerStateRequest { power_state }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_request_wire_format() {
        let req = ControlRequest::SetActivation {
            active: true,
            friendly_name: "Living Room".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"method":"setActivation","params":{"active":true,"friendlyName":"Living Room"}}"#
        );
    }

    #[test]
    fn test_service_message_parses_launch_with_params() {
        let line = r#"{"event":"launchRequestWithParams","params":{"appName":"YouTube","payload":"p","query":"source_type=12","additionalDataUrl":"http://127.0.0.1/add"}}"#;
        let msg: ServiceMessage = serde_json::from_str(line).unwrap();

        let event = msg.into_event().unwrap();
        assert_eq!(event.kind(), "launch-with-params");
        match event {
            CastEvent::LaunchRequestWithParams { app_name, query, .. } => {
                assert_eq!(app_name, "YouTube");
                assert_eq!(query, "source_type=12");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_ready_is_not_an_observer_event() {
        let msg: ServiceMessage =
            serde_json::from_str(r#"{"event":"ready","params":{"protocolVersion":"2.2"}}"#).unwrap();
        assert_eq!(msg.clone().into_event(), None);
        assert_eq!(msg, ServiceMessage::Ready { protocol_version: "2.2".to_string() });
    }
}
