pub mod process;

use anyhow::Result;
use shared::protocol::{
    ControlRequest, ARG_APP_LIST, ARG_FRIENDLY_NAME, ARG_INTERFACE, ARG_MANUFACTURER, ARG_MODEL,
    ARG_UUID, FLAG_FRIENDLY_NAME, FLAG_WOL_WAKE,
};

/// Parameters the discovery service is launched with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchArgs {
    pub interface: String,
    pub uuid: String,
    pub model: String,
    pub manufacturer: String,
    pub friendly_name: String,
    pub app_list: String,
    pub feature_friendly_name: bool,
    pub feature_wol_wake: bool,
}

impl LaunchArgs {
    /// Command line for the service executable. Empty values are omitted.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        for (flag, value) in [
            (ARG_INTERFACE, &self.interface),
            (ARG_UUID, &self.uuid),
            (ARG_MODEL, &self.model),
            (ARG_MANUFACTURER, &self.manufacturer),
            (ARG_FRIENDLY_NAME, &self.friendly_name),
            (ARG_APP_LIST, &self.app_list),
        ] {
            if !value.is_empty() {
                argv.push(flag.to_string());
                argv.push(value.clone());
            }
        }
        if self.feature_friendly_name {
            argv.push(FLAG_FRIENDLY_NAME.to_string());
        }
        if self.feature_wol_wake {
            argv.push(FLAG_WOL_WAKE.to_string());
        }
        argv
    }
}

/// The external discovery/advertisement service.
pub trait DiscoveryService: Send {
    /// Launch the service. No-op if it is already running.
    fn start(&mut self, args: &LaunchArgs) -> Result<()>;

    /// Tear down the running instance, if any.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Queue a control request for the running instance.
    fn send(&mut self, request: ControlRequest) -> Result<()>;

    /// Version the running instance reported, if it did
    fn protocol_version(&self) -> Option<String>;
}
