use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use anyhow::{anyhow, bail, Context, Result};
use shared::protocol::IP_VERSION_V4;
use crate::controller::ControllerHandle;

/// IP configuration of one interface, as reported by the network subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpSettings {
    pub interface: String,
    pub ip_version: String,
    pub address: String,
    pub prefix: u32,
    pub gateway: String,
    pub primary_dns: String,
    pub secondary_dns: String,
}

/// Network subsystem boundary.
pub trait NetworkManager: Send + Sync {
    fn primary_interface(&self) -> Result<String>;
    fn ip_settings(&self, interface: &str, ip_version: &str) -> Result<IpSettings>;
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    #[serde(default)]
    dev: Option<String>,
    #[serde(default)]
    gateway: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkAddresses {
    #[serde(default)]
    addr_info: Vec<AddressInfo>,
}

#[derive(Debug, Deserialize)]
struct AddressInfo {
    family: String,
    local: String,
    prefixlen: u32,
}

/// Linux network subsystem backed by the JSON output of iproute2 and
/// `/etc/resolv.conf`.
pub struct SystemNetwork {
    resolv_conf: std::path::PathBuf,
}

impl SystemNetwork {
    pub fn new() -> Self {
        Self {
            resolv_conf: std::path::PathBuf::from("/etc/resolv.conf"),
        }
    }

    fn ip_json(args: &[&str]) -> Result<String> {
        let output = Command::new("ip")
            .arg("-j")
            .args(args)
            .output()
            .context("Failed to run ip")?;
        if !output.status.success() {
            bail!(
                "ip {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        String::from_utf8(output.stdout).context("ip produced non-UTF-8 output")
    }
}

impl Default for SystemNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkManager for SystemNetwork {
    fn primary_interface(&self) -> Result<String> {
        let json = Self::ip_json(&["route", "show", "default"])?;
        parse_default_route(&json)?
            .dev
            .ok_or_else(|| anyhow!("default route has no device"))
    }

    fn ip_settings(&self, interface: &str, ip_version: &str) -> Result<IpSettings> {
        if ip_version != IP_VERSION_V4 {
            bail!("unsupported IP version {}", ip_version);
        }

        let addr_json = Self::ip_json(&["-4", "addr", "show", "dev", interface])?;
        let (address, prefix) = parse_ipv4_address(&addr_json)?
            .ok_or_else(|| anyhow!("no IPv4 address on {}", interface))?;

        let gateway = Self::ip_json(&["-4", "route", "show", "default", "dev", interface])
            .ok()
            .and_then(|json| parse_default_route(&json).ok())
            .and_then(|route| route.gateway)
            .unwrap_or_default();

        let nameservers = std::fs::read_to_string(&self.resolv_conf)
            .map(|contents| parse_nameservers(&contents))
            .unwrap_or_default();

        Ok(IpSettings {
            interface: interface.to_string(),
            ip_version: ip_version.to_string(),
            address,
            prefix,
            gateway,
            primary_dns: nameservers.first().cloned().unwrap_or_default(),
            secondary_dns: nameservers.get(1).cloned().unwrap_or_default(),
        })
    }
}

fn parse_default_route(json: &str) -> Result<RouteEntry> {
    let routes: Vec<RouteEntry> = serde_json::from_str(json).context("Failed to parse route list")?;
    routes
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no default route"))
}

fn parse_ipv4_address(json: &str) -> Result<Option<(String, u32)>> {
    let links: Vec<LinkAddresses> =
        serde_json::from_str(json).context("Failed to parse address list")?;
    Ok(links
        .into_iter()
        .flat_map(|link| link.addr_info)
        .find(|info| info.family == "inet")
        .map(|info| (info.local, info.prefixlen)))
}

fn parse_nameservers(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("nameserver"), Some(addr)) => Some(addr.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Primary interface and its IPv4 address, if any
fn probe(network: &dyn NetworkManager) -> Option<(String, String)> {
    let interface = network.primary_interface().ok()?;
    let address = network
        .ip_settings(&interface, IP_VERSION_V4)
        .map(|s| s.address)
        .unwrap_or_default();
    Some((interface, address))
}

async fn probe_blocking(network: &Arc<dyn NetworkManager>) -> Option<(String, String)> {
    let network = network.clone();
    tokio::task::spawn_blocking(move || probe(network.as_ref()))
        .await
        .unwrap_or(None)
}

/// Polls the network subsystem and turns changes into interface-change and
/// IPv4-acquired notifications for the controller.
pub async fn run_monitor(
    network: Arc<dyn NetworkManager>,
    controller: ControllerHandle,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!("Starting network monitor");

    let mut last = probe_blocking(&network).await;
    let mut interval = tokio::time::interval(poll_interval);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let current = probe_blocking(&network).await;
                match (&last, &current) {
                    (prev, Some((iface, _))) if prev.as_ref().map(|p| &p.0) != Some(iface) => {
                        let previous = prev.as_ref().map(|p| p.0.clone()).unwrap_or_default();
                        tracing::info!("Active interface changed: [{}] -> [{}]", previous, iface);
                        controller.active_interface_changed(previous, iface.clone()).await?;
                    }
                    (Some((_, old_addr)), Some((iface, addr))) if old_addr != addr && !addr.is_empty() => {
                        tracing::info!("IPv4 address on {} changed: [{}] -> [{}]", iface, old_addr, addr);
                        controller
                            .ip_address_changed(iface.clone(), IP_VERSION_V4.to_string(), addr.clone(), true)
                            .await?;
                    }
                    (Some((iface, _)), None) => {
                        tracing::warn!("Lost primary interface {}", iface);
                    }
                    _ => {}
                }
                last = current;
            }
            _ = cancel.cancelled() => {
                tracing::info!("Network monitor shutting down");
                break;
            }
        }
    }

    Ok(())
}
