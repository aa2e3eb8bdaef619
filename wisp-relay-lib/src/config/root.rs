use serde::Deserialize;
use std::net::SocketAddr;

use super::carrier::CarrierConfig;
use super::dns::DnsConfig;
use super::policy::PolicyConfig;
use super::wisp::WispConfig;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address and port to accept carrier connections on
    /// Example: "0.0.0.0:6001" or "127.0.0.1:6001"
    pub listen: SocketAddr,
    /// Protocol settings (version, MOTD)
    #[serde(default)]
    pub wisp: WispConfig,
    /// Destination policy (allow/deny lists, IP gates, quotas)
    #[serde(default)]
    pub policy: PolicyConfig,
    /// DNS resolution settings
    #[serde(default)]
    pub dns: DnsConfig,
    /// Carrier send backpressure settings
    #[serde(default)]
    pub carrier: CarrierConfig,
    /// Seconds to wait for live connections to drain on shutdown
    /// Default: 30
    #[serde(default = "default_shutdown_secs")]
    pub shutdown_secs: u64,
}

fn default_shutdown_secs() -> u64 {
    30
}
