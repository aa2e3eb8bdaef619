use serde::Deserialize;

/// Destination policy configuration
///
/// Whitelists take precedence: when a whitelist is set, the matching
/// blacklist is never consulted.
#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    /// Regex patterns for hostnames that are denied
    /// Consulted only when no hostname whitelist is configured
    #[serde(default)]
    pub hostname_blacklist: Vec<String>,
    /// Regex patterns for hostnames that are allowed; everything else is denied
    #[serde(default)]
    pub hostname_whitelist: Vec<String>,
    /// Denied ports; entries are single ports or inclusive [lo, hi] ranges
    /// Consulted only when no port whitelist is configured
    #[serde(default)]
    pub port_blacklist: Vec<PortRule>,
    /// Allowed ports; everything else is denied
    #[serde(default)]
    pub port_whitelist: Vec<PortRule>,
    /// Permit CONNECT hostnames that are literal IP addresses
    /// Default: true
    #[serde(default = "default_true")]
    pub allow_direct_ip: bool,
    /// Permit destinations in private, link-local, CGNAT, or reserved ranges
    /// Default: false
    #[serde(default)]
    pub allow_private_ips: bool,
    /// Permit loopback and unspecified destinations
    /// Default: false
    #[serde(default)]
    pub allow_loopback_ips: bool,
    /// Maximum live streams per destination hostname per connection
    /// -1 disables the limit
    #[serde(default = "default_unlimited")]
    pub stream_limit_per_host: i64,
    /// Maximum live streams per connection
    /// -1 disables the limit
    #[serde(default = "default_unlimited")]
    pub stream_limit_total: i64,
    /// Permit TCP streams
    /// Default: true
    #[serde(default = "default_true")]
    pub allow_tcp_streams: bool,
    /// Permit UDP streams
    /// Default: true
    #[serde(default = "default_true")]
    pub allow_udp_streams: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            hostname_blacklist: Vec::new(),
            hostname_whitelist: Vec::new(),
            port_blacklist: Vec::new(),
            port_whitelist: Vec::new(),
            allow_direct_ip: true,
            allow_private_ips: false,
            allow_loopback_ips: false,
            stream_limit_per_host: -1,
            stream_limit_total: -1,
            allow_tcp_streams: true,
            allow_udp_streams: true,
        }
    }
}

/// A single port or an inclusive range
/// TOML accepts both shapes in one list: `port_whitelist = [80, 443, [8000, 9000]]`
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(untagged)]
pub enum PortRule {
    Single(u16),
    Range([u16; 2]),
}

impl PortRule {
    pub fn matches(&self, port: u16) -> bool {
        match self {
            PortRule::Single(p) => *p == port,
            PortRule::Range([lo, hi]) => (*lo..=*hi).contains(&port),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_unlimited() -> i64 {
    -1
}
