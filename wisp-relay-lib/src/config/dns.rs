use serde::Deserialize;
use std::net::IpAddr;

/// DNS resolution settings
#[derive(Debug, Deserialize, Clone)]
pub struct DnsConfig {
    /// Seconds a cache entry stays valid
    /// Default: 120
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// Resolution method
    /// Options: "lookup" (system resolver) or "resolve" (authoritative
    /// queries against `servers`)
    /// Default: "lookup"
    #[serde(default = "default_method")]
    pub method: DnsMethod,
    /// Upstream server addresses, required when method = "resolve"
    #[serde(default)]
    pub servers: Vec<IpAddr>,
    /// Address-family preference applied to results
    /// Options: "verbatim", "ipv4first", "ipv6first"
    /// Default: "verbatim"
    #[serde(default = "default_order")]
    pub result_order: ResultOrder,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            method: default_method(),
            servers: Vec::new(),
            result_order: default_order(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DnsMethod {
    Lookup,
    Resolve,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultOrder {
    Verbatim,
    Ipv4first,
    Ipv6first,
}

fn default_ttl() -> u64 {
    120
}

fn default_method() -> DnsMethod {
    DnsMethod::Lookup
}

fn default_order() -> ResultOrder {
    ResultOrder::Verbatim
}
