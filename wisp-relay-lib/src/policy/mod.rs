mod ip_class;

use std::net::IpAddr;

use regex::Regex;

use crate::config::{PolicyConfig, PortRule};
use crate::dns::Resolver;
use crate::error::{Result, WispError};
use crate::protocol::{CloseReason, StreamKind};

/// Compiled destination policy, built once at startup and shared read-only
/// by every connection.
#[derive(Debug)]
pub struct Policy {
    hostname_blacklist: Vec<Regex>,
    hostname_whitelist: Vec<Regex>,
    port_blacklist: Vec<PortRule>,
    port_whitelist: Vec<PortRule>,
    allow_direct_ip: bool,
    allow_private_ips: bool,
    allow_loopback_ips: bool,
    stream_limit_per_host: i64,
    stream_limit_total: i64,
    allow_tcp_streams: bool,
    allow_udp_streams: bool,
}

impl Policy {
    pub fn from_config(cfg: &PolicyConfig) -> Result<Policy> {
        Ok(Policy {
            hostname_blacklist: compile_patterns(&cfg.hostname_blacklist)?,
            hostname_whitelist: compile_patterns(&cfg.hostname_whitelist)?,
            port_blacklist: cfg.port_blacklist.clone(),
            port_whitelist: cfg.port_whitelist.clone(),
            allow_direct_ip: cfg.allow_direct_ip,
            allow_private_ips: cfg.allow_private_ips,
            allow_loopback_ips: cfg.allow_loopback_ips,
            stream_limit_per_host: cfg.stream_limit_per_host,
            stream_limit_total: cfg.stream_limit_total,
            allow_tcp_streams: cfg.allow_tcp_streams,
            allow_udp_streams: cfg.allow_udp_streams,
        })
    }

    pub fn allow_udp_streams(&self) -> bool {
        self.allow_udp_streams
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| WispError::Config(format!("Invalid hostname pattern {p:?}: {e}")))
        })
        .collect()
}

/// Live stream counts for quota checks. `same_host` counts existing streams
/// whose destination hostname equals the one being requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamCensus {
    pub total: usize,
    pub same_host: usize,
}

/// Evaluate the destination policy for a CONNECT request.
///
/// Returns `None` when the stream is allowed, or the close reason to deny
/// it with. Checks short-circuit in a fixed order: stream kind, hostname
/// lists, port lists, direct-IP gate, resolved-IP classification, quotas.
pub async fn is_stream_allowed(
    policy: &Policy,
    resolver: &Resolver,
    census: Option<StreamCensus>,
    kind: StreamKind,
    hostname: &str,
    port: u16,
) -> Option<CloseReason> {
    match kind {
        StreamKind::Tcp if !policy.allow_tcp_streams => return Some(CloseReason::HostBlocked),
        StreamKind::Udp if !policy.allow_udp_streams => return Some(CloseReason::HostBlocked),
        _ => {}
    }

    if !policy.hostname_whitelist.is_empty() {
        if !policy.hostname_whitelist.iter().any(|re| re.is_match(hostname)) {
            return Some(CloseReason::HostBlocked);
        }
    } else if policy.hostname_blacklist.iter().any(|re| re.is_match(hostname)) {
        return Some(CloseReason::HostBlocked);
    }

    if !policy.port_whitelist.is_empty() {
        if !policy.port_whitelist.iter().any(|rule| rule.matches(port)) {
            return Some(CloseReason::HostBlocked);
        }
    } else if policy.port_blacklist.iter().any(|rule| rule.matches(port)) {
        return Some(CloseReason::HostBlocked);
    }

    if hostname.parse::<IpAddr>().is_ok() && !policy.allow_direct_ip {
        return Some(CloseReason::HostBlocked);
    }

    // Literal hostnames pass through the resolver unchanged; a resolution
    // failure leaves nothing to classify, and the later connect reports the
    // network error on its own.
    if let Ok(ip) = resolver.lookup_ip(hostname).await {
        if !policy.allow_loopback_ips && ip_class::is_loopback(ip) {
            return Some(CloseReason::HostBlocked);
        }
        if !policy.allow_private_ips && ip_class::is_private(ip) {
            return Some(CloseReason::HostBlocked);
        }
    }

    if let Some(census) = census {
        if policy.stream_limit_total >= 0 && census.total as i64 >= policy.stream_limit_total {
            return Some(CloseReason::ConnThrottled);
        }
        if policy.stream_limit_per_host >= 0
            && census.same_host as i64 >= policy.stream_limit_per_host
        {
            return Some(CloseReason::ConnThrottled);
        }
    }

    None
}
