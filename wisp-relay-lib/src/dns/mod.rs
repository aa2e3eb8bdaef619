use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tokio::net::lookup_host;
use tracing::{debug, trace};

use crate::config::{DnsConfig, DnsMethod, ResultOrder};
use crate::error::{Result, WispError};

/// Injected resolution function, overriding the configured method.
pub type CustomResolveFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = std::result::Result<IpAddr, String>> + Send>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone)]
struct CacheEntry {
    result: std::result::Result<IpAddr, String>,
    inserted_at: Instant,
}

/// Hostname-to-address façade with a process-wide TTL cache.
///
/// Literal addresses pass through untouched. Failures are cached alongside
/// successes so a flapping name does not hammer the upstream.
pub struct Resolver {
    ttl: Duration,
    method: DnsMethod,
    result_order: ResultOrder,
    cache: DashMap<String, CacheEntry>,
    upstream: Option<TokioAsyncResolver>,
    custom: Option<CustomResolveFn>,
}

impl Resolver {
    pub fn new(cfg: &DnsConfig) -> Resolver {
        let upstream = match cfg.method {
            DnsMethod::Resolve => {
                let group = NameServerConfigGroup::from_ips_clear(&cfg.servers, 53, true);
                let resolver_config = ResolverConfig::from_parts(None, Vec::new(), group);
                Some(TokioAsyncResolver::tokio(resolver_config, ResolverOpts::default()))
            }
            DnsMethod::Lookup => None,
        };
        Resolver {
            ttl: Duration::from_secs(cfg.ttl),
            method: cfg.method,
            result_order: cfg.result_order,
            cache: DashMap::new(),
            upstream,
            custom: None,
        }
    }

    /// Replace the configured method with an injected resolution function.
    pub fn with_custom(mut self, custom: CustomResolveFn) -> Resolver {
        self.custom = Some(custom);
        self
    }

    pub async fn lookup_ip(&self, hostname: &str) -> Result<IpAddr> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(ip);
        }

        self.evict_expired();

        if let Some(entry) = self.cache.get(hostname) {
            debug!(host = %hostname, "DNS cache hit");
            return entry.result.clone().map_err(|message| WispError::Dns {
                hostname: hostname.to_string(),
                message,
            });
        }

        let result = self.resolve(hostname).await;
        self.cache.insert(
            hostname.to_string(),
            CacheEntry { result: result.clone(), inserted_at: Instant::now() },
        );
        trace!(host = %hostname, ?result, "DNS cache updated");

        result.map_err(|message| WispError::Dns { hostname: hostname.to_string(), message })
    }

    fn evict_expired(&self) {
        let ttl = self.ttl;
        self.cache.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }

    async fn resolve(&self, hostname: &str) -> std::result::Result<IpAddr, String> {
        if let Some(custom) = &self.custom {
            return (custom)(hostname.to_string()).await;
        }
        match self.method {
            DnsMethod::Lookup => self.resolve_system(hostname).await,
            DnsMethod::Resolve => self.resolve_upstream(hostname).await,
        }
    }

    async fn resolve_system(&self, hostname: &str) -> std::result::Result<IpAddr, String> {
        debug!(host = %hostname, "resolving via system lookup");
        let addresses: Vec<IpAddr> = lookup_host((hostname, 0))
            .await
            .map_err(|e| format!("failed to resolve {hostname}: {e}"))?
            .map(|addr| addr.ip())
            .collect();
        let picked = match self.result_order {
            ResultOrder::Verbatim => addresses.first(),
            ResultOrder::Ipv4first => addresses
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| addresses.first()),
            ResultOrder::Ipv6first => addresses
                .iter()
                .find(|ip| ip.is_ipv6())
                .or_else(|| addresses.first()),
        };
        picked
            .copied()
            .ok_or_else(|| format!("no addresses found for {hostname}"))
    }

    async fn resolve_upstream(&self, hostname: &str) -> std::result::Result<IpAddr, String> {
        let upstream = self
            .upstream
            .as_ref()
            .ok_or_else(|| "no upstream resolver configured".to_string())?;
        debug!(host = %hostname, "resolving via authoritative query");
        // ipv4first queries A and falls back to AAAA; the other orders
        // query AAAA first. The first returned address wins.
        match self.result_order {
            ResultOrder::Ipv4first => match query_a(upstream, hostname).await {
                Ok(ip) => Ok(ip),
                Err(_) => query_aaaa(upstream, hostname).await,
            },
            ResultOrder::Verbatim | ResultOrder::Ipv6first => {
                match query_aaaa(upstream, hostname).await {
                    Ok(ip) => Ok(ip),
                    Err(_) => query_a(upstream, hostname).await,
                }
            }
        }
    }
}

async fn query_a(
    upstream: &TokioAsyncResolver,
    hostname: &str,
) -> std::result::Result<IpAddr, String> {
    let lookup = upstream
        .ipv4_lookup(hostname)
        .await
        .map_err(|e| format!("A query for {hostname} failed: {e}"))?;
    lookup
        .iter()
        .next()
        .map(|a| IpAddr::V4(a.0))
        .ok_or_else(|| format!("empty A answer for {hostname}"))
}

async fn query_aaaa(
    upstream: &TokioAsyncResolver,
    hostname: &str,
) -> std::result::Result<IpAddr, String> {
    let lookup = upstream
        .ipv6_lookup(hostname)
        .await
        .map_err(|e| format!("AAAA query for {hostname} failed: {e}"))?;
    lookup
        .iter()
        .next()
        .map(|aaaa| IpAddr::V6(aaaa.0))
        .ok_or_else(|| format!("empty AAAA answer for {hostname}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_resolver(ttl: u64, calls: Arc<AtomicUsize>) -> Resolver {
        let custom: CustomResolveFn = Arc::new(move |_hostname| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("93.184.216.34".parse::<IpAddr>().map_err(|e| e.to_string())?)
            })
        });
        Resolver::new(&DnsConfig { ttl, ..DnsConfig::default() }).with_custom(custom)
    }

    #[tokio::test]
    async fn literal_addresses_pass_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = counting_resolver(120, calls.clone());
        let ip = resolver.lookup_ip("127.0.0.1").await.unwrap();
        assert_eq!(ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        let ip = resolver.lookup_ip("::1").await.unwrap();
        assert_eq!(ip, "::1".parse::<IpAddr>().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_lookup_hits_the_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = counting_resolver(120, calls.clone());
        resolver.lookup_ip("example.com").await.unwrap();
        resolver.lookup_ip("example.com").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_evicts_on_every_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = counting_resolver(0, calls.clone());
        resolver.lookup_ip("example.com").await.unwrap();
        resolver.lookup_ip("example.com").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_cached_and_reraised() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_fn = calls.clone();
        let custom: CustomResolveFn = Arc::new(move |hostname| {
            let calls = calls_in_fn.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(format!("no such host: {hostname}"))
            })
        });
        let resolver =
            Resolver::new(&DnsConfig { ttl: 120, ..DnsConfig::default() }).with_custom(custom);

        for _ in 0..2 {
            let err = resolver.lookup_ip("missing.invalid").await.unwrap_err();
            assert!(matches!(err, WispError::Dns { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
