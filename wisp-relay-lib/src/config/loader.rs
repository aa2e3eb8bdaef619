use std::fs;
use std::path::Path;

use regex::Regex;

use crate::config::{Config, DnsMethod, PortRule};
use crate::error::{Result, WispError};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| WispError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| WispError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if !matches!(cfg.wisp.version, 1 | 2) {
        return Err(WispError::Config(format!(
            "Unsupported protocol version: {}",
            cfg.wisp.version
        )));
    }

    for pattern in cfg
        .policy
        .hostname_whitelist
        .iter()
        .chain(cfg.policy.hostname_blacklist.iter())
    {
        Regex::new(pattern)
            .map_err(|e| WispError::Config(format!("Invalid hostname pattern {pattern:?}: {e}")))?;
    }

    for rule in cfg
        .policy
        .port_whitelist
        .iter()
        .chain(cfg.policy.port_blacklist.iter())
    {
        if let PortRule::Range([lo, hi]) = rule {
            if lo > hi {
                return Err(WispError::Config(format!("Invalid port range: [{lo}, {hi}]")));
            }
        }
    }

    if cfg.dns.method == DnsMethod::Resolve && cfg.dns.servers.is_empty() {
        return Err(WispError::Config(
            "dns.method = \"resolve\" requires at least one entry in dns.servers".into(),
        ));
    }

    if let Some(low) = cfg.carrier.low_watermark {
        if low > cfg.carrier.high_watermark {
            return Err(WispError::Config(format!(
                "carrier.low_watermark {low} exceeds high_watermark {}",
                cfg.carrier.high_watermark
            )));
        }
    }

    Ok(())
}
