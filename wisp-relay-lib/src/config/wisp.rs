use serde::Deserialize;

/// Protocol-level settings
#[derive(Debug, Deserialize, Clone)]
pub struct WispConfig {
    /// Protocol version to speak: 1 or 2
    /// Version 2 runs the INFO capability handshake before any streams
    /// Default: 2
    #[serde(default = "default_version")]
    pub version: u8,
    /// Message of the day advertised to version-2 clients (optional)
    /// Default: none
    #[serde(default)]
    pub motd: Option<String>,
}

impl Default for WispConfig {
    fn default() -> Self {
        Self { version: default_version(), motd: None }
    }
}

fn default_version() -> u8 {
    2
}
