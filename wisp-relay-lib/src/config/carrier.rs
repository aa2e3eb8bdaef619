use serde::Deserialize;

const DEFAULT_HIGH_WATERMARK: usize = 32 * 1024 * 1024;

/// Carrier send backpressure settings
#[derive(Debug, Deserialize, Clone)]
pub struct CarrierConfig {
    /// Buffered-byte count above which sends stall until the carrier drains
    /// Default: 33554432 (32 MiB)
    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
    /// Buffered-byte count a stalled carrier must drain back to
    /// Default: half of high_watermark
    #[serde(default)]
    pub low_watermark: Option<usize>,
}

impl CarrierConfig {
    pub fn low(&self) -> usize {
        self.low_watermark.unwrap_or(self.high_watermark / 2)
    }
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self { high_watermark: DEFAULT_HIGH_WATERMARK, low_watermark: None }
    }
}

fn default_high_watermark() -> usize {
    DEFAULT_HIGH_WATERMARK
}
