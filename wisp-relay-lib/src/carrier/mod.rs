pub mod framed;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::config::CarrierConfig;
use crate::error::{Result, WispError};

const SEND_QUEUE_DEPTH: usize = 64;
const BACKPRESSURE_POLL: Duration = Duration::from_millis(100);
const BACKPRESSURE_TICK: Duration = Duration::from_millis(10);

/// High/low buffered-byte thresholds governing carrier send throttling.
#[derive(Debug, Clone, Copy)]
pub struct Watermark {
    pub high: usize,
    pub low: usize,
}

impl Watermark {
    pub fn from_config(cfg: &CarrierConfig) -> Watermark {
        Watermark { high: cfg.high_watermark, low: cfg.low() }
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Watermark::from_config(&CarrierConfig::default())
    }
}

/// Async adapter over the single carrier: ordered receive on one side, a
/// serialized send queue with watermark backpressure on the other.
pub struct CarrierChannel {
    pub reader: CarrierReader,
    pub sender: CarrierSender,
}

/// Receive half; consumed only by the packet reader.
pub struct CarrierReader {
    inbound: mpsc::Receiver<Bytes>,
}

impl CarrierReader {
    /// Next inbound message, or `None` once the carrier has closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }
}

/// Clonable send half. The mpsc queue is the single writer toward the
/// transport, so message boundaries survive concurrent pump use.
#[derive(Clone)]
pub struct CarrierSender {
    outbound: mpsc::Sender<Bytes>,
    buffered: Arc<AtomicUsize>,
    watermark: Watermark,
}

impl CarrierSender {
    /// Enqueue one message, then throttle against the transport's buffered
    /// byte count: above the high watermark, poll coarsely until the queue
    /// drains to the low watermark; above only the low watermark, yield one
    /// short tick.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        let len = frame.len();
        self.outbound
            .send(frame)
            .await
            .map_err(|_| WispError::CarrierClosed)?;
        let buffered = self.buffered.fetch_add(len, Ordering::Relaxed) + len;
        if buffered > self.watermark.high {
            loop {
                sleep(BACKPRESSURE_POLL).await;
                if self.buffered.load(Ordering::Relaxed) <= self.watermark.low {
                    break;
                }
            }
        } else if buffered > self.watermark.low {
            sleep(BACKPRESSURE_TICK).await;
        }
        Ok(())
    }
}

/// What a transport implementation holds: it forwards inbound carrier
/// messages into `inbound`, drains `outbound` onto the wire, and subtracts
/// each frame's length from `buffered` once it has left the process.
pub struct TransportSide {
    pub inbound: mpsc::Sender<Bytes>,
    pub outbound: mpsc::Receiver<Bytes>,
    pub buffered: Arc<AtomicUsize>,
}

/// Build a channel pair bridging the engine and a carrier transport.
pub fn channel(watermark: Watermark) -> (CarrierChannel, TransportSide) {
    let (inbound_tx, inbound_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
    let (outbound_tx, outbound_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
    let buffered = Arc::new(AtomicUsize::new(0));
    let channel = CarrierChannel {
        reader: CarrierReader { inbound: inbound_rx },
        sender: CarrierSender {
            outbound: outbound_tx,
            buffered: buffered.clone(),
            watermark,
        },
    };
    (channel, TransportSide { inbound: inbound_tx, outbound: outbound_rx, buffered })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_watermarks() {
        let wm = Watermark::default();
        assert_eq!(wm.high, 32 * 1024 * 1024);
        assert_eq!(wm.low, 16 * 1024 * 1024);
    }

    #[tokio::test]
    async fn send_fails_once_the_transport_is_gone() {
        let (channel, transport) = channel(Watermark::default());
        drop(transport);
        let err = channel.sender.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, WispError::CarrierClosed));
    }

    #[tokio::test]
    async fn messages_keep_their_boundaries() {
        let (channel, mut transport) = channel(Watermark::default());
        let a = channel.sender.clone();
        let b = channel.sender.clone();
        tokio::join!(
            async { a.send(Bytes::from_static(b"first")).await.unwrap() },
            async { b.send(Bytes::from_static(b"second")).await.unwrap() },
        );
        let mut seen = vec![
            transport.outbound.recv().await.unwrap(),
            transport.outbound.recv().await.unwrap(),
        ];
        seen.sort();
        assert_eq!(seen, vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]);
    }
}
