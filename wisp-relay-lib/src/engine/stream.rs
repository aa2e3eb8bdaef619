use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::carrier::CarrierSender;
use crate::net::{DestReader, DestWriter};
use crate::protocol::{CloseReason, Packet, Role};

/// Entries the per-stream client→target buffer holds. Also the credit
/// ceiling reported through CONTINUE.
pub const STREAM_BUFFER_SIZE: u32 = 128;

/// A CONTINUE is issued every this many chunks drained to the target.
const CONTINUE_INTERVAL: u32 = STREAM_BUFFER_SIZE / 2;

/// Table entry for one live stream. The buffer sender doubles as the
/// lifetime signal: dropping it ends the buffer and releases the drain
/// pump.
pub(crate) struct StreamHandle {
    pub hostname: String,
    pub data_tx: mpsc::Sender<Bytes>,
    pub closed: AtomicBool,
    pub cancel: CancellationToken,
}

/// Connection state shared by the packet reader and every stream task.
pub(crate) struct ConnShared {
    pub id: String,
    pub carrier: CarrierSender,
    pub streams: DashMap<u32, StreamHandle>,
}

impl ConnShared {
    /// Tear one stream down. Idempotent: the table removal decides the
    /// winner, the terminal flag marks the handle for anyone still holding
    /// it. A CLOSE goes out only when the reason originated locally.
    pub async fn close_stream(&self, stream_id: u32, reason: Option<CloseReason>) {
        let Some((_, handle)) = self.streams.remove(&stream_id) else {
            return;
        };
        if handle.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        handle.cancel.cancel();
        drop(handle);
        if let Some(reason) = reason {
            let frame = Packet::close(stream_id, reason).encode(Role::Server);
            if self.carrier.send(frame).await.is_err() {
                debug!(conn = %self.id, stream_id, "carrier gone before CLOSE could be sent");
            }
        }
    }

    /// Connection teardown: every stream goes, nothing is echoed to the
    /// (already dead) carrier.
    pub async fn close_all(&self) {
        let ids: Vec<u32> = self.streams.iter().map(|entry| *entry.key()).collect();
        for stream_id in ids {
            self.close_stream(stream_id, None).await;
        }
    }
}

/// Read the destination socket and fan its chunks into DATA packets on the
/// carrier. A graceful end of stream closes the stream as `Voluntary`.
pub(crate) async fn pump_target_to_carrier(
    shared: Arc<ConnShared>,
    stream_id: u32,
    mut reader: DestReader,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            result = reader.recv() => match result {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    debug!(conn = %shared.id, stream_id, "destination ended");
                    shared.close_stream(stream_id, Some(CloseReason::Voluntary)).await;
                    return;
                }
                Err(e) => {
                    warn!(conn = %shared.id, stream_id, error = %e, "destination read failed");
                    shared.close_stream(stream_id, Some(CloseReason::NetworkError)).await;
                    return;
                }
            },
        };
        let frame = Packet::data(stream_id, chunk).encode(Role::Server);
        if shared.carrier.send(frame).await.is_err() {
            // Carrier failure is connection-fatal; the packet reader runs
            // the cascade.
            return;
        }
    }
}

/// Drain the per-stream buffer into the destination socket, granting the
/// client fresh credit every `CONTINUE_INTERVAL` chunks.
pub(crate) async fn pump_buffer_to_target(
    shared: Arc<ConnShared>,
    stream_id: u32,
    mut data_rx: mpsc::Receiver<Bytes>,
    mut writer: DestWriter,
) {
    let mut sent: u32 = 0;
    while let Some(chunk) = data_rx.recv().await {
        if let Err(e) = writer.send(&chunk).await {
            warn!(conn = %shared.id, stream_id, error = %e, "destination write failed");
            shared.close_stream(stream_id, Some(CloseReason::NetworkError)).await;
            break;
        }
        sent = sent.wrapping_add(1);
        if sent % CONTINUE_INTERVAL == 0 {
            // Remaining credit is the buffer's free capacity, read without
            // holding the map guard across the send.
            let remaining = {
                let Some(handle) = shared.streams.get(&stream_id) else { break };
                handle.data_tx.capacity() as u32
            };
            let frame = Packet::continue_credit(stream_id, remaining).encode(Role::Server);
            if shared.carrier.send(frame).await.is_err() {
                break;
            }
        }
    }
    writer.shutdown().await;
}
