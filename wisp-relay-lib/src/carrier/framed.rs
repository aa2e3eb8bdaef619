//! Length-prefixed carrier frames over a TCP socket: u32-LE length, then
//! the message bytes. This is the transport the standalone relay binary
//! serves; anything that can deliver discrete ordered binary messages can
//! stand in for it through [`super::channel`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{CarrierChannel, Watermark};

const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Bridge an accepted carrier socket into a [`CarrierChannel`], spawning
/// the read and write tasks that own the socket halves.
pub fn spawn(stream: TcpStream, watermark: Watermark) -> CarrierChannel {
    let (channel, transport) = super::channel(watermark);
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(read_loop(read_half, transport.inbound));
    tokio::spawn(write_loop(write_half, transport.outbound, transport.buffered));
    channel
}

async fn read_loop(mut half: OwnedReadHalf, inbound: mpsc::Sender<Bytes>) {
    loop {
        let mut len_buf = [0u8; 4];
        match half.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                debug!(error = %e, "carrier read failed");
                break;
            }
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            warn!(len, "oversized carrier frame, dropping carrier");
            break;
        }
        let mut payload = vec![0u8; len];
        if let Err(e) = half.read_exact(&mut payload).await {
            debug!(error = %e, "carrier read failed mid-frame");
            break;
        }
        if inbound.send(Bytes::from(payload)).await.is_err() {
            // Engine went away first.
            break;
        }
    }
}

async fn write_loop(
    mut half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
    buffered: Arc<AtomicUsize>,
) {
    while let Some(frame) = outbound.recv().await {
        let written = async {
            half.write_all(&(frame.len() as u32).to_le_bytes()).await?;
            half.write_all(&frame).await
        }
        .await;
        buffered.fetch_sub(frame.len(), Ordering::Relaxed);
        if let Err(e) = written {
            debug!(error = %e, "carrier write failed");
            break;
        }
    }
    let _ = half.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frames_round_trip_over_a_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            spawn(stream, Watermark::default())
        });
        let mut client = TcpStream::connect(addr).await.unwrap();
        let CarrierChannel { mut reader, sender } = accept.await.unwrap();

        // Two client frames in one write; boundaries must survive.
        let mut wire = Vec::new();
        for frame in [&b"hello"[..], &b""[..]] {
            wire.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            wire.extend_from_slice(frame);
        }
        client.write_all(&wire).await.unwrap();

        assert_eq!(reader.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(reader.recv().await.unwrap(), Bytes::from_static(b""));

        // And one server frame back out.
        sender.send(Bytes::from_static(b"pong")).await.unwrap();
        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        assert_eq!(u32::from_le_bytes(len_buf), 4);
        let mut payload = [0u8; 4];
        client.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"pong");

        // Closing the client ends the inbound message sequence.
        drop(client);
        assert!(reader.recv().await.is_none());
    }
}
