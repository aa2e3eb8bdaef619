mod tcp;
mod udp;

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UdpSocket;

use crate::dns::Resolver;
use crate::error::Result;
use crate::protocol::StreamKind;

const TCP_READ_BUFFER: usize = 8192;
const UDP_DATAGRAM_MAX: usize = 65535;

/// An outbound destination socket, TCP or UDP, behind one interface:
/// connect, split, send chunks, receive a stream of chunks, close.
pub enum DestSocket {
    Tcp(tokio::net::TcpStream),
    Udp(UdpSocket),
}

impl DestSocket {
    /// Resolve `hostname` through the DNS façade and connect.
    pub async fn connect(
        kind: StreamKind,
        hostname: &str,
        port: u16,
        resolver: &Resolver,
    ) -> Result<DestSocket> {
        let ip = resolver.lookup_ip(hostname).await?;
        match kind {
            StreamKind::Tcp => Ok(DestSocket::Tcp(tcp::connect(ip, port).await?)),
            StreamKind::Udp => Ok(DestSocket::Udp(udp::connect(ip, port).await?)),
        }
    }

    pub fn split(self) -> (DestReader, DestWriter) {
        match self {
            DestSocket::Tcp(stream) => {
                let (read, write) = stream.into_split();
                (DestReader::Tcp(read), DestWriter::Tcp(write))
            }
            DestSocket::Udp(socket) => {
                let socket = Arc::new(socket);
                (DestReader::Udp(socket.clone()), DestWriter::Udp(socket))
            }
        }
    }
}

/// Receive half of a destination socket.
pub enum DestReader {
    Tcp(OwnedReadHalf),
    Udp(Arc<UdpSocket>),
}

impl DestReader {
    /// Next chunk from the destination. `None` is the graceful end of a TCP
    /// stream; UDP sockets yield discrete datagrams and never end on their
    /// own.
    pub async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        match self {
            DestReader::Tcp(half) => {
                let mut buf = [0u8; TCP_READ_BUFFER];
                let n = half.read(&mut buf).await?;
                if n == 0 {
                    Ok(None)
                } else {
                    Ok(Some(Bytes::copy_from_slice(&buf[..n])))
                }
            }
            DestReader::Udp(socket) => {
                let mut buf = vec![0u8; UDP_DATAGRAM_MAX];
                let n = socket.recv(&mut buf).await?;
                buf.truncate(n);
                Ok(Some(Bytes::from(buf)))
            }
        }
    }
}

/// Send half of a destination socket.
pub enum DestWriter {
    Tcp(OwnedWriteHalf),
    Udp(Arc<UdpSocket>),
}

impl DestWriter {
    pub async fn send(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            DestWriter::Tcp(half) => half.write_all(chunk).await,
            DestWriter::Udp(socket) => {
                // One chunk, one datagram.
                socket.send(chunk).await.map(|_| ())
            }
        }
    }

    pub async fn shutdown(&mut self) {
        if let DestWriter::Tcp(half) = self {
            let _ = half.shutdown().await;
        }
    }
}
