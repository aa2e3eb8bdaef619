use std::io::ErrorKind;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use rand::{rng, Rng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stream::{
    pump_buffer_to_target, pump_target_to_carrier, ConnShared, StreamHandle, STREAM_BUFFER_SIZE,
};
use crate::carrier::{CarrierChannel, CarrierReader};
use crate::config::{Config, WispConfig};
use crate::dns::Resolver;
use crate::error::{Result, WispError};
use crate::net::DestSocket;
use crate::policy::{is_stream_allowed, Policy, StreamCensus};
use crate::protocol::{CloseReason, Extension, Packet, Payload, Role, StreamKind};

/// Process-wide state every connection serves against. Built once at
/// startup; changes apply to new connections only.
pub struct ServerContext {
    pub policy: Policy,
    pub resolver: Resolver,
    pub wisp: WispConfig,
}

impl ServerContext {
    pub fn new(config: &Config) -> Result<ServerContext> {
        Ok(ServerContext {
            policy: Policy::from_config(&config.policy)?,
            resolver: Resolver::new(&config.dns),
            wisp: config.wisp.clone(),
        })
    }

    /// Extensions this server advertises during the v2 handshake.
    fn advertised_extensions(&self) -> Vec<Extension> {
        let mut extensions = Vec::new();
        if self.policy.allow_udp_streams() {
            extensions.push(Extension::Udp);
        }
        if let Some(motd) = &self.wisp.motd {
            extensions.push(Extension::Motd(motd.clone()));
        }
        extensions
    }
}

/// Serve one carrier connection to completion: handshake, initial credit,
/// packet routing, teardown.
pub async fn serve_connection(ctx: Arc<ServerContext>, channel: CarrierChannel) -> Result<()> {
    let CarrierChannel { mut reader, sender } = channel;
    let shared = Arc::new(ConnShared {
        id: connection_tag(),
        carrier: sender,
        streams: DashMap::new(),
    });

    let advertised = ctx.advertised_extensions();
    let advertised_ids: Vec<u8> = advertised.iter().map(Extension::id).collect();

    if ctx.wisp.version == 2 {
        match handshake(&shared, &mut reader, advertised).await {
            Ok(negotiated) => {
                debug!(
                    conn = %shared.id,
                    udp = negotiated.iter().any(|e| matches!(e, Extension::Udp)),
                    motd = negotiated.iter().any(|e| matches!(e, Extension::Motd(_))),
                    "extensions negotiated"
                );
            }
            Err(e) => {
                warn!(conn = %shared.id, error = %e, "handshake failed");
                return Err(e);
            }
        }
    }

    // Initial credit grant on the control stream.
    shared
        .carrier
        .send(Packet::continue_credit(0, STREAM_BUFFER_SIZE).encode(Role::Server))
        .await?;

    info!(conn = %shared.id, version = ctx.wisp.version, "connection established");

    while let Some(frame) = reader.recv().await {
        match Packet::parse(&frame, Role::Client, &advertised_ids) {
            Ok(packet) => route_packet(&ctx, &shared, packet).await,
            Err(e) => warn!(conn = %shared.id, error = %e, "malformed packet, skipping"),
        }
    }

    debug!(conn = %shared.id, "carrier closed");
    shared.close_all().await;
    info!(conn = %shared.id, "connection closed");
    Ok(())
}

/// Version-2 capability handshake: advertise, then require exactly one
/// INFO back. The parse allow-list is the advertised id set, so the
/// returned list is already the negotiated intersection.
async fn handshake(
    shared: &Arc<ConnShared>,
    reader: &mut CarrierReader,
    advertised: Vec<Extension>,
) -> Result<Vec<Extension>> {
    let advertised_ids: Vec<u8> = advertised.iter().map(Extension::id).collect();
    shared
        .carrier
        .send(Packet::info(2, 0, advertised).encode(Role::Server))
        .await
        .map_err(|_| WispError::Handshake("carrier closed before INFO was sent".into()))?;

    let Some(frame) = reader.recv().await else {
        return Err(WispError::Handshake("carrier closed before the client INFO".into()));
    };

    match Packet::parse(&frame, Role::Client, &advertised_ids) {
        Ok(Packet { payload: Payload::Info { major, minor, extensions }, .. }) => {
            debug!(conn = %shared.id, major, minor, "client INFO received");
            Ok(extensions)
        }
        Ok(_) => {
            reject_handshake(shared).await;
            Err(WispError::Handshake("first client packet was not INFO".into()))
        }
        Err(e) => {
            reject_handshake(shared).await;
            Err(WispError::Handshake(format!("client INFO did not parse: {e}")))
        }
    }
}

async fn reject_handshake(shared: &Arc<ConnShared>) {
    let frame = Packet::close(0, CloseReason::InvalidInfo).encode(Role::Server);
    let _ = shared.carrier.send(frame).await;
}

async fn route_packet(ctx: &Arc<ServerContext>, shared: &Arc<ConnShared>, packet: Packet) {
    let Packet { stream_id, payload } = packet;
    match payload {
        Payload::Connect { kind, port, hostname } => {
            if stream_id == 0 {
                warn!(conn = %shared.id, "CONNECT on the control stream");
                return;
            }
            if shared.streams.contains_key(&stream_id) {
                warn!(conn = %shared.id, stream_id, "CONNECT for an id already in use");
                return;
            }
            let (data_tx, data_rx) = mpsc::channel(STREAM_BUFFER_SIZE as usize);
            let cancel = CancellationToken::new();
            shared.streams.insert(
                stream_id,
                StreamHandle {
                    hostname: hostname.clone(),
                    data_tx,
                    closed: AtomicBool::new(false),
                    cancel: cancel.clone(),
                },
            );
            info!(conn = %shared.id, stream_id, ?kind, host = %hostname, port, "stream requested");
            tokio::spawn(setup_stream(
                ctx.clone(),
                shared.clone(),
                stream_id,
                kind,
                hostname,
                port,
                data_rx,
                cancel,
            ));
        }
        Payload::Data(payload) => {
            let data_tx = match shared.streams.get(&stream_id) {
                Some(handle) => handle.data_tx.clone(),
                None => {
                    debug!(conn = %shared.id, stream_id, "DATA for unknown stream, dropping");
                    return;
                }
            };
            // Bounded buffer: awaiting here is the client→target
            // backpressure point.
            if data_tx.send(payload).await.is_err() {
                debug!(conn = %shared.id, stream_id, "stream closed mid-DATA, dropping");
            }
        }
        Payload::Continue { .. } => {
            warn!(conn = %shared.id, stream_id, "client sent CONTINUE, dropping");
        }
        Payload::Close { reason } => {
            debug!(conn = %shared.id, stream_id, ?reason, "client closed stream");
            shared.close_stream(stream_id, None).await;
        }
        Payload::Info { .. } => {
            warn!(conn = %shared.id, stream_id, "unexpected INFO, dropping");
        }
    }
}

/// Background setup for a freshly reserved stream: policy, connect, pumps.
#[allow(clippy::too_many_arguments)]
async fn setup_stream(
    ctx: Arc<ServerContext>,
    shared: Arc<ConnShared>,
    stream_id: u32,
    kind: StreamKind,
    hostname: String,
    port: u16,
    data_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    let census = census_excluding(&shared, stream_id, &hostname);
    if let Some(reason) =
        is_stream_allowed(&ctx.policy, &ctx.resolver, Some(census), kind, &hostname, port).await
    {
        warn!(conn = %shared.id, stream_id, host = %hostname, port, ?reason, "stream denied by policy");
        shared.close_stream(stream_id, Some(reason)).await;
        return;
    }

    let socket = tokio::select! {
        _ = cancel.cancelled() => return,
        result = DestSocket::connect(kind, &hostname, port, &ctx.resolver) => match result {
            Ok(socket) => socket,
            Err(e) => {
                let reason = connect_failure_reason(&e);
                warn!(conn = %shared.id, stream_id, host = %hostname, port, error = %e, "destination connect failed");
                shared.close_stream(stream_id, Some(reason)).await;
                return;
            }
        },
    };

    debug!(conn = %shared.id, stream_id, host = %hostname, port, "destination connected");
    let (dest_reader, dest_writer) = socket.split();
    tokio::spawn(pump_target_to_carrier(shared.clone(), stream_id, dest_reader, cancel));
    tokio::spawn(pump_buffer_to_target(shared.clone(), stream_id, data_rx, dest_writer));
}

fn census_excluding(shared: &ConnShared, stream_id: u32, hostname: &str) -> StreamCensus {
    let mut census = StreamCensus::default();
    for entry in shared.streams.iter() {
        if *entry.key() == stream_id {
            continue;
        }
        census.total += 1;
        if entry.value().hostname == hostname {
            census.same_host += 1;
        }
    }
    census
}

fn connect_failure_reason(err: &WispError) -> CloseReason {
    match err {
        WispError::Dns { .. } => CloseReason::UnreachableHost,
        WispError::Io(e) => match e.kind() {
            ErrorKind::ConnectionRefused => CloseReason::ConnRefused,
            ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
                CloseReason::UnreachableHost
            }
            ErrorKind::TimedOut => CloseReason::NoResponse,
            _ => CloseReason::NetworkError,
        },
        _ => CloseReason::NetworkError,
    }
}

/// Short random tag identifying a connection in logs.
fn connection_tag() -> String {
    format!("{:08x}", rng().random::<u32>())
}
