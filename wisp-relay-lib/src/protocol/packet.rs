use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::extension::{encode_extension_list, parse_extension_list, Extension, Role};
use super::reason::CloseReason;
use crate::error::{Result, WispError};

const TYPE_CONNECT: u8 = 0x01;
const TYPE_DATA: u8 = 0x02;
const TYPE_CONTINUE: u8 = 0x03;
const TYPE_CLOSE: u8 = 0x04;
const TYPE_INFO: u8 = 0x05;

/// Header: one type byte plus the u32-LE stream identifier.
const HEADER_LEN: usize = 5;

/// The kind of destination flow a CONNECT requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamKind {
    Tcp = 0x01,
    Udp = 0x02,
}

impl StreamKind {
    pub fn from_u8(value: u8) -> Option<StreamKind> {
        match value {
            0x01 => Some(StreamKind::Tcp),
            0x02 => Some(StreamKind::Udp),
            _ => None,
        }
    }
}

/// Type-specific packet payload.
///
/// The hostname in CONNECT is carried raw; validation belongs to the
/// destination policy, not the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Connect { kind: StreamKind, port: u16, hostname: String },
    Data(Bytes),
    Continue { remaining: u32 },
    Close { reason: CloseReason },
    Info { major: u8, minor: u8, extensions: Vec<Extension> },
}

impl Payload {
    fn type_byte(&self) -> u8 {
        match self {
            Payload::Connect { .. } => TYPE_CONNECT,
            Payload::Data(_) => TYPE_DATA,
            Payload::Continue { .. } => TYPE_CONTINUE,
            Payload::Close { .. } => TYPE_CLOSE,
            Payload::Info { .. } => TYPE_INFO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_id: u32,
    pub payload: Payload,
}

impl Packet {
    pub fn connect(stream_id: u32, kind: StreamKind, hostname: &str, port: u16) -> Packet {
        Packet {
            stream_id,
            payload: Payload::Connect { kind, port, hostname: hostname.to_string() },
        }
    }

    pub fn data(stream_id: u32, payload: Bytes) -> Packet {
        Packet { stream_id, payload: Payload::Data(payload) }
    }

    pub fn continue_credit(stream_id: u32, remaining: u32) -> Packet {
        Packet { stream_id, payload: Payload::Continue { remaining } }
    }

    pub fn close(stream_id: u32, reason: CloseReason) -> Packet {
        Packet { stream_id, payload: Payload::Close { reason } }
    }

    /// INFO packets always ride the control stream.
    pub fn info(major: u8, minor: u8, extensions: Vec<Extension>) -> Packet {
        Packet { stream_id: 0, payload: Payload::Info { major, minor, extensions } }
    }

    /// Parse one complete carrier message as a packet produced by `role`.
    ///
    /// `allowed_ids` filters the extension list of INFO payloads; every
    /// other record is skipped but length-consumed.
    pub fn parse(frame: &[u8], role: Role, allowed_ids: &[u8]) -> Result<Packet> {
        if frame.len() < HEADER_LEN {
            return Err(WispError::MalformedPacket(format!(
                "{} bytes is shorter than the packet header",
                frame.len()
            )));
        }
        let mut buf = frame;
        let packet_type = buf.get_u8();
        let stream_id = buf.get_u32_le();
        let payload = match packet_type {
            TYPE_CONNECT => {
                if buf.remaining() < 3 {
                    return Err(WispError::MalformedPacket("truncated CONNECT payload".into()));
                }
                let kind_byte = buf.get_u8();
                let kind = StreamKind::from_u8(kind_byte).ok_or_else(|| {
                    WispError::MalformedPacket(format!("unknown stream kind {kind_byte:#04x}"))
                })?;
                let port = buf.get_u16_le();
                let hostname = std::str::from_utf8(buf)
                    .map_err(|_| WispError::MalformedPacket("hostname is not valid UTF-8".into()))?;
                Payload::Connect { kind, port, hostname: hostname.to_string() }
            }
            TYPE_DATA => Payload::Data(Bytes::copy_from_slice(buf)),
            TYPE_CONTINUE => {
                if buf.remaining() < 4 {
                    return Err(WispError::MalformedPacket("truncated CONTINUE payload".into()));
                }
                Payload::Continue { remaining: buf.get_u32_le() }
            }
            TYPE_CLOSE => {
                if buf.remaining() < 1 {
                    return Err(WispError::MalformedPacket("truncated CLOSE payload".into()));
                }
                Payload::Close { reason: CloseReason::from_u8(buf.get_u8()) }
            }
            TYPE_INFO => {
                if buf.remaining() < 2 {
                    return Err(WispError::MalformedPacket("truncated INFO payload".into()));
                }
                let major = buf.get_u8();
                let minor = buf.get_u8();
                let extensions = parse_extension_list(buf, role, allowed_ids)?;
                Payload::Info { major, minor, extensions }
            }
            other => return Err(WispError::UnknownPacketType(other)),
        };
        Ok(Packet { stream_id, payload })
    }

    /// Serialize as `role` would put this packet on the wire.
    pub fn encode(&self, role: Role) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 16);
        buf.put_u8(self.payload.type_byte());
        buf.put_u32_le(self.stream_id);
        match &self.payload {
            Payload::Connect { kind, port, hostname } => {
                buf.put_u8(*kind as u8);
                buf.put_u16_le(*port);
                buf.extend_from_slice(hostname.as_bytes());
            }
            Payload::Data(payload) => buf.extend_from_slice(payload),
            Payload::Continue { remaining } => buf.put_u32_le(*remaining),
            Payload::Close { reason } => buf.put_u8(u8::from(*reason)),
            Payload::Info { major, minor, extensions } => {
                buf.put_u8(*major);
                buf.put_u8(*minor);
                buf.extend_from_slice(&encode_extension_list(extensions, role));
            }
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EXT_MOTD, EXT_UDP};

    fn round_trip(packet: Packet, role: Role, allowed: &[u8]) {
        let wire = packet.encode(role);
        let parsed = Packet::parse(&wire, role, allowed).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn all_packet_types_round_trip() {
        round_trip(Packet::connect(1, StreamKind::Tcp, "example.com", 80), Role::Client, &[]);
        round_trip(Packet::connect(2, StreamKind::Udp, "example.com", 53), Role::Client, &[]);
        round_trip(Packet::data(7, Bytes::from_static(b"HI")), Role::Server, &[]);
        round_trip(Packet::continue_credit(0, 128), Role::Server, &[]);
        round_trip(Packet::close(9, CloseReason::HostBlocked), Role::Server, &[]);
        round_trip(
            Packet::info(2, 0, vec![Extension::Udp, Extension::Motd("hi".into())]),
            Role::Server,
            &[EXT_UDP, EXT_MOTD],
        );
    }

    #[test]
    fn connect_wire_layout_is_little_endian() {
        let wire = Packet::connect(1, StreamKind::Tcp, "example.com", 80).encode(Role::Client);
        let mut expected = vec![0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0x50, 0x00];
        expected.extend_from_slice(b"example.com");
        assert_eq!(&wire[..], &expected[..]);
    }

    #[test]
    fn connect_hostname_is_not_validated() {
        let wire = Packet::connect(3, StreamKind::Tcp, "0", 0).encode(Role::Client);
        let parsed = Packet::parse(&wire, Role::Client, &[]).unwrap();
        assert_eq!(
            parsed.payload,
            Payload::Connect { kind: StreamKind::Tcp, port: 0, hostname: "0".into() }
        );
    }

    #[test]
    fn empty_data_payload_is_legal() {
        let wire = Packet::data(4, Bytes::new()).encode(Role::Client);
        let parsed = Packet::parse(&wire, Role::Client, &[]).unwrap();
        assert_eq!(parsed.payload, Payload::Data(Bytes::new()));
    }

    #[test]
    fn short_frames_are_malformed() {
        assert!(matches!(
            Packet::parse(&[0x02, 0x01, 0x00, 0x00], Role::Client, &[]),
            Err(WispError::MalformedPacket(_))
        ));
        // CONNECT with a two-byte payload is below the type minimum.
        assert!(matches!(
            Packet::parse(&[0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0x50], Role::Client, &[]),
            Err(WispError::MalformedPacket(_))
        ));
    }

    #[test]
    fn unknown_type_is_reported() {
        let err = Packet::parse(&[0x09, 0, 0, 0, 0, 0], Role::Client, &[]).unwrap_err();
        assert!(matches!(err, WispError::UnknownPacketType(0x09)));
    }

    #[test]
    fn unknown_stream_kind_is_malformed() {
        let wire = [0x01, 0x01, 0x00, 0x00, 0x00, 0x03, 0x50, 0x00, b'x'];
        assert!(matches!(
            Packet::parse(&wire, Role::Client, &[]),
            Err(WispError::MalformedPacket(_))
        ));
    }
}
