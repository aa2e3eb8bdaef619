use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WispError};

pub const EXT_UDP: u8 = 0x01;
pub const EXT_MOTD: u8 = 0x04;

/// Which side of the protocol produced a payload being parsed or serialized.
///
/// Extension payloads are role-shaped: the server's MOTD record carries the
/// message text while the client's advertisement of the same id is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// A capability record negotiated during the version-2 handshake.
///
/// Ids the registry does not know about survive as `Opaque` when a caller
/// allow-lists them anyway; the engine never does.
#[derive(Debug, Clone, PartialEq)]
pub enum Extension {
    Udp,
    Motd(String),
    Opaque { id: u8, payload: Bytes },
}

impl Extension {
    pub fn id(&self) -> u8 {
        match self {
            Extension::Udp => EXT_UDP,
            Extension::Motd(_) => EXT_MOTD,
            Extension::Opaque { id, .. } => *id,
        }
    }
}

struct ExtensionDef {
    id: u8,
    parse: fn(Role, &[u8]) -> Result<Extension>,
    serialize: fn(Role, &Extension) -> Bytes,
}

static REGISTRY: &[ExtensionDef] = &[
    ExtensionDef { id: EXT_UDP, parse: parse_udp, serialize: serialize_udp },
    ExtensionDef { id: EXT_MOTD, parse: parse_motd, serialize: serialize_motd },
];

fn parse_udp(_role: Role, _payload: &[u8]) -> Result<Extension> {
    Ok(Extension::Udp)
}

fn serialize_udp(_role: Role, _ext: &Extension) -> Bytes {
    Bytes::new()
}

fn parse_motd(role: Role, payload: &[u8]) -> Result<Extension> {
    match role {
        Role::Server => {
            let message = std::str::from_utf8(payload)
                .map_err(|_| WispError::MalformedExtensions("MOTD is not valid UTF-8".into()))?;
            Ok(Extension::Motd(message.to_string()))
        }
        // The client advertises MOTD support with an empty payload.
        Role::Client => Ok(Extension::Motd(String::new())),
    }
}

fn serialize_motd(role: Role, ext: &Extension) -> Bytes {
    match (role, ext) {
        (Role::Server, Extension::Motd(message)) => Bytes::copy_from_slice(message.as_bytes()),
        _ => Bytes::new(),
    }
}

/// Parse an extension list produced by `role`, keeping only ids present in
/// `allowed_ids`. Records with other ids are length-consumed and skipped.
pub fn parse_extension_list(mut buf: &[u8], role: Role, allowed_ids: &[u8]) -> Result<Vec<Extension>> {
    let mut extensions = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 5 {
            return Err(WispError::MalformedExtensions(format!(
                "truncated record header ({} bytes left)",
                buf.remaining()
            )));
        }
        let id = buf.get_u8();
        let length = buf.get_u32_le() as usize;
        if length > buf.remaining() {
            return Err(WispError::MalformedExtensions(format!(
                "record 0x{id:02x} claims {length} bytes with {} remaining",
                buf.remaining()
            )));
        }
        if allowed_ids.contains(&id) {
            let payload = &buf[..length];
            match REGISTRY.iter().find(|def| def.id == id) {
                Some(def) => extensions.push((def.parse)(role, payload)?),
                None => extensions.push(Extension::Opaque { id, payload: Bytes::copy_from_slice(payload) }),
            }
        }
        buf.advance(length);
    }
    Ok(extensions)
}

/// Serialize an extension list as `role` would put it on the wire.
pub fn encode_extension_list(extensions: &[Extension], role: Role) -> Bytes {
    let mut buf = BytesMut::new();
    for ext in extensions {
        let payload = match ext {
            Extension::Opaque { payload, .. } => payload.clone(),
            _ => REGISTRY
                .iter()
                .find(|def| def.id == ext.id())
                .map(|def| (def.serialize)(role, ext))
                .unwrap_or_default(),
        };
        buf.put_u8(ext.id());
        buf.put_u32_le(payload.len() as u32);
        buf.extend_from_slice(&payload);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_list_round_trips() {
        let list = vec![Extension::Udp, Extension::Motd("hi".into())];
        let wire = encode_extension_list(&list, Role::Server);
        let parsed = parse_extension_list(&wire, Role::Server, &[EXT_UDP, EXT_MOTD]).unwrap();
        assert_eq!(parsed, list);
    }

    #[test]
    fn client_motd_payload_is_empty() {
        let wire = encode_extension_list(&[Extension::Motd("ignored".into())], Role::Client);
        assert_eq!(&wire[..], &[EXT_MOTD, 0, 0, 0, 0]);
        let parsed = parse_extension_list(&wire, Role::Client, &[EXT_MOTD]).unwrap();
        assert_eq!(parsed, vec![Extension::Motd(String::new())]);
    }

    #[test]
    fn unknown_ids_are_skipped_but_consumed() {
        let mut wire = BytesMut::new();
        wire.put_u8(0x7F);
        wire.put_u32_le(3);
        wire.extend_from_slice(b"abc");
        wire.put_u8(EXT_UDP);
        wire.put_u32_le(0);
        let parsed = parse_extension_list(&wire, Role::Client, &[EXT_UDP]).unwrap();
        assert_eq!(parsed, vec![Extension::Udp]);
    }

    #[test]
    fn allowed_unregistered_id_survives_as_opaque() {
        let mut wire = BytesMut::new();
        wire.put_u8(0x7F);
        wire.put_u32_le(2);
        wire.extend_from_slice(b"ok");
        let parsed = parse_extension_list(&wire, Role::Client, &[0x7F]).unwrap();
        assert_eq!(
            parsed,
            vec![Extension::Opaque { id: 0x7F, payload: Bytes::from_static(b"ok") }]
        );
    }

    #[test]
    fn overlong_record_is_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u8(EXT_MOTD);
        wire.put_u32_le(10);
        wire.extend_from_slice(b"short");
        let err = parse_extension_list(&wire, Role::Server, &[EXT_MOTD]).unwrap_err();
        assert!(matches!(err, WispError::MalformedExtensions(_)));
    }

    #[test]
    fn truncated_record_header_is_rejected() {
        let wire = [EXT_UDP, 0x00];
        let err = parse_extension_list(&wire, Role::Client, &[EXT_UDP]).unwrap_err();
        assert!(matches!(err, WispError::MalformedExtensions(_)));
    }
}
