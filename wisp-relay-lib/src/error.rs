use thiserror::Error;

/// Errors that can occur in the relay
#[derive(Error, Debug)]
pub enum WispError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("unknown packet type: {0:#04x}")]
    UnknownPacketType(u8),

    #[error("malformed extension list: {0}")]
    MalformedExtensions(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("DNS resolution failed for {hostname}: {message}")]
    Dns { hostname: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("carrier closed")]
    CarrierClosed,
}

pub type Result<T> = std::result::Result<T, WispError>;
