#![forbid(unsafe_code)]

pub mod carrier;
pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod net;
pub mod policy;
pub mod protocol;
pub mod server;

pub use config::{load_from_path, Config};
pub use engine::{serve_connection, ServerContext, STREAM_BUFFER_SIZE};
pub use error::{Result, WispError};
pub use policy::{is_stream_allowed, Policy, StreamCensus};
pub use protocol::{CloseReason, Extension, Packet, Payload, Role, StreamKind};
