mod extension;
mod packet;
mod reason;

pub use extension::{encode_extension_list, parse_extension_list, Extension, Role, EXT_MOTD, EXT_UDP};
pub use packet::{Packet, Payload, StreamKind};
pub use reason::CloseReason;
