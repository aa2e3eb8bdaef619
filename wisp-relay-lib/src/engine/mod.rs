mod connection;
mod stream;

pub use connection::{serve_connection, ServerContext};
pub use stream::STREAM_BUFFER_SIZE;
