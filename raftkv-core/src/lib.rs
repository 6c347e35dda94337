//! Transport plumbing shared by the node and the client library: the framed
//! TCP connection and a re-export of the wire codec, so both sides speak the
//! same frames without depending on the codec crate directly.

mod connection;

pub use connection::Connection;

pub mod codec {
    pub use raftkv_codec::*;
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;
