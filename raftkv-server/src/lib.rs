pub mod error;
pub mod raft;
pub mod server;

pub use error::{Error, Result};
