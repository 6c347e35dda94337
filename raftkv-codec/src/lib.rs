pub mod entry;
pub mod error;
pub mod frame;
pub mod request;
pub mod response;

pub use entry::{Command, Entry};
pub use error::Error;
pub use frame::{read_frame, write_frame, MAX_FRAME_SIZE};
pub use request::Request;
pub use response::Response;
