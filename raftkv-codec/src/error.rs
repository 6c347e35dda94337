use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The buffer does not yet hold a full frame; read more bytes and retry.
    #[error("incomplete frame")]
    Incomplete,

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Malformed(err.to_string())
    }
}
