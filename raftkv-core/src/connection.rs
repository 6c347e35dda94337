use crate::codec;
use crate::Result;
use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// A framed message stream between a client and a node. Both sides of the
/// client channel speak the same length-prefixed frames.
#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Reads one message, or None if the peer closed cleanly between frames.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            match codec::read_frame(&mut self.buffer) {
                Ok(message) => return Ok(Some(message)),
                Err(codec::Error::Incomplete) => {}
                Err(e) => return Err(e.into()),
            }

            // There is not enough buffered data to read a frame. Attempt to
            // read more data from the socket. `0` indicates end of stream.
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err("connection reset by peer".into())
                };
            }
        }
    }

    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let mut buf = BytesMut::new();
        codec::write_frame(message, &mut buf)?;
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
