use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

/// Maximum payload size of a single frame.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Writes a message as a length-prefixed bincode frame.
pub fn write_frame<T: Serialize>(message: &T, buf: &mut impl BufMut) -> Result<usize, Error> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge(payload.len()));
    }
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(payload.len() + 4)
}

/// Parses one frame from the front of the buffer, consuming it. Returns
/// `Error::Incomplete` without consuming anything if the buffer does not
/// hold a full frame yet.
pub fn read_frame<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<T, Error> {
    if buf.len() < 4 {
        return Err(Error::Incomplete);
    }
    let len = BigEndian::read_u32(&buf[..4]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge(len));
    }
    if buf.len() < 4 + len {
        return Err(Error::Incomplete);
    }
    buf.advance(4);
    let payload = buf.split_to(len);
    Ok(bincode::deserialize(&payload)?)
}
