//! Length-prefixed JSON framing for controller/runtime sockets.
//!
//! Each frame is a 4-byte big-endian payload length followed by the
//! JSON payload. Helpers here are transport-agnostic: synchronous
//! writers use [`write_frame`], async readers pull the length and
//! payload themselves and call [`decode`].

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Frames larger than this are treated as corrupt.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode a value into a complete frame (prefix plus payload).
pub fn encode<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    let payload = serde_json::to_vec(value).map_err(io::Error::other)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a frame payload (without the length prefix).
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> io::Result<T> {
    serde_json::from_slice(payload).map_err(io::Error::other)
}

/// Write one frame to a blocking stream.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> io::Result<()> {
    let frame = encode(value)?;
    writer.write_all(&frame)?;
    writer.flush()
}

/// Read one frame from a blocking stream.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    decode(&payload)
}
