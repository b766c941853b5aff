//! Length-prefixed framing.
//!
//! Every frame on the wire is `u32 length | key | version | [correlation] |
//! body`, where the length counts every byte after itself.

use crate::error::ProtocolError;
use crate::message::Command;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encodes one command into a ready-to-send frame, outer length included.
pub fn encode_frame(cmd: &impl Command) -> BytesMut {
    let size = cmd.size_needed();
    let mut buf = BytesMut::with_capacity(4 + size);
    buf.put_u32(size as u32);
    let written = cmd.write(&mut buf);
    debug_assert_eq!(written, size, "command key {:#06x} lied about its size", cmd.key());
    buf
}

/// Extracts the next complete frame from an accumulation buffer.
///
/// Returns `Ok(None)` when more bytes are needed. A `frame_max` of zero
/// disables the size check (the pre-tune state). A zero-length payload
/// yields an empty frame; the caller forwards it like any other.
pub fn try_split_frame(
    buf: &mut BytesMut,
    frame_max: u32,
) -> Result<Option<Bytes>, ProtocolError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let payload = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if frame_max != 0 && payload > frame_max {
        return Err(ProtocolError::FrameTooLarge {
            size: payload,
            max: frame_max,
        });
    }
    let payload = payload as usize;
    if buf.len() < 4 + payload {
        return Ok(None);
    }
    buf.advance(4);
    Ok(Some(buf.split_to(payload).freeze()))
}
