//! Wire primitives.
//!
//! All integers are big-endian, two's complement for signed values. Strings
//! are `i16` length-prefixed UTF-8 (`-1` = null, `0` = empty); byte arrays
//! are `i32` length-prefixed with the same null convention. Booleans are a
//! single byte, zero = false.
//!
//! Writers append to a [`BytesMut`] and return the number of bytes written.
//! Readers consume from any [`Buf`], so a decoded frame does not need to be
//! contiguous, and fail with [`ProtocolError::Underflow`] rather than
//! panicking on short input.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encoded size of an optional string field.
pub fn string_size(s: Option<&str>) -> usize {
    2 + s.map_or(0, str::len)
}

/// Encoded size of an optional byte-array field.
pub fn bytes_size(b: Option<&[u8]>) -> usize {
    4 + b.map_or(0, <[u8]>::len)
}

pub fn write_u8(buf: &mut BytesMut, v: u8) -> usize {
    buf.put_u8(v);
    1
}

pub fn write_u16(buf: &mut BytesMut, v: u16) -> usize {
    buf.put_u16(v);
    2
}

pub fn write_u32(buf: &mut BytesMut, v: u32) -> usize {
    buf.put_u32(v);
    4
}

pub fn write_u64(buf: &mut BytesMut, v: u64) -> usize {
    buf.put_u64(v);
    8
}

pub fn write_i16(buf: &mut BytesMut, v: i16) -> usize {
    buf.put_i16(v);
    2
}

pub fn write_i32(buf: &mut BytesMut, v: i32) -> usize {
    buf.put_i32(v);
    4
}

pub fn write_i64(buf: &mut BytesMut, v: i64) -> usize {
    buf.put_i64(v);
    8
}

pub fn write_bool(buf: &mut BytesMut, v: bool) -> usize {
    buf.put_u8(u8::from(v));
    1
}

/// Writes an optional string; `None` encodes as length `-1`.
///
/// # Panics
///
/// Panics if the string is longer than `i16::MAX` bytes. Command fields are
/// short identifiers (stream names, references); a longer value is a caller
/// bug, not a recoverable condition.
pub fn write_string(buf: &mut BytesMut, s: Option<&str>) -> usize {
    match s {
        None => write_i16(buf, -1),
        Some(s) => {
            assert!(
                s.len() <= i16::MAX as usize,
                "string field of {} bytes exceeds the i16 length prefix",
                s.len()
            );
            buf.put_i16(s.len() as i16);
            buf.put_slice(s.as_bytes());
            2 + s.len()
        }
    }
}

/// Writes an optional byte array; `None` encodes as length `-1`.
pub fn write_bytes(buf: &mut BytesMut, b: Option<&[u8]>) -> usize {
    match b {
        None => write_i32(buf, -1),
        Some(b) => {
            buf.put_i32(b.len() as i32);
            buf.put_slice(b);
            4 + b.len()
        }
    }
}

fn need(buf: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Underflow {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

pub fn read_u8(buf: &mut impl Buf) -> Result<u8, ProtocolError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut impl Buf) -> Result<u16, ProtocolError> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_u32(buf: &mut impl Buf) -> Result<u32, ProtocolError> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn read_u64(buf: &mut impl Buf) -> Result<u64, ProtocolError> {
    need(buf, 8)?;
    Ok(buf.get_u64())
}

pub fn read_i16(buf: &mut impl Buf) -> Result<i16, ProtocolError> {
    need(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn read_i32(buf: &mut impl Buf) -> Result<i32, ProtocolError> {
    need(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn read_i64(buf: &mut impl Buf) -> Result<i64, ProtocolError> {
    need(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn read_bool(buf: &mut impl Buf) -> Result<bool, ProtocolError> {
    Ok(read_u8(buf)? != 0)
}

/// Reads an optional string; length `-1` decodes as `None`.
pub fn read_string(buf: &mut impl Buf) -> Result<Option<String>, ProtocolError> {
    let len = read_i16(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::OversizeString {
            length: len,
            remaining: buf.remaining(),
        });
    }
    let raw = buf.copy_to_bytes(len);
    let s = std::str::from_utf8(&raw).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(Some(s.to_owned()))
}

/// Reads a required string; a null field decodes as the empty string.
pub fn read_string_or_empty(buf: &mut impl Buf) -> Result<String, ProtocolError> {
    Ok(read_string(buf)?.unwrap_or_default())
}

/// Reads an optional byte array; length `-1` decodes as `None`.
pub fn read_bytes(buf: &mut impl Buf) -> Result<Option<Bytes>, ProtocolError> {
    let len = read_i32(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Underflow {
            needed: len,
            remaining: buf.remaining(),
        });
    }
    Ok(Some(buf.copy_to_bytes(len)))
}
