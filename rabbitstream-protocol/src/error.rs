//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire bytes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    #[error("string length field {length} exceeds {remaining} remaining bytes")]
    OversizeString { length: usize, remaining: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("unknown command key {0:#06x}")]
    UnknownKey(u16),

    #[error("unsupported command version {version} for key {key:#06x}")]
    UnsupportedVersion { key: u16, version: u16 },

    #[error("unknown response code {0}")]
    UnknownResponseCode(u16),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}
