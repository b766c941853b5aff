//! Incremental frame decoding.

use crate::error::ProtocolError;
use crate::frame::try_split_frame;
use bytes::{Bytes, BytesMut};

/// Accumulates raw socket bytes and yields complete frames.
///
/// Yielded frames are [`Bytes`] views split from the accumulation buffer:
/// the backing allocation is shared and reclaimed once the last handle is
/// dropped, so handing a frame to an async callback costs no copy.
pub struct FrameDecoder {
    buffer: BytesMut,
    frame_max: u32,
}

impl FrameDecoder {
    /// Creates a decoder with no frame size limit (the pre-tune state).
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            frame_max: 0,
        }
    }

    /// Caps inbound frames; larger length prefixes fail with
    /// [`ProtocolError::FrameTooLarge`]. Zero disables the check.
    pub fn set_frame_max(&mut self, frame_max: u32) {
        self.frame_max = frame_max;
    }

    /// Appends data received from the socket.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to extract the next complete frame.
    pub fn try_next(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        try_split_frame(&mut self.buffer, self.frame_max)
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use crate::message::{DeclarePublisher, Heartbeat, Tune};

    fn sample_stream() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_frame(&DeclarePublisher {
            correlation_id: 42,
            publisher_id: 7,
            publisher_ref: Some("p1".to_string()),
            stream: "s1".to_string(),
        }));
        bytes.extend_from_slice(&encode_frame(&Heartbeat));
        bytes.extend_from_slice(&encode_frame(&Tune {
            frame_max: 1_048_576,
            heartbeat: 60,
        }));
        bytes
    }

    fn drain(decoder: &mut FrameDecoder) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.try_next().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn single_byte_feed_yields_same_frames() {
        let bytes = sample_stream();

        let mut whole = FrameDecoder::new();
        whole.extend(&bytes);
        let expected = drain(&mut whole);

        let mut trickled = FrameDecoder::new();
        let mut got = Vec::new();
        for b in &bytes {
            trickled.extend(std::slice::from_ref(b));
            got.extend(drain(&mut trickled));
        }

        assert_eq!(got, expected);
        let sizes: Vec<usize> = got.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![19, 4, 12]);
        assert_eq!(trickled.buffered(), 0);
    }

    #[test]
    fn arbitrary_chunking_yields_same_frames() {
        let bytes = sample_stream();
        for chunk in [2usize, 3, 5, 7, 11, 13] {
            let mut decoder = FrameDecoder::new();
            let mut sizes = Vec::new();
            for piece in bytes.chunks(chunk) {
                decoder.extend(piece);
                for frame in drain(&mut decoder) {
                    sizes.push(frame.len());
                }
            }
            assert_eq!(sizes, vec![19, 4, 12], "chunk size {chunk}");
        }
    }

    #[test]
    fn frame_max_applies_after_tune() {
        let mut decoder = FrameDecoder::new();
        decoder.set_frame_max(8);
        decoder.extend(&encode_frame(&Tune {
            frame_max: 1,
            heartbeat: 1,
        }));
        assert!(matches!(
            decoder.try_next().unwrap_err(),
            ProtocolError::FrameTooLarge { size: 12, max: 8 }
        ));
    }

    #[test]
    fn clear_discards_partial_input() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x00, 0x00]);
        assert_eq!(decoder.buffered(), 2);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }
}
