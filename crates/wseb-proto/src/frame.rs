//! Frame encoding and incremental decoding for carrier bodies.
//!
//! ```text
//! binary   0x80 <len> <payload>
//! text     0x81 <len> <utf-8 payload>
//! command  0x01 <token>* 0xFF
//! ping     0x89 <len> <payload>
//! pong     0x8A <len> <payload>
//! ```
//!
//! Lengths are big-endian base-128 with the high bit marking continuation.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::{Command, TOKEN_LEN};
use crate::error::ProtoError;

/// Type byte of a binary data frame.
pub const BINARY_FRAME: u8 = 0x80;
/// Type byte of a text data frame.
pub const TEXT_FRAME: u8 = 0x81;
/// Type byte opening a command frame.
pub const COMMAND_FRAME_START: u8 = 0x01;
/// Byte terminating a command frame.
pub const COMMAND_FRAME_END: u8 = 0xFF;
/// Type byte of a ping frame.
pub const PING_FRAME: u8 = 0x89;
/// Type byte of a pong frame.
pub const PONG_FRAME: u8 = 0x8A;

/// Default maximum payload accepted by [`FrameDecoder`]: 1MB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Longest possible length prefix for a `u64`.
const MAX_LENGTH_BYTES: usize = 10;

/// An application message carried over the emulated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
}

impl Message {
    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode this message as a data frame.
    #[must_use]
    pub fn to_frame_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len() + 1 + MAX_LENGTH_BYTES);
        match self {
            Self::Text(text) => put_data_frame(&mut buf, TEXT_FRAME, text.as_bytes()),
            Self::Binary(data) => put_data_frame(&mut buf, BINARY_FRAME, data),
        }
        buf.freeze()
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Application data.
    Message(Message),
    /// A control command. Command frames holding several tokens decode into
    /// one `Frame::Command` per token.
    Command(Command),
}

/// Append a big-endian base-128 length prefix.
pub fn put_length(dst: &mut BytesMut, len: u64) {
    let mut groups = [0u8; MAX_LENGTH_BYTES];
    let mut count = 0;
    let mut remaining = len;
    loop {
        groups[count] = (remaining & 0x7F) as u8;
        count += 1;
        remaining >>= 7;
        if remaining == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        dst.put_u8(groups[i] | continuation);
    }
}

/// Read a length prefix. Returns the value and the number of bytes consumed,
/// or `None` if `src` ends before the prefix does.
fn read_length(src: &[u8]) -> Result<Option<(u64, usize)>, ProtoError> {
    let mut value: u64 = 0;
    for (i, byte) in src.iter().enumerate() {
        if i >= MAX_LENGTH_BYTES {
            return Err(ProtoError::InvalidLength);
        }
        value = value
            .checked_mul(128)
            .ok_or(ProtoError::InvalidLength)?
            | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if src.len() >= MAX_LENGTH_BYTES {
        return Err(ProtoError::InvalidLength);
    }
    Ok(None)
}

fn put_data_frame(dst: &mut BytesMut, kind: u8, payload: &[u8]) {
    dst.put_u8(kind);
    put_length(dst, payload.len() as u64);
    dst.put_slice(payload);
}

/// Incremental decoder for carrier bodies.
///
/// Bodies arrive in arbitrary chunks; the decoder keeps partial frames in the
/// caller's buffer until they are complete.
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
    pending: VecDeque<Command>,
}

impl FrameDecoder {
    /// Create a decoder with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder rejecting frames larger than `max_frame_size`.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            pending: VecDeque::new(),
        }
    }

    fn decode_sized(&self, src: &mut BytesMut) -> Result<Option<Frame>, ProtoError> {
        let kind = src[0];
        let Some((len, prefix)) = read_length(&src[1..])? else {
            return Ok(None);
        };
        if len > self.max_frame_size as u64 {
            return Err(ProtoError::FrameTooLarge {
                size: len,
                limit: self.max_frame_size,
            });
        }
        let header = 1 + prefix;
        // Bounded by max_frame_size above, so the cast cannot truncate.
        let total = header + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(header);
        let payload = src.split_to(total - header).freeze();
        let frame = match kind {
            BINARY_FRAME => Frame::Message(Message::Binary(payload)),
            TEXT_FRAME => {
                let text = String::from_utf8(payload.to_vec())
                    .map_err(|e| ProtoError::InvalidUtf8(e.to_string()))?;
                Frame::Message(Message::Text(text))
            }
            PING_FRAME => Frame::Command(Command::Ping),
            _ => Frame::Command(Command::Pong),
        };
        Ok(Some(frame))
    }

    fn decode_commands(&mut self, src: &mut BytesMut) -> Result<bool, ProtoError> {
        let Some(end) = src[1..].iter().position(|b| *b == COMMAND_FRAME_END) else {
            if src.len() > self.max_frame_size {
                return Err(ProtoError::FrameTooLarge {
                    size: src.len() as u64,
                    limit: self.max_frame_size,
                });
            }
            return Ok(false);
        };
        let tokens = &src[1..=end];
        if tokens.len() % TOKEN_LEN != 0 {
            return Err(ProtoError::TruncatedCommand);
        }
        for pair in tokens.chunks_exact(TOKEN_LEN) {
            self.pending
                .push_back(Command::from_token([pair[0], pair[1]])?);
        }
        src.advance(end + 2);
        Ok(true)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtoError> {
        loop {
            if let Some(command) = self.pending.pop_front() {
                return Ok(Some(Frame::Command(command)));
            }
            if src.is_empty() {
                return Ok(None);
            }
            match src[0] {
                BINARY_FRAME | TEXT_FRAME | PING_FRAME | PONG_FRAME => {
                    return self.decode_sized(src);
                }
                COMMAND_FRAME_START => {
                    if !self.decode_commands(src)? {
                        return Ok(None);
                    }
                }
                other => return Err(ProtoError::UnknownFrameType(other)),
            }
        }
    }
}

/// Encoder for frames written to a carrier.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameEncoder;

impl Encoder<Frame> for FrameEncoder {
    type Error = ProtoError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), ProtoError> {
        match item {
            Frame::Message(Message::Text(text)) => {
                put_data_frame(dst, TEXT_FRAME, text.as_bytes());
            }
            Frame::Message(Message::Binary(data)) => put_data_frame(dst, BINARY_FRAME, &data),
            Frame::Command(command) => command.encode(dst),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut FrameDecoder, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    // ==================== Length Prefix Tests ====================

    #[test]
    fn test_length_single_byte() {
        let mut buf = BytesMut::new();
        put_length(&mut buf, 127);
        assert_eq!(&buf[..], &[0x7F]);
    }

    #[test]
    fn test_length_two_bytes() {
        let mut buf = BytesMut::new();
        put_length(&mut buf, 128);
        assert_eq!(&buf[..], &[0x81, 0x00]);
        assert_eq!(read_length(&buf).unwrap(), Some((128, 2)));
    }

    #[test]
    fn test_length_incomplete() {
        assert_eq!(read_length(&[0x81]).unwrap(), None);
    }

    #[test]
    fn test_length_overlong_rejected() {
        let src = [0xFF; 11];
        assert!(matches!(read_length(&src), Err(ProtoError::InvalidLength)));
    }

    // ==================== Decoder Tests ====================

    #[test]
    fn test_decode_binary_frame() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x80, 0x03, 1, 2, 3][..]);
        let frames = decode_all(&mut decoder, &mut buf);
        assert_eq!(
            frames,
            vec![Frame::Message(Message::Binary(Bytes::from_static(&[1, 2, 3])))]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_text_frame() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x81, 0x02, b'h', b'i'][..]);
        let frames = decode_all(&mut decoder, &mut buf);
        assert_eq!(frames, vec![Frame::Message(Message::Text("hi".into()))]);
    }

    #[test]
    fn test_decode_invalid_utf8_text() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x81, 0x01, 0xC3][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtoError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_decode_partial_frame_waits() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x80, 0x04, 1, 2][..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&[3, 4]);
        assert!(decoder.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_multi_token_command_frame() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&b"\x01000102\xFF"[..]);
        let frames = decode_all(&mut decoder, &mut buf);
        assert_eq!(
            frames,
            vec![
                Frame::Command(Command::Noop),
                Frame::Command(Command::Reconnect),
                Frame::Command(Command::Close),
            ]
        );
    }

    #[test]
    fn test_decode_empty_command_frame_is_skipped() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x01, 0xFF, 0x89, 0x00][..]);
        let frames = decode_all(&mut decoder, &mut buf);
        assert_eq!(frames, vec![Frame::Command(Command::Ping)]);
    }

    #[test]
    fn test_decode_truncated_command_token() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x01, b'0', 0xFF][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtoError::TruncatedCommand)
        ));
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x42][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtoError::UnknownFrameType(0x42))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut decoder = FrameDecoder::with_max_frame_size(4);
        let mut buf = BytesMut::from(&[0x80, 0x05][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtoError::FrameTooLarge { size: 5, limit: 4 })
        ));
    }

    #[test]
    fn test_decode_ping_with_payload() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x89, 0x02, 9, 9, 0x8A, 0x00][..]);
        let frames = decode_all(&mut decoder, &mut buf);
        assert_eq!(
            frames,
            vec![Frame::Command(Command::Ping), Frame::Command(Command::Pong)]
        );
    }

    // ==================== Encoder Tests ====================

    #[test]
    fn test_message_to_frame_bytes() {
        let frame = Message::Text("abc".into()).to_frame_bytes();
        assert_eq!(&frame[..], &[0x81, 0x03, b'a', b'b', b'c']);
    }

    #[test]
    fn test_encoder_large_binary_length_prefix() {
        let mut buf = BytesMut::new();
        let payload = Bytes::from(vec![7u8; 300]);
        FrameEncoder
            .encode(Frame::Message(Message::Binary(payload)), &mut buf)
            .unwrap();
        assert_eq!(&buf[..3], &[0x80, 0x82, 0x2C]);
        assert_eq!(buf.len(), 303);
    }

    #[test]
    fn test_message_len() {
        assert_eq!(Message::from("hello").len(), 5);
        assert!(Message::Binary(Bytes::new()).is_empty());
    }
}
