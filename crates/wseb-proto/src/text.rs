//! UTF-8 text transport.
//!
//! Clients that can only exchange text bodies carry each byte as the Unicode
//! code point with the same value (U+0000..=U+00FF), UTF-8 encoded. Bytes
//! below 0x80 pass through unchanged; the rest become two-byte sequences.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtoError;

/// Content type selecting the UTF-8 text transport.
pub const TEXT_PLAIN_UTF8: &str = "text/plain;charset=utf-8";

/// Returns true if `content_type` names `text/plain` with a UTF-8 charset.
///
/// Matching ignores case and whitespace around parameters.
#[must_use]
pub fn is_utf8_text_plain(content_type: &str) -> bool {
    let mut parts = content_type.split(';').map(str::trim);
    let Some(media) = parts.next() else {
        return false;
    };
    if !media.eq_ignore_ascii_case("text/plain") {
        return false;
    }
    parts.any(|param| {
        param.split_once('=').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("charset")
                && value.trim().trim_matches('"').eq_ignore_ascii_case("utf-8")
        })
    })
}

/// Encode raw bytes for the text transport.
#[must_use]
pub fn encode_utf8_text(src: &[u8]) -> Bytes {
    let extra = src.iter().filter(|b| **b >= 0x80).count();
    let mut dst = BytesMut::with_capacity(src.len() + extra);
    for &byte in src {
        if byte < 0x80 {
            dst.put_u8(byte);
        } else {
            dst.put_u8(0xC0 | (byte >> 6));
            dst.put_u8(0x80 | (byte & 0x3F));
        }
    }
    dst.freeze()
}

/// Incremental decoder for text transport bodies.
///
/// A two-byte sequence may straddle body chunks; the lead byte is held until
/// the next chunk arrives.
#[derive(Debug, Default)]
pub struct Utf8TextDecoder {
    lead: Option<u8>,
}

impl Utf8TextDecoder {
    /// Create a new decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self { lead: None }
    }

    /// Decode `chunk`, appending the recovered bytes to `dst`.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::InvalidUtf8` for malformed sequences and for code
    /// points above U+00FF, which cannot represent a byte.
    pub fn decode(&mut self, chunk: &[u8], dst: &mut BytesMut) -> Result<(), ProtoError> {
        dst.reserve(chunk.len());
        for &byte in chunk {
            match self.lead.take() {
                Some(lead) => {
                    if byte & 0xC0 != 0x80 {
                        return Err(ProtoError::InvalidUtf8(format!(
                            "expected continuation byte, found 0x{byte:02x}"
                        )));
                    }
                    dst.put_u8(((lead & 0x03) << 6) | (byte & 0x3F));
                }
                None if byte < 0x80 => dst.put_u8(byte),
                None if byte == 0xC2 || byte == 0xC3 => self.lead = Some(byte),
                None => {
                    return Err(ProtoError::InvalidUtf8(format!(
                        "byte 0x{byte:02x} does not start a code point below U+0100"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether a lead byte is waiting for its continuation.
    #[must_use]
    pub const fn has_partial(&self) -> bool {
        self.lead.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("text/plain;charset=utf-8", true ; "canonical")]
    #[test_case("Text/Plain; Charset=UTF-8", true ; "mixed case with space")]
    #[test_case("text/plain; charset=\"utf-8\"", true ; "quoted charset")]
    #[test_case("text/plain", false ; "no charset")]
    #[test_case("text/plain;charset=windows-1252", false ; "other charset")]
    #[test_case("application/octet-stream", false ; "binary")]
    fn test_is_utf8_text_plain(content_type: &str, expected: bool) {
        assert_eq!(is_utf8_text_plain(content_type), expected);
    }

    #[test]
    fn test_encode_ascii_passthrough() {
        assert_eq!(&encode_utf8_text(b"abc")[..], b"abc");
    }

    #[test]
    fn test_encode_high_bytes() {
        assert_eq!(&encode_utf8_text(&[0x80, 0xFF])[..], &[0xC2, 0x80, 0xC3, 0xBF]);
    }

    #[test]
    fn test_decode_matches_std_utf8() {
        let all: Vec<u8> = (0u8..=255).collect();
        let encoded = encode_utf8_text(&all);
        let as_string = std::str::from_utf8(&encoded).unwrap();
        assert_eq!(as_string.chars().count(), 256);

        let mut decoder = Utf8TextDecoder::new();
        let mut out = BytesMut::new();
        decoder.decode(&encoded, &mut out).unwrap();
        assert_eq!(&out[..], &all[..]);
    }

    #[test]
    fn test_decode_split_sequence() {
        let mut decoder = Utf8TextDecoder::new();
        let mut out = BytesMut::new();
        decoder.decode(&[b'a', 0xC3], &mut out).unwrap();
        assert!(decoder.has_partial());
        decoder.decode(&[0xBF], &mut out).unwrap();
        assert!(!decoder.has_partial());
        assert_eq!(&out[..], &[b'a', 0xFF]);
    }

    #[test]
    fn test_decode_rejects_wide_code_point() {
        let mut decoder = Utf8TextDecoder::new();
        let mut out = BytesMut::new();
        // U+20AC EURO SIGN
        let result = decoder.decode("€".as_bytes(), &mut out);
        assert!(matches!(result, Err(ProtoError::InvalidUtf8(_))));
    }

    #[test]
    fn test_decode_rejects_missing_continuation() {
        let mut decoder = Utf8TextDecoder::new();
        let mut out = BytesMut::new();
        assert!(decoder.decode(&[0xC2, b'a'], &mut out).is_err());
    }
}
