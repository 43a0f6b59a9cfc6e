//! Error types for the wseb-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or parsing protocol data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// A frame started with a type byte the protocol does not define.
    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    /// A command frame contained a token outside the command alphabet.
    #[error("unknown command token: {0:?}")]
    UnknownCommand([u8; 2]),

    /// A command frame had an odd number of token bytes.
    #[error("truncated command token")]
    TruncatedCommand,

    /// A frame length prefix was malformed or overflowed.
    #[error("invalid frame length")]
    InvalidLength,

    /// A frame exceeded the configured maximum size.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Declared frame size.
        size: u64,
        /// Configured limit.
        limit: usize,
    },

    /// A text frame or text transport body was not valid UTF-8.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(String),

    /// A header carried a value that could not be parsed or is not permitted.
    #[error("invalid header {name}: {reason}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A required header was missing.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// I/O failure surfaced through the codec framework.
    #[error("i/o error: {0}")]
    Io(String),

    /// A query parameter carried a value that could not be parsed.
    #[error("invalid query parameter {name}: {value:?}")]
    InvalidParam {
        /// Parameter name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

impl From<std::io::Error> for ProtoError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
