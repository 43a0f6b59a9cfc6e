//! The in-band command alphabet used to control an emulated channel.
//!
//! NOOP, RECONNECT and CLOSE travel as two-byte ASCII tokens inside a
//! command frame (`0x01 <tokens> 0xFF`). PING and PONG are carried as
//! empty control frames of their own type.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::ProtoError;
use crate::frame::{put_length, COMMAND_FRAME_END, COMMAND_FRAME_START, PING_FRAME, PONG_FRAME};

/// Token for NOOP.
pub const NOOP_TOKEN: [u8; 2] = *b"00";
/// Token for RECONNECT.
pub const RECONNECT_TOKEN: [u8; 2] = *b"01";
/// Token for CLOSE.
pub const CLOSE_TOKEN: [u8; 2] = *b"02";

/// Number of bytes one command token occupies inside a command frame.
pub const TOKEN_LEN: usize = 2;

/// Size of the envelope around the tokens of a command frame.
pub const COMMAND_ENVELOPE_LEN: usize = 2;

/// A control command of the emulated channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// No operation; used for keepalive and padding.
    Noop,
    /// Liveness probe; the peer answers with PONG.
    Ping,
    /// Answer to a PING.
    Pong,
    /// Close handshake request or acknowledgement.
    Close,
    /// The current carrier is finished; open a new one.
    Reconnect,
}

impl Command {
    /// The two-byte token for commands carried inside a command frame.
    ///
    /// Returns `None` for PING and PONG which use their own frame types.
    #[must_use]
    pub const fn token(self) -> Option<[u8; 2]> {
        match self {
            Self::Noop => Some(NOOP_TOKEN),
            Self::Reconnect => Some(RECONNECT_TOKEN),
            Self::Close => Some(CLOSE_TOKEN),
            Self::Ping | Self::Pong => None,
        }
    }

    /// Parse a command token.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::UnknownCommand` for tokens outside the alphabet.
    pub fn from_token(token: [u8; 2]) -> Result<Self, ProtoError> {
        match token {
            NOOP_TOKEN => Ok(Self::Noop),
            RECONNECT_TOKEN => Ok(Self::Reconnect),
            CLOSE_TOKEN => Ok(Self::Close),
            other => Err(ProtoError::UnknownCommand(other)),
        }
    }

    /// Append the wire form of this command to `dst`.
    pub fn encode(self, dst: &mut BytesMut) {
        match self.token() {
            Some(token) => {
                dst.reserve(COMMAND_ENVELOPE_LEN + TOKEN_LEN);
                dst.put_u8(COMMAND_FRAME_START);
                dst.put_slice(&token);
                dst.put_u8(COMMAND_FRAME_END);
            }
            None => {
                let kind = if self == Self::Ping { PING_FRAME } else { PONG_FRAME };
                dst.reserve(2);
                dst.put_u8(kind);
                put_length(dst, 0);
            }
        }
    }

    /// Encoded size of this command in bytes.
    #[must_use]
    pub const fn encoded_len(self) -> usize {
        match self {
            Self::Ping | Self::Pong => 2,
            _ => COMMAND_ENVELOPE_LEN + TOKEN_LEN,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Noop => "NOOP",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Close => "CLOSE",
            Self::Reconnect => "RECONNECT",
        };
        f.write_str(name)
    }
}

/// Encode several tokenised commands into a single command frame.
///
/// PING and PONG cannot share a command frame and are written as their own
/// frames after it.
pub fn encode_commands(commands: &[Command], dst: &mut BytesMut) {
    let tokens: Vec<[u8; 2]> = commands.iter().filter_map(|c| c.token()).collect();
    if !tokens.is_empty() {
        dst.reserve(COMMAND_ENVELOPE_LEN + tokens.len() * TOKEN_LEN);
        dst.put_u8(COMMAND_FRAME_START);
        for token in &tokens {
            dst.put_slice(token);
        }
        dst.put_u8(COMMAND_FRAME_END);
    }
    for command in commands.iter().filter(|c| c.token().is_none()) {
        command.encode(dst);
    }
}

/// Encode a command frame holding `count` NOOP tokens.
///
/// Used as filler: the frame carries `count * TOKEN_LEN` filler bytes plus the
/// two envelope bytes. A `count` of zero produces no output.
pub fn encode_noop_filler(count: usize, dst: &mut BytesMut) {
    if count == 0 {
        return;
    }
    dst.reserve(COMMAND_ENVELOPE_LEN + count * TOKEN_LEN);
    dst.put_u8(COMMAND_FRAME_START);
    for _ in 0..count {
        dst.put_slice(&NOOP_TOKEN);
    }
    dst.put_u8(COMMAND_FRAME_END);
}
