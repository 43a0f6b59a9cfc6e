//! Session errors.

use std::fmt;

use thiserror::Error;
use wseb_proto::ProtoError;

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Which bounded wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// No downstream carrier attached after create.
    Connect,
    /// No replacement writer attached after a reconnect.
    Reconnect,
    /// The peer never acknowledged our CLOSE.
    CloseHandshake,
    /// No inbound activity for the inactivity timeout.
    Inactivity,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Reconnect => "reconnect",
            Self::CloseHandshake => "close handshake",
            Self::Inactivity => "inactivity",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by a logical session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The client broke the protocol: overlapping upstream, bad method,
    /// malformed headers or frames.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A carrier declared the wrong sequence number.
    #[error("sequence mismatch: expected {expected}, got {}", display_declared(.declared.as_ref()))]
    OrderingViolation {
        /// The ordinal the session expected.
        expected: u64,
        /// The ordinal the carrier declared.
        declared: Option<u64>,
    },

    /// A carrier ended without a clean completion.
    #[error("network connectivity lost: {0}")]
    NetworkLoss(String),

    /// A bounded wait expired.
    #[error("network connectivity lost: {0} timeout")]
    Timeout(TimeoutKind),

    /// The session has already terminated.
    #[error("session closed")]
    Closed,
}

fn display_declared(declared: Option<&u64>) -> String {
    declared.map_or_else(|| "none".to_string(), ToString::to_string)
}

impl SessionError {
    /// Create a protocol violation.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation(reason.into())
    }

    /// Create a network loss.
    pub fn network(reason: impl Into<String>) -> Self {
        Self::NetworkLoss(reason.into())
    }

    /// HTTP status a carrier receives when its request fails with this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::ProtocolViolation(_) | Self::OrderingViolation { .. } => 400,
            Self::Closed => 404,
            Self::NetworkLoss(_) | Self::Timeout(_) => 500,
        }
    }
}

/// Anything a carrier body fails to decode counts as lost connectivity.
impl From<ProtoError> for SessionError {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::Io(reason) => Self::NetworkLoss(reason),
            other => Self::NetworkLoss(format!("decode failed: {other}")),
        }
    }
}
