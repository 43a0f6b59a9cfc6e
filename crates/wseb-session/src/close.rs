//! Close handshake state.

use std::fmt;

/// Which halves of the close handshake have happened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseState {
    sent: bool,
    received: bool,
}

impl CloseState {
    /// Neither side has closed.
    #[must_use]
    pub const fn open() -> Self {
        Self {
            sent: false,
            received: false,
        }
    }

    /// Record that our CLOSE was written. Returns whether the handshake is
    /// now complete.
    pub fn mark_sent(&mut self) -> bool {
        self.sent = true;
        self.is_complete()
    }

    /// Record the peer's CLOSE. Returns whether the handshake is now
    /// complete.
    pub fn mark_received(&mut self) -> bool {
        self.received = true;
        self.is_complete()
    }

    /// Our CLOSE has been written.
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        self.sent
    }

    /// The peer's CLOSE has been observed.
    #[must_use]
    pub const fn is_received(&self) -> bool {
        self.received
    }

    /// Either side has started closing.
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        self.sent || self.received
    }

    /// Both CLOSEs have been exchanged.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.sent && self.received
    }
}

impl fmt::Display for CloseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.sent, self.received) {
            (false, false) => "OPEN",
            (true, false) => "CLOSE_SENT",
            (false, true) => "CLOSE_RECEIVED",
            (true, true) => "CLOSED",
        };
        f.write_str(name)
    }
}
