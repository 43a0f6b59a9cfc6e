//! Per-direction carrier ordinals.

use crate::error::{SessionError, SessionResult};

/// Counts carriers attached in one direction.
///
/// The counter starts at the ordinal declared on create; every carrier must
/// declare the next value when validation is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    current: u64,
    validate: bool,
}

impl SequenceCounter {
    /// Create a counter starting at `initial`.
    #[must_use]
    pub const fn new(initial: u64, validate: bool) -> Self {
        Self {
            current: initial,
            validate,
        }
    }

    /// The last accepted ordinal.
    #[must_use]
    pub const fn current(&self) -> u64 {
        self.current
    }

    /// The ordinal the next carrier must declare.
    #[must_use]
    pub const fn expected(&self) -> u64 {
        self.current.saturating_add(1)
    }

    /// Accept a carrier declaring `declared` and advance.
    ///
    /// The counter is left untouched on failure.
    ///
    /// # Errors
    ///
    /// With validation on, returns `OrderingViolation` when the declared
    /// ordinal is missing or differs from [`Self::expected`].
    pub fn advance(&mut self, declared: Option<u64>) -> SessionResult<u64> {
        let expected = self.expected();
        if self.validate && declared != Some(expected) {
            return Err(SessionError::OrderingViolation { expected, declared });
        }
        self.current = expected;
        Ok(expected)
    }
}
