//! Filler written to defeat intermediaries that buffer partial responses.

use bytes::{Bytes, BytesMut};
use wseb_proto::command::{encode_noop_filler, TOKEN_LEN};

/// Padding requested by a downstream carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    /// No filler.
    #[default]
    None,
    /// Top the carrier up to `target` bytes once.
    ///
    /// Only the NOOP tokens count toward the target. The command frame's
    /// two framing bytes come on top, so a 6-byte gap goes out as 8 bytes.
    Shortfall {
        /// Bytes the carrier should have carried.
        target: usize,
    },
    /// Emit `size` bytes of filler whenever nothing was written since the
    /// previous check.
    Block {
        /// Filler bytes per block.
        size: usize,
    },
}

/// Number of NOOP tokens covering the gap between `written` and `target`.
/// Framing bytes are not counted.
#[must_use]
pub fn shortfall_tokens(target: usize, written: u64) -> usize {
    let shortfall = (target as u64).saturating_sub(written) as usize;
    shortfall.div_ceil(TOKEN_LEN)
}

/// Tracks padding for one writer carrier.
#[derive(Debug, Clone)]
pub struct PaddingState {
    padding: Padding,
    last_mark: Option<u64>,
}

impl PaddingState {
    /// Create padding state for a fresh carrier.
    #[must_use]
    pub const fn new(padding: Padding) -> Self {
        Self {
            padding,
            last_mark: None,
        }
    }

    /// Filler due after a drain pass that wrote nothing, given the bytes
    /// written on the carrier so far.
    pub fn filler(&mut self, written: u64) -> Option<Bytes> {
        let tokens = match self.padding {
            Padding::None => 0,
            Padding::Shortfall { target } => shortfall_tokens(target, written),
            Padding::Block { size } => {
                let stalled = self.last_mark.is_none_or(|mark| mark == written);
                if stalled { size.div_ceil(TOKEN_LEN) } else { 0 }
            }
        };
        if tokens == 0 {
            self.last_mark = Some(written);
            return None;
        }
        let mut buf = BytesMut::new();
        encode_noop_filler(tokens, &mut buf);
        Some(buf.freeze())
    }

    /// Record the byte count after the filler was written.
    pub fn mark(&mut self, written: u64) {
        self.last_mark = Some(written);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(10, 4, 3 ; "six byte gap")]
    #[test_case(10, 5, 3 ; "odd gap rounds up")]
    #[test_case(10, 10, 0 ; "met")]
    #[test_case(10, 50, 0 ; "exceeded")]
    #[test_case(0, 0, 0 ; "zero target")]
    fn test_shortfall_tokens(target: usize, written: u64, tokens: usize) {
        assert_eq!(shortfall_tokens(target, written), tokens);
    }

    #[test]
    fn test_shortfall_filler_bytes() {
        let mut state = PaddingState::new(Padding::Shortfall { target: 10 });
        let filler = state.filler(4).unwrap();
        // 3 NOOP tokens inside a command frame
        assert_eq!(&filler[..], b"\x01000000\xFF");
        assert_eq!(filler.len(), 6 + 2);
    }

    #[test]
    fn test_shortfall_met_emits_nothing() {
        let mut state = PaddingState::new(Padding::Shortfall { target: 10 });
        assert_eq!(state.filler(12), None);
    }

    #[test]
    fn test_block_only_when_stalled() {
        let mut state = PaddingState::new(Padding::Block { size: 8 });

        let first = state.filler(0).unwrap();
        assert_eq!(first.len(), 8 + 2);
        state.mark(10);

        assert!(state.filler(10).is_some());
        state.mark(20);

        // data advanced the counter since the last check
        assert_eq!(state.filler(35), None);
        assert!(state.filler(35).is_some());
    }

    #[test]
    fn test_no_padding() {
        let mut state = PaddingState::new(Padding::None);
        assert_eq!(state.filler(0), None);
    }
}
