//! Duplicate-telegram filter.
//!
//! The link layer repeats a telegram on the wire when it receives no LL_ACK, but a repetition
//! can also arrive after the original was received correctly (the LL_ACK itself may have been
//! corrupted). Such repetitions are bit-identical to the original except for the repeat flag in
//! the control octet, and must not be processed twice: a repeated `T_Connect` would reset the
//! sequence counters, a repeated `T_ACK` would be "unexpected" and tear the connection down, and
//! a repeated group write would fire the application twice.

use heapless::consts::U23;
use heapless::Vec;

use crate::transport::tpdu;

/// Remembers the most recently processed telegram and detects bit-identical repetitions.
pub(crate) struct RepeatFilter {
    last: Vec<u8, U23>,
}

impl RepeatFilter {
    pub fn new() -> Self {
        Self { last: Vec::new() }
    }

    /// Checks `telegram` against the stored snapshot.
    ///
    /// Returns `true` if it is a repetition of the previously processed telegram (equal length,
    /// equal bytes, ignoring the repeat flag). Otherwise the snapshot is replaced by `telegram`
    /// and `false` is returned.
    pub fn is_repetition(&mut self, telegram: &[u8]) -> bool {
        if self.matches(telegram) {
            return true;
        }

        self.last.clear();
        // The telegram was length-checked during classification, so this cannot overflow.
        self.last.extend_from_slice(telegram).ok();
        false
    }

    fn matches(&self, telegram: &[u8]) -> bool {
        if self.last.len() != telegram.len() || telegram.is_empty() {
            return false;
        }
        if tpdu::mask_repeat_flag(self.last[0]) != tpdu::mask_repeat_flag(telegram[0]) {
            return false;
        }
        self.last[1..] == telegram[1..]
    }
}
