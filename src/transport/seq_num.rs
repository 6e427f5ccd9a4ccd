use core::fmt;
use core::ops::{Add, AddAssign};

/// A 4-bit telegram sequence number.
///
/// This type implements wrapping arithmetic modulo 16 (although only `+` and `+=` operators are
/// supported) matching the expected behaviour of the KNX transport layer. Host-integer
/// comparisons other than equality are meaningless for sequence numbers; use
/// [`distance`](#method.distance) instead.
#[derive(PartialEq, Eq, Copy, Clone, Default)]
pub struct SeqNum(u8);

impl SeqNum {
    /// A sequence number of 0 (default value, used directly after connecting).
    pub const ZERO: Self = SeqNum(0);

    /// A sequence number of 1.
    pub const ONE: Self = SeqNum(1);

    /// Creates a sequence number from a raw value, which must be below 16.
    pub fn new(raw: u8) -> Self {
        debug_assert!(raw < 16);
        SeqNum(raw & 0x0F)
    }

    /// Returns the raw value in range `0..16`.
    pub fn raw(&self) -> u8 {
        self.0
    }

    /// Returns the sequence number preceding `self`, wrapping around to 15 below 0.
    pub fn pred(self) -> Self {
        SeqNum(self.0.wrapping_sub(1) & 0x0F)
    }

    /// Returns how many increments it takes to get from `earlier` to `self`, modulo 16.
    ///
    /// `(a - b) mod 16` is the only legal way to compare two sequence numbers: a distance of 0
    /// means "equal", a distance of 15 means "`self` is one behind `earlier`" (a retransmission).
    pub fn distance(self, earlier: SeqNum) -> u8 {
        self.0.wrapping_sub(earlier.0) & 0x0F
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl Add for SeqNum {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        SeqNum(self.0.wrapping_add(rhs.0) & 0x0F)
    }
}

impl AddAssign for SeqNum {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_add() {
        let mut seq = SeqNum::new(15);
        seq += SeqNum::ONE;
        assert_eq!(seq, SeqNum::ZERO);
        assert_eq!(SeqNum::new(9) + SeqNum::new(9), SeqNum::new(2));
    }

    #[test]
    fn pred() {
        assert_eq!(SeqNum::ZERO.pred(), SeqNum::new(15));
        assert_eq!(SeqNum::new(7).pred(), SeqNum::new(6));
    }

    #[test]
    fn distance() {
        assert_eq!(SeqNum::new(3).distance(SeqNum::new(3)), 0);
        assert_eq!(SeqNum::new(4).distance(SeqNum::new(3)), 1);
        assert_eq!(SeqNum::new(3).distance(SeqNum::new(4)), 15);
        assert_eq!(SeqNum::ZERO.distance(SeqNum::new(15)), 1);
    }
}
