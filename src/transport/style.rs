//! Transport-layer conformance profiles.
//!
//! KNX defines several "styles" of the connection-oriented transport layer that differ in how
//! they react to lost or out-of-sequence telegrams. A device implements exactly one of them,
//! selected at compile time through [`Config::Style`](../../config/trait.Config.html).

/// Capability trait describing a transport-layer conformance profile.
///
/// The state machine is shared between all profiles; the profile decides whether data telegrams
/// are retransmitted while waiting for a `T_ACK`, and whether out-of-sequence data is answered
/// with a `T_NACK` or by tearing the connection down.
pub trait Style {
    /// Whether an unacknowledged data telegram is retransmitted after the acknowledgement
    /// timeout (and on reception of a matching `T_NACK`).
    const RETRANSMITS: bool;

    /// Hard cap on the number of retransmissions of a single telegram.
    const MAX_REPETITION_COUNT: u8;

    /// Whether out-of-sequence data is answered with a `T_NACK` (keeping the connection open)
    /// instead of a disconnect.
    const SENDS_NACK: bool;
}

/// *Style 1 Rationalised*: no data retransmission, no `T_NACK`.
///
/// Recovery from loss is left entirely to the partner; anything unexpected tears the connection
/// down. This is the minimal profile mandated for mask-version-0x0012-class devices.
pub enum Style1Rationalised {}

impl Style for Style1Rationalised {
    const RETRANSMITS: bool = false;
    const MAX_REPETITION_COUNT: u8 = 0;
    const SENDS_NACK: bool = false;
}

/// *Style 3*: retransmission with an acknowledgement timeout, `T_NACK` on wrong sequence.
pub enum Style3 {}

impl Style for Style3 {
    const RETRANSMITS: bool = true;
    const MAX_REPETITION_COUNT: u8 = 3;
    const SENDS_NACK: bool = true;
}
