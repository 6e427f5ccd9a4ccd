//! Link-layer interface.
//!
//! The TP1 link layer (bit timing, character framing, checksums, LL_ACK handling and telegram
//! repetition on the wire) is owned by hardware-specific driver code. This module defines the
//! interface the transport layer uses to talk to it: one buffered received telegram, one transmit
//! primitive, and a coarse bus state used to decide when it is safe to start a transmission.

use crate::address::Address;
use bitflags::bitflags;

bitflags! {
    /// Coarse state of the TP1 link layer.
    ///
    /// Driver implementations may track much finer-grained states internally; the transport layer
    /// only cares about the composites defined here.
    pub struct BusState: u8 {
        /// The bus is idle; nothing is being received or transmitted.
        const IDLE = 0b0001;

        /// A telegram is currently being received.
        const RECEIVING = 0b0010;

        /// A telegram is currently being transmitted.
        const TRANSMITTING = 0b0100;

        /// The mandatory 50-bit-time pause after a telegram, before the next reception or a
        /// pending transmission.
        const INTER_TELEGRAM_WAIT = 0b1000;

        /// States in which the link layer will accept a new telegram for transmission.
        const SAFE_TO_SEND = Self::IDLE.bits | Self::INTER_TELEGRAM_WAIT.bits;
    }
}

/// Trait for TP1 link-layer drivers.
///
/// The driver buffers at most one received telegram at a time and accepts at most one telegram
/// for transmission at a time. Completion of a transmission (after the link layer's own
/// repetitions, if no LL_ACK was received) must be reported to
/// [`Transport::finished_sending`](../transport/struct.Transport.html#method.finished_sending).
pub trait Bus {
    /// Returns whether a received telegram is waiting to be processed.
    fn telegram_received(&self) -> bool;

    /// Returns the buffered received telegram.
    ///
    /// Only valid while [`telegram_received`](#tymethod.telegram_received) returns `true`; the
    /// returned slice covers the complete frame including the checksum octet.
    fn telegram(&self) -> &[u8];

    /// Discards the buffered received telegram, freeing the buffer for the next reception.
    fn discard_received_telegram(&mut self);

    /// Returns whether a telegram handed over via [`send`](#tymethod.send) is still being
    /// transmitted.
    fn sending(&self) -> bool;

    /// Enqueues one telegram for transmission.
    ///
    /// The caller guarantees that no other transmission is in flight (`sending()` is `false`)
    /// and that [`state`](#tymethod.state) intersects [`BusState::SAFE_TO_SEND`]. The driver
    /// appends the checksum octet and handles on-wire repetition.
    fn send(&mut self, telegram: &[u8]);

    /// Returns the coarse bus state.
    fn state(&self) -> BusState;

    /// Sets the device's own individual address.
    ///
    /// The link layer needs the address to acknowledge telegrams addressed to this device with
    /// an LL_ACK.
    fn set_own_address(&mut self, addr: Address);
}
