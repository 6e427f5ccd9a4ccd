//! Send buffers and their ownership arbitration.
//!
//! The transport layer owns three statically allocated telegram buffers: one general-purpose
//! buffer for broadcast, group and other connectionless traffic, and two buffers reserved for
//! connection-oriented data. The connection-oriented buffers are separate because a Style 3
//! telegram may have to be retransmitted seconds after it was first sent, and must not block
//! unrelated traffic in the meantime; there are two of them so that an inbound command can be
//! answered while the previous answer still waits for its `T_ACK`.
//!
//! Ownership of each buffer is tracked in an atomic token. The main loop acquires, fills and
//! hands buffers off; the transmit-completion path (interrupt context) only ever performs
//! single-word token stores and never touches buffer contents.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::transport::MAX_TELEGRAM_SIZE;

/// Ownership states of the general send buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum SendBufferState {
    /// Nobody owns the buffer; it may be acquired.
    Free = 0,
    /// The producer (application or transport layer) is filling the buffer.
    Acquired = 1,
    /// The buffer has been handed to the link layer.
    Sending = 2,
}

/// Ownership states of the two connection-oriented send buffers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectedBufferState {
    /// Nobody owns the buffer; it may be used for the next response.
    Free = 0,
    /// A response has been prepared and waits for the preceding `T_ACK` transmission to end.
    WaitAckSent = 1,
    /// The response is ready; the main loop will transmit it when the bus allows.
    WaitLoop = 2,
    /// The telegram has been handed to the link layer, or was transmitted and is being retained
    /// for a possible retransmission until the partner acknowledges it.
    Sending = 3,
}

/// An atomic ownership token.
///
/// A plain store/load cell: the protocol guarantees a single writer for each transition, the
/// atomicity only ensures the word is never observed torn between the main loop and the
/// completion interrupt.
pub(crate) struct Token(AtomicU8);

impl Token {
    const fn new(initial: u8) -> Self {
        Token(AtomicU8::new(initial))
    }

    fn load(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    fn store(&self, value: u8) {
        self.0.store(value, Ordering::Release)
    }
}

/// The general send buffer with its ownership token.
pub(crate) struct SendBuffer {
    state: Token,
    bytes: [u8; MAX_TELEGRAM_SIZE],
}

impl SendBuffer {
    pub const fn new() -> Self {
        Self {
            state: Token::new(SendBufferState::Free as u8),
            bytes: [0; MAX_TELEGRAM_SIZE],
        }
    }

    pub fn state(&self) -> SendBufferState {
        match self.state.load() {
            0 => SendBufferState::Free,
            1 => SendBufferState::Acquired,
            _ => SendBufferState::Sending,
        }
    }

    pub fn set_state(&self, state: SendBufferState) {
        self.state.store(state as u8);
    }

    /// Acquires the buffer for filling.
    ///
    /// Returns `None` while the buffer is owned by someone else; the caller retries on the next
    /// main-loop iteration.
    pub fn acquire(&mut self) -> Option<&mut [u8; MAX_TELEGRAM_SIZE]> {
        if self.state() != SendBufferState::Free {
            return None;
        }
        self.set_state(SendBufferState::Acquired);
        Some(&mut self.bytes)
    }

    pub fn bytes(&self) -> &[u8; MAX_TELEGRAM_SIZE] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; MAX_TELEGRAM_SIZE] {
        debug_assert!(self.state() != SendBufferState::Sending);
        &mut self.bytes
    }
}

/// One connection-oriented send buffer with its ownership token.
pub(crate) struct ConnectedBuffer {
    state: Token,
    bytes: [u8; MAX_TELEGRAM_SIZE],
}

impl ConnectedBuffer {
    pub const fn new() -> Self {
        Self {
            state: Token::new(ConnectedBufferState::Free as u8),
            bytes: [0; MAX_TELEGRAM_SIZE],
        }
    }

    pub fn state(&self) -> ConnectedBufferState {
        match self.state.load() {
            0 => ConnectedBufferState::Free,
            1 => ConnectedBufferState::WaitAckSent,
            2 => ConnectedBufferState::WaitLoop,
            _ => ConnectedBufferState::Sending,
        }
    }

    pub fn set_state(&self, state: ConnectedBufferState) {
        self.state.store(state as u8);
    }

    pub fn bytes(&self) -> &[u8; MAX_TELEGRAM_SIZE] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; MAX_TELEGRAM_SIZE] {
        debug_assert!(self.state() != ConnectedBufferState::Sending);
        &mut self.bytes
    }
}

/// The two connection-oriented buffers.
pub(crate) struct ConnectedBuffers {
    pub buffers: [ConnectedBuffer; 2],
}

impl ConnectedBuffers {
    pub const fn new() -> Self {
        Self {
            buffers: [ConnectedBuffer::new(), ConnectedBuffer::new()],
        }
    }

    /// Returns the index of a buffer that is free for a new response, if any.
    pub fn find_free(&self) -> Option<usize> {
        self.buffers
            .iter()
            .position(|b| b.state() == ConnectedBufferState::Free)
    }

    /// Returns the index of the buffer waiting for the main loop to transmit it, if any.
    pub fn find_pending(&self) -> Option<usize> {
        self.buffers
            .iter()
            .position(|b| b.state() == ConnectedBufferState::WaitLoop)
    }

    /// Returns the index of the buffer currently handed to the link layer or awaiting its
    /// `T_ACK`, if any. At most one buffer is ever in this state.
    pub fn find_sending(&self) -> Option<usize> {
        self.buffers
            .iter()
            .position(|b| b.state() == ConnectedBufferState::Sending)
    }

    /// Releases both buffers. Used when the connection goes away.
    pub fn release_all(&self) {
        for buffer in &self.buffers {
            buffer.set_state(ConnectedBufferState::Free);
        }
    }

    /// Moves buffers parked behind a control-telegram transmission on to the main loop.
    ///
    /// Invoked from the completion path after a `T_ACK` went out.
    pub fn ack_was_sent(&self) {
        for buffer in &self.buffers {
            if buffer.state() == ConnectedBufferState::WaitAckSent {
                buffer.set_state(ConnectedBufferState::WaitLoop);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_ownership_cycle() {
        let mut buffer = SendBuffer::new();
        assert_eq!(buffer.state(), SendBufferState::Free);

        assert!(buffer.acquire().is_some());
        assert_eq!(buffer.state(), SendBufferState::Acquired);
        // Not re-acquirable until released.
        assert!(buffer.acquire().is_none());

        buffer.set_state(SendBufferState::Sending);
        assert!(buffer.acquire().is_none());

        buffer.set_state(SendBufferState::Free);
        assert!(buffer.acquire().is_some());
    }

    #[test]
    fn connected_double_buffering() {
        let buffers = ConnectedBuffers::new();
        assert_eq!(buffers.find_free(), Some(0));

        buffers.buffers[0].set_state(ConnectedBufferState::Sending);
        assert_eq!(buffers.find_free(), Some(1));
        assert_eq!(buffers.find_sending(), Some(0));

        buffers.buffers[1].set_state(ConnectedBufferState::WaitAckSent);
        assert_eq!(buffers.find_free(), None);
        assert_eq!(buffers.find_pending(), None);

        buffers.ack_was_sent();
        assert_eq!(buffers.buffers[1].state(), ConnectedBufferState::WaitLoop);
        assert_eq!(buffers.find_pending(), Some(1));
        // The in-flight buffer is unaffected.
        assert_eq!(buffers.find_sending(), Some(0));

        buffers.release_all();
        assert_eq!(buffers.find_free(), Some(0));
        assert_eq!(buffers.find_sending(), None);
    }
}
