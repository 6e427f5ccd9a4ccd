//! Transport layer (TL4): connection-oriented, sequenced point-to-point delivery.
//!
//! The KNX transport layer turns the lossy, shared TP1 bus into a point-to-point connection with
//! sequence numbers and acknowledgements, which the management procedures of ETS (device
//! programming, memory and property access) are built on. A device has at most one partner at a
//! time; the partner is whoever sent the last accepted `T_Connect`.
//!
//! The protocol engine is a three-state machine:
//!
//! ```notrust
//!            T_Connect                      prepared response sent
//!  CLOSED ----------------> OPEN_IDLE -----------------------------> OPEN_WAIT
//!    ^                        |    ^                                     |
//!    |  T_Disconnect, timeout |    |        T_ACK (correct seq)          |
//!    +------------------------+    +-------------------------------------+
//! ```
//!
//! Received telegrams, timer expirations and transmit completions are translated into the events
//! of KNX 2.1 3/3/4 §5.5, and the resulting actions (named `A0` through `A10` in the
//! specification) are performed by [`Transport`]. Everything runs on the device's main loop; the
//! only entry point intended for interrupt context is [`Transport::finished_sending`], which
//! performs nothing heavier than single-word stores.
//!
//! [`Transport`]: struct.Transport.html
//! [`Transport::finished_sending`]: struct.Transport.html#method.finished_sending

pub mod style;
pub mod tpdu;

mod buffer;
mod connection;
mod dedup;
mod seq_num;

pub use self::seq_num::SeqNum;

use self::buffer::{ConnectedBuffers, SendBuffer, SendBufferState};
use self::connection::Connection;
use self::dedup::RepeatFilter;
use self::style::Style;
use self::tpdu::{Destination, Tpci, Tpdu};
use crate::address::Address;
use crate::apci::ApplicationLayer;
use crate::bus::{Bus, BusState};
use crate::config::Config;
use crate::time::{Duration, Timer};
use core::fmt;

/// Maximum length of a standard frame, including the checksum octet.
pub const MAX_TELEGRAM_SIZE: usize = 23;

/// Length of a connection-control frame (`T_Connect`, `T_Disconnect`, `T_ACK`, `T_NACK`).
pub const CTRL_TELEGRAM_SIZE: usize = 8;

/// A connection is torn down after this much silence from the partner.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_millis(6000);

/// How long a Style 3 device waits for a `T_ACK` before retransmitting.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(3000);

/// The states of the transport-layer state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// No connection.
    Closed,
    /// Connected, no data telegram of ours awaiting acknowledgement.
    OpenIdle,
    /// Connected, a data telegram has been sent and its `T_ACK` is outstanding.
    OpenWait,
}

/// Diagnostic counters.
///
/// These are part of the public contract for tests and field debugging, but have no influence on
/// protocol behaviour. They wrap around at 65535 like the 16-bit counters of a BCU.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Counters {
    /// Telegrams handed to the transport layer since power-up.
    pub telegrams: u16,
    /// Telegrams dropped at the classification stage.
    pub invalid: u16,
    /// Connections torn down, for whatever reason.
    pub disconnects: u16,
    /// Link-layer repetitions of the previously processed telegram.
    pub repeated: u16,
    /// Repetitions that were dropped without any reaction.
    pub repeated_ignored: u16,
    /// `T_ACK`s re-sent in reaction to a repeated data telegram.
    pub repeated_acks: u16,
}

/// `Debug`-formats a dropped telegram as hexadecimal octets in log output.
struct HexSlice<'a>(&'a [u8]);

impl fmt::Debug for HexSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, octet) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", octet)?;
        }
        f.write_str("]")
    }
}

/// What the link layer is currently transmitting on our behalf.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum InFlight {
    None,
    /// A connection-control frame from the dedicated control buffer.
    Control,
    /// The general send buffer.
    General,
    /// One of the connection-oriented buffers.
    Connected(usize),
}

/// Implementation of the transport-layer protocol engine.
///
/// Users of this struct must provide an interface to the platform's hardware by implementing
/// [`Config`].
///
/// [`Config`]: ../config/trait.Config.html
pub struct Transport<C: Config> {
    own_addr: Address,
    timer: C::Timer,
    connection: Option<Connection>,
    filter: RepeatFilter,
    send_buffer: SendBuffer,
    connected_buffers: ConnectedBuffers,
    ctrl_buffer: [u8; MAX_TELEGRAM_SIZE],
    in_flight: InFlight,
    /// The link layer gave up on a connection-oriented telegram; converted into the
    /// acknowledgement-timeout event on the next tick.
    tx_failed: bool,
    restart_requested: bool,
    restart_ready: bool,
    counters: Counters,
}

impl<C: Config> Transport<C> {
    /// Creates a new transport layer instance.
    ///
    /// # Parameters
    ///
    /// * **`own_addr`**: The device's individual address. Also has to be configured into the bus
    ///   driver (see [`set_own_address`](#method.set_own_address)).
    /// * **`timer`**: A `Timer` implementation.
    pub fn new(own_addr: Address, timer: C::Timer) -> Self {
        trace!("new Transport, addr={}", own_addr);
        Self {
            own_addr,
            timer,
            connection: None,
            filter: RepeatFilter::new(),
            send_buffer: SendBuffer::new(),
            connected_buffers: ConnectedBuffers::new(),
            ctrl_buffer: [0; MAX_TELEGRAM_SIZE],
            in_flight: InFlight::None,
            tx_failed: false,
            restart_requested: false,
            restart_ready: false,
            counters: Counters::default(),
        }
    }

    /// Returns a reference to the timer instance used by the transport layer.
    pub fn timer(&mut self) -> &mut C::Timer {
        &mut self.timer
    }

    /// Returns our own individual address.
    pub fn own_address(&self) -> Address {
        self.own_addr
    }

    /// Sets our own individual address and forwards it to the bus driver.
    ///
    /// Normally the address is written once by ETS when the device is programmed.
    pub fn set_own_address(&mut self, bus: &mut C::Bus, addr: Address) {
        self.own_addr = addr;
        bus.set_own_address(addr);
    }

    /// Returns the individual address of the connected partner, or `None` when no connection is
    /// open.
    pub fn connected_to(&self) -> Option<Address> {
        self.connection.as_ref().map(|conn| conn.partner)
    }

    /// Returns whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Returns the current state of the protocol state machine.
    pub fn state(&self) -> TransportState {
        match &self.connection {
            None => TransportState::Closed,
            Some(conn) if conn.awaiting_ack => TransportState::OpenWait,
            Some(_) => TransportState::OpenIdle,
        }
    }

    /// Returns the diagnostic counters.
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// The transport-layer processing loop, to be called from the device's main loop.
    ///
    /// Consumes a buffered received telegram when the bus allows, evaluates the connection and
    /// acknowledgement deadlines, transmits a prepared connection-oriented response, and honours
    /// a pending restart request.
    pub fn tick(&mut self, bus: &mut C::Bus, app: &mut C::App) {
        let bus_clear = !bus.sending() && bus.state().intersects(BusState::SAFE_TO_SEND);

        if bus.telegram_received() && bus_clear {
            let mut frame = [0; MAX_TELEGRAM_SIZE];
            let received = bus.telegram();
            let len = received.len().min(MAX_TELEGRAM_SIZE);
            frame[..len].copy_from_slice(&received[..len]);
            bus.discard_received_telegram();
            self.process_telegram(bus, app, &frame[..len]);
        }

        // The rest of the tick starts transmissions, which needs a clear bus.
        if bus.sending() {
            return;
        }

        if self.tx_failed {
            self.tx_failed = false;
            self.event_ack_timeout(bus, app);
        }

        self.supervise_timeouts(bus, app);
        self.send_pending_connected(bus);

        if self.restart_requested && !self.restart_ready && !bus.sending() {
            if self.connection.is_some() {
                self.action_a06_disconnect_and_close(bus, app);
            }
            self.restart_ready = true;
        }
    }

    /// Processes one received telegram.
    ///
    /// [`tick`](#method.tick) calls this for every telegram taken off the bus; it can also be
    /// invoked directly when the main loop is organised differently. The caller must make sure
    /// that no transmission is in flight, since several of the state machine's actions send
    /// control telegrams immediately.
    pub fn process_telegram(&mut self, bus: &mut C::Bus, app: &mut C::App, telegram: &[u8]) {
        self.counters.telegrams = self.counters.telegrams.wrapping_add(1);

        let tpdu = match Tpdu::parse(telegram) {
            Ok(tpdu) => tpdu,
            Err(e) => {
                self.counters.invalid = self.counters.invalid.wrapping_add(1);
                trace!("dropping malformed telegram {:?}: {}", HexSlice(telegram), e);
                return;
            }
        };

        if self.filter.is_repetition(telegram) {
            self.counters.repeated = self.counters.repeated.wrapping_add(1);
            self.process_repeated(bus, &tpdu);
            return;
        }

        match tpdu.dst {
            Destination::Broadcast => {
                if let Some(apci) = tpdu.apci {
                    app.process_broadcast_telegram(apci, telegram);
                }
            }
            Destination::Group(group) => {
                if let Some(apci) = tpdu.apci {
                    app.process_group_telegram(apci, group, telegram);
                }
            }
            Destination::Individual(dst) if dst == self.own_addr => {
                self.process_direct(bus, app, &tpdu, telegram);
            }
            Destination::Individual(_) => {
                // Somebody else's telegram; the link layer usually filters these already.
            }
        }
    }

    /// Reaction to a bit-identical repetition of the previously processed telegram.
    ///
    /// A repeated data telegram whose sequence number we already acknowledged gets its `T_ACK`
    /// again (the first one presumably got lost), but is *not* handed to the application a second
    /// time. Everything else is dropped: re-running connect, disconnect or acknowledgement
    /// processing would corrupt the connection state, and group or broadcast repetitions would
    /// fire the application twice.
    fn process_repeated(&mut self, bus: &mut C::Bus, tpdu: &Tpdu) {
        let now = self.timer.now();

        if let (Destination::Individual(dst), Tpci::NumberedData(seq)) = (tpdu.dst, tpdu.tpci) {
            let own_addr = self.own_addr;
            let resend_ack = match &mut self.connection {
                Some(conn)
                    if dst == own_addr
                        && conn.partner == tpdu.src
                        && seq == conn.seq_recv.pred() =>
                {
                    conn.last_activity = now;
                    true
                }
                _ => false,
            };

            if resend_ack {
                self.action_a03_send_ack_again(bus, seq);
                return;
            }
        }

        trace!("ignoring repeated telegram from {}", tpdu.src);
        self.counters.repeated_ignored = self.counters.repeated_ignored.wrapping_add(1);
    }

    /// Acquires the general send buffer for a broadcast, group or other connectionless telegram.
    ///
    /// Returns `None` while the buffer is still owned by an earlier transmission; the caller
    /// retries on a later main-loop iteration, so waiting for the buffer never blocks the loop.
    pub fn acquire_send_buffer(&mut self) -> Option<&mut [u8; MAX_TELEGRAM_SIZE]> {
        self.send_buffer.acquire()
    }

    /// Transmits the telegram prepared in the buffer returned by
    /// [`acquire_send_buffer`](#method.acquire_send_buffer).
    ///
    /// The source address is stamped in here; the prepared telegram determines its own length
    /// via the length nibble in octet 5.
    pub fn send_prepared_telegram(&mut self, bus: &mut C::Bus) {
        debug_assert_eq!(self.send_buffer.state(), SendBufferState::Acquired);

        let own_addr = self.own_addr;
        tpdu::set_source_address(self.send_buffer.bytes_mut(), own_addr);
        self.send_buffer.set_state(SendBufferState::Sending);
        self.in_flight = InFlight::General;
        let len = tpdu::telegram_length(self.send_buffer.bytes());
        bus.send(&self.send_buffer.bytes()[..len]);
    }

    /// Notification that the last telegram transmission has ended.
    ///
    /// * **`successful`**: Whether the telegram went out (received an LL_ACK, possibly after the
    ///   link layer's own repetitions) or the link layer gave up.
    ///
    /// This is the one entry point that may be invoked from interrupt context (under whatever
    /// mutual exclusion the platform provides for the `Transport` instance). It only flips
    /// buffer-ownership words and a failure flag; the state machine reacts on the next tick.
    pub fn finished_sending(&mut self, successful: bool) {
        match core::mem::replace(&mut self.in_flight, InFlight::None) {
            InFlight::None => {}
            InFlight::Control => {
                // A response parked behind this control telegram (its T_ACK) may go out now.
                self.connected_buffers.ack_was_sent();
            }
            InFlight::General => {
                self.send_buffer.set_state(SendBufferState::Free);
            }
            InFlight::Connected(_) => {
                if !successful {
                    // Not even an LL_ACK; treat like a missing T_ACK.
                    self.tx_failed = true;
                }
                // On success the buffer stays `Sending`: its contents are retained for
                // retransmission until the partner's T_ACK arrives.
            }
        }
    }

    /// Latches a restart request.
    ///
    /// The request is honoured from [`tick`](#method.tick) once no transmission is in flight: an
    /// open connection is first closed with `T_DISCONNECT`, then
    /// [`restart_ready`](#method.restart_ready) turns `true` and the platform code may reset the
    /// device.
    pub fn request_restart(&mut self) {
        self.restart_requested = true;
    }

    /// Returns whether a requested restart may be performed now.
    pub fn restart_ready(&self) -> bool {
        self.restart_ready
    }

    /// Evaluates the connection and acknowledgement deadlines.
    fn supervise_timeouts(&mut self, bus: &mut C::Bus, app: &mut C::App) {
        let now = self.timer.now();

        let (idle_for, ack_outstanding_for) = match &self.connection {
            Some(conn) => (
                now.duration_since(conn.last_activity),
                conn.awaiting_ack
                    .then(|| now.duration_since(conn.last_sent)),
            ),
            None => return,
        };

        if idle_for >= CONNECTION_TIMEOUT {
            debug!("connection timeout after {}", idle_for);
            self.action_a06_disconnect_and_close(bus, app);
            return;
        }

        if C::Style::RETRANSMITS {
            if let Some(waited) = ack_outstanding_for {
                if waited >= ACK_TIMEOUT {
                    self.event_ack_timeout(bus, app);
                }
            }
        }
    }

    /// The acknowledgement-timeout event: retransmit while the repetition budget lasts, then
    /// give up and close.
    fn event_ack_timeout(&mut self, bus: &mut C::Bus, app: &mut C::App) {
        let rep_count = match &self.connection {
            Some(conn) if conn.awaiting_ack => conn.rep_count,
            _ => return,
        };

        if C::Style::RETRANSMITS && rep_count < C::Style::MAX_REPETITION_COUNT {
            self.action_a09_repeat_message(bus);
        } else {
            error!("no acknowledgement after {} transmission attempts", rep_count + 1);
            self.action_a06_disconnect_and_close(bus, app);
        }
    }
}
