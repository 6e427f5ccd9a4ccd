//! Connection management: the event/action state machine of KNX 2.1 3/3/4 §5.5.
//!
//! Incoming point-to-point telegrams, timeouts and transmit completions are classified into the
//! events of the specification and answered with its actions, keyed `A1` through `A10` below
//! (`A0`, "do nothing", is simply falling through). The interesting ones:
//!
//! * `A1` accept a connection: remember the partner, reset both sequence counters to 0.
//! * `A2` acknowledge in-sequence data and hand the command to the application; a response is
//!   queued into a connection-oriented buffer and transmitted once the `T_ACK` went out.
//! * `A3` re-acknowledge the previously received sequence number (the partner missed our ack).
//! * `A4` answer out-of-sequence data with `T_NACK` (Style 3 only).
//! * `A5` forget the connection and tell the application.
//! * `A6` send `T_DISCONNECT` to the partner, then `A5`. The reaction to everything that is
//!   neither expected nor recoverable.
//! * `A7`/`A8` transmit a prepared data telegram and, on its acknowledgement, advance the send
//!   sequence counter.
//! * `A9` retransmit the unacknowledged data telegram (Style 3 only).
//! * `A10` bounce a foreign device trying to interfere with an open connection by sending it
//!   `T_DISCONNECT`, without touching the connection itself.

use crate::address::Address;
use crate::apci::ApplicationLayer;
use crate::bus::{Bus, BusState};
use crate::config::Config;
use crate::time::{Instant, Timer};
use crate::transport::buffer::ConnectedBufferState;
use crate::transport::seq_num::SeqNum;
use crate::transport::style::Style;
use crate::transport::tpdu::{self, ControlFrame, Tpci, Tpdu};
use crate::transport::{InFlight, Transport};

/// State of the open connection: the partner and the two sequence counters.
///
/// The transport layer is in the `CLOSED` state exactly while no `Connection` exists, so there
/// is no representation for "connected to nobody" or for sequence counters without a
/// connection.
pub(crate) struct Connection {
    /// Individual address of the partner.
    pub partner: Address,
    /// Sequence number for the next data telegram we send.
    pub seq_send: SeqNum,
    /// Sequence number we expect on the next data telegram from the partner.
    pub seq_recv: SeqNum,
    /// How many times the current unacknowledged telegram has been retransmitted.
    pub rep_count: u8,
    /// Whether a data telegram of ours is awaiting its `T_ACK` (the `OPEN_WAIT` state).
    pub awaiting_ack: bool,
    /// Time of the last connection-oriented traffic with the partner, received or sent.
    pub last_activity: Instant,
    /// Time of the last transmission attempt of the current data telegram.
    pub last_sent: Instant,
}

impl Connection {
    pub fn new(partner: Address, now: Instant) -> Self {
        Self {
            partner,
            seq_send: SeqNum::ZERO,
            seq_recv: SeqNum::ZERO,
            rep_count: 0,
            awaiting_ack: false,
            last_activity: now,
            last_sent: now,
        }
    }
}

/// How a received acknowledgement relates to the connection state.
enum AckVerdict {
    /// No connection; ignore.
    Ignore,
    /// Sent by somebody other than the partner.
    Foreign,
    /// The expected `T_ACK`.
    Acked,
    /// A `T_NACK` we can answer by retransmitting.
    Retransmit,
    /// Anything else: unexpected, wrong sequence number, or a `T_NACK` without retransmission
    /// budget.
    Violation,
}

/// How received connection-oriented data relates to the connection state.
enum DataVerdict {
    /// Data without (or outside of) a connection.
    Unsolicited,
    /// In sequence; acknowledge and deliver.
    InSequence,
    /// The sequence number we already acknowledged; acknowledge again, do not deliver.
    Repetition,
    /// Neither current nor previous sequence number.
    OutOfSequence,
}

impl<C: Config> Transport<C> {
    /// Routes a point-to-point telegram addressed to this device.
    pub(crate) fn process_direct(
        &mut self,
        bus: &mut C::Bus,
        app: &mut C::App,
        tpdu: &Tpdu,
        telegram: &[u8],
    ) {
        match tpdu.tpci {
            Tpci::Connect => self.process_connect(bus, tpdu.src),
            Tpci::Disconnect => self.process_disconnect(app, tpdu.src),
            Tpci::Ack(seq) => self.process_acknowledgment(bus, app, tpdu.src, seq, false),
            Tpci::Nack(seq) => self.process_acknowledgment(bus, app, tpdu.src, seq, true),
            Tpci::NumberedData(seq) => {
                self.process_connected_data(bus, app, tpdu, telegram, seq)
            }
            Tpci::UnnumberedData => {
                // Connectionless point-to-point data; management requires a connection.
                trace!("ignoring connectionless data from {}", tpdu.src);
            }
        }
    }

    /// `T_Connect`: accept from anyone while closed, re-initialise for the current partner, and
    /// bounce everybody else.
    fn process_connect(&mut self, bus: &mut C::Bus, src: Address) {
        match &self.connection {
            Some(conn) if conn.partner != src => self.action_a10_disconnect(bus, src),
            _ => self.action_a01_connect(src),
        }
    }

    /// `T_Disconnect`: only the partner's counts; anybody else's is dropped, since answering it
    /// could ping-pong disconnects between two devices that are each connected elsewhere.
    fn process_disconnect(&mut self, app: &mut C::App, src: Address) {
        match &self.connection {
            Some(conn) if conn.partner == src => self.action_a05_disconnect_user(app),
            _ => {}
        }
    }

    /// `T_ACK` / `T_NACK` handling, KNX 2.1 3/3/4 §5.5 events E03/E05.
    fn process_acknowledgment(
        &mut self,
        bus: &mut C::Bus,
        app: &mut C::App,
        src: Address,
        seq: SeqNum,
        is_nack: bool,
    ) {
        let now = self.timer.now();

        let verdict = match &mut self.connection {
            None => AckVerdict::Ignore,
            Some(conn) if conn.partner != src => AckVerdict::Foreign,
            Some(conn) => {
                conn.last_activity = now;
                if !conn.awaiting_ack || seq != conn.seq_send {
                    AckVerdict::Violation
                } else if !is_nack {
                    AckVerdict::Acked
                } else if C::Style::RETRANSMITS && conn.rep_count < C::Style::MAX_REPETITION_COUNT
                {
                    AckVerdict::Retransmit
                } else {
                    AckVerdict::Violation
                }
            }
        };

        match verdict {
            AckVerdict::Ignore => {}
            AckVerdict::Foreign => self.action_a10_disconnect(bus, src),
            AckVerdict::Acked => self.action_a08_increment_sequence(),
            AckVerdict::Retransmit => self.action_a09_repeat_message(bus),
            AckVerdict::Violation => self.action_a06_disconnect_and_close(bus, app),
        }
    }

    /// `T_Data_Connected` handling, events E02/E04.
    fn process_connected_data(
        &mut self,
        bus: &mut C::Bus,
        app: &mut C::App,
        tpdu: &Tpdu,
        telegram: &[u8],
        seq: SeqNum,
    ) {
        let now = self.timer.now();

        let verdict = match &mut self.connection {
            None => DataVerdict::Unsolicited,
            Some(conn) if conn.partner != tpdu.src => DataVerdict::Unsolicited,
            Some(conn) => {
                conn.last_activity = now;
                if seq == conn.seq_recv {
                    DataVerdict::InSequence
                } else if seq == conn.seq_recv.pred() {
                    DataVerdict::Repetition
                } else {
                    DataVerdict::OutOfSequence
                }
            }
        };

        match verdict {
            DataVerdict::Unsolicited => self.action_a10_disconnect(bus, tpdu.src),
            DataVerdict::InSequence => {
                self.action_a02_send_ack_and_process(bus, app, tpdu, telegram, seq)
            }
            DataVerdict::Repetition => self.action_a03_send_ack_again(bus, seq),
            DataVerdict::OutOfSequence => {
                if C::Style::SENDS_NACK {
                    self.action_a04_send_nack(bus, seq);
                } else {
                    self.action_a06_disconnect_and_close(bus, app);
                }
            }
        }
    }

    /// `A1`: accept the connection and reset the sequence counters.
    fn action_a01_connect(&mut self, src: Address) {
        debug!("connected to {}", src);
        // A repeated connect re-initialises; a half-prepared response from the previous
        // incarnation must not leak into the new one.
        self.connected_buffers.release_all();
        let now = self.timer.now();
        self.connection = Some(Connection::new(src, now));
    }

    /// `A2`: acknowledge in-sequence data, deliver the command, queue the response.
    fn action_a02_send_ack_and_process(
        &mut self,
        bus: &mut C::Bus,
        app: &mut C::App,
        tpdu: &Tpdu,
        telegram: &[u8],
        seq: SeqNum,
    ) {
        let partner = tpdu.src;

        // Prepare the response before the T_ACK is handed to the link layer: its completion
        // notification is what releases the response for transmission, and it can preempt us.
        if let Some(apci) = tpdu.apci {
            match self.connected_buffers.find_free() {
                Some(index) => {
                    let buffer = &mut self.connected_buffers.buffers[index];
                    tpdu::init_connected_response(buffer.bytes_mut(), partner);
                    if app.process_apci(apci, telegram, buffer.bytes_mut()) {
                        buffer.set_state(ConnectedBufferState::WaitAckSent);
                    }
                }
                None => {
                    // The partner will retransmit and retry the exchange.
                    warn!("both connected buffers busy, response to {:?} dropped", apci);
                }
            }
        }

        if let Some(conn) = &mut self.connection {
            conn.seq_recv += SeqNum::ONE;
        }
        self.send_control(bus, partner, Tpci::Ack(seq));
    }

    /// `A3`: re-send the `T_ACK` for the previously received sequence number.
    pub(crate) fn action_a03_send_ack_again(&mut self, bus: &mut C::Bus, seq: SeqNum) {
        self.counters.repeated_acks = self.counters.repeated_acks.wrapping_add(1);
        if let Some(partner) = self.connected_to() {
            self.send_control(bus, partner, Tpci::Ack(seq));
        }
    }

    /// `A4`: answer out-of-sequence data with `T_NACK` carrying the received sequence number.
    fn action_a04_send_nack(&mut self, bus: &mut C::Bus, seq: SeqNum) {
        if let Some(partner) = self.connected_to() {
            self.send_control(bus, partner, Tpci::Nack(seq));
        }
    }

    /// `A5`: drop the connection and notify the application.
    pub(crate) fn action_a05_disconnect_user(&mut self, app: &mut C::App) {
        if let Some(conn) = self.connection.take() {
            debug!("disconnected from {}", conn.partner);
            self.connected_buffers.release_all();
            self.counters.disconnects = self.counters.disconnects.wrapping_add(1);
            app.connection_lost();
        }
    }

    /// `A6`: send `T_DISCONNECT` to the partner, then `A5`.
    pub(crate) fn action_a06_disconnect_and_close(&mut self, bus: &mut C::Bus, app: &mut C::App) {
        if let Some(partner) = self.connected_to() {
            info!("closing connection to {}", partner);
            self.send_control(bus, partner, Tpci::Disconnect);
        }
        self.action_a05_disconnect_user(app);
    }

    /// `A7`: transmit the prepared connection-oriented telegram, entering `OPEN_WAIT`.
    ///
    /// Called from the main-loop tick once a response is parked in `WaitLoop`, no earlier
    /// telegram of ours awaits its acknowledgement, and the bus accepts a transmission.
    pub(crate) fn send_pending_connected(&mut self, bus: &mut C::Bus) {
        if bus.sending() || !bus.state().intersects(BusState::SAFE_TO_SEND) {
            return;
        }

        let seq_send = match &self.connection {
            Some(conn) if !conn.awaiting_ack => conn.seq_send,
            _ => return,
        };
        let index = match self.connected_buffers.find_pending() {
            Some(index) => index,
            None => return,
        };

        let own_addr = self.own_addr;
        {
            let bytes = self.connected_buffers.buffers[index].bytes_mut();
            tpdu::set_tpci(bytes, Tpci::NumberedData(seq_send));
            tpdu::set_source_address(bytes, own_addr);
        }

        let buffer = &self.connected_buffers.buffers[index];
        buffer.set_state(ConnectedBufferState::Sending);
        self.in_flight = InFlight::Connected(index);
        let len = tpdu::telegram_length(buffer.bytes());
        trace!("-> data seq={} to partner", seq_send);
        bus.send(&buffer.bytes()[..len]);

        let now = self.timer.now();
        if let Some(conn) = &mut self.connection {
            conn.awaiting_ack = true;
            conn.last_sent = now;
            conn.last_activity = now;
        }
    }

    /// `A8`: the partner acknowledged; advance the send sequence and release the telegram.
    fn action_a08_increment_sequence(&mut self) {
        if let Some(conn) = &mut self.connection {
            conn.seq_send += SeqNum::ONE;
            conn.awaiting_ack = false;
            conn.rep_count = 0;
        }
        if let Some(index) = self.connected_buffers.find_sending() {
            self.connected_buffers.buffers[index].set_state(ConnectedBufferState::Free);
        }
    }

    /// `A9`: retransmit the unacknowledged telegram.
    pub(crate) fn action_a09_repeat_message(&mut self, bus: &mut C::Bus) {
        let index = match self.connected_buffers.find_sending() {
            Some(index) => index,
            None => return,
        };

        let now = self.timer.now();
        if let Some(conn) = &mut self.connection {
            conn.rep_count += 1;
            conn.last_sent = now;
            conn.last_activity = now;
            trace!("repeating data telegram, attempt {}", conn.rep_count);
        }

        let buffer = &self.connected_buffers.buffers[index];
        self.in_flight = InFlight::Connected(index);
        let len = tpdu::telegram_length(buffer.bytes());
        bus.send(&buffer.bytes()[..len]);
    }

    /// `A10`: refuse a foreign device with `T_DISCONNECT`, leaving the connection untouched.
    fn action_a10_disconnect(&mut self, bus: &mut C::Bus, addr: Address) {
        debug!("bouncing {}", addr);
        self.send_control(bus, addr, Tpci::Disconnect);
    }

    /// Encodes and transmits a connection-control frame with system priority.
    fn send_control(&mut self, bus: &mut C::Bus, dst: Address, tpci: Tpci) {
        let len = tpdu::encode_control(
            ControlFrame {
                src: self.own_addr,
                dst,
                tpci,
            },
            &mut self.ctrl_buffer,
        );
        self.in_flight = InFlight::Control;
        trace!("-> {:?} to {}", tpci, dst);
        bus.send(&self.ctrl_buffer[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apci::ApciCommand;
    use crate::bus::BusState;
    use crate::time::{Instant, Timer};
    use crate::transport::style::{Style1Rationalised, Style3};
    use crate::transport::{Counters, Transport, TransportState, CTRL_TELEGRAM_SIZE};
    use core::cell::Cell;
    use std::vec::Vec;

    const OWN: u16 = 0x1101;
    const PARTNER: u16 = 0x1102;
    const OTHER: u16 = 0x1103;

    struct MockTimer {
        now: Cell<u32>,
    }

    impl MockTimer {
        fn advance(&self, millis: u32) {
            self.now.set(self.now.get() + millis);
        }
    }

    impl Timer for MockTimer {
        fn now(&self) -> Instant {
            Instant::from_raw_millis(self.now.get())
        }
    }

    #[derive(Default)]
    struct MockBus {
        sent: Vec<Vec<u8>>,
    }

    impl crate::bus::Bus for MockBus {
        fn telegram_received(&self) -> bool {
            false
        }

        fn telegram(&self) -> &[u8] {
            &[]
        }

        fn discard_received_telegram(&mut self) {}

        fn sending(&self) -> bool {
            false
        }

        fn send(&mut self, telegram: &[u8]) {
            self.sent.push(telegram.to_vec());
        }

        fn state(&self) -> BusState {
            BusState::IDLE
        }

        fn set_own_address(&mut self, _addr: crate::address::Address) {}
    }

    #[derive(Default)]
    struct MockApp {
        upcalls: Vec<ApciCommand>,
        disconnects: usize,
        /// When set, `process_apci` answers with a device-descriptor response.
        respond: bool,
    }

    impl crate::apci::ApplicationLayer for MockApp {
        fn process_group_telegram(
            &mut self,
            apci: ApciCommand,
            _group: crate::address::GroupAddress,
            _telegram: &[u8],
        ) -> bool {
            self.upcalls.push(apci);
            true
        }

        fn process_broadcast_telegram(&mut self, apci: ApciCommand, _telegram: &[u8]) -> bool {
            self.upcalls.push(apci);
            true
        }

        fn process_apci(
            &mut self,
            apci: ApciCommand,
            _telegram: &[u8],
            response: &mut [u8],
        ) -> bool {
            self.upcalls.push(apci);
            if self.respond {
                tpdu::set_apci(response, ApciCommand::DeviceDescriptorResponse);
                response[5] = (response[5] & 0xF0) | 3;
                response[8] = 0x07;
                response[9] = 0xB0;
            }
            self.respond
        }

        fn connection_lost(&mut self) {
            self.disconnects += 1;
        }
    }

    enum Style3Config {}

    impl crate::config::Config for Style3Config {
        type Timer = MockTimer;
        type Bus = MockBus;
        type App = MockApp;
        type Style = Style3;
    }

    enum Style1Config {}

    impl crate::config::Config for Style1Config {
        type Timer = MockTimer;
        type Bus = MockBus;
        type App = MockApp;
        type Style = Style1Rationalised;
    }

    fn setup<C>() -> (Transport<C>, MockBus, MockApp)
    where
        C: crate::config::Config<Timer = MockTimer, Bus = MockBus, App = MockApp>,
    {
        let transport = Transport::new(
            Address::from_raw(OWN),
            MockTimer { now: Cell::new(0) },
        );
        (transport, MockBus::default(), MockApp::default())
    }

    fn split(addr: u16) -> (u8, u8) {
        ((addr >> 8) as u8, addr as u8)
    }

    fn connect_from(src: u16) -> Vec<u8> {
        let (sh, sl) = split(src);
        let (dh, dl) = split(OWN);
        std::vec![0xB0, sh, sl, dh, dl, 0x60, 0x80, 0x00]
    }

    fn disconnect_from(src: u16) -> Vec<u8> {
        let (sh, sl) = split(src);
        let (dh, dl) = split(OWN);
        std::vec![0xB0, sh, sl, dh, dl, 0x60, 0x81, 0x00]
    }

    fn ack_from(src: u16, seq: u8) -> Vec<u8> {
        let (sh, sl) = split(src);
        let (dh, dl) = split(OWN);
        std::vec![0xB0, sh, sl, dh, dl, 0x60, 0xC2 | (seq << 2), 0x00]
    }

    fn nack_from(src: u16, seq: u8) -> Vec<u8> {
        let (sh, sl) = split(src);
        let (dh, dl) = split(OWN);
        std::vec![0xB0, sh, sl, dh, dl, 0x60, 0xC3 | (seq << 2), 0x00]
    }

    /// `T_Data_Connected` carrying a `DeviceDescriptor_Read`.
    fn descriptor_read_from(src: u16, seq: u8) -> Vec<u8> {
        let (sh, sl) = split(src);
        let (dh, dl) = split(OWN);
        std::vec![0xB0, sh, sl, dh, dl, 0x61, 0x40 | (seq << 2) | 0x03, 0x00, 0x00]
    }

    fn expect_control(frame: &[u8], dst: u16, tpci: u8) {
        assert_eq!(frame.len(), CTRL_TELEGRAM_SIZE);
        let (oh, ol) = split(OWN);
        let (dh, dl) = split(dst);
        assert_eq!(frame, &[0xB0, oh, ol, dh, dl, 0x60, tpci, 0x00]);
    }

    /// Drives the connect + descriptor-read + response exchange up to `OPEN_WAIT`.
    fn open_and_respond<C>(
        transport: &mut Transport<C>,
        bus: &mut MockBus,
        app: &mut MockApp,
    ) where
        C: crate::config::Config<Timer = MockTimer, Bus = MockBus, App = MockApp>,
    {
        app.respond = true;
        transport.process_telegram(bus, app, &connect_from(PARTNER));
        assert_eq!(transport.state(), TransportState::OpenIdle);

        transport.process_telegram(bus, app, &descriptor_read_from(PARTNER, 0));
        expect_control(&bus.sent[0], PARTNER, 0xC2);
        assert_eq!(app.upcalls, &[ApciCommand::DeviceDescriptorRead]);

        // T_ACK transmission completes, which releases the queued response; the next tick
        // transmits it.
        transport.finished_sending(true);
        transport.tick(bus, app);
        assert_eq!(transport.state(), TransportState::OpenWait);
        assert_eq!(bus.sent.len(), 2);

        let response = &bus.sent[1];
        let (oh, ol) = split(OWN);
        let (ph, pl) = split(PARTNER);
        assert_eq!(
            response.as_slice(),
            &[0xB0, oh, ol, ph, pl, 0x63, 0x40 | 0x03, 0x40, 0x07, 0xB0, 0x00][..]
        );
        // The response transmission is still in flight; the test decides how it ends.
    }

    #[test]
    fn connect_and_data_exchange() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(transport.connected_to(), None);

        open_and_respond(&mut transport, &mut bus, &mut app);
        transport.finished_sending(true);
        assert_eq!(transport.connected_to(), Some(Address::from_raw(PARTNER)));

        // The partner acknowledges with the matching sequence number.
        transport.process_telegram(&mut bus, &mut app, &ack_from(PARTNER, 0));
        assert_eq!(transport.state(), TransportState::OpenIdle);

        // The next exchange uses the next receive and send sequence numbers.
        transport.process_telegram(&mut bus, &mut app, &descriptor_read_from(PARTNER, 1));
        expect_control(&bus.sent[2], PARTNER, 0xC2 | (1 << 2));
        transport.finished_sending(true);
        transport.tick(&mut bus, &mut app);
        // Response now goes out with send sequence number 1.
        assert_eq!(bus.sent[3][6], 0x40 | (1 << 2) | 0x03);
        assert_eq!(app.disconnects, 0);
    }

    #[test]
    fn reconnect_resets_counters() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        open_and_respond(&mut transport, &mut bus, &mut app);
        transport.finished_sending(true);
        transport.process_telegram(&mut bus, &mut app, &ack_from(PARTNER, 0));

        // A new T_Connect from the same partner starts over at sequence number 0.
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));
        assert_eq!(transport.state(), TransportState::OpenIdle);
        let before = bus.sent.len();
        transport.process_telegram(&mut bus, &mut app, &descriptor_read_from(PARTNER, 0));
        expect_control(&bus.sent[before], PARTNER, 0xC2);
    }

    #[test]
    fn wrong_sequence_closes_style1() {
        let (mut transport, mut bus, mut app) = setup::<Style1Config>();
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));

        transport.process_telegram(&mut bus, &mut app, &descriptor_read_from(PARTNER, 3));
        expect_control(&bus.sent[0], PARTNER, 0x81);
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(app.upcalls.is_empty());
        assert_eq!(app.disconnects, 1);
    }

    #[test]
    fn wrong_sequence_nacks_style3() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));

        transport.process_telegram(&mut bus, &mut app, &descriptor_read_from(PARTNER, 3));
        expect_control(&bus.sent[0], PARTNER, 0xC3 | (3 << 2));
        assert_eq!(transport.state(), TransportState::OpenIdle);
        assert!(app.upcalls.is_empty());
    }

    #[test]
    fn duplicate_data_is_acked_but_not_delivered() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        app.respond = false;
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));

        transport.process_telegram(&mut bus, &mut app, &descriptor_read_from(PARTNER, 0));
        expect_control(&bus.sent[0], PARTNER, 0xC2);
        transport.finished_sending(true);

        // The identical frame again: the T_ACK is repeated, the application is not invoked a
        // second time.
        transport.process_telegram(&mut bus, &mut app, &descriptor_read_from(PARTNER, 0));
        expect_control(&bus.sent[1], PARTNER, 0xC2);
        assert_eq!(app.upcalls, &[ApciCommand::DeviceDescriptorRead]);

        let counters = transport.counters();
        assert_eq!(counters.repeated, 1);
        assert_eq!(counters.repeated_acks, 1);
        assert_eq!(counters.repeated_ignored, 0);
    }

    #[test]
    fn repeated_control_telegram_is_dropped() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));

        // The link layer delivers the T_Connect again, with the repeat flag set.
        let mut repeated = connect_from(PARTNER);
        repeated[0] &= !0x20;
        transport.process_telegram(&mut bus, &mut app, &repeated);

        assert_eq!(transport.state(), TransportState::OpenIdle);
        assert_eq!(transport.counters().repeated_ignored, 1);
        assert_eq!(bus.sent.len(), 0);
    }

    #[test]
    fn foreign_partner_is_bounced() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));

        // Data from a third device: T_DISCONNECT to the intruder, connection untouched.
        transport.process_telegram(&mut bus, &mut app, &descriptor_read_from(OTHER, 0));
        expect_control(&bus.sent[0], OTHER, 0x81);
        assert_eq!(transport.state(), TransportState::OpenIdle);
        assert_eq!(transport.connected_to(), Some(Address::from_raw(PARTNER)));
        assert!(app.upcalls.is_empty());

        // Same for a connect attempt.
        transport.process_telegram(&mut bus, &mut app, &connect_from(OTHER));
        expect_control(&bus.sent[1], OTHER, 0x81);
        assert_eq!(transport.connected_to(), Some(Address::from_raw(PARTNER)));

        // A foreign disconnect is dropped without an answer.
        transport.process_telegram(&mut bus, &mut app, &disconnect_from(OTHER));
        assert_eq!(bus.sent.len(), 2);
        assert_eq!(transport.state(), TransportState::OpenIdle);
    }

    #[test]
    fn unsolicited_data_is_bounced_while_closed() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        transport.process_telegram(&mut bus, &mut app, &descriptor_read_from(PARTNER, 0));
        expect_control(&bus.sent[0], PARTNER, 0x81);
        assert_eq!(transport.state(), TransportState::Closed);

        // An unsolicited T_ACK, in contrast, is ignored.
        transport.process_telegram(&mut bus, &mut app, &ack_from(PARTNER, 0));
        assert_eq!(bus.sent.len(), 1);
    }

    #[test]
    fn partner_disconnect_notifies_app() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));
        transport.process_telegram(&mut bus, &mut app, &disconnect_from(PARTNER));

        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(transport.connected_to(), None);
        assert_eq!(app.disconnects, 1);
        assert_eq!(transport.counters().disconnects, 1);
        // A5 answers nothing on the bus.
        assert_eq!(bus.sent.len(), 0);
    }

    #[test]
    fn connection_timeout_disconnects() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));

        transport.timer().advance(5_999);
        transport.tick(&mut bus, &mut app);
        assert_eq!(transport.state(), TransportState::OpenIdle);

        transport.timer().advance(1);
        transport.tick(&mut bus, &mut app);
        expect_control(&bus.sent[0], PARTNER, 0x81);
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(app.disconnects, 1);
    }

    #[test]
    fn traffic_resets_connection_timeout() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));

        transport.timer().advance(4_000);
        transport.process_telegram(&mut bus, &mut app, &descriptor_read_from(PARTNER, 0));
        transport.finished_sending(true);

        transport.timer().advance(4_000);
        transport.tick(&mut bus, &mut app);
        // 8s since connect, but only 4s since the last telegram.
        assert_eq!(transport.state(), TransportState::OpenIdle);
    }

    #[test]
    fn ack_timeout_retransmits_then_gives_up() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        open_and_respond(&mut transport, &mut bus, &mut app);
        transport.finished_sending(true);
        let response = bus.sent[1].clone();

        for repetition in 1..=3usize {
            transport.timer().advance(3_000);
            transport.tick(&mut bus, &mut app);
            assert_eq!(transport.state(), TransportState::OpenWait);
            assert_eq!(bus.sent.len(), 2 + repetition);
            assert_eq!(*bus.sent.last().unwrap(), response);
            transport.finished_sending(true);
        }

        // The repetition budget is exhausted; the next timeout tears the connection down.
        transport.timer().advance(3_000);
        transport.tick(&mut bus, &mut app);
        expect_control(&bus.sent.last().unwrap(), PARTNER, 0x81);
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(app.disconnects, 1);
    }

    #[test]
    fn nack_triggers_retransmission() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        open_and_respond(&mut transport, &mut bus, &mut app);
        transport.finished_sending(true);
        let response = bus.sent[1].clone();

        transport.process_telegram(&mut bus, &mut app, &nack_from(PARTNER, 0));
        assert_eq!(transport.state(), TransportState::OpenWait);
        assert_eq!(*bus.sent.last().unwrap(), response);
        transport.finished_sending(true);

        // The retransmission gets through this time.
        transport.process_telegram(&mut bus, &mut app, &ack_from(PARTNER, 0));
        assert_eq!(transport.state(), TransportState::OpenIdle);
    }

    #[test]
    fn nack_closes_style1() {
        let (mut transport, mut bus, mut app) = setup::<Style1Config>();
        open_and_respond(&mut transport, &mut bus, &mut app);
        transport.finished_sending(true);

        transport.process_telegram(&mut bus, &mut app, &nack_from(PARTNER, 0));
        expect_control(&bus.sent.last().unwrap(), PARTNER, 0x81);
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[test]
    fn wrong_ack_closes() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        open_and_respond(&mut transport, &mut bus, &mut app);
        transport.finished_sending(true);

        transport.process_telegram(&mut bus, &mut app, &ack_from(PARTNER, 7));
        expect_control(&bus.sent.last().unwrap(), PARTNER, 0x81);
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(app.disconnects, 1);
    }

    #[test]
    fn failed_transmission_retransmits() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        open_and_respond(&mut transport, &mut bus, &mut app);
        let response = bus.sent[1].clone();

        // No LL_ACK even after the link layer's own repetitions.
        transport.finished_sending(false);
        transport.tick(&mut bus, &mut app);
        assert_eq!(transport.state(), TransportState::OpenWait);
        assert_eq!(*bus.sent.last().unwrap(), response);
    }

    #[test]
    fn delivered_sequence_is_gapless() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        app.respond = false;
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));

        // 20 in-sequence telegrams wrap the 4-bit counter without a hiccup.
        for seq in 0..20u8 {
            transport.process_telegram(
                &mut bus,
                &mut app,
                &descriptor_read_from(PARTNER, seq % 16),
            );
            expect_control(&bus.sent[seq as usize], PARTNER, 0xC2 | ((seq % 16) << 2));
            transport.finished_sending(true);
        }
        assert_eq!(app.upcalls.len(), 20);
        assert_eq!(transport.state(), TransportState::OpenIdle);
    }

    #[test]
    fn restart_waits_for_disconnect() {
        let (mut transport, mut bus, mut app) = setup::<Style3Config>();
        transport.process_telegram(&mut bus, &mut app, &connect_from(PARTNER));

        transport.request_restart();
        assert!(!transport.restart_ready());
        transport.tick(&mut bus, &mut app);

        expect_control(&bus.sent[0], PARTNER, 0x81);
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(transport.restart_ready());
    }

    #[test]
    fn counters_start_at_zero() {
        let (transport, _, _) = setup::<Style3Config>();
        assert_eq!(transport.counters(), Counters::default());
    }
}
