//! Telegram codec: control field, addresses, TPCI and APCI access.
//!
//! All following graphics are based on the KNX specification. The transport layer only deals
//! with standard frames, which are 8 to 23 octets long (the last octet being the checksum
//! computed and verified by the link layer):
//!
//! ```notrust
//! +---------+-----------+----------------+----------+--------+----------+- - - - -+----------+
//! | Control |  Source   |  Destination   | AT/HC/LG |  TPCI  |  APCI    |  data   | Checksum |
//! | (1 oct) | (2 octs)  |   (2 octs)     | (1 oct)  | (1 oct)| (1 oct)  |(0..=14) | (1 oct)  |
//! +---------+-----------+----------------+----------+--------+----------+- - - - -+----------+
//! ```
//!
//! The control octet carries the frame type, the link-layer repeat flag (`0` = this *is* a
//! repetition) and the priority:
//!
//! ```notrust
//! MSB                                                           LSB
//! +--------+-------+--------+-------+-------+-------+------+------+
//! |   FT   |   -   |   R    |   1   |  P1   |  P0   |  -   |  -   |
//! +--------+-------+--------+-------+-------+-------+------+------+
//! ```
//!
//! Octet 5 mixes the destination address type, the routing (hop) counter and the payload length:
//!
//! ```notrust
//! MSB                                                           LSB
//! +--------+----------------------+---------------------------------+
//! |   AT   |  Hop count (3 bits)  |     Length (4 bits)             |
//! +--------+----------------------+---------------------------------+
//! ```
//!
//! `AT` = 1 selects a group (or broadcast, if zero) destination. `Length` counts the octets
//! following the TPCI octet, excluding the checksum; the total frame length is therefore
//! `8 + Length`.
//!
//! The TPCI octet distinguishes data from control PDUs in its two most significant bits and
//! carries the 4-bit sequence number of numbered PDUs in bits 2..=5:
//!
//! ```notrust
//! 00xxxxxx  unnumbered data (UDT)     - group, broadcast, connectionless traffic
//! 01SSSSxx  numbered data (NDT)       - T_Data_Connected, sequence number S
//! 100000xx  unnumbered control (UCD)  - x=00: T_Connect, x=01: T_Disconnect
//! 11SSSSxx  numbered control (NCD)    - x=10: T_ACK, x=11: T_NACK, sequence number S
//! ```
//!
//! For data PDUs the two low TPCI bits are the upper two bits of the 10-bit APCI, whose lower
//! eight bits follow in octet 7.

use byteorder::{BigEndian, ByteOrder};

use crate::address::{Address, GroupAddress};
use crate::apci::ApciCommand;
use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::transport::seq_num::SeqNum;
use crate::transport::{CTRL_TELEGRAM_SIZE, MAX_TELEGRAM_SIZE};
use crate::Error;

/// Frame type flag in the control octet: set for standard frames.
const FRAME_STANDARD: u8 = 0x80;

/// Repeat flag in the control octet. *Cleared* on link-layer repetitions.
const REPEAT_FLAG: u8 = 0x20;

/// Fixed bit 4 of the control octet of standard frames.
const CONTROL_BASE: u8 = 0x10;

/// Group-address flag in octet 5.
const ADDR_TYPE_GROUP: u8 = 0x80;

/// Default hop count (6) in octet 5's hop-count field.
const HOP_COUNT_DEFAULT: u8 = 0x60;

/// Telegram priority, encoded in bits 2..=3 of the control octet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Priority {
    /// Reserved for management and connection control.
    System = 0b00,
    /// Normal priority.
    Normal = 0b01,
    /// Urgent priority.
    Urgent = 0b10,
    /// Low priority, the default for group traffic.
    Low = 0b11,
}

/// Builds a standard-frame control octet with the repeat flag set (= not repeated).
pub fn control_field(priority: Priority) -> u8 {
    FRAME_STANDARD | REPEAT_FLAG | CONTROL_BASE | ((priority as u8) << 2)
}

/// Returns whether the control octet flags the frame as a link-layer repetition.
pub fn is_repeated(control: u8) -> bool {
    control & REPEAT_FLAG == 0
}

/// Masks the repeat flag out of a control octet, for repetition-insensitive comparison.
pub fn mask_repeat_flag(control: u8) -> u8 {
    control | REPEAT_FLAG
}

/// Transport protocol control information: the decoded TPCI octet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tpci {
    /// Unnumbered data (UDT): group, broadcast and connectionless point-to-point traffic.
    UnnumberedData,
    /// Numbered data (NDT): `T_Data_Connected` on an open connection.
    NumberedData(SeqNum),
    /// `T_Connect`.
    Connect,
    /// `T_Disconnect`.
    Disconnect,
    /// `T_ACK`.
    Ack(SeqNum),
    /// `T_NACK`.
    Nack(SeqNum),
}

impl Tpci {
    /// Decodes a TPCI octet.
    ///
    /// The reserved unnumbered-control codes and the reserved numbered-control codes are
    /// rejected with `Error::InvalidValue`.
    pub fn parse(octet: u8) -> Result<Self, Error> {
        let seq = SeqNum::new((octet >> 2) & 0x0F);
        match octet & 0xC0 {
            0x00 => Ok(Tpci::UnnumberedData),
            0x40 => Ok(Tpci::NumberedData(seq)),
            0x80 => match octet & 0x03 {
                0b00 => Ok(Tpci::Connect),
                0b01 => Ok(Tpci::Disconnect),
                _ => Err(Error::InvalidValue),
            },
            0xC0 => match octet & 0x03 {
                0b10 => Ok(Tpci::Ack(seq)),
                0b11 => Ok(Tpci::Nack(seq)),
                _ => Err(Error::InvalidValue),
            },
            _ => unreachable!(),
        }
    }

    /// Encodes `self` into a TPCI octet.
    ///
    /// For the data variants the two low bits (the upper APCI bits) are zero; use
    /// [`set_tpci`](fn.set_tpci.html) to stamp the TPCI into a telegram without clobbering a
    /// previously written APCI.
    pub fn to_octet(self) -> u8 {
        match self {
            Tpci::UnnumberedData => 0x00,
            Tpci::NumberedData(seq) => 0x40 | (seq.raw() << 2),
            Tpci::Connect => 0x80,
            Tpci::Disconnect => 0x81,
            Tpci::Ack(seq) => 0xC2 | (seq.raw() << 2),
            Tpci::Nack(seq) => 0xC3 | (seq.raw() << 2),
        }
    }

    /// Returns whether this is one of the data TPCIs, which carry an APCI.
    pub fn is_data(&self) -> bool {
        matches!(self, Tpci::UnnumberedData | Tpci::NumberedData(_))
    }
}

/// The destination of a telegram.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A single device, addressed by its individual address.
    Individual(Address),
    /// A group of communication objects.
    Group(GroupAddress),
    /// All devices (group address zero).
    Broadcast,
}

/// A decoded telegram header: everything the transport layer needs to route a received frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Tpdu {
    /// Individual address of the sender.
    pub src: Address,
    /// Decoded destination.
    pub dst: Destination,
    /// Decoded transport control field.
    pub tpci: Tpci,
    /// Application command, present on data PDUs that carry at least the full APCI.
    pub apci: Option<ApciCommand>,
}

impl<'a> FromBytes<'a> for Tpdu {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        if bytes.bytes_left() < CTRL_TELEGRAM_SIZE {
            return Err(Error::InvalidLength);
        }

        let control = bytes.read_u8()?;
        if control & FRAME_STANDARD == 0 {
            // Extended frames are not supported.
            return Err(Error::InvalidValue);
        }

        let src = Address::from_raw(bytes.read_u16_be()?);
        if src.is_unassigned() {
            return Err(Error::InvalidValue);
        }

        let dst_raw = bytes.read_u16_be()?;
        let at_length = bytes.read_u8()?;
        let tpci_octet = bytes.read_u8()?;

        let tpci = Tpci::parse(tpci_octet)?;
        let dst = if at_length & ADDR_TYPE_GROUP != 0 {
            if !tpci.is_data() {
                // Connection control is point-to-point only.
                return Err(Error::InvalidValue);
            }
            if dst_raw == 0 {
                Destination::Broadcast
            } else {
                Destination::Group(GroupAddress::from_raw(dst_raw))
            }
        } else {
            Destination::Individual(Address::from_raw(dst_raw))
        };

        let payload_length = usize::from(at_length & 0x0F);
        let apci = if tpci.is_data() && payload_length >= 1 {
            let low = bytes.read_u8()?;
            Some(decode_apci(tpci_octet, low))
        } else {
            None
        };

        Ok(Tpdu {
            src,
            dst,
            tpci,
            apci,
        })
    }
}

impl Tpdu {
    /// Decodes the header of a received frame.
    pub fn parse(telegram: &[u8]) -> Result<Self, Error> {
        let mut reader = ByteReader::new(telegram);
        let tpdu = Self::from_bytes(&mut reader)?;
        if telegram.len() < telegram_length(telegram) {
            return Err(Error::InvalidLength);
        }
        Ok(tpdu)
    }
}

/// A connection-control frame: `T_Connect`, `T_Disconnect`, `T_ACK` or `T_NACK`.
///
/// Control frames are always [`CTRL_TELEGRAM_SIZE`] octets, carry no APCI, and are sent with
/// system priority and the default hop count.
///
/// [`CTRL_TELEGRAM_SIZE`]: ../constant.CTRL_TELEGRAM_SIZE.html
#[derive(Debug, Copy, Clone)]
pub struct ControlFrame {
    /// Our own address, stamped as the source.
    pub src: Address,
    /// The addressed partner.
    pub dst: Address,
    /// Which control PDU to send. Must not be a data variant.
    pub tpci: Tpci,
}

impl ToBytes for ControlFrame {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        debug_assert!(!self.tpci.is_data());
        writer.write_u8(control_field(Priority::System))?;
        writer.write_u16_be(self.src.raw())?;
        writer.write_u16_be(self.dst.raw())?;
        writer.write_u8(HOP_COUNT_DEFAULT)?;
        writer.write_u8(self.tpci.to_octet())?;
        // Checksum octet, computed by the link layer.
        writer.write_u8(0)
    }
}

/// Decodes the 10-bit APCI from the TPCI octet and the following octet.
///
/// The group-value services use only the upper 4 of the 10 bits, with data packed into the
/// remainder; everything else is matched on the full code.
pub fn decode_apci(tpci_octet: u8, low: u8) -> ApciCommand {
    let raw = (u16::from(tpci_octet & 0x03) << 8) | u16::from(low);
    match raw & 0x3C0 {
        0x000 | 0x040 | 0x080 => ApciCommand::from(raw & 0x3C0),
        _ => ApciCommand::from(raw),
    }
}

/// Returns the total length of a frame (including the checksum octet), derived from the length
/// nibble in octet 5.
pub fn telegram_length(telegram: &[u8]) -> usize {
    CTRL_TELEGRAM_SIZE + usize::from(telegram[5] & 0x0F)
}

/// Reads the APCI of a data telegram.
pub fn apci_command(telegram: &[u8]) -> ApciCommand {
    decode_apci(telegram[6], telegram[7])
}

/// Writes `apci` into octets 6 and 7, preserving the TPCI bits of octet 6.
pub fn set_apci(telegram: &mut [u8], apci: ApciCommand) {
    let raw = u16::from(apci);
    telegram[6] = (telegram[6] & 0xFC) | ((raw >> 8) as u8 & 0x03);
    telegram[7] = raw as u8;
}

/// Stamps `tpci` into octet 6.
///
/// For data TPCIs the two low bits (upper APCI bits) are preserved; control TPCIs replace the
/// whole octet.
pub fn set_tpci(telegram: &mut [u8], tpci: Tpci) {
    if tpci.is_data() {
        telegram[6] = (telegram[6] & 0x03) | tpci.to_octet();
    } else {
        telegram[6] = tpci.to_octet();
    }
}

/// Stamps the sender address into octets 1 and 2.
pub fn set_source_address(telegram: &mut [u8], addr: Address) {
    BigEndian::write_u16(&mut telegram[1..3], addr.raw());
}

/// Reads the destination address octets 3 and 4 without interpreting the address-type flag.
pub fn destination_raw(telegram: &[u8]) -> u16 {
    BigEndian::read_u16(&telegram[3..5])
}

/// Pre-fills a response telegram addressed to the connected partner.
///
/// Sets the control octet (system priority), the destination, an individual-address octet 5 with
/// length 1 (bare APCI) and a numbered-data TPCI with sequence number 0. The application
/// overwrites APCI, payload and length nibble; the real sequence number is stamped when the
/// response is transmitted.
pub fn init_connected_response(telegram: &mut [u8], partner: Address) {
    telegram[0] = control_field(Priority::System);
    // Octets 1-2 (source) are stamped on transmission.
    BigEndian::write_u16(&mut telegram[3..5], partner.raw());
    telegram[5] = HOP_COUNT_DEFAULT | 0x01;
    telegram[6] = Tpci::NumberedData(SeqNum::ZERO).to_octet();
    telegram[7] = 0;
}

/// Encodes a complete connection-control frame.
pub fn encode_control(frame: ControlFrame, buf: &mut [u8; MAX_TELEGRAM_SIZE]) -> usize {
    let mut writer = ByteWriter::new(buf);
    frame
        .to_bytes(&mut writer)
        .expect("control frame exceeds telegram buffer");
    CTRL_TELEGRAM_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tpci_codec() {
        // The encodings from KNX 2.1 3/3/4 (and only those).
        assert_eq!(Tpci::Connect.to_octet(), 0x80);
        assert_eq!(Tpci::Disconnect.to_octet(), 0x81);
        assert_eq!(Tpci::Ack(SeqNum::new(5)).to_octet(), 0xC2 | (5 << 2));
        assert_eq!(Tpci::Nack(SeqNum::new(11)).to_octet(), 0xC3 | (11 << 2));
        assert_eq!(
            Tpci::NumberedData(SeqNum::new(9)).to_octet(),
            0x40 | (9 << 2)
        );

        for raw in 0..=255u8 {
            match Tpci::parse(raw) {
                Ok(tpci) => {
                    // Re-encoding must reproduce the octet, modulo APCI bits on data PDUs.
                    let reencoded = tpci.to_octet();
                    if tpci.is_data() {
                        assert_eq!(reencoded, raw & 0xFC);
                    } else {
                        assert_eq!(reencoded, raw);
                    }
                }
                Err(_) => {
                    // Only the reserved control codes are rejected.
                    let reserved_ucd = raw & 0xC0 == 0x80 && raw & 0x03 >= 0b10;
                    let reserved_ncd = raw & 0xC0 == 0xC0 && raw & 0x03 <= 0b01;
                    assert!(reserved_ucd || reserved_ncd, "rejected {:#04x}", raw);
                }
            }
        }
    }

    #[test]
    fn control_frame_layout() {
        let mut buf = [0; MAX_TELEGRAM_SIZE];
        let len = encode_control(
            ControlFrame {
                src: Address::from_raw(0x1101),
                dst: Address::from_raw(0x1102),
                tpci: Tpci::Ack(SeqNum::new(3)),
            },
            &mut buf,
        );
        assert_eq!(len, CTRL_TELEGRAM_SIZE);
        assert_eq!(
            &buf[..len],
            &[0xB0, 0x11, 0x01, 0x11, 0x02, 0x60, 0xC2 | (3 << 2), 0x00]
        );
        assert_eq!(telegram_length(&buf), 8);
    }

    #[test]
    fn classify_connect() {
        let telegram = [0xB0, 0x11, 0x02, 0x11, 0x01, 0x60, 0x80, 0x00];
        let tpdu = Tpdu::parse(&telegram).unwrap();
        assert_eq!(tpdu.src, Address::from_raw(0x1102));
        assert_eq!(tpdu.dst, Destination::Individual(Address::from_raw(0x1101)));
        assert_eq!(tpdu.tpci, Tpci::Connect);
        assert_eq!(tpdu.apci, None);
    }

    #[test]
    fn classify_connected_data() {
        // T_Data_Connected seq=2, APCI = DeviceDescriptorRead (0x300), descriptor type 0.
        let telegram = [0xB0, 0x11, 0x02, 0x11, 0x01, 0x61, 0x40 | (2 << 2) | 0x03, 0x00, 0x00];
        let tpdu = Tpdu::parse(&telegram).unwrap();
        assert_eq!(tpdu.tpci, Tpci::NumberedData(SeqNum::new(2)));
        assert_eq!(tpdu.apci, Some(ApciCommand::DeviceDescriptorRead));
    }

    #[test]
    fn classify_group_and_broadcast() {
        // GroupValueWrite to 1/2/7, small value packed into the APCI's low bits.
        let telegram = [0xBC, 0x11, 0x02, 0x0A, 0x07, 0xE1, 0x00, 0x81, 0x00];
        let tpdu = Tpdu::parse(&telegram).unwrap();
        assert_eq!(
            tpdu.dst,
            Destination::Group(GroupAddress::from_raw(0x0A07))
        );
        assert_eq!(tpdu.apci, Some(ApciCommand::GroupValueWrite));

        let telegram = [0xB0, 0x11, 0x02, 0x00, 0x00, 0xE1, 0x01, 0x00, 0x00];
        let tpdu = Tpdu::parse(&telegram).unwrap();
        assert_eq!(tpdu.dst, Destination::Broadcast);
        assert_eq!(tpdu.apci, Some(ApciCommand::IndividualAddressRead));
    }

    #[test]
    fn reject_malformed() {
        // Too short for a standard frame.
        assert_eq!(
            Tpdu::parse(&[0xB0, 0x11, 0x02, 0x11, 0x01, 0x60, 0x80]),
            Err(Error::InvalidLength)
        );
        // Unassigned source address.
        assert_eq!(
            Tpdu::parse(&[0xB0, 0x00, 0x00, 0x11, 0x01, 0x60, 0x80, 0x00]),
            Err(Error::InvalidValue)
        );
        // Group-addressed connection control.
        assert_eq!(
            Tpdu::parse(&[0xB0, 0x11, 0x02, 0x0A, 0x07, 0xE0, 0x80, 0x00]),
            Err(Error::InvalidValue)
        );
        // Length nibble promises more octets than were received.
        assert_eq!(
            Tpdu::parse(&[0xB0, 0x11, 0x02, 0x11, 0x01, 0x63, 0x42, 0x00, 0x00]),
            Err(Error::InvalidLength)
        );
    }

    #[test]
    fn repeat_flag() {
        assert!(!is_repeated(0xB0));
        assert!(is_repeated(0xB0 & !0x20));
        assert_eq!(mask_repeat_flag(0x90), 0xB0);
    }
}
