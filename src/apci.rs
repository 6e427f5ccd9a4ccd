//! Application-layer control information (APCI) and the upward interface to the application.
//!
//! The transport layer does not interpret application commands. It decodes the 10-bit APCI code
//! so that it can hand a classified command to the [`ApplicationLayer`] hooks, which are
//! implemented by the object server / device-management code sitting on top of the stack.
//!
//! [`ApplicationLayer`]: trait.ApplicationLayer.html

use crate::address::GroupAddress;

/// The 10-bit application-layer service codes carried in octets 6 and 7 of a telegram.
///
/// The group-value services use only the upper 4 of the 10 bits; their lower 6 bits carry
/// small data values and are masked off during decoding. Services above `0x3C0` are
/// escape-coded and use all 10 bits. Codes this stack does not know survive decoding and
/// re-encoding through the `Unknown` variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApciCommand {
    GroupValueRead,
    GroupValueResponse,
    GroupValueWrite,
    IndividualAddressWrite,
    IndividualAddressRead,
    IndividualAddressResponse,
    AdcRead,
    AdcResponse,
    MemoryRead,
    MemoryResponse,
    MemoryWrite,
    DeviceDescriptorRead,
    DeviceDescriptorResponse,
    Restart,
    AuthorizeRequest,
    AuthorizeResponse,
    PropertyValueRead,
    PropertyValueResponse,
    PropertyValueWrite,
    PropertyDescriptionRead,
    PropertyDescriptionResponse,
    /// A service code the transport layer has no name for.
    Unknown(u16),
}

impl From<u16> for ApciCommand {
    fn from(raw: u16) -> Self {
        match raw {
            0x000 => ApciCommand::GroupValueRead,
            0x040 => ApciCommand::GroupValueResponse,
            0x080 => ApciCommand::GroupValueWrite,
            0x0C0 => ApciCommand::IndividualAddressWrite,
            0x100 => ApciCommand::IndividualAddressRead,
            0x140 => ApciCommand::IndividualAddressResponse,
            0x180 => ApciCommand::AdcRead,
            0x1C0 => ApciCommand::AdcResponse,
            0x200 => ApciCommand::MemoryRead,
            0x240 => ApciCommand::MemoryResponse,
            0x280 => ApciCommand::MemoryWrite,
            0x300 => ApciCommand::DeviceDescriptorRead,
            0x340 => ApciCommand::DeviceDescriptorResponse,
            0x380 => ApciCommand::Restart,
            0x3D1 => ApciCommand::AuthorizeRequest,
            0x3D2 => ApciCommand::AuthorizeResponse,
            0x3D5 => ApciCommand::PropertyValueRead,
            0x3D6 => ApciCommand::PropertyValueResponse,
            0x3D7 => ApciCommand::PropertyValueWrite,
            0x3D8 => ApciCommand::PropertyDescriptionRead,
            0x3D9 => ApciCommand::PropertyDescriptionResponse,
            other => ApciCommand::Unknown(other),
        }
    }
}

impl From<ApciCommand> for u16 {
    fn from(cmd: ApciCommand) -> Self {
        match cmd {
            ApciCommand::GroupValueRead => 0x000,
            ApciCommand::GroupValueResponse => 0x040,
            ApciCommand::GroupValueWrite => 0x080,
            ApciCommand::IndividualAddressWrite => 0x0C0,
            ApciCommand::IndividualAddressRead => 0x100,
            ApciCommand::IndividualAddressResponse => 0x140,
            ApciCommand::AdcRead => 0x180,
            ApciCommand::AdcResponse => 0x1C0,
            ApciCommand::MemoryRead => 0x200,
            ApciCommand::MemoryResponse => 0x240,
            ApciCommand::MemoryWrite => 0x280,
            ApciCommand::DeviceDescriptorRead => 0x300,
            ApciCommand::DeviceDescriptorResponse => 0x340,
            ApciCommand::Restart => 0x380,
            ApciCommand::AuthorizeRequest => 0x3D1,
            ApciCommand::AuthorizeResponse => 0x3D2,
            ApciCommand::PropertyValueRead => 0x3D5,
            ApciCommand::PropertyValueResponse => 0x3D6,
            ApciCommand::PropertyValueWrite => 0x3D7,
            ApciCommand::PropertyDescriptionRead => 0x3D8,
            ApciCommand::PropertyDescriptionResponse => 0x3D9,
            ApciCommand::Unknown(other) => other,
        }
    }
}

/// Upward interface of the transport layer.
///
/// The device's application code (group-object server, memory and property management)
/// implements this trait. The hooks receive the complete received frame so that they can decode
/// command-specific payloads; responses to connection-oriented commands are written into the
/// provided send buffer and transmitted by the transport layer with correct sequencing.
pub trait ApplicationLayer {
    /// Process a group-addressed telegram (`T_Data_Group`).
    ///
    /// Returns whether the telegram was handled by the application.
    fn process_group_telegram(
        &mut self,
        apci: ApciCommand,
        group: GroupAddress,
        telegram: &[u8],
    ) -> bool;

    /// Process a broadcast telegram.
    ///
    /// Broadcasts carry the device-programming services (individual address read/write). Returns
    /// whether the telegram was handled by the application.
    fn process_broadcast_telegram(&mut self, apci: ApciCommand, telegram: &[u8]) -> bool;

    /// Process a connection-oriented command addressed to this device.
    ///
    /// `response` is a prepared telegram buffer: control field, destination (the connected
    /// partner) and a numbered-data TPCI are already filled in; the sequence number is stamped by
    /// the transport layer when the response is transmitted. The implementation writes the
    /// response APCI and payload (setting the length nibble in octet 5) and returns `true` to
    /// have the response sent, or `false` if the command produces no response.
    fn process_apci(&mut self, apci: ApciCommand, telegram: &[u8], response: &mut [u8]) -> bool;

    /// Invoked when the connection to the partner ends, for whatever reason (disconnect
    /// telegram, timeout, protocol violation).
    ///
    /// Lets the application discard per-connection state, such as a half-done memory transfer.
    fn connection_lost(&mut self);
}
