//! Transport boundary between the stack and the controller link.
use embassy_time::Instant;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Command = 0x01,
    Acl = 0x02,
    Sco = 0x03,
    Event = 0x04,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Command),
            0x02 => Some(Self::Acl),
            0x03 => Some(Self::Sco),
            0x04 => Some(Self::Event),
            _ => None,
        }
    }
}

/// Link settings handed to the transport on power on.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Baud rate used after reset.
    pub baudrate_init: u32,
    /// Baud rate switched to once the chipset accepted a baud rate change, 0 to keep `baudrate_init`.
    pub baudrate_main: u32,
    pub flowcontrol: bool,
    pub device_name: Option<&'static str>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            baudrate_init: 115200,
            baudrate_main: 0,
            flowcontrol: true,
            device_name: None,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Io,
    Busy,
    NotOpen,
    Unsupported,
}

/// A packet oriented link to the controller.
///
/// Decoded packets are drained by the stack through [`Transport::poll`], which also delivers the
/// synthetic transport events (packet sent, sleep mode) the transport generates.
pub trait Transport {
    fn init(&mut self, config: &TransportConfig) -> Result<(), TransportError>;
    fn open(&mut self) -> Result<(), TransportError>;
    fn close(&mut self) -> Result<(), TransportError>;

    /// Copies the next complete packet, without its type byte, into `buf`.
    fn poll(&mut self, now: Instant, buf: &mut [u8]) -> Option<(PacketType, usize)>;

    /// Earliest time the transport wants to be polled again for its own timers.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn can_send_packet_now(&self, packet_type: PacketType) -> bool;

    /// Synchronous transports finish writing inside `send_packet` and never report packet sent.
    fn is_synchronous(&self) -> bool {
        false
    }

    fn send_packet(&mut self, packet_type: PacketType, packet: &[u8]) -> Result<(), TransportError>;

    fn supports_baudrate(&self) -> bool {
        false
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), TransportError> {
        let _ = baudrate;
        Err(TransportError::Unsupported)
    }

    fn reset_link(&mut self) {}
}
