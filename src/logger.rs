//! Packet log.
use crate::transport::PacketType;
use crate::Bytes;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Controller to host.
    Incoming,
    /// Host to controller.
    Outgoing,
}

/// Receives a copy of every packet crossing the transport.
pub trait PacketLogger {
    fn log_packet(&self, direction: Direction, packet_type: PacketType, packet: &[u8]);
}

/// Writes packets to the crate log at trace level.
pub struct TracePacketLogger;

impl PacketLogger for TracePacketLogger {
    fn log_packet(&self, direction: Direction, packet_type: PacketType, packet: &[u8]) {
        let _ = (direction, packet_type, packet);
        trace!("[hci] {:?} {:?} {:02x}", direction, packet_type, Bytes(packet));
    }
}
