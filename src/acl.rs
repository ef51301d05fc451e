//! ACL and SCO data paths: controller buffer accounting, fragmentation of outgoing ACL packets,
//! reassembly of incoming L2CAP packets and implicit SCO flow control.
use embassy_time::Duration;

use crate::codec::le16;
use crate::config::ACL_PAYLOAD_SIZE;
use crate::connection::AddressType;
use crate::event::{SyntheticEvent, EVENT_SCO_CAN_SEND_NOW};
use crate::hci::{manufacturer, Hci};
use crate::logger::Direction;
use crate::run_loop::{RunLoop, TimerId};
use crate::transport::{PacketType, Transport};
use crate::Error;

/// Payload size of each ACL packet type, indexed by its bit in the packet type field.
const PACKET_TYPE_SIZES: [u16; 16] = [0, 54, 83, 17, 27, 0, 0, 0, 367, 552, 121, 183, 679, 1021, 224, 339];

/// Local feature bit a group of packet types depends on, and the packet type bits of that group.
const PACKET_TYPE_FEATURES: [(u8, u16); 6] = [
    // 3 slot packets
    (0, 0x0f00),
    // 5 slot packets
    (1, 0xf000),
    // EDR 2 Mbps
    (25, 0x1102),
    // EDR 3 Mbps
    (26, 0x2204),
    // 3 slot EDR packets
    (39, 0x0300),
    // 5 slot EDR packets
    (40, 0x3000),
];

/// Bits of the packet type field that mean "may not be used" when set.
const PACKET_TYPE_INVERTED_BITS: u16 = 0x3306;

/// Delay from expected SCO reception to the matching transmit slot.
const SCO_TX_AFTER_RX: Duration = Duration::from_millis(6);
/// Nominal SCO packet interval, rounded down. Every other packet adds the missing half millisecond.
const SCO_RX_INTERVAL_MS: u64 = 7;
/// Packets ignored before the SCO rhythm is tracked.
const SCO_RX_SETTLE_PACKETS: u8 = 10;

/// ACL packet types usable with the given controller buffer size and local features.
pub(crate) fn acl_packet_types(buffer_size: u16, local_features: &[u8; 8]) -> u16 {
    let mut packet_types = 0u16;
    for (i, size) in PACKET_TYPE_SIZES.iter().enumerate() {
        if *size != 0 && *size <= buffer_size {
            packet_types |= 1 << i;
        }
    }
    for (bit, mask) in PACKET_TYPE_FEATURES {
        let supported = local_features[(bit >> 3) as usize] & (1 << (bit & 7)) != 0;
        if !supported {
            trace!("[acl] feature bit {} not set, removing packet types {:04x}", bit, mask);
            packet_types &= !mask;
        }
    }
    packet_types ^ PACKET_TYPE_INVERTED_BITS
}

impl<'d, T: Transport, R: RunLoop> Hci<'d, T, R> {
    /// Free controller buffers for a connection of `address_type`.
    ///
    /// LE links draw from the classic pool when the controller has no dedicated LE buffers.
    pub fn number_free_acl_slots_for_type(&self, address_type: AddressType) -> u16 {
        let mut sent_classic = 0u32;
        let mut sent_le = 0u32;
        for conn in self.connections.iter() {
            if conn.is_le() {
                sent_le += conn.num_packets_sent as u32;
            }
            if conn.address_type == AddressType::Acl {
                sent_classic += conn.num_packets_sent as u32;
            }
        }

        let total_classic = self.acl_packets_total_num as u32;
        let Some(mut free_classic) = total_classic.checked_sub(sent_classic) else {
            error!("[acl] outgoing classic packets ({}) > total ({})", sent_classic, total_classic);
            return 0;
        };

        let mut free_le = 0;
        if self.le_acl_packets_total_num > 0 {
            let total_le = self.le_acl_packets_total_num as u32;
            let Some(free) = total_le.checked_sub(sent_le) else {
                error!("[acl] outgoing le packets ({}) > total ({})", sent_le, total_le);
                return 0;
            };
            free_le = free;
        } else {
            let Some(free) = free_classic.checked_sub(sent_le) else {
                error!(
                    "[acl] outgoing classic + le packets ({} + {}) > total ({})",
                    sent_classic, sent_le, total_classic
                );
                return 0;
            };
            free_classic = free;
        }

        let free = match address_type {
            AddressType::Unknown | AddressType::Sco => {
                error!("[acl] no ACL pool for address type {:?}", address_type);
                0
            }
            AddressType::Acl => free_classic,
            _ if self.le_acl_packets_total_num > 0 => free_le,
            _ => free_classic,
        };
        free as u16
    }

    pub fn number_free_acl_slots_for_handle(&self, handle: u16) -> u16 {
        match self.connections.for_handle(handle) {
            Some(conn) => self.number_free_acl_slots_for_type(conn.address_type),
            None => {
                error!("[acl] handle {:04x} not in connection list", handle);
                0
            }
        }
    }

    pub(crate) fn can_send_prepared_acl_packet_now(&self, handle: u16) -> bool {
        if !self.transport.can_send_packet_now(PacketType::Acl) {
            return false;
        }
        self.number_free_acl_slots_for_handle(handle) > 0
    }

    pub fn can_send_acl_packet_now(&self, handle: u16) -> bool {
        if self.buffer_reserved {
            return false;
        }
        self.can_send_prepared_acl_packet_now(handle)
    }

    fn can_send_acl_packet_for_type(&self, address_type: AddressType) -> bool {
        if self.buffer_reserved || !self.transport.can_send_packet_now(PacketType::Acl) {
            return false;
        }
        self.number_free_acl_slots_for_type(address_type) > 0
    }

    pub fn can_send_acl_le_packet_now(&self) -> bool {
        self.can_send_acl_packet_for_type(AddressType::LePublic)
    }

    pub fn can_send_acl_classic_packet_now(&self) -> bool {
        self.can_send_acl_packet_for_type(AddressType::Acl)
    }

    /// Largest ACL payload the controller accepts for classic links.
    pub fn max_acl_data_packet_length(&self) -> u16 {
        self.acl_data_packet_length
    }

    /// Sends the ACL packet of `size` bytes prepared in the reserved buffer, fragmenting it
    /// to the controller buffer size.
    ///
    /// Fragments that do not fit into the free controller buffers are sent later by
    /// [`Hci::run`]; the buffer stays reserved until the last one went out.
    pub fn send_acl_packet_buffer(&mut self, size: usize) -> Result<(), Error> {
        if !self.buffer_reserved {
            error!("[acl] send without reserving the packet buffer");
            return Err(Error::CommandDisallowed);
        }
        if size < 4 || size > self.buffer.len() {
            error!("[acl] invalid packet size {}", size);
            self.release_packet_buffer();
            return Err(Error::InvalidHciParameters);
        }

        let handle = le16(&self.buffer, 0) & 0x0fff;
        if !self.can_send_prepared_acl_packet_now(handle) {
            error!("[acl] no free ACL buffers on controller");
            self.release_packet_buffer();
            self.emit_transport_packet_sent();
            return Err(Error::AclBuffersFull);
        }

        let now = self.run_loop.now();
        let Some(idx) = self.connections.position(handle) else {
            error!("[acl] no connection for handle {:04x}", handle);
            self.release_packet_buffer();
            self.emit_transport_packet_sent();
            return Ok(());
        };
        if let Some(conn) = self.connections.get_mut(idx) {
            conn.touch(now);
        }

        self.acl_fragmentation_total = size;
        self.acl_fragmentation_pos = 4;
        self.send_acl_packet_fragments(idx)
    }

    fn send_acl_packet_fragments(&mut self, idx: usize) -> Result<(), Error> {
        let Some(conn) = self.connections.get_mut(idx) else {
            return Ok(());
        };
        let handle = conn.handle;
        let mut max_len = self.acl_data_packet_length as usize;
        if conn.is_le() && self.le_data_packets_length > 0 {
            max_len = self.le_data_packets_length as usize;
        }
        // a controller reporting 0 would never make progress
        let max_len = max_len.max(1);

        let mut result = Ok(());
        loop {
            let header_pos = self.acl_fragmentation_pos - 4;
            let mut len = self.acl_fragmentation_total - self.acl_fragmentation_pos;
            let more = len > max_len;
            if more {
                len = max_len;
            }

            if header_pos > 0 {
                let handle_and_flags = (le16(&self.buffer, 0) & 0xcfff) | (1 << 12);
                self.buffer[header_pos..header_pos + 2].copy_from_slice(&handle_and_flags.to_le_bytes());
            }
            self.buffer[header_pos + 2..header_pos + 4].copy_from_slice(&(len as u16).to_le_bytes());

            if let Some(conn) = self.connections.get_mut(idx) {
                conn.num_packets_sent += 1;
            }

            // advance before sending, the transport may report the packet sent right away
            if more {
                self.acl_fragmentation_pos += len;
            } else {
                self.acl_fragmentation_pos = 0;
                self.acl_fragmentation_total = 0;
            }

            let packet = &self.buffer[header_pos..header_pos + 4 + len];
            self.log_packet(Direction::Outgoing, PacketType::Acl, packet);
            self.acl_fragmentation_tx_active = true;
            if let Err(e) = self.transport.send_packet(PacketType::Acl, packet) {
                error!("[acl] transport failed to send fragment: {:?}", e);
                result = Err(Error::Transport);
            }

            if !more {
                break;
            }
            if !self.can_send_prepared_acl_packet_now(handle) {
                return result;
            }
        }

        if self.transport.is_synchronous() {
            self.acl_fragmentation_tx_active = false;
            self.release_packet_buffer();
            self.emit_transport_packet_sent();
        }
        result
    }

    /// Continues a fragmented packet. Returns `true` if the scheduler pass was used.
    pub(crate) fn run_acl_fragments(&mut self) -> bool {
        if self.acl_fragmentation_total == 0 {
            return false;
        }
        let handle = le16(&self.buffer, 0) & 0x0fff;
        match self.connections.position(handle) {
            Some(idx) => {
                if self.can_send_prepared_acl_packet_now(handle) {
                    if let Err(e) = self.send_acl_packet_fragments(idx) {
                        warn!("[acl] sending fragment for {:04x} failed: {:?}", handle, e);
                    }
                    return true;
                }
            }
            None => {
                info!("[acl] connection {:04x} gone, discarding fragments", handle);
                self.acl_fragmentation_total = 0;
                self.acl_fragmentation_pos = 0;
            }
        }
        false
    }

    pub(crate) fn handle_acl(&mut self, packet: &[u8]) {
        if packet.len() < 4 {
            error!("[acl] packet too short: {}", packet.len());
            return;
        }
        let handle = le16(packet, 0) & 0x0fff;
        let flags = packet[1] >> 4;
        let acl_length = le16(packet, 2) as usize;
        let now = self.run_loop.now();

        let Some(idx) = self.connections.position(handle) else {
            error!("[acl] packet for unknown handle {:04x}", handle);
            return;
        };
        if acl_length + 4 != packet.len() {
            error!(
                "[acl] packet of wrong size {}, expected {}, dropping",
                packet.len(),
                acl_length + 4
            );
            return;
        }
        let Some(conn) = self.connections.get_mut(idx) else {
            return;
        };
        conn.touch(now);

        match flags & 0x03 {
            0x01 => {
                if conn.recombination_pos == 0 {
                    error!("[acl] continuation without first fragment for {:04x}", handle);
                    return;
                }
                if conn.recombination_pos + acl_length > conn.recombination.len() {
                    error!(
                        "[acl] reassembled packet too large: {} > {} for {:04x}",
                        conn.recombination_pos + acl_length,
                        conn.recombination.len(),
                        handle
                    );
                    conn.reset_recombination();
                    return;
                }
                let pos = conn.recombination_pos;
                conn.recombination[pos..pos + acl_length].copy_from_slice(&packet[4..]);
                conn.recombination_pos += acl_length;

                // the position includes the ACL header, the length excludes the L2CAP header
                if conn.recombination_pos >= conn.recombination_len + 4 + 4 {
                    let len = conn.recombination_pos;
                    if let Some(conn) = self.connections.iter().nth(idx) {
                        self.emit_acl_packet(&conn.recombination[..len]);
                    }
                    if let Some(conn) = self.connections.get_mut(idx) {
                        conn.reset_recombination();
                    }
                }
            }
            0x02 => {
                if conn.recombination_pos != 0 {
                    error!("[acl] first fragment with data in buffer for {:04x}, dropping stale fragments", handle);
                    conn.recombination_pos = 0;
                }
                let l2cap_length = le16(packet, 4) as usize;
                if acl_length >= l2cap_length + 4 {
                    self.emit_acl_packet(packet);
                } else {
                    if acl_length > ACL_PAYLOAD_SIZE {
                        error!(
                            "[acl] first fragment too large: {} > {} for {:04x}",
                            4 + acl_length,
                            4 + ACL_PAYLOAD_SIZE,
                            handle
                        );
                        return;
                    }
                    // the reassembled packet carries the ACL header in front of the L2CAP frame
                    if l2cap_length + 4 > conn.recombination.len() - 4 {
                        error!(
                            "[acl] announced L2CAP frame too large: {} > {} for {:04x}, dropping",
                            l2cap_length + 4,
                            conn.recombination.len() - 4,
                            handle
                        );
                        conn.reset_recombination();
                        return;
                    }
                    conn.recombination[..packet.len()].copy_from_slice(packet);
                    conn.recombination_pos = packet.len();
                    conn.recombination_len = l2cap_length;
                    conn.recombination[2..4].copy_from_slice(&((l2cap_length + 4) as u16).to_le_bytes());
                }
            }
            other => {
                error!("[acl] invalid packet boundary flags {}", other);
                return;
            }
        }

        self.run();
    }

    // SCO

    /// Free controller SCO buffers, or with implicit flow control the number of
    /// connections whose transmit slot has arrived.
    pub fn number_free_sco_slots(&self) -> u16 {
        let sco = self.connections.iter().filter(|c| c.address_type == AddressType::Sco);
        if self.synchronous_flow_control_enabled {
            let sent: u32 = sco.map(|c| c.num_packets_sent as u32).sum();
            let total = self.sco_packets_total_num as u32;
            match total.checked_sub(sent) {
                Some(free) => free as u16,
                None => {
                    info!("[sco] packets sent ({}) > total ({})", sent, total);
                    0
                }
            }
        } else {
            sco.filter(|c| c.sco_tx_ready > 0).count() as u16
        }
    }

    pub(crate) fn can_send_prepared_sco_packet_now(&self) -> bool {
        if !self.transport.can_send_packet_now(PacketType::Sco) {
            return false;
        }
        self.number_free_sco_slots() > 0
    }

    pub fn can_send_sco_packet_now(&self) -> bool {
        !self.buffer_reserved && self.can_send_prepared_sco_packet_now()
    }

    /// Asks for a single `SCO_CAN_SEND_NOW` event on the SCO handler once a packet can be sent.
    pub fn request_sco_can_send_now_event(&mut self) {
        self.sco_waiting_for_can_send_now = true;
        self.notify_if_sco_can_send_now();
    }

    pub(crate) fn notify_if_sco_can_send_now(&mut self) {
        if !self.sco_waiting_for_can_send_now || !self.can_send_sco_packet_now() {
            return;
        }
        self.sco_waiting_for_can_send_now = false;
        let mut ev = SyntheticEvent::<2>::new(EVENT_SCO_CAN_SEND_NOW);
        let ev = ev.finish();
        self.log_packet(Direction::Incoming, PacketType::Event, ev);
        if let Some(handler) = self.sco_handler {
            handler.on_packet(PacketType::Event, ev);
        }
    }

    /// Sends the SCO packet of `size` bytes prepared in the reserved buffer.
    pub fn send_sco_packet_buffer(&mut self, size: usize) -> Result<(), Error> {
        if !self.buffer_reserved {
            error!("[sco] send without reserving the packet buffer");
            return Err(Error::CommandDisallowed);
        }
        if size < 3 || size > self.buffer.len() {
            self.release_packet_buffer();
            return Err(Error::InvalidHciParameters);
        }
        let handle = le16(&self.buffer, 0) & 0x0fff;

        if !self.can_send_prepared_sco_packet_now() {
            error!("[sco] no free SCO buffers on controller");
            self.release_packet_buffer();
            self.emit_transport_packet_sent();
            return Err(Error::AclBuffersFull);
        }

        let flow_control = self.synchronous_flow_control_enabled;
        let Some(conn) = self.connections.for_handle_mut(handle) else {
            error!("[sco] no connection for handle {:04x}", handle);
            self.release_packet_buffer();
            self.emit_transport_packet_sent();
            return Ok(());
        };
        if flow_control {
            conn.num_packets_sent += 1;
        } else {
            conn.sco_tx_ready = conn.sco_tx_ready.saturating_sub(1);
        }

        let packet = &self.buffer[..size];
        self.log_packet(Direction::Outgoing, PacketType::Sco, packet);
        let result = self.transport.send_packet(PacketType::Sco, packet).map_err(|e| {
            error!("[sco] transport failed to send: {:?}", e);
            Error::Transport
        });

        if self.transport.is_synchronous() {
            self.release_packet_buffer();
            self.emit_transport_packet_sent();
        }
        result
    }

    pub(crate) fn handle_sco(&mut self, packet: &[u8]) {
        let handle = le16(packet, 0) & 0x0fff;
        if self.connections.for_handle(handle).is_none() {
            return;
        }

        // CSR 8811 prefixes 60 byte transparent SCO packets with 20 zero bytes
        let mut stripped = [0u8; 63];
        let mut packet = packet;
        if self.manufacturer == manufacturer::CAMBRIDGE_SILICON_RADIO
            && packet.len() == 83
            && self.sco_voice_setting_active & 0x03 == 0x03
        {
            stripped[..2].copy_from_slice(&packet[..2]);
            stripped[2] = 0x3c;
            stripped[3..].copy_from_slice(&packet[23..83]);
            packet = &stripped[..];
        }

        if !self.synchronous_flow_control_enabled {
            let now = self.run_loop.now();
            let mut schedule = false;
            if let Some(conn) = self.connections.for_handle_mut(handle) {
                if !conn.sco_rx_valid {
                    conn.sco_rx_count += 1;
                    if conn.sco_rx_count == SCO_RX_SETTLE_PACKETS {
                        conn.sco_rx_at = now;
                        conn.sco_rx_valid = true;
                        conn.sco_rx_count = 0;
                        schedule = true;
                    }
                } else {
                    conn.sco_rx_count = conn.sco_rx_count.wrapping_add(1);
                    conn.sco_rx_at += Duration::from_millis(SCO_RX_INTERVAL_MS);
                    if now > conn.sco_rx_at {
                        conn.sco_rx_at += Duration::from_millis(1);
                    }
                    schedule = true;
                }
            }
            if schedule {
                self.sco_schedule_tx(handle);
            }
        }

        if let Some(handler) = self.sco_handler {
            handler.on_packet(PacketType::Sco, packet);
        }
    }

    fn sco_schedule_tx(&mut self, handle: u16) {
        let Some(conn) = self.connections.for_handle(handle) else {
            return;
        };
        let now = self.run_loop.now();
        let tx_at = conn.sco_rx_at + SCO_TX_AFTER_RX;
        let delay = tx_at.checked_duration_since(now).unwrap_or(Duration::from_ticks(0));
        let slot = conn.sco_rx_count & 1;
        self.run_loop.set_timer(TimerId::ScoTx { handle, slot }, delay);
    }

    pub(crate) fn sco_tx_timeout(&mut self, handle: u16) {
        let cvsd_with_short_buffer = self.sco_voice_setting_active & 0x03 != 0x03 && self.sco_data_packet_length < 123;
        let Some(conn) = self.connections.for_handle_mut(handle) else {
            return;
        };
        conn.sco_tx_ready = 1;
        if cvsd_with_short_buffer {
            conn.sco_tx_ready += 1;
        }
        self.notify_if_sco_can_send_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_types_restricted_by_features() {
        // 3 and 5 slot packets, no EDR
        let features = [0x03, 0, 0, 0, 0, 0, 0, 0];
        let types = acl_packet_types(1021, &features);
        // DM1, DH1, DM3, DH3, DM5, DH5 allowed, every EDR type flagged as "may not be used"
        assert_eq!(types & 0xcc18, 0xcc18);
        assert_eq!(types & 0x3306, 0x3306);
    }

    #[test]
    fn small_buffer_drops_multi_slot_packets() {
        let features = [0xff; 8];
        let types = acl_packet_types(27, &features);
        assert_eq!(types & 0xcc18, 0x0018);
    }
}
