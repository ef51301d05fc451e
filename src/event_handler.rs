//! Processing of HCI events received from the controller.
use bt_hci::param::BdAddr;

use crate::acl::acl_packet_types;
use crate::codec::{bd_addr, byte, le16};
use crate::command::opcodes;
use crate::config::ACL_PAYLOAD_SIZE;
use crate::connection::{
    AddressType, AuthFlags, BondingFlags, ConnectionState, LeLinkParams, PendingAction, Role,
};
use crate::event::*;
use crate::gap::{adv_todo, InquiryState, LeConnectingState, RemoteNameState};
use crate::hci::{manufacturer, Hci};
use crate::link_key::{LinkKey, LinkKeyType};
use crate::power::{FallingAsleepStep, HciState, PowerMode, Substate};
use crate::run_loop::RunLoop;
use crate::transport::Transport;

const LE_ADVERTISING_DATA_SIZE: usize = 31;
const EXTENDED_INQUIRY_RESPONSE_DATA_LEN: usize = 240;
const DATA_TYPE_SHORTENED_LOCAL_NAME: u8 = 0x08;
const DATA_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

impl<'d, T: Transport, R: RunLoop> Hci<'d, T, R> {
    /// Updates the stack from one event, forwards it to the event handlers and runs the scheduler.
    pub(crate) fn handle_event(&mut self, packet: &[u8]) {
        if packet.len() < 2 || packet.len() != byte(packet, 1) as usize + 2 {
            error!(
                "[hci] event of {} bytes does not match its length field {}, dropping",
                packet.len(),
                byte(packet, 1)
            );
            return;
        }

        if !self.process_event(packet) {
            return;
        }

        self.event_for_current_state(packet);

        self.emit_event(packet, false);

        // handlers have seen the disconnection with the connection intact
        if let Ok(Event::DisconnectionComplete {
            status: status::SUCCESS,
            handle,
            ..
        }) = Event::read(packet)
        {
            let closed = self
                .connections
                .for_handle(handle)
                .is_some_and(|c| c.state == ConnectionState::ReceivedDisconnectionComplete);
            if let (true, Some(idx)) = (closed, self.connections.position(handle)) {
                self.shutdown_connection(idx);
            }
        }

        self.run();
    }

    fn event_for_current_state(&mut self, packet: &[u8]) {
        if self.state == HciState::Initializing {
            self.init_handle_event(packet);
        }
        if self.state == HciState::FallingAsleep
            && self.substate == Substate::FallingAsleep(FallingAsleepStep::W4WriteScanEnable)
            && byte(packet, 0) == EVENT_COMMAND_COMPLETE
            && le16(packet, 3) == opcodes::WRITE_SCAN_ENABLE
        {
            self.substate = Substate::FallingAsleep(FallingAsleepStep::Complete);
        }
    }

    /// Returns `false` when the event was consumed and must not reach upper layers.
    fn process_event(&mut self, packet: &[u8]) -> bool {
        let event = match Event::read(packet) {
            Ok(event) => event,
            Err(e) => {
                warn!("[hci] malformed event {:02x}: {:?}", byte(packet, 0), e);
                return true;
            }
        };
        match event {
            Event::CommandComplete {
                num_packets,
                opcode,
                data,
            } => {
                self.num_cmd_packets = (num_packets != 0) as u8;
                self.command_complete(opcode, data);
            }
            Event::CommandStatus {
                status,
                num_packets,
                opcode,
            } => {
                self.num_cmd_packets = (num_packets != 0) as u8;
                self.command_status(status, opcode);
            }
            Event::NumberOfCompletedPackets(completed) => {
                for (handle, count) in completed.iter() {
                    let Some(conn) = self.connections.for_handle_mut(handle) else {
                        error!("[acl] completed packets for unknown handle {:04x}", handle);
                        continue;
                    };
                    if conn.num_packets_sent >= count {
                        conn.num_packets_sent -= count;
                    } else {
                        error!(
                            "[acl] handle {:04x} completed {} packets with only {} outstanding",
                            handle, count, conn.num_packets_sent
                        );
                        conn.num_packets_sent = 0;
                    }
                }
                self.notify_if_sco_can_send_now();
            }
            Event::DisconnectionComplete { status, handle, reason } => {
                if status == status::SUCCESS {
                    self.disconnection_complete(handle, reason);
                }
            }
            Event::LeMeta { subevent, data } => self.le_meta(subevent, data),
            Event::Other { code, params } => return self.classic_event(code, params),
        }
        true
    }

    fn command_complete(&mut self, opcode: u16, data: &[u8]) {
        let status = byte(data, 0);
        match opcode {
            opcodes::READ_LOCAL_NAME => {
                debug!("[hci] local name read");
            }
            opcodes::READ_BUFFER_SIZE => {
                if self.state != HciState::Initializing {
                    return;
                }
                let acl_len = le16(data, 1);
                let sco_len = byte(data, 3);
                self.acl_data_packet_length = acl_len.min(ACL_PAYLOAD_SIZE as u16);
                self.sco_data_packet_length = (sco_len as usize).min(ACL_PAYLOAD_SIZE) as u8;
                self.acl_packets_total_num = le16(data, 4);
                self.sco_packets_total_num = le16(data, 6);
                info!(
                    "[hci] buffers: acl {} (controller {}) x {}, sco {} x {}",
                    self.acl_data_packet_length,
                    acl_len,
                    self.acl_packets_total_num,
                    self.sco_data_packet_length,
                    self.sco_packets_total_num
                );
            }
            opcodes::READ_RSSI => {
                if status == status::SUCCESS {
                    // handle and rssi
                    let measurement = data.get(1..4).unwrap_or(&[]);
                    let mut ev = SyntheticEvent::<5>::new(EVENT_GAP_RSSI_MEASUREMENT).bytes(measurement);
                    self.emit_event(ev.finish(), true);
                }
            }
            opcodes::LE_READ_BUFFER_SIZE => {
                self.le_data_packets_length = le16(data, 1).min(ACL_PAYLOAD_SIZE as u16);
                self.le_acl_packets_total_num = byte(data, 3);
                info!(
                    "[hci] le buffers: {} x {}",
                    self.le_data_packets_length, self.le_acl_packets_total_num
                );
            }
            opcodes::LE_READ_WHITE_LIST_SIZE => {
                self.le_whitelist_capacity = byte(data, 1);
                info!("[gap] whitelist capacity {}", self.le_whitelist_capacity);
            }
            opcodes::READ_BD_ADDR => {
                self.local_bd_addr = bd_addr(data, 1);
                info!("[hci] local address {:?}", self.local_bd_addr);
                let addr = self.local_bd_addr;
                if let Some(db) = self.link_key_db.as_deref_mut() {
                    db.set_local_bd_addr(&addr);
                }
            }
            opcodes::WRITE_SCAN_ENABLE => {
                self.emit_discoverable_enabled(self.discoverable);
            }
            opcodes::INQUIRY_CANCEL => {
                if self.inquiry_state == InquiryState::W4Cancelled {
                    self.inquiry_state = InquiryState::Idle;
                    self.emit_inquiry_complete();
                }
            }
            opcodes::READ_LOCAL_SUPPORTED_FEATURES => {
                if data.len() >= 9 {
                    self.local_supported_features.copy_from_slice(&data[1..9]);
                }
                self.packet_types = acl_packet_types(self.acl_data_packet_length, &self.local_supported_features);
                debug!(
                    "[hci] features {:?}, packet types {:04x}",
                    crate::Bytes(&self.local_supported_features),
                    self.packet_types
                );
            }
            opcodes::READ_LOCAL_VERSION_INFORMATION => {
                let mut id = le16(data, 5);
                if id == manufacturer::CYPRESS {
                    id = manufacturer::BROADCOM;
                }
                self.manufacturer = id;
                info!("[hci] manufacturer {:04x}", self.manufacturer);
            }
            opcodes::READ_LOCAL_SUPPORTED_COMMANDS => {
                let p = |octet: usize| byte(data, 1 + octet);
                self.local_supported_commands[0] = (p(14) & 0x80) >> 7 // Read Buffer Size
                    | (p(24) & 0x40) >> 5 // Write LE Host Supported
                    | (p(10) & 0x10) >> 2 // Write Synchronous Flow Control Enable
                    | (p(18) & 0x08) // Write Default Erroneous Data Reporting
                    | (p(34) & 0x01) << 4 // LE Write Suggested Default Data Length
                    | (p(35) & 0x08) << 2 // LE Read Maximum Data Length
                    | (p(35) & 0x20) << 1 // LE Set Default PHY
                    | (p(20) & 0x10) << 3; // Read Encryption Key Size
                self.local_supported_commands[1] = (p(2) & 0x40) >> 6 // Read Remote Extended Features
                    | (p(32) & 0x08) >> 2; // Write Secure Connections Host Support
                debug!(
                    "[hci] supported commands {:02x} {:02x}",
                    self.local_supported_commands[0], self.local_supported_commands[1]
                );
            }
            opcodes::WRITE_SYNCHRONOUS_FLOW_CONTROL_ENABLE => {
                if status == status::SUCCESS {
                    self.synchronous_flow_control_enabled = true;
                }
            }
            opcodes::READ_ENCRYPTION_KEY_SIZE => {
                let handle = le16(data, 1);
                let key_size = if status == status::SUCCESS { byte(data, 3) } else { 1 };
                let Some(conn) = self.connections.for_handle_mut(handle) else {
                    return;
                };
                if status != status::SUCCESS {
                    warn!("[hci] reading encryption key size failed: {:02x}", status);
                }
                conn.encryption_key_size = key_size;
                conn.auth.insert(AuthFlags::CONNECTION_ENCRYPTED);
                let level = self.security_level_for_connection(handle);
                self.emit_security_level(handle, level);
            }
            _ => {}
        }
    }

    fn command_status(&mut self, status: u8, opcode: u16) {
        if opcode != opcodes::CREATE_CONNECTION && opcode != opcodes::LE_CREATE_CONNECTION {
            return;
        }
        let Some((addr, address_type)) = self.outgoing.take() else {
            return;
        };
        if status == status::SUCCESS {
            return;
        }
        if let Some(idx) = self.connections.position_for_address(&addr, address_type) {
            self.connection_failed(idx, status);
        }
    }

    fn disconnection_complete(&mut self, handle: u16, reason: u8) {
        if self.acl_fragmentation_total > 0 && le16(&self.buffer, 0) & 0x0fff == handle {
            let release = !self.acl_fragmentation_tx_active;
            info!(
                "[acl] dropping fragments for closed handle {:04x}, release buffer {}",
                handle, release
            );
            self.acl_fragmentation_total = 0;
            self.acl_fragmentation_pos = 0;
            if release {
                self.release_packet_buffer();
            }
        }

        let Some(conn) = self.connections.for_handle_mut(handle) else {
            return;
        };
        info!("[hci] disconnection of handle {:04x}, reason {:02x}", handle, reason);
        conn.state = ConnectionState::ReceivedDisconnectionComplete;
        let emit_bonding_result = conn.bonding.contains(BondingFlags::EMIT_COMPLETE_ON_DISCONNECT);
        let (address, bonding_status, le) = (conn.address, conn.bonding_status, conn.is_le());
        if emit_bonding_result {
            self.emit_dedicated_bonding_result(&address, bonding_status);
        }
        if le {
            self.reenable_advertisements_if_needed();
        }
    }

    fn reenable_advertisements_if_needed(&mut self) {
        if self.le_advertising.active || !self.le_advertising.enabled {
            return;
        }
        let peripherals = self
            .connections
            .iter()
            .filter(|c| c.state == ConnectionState::Open && c.role == Role::Slave && c.is_le())
            .count();
        debug!(
            "[gap] {} of {} peripheral connections",
            peripherals, self.le_max_number_peripheral_connections
        );
        if peripherals < self.le_max_number_peripheral_connections as usize {
            self.le_advertising.todo |= adv_todo::ENABLE;
        }
    }

    /// Sets `flags` on the classic connection to `addr` and marks it active.
    fn add_auth_flags(&mut self, addr: &BdAddr, flags: AuthFlags) {
        let now = self.run_loop.now();
        if let Some(conn) = self.connections.for_address_mut(addr, AddressType::Acl) {
            conn.auth.insert(flags);
            conn.touch(now);
        }
    }

    fn push_action(&mut self, addr: &BdAddr, action: PendingAction) {
        if let Some(conn) = self.connections.for_address_mut(addr, AddressType::Acl) {
            conn.pending.push(action);
        }
    }

    /// Events without a dedicated decoding. `params` starts after the length field.
    fn classic_event(&mut self, code: u8, params: &[u8]) -> bool {
        let now = self.run_loop.now();
        match code {
            EVENT_INQUIRY_COMPLETE => {
                if self.inquiry_state == InquiryState::Active {
                    self.inquiry_state = InquiryState::Idle;
                    self.emit_inquiry_complete();
                }
            }
            EVENT_REMOTE_NAME_REQUEST_COMPLETE => {
                if self.remote_name.state == RemoteNameState::W4Complete {
                    self.remote_name.state = RemoteNameState::Idle;
                }
            }
            EVENT_INQUIRY_RESULT | EVENT_INQUIRY_RESULT_WITH_RSSI | EVENT_EXTENDED_INQUIRY_RESPONSE => {
                self.inquiry_explode(code, params);
            }
            EVENT_CONNECTION_REQUEST => {
                let addr = bd_addr(params, 0);
                if let Some(accept) = self.classic_accept_filter {
                    if !accept(&addr) {
                        info!("[gap] connection request from {:?} filtered", addr);
                        self.decline = Some((addr, status::CONNECTION_REJECTED_DUE_TO_UNACCEPTABLE_BD_ADDR));
                        return true;
                    }
                }
                let link_type = byte(params, 9);
                let address_type = if link_type == 1 { AddressType::Acl } else { AddressType::Sco };
                let conn = self
                    .connections
                    .find_or_create(addr, address_type, now)
                    .and_then(|idx| self.connections.get_mut(idx));
                let Some(conn) = conn else {
                    warn!("[gap] no connection slot for request from {:?}", addr);
                    self.decline = Some((addr, status::CONNECTION_REJECTED_DUE_TO_LIMITED_RESOURCES));
                    return true;
                };
                conn.role = Role::Slave;
                conn.state = ConnectionState::ReceivedConnectionRequest;
                if link_type == 2 {
                    conn.remote_esco = true;
                }
                self.run();
            }
            EVENT_CONNECTION_COMPLETE => {
                let status = byte(params, 0);
                let addr = bd_addr(params, 3);
                info!("[gap] connection complete to {:?}, status {:02x}", addr, status);
                let Some(idx) = self.connections.position_for_address(&addr, AddressType::Acl) else {
                    return true;
                };
                if status != status::SUCCESS {
                    self.connection_failed(idx, status);
                    return true;
                }
                let handle = le16(params, 1);
                let write_timeout = self.link_supervision_timeout != 0;
                if let Some(conn) = self.connections.get_mut(idx) {
                    conn.state = ConnectionState::Open;
                    conn.handle = handle;
                    conn.pending.push(PendingAction::RequestRemoteFeatures);
                    if write_timeout && conn.role == Role::Master {
                        conn.pending.push(PendingAction::WriteSupervisionTimeout);
                    }
                    conn.touch(now);
                }
                self.start_connection_timer(handle);
                self.emit_nr_connections_changed();
            }
            EVENT_SYNCHRONOUS_CONNECTION_COMPLETE => {
                let status = byte(params, 0);
                let addr = bd_addr(params, 3);
                info!("[sco] connection complete to {:?}, status {:02x}", addr, status);
                if status != status::SUCCESS {
                    return true;
                }
                let conn = self
                    .connections
                    .find_or_create(addr, AddressType::Sco, now)
                    .and_then(|idx| self.connections.get_mut(idx));
                let Some(conn) = conn else {
                    return true;
                };
                conn.state = ConnectionState::Open;
                conn.handle = le16(params, 1);
                conn.sco_rx_valid = false;
                conn.sco_rx_count = 0;
                conn.sco_tx_ready = 0;
            }
            EVENT_READ_REMOTE_SUPPORTED_FEATURES_COMPLETE => {
                let handle = le16(params, 1);
                let Some(conn) = self.connections.for_handle_mut(handle) else {
                    return true;
                };
                if byte(params, 0) == status::SUCCESS {
                    let features = &params[3.min(params.len())..];
                    if byte(features, 6) & 0x08 != 0 {
                        conn.bonding.insert(BondingFlags::REMOTE_SUPPORTS_SSP);
                    }
                    if byte(features, 3) & 0x80 != 0 {
                        conn.remote_esco = true;
                    }
                }
                conn.bonding.insert(BondingFlags::RECEIVED_REMOTE_FEATURES);
                debug!("[gap] remote features for {:04x}, bonding {:?}", handle, conn.bonding);
                if conn.bonding.contains(BondingFlags::DEDICATED) {
                    conn.pending.push(PendingAction::AuthenticationRequest);
                }
            }
            EVENT_LINK_KEY_REQUEST => {
                let addr = bd_addr(params, 0);
                self.add_auth_flags(&addr, AuthFlags::RECV_LINK_KEY_REQUEST);
                // bondable without storage: upper layers answer
                if self.bondable && self.link_key_db.is_none() {
                    return true;
                }
                self.push_action(&addr, PendingAction::LinkKeyRequest);
                self.run();
                return false;
            }
            EVENT_LINK_KEY_NOTIFICATION => {
                let addr = bd_addr(params, 0);
                let Some(conn) = self.connections.for_address_mut(&addr, AddressType::Acl) else {
                    return true;
                };
                conn.auth.insert(AuthFlags::RECV_LINK_KEY_NOTIFICATION);
                let key_type = LinkKeyType(byte(params, 22));
                // a changed combination key keeps the type of the original key
                if key_type != LinkKeyType::CHANGED_COMBINATION {
                    conn.link_key_type = key_type;
                }
                let key_type = conn.link_key_type;
                let mut key: LinkKey = [0; 16];
                if params.len() >= 22 {
                    key.copy_from_slice(&params[6..22]);
                }
                self.store_link_key(&addr, &key, key_type);
            }
            EVENT_PIN_CODE_REQUEST => {
                let addr = bd_addr(params, 0);
                self.add_auth_flags(&addr, AuthFlags::LEGACY_PAIRING_ACTIVE);
                if !self.bondable {
                    self.push_action(&addr, PendingAction::DenyPinCodeRequest);
                    self.run();
                    return false;
                }
                // the stored key was not accepted
                self.drop_link_key(&addr);
            }
            EVENT_IO_CAPABILITY_REQUEST => {
                let addr = bd_addr(params, 0);
                self.add_auth_flags(&addr, AuthFlags::RECV_IO_CAPABILITIES_REQUEST);
                self.push_action(&addr, PendingAction::IoCapabilityReply);
            }
            EVENT_USER_CONFIRMATION_REQUEST => {
                let addr = bd_addr(params, 0);
                self.add_auth_flags(&addr, AuthFlags::SSP_PAIRING_ACTIVE);
                if self.ssp_auto_accept {
                    self.push_action(&addr, PendingAction::UserConfirmReply);
                }
            }
            EVENT_USER_PASSKEY_REQUEST => {
                let addr = bd_addr(params, 0);
                self.add_auth_flags(&addr, AuthFlags::SSP_PAIRING_ACTIVE);
                if self.ssp_auto_accept {
                    self.push_action(&addr, PendingAction::UserPasskeyReply);
                }
            }
            EVENT_MODE_CHANGE => {
                let handle = le16(params, 1);
                if let Some(conn) = self.connections.for_handle_mut(handle) {
                    conn.connection_mode = byte(params, 3);
                    debug!("[gap] handle {:04x} in mode {}", handle, conn.connection_mode);
                }
            }
            EVENT_ENCRYPTION_CHANGE => self.encryption_change(params),
            EVENT_AUTHENTICATION_COMPLETE => {
                let status = byte(params, 0);
                let handle = le16(params, 1);
                let Some(conn) = self.connections.for_handle_mut(handle) else {
                    return true;
                };
                if conn.bonding.contains(BondingFlags::DEDICATED) {
                    conn.bonding.remove(BondingFlags::DEDICATED);
                    conn.pending.push(PendingAction::DisconnectDedicatedBondingDone);
                    conn.bonding_status = status;
                    return true;
                }
                if status == status::SUCCESS && conn.link_key_type.security_level() >= conn.requested_security_level {
                    conn.pending.push(PendingAction::EncryptionRequest);
                    return true;
                }
                let level = self.security_level_for_connection(handle);
                self.emit_security_level(handle, level);
            }
            EVENT_HARDWARE_ERROR => {
                let code = byte(params, 0);
                error!("[hci] hardware error {:02x}", code);
                if let Some(callback) = self.hardware_error_callback {
                    callback(code);
                } else {
                    self.control_off();
                    if let Err(e) = self.power_control(PowerMode::On) {
                        error!("[hci] restart after hardware error failed: {:?}", e);
                    }
                }
            }
            EVENT_ROLE_CHANGE => {
                if byte(params, 0) != status::SUCCESS {
                    return true;
                }
                let addr = bd_addr(params, 1);
                if let Some(conn) = self.connections.for_address_mut(&addr, AddressType::Acl) {
                    conn.role = Role::from_u8(byte(params, 7));
                    debug!("[gap] role of {:?} now {:?}", addr, conn.role);
                }
            }
            EVENT_TRANSPORT_PACKET_SENT => {
                if self.transport.is_synchronous() {
                    error!("[hci] synchronous transport reported a sent packet");
                    return false;
                }
                self.acl_fragmentation_tx_active = false;
                if self.acl_fragmentation_total > 0 {
                    return true;
                }
                self.release_packet_buffer();
                self.notify_if_sco_can_send_now();
            }
            EVENT_SCO_CAN_SEND_NOW => {
                self.sco_can_send_now = true;
                self.notify_if_sco_can_send_now();
                return false;
            }
            EVENT_VENDOR_SPECIFIC => {
                // vendor commands may be answered by a vendor event only
                if self.manufacturer == manufacturer::CAMBRIDGE_SILICON_RADIO {
                    self.num_cmd_packets = 1;
                }
            }
            _ => {}
        }
        true
    }

    fn encryption_change(&mut self, params: &[u8]) {
        let status = byte(params, 0);
        let handle = le16(params, 1);
        let enabled = byte(params, 3);
        let commands = self.local_supported_commands[0];
        let Some(conn) = self.connections.for_handle_mut(handle) else {
            return;
        };
        if status != status::SUCCESS {
            return;
        }
        if enabled == 0 {
            conn.auth.remove(AuthFlags::CONNECTION_ENCRYPTED);
            return;
        }
        if conn.is_le() {
            conn.auth.insert(AuthFlags::CONNECTION_ENCRYPTED);
            return;
        }
        // pairing used Secure Connections, so the link has to use AES-CCM
        if conn.link_key_type.is_secure_connection() && enabled != 2 {
            warn!("[gap] handle {:04x} encrypted with E0 after secure connections pairing", handle);
            conn.pending.push(PendingAction::DisconnectSecurityBlock);
            return;
        }
        if commands & 0x80 != 0 {
            conn.pending.push(PendingAction::ReadEncryptionKeySize);
            return;
        }
        conn.encryption_key_size = 16;
        conn.auth.insert(AuthFlags::CONNECTION_ENCRYPTED);
        let level = self.security_level_for_connection(handle);
        self.emit_security_level(handle, level);
    }

    /// Splits inquiry results into one inquiry result event per responding device.
    fn inquiry_explode(&self, code: u8, params: &[u8]) {
        let num_responses = byte(params, 0) as usize;
        let reserved = if code == EVENT_INQUIRY_RESULT { 2 } else { 1 };
        match code {
            EVENT_INQUIRY_RESULT | EVENT_INQUIRY_RESULT_WITH_RSSI => {
                if params.len() != 1 + num_responses * 14 {
                    return;
                }
            }
            _ => {
                if params.len() != 255 || num_responses != 1 {
                    return;
                }
            }
        }

        let n = num_responses;
        for i in 0..n {
            let addr = bd_addr(params, 1 + i * 6);
            let page_scan_repetition_mode = byte(params, 1 + n * 6 + i);
            let cod = 1 + n * (6 + 1 + reserved) + i * 3;
            let clock_offset = le16(params, 1 + n * (6 + 1 + reserved + 3) + i * 2);

            let mut ev = SyntheticEvent::<{ 18 + INQUIRY_MAX_NAME_LEN }>::new(EVENT_GAP_INQUIRY_RESULT)
                .addr(&addr)
                .u8(page_scan_repetition_mode)
                .bytes(&params[cod..cod + 3])
                .u16(clock_offset);

            if code == EVENT_INQUIRY_RESULT {
                ev = ev.u8(0).u8(0).u8(0).u8(0);
            } else {
                let rssi = byte(params, 1 + n * (6 + 1 + reserved + 3 + 2) + i);
                ev = ev.u8(1).u8(rssi);
                let name = if code == EVENT_EXTENDED_INQUIRY_RESPONSE {
                    let start = 1 + (6 + 1 + reserved + 3 + 2 + 1);
                    let end = (start + EXTENDED_INQUIRY_RESPONSE_DATA_LEN).min(params.len());
                    eir_name(&params[start..end])
                } else {
                    None
                };
                ev = match name {
                    Some(name) => {
                        let len = name.len().min(INQUIRY_MAX_NAME_LEN);
                        ev.u8(1).u8(len as u8).bytes(&name[..len])
                    }
                    None => ev.u8(0).u8(0),
                };
            }
            self.emit_event(ev.finish(), true);
        }
    }

    fn le_meta(&mut self, subevent: u8, data: &[u8]) {
        match subevent {
            SUBEVENT_LE_ADVERTISING_REPORT => {
                if self.le_scanning_enabled {
                    self.advertising_report(data);
                }
            }
            SUBEVENT_LE_CONNECTION_COMPLETE => self.le_connection_complete(data),
            SUBEVENT_LE_CONNECTION_UPDATE_COMPLETE => {
                let handle = le16(data, 1);
                if let Some(conn) = self.connections.for_handle_mut(handle) {
                    conn.le_connection_interval = le16(data, 3);
                    debug!("[gap] handle {:04x} interval {}", handle, conn.le_connection_interval);
                }
            }
            SUBEVENT_LE_REMOTE_CONNECTION_PARAMETER_REQUEST => {
                let handle = le16(data, 1);
                let params = LeLinkParams {
                    interval_min: le16(data, 3),
                    interval_max: le16(data, 5),
                    latency: le16(data, 7),
                    supervision_timeout: le16(data, 9),
                };
                let accept = self.le_connection_parameter_range.includes(&params);
                let Some(conn) = self.connections.for_handle_mut(handle) else {
                    return;
                };
                if accept {
                    conn.le_params = params;
                    conn.pending.push(PendingAction::LeRemoteParamReply);
                } else {
                    info!("[gap] handle {:04x} requested parameters out of range", handle);
                    conn.pending.push(PendingAction::LeRemoteParamNegativeReply);
                }
            }
            _ => {}
        }
    }

    fn advertising_report(&self, data: &[u8]) {
        let num_reports = byte(data, 0);
        let mut offset = 1;
        let mut i = 0;
        while i < num_reports && offset < data.len() {
            let data_length = byte(data, offset + 8) as usize;
            if data_length > LE_ADVERTISING_DATA_SIZE || offset + 9 + data_length + 1 > data.len() {
                return;
            }
            let rssi = data[offset + 9 + data_length];
            let mut ev = SyntheticEvent::<{ 12 + LE_ADVERTISING_DATA_SIZE }>::new(EVENT_GAP_ADVERTISING_REPORT)
                // event type, address type, address
                .bytes(&data[offset..offset + 8])
                .u8(rssi)
                .u8(data_length as u8)
                .bytes(&data[offset + 9..offset + 9 + data_length]);
            self.emit_event(ev.finish(), true);
            offset += 9 + data_length + 1;
            i += 1;
        }
    }

    fn le_connection_complete(&mut self, data: &[u8]) {
        let status = byte(data, 0);
        let handle = le16(data, 1);
        let role = Role::from_u8(byte(data, 3));
        let address_type = AddressType::from_u8(byte(data, 4));
        let addr = bd_addr(data, 5);
        let interval = le16(data, 11);
        info!(
            "[gap] le connection complete to {:?} ({:?}), status {:02x}",
            addr, address_type, status
        );

        // auto connect entries are consumed in both roles
        if self.le_connecting_state == LeConnectingState::Whitelist {
            self.le_whitelist.remove(&addr, address_type);
        }

        if status != status::SUCCESS {
            // a cancelled attempt reports unknown connection identifier
            let idx = if status == status::UNKNOWN_CONNECTION_IDENTIFIER {
                let outgoing = self.connections.outgoing_le().map(|c| (c.address, c.address_type));
                outgoing.and_then(|(a, t)| self.connections.position_for_address(&a, t))
            } else {
                self.connections.position_for_address(&addr, address_type)
            };
            self.le_connecting_state = LeConnectingState::Idle;
            if let Some(idx) = idx {
                self.connections.remove(idx);
            }
            return;
        }

        if role == Role::Master {
            self.le_connecting_state = LeConnectingState::Idle;
        } else {
            self.le_advertising.active = false;
        }

        let now = self.run_loop.now();
        let conn = self
            .connections
            .find_or_create(addr, address_type, now)
            .and_then(|idx| self.connections.get_mut(idx));
        let Some(conn) = conn else {
            warn!("[gap] no connection slot for {:?}", addr);
            return;
        };
        conn.state = ConnectionState::Open;
        conn.role = role;
        conn.handle = handle;
        conn.le_connection_interval = interval;
        conn.touch(now);

        if role == Role::Slave {
            self.reenable_advertisements_if_needed();
        }
        self.start_connection_timer(handle);
        self.emit_nr_connections_changed();
    }
}

/// Finds the device name in EIR data, preferring the complete name over the shortened one.
fn eir_name(eir: &[u8]) -> Option<&[u8]> {
    let mut name = None;
    let mut pos = 0;
    while pos < eir.len() {
        let len = eir[pos] as usize;
        if len == 0 || pos + 1 + len > eir.len() {
            break;
        }
        let data_type = eir[pos + 1];
        let data = &eir[pos + 2..pos + 1 + len];
        match data_type {
            DATA_TYPE_COMPLETE_LOCAL_NAME => return Some(data),
            DATA_TYPE_SHORTENED_LOCAL_NAME if name.is_none() => name = Some(data),
            _ => {}
        }
        pos += 1 + len;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_name_wins() {
        let eir = [
            0x04, DATA_TYPE_SHORTENED_LOCAL_NAME, b'a', b'b', b'c', //
            0x02, 0x0a, 0x04, //
            0x06, DATA_TYPE_COMPLETE_LOCAL_NAME, b'a', b'b', b'c', b'd', b'e', //
            0x00, 0x00,
        ];
        assert_eq!(eir_name(&eir), Some(&b"abcde"[..]));
    }

    #[test]
    fn shortened_name_used_alone() {
        let eir = [0x03, DATA_TYPE_SHORTENED_LOCAL_NAME, b'x', b'y', 0x00];
        assert_eq!(eir_name(&eir), Some(&b"xy"[..]));
    }

    #[test]
    fn truncated_structure_stops() {
        let eir = [0x09, DATA_TYPE_COMPLETE_LOCAL_NAME, b'x'];
        assert_eq!(eir_name(&eir), None);
    }
}
