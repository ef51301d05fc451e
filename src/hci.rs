//! The HCI stack state and its plumbing: command sending, packet dispatch, timers and the
//! events the stack generates for upper layers.
use bt_hci::param::BdAddr;
use embassy_time::Duration;
use heapless::Vec;

use crate::chipset::{Chipset, ChipsetResult};
use crate::codec::{bd_addr, byte, le16};
use crate::command::{opcodes, Command, CommandHeader, ConnParams};
use crate::config::{MAX_EVENT_HANDLERS, OUTGOING_PACKET_BUFFER_SIZE};
use crate::connection::{
    AddressType, AuthFlags, BondingFlags, ConnectionRegistry, ConnectionState, SecurityLevel, CONNECTION_TIMEOUT,
};
use crate::control::BluetoothControl;
use crate::event::*;
use crate::gap::{
    Advertising, ConnectionParameterRange, InquiryState, IoCapability, LeConnectingState, PairingResponse,
    RemoteNameRequest, Whitelist,
};
use crate::link_key::LinkKeyDb;
use crate::logger::{Direction, PacketLogger};
use crate::power::{HaltingStep, HciState, Substate};
use crate::run_loop::{RunLoop, TimerId};
use crate::transport::{PacketType, Transport, TransportConfig};
use crate::Error;

/// Company identifiers the stack special-cases.
pub mod manufacturer {
    pub const CAMBRIDGE_SILICON_RADIO: u16 = 0x000a;
    pub const TEXAS_INSTRUMENTS: u16 = 0x000d;
    pub const BROADCOM: u16 = 0x000f;
    pub const ATMEL: u16 = 0x0013;
    pub const ST_MICROELECTRONICS: u16 = 0x0030;
    pub const EM_MICROELECTRONIC_MARIN: u16 = 0x005a;
    pub const CYPRESS: u16 = 0x0131;
}

pub(crate) const DEFAULT_LOCAL_NAME: &str = "trouble 00:00:00:00:00:00";

/// A Bluetooth host stack driving one controller over `T`, with timers from `R`.
///
/// All state lives here and is only changed through `&mut self`. Progress is made by feeding
/// it packets ([`Hci::poll`] or [`Hci::handle_packet`]) and expired timers
/// ([`Hci::handle_timeout`]).
pub struct Hci<'d, T: Transport, R: RunLoop> {
    pub(crate) transport: T,
    pub(crate) run_loop: R,
    pub(crate) config: TransportConfig,

    pub(crate) chipset: Option<&'d mut dyn Chipset>,
    pub(crate) control: Option<&'d mut dyn BluetoothControl>,
    pub(crate) link_key_db: Option<&'d mut dyn LinkKeyDb>,
    pub(crate) logger: Option<&'d dyn PacketLogger>,
    pub(crate) event_handlers: Vec<&'d dyn EventHandler, MAX_EVENT_HANDLERS>,
    pub(crate) acl_handler: Option<&'d dyn PacketHandler>,
    pub(crate) sco_handler: Option<&'d dyn PacketHandler>,
    pub(crate) classic_accept_filter: Option<fn(&BdAddr) -> bool>,
    pub(crate) hardware_error_callback: Option<fn(u8)>,

    pub(crate) state: HciState,
    pub(crate) substate: Substate,
    pub(crate) chipset_result: ChipsetResult,
    pub(crate) num_cmd_packets: u8,
    pub(crate) last_cmd_opcode: u16,

    pub(crate) buffer: [u8; OUTGOING_PACKET_BUFFER_SIZE],
    pub(crate) buffer_reserved: bool,
    pub(crate) acl_fragmentation_pos: usize,
    pub(crate) acl_fragmentation_total: usize,
    pub(crate) acl_fragmentation_tx_active: bool,

    pub(crate) connections: ConnectionRegistry,
    /// Address of the connection a create connection command was sent for.
    pub(crate) outgoing: Option<(BdAddr, AddressType)>,

    pub(crate) manufacturer: u16,
    pub(crate) local_supported_features: [u8; 8],
    pub(crate) local_supported_commands: [u8; 2],
    pub(crate) local_bd_addr: BdAddr,
    pub(crate) custom_bd_addr: Option<BdAddr>,
    pub(crate) packet_types: u16,
    pub(crate) acl_data_packet_length: u16,
    pub(crate) acl_packets_total_num: u16,
    pub(crate) sco_data_packet_length: u8,
    pub(crate) sco_packets_total_num: u16,
    pub(crate) le_data_packets_length: u16,
    pub(crate) le_acl_packets_total_num: u8,
    pub(crate) synchronous_flow_control_enabled: bool,

    pub(crate) class_of_device: u32,
    pub(crate) local_name: &'d str,
    pub(crate) eir_data: Option<&'d [u8]>,
    pub(crate) default_link_policy_settings: u16,
    pub(crate) allow_role_switch: bool,
    pub(crate) master_slave_policy: u8,
    pub(crate) link_supervision_timeout: u16,
    pub(crate) discoverable: bool,
    pub(crate) connectable: bool,
    pub(crate) bondable: bool,
    /// Scan enable value to write, `0xff` when nothing is pending.
    pub(crate) new_scan_enable_value: u8,
    pub(crate) decline: Option<(BdAddr, u8)>,
    pub(crate) inquiry_mode: u8,
    pub(crate) inquiry_state: InquiryState,
    pub(crate) remote_name: RemoteNameRequest,
    pub(crate) pairing: Option<(BdAddr, PairingResponse)>,
    pub(crate) security_level: SecurityLevel,
    pub(crate) required_encryption_key_size: u8,
    pub(crate) ssp_enable: bool,
    pub(crate) ssp_io_capability: IoCapability,
    pub(crate) ssp_authentication_requirement: u8,
    pub(crate) ssp_auto_accept: bool,
    pub(crate) secure_connections_enable: bool,
    pub(crate) disable_l2cap_timeouts: bool,
    pub(crate) sco_voice_setting: u16,
    pub(crate) sco_voice_setting_active: u16,
    pub(crate) sco_waiting_for_can_send_now: bool,
    pub(crate) sco_can_send_now: bool,

    pub(crate) le_own_addr_type: u8,
    pub(crate) le_random_address: BdAddr,
    pub(crate) le_random_address_set: bool,
    pub(crate) le_scanning_enabled: bool,
    pub(crate) le_scanning_active: bool,
    /// Scan type to configure, `0xff` when the parameters are current.
    pub(crate) le_scan_type: u8,
    pub(crate) le_scan_interval: u16,
    pub(crate) le_scan_window: u16,
    pub(crate) le_connecting_state: LeConnectingState,
    pub(crate) le_connection_scan_interval: u16,
    pub(crate) le_connection_scan_window: u16,
    pub(crate) le_conn_params: ConnParams,
    pub(crate) le_connection_parameter_range: ConnectionParameterRange,
    pub(crate) le_whitelist: Whitelist,
    pub(crate) le_whitelist_capacity: u8,
    pub(crate) le_advertising: Advertising,
    pub(crate) le_max_number_peripheral_connections: u8,
}

impl<'d, T: Transport, R: RunLoop> Hci<'d, T, R> {
    /// Creates a stack in the OFF state. Nothing is sent until [`Hci::power_control`] turns it on.
    pub fn new(transport: T, run_loop: R, config: TransportConfig) -> Self {
        let mut hci = Self {
            transport,
            run_loop,
            config,
            chipset: None,
            control: None,
            link_key_db: None,
            logger: None,
            event_handlers: Vec::new(),
            acl_handler: None,
            sco_handler: None,
            classic_accept_filter: None,
            hardware_error_callback: None,

            state: HciState::Off,
            substate: Substate::None,
            chipset_result: ChipsetResult::NoInitScript,
            num_cmd_packets: 0,
            last_cmd_opcode: 0,

            buffer: [0; OUTGOING_PACKET_BUFFER_SIZE],
            buffer_reserved: false,
            acl_fragmentation_pos: 0,
            acl_fragmentation_total: 0,
            acl_fragmentation_tx_active: false,

            connections: ConnectionRegistry::new(),
            outgoing: None,

            manufacturer: 0xffff,
            local_supported_features: [0; 8],
            local_supported_commands: [0; 2],
            local_bd_addr: BdAddr::new([0; 6]),
            custom_bd_addr: None,
            packet_types: 0,
            acl_data_packet_length: crate::config::ACL_PAYLOAD_SIZE as u16,
            acl_packets_total_num: 0,
            sco_data_packet_length: 0,
            sco_packets_total_num: 0,
            le_data_packets_length: 0,
            le_acl_packets_total_num: 0,
            synchronous_flow_control_enabled: false,

            class_of_device: 0x007a020c,
            local_name: DEFAULT_LOCAL_NAME,
            eir_data: None,
            default_link_policy_settings: 0,
            allow_role_switch: true,
            master_slave_policy: 1,
            link_supervision_timeout: 0,
            discoverable: false,
            connectable: false,
            bondable: true,
            new_scan_enable_value: 0xff,
            decline: None,
            inquiry_mode: 0,
            inquiry_state: InquiryState::Idle,
            remote_name: RemoteNameRequest::default(),
            pairing: None,
            security_level: SecurityLevel::Level2,
            required_encryption_key_size: 16,
            ssp_enable: true,
            ssp_io_capability: IoCapability::NoInputNoOutput,
            ssp_authentication_requirement: 0x02,
            ssp_auto_accept: true,
            secure_connections_enable: true,
            disable_l2cap_timeouts: false,
            sco_voice_setting: 0x60,
            sco_voice_setting_active: 0x60,
            sco_waiting_for_can_send_now: false,
            sco_can_send_now: false,

            le_own_addr_type: 0,
            le_random_address: BdAddr::new([0; 6]),
            le_random_address_set: false,
            le_scanning_enabled: false,
            le_scanning_active: false,
            le_scan_type: 0xff,
            le_scan_interval: 0x1e0,
            le_scan_window: 0x30,
            le_connecting_state: LeConnectingState::Idle,
            le_connection_scan_interval: 0x0060,
            le_connection_scan_window: 0x0030,
            le_conn_params: ConnParams {
                interval_min: 0x0008,
                interval_max: 0x0018,
                latency: 4,
                supervision_timeout: 0x0048,
                min_ce_length: 2,
                max_ce_length: 0x0030,
            },
            le_connection_parameter_range: ConnectionParameterRange::default(),
            le_whitelist: Whitelist::new(),
            le_whitelist_capacity: 0,
            le_advertising: Advertising::default(),
            le_max_number_peripheral_connections: 1,
        };
        hci.state_reset();
        hci
    }

    /// Forgets everything learned from the controller during the last session.
    pub(crate) fn state_reset(&mut self) {
        self.connections = ConnectionRegistry::new();
        self.buffer_reserved = false;
        self.acl_fragmentation_pos = 0;
        self.acl_fragmentation_total = 0;
        self.acl_fragmentation_tx_active = false;
        self.decline = None;
        self.new_scan_enable_value = 0xff;
        self.le_random_address = BdAddr::new([0; 6]);
        self.le_random_address_set = false;
        self.le_scanning_active = false;
        self.le_scan_type = 0xff;
        self.le_connecting_state = LeConnectingState::Idle;
        self.le_whitelist.clear();
        self.le_whitelist_capacity = 0;
        self.synchronous_flow_control_enabled = false;
    }

    /// Sets the vendor driver. Its init script restarts on every power on.
    pub fn set_chipset(&mut self, chipset: &'d mut dyn Chipset) {
        chipset.init(&self.config);
        self.chipset.replace(chipset);
    }

    pub fn set_control(&mut self, control: &'d mut dyn BluetoothControl) {
        control.init(&self.config);
        self.control.replace(control);
    }

    pub fn set_link_key_db(&mut self, db: &'d mut dyn LinkKeyDb) {
        db.open();
        self.link_key_db.replace(db);
    }

    pub fn set_packet_logger(&mut self, logger: &'d dyn PacketLogger) {
        self.logger.replace(logger);
    }

    pub fn add_event_handler(&mut self, handler: &'d dyn EventHandler) -> Result<(), Error> {
        self.event_handlers
            .push(handler)
            .map_err(|_| Error::MemoryCapacityExceeded)
    }

    pub fn register_acl_packet_handler(&mut self, handler: &'d dyn PacketHandler) {
        self.acl_handler.replace(handler);
    }

    pub fn register_sco_packet_handler(&mut self, handler: &'d dyn PacketHandler) {
        self.sco_handler.replace(handler);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn run_loop(&self) -> &R {
        &self.run_loop
    }

    pub fn run_loop_mut(&mut self) -> &mut R {
        &mut self.run_loop
    }

    pub fn state(&self) -> HciState {
        self.state
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn manufacturer(&self) -> u16 {
        self.manufacturer
    }

    /// Raw `HCI_Read_Local_Supported_Features` bitmap.
    pub fn local_supported_features(&self) -> &[u8; 8] {
        &self.local_supported_features
    }

    /// ACL packet types usable for outgoing classic connections.
    pub fn usable_acl_packet_types(&self) -> u16 {
        self.packet_types
    }

    // Outgoing buffer

    pub fn reserve_packet_buffer(&mut self) -> Result<(), Error> {
        if self.buffer_reserved {
            error!("[hci] packet buffer already reserved");
            return Err(Error::PacketBufferReserved);
        }
        self.buffer_reserved = true;
        Ok(())
    }

    pub fn release_packet_buffer(&mut self) {
        self.buffer_reserved = false;
    }

    pub fn is_packet_buffer_reserved(&self) -> bool {
        self.buffer_reserved
    }

    /// The outgoing buffer, to prepare an ACL or SCO packet in after reserving it.
    pub fn packet_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..]
    }

    pub fn can_send_command_packet_now(&self) -> bool {
        if self.buffer_reserved {
            return false;
        }
        if !self.transport.can_send_packet_now(PacketType::Command) {
            return false;
        }
        self.num_cmd_packets > 0
    }

    // Commands

    /// Serializes and sends `cmd`, failing with [`Error::CommandDisallowed`] unless a command
    /// can be sent right now.
    pub fn send_cmd(&mut self, cmd: &Command<'_>) -> Result<(), Error> {
        if !self.can_send_command_packet_now() {
            warn!("[hci] send_cmd {:04x} not possible right now", cmd.opcode());
            return Err(Error::CommandDisallowed);
        }
        self.reserve_packet_buffer()?;
        let len = match cmd.encode(&mut self.buffer[..]) {
            Ok(len) => len,
            Err(e) => {
                self.release_packet_buffer();
                return Err(e.into());
            }
        };
        self.last_cmd_opcode = cmd.opcode();
        self.send_cmd_packet(len)
    }

    /// Sends a command the chipset driver wrote into the buffer, without reserving it or
    /// consuming a command credit. Vendor commands may be answered by vendor events only.
    pub(crate) fn send_raw_command(&mut self) {
        let Some(header) = CommandHeader::from_bytes(&self.buffer) else {
            return;
        };
        debug!(
            "[hci] vendor command ogf {:02x} ocf {:04x}, {} bytes",
            header.ogf(),
            header.ocf(),
            header.len
        );
        let len = 3 + header.len as usize;
        self.last_cmd_opcode = header.opcode;
        self.log_packet(Direction::Outgoing, PacketType::Command, &self.buffer[..len]);
        if let Err(e) = self.transport.send_packet(PacketType::Command, &self.buffer[..len]) {
            error!("[hci] sending vendor command failed: {:?}", e);
        }
    }

    /// Bookkeeping for a serialized command in the reserved buffer, then hands it to the transport.
    pub(crate) fn send_cmd_packet(&mut self, len: usize) -> Result<(), Error> {
        let opcode = le16(&self.buffer, 0);
        let addr = bd_addr(&self.buffer, 3);

        match opcode {
            opcodes::CREATE_CONNECTION => {
                debug!("[hci] create connection to {:?}", addr);
                let now = self.run_loop.now();
                let conn = self
                    .connections
                    .find_or_create(addr, AddressType::Acl, now)
                    .and_then(|idx| self.connections.get_mut(idx));
                let Some(conn) = conn else {
                    self.release_packet_buffer();
                    self.emit_connection_complete(&addr, 0, status::MEMORY_CAPACITY_EXCEEDED);
                    return Ok(());
                };
                match conn.state {
                    ConnectionState::Open => {
                        // already connected
                        let handle = conn.handle;
                        self.release_packet_buffer();
                        self.emit_connection_complete(&addr, handle, status::SUCCESS);
                        return Ok(());
                    }
                    ConnectionState::ReceivedDisconnectionComplete | ConnectionState::SendCreateConnection => {}
                    state => {
                        warn!("[hci] create connection while in state {:?}", state);
                        self.release_packet_buffer();
                        return Ok(());
                    }
                }
                conn.state = ConnectionState::SentCreateConnection;
                self.outgoing.replace((addr, AddressType::Acl));
            }
            opcodes::LINK_KEY_REQUEST_REPLY | opcodes::LINK_KEY_REQUEST_NEGATIVE_REPLY => {
                self.clear_auth_flags(&addr, AuthFlags::RECV_LINK_KEY_REQUEST);
            }
            opcodes::DELETE_STORED_LINK_KEY => {
                if let Some(db) = self.link_key_db.as_deref_mut() {
                    if byte(&self.buffer, 9) == 1 {
                        db.clear();
                    } else {
                        db.delete_link_key(&addr);
                    }
                }
            }
            opcodes::PIN_CODE_REQUEST_REPLY | opcodes::PIN_CODE_REQUEST_NEGATIVE_REPLY => {
                self.clear_auth_flags(&addr, AuthFlags::LEGACY_PAIRING_ACTIVE);
            }
            opcodes::USER_CONFIRMATION_REQUEST_REPLY
            | opcodes::USER_CONFIRMATION_REQUEST_NEGATIVE_REPLY
            | opcodes::USER_PASSKEY_REQUEST_REPLY
            | opcodes::USER_PASSKEY_REQUEST_NEGATIVE_REPLY => {
                self.clear_auth_flags(&addr, AuthFlags::SSP_PAIRING_ACTIVE);
            }
            opcodes::SETUP_SYNCHRONOUS_CONNECTION => {
                self.sco_voice_setting_active = le16(&self.buffer, 15);
            }
            opcodes::ACCEPT_SYNCHRONOUS_CONNECTION => {
                self.sco_voice_setting_active = le16(&self.buffer, 19);
            }
            opcodes::LE_SET_RANDOM_ADDRESS => {
                self.le_random_address_set = true;
                self.le_random_address = addr;
            }
            opcodes::LE_SET_ADVERTISE_ENABLE => {
                self.le_advertising.active = byte(&self.buffer, 3) != 0;
            }
            opcodes::LE_CREATE_CONNECTION => match byte(&self.buffer, 7) {
                0 => {
                    self.le_connecting_state = LeConnectingState::Direct;
                    let peer = bd_addr(&self.buffer, 9);
                    self.outgoing
                        .replace((peer, AddressType::from_u8(byte(&self.buffer, 8))));
                }
                1 => self.le_connecting_state = LeConnectingState::Whitelist,
                _ => {}
            },
            opcodes::LE_CREATE_CONNECTION_CANCEL => {
                self.le_connecting_state = LeConnectingState::Idle;
            }
            _ => {}
        }

        self.num_cmd_packets = self.num_cmd_packets.saturating_sub(1);
        self.log_packet(Direction::Outgoing, PacketType::Command, &self.buffer[..len]);
        let result = self.transport.send_packet(PacketType::Command, &self.buffer[..len]);
        if let Err(e) = result {
            error!("[hci] transport failed to send command: {:?}", e);
            self.release_packet_buffer();
            self.emit_transport_packet_sent();
            return Err(Error::Transport);
        }
        if self.transport.is_synchronous() {
            self.release_packet_buffer();
            self.emit_transport_packet_sent();
        }
        Ok(())
    }

    fn clear_auth_flags(&mut self, addr: &BdAddr, flags: AuthFlags) {
        if let Some(conn) = self.connections.for_address_mut(addr, AddressType::Acl) {
            conn.auth.remove(flags);
        }
    }

    // Inbound

    /// Drains one packet from the transport. Returns `false` when nothing was pending.
    pub fn poll(&mut self) -> bool {
        let mut buf = [0u8; crate::config::INCOMING_PACKET_BUFFER_SIZE];
        let now = self.run_loop.now();
        match self.transport.poll(now, &mut buf) {
            Some((packet_type, len)) => {
                self.handle_packet(packet_type, &buf[..len]);
                true
            }
            None => false,
        }
    }

    /// Dispatches one complete packet received from the controller, without its type byte.
    pub fn handle_packet(&mut self, packet_type: PacketType, packet: &[u8]) {
        self.log_packet(Direction::Incoming, packet_type, packet);
        match packet_type {
            PacketType::Event => self.handle_event(packet),
            PacketType::Acl => self.handle_acl(packet),
            PacketType::Sco => self.handle_sco(packet),
            PacketType::Command => warn!("[hci] ignoring command packet from controller"),
        }
    }

    /// Handles an expired timer previously armed through the run loop.
    pub fn handle_timeout(&mut self, id: TimerId) {
        trace!("[hci] timeout {:?}", id);
        match id {
            TimerId::Init => self.init_timeout(),
            TimerId::Halting => {
                if self.state != HciState::Halting {
                    return;
                }
                self.substate = Substate::Halting(HaltingStep::Close);
                // handlers may still defer the final shutdown
                self.emit_state();
                self.run();
            }
            TimerId::Connection(handle) => self.connection_timeout(handle),
            TimerId::ScoTx { handle, .. } => self.sco_tx_timeout(handle),
        }
    }

    fn connection_timeout(&mut self, handle: u16) {
        let now = self.run_loop.now();
        let Some(conn) = self.connections.for_handle(handle) else {
            return;
        };
        let idle_since = conn.timestamp;
        if now > idle_since + CONNECTION_TIMEOUT {
            self.emit_l2cap_timeout_check(handle);
        } else {
            let remaining = (idle_since + CONNECTION_TIMEOUT) - now;
            self.run_loop.set_timer(TimerId::Connection(handle), remaining);
        }
    }

    // Connection lifecycle

    /// Unlinks the connection at `idx`, stops its timers and reports the new connection count.
    pub(crate) fn shutdown_connection(&mut self, idx: usize) {
        let conn = self.connections.remove(idx);
        info!("[hci] connection closed: handle {:04x}, {:?}", conn.handle, conn.address);
        self.run_loop.remove_timer(TimerId::Connection(conn.handle));
        self.run_loop.remove_timer(TimerId::ScoTx {
            handle: conn.handle,
            slot: 0,
        });
        self.run_loop.remove_timer(TimerId::ScoTx {
            handle: conn.handle,
            slot: 1,
        });
        self.emit_nr_connections_changed();
    }

    /// Drops an outgoing connection that could not be established.
    pub(crate) fn connection_failed(&mut self, idx: usize, status: u8) {
        let conn = self.connections.remove(idx);
        info!("[hci] outgoing connection to {:?} failed: {:02x}", conn.address, status);
        if conn.bonding.contains(BondingFlags::DEDICATED) {
            self.emit_dedicated_bonding_result(&conn.address, status);
        }
        if status == status::AUTHENTICATION_FAILURE {
            self.drop_link_key(&conn.address);
        }
    }

    pub(crate) fn start_connection_timer(&mut self, handle: u16) {
        self.run_loop
            .set_timer(TimerId::Connection(handle), CONNECTION_TIMEOUT);
    }

    pub(crate) fn security_level_for_connection(&self, handle: u16) -> SecurityLevel {
        let Some(conn) = self.connections.for_handle(handle) else {
            return SecurityLevel::Level0;
        };
        if !conn.auth.contains(AuthFlags::CONNECTION_ENCRYPTED) {
            return SecurityLevel::Level0;
        }
        if conn.encryption_key_size < self.required_encryption_key_size {
            return SecurityLevel::Level0;
        }
        let level = conn.link_key_type.security_level();
        if level == SecurityLevel::Level4 && conn.encryption_key_size < 16 {
            return SecurityLevel::Level3;
        }
        level
    }

    // Controller features

    pub fn classic_supported(&self) -> bool {
        self.local_supported_features[4] & 0x20 == 0
    }

    pub fn le_supported(&self) -> bool {
        self.local_supported_features[4] & 0x40 != 0
    }

    pub(crate) fn ssp_supported(&self) -> bool {
        self.local_supported_features[6] & 0x08 != 0
    }

    pub(crate) fn local_ssp_activated(&self) -> bool {
        self.ssp_supported() && self.ssp_enable
    }

    pub fn esco_supported(&self) -> bool {
        self.local_supported_features[3] & 0x80 != 0
    }

    pub fn non_flushable_packet_boundary_flag_supported(&self) -> bool {
        self.local_supported_features[6] & 0x40 != 0
    }

    // Event emission

    pub(crate) fn log_packet(&self, direction: Direction, packet_type: PacketType, packet: &[u8]) {
        if let Some(logger) = self.logger {
            logger.log_packet(direction, packet_type, packet);
        }
    }

    /// Broadcasts an event to every registered handler.
    pub(crate) fn emit_event(&self, event: &[u8], dump: bool) {
        if dump {
            self.log_packet(Direction::Incoming, PacketType::Event, event);
        }
        for handler in self.event_handlers.iter() {
            handler.on_event(event);
        }
    }

    pub(crate) fn emit_acl_packet(&self, packet: &[u8]) {
        if let Some(handler) = self.acl_handler {
            handler.on_packet(PacketType::Acl, packet);
        }
    }

    pub(crate) fn emit_state(&self) {
        info!("[hci] state {:?}", self.state);
        let mut ev = SyntheticEvent::<3>::new(EVENT_STATE).u8(self.state as u8);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn emit_nr_connections_changed(&self) {
        let count = self.connections.len() as u8;
        info!("[hci] {} connections", count);
        let mut ev = SyntheticEvent::<3>::new(EVENT_NR_CONNECTIONS_CHANGED).u8(count);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn emit_poweron_failed(&self) {
        let mut ev = SyntheticEvent::<2>::new(EVENT_POWERON_FAILED);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn emit_discoverable_enabled(&self, enabled: bool) {
        let mut ev = SyntheticEvent::<3>::new(EVENT_DISCOVERABLE_ENABLED).u8(enabled as u8);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn emit_transport_packet_sent(&self) {
        let mut ev = SyntheticEvent::<2>::new(EVENT_TRANSPORT_PACKET_SENT);
        self.emit_event(ev.finish(), false);
    }

    pub(crate) fn emit_disconnection_complete(&self, handle: u16, reason: u8) {
        let mut ev = SyntheticEvent::<6>::new(EVENT_DISCONNECTION_COMPLETE)
            .u8(status::SUCCESS)
            .u16(handle)
            .u8(reason);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn emit_connection_complete(&self, addr: &BdAddr, handle: u16, status: u8) {
        let mut ev = SyntheticEvent::<13>::new(EVENT_CONNECTION_COMPLETE)
            .u8(status)
            .u16(handle)
            .addr(addr)
            .u8(1)
            .u8(0);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn emit_le_connection_complete(&self, address_type: AddressType, addr: &BdAddr, handle: u16, status: u8) {
        let mut ev = SyntheticEvent::<21>::new(EVENT_LE_META)
            .u8(SUBEVENT_LE_CONNECTION_COMPLETE)
            .u8(status)
            .u16(handle)
            .u8(0)
            .u8(address_type as u8)
            .addr(addr)
            .u16(0)
            .u16(0)
            .u16(0)
            .u8(0);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn emit_dedicated_bonding_result(&self, addr: &BdAddr, status: u8) {
        info!("[hci] dedicated bonding result {:02x}", status);
        let mut ev = SyntheticEvent::<9>::new(EVENT_GAP_DEDICATED_BONDING_COMPLETED)
            .u8(status)
            .addr(addr);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn emit_security_level(&self, handle: u16, level: SecurityLevel) {
        info!("[hci] security level {:?} for handle {:04x}", level, handle);
        let mut ev = SyntheticEvent::<5>::new(EVENT_GAP_SECURITY_LEVEL)
            .u16(handle)
            .u8(level as u8);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn emit_l2cap_timeout_check(&self, handle: u16) {
        if self.disable_l2cap_timeouts {
            return;
        }
        let mut ev = SyntheticEvent::<4>::new(EVENT_L2CAP_TIMEOUT_CHECK).u16(handle);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn emit_inquiry_complete(&self) {
        let mut ev = SyntheticEvent::<3>::new(EVENT_GAP_INQUIRY_COMPLETE).u8(0);
        self.emit_event(ev.finish(), true);
    }

    pub(crate) fn set_timer(&mut self, id: TimerId, ms: u64) {
        self.run_loop.set_timer(id, Duration::from_millis(ms));
    }
}
