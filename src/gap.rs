//! Generic Access Profile: discovery, pairing, security and LE connection management.
//!
//! Most calls only record what should happen and leave sending the matching command to the
//! scheduler, so they can be made at any time regardless of command credits.
use bt_hci::param::BdAddr;
use heapless::Vec;

use crate::command::{AdvertisingParams, ConnParams, ADV_DATA_LEN};
use crate::config::WHITELIST_SIZE;
use crate::connection::{AddressType, AuthFlags, BondingFlags, ConnectionState, LeLinkParams, PendingAction, SecurityLevel};
use crate::event::status;
use crate::hci::Hci;
use crate::link_key::{LinkKey, LinkKeyType};
use crate::power::HciState;
use crate::run_loop::RunLoop;
use crate::transport::Transport;
use crate::Error;

/// Shortest and longest inquiry, in units of 1.28 s.
pub const INQUIRY_DURATION_MIN: u8 = 0x01;
pub const INQUIRY_DURATION_MAX: u8 = 0x30;

/// General inquiry access code.
pub(crate) const GIAC: u32 = 0x9e8b33;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquiryState {
    Idle,
    /// Inquiry for this duration still has to be started.
    Requested(u8),
    Active,
    W2Cancel,
    W4Cancelled,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteNameState {
    Idle,
    W2Send,
    W4Complete,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RemoteNameRequest {
    pub(crate) state: RemoteNameState,
    pub(crate) addr: BdAddr,
    pub(crate) page_scan_repetition_mode: u8,
    pub(crate) clock_offset: u16,
}

impl Default for RemoteNameRequest {
    fn default() -> Self {
        Self {
            state: RemoteNameState::Idle,
            addr: BdAddr::new([0; 6]),
            page_scan_repetition_mode: 0,
            clock_offset: 0,
        }
    }
}

/// Answer to a pairing request the application was asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PairingResponse {
    Pin(Vec<u8, 16>),
    PinNegative,
    Passkey(u32),
    PasskeyNegative,
    Confirmation,
    ConfirmationNegative,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoCapability {
    DisplayOnly = 0,
    DisplayYesNo = 1,
    KeyboardOnly = 2,
    NoInputNoOutput = 3,
    /// Pairing requests are refused.
    Unknown = 0xff,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeConnectingState {
    Idle,
    Direct,
    Whitelist,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Invalid,
    Acl,
    Sco,
    Le,
}

/// Connection parameters a peripheral accepts when the central asks for an update.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParameterRange {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency_min: u16,
    pub latency_max: u16,
    pub supervision_timeout_min: u16,
    pub supervision_timeout_max: u16,
}

impl Default for ConnectionParameterRange {
    fn default() -> Self {
        Self {
            interval_min: 6,
            interval_max: 3200,
            latency_min: 0,
            latency_max: 500,
            supervision_timeout_min: 10,
            supervision_timeout_max: 3200,
        }
    }
}

impl ConnectionParameterRange {
    pub fn includes(&self, params: &LeLinkParams) -> bool {
        params.interval_min >= self.interval_min
            && params.interval_min <= self.interval_max
            && params.interval_max >= self.interval_min
            && params.interval_max <= self.interval_max
            && params.latency >= self.latency_min
            && params.latency <= self.latency_max
            && params.supervision_timeout >= self.supervision_timeout_min
            && params.supervision_timeout <= self.supervision_timeout_max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WhitelistEntry {
    pub(crate) address: BdAddr,
    pub(crate) address_type: AddressType,
    pub(crate) state: u8,
}

impl WhitelistEntry {
    pub(crate) const ADD_TO_CONTROLLER: u8 = 0x01;
    pub(crate) const REMOVE_FROM_CONTROLLER: u8 = 0x02;
    pub(crate) const ON_CONTROLLER: u8 = 0x04;

    fn matches(&self, address: &BdAddr, address_type: AddressType) -> bool {
        self.address_type == address_type && self.address == *address
    }
}

/// Host copy of the controller whitelist used for auto connections.
#[derive(Debug, Default)]
pub(crate) struct Whitelist {
    entries: Vec<WhitelistEntry, WHITELIST_SIZE>,
}

impl Whitelist {
    pub(crate) const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, address: BdAddr, address_type: AddressType) -> Result<(), Error> {
        self.entries
            .push(WhitelistEntry {
                address,
                address_type,
                state: WhitelistEntry::ADD_TO_CONTROLLER,
            })
            .map_err(|_| Error::MemoryCapacityExceeded)
    }

    /// Drops the entry outright, the controller removes it by itself on connection.
    pub(crate) fn remove(&mut self, address: &BdAddr, address_type: AddressType) {
        self.entries.retain(|e| !e.matches(address, address_type));
    }

    /// Schedules removal of matching entries, dropping those the controller never saw.
    pub(crate) fn stop(&mut self, filter: impl Fn(&WhitelistEntry) -> bool) {
        self.entries.retain_mut(|e| {
            if !filter(e) {
                return true;
            }
            if e.state & WhitelistEntry::ON_CONTROLLER != 0 {
                e.state |= WhitelistEntry::REMOVE_FROM_CONTROLLER;
                return true;
            }
            false
        });
    }

    pub(crate) fn modification_pending(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.state & (WhitelistEntry::ADD_TO_CONTROLLER | WhitelistEntry::REMOVE_FROM_CONTROLLER) != 0)
    }

    /// Takes the next entry to sync to the controller and whether it is to be added.
    pub(crate) fn next_modification(&mut self) -> Option<(WhitelistEntry, bool)> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.state & (WhitelistEntry::ADD_TO_CONTROLLER | WhitelistEntry::REMOVE_FROM_CONTROLLER) != 0)?;
        let entry = self.entries[idx];
        if entry.state & WhitelistEntry::ADD_TO_CONTROLLER != 0 {
            self.entries[idx].state = WhitelistEntry::ON_CONTROLLER;
            Some((entry, true))
        } else {
            self.entries.remove(idx);
            Some((entry, false))
        }
    }
}

pub(crate) mod adv_todo {
    pub const DISABLE: u8 = 0x01;
    pub const SET_PARAMS: u8 = 0x02;
    pub const SET_ADV_DATA: u8 = 0x04;
    pub const SET_SCAN_DATA: u8 = 0x08;
    pub const ENABLE: u8 = 0x10;
}

/// Advertising configuration and the commands still needed to bring the controller in line.
#[derive(Debug, Clone)]
pub(crate) struct Advertising {
    pub(crate) enabled: bool,
    pub(crate) active: bool,
    pub(crate) todo: u8,
    pub(crate) params: AdvertisingParams,
    pub(crate) data: Vec<u8, ADV_DATA_LEN>,
    pub(crate) scan_response: Vec<u8, ADV_DATA_LEN>,
}

impl Default for Advertising {
    fn default() -> Self {
        Self {
            enabled: false,
            active: false,
            todo: 0,
            params: AdvertisingParams {
                interval_min: 0x0800,
                interval_max: 0x0800,
                adv_type: 0,
                own_address_type: 0,
                direct_address_type: 0,
                direct_address: BdAddr::new([0; 6]),
                channel_map: 0x07,
                filter_policy: 0,
            },
            data: Vec::new(),
            scan_response: Vec::new(),
        }
    }
}

const BD_ADDR_PLACEHOLDER: &[u8; 17] = b"00:00:00:00:00:00";

/// Formats an address the way it is shown to users, most significant byte first.
pub(crate) fn bd_addr_text(addr: &BdAddr) -> [u8; 17] {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut text = [b':'; 17];
    for (i, b) in addr.raw().iter().rev().enumerate() {
        text[i * 3] = HEX[(b >> 4) as usize];
        text[i * 3 + 1] = HEX[(b & 0x0f) as usize];
    }
    text
}

/// Replaces every `00:00:00:00:00:00` in `data` with the text form of `addr`.
pub(crate) fn replace_bd_addr_placeholder(data: &mut [u8], addr: &BdAddr) {
    let text = bd_addr_text(addr);
    let mut i = 0;
    while i + BD_ADDR_PLACEHOLDER.len() <= data.len() {
        if &data[i..i + BD_ADDR_PLACEHOLDER.len()] == BD_ADDR_PLACEHOLDER {
            data[i..i + text.len()].copy_from_slice(&text);
            i += text.len();
        } else {
            i += 1;
        }
    }
}

impl<'d, T: Transport, R: RunLoop> Hci<'d, T, R> {
    // Classic discovery

    /// Enables or disables inquiry scan. Reports the result with a discoverable event.
    pub fn discoverable_control(&mut self, enable: bool) {
        if self.discoverable == enable {
            self.emit_discoverable_enabled(enable);
            return;
        }
        self.discoverable = enable;
        self.update_scan_enable();
    }

    /// Enables or disables page scan.
    pub fn connectable_control(&mut self, enable: bool) {
        if self.connectable == enable {
            return;
        }
        self.connectable = enable;
        self.update_scan_enable();
    }

    fn update_scan_enable(&mut self) {
        self.new_scan_enable_value = ((self.connectable as u8) << 1) | self.discoverable as u8;
        self.run();
    }

    /// Takes effect on the next power on.
    pub fn set_class_of_device(&mut self, class_of_device: u32) {
        self.class_of_device = class_of_device;
    }

    /// Takes effect on the next power on. `00:00:00:00:00:00` is replaced with the local address.
    pub fn set_local_name(&mut self, name: &'d str) {
        self.local_name = name;
    }

    /// Sets the extended inquiry response, written during the next power on.
    pub fn set_extended_inquiry_response(&mut self, data: &'d [u8]) {
        self.eir_data.replace(data);
    }

    pub fn set_default_link_policy_settings(&mut self, settings: u16) {
        self.default_link_policy_settings = settings;
    }

    pub fn set_allow_role_switch(&mut self, allow: bool) {
        self.allow_role_switch = allow;
    }

    /// Link supervision timeout written to new links where we are master, 0 keeps the controller default.
    pub fn set_link_supervision_timeout(&mut self, timeout: u16) {
        self.link_supervision_timeout = timeout;
    }

    pub fn set_master_slave_policy(&mut self, policy: u8) {
        self.master_slave_policy = policy;
    }

    pub fn set_inquiry_mode(&mut self, mode: u8) {
        self.inquiry_mode = mode;
    }

    pub fn inquiry_start(&mut self, duration: u8) -> Result<(), Error> {
        if self.state != HciState::Working || self.inquiry_state != InquiryState::Idle {
            return Err(Error::CommandDisallowed);
        }
        if !(INQUIRY_DURATION_MIN..=INQUIRY_DURATION_MAX).contains(&duration) {
            return Err(Error::InvalidHciParameters);
        }
        self.inquiry_state = InquiryState::Requested(duration);
        self.run();
        Ok(())
    }

    pub fn inquiry_stop(&mut self) -> Result<(), Error> {
        match self.inquiry_state {
            InquiryState::Requested(_) => {
                self.inquiry_state = InquiryState::Idle;
                self.emit_inquiry_complete();
                Ok(())
            }
            InquiryState::Active => {
                self.inquiry_state = InquiryState::W2Cancel;
                self.run();
                Ok(())
            }
            _ => Err(Error::CommandDisallowed),
        }
    }

    pub fn inquiry_state(&self) -> InquiryState {
        self.inquiry_state
    }

    /// Asks for the name of a remote device. Bit 15 of `clock_offset` marks it valid.
    pub fn remote_name_request(&mut self, addr: BdAddr, page_scan_repetition_mode: u8, clock_offset: u16) -> Result<(), Error> {
        if self.remote_name.state != RemoteNameState::Idle {
            return Err(Error::CommandDisallowed);
        }
        self.remote_name = RemoteNameRequest {
            state: RemoteNameState::W2Send,
            addr,
            page_scan_repetition_mode,
            clock_offset,
        };
        self.run();
        Ok(())
    }

    pub fn register_classic_connection_filter(&mut self, filter: fn(&BdAddr) -> bool) {
        self.classic_accept_filter.replace(filter);
    }

    // Pairing

    pub fn set_bondable_mode(&mut self, enable: bool) {
        self.bondable = enable;
    }

    pub fn bondable_mode(&self) -> bool {
        self.bondable
    }

    /// Minimum security level for services, used by upper layers.
    pub fn set_security_level(&mut self, level: SecurityLevel) {
        self.security_level = level;
    }

    pub fn get_security_level(&self) -> SecurityLevel {
        self.security_level
    }

    /// Encryption keys shorter than `size` count as level 0. Values outside 7..=16 are ignored.
    pub fn set_required_encryption_key_size(&mut self, size: u8) {
        if (7..=16).contains(&size) {
            self.required_encryption_key_size = size;
        }
    }

    pub fn ssp_set_enable(&mut self, enable: bool) {
        self.ssp_enable = enable;
    }

    pub fn ssp_set_io_capability(&mut self, io_capability: IoCapability) {
        self.ssp_io_capability = io_capability;
    }

    pub fn ssp_set_authentication_requirement(&mut self, requirement: u8) {
        self.ssp_authentication_requirement = requirement;
    }

    /// Accept numeric comparison and passkey requests without asking the application.
    pub fn ssp_set_auto_accept(&mut self, auto_accept: bool) {
        self.ssp_auto_accept = auto_accept;
    }

    pub fn secure_connections_enable(&mut self, enable: bool) {
        self.secure_connections_enable = enable;
    }

    fn set_pairing_response(&mut self, addr: BdAddr, response: PairingResponse) -> Result<(), Error> {
        if self.pairing.is_some() {
            return Err(Error::CommandDisallowed);
        }
        self.pairing.replace((addr, response));
        self.run();
        Ok(())
    }

    pub fn pin_code_response(&mut self, addr: BdAddr, pin: &str) -> Result<(), Error> {
        let pin = Vec::from_slice(pin.as_bytes()).map_err(|_| Error::InvalidHciParameters)?;
        self.set_pairing_response(addr, PairingResponse::Pin(pin))
    }

    pub fn pin_code_negative(&mut self, addr: BdAddr) -> Result<(), Error> {
        self.set_pairing_response(addr, PairingResponse::PinNegative)
    }

    pub fn ssp_passkey_response(&mut self, addr: BdAddr, passkey: u32) -> Result<(), Error> {
        self.set_pairing_response(addr, PairingResponse::Passkey(passkey))
    }

    pub fn ssp_passkey_negative(&mut self, addr: BdAddr) -> Result<(), Error> {
        self.set_pairing_response(addr, PairingResponse::PasskeyNegative)
    }

    pub fn ssp_confirmation_response(&mut self, addr: BdAddr) -> Result<(), Error> {
        self.set_pairing_response(addr, PairingResponse::Confirmation)
    }

    pub fn ssp_confirmation_negative(&mut self, addr: BdAddr) -> Result<(), Error> {
        self.set_pairing_response(addr, PairingResponse::ConfirmationNegative)
    }

    // Security

    /// Current security level of a connection.
    pub fn security_level(&self, handle: u16) -> SecurityLevel {
        self.security_level_for_connection(handle)
    }

    /// Raises the security of a connection to at least `level`.
    ///
    /// The outcome is reported with a GAP security level event, right away if the level is
    /// already met.
    pub fn request_security_level(&mut self, handle: u16, level: SecurityLevel) {
        let current = self.security_level_for_connection(handle);
        let Some(conn) = self.connections.for_handle_mut(handle) else {
            self.emit_security_level(handle, SecurityLevel::Level0);
            return;
        };
        debug!(
            "[gap] security level requested {:?}, planned {:?}, current {:?}",
            level, conn.requested_security_level, current
        );

        // a higher level was requested earlier and is still being worked on
        if current < conn.requested_security_level {
            if conn.requested_security_level < level {
                conn.requested_security_level = level;
            }
            return;
        }

        if level <= current {
            self.emit_security_level(handle, current);
            return;
        }

        conn.requested_security_level = level;
        conn.pending.push(PendingAction::AuthenticationRequest);
        self.run();
    }

    /// Connects to `addr`, pairs and disconnects again. Completion is reported with a
    /// dedicated bonding completed event.
    pub fn dedicated_bonding(&mut self, addr: BdAddr, mitm_protection_required: bool) -> Result<(), Error> {
        if self.connections.for_address(&addr, AddressType::Acl).is_some() {
            return Err(Error::ConnectionAlreadyExists);
        }
        let now = self.run_loop.now();
        let conn = self
            .connections
            .create(addr, AddressType::Acl, now)
            .ok_or(Error::MemoryCapacityExceeded)?;
        conn.state = ConnectionState::SendCreateConnection;
        conn.requested_security_level = if mitm_protection_required {
            SecurityLevel::Level3
        } else {
            SecurityLevel::Level2
        };
        conn.bonding = BondingFlags::DEDICATED;
        info!("[gap] dedicated bonding with {:?}, mitm {}", addr, mitm_protection_required);
        self.drop_link_key(&addr);
        self.run();
        Ok(())
    }

    /// Size of the encryption key in use, 0 if the link is not encrypted.
    pub fn encryption_key_size(&self, handle: u16) -> u8 {
        let Some(conn) = self.connections.for_handle(handle) else {
            return 0;
        };
        if conn.is_le() {
            return 0;
        }
        if conn.auth.contains(AuthFlags::CONNECTION_ENCRYPTED) {
            conn.encryption_key_size
        } else {
            0
        }
    }

    pub fn authenticated(&self, handle: u16) -> bool {
        match self.connections.for_handle(handle) {
            Some(conn) if !conn.is_le() => conn.link_key_type.is_authenticated(),
            _ => false,
        }
    }

    pub fn secure_connection(&self, handle: u16) -> bool {
        match self.connections.for_handle(handle) {
            Some(conn) if !conn.is_le() => conn.link_key_type.is_secure_connection(),
            _ => false,
        }
    }

    pub fn remote_ssp_supported(&self, handle: u16) -> bool {
        self.connections
            .for_handle(handle)
            .map(|c| c.bonding.contains(BondingFlags::REMOTE_SUPPORTS_SSP))
            .unwrap_or(false)
    }

    pub fn remote_esco_supported(&self, handle: u16) -> bool {
        self.connections.for_handle(handle).map(|c| c.remote_esco).unwrap_or(false)
    }

    pub fn ssp_supported_on_both_sides(&self, handle: u16) -> bool {
        self.local_ssp_activated() && self.remote_ssp_supported(handle)
    }

    // Link keys

    pub fn drop_link_key(&mut self, addr: &BdAddr) {
        if let Some(db) = self.link_key_db.as_deref_mut() {
            db.delete_link_key(addr);
        }
    }

    pub fn store_link_key(&mut self, addr: &BdAddr, key: &LinkKey, key_type: LinkKeyType) {
        if let Some(db) = self.link_key_db.as_deref_mut() {
            db.put_link_key(addr, key, key_type);
        }
    }

    pub fn delete_all_link_keys(&mut self) {
        if let Some(db) = self.link_key_db.as_deref_mut() {
            db.clear();
        }
    }

    // LE central

    pub fn le_start_scan(&mut self) {
        self.le_scanning_enabled = true;
        self.run();
    }

    pub fn le_stop_scan(&mut self) {
        self.le_scanning_enabled = false;
        self.run();
    }

    /// Scanning is paused while the new parameters are written.
    pub fn set_scan_parameters(&mut self, scan_type: u8, interval: u16, window: u16) {
        self.le_scan_type = scan_type;
        self.le_scan_interval = interval;
        self.le_scan_window = window;
        self.run();
    }

    /// Connects to an LE device. The result is reported with an LE connection complete event.
    pub fn le_connect(&mut self, addr: BdAddr, address_type: AddressType) -> Result<(), Error> {
        let now = self.run_loop.now();
        let Some(conn) = self.connections.for_address_mut(&addr, address_type) else {
            if self.connections.create(addr, address_type, now).is_none() {
                warn!("[gap] no room for connection to {:?}", addr);
                self.emit_le_connection_complete(address_type, &addr, 0, status::MEMORY_CAPACITY_EXCEEDED);
                return Err(Error::MemoryCapacityExceeded);
            }
            self.run();
            return Ok(());
        };

        if !conn.is_le()
            || matches!(
                conn.state,
                ConnectionState::SendCreateConnection | ConnectionState::SentCreateConnection
            )
        {
            self.emit_le_connection_complete(address_type, &addr, 0, status::COMMAND_DISALLOWED);
            return Err(Error::CommandDisallowed);
        }

        if conn.state == ConnectionState::ReceivedDisconnectionComplete {
            // reconnect from inside a disconnection handler
            conn.state = ConnectionState::SendCreateConnection;
            return Ok(());
        }

        let handle = conn.handle;
        self.emit_le_connection_complete(address_type, &addr, handle, status::SUCCESS);
        Ok(())
    }

    /// Cancels a pending LE connection attempt.
    pub fn connect_cancel(&mut self) -> Result<(), Error> {
        let Some(conn) = self.connections.outgoing_le() else {
            return Ok(());
        };
        match conn.state {
            ConnectionState::SendCreateConnection => {
                let addr = conn.address;
                let address_type = conn.address_type;
                if let Some(idx) = self.connections.position_for_address(&addr, address_type) {
                    self.connections.remove(idx);
                }
                self.emit_le_connection_complete(address_type, &addr, 0, status::UNKNOWN_CONNECTION_IDENTIFIER);
            }
            ConnectionState::SentCreateConnection => {
                conn.state = ConnectionState::SendCancelConnection;
                self.run();
            }
            _ => {}
        }
        Ok(())
    }

    /// Parameters for connections started with [`Hci::le_connect`] and auto connections.
    pub fn set_connection_parameters(&mut self, scan_interval: u16, scan_window: u16, params: ConnParams) {
        self.le_connection_scan_interval = scan_interval;
        self.le_connection_scan_window = scan_window;
        self.le_conn_params = params;
    }

    pub fn update_connection_parameters(&mut self, handle: u16, params: LeLinkParams) -> Result<(), Error> {
        let conn = self
            .connections
            .for_handle_mut(handle)
            .ok_or(Error::UnknownConnectionIdentifier)?;
        conn.le_params = params;
        conn.pending.push(PendingAction::LeConnectionUpdate);
        self.run();
        Ok(())
    }

    pub fn set_connection_parameter_range(&mut self, range: ConnectionParameterRange) {
        self.le_connection_parameter_range = range;
    }

    pub fn connection_parameter_range(&self) -> ConnectionParameterRange {
        self.le_connection_parameter_range
    }

    /// Advertising is restarted after a disconnect while fewer peripheral links are open.
    pub fn set_max_number_peripheral_connections(&mut self, max: u8) {
        self.le_max_number_peripheral_connections = max;
    }

    pub fn le_connection_interval(&self, handle: u16) -> u16 {
        self.connections
            .for_handle(handle)
            .map(|c| c.le_connection_interval)
            .unwrap_or(0)
    }

    pub fn le_set_phy(&mut self, handle: u16, all_phys: u8, tx_phys: u8, rx_phys: u8, phy_options: u16) -> Result<(), Error> {
        let conn = self
            .connections
            .for_handle_mut(handle)
            .ok_or(Error::UnknownConnectionIdentifier)?;
        conn.pending.push(PendingAction::LeSetPhy {
            all_phys,
            tx_phys,
            rx_phys,
            phy_options,
        });
        self.run();
        Ok(())
    }

    /// Keeps connecting to `addr` through the controller whitelist.
    pub fn auto_connection_start(&mut self, address_type: AddressType, addr: BdAddr) -> Result<(), Error> {
        if self.le_whitelist.len() >= self.le_whitelist_capacity as usize {
            return Err(Error::MemoryCapacityExceeded);
        }
        self.le_whitelist.push(addr, address_type)?;
        self.run();
        Ok(())
    }

    pub fn auto_connection_stop(&mut self, address_type: AddressType, addr: BdAddr) -> Result<(), Error> {
        self.le_whitelist.stop(|e| e.matches(&addr, address_type));
        self.run();
        Ok(())
    }

    pub fn auto_connection_stop_all(&mut self) {
        self.le_whitelist.stop(|_| true);
        self.run();
    }

    // LE peripheral

    fn advertisements_changed(&mut self) {
        if self.le_advertising.active {
            self.le_advertising.todo |= adv_todo::DISABLE | adv_todo::ENABLE;
        }
        self.run();
    }

    pub fn advertisements_set_params(&mut self, params: AdvertisingParams) {
        self.le_advertising.params = params;
        self.le_advertising.todo |= adv_todo::SET_PARAMS;
        self.advertisements_changed();
    }

    /// Advertising data, at most 31 bytes. `00:00:00:00:00:00` is replaced with the local address.
    pub fn advertisements_set_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.le_advertising.data = Vec::from_slice(data).map_err(|_| Error::InvalidHciParameters)?;
        self.le_advertising.todo |= adv_todo::SET_ADV_DATA;
        self.advertisements_changed();
        Ok(())
    }

    pub fn scan_response_set_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.le_advertising.scan_response = Vec::from_slice(data).map_err(|_| Error::InvalidHciParameters)?;
        self.le_advertising.todo |= adv_todo::SET_SCAN_DATA;
        self.advertisements_changed();
        Ok(())
    }

    pub fn advertisements_enable(&mut self, enable: bool) {
        let adv = &mut self.le_advertising;
        adv.enabled = enable;
        if enable && !adv.active {
            adv.todo |= adv_todo::ENABLE;
        }
        if !enable && adv.active {
            adv.todo |= adv_todo::DISABLE;
        }
        self.run();
    }

    /// Own address type for advertising, scanning and connecting. Random types wait until a
    /// random address has been set.
    pub fn le_set_own_address_type(&mut self, own_address_type: u8) {
        if self.le_own_addr_type == own_address_type {
            return;
        }
        self.le_own_addr_type = own_address_type;
        self.le_advertising.todo |= adv_todo::SET_PARAMS;
        self.advertisements_changed();
    }

    pub fn le_set_random_address(&mut self, addr: BdAddr) -> Result<(), Error> {
        self.send_cmd(&crate::command::Command::LeSetRandomAddress { addr })
    }

    // Connections

    /// Disconnects a link. Unknown handles are reported as disconnected right away.
    pub fn disconnect(&mut self, handle: u16) -> Result<(), Error> {
        let Some(conn) = self.connections.for_handle_mut(handle) else {
            self.emit_disconnection_complete(handle, 0);
            return Ok(());
        };
        match conn.state {
            // already gone, upper layers just have not seen it yet
            ConnectionState::ReceivedDisconnectionComplete => return Ok(()),
            ConnectionState::SendDisconnect | ConnectionState::SentDisconnect => return Ok(()),
            _ => {}
        }
        conn.state = ConnectionState::SendDisconnect;
        self.run();
        Ok(())
    }

    pub fn disconnect_all(&mut self) {
        for conn in self.connections.iter_mut() {
            if conn.state != ConnectionState::SentDisconnect {
                conn.state = ConnectionState::SendDisconnect;
            }
        }
        self.run();
    }

    /// Answered with a GAP RSSI measurement event.
    pub fn read_rssi(&mut self, handle: u16) -> Result<(), Error> {
        let conn = self
            .connections
            .for_handle_mut(handle)
            .ok_or(Error::UnknownConnectionIdentifier)?;
        conn.pending.push(PendingAction::ReadRssi);
        self.run();
        Ok(())
    }

    pub fn connection_type(&self, handle: u16) -> ConnectionType {
        match self.connections.for_handle(handle) {
            None => ConnectionType::Invalid,
            Some(conn) if conn.is_le() => ConnectionType::Le,
            Some(conn) if conn.address_type == AddressType::Sco => ConnectionType::Sco,
            Some(_) => ConnectionType::Acl,
        }
    }

    pub fn sniff_mode_enter(
        &mut self,
        handle: u16,
        min_interval: u16,
        max_interval: u16,
        attempt: u16,
        timeout: u16,
    ) -> Result<(), Error> {
        let conn = self
            .connections
            .for_handle_mut(handle)
            .ok_or(Error::UnknownConnectionIdentifier)?;
        conn.pending.push(PendingAction::SniffEnter {
            min_interval,
            max_interval,
            attempt,
            timeout,
        });
        self.run();
        Ok(())
    }

    pub fn sniff_mode_exit(&mut self, handle: u16) -> Result<(), Error> {
        let conn = self
            .connections
            .for_handle_mut(handle)
            .ok_or(Error::UnknownConnectionIdentifier)?;
        conn.pending.push(PendingAction::SniffExit);
        self.run();
        Ok(())
    }

    // Misc

    /// Called with the hardware code instead of power cycling the controller.
    pub fn set_hardware_error_callback(&mut self, callback: fn(u8)) {
        self.hardware_error_callback.replace(callback);
    }

    pub fn disable_l2cap_timeout_check(&mut self) {
        self.disable_l2cap_timeouts = true;
    }

    /// Public address to program with the chipset driver during the next power on.
    pub fn set_bd_addr(&mut self, addr: BdAddr) {
        self.custom_bd_addr.replace(addr);
    }

    pub fn local_bd_addr(&self) -> BdAddr {
        self.local_bd_addr
    }

    /// Voice setting for SCO connections set up from now on.
    pub fn set_sco_voice_setting(&mut self, voice_setting: u16) {
        self.sco_voice_setting = voice_setting;
    }

    pub fn sco_voice_setting(&self) -> u16 {
        self.sco_voice_setting
    }
}
