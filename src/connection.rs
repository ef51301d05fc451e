//! Connection registry.
use bt_hci::param::BdAddr;
use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::config::{ACL_PAYLOAD_SIZE, MAX_CONNECTIONS, MAX_PENDING_ACTIONS};
use crate::link_key::LinkKeyType;

/// Connections without traffic for this long are reported to upper layers.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_millis(10_000);

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    LePublic = 0x00,
    LeRandom = 0x01,
    LePublicIdentity = 0x02,
    LeRandomIdentity = 0x03,
    Sco = 0xfc,
    Acl = 0xfd,
    Unknown = 0xff,
}

impl AddressType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::LePublic,
            0x01 => Self::LeRandom,
            0x02 => Self::LePublicIdentity,
            0x03 => Self::LeRandomIdentity,
            0xfc => Self::Sco,
            0xfd => Self::Acl,
            _ => Self::Unknown,
        }
    }

    pub fn is_le(&self) -> bool {
        matches!(
            self,
            Self::LePublic | Self::LeRandom | Self::LePublicIdentity | Self::LeRandomIdentity
        )
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    SendCreateConnection,
    SentCreateConnection,
    SendCancelConnection,
    SentCancelConnection,
    ReceivedConnectionRequest,
    AcceptedConnectionRequest,
    Open,
    SendDisconnect,
    SentDisconnect,
    /// The controller reported the link as gone. The connection is freed once every
    /// event handler has seen the disconnection, unless one of them reconnects.
    ReceivedDisconnectionComplete,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    Master = 0,
    Slave = 1,
}

impl Role {
    pub fn from_u8(value: u8) -> Self {
        if value == 0 {
            Self::Master
        } else {
            Self::Slave
        }
    }
}

/// Security levels as defined by GAP, ordered.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SecurityLevel {
    Level0 = 0,
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
    Level4 = 4,
}

impl SecurityLevel {
    pub fn mitm_protection_required(&self) -> bool {
        *self > Self::Level2
    }
}

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $value:expr,)* }) => {
        $(#[$meta])*
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(u16);

        impl $name {
            $($(#[$fmeta])* pub const $flag: Self = Self($value);)*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn bits(&self) -> u16 {
                self.0
            }
        }
    };
}

flag_set! {
    /// What the peer asked for, and how far pairing got.
    AuthFlags {
        RECV_LINK_KEY_REQUEST = 0x0001,
        RECV_LINK_KEY_NOTIFICATION = 0x0002,
        RECV_IO_CAPABILITIES_REQUEST = 0x0004,
        LEGACY_PAIRING_ACTIVE = 0x0008,
        SSP_PAIRING_ACTIVE = 0x0010,
        CONNECTION_ENCRYPTED = 0x0020,
    }
}

flag_set! {
    BondingFlags {
        /// Dedicated bonding: disconnect and report once authentication finished.
        DEDICATED = 0x0001,
        REMOTE_SUPPORTS_SSP = 0x0002,
        RECEIVED_REMOTE_FEATURES = 0x0004,
        EMIT_COMPLETE_ON_DISCONNECT = 0x0008,
    }
}

/// A command a connection still has to send. Lower declaration order goes out first.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingAction {
    ReadRssi,
    WriteSupervisionTimeout,
    LinkKeyRequest,
    DenyPinCodeRequest,
    IoCapabilityReply,
    UserConfirmReply,
    UserPasskeyReply,
    RequestRemoteFeatures,
    DisconnectDedicatedBondingDone,
    AuthenticationRequest,
    EncryptionRequest,
    ReadEncryptionKeySize,
    DisconnectSecurityBlock,
    SniffEnter {
        min_interval: u16,
        max_interval: u16,
        attempt: u16,
        timeout: u16,
    },
    SniffExit,
    LeConnectionUpdate,
    LeRemoteParamReply,
    LeRemoteParamNegativeReply,
    LeSetPhy {
        all_phys: u8,
        tx_phys: u8,
        rx_phys: u8,
        phy_options: u16,
    },
}

impl PendingAction {
    fn rank(&self) -> u8 {
        match self {
            Self::ReadRssi => 0,
            Self::WriteSupervisionTimeout => 1,
            Self::LinkKeyRequest => 2,
            Self::DenyPinCodeRequest => 3,
            Self::IoCapabilityReply => 4,
            Self::UserConfirmReply => 5,
            Self::UserPasskeyReply => 6,
            Self::RequestRemoteFeatures => 7,
            Self::DisconnectDedicatedBondingDone => 8,
            Self::AuthenticationRequest => 9,
            Self::EncryptionRequest => 10,
            Self::ReadEncryptionKeySize => 11,
            Self::DisconnectSecurityBlock => 12,
            Self::SniffEnter { .. } => 13,
            Self::SniffExit => 13,
            Self::LeConnectionUpdate => 14,
            Self::LeRemoteParamReply => 14,
            Self::LeRemoteParamNegativeReply => 14,
            Self::LeSetPhy { .. } => 15,
        }
    }
}

/// Actions queued on a connection. Actions of the same rank replace each other, so a newer
/// sniff or parameter request overrides one that was not sent yet.
#[derive(Debug, Default)]
pub(crate) struct PendingActions {
    actions: Vec<PendingAction, MAX_PENDING_ACTIONS>,
}

impl PendingActions {
    pub(crate) fn push(&mut self, action: PendingAction) {
        let rank = action.rank();
        if let Some(slot) = self.actions.iter_mut().find(|a| a.rank() == rank) {
            *slot = action;
            return;
        }
        if self.actions.push(action).is_err() {
            warn!("[connection] pending action queue full, dropping {:?}", action);
        }
    }

    pub(crate) fn take_next(&mut self) -> Option<PendingAction> {
        let (idx, _) = self.actions.iter().enumerate().min_by_key(|(_, a)| a.rank())?;
        Some(self.actions.swap_remove(idx))
    }

    pub(crate) fn contains(&self, action: PendingAction) -> bool {
        self.actions.iter().any(|a| *a == action)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Connection parameters requested by, or for, an LE link.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeLinkParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

pub struct Connection {
    pub(crate) address: BdAddr,
    pub(crate) address_type: AddressType,
    pub(crate) handle: u16,
    pub(crate) state: ConnectionState,
    pub(crate) role: Role,

    pub(crate) auth: AuthFlags,
    pub(crate) bonding: BondingFlags,
    pub(crate) bonding_status: u8,
    pub(crate) requested_security_level: SecurityLevel,
    pub(crate) link_key_type: LinkKeyType,
    pub(crate) encryption_key_size: u8,
    pub(crate) pending: PendingActions,

    pub(crate) recombination: [u8; 4 + ACL_PAYLOAD_SIZE],
    pub(crate) recombination_pos: usize,
    pub(crate) recombination_len: usize,

    pub(crate) num_packets_sent: u16,
    pub(crate) timestamp: Instant,

    pub(crate) connection_mode: u8,
    pub(crate) remote_esco: bool,
    pub(crate) le_params: LeLinkParams,
    pub(crate) le_connection_interval: u16,

    pub(crate) sco_rx_at: Instant,
    pub(crate) sco_rx_count: u8,
    pub(crate) sco_rx_valid: bool,
    pub(crate) sco_tx_ready: u8,
}

impl Connection {
    fn new(address: BdAddr, address_type: AddressType, now: Instant) -> Self {
        Self {
            address,
            address_type,
            handle: 0xffff,
            state: ConnectionState::SendCreateConnection,
            role: Role::Master,
            auth: AuthFlags::empty(),
            bonding: BondingFlags::empty(),
            bonding_status: 0,
            requested_security_level: SecurityLevel::Level0,
            link_key_type: LinkKeyType::INVALID,
            encryption_key_size: 0,
            pending: PendingActions::default(),
            recombination: [0; 4 + ACL_PAYLOAD_SIZE],
            recombination_pos: 0,
            recombination_len: 0,
            num_packets_sent: 0,
            timestamp: now,
            connection_mode: 0,
            remote_esco: false,
            le_params: LeLinkParams::default(),
            le_connection_interval: 0,
            sco_rx_at: now,
            sco_rx_count: 0,
            sco_rx_valid: false,
            sco_tx_ready: 0,
        }
    }

    pub fn address(&self) -> BdAddr {
        self.address
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn auth_flags(&self) -> AuthFlags {
        self.auth
    }

    pub fn bonding_flags(&self) -> BondingFlags {
        self.bonding
    }

    /// Packets handed to the controller and not yet reported as completed.
    pub fn num_packets_sent(&self) -> u16 {
        self.num_packets_sent
    }

    pub fn is_le(&self) -> bool {
        self.address_type.is_le()
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.timestamp = now;
    }

    pub(crate) fn reset_recombination(&mut self) {
        self.recombination_pos = 0;
        self.recombination_len = 0;
    }
}

/// Fixed capacity set of connections, unique per address and address type.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Vec<Connection, MAX_CONNECTIONS>,
}

impl ConnectionRegistry {
    pub const fn new() -> Self {
        Self { connections: Vec::new() }
    }

    /// Adds a fresh connection, or returns `None` when the registry is full.
    ///
    /// Callers look up an existing connection for the address first.
    pub(crate) fn create(&mut self, address: BdAddr, address_type: AddressType, now: Instant) -> Option<&mut Connection> {
        debug_assert!(self.for_address(&address, address_type).is_none());
        info!("[connection] create for {:?}, type {:?}", address, address_type);
        self.connections
            .push(Connection::new(address, address_type, now))
            .ok()?;
        self.connections.last_mut()
    }

    /// Index of the connection for `address`, creating one if needed.
    pub(crate) fn find_or_create(&mut self, address: BdAddr, address_type: AddressType, now: Instant) -> Option<usize> {
        if let Some(idx) = self.position_for_address(&address, address_type) {
            return Some(idx);
        }
        self.create(address, address_type, now)?;
        Some(self.connections.len() - 1)
    }

    pub fn for_handle(&self, handle: u16) -> Option<&Connection> {
        self.connections.iter().find(|c| c.handle == handle)
    }

    pub(crate) fn for_handle_mut(&mut self, handle: u16) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.handle == handle)
    }

    pub fn for_address(&self, address: &BdAddr, address_type: AddressType) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.address_type == address_type && c.address == *address)
    }

    pub(crate) fn for_address_mut(&mut self, address: &BdAddr, address_type: AddressType) -> Option<&mut Connection> {
        self.connections
            .iter_mut()
            .find(|c| c.address_type == address_type && c.address == *address)
    }

    pub(crate) fn position(&self, handle: u16) -> Option<usize> {
        self.connections.iter().position(|c| c.handle == handle)
    }

    pub(crate) fn position_for_address(&self, address: &BdAddr, address_type: AddressType) -> Option<usize> {
        self.connections
            .iter()
            .position(|c| c.address_type == address_type && c.address == *address)
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> Option<&mut Connection> {
        self.connections.get_mut(idx)
    }

    pub(crate) fn remove(&mut self, idx: usize) -> Connection {
        self.connections.remove(idx)
    }

    /// The single outgoing LE connection attempt, if any.
    pub(crate) fn outgoing_le(&mut self) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| {
            c.is_le()
                && matches!(
                    c.state,
                    ConnectionState::SendCreateConnection
                        | ConnectionState::SentCreateConnection
                        | ConnectionState::SentCancelConnection
                )
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub(crate) fn first(&self) -> Option<&Connection> {
        self.connections.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> BdAddr {
        BdAddr::new([last, 0x22, 0x33, 0x44, 0x55, 0x66])
    }

    #[test]
    fn create_defaults() {
        let mut registry = ConnectionRegistry::new();
        let now = Instant::from_millis(5);
        let conn = unwrap!(registry.create(addr(1), AddressType::Acl, now));
        assert_eq!(conn.handle(), 0xffff);
        assert_eq!(conn.state(), ConnectionState::SendCreateConnection);
        assert_eq!(conn.num_packets_sent(), 0);
        assert_eq!(conn.requested_security_level, SecurityLevel::Level0);
        assert!(conn.pending.is_empty());
        assert_eq!(conn.timestamp, now);
    }

    #[test]
    fn lookup_by_handle_and_address_agree() {
        let mut registry = ConnectionRegistry::new();
        let now = Instant::from_millis(0);
        unwrap!(registry.create(addr(1), AddressType::Acl, now)).handle = 0x0040;
        unwrap!(registry.create(addr(1), AddressType::LePublic, now)).handle = 0x0041;

        let by_handle = unwrap!(registry.for_handle(0x0041));
        assert_eq!(by_handle.address_type(), AddressType::LePublic);
        let by_addr = unwrap!(registry.for_address(&addr(1), AddressType::Acl));
        assert_eq!(by_addr.handle(), 0x0040);
        assert!(registry.for_address(&addr(2), AddressType::Acl).is_none());
    }

    #[test]
    fn full_registry_refuses() {
        let mut registry = ConnectionRegistry::new();
        let now = Instant::from_millis(0);
        for i in 0..MAX_CONNECTIONS {
            assert!(registry.create(addr(i as u8), AddressType::Acl, now).is_some());
        }
        assert!(registry.create(addr(0xff), AddressType::Acl, now).is_none());
        assert_eq!(registry.len(), MAX_CONNECTIONS);
    }

    #[test]
    fn pending_actions_by_rank() {
        let mut pending = PendingActions::default();
        pending.push(PendingAction::EncryptionRequest);
        pending.push(PendingAction::ReadRssi);
        pending.push(PendingAction::SniffEnter {
            min_interval: 1,
            max_interval: 2,
            attempt: 3,
            timeout: 4,
        });
        pending.push(PendingAction::SniffExit);
        pending.push(PendingAction::ReadRssi);

        assert_eq!(pending.take_next(), Some(PendingAction::ReadRssi));
        assert_eq!(pending.take_next(), Some(PendingAction::EncryptionRequest));
        assert_eq!(pending.take_next(), Some(PendingAction::SniffExit));
        assert_eq!(pending.take_next(), None);
    }

    #[test]
    fn flag_sets() {
        let mut auth = AuthFlags::empty();
        auth.insert(AuthFlags::SSP_PAIRING_ACTIVE);
        auth.insert(AuthFlags::CONNECTION_ENCRYPTED);
        assert!(auth.contains(AuthFlags::SSP_PAIRING_ACTIVE));
        auth.remove(AuthFlags::SSP_PAIRING_ACTIVE);
        assert!(!auth.contains(AuthFlags::SSP_PAIRING_ACTIVE));
        assert_eq!(auth.bits(), 0x0020);
    }
}
