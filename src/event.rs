//! HCI event decoding and the events the stack synthesizes for upper layers.
use bt_hci::param::BdAddr;

use crate::codec::le16;
use crate::cursor::ReadCursor;
use crate::transport::PacketType;

pub const EVENT_INQUIRY_COMPLETE: u8 = 0x01;
pub const EVENT_INQUIRY_RESULT: u8 = 0x02;
pub const EVENT_CONNECTION_COMPLETE: u8 = 0x03;
pub const EVENT_CONNECTION_REQUEST: u8 = 0x04;
pub const EVENT_DISCONNECTION_COMPLETE: u8 = 0x05;
pub const EVENT_AUTHENTICATION_COMPLETE: u8 = 0x06;
pub const EVENT_REMOTE_NAME_REQUEST_COMPLETE: u8 = 0x07;
pub const EVENT_ENCRYPTION_CHANGE: u8 = 0x08;
pub const EVENT_READ_REMOTE_SUPPORTED_FEATURES_COMPLETE: u8 = 0x0b;
pub const EVENT_COMMAND_COMPLETE: u8 = 0x0e;
pub const EVENT_COMMAND_STATUS: u8 = 0x0f;
pub const EVENT_HARDWARE_ERROR: u8 = 0x10;
pub const EVENT_ROLE_CHANGE: u8 = 0x12;
pub const EVENT_NUMBER_OF_COMPLETED_PACKETS: u8 = 0x13;
pub const EVENT_MODE_CHANGE: u8 = 0x14;
pub const EVENT_PIN_CODE_REQUEST: u8 = 0x16;
pub const EVENT_LINK_KEY_REQUEST: u8 = 0x17;
pub const EVENT_LINK_KEY_NOTIFICATION: u8 = 0x18;
pub const EVENT_INQUIRY_RESULT_WITH_RSSI: u8 = 0x22;
pub const EVENT_SYNCHRONOUS_CONNECTION_COMPLETE: u8 = 0x2c;
pub const EVENT_EXTENDED_INQUIRY_RESPONSE: u8 = 0x2f;
pub const EVENT_IO_CAPABILITY_REQUEST: u8 = 0x31;
pub const EVENT_USER_CONFIRMATION_REQUEST: u8 = 0x33;
pub const EVENT_USER_PASSKEY_REQUEST: u8 = 0x34;
pub const EVENT_LE_META: u8 = 0x3e;
pub const EVENT_VENDOR_SPECIFIC: u8 = 0xff;

pub const SUBEVENT_LE_CONNECTION_COMPLETE: u8 = 0x01;
pub const SUBEVENT_LE_ADVERTISING_REPORT: u8 = 0x02;
pub const SUBEVENT_LE_CONNECTION_UPDATE_COMPLETE: u8 = 0x03;
pub const SUBEVENT_LE_REMOTE_CONNECTION_PARAMETER_REQUEST: u8 = 0x06;

// Events generated by the stack itself.
pub const EVENT_STATE: u8 = 0x60;
pub const EVENT_NR_CONNECTIONS_CHANGED: u8 = 0x61;
pub const EVENT_POWERON_FAILED: u8 = 0x62;
pub const EVENT_DISCOVERABLE_ENABLED: u8 = 0x66;
pub const EVENT_TRANSPORT_SLEEP_MODE: u8 = 0x69;
pub const EVENT_TRANSPORT_PACKET_SENT: u8 = 0x6e;
pub const EVENT_SCO_CAN_SEND_NOW: u8 = 0x6f;
pub const EVENT_L2CAP_TIMEOUT_CHECK: u8 = 0x77;
pub const EVENT_GAP_SECURITY_LEVEL: u8 = 0xd8;
pub const EVENT_GAP_DEDICATED_BONDING_COMPLETED: u8 = 0xd9;
pub const EVENT_GAP_ADVERTISING_REPORT: u8 = 0xda;
pub const EVENT_GAP_INQUIRY_RESULT: u8 = 0xdb;
pub const EVENT_GAP_INQUIRY_COMPLETE: u8 = 0xdc;
pub const EVENT_GAP_RSSI_MEASUREMENT: u8 = 0xdd;

/// Longest remote name carried in an exploded inquiry result.
pub const INQUIRY_MAX_NAME_LEN: usize = 32;

/// HCI status and reason codes used by the stack.
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const UNKNOWN_HCI_COMMAND: u8 = 0x01;
    pub const UNKNOWN_CONNECTION_IDENTIFIER: u8 = 0x02;
    pub const HARDWARE_FAILURE: u8 = 0x03;
    pub const PAGE_TIMEOUT: u8 = 0x04;
    pub const AUTHENTICATION_FAILURE: u8 = 0x05;
    pub const PIN_OR_KEY_MISSING: u8 = 0x06;
    pub const MEMORY_CAPACITY_EXCEEDED: u8 = 0x07;
    pub const CONNECTION_TIMEOUT: u8 = 0x08;
    pub const CONNECTION_LIMIT_EXCEEDED: u8 = 0x09;
    pub const ACL_CONNECTION_ALREADY_EXISTS: u8 = 0x0b;
    pub const COMMAND_DISALLOWED: u8 = 0x0c;
    pub const CONNECTION_REJECTED_DUE_TO_LIMITED_RESOURCES: u8 = 0x0d;
    pub const CONNECTION_REJECTED_DUE_TO_UNACCEPTABLE_BD_ADDR: u8 = 0x0f;
    pub const UNSUPPORTED_FEATURE_OR_PARAMETER_VALUE: u8 = 0x11;
    pub const INVALID_HCI_COMMAND_PARAMETERS: u8 = 0x12;
    pub const REMOTE_USER_TERMINATED_CONNECTION: u8 = 0x13;
    pub const CONNECTION_TERMINATED_BY_LOCAL_HOST: u8 = 0x16;
    pub const PAIRING_NOT_ALLOWED: u8 = 0x18;
    pub const UNACCEPTABLE_CONNECTION_PARAMETERS: u8 = 0x3b;
    /// Host side status for an ACL send without controller buffers.
    pub const ACL_BUFFERS_FULL: u8 = 0x57;
}

/// Top-level view of an event packet, starting at the event code.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub enum Event<'d> {
    CommandComplete {
        num_packets: u8,
        opcode: u16,
        data: &'d [u8],
    },
    CommandStatus {
        status: u8,
        num_packets: u8,
        opcode: u16,
    },
    DisconnectionComplete {
        status: u8,
        handle: u16,
        reason: u8,
    },
    NumberOfCompletedPackets(CompletedPackets<'d>),
    LeMeta {
        subevent: u8,
        data: &'d [u8],
    },
    Other {
        code: u8,
        params: &'d [u8],
    },
}

impl<'d> Event<'d> {
    /// Decodes an event, assuming the packet type byte has already been stripped.
    pub fn read(packet: &'d [u8]) -> Result<Self, crate::codec::Error> {
        let mut r = ReadCursor::new(packet);
        let code: u8 = r.read()?;
        let len: u8 = r.read()?;
        let params = r.slice(len as usize)?;
        let mut r = ReadCursor::new(params);
        Ok(match code {
            EVENT_COMMAND_COMPLETE => {
                let num_packets = r.read()?;
                let opcode = r.read()?;
                Self::CommandComplete {
                    num_packets,
                    opcode,
                    data: r.remaining(),
                }
            }
            EVENT_COMMAND_STATUS => {
                let status = r.read()?;
                let num_packets = r.read()?;
                let opcode = r.read()?;
                Self::CommandStatus {
                    status,
                    num_packets,
                    opcode,
                }
            }
            EVENT_DISCONNECTION_COMPLETE => {
                let status = r.read()?;
                let handle = r.read()?;
                let reason = r.read()?;
                Self::DisconnectionComplete { status, handle, reason }
            }
            EVENT_NUMBER_OF_COMPLETED_PACKETS => {
                let count: u8 = r.read()?;
                let entries = r.remaining();
                if entries.len() != count as usize * 4 {
                    return Err(crate::codec::Error::InvalidValue);
                }
                Self::NumberOfCompletedPackets(CompletedPackets { entries })
            }
            EVENT_LE_META => {
                let subevent = r.read()?;
                Self::LeMeta {
                    subevent,
                    data: r.remaining(),
                }
            }
            _ => Self::Other { code, params },
        })
    }
}

/// Entries of a Number Of Completed Packets event.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct CompletedPackets<'d> {
    entries: &'d [u8],
}

impl<'d> CompletedPackets<'d> {
    /// Iterates `(handle, completed)` pairs, with the handle masked to 12 bits.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + 'd {
        self.entries
            .chunks_exact(4)
            .map(|c| (le16(c, 0) & 0x0fff, le16(c, 2)))
    }
}

/// Receives every HCI event and every event generated by the stack.
pub trait EventHandler {
    fn on_event(&self, event: &[u8]);
}

/// Receives ACL or SCO data, and SCO can-send-now notifications.
pub trait PacketHandler {
    fn on_packet(&self, packet_type: PacketType, packet: &[u8]);
}

/// Fixed size buffer for a synthesized event.
pub struct SyntheticEvent<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> SyntheticEvent<N> {
    pub fn new(code: u8) -> Self {
        let mut buf = [0; N];
        buf[0] = code;
        Self { buf, len: 2 }
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.push(&[v]);
        self
    }

    pub fn u16(mut self, v: u16) -> Self {
        self.push(&v.to_le_bytes());
        self
    }

    pub fn addr(mut self, addr: &BdAddr) -> Self {
        self.push(addr.raw());
        self
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.push(data);
        self
    }

    fn push(&mut self, data: &[u8]) {
        let n = data.len().min(N - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
    }

    /// The finished event with its parameter length filled in.
    pub fn finish(&mut self) -> &[u8] {
        self.buf[1] = (self.len - 2) as u8;
        &self.buf[..self.len]
    }
}
