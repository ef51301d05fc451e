//! HCI commands emitted by the stack.

use bt_hci::param::BdAddr;

use crate::codec::Error;
use crate::cursor::WriteCursor;

pub const LINK_CONTROL_OGF: u8 = 0x01;
pub const LINK_POLICY_OGF: u8 = 0x02;
pub const CONTROLLER_OGF: u8 = 0x03;
pub const INFORMATIONAL_OGF: u8 = 0x04;
pub const STATUS_OGF: u8 = 0x05;
pub const LE_OGF: u8 = 0x08;
pub const VENDOR_OGF: u8 = 0x3f;

/// Size of the local name parameter of Write Local Name.
pub const LOCAL_NAME_LEN: usize = 248;
/// Size of the data parameter of Write Extended Inquiry Response.
pub const EIR_DATA_LEN: usize = 240;
/// Size of advertising and scan response data.
pub const ADV_DATA_LEN: usize = 31;

#[derive(Debug)]
pub struct CommandHeader {
    pub opcode: u16,
    pub len: u8,
}

pub const fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) + ocf
}

impl CommandHeader {
    pub fn from_bytes(bytes: &[u8]) -> Option<CommandHeader> {
        match bytes {
            [lo, hi, len, ..] => Some(CommandHeader {
                opcode: ((*hi as u16) << 8) + *lo as u16,
                len: *len,
            }),
            _ => None,
        }
    }

    pub fn write_into(&self, dst: &mut [u8]) {
        dst[0] = (self.opcode & 0xff) as u8;
        dst[1] = ((self.opcode & 0xff00) >> 8) as u8;
        dst[2] = self.len;
    }

    pub fn ogf(&self) -> u8 {
        ((self.opcode & 0b1111110000000000) >> 10) as u8
    }

    pub fn ocf(&self) -> u16 {
        self.opcode & 0b1111111111
    }
}

/// Opcodes of every command the stack sends or matches completions against.
pub mod opcodes {
    use super::*;

    pub const INQUIRY: u16 = opcode(LINK_CONTROL_OGF, 0x01);
    pub const INQUIRY_CANCEL: u16 = opcode(LINK_CONTROL_OGF, 0x02);
    pub const CREATE_CONNECTION: u16 = opcode(LINK_CONTROL_OGF, 0x05);
    pub const DISCONNECT: u16 = opcode(LINK_CONTROL_OGF, 0x06);
    pub const CREATE_CONNECTION_CANCEL: u16 = opcode(LINK_CONTROL_OGF, 0x08);
    pub const ACCEPT_CONNECTION_REQUEST: u16 = opcode(LINK_CONTROL_OGF, 0x09);
    pub const REJECT_CONNECTION_REQUEST: u16 = opcode(LINK_CONTROL_OGF, 0x0a);
    pub const LINK_KEY_REQUEST_REPLY: u16 = opcode(LINK_CONTROL_OGF, 0x0b);
    pub const LINK_KEY_REQUEST_NEGATIVE_REPLY: u16 = opcode(LINK_CONTROL_OGF, 0x0c);
    pub const PIN_CODE_REQUEST_REPLY: u16 = opcode(LINK_CONTROL_OGF, 0x0d);
    pub const PIN_CODE_REQUEST_NEGATIVE_REPLY: u16 = opcode(LINK_CONTROL_OGF, 0x0e);
    pub const AUTHENTICATION_REQUESTED: u16 = opcode(LINK_CONTROL_OGF, 0x11);
    pub const SET_CONNECTION_ENCRYPTION: u16 = opcode(LINK_CONTROL_OGF, 0x13);
    pub const REMOTE_NAME_REQUEST: u16 = opcode(LINK_CONTROL_OGF, 0x19);
    pub const REMOTE_NAME_REQUEST_CANCEL: u16 = opcode(LINK_CONTROL_OGF, 0x1a);
    pub const READ_REMOTE_SUPPORTED_FEATURES: u16 = opcode(LINK_CONTROL_OGF, 0x1b);
    pub const SETUP_SYNCHRONOUS_CONNECTION: u16 = opcode(LINK_CONTROL_OGF, 0x28);
    pub const ACCEPT_SYNCHRONOUS_CONNECTION: u16 = opcode(LINK_CONTROL_OGF, 0x29);
    pub const IO_CAPABILITY_REQUEST_REPLY: u16 = opcode(LINK_CONTROL_OGF, 0x2b);
    pub const USER_CONFIRMATION_REQUEST_REPLY: u16 = opcode(LINK_CONTROL_OGF, 0x2c);
    pub const USER_CONFIRMATION_REQUEST_NEGATIVE_REPLY: u16 = opcode(LINK_CONTROL_OGF, 0x2d);
    pub const USER_PASSKEY_REQUEST_REPLY: u16 = opcode(LINK_CONTROL_OGF, 0x2e);
    pub const USER_PASSKEY_REQUEST_NEGATIVE_REPLY: u16 = opcode(LINK_CONTROL_OGF, 0x2f);
    pub const IO_CAPABILITY_REQUEST_NEGATIVE_REPLY: u16 = opcode(LINK_CONTROL_OGF, 0x34);

    pub const SNIFF_MODE: u16 = opcode(LINK_POLICY_OGF, 0x03);
    pub const EXIT_SNIFF_MODE: u16 = opcode(LINK_POLICY_OGF, 0x04);
    pub const WRITE_DEFAULT_LINK_POLICY_SETTING: u16 = opcode(LINK_POLICY_OGF, 0x0f);

    pub const SET_EVENT_MASK: u16 = opcode(CONTROLLER_OGF, 0x01);
    pub const RESET: u16 = opcode(CONTROLLER_OGF, 0x03);
    pub const DELETE_STORED_LINK_KEY: u16 = opcode(CONTROLLER_OGF, 0x12);
    pub const WRITE_LOCAL_NAME: u16 = opcode(CONTROLLER_OGF, 0x13);
    pub const READ_LOCAL_NAME: u16 = opcode(CONTROLLER_OGF, 0x14);
    pub const WRITE_PAGE_TIMEOUT: u16 = opcode(CONTROLLER_OGF, 0x18);
    pub const WRITE_SCAN_ENABLE: u16 = opcode(CONTROLLER_OGF, 0x1a);
    pub const WRITE_CLASS_OF_DEVICE: u16 = opcode(CONTROLLER_OGF, 0x24);
    pub const WRITE_SYNCHRONOUS_FLOW_CONTROL_ENABLE: u16 = opcode(CONTROLLER_OGF, 0x2f);
    pub const WRITE_LINK_SUPERVISION_TIMEOUT: u16 = opcode(CONTROLLER_OGF, 0x37);
    pub const WRITE_INQUIRY_MODE: u16 = opcode(CONTROLLER_OGF, 0x45);
    pub const WRITE_EXTENDED_INQUIRY_RESPONSE: u16 = opcode(CONTROLLER_OGF, 0x52);
    pub const WRITE_SIMPLE_PAIRING_MODE: u16 = opcode(CONTROLLER_OGF, 0x56);
    pub const WRITE_LE_HOST_SUPPORTED: u16 = opcode(CONTROLLER_OGF, 0x6d);
    pub const WRITE_SECURE_CONNECTIONS_HOST_SUPPORT: u16 = opcode(CONTROLLER_OGF, 0x7a);
    pub const WRITE_DEFAULT_ERRONEOUS_DATA_REPORTING: u16 = opcode(CONTROLLER_OGF, 0x5b);

    pub const READ_LOCAL_VERSION_INFORMATION: u16 = opcode(INFORMATIONAL_OGF, 0x01);
    pub const READ_LOCAL_SUPPORTED_COMMANDS: u16 = opcode(INFORMATIONAL_OGF, 0x02);
    pub const READ_LOCAL_SUPPORTED_FEATURES: u16 = opcode(INFORMATIONAL_OGF, 0x03);
    pub const READ_BUFFER_SIZE: u16 = opcode(INFORMATIONAL_OGF, 0x05);
    pub const READ_BD_ADDR: u16 = opcode(INFORMATIONAL_OGF, 0x09);

    pub const READ_RSSI: u16 = opcode(STATUS_OGF, 0x05);
    pub const READ_ENCRYPTION_KEY_SIZE: u16 = opcode(STATUS_OGF, 0x08);

    pub const LE_SET_EVENT_MASK: u16 = opcode(LE_OGF, 0x01);
    pub const LE_READ_BUFFER_SIZE: u16 = opcode(LE_OGF, 0x02);
    pub const LE_SET_RANDOM_ADDRESS: u16 = opcode(LE_OGF, 0x05);
    pub const LE_SET_ADVERTISING_PARAMETERS: u16 = opcode(LE_OGF, 0x06);
    pub const LE_SET_ADVERTISING_DATA: u16 = opcode(LE_OGF, 0x08);
    pub const LE_SET_SCAN_RESPONSE_DATA: u16 = opcode(LE_OGF, 0x09);
    pub const LE_SET_ADVERTISE_ENABLE: u16 = opcode(LE_OGF, 0x0a);
    pub const LE_SET_SCAN_PARAMETERS: u16 = opcode(LE_OGF, 0x0b);
    pub const LE_SET_SCAN_ENABLE: u16 = opcode(LE_OGF, 0x0c);
    pub const LE_CREATE_CONNECTION: u16 = opcode(LE_OGF, 0x0d);
    pub const LE_CREATE_CONNECTION_CANCEL: u16 = opcode(LE_OGF, 0x0e);
    pub const LE_READ_WHITE_LIST_SIZE: u16 = opcode(LE_OGF, 0x0f);
    pub const LE_CLEAR_WHITE_LIST: u16 = opcode(LE_OGF, 0x10);
    pub const LE_ADD_DEVICE_TO_WHITE_LIST: u16 = opcode(LE_OGF, 0x11);
    pub const LE_REMOVE_DEVICE_FROM_WHITE_LIST: u16 = opcode(LE_OGF, 0x12);
    pub const LE_CONNECTION_UPDATE: u16 = opcode(LE_OGF, 0x13);
    pub const LE_REMOTE_CONNECTION_PARAMETER_REQUEST_REPLY: u16 = opcode(LE_OGF, 0x20);
    pub const LE_REMOTE_CONNECTION_PARAMETER_REQUEST_NEGATIVE_REPLY: u16 = opcode(LE_OGF, 0x21);
    pub const LE_SET_PHY: u16 = opcode(LE_OGF, 0x32);

    /// Broadcom: routes SCO either over PCM or over the HCI transport.
    pub const BCM_WRITE_SCO_PCM_INT: u16 = opcode(VENDOR_OGF, 0x1c);
}

use opcodes::*;

/// LE connection parameters as sent in create connection and connection update commands.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
    pub min_ce_length: u16,
    pub max_ce_length: u16,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct AdvertisingParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub adv_type: u8,
    pub own_address_type: u8,
    pub direct_address_type: u8,
    pub direct_address: BdAddr,
    pub channel_map: u8,
    pub filter_policy: u8,
}

#[derive(Debug, Clone, Copy)]
pub enum Command<'a> {
    Inquiry { lap: u32, duration: u8, num_responses: u8 },
    InquiryCancel,
    CreateConnection {
        addr: BdAddr,
        packet_types: u16,
        page_scan_repetition_mode: u8,
        clock_offset: u16,
        allow_role_switch: u8,
    },
    Disconnect { handle: u16, reason: u8 },
    CreateConnectionCancel { addr: BdAddr },
    AcceptConnectionRequest { addr: BdAddr, role: u8 },
    RejectConnectionRequest { addr: BdAddr, reason: u8 },
    LinkKeyRequestReply { addr: BdAddr, link_key: &'a [u8; 16] },
    LinkKeyRequestNegativeReply { addr: BdAddr },
    PinCodeRequestReply { addr: BdAddr, pin: &'a [u8] },
    PinCodeRequestNegativeReply { addr: BdAddr },
    AuthenticationRequested { handle: u16 },
    SetConnectionEncryption { handle: u16, enable: u8 },
    RemoteNameRequest {
        addr: BdAddr,
        page_scan_repetition_mode: u8,
        clock_offset: u16,
    },
    RemoteNameRequestCancel { addr: BdAddr },
    ReadRemoteSupportedFeatures { handle: u16 },
    SetupSynchronousConnection {
        handle: u16,
        tx_bandwidth: u32,
        rx_bandwidth: u32,
        max_latency: u16,
        voice_setting: u16,
        retransmission_effort: u8,
        packet_type: u16,
    },
    AcceptSynchronousConnection {
        addr: BdAddr,
        tx_bandwidth: u32,
        rx_bandwidth: u32,
        max_latency: u16,
        voice_setting: u16,
        retransmission_effort: u8,
        packet_type: u16,
    },
    IoCapabilityRequestReply {
        addr: BdAddr,
        io_capability: u8,
        oob_data_present: u8,
        authentication_requirements: u8,
    },
    UserConfirmationRequestReply { addr: BdAddr },
    UserConfirmationRequestNegativeReply { addr: BdAddr },
    UserPasskeyRequestReply { addr: BdAddr, passkey: u32 },
    UserPasskeyRequestNegativeReply { addr: BdAddr },
    IoCapabilityRequestNegativeReply { addr: BdAddr, reason: u8 },

    SniffMode {
        handle: u16,
        max_interval: u16,
        min_interval: u16,
        attempt: u16,
        timeout: u16,
    },
    ExitSniffMode { handle: u16 },
    WriteDefaultLinkPolicySetting { settings: u16 },

    SetEventMask { low: u32, high: u32 },
    Reset,
    DeleteStoredLinkKey { addr: BdAddr, delete_all: u8 },
    WriteLocalName { name: &'a [u8] },
    ReadLocalName,
    WritePageTimeout { timeout: u16 },
    WriteScanEnable { scan_enable: u8 },
    WriteClassOfDevice { class_of_device: u32 },
    WriteSynchronousFlowControlEnable { enable: u8 },
    WriteLinkSupervisionTimeout { handle: u16, timeout: u16 },
    WriteInquiryMode { mode: u8 },
    WriteExtendedInquiryResponse { fec_required: u8, data: &'a [u8] },
    WriteSimplePairingMode { enable: u8 },
    WriteLeHostSupported { le_supported: u8, simultaneous: u8 },
    WriteSecureConnectionsHostSupport { enable: u8 },
    WriteDefaultErroneousDataReporting { enable: u8 },

    ReadLocalVersionInformation,
    ReadLocalSupportedCommands,
    ReadLocalSupportedFeatures,
    ReadBufferSize,
    ReadBdAddr,

    ReadRssi { handle: u16 },
    ReadEncryptionKeySize { handle: u16 },

    LeSetEventMask { low: u32, high: u32 },
    LeReadBufferSize,
    LeSetRandomAddress { addr: BdAddr },
    LeSetAdvertisingParameters(&'a AdvertisingParams),
    LeSetAdvertisingData { data: &'a [u8] },
    LeSetScanResponseData { data: &'a [u8] },
    LeSetAdvertiseEnable { enable: u8 },
    LeSetScanParameters {
        scan_type: u8,
        interval: u16,
        window: u16,
        own_address_type: u8,
        filter_policy: u8,
    },
    LeSetScanEnable { enable: u8, filter_duplicates: u8 },
    LeCreateConnection {
        scan_interval: u16,
        scan_window: u16,
        initiator_filter_policy: u8,
        peer_address_type: u8,
        peer_address: BdAddr,
        own_address_type: u8,
        params: ConnParams,
    },
    LeCreateConnectionCancel,
    LeReadWhiteListSize,
    LeClearWhiteList,
    LeAddDeviceToWhiteList { address_type: u8, addr: BdAddr },
    LeRemoveDeviceFromWhiteList { address_type: u8, addr: BdAddr },
    LeConnectionUpdate { handle: u16, params: ConnParams },
    LeRemoteConnectionParameterRequestReply { handle: u16, params: ConnParams },
    LeRemoteConnectionParameterRequestNegativeReply { handle: u16, reason: u8 },
    LeSetPhy {
        handle: u16,
        all_phys: u8,
        tx_phys: u8,
        rx_phys: u8,
        phy_options: u16,
    },

    BcmWriteScoPcmInt {
        sco_routing: u8,
        pcm_interface_rate: u8,
        frame_type: u8,
        sync_mode: u8,
        clock_mode: u8,
    },

    /// Pre-encoded parameters, used for vendor commands.
    Raw { opcode: u16, params: &'a [u8] },
}

impl<'a> Command<'a> {
    pub fn opcode(&self) -> u16 {
        match self {
            Self::Inquiry { .. } => INQUIRY,
            Self::InquiryCancel => INQUIRY_CANCEL,
            Self::CreateConnection { .. } => CREATE_CONNECTION,
            Self::Disconnect { .. } => DISCONNECT,
            Self::CreateConnectionCancel { .. } => CREATE_CONNECTION_CANCEL,
            Self::AcceptConnectionRequest { .. } => ACCEPT_CONNECTION_REQUEST,
            Self::RejectConnectionRequest { .. } => REJECT_CONNECTION_REQUEST,
            Self::LinkKeyRequestReply { .. } => LINK_KEY_REQUEST_REPLY,
            Self::LinkKeyRequestNegativeReply { .. } => LINK_KEY_REQUEST_NEGATIVE_REPLY,
            Self::PinCodeRequestReply { .. } => PIN_CODE_REQUEST_REPLY,
            Self::PinCodeRequestNegativeReply { .. } => PIN_CODE_REQUEST_NEGATIVE_REPLY,
            Self::AuthenticationRequested { .. } => AUTHENTICATION_REQUESTED,
            Self::SetConnectionEncryption { .. } => SET_CONNECTION_ENCRYPTION,
            Self::RemoteNameRequest { .. } => REMOTE_NAME_REQUEST,
            Self::RemoteNameRequestCancel { .. } => REMOTE_NAME_REQUEST_CANCEL,
            Self::ReadRemoteSupportedFeatures { .. } => READ_REMOTE_SUPPORTED_FEATURES,
            Self::SetupSynchronousConnection { .. } => SETUP_SYNCHRONOUS_CONNECTION,
            Self::AcceptSynchronousConnection { .. } => ACCEPT_SYNCHRONOUS_CONNECTION,
            Self::IoCapabilityRequestReply { .. } => IO_CAPABILITY_REQUEST_REPLY,
            Self::UserConfirmationRequestReply { .. } => USER_CONFIRMATION_REQUEST_REPLY,
            Self::UserConfirmationRequestNegativeReply { .. } => USER_CONFIRMATION_REQUEST_NEGATIVE_REPLY,
            Self::UserPasskeyRequestReply { .. } => USER_PASSKEY_REQUEST_REPLY,
            Self::UserPasskeyRequestNegativeReply { .. } => USER_PASSKEY_REQUEST_NEGATIVE_REPLY,
            Self::IoCapabilityRequestNegativeReply { .. } => IO_CAPABILITY_REQUEST_NEGATIVE_REPLY,
            Self::SniffMode { .. } => SNIFF_MODE,
            Self::ExitSniffMode { .. } => EXIT_SNIFF_MODE,
            Self::WriteDefaultLinkPolicySetting { .. } => WRITE_DEFAULT_LINK_POLICY_SETTING,
            Self::SetEventMask { .. } => SET_EVENT_MASK,
            Self::Reset => RESET,
            Self::DeleteStoredLinkKey { .. } => DELETE_STORED_LINK_KEY,
            Self::WriteLocalName { .. } => WRITE_LOCAL_NAME,
            Self::ReadLocalName => READ_LOCAL_NAME,
            Self::WritePageTimeout { .. } => WRITE_PAGE_TIMEOUT,
            Self::WriteScanEnable { .. } => WRITE_SCAN_ENABLE,
            Self::WriteClassOfDevice { .. } => WRITE_CLASS_OF_DEVICE,
            Self::WriteSynchronousFlowControlEnable { .. } => WRITE_SYNCHRONOUS_FLOW_CONTROL_ENABLE,
            Self::WriteLinkSupervisionTimeout { .. } => WRITE_LINK_SUPERVISION_TIMEOUT,
            Self::WriteInquiryMode { .. } => WRITE_INQUIRY_MODE,
            Self::WriteExtendedInquiryResponse { .. } => WRITE_EXTENDED_INQUIRY_RESPONSE,
            Self::WriteSimplePairingMode { .. } => WRITE_SIMPLE_PAIRING_MODE,
            Self::WriteLeHostSupported { .. } => WRITE_LE_HOST_SUPPORTED,
            Self::WriteSecureConnectionsHostSupport { .. } => WRITE_SECURE_CONNECTIONS_HOST_SUPPORT,
            Self::WriteDefaultErroneousDataReporting { .. } => WRITE_DEFAULT_ERRONEOUS_DATA_REPORTING,
            Self::ReadLocalVersionInformation => READ_LOCAL_VERSION_INFORMATION,
            Self::ReadLocalSupportedCommands => READ_LOCAL_SUPPORTED_COMMANDS,
            Self::ReadLocalSupportedFeatures => READ_LOCAL_SUPPORTED_FEATURES,
            Self::ReadBufferSize => READ_BUFFER_SIZE,
            Self::ReadBdAddr => READ_BD_ADDR,
            Self::ReadRssi { .. } => READ_RSSI,
            Self::ReadEncryptionKeySize { .. } => READ_ENCRYPTION_KEY_SIZE,
            Self::LeSetEventMask { .. } => LE_SET_EVENT_MASK,
            Self::LeReadBufferSize => LE_READ_BUFFER_SIZE,
            Self::LeSetRandomAddress { .. } => LE_SET_RANDOM_ADDRESS,
            Self::LeSetAdvertisingParameters(_) => LE_SET_ADVERTISING_PARAMETERS,
            Self::LeSetAdvertisingData { .. } => LE_SET_ADVERTISING_DATA,
            Self::LeSetScanResponseData { .. } => LE_SET_SCAN_RESPONSE_DATA,
            Self::LeSetAdvertiseEnable { .. } => LE_SET_ADVERTISE_ENABLE,
            Self::LeSetScanParameters { .. } => LE_SET_SCAN_PARAMETERS,
            Self::LeSetScanEnable { .. } => LE_SET_SCAN_ENABLE,
            Self::LeCreateConnection { .. } => LE_CREATE_CONNECTION,
            Self::LeCreateConnectionCancel => LE_CREATE_CONNECTION_CANCEL,
            Self::LeReadWhiteListSize => LE_READ_WHITE_LIST_SIZE,
            Self::LeClearWhiteList => LE_CLEAR_WHITE_LIST,
            Self::LeAddDeviceToWhiteList { .. } => LE_ADD_DEVICE_TO_WHITE_LIST,
            Self::LeRemoveDeviceFromWhiteList { .. } => LE_REMOVE_DEVICE_FROM_WHITE_LIST,
            Self::LeConnectionUpdate { .. } => LE_CONNECTION_UPDATE,
            Self::LeRemoteConnectionParameterRequestReply { .. } => LE_REMOTE_CONNECTION_PARAMETER_REQUEST_REPLY,
            Self::LeRemoteConnectionParameterRequestNegativeReply { .. } => {
                LE_REMOTE_CONNECTION_PARAMETER_REQUEST_NEGATIVE_REPLY
            }
            Self::LeSetPhy { .. } => LE_SET_PHY,
            Self::BcmWriteScoPcmInt { .. } => BCM_WRITE_SCO_PCM_INT,
            Self::Raw { opcode, .. } => *opcode,
        }
    }

    /// Encodes the command including its 3 byte header, returning the total length.
    pub fn encode(&self, dest: &mut [u8]) -> Result<usize, Error> {
        let mut w = WriteCursor::new(dest);
        let (mut header, mut body) = w.split(3)?;
        self.encode_params(&mut body)?;
        let len = body.len();
        if len > u8::MAX as usize {
            return Err(Error::InvalidValue);
        }
        let mut raw = [0; 3];
        CommandHeader {
            opcode: self.opcode(),
            len: len as u8,
        }
        .write_into(&mut raw);
        header.append(&raw)?;
        Ok(3 + len)
    }

    fn encode_params(&self, w: &mut WriteCursor<'_>) -> Result<(), Error> {
        match self {
            Self::InquiryCancel
            | Self::Reset
            | Self::ReadLocalName
            | Self::ReadLocalVersionInformation
            | Self::ReadLocalSupportedCommands
            | Self::ReadLocalSupportedFeatures
            | Self::ReadBufferSize
            | Self::ReadBdAddr
            | Self::LeReadBufferSize
            | Self::LeCreateConnectionCancel
            | Self::LeReadWhiteListSize
            | Self::LeClearWhiteList => {}
            Self::Inquiry {
                lap,
                duration,
                num_responses,
            } => {
                w.append(&lap.to_le_bytes()[..3])?;
                w.write(*duration)?;
                w.write(*num_responses)?;
            }
            Self::CreateConnection {
                addr,
                packet_types,
                page_scan_repetition_mode,
                clock_offset,
                allow_role_switch,
            } => {
                w.write(*addr)?;
                w.write(*packet_types)?;
                w.write(*page_scan_repetition_mode)?;
                w.write(0u8)?;
                w.write(*clock_offset)?;
                w.write(*allow_role_switch)?;
            }
            Self::Disconnect { handle, reason } => {
                w.write(*handle)?;
                w.write(*reason)?;
            }
            Self::CreateConnectionCancel { addr }
            | Self::LinkKeyRequestNegativeReply { addr }
            | Self::PinCodeRequestNegativeReply { addr }
            | Self::RemoteNameRequestCancel { addr }
            | Self::UserConfirmationRequestReply { addr }
            | Self::UserConfirmationRequestNegativeReply { addr }
            | Self::UserPasskeyRequestNegativeReply { addr }
            | Self::LeSetRandomAddress { addr } => {
                w.write(*addr)?;
            }
            Self::AcceptConnectionRequest { addr, role } => {
                w.write(*addr)?;
                w.write(*role)?;
            }
            Self::RejectConnectionRequest { addr, reason } | Self::IoCapabilityRequestNegativeReply { addr, reason } => {
                w.write(*addr)?;
                w.write(*reason)?;
            }
            Self::LinkKeyRequestReply { addr, link_key } => {
                w.write(*addr)?;
                w.append(&link_key[..])?;
            }
            Self::PinCodeRequestReply { addr, pin } => {
                if pin.len() > 16 {
                    return Err(Error::InvalidValue);
                }
                w.write(*addr)?;
                w.write(pin.len() as u8)?;
                w.append(pin)?;
                w.fill(0, 16 - pin.len())?;
            }
            Self::AuthenticationRequested { handle }
            | Self::ReadRemoteSupportedFeatures { handle }
            | Self::ExitSniffMode { handle }
            | Self::ReadRssi { handle }
            | Self::ReadEncryptionKeySize { handle } => {
                w.write(*handle)?;
            }
            Self::SetConnectionEncryption { handle, enable } => {
                w.write(*handle)?;
                w.write(*enable)?;
            }
            Self::RemoteNameRequest {
                addr,
                page_scan_repetition_mode,
                clock_offset,
            } => {
                w.write(*addr)?;
                w.write(*page_scan_repetition_mode)?;
                w.write(0u8)?;
                w.write(*clock_offset)?;
            }
            Self::SetupSynchronousConnection {
                handle,
                tx_bandwidth,
                rx_bandwidth,
                max_latency,
                voice_setting,
                retransmission_effort,
                packet_type,
            } => {
                w.write(*handle)?;
                w.write(*tx_bandwidth)?;
                w.write(*rx_bandwidth)?;
                w.write(*max_latency)?;
                w.write(*voice_setting)?;
                w.write(*retransmission_effort)?;
                w.write(*packet_type)?;
            }
            Self::AcceptSynchronousConnection {
                addr,
                tx_bandwidth,
                rx_bandwidth,
                max_latency,
                voice_setting,
                retransmission_effort,
                packet_type,
            } => {
                w.write(*addr)?;
                w.write(*tx_bandwidth)?;
                w.write(*rx_bandwidth)?;
                w.write(*max_latency)?;
                w.write(*voice_setting)?;
                w.write(*retransmission_effort)?;
                w.write(*packet_type)?;
            }
            Self::IoCapabilityRequestReply {
                addr,
                io_capability,
                oob_data_present,
                authentication_requirements,
            } => {
                w.write(*addr)?;
                w.write(*io_capability)?;
                w.write(*oob_data_present)?;
                w.write(*authentication_requirements)?;
            }
            Self::UserPasskeyRequestReply { addr, passkey } => {
                w.write(*addr)?;
                w.write(*passkey)?;
            }
            Self::SniffMode {
                handle,
                max_interval,
                min_interval,
                attempt,
                timeout,
            } => {
                w.write(*handle)?;
                w.write(*max_interval)?;
                w.write(*min_interval)?;
                w.write(*attempt)?;
                w.write(*timeout)?;
            }
            Self::WriteDefaultLinkPolicySetting { settings } => {
                w.write(*settings)?;
            }
            Self::SetEventMask { low, high } | Self::LeSetEventMask { low, high } => {
                w.write(*low)?;
                w.write(*high)?;
            }
            Self::DeleteStoredLinkKey { addr, delete_all } => {
                w.write(*addr)?;
                w.write(*delete_all)?;
            }
            Self::WriteLocalName { name } => {
                padded(w, name, LOCAL_NAME_LEN)?;
            }
            Self::WritePageTimeout { timeout } => {
                w.write(*timeout)?;
            }
            Self::WriteScanEnable { scan_enable } => {
                w.write(*scan_enable)?;
            }
            Self::WriteClassOfDevice { class_of_device } => {
                w.append(&class_of_device.to_le_bytes()[..3])?;
            }
            Self::WriteSynchronousFlowControlEnable { enable }
            | Self::WriteDefaultErroneousDataReporting { enable }
            | Self::WriteSimplePairingMode { enable }
            | Self::WriteSecureConnectionsHostSupport { enable }
            | Self::LeSetAdvertiseEnable { enable } => {
                w.write(*enable)?;
            }
            Self::WriteLinkSupervisionTimeout { handle, timeout } => {
                w.write(*handle)?;
                w.write(*timeout)?;
            }
            Self::WriteInquiryMode { mode } => {
                w.write(*mode)?;
            }
            Self::WriteExtendedInquiryResponse { fec_required, data } => {
                w.write(*fec_required)?;
                padded(w, data, EIR_DATA_LEN)?;
            }
            Self::WriteLeHostSupported {
                le_supported,
                simultaneous,
            } => {
                w.write(*le_supported)?;
                w.write(*simultaneous)?;
            }
            Self::LeSetAdvertisingParameters(params) => {
                w.write(params.interval_min)?;
                w.write(params.interval_max)?;
                w.write(params.adv_type)?;
                w.write(params.own_address_type)?;
                w.write(params.direct_address_type)?;
                w.write(params.direct_address)?;
                w.write(params.channel_map)?;
                w.write(params.filter_policy)?;
            }
            Self::LeSetAdvertisingData { data } | Self::LeSetScanResponseData { data } => {
                if data.len() > ADV_DATA_LEN {
                    return Err(Error::InvalidValue);
                }
                w.write(data.len() as u8)?;
                padded(w, data, ADV_DATA_LEN)?;
            }
            Self::LeSetScanParameters {
                scan_type,
                interval,
                window,
                own_address_type,
                filter_policy,
            } => {
                w.write(*scan_type)?;
                w.write(*interval)?;
                w.write(*window)?;
                w.write(*own_address_type)?;
                w.write(*filter_policy)?;
            }
            Self::LeSetScanEnable {
                enable,
                filter_duplicates,
            } => {
                w.write(*enable)?;
                w.write(*filter_duplicates)?;
            }
            Self::LeCreateConnection {
                scan_interval,
                scan_window,
                initiator_filter_policy,
                peer_address_type,
                peer_address,
                own_address_type,
                params,
            } => {
                w.write(*scan_interval)?;
                w.write(*scan_window)?;
                w.write(*initiator_filter_policy)?;
                w.write(*peer_address_type)?;
                w.write(*peer_address)?;
                w.write(*own_address_type)?;
                conn_params(w, params)?;
            }
            Self::LeAddDeviceToWhiteList { address_type, addr }
            | Self::LeRemoveDeviceFromWhiteList { address_type, addr } => {
                w.write(*address_type)?;
                w.write(*addr)?;
            }
            Self::LeConnectionUpdate { handle, params }
            | Self::LeRemoteConnectionParameterRequestReply { handle, params } => {
                w.write(*handle)?;
                conn_params(w, params)?;
            }
            Self::LeRemoteConnectionParameterRequestNegativeReply { handle, reason } => {
                w.write(*handle)?;
                w.write(*reason)?;
            }
            Self::LeSetPhy {
                handle,
                all_phys,
                tx_phys,
                rx_phys,
                phy_options,
            } => {
                w.write(*handle)?;
                w.write(*all_phys)?;
                w.write(*tx_phys)?;
                w.write(*rx_phys)?;
                w.write(*phy_options)?;
            }
            Self::BcmWriteScoPcmInt {
                sco_routing,
                pcm_interface_rate,
                frame_type,
                sync_mode,
                clock_mode,
            } => {
                w.append(&[*sco_routing, *pcm_interface_rate, *frame_type, *sync_mode, *clock_mode])?;
            }
            Self::Raw { params, .. } => {
                w.append(params)?;
            }
        }
        Ok(())
    }
}

fn padded(w: &mut WriteCursor<'_>, data: &[u8], len: usize) -> Result<(), Error> {
    let n = data.len().min(len);
    w.append(&data[..n])?;
    w.fill(0, len - n)
}

fn conn_params(w: &mut WriteCursor<'_>, params: &ConnParams) -> Result<(), Error> {
    w.write(params.interval_min)?;
    w.write(params.interval_max)?;
    w.write(params.latency)?;
    w.write(params.supervision_timeout)?;
    w.write(params.min_ce_length)?;
    w.write(params.max_ce_length)
}
