//! Controller bring-up after power on.
//!
//! Init is a fixed sequence of steps. Each step sends one command in [`InitPhase::Send`] and
//! waits for its completion in [`InitPhase::W4`]; the completion handler picks the next step,
//! skipping those the controller does not support. Vendor detours are selected by the
//! manufacturer reported in the local version information.
use crate::chipset::ChipsetResult;
use crate::codec::{byte, le16};
use crate::command::{opcodes, Command, EIR_DATA_LEN, LOCAL_NAME_LEN};
use crate::event::{EVENT_COMMAND_COMPLETE, EVENT_COMMAND_STATUS, EVENT_VENDOR_SPECIFIC};
use crate::gap::replace_bd_addr_placeholder;
use crate::hci::{manufacturer, Hci};
use crate::power::{HciState, Substate};
use crate::run_loop::{RunLoop, TimerId};
use crate::transport::Transport;

/// Reset is sent again when not completed within this time.
pub(crate) const RESET_RESEND_TIMEOUT_MS: u64 = 2000;
const BCM_DELAY_MS: u64 = 300;
const BCM_MAX_BAUDRATE: u32 = 3_000_000;

const PAGE_TIMEOUT: u16 = 0x6000;
const EVENT_MASK_LOW: u32 = 0xffff_ffff;
const EVENT_MASK_HIGH_LE: u32 = 0x3fff_ffff;
const EVENT_MASK_HIGH: u32 = 0x1fff_ffff;
const LE_EVENT_MASK: u32 = 0x0008_09ff;

const DATA_TYPE_SHORTENED_LOCAL_NAME: u8 = 0x08;
const DATA_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    Reset,
    ReadLocalVersionInformation,
    ReadLocalName,
    SendBaudChange,
    CustomInit,
    SendResetCsrWarmBoot,
    /// Waiting for the controller to come back after a warm start, with a transport link reset.
    CsrWarmBootLinkReset,
    /// Settle time after a Broadcom init script.
    BcmDelay,
    ReadLocalSupportedCommands,
    SendBaudChangeBcm,
    SetBdAddr,
    SendResetStWarmBoot,
    ReadBdAddr,
    ReadBufferSize,
    ReadLocalSupportedFeatures,
    SetEventMask,
    WriteSimplePairingMode,
    WritePageTimeout,
    WriteDefaultLinkPolicySetting,
    WriteClassOfDevice,
    WriteLocalName,
    WriteEirData,
    WriteInquiryMode,
    WriteSecureConnectionsHostEnable,
    WriteScanEnable,
    WriteSynchronousFlowControlEnable,
    WriteDefaultErroneousDataReporting,
    /// Broadcom only: route SCO over the HCI transport instead of PCM.
    BcmWriteScoPcmInt,
    LeReadBufferSize,
    WriteLeHostSupported,
    LeSetEventMask,
    LeReadWhiteListSize,
    LeSetScanParameters,
    Done,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    Send,
    W4,
}

const SEQUENCE: [InitStep; 34] = [
    InitStep::Reset,
    InitStep::ReadLocalVersionInformation,
    InitStep::ReadLocalName,
    InitStep::SendBaudChange,
    InitStep::CustomInit,
    InitStep::SendResetCsrWarmBoot,
    InitStep::CsrWarmBootLinkReset,
    InitStep::BcmDelay,
    InitStep::ReadLocalSupportedCommands,
    InitStep::SendBaudChangeBcm,
    InitStep::SetBdAddr,
    InitStep::SendResetStWarmBoot,
    InitStep::ReadBdAddr,
    InitStep::ReadBufferSize,
    InitStep::ReadLocalSupportedFeatures,
    InitStep::SetEventMask,
    InitStep::WriteSimplePairingMode,
    InitStep::WritePageTimeout,
    InitStep::WriteDefaultLinkPolicySetting,
    InitStep::WriteClassOfDevice,
    InitStep::WriteLocalName,
    InitStep::WriteEirData,
    InitStep::WriteInquiryMode,
    InitStep::WriteSecureConnectionsHostEnable,
    InitStep::WriteScanEnable,
    InitStep::WriteSynchronousFlowControlEnable,
    InitStep::WriteDefaultErroneousDataReporting,
    InitStep::BcmWriteScoPcmInt,
    InitStep::LeReadBufferSize,
    InitStep::WriteLeHostSupported,
    InitStep::LeSetEventMask,
    InitStep::LeReadWhiteListSize,
    InitStep::LeSetScanParameters,
    InitStep::Done,
];

impl InitStep {
    /// The step following this one in the sequence.
    pub fn next(self) -> InitStep {
        SEQUENCE
            .iter()
            .position(|s| *s == self)
            .and_then(|i| SEQUENCE.get(i + 1))
            .copied()
            .unwrap_or(InitStep::Done)
    }
}

/// Vendor specific detours during init.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Quirks {
    /// A warm start after the init script lets a baud rate change go first.
    pub(crate) csr_warm_boot: bool,
    /// The init script leaves the UART at its initial rate and needs settle time.
    pub(crate) bcm_post_script: bool,
    /// The controller switches baud rate some time after the command, without notice.
    pub(crate) baud_change_unannounced: bool,
    /// A new public address only takes effect after a reset.
    pub(crate) reset_after_bd_addr: bool,
    pub(crate) max_baudrate: Option<u32>,
}

pub(crate) fn quirks(manufacturer: u16) -> Quirks {
    match manufacturer {
        manufacturer::CAMBRIDGE_SILICON_RADIO => Quirks {
            csr_warm_boot: true,
            ..Quirks::default()
        },
        manufacturer::BROADCOM | manufacturer::CYPRESS => Quirks {
            bcm_post_script: true,
            max_baudrate: Some(BCM_MAX_BAUDRATE),
            ..Quirks::default()
        },
        manufacturer::EM_MICROELECTRONIC_MARIN => Quirks {
            bcm_post_script: true,
            ..Quirks::default()
        },
        manufacturer::ST_MICROELECTRONICS => Quirks {
            baud_change_unannounced: true,
            reset_after_bd_addr: true,
            ..Quirks::default()
        },
        manufacturer::ATMEL => Quirks {
            reset_after_bd_addr: true,
            ..Quirks::default()
        },
        _ => Quirks::default(),
    }
}

impl<'d, T: Transport, R: RunLoop> Hci<'d, T, R> {
    fn quirks(&self) -> Quirks {
        quirks(self.manufacturer)
    }

    fn main_baudrate(&self) -> u32 {
        let baudrate = self.config.baudrate_main;
        match self.quirks().max_baudrate {
            Some(max) => baudrate.min(max),
            None => baudrate,
        }
    }

    fn need_baud_change(&self) -> bool {
        self.chipset
            .as_deref()
            .map(|c| c.supports_baudrate_command())
            .unwrap_or(false)
            && self.transport.supports_baudrate()
            && self.config.baudrate_main != 0
    }

    fn need_addr_change(&self) -> bool {
        self.custom_bd_addr.is_some()
            && self
                .chipset
                .as_deref()
                .map(|c| c.supports_bd_addr_command())
                .unwrap_or(false)
    }

    fn set_local_baudrate(&mut self, baudrate: u32) {
        info!("[init] local baud rate {}", baudrate);
        if let Err(e) = self.transport.set_baudrate(baudrate) {
            warn!("[init] transport baud rate change failed: {:?}", e);
        }
    }

    fn init_wait(&mut self, step: InitStep) {
        self.substate = Substate::Init(step, InitPhase::W4);
    }

    fn init_goto(&mut self, step: InitStep) {
        if step == InitStep::Done {
            self.init_done();
        } else {
            self.substate = Substate::Init(step, InitPhase::Send);
        }
    }

    fn init_send(&mut self, step: InitStep, cmd: &Command<'_>) {
        self.init_wait(step);
        if let Err(e) = self.send_cmd(cmd) {
            error!("[init] sending {:04x} failed: {:?}", cmd.opcode(), e);
        }
    }

    /// Sends the vendor command a chipset driver wrote into the buffer as a regular command.
    fn init_send_chipset_command(&mut self, step: InitStep) {
        self.last_cmd_opcode = le16(&self.buffer, 0);
        self.init_wait(step);
        if self.reserve_packet_buffer().is_err() {
            return;
        }
        let len = 3 + self.buffer[2] as usize;
        if let Err(e) = self.send_cmd_packet(len) {
            error!("[init] sending chipset command failed: {:?}", e);
        }
    }

    fn init_done(&mut self) {
        info!("[init] done");
        self.substate = Substate::None;
        self.state = HciState::Working;
        self.emit_state();
        self.run();
    }

    /// Sends the command of the current step. Only called while a command can be sent.
    pub(crate) fn init_run(&mut self) {
        let Substate::Init(step, InitPhase::Send) = self.substate else {
            return;
        };
        debug!("[init] {:?}", step);
        match step {
            InitStep::Reset => {
                self.state_reset();
                self.set_timer(TimerId::Init, RESET_RESEND_TIMEOUT_MS);
                self.init_send(InitStep::Reset, &Command::Reset);
            }
            InitStep::ReadLocalVersionInformation => {
                self.init_send(step, &Command::ReadLocalVersionInformation);
            }
            InitStep::ReadLocalName => {
                self.init_send(step, &Command::ReadLocalName);
            }
            InitStep::SendResetCsrWarmBoot => {
                self.state_reset();
                self.set_timer(TimerId::Init, RESET_RESEND_TIMEOUT_MS);
                self.init_send(step, &Command::Reset);
            }
            InitStep::SendResetStWarmBoot => {
                self.state_reset();
                self.init_send(step, &Command::Reset);
            }
            InitStep::SendBaudChange | InitStep::SendBaudChangeBcm => {
                let baudrate = self.main_baudrate();
                if let Some(chipset) = self.chipset.as_deref() {
                    chipset.set_baudrate_command(baudrate, &mut self.buffer);
                }
                info!("[init] controller baud rate {}", baudrate);
                self.init_send_chipset_command(step);
                if step == InitStep::SendBaudChange && self.quirks().baud_change_unannounced {
                    self.set_timer(TimerId::Init, RESET_RESEND_TIMEOUT_MS);
                }
            }
            InitStep::CustomInit => self.init_custom(),
            InitStep::SetBdAddr => {
                if let (Some(chipset), Some(addr)) = (self.chipset.as_deref(), self.custom_bd_addr) {
                    info!("[init] public address {:?}", addr);
                    chipset.set_bd_addr_command(&addr, &mut self.buffer);
                }
                self.init_send_chipset_command(step);
            }
            InitStep::ReadLocalSupportedCommands => {
                self.init_send(step, &Command::ReadLocalSupportedCommands);
            }
            InitStep::ReadBdAddr => self.init_send(step, &Command::ReadBdAddr),
            InitStep::ReadBufferSize => self.init_send(step, &Command::ReadBufferSize),
            InitStep::ReadLocalSupportedFeatures => {
                self.init_send(step, &Command::ReadLocalSupportedFeatures);
            }
            InitStep::SetEventMask => {
                let high = if self.le_supported() {
                    EVENT_MASK_HIGH_LE
                } else {
                    EVENT_MASK_HIGH
                };
                self.init_send(
                    step,
                    &Command::SetEventMask {
                        low: EVENT_MASK_LOW,
                        high,
                    },
                );
            }
            InitStep::WriteSimplePairingMode => {
                let enable = self.ssp_enable as u8;
                self.init_send(step, &Command::WriteSimplePairingMode { enable });
            }
            InitStep::WritePageTimeout => {
                self.init_send(step, &Command::WritePageTimeout { timeout: PAGE_TIMEOUT });
            }
            InitStep::WriteDefaultLinkPolicySetting => {
                let settings = self.default_link_policy_settings;
                self.init_send(step, &Command::WriteDefaultLinkPolicySetting { settings });
            }
            InitStep::WriteClassOfDevice => {
                let class_of_device = self.class_of_device;
                self.init_send(step, &Command::WriteClassOfDevice { class_of_device });
            }
            InitStep::WriteLocalName => {
                let mut name = [0u8; LOCAL_NAME_LEN];
                let len = self.local_name.len().min(LOCAL_NAME_LEN);
                name[..len].copy_from_slice(&self.local_name.as_bytes()[..len]);
                replace_bd_addr_placeholder(&mut name[..len], &self.local_bd_addr);
                self.init_send(step, &Command::WriteLocalName { name: &name });
            }
            InitStep::WriteEirData => {
                let mut eir = [0u8; EIR_DATA_LEN];
                self.build_eir_data(&mut eir);
                self.init_send(
                    step,
                    &Command::WriteExtendedInquiryResponse {
                        fec_required: 0,
                        data: &eir,
                    },
                );
            }
            InitStep::WriteInquiryMode => {
                let mode = self.inquiry_mode;
                self.init_send(step, &Command::WriteInquiryMode { mode });
            }
            InitStep::WriteSecureConnectionsHostEnable => {
                self.init_send(step, &Command::WriteSecureConnectionsHostSupport { enable: 1 });
            }
            InitStep::WriteScanEnable => {
                let scan_enable = ((self.connectable as u8) << 1) | self.discoverable as u8;
                self.init_send(step, &Command::WriteScanEnable { scan_enable });
            }
            InitStep::WriteSynchronousFlowControlEnable => {
                self.init_send(step, &Command::WriteSynchronousFlowControlEnable { enable: 1 });
            }
            InitStep::WriteDefaultErroneousDataReporting => {
                self.init_send(step, &Command::WriteDefaultErroneousDataReporting { enable: 1 });
            }
            InitStep::BcmWriteScoPcmInt => {
                info!("[init] routing SCO over HCI");
                let cmd = Command::BcmWriteScoPcmInt {
                    sco_routing: 1,
                    pcm_interface_rate: 0,
                    frame_type: 0,
                    sync_mode: 0,
                    clock_mode: 0,
                };
                self.init_send(step, &cmd);
            }
            InitStep::LeReadBufferSize => self.init_send(step, &Command::LeReadBufferSize),
            InitStep::WriteLeHostSupported => {
                self.init_send(
                    step,
                    &Command::WriteLeHostSupported {
                        le_supported: 1,
                        simultaneous: 0,
                    },
                );
            }
            InitStep::LeSetEventMask => {
                self.init_send(
                    step,
                    &Command::LeSetEventMask {
                        low: LE_EVENT_MASK,
                        high: 0,
                    },
                );
            }
            InitStep::LeReadWhiteListSize => self.init_send(step, &Command::LeReadWhiteListSize),
            InitStep::LeSetScanParameters => {
                let cmd = Command::LeSetScanParameters {
                    scan_type: 1,
                    interval: self.le_scan_interval,
                    window: self.le_scan_window,
                    own_address_type: self.le_own_addr_type,
                    filter_policy: 0,
                };
                self.init_send(step, &cmd);
            }
            // only reached through timers or completions
            InitStep::CsrWarmBootLinkReset | InitStep::BcmDelay => {}
            InitStep::Done => self.init_done(),
        }
    }

    fn init_custom(&mut self) {
        let result = match self.chipset.as_deref_mut() {
            Some(chipset) => chipset.next_command(&mut self.buffer),
            None => ChipsetResult::NoInitScript,
        };
        self.chipset_result = result;
        match result {
            ChipsetResult::ValidCommand => {
                self.init_wait(InitStep::CustomInit);
                self.send_raw_command();
                return;
            }
            ChipsetResult::WarmstartRequired => {
                info!("[init] warm start");
                self.send_raw_command();
                self.set_timer(TimerId::Init, RESET_RESEND_TIMEOUT_MS);
                if self.quirks().csr_warm_boot && self.transport.supports_baudrate() && self.config.baudrate_main != 0 {
                    self.init_wait(InitStep::SendBaudChange);
                } else {
                    self.init_wait(InitStep::CsrWarmBootLinkReset);
                }
                return;
            }
            ChipsetResult::Done | ChipsetResult::NoInitScript => {}
        }

        debug!("[init] init script done");
        if result != ChipsetResult::NoInitScript && self.quirks().bcm_post_script {
            if self.need_baud_change() {
                let baudrate = self.config.baudrate_init;
                self.set_local_baudrate(baudrate);
            }
            self.init_wait(InitStep::BcmDelay);
            self.set_timer(TimerId::Init, BCM_DELAY_MS);
            return;
        }
        self.init_send(InitStep::ReadLocalSupportedCommands, &Command::ReadLocalSupportedCommands);
    }

    /// Copies the configured EIR items, or a complete local name item when none are set.
    fn build_eir_data(&self, eir: &mut [u8; EIR_DATA_LEN]) {
        let addr = self.local_bd_addr;
        let Some(data) = self.eir_data else {
            let name = self.local_name.as_bytes();
            let len = name.len().min(EIR_DATA_LEN - 2);
            eir[0] = len as u8 + 1;
            eir[1] = DATA_TYPE_COMPLETE_LOCAL_NAME;
            eir[2..2 + len].copy_from_slice(&name[..len]);
            replace_bd_addr_placeholder(&mut eir[2..2 + len], &addr);
            return;
        };

        let data = &data[..data.len().min(EIR_DATA_LEN)];
        let mut pos = 0;
        while pos < data.len() {
            let len = data[pos] as usize;
            if len == 0 || pos + 1 + len > data.len() {
                break;
            }
            let item = &mut eir[pos..pos + 1 + len];
            item.copy_from_slice(&data[pos..pos + 1 + len]);
            if matches!(item[1], DATA_TYPE_SHORTENED_LOCAL_NAME | DATA_TYPE_COMPLETE_LOCAL_NAME) {
                replace_bd_addr_placeholder(&mut item[2..], &addr);
            }
            pos += 1 + len;
        }
    }

    /// Advances init on the completion of the command sent for the current step.
    pub(crate) fn init_handle_event(&mut self, packet: &[u8]) {
        let Substate::Init(mut step, mut phase) = self.substate else {
            return;
        };
        let code = byte(packet, 0);
        let is_cc = |opcode: u16| code == EVENT_COMMAND_COMPLETE && le16(packet, 3) == opcode;

        let mut completed = false;
        if is_cc(self.last_cmd_opcode) {
            completed = true;
        }
        if code == EVENT_COMMAND_STATUS && le16(packet, 4) == self.last_cmd_opcode && byte(packet, 2) != 0 {
            completed = true;
        }
        if code == EVENT_VENDOR_SPECIFIC && phase == InitPhase::W4 {
            match step {
                InitStep::CustomInit => completed = true,
                InitStep::SendBaudChange => {
                    // some chipsets announce the new rate with a vendor event instead of a command complete
                    self.num_cmd_packets = 1;
                    completed = true;
                }
                _ => {}
            }
        }

        if !completed {
            // a Reset answered late, after its timer already resent it
            if is_cc(opcodes::RESET) && phase == InitPhase::W4 {
                match step {
                    InitStep::ReadLocalVersionInformation | InitStep::ReadLocalSupportedCommands => {
                        debug!("[init] late reset complete, resending {:?}", step);
                        self.substate = Substate::Init(step, InitPhase::Send);
                    }
                    _ => {}
                }
            }
            return;
        }

        if phase == InitPhase::Send && matches!(step, InitStep::Reset | InitStep::SendResetCsrWarmBoot) {
            phase = InitPhase::W4;
        }
        if phase != InitPhase::W4 {
            return;
        }
        if step == InitStep::CsrWarmBootLinkReset {
            step = InitStep::SendResetCsrWarmBoot;
        }
        self.init_step_complete(step);
    }

    fn init_step_complete(&mut self, step: InitStep) {
        let quirks = self.quirks();
        let next = match step {
            InitStep::Reset => {
                self.run_loop.remove_timer(TimerId::Init);
                step.next()
            }
            InitStep::ReadLocalName => {
                if self.need_baud_change() {
                    InitStep::SendBaudChange
                } else {
                    InitStep::CustomInit
                }
            }
            InitStep::SendBaudChange => {
                if !quirks.baud_change_unannounced && self.need_baud_change() {
                    let baudrate = self.main_baudrate();
                    self.set_local_baudrate(baudrate);
                }
                InitStep::CustomInit
            }
            InitStep::SendResetCsrWarmBoot => {
                self.run_loop.remove_timer(TimerId::Init);
                InitStep::CustomInit
            }
            InitStep::CustomInit => InitStep::CustomInit,
            InitStep::ReadLocalSupportedCommands => {
                if self.need_baud_change()
                    && self.chipset_result != ChipsetResult::NoInitScript
                    && quirks.bcm_post_script
                {
                    InitStep::SendBaudChangeBcm
                } else if self.need_addr_change() {
                    InitStep::SetBdAddr
                } else {
                    InitStep::ReadBdAddr
                }
            }
            InitStep::SendBaudChangeBcm => {
                if self.need_baud_change() {
                    let baudrate = self.main_baudrate();
                    self.set_local_baudrate(baudrate);
                }
                if self.need_addr_change() {
                    InitStep::SetBdAddr
                } else {
                    InitStep::ReadBdAddr
                }
            }
            InitStep::SetBdAddr => {
                if quirks.reset_after_bd_addr {
                    InitStep::SendResetStWarmBoot
                } else {
                    InitStep::ReadBdAddr
                }
            }
            InitStep::SendResetStWarmBoot => InitStep::ReadBdAddr,
            InitStep::ReadBdAddr => {
                if self.local_supported_commands[0] & 0x01 != 0 {
                    InitStep::ReadBufferSize
                } else {
                    InitStep::ReadLocalSupportedFeatures
                }
            }
            InitStep::SetEventMask => {
                if !self.classic_supported() {
                    if self.le_supported() {
                        InitStep::LeReadBufferSize
                    } else {
                        error!("[init] controller supports neither BR/EDR nor LE");
                        InitStep::Done
                    }
                } else if !self.ssp_supported() {
                    InitStep::WritePageTimeout
                } else {
                    step.next()
                }
            }
            InitStep::WriteInquiryMode => {
                if !self.secure_connections_enable || self.local_supported_commands[1] & 0x02 == 0 {
                    InitStep::WriteScanEnable
                } else {
                    step.next()
                }
            }
            InitStep::WriteScanEnable
            | InitStep::WriteSynchronousFlowControlEnable
            | InitStep::WriteDefaultErroneousDataReporting
            | InitStep::BcmWriteScoPcmInt => self.next_sco_step(step),
            InitStep::LeReadBufferSize => {
                if self.local_supported_commands[0] & 0x02 != 0 {
                    step.next()
                } else {
                    InitStep::LeSetEventMask
                }
            }
            InitStep::LeSetScanParameters => InitStep::Done,
            _ => step.next(),
        };
        trace!("[init] {:?} complete, next {:?}", step, next);
        self.init_goto(next);
    }

    /// Steps between scan enable and LE init, skipping those the controller lacks.
    fn next_sco_step(&self, mut step: InitStep) -> InitStep {
        loop {
            step = step.next();
            let skip = match step {
                InitStep::WriteSynchronousFlowControlEnable => self.local_supported_commands[0] & 0x04 == 0,
                InitStep::WriteDefaultErroneousDataReporting => self.local_supported_commands[0] & 0x08 == 0,
                InitStep::BcmWriteScoPcmInt => self.manufacturer != manufacturer::BROADCOM,
                InitStep::LeReadBufferSize if !self.le_supported() => return InitStep::Done,
                _ => false,
            };
            if !skip {
                return step;
            }
        }
    }

    pub(crate) fn init_timeout(&mut self) {
        let Substate::Init(step, InitPhase::W4) = self.substate else {
            return;
        };
        match step {
            InitStep::Reset => {
                warn!("[init] reset timeout, resending");
                self.substate = Substate::Init(InitStep::Reset, InitPhase::Send);
                self.num_cmd_packets = 1;
                self.run();
            }
            InitStep::CsrWarmBootLinkReset | InitStep::SendResetCsrWarmBoot => {
                if step == InitStep::CsrWarmBootLinkReset {
                    self.transport.reset_link();
                }
                debug!("[init] resending warm boot reset");
                self.substate = Substate::Init(InitStep::SendResetCsrWarmBoot, InitPhase::Send);
                self.num_cmd_packets = 1;
                self.run();
            }
            InitStep::SendBaudChange => {
                let baudrate = self.main_baudrate();
                self.set_local_baudrate(baudrate);
                if self.quirks().csr_warm_boot {
                    // the reset goes out at the new rate
                    self.transport.reset_link();
                    self.substate = Substate::Init(InitStep::SendResetCsrWarmBoot, InitPhase::Send);
                    self.run();
                }
            }
            InitStep::BcmDelay => {
                self.init_send(InitStep::ReadLocalSupportedCommands, &Command::ReadLocalSupportedCommands);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_linear() {
        assert_eq!(InitStep::Reset.next(), InitStep::ReadLocalVersionInformation);
        assert_eq!(InitStep::WriteScanEnable.next(), InitStep::WriteSynchronousFlowControlEnable);
        assert_eq!(InitStep::BcmWriteScoPcmInt.next(), InitStep::LeReadBufferSize);
        assert_eq!(InitStep::LeSetScanParameters.next(), InitStep::Done);
        assert_eq!(InitStep::Done.next(), InitStep::Done);
    }

    #[test]
    fn cypress_is_handled_as_broadcom() {
        assert_eq!(quirks(manufacturer::CYPRESS), quirks(manufacturer::BROADCOM));
        assert_eq!(quirks(manufacturer::BROADCOM).max_baudrate, Some(3_000_000));
        assert!(quirks(manufacturer::ATMEL).reset_after_bd_addr);
        assert_eq!(quirks(0x0002), Quirks::default());
    }
}
