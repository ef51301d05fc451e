//! The command scheduler.
//!
//! [`Hci::run`] sends at most one command per call, picked by priority from everything that is
//! waiting. It runs after every event, timeout and API call, so work queued while no command
//! could be sent goes out as soon as the controller returns a credit.
use bt_hci::param::BdAddr;

use crate::command::{Command, ConnParams, ADV_DATA_LEN};
use crate::connection::{AddressType, BondingFlags, ConnectionState, PendingAction, Role};
use crate::event::status;
use crate::gap::{adv_todo, replace_bd_addr_placeholder, InquiryState, IoCapability, LeConnectingState, PairingResponse, RemoteNameState, GIAC};
use crate::hci::Hci;
use crate::link_key::LinkKey;
use crate::power::{FallingAsleepStep, HaltingStep, HciState, Substate};
use crate::run_loop::{RunLoop, TimerId};
use crate::transport::Transport;

/// Time given to the controller to send out the disconnects before closing.
const HALTING_SETTLE_MS: u64 = 50;

/// Authentication requirement for dedicated bonding without MITM protection.
const AUTHREQ_DEDICATED_BONDING: u8 = 0x02;

impl<'d, T: Transport, R: RunLoop> Hci<'d, T, R> {
    /// Makes progress on whatever is waiting, sending at most one command.
    pub fn run(&mut self) {
        if self.run_acl_fragments() {
            return;
        }
        if !self.can_send_command_packet_now() {
            return;
        }
        if self.run_gap_classic() {
            return;
        }
        if self.run_gap_le() {
            return;
        }
        if self.run_pending_commands() {
            return;
        }
        self.run_state();
    }

    /// Sends a scheduled command, reporting it as progress even when the transport refused it.
    fn schedule(&mut self, cmd: &Command<'_>) -> bool {
        if let Err(e) = self.send_cmd(cmd) {
            warn!("[hci] scheduled command {:04x} failed: {:?}", cmd.opcode(), e);
        }
        true
    }

    fn run_gap_classic(&mut self) -> bool {
        if let Some((addr, reason)) = self.decline.take() {
            return self.schedule(&Command::RejectConnectionRequest { addr, reason });
        }

        if self.state == HciState::Working && self.new_scan_enable_value != 0xff && self.classic_supported() {
            let scan_enable = self.new_scan_enable_value;
            self.new_scan_enable_value = 0xff;
            return self.schedule(&Command::WriteScanEnable { scan_enable });
        }

        match self.inquiry_state {
            InquiryState::Requested(duration) => {
                self.inquiry_state = InquiryState::Active;
                return self.schedule(&Command::Inquiry {
                    lap: GIAC,
                    duration,
                    num_responses: 0,
                });
            }
            InquiryState::W2Cancel => {
                self.inquiry_state = InquiryState::W4Cancelled;
                return self.schedule(&Command::InquiryCancel);
            }
            _ => {}
        }

        if self.remote_name.state == RemoteNameState::W2Send {
            self.remote_name.state = RemoteNameState::W4Complete;
            let req = self.remote_name;
            return self.schedule(&Command::RemoteNameRequest {
                addr: req.addr,
                page_scan_repetition_mode: req.page_scan_repetition_mode,
                clock_offset: req.clock_offset,
            });
        }

        if let Some((addr, response)) = self.pairing.take() {
            let cmd = match &response {
                PairingResponse::Pin(pin) => Command::PinCodeRequestReply { addr, pin: pin.as_slice() },
                PairingResponse::PinNegative => Command::PinCodeRequestNegativeReply { addr },
                PairingResponse::Passkey(passkey) => Command::UserPasskeyRequestReply { addr, passkey: *passkey },
                PairingResponse::PasskeyNegative => Command::UserPasskeyRequestNegativeReply { addr },
                PairingResponse::Confirmation => Command::UserConfirmationRequestReply { addr },
                PairingResponse::ConfirmationNegative => Command::UserConfirmationRequestNegativeReply { addr },
            };
            return self.schedule(&cmd);
        }

        false
    }

    fn run_gap_le(&mut self) -> bool {
        if self.state != HciState::Working {
            return false;
        }
        // random own address types need the address first
        if self.le_own_addr_type != 0 && !self.le_random_address_set {
            return false;
        }

        // parameters can only change while not scanning
        if self.le_scan_type != 0xff {
            if self.le_scanning_active {
                self.le_scanning_active = false;
                return self.schedule(&Command::LeSetScanEnable {
                    enable: 0,
                    filter_duplicates: 0,
                });
            }
            let scan_type = self.le_scan_type;
            self.le_scan_type = 0xff;
            return self.schedule(&Command::LeSetScanParameters {
                scan_type,
                interval: self.le_scan_interval,
                window: self.le_scan_window,
                own_address_type: self.le_own_addr_type,
                filter_policy: 0,
            });
        }
        if self.le_scanning_enabled != self.le_scanning_active {
            self.le_scanning_active = self.le_scanning_enabled;
            return self.schedule(&Command::LeSetScanEnable {
                enable: self.le_scanning_enabled as u8,
                filter_duplicates: 0,
            });
        }

        if self.run_advertising() {
            return true;
        }

        if self.le_whitelist.modification_pending() {
            if self.le_connecting_state != LeConnectingState::Idle {
                return self.schedule(&Command::LeCreateConnectionCancel);
            }
            if let Some((entry, add)) = self.le_whitelist.next_modification() {
                let address_type = entry.address_type as u8;
                let addr = entry.address;
                let cmd = if add {
                    Command::LeAddDeviceToWhiteList { address_type, addr }
                } else {
                    Command::LeRemoveDeviceFromWhiteList { address_type, addr }
                };
                return self.schedule(&cmd);
            }
        }

        if self.le_connecting_state == LeConnectingState::Idle && !self.le_whitelist.is_empty() {
            let cmd = self.le_create_connection(true, 0, BdAddr::new([0; 6]));
            return self.schedule(&cmd);
        }

        false
    }

    fn run_advertising(&mut self) -> bool {
        let todo = self.le_advertising.todo;
        if todo != 0 {
            debug!("[hci] advertising todo {:02x}", todo);
        }
        if todo & adv_todo::DISABLE != 0 {
            self.le_advertising.todo &= !adv_todo::DISABLE;
            return self.schedule(&Command::LeSetAdvertiseEnable { enable: 0 });
        }
        if todo & adv_todo::SET_PARAMS != 0 {
            self.le_advertising.todo &= !adv_todo::SET_PARAMS;
            let mut params = self.le_advertising.params;
            params.own_address_type = self.le_own_addr_type;
            return self.schedule(&Command::LeSetAdvertisingParameters(&params));
        }
        if todo & (adv_todo::SET_ADV_DATA | adv_todo::SET_SCAN_DATA) != 0 {
            let scan_response = todo & adv_todo::SET_ADV_DATA == 0;
            let source = if scan_response {
                self.le_advertising.todo &= !adv_todo::SET_SCAN_DATA;
                &self.le_advertising.scan_response
            } else {
                self.le_advertising.todo &= !adv_todo::SET_ADV_DATA;
                &self.le_advertising.data
            };
            let mut data = [0u8; ADV_DATA_LEN];
            let len = source.len();
            data[..len].copy_from_slice(source);
            replace_bd_addr_placeholder(&mut data[..len], &self.local_bd_addr);
            let data = &data[..len];
            let cmd = if scan_response {
                Command::LeSetScanResponseData { data }
            } else {
                Command::LeSetAdvertisingData { data }
            };
            return self.schedule(&cmd);
        }
        if todo & adv_todo::ENABLE != 0 {
            self.le_advertising.todo &= !adv_todo::ENABLE;
            return self.schedule(&Command::LeSetAdvertiseEnable { enable: 1 });
        }
        false
    }

    fn le_create_connection(&self, whitelist: bool, peer_address_type: u8, peer_address: BdAddr) -> Command<'static> {
        Command::LeCreateConnection {
            scan_interval: self.le_connection_scan_interval,
            scan_window: self.le_connection_scan_window,
            initiator_filter_policy: whitelist as u8,
            peer_address_type,
            peer_address,
            own_address_type: self.le_own_addr_type,
            params: self.le_conn_params,
        }
    }

    fn run_pending_commands(&mut self) -> bool {
        for idx in 0..self.connections.len() {
            if self.run_connection(idx) {
                return true;
            }
        }
        false
    }

    /// Sends the next command for the connection at `idx`, if it has one.
    fn run_connection(&mut self, idx: usize) -> bool {
        let packet_types = self.packet_types;
        let allow_role_switch = self.allow_role_switch as u8;
        let master_slave_policy = self.master_slave_policy;
        let Some(conn) = self.connections.get_mut(idx) else {
            return false;
        };
        let handle = conn.handle;
        let addr = conn.address;

        match conn.state {
            ConnectionState::SendCreateConnection => {
                if conn.address_type == AddressType::Acl {
                    info!("[hci] create connection to {:?}", addr);
                    return self.schedule(&Command::CreateConnection {
                        addr,
                        packet_types,
                        page_scan_repetition_mode: 0,
                        clock_offset: 0,
                        allow_role_switch,
                    });
                }
                info!("[hci] LE create connection to {:?}", addr);
                conn.state = ConnectionState::SentCreateConnection;
                let address_type = conn.address_type;
                let cmd = self.le_create_connection(false, address_type as u8, addr);
                return self.schedule(&cmd);
            }
            ConnectionState::ReceivedConnectionRequest => {
                conn.role = Role::Slave;
                if conn.address_type == AddressType::Acl {
                    conn.state = ConnectionState::AcceptedConnectionRequest;
                    debug!("[hci] accepting connection from {:?}, remote eSCO {}", addr, conn.remote_esco);
                    return self.schedule(&Command::AcceptConnectionRequest {
                        addr,
                        role: master_slave_policy,
                    });
                }
                // synchronous connections are accepted by upper layers
                return false;
            }
            ConnectionState::SendCancelConnection => {
                conn.state = ConnectionState::SentCancelConnection;
                return self.schedule(&Command::LeCreateConnectionCancel);
            }
            ConnectionState::SendDisconnect => {
                conn.state = ConnectionState::SentDisconnect;
                return self.schedule(&Command::Disconnect {
                    handle,
                    reason: status::REMOTE_USER_TERMINATED_CONNECTION,
                });
            }
            ConnectionState::SentDisconnect => return false,
            _ => {}
        }

        let Some(action) = conn.pending.take_next() else {
            return false;
        };
        trace!("[hci] pending {:?} for handle {:04x}", action, handle);
        match action {
            PendingAction::ReadRssi => self.schedule(&Command::ReadRssi { handle }),
            PendingAction::WriteSupervisionTimeout => {
                let timeout = self.link_supervision_timeout;
                self.schedule(&Command::WriteLinkSupervisionTimeout { handle, timeout })
            }
            PendingAction::LinkKeyRequest => {
                let requested = conn.requested_security_level;
                let stored: Option<(LinkKey, _)> = self
                    .link_key_db
                    .as_deref()
                    .and_then(|db| db.get_link_key(&addr))
                    .filter(|(_, key_type)| key_type.security_level() >= requested);
                match stored {
                    Some((link_key, key_type)) => {
                        conn.link_key_type = key_type;
                        debug!("[hci] link key reply for {:?}", addr);
                        self.schedule(&Command::LinkKeyRequestReply {
                            addr,
                            link_key: &link_key,
                        })
                    }
                    None => self.schedule(&Command::LinkKeyRequestNegativeReply { addr }),
                }
            }
            PendingAction::DenyPinCodeRequest => self.schedule(&Command::PinCodeRequestNegativeReply { addr }),
            PendingAction::IoCapabilityReply => {
                let io_capability = self.ssp_io_capability;
                if self.bondable && io_capability != IoCapability::Unknown {
                    let mut authentication_requirements = self.ssp_authentication_requirement;
                    if conn.bonding.contains(BondingFlags::DEDICATED) {
                        authentication_requirements = AUTHREQ_DEDICATED_BONDING;
                    }
                    if conn.requested_security_level.mitm_protection_required() {
                        authentication_requirements |= 1;
                    }
                    self.schedule(&Command::IoCapabilityRequestReply {
                        addr,
                        io_capability: io_capability as u8,
                        oob_data_present: 0,
                        authentication_requirements,
                    })
                } else {
                    self.schedule(&Command::IoCapabilityRequestNegativeReply {
                        addr,
                        reason: status::PAIRING_NOT_ALLOWED,
                    })
                }
            }
            PendingAction::UserConfirmReply => self.schedule(&Command::UserConfirmationRequestReply { addr }),
            PendingAction::UserPasskeyReply => self.schedule(&Command::UserPasskeyRequestReply { addr, passkey: 0 }),
            PendingAction::RequestRemoteFeatures => self.schedule(&Command::ReadRemoteSupportedFeatures { handle }),
            PendingAction::DisconnectDedicatedBondingDone => {
                conn.bonding.insert(BondingFlags::EMIT_COMPLETE_ON_DISCONNECT);
                self.schedule(&Command::Disconnect {
                    handle,
                    reason: status::REMOTE_USER_TERMINATED_CONNECTION,
                })
            }
            PendingAction::AuthenticationRequest => self.schedule(&Command::AuthenticationRequested { handle }),
            PendingAction::EncryptionRequest => self.schedule(&Command::SetConnectionEncryption { handle, enable: 1 }),
            PendingAction::ReadEncryptionKeySize => self.schedule(&Command::ReadEncryptionKeySize { handle }),
            PendingAction::DisconnectSecurityBlock => self.schedule(&Command::Disconnect {
                handle,
                reason: status::AUTHENTICATION_FAILURE,
            }),
            PendingAction::SniffEnter {
                min_interval,
                max_interval,
                attempt,
                timeout,
            } => self.schedule(&Command::SniffMode {
                handle,
                max_interval,
                min_interval,
                attempt,
                timeout,
            }),
            PendingAction::SniffExit => self.schedule(&Command::ExitSniffMode { handle }),
            PendingAction::LeConnectionUpdate => {
                let params = link_params(conn.le_params);
                self.schedule(&Command::LeConnectionUpdate { handle, params })
            }
            PendingAction::LeRemoteParamReply => {
                let params = link_params(conn.le_params);
                self.schedule(&Command::LeRemoteConnectionParameterRequestReply { handle, params })
            }
            PendingAction::LeRemoteParamNegativeReply => {
                self.schedule(&Command::LeRemoteConnectionParameterRequestNegativeReply {
                    handle,
                    reason: status::UNACCEPTABLE_CONNECTION_PARAMETERS,
                })
            }
            PendingAction::LeSetPhy {
                all_phys,
                tx_phys,
                rx_phys,
                phy_options,
            } => self.schedule(&Command::LeSetPhy {
                handle,
                all_phys,
                tx_phys,
                rx_phys,
                phy_options,
            }),
        }
    }

    fn run_state(&mut self) {
        match (self.state, self.substate) {
            (HciState::Initializing, _) => self.init_run(),
            (HciState::Halting, Substate::Halting(step)) => self.run_halting(step),
            (HciState::FallingAsleep, Substate::FallingAsleep(step)) => self.run_falling_asleep(step),
            _ => {}
        }
    }

    fn run_halting(&mut self, step: HaltingStep) {
        match step {
            HaltingStep::DisconnectAllNoTimer | HaltingStep::DisconnectAllTimer => {
                self.le_whitelist.clear();
                if let Some(conn) = self.connections.first() {
                    if conn.state == ConnectionState::SentDisconnect {
                        return;
                    }
                    let handle = conn.handle;
                    info!("[hci] halting, disconnecting handle {:04x}", handle);
                    // upper layers close their channels right away
                    self.emit_disconnection_complete(handle, status::CONNECTION_TERMINATED_BY_LOCAL_HOST);
                    self.shutdown_connection(0);
                    self.schedule(&Command::Disconnect {
                        handle,
                        reason: status::REMOTE_USER_TERMINATED_CONNECTION,
                    });
                    return;
                }
                if step == HaltingStep::DisconnectAllTimer {
                    debug!("[hci] halting, waiting {} ms", HALTING_SETTLE_MS);
                    self.substate = Substate::Halting(HaltingStep::W4Timer);
                    self.set_timer(TimerId::Halting, HALTING_SETTLE_MS);
                    return;
                }
                self.halting_close();
            }
            HaltingStep::Close => self.halting_close(),
            HaltingStep::W4Timer => {}
        }
    }

    fn halting_close(&mut self) {
        self.control_off();
        self.emit_state();
    }

    fn run_falling_asleep(&mut self, step: FallingAsleepStep) {
        match step {
            FallingAsleepStep::Disconnect => {
                if let Some(conn) = self.connections.first() {
                    let handle = conn.handle;
                    info!("[hci] falling asleep, disconnecting handle {:04x}", handle);
                    self.schedule(&Command::Disconnect {
                        handle,
                        reason: status::REMOTE_USER_TERMINATED_CONNECTION,
                    });
                    self.emit_disconnection_complete(handle, status::CONNECTION_TERMINATED_BY_LOCAL_HOST);
                    self.shutdown_connection(0);
                    return;
                }
                if self.classic_supported() {
                    // keep page scan only
                    let scan_enable = (self.connectable as u8) << 1;
                    self.substate = Substate::FallingAsleep(FallingAsleepStep::W4WriteScanEnable);
                    self.schedule(&Command::WriteScanEnable { scan_enable });
                    return;
                }
                self.falling_asleep_complete();
            }
            FallingAsleepStep::Complete => self.falling_asleep_complete(),
            FallingAsleepStep::W4WriteScanEnable => {}
        }
    }

    fn falling_asleep_complete(&mut self) {
        self.control_sleep();
        self.emit_state();
    }
}

fn link_params(params: crate::connection::LeLinkParams) -> ConnParams {
    ConnParams {
        interval_min: params.interval_min,
        interval_max: params.interval_max,
        latency: params.latency,
        supervision_timeout: params.supervision_timeout,
        min_ce_length: 0x0000,
        max_ce_length: 0xffff,
    }
}
