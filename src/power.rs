//! Power state machine.
use crate::hci::Hci;
use crate::init::{InitPhase, InitStep};
use crate::run_loop::RunLoop;
use crate::transport::Transport;
use crate::Error;

/// Lifecycle state of the stack, reported with every state event.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HciState {
    Off = 0,
    Initializing = 1,
    Working = 2,
    Halting = 3,
    Sleeping = 4,
    FallingAsleep = 5,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltingStep {
    /// Disconnect everything and close right after.
    DisconnectAllNoTimer,
    /// Disconnect everything, then give the controller time to send the disconnects.
    DisconnectAllTimer,
    W4Timer,
    Close,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallingAsleepStep {
    Disconnect,
    W4WriteScanEnable,
    Complete,
}

/// Progress within the current [`HciState`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substate {
    None,
    Init(InitStep, InitPhase),
    Halting(HaltingStep),
    FallingAsleep(FallingAsleepStep),
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    On,
    Off,
    Sleep,
}

impl<'d, T: Transport, R: RunLoop> Hci<'d, T, R> {
    /// Requests a power mode. The new state is reported with a state event.
    pub fn power_control(&mut self, mode: PowerMode) -> Result<(), Error> {
        info!("[hci] power control {:?} in state {:?}", mode, self.state);
        match (self.state, mode) {
            (HciState::Off, PowerMode::On) => {
                self.control_on()?;
                self.enter_initializing();
            }
            (HciState::Off, _) => return Ok(()),

            (HciState::Initializing, PowerMode::Off) => {
                self.control_off();
            }
            (HciState::Initializing, PowerMode::Sleep) => {
                self.control_sleep();
            }
            (HciState::Initializing, PowerMode::On) => return Ok(()),

            (HciState::Working, PowerMode::On) => return Ok(()),
            (HciState::Working, PowerMode::Off) => {
                self.state = HciState::Halting;
                self.substate = Substate::Halting(HaltingStep::DisconnectAllNoTimer);
            }
            (HciState::Working, PowerMode::Sleep) => {
                self.state = HciState::FallingAsleep;
                self.substate = Substate::FallingAsleep(FallingAsleepStep::Disconnect);
            }

            (HciState::Halting, PowerMode::On) => self.enter_initializing(),
            (HciState::Halting, PowerMode::Off) => return Ok(()),
            (HciState::Halting, PowerMode::Sleep) => {
                self.state = HciState::FallingAsleep;
                self.substate = Substate::FallingAsleep(FallingAsleepStep::Disconnect);
            }

            (HciState::FallingAsleep, PowerMode::On) => self.enter_initializing(),
            (HciState::FallingAsleep, PowerMode::Off) => self.enter_halting(),
            (HciState::FallingAsleep, PowerMode::Sleep) => return Ok(()),

            (HciState::Sleeping, PowerMode::On) => {
                self.control_wake()?;
                self.enter_initializing();
            }
            (HciState::Sleeping, PowerMode::Off) => self.enter_halting(),
            (HciState::Sleeping, PowerMode::Sleep) => return Ok(()),
        }

        self.emit_state();
        self.run();
        Ok(())
    }

    /// Keeps the stack in HALTING for a short while so queued disconnects can reach the
    /// controller. Meant to be called from a state event handler.
    pub fn halting_defer(&mut self) {
        if self.state != HciState::Halting {
            return;
        }
        if let Substate::Halting(HaltingStep::DisconnectAllNoTimer | HaltingStep::Close) = self.substate {
            debug!("[hci] halting deferred");
            self.substate = Substate::Halting(HaltingStep::DisconnectAllTimer);
        }
    }

    fn enter_initializing(&mut self) {
        self.num_cmd_packets = 1;
        self.release_packet_buffer();
        self.state = HciState::Initializing;
        self.substate = Substate::Init(InitStep::Reset, InitPhase::Send);
    }

    fn enter_halting(&mut self) {
        self.state = HciState::Halting;
        self.substate = Substate::Halting(HaltingStep::DisconnectAllNoTimer);
    }

    fn control_on(&mut self) -> Result<(), Error> {
        if let Some(control) = self.control.as_deref_mut() {
            if let Err(e) = control.on() {
                error!("[hci] controller power on failed");
                self.emit_poweron_failed();
                return Err(e);
            }
        }
        if let Some(chipset) = self.chipset.as_deref_mut() {
            chipset.init(&self.config);
        }
        let opened = self
            .transport
            .init(&self.config)
            .and_then(|_| self.transport.open());
        if let Err(e) = opened {
            error!("[hci] transport open failed: {:?}", e);
            if let Some(control) = self.control.as_deref_mut() {
                if let Err(e) = control.off() {
                    warn!("[hci] power control off failed: {:?}", e);
                }
            }
            self.emit_poweron_failed();
            return Err(Error::Transport);
        }
        Ok(())
    }

    pub(crate) fn control_off(&mut self) {
        info!("[hci] power off");
        if let Err(e) = self.transport.close() {
            warn!("[hci] transport close failed: {:?}", e);
        }
        if let Some(control) = self.control.as_deref_mut() {
            if let Err(e) = control.off() {
                warn!("[hci] power control off failed: {:?}", e);
            }
        }
        self.state = HciState::Off;
        self.substate = Substate::None;
    }

    pub(crate) fn control_sleep(&mut self) {
        info!("[hci] sleep");
        if let Some(control) = self.control.as_deref_mut() {
            if let Err(e) = control.sleep() {
                warn!("[hci] power control sleep failed: {:?}", e);
            }
        }
        self.state = HciState::Sleeping;
        self.substate = Substate::None;
    }

    fn control_wake(&mut self) -> Result<(), Error> {
        if let Some(control) = self.control.as_deref_mut() {
            control.wake()?;
        }
        Ok(())
    }
}
