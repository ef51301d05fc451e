//! Vendor specific controller setup.
use bt_hci::param::BdAddr;

use crate::transport::TransportConfig;

/// Outcome of asking a chipset driver for its next init command.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipsetResult {
    /// A complete command, header included, was written to the buffer.
    ValidCommand,
    /// As `ValidCommand`, and the controller reboots after it (CSR warm boot).
    WarmstartRequired,
    /// The init script has been sent completely.
    Done,
    /// The driver has no init script at all.
    NoInitScript,
}

/// Writes vendor commands into the outgoing buffer on request.
///
/// Commands are written with their 3 byte header; the parameter length is taken from byte 2.
pub trait Chipset {
    fn name(&self) -> &str;

    /// Rewinds the init script. Called on every power on.
    fn init(&mut self, config: &TransportConfig) {
        let _ = config;
    }

    fn next_command(&mut self, buf: &mut [u8]) -> ChipsetResult {
        let _ = buf;
        ChipsetResult::NoInitScript
    }

    fn supports_baudrate_command(&self) -> bool {
        false
    }

    fn set_baudrate_command(&self, baudrate: u32, buf: &mut [u8]) {
        let _ = (baudrate, buf);
    }

    fn supports_bd_addr_command(&self) -> bool {
        false
    }

    fn set_bd_addr_command(&self, addr: &BdAddr, buf: &mut [u8]) {
        let _ = (addr, buf);
    }
}

/// Replays a fixed list of pre-encoded commands as the init script.
pub struct ScriptChipset<'a> {
    name: &'a str,
    script: &'a [&'a [u8]],
    pos: usize,
    warmstart_after: Option<usize>,
}

impl<'a> ScriptChipset<'a> {
    pub fn new(name: &'a str, script: &'a [&'a [u8]]) -> Self {
        Self {
            name,
            script,
            pos: 0,
            warmstart_after: None,
        }
    }

    /// Reports the command at `index` as requiring a warm start.
    pub fn with_warmstart(mut self, index: usize) -> Self {
        self.warmstart_after.replace(index);
        self
    }
}

impl<'a> Chipset for ScriptChipset<'a> {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&mut self, _config: &TransportConfig) {
        self.pos = 0;
    }

    fn next_command(&mut self, buf: &mut [u8]) -> ChipsetResult {
        if self.script.is_empty() {
            return ChipsetResult::NoInitScript;
        }
        let Some(cmd) = self.script.get(self.pos) else {
            return ChipsetResult::Done;
        };
        if cmd.len() < 3 || cmd.len() > buf.len() {
            error!("[chipset] {} skipping malformed command {}", self.name, self.pos);
            self.pos += 1;
            return self.next_command(buf);
        }
        buf[..cmd.len()].copy_from_slice(cmd);
        let index = self.pos;
        self.pos += 1;
        if self.warmstart_after == Some(index) {
            ChipsetResult::WarmstartRequired
        } else {
            ChipsetResult::ValidCommand
        }
    }
}
