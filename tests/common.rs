#![allow(dead_code)]
use std::cell::RefCell;
use std::collections::VecDeque;

use embassy_time::{Duration, Instant};
use trouble_hci::chipset::{Chipset, ChipsetResult, ScriptChipset};
use trouble_hci::control::BluetoothControl;
use trouble_hci::event::{EventHandler, PacketHandler};
use trouble_hci::run_loop::{RunLoop, TimerId};
use trouble_hci::transport::{PacketType, Transport, TransportConfig, TransportError};
use trouble_hci::{BdAddr, Error, Hci, HciState, PowerMode};

pub type TestHci<'d> = Hci<'d, MockTransport, MockClock>;

/// AA:BB:CC:DD:EE:FF
pub fn peer() -> BdAddr {
    BdAddr::new([0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa])
}

/// 01:02:03:04:05:06
pub fn local() -> BdAddr {
    BdAddr::new([0x06, 0x05, 0x04, 0x03, 0x02, 0x01])
}

/// Synchronous transport recording everything the stack sends.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Vec<(PacketType, Vec<u8>)>,
    pub inbox: VecDeque<(PacketType, Vec<u8>)>,
    pub opened: bool,
    pub baudrates: Vec<u32>,
    pub link_resets: usize,
    answered: usize,
}

impl MockTransport {
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter(|(t, _)| *t == PacketType::Command)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn opcodes(&self) -> Vec<u16> {
        self.commands().iter().map(|c| opcode(c)).collect()
    }

    pub fn acl(&self) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter(|(t, _)| *t == PacketType::Acl)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// The oldest command no reply was generated for yet.
    pub fn next_unanswered(&mut self) -> Option<Vec<u8>> {
        let commands = self.commands();
        let cmd = commands.get(self.answered)?.clone();
        self.answered += 1;
        Some(cmd)
    }

    pub fn skip_unanswered(&mut self) {
        self.answered = self.commands().len();
    }
}

impl Transport for MockTransport {
    fn init(&mut self, _config: &TransportConfig) -> Result<(), TransportError> {
        Ok(())
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.opened = false;
        Ok(())
    }

    fn poll(&mut self, _now: Instant, buf: &mut [u8]) -> Option<(PacketType, usize)> {
        let (packet_type, packet) = self.inbox.pop_front()?;
        buf[..packet.len()].copy_from_slice(&packet);
        Some((packet_type, packet.len()))
    }

    fn can_send_packet_now(&self, _packet_type: PacketType) -> bool {
        true
    }

    fn is_synchronous(&self) -> bool {
        true
    }

    fn supports_baudrate(&self) -> bool {
        true
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), TransportError> {
        self.baudrates.push(baudrate);
        Ok(())
    }

    fn reset_link(&mut self) {
        self.link_resets += 1;
    }

    fn send_packet(&mut self, packet_type: PacketType, packet: &[u8]) -> Result<(), TransportError> {
        self.sent.push((packet_type, packet.to_vec()));
        Ok(())
    }
}

/// Manually advanced clock that records armed timers.
pub struct MockClock {
    pub now: Instant,
    pub timers: Vec<(TimerId, Instant)>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            now: Instant::from_millis(1_000),
            timers: Vec::new(),
        }
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.timers.iter().any(|(t, _)| *t == id)
    }

    pub fn advance(&mut self, ms: u64) {
        self.now += Duration::from_millis(ms);
    }
}

impl RunLoop for MockClock {
    fn now(&self) -> Instant {
        self.now
    }

    fn set_timer(&mut self, id: TimerId, after: Duration) {
        self.timers.retain(|(t, _)| *t != id);
        self.timers.push((id, self.now + after));
    }

    fn remove_timer(&mut self, id: TimerId) {
        self.timers.retain(|(t, _)| *t != id);
    }
}

#[derive(Default)]
pub struct Recorder {
    pub events: RefCell<Vec<Vec<u8>>>,
}

impl Recorder {
    pub fn with_code(&self, code: u8) -> Vec<Vec<u8>> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e[0] == code)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EventHandler for Recorder {
    fn on_event(&self, event: &[u8]) {
        self.events.borrow_mut().push(event.to_vec());
    }
}

#[derive(Default)]
pub struct PacketRecorder {
    pub packets: RefCell<Vec<(PacketType, Vec<u8>)>>,
}

impl PacketHandler for PacketRecorder {
    fn on_packet(&self, packet_type: PacketType, packet: &[u8]) {
        self.packets.borrow_mut().push((packet_type, packet.to_vec()));
    }
}

pub fn stack<'d>() -> TestHci<'d> {
    stack_with(TransportConfig::default())
}

pub fn stack_with<'d>(config: TransportConfig) -> TestHci<'d> {
    let _ = env_logger::builder().is_test(true).try_init();
    Hci::new(MockTransport::default(), MockClock::new(), config)
}

pub const VENDOR_SET_BAUDRATE: u16 = 0xfc18;
pub const VENDOR_SET_BD_ADDR: u16 = 0xfc01;

/// Init script driver that can also change the baud rate and the public address.
pub struct VendorChipset {
    script: ScriptChipset<'static>,
    pub baudrate_command: bool,
    pub bd_addr_command: bool,
}

impl VendorChipset {
    pub fn new(script: ScriptChipset<'static>) -> Self {
        Self {
            script,
            baudrate_command: false,
            bd_addr_command: false,
        }
    }
}

impl Chipset for VendorChipset {
    fn name(&self) -> &str {
        "vendor"
    }

    fn init(&mut self, config: &TransportConfig) {
        self.script.init(config);
    }

    fn next_command(&mut self, buf: &mut [u8]) -> ChipsetResult {
        self.script.next_command(buf)
    }

    fn supports_baudrate_command(&self) -> bool {
        self.baudrate_command
    }

    fn set_baudrate_command(&self, baudrate: u32, buf: &mut [u8]) {
        buf[..3].copy_from_slice(&[0x18, 0xfc, 4]);
        buf[3..7].copy_from_slice(&baudrate.to_le_bytes());
    }

    fn supports_bd_addr_command(&self) -> bool {
        self.bd_addr_command
    }

    fn set_bd_addr_command(&self, addr: &BdAddr, buf: &mut [u8]) {
        buf[..3].copy_from_slice(&[0x01, 0xfc, 6]);
        buf[3..9].copy_from_slice(addr.raw());
    }
}

/// Records the power hooks in the order the stack calls them.
#[derive(Default)]
pub struct PowerLog {
    pub calls: Vec<&'static str>,
    pub fail_off: bool,
}

impl BluetoothControl for PowerLog {
    fn on(&mut self) -> Result<(), Error> {
        self.calls.push("on");
        Ok(())
    }

    fn off(&mut self) -> Result<(), Error> {
        self.calls.push("off");
        if self.fail_off {
            return Err(Error::Failed(0x03));
        }
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), Error> {
        self.calls.push("sleep");
        Ok(())
    }

    fn wake(&mut self) -> Result<(), Error> {
        self.calls.push("wake");
        Ok(())
    }
}

pub fn opcode(cmd: &[u8]) -> u16 {
    u16::from_le_bytes([cmd[0], cmd[1]])
}

// Event builders

fn event(code: u8, params: &[u8]) -> Vec<u8> {
    let mut ev = vec![code, params.len() as u8];
    ev.extend_from_slice(params);
    ev
}

pub fn command_complete(opcode: u16, ret: &[u8]) -> Vec<u8> {
    let mut params = vec![1];
    params.extend_from_slice(&opcode.to_le_bytes());
    params.extend_from_slice(ret);
    event(0x0e, &params)
}

pub fn command_status(status: u8, opcode: u16) -> Vec<u8> {
    let mut params = vec![status, 1];
    params.extend_from_slice(&opcode.to_le_bytes());
    event(0x0f, &params)
}

pub fn connection_request(addr: &BdAddr, link_type: u8) -> Vec<u8> {
    let mut params = addr.raw().to_vec();
    params.extend_from_slice(&[0x0c, 0x02, 0x5a, link_type]);
    event(0x04, &params)
}

pub fn connection_complete(status: u8, handle: u16, addr: &BdAddr) -> Vec<u8> {
    let mut params = vec![status];
    params.extend_from_slice(&handle.to_le_bytes());
    params.extend_from_slice(addr.raw());
    params.extend_from_slice(&[0x01, 0x00]);
    event(0x03, &params)
}

pub fn disconnection_complete(handle: u16, reason: u8) -> Vec<u8> {
    let mut params = vec![0];
    params.extend_from_slice(&handle.to_le_bytes());
    params.push(reason);
    event(0x05, &params)
}

pub fn synchronous_connection_complete(status: u8, handle: u16, addr: &BdAddr) -> Vec<u8> {
    let mut params = vec![status];
    params.extend_from_slice(&handle.to_le_bytes());
    params.extend_from_slice(addr.raw());
    // eSCO link, intervals, packet lengths, transparent air mode
    params.extend_from_slice(&[0x02, 0x0c, 0x02, 0x3c, 0x00, 0x3c, 0x00, 0x03]);
    event(0x2c, &params)
}

pub fn le_connection_complete(status: u8, handle: u16, role: u8, addr: &BdAddr) -> Vec<u8> {
    let mut params = vec![0x01, status];
    params.extend_from_slice(&handle.to_le_bytes());
    params.extend_from_slice(&[role, 0x00]);
    params.extend_from_slice(addr.raw());
    params.extend_from_slice(&[0x18, 0x00, 0x00, 0x00, 0x48, 0x00, 0x00]);
    event(0x3e, &params)
}

pub fn number_of_completed_packets(completed: &[(u16, u16)]) -> Vec<u8> {
    let mut params = vec![completed.len() as u8];
    for (handle, _) in completed {
        params.extend_from_slice(&handle.to_le_bytes());
    }
    for (_, count) in completed {
        params.extend_from_slice(&count.to_le_bytes());
    }
    event(0x13, &params)
}

pub fn inquiry_result(responses: &[(BdAddr, [u8; 3], u16)]) -> Vec<u8> {
    let mut params = vec![responses.len() as u8];
    for (addr, _, _) in responses {
        params.extend_from_slice(addr.raw());
    }
    // page scan repetition mode, then two reserved octets each
    params.extend(responses.iter().map(|_| 1u8));
    params.extend(responses.iter().flat_map(|_| [0u8, 0u8]));
    for (_, cod, _) in responses {
        params.extend_from_slice(cod);
    }
    for (_, _, clock_offset) in responses {
        params.extend_from_slice(&clock_offset.to_le_bytes());
    }
    event(0x02, &params)
}

/// Scripted controller answering every command with a command complete.
#[derive(Clone, Copy)]
pub struct Controller {
    pub manufacturer: u16,
    pub acl_data_packet_length: u16,
    pub acl_packets: u16,
    pub read_buffer_size: bool,
    pub le: bool,
    pub ssp: bool,
    pub secure_connections: bool,
    pub sco_flow_control: bool,
    pub erroneous_data_reporting: bool,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            manufacturer: 0x0002,
            acl_data_packet_length: 1021,
            acl_packets: 8,
            read_buffer_size: true,
            le: true,
            ssp: true,
            secure_connections: true,
            sco_flow_control: false,
            erroneous_data_reporting: false,
        }
    }
}

impl Controller {
    pub fn reply(&self, cmd: &[u8]) -> Vec<u8> {
        let op = opcode(cmd);
        let ret: Vec<u8> = match op {
            // Read Local Version Information
            0x1001 => {
                let mut r = vec![0, 0x09, 0x00, 0x00, 0x09];
                r.extend_from_slice(&self.manufacturer.to_le_bytes());
                r.extend_from_slice(&[0x00, 0x00]);
                r
            }
            // Read Local Supported Commands
            0x1002 => {
                let mut octets = [0u8; 64];
                if self.sco_flow_control {
                    octets[10] = 0x10;
                }
                if self.erroneous_data_reporting {
                    octets[18] = 0x08;
                }
                if self.read_buffer_size {
                    octets[14] = 0x80;
                }
                octets[20] = 0x10;
                if self.le {
                    octets[24] = 0x40;
                }
                if self.secure_connections {
                    octets[32] = 0x08;
                }
                let mut r = vec![0];
                r.extend_from_slice(&octets);
                r
            }
            // Read Local Supported Features
            0x1003 => {
                let mut features = [0u8; 8];
                features[3] = 0x80;
                if self.le {
                    features[4] = 0x40;
                }
                if self.ssp {
                    features[6] = 0x08;
                }
                let mut r = vec![0];
                r.extend_from_slice(&features);
                r
            }
            // Read Buffer Size
            0x1005 => {
                let mut r = vec![0];
                r.extend_from_slice(&self.acl_data_packet_length.to_le_bytes());
                r.push(64);
                r.extend_from_slice(&self.acl_packets.to_le_bytes());
                r.extend_from_slice(&4u16.to_le_bytes());
                r
            }
            // Read BD_ADDR
            0x1009 => {
                let mut r = vec![0];
                r.extend_from_slice(local().raw());
                r
            }
            // LE Read Buffer Size
            0x2002 => vec![0, 0xfb, 0x00, 8],
            // LE Read White List Size
            0x200f => vec![0, 8],
            _ => vec![0],
        };
        command_complete(op, &ret)
    }
}

/// Answers outstanding commands until the stack stops sending. Returns the number answered.
pub fn answer_commands(hci: &mut TestHci<'_>, controller: &Controller) -> usize {
    let mut answered = 0;
    while let Some(cmd) = hci.transport_mut().next_unanswered() {
        let reply = controller.reply(&cmd);
        hci.handle_packet(PacketType::Event, &reply);
        answered += 1;
        assert!(answered < 100, "stack keeps sending commands");
    }
    answered
}

pub fn power_on(hci: &mut TestHci<'_>, controller: &Controller) {
    hci.power_control(PowerMode::On).unwrap();
    answer_commands(hci, controller);
    assert_eq!(hci.state(), HciState::Working);
}

/// Accepts an incoming classic connection from `addr` and answers the follow-up commands.
pub fn accept_connection(hci: &mut TestHci<'_>, controller: &Controller, addr: &BdAddr, handle: u16) {
    hci.handle_packet(PacketType::Event, &connection_request(addr, 1));
    answer_commands(hci, controller);
    hci.handle_packet(PacketType::Event, &connection_complete(0, handle, addr));
    answer_commands(hci, controller);
}
