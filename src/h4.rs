//! H4 framing over a UART style block I/O driver.
//!
//! Every packet on the wire is prefixed with its [`PacketType`] byte. The receive path reads the
//! type byte, then the type specific header, then exactly the payload announced by the header.
//! Optionally the TI eHCILL sleep protocol is layered on top, using single byte pseudo packets.
use embassy_time::{Duration, Instant};
use heapless::Deque;

use crate::codec::le16;
use crate::config::{INCOMING_PACKET_BUFFER_SIZE, OUTGOING_PACKET_BUFFER_SIZE};
use crate::event::{EVENT_TRANSPORT_PACKET_SENT, EVENT_TRANSPORT_SLEEP_MODE};
use crate::transport::{PacketType, Transport, TransportConfig, TransportError};
use crate::Bytes;

const EVENT_HEADER_SIZE: usize = 2;
const ACL_HEADER_SIZE: usize = 4;
const SCO_HEADER_SIZE: usize = 3;

const EHCILL_GO_TO_SLEEP_IND: u8 = 0x30;
const EHCILL_GO_TO_SLEEP_ACK: u8 = 0x31;
const EHCILL_WAKE_UP_IND: u8 = 0x32;
const EHCILL_WAKE_UP_ACK: u8 = 0x33;
const EHCILL_WAKEUP_SIGNAL: u8 = 0x34;

/// Delay before a scheduled sleep ack goes out.
const EHCILL_SLEEP_ACK_DELAY: Duration = Duration::from_millis(50);

/// Size of the command complete event read in one block after a baud rate change.
const BAUDRATE_WORKAROUND_EVENT_SIZE: usize = 7;

const LOCAL_VERSION_EVENT_PREFIX: [u8; 6] = [0x04, 0x0e, 0x0c, 0x01, 0x01, 0x10];

const COMPANY_ID_TEXAS_INSTRUMENTS: u16 = 0x000d;
const COMPANY_ID_CYPRESS: u16 = 0x0131;

/// UART sleep modes a block driver may offer for eHCILL.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepMode {
    Off,
    RtsHighWakeOnCtsPulse,
    RtsLowWakeOnRxEdge,
}

/// Byte level driver below the H4 framing.
///
/// Reads and writes are armed by the framing layer and completed through polling, one read and
/// one write in flight at a time.
pub trait BlockIo {
    fn init(&mut self, config: &TransportConfig) -> Result<(), TransportError>;
    fn open(&mut self) -> Result<(), TransportError>;
    fn close(&mut self) -> Result<(), TransportError>;
    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), TransportError>;

    fn set_flowcontrol(&mut self, enabled: bool) -> Result<(), TransportError> {
        let _ = enabled;
        Err(TransportError::Unsupported)
    }

    /// Arms a read of exactly `len` bytes.
    fn receive_block(&mut self, len: usize);

    /// Copies the armed read into `buf` once all of its bytes arrived.
    fn poll_block_received(&mut self, buf: &mut [u8]) -> bool;

    /// Starts writing `data`. The driver keeps its own copy.
    fn send_block(&mut self, data: &[u8]);

    /// True once, after the write started by `send_block` finished.
    fn poll_block_sent(&mut self) -> bool;

    fn supported_sleep_modes(&self) -> &'static [SleepMode] {
        &[]
    }

    fn set_sleep(&mut self, mode: SleepMode) {
        let _ = mode;
    }

    /// True once for every wakeup signal seen while the UART sleeps.
    fn poll_wakeup(&mut self) -> bool {
        false
    }
}

/// Controllers whose baud rate change response gets mangled by flow control.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudrateWorkaround {
    TiCc256x,
    Cypress,
}

impl BaudrateWorkaround {
    fn manufacturer(self) -> u16 {
        match self {
            Self::TiCc256x => COMPANY_ID_TEXAS_INSTRUMENTS,
            Self::Cypress => COMPANY_ID_CYPRESS,
        }
    }

    fn command_prefix(self) -> &'static [u8] {
        match self {
            Self::TiCc256x => &[0x01, 0x36, 0xff, 0x04],
            Self::Cypress => &[0x01, 0x18, 0xfc, 0x06],
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct H4Config {
    /// Enables the eHCILL sleep protocol.
    pub ehcill: bool,
    pub baudrate_workaround: Option<BaudrateWorkaround>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Off,
    W4PacketType,
    W4EventHeader,
    W4AclHeader,
    W4ScoHeader,
    W4Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Off,
    Idle,
    W4PacketSent,
    W4Wakeup,
    W2EhcillSend,
    W4EhcillSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EhcillState {
    Awake,
    W2SendSleepAck,
    Sleep,
    W4WakeupIndOrAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkaroundState {
    Idle,
    ChipsetDetected,
    CommandSent,
    Done,
}

/// H4 transport over a [`BlockIo`] driver.
pub struct H4Transport<B: BlockIo> {
    io: B,
    config: H4Config,

    rx_state: RxState,
    rx: [u8; 1 + INCOMING_PACKET_BUFFER_SIZE],
    read_pos: usize,
    bytes_to_read: usize,

    tx_state: TxState,
    tx: [u8; 1 + OUTGOING_PACKET_BUFFER_SIZE],
    // Length of a packet waiting in `tx`, 0 when there is none.
    tx_len: usize,

    workaround: WorkaroundState,

    ehcill_state: EhcillState,
    ehcill_command: u8,
    sleep_mode: SleepMode,
    sleep_ack_deadline: Option<Instant>,
    sleep_active: bool,
    now: Instant,

    events: Deque<[u8; 3], 4>,
}

impl<B: BlockIo> H4Transport<B> {
    pub fn new(io: B, config: H4Config) -> Self {
        Self {
            io,
            config,
            rx_state: RxState::Off,
            rx: [0; 1 + INCOMING_PACKET_BUFFER_SIZE],
            read_pos: 0,
            bytes_to_read: 0,
            tx_state: TxState::Off,
            tx: [0; 1 + OUTGOING_PACKET_BUFFER_SIZE],
            tx_len: 0,
            workaround: WorkaroundState::Idle,
            ehcill_state: EhcillState::Awake,
            ehcill_command: 0,
            sleep_mode: SleepMode::Off,
            sleep_ack_deadline: None,
            sleep_active: false,
            now: Instant::from_ticks(0),
            events: Deque::new(),
        }
    }

    /// Expect the response to a vendor baud rate command as a single block.
    pub fn enable_baudrate_workaround(&mut self, chip: BaudrateWorkaround) {
        self.config.baudrate_workaround = Some(chip);
        self.workaround = WorkaroundState::Idle;
    }

    pub fn io(&self) -> &B {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut B {
        &mut self.io
    }

    fn reset_rx(&mut self) {
        self.rx_state = RxState::W4PacketType;
        self.read_pos = 0;
        self.bytes_to_read = 1;
    }

    fn trigger_next_read(&mut self) {
        trace!("[h4] next read: {} bytes", self.bytes_to_read);
        self.io.receive_block(self.bytes_to_read);
    }

    fn push_event(&mut self, event: [u8; 3]) {
        if self.events.push_back(event).is_err() {
            error!("[h4] transport event queue full, dropping event {:02x}", event[0]);
        }
    }

    fn packet_complete(&mut self, buf: &mut [u8]) -> Option<(PacketType, usize)> {
        if self.workaround == WorkaroundState::Idle && self.rx.starts_with(&LOCAL_VERSION_EVENT_PREFIX) {
            if let Some(chip) = self.config.baudrate_workaround {
                if le16(&self.rx, 11) == chip.manufacturer() {
                    info!("[h4] detected {:?} controller", chip);
                    self.workaround = WorkaroundState::ChipsetDetected;
                } else {
                    self.workaround = WorkaroundState::Done;
                }
            }
        }

        let len = self.read_pos - 1;
        let kind = self.rx[0];
        // reset before delivering, the stack might close the transport
        self.reset_rx();

        let Some(packet_type) = PacketType::from_u8(kind) else {
            error!("[h4] dropping packet of type {:02x}", kind);
            return None;
        };
        if buf.len() < len {
            error!("[h4] receive buffer too small for {} byte packet", len);
            return None;
        }
        buf[..len].copy_from_slice(&self.rx[1..1 + len]);
        trace!("[h4] received {:?}: {:02x}", packet_type, Bytes(&buf[..len]));
        Some((packet_type, len))
    }

    fn block_read(&mut self, buf: &mut [u8]) -> Option<(PacketType, usize)> {
        let mut delivered = None;
        self.read_pos += self.bytes_to_read;
        match self.rx_state {
            RxState::W4PacketType => match self.rx[0] {
                0x04 => {
                    self.bytes_to_read = EVENT_HEADER_SIZE;
                    self.rx_state = RxState::W4EventHeader;
                }
                0x02 => {
                    self.bytes_to_read = ACL_HEADER_SIZE;
                    self.rx_state = RxState::W4AclHeader;
                }
                0x03 => {
                    self.bytes_to_read = SCO_HEADER_SIZE;
                    self.rx_state = RxState::W4ScoHeader;
                }
                cmd @ EHCILL_GO_TO_SLEEP_IND..=EHCILL_WAKE_UP_ACK if self.config.ehcill => {
                    self.ehcill_handle_command(cmd);
                    self.reset_rx();
                }
                other => {
                    error!("[h4] invalid packet type {:02x}", other);
                    self.reset_rx();
                }
            },
            RxState::W4EventHeader => {
                self.bytes_to_read = self.rx[2] as usize;
                if self.bytes_to_read > INCOMING_PACKET_BUFFER_SIZE - EVENT_HEADER_SIZE {
                    error!(
                        "[h4] invalid event len {} - only space for {}",
                        self.bytes_to_read,
                        INCOMING_PACKET_BUFFER_SIZE - EVENT_HEADER_SIZE
                    );
                    self.reset_rx();
                } else {
                    self.rx_state = RxState::W4Payload;
                }
            }
            RxState::W4AclHeader => {
                self.bytes_to_read = le16(&self.rx, 3) as usize;
                if self.bytes_to_read > INCOMING_PACKET_BUFFER_SIZE - ACL_HEADER_SIZE {
                    error!(
                        "[h4] invalid ACL payload len {} - only space for {}",
                        self.bytes_to_read,
                        INCOMING_PACKET_BUFFER_SIZE - ACL_HEADER_SIZE
                    );
                    self.reset_rx();
                } else {
                    self.rx_state = RxState::W4Payload;
                }
            }
            RxState::W4ScoHeader => {
                self.bytes_to_read = self.rx[3] as usize;
                if self.bytes_to_read > INCOMING_PACKET_BUFFER_SIZE - SCO_HEADER_SIZE {
                    error!(
                        "[h4] invalid SCO payload len {} - only space for {}",
                        self.bytes_to_read,
                        INCOMING_PACKET_BUFFER_SIZE - SCO_HEADER_SIZE
                    );
                    self.reset_rx();
                } else {
                    self.rx_state = RxState::W4Payload;
                }
            }
            RxState::W4Payload => {
                delivered = self.packet_complete(buf);
            }
            RxState::Off => {
                self.bytes_to_read = 0;
            }
        }

        if self.workaround == WorkaroundState::CommandSent {
            self.workaround = WorkaroundState::Idle;
            // read the expected command complete in a single block
            self.rx_state = RxState::W4Payload;
            self.bytes_to_read = BAUDRATE_WORKAROUND_EVENT_SIZE;
        }

        if self.rx_state == RxState::W4Payload && self.bytes_to_read == 0 {
            delivered = self.packet_complete(buf);
        }

        if self.rx_state != RxState::Off {
            self.trigger_next_read();
        }
        delivered
    }

    fn block_sent(&mut self) {
        match self.tx_state {
            TxState::W4PacketSent => {
                self.tx_len = 0;
                self.tx_state = TxState::Idle;
                if self.config.ehcill {
                    self.ehcill_handle_packet_sent();
                }
                self.push_event([EVENT_TRANSPORT_PACKET_SENT, 0, 0]);
            }
            TxState::W4EhcillSent | TxState::W4Wakeup => {
                self.ehcill_handle_command_sent();
            }
            _ => {}
        }
    }

    fn emit_sleep_state(&mut self, active: bool) {
        if self.sleep_active == active {
            return;
        }
        self.sleep_active = active;
        info!("[h4] sleep mode active: {}", active);
        self.push_event([EVENT_TRANSPORT_SLEEP_MODE, 1, active as u8]);
    }

    fn uart_awake(&mut self) {
        self.emit_sleep_state(false);
        if self.sleep_mode != SleepMode::Off {
            self.io.set_sleep(SleepMode::Off);
        }
    }

    fn ehcill_open(&mut self) {
        self.ehcill_state = EhcillState::Awake;
        self.ehcill_command = 0;
        self.sleep_ack_deadline = None;
        let modes = self.io.supported_sleep_modes();
        self.sleep_mode = if modes.contains(&SleepMode::RtsHighWakeOnCtsPulse) {
            info!("[h4] eHCILL: using wake on CTS");
            SleepMode::RtsHighWakeOnCtsPulse
        } else if modes.contains(&SleepMode::RtsLowWakeOnRxEdge) {
            info!("[h4] eHCILL: using wake on RX");
            SleepMode::RtsLowWakeOnRxEdge
        } else {
            info!("[h4] eHCILL: UART driver does not provide compatible sleep mode");
            SleepMode::Off
        };
    }

    fn ehcill_send_wakeup_ind(&mut self) {
        debug!("[h4] eHCILL: send WAKE_UP_IND");
        self.tx_state = TxState::W4Wakeup;
        self.ehcill_state = EhcillState::W4WakeupIndOrAck;
        self.ehcill_command = EHCILL_WAKE_UP_IND;
        self.io.send_block(&[EHCILL_WAKE_UP_IND]);
    }

    fn ehcill_send_command(&mut self) {
        debug!("[h4] eHCILL: send command {:02x}", self.ehcill_command);
        self.tx_state = TxState::W4EhcillSent;
        if self.ehcill_command == EHCILL_GO_TO_SLEEP_ACK {
            self.ehcill_state = EhcillState::Sleep;
        }
        let cmd = self.ehcill_command;
        self.io.send_block(&[cmd]);
    }

    fn ehcill_start_timer(&mut self) {
        debug!("[h4] eHCILL: set timer for sending command {:02x}", self.ehcill_command);
        self.sleep_ack_deadline = Some(self.now + EHCILL_SLEEP_ACK_DELAY);
    }

    fn ehcill_trigger_wakeup(&mut self) {
        if matches!(self.tx_state, TxState::W2EhcillSend | TxState::W4EhcillSent) {
            // wake up or sleep ack in progress
            return;
        }
        self.uart_awake();
        self.ehcill_send_wakeup_ind();
    }

    fn ehcill_schedule_command(&mut self, command: u8) {
        debug!("[h4] eHCILL: schedule command {:02x}", command);
        self.ehcill_command = command;
        if self.tx_state == TxState::Idle {
            if command == EHCILL_WAKE_UP_ACK {
                self.ehcill_send_command();
            } else {
                // block the stack from sending until the ack went out
                self.tx_state = TxState::W2EhcillSend;
                self.ehcill_start_timer();
            }
        }
    }

    fn ehcill_handle_command(&mut self, action: u8) {
        match (self.ehcill_state, action) {
            (EhcillState::Awake, EHCILL_GO_TO_SLEEP_IND) => {
                debug!("[h4] eHCILL: received GO_TO_SLEEP_IND");
                self.ehcill_state = EhcillState::W2SendSleepAck;
                self.ehcill_schedule_command(EHCILL_GO_TO_SLEEP_ACK);
            }
            (EhcillState::W2SendSleepAck, EHCILL_WAKE_UP_IND) | (EhcillState::Sleep, EHCILL_WAKE_UP_IND) => {
                debug!("[h4] eHCILL: received WAKE_UP_IND");
                self.ehcill_state = EhcillState::Awake;
                self.uart_awake();
                self.ehcill_schedule_command(EHCILL_WAKE_UP_ACK);
            }
            (EhcillState::Sleep, EHCILL_WAKEUP_SIGNAL) => {
                self.uart_awake();
            }
            (EhcillState::W4WakeupIndOrAck, EHCILL_WAKE_UP_IND | EHCILL_WAKE_UP_ACK) => {
                debug!("[h4] eHCILL: received WAKE_UP ({:02x})", action);
                self.tx_state = TxState::W4PacketSent;
                self.ehcill_state = EhcillState::Awake;
                self.io.send_block(&self.tx[..self.tx_len]);
            }
            _ => {}
        }
    }

    fn ehcill_handle_packet_sent(&mut self) {
        match self.ehcill_command {
            EHCILL_GO_TO_SLEEP_ACK => {
                self.tx_state = TxState::W2EhcillSend;
                self.ehcill_start_timer();
            }
            EHCILL_WAKE_UP_IND => self.ehcill_send_command(),
            _ => {}
        }
    }

    fn ehcill_handle_command_sent(&mut self) {
        self.tx_state = TxState::Idle;
        let command = self.ehcill_command;
        self.ehcill_command = 0;
        debug!("[h4] eHCILL: command {:02x} sent", command);
        if command == EHCILL_GO_TO_SLEEP_ACK {
            if self.sleep_mode != SleepMode::Off {
                self.io.set_sleep(self.sleep_mode);
            }
            self.emit_sleep_state(true);
        }
        if self.tx_len != 0 {
            self.uart_awake();
            if command != EHCILL_WAKE_UP_IND {
                self.ehcill_send_wakeup_ind();
            }
        }
    }
}

impl<B: BlockIo> Transport for H4Transport<B> {
    fn init(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        self.tx_state = TxState::Off;
        self.rx_state = RxState::Off;
        self.io.init(config)
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.io.open()?;
        self.tx_state = TxState::Idle;
        self.tx_len = 0;
        self.events.clear();
        self.reset_rx();
        self.trigger_next_read();
        if self.config.ehcill {
            self.ehcill_open();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.tx_state = TxState::Off;
        self.rx_state = RxState::Off;
        self.sleep_ack_deadline = None;
        self.io.close()
    }

    fn poll(&mut self, now: Instant, buf: &mut [u8]) -> Option<(PacketType, usize)> {
        self.now = now;
        if let Some(event) = self.events.pop_front() {
            let len = 2 + event[1] as usize;
            buf[..len].copy_from_slice(&event[..len]);
            return Some((PacketType::Event, len));
        }

        if let Some(deadline) = self.sleep_ack_deadline {
            if now >= deadline {
                debug!("[h4] eHCILL: timer triggered");
                self.sleep_ack_deadline = None;
                self.ehcill_send_command();
            }
        }

        if self.config.ehcill && self.io.poll_wakeup() {
            debug!("[h4] eHCILL: UART wakeup received");
            self.ehcill_handle_command(EHCILL_WAKEUP_SIGNAL);
        }

        if self.io.poll_block_sent() {
            self.block_sent();
        }

        loop {
            if let Some(event) = self.events.pop_front() {
                let len = 2 + event[1] as usize;
                buf[..len].copy_from_slice(&event[..len]);
                return Some((PacketType::Event, len));
            }
            if self.rx_state == RxState::Off {
                return None;
            }
            let start = self.read_pos;
            let end = start + self.bytes_to_read;
            if !self.io.poll_block_received(&mut self.rx[start..end]) {
                return None;
            }
            if let Some(packet) = self.block_read(buf) {
                return Some(packet);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.sleep_ack_deadline
    }

    fn can_send_packet_now(&self, _packet_type: PacketType) -> bool {
        self.tx_state == TxState::Idle && (!self.config.ehcill || self.tx_len == 0)
    }

    fn send_packet(&mut self, packet_type: PacketType, packet: &[u8]) -> Result<(), TransportError> {
        let size = packet.len() + 1;
        if size > self.tx.len() {
            error!("[h4] packet of {} bytes exceeds the outgoing buffer", packet.len());
            return Err(TransportError::Io);
        }
        self.tx[0] = packet_type as u8;
        self.tx[1..size].copy_from_slice(packet);

        if let Some(chip) = self.config.baudrate_workaround {
            if self.workaround == WorkaroundState::ChipsetDetected && self.tx[..size].starts_with(chip.command_prefix()) {
                info!("[h4] baud rate command detected, expect command complete event next");
                self.workaround = WorkaroundState::CommandSent;
            }
        }

        if self.config.ehcill {
            self.tx_len = size;
            match self.ehcill_state {
                EhcillState::Sleep => {
                    self.ehcill_trigger_wakeup();
                    return Ok(());
                }
                EhcillState::W2SendSleepAck => {
                    debug!("[h4] eHCILL: packet queued until sleep ack is sent");
                    return Ok(());
                }
                _ => {}
            }
        }

        self.tx_state = TxState::W4PacketSent;
        self.io.send_block(&self.tx[..size]);
        Ok(())
    }

    fn supports_baudrate(&self) -> bool {
        true
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), TransportError> {
        info!("[h4] set baudrate {}", baudrate);
        self.io.set_baudrate(baudrate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Block driver fed from a byte queue, recording every write.
    struct MockIo {
        rx: Deque<u8, 4096>,
        armed: Option<usize>,
        written: heapless::Vec<u8, 4096>,
        sending: bool,
        sleep: heapless::Vec<SleepMode, 8>,
        wakeup: bool,
        modes: &'static [SleepMode],
    }

    impl MockIo {
        fn new() -> Self {
            Self {
                rx: Deque::new(),
                armed: None,
                written: heapless::Vec::new(),
                sending: false,
                sleep: heapless::Vec::new(),
                wakeup: false,
                modes: &[],
            }
        }

        fn feed(&mut self, data: &[u8]) {
            for b in data {
                unwrap!(self.rx.push_back(*b));
            }
        }
    }

    impl BlockIo for MockIo {
        fn init(&mut self, _config: &TransportConfig) -> Result<(), TransportError> {
            Ok(())
        }
        fn open(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn set_baudrate(&mut self, _baudrate: u32) -> Result<(), TransportError> {
            Ok(())
        }
        fn receive_block(&mut self, len: usize) {
            self.armed = Some(len);
        }
        fn poll_block_received(&mut self, buf: &mut [u8]) -> bool {
            match self.armed {
                Some(len) if self.rx.len() >= len => {
                    assert_eq!(buf.len(), len);
                    for b in buf.iter_mut() {
                        *b = unwrap!(self.rx.pop_front());
                    }
                    self.armed = None;
                    true
                }
                _ => false,
            }
        }
        fn send_block(&mut self, data: &[u8]) {
            assert!(!self.sending);
            unwrap!(self.written.extend_from_slice(data));
            self.sending = true;
        }
        fn poll_block_sent(&mut self) -> bool {
            core::mem::replace(&mut self.sending, false)
        }
        fn supported_sleep_modes(&self) -> &'static [SleepMode] {
            self.modes
        }
        fn set_sleep(&mut self, mode: SleepMode) {
            unwrap!(self.sleep.push(mode));
        }
        fn poll_wakeup(&mut self) -> bool {
            core::mem::replace(&mut self.wakeup, false)
        }
    }

    fn open(config: H4Config) -> H4Transport<MockIo> {
        let mut h4 = H4Transport::new(MockIo::new(), config);
        unwrap!(h4.init(&TransportConfig::default()));
        unwrap!(h4.open());
        h4
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn decodes_event_and_acl() {
        let mut h4 = open(H4Config::default());
        let mut buf = [0u8; 64];
        h4.io_mut().feed(&[0x04, 0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]);
        h4.io_mut().feed(&[0x02, 0x40, 0x20, 0x02, 0x00, 0xaa, 0xbb]);
        assert_eq!(h4.poll(at(0), &mut buf), Some((PacketType::Event, 6)));
        assert_eq!(&buf[..6], &[0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]);
        assert_eq!(h4.poll(at(0), &mut buf), Some((PacketType::Acl, 6)));
        assert_eq!(&buf[..6], &[0x40, 0x20, 0x02, 0x00, 0xaa, 0xbb]);
        assert_eq!(h4.poll(at(0), &mut buf), None);
    }

    #[test]
    fn zero_length_payload_is_delivered() {
        let mut h4 = open(H4Config::default());
        let mut buf = [0u8; 8];
        h4.io_mut().feed(&[0x04, 0x1a, 0x00]);
        assert_eq!(h4.poll(at(0), &mut buf), Some((PacketType::Event, 2)));
        assert_eq!(&buf[..2], &[0x1a, 0x00]);
    }

    #[test]
    fn invalid_type_resets() {
        let mut h4 = open(H4Config::default());
        let mut buf = [0u8; 16];
        h4.io_mut().feed(&[0x07]);
        assert_eq!(h4.poll(at(0), &mut buf), None);

        // the next byte is taken as a packet type again
        h4.io_mut().feed(&[0x07, 0x04, 0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]);
        assert_eq!(h4.poll(at(0), &mut buf), Some((PacketType::Event, 6)));
        assert_eq!(&buf[..6], &[0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]);
        assert_eq!(h4.poll(at(0), &mut buf), None);
    }

    #[test]
    fn acl_length_at_capacity() {
        let mut h4 = open(H4Config::default());
        let mut buf = [0u8; INCOMING_PACKET_BUFFER_SIZE];
        let max = (INCOMING_PACKET_BUFFER_SIZE - ACL_HEADER_SIZE) as u16;

        // one more than fits is dropped after the header
        let over = (max + 1).to_le_bytes();
        h4.io_mut().feed(&[0x02, 0x01, 0x00, over[0], over[1]]);
        assert_eq!(h4.poll(at(0), &mut buf), None);

        let exact = max.to_le_bytes();
        h4.io_mut().feed(&[0x02, 0x01, 0x00, exact[0], exact[1]]);
        for _ in 0..max {
            h4.io_mut().feed(&[0x55]);
        }
        assert_eq!(
            h4.poll(at(0), &mut buf),
            Some((PacketType::Acl, INCOMING_PACKET_BUFFER_SIZE))
        );
        assert_eq!(buf[INCOMING_PACKET_BUFFER_SIZE - 1], 0x55);
    }

    #[test]
    fn send_completes_with_packet_sent_event() {
        let mut h4 = open(H4Config::default());
        let mut buf = [0u8; 16];
        assert!(h4.can_send_packet_now(PacketType::Command));
        unwrap!(h4.send_packet(PacketType::Command, &[0x03, 0x0c, 0x00]));
        assert!(!h4.can_send_packet_now(PacketType::Command));
        assert_eq!(&h4.io().written[..], &[0x01, 0x03, 0x0c, 0x00]);

        assert_eq!(h4.poll(at(0), &mut buf), Some((PacketType::Event, 2)));
        assert_eq!(&buf[..2], &[EVENT_TRANSPORT_PACKET_SENT, 0]);
        assert!(h4.can_send_packet_now(PacketType::Command));
    }

    #[test]
    fn baudrate_workaround_reads_single_block() {
        let mut h4 = open(H4Config {
            ehcill: false,
            baudrate_workaround: Some(BaudrateWorkaround::TiCc256x),
        });
        let mut buf = [0u8; 32];
        // local version information with manufacturer 0x000d
        h4.io_mut().feed(&[
            0x04, 0x0e, 0x0c, 0x01, 0x01, 0x10, 0x00, 0x06, 0x00, 0x00, 0x06, 0x0d, 0x00, 0x00, 0x00,
        ]);
        assert_eq!(h4.poll(at(0), &mut buf), Some((PacketType::Event, 14)));

        unwrap!(h4.send_packet(PacketType::Command, &[0x36, 0xff, 0x04, 0x00, 0x10, 0x0e, 0x00]));
        assert_eq!(h4.poll(at(0), &mut buf), Some((PacketType::Event, 2)));

        // the next block after the type byte is 7 bytes, regardless of the header
        h4.io_mut().feed(&[0x04, 0x0e, 0x04, 0x01, 0x36, 0xff, 0x00, 0x00]);
        assert_eq!(h4.poll(at(0), &mut buf), Some((PacketType::Event, 7)));
    }

    #[test]
    fn ehcill_sleep_and_wakeup() {
        let mut h4 = open(H4Config {
            ehcill: true,
            baudrate_workaround: None,
        });
        h4.io_mut().modes = &[SleepMode::RtsLowWakeOnRxEdge];
        unwrap!(h4.close());
        unwrap!(h4.open());
        let mut buf = [0u8; 16];

        // controller wants to sleep, ack goes out after the delay
        h4.io_mut().feed(&[EHCILL_GO_TO_SLEEP_IND]);
        assert_eq!(h4.poll(at(0), &mut buf), None);
        assert!(!h4.can_send_packet_now(PacketType::Command));
        assert_eq!(h4.next_deadline(), Some(at(50)));
        assert_eq!(h4.poll(at(10), &mut buf), None);
        assert!(h4.io().written.is_empty());

        // the ack completes within the same poll: uart sleeps and the sleep mode event is reported once
        assert_eq!(h4.poll(at(50), &mut buf), Some((PacketType::Event, 3)));
        assert_eq!(&buf[..3], &[EVENT_TRANSPORT_SLEEP_MODE, 1, 1]);
        assert_eq!(&h4.io().written[..], &[EHCILL_GO_TO_SLEEP_ACK]);
        assert_eq!(&h4.io().sleep[..], &[SleepMode::RtsLowWakeOnRxEdge]);
        assert_eq!(h4.poll(at(51), &mut buf), None);
        assert!(h4.can_send_packet_now(PacketType::Command));

        // sending while asleep queues the packet behind a wake up indication
        unwrap!(h4.send_packet(PacketType::Command, &[0x03, 0x0c, 0x00]));
        assert!(!h4.can_send_packet_now(PacketType::Command));
        assert_eq!(&h4.io().written[..], &[EHCILL_GO_TO_SLEEP_ACK, EHCILL_WAKE_UP_IND]);
        assert_eq!(h4.poll(at(52), &mut buf), Some((PacketType::Event, 3)));
        assert_eq!(&buf[..3], &[EVENT_TRANSPORT_SLEEP_MODE, 1, 0]);

        // controller acknowledges, queued packet follows
        h4.io_mut().feed(&[EHCILL_WAKE_UP_ACK]);
        assert_eq!(h4.poll(at(53), &mut buf), None);
        assert_eq!(
            &h4.io().written[..],
            &[EHCILL_GO_TO_SLEEP_ACK, EHCILL_WAKE_UP_IND, 0x01, 0x03, 0x0c, 0x00]
        );
        assert_eq!(h4.poll(at(54), &mut buf), Some((PacketType::Event, 2)));
        assert_eq!(&buf[..2], &[EVENT_TRANSPORT_PACKET_SENT, 0]);
        assert!(h4.can_send_packet_now(PacketType::Command));
    }

    #[test]
    fn ehcill_controller_wakeup_is_acked() {
        let mut h4 = open(H4Config {
            ehcill: true,
            baudrate_workaround: None,
        });
        let mut buf = [0u8; 16];
        h4.io_mut().feed(&[EHCILL_GO_TO_SLEEP_IND]);
        assert_eq!(h4.poll(at(0), &mut buf), None);
        assert_eq!(h4.poll(at(50), &mut buf), Some((PacketType::Event, 3)));
        assert_eq!(&buf[..3], &[EVENT_TRANSPORT_SLEEP_MODE, 1, 1]);
        assert_eq!(h4.poll(at(51), &mut buf), None);

        h4.io_mut().feed(&[EHCILL_WAKE_UP_IND]);
        assert_eq!(h4.poll(at(60), &mut buf), Some((PacketType::Event, 3)));
        assert_eq!(&buf[..3], &[EVENT_TRANSPORT_SLEEP_MODE, 1, 0]);
        assert_eq!(&h4.io().written[..], &[EHCILL_GO_TO_SLEEP_ACK, EHCILL_WAKE_UP_ACK]);
        assert_eq!(h4.poll(at(61), &mut buf), None);
        assert!(h4.can_send_packet_now(PacketType::Acl));
    }
}
