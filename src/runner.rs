//! Async driver for a stack on an H4 serial port.
use core::cell::RefCell;

use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{Read, Write};
use heapless::{Deque, Vec};

use crate::config::{INCOMING_PACKET_BUFFER_SIZE, OUTGOING_PACKET_BUFFER_SIZE};
use crate::h4::{BlockIo, H4Transport};
use crate::hci::Hci;
use crate::run_loop::{RunLoop, TimerList};
use crate::transport::{Transport, TransportConfig, TransportError};

const RX_QUEUE_SIZE: usize = 2 * INCOMING_PACKET_BUFFER_SIZE;
const READ_CHUNK: usize = 64;
const IDLE_WAKEUP: Duration = Duration::from_secs(60);

/// The stack type driven by [`Runner`].
pub type SerialHci<'d> = Hci<'d, H4Transport<SerialBlockIo>, TimerList>;

/// A [`SerialHci`] shared between the runner and the tasks using the stack.
pub type SharedHci<'d> = Mutex<NoopRawMutex, RefCell<SerialHci<'d>>>;

/// [`BlockIo`] over byte queues, bridged to an async serial port by [`Runner`].
pub struct SerialBlockIo {
    rx: Deque<u8, RX_QUEUE_SIZE>,
    armed: Option<usize>,
    tx: Vec<u8, { 1 + OUTGOING_PACKET_BUFFER_SIZE }>,
    tx_written: bool,
    open: bool,
    baudrate: u32,
}

impl SerialBlockIo {
    pub const fn new() -> Self {
        Self {
            rx: Deque::new(),
            armed: None,
            tx: Vec::new(),
            tx_written: false,
            open: false,
            baudrate: 0,
        }
    }

    /// Baud rate the stack expects the port to run at.
    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn rx_space(&self) -> usize {
        RX_QUEUE_SIZE - self.rx.len()
    }

    fn feed(&mut self, data: &[u8]) {
        for b in data {
            if self.rx.push_back(*b).is_err() {
                error!("[hci] serial receive queue full, dropping input");
                return;
            }
        }
    }

    /// Bytes waiting to be written to the port, if a write started.
    fn pending_write(&self) -> Option<&[u8]> {
        if self.tx.is_empty() || self.tx_written {
            None
        } else {
            Some(&self.tx)
        }
    }

    fn write_done(&mut self) {
        self.tx_written = true;
    }
}

impl Default for SerialBlockIo {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockIo for SerialBlockIo {
    fn init(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        self.baudrate = config.baudrate_init;
        Ok(())
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.rx.clear();
        self.armed = None;
        self.tx.clear();
        self.tx_written = false;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), TransportError> {
        debug!("[hci] serial baud rate {}", baudrate);
        self.baudrate = baudrate;
        Ok(())
    }

    fn receive_block(&mut self, len: usize) {
        self.armed = Some(len);
    }

    fn poll_block_received(&mut self, buf: &mut [u8]) -> bool {
        match self.armed {
            Some(len) if self.rx.len() >= len && buf.len() >= len => {
                for b in buf[..len].iter_mut() {
                    *b = self.rx.pop_front().unwrap_or(0);
                }
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    fn send_block(&mut self, data: &[u8]) {
        self.tx.clear();
        self.tx_written = false;
        if self.tx.extend_from_slice(data).is_err() {
            error!("[hci] block of {} bytes too large for the serial buffer", data.len());
        }
    }

    fn poll_block_sent(&mut self) -> bool {
        if self.tx_written {
            self.tx.clear();
            self.tx_written = false;
            return true;
        }
        false
    }
}

/// Moves bytes between a serial port and the stack, and fires its timers.
pub struct Runner<'a, 'd> {
    hci: &'a SharedHci<'d>,
    wake: &'a Signal<NoopRawMutex, ()>,
}

impl<'a, 'd> Runner<'a, 'd> {
    pub fn new(hci: &'a SharedHci<'d>, wake: &'a Signal<NoopRawMutex, ()>) -> Self {
        Self { hci, wake }
    }

    /// Runs `f` on the stack and wakes the runner so commands it queued go out.
    pub fn with<O>(&self, f: impl FnOnce(&mut SerialHci<'d>) -> O) -> O {
        let out = self.hci.lock(|hci| f(&mut hci.borrow_mut()));
        self.wake.signal(());
        out
    }

    /// Drives the stack until the port fails.
    pub async fn run<P: Read + Write>(&self, port: &mut P) -> Result<(), P::Error> {
        let mut out = [0u8; 1 + OUTGOING_PACKET_BUFFER_SIZE];
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            // process everything that is ready, writing what the transport produced
            loop {
                let len = self.hci.lock(|hci| {
                    let mut hci = hci.borrow_mut();
                    Self::process(&mut hci);
                    let pending = hci.transport().io().pending_write();
                    match pending {
                        Some(data) => {
                            out[..data.len()].copy_from_slice(data);
                            data.len()
                        }
                        None => 0,
                    }
                });
                if len == 0 {
                    break;
                }
                trace!("[hci] serial write {} bytes", len);
                port.write_all(&out[..len]).await?;
                port.flush().await?;
                self.hci.lock(|hci| hci.borrow_mut().transport_mut().io_mut().write_done());
            }

            let (deadline, space) = self.hci.lock(|hci| {
                let hci = hci.borrow();
                let timers = hci.run_loop().next_deadline();
                let transport = hci.transport().next_deadline();
                let deadline = match (timers, transport) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                (deadline, hci.transport().io().rx_space())
            });
            let deadline = deadline.unwrap_or_else(|| Instant::now() + IDLE_WAKEUP);
            let n = space.clamp(1, READ_CHUNK);

            match select3(port.read(&mut chunk[..n]), Timer::at(deadline), self.wake.wait()).await {
                Either3::First(read) => {
                    let read = read?;
                    trace!("[hci] serial read {} bytes", read);
                    self.hci
                        .lock(|hci| hci.borrow_mut().transport_mut().io_mut().feed(&chunk[..read]));
                }
                Either3::Second(()) => {}
                Either3::Third(()) => {}
            }
        }
    }

    fn process(hci: &mut SerialHci<'d>) {
        while hci.poll() {}
        let now = hci.run_loop().now();
        while let Some(id) = hci.run_loop_mut().expired(now) {
            hci.handle_timeout(id);
            while hci.poll() {}
        }
    }
}
