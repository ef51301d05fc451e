use std::cell::RefCell;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_io_adapters::tokio_1::FromTokio;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::Duration;
use trouble_hci::command::opcodes;
use trouble_hci::h4::{H4Config, H4Transport};
use trouble_hci::run_loop::TimerList;
use trouble_hci::runner::{Runner, SerialBlockIo, SharedHci};
use trouble_hci::transport::TransportConfig;
use trouble_hci::{Hci, HciState, PowerMode};

mod common;
use common::{opcode, Controller};

/// Answers H4 commands like a controller would, recording their opcodes.
async fn simulate(mut port: DuplexStream, controller: Controller, received: &RefCell<Vec<u16>>) {
    loop {
        let mut header = [0u8; 4];
        if port.read_exact(&mut header).await.is_err() {
            return;
        }
        assert_eq!(header[0], 0x01, "only commands expected");
        let mut cmd = header[1..].to_vec();
        let mut params = vec![0u8; header[3] as usize];
        port.read_exact(&mut params).await.unwrap();
        cmd.extend_from_slice(&params);
        received.borrow_mut().push(opcode(&cmd));

        let mut reply = vec![0x04];
        reply.extend_from_slice(&controller.reply(&cmd));
        port.write_all(&reply).await.unwrap();
    }
}

async fn wait_for_state(hci: &SharedHci<'_>, state: HciState) {
    loop {
        if hci.lock(|hci| hci.borrow().state()) == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn runner_brings_up_controller_over_serial() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (host, device) = tokio::io::duplex(4096);
    let mut port = FromTokio::new(host);
    let received = RefCell::new(Vec::new());

    let hci: SharedHci<'_> = Mutex::new(RefCell::new(Hci::new(
        H4Transport::new(SerialBlockIo::new(), H4Config::default()),
        TimerList::new(),
        TransportConfig::default(),
    )));
    let wake = Signal::<NoopRawMutex, ()>::new();
    let runner = Runner::new(&hci, &wake);

    runner.with(|hci| hci.power_control(PowerMode::On)).unwrap();
    assert!(runner.with(|hci| hci.transport().io().is_open()));

    let result = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::select! {
            r = runner.run(&mut port) => panic!("runner stopped: {:?}", r),
            _ = simulate(device, Controller::default(), &received) => panic!("controller link closed"),
            _ = wait_for_state(&hci, HciState::Working) => {}
        }
    })
    .await;
    assert!(result.is_ok(), "controller never came up");

    let received = received.borrow();
    assert_eq!(received.first(), Some(&opcodes::RESET));
    assert_eq!(received.last(), Some(&opcodes::LE_SET_SCAN_PARAMETERS));
    assert_eq!(runner.with(|hci| hci.local_bd_addr()), common::local());
}
