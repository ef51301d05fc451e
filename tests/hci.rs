use trouble_hci::chipset::ScriptChipset;
use trouble_hci::command::{opcodes, Command};
use trouble_hci::connection::{AddressType, ConnectionState};
use trouble_hci::event::{EVENT_GAP_INQUIRY_RESULT, EVENT_NR_CONNECTIONS_CHANGED, EVENT_STATE};
use trouble_hci::run_loop::TimerId;
use trouble_hci::transport::{PacketType, TransportConfig};
use trouble_hci::{manufacturer, BdAddr, Error, HciState, PowerMode};

mod common;
use common::*;

const HANDLE: u16 = 0x0040;
const SCO_HANDLE: u16 = 0x0100;

const BCM_SCRIPT: &[&[u8]] = &[&[0x4c, 0xfc, 0x01, 0x00]];
const CSR_SCRIPT: &[&[u8]] = &[&[0x00, 0xfc, 0x01, 0x11], &[0x00, 0xfc, 0x01, 0x22]];

#[test]
fn power_on_runs_full_init_sequence() {
    let recorder = Recorder::default();
    let mut hci = stack();
    hci.add_event_handler(&recorder).unwrap();

    power_on(&mut hci, &Controller::default());

    assert_eq!(
        hci.transport().opcodes(),
        vec![
            opcodes::RESET,
            opcodes::READ_LOCAL_VERSION_INFORMATION,
            opcodes::READ_LOCAL_NAME,
            opcodes::READ_LOCAL_SUPPORTED_COMMANDS,
            opcodes::READ_BD_ADDR,
            opcodes::READ_BUFFER_SIZE,
            opcodes::READ_LOCAL_SUPPORTED_FEATURES,
            opcodes::SET_EVENT_MASK,
            opcodes::WRITE_SIMPLE_PAIRING_MODE,
            opcodes::WRITE_PAGE_TIMEOUT,
            opcodes::WRITE_DEFAULT_LINK_POLICY_SETTING,
            opcodes::WRITE_CLASS_OF_DEVICE,
            opcodes::WRITE_LOCAL_NAME,
            opcodes::WRITE_EXTENDED_INQUIRY_RESPONSE,
            opcodes::WRITE_INQUIRY_MODE,
            opcodes::WRITE_SECURE_CONNECTIONS_HOST_SUPPORT,
            opcodes::WRITE_SCAN_ENABLE,
            opcodes::LE_READ_BUFFER_SIZE,
            opcodes::WRITE_LE_HOST_SUPPORTED,
            opcodes::LE_SET_EVENT_MASK,
            opcodes::LE_READ_WHITE_LIST_SIZE,
            opcodes::LE_SET_SCAN_PARAMETERS,
        ]
    );

    let working: Vec<_> = recorder
        .with_code(EVENT_STATE)
        .into_iter()
        .filter(|e| e[2] == HciState::Working as u8)
        .collect();
    assert_eq!(working, vec![vec![EVENT_STATE, 1, 2]]);
    assert_eq!(hci.local_bd_addr(), local());
    assert_eq!(hci.manufacturer(), 0x0002);
    assert!(hci.le_supported());
    assert!(!hci.run_loop().is_armed(TimerId::Init));
    assert!(hci.transport().opened);
}

#[test]
fn init_skips_steps_the_controller_does_not_support() {
    let controller = Controller {
        read_buffer_size: false,
        le: false,
        ssp: false,
        secure_connections: false,
        ..Controller::default()
    };
    let mut hci = stack();
    power_on(&mut hci, &controller);

    let sent = hci.transport().opcodes();
    for skipped in [
        opcodes::READ_BUFFER_SIZE,
        opcodes::WRITE_SIMPLE_PAIRING_MODE,
        opcodes::WRITE_SECURE_CONNECTIONS_HOST_SUPPORT,
        opcodes::LE_READ_BUFFER_SIZE,
        opcodes::WRITE_LE_HOST_SUPPORTED,
        opcodes::LE_SET_EVENT_MASK,
    ] {
        assert!(!sent.contains(&skipped), "{:04x} should not be sent", skipped);
    }
    assert_eq!(sent.last(), Some(&opcodes::WRITE_SCAN_ENABLE));
    assert!(!hci.le_supported());
}

#[test]
fn unanswered_reset_is_resent() {
    let recorder = Recorder::default();
    let mut hci = stack();
    hci.add_event_handler(&recorder).unwrap();

    hci.power_control(PowerMode::On).unwrap();
    assert_eq!(hci.state(), HciState::Initializing);
    assert_eq!(hci.transport().opcodes(), vec![opcodes::RESET]);
    assert!(hci.run_loop().is_armed(TimerId::Init));

    hci.run_loop_mut().advance(2_000);
    hci.handle_timeout(TimerId::Init);
    assert_eq!(hci.transport().opcodes(), vec![opcodes::RESET, opcodes::RESET]);

    // both resets get answered, the late one must not derail init
    answer_commands(&mut hci, &Controller::default());
    assert_eq!(hci.state(), HciState::Working);
    let working = recorder
        .with_code(EVENT_STATE)
        .into_iter()
        .filter(|e| e[2] == HciState::Working as u8)
        .count();
    assert_eq!(working, 1);
}

#[test]
fn incoming_connection_is_accepted() {
    let recorder = Recorder::default();
    let controller = Controller::default();
    let mut hci = stack();
    hci.add_event_handler(&recorder).unwrap();
    power_on(&mut hci, &controller);
    recorder.clear();

    hci.handle_packet(PacketType::Event, &connection_request(&peer(), 1));
    let accept = hci.transport().commands().last().cloned().unwrap();
    assert_eq!(opcode(&accept), opcodes::ACCEPT_CONNECTION_REQUEST);
    assert_eq!(&accept[3..9], peer().raw());
    assert_eq!(
        hci.connections().for_address(&peer(), trouble_hci::connection::AddressType::Acl).unwrap().state(),
        ConnectionState::AcceptedConnectionRequest
    );

    answer_commands(&mut hci, &controller);
    hci.handle_packet(PacketType::Event, &connection_complete(0, HANDLE, &peer()));

    let conn = hci.connections().for_handle(HANDLE).unwrap();
    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(conn.address(), peer());
    assert_eq!(
        recorder.with_code(EVENT_NR_CONNECTIONS_CHANGED),
        vec![vec![EVENT_NR_CONNECTIONS_CHANGED, 1, 1]]
    );
    // remote features are requested once the link is up
    assert_eq!(
        hci.transport().opcodes().last(),
        Some(&opcodes::READ_REMOTE_SUPPORTED_FEATURES)
    );
}

#[test]
fn repeated_connection_request_reuses_the_connection() {
    let controller = Controller::default();
    let mut hci = stack();
    power_on(&mut hci, &controller);

    hci.handle_packet(PacketType::Event, &connection_request(&peer(), 1));
    hci.handle_packet(PacketType::Event, &connection_request(&peer(), 1));
    assert_eq!(hci.connections().len(), 1);

    let other = BdAddr::new([1, 1, 1, 1, 1, 1]);
    hci.handle_packet(PacketType::Event, &connection_request(&other, 1));
    assert_eq!(hci.connections().len(), 2);
}

#[test]
fn completed_packets_beyond_outstanding_are_clamped() {
    let controller = Controller::default();
    let mut hci = stack();
    power_on(&mut hci, &controller);
    accept_connection(&mut hci, &controller, &peer(), HANDLE);

    let packet = l2cap_packet(HANDLE, 16);
    hci.reserve_packet_buffer().unwrap();
    hci.packet_buffer_mut()[..packet.len()].copy_from_slice(&packet);
    hci.send_acl_packet_buffer(packet.len()).unwrap();
    assert_eq!(hci.connections().for_handle(HANDLE).unwrap().num_packets_sent(), 1);
    assert_eq!(hci.number_free_acl_slots_for_handle(HANDLE), 7);

    hci.handle_packet(PacketType::Event, &number_of_completed_packets(&[(HANDLE, 3)]));
    assert_eq!(hci.connections().for_handle(HANDLE).unwrap().num_packets_sent(), 0);
    assert_eq!(hci.number_free_acl_slots_for_handle(HANDLE), 8);
}

#[test]
fn disconnection_of_unknown_handle_changes_nothing() {
    let recorder = Recorder::default();
    let controller = Controller::default();
    let mut hci = stack();
    hci.add_event_handler(&recorder).unwrap();
    power_on(&mut hci, &controller);
    accept_connection(&mut hci, &controller, &peer(), HANDLE);
    recorder.clear();
    let sent = hci.transport().sent.len();

    hci.handle_packet(PacketType::Event, &disconnection_complete(0x0999, 0x13));

    assert_eq!(hci.connections().len(), 1);
    assert_eq!(hci.connections().for_handle(HANDLE).unwrap().state(), ConnectionState::Open);
    assert!(recorder.with_code(EVENT_NR_CONNECTIONS_CHANGED).is_empty());
    assert_eq!(hci.transport().sent.len(), sent);
}

#[test]
fn disconnect_is_sent_once() {
    let recorder = Recorder::default();
    let controller = Controller::default();
    let mut hci = stack();
    hci.add_event_handler(&recorder).unwrap();
    power_on(&mut hci, &controller);
    accept_connection(&mut hci, &controller, &peer(), HANDLE);
    recorder.clear();

    hci.disconnect(HANDLE).unwrap();
    let disconnect = hci.transport().commands().last().cloned().unwrap();
    assert_eq!(opcode(&disconnect), opcodes::DISCONNECT);
    assert_eq!(&disconnect[3..], &[0x40, 0x00, 0x13]);
    assert_eq!(
        hci.connections().for_handle(HANDLE).unwrap().state(),
        ConnectionState::SentDisconnect
    );

    hci.transport_mut().skip_unanswered();
    hci.handle_packet(PacketType::Event, &command_status(0, opcodes::DISCONNECT));
    hci.disconnect(HANDLE).unwrap();
    let disconnects = hci
        .transport()
        .opcodes()
        .into_iter()
        .filter(|op| *op == opcodes::DISCONNECT)
        .count();
    assert_eq!(disconnects, 1);

    hci.handle_packet(PacketType::Event, &disconnection_complete(HANDLE, 0x16));
    assert!(hci.connections().is_empty());

    // upper layers see the disconnection before the connection count drops
    let events = recorder.events.borrow();
    let codes: Vec<u8> = events
        .iter()
        .map(|e| e[0])
        .filter(|c| *c == 0x05 || *c == EVENT_NR_CONNECTIONS_CHANGED)
        .collect();
    assert_eq!(codes, vec![0x05, EVENT_NR_CONNECTIONS_CHANGED]);
    assert_eq!(events.last().unwrap(), &vec![EVENT_NR_CONNECTIONS_CHANGED, 1, 0]);
}

#[test]
fn large_packets_are_fragmented_and_reassembled() {
    let controller = Controller {
        acl_data_packet_length: 27,
        ..Controller::default()
    };
    let received = PacketRecorder::default();
    let mut hci = stack();
    hci.register_acl_packet_handler(&received);
    power_on(&mut hci, &controller);
    accept_connection(&mut hci, &controller, &peer(), HANDLE);
    assert_eq!(hci.max_acl_data_packet_length(), 27);

    let packet = l2cap_packet(HANDLE, 96);
    hci.reserve_packet_buffer().unwrap();
    hci.packet_buffer_mut()[..packet.len()].copy_from_slice(&packet);
    hci.send_acl_packet_buffer(packet.len()).unwrap();
    assert!(!hci.is_packet_buffer_reserved());

    let fragments = hci.transport().acl();
    assert_eq!(fragments.len(), 4);
    let lengths: Vec<usize> = fragments
        .iter()
        .map(|f| u16::from_le_bytes([f[2], f[3]]) as usize)
        .collect();
    assert_eq!(lengths, vec![27, 27, 27, 19]);
    let boundary_flags: Vec<u8> = fragments.iter().map(|f| (f[1] >> 4) & 0x03).collect();
    assert_eq!(boundary_flags, vec![2, 1, 1, 1]);
    for f in fragments.iter() {
        assert_eq!(u16::from_le_bytes([f[0], f[1]]) & 0x0fff, HANDLE);
        assert_eq!(f.len(), 4 + u16::from_le_bytes([f[2], f[3]]) as usize);
    }
    let payload: Vec<u8> = fragments.iter().flat_map(|f| f[4..].to_vec()).collect();
    assert_eq!(payload, packet[4..].to_vec());

    // the same fragments coming back are delivered as one packet
    for f in fragments.iter() {
        hci.handle_packet(PacketType::Acl, f);
    }
    let packets = received.packets.borrow();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].0, PacketType::Acl);
    assert_eq!(packets[0].1, packet);
}

#[test]
fn oversized_l2cap_frame_is_dropped() {
    let controller = Controller::default();
    let received = PacketRecorder::default();
    let mut hci = stack();
    hci.register_acl_packet_handler(&received);
    power_on(&mut hci, &controller);
    accept_connection(&mut hci, &controller, &peer(), HANDLE);

    // first fragment announcing a frame no reassembly buffer can hold
    let mut first = l2cap_packet(HANDLE, 8);
    first[4..6].copy_from_slice(&0xffffu16.to_le_bytes());
    hci.handle_packet(PacketType::Acl, &first);
    let mut next = l2cap_packet(HANDLE, 8);
    next[1] = (next[1] & 0x0f) | 0x10;
    hci.handle_packet(PacketType::Acl, &next);
    assert!(received.packets.borrow().is_empty());

    // the connection keeps working
    let packet = l2cap_packet(HANDLE, 8);
    hci.handle_packet(PacketType::Acl, &packet);
    let packets = received.packets.borrow();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].1, packet);
}

#[test]
fn inquiry_results_are_exploded_per_device() {
    let recorder = Recorder::default();
    let controller = Controller::default();
    let mut hci = stack();
    hci.add_event_handler(&recorder).unwrap();
    power_on(&mut hci, &controller);

    hci.inquiry_start(8).unwrap();
    assert_eq!(hci.transport().opcodes().last(), Some(&opcodes::INQUIRY));

    let second = BdAddr::new([1, 2, 3, 4, 5, 6]);
    hci.handle_packet(
        PacketType::Event,
        &inquiry_result(&[(peer(), [0x0c, 0x02, 0x5a], 0x1234), (second, [0x04, 0x04, 0x20], 0x0042)]),
    );

    let results = recorder.with_code(EVENT_GAP_INQUIRY_RESULT);
    assert_eq!(results.len(), 2);
    let mut expected = vec![EVENT_GAP_INQUIRY_RESULT, 16];
    expected.extend_from_slice(peer().raw());
    expected.extend_from_slice(&[1, 0x0c, 0x02, 0x5a, 0x34, 0x12, 0, 0, 0, 0]);
    assert_eq!(results[0], expected);
    assert_eq!(&results[1][2..8], second.raw());
    assert_eq!(&results[1][9..12], &[0x04, 0x04, 0x20]);
}

#[test]
fn power_off_closes_the_transport() {
    let controller = Controller::default();
    let mut hci = stack();
    power_on(&mut hci, &controller);

    hci.power_control(PowerMode::Off).unwrap();
    assert_eq!(hci.state(), HciState::Off);
    assert!(!hci.transport().opened);
}

#[test]
fn sco_init_steps_follow_supported_commands() {
    let controller = Controller {
        manufacturer: manufacturer::BROADCOM,
        sco_flow_control: true,
        erroneous_data_reporting: true,
        ..Controller::default()
    };
    let mut hci = stack();
    power_on(&mut hci, &controller);

    let sent = hci.transport().opcodes();
    let scan = sent.iter().position(|op| *op == opcodes::WRITE_SCAN_ENABLE).unwrap();
    assert_eq!(
        sent[scan + 1..scan + 5],
        [
            opcodes::WRITE_SYNCHRONOUS_FLOW_CONTROL_ENABLE,
            opcodes::WRITE_DEFAULT_ERRONEOUS_DATA_REPORTING,
            opcodes::BCM_WRITE_SCO_PCM_INT,
            opcodes::LE_READ_BUFFER_SIZE,
        ]
    );
    let routing = hci
        .transport()
        .commands()
        .into_iter()
        .find(|c| opcode(c) == opcodes::BCM_WRITE_SCO_PCM_INT)
        .unwrap();
    assert_eq!(&routing[2..], &[5, 1, 0, 0, 0, 0]);

    // classic only, flow control alone
    let controller = Controller {
        le: false,
        sco_flow_control: true,
        ..Controller::default()
    };
    let mut hci = stack();
    power_on(&mut hci, &controller);
    let sent = hci.transport().opcodes();
    assert_eq!(
        sent[sent.len() - 2..],
        [opcodes::WRITE_SCAN_ENABLE, opcodes::WRITE_SYNCHRONOUS_FLOW_CONTROL_ENABLE]
    );
    assert!(!sent.contains(&opcodes::WRITE_DEFAULT_ERRONEOUS_DATA_REPORTING));
    assert!(!sent.contains(&opcodes::BCM_WRITE_SCO_PCM_INT));
}

#[test]
fn sco_packets_use_explicit_flow_control() {
    let controller = Controller {
        sco_flow_control: true,
        ..Controller::default()
    };
    let received = PacketRecorder::default();
    let mut hci = stack();
    hci.register_sco_packet_handler(&received);
    power_on(&mut hci, &controller);

    hci.handle_packet(
        PacketType::Event,
        &synchronous_connection_complete(0, SCO_HANDLE, &peer()),
    );
    let conn = hci.connections().for_handle(SCO_HANDLE).unwrap();
    assert_eq!(conn.address_type(), AddressType::Sco);
    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(hci.number_free_sco_slots(), 4);

    let packet = [0x00, 0x01, 3, 0xa1, 0xa2, 0xa3];
    hci.reserve_packet_buffer().unwrap();
    hci.packet_buffer_mut()[..packet.len()].copy_from_slice(&packet);
    hci.send_sco_packet_buffer(packet.len()).unwrap();
    assert!(!hci.is_packet_buffer_reserved());
    assert_eq!(hci.transport().sent.last().unwrap(), &(PacketType::Sco, packet.to_vec()));
    assert_eq!(hci.number_free_sco_slots(), 3);

    hci.handle_packet(PacketType::Event, &number_of_completed_packets(&[(SCO_HANDLE, 1)]));
    assert_eq!(hci.number_free_sco_slots(), 4);

    let incoming = [0x00, 0x01, 3, 0x01, 0x02, 0x03];
    hci.handle_packet(PacketType::Sco, &incoming);
    // packets for unknown handles are dropped
    hci.handle_packet(PacketType::Sco, &[0x07, 0x02, 1, 0xff]);
    assert_eq!(*received.packets.borrow(), vec![(PacketType::Sco, incoming.to_vec())]);
}

#[test]
fn outgoing_connection_is_created_once_per_address() {
    let recorder = Recorder::default();
    let controller = Controller::default();
    let mut hci = stack();
    hci.add_event_handler(&recorder).unwrap();
    power_on(&mut hci, &controller);

    let create = Command::CreateConnection {
        addr: peer(),
        packet_types: 0xcc18,
        page_scan_repetition_mode: 0,
        clock_offset: 0,
        allow_role_switch: 1,
    };
    hci.send_cmd(&create).unwrap();
    assert_eq!(hci.connections().len(), 1);
    assert_eq!(
        hci.connections().for_address(&peer(), AddressType::Acl).unwrap().state(),
        ConnectionState::SentCreateConnection
    );
    hci.transport_mut().skip_unanswered();
    hci.handle_packet(PacketType::Event, &command_status(0, opcodes::CREATE_CONNECTION));

    // still in progress, nothing is sent
    hci.send_cmd(&create).unwrap();
    let creates = |hci: &TestHci<'_>| {
        hci.transport()
            .opcodes()
            .into_iter()
            .filter(|op| *op == opcodes::CREATE_CONNECTION)
            .count()
    };
    assert_eq!(creates(&hci), 1);
    assert_eq!(hci.connections().len(), 1);

    hci.handle_packet(PacketType::Event, &connection_complete(0, HANDLE, &peer()));
    answer_commands(&mut hci, &controller);
    assert_eq!(hci.connections().for_handle(HANDLE).unwrap().state(), ConnectionState::Open);
    recorder.clear();

    // already connected, reported right away
    hci.send_cmd(&create).unwrap();
    assert_eq!(creates(&hci), 1);
    assert_eq!(hci.connections().len(), 1);
    let mut expected = vec![0x03, 11, 0x00, 0x40, 0x00];
    expected.extend_from_slice(peer().raw());
    expected.extend_from_slice(&[0x01, 0x00]);
    assert_eq!(recorder.with_code(0x03), vec![expected]);
}

#[test]
fn le_connect_and_cancel() {
    let controller = Controller::default();
    let mut hci = stack();
    power_on(&mut hci, &controller);

    hci.le_connect(peer(), AddressType::LePublic).unwrap();
    let create = hci.transport().commands().last().cloned().unwrap();
    assert_eq!(opcode(&create), opcodes::LE_CREATE_CONNECTION);
    // direct connection to the given peer
    assert_eq!(create[7], 0);
    assert_eq!(create[8], AddressType::LePublic as u8);
    assert_eq!(&create[9..15], peer().raw());

    assert_eq!(hci.le_connect(peer(), AddressType::LePublic), Err(Error::CommandDisallowed));
    assert_eq!(hci.connections().len(), 1);

    hci.connect_cancel().unwrap();
    assert_eq!(
        hci.connections().for_address(&peer(), AddressType::LePublic).unwrap().state(),
        ConnectionState::SendCancelConnection
    );
    hci.transport_mut().skip_unanswered();
    hci.handle_packet(PacketType::Event, &command_status(0, opcodes::LE_CREATE_CONNECTION));
    assert_eq!(
        hci.transport().opcodes().last(),
        Some(&opcodes::LE_CREATE_CONNECTION_CANCEL)
    );
    answer_commands(&mut hci, &controller);

    // the controller reports the cancelled attempt
    hci.handle_packet(PacketType::Event, &le_connection_complete(0x02, 0, 0, &peer()));
    assert!(hci.connections().is_empty());

    // a second attempt goes through
    hci.le_connect(peer(), AddressType::LePublic).unwrap();
    answer_commands(&mut hci, &controller);
    hci.handle_packet(PacketType::Event, &le_connection_complete(0, HANDLE, 0, &peer()));
    let conn = hci.connections().for_handle(HANDLE).unwrap();
    assert_eq!(conn.state(), ConnectionState::Open);
    assert!(conn.is_le());
    assert_eq!(hci.le_connection_interval(HANDLE), 0x18);
}

#[test]
fn auto_connection_syncs_the_whitelist() {
    let controller = Controller::default();
    let mut hci = stack();
    power_on(&mut hci, &controller);
    let start = hci.transport().commands().len();

    hci.auto_connection_start(AddressType::LePublic, peer()).unwrap();
    answer_commands(&mut hci, &controller);
    hci.auto_connection_stop(AddressType::LePublic, peer()).unwrap();
    answer_commands(&mut hci, &controller);

    let commands = hci.transport().commands()[start..].to_vec();
    let ops: Vec<u16> = commands.iter().map(|c| opcode(c)).collect();
    assert_eq!(
        ops,
        vec![
            opcodes::LE_ADD_DEVICE_TO_WHITE_LIST,
            opcodes::LE_CREATE_CONNECTION,
            opcodes::LE_CREATE_CONNECTION_CANCEL,
            opcodes::LE_REMOVE_DEVICE_FROM_WHITE_LIST,
        ]
    );
    assert_eq!(commands[0][3], AddressType::LePublic as u8);
    assert_eq!(&commands[0][4..10], peer().raw());
    // connect to whatever is on the whitelist
    assert_eq!(commands[1][7], 1);
    assert_eq!(&commands[3][4..10], peer().raw());
}

#[test]
fn auto_connection_needs_controller_whitelist() {
    let controller = Controller::default();
    let mut hci = stack();
    // the whitelist size is only known after init
    assert_eq!(
        hci.auto_connection_start(AddressType::LePublic, peer()),
        Err(Error::MemoryCapacityExceeded)
    );

    power_on(&mut hci, &controller);
    hci.auto_connection_start(AddressType::LePublic, peer()).unwrap();
}

#[test]
fn sleep_disconnects_and_wakes_up_again() {
    let recorder = Recorder::default();
    let mut power = PowerLog::default();
    let controller = Controller::default();
    let mut hci = stack();
    hci.add_event_handler(&recorder).unwrap();
    hci.set_control(&mut power);
    power_on(&mut hci, &controller);
    accept_connection(&mut hci, &controller, &peer(), HANDLE);
    recorder.clear();

    hci.power_control(PowerMode::Sleep).unwrap();
    assert_eq!(hci.state(), HciState::FallingAsleep);
    let disconnect = hci.transport().commands().last().cloned().unwrap();
    assert_eq!(opcode(&disconnect), opcodes::DISCONNECT);
    assert_eq!(&disconnect[3..], &[0x40, 0x00, 0x13]);
    assert!(hci.connections().is_empty());
    assert_eq!(recorder.with_code(0x05), vec![vec![0x05, 4, 0, 0x40, 0x00, 0x16]]);

    answer_commands(&mut hci, &controller);
    // inquiry scan off, page scan as configured
    let scan = hci.transport().commands().last().cloned().unwrap();
    assert_eq!(opcode(&scan), opcodes::WRITE_SCAN_ENABLE);
    assert_eq!(scan[3] & 0x01, 0);
    assert_eq!(hci.state(), HciState::Sleeping);

    hci.power_control(PowerMode::On).unwrap();
    assert_eq!(hci.transport().opcodes().last(), Some(&opcodes::RESET));
    answer_commands(&mut hci, &controller);
    assert_eq!(hci.state(), HciState::Working);

    let states: Vec<u8> = recorder.with_code(EVENT_STATE).iter().map(|e| e[2]).collect();
    assert_eq!(
        states,
        vec![
            HciState::FallingAsleep as u8,
            HciState::Sleeping as u8,
            HciState::Initializing as u8,
            HciState::Working as u8,
        ]
    );
    drop(hci);
    assert_eq!(power.calls, vec!["on", "sleep", "wake"]);
}

#[test]
fn halting_reports_open_connections_as_closed() {
    let recorder = Recorder::default();
    let controller = Controller::default();
    let mut hci = stack();
    hci.add_event_handler(&recorder).unwrap();
    power_on(&mut hci, &controller);
    accept_connection(&mut hci, &controller, &peer(), HANDLE);
    recorder.clear();

    hci.power_control(PowerMode::Off).unwrap();
    assert_eq!(hci.state(), HciState::Halting);
    assert_eq!(hci.transport().opcodes().last(), Some(&opcodes::DISCONNECT));
    assert!(hci.connections().is_empty());

    // the synthetic disconnection comes before the connection count drops
    let events = recorder.events.borrow().clone();
    let disconnection = events.iter().position(|e| e[0] == 0x05).unwrap();
    let count = events.iter().position(|e| e[0] == EVENT_NR_CONNECTIONS_CHANGED).unwrap();
    assert!(disconnection < count);
    assert_eq!(events[disconnection], vec![0x05, 4, 0, 0x40, 0x00, 0x16]);
    assert_eq!(events[count], vec![EVENT_NR_CONNECTIONS_CHANGED, 1, 0]);

    hci.transport_mut().skip_unanswered();
    hci.handle_packet(PacketType::Event, &command_status(0, opcodes::DISCONNECT));
    assert_eq!(hci.state(), HciState::Off);
    assert!(!hci.transport().opened);
    assert!(!hci.run_loop().is_armed(TimerId::Halting));
}

#[test]
fn deferred_halting_waits_before_closing() {
    let recorder = Recorder::default();
    let controller = Controller::default();
    let mut hci = stack();
    hci.add_event_handler(&recorder).unwrap();
    power_on(&mut hci, &controller);
    accept_connection(&mut hci, &controller, &peer(), HANDLE);
    recorder.clear();

    hci.power_control(PowerMode::Off).unwrap();
    hci.halting_defer();
    hci.transport_mut().skip_unanswered();
    hci.handle_packet(PacketType::Event, &command_status(0, opcodes::DISCONNECT));
    assert_eq!(hci.state(), HciState::Halting);
    assert!(hci.run_loop().is_armed(TimerId::Halting));
    assert!(hci.transport().opened);

    hci.run_loop_mut().advance(50);
    hci.handle_timeout(TimerId::Halting);
    assert_eq!(hci.state(), HciState::Off);
    assert!(!hci.transport().opened);

    let states: Vec<u8> = recorder.with_code(EVENT_STATE).iter().map(|e| e[2]).collect();
    assert_eq!(
        states,
        vec![HciState::Halting as u8, HciState::Halting as u8, HciState::Off as u8]
    );
}

#[test]
fn failing_power_off_still_halts() {
    let mut power = PowerLog {
        fail_off: true,
        ..PowerLog::default()
    };
    let mut hci = stack();
    hci.set_control(&mut power);
    power_on(&mut hci, &Controller::default());

    hci.power_control(PowerMode::Off).unwrap();
    assert_eq!(hci.state(), HciState::Off);
    assert!(!hci.transport().opened);
    drop(hci);
    assert_eq!(power.calls, vec!["on", "off"]);
}

#[test]
fn broadcom_script_settles_and_caps_the_baud_rate() {
    let controller = Controller {
        manufacturer: manufacturer::BROADCOM,
        ..Controller::default()
    };
    let mut chipset = VendorChipset::new(ScriptChipset::new("bcm", BCM_SCRIPT));
    chipset.baudrate_command = true;
    let mut hci = stack_with(TransportConfig {
        baudrate_main: 4_000_000,
        ..TransportConfig::default()
    });
    hci.set_chipset(&mut chipset);

    hci.power_control(PowerMode::On).unwrap();
    answer_commands(&mut hci, &controller);
    assert_eq!(
        hci.transport().opcodes(),
        vec![
            opcodes::RESET,
            opcodes::READ_LOCAL_VERSION_INFORMATION,
            opcodes::READ_LOCAL_NAME,
            VENDOR_SET_BAUDRATE,
            0xfc4c,
        ]
    );
    let commands = hci.transport().commands();
    assert_eq!(&commands[3][3..7], &3_000_000u32.to_le_bytes());
    // the script leaves the controller at its initial rate
    assert_eq!(hci.transport().baudrates, vec![3_000_000, 115_200]);
    assert_eq!(hci.state(), HciState::Initializing);
    assert!(hci.run_loop().is_armed(TimerId::Init));

    hci.run_loop_mut().advance(300);
    hci.handle_timeout(TimerId::Init);
    answer_commands(&mut hci, &controller);
    assert_eq!(hci.state(), HciState::Working);

    let sent = hci.transport().opcodes();
    assert_eq!(
        sent[5..8],
        [
            opcodes::READ_LOCAL_SUPPORTED_COMMANDS,
            VENDOR_SET_BAUDRATE,
            opcodes::READ_BD_ADDR,
        ]
    );
    assert_eq!(hci.transport().baudrates, vec![3_000_000, 115_200, 3_000_000]);
    assert!(sent.contains(&opcodes::BCM_WRITE_SCO_PCM_INT));
}

#[test]
fn csr_warm_boot_resets_the_link() {
    let controller = Controller {
        manufacturer: manufacturer::CAMBRIDGE_SILICON_RADIO,
        ..Controller::default()
    };
    let mut chipset = VendorChipset::new(ScriptChipset::new("csr", CSR_SCRIPT).with_warmstart(1));
    let mut hci = stack();
    hci.set_chipset(&mut chipset);

    hci.power_control(PowerMode::On).unwrap();
    // the controller reboots after the last script command without answering it
    while let Some(cmd) = hci.transport_mut().next_unanswered() {
        if cmd == CSR_SCRIPT[1] {
            continue;
        }
        let reply = controller.reply(&cmd);
        hci.handle_packet(PacketType::Event, &reply);
    }
    assert_eq!(hci.state(), HciState::Initializing);
    assert!(hci.run_loop().is_armed(TimerId::Init));
    assert_eq!(hci.transport().link_resets, 0);

    hci.run_loop_mut().advance(2_000);
    hci.handle_timeout(TimerId::Init);
    assert_eq!(hci.transport().link_resets, 1);
    assert_eq!(hci.transport().opcodes().last(), Some(&opcodes::RESET));

    answer_commands(&mut hci, &controller);
    assert_eq!(hci.state(), HciState::Working);
    let commands = hci.transport().commands();
    assert_eq!(commands[3], CSR_SCRIPT[0]);
    assert_eq!(commands[4], CSR_SCRIPT[1]);
    assert_eq!(opcode(&commands[5]), opcodes::RESET);
    assert_eq!(opcode(&commands[6]), opcodes::READ_LOCAL_SUPPORTED_COMMANDS);
    assert_eq!(commands.iter().filter(|c| c[0] == 0x00 && c[1] == 0xfc).count(), 2);
}

#[test]
fn new_public_address_needs_reset_on_st_and_atmel() {
    let custom = BdAddr::new([0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
    for (id, reset) in [
        (manufacturer::ST_MICROELECTRONICS, true),
        (manufacturer::ATMEL, true),
        (0x0002, false),
    ] {
        let controller = Controller {
            manufacturer: id,
            ..Controller::default()
        };
        let mut chipset = VendorChipset::new(ScriptChipset::new("none", &[]));
        chipset.bd_addr_command = true;
        let mut hci = stack();
        hci.set_chipset(&mut chipset);
        hci.set_bd_addr(custom);
        power_on(&mut hci, &controller);

        let commands = hci.transport().commands();
        let set = commands
            .iter()
            .position(|c| opcode(c) == VENDOR_SET_BD_ADDR)
            .unwrap();
        assert_eq!(&commands[set][3..9], custom.raw());
        assert_eq!(opcode(&commands[set - 1]), opcodes::READ_LOCAL_SUPPORTED_COMMANDS);
        let after: Vec<u16> = commands[set + 1..set + 3].iter().map(|c| opcode(c)).collect();
        if reset {
            assert_eq!(after, vec![opcodes::RESET, opcodes::READ_BD_ADDR], "manufacturer {:04x}", id);
        } else {
            assert_eq!(after[0], opcodes::READ_BD_ADDR, "manufacturer {:04x}", id);
        }
    }
}

/// An ACL packet carrying an L2CAP frame with `len` bytes of payload.
fn l2cap_packet(handle: u16, len: usize) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&(handle | 0x2000).to_le_bytes());
    packet.extend_from_slice(&((len + 4) as u16).to_le_bytes());
    packet.extend_from_slice(&(len as u16).to_le_bytes());
    packet.extend_from_slice(&0x0040u16.to_le_bytes());
    packet.extend((0..len).map(|i| i as u8));
    packet
}
