//! Standalone-server and non-participating-rank behavior, plus the phase
//! state machine's fatal misuse paths.

use redev::prelude::*;
use redev::ProcessType;
use std::sync::Arc;

fn params() -> Params {
    [("Streaming", "On"), ("OpenTimeoutSecs", "4")]
        .into_iter()
        .collect()
}

fn standalone_server(name: &str, transport: TransportType) -> (Redev<MemoryEnv>, Channel<redev::stream::MemoryIo>) {
    let comm: Arc<dyn JobComm> = Arc::new(SerialComm);
    let ptn = RcbPtn::new(1, vec![0], vec![0.0]);
    let rdv = Redev::new(
        MemoryEnv::new(),
        Some(comm),
        ptn.into(),
        ProcessType::Server,
        true,
    );
    let channel = rdv
        .create_channel(name, params(), transport, "")
        .expect("standalone channel");
    (rdv, channel)
}

#[test]
fn server_without_clients_constructs_and_sends() {
    let (_rdv, mut channel) = standalone_server("no_clients_bp4", TransportType::Bp4);
    if let Channel::Stream(c) = &channel {
        assert_eq!(c.num_client_ranks(), 0);
        assert_eq!(c.num_server_ranks(), 1);
    } else {
        panic!("participating server must get a live channel");
    }
    // the send direction works; there is just nobody reading
    channel.begin_send_communication_phase();
    assert!(channel.in_send_communication_phase());
    channel.end_send_communication_phase();
    assert!(!channel.in_send_communication_phase());
}

#[test]
fn sst_without_clients_downgrades_to_buffered() {
    // with SST this open would rendezvous-block forever; the downgrade to
    // the buffered transport must make it return
    let (_rdv, channel) = standalone_server("no_clients_sst", TransportType::Sst);
    assert!(matches!(channel, Channel::Stream(_)));
}

#[test]
fn no_clients_comm_receiver_is_a_no_op() {
    let comm: Arc<dyn JobComm> = Arc::new(SerialComm);
    let (_rdv, channel) = standalone_server("no_clients_comm", TransportType::Bp4);
    let mut pair = channel.create_comm::<LO>("no_clients_comm", Some(comm));
    assert_eq!(pair.recv(Mode::Deferred).expect("noop recv"), Vec::<LO>::new());
}

#[test]
fn non_participating_rank_gets_no_op_channel() {
    let rdv = Redev::client(MemoryEnv::new(), None);
    assert!(!rdv.rank_participates());
    assert_eq!(rdv.rank(), -1);

    let mut channel = rdv
        .create_channel("non_participant", params(), TransportType::Bp4, "")
        .expect("no-op channel");
    assert!(matches!(channel, Channel::NoOp(_)));

    let mut pair = channel.create_comm::<Real>("non_participant", None);
    pair.set_out_message_layout(vec![0], vec![0, 2]);
    let sent = channel.send_phase(|| pair.send(&[1.0, 2.0], Mode::Deferred));
    sent.expect("noop send");
    let msgs = channel.receive_phase(|| pair.recv(Mode::Deferred));
    assert_eq!(msgs.expect("noop recv"), Vec::<Real>::new());
    assert!(!channel.in_send_communication_phase());
    assert!(!channel.in_receive_communication_phase());
}

#[test]
#[should_panic(expected = "!self.in_send_communication_phase()")]
fn double_begin_send_is_fatal() {
    let (_rdv, mut channel) = standalone_server("phase_double_begin", TransportType::Bp4);
    channel.begin_send_communication_phase();
    channel.begin_send_communication_phase();
}

#[test]
#[should_panic(expected = "self.in_send_communication_phase()")]
fn end_send_without_begin_is_fatal() {
    let (_rdv, mut channel) = standalone_server("phase_end_without_begin", TransportType::Bp4);
    channel.end_send_communication_phase();
}
