//! One server serving two clients over two independently named channels,
//! with forward and reverse sends repeated over several rounds on layouts
//! negotiated in the first round.

use redev::prelude::*;
use redev::CommDataType;
use std::sync::Arc;
use std::thread;

const ROUNDS: usize = 2;

fn params() -> Params {
    [("Streaming", "On"), ("OpenTimeoutSecs", "8")]
        .into_iter()
        .collect()
}

fn client(id: LO) {
    let comm: Arc<dyn JobComm> = Arc::new(SerialComm);
    let rdv = Redev::client(MemoryEnv::new(), Some(comm.clone()));
    let name = format!("client{id}");
    let mut channel = rdv
        .create_channel(&name, params(), TransportType::Bp4, "")
        .expect("client channel");
    let mut pair = channel.create_comm::<LO>(&name, Some(comm));

    pair.set_out_message_layout(vec![0], vec![0, 1]);
    for round in 0..ROUNDS {
        channel
            .send_phase(|| pair.send(&[10 * (id + 1)], Mode::Deferred))
            .expect("client send");
        let msgs = channel
            .receive_phase(|| pair.recv(Mode::Deferred))
            .expect("client recv");
        assert_eq!(msgs, vec![100 * (id + 1)]);
        if round == 0 {
            let layout = pair.in_message_layout();
            assert_eq!(layout.offset, vec![0, 1]);
            assert_eq!(layout.src_ranks, vec![0]);
        }
    }
}

fn server() {
    let comm: Arc<dyn JobComm> = Arc::new(SerialComm);
    let ptn = RcbPtn::new(1, vec![0], vec![0.0]);
    let rdv = Redev::server(MemoryEnv::new(), comm.clone(), ptn.into());

    let mut channels = Vec::new();
    let mut pairs = Vec::new();
    for id in 0..2 {
        let name = format!("client{id}");
        let channel = rdv
            .create_channel(&name, params(), TransportType::Bp4, "")
            .expect("server channel");
        // exercise the runtime-typed factory on one of the two connections
        let pair = if id == 0 {
            match channel.create_comm_v(&name, Some(comm.clone()), CommDataType::I32) {
                redev::CommV::I32(pair) => pair,
                _ => panic!("requested an i32 communicator"),
            }
        } else {
            channel.create_comm::<LO>(&name, Some(comm.clone()))
        };
        channels.push(channel);
        pairs.push(pair);
    }

    for round in 0..ROUNDS {
        for id in 0..2 {
            let msgs = channels[id]
                .receive_phase(|| pairs[id].recv(Mode::Deferred))
                .expect("server recv");
            assert_eq!(msgs, vec![10 * (id as LO + 1)]);
            if round == 0 {
                pairs[id].set_out_message_layout(vec![0], vec![0, 1]);
            }
            channels[id]
                .send_phase(|| pairs[id].send(&[100 * (id as LO + 1)], Mode::Deferred))
                .expect("server send");
        }
    }
}

#[test]
fn two_clients_share_one_server() {
    let server = thread::spawn(server);
    let client0 = thread::spawn(move || client(0));
    let client1 = thread::spawn(move || client(1));
    server.join().expect("server job panicked");
    client0.join().expect("client 0 job panicked");
    client1.join().expect("client 1 job panicked");
}
