//! Many-to-many sends with scan-negotiated layouts: one client rank
//! scattering to two server ranks, and three client ranks redistributing
//! onto four server ranks with the exchanged metadata checked exactly.

use redev::prelude::*;
use std::sync::Arc;
use std::thread;

fn params() -> Params {
    [("Streaming", "On"), ("OpenTimeoutSecs", "8")]
        .into_iter()
        .collect()
}

fn spawn_job<F>(size: usize, f: F) -> Vec<thread::JoinHandle<()>>
where
    F: Fn(ThreadComm) + Send + Sync + Clone + 'static,
{
    ThreadComm::group(size)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            thread::spawn(move || f(comm))
        })
        .collect()
}

fn join_all(handles: Vec<thread::JoinHandle<()>>) {
    for handle in handles {
        handle.join().expect("job rank panicked");
    }
}

#[test]
fn one_client_scatters_to_two_servers() {
    let servers = spawn_job(2, |tc| {
        let comm: Arc<dyn JobComm> = Arc::new(tc);
        let ptn = RcbPtn::new(2, vec![0, 1], vec![0.0, 0.5]);
        let rdv = Redev::server(MemoryEnv::new(), comm.clone(), ptn.into());
        let mut channel = rdv
            .create_channel("one_to_two", params(), TransportType::Bp4, "")
            .expect("server channel");
        let mut pair = channel.create_comm::<LO>("one_to_two", Some(comm.clone()));

        let msgs = channel
            .receive_phase(|| pair.recv(Mode::Synchronous))
            .expect("server recv");
        match comm.rank() {
            0 => assert_eq!(msgs, vec![0, 0]),
            1 => assert_eq!(msgs, vec![1, 1, 1, 1]),
            _ => unreachable!(),
        }
        let layout = pair.in_message_layout();
        assert_eq!(layout.offset, vec![0, 2, 6]);
        assert_eq!(layout.src_ranks, vec![0, 0]);
    });

    let clients = spawn_job(1, |tc| {
        let comm: Arc<dyn JobComm> = Arc::new(tc);
        let rdv = Redev::client(MemoryEnv::new(), Some(comm.clone()));
        let mut channel = rdv
            .create_channel("one_to_two", params(), TransportType::Bp4, "")
            .expect("client channel");
        let mut pair = channel.create_comm::<LO>("one_to_two", Some(comm));

        pair.set_out_message_layout(vec![0, 1], vec![0, 2, 6]);
        channel
            .send_phase(|| pair.send(&[0, 0, 1, 1, 1, 1], Mode::Synchronous))
            .expect("client send");
    });

    join_all(servers);
    join_all(clients);
}

#[test]
fn three_clients_redistribute_to_four_servers() {
    let servers = spawn_job(4, |tc| {
        let comm: Arc<dyn JobComm> = Arc::new(tc);
        let ptn = RcbPtn::new(2, vec![0, 1, 2, 3], vec![0.0, 0.5, 0.75, 0.25]);
        let rdv = Redev::server(MemoryEnv::new(), comm.clone(), ptn.into());
        let mut channel = rdv
            .create_channel("three_to_four", params(), TransportType::Bp4, "")
            .expect("server channel");
        let mut pair = channel.create_comm::<LO>("three_to_four", Some(comm.clone()));

        let msgs = channel
            .receive_phase(|| pair.recv(Mode::Deferred))
            .expect("server recv");
        // the layout metadata must agree with the scan of the senders'
        // degrees: global segmentation and one start-offset row per sender
        let layout = pair.in_message_layout();
        assert_eq!(layout.offset, vec![0, 7, 11, 21, 27]);
        assert_eq!(
            layout.src_ranks,
            vec![0, 0, 0, 0, 2, 0, 4, 0, 3, 3, 8, 2]
        );
        assert_eq!(layout.start, layout.offset[comm.rank()] as usize);
        match comm.rank() {
            0 => assert_eq!(msgs, vec![0, 0, 1, 2, 2, 2, 2]),
            1 => assert_eq!(msgs, vec![1, 1, 1, 2]),
            2 => assert_eq!(msgs, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2]),
            3 => assert_eq!(msgs, vec![1, 1, 2, 2, 2, 2]),
            _ => unreachable!(),
        }
    });

    let clients = spawn_job(3, |tc| {
        let comm: Arc<dyn JobComm> = Arc::new(tc);
        let rdv = Redev::client(MemoryEnv::new(), Some(comm.clone()));
        let mut channel = rdv
            .create_channel("three_to_four", params(), TransportType::Bp4, "")
            .expect("client channel");
        let mut pair = channel.create_comm::<LO>("three_to_four", Some(comm.clone()));

        let rank = comm.rank();
        let (dest, offsets) = match rank {
            0 => (vec![0, 2], vec![0, 2, 6]),
            1 => (vec![0, 1, 2, 3], vec![0, 1, 4, 8, 10]),
            2 => (vec![0, 1, 2, 3], vec![0, 4, 5, 7, 11]),
            _ => unreachable!(),
        };
        let msgs = vec![rank as LO; *offsets.last().unwrap() as usize];
        pair.set_out_message_layout(dest, offsets);
        channel
            .send_phase(|| pair.send(&msgs, Mode::Deferred))
            .expect("client send");
    });

    join_all(servers);
    join_all(clients);
}
