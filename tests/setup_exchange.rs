//! Channel setup: the partition variant tag, partition payload, and both
//! job sizes must arrive on every client rank, reconstructing the client's
//! variant when it does not match the server's.

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
fn rcb_partition_reaches_every_client_rank() {
    let ranks = vec![0, 1, 2, 3];
    let cuts = vec![0.0, 0.5, 0.25, 0.75];

    let server_ranks = ranks.clone();
    let server_cuts = cuts.clone();
    let servers = spawn_job(2, move |tc| {
        let comm: Arc<dyn JobComm> = Arc::new(tc);
        let ptn = RcbPtn::new(1, server_ranks.clone(), server_cuts.clone());
        let rdv = Redev::server(MemoryEnv::new(), comm, ptn.into());
        let channel = rdv
            .create_channel("setup_rcb", params(), TransportType::Bp4, "")
            .expect("server channel");
        if let Channel::Stream(c) = &channel {
            assert_eq!(c.num_server_ranks(), 2);
            assert_eq!(c.num_client_ranks(), 3);
        } else {
            panic!("server must get a live channel");
        }
    });

    let clients = spawn_job(3, move |tc| {
        let comm: Arc<dyn JobComm> = Arc::new(tc);
        let rdv = Redev::client(MemoryEnv::new(), Some(comm));
        let channel = rdv
            .create_channel("setup_rcb", params(), TransportType::Bp4, "")
            .expect("client channel");
        if let Channel::Stream(c) = &channel {
            assert_eq!(c.num_server_ranks(), 2);
            assert_eq!(c.num_client_ranks(), 3);
        } else {
            panic!("client must get a live channel");
        }
        match &*rdv.partition() {
            Partition::Rcb(p) => {
                assert_eq!(p.ranks(), &vec![0, 1, 2, 3]);
                assert_eq!(p.cuts(), &vec![0.0, 0.5, 0.25, 0.75]);
            }
            Partition::Class(_) => panic!("client should hold the server's rcb partition"),
        };
    });

    join_all(servers);
    join_all(clients);
}

#[test]
fn class_partition_reconstructs_client_variant() {
    let servers = spawn_job(1, |tc| {
        let comm: Arc<dyn JobComm> = Arc::new(tc);
        let ranks = vec![0, 1, 2, 3];
        let ents = vec![
            ModelEnt::new(0, 0),
            ModelEnt::new(1, 0),
            ModelEnt::new(2, 0),
            ModelEnt::new(2, 1),
        ];
        let ptn = ClassPtn::from_local(comm.as_ref(), &ranks, &ents);
        let rdv = Redev::server(MemoryEnv::new(), comm, ptn.into());
        let _channel = rdv
            .create_channel("setup_class", params(), TransportType::Bp4, "")
            .expect("server channel");
    });

    let clients = spawn_job(2, |tc| {
        let comm: Arc<dyn JobComm> = Arc::new(tc);
        // the client starts with the wrong (rcb) variant on purpose
        let rdv = Redev::client(MemoryEnv::new(), Some(comm));
        let _channel = rdv
            .create_channel("setup_class", params(), TransportType::Bp4, "")
            .expect("client channel");
        match &*rdv.partition() {
            Partition::Class(p) => {
                assert_eq!(p.len(), 4);
                assert_eq!(p.get_rank(ModelEnt::new(0, 0)), 0);
                assert_eq!(p.get_rank(ModelEnt::new(1, 0)), 1);
                assert_eq!(p.get_rank(ModelEnt::new(2, 0)), 2);
                assert_eq!(p.get_rank(ModelEnt::new(2, 1)), 3);
            }
            Partition::Rcb(_) => panic!("client variant was not reconstructed"),
        };
    });

    join_all(servers);
    join_all(clients);
}
