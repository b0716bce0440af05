//! # redev
//!
//! redev couples independently launched parallel applications through the
//! rendezvous pattern: a **server** job holds a partition of the shared
//! domain that both sides agree on, and **client** jobs — with their own,
//! generally mismatched, partitions and disjoint rank sets — query that
//! partition to learn which server rank owns any piece of the domain, then
//! exchange field data with it over a stepped streaming transport.
//!
//! ## Features
//! - Two partition representations with one lifecycle contract
//!   (write/read/broadcast/query): geometric-model-entity ownership
//!   ([`ClassPtn`]) and recursive coordinate bisection ([`RcbPtn`])
//! - Channels with an explicit send/receive phase state machine and a
//!   setup handshake that distributes the partition and both job sizes
//! - Layout-aware typed communicators that negotiate the per-rank message
//!   layout on the first exchange and reuse it afterwards
//! - Pluggable seams for the job collectives (serial, in-process thread
//!   groups, MPI behind `mpi-support`) and for the streaming substrate
//!   (an in-process loopback broker ships with the crate)
//!
//! ## Usage
//! Add `redev` as a dependency and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! redev = "1.1"
//! # features = ["mpi-support"]
//! ```
//!
//! A server builds its partition and waits for a client; both sides then
//! drive alternating send and receive phases:
//!
//! ```no_run
//! use redev::prelude::*;
//! use std::sync::Arc;
//!
//! let comm: Arc<dyn JobComm> = Arc::new(SerialComm);
//! let ptn = RcbPtn::new(1, vec![0], vec![0.0]);
//! let rdv = Redev::server(MemoryEnv::new(), comm.clone(), ptn.into());
//! let params: Params = [("Streaming", "On"), ("OpenTimeoutSecs", "4")]
//!     .into_iter()
//!     .collect();
//! let mut channel = rdv
//!     .create_channel("fields", params, TransportType::Bp4, "")
//!     .unwrap();
//! let mut comm_pair = channel.create_comm::<f64>("fields", Some(comm));
//! let received = channel.receive_phase(|| comm_pair.recv(Mode::Deferred)).unwrap();
//! comm_pair.set_out_message_layout(vec![0], vec![0, received.len() as LO]);
//! channel.send_phase(|| comm_pair.send(&received, Mode::Deferred)).unwrap();
//! ```

pub mod assert;
pub mod channel;
pub mod comm;
pub mod communicator;
pub mod error;
pub mod partition;
pub mod profile;
pub mod scan;
pub mod stream;
pub mod types;
pub mod wire;

mod redev;

pub use crate::channel::{Channel, NoOpChannel, StreamChannel, build_identity};
pub use crate::communicator::{
    BidirectionalComm, CommDataType, CommV, Communicator, GlobalComm, InMessageLayout, NoOpComm,
    OutMessageLayout, StreamComm,
};
pub use crate::error::RedevError;
pub use crate::partition::{ClassPtn, ModelEnt, Partition, RcbPtn};
pub use crate::redev::Redev;
pub use crate::types::{CV, CVs, GO, GOs, LO, LOs, Mode, ProcessType, Real, Reals, TransportType};

/// The most-used traits and types in one import.
pub mod prelude {
    pub use crate::channel::Channel;
    pub use crate::comm::{JobComm, SerialComm, ThreadComm};
    pub use crate::communicator::{BidirectionalComm, Communicator, InMessageLayout};
    pub use crate::partition::{ClassPtn, ModelEnt, Partition, RcbPtn};
    pub use crate::redev::Redev;
    pub use crate::stream::{MemoryEnv, Params, StreamEnv};
    pub use crate::types::{GO, LO, Mode, ProcessType, Real, TransportType};
}
