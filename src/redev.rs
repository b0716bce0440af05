//! The Redev façade.
//!
//! A [`Redev`] instance ties together the substrate environment, the job
//! communicator, the process role, and the partition. The server passes
//! the rendezvous partition it built; clients pass an empty one and
//! receive the server's during channel setup. One instance can serve
//! multiple clients by creating one channel per connection name.

use crate::always_assert;
use crate::channel::{Channel, NoOpChannel, StreamChannel};
use crate::comm::JobComm;
use crate::error::RedevError;
use crate::partition::Partition;
use crate::stream::{Params, StreamEnv};
use crate::types::{LO, ProcessType, TransportType};
use std::sync::{Arc, RwLock, RwLockReadGuard};

pub struct Redev<E: StreamEnv> {
    env: E,
    comm: Option<Arc<dyn JobComm>>,
    process_type: ProcessType,
    no_clients: bool,
    rank: LO,
    partition: Arc<RwLock<Partition>>,
}

impl<E: StreamEnv> Redev<E> {
    /// Create a Redev instance.
    ///
    /// `comm` is the communicator of the ranks participating in the
    /// coupling; a client rank outside the coupled computation passes
    /// `None` and gets no-op channels. Servers must participate and must
    /// hold a non-empty partition; clients pass an empty partition of
    /// either variant (it is replaced during channel setup if the variant
    /// does not match the server's). `no_clients` supports standalone
    /// server testing.
    pub fn new(
        env: E,
        comm: Option<Arc<dyn JobComm>>,
        partition: Partition,
        process_type: ProcessType,
        no_clients: bool,
    ) -> Self {
        if process_type == ProcessType::Server {
            always_assert!(comm.is_some(), "a server rank must participate");
            always_assert!(!partition.is_empty(), "a server needs a populated partition");
        }
        let rank = comm.as_ref().map_or(-1, |c| c.rank() as LO);
        Self {
            env,
            comm,
            process_type,
            no_clients,
            rank,
            partition: Arc::new(RwLock::new(partition)),
        }
    }

    /// Convenience server constructor.
    pub fn server(env: E, comm: Arc<dyn JobComm>, partition: Partition) -> Self {
        Self::new(env, Some(comm), partition, ProcessType::Server, false)
    }

    /// Convenience client constructor; the partition arrives from the
    /// server during channel setup.
    pub fn client(env: E, comm: Option<Arc<dyn JobComm>>) -> Self {
        Self::new(
            env,
            comm,
            Partition::Rcb(Default::default()),
            ProcessType::Client,
            false,
        )
    }

    /// Create the named channel to the peer job.
    ///
    /// Returns a no-op channel on non-participating ranks. `path` prefixes
    /// the stream names (pass `""` for the working directory).
    pub fn create_channel(
        &self,
        name: &str,
        params: Params,
        transport: TransportType,
        path: &str,
    ) -> Result<Channel<E::Io>, RedevError> {
        match &self.comm {
            None => Ok(Channel::NoOp(NoOpChannel)),
            Some(comm) => Ok(Channel::Stream(StreamChannel::new(
                &self.env,
                comm.clone(),
                name,
                params,
                transport,
                self.process_type,
                self.partition.clone(),
                path,
                self.no_clients,
            )?)),
        }
    }

    pub fn process_type(&self) -> ProcessType {
        self.process_type
    }

    /// True when this rank takes part in the coupled computation.
    pub fn rank_participates(&self) -> bool {
        self.comm.is_some()
    }

    /// This rank's index in the participant communicator, or -1 when not
    /// participating.
    pub fn rank(&self) -> LO {
        self.rank
    }

    /// Read access to the partition (populated on clients once a channel
    /// has completed setup).
    pub fn partition(&self) -> RwLockReadGuard<'_, Partition> {
        self.partition.read().expect("partition poisoned")
    }
}
