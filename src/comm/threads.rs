//! In-process rank groups.
//!
//! A [`ThreadComm`] group binds N threads of one process into a job: each
//! thread takes one handle and the handles execute the [`JobComm`]
//! collectives against shared state. Every collective is phrased as an
//! allgather of byte blobs over an epoch barrier; the reduction or
//! selection then runs locally on each rank, which keeps the shared state
//! tiny and the protocol identical for all five operations.
//!
//! This backend exists for the integration tests (a server job and a client
//! job as two thread groups in one process) and for single-process coupling
//! experiments. It is not a performance path.

use super::JobComm;
use crate::types::{GO, LO};
use std::sync::{Arc, Condvar, Mutex};

struct Round {
    slots: Vec<Option<Vec<u8>>>,
    arrived: usize,
    departed: usize,
    epoch: u64,
    /// True from the moment all ranks have deposited until all have read.
    draining: bool,
}

struct Shared {
    size: usize,
    round: Mutex<Round>,
    cv: Condvar,
}

/// One rank's handle into an in-process job.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Create a job of `size` ranks; hand one element to each thread.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "a job needs at least one rank");
        let shared = Arc::new(Shared {
            size,
            round: Mutex::new(Round {
                slots: vec![None; size],
                arrived: 0,
                departed: 0,
                epoch: 0,
                draining: false,
            }),
            cv: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                shared: shared.clone(),
            })
            .collect()
    }

    /// Deposit `bytes` and return every rank's deposit in rank order.
    ///
    /// Two-phase epoch barrier: the round's slots become readable when the
    /// last rank arrives and are recycled when the last rank departs, so a
    /// fast rank re-entering for the next collective cannot clobber a slot
    /// a slow rank has not read yet.
    fn allgather_bytes(&self, bytes: Vec<u8>) -> Vec<Vec<u8>> {
        let mut round = self.shared.round.lock().expect("comm round poisoned");
        while round.draining {
            round = self.shared.cv.wait(round).expect("comm round poisoned");
        }
        round.slots[self.rank] = Some(bytes);
        round.arrived += 1;
        if round.arrived == self.shared.size {
            round.draining = true;
            round.epoch += 1;
            self.shared.cv.notify_all();
        } else {
            let epoch = round.epoch;
            while round.epoch == epoch {
                round = self.shared.cv.wait(round).expect("comm round poisoned");
            }
        }
        let gathered: Vec<Vec<u8>> = round
            .slots
            .iter()
            .map(|s| s.as_ref().expect("slot deposited").clone())
            .collect();
        round.departed += 1;
        if round.departed == self.shared.size {
            round.arrived = 0;
            round.departed = 0;
            round.draining = false;
            for slot in round.slots.iter_mut() {
                *slot = None;
            }
            self.shared.cv.notify_all();
        }
        gathered
    }
}

impl JobComm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast_bytes(&self, buf: &mut [u8], root: usize) {
        let contribution = if self.rank == root {
            buf.to_vec()
        } else {
            Vec::new()
        };
        let gathered = self.allgather_bytes(contribution);
        if self.rank != root {
            let src = &gathered[root];
            assert_eq!(
                buf.len(),
                src.len(),
                "broadcast buffers must agree in length across ranks"
            );
            buf.copy_from_slice(src);
        }
    }

    fn exscan_sum_go(&self, local: &[GO], out: &mut [GO]) {
        let gathered = self.allgather_bytes(bytemuck::cast_slice(local).to_vec());
        out.fill(0);
        for blob in &gathered[..self.rank] {
            // byte blobs carry no alignment guarantee, so collect-copy
            let vals: Vec<GO> = bytemuck::pod_collect_to_vec(blob);
            for (o, v) in out.iter_mut().zip(&vals) {
                *o += *v;
            }
        }
    }

    fn allreduce_sum_go(&self, local: &[GO], out: &mut [GO]) {
        let gathered = self.allgather_bytes(bytemuck::cast_slice(local).to_vec());
        out.fill(0);
        for blob in &gathered {
            let vals: Vec<GO> = bytemuck::pod_collect_to_vec(blob);
            for (o, v) in out.iter_mut().zip(&vals) {
                *o += *v;
            }
        }
    }

    fn gather_los(&self, local: &[LO], root: usize) -> Option<Vec<LO>> {
        let gathered = self.allgather_bytes(bytemuck::cast_slice(local).to_vec());
        if self.rank == root {
            let mut merged = Vec::new();
            for blob in &gathered {
                let vals: Vec<LO> = bytemuck::pod_collect_to_vec(blob);
                merged.extend_from_slice(&vals);
            }
            Some(merged)
        } else {
            None
        }
    }

    fn barrier(&self) {
        self.allgather_bytes(Vec::new());
    }
}
