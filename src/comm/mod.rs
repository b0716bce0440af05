//! Job-communicator abstraction for the collectives redev needs.
//!
//! A coupled application runs as a set of ranks; redev needs exactly five
//! collectives from whatever runtime binds those ranks together: a byte
//! broadcast, an exclusive scan-sum and an all-reduce-sum over global
//! ordinates, a variable-count gather of local ordinates to a root, and a
//! barrier. [`JobComm`] captures that contract behind an object-safe trait
//! so the same coupling code runs over MPI, over in-process rank groups
//! (tests, single-process coupling), or trivially on one rank.
//!
//! Byte-level signatures keep the trait object-safe; [`broadcast`] is the
//! typed wrapper over the supported element set.

use crate::types::{GO, LO};
use crate::wire::WireElem;

pub mod threads;

pub use threads::ThreadComm;

/// The collective operations redev requires of the surrounding job runtime.
///
/// All methods are collective: every rank of the job must call them in the
/// same order with compatible arguments, exactly as with MPI.
pub trait JobComm: Send + Sync {
    /// This rank's index, `0..size`.
    fn rank(&self) -> usize;
    /// Number of ranks in the job.
    fn size(&self) -> usize;

    /// Replace `buf` on every rank with root's `buf`.
    ///
    /// `buf` must have the same length on every rank.
    fn broadcast_bytes(&self, buf: &mut [u8], root: usize);

    /// Elementwise exclusive scan-sum: `out[i]` on rank `r` is the sum of
    /// `local[i]` over all ranks `< r`. On rank 0 the result is all zeros.
    fn exscan_sum_go(&self, local: &[GO], out: &mut [GO]);

    /// Elementwise sum of `local` over all ranks, available everywhere.
    fn allreduce_sum_go(&self, local: &[GO], out: &mut [GO]);

    /// Concatenate every rank's `local` in rank order onto `root`.
    ///
    /// Returns `Some(merged)` on the root rank and `None` elsewhere.
    fn gather_los(&self, local: &[LO], root: usize) -> Option<Vec<LO>>;

    /// Block until every rank has arrived.
    fn barrier(&self);
}

/// Typed broadcast over the supported element set.
///
/// Routes the buffer through [`JobComm::broadcast_bytes`]; the element type
/// must be one of the closed [`WireElem`] set, which is what makes the
/// byte reinterpretation sound on every backend.
pub fn broadcast<T: WireElem>(comm: &dyn JobComm, buf: &mut [T], root: usize) {
    comm.broadcast_bytes(bytemuck::cast_slice_mut(buf), root);
}

/// Single-rank communicator for uncoupled runs and unit tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl JobComm for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast_bytes(&self, _buf: &mut [u8], _root: usize) {}

    fn exscan_sum_go(&self, local: &[GO], out: &mut [GO]) {
        // rank 0 of any exclusive scan is all zeros
        debug_assert_eq!(local.len(), out.len());
        out.fill(0);
    }

    fn allreduce_sum_go(&self, local: &[GO], out: &mut [GO]) {
        out.copy_from_slice(local);
    }

    fn gather_los(&self, local: &[LO], _root: usize) -> Option<Vec<LO>> {
        Some(local.to_vec())
    }

    fn barrier(&self) {}
}

// --- MPI backend ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::JobComm;
    use crate::types::{GO, LO};
    use mpi::collective::{CommunicatorCollectives, Root, SystemOperation};
    use mpi::datatype::PartitionMut;
    use mpi::environment::Universe;
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    /// MPI-backed job communicator over `MPI_COMM_WORLD`.
    pub struct MpiComm {
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialize MPI and bind to the world communicator.
        pub fn world() -> Self {
            let uni = mpi::initialize().expect("MPI initialization failed");
            let world = uni.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: uni,
                world,
                rank,
                size,
            }
        }
    }

    impl JobComm for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn broadcast_bytes(&self, buf: &mut [u8], root: usize) {
            self.world
                .process_at_rank(root as i32)
                .broadcast_into(buf);
        }

        fn exscan_sum_go(&self, local: &[GO], out: &mut [GO]) {
            self.world
                .exclusive_scan_into(local, out, SystemOperation::sum());
            if self.rank == 0 {
                // MPI_Exscan leaves the rank-0 receive buffer undefined
                out.fill(0);
            }
        }

        fn allreduce_sum_go(&self, local: &[GO], out: &mut [GO]) {
            self.world
                .all_reduce_into(local, out, SystemOperation::sum());
        }

        fn gather_los(&self, local: &[LO], root: usize) -> Option<Vec<LO>> {
            let root_proc = self.world.process_at_rank(root as i32);
            let count = local.len() as i32;
            if self.rank == root {
                let mut counts = vec![0i32; self.size];
                root_proc.gather_into_root(&count, &mut counts[..]);
                let displs: Vec<i32> = counts
                    .iter()
                    .scan(0, |acc, &c| {
                        let d = *acc;
                        *acc += c;
                        Some(d)
                    })
                    .collect();
                let total: i32 = counts.iter().sum();
                let mut merged = vec![0 as LO; total as usize];
                let mut partition = PartitionMut::new(&mut merged[..], counts, displs);
                root_proc.gather_varcount_into_root(local, &mut partition);
                Some(merged)
            } else {
                root_proc.gather_into(&count);
                root_proc.gather_varcount_into(local);
                None
            }
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
