//! Recursive-coordinate-bisection partition.
//!
//! The cut tree is stored in level order: index 1 is the root, index 0 is
//! unused, and node `i` has children `2i` and `2i+1`. The cut dimension at
//! level `l` is `l mod dim`, starting with x. A non-leaf node with cut
//! value `v` sends points with coordinate `< v` left and `>= v` right, so a
//! point landing exactly on a cut goes right. Leaves are labeled by `ranks`
//! left to right.

use crate::always_assert;
use crate::comm::{self, JobComm};
use crate::error::RedevError;
use crate::stream::{StreamEngine, StreamIo};
use crate::types::{LO, LOs, Mode, Real, Reals};

/// Wire variable holding the leaf ranks.
const RANKS_VAR: &str = "rcb partition ranks";
/// Wire variable holding the level-order cut coordinates.
const CUTS_VAR: &str = "rcb partition cuts";

/// Recursive-coordinate-bisection partition of a 1-, 2-, or 3-d domain.
///
/// `ranks` and `cuts` have equal length, a power of two; `cuts[0]` is
/// unused. A default-constructed instance is empty and dimensionless until
/// filled by `read` or `broadcast`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RcbPtn {
    dim: LO,
    ranks: LOs,
    cuts: Reals,
}

impl RcbPtn {
    /// An empty partition over a `dim`-dimensional domain; ranks and cuts
    /// are filled in later by `read` or `broadcast`.
    pub fn new_with_dim(dim: LO) -> Self {
        always_assert!((1..=3).contains(&dim), "rcb domain dimension {dim}");
        Self {
            dim,
            ranks: Vec::new(),
            cuts: Vec::new(),
        }
    }

    /// A fully specified partition.
    pub fn new(dim: LO, ranks: LOs, cuts: Reals) -> Self {
        always_assert!((1..=3).contains(&dim), "rcb domain dimension {dim}");
        Self::check_tree(&ranks, &cuts);
        Self { dim, ranks, cuts }
    }

    fn check_tree(ranks: &[LO], cuts: &[Real]) {
        always_assert!(ranks.len() == cuts.len());
        if !ranks.is_empty() {
            always_assert!(ranks.len().is_power_of_two());
        }
    }

    /// Rank owning the point; the third coordinate is ignored for
    /// lower-dimensional domains.
    ///
    /// Walks the cut tree from the root in `O(log |ranks|)`. The level
    /// count is the integer log of the leaf count, which is exact because
    /// the leaf count is a power of two.
    pub fn get_rank(&self, pt: [Real; 3]) -> LO {
        always_assert!(self.dim >= 1);
        always_assert!(!self.ranks.is_empty());
        let levels = self.ranks.len().trailing_zeros();
        let mut idx = 1usize;
        let mut axis = 0usize;
        for _ in 0..levels {
            idx = if pt[axis] < self.cuts[idx] {
                2 * idx
            } else {
                2 * idx + 1
            };
            axis = (axis + 1) % self.dim as usize;
        }
        self.ranks[idx - (1usize << levels)]
    }

    /// Leaf ranks, left to right.
    pub fn ranks(&self) -> &LOs {
        &self.ranks
    }

    /// Level-order cut coordinates; index 0 is unused.
    pub fn cuts(&self) -> &Reals {
        &self.cuts
    }

    pub fn dim(&self) -> LO {
        self.dim
    }

    /// Write ranks and cuts to a write-mode engine.
    ///
    /// With no data the write is skipped entirely, leaving the engine's
    /// step contents untouched.
    pub fn write<IO: StreamIo>(&self, engine: &IO::Engine, io: &IO) -> Result<(), RedevError> {
        if self.ranks.is_empty() {
            return Ok(());
        }
        let len = self.ranks.len() as u64;
        io.define_variable::<LO>(RANKS_VAR, len, Some(0), Some(len))?;
        engine.put::<LO>(RANKS_VAR, None, &self.ranks, Mode::Deferred)?;
        io.define_variable::<Real>(CUTS_VAR, len, Some(0), Some(len))?;
        engine.put::<Real>(CUTS_VAR, None, &self.cuts, Mode::Deferred)?;
        Ok(())
    }

    /// Read ranks and cuts from the current step.
    pub fn read<IO: StreamIo>(&mut self, engine: &IO::Engine, _io: &IO) -> Result<(), RedevError> {
        let ranks_shape = engine.inquire_variable::<LO>(RANKS_VAR);
        always_assert!(ranks_shape.is_some());
        let cuts_shape = engine.inquire_variable::<Real>(CUTS_VAR);
        always_assert!(cuts_shape.is_some());
        let len = ranks_shape.unwrap();
        self.ranks = vec![0 as LO; len as usize];
        self.cuts = vec![0 as Real; cuts_shape.unwrap() as usize];
        engine.get::<LO>(RANKS_VAR, Some((0, len)), &mut self.ranks, Mode::Deferred)?;
        engine.get::<Real>(
            CUTS_VAR,
            Some((0, self.cuts.len() as u64)),
            &mut self.cuts,
            Mode::Deferred,
        )?;
        engine.perform_gets();
        Self::check_tree(&self.ranks, &self.cuts);
        Ok(())
    }

    /// Send ranks and cuts from `root` to all ranks of `comm`.
    pub fn broadcast(&mut self, comm: &dyn JobComm, root: usize) {
        let at_root = comm.rank() == root;
        let mut len = [if at_root { self.ranks.len() as LO } else { 0 }];
        comm::broadcast(comm, &mut len, root);
        if !at_root {
            self.ranks = vec![0 as LO; len[0] as usize];
            self.cuts = vec![0 as Real; len[0] as usize];
        }
        comm::broadcast(comm, &mut self.ranks, root);
        comm::broadcast(comm, &mut self.cuts, root);
        Self::check_tree(&self.ranks, &self.cuts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn one_dimensional_queries() {
        let ptn = RcbPtn::new(1, vec![0, 1, 2, 3], vec![0.0, 0.5, 0.25, 0.75]);
        assert_eq!(ptn.get_rank([0.6, 0.0, 0.0]), 2);
        assert_eq!(ptn.get_rank([0.01, 0.0, 0.0]), 0);
        assert_eq!(ptn.get_rank([0.5, 0.0, 0.0]), 2);
        assert_eq!(ptn.get_rank([0.751, 0.0, 0.0]), 3);
    }

    #[test]
    fn two_dimensional_queries() {
        let ptn = RcbPtn::new(2, vec![0, 1, 2, 3], vec![0.0, 0.5, 0.75, 0.25]);
        assert_eq!(ptn.get_rank([0.1, 0.7, 0.0]), 0);
        assert_eq!(ptn.get_rank([0.1, 0.8, 0.0]), 1);
        assert_eq!(ptn.get_rank([0.5, 0.0, 0.0]), 2);
        assert_eq!(ptn.get_rank([0.7, 0.9, 0.0]), 3);
    }

    #[test]
    fn single_leaf_always_answers_its_rank() {
        let ptn = RcbPtn::new(1, vec![5], vec![0.0]);
        assert_eq!(ptn.get_rank([-1e30, 0.0, 0.0]), 5);
        assert_eq!(ptn.get_rank([1e30, 0.0, 0.0]), 5);
    }

    #[test]
    fn point_on_cut_routes_right() {
        let ptn = RcbPtn::new(1, vec![0, 1], vec![0.0, 0.5]);
        assert_eq!(ptn.get_rank([0.5, 0.0, 0.0]), 1);
        assert_eq!(ptn.get_rank([0.4999, 0.0, 0.0]), 0);
    }

    #[test]
    fn third_coordinate_is_ignored_below_3d() {
        let ptn = RcbPtn::new(2, vec![0, 1, 2, 3], vec![0.0, 0.5, 0.75, 0.25]);
        assert_eq!(
            ptn.get_rank([0.1, 0.7, -4.0]),
            ptn.get_rank([0.1, 0.7, 4.0])
        );
    }

    #[test]
    #[should_panic(expected = "rcb domain dimension 0")]
    fn zero_dimension_is_fatal() {
        let _ = RcbPtn::new_with_dim(0);
    }

    #[test]
    #[should_panic]
    fn mismatched_ranks_and_cuts_are_fatal() {
        let _ = RcbPtn::new(1, vec![0, 1], vec![0.0]);
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_leaf_count_is_fatal() {
        let _ = RcbPtn::new(1, vec![0, 1, 2], vec![0.0, 0.5, 0.25]);
    }

    proptest! {
        #[test]
        fn queries_are_deterministic_and_in_range(
            levels in 0u32..5,
            dim in 1i32..=3,
            x in -10.0f64..10.0,
            y in -10.0f64..10.0,
            z in -10.0f64..10.0,
            cut_seed in proptest::collection::vec(-5.0f64..5.0, 32),
        ) {
            let leaves = 1usize << levels;
            let ranks: LOs = (0..leaves as LO).collect();
            let cuts: Reals = cut_seed.iter().copied().take(leaves).collect();
            let ptn = RcbPtn::new(dim, ranks.clone(), cuts);
            let pt = [x, y, z];
            let first = ptn.get_rank(pt);
            let second = ptn.get_rank(pt);
            prop_assert_eq!(first, second);
            prop_assert!(ranks.contains(&first));
        }
    }
}
