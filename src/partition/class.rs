//! Partition by classification on geometric model entities.
//!
//! The "class" in the name comes from classification: the association of
//! mesh entities with the geometric model entity they discretize. A
//! [`ClassPtn`] maps every model entity of the overlap domain to the rank
//! that owns it, so a client can route data for a mesh entity by looking up
//! the model entity it is classified on.

use crate::always_assert;
use crate::comm::{self, JobComm};
use crate::error::RedevError;
use crate::stream::{StreamEngine, StreamIo};
use crate::types::{LO, LOs, Mode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire variable holding the serialized entity-to-rank triples.
const ENTS_AND_RANKS_VAR: &str = "class partition ents and ranks";

/// A geometric model entity, identified by dimension and id.
///
/// `dim` is 0 for vertices, 1 for edges, 2 for faces, 3 for regions; `id`
/// is unique within a dimension. Out-of-range dimensions are a fatal
/// configuration error, caught at construction.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ModelEnt {
    pub dim: LO,
    pub id: LO,
}

impl ModelEnt {
    pub fn new(dim: LO, id: LO) -> Self {
        always_assert!((0..=3).contains(&dim), "model entity dimension {dim}");
        Self { dim, id }
    }
}

/// Partition defined by the ownership of geometric model entities.
///
/// Keys are unique; several entities may map to the same rank. The map is
/// ordered so iteration, serialization, and the rank/entity accessor
/// pairing are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassPtn {
    model_ent_to_rank: BTreeMap<ModelEnt, LO>,
}

impl ClassPtn {
    /// An empty partition, to be filled by `read` or `broadcast`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the merged partition from per-rank contributions.
    ///
    /// Collective over `comm`. Each rank contributes the pairing
    /// `ents[i] -> ranks[i]`; the contributions are gathered onto rank 0,
    /// merged, and broadcast, so every rank returns holding the full map.
    /// An entity contributed twice with different owners is fatal;
    /// identical duplicates are tolerated.
    pub fn from_local(comm: &dyn JobComm, ranks: &[LO], ents: &[ModelEnt]) -> Self {
        always_assert!(ranks.len() == ents.len());
        let mut local = Vec::with_capacity(3 * ranks.len());
        for (rank, ent) in ranks.iter().zip(ents) {
            local.extend([ent.dim, ent.id, *rank]);
        }
        let root = 0;
        let model_ent_to_rank = match comm.gather_los(&local, root) {
            Some(gathered) => Self::deserialize(&gathered),
            None => BTreeMap::new(),
        };
        let mut ptn = Self { model_ent_to_rank };
        ptn.broadcast(comm, root);
        ptn
    }

    /// Rank owning `ent`; fatal if the entity is not in the partition.
    pub fn get_rank(&self, ent: ModelEnt) -> LO {
        let rank = self.model_ent_to_rank.get(&ent);
        always_assert!(
            rank.is_some(),
            "no owner recorded for model entity ({}, {})",
            ent.dim,
            ent.id
        );
        *rank.unwrap()
    }

    /// Owning ranks in map order; pairs index-wise with [`Self::model_ents`].
    pub fn ranks(&self) -> LOs {
        self.model_ent_to_rank.values().copied().collect()
    }

    /// Model entities in map order; pairs index-wise with [`Self::ranks`].
    pub fn model_ents(&self) -> Vec<ModelEnt> {
        self.model_ent_to_rank.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.model_ent_to_rank.is_empty()
    }

    pub fn len(&self) -> usize {
        self.model_ent_to_rank.len()
    }

    /// Write the serialized triples to a write-mode engine.
    ///
    /// An empty partition writes an empty triples variable.
    pub fn write<IO: StreamIo>(&self, engine: &IO::Engine, io: &IO) -> Result<(), RedevError> {
        let triples = self.serialize();
        let len = triples.len() as u64;
        io.define_variable::<LO>(ENTS_AND_RANKS_VAR, len, Some(0), Some(len))?;
        engine.put::<LO>(ENTS_AND_RANKS_VAR, None, &triples, Mode::Deferred)?;
        Ok(())
    }

    /// Read and deserialize the triples from the current step, replacing
    /// this partition's map.
    pub fn read<IO: StreamIo>(&mut self, engine: &IO::Engine, _io: &IO) -> Result<(), RedevError> {
        let shape = engine.inquire_variable::<LO>(ENTS_AND_RANKS_VAR);
        always_assert!(shape.is_some());
        let len = shape.unwrap();
        let mut triples = vec![0 as LO; len as usize];
        if len > 0 {
            engine.get::<LO>(ENTS_AND_RANKS_VAR, Some((0, len)), &mut triples, Mode::Deferred)?;
        }
        engine.perform_gets();
        self.model_ent_to_rank = Self::deserialize(&triples);
        Ok(())
    }

    /// Send the partition from `root` to all ranks of `comm`; non-root
    /// ranks replace their map with the received one.
    pub fn broadcast(&mut self, comm: &dyn JobComm, root: usize) {
        let at_root = comm.rank() == root;
        let mut len = [if at_root { 3 * self.len() as LO } else { 0 }];
        comm::broadcast(comm, &mut len, root);
        let mut triples = if at_root {
            self.serialize()
        } else {
            vec![0 as LO; len[0] as usize]
        };
        comm::broadcast(comm, &mut triples, root);
        if !at_root {
            self.model_ent_to_rank = Self::deserialize(&triples);
        }
    }

    /// Flatten the map as `[dim_0, id_0, rank_0, dim_1, id_1, rank_1, ...]`.
    fn serialize(&self) -> LOs {
        let mut triples = Vec::with_capacity(3 * self.len());
        for (ent, rank) in &self.model_ent_to_rank {
            triples.extend([ent.dim, ent.id, *rank]);
        }
        triples
    }

    /// Rebuild the map from serialized triples.
    ///
    /// Fatal if the length is not a multiple of three, if a dimension is
    /// out of range, or if an entity appears with two different owners.
    fn deserialize(triples: &[LO]) -> BTreeMap<ModelEnt, LO> {
        always_assert!(triples.len() % 3 == 0);
        let mut map = BTreeMap::new();
        for triple in triples.chunks_exact(3) {
            let ent = ModelEnt::new(triple[0], triple[1]);
            let rank = triple[2];
            if let Some(&prev) = map.get(&ent) {
                always_assert!(
                    prev == rank,
                    "model entity ({}, {}) claimed by ranks {} and {}",
                    ent.dim,
                    ent.id,
                    prev,
                    rank
                );
            }
            map.insert(ent, rank);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use proptest::prelude::*;

    fn sample() -> ClassPtn {
        let ranks = vec![0, 1, 2, 3];
        let ents = vec![
            ModelEnt::new(0, 0),
            ModelEnt::new(1, 0),
            ModelEnt::new(2, 0),
            ModelEnt::new(2, 1),
        ];
        ClassPtn::from_local(&SerialComm, &ranks, &ents)
    }

    #[test]
    fn from_local_pairs_ranks_with_entities() {
        let ptn = sample();
        assert_eq!(ptn.len(), 4);
        assert_eq!(ptn.get_rank(ModelEnt::new(2, 1)), 3);
        assert_eq!(ptn.get_rank(ModelEnt::new(0, 0)), 0);
    }

    #[test]
    fn accessors_pair_index_wise() {
        let ptn = sample();
        let ranks = ptn.ranks();
        let ents = ptn.model_ents();
        assert_eq!(ranks.len(), ents.len());
        for (ent, rank) in ents.iter().zip(&ranks) {
            assert_eq!(ptn.get_rank(*ent), *rank);
        }
    }

    #[test]
    fn serialize_round_trips() {
        let ptn = sample();
        let restored = ClassPtn {
            model_ent_to_rank: ClassPtn::deserialize(&ptn.serialize()),
        };
        assert_eq!(ptn, restored);
    }

    #[test]
    fn identical_duplicates_are_tolerated() {
        let map = ClassPtn::deserialize(&[1, 5, 2, 1, 5, 2]);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&ModelEnt::new(1, 5)], 2);
    }

    #[test]
    #[should_panic(expected = "claimed by ranks 2 and 3")]
    fn conflicting_duplicates_are_fatal() {
        let _ = ClassPtn::deserialize(&[1, 5, 2, 1, 5, 3]);
    }

    #[test]
    #[should_panic(expected = "model entity dimension 4")]
    fn out_of_range_dimension_is_fatal() {
        let _ = ModelEnt::new(4, 0);
    }

    #[test]
    #[should_panic]
    fn non_triple_length_is_fatal() {
        let _ = ClassPtn::deserialize(&[0, 0]);
    }

    #[test]
    #[should_panic(expected = "no owner recorded")]
    fn missing_entity_lookup_is_fatal() {
        sample().get_rank(ModelEnt::new(3, 9));
    }

    #[test]
    fn serde_round_trips_model_ents() {
        let ent = ModelEnt::new(2, 7);
        let text = serde_json::to_string(&ent).expect("serialize");
        let back: ModelEnt = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(ent, back);
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_arbitrary_maps(
            entries in proptest::collection::btree_map(
                (0..=3i32, 0..1000i32),
                0..64i32,
                0..40,
            )
        ) {
            let ptn = ClassPtn {
                model_ent_to_rank: entries
                    .iter()
                    .map(|(&(dim, id), &rank)| (ModelEnt::new(dim, id), rank))
                    .collect(),
            };
            let restored = ClassPtn::deserialize(&ptn.serialize());
            prop_assert_eq!(ptn.model_ent_to_rank, restored);
        }
    }
}
