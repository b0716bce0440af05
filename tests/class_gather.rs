//! Merging per-rank class-partition contributions: after the collective
//! construction every contributing rank holds the same merged map,
//! regardless of which ranks contributed what.

use redev::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

type EntToRank = BTreeMap<ModelEnt, LO>;

fn expected() -> EntToRank {
    [
        (ModelEnt::new(0, 0), 0),
        (ModelEnt::new(1, 0), 1),
        (ModelEnt::new(2, 0), 2),
        (ModelEnt::new(2, 1), 3),
    ]
    .into_iter()
    .collect()
}

fn check(ptn: &ClassPtn) {
    let ranks = ptn.ranks();
    let ents = ptn.model_ents();
    assert_eq!(ranks.len(), 4);
    assert_eq!(ents.len(), 4);
    let merged: EntToRank = ents.into_iter().zip(ranks).collect();
    assert_eq!(merged, expected());
}

fn run_two_ranks<F>(contribute: F)
where
    F: Fn(usize) -> (Vec<LO>, Vec<ModelEnt>) + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = ThreadComm::group(2)
        .into_iter()
        .map(|comm| {
            let contribute = contribute.clone();
            thread::spawn(move || {
                let comm: Arc<dyn JobComm> = Arc::new(comm);
                let (ranks, ents) = contribute(comm.rank());
                let ptn = ClassPtn::from_local(comm.as_ref(), &ranks, &ents);
                check(&ptn);
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("rank panicked");
    }
}

#[test]
fn contributions_split_across_ranks() {
    run_two_ranks(|rank| {
        if rank == 0 {
            (vec![0, 1], vec![ModelEnt::new(0, 0), ModelEnt::new(1, 0)])
        } else {
            (vec![2, 3], vec![ModelEnt::new(2, 0), ModelEnt::new(2, 1)])
        }
    });
}

#[test]
fn contributions_all_on_rank_zero() {
    run_two_ranks(|rank| {
        if rank == 0 {
            (
                vec![0, 1, 2, 3],
                vec![
                    ModelEnt::new(0, 0),
                    ModelEnt::new(1, 0),
                    ModelEnt::new(2, 0),
                    ModelEnt::new(2, 1),
                ],
            )
        } else {
            (Vec::new(), Vec::new())
        }
    });
}

#[test]
fn contributions_all_on_rank_one() {
    run_two_ranks(|rank| {
        if rank == 1 {
            (
                vec![0, 1, 2, 3],
                vec![
                    ModelEnt::new(0, 0),
                    ModelEnt::new(1, 0),
                    ModelEnt::new(2, 0),
                    ModelEnt::new(2, 1),
                ],
            )
        } else {
            (Vec::new(), Vec::new())
        }
    });
}

#[test]
fn overlapping_identical_contributions_merge() {
    run_two_ranks(|_rank| {
        (
            vec![0, 1, 2, 3],
            vec![
                ModelEnt::new(0, 0),
                ModelEnt::new(1, 0),
                ModelEnt::new(2, 0),
                ModelEnt::new(2, 1),
            ],
        )
    });
}
