// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Seeded random workloads checking the safety invariants the scenario
//! tests cannot sweep: decisions are exclusive and terminal, accepted
//! parents precede children, accepted heights are unique, and no two
//! accepted vertices spend the same input.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools as _;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::block::{Block, Height, Id, TestBlock};
use crate::block_verifier::NoopVerifier;
use crate::chain::ChainCore;
use crate::context::Context;
use crate::dag::DagCore;
use crate::error::ConsensusError;
use crate::signals::CoreSignals;
use crate::storage::MemStore;
use crate::vertex::{TestVertex, Utxo};
use crate::vote_bag::VoteBag;

#[test]
fn randomized_chain_workload_holds_invariants() {
    let mut rng = StdRng::from_seed([4; 32]);
    let (context, _) = Context::new_for_test(4);
    let genesis = Block::genesis();
    let mut chain = ChainCore::new(
        Arc::new(context),
        Arc::new(NoopVerifier),
        Arc::new(MemStore::new()),
        CoreSignals::new().0,
        genesis.clone(),
    )
    .unwrap();

    // Everything ever added: id -> (parent, height).
    let mut known: HashMap<Id, (Id, Height)> = HashMap::new();
    known.insert(genesis.id(), (Id::EMPTY, 0));
    let mut candidates = vec![genesis.clone()];

    for step in 0..500u32 {
        if rng.gen_bool(0.4) {
            let parent = &candidates[rng.gen_range(0..candidates.len())];
            let block = TestBlock::new(parent.id(), parent.height() + 1)
                .set_payload(vec![rng.gen(), rng.gen()])
                .build();
            match chain.add(block.clone()) {
                Ok(()) => {
                    known.insert(block.id(), (block.parent(), block.height()));
                    candidates.push(block);
                }
                Err(
                    ConsensusError::ParentRejected { .. } | ConsensusError::AlreadyDecided(_),
                ) => {}
                Err(error) => panic!("Unexpected add failure: {error}"),
            }
        } else {
            let target = &candidates[rng.gen_range(0..candidates.len())];
            let bag: VoteBag = [(target.id(), rng.gen_range(0..=3))].into_iter().collect();
            chain.record_poll(step, bag).unwrap();
        }

        check_chain_invariants(&chain, &known);
    }

    // Drive the current preference to finality so the run decides something.
    for step in 1000..1010 {
        let bag: VoteBag = [(chain.preference(), 3)].into_iter().collect();
        chain.record_poll(step, bag).unwrap();
    }
    assert_ne!(chain.last_accepted(), genesis.id());
    check_chain_invariants(&chain, &known);
}

fn check_chain_invariants(chain: &ChainCore, known: &HashMap<Id, (Id, Height)>) {
    let mut accepted_heights: HashMap<Height, Id> = HashMap::new();
    for (id, (parent, height)) in known {
        // Exclusive, terminal states.
        assert!(!(chain.is_accepted(id) && chain.is_rejected(id)));
        if chain.is_accepted(id) {
            // Parent precedes child.
            if !parent.is_empty() {
                assert!(chain.is_accepted(parent), "accepted {id} under undecided parent");
            }
            // One accepted block per height.
            let previous = accepted_heights.insert(*height, *id);
            assert!(previous.is_none(), "two accepted blocks at height {height}");
        }
        if chain.is_rejected(parent) {
            assert!(chain.is_rejected(id), "live child {id} under rejected parent");
        }
    }
}

#[test]
fn randomized_dag_workload_holds_invariants() {
    let mut rng = StdRng::from_seed([11; 32]);
    let (context, _) = Context::new_for_test(4);
    let mut dag = DagCore::new(
        Arc::new(context),
        Arc::new(NoopVerifier),
        CoreSignals::new().0,
    );

    let utxos: Vec<Utxo> = (0..8).map(|i| Utxo::new(Id::new([i; 32]), 0)).collect();
    // Everything ever added: id -> (parents, height, inputs).
    let mut known: HashMap<Id, (Vec<Id>, Vec<Utxo>)> = HashMap::new();
    let mut candidates: Vec<(Id, Height)> = vec![];

    for step in 0..500u32 {
        if rng.gen_bool(0.4) {
            let parents: Vec<(Id, Height)> = if candidates.is_empty() || rng.gen_bool(0.3) {
                vec![]
            } else {
                let count = rng.gen_range(1..=2.min(candidates.len()));
                let mut picked = vec![];
                for _ in 0..count {
                    picked.push(candidates[rng.gen_range(0..candidates.len())]);
                }
                picked.dedup();
                picked
            };
            let height = parents.iter().map(|(_, h)| *h + 1).max().unwrap_or(0);
            let inputs = vec![utxos[rng.gen_range(0..utxos.len())]];
            let vertex = TestVertex::new(parents.iter().map(|(id, _)| *id).collect(), height)
                .set_inputs(inputs.clone())
                .set_payload(vec![rng.gen(), rng.gen()])
                .build();
            match dag.add_vertex(vertex.clone()) {
                Ok(()) => {
                    known.insert(vertex.id(), (vertex.parents().to_vec(), inputs));
                    candidates.push((vertex.id(), height));
                }
                Err(
                    ConsensusError::ParentRejected { .. } | ConsensusError::AlreadyDecided(_),
                ) => {}
                Err(error) => panic!("Unexpected add failure: {error}"),
            }
        } else if !candidates.is_empty() {
            let (target, _) = candidates[rng.gen_range(0..candidates.len())];
            let bag: VoteBag = [(target, rng.gen_range(0..=3))].into_iter().collect();
            dag.record_poll(step, bag).unwrap();
        }

        check_dag_invariants(&dag, &known);
    }
}

fn check_dag_invariants(dag: &DagCore, known: &HashMap<Id, (Vec<Id>, Vec<Utxo>)>) {
    let mut accepted_spenders: HashMap<Utxo, Id> = HashMap::new();
    for (id, (parents, inputs)) in known {
        assert!(!(dag.is_accepted(id) && dag.is_rejected(id)));
        if dag.is_accepted(id) {
            for parent in parents {
                assert!(dag.is_accepted(parent), "accepted {id} under undecided parent");
            }
            for input in inputs {
                let previous = accepted_spenders.insert(*input, *id);
                assert!(
                    previous.is_none(),
                    "two accepted vertices spend {input:?}"
                );
            }
        }
        if parents.iter().any(|parent| dag.is_rejected(parent)) {
            assert!(dag.is_rejected(id), "live vertex {id} under rejected parent");
        }
    }

    let frontier = dag.frontier();
    assert!(frontier.iter().tuple_windows().all(|(a, b)| a < b));
}
