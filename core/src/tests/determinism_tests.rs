// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Determinism of every externally visible enumeration. Ordering here is
//! load-bearing: two honest nodes that enumerate a frontier differently
//! propose different parent sets and split the network.

use std::sync::Arc;

use itertools::Itertools as _;
use parking_lot::RwLock;

use crate::block_verifier::NoopVerifier;
use crate::context::Context;
use crate::dag::DagCore;
use crate::signals::CoreSignals;
use crate::vertex::{TestVertex, Utxo};
use crate::block::Id;

fn dag_with_roots(count: u8) -> DagCore {
    let (context, _) = Context::new_for_test(4);
    let mut dag = DagCore::new(
        Arc::new(context),
        Arc::new(NoopVerifier),
        CoreSignals::new().0,
    );
    for marker in 0..count {
        let vertex = TestVertex::new(vec![], 0)
            .set_inputs(vec![Utxo::new(Id::new([marker; 32]), 0)])
            .set_payload(vec![marker])
            .build();
        dag.add_vertex(vertex).unwrap();
    }
    dag
}

#[test]
fn frontier_is_identical_across_repeated_calls() {
    let dag = dag_with_roots(10);
    let first = dag.frontier();
    assert_eq!(first.len(), 10);
    assert!(first.iter().tuple_windows().all(|(a, b)| a < b));
    for _ in 0..100 {
        assert_eq!(dag.frontier(), first);
    }
}

#[test]
fn frontier_is_identical_across_concurrent_readers() {
    let dag = Arc::new(RwLock::new(dag_with_roots(10)));
    let expected = dag.read().frontier();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let dag = dag.clone();
            let expected = expected.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let frontier = dag.read().frontier();
                    assert_eq!(frontier, expected);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn conflict_enumeration_is_sorted() {
    let (context, _) = Context::new_for_test(4);
    let mut dag = DagCore::new(
        Arc::new(context),
        Arc::new(NoopVerifier),
        CoreSignals::new().0,
    );
    let shared = Utxo::new(Id::new([1; 32]), 0);
    let mut spenders = vec![];
    for marker in 0..6 {
        let vertex = TestVertex::new(vec![], 0)
            .set_inputs(vec![shared])
            .set_payload(vec![marker])
            .build();
        dag.add_vertex(vertex.clone()).unwrap();
        spenders.push(vertex.id());
    }

    let probe = spenders[3];
    let mut expected: Vec<Id> = spenders.into_iter().filter(|id| *id != probe).collect();
    expected.sort();
    assert_eq!(dag.conflicts(&probe), expected);
}
