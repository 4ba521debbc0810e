// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end flow from engine finalization to hybrid certificate: a block
//! finalizes in the chain engine, the accept signal feeds the overlay, and
//! a full overlay round emits a bundle both signature schemes verify.

use std::sync::Arc;

use lux_config::{
    local_committee_and_keys, AuthorityAggregateSignature, AuthorityKeyPair, NodeId, Parameters,
};

use crate::block::{Block, Id, TestBlock};
use crate::block_verifier::NoopVerifier;
use crate::certificate::CertBundle;
use crate::chain::ChainCore;
use crate::clock::TestClock;
use crate::context::Context;
use crate::emitter::Emitter;
use crate::metrics::test_metrics;
use crate::pq::{PqScheme as _, TestPqScheme};
use crate::pq_overlay::{commit_digest, Commit, PqOverlay, PqPhase, Proposal};
use crate::signals::CoreSignals;
use crate::storage::MemStore;
use crate::validators::FixedValidatorState;
use crate::vote_bag::VoteBag;

struct Network {
    context: Arc<Context>,
    keys: Vec<(NodeId, AuthorityKeyPair)>,
    scheme: Arc<TestPqScheme>,
}

fn network() -> Network {
    let (committee, key_pairs) = local_committee_and_keys(0, vec![1; 4]);
    let committee = Arc::new(committee);
    let context = Arc::new(
        Context::new(
            committee.node_ids()[0],
            Id::new([0xC; 32]),
            committee.clone(),
            Parameters::new_single_tier(4, 3, 3, 2).unwrap(),
            test_metrics(),
        )
        .unwrap(),
    );
    let keys = committee
        .node_ids()
        .into_iter()
        .zip(key_pairs.into_iter().map(|(_, authority)| authority))
        .collect();
    Network {
        context,
        keys,
        scheme: Arc::new(TestPqScheme::new([5; 32], 3)),
    }
}

#[tokio::test]
async fn finalized_block_earns_a_hybrid_certificate() {
    let network = network();
    let genesis = Block::genesis();
    let (signals, receivers) = CoreSignals::new();
    let mut accepted = receivers.accepted_receiver();
    let mut chain = ChainCore::new(
        network.context.clone(),
        Arc::new(NoopVerifier),
        Arc::new(MemStore::new()),
        signals,
        genesis.clone(),
    )
    .unwrap();
    let (mut overlay, mut certificates) = PqOverlay::new(
        network.context.clone(),
        Arc::new(Emitter::new(Arc::new(FixedValidatorState::new(
            network.context.committee.clone(),
        )))),
        network.scheme.clone(),
        Arc::new(TestClock::new(1_000)),
        network.keys[0].1.clone(),
    );

    // Finalize a block: beta = 2 strong polls.
    let block = TestBlock::new(genesis.id(), 1).build();
    chain.add(block.clone()).unwrap();
    for request_id in 1..=2 {
        let bag: VoteBag = [(block.id(), 3)].into_iter().collect();
        assert!(chain.record_poll(request_id, bag).unwrap());
    }
    assert!(chain.is_accepted(&block.id()));

    // The accept signal is what the overlay certifies.
    let finalized = accepted.recv().await.unwrap();
    assert_eq!(finalized, block.id());
    overlay.enqueue_finalized(finalized, 1).unwrap();
    assert_eq!(overlay.phase(), PqPhase::Propose);

    // The other validators saw the same finalization.
    for index in 1..3 {
        let proposal = Proposal::new(network.keys[index].0, 0, finalized, 1, 2_000);
        overlay.handle_proposal(proposal).unwrap();
    }
    assert_eq!(overlay.phase(), PqPhase::Commit);
    let digest = commit_digest(0, finalized, 1);
    for index in 1..3 {
        let (node, keypair) = &network.keys[index];
        let commit = Commit {
            committer: *node,
            round: 0,
            target: finalized,
            bls: keypair.sign(digest.as_bytes()),
            pq_share: network.scheme.sign_share(node, digest.as_bytes()).unwrap(),
        };
        overlay.handle_commit(commit).unwrap();
    }

    // The bundle names the finalized block and verifies on both halves,
    // including through its wire framing.
    let bundle = certificates.recv().await.unwrap();
    assert_eq!(bundle.target, block.id());
    assert_eq!(bundle.height, 1);

    let decoded = CertBundle::decode(&bundle.encode().unwrap()).unwrap();
    assert!(network.scheme.verify(digest.as_bytes(), &decoded.pq_cert));
    let aggregate = AuthorityAggregateSignature::from_bytes(&decoded.bls_agg).unwrap();
    let signer_keys: Vec<_> = network.keys[..3]
        .iter()
        .map(|(_, keypair)| keypair.public())
        .collect();
    aggregate.verify(&signer_keys, digest.as_bytes()).unwrap();
}
