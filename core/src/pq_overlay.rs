// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Two-phase certificate overlay upgrading probabilistic finality into a
//! hybrid (BLS aggregate + post-quantum threshold) certificate.
//!
//! The overlay trails the engine: finalized targets queue up, one round
//! certifies one target, and the engine never waits for it. Propose gathers
//! alpha_preference matching proposals; Commit gathers alpha_confidence
//! verified signatures and emits the [`CertBundle`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use fastcrypto::hash::HashFunction;
use lux_config::{AuthorityKeyPair, AuthoritySignature, AuthorityAggregateSignature,
    DefaultHashFunction, NodeId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::block::{Height, Id, TimestampMs};
use crate::certificate::CertBundle;
use crate::clock::Clock;
use crate::context::Context;
use crate::emitter::Emitter;
use crate::error::{ConsensusError, ConsensusResult};
use crate::pq::PqScheme;
use crate::vote_bag::VoteBag;

/// Phase of the current overlay round.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::IntoStaticStr)]
pub enum PqPhase {
    Idle,
    Propose,
    Commit,
}

/// A validator's claim that the engine finalized `target` at `height`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposer: NodeId,
    pub round: u64,
    pub target: Id,
    pub height: Height,
    pub timestamp_ms: TimestampMs,
    /// Commit digest over (round, target, height); what Commit signatures
    /// cover. Identical across proposers so the aggregate verifies over one
    /// message.
    pub digest: Id,
}

impl Proposal {
    pub fn new(
        proposer: NodeId,
        round: u64,
        target: Id,
        height: Height,
        timestamp_ms: TimestampMs,
    ) -> Self {
        Self {
            proposer,
            round,
            target,
            height,
            timestamp_ms,
            digest: commit_digest(round, target, height),
        }
    }
}

/// A validator's signatures over a proposal digest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commit {
    pub committer: NodeId,
    pub round: u64,
    pub target: Id,
    pub bls: AuthoritySignature,
    pub pq_share: Bytes,
}

/// Messages the caller must broadcast after feeding the overlay.
#[derive(Clone, Debug)]
pub enum PqAction {
    BroadcastProposal(Proposal),
    BroadcastCommit(Commit),
}

/// The commit digest every validator signs for (round, target, height).
pub fn commit_digest(round: u64, target: Id, height: Height) -> Id {
    let mut hasher = DefaultHashFunction::new();
    hasher.update(
        bcs::to_bytes(&(round, target, height)).expect("Serialization should not fail"),
    );
    Id::new(hasher.finalize().into())
}

struct PqRound {
    round: u64,
    phase: PqPhase,
    proposals: BTreeMap<NodeId, Proposal>,
    tallies: VoteBag,
    /// Set on the Propose -> Commit transition.
    commit_target: Option<(Id, Height, Id)>,
    commits: BTreeMap<NodeId, Commit>,
}

impl PqRound {
    fn new(round: u64) -> Self {
        Self {
            round,
            phase: PqPhase::Idle,
            proposals: BTreeMap::new(),
            tallies: VoteBag::new(),
            commit_target: None,
            commits: BTreeMap::new(),
        }
    }
}

/// The overlay state machine of one validator.
pub struct PqOverlay {
    context: Arc<Context>,
    emitter: Arc<Emitter>,
    scheme: Arc<dyn PqScheme>,
    clock: Arc<dyn Clock>,
    authority_keypair: AuthorityKeyPair,
    round: PqRound,
    pending: VecDeque<(Id, Height)>,
    cert_sender: mpsc::UnboundedSender<CertBundle>,
}

impl PqOverlay {
    pub fn new(
        context: Arc<Context>,
        emitter: Arc<Emitter>,
        scheme: Arc<dyn PqScheme>,
        clock: Arc<dyn Clock>,
        authority_keypair: AuthorityKeyPair,
    ) -> (Self, mpsc::UnboundedReceiver<CertBundle>) {
        let (cert_sender, cert_receiver) = mpsc::unbounded_channel();
        let overlay = Self {
            context,
            emitter,
            scheme,
            clock,
            authority_keypair,
            round: PqRound::new(0),
            pending: VecDeque::new(),
            cert_sender,
        };
        (overlay, cert_receiver)
    }

    pub fn phase(&self) -> PqPhase {
        self.round.phase
    }

    pub fn round_number(&self) -> u64 {
        self.round.round
    }

    fn alpha_preference(&self) -> u32 {
        self.context.parameters.alpha_preference
    }

    fn alpha_confidence(&self) -> u32 {
        self.context.parameters.terminations[0].alpha_confidence
    }

    /// Queues a target the engine finalized; if the overlay is idle, starts
    /// a round for it and returns our proposal to broadcast.
    pub fn enqueue_finalized(
        &mut self,
        target: Id,
        height: Height,
    ) -> ConsensusResult<Vec<PqAction>> {
        self.pending.push_back((target, height));
        self.maybe_propose()
    }

    fn maybe_propose(&mut self) -> ConsensusResult<Vec<PqAction>> {
        if self.round.phase != PqPhase::Idle {
            return Ok(vec![]);
        }
        let Some((target, height)) = self.pending.pop_front() else {
            return Ok(vec![]);
        };
        let proposal = Proposal::new(
            self.context.own_node,
            self.round.round,
            target,
            height,
            self.clock.now_ms(),
        );
        debug!("Proposing certification of {target} in overlay round {}", self.round.round);
        let mut actions = vec![PqAction::BroadcastProposal(proposal.clone())];
        actions.extend(self.handle_proposal(proposal)?);
        Ok(actions)
    }

    /// Records a proposal. Moves the round to Commit once alpha_preference
    /// proposals name the same target, producing our commit to broadcast.
    pub fn handle_proposal(&mut self, proposal: Proposal) -> ConsensusResult<Vec<PqAction>> {
        if self.round.phase == PqPhase::Commit {
            self.context.metrics.overlay_messages_dropped.inc();
            return Err(ConsensusError::WrongPhase {
                message: "proposal",
                phase: self.round.phase.into(),
            });
        }
        let proposer = proposal.proposer;
        if proposal.round != self.round.round {
            self.context.metrics.overlay_messages_dropped.inc();
            return Err(ConsensusError::InvalidProposal {
                proposer,
                reason: format!(
                    "round {} does not match the overlay round {}",
                    proposal.round, self.round.round
                ),
            });
        }
        if !self.context.committee.contains(&proposer) {
            self.context.metrics.overlay_messages_dropped.inc();
            return Err(ConsensusError::InvalidProposal {
                proposer,
                reason: "proposer is not in the committee".to_string(),
            });
        }
        if proposal.digest != commit_digest(proposal.round, proposal.target, proposal.height) {
            self.context.metrics.overlay_messages_dropped.inc();
            self.emitter.report(proposer, false);
            return Err(ConsensusError::InvalidProposal {
                proposer,
                reason: "digest does not match the fields".to_string(),
            });
        }
        if self.round.proposals.contains_key(&proposer) {
            // Equivocation: keep the first proposal, penalize the proposer.
            warn!("Dropping second proposal from {proposer} in round {}", self.round.round);
            self.context.metrics.overlay_messages_dropped.inc();
            self.emitter.report(proposer, false);
            return Err(ConsensusError::InvalidProposal {
                proposer,
                reason: "second proposal in the same round".to_string(),
            });
        }

        self.round.phase = PqPhase::Propose;
        let target = proposal.target;
        let height = proposal.height;
        let digest = proposal.digest;
        self.round.proposals.insert(proposer, proposal);
        self.round.tallies.add(target);

        if self.round.tallies.count(&target) < self.alpha_preference() {
            return Ok(vec![]);
        }

        info!(
            "Overlay round {} moves to Commit for {target}",
            self.round.round
        );
        self.round.phase = PqPhase::Commit;
        self.round.commit_target = Some((target, height, digest));

        let commit = Commit {
            committer: self.context.own_node,
            round: self.round.round,
            target,
            bls: self.authority_keypair.sign(digest.as_bytes()),
            pq_share: self.scheme.sign_share(&self.context.own_node, digest.as_bytes())?,
        };
        let mut actions = vec![PqAction::BroadcastCommit(commit.clone())];
        actions.extend(self.handle_commit(commit)?);
        Ok(actions)
    }

    /// Records a verified commit; at alpha_confidence commits the hybrid
    /// certificate is aggregated, emitted, and the next round starts.
    pub fn handle_commit(&mut self, commit: Commit) -> ConsensusResult<Vec<PqAction>> {
        if self.round.phase != PqPhase::Commit {
            self.context.metrics.overlay_messages_dropped.inc();
            return Err(ConsensusError::WrongPhase {
                message: "commit",
                phase: self.round.phase.into(),
            });
        }
        let committer = commit.committer;
        let (target, height, digest) = self
            .round
            .commit_target
            .expect("Commit phase always has a target");
        if commit.round != self.round.round || commit.target != target {
            self.context.metrics.overlay_messages_dropped.inc();
            return Err(ConsensusError::InvalidCommit {
                committer,
                reason: "commit names an unknown round or target".to_string(),
            });
        }
        let Some(authority) = self.context.committee.authority(&committer) else {
            self.context.metrics.overlay_messages_dropped.inc();
            return Err(ConsensusError::InvalidCommit {
                committer,
                reason: "committer is not in the committee".to_string(),
            });
        };
        if authority
            .authority_key
            .verify(digest.as_bytes(), &commit.bls)
            .is_err()
        {
            self.context.metrics.overlay_messages_dropped.inc();
            self.emitter.report(committer, false);
            return Err(ConsensusError::InvalidCommit {
                committer,
                reason: "bls signature does not verify".to_string(),
            });
        }
        if self.round.commits.contains_key(&committer) {
            // Gossip duplicates are harmless; drop quietly.
            return Ok(vec![]);
        }
        self.round.commits.insert(committer, commit);

        if (self.round.commits.len() as u32) < self.alpha_confidence() {
            return Ok(vec![]);
        }

        // Aggregate in committee (id-ascending) order.
        let signatures: Vec<AuthoritySignature> =
            self.round.commits.values().map(|c| c.bls.clone()).collect();
        let bls_agg = AuthorityAggregateSignature::aggregate(&signatures)
            .map_err(|error| ConsensusError::MalformedCertificate(error.to_string()))?;
        let shares: Vec<(NodeId, Bytes)> = self
            .round
            .commits
            .iter()
            .map(|(node, c)| (*node, c.pq_share.clone()))
            .collect();
        let pq_cert = self.scheme.finalize(digest.as_bytes(), &shares)?;

        let bundle = CertBundle {
            bls_agg: Bytes::from(bls_agg.to_bytes()),
            pq_cert,
            target,
            height,
        };
        info!(
            "Overlay round {} certified {target} at height {height}",
            self.round.round
        );
        self.context.metrics.certificates_emitted.inc();
        // Failing to send only means the receiver is gone at shutdown.
        self.cert_sender.send(bundle).ok();

        self.round = PqRound::new(self.round.round + 1);
        self.maybe_propose()
    }

    /// A validator-set change drops the in-flight round; queued targets are
    /// re-proposed under the new round number.
    pub fn epoch_change(&mut self) -> ConsensusResult<Vec<PqAction>> {
        info!("Overlay resets for an epoch change in round {}", self.round.round);
        if let Some((target, height, _)) = self.round.commit_target.take() {
            self.pending.push_front((target, height));
        } else if let Some(proposal) = self.round.proposals.get(&self.context.own_node) {
            self.pending.push_front((proposal.target, proposal.height));
        }
        self.round = PqRound::new(self.round.round + 1);
        self.maybe_propose()
    }
}

#[cfg(test)]
mod tests {
    use lux_config::local_committee_and_keys;

    use super::*;
    use crate::clock::TestClock;
    use crate::metrics::test_metrics;
    use crate::pq::TestPqScheme;
    use crate::validators::FixedValidatorState;

    struct Fixture {
        overlay: PqOverlay,
        cert_receiver: mpsc::UnboundedReceiver<CertBundle>,
        scheme: Arc<TestPqScheme>,
        committee_keys: Vec<(NodeId, AuthorityKeyPair)>,
    }

    /// An overlay for the first of 4 validators, alpha_preference =
    /// alpha_confidence = 3.
    fn fixture() -> Fixture {
        let (committee, key_pairs) = local_committee_and_keys(0, vec![1; 4]);
        let committee = Arc::new(committee);
        let context = Arc::new(
            Context::new(
                committee.node_ids()[0],
                Id::new([0xC; 32]),
                committee.clone(),
                lux_config::Parameters::new_single_tier(4, 3, 3, 2).unwrap(),
                test_metrics(),
            )
            .unwrap(),
        );
        let emitter = Arc::new(Emitter::new(Arc::new(FixedValidatorState::new(
            committee.clone(),
        ))));
        let scheme = Arc::new(TestPqScheme::new([5; 32], 3));
        let committee_keys: Vec<(NodeId, AuthorityKeyPair)> = committee
            .node_ids()
            .into_iter()
            .zip(key_pairs.into_iter().map(|(_, authority)| authority))
            .collect();
        let (overlay, cert_receiver) = PqOverlay::new(
            context,
            emitter,
            scheme.clone(),
            Arc::new(TestClock::new(1_000)),
            committee_keys[0].1.clone(),
        );
        Fixture {
            overlay,
            cert_receiver,
            scheme,
            committee_keys,
        }
    }

    fn proposal_from(fixture: &Fixture, index: usize, target: Id, height: Height) -> Proposal {
        Proposal::new(
            fixture.committee_keys[index].0,
            fixture.overlay.round_number(),
            target,
            height,
            2_000,
        )
    }

    fn commit_from(fixture: &Fixture, index: usize, target: Id, height: Height) -> Commit {
        let round = fixture.overlay.round_number();
        let digest = commit_digest(round, target, height);
        let (node, keypair) = &fixture.committee_keys[index];
        Commit {
            committer: *node,
            round,
            target,
            bls: keypair.sign(digest.as_bytes()),
            pq_share: fixture.scheme.sign_share(node, digest.as_bytes()).unwrap(),
        }
    }

    #[test]
    fn full_round_emits_a_verifiable_bundle() {
        let mut fixture = fixture();
        let target = Id::new([9; 32]);
        assert_eq!(fixture.overlay.phase(), PqPhase::Idle);

        // Our own proposal starts the round.
        let actions = fixture.overlay.enqueue_finalized(target, 7).unwrap();
        assert!(matches!(actions[0], PqAction::BroadcastProposal(_)));
        assert_eq!(fixture.overlay.phase(), PqPhase::Propose);

        // The second proposal does not reach alpha_preference = 3 yet.
        let proposal = proposal_from(&fixture, 1, target, 7);
        assert!(fixture.overlay.handle_proposal(proposal).unwrap().is_empty());
        assert_eq!(fixture.overlay.phase(), PqPhase::Propose);

        // The third moves the round to Commit and produces our commit.
        let proposal = proposal_from(&fixture, 2, target, 7);
        let actions = fixture.overlay.handle_proposal(proposal).unwrap();
        assert!(matches!(actions[0], PqAction::BroadcastCommit(_)));
        assert_eq!(fixture.overlay.phase(), PqPhase::Commit);

        // A late proposal is out of order now.
        let late = proposal_from(&fixture, 3, target, 7);
        assert!(matches!(
            fixture.overlay.handle_proposal(late),
            Err(ConsensusError::WrongPhase { .. })
        ));

        // Two more commits reach alpha_confidence = 3 and emit the bundle.
        let commit = commit_from(&fixture, 1, target, 7);
        assert!(fixture.overlay.handle_commit(commit).unwrap().is_empty());
        let commit = commit_from(&fixture, 2, target, 7);
        fixture.overlay.handle_commit(commit).unwrap();

        let bundle = fixture.cert_receiver.try_recv().unwrap();
        assert_eq!(bundle.target, target);
        assert_eq!(bundle.height, 7);
        assert_eq!(fixture.overlay.phase(), PqPhase::Idle);
        assert_eq!(fixture.overlay.round_number(), 1);

        // Both halves of the certificate verify.
        let digest = commit_digest(0, target, 7);
        assert!(fixture.scheme.verify(digest.as_bytes(), &bundle.pq_cert));
        let aggregate = AuthorityAggregateSignature::from_bytes(&bundle.bls_agg).unwrap();
        let mut signer_keys: Vec<_> = fixture.committee_keys[..3]
            .iter()
            .map(|(_, keypair)| keypair.public())
            .collect();
        signer_keys.sort();
        aggregate.verify(&signer_keys, digest.as_bytes()).unwrap();

        // Round-trip through the wire framing preserves verification.
        let decoded = CertBundle::decode(&bundle.encode().unwrap()).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn equivocating_proposals_are_dropped_and_penalized() {
        let mut fixture = fixture();
        let target = Id::new([9; 32]);
        fixture.overlay.enqueue_finalized(target, 7).unwrap();

        let proposal = proposal_from(&fixture, 1, target, 7);
        fixture.overlay.handle_proposal(proposal).unwrap();
        let second = proposal_from(&fixture, 1, Id::new([8; 32]), 7);
        assert!(matches!(
            fixture.overlay.handle_proposal(second),
            Err(ConsensusError::InvalidProposal { .. })
        ));
        // The first proposal still stands; one more finishes the phase.
        assert_eq!(fixture.overlay.phase(), PqPhase::Propose);
        let proposal = proposal_from(&fixture, 2, target, 7);
        fixture.overlay.handle_proposal(proposal).unwrap();
        assert_eq!(fixture.overlay.phase(), PqPhase::Commit);
    }

    #[test]
    fn tampered_proposal_digest_is_invalid() {
        let mut fixture = fixture();
        let target = Id::new([9; 32]);
        fixture.overlay.enqueue_finalized(target, 7).unwrap();

        let mut proposal = proposal_from(&fixture, 1, target, 7);
        proposal.height = 8;
        assert!(matches!(
            fixture.overlay.handle_proposal(proposal),
            Err(ConsensusError::InvalidProposal { .. })
        ));
    }

    #[test]
    fn commits_are_rejected_outside_commit_phase() {
        let mut fixture = fixture();
        let target = Id::new([9; 32]);
        let commit = commit_from(&fixture, 1, target, 7);
        assert!(matches!(
            fixture.overlay.handle_commit(commit),
            Err(ConsensusError::WrongPhase { .. })
        ));
    }

    #[test]
    fn commit_for_wrong_target_is_invalid() {
        let mut fixture = fixture();
        let target = Id::new([9; 32]);
        fixture.overlay.enqueue_finalized(target, 7).unwrap();
        for index in 1..3 {
            let proposal = proposal_from(&fixture, index, target, 7);
            fixture.overlay.handle_proposal(proposal).unwrap();
        }
        assert_eq!(fixture.overlay.phase(), PqPhase::Commit);

        let stray = commit_from(&fixture, 1, Id::new([8; 32]), 7);
        assert!(matches!(
            fixture.overlay.handle_commit(stray),
            Err(ConsensusError::InvalidCommit { .. })
        ));
    }

    #[test]
    fn forged_commit_signature_is_invalid() {
        let mut fixture = fixture();
        let target = Id::new([9; 32]);
        fixture.overlay.enqueue_finalized(target, 7).unwrap();
        for index in 1..3 {
            let proposal = proposal_from(&fixture, index, target, 7);
            fixture.overlay.handle_proposal(proposal).unwrap();
        }

        let mut forged = commit_from(&fixture, 1, target, 7);
        forged.committer = fixture.committee_keys[3].0;
        assert!(matches!(
            fixture.overlay.handle_commit(forged),
            Err(ConsensusError::InvalidCommit { .. })
        ));
    }

    #[test]
    fn epoch_change_resets_the_round_and_requeues() {
        let mut fixture = fixture();
        let target = Id::new([9; 32]);
        fixture.overlay.enqueue_finalized(target, 7).unwrap();
        let proposal = proposal_from(&fixture, 1, target, 7);
        fixture.overlay.handle_proposal(proposal).unwrap();
        assert_eq!(fixture.overlay.phase(), PqPhase::Propose);

        let actions = fixture.overlay.epoch_change().unwrap();
        // The target is re-proposed under the new round number.
        assert!(matches!(actions[0], PqAction::BroadcastProposal(_)));
        assert_eq!(fixture.overlay.round_number(), 1);
        assert_eq!(fixture.overlay.phase(), PqPhase::Propose);
    }

    #[test]
    fn queued_targets_certify_one_round_at_a_time() {
        let mut fixture = fixture();
        let first = Id::new([9; 32]);
        let second = Id::new([10; 32]);
        fixture.overlay.enqueue_finalized(first, 7).unwrap();
        // The second target waits while a round is in flight.
        assert!(fixture.overlay.enqueue_finalized(second, 8).unwrap().is_empty());

        for index in 1..3 {
            let proposal = proposal_from(&fixture, index, first, 7);
            fixture.overlay.handle_proposal(proposal).unwrap();
        }
        for index in 1..3 {
            let commit = commit_from(&fixture, index, first, 7);
            let actions = fixture.overlay.handle_commit(commit).unwrap();
            if index == 2 {
                // Finishing the round auto-proposes the queued target.
                assert!(actions
                    .iter()
                    .any(|a| matches!(a, PqAction::BroadcastProposal(p) if p.target == second)));
            }
        }
        assert_eq!(fixture.cert_receiver.try_recv().unwrap().target, first);
        assert_eq!(fixture.overlay.round_number(), 1);
        assert_eq!(fixture.overlay.phase(), PqPhase::Propose);
    }
}
