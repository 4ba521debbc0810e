// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Decision engine of the Lux repeated-polling consensus family.
//!
//! The pipeline is sampling -> thresholding -> confidence -> finalization:
//! an [`Emitter`] picks the committee each round, the [`Scheduler`] fans the
//! query out and bags the replies, and a [`ChainCore`] or [`DagCore`] routes
//! the bag through its deciders until items finalize. The optional
//! [`PqOverlay`] upgrades finalized items into hybrid classical +
//! post-quantum certificates.

mod block;
mod block_verifier;
mod certificate;
mod chain;
mod clock;
mod context;
mod dag;
mod decider;
mod emitter;
mod engine;
mod error;
mod metrics;
mod network;
mod pq;
mod pq_overlay;
mod scheduler;
mod signals;
mod storage;
mod tree;
mod validators;
mod vertex;
mod vote_bag;

#[cfg(test)]
mod tests;

pub use block::{Block, Height, Id, Round, TestBlock, TimestampMs};
pub use block_verifier::{BlockVerifier, NoopVerifier, VertexVerifier};
pub use certificate::CertBundle;
pub use chain::ChainCore;
pub use clock::{Clock, SystemClock, TestClock};
pub use context::Context;
pub use dag::DagCore;
pub use emitter::{Emitter, EmitterOptions};
pub use engine::Engine;
pub use error::{ConsensusError, ConsensusResult};
pub use metrics::{test_metrics, Metrics};
pub use network::{NetworkClient, QueryEvent, RequestId};
pub use pq::{PqScheme, TestPqScheme};
pub use pq_overlay::{commit_digest, Commit, PqAction, PqOverlay, PqPhase, Proposal};
pub use scheduler::Scheduler;
pub use signals::{CoreSignals, CoreSignalsReceivers};
pub use storage::{MemStore, Store};
pub use tree::SetStructure;
pub use validators::{CachingValidatorState, FixedValidatorState, ValidatorState};
pub use vertex::{TestVertex, Utxo, Vertex};
pub use vote_bag::VoteBag;
