// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::block::{Height, Id};
use crate::error::ConsensusResult;
use crate::network::RequestId;
use crate::vote_bag::VoteBag;

/// The poll-facing surface shared by [`crate::chain::ChainCore`] and
/// [`crate::dag::DagCore`], letting one scheduler drive either engine.
///
/// Engines are synchronous: a poll is bag in, state delta out. All async
/// lifting happens in the scheduler and the network port.
pub trait Engine: Send + Sync + 'static {
    /// Applies one poll's votes. Returns whether the poll met
    /// alpha_preference at the root of the conflict structure.
    fn record_poll(&mut self, request_id: RequestId, bag: VoteBag) -> ConsensusResult<bool>;

    /// The id this validator answers queries with.
    fn preference(&self) -> Id;

    /// The height the engine is currently deciding at; the scheduler
    /// samples each round's committee from the validator set of this
    /// height.
    fn height(&self) -> Height;

    fn is_accepted(&self, id: &Id) -> bool;

    fn is_rejected(&self, id: &Id) -> bool;

    /// Number of items still undecided.
    fn num_processing(&self) -> usize;
}
