// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use lux_config::{InvalidParameters, NodeId};
use thiserror::Error;

use crate::block::Id;
use crate::network::RequestId;

/// Errors that can occur when processing items, polls, and certificate
/// messages.
#[derive(Clone, Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    InvalidParameters(#[from] InvalidParameters),

    #[error("invalid block {id}: {reason}")]
    InvalidBlock { id: Id, reason: String },

    #[error("invalid vertex {id}: {reason}")]
    InvalidVertex { id: Id, reason: String },

    #[error("missing parent {parent} of item {id}")]
    MissingParent { id: Id, parent: Id },

    #[error("parent {parent} of item {id} is rejected")]
    ParentRejected { id: Id, parent: Id },

    #[error("empty id in the parent list of vertex {id}")]
    InvalidParent { id: Id },

    #[error("item {0} is already decided")]
    AlreadyDecided(Id),

    #[error("{message} received in phase {phase}")]
    WrongPhase {
        message: &'static str,
        phase: &'static str,
    },

    #[error("invalid proposal from {proposer}: {reason}")]
    InvalidProposal { proposer: NodeId, reason: String },

    #[error("invalid commit from {committer}: {reason}")]
    InvalidCommit { committer: NodeId, reason: String },

    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    #[error("insufficient peers: {found} eligible, {required} required")]
    InsufficientPeers { found: usize, required: usize },

    #[error("request {0} timed out")]
    Timeout(RequestId),

    #[error("too many items processing, limit is {limit}")]
    TooManyProcessing { limit: usize },

    #[error("consensus has shut down")]
    Shutdown,

    #[error("storage failure: {0}")]
    StorageError(String),
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;
