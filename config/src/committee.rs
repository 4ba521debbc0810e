// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AuthorityPublicKey, NetworkPublicKey};

/// Committee of the consensus protocol is updated each epoch.
pub type Epoch = u64;

/// Voting power of a validator, proportional to its bonded stake.
pub type Stake = u64;

/// Identifier of a validator: the bytes of its network public key.
/// `NodeId::EMPTY` denotes an unknown validator.
#[derive(
    Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub const EMPTY: NodeId = NodeId([0; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl From<&NetworkPublicKey> for NodeId {
    fn from(key: &NetworkPublicKey) -> Self {
        Self(key.to_bytes())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "N{}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, self.0)
        )
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{self:?}")
    }
}

/// One validator in the committee.
#[derive(Clone, Serialize, Deserialize)]
pub struct Authority {
    /// Voting power of the validator.
    pub stake: Stake,
    /// The validator's hostname, for metrics and logging.
    pub hostname: String,
    /// The validator's ed25519 key identifying it on the network.
    pub network_key: NetworkPublicKey,
    /// The validator's BLS key used in certificate aggregation.
    pub authority_key: AuthorityPublicKey,
}

/// Committee is the set of validators that participate in the consensus
/// protocol for this epoch. Iteration order is by NodeId ascending, so every
/// node enumerates the same committee the same way.
#[derive(Clone, Serialize, Deserialize)]
pub struct Committee {
    /// The epoch number of this committee.
    epoch: Epoch,
    /// Validators keyed by their node id.
    authorities: BTreeMap<NodeId, Authority>,
    /// Total stake in the committee.
    total_stake: Stake,
}

impl Committee {
    /// Committee should be created via the CommitteeBuilder - this is
    /// intentionally marked as a private method.
    fn new(epoch: Epoch, authorities: BTreeMap<NodeId, Authority>) -> Self {
        let total_stake = authorities.values().map(|a| a.stake).sum();
        assert_ne!(total_stake, 0, "Total stake cannot be zero!");
        Self {
            epoch,
            authorities,
            total_stake,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn total_stake(&self) -> Stake {
        self.total_stake
    }

    pub fn stake(&self, node: &NodeId) -> Option<Stake> {
        self.authorities.get(node).map(|a| a.stake)
    }

    pub fn authority(&self, node: &NodeId) -> Option<&Authority> {
        self.authorities.get(node)
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.authorities.contains_key(node)
    }

    /// Validators in NodeId-ascending order.
    pub fn authorities(&self) -> impl Iterator<Item = (&NodeId, &Authority)> {
        self.authorities.iter()
    }

    /// Node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.authorities.keys().copied().collect()
    }

    /// Returns the number of validators.
    pub fn size(&self) -> usize {
        self.authorities.len()
    }
}

/// Use builder to construct a Committee.
pub struct CommitteeBuilder {
    epoch: Epoch,
    authorities: BTreeMap<NodeId, Authority>,
}

impl CommitteeBuilder {
    /// Epoch is constant and cannot be updated later.
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            authorities: BTreeMap::new(),
        }
    }

    /// All validators added to the CommitteeBuilder will be part of the
    /// Committee. The node id is derived from the network key, so re-adding
    /// the same key replaces the earlier entry.
    pub fn add_authority(
        &mut self,
        stake: Stake,
        hostname: String,
        network_key: NetworkPublicKey,
        authority_key: AuthorityPublicKey,
    ) -> &mut Self {
        let node_id = NodeId::from(&network_key);
        self.authorities.insert(
            node_id,
            Authority {
                stake,
                hostname,
                network_key,
                authority_key,
            },
        );
        self
    }

    /// Consumes self and creates a Committee.
    pub fn build(self) -> Committee {
        Committee::new(self.epoch, self.authorities)
    }
}
