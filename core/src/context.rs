// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use lux_config::{Committee, NodeId, Parameters};
#[cfg(test)]
use lux_config::{AuthorityKeyPair, NetworkKeyPair};

#[cfg(test)]
use crate::metrics::test_metrics;
use crate::block::Id;
use crate::error::ConsensusResult;
use crate::metrics::Metrics;

/// Context contains the per-instance configuration and metrics shared by all
/// components of this validator: its identity, the chain it votes on, the
/// committee of the current epoch, and the protocol parameters.
#[derive(Clone)]
pub struct Context {
    /// This validator's id; `NodeId::EMPTY` for an observer.
    pub own_node: NodeId,
    /// The chain this instance decides for.
    pub chain: Id,
    /// Committee of the current epoch.
    pub committee: Arc<Committee>,
    /// Protocol parameters, verified at construction.
    pub parameters: Parameters,
    /// Metrics of this instance.
    pub metrics: Arc<Metrics>,
}

impl Context {
    pub fn new(
        own_node: NodeId,
        chain: Id,
        committee: Arc<Committee>,
        parameters: Parameters,
        metrics: Arc<Metrics>,
    ) -> ConsensusResult<Self> {
        parameters.verify()?;
        Ok(Self {
            own_node,
            chain,
            committee,
            parameters,
            metrics,
        })
    }

    /// Create a test context with a committee of the given size, even stakes,
    /// and small thresholds (k = 3, alpha_preference = 2, alpha_confidence =
    /// 3, beta = 2).
    #[cfg(test)]
    pub(crate) fn new_for_test(
        committee_size: usize,
    ) -> (Self, Vec<(NetworkKeyPair, AuthorityKeyPair)>) {
        let (committee, key_pairs) =
            lux_config::local_committee_and_keys(0, vec![1; committee_size]);
        let own_node = *committee.node_ids().first().expect("Committee is not empty");
        let context = Context::new(
            own_node,
            Id::new([0xC; 32]),
            Arc::new(committee),
            Parameters::new_single_tier(3, 2, 3, 2).unwrap(),
            test_metrics(),
        )
        .unwrap();
        (context, key_pairs)
    }

    #[cfg(test)]
    pub(crate) fn with_parameters(mut self, parameters: Parameters) -> Self {
        parameters.verify().expect("Test parameters must be valid");
        self.parameters = parameters;
        self
    }
}
