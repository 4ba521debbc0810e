// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use lux_config::NodeId;

use crate::block::Id;
use crate::error::ConsensusResult;

/// Identifier of one poll; monotone within a scheduler instance.
pub type RequestId = u32;

/// Outbound port to the gossip/RPC layer. The transport itself is a
/// collaborator; the scheduler only needs to fire queries and receive
/// [`QueryEvent`]s on its inbound channel.
#[async_trait]
pub trait NetworkClient: Send + Sync + 'static {
    /// Asks `peer` for its current preference given `target`, our preferred
    /// id at emission time.
    async fn send_query(
        &self,
        peer: NodeId,
        chain: Id,
        request_id: RequestId,
        target: Id,
    ) -> ConsensusResult<()>;
}

/// Inbound events the transport delivers to the scheduler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum QueryEvent {
    /// A validator answered a query with its preferred id.
    Reply {
        peer: NodeId,
        request_id: RequestId,
        preference: Id,
    },
    /// The transport gave up on a query (disconnect, send failure).
    Dropped { peer: NodeId, request_id: RequestId },
}
