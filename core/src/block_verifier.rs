// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::block::Block;
use crate::error::ConsensusResult;
use crate::vertex::Vertex;

/// Verifies the application contents of a block before the engine takes it.
///
/// All honest validators must produce the same verification outcome for the
/// same block, so a verification error implies the block can never be
/// accepted anywhere.
pub trait BlockVerifier: Send + Sync + 'static {
    fn verify(&self, block: &Block) -> ConsensusResult<()>;
}

/// Verifies the application contents of a vertex, with the same determinism
/// requirement as [`BlockVerifier`].
pub trait VertexVerifier: Send + Sync + 'static {
    fn verify(&self, vertex: &Vertex) -> ConsensusResult<()>;
}

/// Allows all items to pass verification, for testing.
pub struct NoopVerifier;

impl BlockVerifier for NoopVerifier {
    fn verify(&self, _block: &Block) -> ConsensusResult<()> {
        Ok(())
    }
}

impl VertexVerifier for NoopVerifier {
    fn verify(&self, _vertex: &Vertex) -> ConsensusResult<()> {
        Ok(())
    }
}
