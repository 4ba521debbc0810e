// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::block::{Block, Id};
use crate::error::ConsensusResult;

/// Durable storage of accepted blocks. An accepted block must be persisted
/// before the engine reports the acceptance, so a write failure halts the
/// instance instead of being retried silently.
pub trait Store: Send + Sync + 'static {
    fn write_accepted(&self, block: &Block) -> ConsensusResult<()>;

    fn read(&self, id: &Id) -> ConsensusResult<Option<Block>>;

    fn last_accepted(&self) -> ConsensusResult<Id>;
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    blocks: BTreeMap<Id, Block>,
    last_accepted: Id,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn write_accepted(&self, block: &Block) -> ConsensusResult<()> {
        let mut inner = self.inner.write();
        inner.blocks.insert(block.id(), block.clone());
        inner.last_accepted = block.id();
        Ok(())
    }

    fn read(&self, id: &Id) -> ConsensusResult<Option<Block>> {
        Ok(self.inner.read().blocks.get(id).cloned())
    }

    fn last_accepted(&self) -> ConsensusResult<Id> {
        Ok(self.inner.read().last_accepted)
    }
}
