// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Linear-chain engine: applies the deciders to a tree of blocks rooted at
//! the last accepted block. All siblings of a height form one conflict set;
//! accepting a block rejects its siblings and their whole subtrees.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::block::{Block, Height, Id};
use crate::block_verifier::BlockVerifier;
use crate::context::Context;
use crate::decider::Thresholds;
use crate::engine::Engine;
use crate::error::{ConsensusError, ConsensusResult};
use crate::network::RequestId;
use crate::signals::CoreSignals;
use crate::storage::Store;
use crate::tree::{PreferenceSet, SetStructure};
use crate::vote_bag::VoteBag;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Status {
    Accepted,
    Rejected,
}

/// A processing block together with the decision state over its children.
struct BlockRecord {
    block: Block,
    /// Set when a poll round failed; the next poll over this block's
    /// children first breaks their confidence runs.
    should_falter: bool,
    children: BTreeSet<Id>,
    /// Conflict set of the children, created on the first child.
    set: Option<PreferenceSet>,
    processing_since: Instant,
}

impl BlockRecord {
    fn new(block: Block) -> Self {
        Self {
            block,
            should_falter: false,
            children: BTreeSet::new(),
            set: None,
            processing_since: Instant::now(),
        }
    }
}

/// The decision engine over a linear chain.
pub struct ChainCore {
    context: Arc<Context>,
    verifier: Arc<dyn BlockVerifier>,
    store: Arc<dyn Store>,
    signals: CoreSignals,
    structure: SetStructure,
    thresholds: Thresholds,
    last_accepted: Id,
    last_accepted_height: Height,
    /// Processing blocks plus the last accepted block anchoring them.
    records: HashMap<Id, BlockRecord>,
    /// Terminal statuses; never unset once written.
    decided: HashMap<Id, Status>,
}

impl ChainCore {
    pub fn new(
        context: Arc<Context>,
        verifier: Arc<dyn BlockVerifier>,
        store: Arc<dyn Store>,
        signals: CoreSignals,
        genesis: Block,
    ) -> ConsensusResult<Self> {
        let genesis_id = genesis.id();
        let genesis_height = genesis.height();
        store.write_accepted(&genesis)?;
        let thresholds = Thresholds::new(&context.parameters);

        let mut records = HashMap::new();
        records.insert(genesis_id, BlockRecord::new(genesis));
        let mut decided = HashMap::new();
        decided.insert(genesis_id, Status::Accepted);

        Ok(Self {
            context,
            verifier,
            store,
            signals,
            structure: SetStructure::Tree,
            thresholds,
            last_accepted: genesis_id,
            last_accepted_height: genesis_height,
            records,
            decided,
        })
    }

    /// Selects the conflict-set structure; Tree unless the embedder knows
    /// its conflict sets are small and enumerable.
    pub fn with_structure(mut self, structure: SetStructure) -> Self {
        self.structure = structure;
        self
    }

    /// Takes a verified block into the Processing state. Re-adding a known
    /// block is a no-op; adding a block whose parent was rejected rejects
    /// the block as well.
    pub fn add(&mut self, block: Block) -> ConsensusResult<()> {
        let id = block.id();
        match self.decided.get(&id) {
            Some(Status::Accepted) => return Ok(()),
            Some(Status::Rejected) => return Err(ConsensusError::AlreadyDecided(id)),
            None => {}
        }
        if self.records.contains_key(&id) {
            return Ok(());
        }

        self.verifier.verify(&block).map_err(|error| {
            self.context.metrics.invalid_items.inc();
            ConsensusError::InvalidBlock {
                id,
                reason: error.to_string(),
            }
        })?;

        let parent = block.parent();
        match self.decided.get(&parent) {
            Some(Status::Rejected) => {
                self.reject(id);
                return Err(ConsensusError::ParentRejected { id, parent });
            }
            Some(Status::Accepted) if !self.records.contains_key(&parent) => {
                // The conflict set at the parent's height is long settled;
                // this block lost it without ever being polled.
                debug!("Rejecting block {id} conflicting with accepted history");
                self.reject(id);
                return Ok(());
            }
            _ => {}
        }
        let Some(parent_record) = self.records.get(&parent) else {
            return Err(ConsensusError::MissingParent { id, parent });
        };

        let expected_height = parent_record.block.height() + 1;
        if block.height() != expected_height {
            self.context.metrics.invalid_items.inc();
            return Err(ConsensusError::InvalidBlock {
                id,
                reason: format!(
                    "height {} does not follow parent height {}",
                    block.height(),
                    parent_record.block.height()
                ),
            });
        }
        let min_timestamp_ms = parent_record.block.timestamp_ms()
            + self.context.parameters.min_block_delay.as_millis() as u64;
        if block.timestamp_ms() < min_timestamp_ms {
            self.context.metrics.invalid_items.inc();
            return Err(ConsensusError::InvalidBlock {
                id,
                reason: format!(
                    "timestamp {} is under the minimum {min_timestamp_ms}",
                    block.timestamp_ms()
                ),
            });
        }
        if self.num_processing() >= self.context.parameters.max_outstanding_items {
            return Err(ConsensusError::TooManyProcessing {
                limit: self.context.parameters.max_outstanding_items,
            });
        }

        self.records.insert(id, BlockRecord::new(block));
        let parent_record = self
            .records
            .get_mut(&parent)
            .expect("Parent record was just looked up");
        parent_record.children.insert(id);
        parent_record
            .set
            .get_or_insert_with(|| PreferenceSet::new(self.structure, self.thresholds.clone()))
            .add(id);

        self.context
            .metrics
            .processing_items
            .set(self.num_processing() as i64);
        debug!("Added block {id} under parent {parent}");
        Ok(())
    }

    /// Applies one poll. Votes for a block count for each of its ancestors
    /// in that ancestor's conflict set; every open conflict set then records
    /// the poll, an empty share of the votes being an unsuccessful one.
    pub fn record_poll(&mut self, request_id: RequestId, bag: VoteBag) -> ConsensusResult<bool> {
        // Attribution walk, bottom-up per vote.
        let mut attributed: BTreeMap<(Height, Id), VoteBag> = BTreeMap::new();
        for (id, count) in bag.iter() {
            let mut current = *id;
            while current != self.last_accepted {
                let Some(record) = self.records.get(&current) else {
                    // Unknown or already decided; nothing to attribute.
                    break;
                };
                let parent = record.block.parent();
                let Some(parent_record) = self.records.get(&parent) else {
                    break;
                };
                attributed
                    .entry((parent_record.block.height(), parent))
                    .or_default()
                    .add_count(current, count);
                current = parent;
            }
        }

        // Poll every open conflict set, parents before children.
        let mut order: Vec<(Height, Id)> = self
            .records
            .iter()
            .filter(|(_, record)| record.set.is_some())
            .map(|(id, record)| (record.block.height(), *id))
            .collect();
        order.sort();

        let mut root_successful = false;
        for (height, id) in order {
            let record = self
                .records
                .get_mut(&id)
                .expect("Records are not removed while polling");
            let set = record.set.as_mut().expect("Only records with sets are polled");
            if record.should_falter {
                set.record_unsuccessful_poll();
                record.should_falter = false;
            }
            let votes = attributed.remove(&(height, id));
            let successful = match votes {
                Some(votes) => set.record_poll(&votes),
                None => {
                    set.record_unsuccessful_poll();
                    false
                }
            };
            if id == self.last_accepted {
                root_successful = successful;
            }
        }

        if !root_successful {
            debug!("Poll {request_id} was unsuccessful");
            self.context.metrics.unsuccessful_polls.inc();
            for record in self.records.values_mut() {
                record.should_falter = true;
            }
            return Ok(false);
        }

        self.context.metrics.successful_polls.inc();
        self.accept_preferred()?;
        Ok(true)
    }

    /// Descends from the last accepted block, accepting every finalized
    /// preferred child and rejecting its siblings, until an unsettled
    /// conflict set is reached.
    fn accept_preferred(&mut self) -> ConsensusResult<()> {
        loop {
            let record = self
                .records
                .get(&self.last_accepted)
                .expect("The last accepted block always has a record");
            let Some(set) = &record.set else {
                return Ok(());
            };
            if !set.finalized() {
                return Ok(());
            }
            let preferred = set.preference();
            let siblings: Vec<Id> = record
                .children
                .iter()
                .filter(|child| **child != preferred)
                .copied()
                .collect();

            let preferred_record = self
                .records
                .get(&preferred)
                .expect("Finalized preference is a registered child");
            let block = preferred_record.block.clone();
            let processing_time = preferred_record.processing_since.elapsed();

            // Durable before anyone is told.
            self.store.write_accepted(&block)?;

            self.decided.insert(preferred, Status::Accepted);
            self.context.metrics.items_accepted.inc();
            self.context
                .metrics
                .item_processing_time
                .observe(processing_time.as_secs_f64());
            if processing_time > self.context.parameters.max_item_processing_time {
                warn!(
                    "Block {preferred} took {processing_time:?} to finalize, over the configured \
                     maximum"
                );
            }
            self.signals.item_accepted(preferred);
            info!(
                "Accepted block {preferred} at height {}, rejecting {} siblings",
                block.height(),
                siblings.len()
            );

            for sibling in siblings {
                self.reject_subtree(sibling);
            }

            self.records.remove(&self.last_accepted);
            self.last_accepted = preferred;
            self.last_accepted_height = block.height();
            self.context
                .metrics
                .processing_items
                .set(self.num_processing() as i64);
        }
    }

    /// Rejects a block and every descendant; none of them can ever gain an
    /// accepted ancestor chain again.
    fn reject_subtree(&mut self, id: Id) {
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let Some(record) = self.records.remove(&current) else {
                continue;
            };
            self.reject(current);
            queue.extend(record.children.iter().copied());
        }
    }

    fn reject(&mut self, id: Id) {
        self.decided.insert(id, Status::Rejected);
        self.context.metrics.items_rejected.inc();
        self.signals.item_rejected(id);
        debug!("Rejected block {id}");
    }

    /// The deepest id reached by following preferred children from the last
    /// accepted block.
    pub fn preference(&self) -> Id {
        let mut current = self.last_accepted;
        loop {
            let next = match self.records.get(&current).and_then(|record| record.set.as_ref()) {
                None => return current,
                Some(set) => set.preference(),
            };
            if next.is_empty() {
                return current;
            }
            current = next;
        }
    }

    pub fn is_accepted(&self, id: &Id) -> bool {
        self.decided.get(id) == Some(&Status::Accepted)
    }

    pub fn is_rejected(&self, id: &Id) -> bool {
        self.decided.get(id) == Some(&Status::Rejected)
    }

    pub fn last_accepted(&self) -> Id {
        self.last_accepted
    }

    pub fn last_accepted_height(&self) -> Height {
        self.last_accepted_height
    }

    /// A processing or last-accepted block by id.
    pub fn block(&self, id: &Id) -> Option<&Block> {
        self.records.get(id).map(|record| &record.block)
    }

    pub fn num_processing(&self) -> usize {
        // The last accepted block's record only anchors its children.
        self.records.len() - 1
    }
}

impl Engine for ChainCore {
    fn record_poll(&mut self, request_id: RequestId, bag: VoteBag) -> ConsensusResult<bool> {
        ChainCore::record_poll(self, request_id, bag)
    }

    fn preference(&self) -> Id {
        ChainCore::preference(self)
    }

    fn height(&self) -> Height {
        self.last_accepted_height
    }

    fn is_accepted(&self, id: &Id) -> bool {
        ChainCore::is_accepted(self, id)
    }

    fn is_rejected(&self, id: &Id) -> bool {
        ChainCore::is_rejected(self, id)
    }

    fn num_processing(&self) -> usize {
        ChainCore::num_processing(self)
    }
}
