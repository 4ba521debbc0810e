// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! DAG engine: applies per-vertex deciders over a partial order of vertices
//! whose conflicts come from shared Utxo inputs. Acceptance is topological
//! (all parents first) and excludes every vertex spending an already spent
//! input.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::block::{Height, Id};
use crate::block_verifier::VertexVerifier;
use crate::context::Context;
use crate::decider::{Decider, DeciderAPI as _, Monadic, Thresholds};
use crate::engine::Engine;
use crate::error::{ConsensusError, ConsensusResult};
use crate::network::RequestId;
use crate::signals::CoreSignals;
use crate::vertex::{Utxo, Vertex};
use crate::vote_bag::VoteBag;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum VertexStatus {
    Processing,
    Accepted,
    Rejected,
}

struct VertexRecord {
    vertex: Vertex,
    status: VertexStatus,
    /// Monadic: a vertex only ever builds confidence for itself, its
    /// conflicts are resolved through the Utxo graph.
    decider: Decider,
    /// Live (non-rejected) children.
    children: BTreeSet<Id>,
    processing_since: Instant,
}

/// The decision engine over a DAG of Utxo-spending vertices.
pub struct DagCore {
    context: Arc<Context>,
    verifier: Arc<dyn VertexVerifier>,
    signals: CoreSignals,
    thresholds: Thresholds,
    records: HashMap<Id, VertexRecord>,
    /// Highest vertex height seen; the committee height for sampling.
    height: Height,
    /// Vertices with no live children, ascending; the candidate parents of
    /// the next proposal.
    frontier: BTreeSet<Id>,
    /// Which undecided-or-accepted vertices claim each input.
    utxo_spenders: HashMap<Utxo, BTreeSet<Id>>,
}

impl DagCore {
    pub fn new(
        context: Arc<Context>,
        verifier: Arc<dyn VertexVerifier>,
        signals: CoreSignals,
    ) -> Self {
        let thresholds = Thresholds::new(&context.parameters);
        Self {
            context,
            verifier,
            signals,
            thresholds,
            records: HashMap::new(),
            height: 0,
            frontier: BTreeSet::new(),
            utxo_spenders: HashMap::new(),
        }
    }

    /// Takes a vertex into the Processing state. Parentless vertices are
    /// height-0 roots; all others must name known, non-rejected parents.
    pub fn add_vertex(&mut self, vertex: Vertex) -> ConsensusResult<()> {
        let id = vertex.id();
        if let Some(record) = self.records.get(&id) {
            return match record.status {
                VertexStatus::Rejected => Err(ConsensusError::AlreadyDecided(id)),
                _ => Ok(()),
            };
        }

        self.verifier.verify(&vertex).map_err(|error| {
            self.context.metrics.invalid_items.inc();
            ConsensusError::InvalidVertex {
                id,
                reason: error.to_string(),
            }
        })?;

        let mut max_parent_height = None;
        let mut rejected_parent = None;
        for parent in vertex.parents() {
            if parent.is_empty() {
                self.context.metrics.invalid_items.inc();
                return Err(ConsensusError::InvalidParent { id });
            }
            let Some(parent_record) = self.records.get(parent) else {
                return Err(ConsensusError::MissingParent { id, parent: *parent });
            };
            if parent_record.status == VertexStatus::Rejected {
                rejected_parent = Some(*parent);
                break;
            }
            max_parent_height = Some(
                max_parent_height
                    .unwrap_or(0)
                    .max(parent_record.vertex.height()),
            );
        }
        if let Some(parent) = rejected_parent {
            self.insert_rejected(vertex);
            return Err(ConsensusError::ParentRejected { id, parent });
        }
        if vertex.inputs().is_empty() {
            self.context.metrics.invalid_items.inc();
            return Err(ConsensusError::InvalidVertex {
                id,
                reason: "vertex spends no inputs".to_string(),
            });
        }
        let expected_height = max_parent_height.map(|h| h + 1).unwrap_or(0);
        if vertex.height() != expected_height {
            self.context.metrics.invalid_items.inc();
            return Err(ConsensusError::InvalidVertex {
                id,
                reason: format!(
                    "height {} does not follow parents, expected {expected_height}",
                    vertex.height()
                ),
            });
        }
        if self.num_processing() >= self.context.parameters.max_outstanding_items {
            return Err(ConsensusError::TooManyProcessing {
                limit: self.context.parameters.max_outstanding_items,
            });
        }
        // A vertex spending an input an accepted vertex already spent lost
        // its conflict set before arriving.
        let spent = vertex.inputs().iter().any(|input| {
            self.utxo_spenders
                .get(input)
                .into_iter()
                .flatten()
                .any(|spender| self.records[spender].status == VertexStatus::Accepted)
        });
        if spent {
            debug!("Rejecting vertex {id} spending an already spent input");
            self.insert_rejected(vertex);
            return Ok(());
        }

        for input in vertex.inputs() {
            self.utxo_spenders.entry(*input).or_default().insert(id);
        }
        for parent in vertex.parents() {
            self.frontier.remove(parent);
            self.records
                .get_mut(parent)
                .expect("Parents were checked above")
                .children
                .insert(id);
        }
        self.frontier.insert(id);
        self.height = self.height.max(vertex.height());
        self.records.insert(
            id,
            VertexRecord {
                decider: Monadic::new(self.thresholds.clone(), id).into(),
                vertex,
                status: VertexStatus::Processing,
                children: BTreeSet::new(),
                processing_since: Instant::now(),
            },
        );
        self.context
            .metrics
            .processing_items
            .set(self.num_processing() as i64);
        debug!("Added vertex {id}");
        Ok(())
    }

    fn insert_rejected(&mut self, vertex: Vertex) {
        let id = vertex.id();
        self.records.insert(
            id,
            VertexRecord {
                decider: Monadic::new(self.thresholds.clone(), id).into(),
                vertex,
                status: VertexStatus::Rejected,
                children: BTreeSet::new(),
                processing_since: Instant::now(),
            },
        );
        self.context.metrics.items_rejected.inc();
        self.signals.item_rejected(id);
    }

    /// Applies one poll: each voted vertex's decider records its share of
    /// the votes, then every finalized vertex whose parents are all accepted
    /// is accepted, rejecting its conflictors. Returns whether the bag's
    /// mode met alpha_preference.
    pub fn record_poll(&mut self, request_id: RequestId, bag: VoteBag) -> ConsensusResult<bool> {
        let successful = bag
            .mode()
            .is_some_and(|(_, count)| count >= self.context.parameters.alpha_preference);
        if successful {
            self.context.metrics.successful_polls.inc();
        } else {
            debug!("Poll {request_id} was unsuccessful");
            self.context.metrics.unsuccessful_polls.inc();
        }

        for (id, count) in bag.iter() {
            let Some(record) = self.records.get_mut(id) else {
                continue;
            };
            if record.status != VertexStatus::Processing {
                continue;
            }
            if count >= self.context.parameters.alpha_preference {
                record.decider.record_poll(count, *id);
            } else {
                record.decider.record_unsuccessful_poll();
            }
        }

        self.accept_finalized();
        Ok(successful)
    }

    /// Feeds one synthetic poll outcome into the vertex's decider: a
    /// full-strength poll for an accept vote, an unsuccessful one otherwise.
    pub fn record_vote(&mut self, id: Id, accept: bool) {
        let k = self.context.parameters.k;
        if let Some(record) = self.records.get_mut(&id) {
            if record.status != VertexStatus::Processing {
                return;
            }
            if accept {
                record.decider.record_poll(k, id);
            } else {
                record.decider.record_unsuccessful_poll();
            }
        }
        self.accept_finalized();
    }

    /// Accepts every finalized vertex whose parents are all accepted,
    /// repeating until the frontier of decisions stops moving. Iteration is
    /// in id order, so acceptance order is deterministic for equal-height
    /// candidates and parents always precede children.
    fn accept_finalized(&mut self) {
        loop {
            let candidates: Vec<Id> = {
                let mut ready: Vec<Id> = self
                    .records
                    .iter()
                    .filter(|(_, record)| {
                        record.status == VertexStatus::Processing && record.decider.finalized()
                    })
                    .filter(|(_, record)| {
                        record.vertex.parents().iter().all(|parent| {
                            self.records
                                .get(parent)
                                .is_some_and(|p| p.status == VertexStatus::Accepted)
                        })
                    })
                    .map(|(id, _)| *id)
                    .collect();
                ready.sort();
                ready
            };
            if candidates.is_empty() {
                return;
            }
            for id in candidates {
                // A previous candidate's conflict rejection may have taken
                // this one out already.
                if self
                    .records
                    .get(&id)
                    .is_some_and(|record| record.status == VertexStatus::Processing)
                {
                    self.accept(id);
                }
            }
        }
    }

    fn accept(&mut self, id: Id) {
        let record = self
            .records
            .get_mut(&id)
            .expect("Accept candidates are registered");
        record.status = VertexStatus::Accepted;
        let processing_time = record.processing_since.elapsed();
        let inputs = record.vertex.inputs().to_vec();

        self.context.metrics.items_accepted.inc();
        self.context
            .metrics
            .item_processing_time
            .observe(processing_time.as_secs_f64());
        if processing_time > self.context.parameters.max_item_processing_time {
            warn!("Vertex {id} took {processing_time:?} to finalize, over the configured maximum");
        }
        self.signals.item_accepted(id);
        info!("Accepted vertex {id}");

        // Acceptance excludes every other spender of these inputs.
        let mut conflictors = BTreeSet::new();
        for input in &inputs {
            if let Some(spenders) = self.utxo_spenders.get(input) {
                conflictors.extend(
                    spenders
                        .iter()
                        .filter(|spender| **spender != id)
                        .filter(|spender| {
                            self.records[*spender].status == VertexStatus::Processing
                        })
                        .copied(),
                );
            }
        }
        for conflictor in conflictors {
            self.reject_cascade(conflictor);
        }
        self.context
            .metrics
            .processing_items
            .set(self.num_processing() as i64);
    }

    /// Rejects a vertex and every descendant; a vertex with a rejected
    /// parent can never satisfy parent-before-child acceptance.
    fn reject_cascade(&mut self, id: Id) {
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let Some(record) = self.records.get_mut(&current) else {
                continue;
            };
            if record.status != VertexStatus::Processing {
                continue;
            }
            record.status = VertexStatus::Rejected;
            let parents = record.vertex.parents().to_vec();
            let inputs = record.vertex.inputs().to_vec();
            queue.extend(record.children.iter().copied());

            self.frontier.remove(&current);
            for input in inputs {
                if let Some(spenders) = self.utxo_spenders.get_mut(&input) {
                    spenders.remove(&current);
                }
            }
            for parent in parents {
                if let Some(parent_record) = self.records.get_mut(&parent) {
                    parent_record.children.remove(&current);
                    if parent_record.children.is_empty()
                        && parent_record.status != VertexStatus::Rejected
                    {
                        self.frontier.insert(parent);
                    }
                }
            }

            self.context.metrics.items_rejected.inc();
            self.signals.item_rejected(current);
            debug!("Rejected vertex {current}");
        }
        self.context
            .metrics
            .processing_items
            .set(self.num_processing() as i64);
    }

    /// All undecided vertices sharing an input with the given vertex,
    /// ascending. Decided vertices are filtered out.
    pub fn conflicts(&self, id: &Id) -> Vec<Id> {
        let Some(record) = self.records.get(id) else {
            return vec![];
        };
        let mut conflictors = BTreeSet::new();
        for input in record.vertex.inputs() {
            if let Some(spenders) = self.utxo_spenders.get(input) {
                conflictors.extend(
                    spenders
                        .iter()
                        .filter(|spender| *spender != id)
                        .filter(|spender| {
                            self.records[*spender].status == VertexStatus::Processing
                        })
                        .copied(),
                );
            }
        }
        conflictors.into_iter().collect()
    }

    /// The vertices with no live children, ascending by id. The ordering is
    /// what keeps different nodes proposing over the same parent set.
    pub fn frontier(&self) -> Vec<Id> {
        self.frontier.iter().copied().collect()
    }

    pub fn is_accepted(&self, id: &Id) -> bool {
        self.records
            .get(id)
            .is_some_and(|record| record.status == VertexStatus::Accepted)
    }

    pub fn is_rejected(&self, id: &Id) -> bool {
        self.records
            .get(id)
            .is_some_and(|record| record.status == VertexStatus::Rejected)
    }

    pub fn num_processing(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.status == VertexStatus::Processing)
            .count()
    }

    /// Highest vertex height seen so far.
    pub fn height(&self) -> Height {
        self.height
    }

    /// The id this validator answers queries with: the smallest undecided
    /// frontier vertex, or the smallest frontier entry once everything has
    /// settled.
    pub fn preference(&self) -> Id {
        self.frontier
            .iter()
            .find(|id| {
                self.records
                    .get(*id)
                    .is_some_and(|record| record.status == VertexStatus::Processing)
            })
            .or_else(|| self.frontier.iter().next())
            .copied()
            .unwrap_or(Id::EMPTY)
    }
}

impl Engine for DagCore {
    fn record_poll(&mut self, request_id: RequestId, bag: VoteBag) -> ConsensusResult<bool> {
        DagCore::record_poll(self, request_id, bag)
    }

    fn preference(&self) -> Id {
        DagCore::preference(self)
    }

    fn height(&self) -> Height {
        DagCore::height(self)
    }

    fn is_accepted(&self, id: &Id) -> bool {
        DagCore::is_accepted(self, id)
    }

    fn is_rejected(&self, id: &Id) -> bool {
        DagCore::is_rejected(self, id)
    }

    fn num_processing(&self) -> usize {
        DagCore::num_processing(self)
    }
}
