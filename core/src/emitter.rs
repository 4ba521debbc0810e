// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use fastcrypto::hash::HashFunction;
use lux_config::{DefaultHashFunction, NodeId};
use parking_lot::Mutex;

use crate::block::Height;
use crate::error::{ConsensusError, ConsensusResult};
use crate::validators::{CachingValidatorState, ValidatorState};

const INITIAL_LUMINANCE: f64 = 100.0;
const MIN_LUMINANCE: f64 = 10.0;
const MAX_LUMINANCE: f64 = 1000.0;
const SUCCESS_FACTOR: f64 = 1.1;
const FAILURE_FACTOR: f64 = 0.9;
/// Weight of a new latency observation in the running average.
const LATENCY_EWMA_ALPHA: f64 = 0.2;

/// Committee-size bounds of one emission.
#[derive(Clone, Copy, Debug)]
pub struct EmitterOptions {
    pub min_peers: usize,
    pub max_peers: usize,
}

impl Default for EmitterOptions {
    fn default() -> Self {
        Self {
            min_peers: 1,
            max_peers: usize::MAX,
        }
    }
}

/// Picks the committee each poll queries, weighted by stake, observed
/// latency, and a per-node luminance score that tracks response behavior.
/// The validator set comes from the [`ValidatorState`] port at the height
/// the engine is deciding at, behind a per-height cache.
///
/// Selection is a pure function of the seed and the reputation state, so
/// replaying the same state yields the same committee.
pub struct Emitter {
    validators: CachingValidatorState,
    options: EmitterOptions,
    inner: Mutex<EmitterState>,
}

#[derive(Default)]
struct EmitterState {
    luminance: HashMap<NodeId, f64>,
    latency_ms: HashMap<NodeId, f64>,
}

impl Emitter {
    pub fn new(validators: Arc<dyn ValidatorState>) -> Self {
        Self {
            validators: CachingValidatorState::new(validators),
            options: EmitterOptions::default(),
            inner: Mutex::new(EmitterState::default()),
        }
    }

    pub fn with_options(mut self, options: EmitterOptions) -> Self {
        assert!(options.min_peers >= 1);
        assert!(options.max_peers >= options.min_peers);
        self.options = options;
        self
    }

    /// Returns at most `k` distinct validators of the committee at `height`
    /// for the next poll.
    pub fn emit(&self, k: u32, seed: u64, height: Height) -> ConsensusResult<Vec<NodeId>> {
        let committee = self.validators.committee_at(height)?;
        let state = self.inner.lock();
        let mut candidates: Vec<(NodeId, f64, u64)> = committee
            .authorities()
            .map(|(node, authority)| {
                (*node, state.weight(*node, authority.stake), tiebreak(seed, node))
            })
            .collect();
        drop(state);

        if candidates.len() < self.options.min_peers {
            return Err(ConsensusError::InsufficientPeers {
                found: candidates.len(),
                required: self.options.min_peers,
            });
        }

        let limit = (k as usize).min(self.options.max_peers).min(candidates.len());
        let mut selected = Vec::with_capacity(limit);
        let mut taken = vec![false; candidates.len()];
        while selected.len() < limit {
            let mut best: Option<usize> = None;
            for (i, (node, weight, tiebreak)) in candidates.iter().enumerate() {
                if taken[i] {
                    continue;
                }
                best = match best {
                    None => Some(i),
                    Some(j) => {
                        let (best_node, best_weight, best_tiebreak) = &candidates[j];
                        if (*weight, tiebreak, node) > (*best_weight, best_tiebreak, best_node) {
                            Some(i)
                        } else {
                            Some(j)
                        }
                    }
                };
            }
            let i = best.expect("limit <= candidates.len()");
            taken[i] = true;
            selected.push(candidates[i].0);
            // A picked node weighs half as much for the rest of this call,
            // keeping one dominant validator from shadowing the tail.
            candidates[i].1 /= 2.0;
        }
        Ok(selected)
    }

    /// External validator-set change signal: drops every cached committee so
    /// the next emission re-reads the validator state.
    pub fn invalidate_committees(&self) {
        self.validators.invalidate();
    }

    /// Feedback from the scheduler: whether the node answered its query.
    pub fn report(&self, node: NodeId, success: bool) {
        let mut state = self.inner.lock();
        let luminance = state.luminance.entry(node).or_insert(INITIAL_LUMINANCE);
        let factor = if success { SUCCESS_FACTOR } else { FAILURE_FACTOR };
        *luminance = (*luminance * factor).clamp(MIN_LUMINANCE, MAX_LUMINANCE);
    }

    /// Feeds an observed query latency into the node's running average.
    pub fn observe_latency(&self, node: NodeId, latency_ms: f64) {
        let mut state = self.inner.lock();
        state
            .latency_ms
            .entry(node)
            .and_modify(|average| {
                *average = *average * (1.0 - LATENCY_EWMA_ALPHA) + latency_ms * LATENCY_EWMA_ALPHA
            })
            .or_insert(latency_ms);
    }

    pub fn luminance(&self, node: &NodeId) -> f64 {
        self.inner
            .lock()
            .luminance
            .get(node)
            .copied()
            .unwrap_or(INITIAL_LUMINANCE)
    }
}

impl EmitterState {
    fn weight(&self, node: NodeId, stake: u64) -> f64 {
        let latency = self.latency_ms.get(&node).copied().unwrap_or(0.0);
        let luminance = self.luminance.get(&node).copied().unwrap_or(INITIAL_LUMINANCE);
        stake as f64 * (1.0 / (1.0 + latency)) * (luminance / INITIAL_LUMINANCE)
    }
}

/// Seed-keyed hash ordering nodes of equal weight, so ties are stable but
/// not identical across rounds.
fn tiebreak(seed: u64, node: &NodeId) -> u64 {
    let mut hasher = DefaultHashFunction::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(node.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    u64::from_be_bytes(digest[..8].try_into().expect("Digest is longer than 8 bytes"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use lux_config::{local_committee_and_keys, Committee};

    use super::*;
    use crate::validators::FixedValidatorState;

    fn emitter(committee_size: usize) -> (Emitter, Arc<Committee>) {
        let (committee, _) = local_committee_and_keys(0, vec![1; committee_size]);
        let committee = Arc::new(committee);
        let emitter = Emitter::new(Arc::new(FixedValidatorState::new(committee.clone())));
        (emitter, committee)
    }

    #[test]
    fn emit_is_deterministic_per_seed() {
        let (emitter, _) = emitter(10);
        let first = emitter.emit(4, 7, 0).unwrap();
        let second = emitter.emit(4, 7, 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);

        // No duplicates.
        let mut deduped = first.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), 4);
    }

    #[test]
    fn emit_covers_small_committees() {
        let (emitter, _) = emitter(3);
        let selected = emitter.emit(5, 0, 0).unwrap();
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn insufficient_peers_is_signalled() {
        let (committee, _) = local_committee_and_keys(0, vec![1; 2]);
        let emitter = Emitter::new(Arc::new(FixedValidatorState::new(Arc::new(committee))))
            .with_options(EmitterOptions {
                min_peers: 3,
                max_peers: usize::MAX,
            });
        assert!(matches!(
            emitter.emit(3, 0, 0),
            Err(ConsensusError::InsufficientPeers {
                found: 2,
                required: 3
            })
        ));
    }

    #[test]
    fn failures_dim_a_node_out_of_the_committee() {
        let (emitter, _) = emitter(4);
        let baseline = emitter.emit(2, 3, 0).unwrap();
        let victim = baseline[0];

        for _ in 0..30 {
            emitter.report(victim, false);
        }
        assert_eq!(emitter.luminance(&victim), MIN_LUMINANCE);

        let selected = emitter.emit(2, 3, 0).unwrap();
        assert!(!selected.contains(&victim));
    }

    #[test]
    fn luminance_is_clamped() {
        let (emitter, committee) = emitter(2);
        let node = committee.node_ids()[0];

        for _ in 0..100 {
            emitter.report(node, true);
        }
        assert_eq!(emitter.luminance(&node), MAX_LUMINANCE);

        for _ in 0..100 {
            emitter.report(node, false);
        }
        assert_eq!(emitter.luminance(&node), MIN_LUMINANCE);
    }

    #[test]
    fn latency_reduces_selection_weight() {
        let (emitter, committee) = emitter(2);
        let nodes = committee.node_ids();
        let slow = emitter.emit(1, 1, 0).unwrap()[0];
        let fast = *nodes.iter().find(|n| **n != slow).unwrap();

        emitter.observe_latency(slow, 10_000.0);
        let selected = emitter.emit(1, 1, 0).unwrap();
        assert_eq!(selected[0], fast);
    }

    #[test]
    fn max_peers_caps_the_committee() {
        let (committee, _) = local_committee_and_keys(0, vec![1; 6]);
        let emitter = Emitter::new(Arc::new(FixedValidatorState::new(Arc::new(committee))))
            .with_options(EmitterOptions {
                min_peers: 1,
                max_peers: 2,
            });
        assert_eq!(emitter.emit(6, 0, 0).unwrap().len(), 2);
    }

    /// Serves a small committee below the cutover height and a larger one
    /// from there on.
    struct GrowingState {
        before: Arc<Committee>,
        after: Arc<Committee>,
        cutover: Height,
    }

    impl ValidatorState for GrowingState {
        fn committee_at(&self, height: Height) -> ConsensusResult<Arc<Committee>> {
            Ok(if height < self.cutover {
                self.before.clone()
            } else {
                self.after.clone()
            })
        }
    }

    #[test]
    fn committees_follow_the_sampling_height() {
        let (before, _) = local_committee_and_keys(0, vec![1; 3]);
        let (after, _) = local_committee_and_keys(1, vec![1; 5]);
        let emitter = Emitter::new(Arc::new(GrowingState {
            before: Arc::new(before),
            after: Arc::new(after),
            cutover: 10,
        }));

        assert_eq!(emitter.emit(8, 0, 0).unwrap().len(), 3);
        assert_eq!(emitter.emit(8, 0, 10).unwrap().len(), 5);
    }

    struct CountingState {
        committee: Arc<Committee>,
        lookups: AtomicUsize,
    }

    impl ValidatorState for CountingState {
        fn committee_at(&self, _height: Height) -> ConsensusResult<Arc<Committee>> {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            Ok(self.committee.clone())
        }
    }

    #[test]
    fn committee_lookups_are_cached_until_invalidated() {
        let (committee, _) = local_committee_and_keys(0, vec![1; 3]);
        let state = Arc::new(CountingState {
            committee: Arc::new(committee),
            lookups: AtomicUsize::new(0),
        });
        let emitter = Emitter::new(state.clone());

        emitter.emit(2, 0, 5).unwrap();
        emitter.emit(2, 1, 5).unwrap();
        assert_eq!(state.lookups.load(Ordering::Relaxed), 1);

        // A validator-set change forces the next emission to re-read.
        emitter.invalidate_committees();
        emitter.emit(2, 2, 5).unwrap();
        assert_eq!(state.lookups.load(Ordering::Relaxed), 2);
    }
}
