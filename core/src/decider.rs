// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Confidence counters at the heart of the repeated-polling protocol.
//!
//! A decider tracks one conflict set. Every poll reports how many of the
//! sampled validators favored a choice; β consecutive polls at or above a
//! tier's α finalize the current preference at that tier.

use std::collections::HashMap;

use enum_dispatch::enum_dispatch;
use lux_config::{Parameters, Termination};

use crate::block::Id;

/// The α/β thresholds a decider evaluates polls against, copied out of
/// [`Parameters`] at construction.
#[derive(Clone, Debug)]
pub(crate) struct Thresholds {
    pub alpha_preference: u32,
    pub terminations: Vec<Termination>,
}

impl Thresholds {
    pub(crate) fn new(parameters: &Parameters) -> Self {
        Self {
            alpha_preference: parameters.alpha_preference,
            terminations: parameters.terminations.clone(),
        }
    }

    fn num_tiers(&self) -> usize {
        self.terminations.len()
    }

    /// Applies one poll result to a per-tier confidence vector. Tiers are
    /// ordered by increasing α, so the first tier the count misses also
    /// clears every tier above it.
    fn apply(&self, confidence: &mut [u32], count: u32) {
        for (i, tier) in self.terminations.iter().enumerate() {
            if count >= tier.alpha_confidence {
                confidence[i] += 1;
            } else {
                for entry in confidence[i..].iter_mut() {
                    *entry = 0;
                }
                break;
            }
        }
    }

    /// Whether any tier's confidence run has reached its β.
    fn is_final(&self, confidence: &[u32]) -> bool {
        self.terminations
            .iter()
            .zip(confidence)
            .any(|(tier, confidence)| *confidence >= tier.beta)
    }
}

/// Common surface of the three decider flavours.
#[enum_dispatch]
pub(crate) trait DeciderAPI {
    /// Records a poll in which `choice` gathered `count` votes. Returns
    /// whether the poll met `alpha_preference`.
    fn record_poll(&mut self, count: u32, choice: Id) -> bool;

    /// Records a poll that did not meet `alpha_preference`; clears all
    /// confidence runs.
    fn record_unsuccessful_poll(&mut self);

    fn preference(&self) -> Id;

    fn finalized(&self) -> bool;
}

/// A decider over a conflict set, chosen at construction.
#[enum_dispatch(DeciderAPI)]
#[derive(Clone, Debug)]
pub(crate) enum Decider {
    Monadic,
    Dyadic,
    Polyadic,
}

/// Single-choice decider: only builds confidence, there is nothing to prefer
/// between. Used on unary paths of the tree and for per-vertex voting.
#[derive(Clone, Debug)]
pub(crate) struct Monadic {
    thresholds: Thresholds,
    choice: Id,
    confidence: Vec<u32>,
    finalized: bool,
}

impl Monadic {
    pub(crate) fn new(thresholds: Thresholds, choice: Id) -> Self {
        let confidence = vec![0; thresholds.num_tiers()];
        Self {
            thresholds,
            choice,
            confidence,
            finalized: false,
        }
    }
}

impl DeciderAPI for Monadic {
    fn record_poll(&mut self, count: u32, _choice: Id) -> bool {
        if !self.finalized {
            self.thresholds.apply(&mut self.confidence, count);
            self.finalized = self.thresholds.is_final(&self.confidence);
        }
        count >= self.thresholds.alpha_preference
    }

    fn record_unsuccessful_poll(&mut self) {
        if !self.finalized {
            self.confidence.fill(0);
        }
    }

    fn preference(&self) -> Id {
        self.choice
    }

    fn finalized(&self) -> bool {
        self.finalized
    }
}

/// Two-choice decider sitting at each branch of the tree.
///
/// Strength accumulates the vote counts a choice has gathered over all
/// successful polls; preference follows the strictly stronger choice, and
/// only the current preference's confidence run can finalize.
#[derive(Clone, Debug)]
pub(crate) struct Dyadic {
    thresholds: Thresholds,
    choices: [Id; 2],
    strength: [u64; 2],
    confidence: [Vec<u32>; 2],
    preference: usize,
    finalized: bool,
}

impl Dyadic {
    pub(crate) fn new(thresholds: Thresholds, choices: [Id; 2], preference: usize) -> Self {
        assert!(preference < 2);
        let confidence = [
            vec![0; thresholds.num_tiers()],
            vec![0; thresholds.num_tiers()],
        ];
        Self {
            thresholds,
            choices,
            strength: [0, 0],
            confidence,
            preference,
            finalized: false,
        }
    }

    pub(crate) fn choices(&self) -> [Id; 2] {
        self.choices
    }

    /// Index of the currently preferred choice.
    pub(crate) fn preferred_index(&self) -> usize {
        self.preference
    }
}

impl DeciderAPI for Dyadic {
    fn record_poll(&mut self, count: u32, choice: Id) -> bool {
        let successful = count >= self.thresholds.alpha_preference;
        if self.finalized {
            return successful;
        }
        let Some(index) = self.choices.iter().position(|c| *c == choice) else {
            self.record_unsuccessful_poll();
            return false;
        };
        if !successful {
            self.record_unsuccessful_poll();
            return false;
        }

        self.strength[index] += count as u64;
        self.confidence[1 - index].fill(0);
        self.thresholds.apply(&mut self.confidence[index], count);
        if self.strength[index] > self.strength[self.preference] {
            self.preference = index;
        }
        self.finalized = self.thresholds.is_final(&self.confidence[self.preference]);
        true
    }

    fn record_unsuccessful_poll(&mut self) {
        if !self.finalized {
            self.confidence[0].fill(0);
            self.confidence[1].fill(0);
        }
    }

    fn preference(&self) -> Id {
        self.choices[self.preference]
    }

    fn finalized(&self) -> bool {
        self.finalized
    }
}

/// Decider over an unbounded choice set, used by [`crate::tree::Flat`].
#[derive(Clone, Debug)]
pub(crate) struct Polyadic {
    thresholds: Thresholds,
    strength: HashMap<Id, u64>,
    confidence: HashMap<Id, Vec<u32>>,
    preference: Id,
    last_choice: Id,
    finalized: bool,
}

impl Polyadic {
    pub(crate) fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            strength: HashMap::new(),
            confidence: HashMap::new(),
            preference: Id::EMPTY,
            last_choice: Id::EMPTY,
            finalized: false,
        }
    }

    /// Registers a choice; the first registered choice is the initial
    /// preference.
    pub(crate) fn add(&mut self, choice: Id) {
        self.strength.entry(choice).or_default();
        if self.preference.is_empty() {
            self.preference = choice;
        }
    }
}

impl DeciderAPI for Polyadic {
    fn record_poll(&mut self, count: u32, choice: Id) -> bool {
        let successful = count >= self.thresholds.alpha_preference;
        if self.finalized {
            return successful;
        }
        if !successful {
            self.record_unsuccessful_poll();
            return false;
        }

        self.add(choice);
        if choice != self.last_choice {
            // A poll for a different choice breaks every other run.
            self.confidence.retain(|id, _| *id == choice);
            self.last_choice = choice;
        }
        *self.strength.entry(choice).or_default() += count as u64;
        let confidence = self
            .confidence
            .entry(choice)
            .or_insert_with(|| vec![0; self.thresholds.num_tiers()]);
        self.thresholds.apply(confidence, count);

        let preferred_strength = self.strength.get(&self.preference).copied().unwrap_or(0);
        if self.strength[&choice] > preferred_strength {
            self.preference = choice;
        }
        self.finalized = self
            .confidence
            .get(&self.preference)
            .is_some_and(|confidence| self.thresholds.is_final(confidence));
        true
    }

    fn record_unsuccessful_poll(&mut self) {
        if !self.finalized {
            self.confidence.clear();
        }
    }

    fn preference(&self) -> Id {
        self.preference
    }

    fn finalized(&self) -> bool {
        self.finalized
    }
}
