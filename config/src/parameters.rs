// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single termination tier of the repeated-polling protocol.
///
/// A tier finalizes a choice after `beta` consecutive polls in which the
/// choice gathered at least `alpha_confidence` votes. Configuring several
/// tiers gives a high-α/low-β fast path and a low-α/high-β fallback at the
/// same time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Termination {
    /// Vote threshold for a poll to increment this tier's confidence.
    pub alpha_confidence: u32,
    /// Consecutive strong polls required to finalize at this tier.
    pub beta: u32,
}

/// Protocol parameters of a consensus instance.
///
/// All validators of an instance must agree on these values; they are part of
/// the chain's genesis configuration rather than node-local operator knobs.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Parameters {
    /// Sample size of each poll: the number of validators queried per round.
    #[serde(default = "Parameters::default_k")]
    pub k: u32,

    /// Vote threshold for a poll to update preferences.
    #[serde(default = "Parameters::default_alpha_preference")]
    pub alpha_preference: u32,

    /// Termination tiers, ordered by strictly increasing `alpha_confidence`.
    #[serde(default = "Parameters::default_terminations")]
    pub terminations: Vec<Termination>,

    /// Number of polls that may be outstanding concurrently.
    #[serde(default = "Parameters::default_concurrent_repolls")]
    pub concurrent_repolls: u32,

    /// Number of items the engine aims to keep processing at once.
    #[serde(default = "Parameters::default_optimal_processing")]
    pub optimal_processing: u32,

    /// Hard cap on items in the Processing state; `add` fails beyond it.
    #[serde(default = "Parameters::default_max_outstanding_items")]
    pub max_outstanding_items: usize,

    /// Processing time past which an item is reported as stalled.
    #[serde(default = "Parameters::default_max_item_processing_time")]
    pub max_item_processing_time: Duration,

    /// Minimum timestamp gap between a block and its parent.
    #[serde(default = "Parameters::default_min_block_delay")]
    pub min_block_delay: Duration,

    /// Minimum delay between consecutive poll rounds.
    #[serde(default = "Parameters::default_min_round_interval")]
    pub min_round_interval: Duration,
}

/// Parameter validation failure, fatal to the instance under construction.
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
#[error("invalid parameters: {0}")]
pub struct InvalidParameters(pub String);

impl Parameters {
    pub fn default_k() -> u32 {
        20
    }

    pub fn default_alpha_preference() -> u32 {
        15
    }

    pub fn default_terminations() -> Vec<Termination> {
        vec![Termination {
            alpha_confidence: 15,
            beta: 20,
        }]
    }

    pub fn default_concurrent_repolls() -> u32 {
        4
    }

    pub fn default_optimal_processing() -> u32 {
        10
    }

    pub fn default_max_outstanding_items() -> usize {
        256
    }

    pub fn default_max_item_processing_time() -> Duration {
        Duration::from_secs(30)
    }

    pub fn default_min_block_delay() -> Duration {
        Duration::from_secs(2)
    }

    pub fn default_min_round_interval() -> Duration {
        Duration::from_millis(250)
    }

    /// Single-tier parameters, the common configuration.
    pub fn new_single_tier(
        k: u32,
        alpha_preference: u32,
        alpha_confidence: u32,
        beta: u32,
    ) -> Result<Self, InvalidParameters> {
        let parameters = Self {
            k,
            alpha_preference,
            terminations: vec![Termination {
                alpha_confidence,
                beta,
            }],
            ..Default::default()
        };
        parameters.verify()?;
        Ok(parameters)
    }

    /// Validates the parameter bundle. Must be called before handing the
    /// parameters to an engine; every violation here would otherwise be a
    /// silent safety or liveness failure at poll time.
    pub fn verify(&self) -> Result<(), InvalidParameters> {
        if self.k == 0 {
            return Err(InvalidParameters("k must be at least 1".to_string()));
        }
        if self.alpha_preference == 0 || self.alpha_preference > self.k {
            return Err(InvalidParameters(format!(
                "alpha_preference {} must be in 1..={}",
                self.alpha_preference, self.k
            )));
        }
        if self.terminations.is_empty() {
            return Err(InvalidParameters(
                "at least one termination tier is required".to_string(),
            ));
        }
        let mut previous: Option<&Termination> = None;
        for tier in &self.terminations {
            if tier.alpha_confidence < self.alpha_preference || tier.alpha_confidence > self.k {
                return Err(InvalidParameters(format!(
                    "alpha_confidence {} must be in {}..={}",
                    tier.alpha_confidence, self.alpha_preference, self.k
                )));
            }
            if tier.beta == 0 {
                return Err(InvalidParameters("beta must be at least 1".to_string()));
            }
            if let Some(previous) = previous {
                if tier.alpha_confidence <= previous.alpha_confidence {
                    return Err(InvalidParameters(format!(
                        "alpha_confidence must be strictly increasing across tiers \
                         ({} after {})",
                        tier.alpha_confidence, previous.alpha_confidence
                    )));
                }
                if tier.beta > previous.beta {
                    return Err(InvalidParameters(format!(
                        "beta must not increase with alpha_confidence ({} after {})",
                        tier.beta, previous.beta
                    )));
                }
            }
            previous = Some(tier);
        }
        if self.concurrent_repolls == 0 {
            return Err(InvalidParameters(
                "concurrent_repolls must be at least 1".to_string(),
            ));
        }
        if self.optimal_processing == 0 {
            return Err(InvalidParameters(
                "optimal_processing must be at least 1".to_string(),
            ));
        }
        if self.max_outstanding_items == 0 {
            return Err(InvalidParameters(
                "max_outstanding_items must be at least 1".to_string(),
            ));
        }
        if self.max_item_processing_time.is_zero() {
            return Err(InvalidParameters(
                "max_item_processing_time must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The largest β across tiers; an upper bound on the polls a virtuous
    /// item needs to finalize.
    pub fn max_beta(&self) -> u32 {
        self.terminations
            .iter()
            .map(|tier| tier.beta)
            .max()
            .expect("terminations are non-empty for verified parameters")
    }

    /// Number of termination tiers.
    pub fn num_tiers(&self) -> usize {
        self.terminations.len()
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            k: Parameters::default_k(),
            alpha_preference: Parameters::default_alpha_preference(),
            terminations: Parameters::default_terminations(),
            concurrent_repolls: Parameters::default_concurrent_repolls(),
            optimal_processing: Parameters::default_optimal_processing(),
            max_outstanding_items: Parameters::default_max_outstanding_items(),
            max_item_processing_time: Parameters::default_max_item_processing_time(),
            min_block_delay: Parameters::default_min_block_delay(),
            min_round_interval: Parameters::default_min_round_interval(),
        }
    }
}
