// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use lux_config::Committee;
use parking_lot::RwLock;

use crate::block::Height;
use crate::error::ConsensusResult;

/// Source of the validator set in effect at a given height.
pub trait ValidatorState: Send + Sync + 'static {
    fn committee_at(&self, height: Height) -> ConsensusResult<Arc<Committee>>;
}

/// Caches committees per height. An external validator-set change signal
/// must call [`CachingValidatorState::invalidate`]; until then lookups for a
/// seen height never hit the inner source again.
pub struct CachingValidatorState {
    inner: Arc<dyn ValidatorState>,
    cache: RwLock<HashMap<Height, Arc<Committee>>>,
}

impl CachingValidatorState {
    pub fn new(inner: Arc<dyn ValidatorState>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn invalidate(&self) {
        self.cache.write().clear();
    }
}

impl ValidatorState for CachingValidatorState {
    fn committee_at(&self, height: Height) -> ConsensusResult<Arc<Committee>> {
        if let Some(committee) = self.cache.read().get(&height) {
            return Ok(committee.clone());
        }
        let committee = self.inner.committee_at(height)?;
        self.cache.write().insert(height, committee.clone());
        Ok(committee)
    }
}

/// A fixed committee for every height, for tests and single-epoch chains.
pub struct FixedValidatorState {
    committee: Arc<Committee>,
}

impl FixedValidatorState {
    pub fn new(committee: Arc<Committee>) -> Self {
        Self { committee }
    }
}

impl ValidatorState for FixedValidatorState {
    fn committee_at(&self, _height: Height) -> ConsensusResult<Arc<Committee>> {
        Ok(self.committee.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use lux_config::local_committee_and_keys;

    use super::*;

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
    fn caching_state_hits_inner_once_per_height() {
        let (committee, _) = local_committee_and_keys(0, vec![1; 4]);
        let inner = Arc::new(CountingState {
            committee: Arc::new(committee),
            lookups: AtomicUsize::new(0),
        });
        let caching = CachingValidatorState::new(inner.clone());

        caching.committee_at(1).unwrap();
        caching.committee_at(1).unwrap();
        caching.committee_at(2).unwrap();
        assert_eq!(inner.lookups.load(Ordering::Relaxed), 2);

        // Invalidation drops everything cached.
        caching.invalidate();
        caching.committee_at(1).unwrap();
        assert_eq!(inner.lookups.load(Ordering::Relaxed), 3);
    }
}
