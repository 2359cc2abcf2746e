//! registry of accumulators keyed by (chain, asset domain)
//!
//! instances are created and destroyed explicitly; destroying one only drops
//! the in-memory handle, the persisted rows stay and are picked up again by
//! the next `create` for the same id.

use std::collections::HashMap;

use tracing::info;

use crate::accumulator::{AccumulatorConfig, MerkleAccumulator};
use crate::error::{MerkleError, Result};
use crate::layout::ForestId;
use crate::store::KvStore;
use crate::validator::RootValidator;

pub struct MerkleForest<S> {
    store: S,
    config: AccumulatorConfig,
    accumulators: HashMap<ForestId, MerkleAccumulator<S>>,
}

impl<S: KvStore + Clone> MerkleForest<S> {
    pub fn new(store: S, config: AccumulatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            accumulators: HashMap::new(),
        })
    }

    pub fn create(
        &mut self,
        id: ForestId,
        validator: Box<dyn RootValidator>,
    ) -> Result<&mut MerkleAccumulator<S>> {
        if self.accumulators.contains_key(&id) {
            return Err(MerkleError::ForestExists(id));
        }

        let accumulator = MerkleAccumulator::open(id, self.store.clone(), validator, self.config.clone())?;
        info!(forest = %id, "created accumulator");
        Ok(self.accumulators.entry(id).or_insert(accumulator))
    }

    pub fn get(&self, id: &ForestId) -> Result<&MerkleAccumulator<S>> {
        self.accumulators
            .get(id)
            .ok_or(MerkleError::UnknownForest(*id))
    }

    pub fn get_mut(&mut self, id: &ForestId) -> Result<&mut MerkleAccumulator<S>> {
        self.accumulators
            .get_mut(id)
            .ok_or(MerkleError::UnknownForest(*id))
    }

    pub fn destroy(&mut self, id: &ForestId) -> Result<MerkleAccumulator<S>> {
        let accumulator = self
            .accumulators
            .remove(id)
            .ok_or(MerkleError::UnknownForest(*id))?;
        info!(forest = %id, "destroyed accumulator");
        Ok(accumulator)
    }

    pub fn contains(&self, id: &ForestId) -> bool {
        self.accumulators.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ForestId> {
        let mut ids: Vec<_> = self.accumulators.keys().copied().collect();
        ids.sort();
        ids
    }
}
