//! spent-note registry
//!
//! a nullifier showing up here marks the note it was derived from as spent.
//! inserts are idempotent and commutative: the live subscription and a
//! historical backfill may deliver the same nullifier in any order, and the
//! first record written is the one kept.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, Span};

use crate::error::Result;
use crate::layout::{self, ForestId};
use crate::store::{BatchOp, KvStore};
use crate::Hash;

/// nullifier value published when a note is spent
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Nullifier(pub Hash);

impl Nullifier {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nullifier({})", hex::encode(&self.0[..8]))
    }
}

/// reference to the transaction that spent a note
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef(pub [u8; 32]);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullifierRecord {
    pub tree: u32,
    pub tx_ref: TxRef,
}

pub struct NullifierSet<S> {
    id: ForestId,
    store: S,
    span: Span,
}

impl<S: KvStore> NullifierSet<S> {
    pub fn new(id: ForestId, store: S) -> Self {
        Self {
            span: tracing::info_span!("nullifiers", forest = %id),
            id,
            store,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// record `nullifier` as spent by `tx_ref`; returns whether it was new
    pub fn nullify(&self, nullifier: &Nullifier, tree: u32, tx_ref: TxRef) -> Result<bool> {
        let key = layout::nullifier_key(&self.id, &nullifier.0);
        if self.store.get(&key)?.is_some() {
            debug!(parent: &self.span, ?nullifier, "nullifier already recorded");
            return Ok(false);
        }

        let record = NullifierRecord { tree, tx_ref };
        self.store.put(&key, &bincode::serialize(&record)?)?;
        debug!(parent: &self.span, ?nullifier, tree, "nullified");
        Ok(true)
    }

    /// record many nullifiers in one store batch; returns how many were new
    pub fn nullify_batch(&self, entries: &[(Nullifier, u32, TxRef)]) -> Result<usize> {
        let mut ops = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for (nullifier, tree, tx_ref) in entries {
            let key = layout::nullifier_key(&self.id, &nullifier.0);
            if !seen.insert(*nullifier) || self.store.get(&key)?.is_some() {
                continue;
            }
            let record = NullifierRecord {
                tree: *tree,
                tx_ref: *tx_ref,
            };
            ops.push(BatchOp::put(key, bincode::serialize(&record)?));
        }

        let added = ops.len();
        if added > 0 {
            self.store.apply_batch(ops)?;
        }
        debug!(parent: &self.span, received = entries.len(), added, "nullifier batch");
        Ok(added)
    }

    pub fn contains(&self, nullifier: &Nullifier) -> Result<bool> {
        Ok(self.store.get(&layout::nullifier_key(&self.id, &nullifier.0))?.is_some())
    }

    pub fn get(&self, nullifier: &Nullifier) -> Result<Option<NullifierRecord>> {
        match self.store.get(&layout::nullifier_key(&self.id, &nullifier.0))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// transaction that spent the note behind `nullifier`, if any
    pub fn spending_ref(&self, nullifier: &Nullifier) -> Result<Option<TxRef>> {
        Ok(self.get(nullifier)?.map(|record| record.tx_ref))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.scan_prefix(&layout::nullifier_prefix(&self.id))?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::AssetDomain;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn set() -> (Arc<MemoryStore>, NullifierSet<Arc<MemoryStore>>) {
        let store = MemoryStore::shared();
        let set = NullifierSet::new(ForestId::new(1, AssetDomain::FUNGIBLE), store.clone());
        (store, set)
    }

    #[test]
    fn test_nullify_and_lookup() {
        let (_, set) = set();
        let nf = Nullifier([1u8; 32]);

        assert!(!set.contains(&nf).unwrap());
        assert_eq!(set.spending_ref(&nf).unwrap(), None);

        assert!(set.nullify(&nf, 0, TxRef([9u8; 32])).unwrap());
        assert!(set.contains(&nf).unwrap());
        assert_eq!(set.spending_ref(&nf).unwrap(), Some(TxRef([9u8; 32])));
    }

    #[test]
    fn test_renullify_is_noop() {
        let (store, set) = set();
        let nf = Nullifier([7u8; 32]);
        set.nullify(&nf, 2, TxRef([1u8; 32])).unwrap();
        let before = store.scan_prefix(&[]).unwrap();

        // divergent sync path replays with another tx ref
        assert!(!set.nullify(&nf, 2, TxRef([2u8; 32])).unwrap());
        assert_eq!(set.nullify_batch(&[(nf, 2, TxRef([3u8; 32]))]).unwrap(), 0);

        assert_eq!(store.scan_prefix(&[]).unwrap(), before);
        assert_eq!(set.spending_ref(&nf).unwrap(), Some(TxRef([1u8; 32])));
    }

    #[test]
    fn test_batch_order_independent() {
        let entries: Vec<_> = (0u8..6)
            .map(|i| (Nullifier([i; 32]), u32::from(i % 2), TxRef([i; 32])))
            .collect();

        let (store_a, a) = set();
        a.nullify_batch(&entries[..4]).unwrap();
        a.nullify_batch(&entries[2..]).unwrap();

        let (store_b, b) = set();
        let mut reversed = entries.clone();
        reversed.reverse();
        for (nf, tree, tx) in &reversed {
            b.nullify(nf, *tree, *tx).unwrap();
        }

        assert_eq!(a.len().unwrap(), 6);
        assert_eq!(store_a.scan_prefix(&[]).unwrap(), store_b.scan_prefix(&[]).unwrap());
    }
}
