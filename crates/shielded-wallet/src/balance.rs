//! per-tree unspent balances
//!
//! derived on demand from the wallet's utxos and the accumulator's nullifier
//! set; nothing here is a source of truth. each tree bucket pins the root the
//! snapshot was taken against, so later inserts into that tree cannot move the
//! anchor out from under an in-flight spend.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use shielded_merkle::{ForestId, Hash, KvStore, MerkleAccumulator};
use tracing::{debug, Span};

use crate::error::Result;
use crate::utxo::{Utxo, UtxoId, WalletNotes};
use crate::value::{Amount, TokenId};

/// unspent utxos of one token in one tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeBalance {
    pub tree: u32,
    pub token: TokenId,
    /// tree root the utxos are provable against
    pub anchor: Hash,
    pub balance: Amount,
    pub utxos: Vec<Utxo>,
}

impl TreeBalance {
    /// bucket built from already-filtered utxos; balance is their sum
    pub fn new(tree: u32, token: TokenId, anchor: Hash, utxos: Vec<Utxo>) -> Self {
        let balance = utxos.iter().map(|utxo| utxo.note.value).sum();
        Self {
            tree,
            token,
            anchor,
            balance,
            utxos,
        }
    }
}

pub struct BalanceIndex {
    // spent detections; only ever skips a nullifier lookup. tree and position
    // repeat across forests, so entries carry the forest they were seen in
    spent: RwLock<HashSet<(ForestId, UtxoId)>>,
    span: Span,
}

impl Default for BalanceIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BalanceIndex {
    pub fn new() -> Self {
        Self {
            spent: RwLock::new(HashSet::new()),
            span: tracing::info_span!("balances"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// unspent balances for `token`, ordered by tree index
    pub fn balances_by_tree<S: KvStore + Clone>(
        &self,
        notes: &WalletNotes,
        accumulator: &MerkleAccumulator<S>,
        token: TokenId,
    ) -> Result<Vec<TreeBalance>> {
        let mut buckets: BTreeMap<u32, Vec<Utxo>> = BTreeMap::new();

        for utxo in notes.utxos_for(token) {
            // not yet covered by the accumulator, no proof possible
            if utxo.position >= accumulator.tree_length(utxo.tree) {
                continue;
            }
            if self.is_spent(accumulator, utxo)? {
                continue;
            }
            buckets.entry(utxo.tree).or_default().push(utxo.clone());
        }

        let balances: Vec<TreeBalance> = buckets
            .into_iter()
            .map(|(tree, utxos)| TreeBalance::new(tree, token, accumulator.root(tree), utxos))
            .collect();

        debug!(
            parent: &self.span,
            ?token,
            trees = balances.len(),
            total = %balances.iter().map(|b| b.balance).sum::<Amount>(),
            "balances"
        );
        Ok(balances)
    }

    /// Σ of [`Self::balances_by_tree`]
    pub fn token_balance<S: KvStore + Clone>(
        &self,
        notes: &WalletNotes,
        accumulator: &MerkleAccumulator<S>,
        token: TokenId,
    ) -> Result<Amount> {
        Ok(self
            .balances_by_tree(notes, accumulator, token)?
            .iter()
            .map(|balance| balance.balance)
            .sum())
    }

    /// forget cached spend detections (resync)
    pub fn invalidate(&self) {
        if let Ok(mut spent) = self.spent.write() {
            spent.clear();
        }
    }

    fn is_spent<S: KvStore + Clone>(&self, accumulator: &MerkleAccumulator<S>, utxo: &Utxo) -> Result<bool> {
        if utxo.spent {
            return Ok(true);
        }
        let id = (accumulator.id(), utxo.id());
        if self.spent.read().map(|spent| spent.contains(&id)).unwrap_or(false) {
            return Ok(true);
        }
        if !accumulator.nullifiers().contains(&utxo.nullifier)? {
            return Ok(false);
        }
        if let Ok(mut spent) = self.spent.write() {
            spent.insert(id);
        }
        Ok(true)
    }
}
