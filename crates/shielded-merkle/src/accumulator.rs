//! per-forest accumulator of fixed-depth append trees
//!
//! each tree keeps a cursor (number of leaves). batches are addressed by
//! `(tree, start)`:
//!
//! - `start < cursor`: stale duplicate from a replayed feed, ignored
//! - `start > cursor`: gap, rejected, the caller resyncs from the cursor
//! - `start == cursor`: new nodes are computed in a scratch overlay, the
//!   candidate root goes to the [`RootValidator`], and only on success is the
//!   overlay written to the store in one batch
//!
//! every committed root is appended to the tree's root history so proofs can
//! be produced against any retained root, not just the latest one.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Span};

use crate::error::{MerkleError, Result};
use crate::hash::{empty_root, hash_node, zero_hashes};
use crate::layout::{self, ForestId};
use crate::nullifier::NullifierSet;
use crate::proof::MerkleProof;
use crate::store::{BatchOp, KvStore};
use crate::validator::RootValidator;
use crate::{Hash, TREE_CAPACITY, TREE_DEPTH};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorConfig {
    /// tree depth, must equal [`TREE_DEPTH`]
    pub depth: usize,
    /// roots retained per tree; `None` keeps every root ever committed
    pub root_history_limit: Option<usize>,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            depth: TREE_DEPTH,
            root_history_limit: None,
        }
    }
}

impl AccumulatorConfig {
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            root_history_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth != TREE_DEPTH {
            return Err(MerkleError::InvalidConfig(format!(
                "depth {} unsupported, circuits are fixed at {}",
                self.depth, TREE_DEPTH
            )));
        }
        if self.root_history_limit == Some(0) {
            return Err(MerkleError::InvalidConfig(
                "root history must retain at least the current root".into(),
            ));
        }
        Ok(())
    }
}

/// a root the tree has had, with the tree length it commits to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    pub root: Hash,
    pub length: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct TreeMeta {
    length: u64,
    root: Hash,
    /// sequence number of the next root history row
    next_seq: u64,
}

impl Default for TreeMeta {
    fn default() -> Self {
        Self {
            length: 0,
            root: empty_root(),
            next_seq: 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct TreeState {
    meta: TreeMeta,
    history: VecDeque<(u64, RootRecord)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeafPosition {
    pub tree: u32,
    pub position: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Applied { tree: u32, root: Hash, length: u64 },
    /// stale duplicate or empty batch, nothing changed
    Ignored { tree: u32, cursor: u64 },
}

/// nodes computed for one batch, not yet visible
struct PreparedBatch {
    tree: u32,
    start: u64,
    count: u64,
    root: Hash,
    nodes: HashMap<(usize, u64), Hash>,
}

pub struct MerkleAccumulator<S> {
    id: ForestId,
    store: S,
    validator: Box<dyn RootValidator>,
    config: AccumulatorConfig,
    trees: BTreeMap<u32, TreeState>,
    nullifiers: NullifierSet<S>,
    span: Span,
}

impl<S: KvStore + Clone> MerkleAccumulator<S> {
    /// open the accumulator for `id`, reloading any trees already persisted
    pub fn open(
        id: ForestId,
        store: S,
        validator: Box<dyn RootValidator>,
        config: AccumulatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let span = tracing::info_span!("merkle", forest = %id);
        let trees = load_trees(&id, &store)?;

        if !trees.is_empty() {
            info!(parent: &span, "reloaded {} trees", trees.len());
        }

        Ok(Self {
            id,
            nullifiers: NullifierSet::new(id, store.clone()),
            store,
            validator,
            config,
            trees,
            span,
        })
    }

    /// replace the logging context events are emitted under
    pub fn with_span(mut self, span: Span) -> Self {
        self.nullifiers = self.nullifiers.with_span(span.clone());
        self.span = span;
        self
    }

    pub fn id(&self) -> ForestId {
        self.id
    }

    pub fn config(&self) -> &AccumulatorConfig {
        &self.config
    }

    pub fn nullifiers(&self) -> &NullifierSet<S> {
        &self.nullifiers
    }

    /// number of leaves in `tree` (its insert cursor)
    pub fn tree_length(&self, tree: u32) -> u64 {
        self.trees.get(&tree).map_or(0, |s| s.meta.length)
    }

    pub fn root(&self, tree: u32) -> Hash {
        self.trees.get(&tree).map_or_else(empty_root, |s| s.meta.root)
    }

    /// highest tree index holding at least one leaf
    pub fn latest_tree(&self) -> Option<u32> {
        self.trees
            .iter()
            .rev()
            .find(|(_, state)| state.meta.length > 0)
            .map(|(tree, _)| *tree)
    }

    /// tree that the next appended leaf lands in
    pub fn next_insert_tree(&self) -> u32 {
        match self.latest_tree() {
            None => 0,
            Some(tree) if self.tree_length(tree) >= TREE_CAPACITY => tree + 1,
            Some(tree) => tree,
        }
    }

    pub fn trees(&self) -> Vec<u32> {
        self.trees.keys().copied().collect()
    }

    /// retained roots of `tree`, oldest first
    ///
    /// one record per committed batch. the empty-tree root is not recorded:
    /// a zero-length anchor proves nothing, so a fresh tree has no history.
    pub fn root_history(&self, tree: u32) -> Vec<RootRecord> {
        self.trees
            .get(&tree)
            .map(|s| s.history.iter().map(|(_, r)| *r).collect())
            .unwrap_or_default()
    }

    /// whether `root` is in the retained history; false for [`empty_root`]
    pub fn is_known_root(&self, tree: u32, root: &Hash) -> bool {
        self.find_root(tree, root).is_some()
    }

    fn find_root(&self, tree: u32, root: &Hash) -> Option<RootRecord> {
        self.trees
            .get(&tree)?
            .history
            .iter()
            .rev()
            .map(|(_, r)| *r)
            .find(|r| r.root == *root)
    }

    /// committed leaf at `position`, `None` past the cursor
    pub fn leaf(&self, tree: u32, position: u64) -> Result<Option<Hash>> {
        if position >= self.tree_length(tree) {
            return Ok(None);
        }
        self.stored_node(tree, 0, position).map(Some)
    }

    /// apply a batch of leaves to `tree` starting at `start`
    pub fn insert(&mut self, tree: u32, start: u64, leaves: &[Hash]) -> Result<InsertOutcome> {
        let cursor = self.tree_length(tree);

        if start < cursor {
            debug!(
                parent: &self.span,
                tree, start, cursor, count = leaves.len(), "ignoring stale batch"
            );
            return Ok(InsertOutcome::Ignored { tree, cursor });
        }
        if start > cursor {
            warn!(parent: &self.span, tree, start, cursor, "batch leaves a gap, resync required");
            return Err(MerkleError::CursorGap {
                tree,
                expected: cursor,
                got: start,
            });
        }
        if leaves.is_empty() {
            return Ok(InsertOutcome::Ignored { tree, cursor });
        }

        let incoming = leaves.len() as u64;
        if cursor + incoming > TREE_CAPACITY {
            return Err(MerkleError::TreeFull {
                tree,
                length: cursor,
                incoming,
                capacity: TREE_CAPACITY,
            });
        }

        let prepared = self.prepare(tree, start, leaves)?;
        self.validate(&prepared)?;

        let root = prepared.root;
        let length = start + incoming;
        self.commit(vec![prepared])?;

        debug!(parent: &self.span, tree, length, root = %hex::encode(root), "applied batch");
        Ok(InsertOutcome::Applied { tree, root, length })
    }

    /// append leaves after the latest tree, opening new trees as they fill
    ///
    /// every touched tree is validated before any of them is written.
    pub fn append(&mut self, leaves: &[Hash]) -> Result<Vec<LeafPosition>> {
        let mut positions = Vec::with_capacity(leaves.len());
        let mut prepared = Vec::new();
        let mut tree = self.next_insert_tree();
        let mut rest = leaves;

        while !rest.is_empty() {
            let length = self.tree_length(tree);
            let room = (TREE_CAPACITY - length) as usize;
            let (chunk, tail) = rest.split_at(room.min(rest.len()));

            if !chunk.is_empty() {
                prepared.push(self.prepare(tree, length, chunk)?);
                positions.extend((0..chunk.len() as u64).map(|i| LeafPosition {
                    tree,
                    position: length + i,
                }));
            }

            rest = tail;
            tree += 1;
        }

        for batch in &prepared {
            self.validate(batch)?;
        }
        if !prepared.is_empty() {
            if prepared.len() > 1 {
                info!(parent: &self.span, trees = prepared.len(), "append spans a tree boundary");
            }
            self.commit(prepared)?;
        }

        Ok(positions)
    }

    /// membership proof against the current root of `tree`
    ///
    /// positions past the cursor prove the empty leaf.
    pub fn proof(&self, tree: u32, position: u64) -> Result<MerkleProof> {
        self.proof_for_length(tree, position, self.tree_length(tree), self.root(tree))
    }

    /// membership proof against a retained historical root
    pub fn proof_at(&self, tree: u32, position: u64, anchor: &Hash) -> Result<MerkleProof> {
        let record = self
            .find_root(tree, anchor)
            .ok_or_else(|| MerkleError::StaleProof {
                tree,
                root: hex::encode(anchor),
            })?;

        if position >= record.length {
            return Err(MerkleError::PositionOutOfRange { tree, position });
        }

        self.proof_for_length(tree, position, record.length, record.root)
    }

    fn proof_for_length(&self, tree: u32, position: u64, length: u64, root: Hash) -> Result<MerkleProof> {
        if position >= TREE_CAPACITY {
            return Err(MerkleError::PositionOutOfRange { tree, position });
        }

        let current = length == self.tree_length(tree);
        let leaf = self.node_at(tree, 0, position, length, current)?;
        let siblings = (0..TREE_DEPTH)
            .map(|level| self.node_at(tree, level, (position >> level) ^ 1, length, current))
            .collect::<Result<Vec<_>>>()?;

        let proof = MerkleProof {
            tree,
            leaf,
            siblings,
            position,
            root,
        };

        if proof.compute_root() != root {
            return Err(MerkleError::Storage(format!(
                "node table of tree {} disagrees with root {}",
                tree,
                hex::encode(root)
            )));
        }

        Ok(proof)
    }

    /// node value as it was when the tree held `length` leaves
    ///
    /// subtrees entirely below `length` are immutable and read from the store,
    /// subtrees entirely above it are empty, and the single straddling subtree
    /// per level is rebuilt from its children.
    fn node_at(&self, tree: u32, level: usize, index: u64, length: u64, current: bool) -> Result<Hash> {
        let first = index << level;
        let end = (index + 1) << level;

        if first >= length {
            return Ok(zero_hashes().at(level));
        }
        if current || end <= length || level == 0 {
            return self.stored_node(tree, level, index);
        }

        let left = self.node_at(tree, level - 1, index * 2, length, current)?;
        let right = self.node_at(tree, level - 1, index * 2 + 1, length, current)?;
        Ok(hash_node(&left, &right))
    }

    fn stored_node(&self, tree: u32, level: usize, index: u64) -> Result<Hash> {
        match self.store.get(&layout::node_key(&self.id, tree, level as u8, index))? {
            Some(bytes) => decode_hash(&bytes),
            None => Ok(zero_hashes().at(level)),
        }
    }

    fn prepare(&self, tree: u32, start: u64, leaves: &[Hash]) -> Result<PreparedBatch> {
        let count = leaves.len() as u64;
        let mut nodes = HashMap::with_capacity(leaves.len() * 2 + TREE_DEPTH);

        for (offset, leaf) in leaves.iter().enumerate() {
            nodes.insert((0, start + offset as u64), *leaf);
        }

        // only the ancestors of the new leaves change
        let (mut lo, mut hi) = (start, start + count - 1);
        for level in 0..TREE_DEPTH {
            let (parent_lo, parent_hi) = (lo >> 1, hi >> 1);
            for parent in parent_lo..=parent_hi {
                let left = self.overlay_node(&nodes, tree, level, parent * 2)?;
                let right = self.overlay_node(&nodes, tree, level, parent * 2 + 1)?;
                nodes.insert((level + 1, parent), hash_node(&left, &right));
            }
            lo = parent_lo;
            hi = parent_hi;
        }

        let root = nodes
            .get(&(TREE_DEPTH, 0))
            .copied()
            .ok_or_else(|| MerkleError::Storage("batch produced no root".into()))?;

        Ok(PreparedBatch {
            tree,
            start,
            count,
            root,
            nodes,
        })
    }

    fn overlay_node(
        &self,
        nodes: &HashMap<(usize, u64), Hash>,
        tree: u32,
        level: usize,
        index: u64,
    ) -> Result<Hash> {
        match nodes.get(&(level, index)) {
            Some(hash) => Ok(*hash),
            None => self.stored_node(tree, level, index),
        }
    }

    fn validate(&self, batch: &PreparedBatch) -> Result<()> {
        match self.validator.validate_root(batch.tree, &batch.root) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(
                    parent: &self.span,
                    tree = batch.tree,
                    start = batch.start,
                    count = batch.count,
                    root = %hex::encode(batch.root),
                    "root rejected, discarding batch"
                );
                Err(MerkleError::ValidationRejected {
                    tree: batch.tree,
                    root: hex::encode(batch.root),
                })
            }
            Err(e) => {
                warn!(parent: &self.span, tree = batch.tree, "root validator failed: {}", e);
                Err(MerkleError::ValidatorUnavailable {
                    tree: batch.tree,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn commit(&mut self, batches: Vec<PreparedBatch>) -> Result<()> {
        let mut ops = Vec::new();
        let mut updated = Vec::with_capacity(batches.len());

        for batch in batches {
            let mut state = self.trees.get(&batch.tree).cloned().unwrap_or_default();

            for ((level, index), hash) in &batch.nodes {
                ops.push(BatchOp::put(
                    layout::node_key(&self.id, batch.tree, *level as u8, *index),
                    hash.to_vec(),
                ));
            }

            let record = RootRecord {
                root: batch.root,
                length: batch.start + batch.count,
            };
            let seq = state.meta.next_seq;
            ops.push(BatchOp::put(
                layout::history_key(&self.id, batch.tree, seq),
                bincode::serialize(&record)?,
            ));
            state.history.push_back((seq, record));

            if let Some(limit) = self.config.root_history_limit {
                while state.history.len() > limit {
                    if let Some((old_seq, _)) = state.history.pop_front() {
                        ops.push(BatchOp::delete(layout::history_key(&self.id, batch.tree, old_seq)));
                    }
                }
            }

            state.meta = TreeMeta {
                length: record.length,
                root: record.root,
                next_seq: seq + 1,
            };
            ops.push(BatchOp::put(
                layout::meta_key(&self.id, batch.tree),
                bincode::serialize(&state.meta)?,
            ));

            updated.push((batch.tree, state));
        }

        self.store.apply_batch(ops)?;

        for (tree, state) in updated {
            self.trees.insert(tree, state);
        }
        Ok(())
    }
}

fn decode_hash(bytes: &[u8]) -> Result<Hash> {
    <Hash>::try_from(bytes)
        .map_err(|_| MerkleError::Codec(format!("node hash must be 32 bytes, got {}", bytes.len())))
}

fn load_trees<S: KvStore>(id: &ForestId, store: &S) -> Result<BTreeMap<u32, TreeState>> {
    let mut trees = BTreeMap::new();

    for (key, value) in store.scan_prefix(&layout::meta_prefix(id))? {
        let Some(tree) = layout::tree_from_meta_key(id, &key) else {
            continue;
        };
        let meta: TreeMeta = bincode::deserialize(&value)?;

        let prefix = layout::history_prefix(id, tree);
        let mut history = VecDeque::new();
        for (key, value) in store.scan_prefix(&prefix)? {
            let seq_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| MerkleError::Codec("malformed root history key".into()))?;
            let record: RootRecord = bincode::deserialize(&value)?;
            history.push_back((u64::from_be_bytes(seq_bytes), record));
        }

        trees.insert(tree, TreeState { meta, history });
    }

    Ok(trees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::AssetDomain;
    use crate::store::MemoryStore;
    use crate::validator::{AcceptAll, KnownRoots, ValidatorError};
    use std::sync::Arc;

    fn leaves(range: std::ops::Range<u64>) -> Vec<Hash> {
        range.map(|i| *blake3::hash(&i.to_le_bytes()).as_bytes()).collect()
    }

    fn open(store: Arc<MemoryStore>) -> MerkleAccumulator<Arc<MemoryStore>> {
        MerkleAccumulator::open(
            ForestId::new(1, AssetDomain::FUNGIBLE),
            store,
            Box::new(AcceptAll),
            AccumulatorConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_tree() {
        let acc = open(MemoryStore::shared());
        assert_eq!(acc.root(0), empty_root());
        assert_eq!(acc.latest_tree(), None);
        assert_eq!(acc.next_insert_tree(), 0);

        for position in [0u64, 1, 777, TREE_CAPACITY - 1] {
            let proof = acc.proof(0, position).unwrap();
            assert!(proof.verify_against(&empty_root()));
        }
        assert!(acc.proof(0, TREE_CAPACITY).is_err());
    }

    #[test]
    fn test_insert_and_prove() {
        let mut acc = open(MemoryStore::shared());
        let batch = leaves(0..5);

        let outcome = acc.insert(0, 0, &batch).unwrap();
        let InsertOutcome::Applied { root, length, .. } = outcome else {
            panic!("batch not applied: {:?}", outcome);
        };
        assert_eq!(length, 5);
        assert_eq!(acc.root(0), root);
        assert_eq!(acc.latest_tree(), Some(0));

        for (position, leaf) in batch.iter().enumerate() {
            let proof = acc.proof(0, position as u64).unwrap();
            assert_eq!(proof.leaf, *leaf);
            assert!(proof.verify_against(&root));
        }
        assert_eq!(acc.leaf(0, 4).unwrap(), Some(batch[4]));
        assert_eq!(acc.leaf(0, 5).unwrap(), None);
    }

    #[test]
    fn test_duplicate_batch_ignored() {
        let mut acc = open(MemoryStore::shared());
        acc.insert(0, 0, &leaves(0..4)).unwrap();
        let root = acc.root(0);

        let outcome = acc.insert(0, 0, &leaves(0..4)).unwrap();
        assert_eq!(outcome, InsertOutcome::Ignored { tree: 0, cursor: 4 });
        let outcome = acc.insert(0, 2, &leaves(2..6)).unwrap();
        assert_eq!(outcome, InsertOutcome::Ignored { tree: 0, cursor: 4 });

        assert_eq!(acc.root(0), root);
        assert_eq!(acc.tree_length(0), 4);
        assert_eq!(acc.root_history(0).len(), 1);
    }

    #[test]
    fn test_gap_rejected() {
        let mut acc = open(MemoryStore::shared());
        acc.insert(0, 0, &leaves(0..2)).unwrap();

        let err = acc.insert(0, 3, &leaves(3..4)).unwrap_err();
        assert!(matches!(err, MerkleError::CursorGap { tree: 0, expected: 2, got: 3 }));
        assert!(err.is_resync());
        assert_eq!(acc.tree_length(0), 2);
    }

    #[test]
    fn test_rejected_root_rolls_back() {
        let store = MemoryStore::shared();
        let known = Arc::new(KnownRoots::new());

        // learn the root of the first batch from a trusting replica
        let mut replica = open(MemoryStore::shared());
        replica.insert(0, 0, &leaves(0..3)).unwrap();
        known.publish(0, replica.root(0));

        let validator = {
            let known = known.clone();
            move |tree: u32, root: &Hash| known.validate_root(tree, root)
        };
        let mut acc = MerkleAccumulator::open(
            ForestId::new(1, AssetDomain::FUNGIBLE),
            store.clone(),
            Box::new(validator),
            AccumulatorConfig::default(),
        )
        .unwrap();

        acc.insert(0, 0, &leaves(0..3)).unwrap();
        let root = acc.root(0);
        let rows = store.len();

        // a feed that disagrees with the chain
        let err = acc.insert(0, 3, &leaves(100..102)).unwrap_err();
        assert!(matches!(err, MerkleError::ValidationRejected { tree: 0, .. }));

        assert_eq!(acc.tree_length(0), 3);
        assert_eq!(acc.root(0), root);
        assert_eq!(acc.root_history(0).len(), 1);
        assert_eq!(store.len(), rows);
    }

    #[test]
    fn test_validator_failure_rolls_back() {
        let store = MemoryStore::shared();
        let failing = |_tree: u32, _root: &Hash| -> std::result::Result<bool, ValidatorError> {
            Err(ValidatorError("connection refused".into()))
        };
        let mut acc = MerkleAccumulator::open(
            ForestId::new(1, AssetDomain::FUNGIBLE),
            store.clone(),
            Box::new(failing),
            AccumulatorConfig::default(),
        )
        .unwrap();

        let err = acc.insert(0, 0, &leaves(0..3)).unwrap_err();
        assert!(matches!(err, MerkleError::ValidatorUnavailable { tree: 0, .. }));
        assert_eq!(acc.tree_length(0), 0);
        assert_eq!(acc.root(0), empty_root());
        assert!(store.is_empty());
    }

    #[test]
    fn test_split_batches_match_single_batch() {
        let mut split = open(MemoryStore::shared());
        split.insert(0, 0, &leaves(0..3)).unwrap();
        split.insert(0, 3, &leaves(3..4)).unwrap();
        split.insert(0, 4, &leaves(4..11)).unwrap();

        let mut whole = open(MemoryStore::shared());
        whole.insert(0, 0, &leaves(0..11)).unwrap();

        assert_eq!(split.root(0), whole.root(0));
    }

    #[test]
    fn test_historical_proof() {
        let mut acc = open(MemoryStore::shared());
        acc.insert(0, 0, &leaves(0..3)).unwrap();
        let anchor = acc.root(0);

        acc.insert(0, 3, &leaves(3..9)).unwrap();
        assert_ne!(acc.root(0), anchor);

        let proof = acc.proof_at(0, 1, &anchor).unwrap();
        assert!(proof.verify_against(&anchor));
        assert_eq!(proof.leaf, leaves(1..2)[0]);

        // the same leaf against the newer root has a different path
        let latest = acc.proof(0, 1).unwrap();
        assert!(latest.verify_against(&acc.root(0)));
        assert_ne!(latest.siblings, proof.siblings);

        // leaf 5 did not exist under the anchor
        assert!(matches!(
            acc.proof_at(0, 5, &anchor),
            Err(MerkleError::PositionOutOfRange { .. })
        ));
    }

    #[test]
    fn test_empty_root_is_not_in_history() {
        let mut acc = open(MemoryStore::shared());
        assert!(acc.root_history(0).is_empty());
        assert!(!acc.is_known_root(0, &empty_root()));
        assert!(matches!(
            acc.proof_at(0, 0, &empty_root()),
            Err(MerkleError::StaleProof { tree: 0, .. })
        ));

        acc.insert(0, 0, &leaves(0..2)).unwrap();
        assert_eq!(acc.root_history(0).len(), 1);
        assert!(!acc.is_known_root(0, &empty_root()));
    }

    #[test]
    fn test_bounded_history_goes_stale() {
        let mut acc = MerkleAccumulator::open(
            ForestId::new(1, AssetDomain::FUNGIBLE),
            MemoryStore::shared(),
            Box::new(AcceptAll),
            AccumulatorConfig::with_history_limit(2),
        )
        .unwrap();

        acc.insert(0, 0, &leaves(0..1)).unwrap();
        let oldest = acc.root(0);
        acc.insert(0, 1, &leaves(1..2)).unwrap();
        acc.insert(0, 2, &leaves(2..3)).unwrap();

        assert_eq!(acc.root_history(0).len(), 2);
        assert!(!acc.is_known_root(0, &oldest));
        assert!(matches!(
            acc.proof_at(0, 0, &oldest),
            Err(MerkleError::StaleProof { tree: 0, .. })
        ));
    }

    #[test]
    fn test_reopen_restores_state() {
        let store = MemoryStore::shared();
        let (root, history) = {
            let mut acc = open(store.clone());
            acc.insert(0, 0, &leaves(0..4)).unwrap();
            acc.insert(0, 4, &leaves(4..6)).unwrap();
            (acc.root(0), acc.root_history(0))
        };

        let mut acc = open(store);
        assert_eq!(acc.tree_length(0), 6);
        assert_eq!(acc.root(0), root);
        assert_eq!(acc.root_history(0), history);

        // cursor survives, so a replay is still a duplicate
        assert!(matches!(acc.insert(0, 4, &leaves(4..6)).unwrap(), InsertOutcome::Ignored { .. }));
        assert!(acc.proof_at(0, 2, &history[0].root).unwrap().verify());
    }

    #[test]
    fn test_append_opens_next_tree() {
        let mut acc = open(MemoryStore::shared());
        let fill = leaves(0..TREE_CAPACITY - 2);
        acc.insert(0, 0, &fill).unwrap();

        let positions = acc.append(&leaves(0..5)).unwrap();
        assert_eq!(positions[0], LeafPosition { tree: 0, position: TREE_CAPACITY - 2 });
        assert_eq!(positions[1], LeafPosition { tree: 0, position: TREE_CAPACITY - 1 });
        assert_eq!(positions[2], LeafPosition { tree: 1, position: 0 });
        assert_eq!(positions[4], LeafPosition { tree: 1, position: 2 });

        assert_eq!(acc.tree_length(0), TREE_CAPACITY);
        assert_eq!(acc.tree_length(1), 3);
        assert_eq!(acc.latest_tree(), Some(1));

        let err = acc.insert(0, TREE_CAPACITY, &leaves(0..1)).unwrap_err();
        assert!(matches!(err, MerkleError::TreeFull { tree: 0, .. }));
    }

    #[test]
    fn test_config_validation() {
        let bad_depth = AccumulatorConfig {
            depth: 20,
            root_history_limit: None,
        };
        assert!(bad_depth.validate().is_err());
        assert!(AccumulatorConfig::with_history_limit(0).validate().is_err());
        assert!(AccumulatorConfig::default().validate().is_ok());
    }
}
