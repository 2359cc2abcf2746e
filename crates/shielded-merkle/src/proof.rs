//! membership proofs

use serde::{Deserialize, Serialize};

use crate::hash::hash_node;
use crate::{Hash, TREE_DEPTH};

/// authentication path for one leaf against one root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub tree: u32,
    pub leaf: Hash,
    /// sibling hashes from leaf level up to just below the root
    pub siblings: Vec<Hash>,
    /// leaf position; bit `k` says whether the level-`k` node is a right child
    pub position: u64,
    pub root: Hash,
}

impl MerkleProof {
    /// left/right choice per level, leaf first
    pub fn index_bits(&self) -> Vec<bool> {
        (0..self.siblings.len())
            .map(|level| (self.position >> level) & 1 == 1)
            .collect()
    }

    /// fold the siblings from the leaf upward
    pub fn compute_root(&self) -> Hash {
        let mut current = self.leaf;
        for (sibling, is_right) in self.siblings.iter().zip(self.index_bits()) {
            current = if is_right {
                hash_node(sibling, &current)
            } else {
                hash_node(&current, sibling)
            };
        }
        current
    }

    pub fn verify(&self) -> bool {
        self.siblings.len() == TREE_DEPTH && self.compute_root() == self.root
    }

    /// verify against a root the caller trusts rather than the embedded one
    pub fn verify_against(&self, root: &Hash) -> bool {
        self.root == *root && self.verify()
    }
}
