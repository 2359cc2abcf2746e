//! node combinator and the precomputed empty-subtree table

use std::sync::OnceLock;

use crate::{Hash, NODE_DOMAIN, TREE_DEPTH, ZERO_LEAF_DOMAIN};

/// combine two children into their parent (order matters)
pub fn hash_node(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(NODE_DOMAIN);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// value of an unfilled leaf slot
pub fn zero_leaf() -> Hash {
    *blake3::hash(ZERO_LEAF_DOMAIN).as_bytes()
}

/// root of an empty subtree at every level, `0..=TREE_DEPTH`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZeroHashes([Hash; TREE_DEPTH + 1]);

impl ZeroHashes {
    fn compute() -> Self {
        let mut levels = [[0u8; 32]; TREE_DEPTH + 1];
        levels[0] = zero_leaf();
        for level in 1..=TREE_DEPTH {
            levels[level] = hash_node(&levels[level - 1], &levels[level - 1]);
        }
        Self(levels)
    }

    /// empty subtree root at `level` (0 = leaf)
    pub fn at(&self, level: usize) -> Hash {
        self.0[level]
    }

    /// root of a tree with no leaves
    pub fn empty_root(&self) -> Hash {
        self.0[TREE_DEPTH]
    }

    pub fn levels(&self) -> &[Hash] {
        &self.0
    }
}

/// shared table, computed on first use
pub fn zero_hashes() -> &'static ZeroHashes {
    static ZEROS: OnceLock<ZeroHashes> = OnceLock::new();
    ZEROS.get_or_init(ZeroHashes::compute)
}

/// root of an empty tree of depth [`TREE_DEPTH`]
pub fn empty_root() -> Hash {
    zero_hashes().empty_root()
}
