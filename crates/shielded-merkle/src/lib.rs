//! shielded merkle accumulator
//!
//! append-only forests of fixed-depth note commitment trees, one forest per
//! (chain, asset domain), plus the nullifier registry that marks notes spent.
//!
//! # layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ MerkleForest                                                 │
//! │  └─ (chain, domain) ─▶ MerkleAccumulator                     │
//! │       ├─ tree 0   depth 16, 65536 leaves, cursor, roots[]    │
//! │       ├─ tree 1   opened once tree 0 is full                 │
//! │       ├─ ...                                                 │
//! │       └─ NullifierSet  nullifier ─▶ (tree, spending tx)      │
//! │                                                              │
//! │ every write goes through RootValidator before it is stored   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! writes are batches of leaves addressed by `(tree, start_position)`. a batch
//! behind the tree cursor is a stale duplicate and ignored, a batch ahead of it
//! is a gap and rejected. applied batches land in a single [`KvStore`] batch,
//! so a rejected root never leaves a trace.

pub mod accumulator;
pub mod error;
pub mod forest;
pub mod hash;
pub mod layout;
pub mod nullifier;
pub mod proof;
pub mod store;
pub mod validator;

pub use accumulator::{AccumulatorConfig, InsertOutcome, LeafPosition, MerkleAccumulator, RootRecord};
pub use error::{MerkleError, Result};
pub use forest::MerkleForest;
pub use hash::{empty_root, hash_node, zero_hashes, zero_leaf, ZeroHashes};
pub use layout::{AssetDomain, ChainId, ForestId};
pub use nullifier::{Nullifier, NullifierRecord, NullifierSet, TxRef};
pub use proof::MerkleProof;
pub use store::{BatchOp, KvStore, MemoryStore};
#[cfg(feature = "sled")]
pub use store::SledStore;
pub use validator::{AcceptAll, KnownRoots, RootValidator, ValidatorError};

/// 32-byte node / leaf hash
pub type Hash = [u8; 32];

/// depth of every commitment tree (fixed by the spend circuits)
pub const TREE_DEPTH: usize = 16;

/// leaves per tree before the next tree index opens
pub const TREE_CAPACITY: u64 = 1 << TREE_DEPTH;

/// domain separator for interior nodes
pub const NODE_DOMAIN: &[u8] = b"shielded.merkle.node.v1";

/// domain separator for the level-0 empty leaf
pub const ZERO_LEAF_DOMAIN: &[u8] = b"shielded.merkle.zero-leaf.v1";
