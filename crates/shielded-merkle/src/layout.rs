//! forest identity and persisted key layout
//!
//! every key starts with the forest prefix `chain (u64 be) || domain (u8)`,
//! followed by a row tag and big-endian fields so prefix scans come back in
//! tree / level / index order:
//!
//! ```text
//! node      prefix "MerkleTree/"  tree u32 | level u8 | index u64  -> hash
//! meta      prefix "TreeMeta/"    tree u32                         -> TreeMeta
//! history   prefix "RootHistory/" tree u32 | seq u64               -> RootRecord
//! nullifier prefix "Nullifier/"   nullifier [32]                   -> NullifierRecord
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Hash;

const NODE_TAG: &[u8] = b"MerkleTree/";
const META_TAG: &[u8] = b"TreeMeta/";
const HISTORY_TAG: &[u8] = b"RootHistory/";
const NULLIFIER_TAG: &[u8] = b"Nullifier/";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub u64);

/// asset domain within a chain (fungible tokens, nfts, ...)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetDomain(pub u8);

impl AssetDomain {
    pub const FUNGIBLE: Self = Self(0);
    pub const NON_FUNGIBLE: Self = Self(1);
}

/// key of one accumulator instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForestId {
    pub chain: ChainId,
    pub domain: AssetDomain,
}

impl ForestId {
    pub fn new(chain: u64, domain: AssetDomain) -> Self {
        Self {
            chain: ChainId(chain),
            domain,
        }
    }

    fn prefix(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(9 + 16 + 32);
        key.extend_from_slice(&self.chain.0.to_be_bytes());
        key.push(self.domain.0);
        key
    }
}

impl fmt::Display for ForestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain.0, self.domain.0)
    }
}

pub(crate) fn node_key(id: &ForestId, tree: u32, level: u8, index: u64) -> Vec<u8> {
    let mut key = id.prefix();
    key.extend_from_slice(NODE_TAG);
    key.extend_from_slice(&tree.to_be_bytes());
    key.push(level);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub(crate) fn meta_prefix(id: &ForestId) -> Vec<u8> {
    let mut key = id.prefix();
    key.extend_from_slice(META_TAG);
    key
}

pub(crate) fn meta_key(id: &ForestId, tree: u32) -> Vec<u8> {
    let mut key = meta_prefix(id);
    key.extend_from_slice(&tree.to_be_bytes());
    key
}

pub(crate) fn history_prefix(id: &ForestId, tree: u32) -> Vec<u8> {
    let mut key = id.prefix();
    key.extend_from_slice(HISTORY_TAG);
    key.extend_from_slice(&tree.to_be_bytes());
    key
}

pub(crate) fn history_key(id: &ForestId, tree: u32, seq: u64) -> Vec<u8> {
    let mut key = history_prefix(id, tree);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

pub(crate) fn nullifier_prefix(id: &ForestId) -> Vec<u8> {
    let mut key = id.prefix();
    key.extend_from_slice(NULLIFIER_TAG);
    key
}

pub(crate) fn nullifier_key(id: &ForestId, nullifier: &Hash) -> Vec<u8> {
    let mut key = nullifier_prefix(id);
    key.extend_from_slice(nullifier);
    key
}

/// tree index encoded at the end of a meta key
pub(crate) fn tree_from_meta_key(id: &ForestId, key: &[u8]) -> Option<u32> {
    let tail = key.strip_prefix(meta_prefix(id).as_slice())?;
    Some(u32::from_be_bytes(tail.try_into().ok()?))
}
