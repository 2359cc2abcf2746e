//! error types for the accumulator

use thiserror::Error;

use crate::layout::ForestId;

#[derive(Debug, Error)]
pub enum MerkleError {
    /// the root validator did not confirm the candidate root; batch discarded
    #[error("root {root} for tree {tree} rejected by validator")]
    ValidationRejected { tree: u32, root: String },

    /// the validator call itself failed; batch discarded
    #[error("root validator unavailable for tree {tree}: {reason}")]
    ValidatorUnavailable { tree: u32, reason: String },

    /// batch starts past the cursor, caller must resync
    #[error("gap in tree {tree}: expected position {expected}, got {got}")]
    CursorGap { tree: u32, expected: u64, got: u64 },

    #[error("tree {tree} full: {length} + {incoming} leaves exceeds capacity {capacity}")]
    TreeFull {
        tree: u32,
        length: u64,
        incoming: u64,
        capacity: u64,
    },

    #[error("position {position} out of range for tree {tree}")]
    PositionOutOfRange { tree: u32, position: u64 },

    /// anchor root no longer retained, regenerate the path from current state
    #[error("stale proof: root {root} no longer in history of tree {tree}")]
    StaleProof { tree: u32, root: String },

    #[error("forest {0} already exists")]
    ForestExists(ForestId),

    #[error("unknown forest {0}")]
    UnknownForest(ForestId),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl MerkleError {
    /// non-fatal rejections that the sync layer answers with a resync
    pub fn is_resync(&self) -> bool {
        matches!(
            self,
            MerkleError::ValidationRejected { .. }
                | MerkleError::ValidatorUnavailable { .. }
                | MerkleError::CursorGap { .. }
        )
    }
}

impl From<bincode::Error> for MerkleError {
    fn from(e: bincode::Error) -> Self {
        MerkleError::Codec(e.to_string())
    }
}

#[cfg(feature = "sled")]
impl From<sled::Error> for MerkleError {
    fn from(e: sled::Error) -> Self {
        MerkleError::Storage(format!("sled: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, MerkleError>;
