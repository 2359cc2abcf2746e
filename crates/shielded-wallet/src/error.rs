//! error types for balance accounting, spend selection and assembly

use shielded_merkle::MerkleError;
use thiserror::Error;

use crate::value::{Amount, TokenId};

/// spend selection failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: Amount, available: Amount },

    #[error(
        "could not route output of {value} into any tree; consolidate balances into one tree or \
         split the transfer into sequential single-destination sends"
    )]
    MultiDestinationUnsupported { value: Amount },

    #[error("no spendable batch left for unshield of {value}")]
    NoUnshieldSolution { value: Amount },

    /// solver defect: a finished group has a shape no circuit accepts
    #[error("illegal circuit shape in tree {tree}: {nullifiers} nullifiers, {commitments} commitments")]
    IllegalCircuitShape {
        tree: u32,
        nullifiers: usize,
        commitments: usize,
    },

    /// solver defect: a group's inputs do not equal outputs plus unshield plus change
    #[error("unbalanced group in tree {tree}: inputs {input}, outputs {output}, change {change}")]
    UnbalancedGroup {
        tree: u32,
        input: Amount,
        output: Amount,
        change: Amount,
    },

    #[error("spend request has no outputs and no unshield")]
    EmptyRequest,

    #[error("token mismatch: request is for {expected:?}, found {found:?}")]
    TokenMismatch { expected: TokenId, found: TokenId },
}

impl SolveError {
    /// internal invariant violations, never a normal user-facing failure
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            SolveError::IllegalCircuitShape { .. } | SolveError::UnbalancedGroup { .. }
        )
    }
}

#[derive(Debug, Error)]
#[error("prover: {0}")]
pub struct ProverError(pub String);

#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Solve(#[from] SolveError),

    #[error(transparent)]
    Prover(#[from] ProverError),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for WalletError {
    fn from(e: bincode::Error) -> Self {
        WalletError::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
