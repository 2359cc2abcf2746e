//! shielded wallet accounting
//!
//! sits on top of [`shielded_merkle`]: tracks which commitments belong to the
//! wallet, derives per-tree unspent balances, selects notes into circuit-shaped
//! spend groups and assembles prover inputs for them.
//!
//! ```text
//! commitments ──▶ WalletNotes ──▶ BalanceIndex ──▶ SpendSolver ──▶ TransactionAssembler ──▶ Prover
//!   (sync)        trial decrypt    per tree,        groups of        merkle paths at
//!                                  nullifier check  1|2|8 in,        group anchor,
//!                                                   2|3 out          nullifiers, commitments
//! ```
//!
//! the solver and balance index never write; failed solves need no cleanup.

pub mod assembler;
pub mod balance;
pub mod error;
pub mod keys;
pub mod note;
pub mod solver;
pub mod utxo;
pub mod value;

pub use assembler::{
    MockProver, PrivateInputs, Proof, ProveMode, ProvedTransaction, Prover, PublicInputs, TransactionAssembler,
    DUMMY_PROOF_LEN,
};
pub use balance::{BalanceIndex, TreeBalance};
pub use error::{ProverError, Result, SolveError, WalletError};
pub use keys::{Address, NullifyingKey, SpendKey, ViewKey};
pub use note::{unshield_commitment, BlockRef, Commitment, CommitmentPayload, Note, NoteCommitment, Rseed};
pub use solver::{
    find_next_solution_batch, is_nullifier_tier, is_usable_batch, next_nullifier_target, should_add_more_utxos,
    SpendRequest, SpendSolver, SpendingSolutionGroup, Unshield, COMMITMENT_TIERS, MAX_COMMITMENTS,
    NULLIFIER_TIERS,
};
pub use utxo::{Utxo, UtxoId, WalletCrypto, WalletNotes};
pub use value::{Amount, TokenId};
