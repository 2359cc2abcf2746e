//! proof input assembly
//!
//! translates solved groups into prover inputs. nothing is selected here: the
//! assembler fetches merkle paths against each group's anchor, derives
//! nullifiers and output commitments, and hands the result to a [`Prover`].

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use shielded_merkle::{Hash, KvStore, MerkleAccumulator, MerkleProof, Nullifier};
use tracing::{debug, Span};

use crate::error::{ProverError, Result};
use crate::keys::{Address, NullifyingKey};
use crate::note::{unshield_commitment, Note, NoteCommitment, Rseed};
use crate::solver::{SpendingSolutionGroup, Unshield};
use crate::value::TokenId;

/// length of the placeholder proof emitted in dummy mode
pub const DUMMY_PROOF_LEN: usize = 32;

/// values the verifier sees
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    pub tree: u32,
    pub anchor: Hash,
    pub token: TokenId,
    pub nullifiers: Vec<Nullifier>,
    /// recipients, then change, then the unshield if any
    pub commitments: Vec<NoteCommitment>,
    pub unshield: Option<Unshield>,
}

/// witness data only the prover sees
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateInputs {
    pub nullifying_key: NullifyingKey,
    pub input_notes: Vec<Note>,
    pub merkle_proofs: Vec<MerkleProof>,
    /// recipients, then change
    pub output_notes: Vec<Note>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof(pub Vec<u8>);

/// proof system collaborator
pub trait Prover {
    fn prove(&self, public: &PublicInputs, private: &PrivateInputs) -> std::result::Result<Proof, ProverError>;

    /// zero-filled stand-in for gas estimation
    fn dummy_prove(&self, public: &PublicInputs) -> std::result::Result<Proof, ProverError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProveMode {
    Real,
    Dummy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvedTransaction {
    pub public: PublicInputs,
    pub proof: Proof,
    /// change note to track once the transaction lands
    pub change: Note,
}

/// checks witness consistency instead of proving anything
///
/// the proof is a blake3 hash over the encoded public inputs.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockProver;

impl MockProver {
    fn check_witness(public: &PublicInputs, private: &PrivateInputs) -> std::result::Result<(), ProverError> {
        if private.input_notes.len() != public.nullifiers.len()
            || private.merkle_proofs.len() != public.nullifiers.len()
        {
            return Err(ProverError("input count mismatch".into()));
        }

        for ((note, proof), nullifier) in private
            .input_notes
            .iter()
            .zip(&private.merkle_proofs)
            .zip(&public.nullifiers)
        {
            if proof.tree != public.tree || proof.leaf != note.commit().0 || !proof.verify_against(&public.anchor) {
                return Err(ProverError(format!("bad merkle path at position {}", proof.position)));
            }
            if private.nullifying_key.nullifier(proof.tree, proof.position) != *nullifier {
                return Err(ProverError(format!("bad nullifier at position {}", proof.position)));
            }
            if note.token != public.token {
                return Err(ProverError("input token mismatch".into()));
            }
        }

        let mut expected: Vec<NoteCommitment> = private.output_notes.iter().map(Note::commit).collect();
        if let Some(unshield) = &public.unshield {
            expected.push(unshield_commitment(&unshield.destination, &public.token, unshield.value));
        }
        if expected != public.commitments {
            return Err(ProverError("output commitments do not match notes".into()));
        }

        let input: u128 = private.input_notes.iter().map(|n| n.value.0).sum();
        let output: u128 = private.output_notes.iter().map(|n| n.value.0).sum::<u128>()
            + public.unshield.as_ref().map(|u| u.value.0).unwrap_or(0);
        if input != output {
            return Err(ProverError(format!("value not conserved: {} in, {} out", input, output)));
        }
        Ok(())
    }
}

impl Prover for MockProver {
    fn prove(&self, public: &PublicInputs, private: &PrivateInputs) -> std::result::Result<Proof, ProverError> {
        Self::check_witness(public, private)?;
        let encoded = bincode::serialize(public).map_err(|e| ProverError(e.to_string()))?;
        Ok(Proof(blake3::hash(&encoded).as_bytes().to_vec()))
    }

    fn dummy_prove(&self, _public: &PublicInputs) -> std::result::Result<Proof, ProverError> {
        Ok(Proof(vec![0u8; DUMMY_PROOF_LEN]))
    }
}

pub struct TransactionAssembler {
    nullifying_key: NullifyingKey,
    change_address: Address,
    span: Span,
}

impl TransactionAssembler {
    pub fn new(nullifying_key: NullifyingKey, change_address: Address) -> Self {
        Self {
            nullifying_key,
            change_address,
            span: tracing::info_span!("assembler"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// public + private inputs for one group
    ///
    /// paths are taken against `group.anchor`, not the current root; an anchor
    /// that fell out of root history surfaces as `StaleProof`.
    pub fn build_inputs<S, R>(
        &self,
        accumulator: &MerkleAccumulator<S>,
        group: &SpendingSolutionGroup,
        rng: &mut R,
    ) -> Result<(PublicInputs, PrivateInputs)>
    where
        S: KvStore + Clone,
        R: RngCore + CryptoRng,
    {
        group.check_shape()?;

        let mut nullifiers = Vec::with_capacity(group.utxos.len());
        let mut merkle_proofs = Vec::with_capacity(group.utxos.len());
        for utxo in &group.utxos {
            merkle_proofs.push(accumulator.proof_at(group.tree, utxo.position, &group.anchor)?);
            nullifiers.push(self.nullifying_key.nullifier(group.tree, utxo.position));
        }

        let change = Note::new(self.change_address, group.token, group.change, Rseed::random(rng));
        let mut output_notes = group.outputs.clone();
        output_notes.push(change);

        let mut commitments: Vec<NoteCommitment> = output_notes.iter().map(Note::commit).collect();
        if let Some(unshield) = &group.unshield {
            commitments.push(unshield_commitment(&unshield.destination, &group.token, unshield.value));
        }

        let public = PublicInputs {
            tree: group.tree,
            anchor: group.anchor,
            token: group.token,
            nullifiers,
            commitments,
            unshield: group.unshield.clone(),
        };
        let private = PrivateInputs {
            nullifying_key: self.nullifying_key,
            input_notes: group.utxos.iter().map(|utxo| utxo.note.clone()).collect(),
            merkle_proofs,
            output_notes,
        };
        Ok((public, private))
    }

    /// assemble and prove every group, in order
    pub fn assemble<S, P, R>(
        &self,
        accumulator: &MerkleAccumulator<S>,
        prover: &P,
        groups: &[SpendingSolutionGroup],
        mode: ProveMode,
        rng: &mut R,
    ) -> Result<Vec<ProvedTransaction>>
    where
        S: KvStore + Clone,
        P: Prover + ?Sized,
        R: RngCore + CryptoRng,
    {
        let mut transactions = Vec::with_capacity(groups.len());

        for group in groups {
            let (public, mut private) = self.build_inputs(accumulator, group, rng)?;
            let proof = match mode {
                ProveMode::Real => prover.prove(&public, &private)?,
                ProveMode::Dummy => prover.dummy_prove(&public)?,
            };
            debug!(
                parent: &self.span,
                tree = group.tree,
                nullifiers = public.nullifiers.len(),
                commitments = public.commitments.len(),
                ?mode,
                "proved group"
            );

            // build_inputs always appends the change note last
            let change = private
                .output_notes
                .pop()
                .ok_or_else(|| ProverError("missing change note".into()))?;
            transactions.push(ProvedTransaction { public, proof, change });
        }
        Ok(transactions)
    }
}
