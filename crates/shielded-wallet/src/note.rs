//! notes and the commitments that publish them
//!
//! a note is the decrypted value record; its commitment hash is the leaf the
//! accumulator stores.

use std::fmt;

use serde::{Deserialize, Serialize};
use shielded_merkle::Hash;

use crate::keys::{encrypt_note, Address};
use crate::value::{Amount, TokenId};

const NOTE_DOMAIN: &[u8] = b"shielded.note.v1";
const UNSHIELD_DOMAIN: &[u8] = b"shielded.unshield.v1";

/// random seed for note blinding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rseed(pub [u8; 32]);

impl Rseed {
    pub fn random<R: rand::RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub owner: Address,
    pub token: TokenId,
    pub value: Amount,
    pub random: Rseed,
}

impl Note {
    pub fn new(owner: Address, token: TokenId, value: Amount, random: Rseed) -> Self {
        Self {
            owner,
            token,
            value,
            random,
        }
    }

    fn blinding(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"shielded.note.blinding.v1");
        hasher.update(&self.random.0);
        *hasher.finalize().as_bytes()
    }

    /// commitment hash (the accumulator leaf)
    pub fn commit(&self) -> NoteCommitment {
        let mut hasher = blake3::Hasher::new();
        hasher.update(NOTE_DOMAIN);
        hasher.update(&self.owner.to_bytes());
        hasher.update(&self.token.0);
        hasher.update(&self.value.to_le_bytes());
        hasher.update(&self.blinding());
        NoteCommitment(*hasher.finalize().as_bytes())
    }

    /// encrypt to the owner address
    pub fn encrypt(&self) -> Vec<u8> {
        encrypt_note(self)
    }
}

/// commitment hash of a note or an unshield
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteCommitment(pub Hash);

impl NoteCommitment {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for NoteCommitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for NoteCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoteCommitment({})", hex::encode(&self.0[..8]))
    }
}

/// commitment for value leaving the pool to a public destination
pub fn unshield_commitment(destination: &[u8], token: &TokenId, value: Amount) -> NoteCommitment {
    let mut hasher = blake3::Hasher::new();
    hasher.update(UNSHIELD_DOMAIN);
    hasher.update(&(destination.len() as u32).to_le_bytes());
    hasher.update(destination);
    hasher.update(&token.0);
    hasher.update(&value.to_le_bytes());
    NoteCommitment(*hasher.finalize().as_bytes())
}

/// where a commitment was observed on chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: [u8; 32],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentPayload {
    /// note ciphertext for the recipient
    Encrypted(Vec<u8>),
    /// plaintext preimage (public shields)
    Preimage(Note),
}

/// commitment as it appears in the accumulator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub hash: NoteCommitment,
    pub tree: u32,
    pub position: u64,
    pub block: BlockRef,
    pub payload: CommitmentPayload,
}

impl Commitment {
    pub fn encrypted(note: &Note, tree: u32, position: u64, block: BlockRef) -> Self {
        Self {
            hash: note.commit(),
            tree,
            position,
            block,
            payload: CommitmentPayload::Encrypted(note.encrypt()),
        }
    }

    pub fn preimage(note: Note, tree: u32, position: u64, block: BlockRef) -> Self {
        Self {
            hash: note.commit(),
            tree,
            position,
            block,
            payload: CommitmentPayload::Preimage(note),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendKey;

    fn note(value: u128) -> Note {
        Note::new(
            SpendKey::from_phrase("alice", "").address(0),
            TokenId::derive(b"DAI"),
            Amount(value),
            Rseed([1u8; 32]),
        )
    }

    #[test]
    fn test_commitment_binds_fields() {
        let base = note(10);
        assert_eq!(base.commit(), note(10).commit());
        assert_ne!(base.commit(), note(11).commit());

        let mut reblinded = base.clone();
        reblinded.random = Rseed([2u8; 32]);
        assert_ne!(base.commit(), reblinded.commit());

        let mut other_token = base.clone();
        other_token.token = TokenId::NATIVE;
        assert_ne!(base.commit(), other_token.commit());
    }

    #[test]
    fn test_unshield_commitment() {
        let dai = TokenId::derive(b"DAI");
        let a = unshield_commitment(b"0xabc", &dai, Amount(5));
        assert_eq!(a, unshield_commitment(b"0xabc", &dai, Amount(5)));
        assert_ne!(a, unshield_commitment(b"0xabd", &dai, Amount(5)));
        assert_ne!(a, unshield_commitment(b"0xabc", &dai, Amount(6)));
    }

    #[test]
    fn test_commitment_constructors() {
        let n = note(3);
        let enc = Commitment::encrypted(&n, 0, 4, BlockRef::default());
        let pre = Commitment::preimage(n.clone(), 0, 4, BlockRef::default());
        assert_eq!(enc.hash, pre.hash);
        assert!(matches!(enc.payload, CommitmentPayload::Encrypted(_)));
        assert_eq!(pre.payload, CommitmentPayload::Preimage(n));
    }
}
