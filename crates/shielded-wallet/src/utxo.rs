//! wallet-owned notes
//!
//! the sync layer hands new commitments and nullifiers to [`WalletNotes`]
//! through explicit apply calls; decryption goes through the [`WalletCrypto`]
//! collaborator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shielded_merkle::Nullifier;
use tracing::{debug, Span};

use crate::keys::{NullifyingKey, ViewKey};
use crate::note::{BlockRef, Commitment, CommitmentPayload, Note};
use crate::value::TokenId;

/// decryption and nullifier keys for one wallet
pub trait WalletCrypto {
    /// note behind `commitment` if it belongs to this wallet
    fn decrypt(&self, commitment: &Commitment) -> Option<Note>;

    fn nullifying_key(&self) -> NullifyingKey;
}

impl WalletCrypto for ViewKey {
    fn decrypt(&self, commitment: &Commitment) -> Option<Note> {
        let note = match &commitment.payload {
            CommitmentPayload::Encrypted(ciphertext) => self.try_decrypt(ciphertext)?,
            CommitmentPayload::Preimage(note) if self.owns(&note.owner) => note.clone(),
            CommitmentPayload::Preimage(_) => return None,
        };
        // a payload that does not open the published hash is not spendable
        (note.commit() == commitment.hash).then_some(note)
    }

    fn nullifying_key(&self) -> NullifyingKey {
        self.nullifying_key
    }
}

/// leaf coordinates, unique per forest
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoId {
    pub tree: u32,
    pub position: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub note: Note,
    pub tree: u32,
    pub position: u64,
    pub nullifier: Nullifier,
    pub block: BlockRef,
    pub spent: bool,
}

impl Utxo {
    pub fn id(&self) -> UtxoId {
        UtxoId {
            tree: self.tree,
            position: self.position,
        }
    }
}

pub struct WalletNotes {
    utxos: BTreeMap<UtxoId, Utxo>,
    span: Span,
}

impl Default for WalletNotes {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletNotes {
    pub fn new() -> Self {
        Self {
            utxos: BTreeMap::new(),
            span: tracing::info_span!("wallet_notes"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// trial-decrypt new commitments; returns how many became utxos
    pub fn apply_commitments<C: WalletCrypto>(&mut self, crypto: &C, commitments: &[Commitment]) -> usize {
        let nk = crypto.nullifying_key();
        let mut added = 0;

        for commitment in commitments {
            let id = UtxoId {
                tree: commitment.tree,
                position: commitment.position,
            };
            if self.utxos.contains_key(&id) {
                continue;
            }
            let Some(note) = crypto.decrypt(commitment) else {
                continue;
            };

            debug!(parent: &self.span, tree = id.tree, position = id.position, value = %note.value, "note received");
            self.utxos.insert(
                id,
                Utxo {
                    note,
                    tree: commitment.tree,
                    position: commitment.position,
                    nullifier: nk.nullifier(commitment.tree, commitment.position),
                    block: commitment.block,
                    spent: false,
                },
            );
            added += 1;
        }
        added
    }

    /// flag utxos whose nullifiers were observed; returns how many flipped
    pub fn apply_nullifiers(&mut self, nullifiers: &[Nullifier]) -> usize {
        let mut flipped = 0;
        for utxo in self.utxos.values_mut() {
            if !utxo.spent && nullifiers.contains(&utxo.nullifier) {
                utxo.spent = true;
                flipped += 1;
            }
        }
        if flipped > 0 {
            debug!(parent: &self.span, flipped, "notes spent");
        }
        flipped
    }

    /// drop everything; the sync layer replays from scratch
    pub fn reset(&mut self) {
        debug!(parent: &self.span, dropped = self.utxos.len(), "reset wallet notes");
        self.utxos.clear();
    }

    pub fn get(&self, id: &UtxoId) -> Option<&Utxo> {
        self.utxos.get(id)
    }

    /// all utxos in (tree, position) order
    pub fn utxos(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.values()
    }

    pub fn utxos_for(&self, token: TokenId) -> impl Iterator<Item = &Utxo> {
        self.utxos.values().filter(move |utxo| utxo.note.token == token)
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendKey;
    use crate::note::Rseed;
    use crate::value::Amount;

    fn note(sk: &SpendKey, value: u128) -> Note {
        Note::new(sk.address(0), TokenId::derive(b"DAI"), Amount(value), Rseed([value as u8; 32]))
    }

    #[test]
    fn test_apply_commitments() {
        let alice = SpendKey::from_phrase("alice", "");
        let bob = SpendKey::from_phrase("bob", "");

        let commitments = vec![
            Commitment::encrypted(&note(&alice, 10), 0, 0, BlockRef::default()),
            Commitment::encrypted(&note(&bob, 20), 0, 1, BlockRef::default()),
            Commitment::preimage(note(&alice, 30), 0, 2, BlockRef::default()),
            Commitment::preimage(note(&bob, 40), 0, 3, BlockRef::default()),
        ];

        let mut notes = WalletNotes::new();
        assert_eq!(notes.apply_commitments(&alice.view_key(), &commitments), 2);
        // replays are ignored
        assert_eq!(notes.apply_commitments(&alice.view_key(), &commitments), 0);

        let values: Vec<u128> = notes.utxos().map(|u| u.note.value.0).collect();
        assert_eq!(values, vec![10, 30]);

        let utxo = notes.get(&UtxoId { tree: 0, position: 2 }).unwrap();
        assert_eq!(utxo.nullifier, alice.nullifying_key().nullifier(0, 2));
    }

    #[test]
    fn test_mismatched_hash_is_not_received() {
        let alice = SpendKey::from_phrase("alice", "");
        let mut forged = Commitment::encrypted(&note(&alice, 10), 0, 0, BlockRef::default());
        forged.hash = note(&alice, 11).commit();

        assert_eq!(alice.view_key().decrypt(&forged), None);
    }

    #[test]
    fn test_apply_nullifiers_and_reset() {
        let alice = SpendKey::from_phrase("alice", "");
        let mut notes = WalletNotes::new();
        notes.apply_commitments(
            &alice.view_key(),
            &[
                Commitment::encrypted(&note(&alice, 1), 0, 0, BlockRef::default()),
                Commitment::encrypted(&note(&alice, 2), 0, 1, BlockRef::default()),
            ],
        );

        let spent = alice.nullifying_key().nullifier(0, 1);
        assert_eq!(notes.apply_nullifiers(&[spent]), 1);
        assert_eq!(notes.apply_nullifiers(&[spent]), 0);
        assert!(notes.get(&UtxoId { tree: 0, position: 1 }).unwrap().spent);

        notes.reset();
        assert!(notes.is_empty());
    }
}
