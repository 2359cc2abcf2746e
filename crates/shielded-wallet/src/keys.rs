//! key hierarchy for the reference wallet
//!
//! spend key -> view key (incoming + nullifying) -> addresses. derivation is
//! blake3 with a domain per key; note encryption is the simplified xor stream
//! keyed by the recipient address.

use serde::{Deserialize, Serialize};
use shielded_merkle::Nullifier;

use crate::note::{Note, Rseed};
use crate::value::{Amount, TokenId};

/// address indices scanned when checking ownership
pub const ADDRESS_SCAN_LIMIT: u32 = 16;

const CIPHERTEXT_HEADER: usize = 32 + 4;
const PLAINTEXT_LEN: usize = 32 + 16 + 32;

/// spending key - root of the hierarchy
#[derive(Clone)]
pub struct SpendKey {
    seed: [u8; 32],
}

impl SpendKey {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { seed }
    }

    /// derive from phrase + password
    pub fn from_phrase(phrase: &str, password: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"shielded.spend-key.v1");
        hasher.update(phrase.as_bytes());
        hasher.update(password.as_bytes());
        Self {
            seed: *hasher.finalize().as_bytes(),
        }
    }

    pub fn nullifying_key(&self) -> NullifyingKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"shielded.nullifying-key.v1");
        hasher.update(&self.seed);
        NullifyingKey(*hasher.finalize().as_bytes())
    }

    pub fn view_key(&self) -> ViewKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"shielded.view-key.v1");
        hasher.update(&self.seed);
        ViewKey {
            incoming: *hasher.finalize().as_bytes(),
            nullifying_key: self.nullifying_key(),
        }
    }

    pub fn address(&self, index: u32) -> Address {
        self.view_key().address(index)
    }
}

impl std::fmt::Debug for SpendKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SpendKey(..)")
    }
}

/// key for deriving nullifiers from note positions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullifyingKey(pub [u8; 32]);

impl NullifyingKey {
    /// nullifier of the note at `(tree, position)`
    ///
    /// deterministic, so spend detection can recompute it as often as needed.
    pub fn nullifier(&self, tree: u32, position: u64) -> Nullifier {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"shielded.nullifier.v1");
        hasher.update(&self.0);
        hasher.update(&tree.to_be_bytes());
        hasher.update(&position.to_be_bytes());
        Nullifier(*hasher.finalize().as_bytes())
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

/// view key - scans and decrypts notes but cannot spend
#[derive(Clone)]
pub struct ViewKey {
    pub incoming: [u8; 32],
    pub nullifying_key: NullifyingKey,
}

impl ViewKey {
    pub fn address(&self, index: u32) -> Address {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"shielded.address.v1");
        hasher.update(&self.incoming);
        hasher.update(&index.to_le_bytes());
        Address {
            diversifier: *hasher.finalize().as_bytes(),
            index,
        }
    }

    pub fn owns(&self, address: &Address) -> bool {
        address.index < ADDRESS_SCAN_LIMIT && self.address(address.index) == *address
    }

    /// trial-decrypt a note ciphertext; `None` if it is not addressed to us
    pub fn try_decrypt(&self, ciphertext: &[u8]) -> Option<Note> {
        if ciphertext.len() != CIPHERTEXT_HEADER + PLAINTEXT_LEN {
            return None;
        }

        let diversifier: [u8; 32] = ciphertext[..32].try_into().ok()?;
        let index = u32::from_le_bytes(ciphertext[32..36].try_into().ok()?);
        let owner = Address { diversifier, index };
        if !self.owns(&owner) {
            return None;
        }

        let mut plaintext = ciphertext[CIPHERTEXT_HEADER..].to_vec();
        apply_keystream(&owner, &mut plaintext);

        let token = TokenId(plaintext[..32].try_into().ok()?);
        let value = Amount(u128::from_le_bytes(plaintext[32..48].try_into().ok()?));
        let random = Rseed(plaintext[48..80].try_into().ok()?);
        Some(Note::new(owner, token, value, random))
    }
}

/// shielded address
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub diversifier: [u8; 32],
    pub index: u32,
}

impl Address {
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut bytes = [0u8; 36];
        bytes[..32].copy_from_slice(&self.diversifier);
        bytes[32..36].copy_from_slice(&self.index.to_le_bytes());
        bytes
    }
}

/// encrypt a note to its owner: `diversifier || index || xor(token || value || rseed)`
pub(crate) fn encrypt_note(note: &Note) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(PLAINTEXT_LEN);
    plaintext.extend_from_slice(&note.token.0);
    plaintext.extend_from_slice(&note.value.to_le_bytes());
    plaintext.extend_from_slice(&note.random.0);
    apply_keystream(&note.owner, &mut plaintext);

    let mut ciphertext = Vec::with_capacity(CIPHERTEXT_HEADER + PLAINTEXT_LEN);
    ciphertext.extend_from_slice(&note.owner.to_bytes());
    ciphertext.extend_from_slice(&plaintext);
    ciphertext
}

// simplified xor stream; swap for an aead before anything real touches it
fn apply_keystream(owner: &Address, data: &mut [u8]) {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"shielded.note-encryption.v1");
    hasher.update(&owner.to_bytes());
    let mut stream = hasher.finalize_xof();
    let mut keystream = vec![0u8; data.len()];
    stream.fill(&mut keystream);
    for (byte, key) in data.iter_mut().zip(keystream) {
        *byte ^= key;
    }
}
