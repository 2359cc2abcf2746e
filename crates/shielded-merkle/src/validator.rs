//! root validation against an external authority
//!
//! before a batch is committed its candidate root is shown to a validator,
//! typically backed by a chain rpc that knows which roots were published.
//! the call may block and may fail; either `Ok(false)` or `Err` discards the
//! batch.

use std::collections::HashSet;
use std::sync::RwLock;

use thiserror::Error;

use crate::Hash;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ValidatorError(pub String);

pub trait RootValidator: Send + Sync {
    fn validate_root(&self, tree: u32, root: &Hash) -> Result<bool, ValidatorError>;
}

impl<F> RootValidator for F
where
    F: Fn(u32, &Hash) -> Result<bool, ValidatorError> + Send + Sync,
{
    fn validate_root(&self, tree: u32, root: &Hash) -> Result<bool, ValidatorError> {
        self(tree, root)
    }
}

/// accepts every root (trusted feeds, tests)
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl RootValidator for AcceptAll {
    fn validate_root(&self, _tree: u32, _root: &Hash) -> Result<bool, ValidatorError> {
        Ok(true)
    }
}

/// accepts only roots that were published for the tree
#[derive(Debug, Default)]
pub struct KnownRoots {
    roots: RwLock<HashSet<(u32, Hash)>>,
}

impl KnownRoots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, tree: u32, root: Hash) {
        if let Ok(mut roots) = self.roots.write() {
            roots.insert((tree, root));
        }
    }
}

impl RootValidator for KnownRoots {
    fn validate_root(&self, tree: u32, root: &Hash) -> Result<bool, ValidatorError> {
        let roots = self
            .roots
            .read()
            .map_err(|_| ValidatorError("known roots lock poisoned".into()))?;
        Ok(roots.contains(&(tree, *root)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_roots() {
        let known = KnownRoots::new();
        assert!(!known.validate_root(0, &[1u8; 32]).unwrap());
        known.publish(0, [1u8; 32]);
        assert!(known.validate_root(0, &[1u8; 32]).unwrap());
        assert!(!known.validate_root(1, &[1u8; 32]).unwrap());
    }

    #[test]
    fn test_closure_validator() {
        let reject = |_tree: u32, _root: &Hash| -> Result<bool, ValidatorError> {
            Err(ValidatorError("rpc timeout".into()))
        };
        assert!(reject.validate_root(0, &[0u8; 32]).is_err());
        assert!(AcceptAll.validate_root(3, &[0u8; 32]).unwrap());
    }
}
