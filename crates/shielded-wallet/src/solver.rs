//! spend selection
//!
//! turns per-tree balances and a spend request into groups that each fit one
//! of the fixed circuit shapes:
//!
//! ```text
//! nullifiers (inputs)     1 | 2 | 8
//! commitments (outputs)   2 | 3      = recipients + change + unshield
//! ```
//!
//! every group spends from exactly one tree. change is always emitted, even
//! at zero value, so a group carries at most two recipient notes, or one
//! recipient plus an unshield.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use shielded_merkle::Hash;
use tracing::{debug, error, Span};

use crate::balance::TreeBalance;
use crate::error::SolveError;
use crate::note::Note;
use crate::utxo::{Utxo, UtxoId};
use crate::value::{Amount, TokenId};

/// input counts the spend circuits accept
pub const NULLIFIER_TIERS: [usize; 3] = [1, 2, 8];

/// output counts the spend circuits accept
pub const COMMITMENT_TIERS: [usize; 2] = [2, 3];

pub const MAX_COMMITMENTS: usize = 3;

/// value leaving the pool to a public destination
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unshield {
    pub value: Amount,
    pub destination: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRequest {
    pub token: TokenId,
    pub outputs: Vec<Note>,
    pub unshield: Option<Unshield>,
}

impl SpendRequest {
    pub fn new(token: TokenId) -> Self {
        Self {
            token,
            outputs: Vec::new(),
            unshield: None,
        }
    }

    pub fn with_output(mut self, note: Note) -> Self {
        self.outputs.push(note);
        self
    }

    pub fn with_unshield(mut self, value: Amount, destination: impl Into<Vec<u8>>) -> Self {
        self.unshield = Some(Unshield {
            value,
            destination: destination.into(),
        });
        self
    }

    /// Σ outputs + unshield
    pub fn total(&self) -> Amount {
        self.outputs.iter().map(|note| note.value).sum::<Amount>() + self.unshield_value()
    }

    fn unshield_value(&self) -> Amount {
        self.unshield.as_ref().map(|u| u.value).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), SolveError> {
        if self.outputs.is_empty() && self.unshield.is_none() {
            return Err(SolveError::EmptyRequest);
        }
        if let Some(note) = self.outputs.iter().find(|note| note.token != self.token) {
            return Err(SolveError::TokenMismatch {
                expected: self.token,
                found: note.token,
            });
        }
        Ok(())
    }
}

/// one proof's worth of inputs and outputs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingSolutionGroup {
    pub tree: u32,
    /// root every input is proven against
    pub anchor: Hash,
    pub token: TokenId,
    pub utxos: Vec<Utxo>,
    pub outputs: Vec<Note>,
    pub unshield: Option<Unshield>,
    /// value returned to the wallet
    pub change: Amount,
}

impl SpendingSolutionGroup {
    fn new(
        balance: &TreeBalance,
        utxos: Vec<Utxo>,
        outputs: Vec<Note>,
        unshield: Option<Unshield>,
    ) -> Result<Self, SolveError> {
        let mut group = Self {
            tree: balance.tree,
            anchor: balance.anchor,
            token: balance.token,
            change: Amount::ZERO,
            utxos,
            outputs,
            unshield,
        };
        let (input, output) = (group.input_value(), group.output_value());
        group.change = input.checked_sub(output).ok_or(SolveError::UnbalancedGroup {
            tree: group.tree,
            input,
            output,
            change: Amount::ZERO,
        })?;
        Ok(group)
    }

    pub fn input_value(&self) -> Amount {
        self.utxos.iter().map(|utxo| utxo.note.value).sum()
    }

    /// recipients plus unshield, change excluded
    pub fn output_value(&self) -> Amount {
        self.outputs.iter().map(|note| note.value).sum::<Amount>()
            + self.unshield.as_ref().map(|u| u.value).unwrap_or_default()
    }

    pub fn nullifier_count(&self) -> usize {
        self.utxos.len()
    }

    /// recipients + change + unshield
    pub fn commitment_count(&self) -> usize {
        self.outputs.len() + 1 + usize::from(self.unshield.is_some())
    }

    /// single tree, a supported (nullifiers, commitments) pair, and value
    /// conserved between inputs and outputs plus change
    pub fn check_shape(&self) -> Result<(), SolveError> {
        let single_tree = self.utxos.iter().all(|utxo| utxo.tree == self.tree);
        if !single_tree
            || !is_nullifier_tier(self.nullifier_count())
            || !COMMITMENT_TIERS.contains(&self.commitment_count())
        {
            return Err(SolveError::IllegalCircuitShape {
                tree: self.tree,
                nullifiers: self.nullifier_count(),
                commitments: self.commitment_count(),
            });
        }

        let (input, output) = (self.input_value(), self.output_value());
        if output.checked_add(self.change) != Some(input) {
            return Err(SolveError::UnbalancedGroup {
                tree: self.tree,
                input,
                output,
                change: self.change,
            });
        }
        Ok(())
    }
}

pub fn is_nullifier_tier(count: usize) -> bool {
    NULLIFIER_TIERS.contains(&count)
}

/// smallest supported input count above `count`, `None` past the largest
pub fn next_nullifier_target(count: usize) -> Option<usize> {
    NULLIFIER_TIERS.iter().copied().find(|tier| *tier > count)
}

/// whether a batch of `count` utxos worth `value` should take another one
///
/// stops on a covered target at a supported tier, or when the next tier needs
/// more utxos than `remaining`. the latter can leave an under-filled or
/// off-tier batch, which callers reject through [`is_usable_batch`].
pub fn should_add_more_utxos(count: usize, value: Amount, target: Amount, remaining: usize) -> bool {
    if value >= target && is_nullifier_tier(count) {
        return false;
    }
    match next_nullifier_target(count) {
        Some(next) => count + remaining >= next,
        None => false,
    }
}

/// largest-first batch from the tree's utxos not in `excluded`
pub fn find_next_solution_batch(balance: &TreeBalance, target: Amount, excluded: &HashSet<UtxoId>) -> Vec<Utxo> {
    let mut available: Vec<&Utxo> = balance
        .utxos
        .iter()
        .filter(|utxo| !excluded.contains(&utxo.id()))
        .collect();
    // stable: equal values keep tree order
    available.sort_by(|a, b| b.note.value.cmp(&a.note.value));

    let mut remaining = available.len();
    let mut value = Amount::ZERO;
    let mut batch = Vec::new();
    for utxo in available {
        if !should_add_more_utxos(batch.len(), value, target, remaining) {
            break;
        }
        value += utxo.note.value;
        batch.push(utxo.clone());
        remaining -= 1;
    }
    batch
}

/// batch covers `target` with a supported input count
pub fn is_usable_batch(batch: &[Utxo], target: Amount) -> bool {
    is_nullifier_tier(batch.len()) && batch.iter().map(|utxo| utxo.note.value).sum::<Amount>() >= target
}

pub struct SpendSolver {
    span: Span,
}

impl Default for SpendSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SpendSolver {
    pub fn new() -> Self {
        Self {
            span: tracing::info_span!("solver"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// select inputs for `request` from `balances`
    ///
    /// pure: the balances are only read, so a failed solve leaves nothing to
    /// roll back.
    pub fn solve(
        &self,
        balances: &[TreeBalance],
        request: &SpendRequest,
    ) -> Result<Vec<SpendingSolutionGroup>, SolveError> {
        request.validate()?;
        if let Some(balance) = balances.iter().find(|b| b.token != request.token) {
            return Err(SolveError::TokenMismatch {
                expected: request.token,
                found: balance.token,
            });
        }

        let required = request.total();
        let available: Amount = balances.iter().map(|b| b.balance).sum();
        if required > available {
            debug!(parent: &self.span, %required, %available, "insufficient balance");
            return Err(SolveError::InsufficientBalance { required, available });
        }

        let mut trees: Vec<&TreeBalance> = balances.iter().collect();
        trees.sort_by_key(|b| b.tree);

        let groups = match self.solve_single_tree(&trees, request)? {
            Some(group) => vec![group],
            None => self.solve_per_output(&trees, request)?,
        };

        for group in &groups {
            if let Err(e) = group.check_shape() {
                error!(
                    parent: &self.span,
                    tree = group.tree,
                    nullifiers = group.nullifier_count(),
                    commitments = group.commitment_count(),
                    error = %e,
                    "solver produced an illegal group"
                );
                return Err(e);
            }
        }

        debug!(
            parent: &self.span,
            %required,
            groups = groups.len(),
            inputs = groups.iter().map(|g| g.utxos.len()).sum::<usize>(),
            "solved"
        );
        Ok(groups)
    }

    /// everything in one group from the first tree that can cover it
    fn solve_single_tree(
        &self,
        trees: &[&TreeBalance],
        request: &SpendRequest,
    ) -> Result<Option<SpendingSolutionGroup>, SolveError> {
        let commitments = request.outputs.len() + 1 + usize::from(request.unshield.is_some());
        if commitments > MAX_COMMITMENTS {
            return Ok(None);
        }

        let required = request.total();
        let none = HashSet::new();
        for balance in trees.iter().filter(|balance| balance.balance >= required) {
            let batch = find_next_solution_batch(balance, required, &none);
            if !is_usable_batch(&batch, required) {
                debug!(parent: &self.span, tree = balance.tree, len = batch.len(), "no legal single-tree batch");
                continue;
            }
            return SpendingSolutionGroup::new(balance, batch, request.outputs.clone(), request.unshield.clone())
                .map(Some);
        }
        Ok(None)
    }

    /// one group per output (plus any later output its change can cover),
    /// then the unshield on whatever is left
    fn solve_per_output(
        &self,
        trees: &[&TreeBalance],
        request: &SpendRequest,
    ) -> Result<Vec<SpendingSolutionGroup>, SolveError> {
        let mut excluded: HashSet<UtxoId> = HashSet::new();
        let mut pending: VecDeque<Note> = request.outputs.iter().cloned().collect();
        let mut groups = Vec::new();

        while let Some(output) = pending.pop_front() {
            let (balance, batch) = self
                .next_batch(trees, output.value, &excluded)
                .ok_or(SolveError::MultiDestinationUnsupported { value: output.value })?;
            excluded.extend(batch.iter().map(Utxo::id));

            let input: Amount = batch.iter().map(|utxo| utxo.note.value).sum();
            let mut leftover = input.checked_sub(output.value).ok_or(SolveError::UnbalancedGroup {
                tree: balance.tree,
                input,
                output: output.value,
                change: Amount::ZERO,
            })?;
            let mut outputs = vec![output];

            // change takes the last commitment slot
            while outputs.len() + 1 < MAX_COMMITMENTS {
                let Some(extra) = pending
                    .iter()
                    .position(|next| next.value <= leftover)
                    .and_then(|i| pending.remove(i))
                else {
                    break;
                };
                leftover = leftover - extra.value;
                outputs.push(extra);
            }

            groups.push(SpendingSolutionGroup::new(balance, batch, outputs, None)?);
        }

        if let Some(unshield) = &request.unshield {
            let (balance, batch) = self
                .next_batch(trees, unshield.value, &excluded)
                .ok_or(SolveError::NoUnshieldSolution { value: unshield.value })?;
            excluded.extend(batch.iter().map(Utxo::id));
            groups.push(SpendingSolutionGroup::new(
                balance,
                batch,
                Vec::new(),
                Some(unshield.clone()),
            )?);
        }

        Ok(groups)
    }

    /// first tree, in order, yielding a usable batch for `target`
    fn next_batch<'a>(
        &self,
        trees: &[&'a TreeBalance],
        target: Amount,
        excluded: &HashSet<UtxoId>,
    ) -> Option<(&'a TreeBalance, Vec<Utxo>)> {
        trees.iter().find_map(|balance| {
            let batch = find_next_solution_batch(balance, target, excluded);
            if is_usable_batch(&batch, target) {
                return Some((*balance, batch));
            }
            if !batch.is_empty() {
                debug!(
                    parent: &self.span,
                    tree = balance.tree,
                    len = batch.len(),
                    %target,
                    "batch under target or off tier, trying next tree"
                );
            }
            None
        })
    }
}
