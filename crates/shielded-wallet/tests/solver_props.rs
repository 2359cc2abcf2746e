//! property tests for spend selection

use proptest::prelude::*;
use shielded_merkle::Nullifier;
use shielded_wallet::{
    is_nullifier_tier, Address, Amount, BlockRef, Note, Rseed, SolveError, SpendRequest, SpendSolver, TokenId,
    TreeBalance, Utxo, COMMITMENT_TIERS,
};

fn token() -> TokenId {
    TokenId::derive(b"USDC")
}

fn note(value: u64, salt: u8) -> Note {
    let owner = Address {
        diversifier: [salt; 32],
        index: 0,
    };
    Note::new(owner, token(), Amount::from(value), Rseed([salt; 32]))
}

fn balances(trees: &[Vec<u64>]) -> Vec<TreeBalance> {
    trees
        .iter()
        .enumerate()
        .map(|(tree, values)| {
            let utxos = values
                .iter()
                .enumerate()
                .map(|(position, value)| Utxo {
                    note: note(*value, position as u8),
                    tree: tree as u32,
                    position: position as u64,
                    nullifier: Nullifier([position as u8; 32]),
                    block: BlockRef::default(),
                    spent: false,
                })
                .collect();
            TreeBalance::new(tree as u32, token(), [tree as u8; 32], utxos)
        })
        .collect()
}

fn request(outputs: &[u64], unshield: Option<u64>) -> SpendRequest {
    let req = outputs
        .iter()
        .enumerate()
        .fold(SpendRequest::new(token()), |req, (i, v)| req.with_output(note(*v, 200 + i as u8)));
    match unshield {
        Some(v) => req.with_unshield(Amount::from(v), b"0xdest".to_vec()),
        None => req,
    }
}

fn tree_values() -> impl Strategy<Value = Vec<Vec<u64>>> {
    prop::collection::vec(prop::collection::vec(0u64..100, 0..12), 1..4)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn solved_groups_fit_circuit_shapes(
        trees in tree_values(),
        outputs in prop::collection::vec(0u64..150, 0..4),
        unshield in prop::option::of(0u64..80),
    ) {
        prop_assume!(!outputs.is_empty() || unshield.is_some());
        let balances = balances(&trees);
        let req = request(&outputs, unshield);
        let total = req.total();
        let available: Amount = balances.iter().map(|b| b.balance).sum();

        match SpendSolver::new().solve(&balances, &req) {
            Ok(groups) => {
                prop_assert!(total <= available);
                let mut input = Amount::ZERO;
                let mut seen = std::collections::HashSet::new();
                let mut routed = Vec::new();

                for group in &groups {
                    prop_assert!(is_nullifier_tier(group.utxos.len()));
                    prop_assert!(COMMITMENT_TIERS.contains(&group.commitment_count()));
                    prop_assert!(group.utxos.iter().all(|u| u.tree == group.tree));
                    prop_assert_eq!(group.anchor, [group.tree as u8; 32]);
                    // each utxo spent once across the whole solution
                    prop_assert!(group.utxos.iter().all(|u| seen.insert(u.id())));

                    let out = group.outputs.iter().map(|n| n.value).sum::<Amount>()
                        + group.unshield.as_ref().map(|u| u.value).unwrap_or_default();
                    prop_assert_eq!(group.input_value(), out + group.change);
                    input += group.input_value();
                    routed.extend(group.outputs.iter().cloned());
                }

                prop_assert!(input >= total);
                prop_assert_eq!(groups.iter().filter(|g| g.unshield.is_some()).count(), usize::from(unshield.is_some()));

                let mut expected = req.outputs.clone();
                let key = |n: &Note| (n.value, n.random.0);
                expected.sort_by_key(key);
                routed.sort_by_key(key);
                prop_assert_eq!(routed, expected);
            }
            Err(SolveError::InsufficientBalance { required, available: have }) => {
                prop_assert_eq!(required, total);
                prop_assert_eq!(have, available);
                prop_assert!(total > available);
            }
            Err(SolveError::MultiDestinationUnsupported { .. }) | Err(SolveError::NoUnshieldSolution { .. }) => {
                prop_assert!(total <= available);
            }
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }

    #[test]
    fn solving_is_deterministic(trees in tree_values(), outputs in prop::collection::vec(1u64..120, 1..4)) {
        let balances = balances(&trees);
        let req = request(&outputs, None);
        let solver = SpendSolver::new();
        prop_assert_eq!(solver.solve(&balances, &req), solver.solve(&balances, &req));
    }

    #[test]
    fn single_output_within_one_tree_always_solves(values in prop::collection::vec(1u64..100, 1..3), cut in 0u64..100) {
        // one or two utxos are always a legal tier, so any target up to the tree balance is reachable
        let balances = balances(&[values.clone()]);
        let target = cut % (values.iter().sum::<u64>() + 1);
        let groups = SpendSolver::new().solve(&balances, &request(&[target], None)).unwrap();
        prop_assert_eq!(groups.len(), 1);
    }
}
