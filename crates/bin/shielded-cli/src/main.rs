use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use serde_json::{json, Value};
use shielded_merkle::{
    AcceptAll, AccumulatorConfig, AssetDomain, BatchOp, ForestId, KvStore, MerkleAccumulator, MerkleForest,
    SledStore, TxRef,
};
use shielded_wallet::{
    Amount, BalanceIndex, BlockRef, Commitment, MockProver, Note, ProveMode, ProvedTransaction, Rseed, SpendKey,
    SpendRequest, SpendSolver, SpendingSolutionGroup, TokenId, TransactionAssembler, WalletNotes,
};
use tracing::info;

type Store = Arc<SledStore>;

/// prefix for the replayable commitment log kept next to the accumulator
const COMMITMENT_LOG: &[u8] = b"cli/commitments/";

#[derive(Parser, Debug)]
#[command(name = "shielded-cli")]
#[command(about = "shield, scan, solve and prove against a local accumulator", long_about = None)]
struct Args {
    /// sled database path
    #[arg(long, env = "SHIELDED_DB", default_value = "./shielded.db")]
    db_path: String,

    /// chain id of the forest
    #[arg(long, default_value_t = 1)]
    chain: u64,

    /// wallet seed phrase
    #[arg(long, env = "SHIELDED_PHRASE", default_value = "demo")]
    phrase: String,

    /// token symbol, hashed into the token id
    #[arg(long, default_value = "DAI")]
    token: String,

    /// keep at most this many roots per tree
    #[arg(long)]
    history_limit: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// shield deposits, then send and unshield from them
    Demo {
        /// values to shield into the wallet first
        #[arg(long, value_delimiter = ',')]
        deposit: Vec<u64>,

        /// values to send, one recipient note each
        #[arg(long, value_delimiter = ',')]
        send: Vec<u64>,

        /// value to withdraw out of the pool
        #[arg(long)]
        unshield: Option<u64>,

        /// public destination of the unshield
        #[arg(long, default_value = "0x0000000000000000000000000000000000000000")]
        destination: String,

        /// recipient seed phrase
        #[arg(long, default_value = "recipient")]
        to: String,

        /// dummy proofs, nothing lands in the accumulator
        #[arg(long)]
        dry_run: bool,
    },
    /// per-tree unspent balances
    Balance,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shielded_cli=info,shielded_wallet=info,shielded_merkle=info".into()),
        )
        .init();

    let args = Args::parse();
    let id = ForestId::new(args.chain, AssetDomain::FUNGIBLE);
    let token = TokenId::derive(args.token.as_bytes());
    let key = SpendKey::from_phrase(&args.phrase, "");

    info!("database: {}", args.db_path);
    info!("forest: {}", id);

    let store: Store = Arc::new(SledStore::open(&args.db_path).context("opening database")?);
    let config = match args.history_limit {
        Some(limit) => AccumulatorConfig::with_history_limit(limit),
        None => AccumulatorConfig::default(),
    };
    let mut forest = MerkleForest::new(store.clone(), config)?;
    let acc = forest.create(id, Box::new(AcceptAll))?;

    let report = match args.command {
        Command::Balance => {
            let notes = load_notes(&store, &key)?;
            json!({ "forest": id.to_string(), "balances": balances_json(&notes, acc, token)? })
        }
        Command::Demo {
            deposit,
            send,
            unshield,
            destination,
            to,
            dry_run,
        } => {
            let demo = Demo {
                store: &store,
                key: &key,
                token,
                recipient: SpendKey::from_phrase(&to, ""),
            };
            demo.run(acc, &deposit, &send, unshield, destination, dry_run)?
        }
    };

    store.flush()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

struct Demo<'a> {
    store: &'a Store,
    key: &'a SpendKey,
    token: TokenId,
    recipient: SpendKey,
}

impl Demo<'_> {
    fn run(
        &self,
        acc: &mut MerkleAccumulator<Store>,
        deposit: &[u64],
        send: &[u64],
        unshield: Option<u64>,
        destination: String,
        dry_run: bool,
    ) -> Result<Value> {
        if !deposit.is_empty() {
            let notes: Vec<Note> = deposit
                .iter()
                .map(|v| Note::new(self.key.address(0), self.token, Amount::from(*v), Rseed::random(&mut OsRng)))
                .collect();
            let commitments = publish(acc, &notes)?;
            record(self.store, &commitments)?;
            info!("shielded {} deposits", commitments.len());
        }

        let notes = load_notes(self.store, self.key)?;
        let before = balances_json(&notes, acc, self.token)?;

        let mut request = send.iter().fold(SpendRequest::new(self.token), |req, v| {
            req.with_output(Note::new(
                self.recipient.address(0),
                self.token,
                Amount::from(*v),
                Rseed::random(&mut OsRng),
            ))
        });
        if let Some(value) = unshield {
            request = request.with_unshield(Amount::from(value), destination.into_bytes());
        }
        if request.outputs.is_empty() && request.unshield.is_none() {
            return Ok(json!({ "balances": before }));
        }

        let balances = BalanceIndex::new().balances_by_tree(&notes, &*acc, self.token)?;
        let groups = SpendSolver::new().solve(&balances, &request)?;
        ensure_single_token(&groups, self.token)?;
        info!("solved into {} groups", groups.len());

        let mode = if dry_run { ProveMode::Dummy } else { ProveMode::Real };
        let assembler = TransactionAssembler::new(self.key.nullifying_key(), self.key.address(1));
        let txs = assembler.assemble(&*acc, &MockProver, &groups, mode, &mut OsRng)?;

        if !dry_run {
            for (group, tx) in groups.iter().zip(&txs) {
                let landed = land(acc, group, tx)?;
                record(self.store, &landed)?;
            }
            info!("landed {} transactions", txs.len());
        }

        let after = balances_json(&load_notes(self.store, self.key)?, acc, self.token)?;
        Ok(json!({
            "before": before,
            "groups": groups.iter().zip(&txs).map(|(g, tx)| group_json(g, tx)).collect::<Vec<_>>(),
            "after": after,
            "dry_run": dry_run,
        }))
    }
}

/// append note commitments and wrap them as the sync layer would deliver them
fn publish(acc: &mut MerkleAccumulator<Store>, notes: &[Note]) -> Result<Vec<Commitment>> {
    let leaves: Vec<_> = notes.iter().map(|note| note.commit().0).collect();
    let positions = acc.append(&leaves)?;
    Ok(notes
        .iter()
        .zip(positions)
        .map(|(note, at)| Commitment::encrypted(note, at.tree, at.position, BlockRef::default()))
        .collect())
}

/// record the group's nullifiers and publish its recipient and change notes
fn land(
    acc: &mut MerkleAccumulator<Store>,
    group: &SpendingSolutionGroup,
    tx: &ProvedTransaction,
) -> Result<Vec<Commitment>> {
    let tx_ref = TxRef(*blake3::hash(&tx.proof.0).as_bytes());
    let entries: Vec<_> = tx
        .public
        .nullifiers
        .iter()
        .map(|nf| (*nf, tx.public.tree, tx_ref))
        .collect();
    acc.nullifiers().nullify_batch(&entries)?;

    let mut notes = group.outputs.clone();
    notes.push(tx.change.clone());
    publish(acc, &notes)
}

fn log_key(commitment: &Commitment) -> Vec<u8> {
    let mut key = COMMITMENT_LOG.to_vec();
    key.extend_from_slice(&commitment.tree.to_be_bytes());
    key.extend_from_slice(&commitment.position.to_be_bytes());
    key
}

fn record(store: &Store, commitments: &[Commitment]) -> Result<()> {
    let mut ops = Vec::with_capacity(commitments.len());
    for commitment in commitments {
        ops.push(BatchOp::put(log_key(commitment), bincode::serialize(commitment)?));
    }
    store.apply_batch(ops)?;
    Ok(())
}

/// replay the commitment log through trial decryption
fn load_notes(store: &Store, key: &SpendKey) -> Result<WalletNotes> {
    let commitments = store
        .scan_prefix(COMMITMENT_LOG)?
        .into_iter()
        .map(|(_, bytes)| bincode::deserialize::<Commitment>(&bytes).context("decoding commitment log"))
        .collect::<Result<Vec<_>>>()?;

    let mut notes = WalletNotes::new();
    notes.apply_commitments(&key.view_key(), &commitments);
    Ok(notes)
}

fn balances_json(notes: &WalletNotes, acc: &MerkleAccumulator<Store>, token: TokenId) -> Result<Value> {
    let balances = BalanceIndex::new().balances_by_tree(notes, acc, token)?;
    let total: Amount = balances.iter().map(|b| b.balance).sum();
    let trees: Vec<Value> = balances
        .iter()
        .map(|b| {
            json!({
                "tree": b.tree,
                "anchor": hex::encode(b.anchor),
                "balance": b.balance.0.to_string(),
                "utxos": b.utxos.len(),
            })
        })
        .collect();
    Ok(json!({ "total": total.0.to_string(), "trees": trees }))
}

fn group_json(group: &SpendingSolutionGroup, tx: &ProvedTransaction) -> Value {
    let inputs: Vec<String> = group.utxos.iter().map(|u| u.note.value.to_string()).collect();
    let outputs: Vec<String> = group.outputs.iter().map(|n| n.value.to_string()).collect();
    json!({
        "tree": group.tree,
        "anchor": hex::encode(group.anchor),
        "inputs": inputs,
        "outputs": outputs,
        "unshield": group.unshield.as_ref().map(|u| u.value.0.to_string()),
        "change": group.change.0.to_string(),
        "nullifiers": tx.public.nullifiers.iter().map(|nf| hex::encode(nf.0)).collect::<Vec<_>>(),
        "commitments": tx.public.commitments.iter().map(|c| hex::encode(c.0)).collect::<Vec<_>>(),
        "proof": hex::encode(&tx.proof.0),
    })
}

fn ensure_single_token(groups: &[SpendingSolutionGroup], token: TokenId) -> Result<()> {
    if groups.iter().any(|g| g.token != token) {
        bail!("solver returned a group for another token");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_log_replays_into_notes() {
        let dir = tempfile::tempdir().unwrap();
        let store: Store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
        let key = SpendKey::from_phrase("demo", "");
        let token = TokenId::derive(b"DAI");

        let mut acc = MerkleAccumulator::open(
            ForestId::new(1, AssetDomain::FUNGIBLE),
            store.clone(),
            Box::new(AcceptAll),
            AccumulatorConfig::default(),
        )
        .unwrap();
        let notes: Vec<Note> = [30u64, 40]
            .iter()
            .map(|v| Note::new(key.address(0), token, Amount::from(*v), Rseed::random(&mut OsRng)))
            .collect();
        record(&store, &publish(&mut acc, &notes).unwrap()).unwrap();

        let replayed = load_notes(&store, &key).unwrap();
        assert_eq!(replayed.len(), 2);
        let balances = balances_json(&replayed, &acc, token).unwrap();
        assert_eq!(balances["total"], "70");
    }

    #[test]
    fn test_demo_lands_change() {
        let dir = tempfile::tempdir().unwrap();
        let store: Store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
        let key = SpendKey::from_phrase("demo", "");
        let mut acc = MerkleAccumulator::open(
            ForestId::new(1, AssetDomain::FUNGIBLE),
            store.clone(),
            Box::new(AcceptAll),
            AccumulatorConfig::default(),
        )
        .unwrap();

        let demo = Demo {
            store: &store,
            key: &key,
            token: TokenId::derive(b"DAI"),
            recipient: SpendKey::from_phrase("recipient", ""),
        };
        let report = demo
            .run(&mut acc, &[30, 40, 50], &[80], Some(10), "0xdest".into(), false)
            .unwrap();

        assert_eq!(report["before"]["total"], "120");
        assert_eq!(report["after"]["total"], "30");
        assert_eq!(report["groups"].as_array().unwrap().len(), 1);
        assert_eq!(acc.nullifiers().len().unwrap(), 2);
    }
}
