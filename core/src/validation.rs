//! Validator: connectivity and signature checks over a block in context.
//!
//! Both checks are pure functions of a decoded block plus the storage the
//! chain manager already owns; neither mutates anything. The chain manager
//! applies their results (marking outpoints spent, rejecting the block).

use std::collections::{HashMap, HashSet};

use crate::{mempool::MempoolLike, tx_index::TxIndex, Block, Error, Result, Transaction, TxId};

/// A pure predicate verifying that `spending_tx`'s input `input_index`,
/// which claims to spend an output of `funding_tx`, carries a valid
/// signature. The concrete key/signature scheme lives entirely on the
/// implementor's side; the validator only calls this contract.
pub trait SignatureVerifier {
    fn verify_signature(&self, funding_tx: &Transaction, spending_tx: &Transaction, input_index: usize) -> bool;
}

/// Outpoint consumed by a non-coinbase input: the funding transaction id
/// and the index of the output it spends.
pub type Outpoint = (TxId, u32);

/// Runs the connectivity check over `block`'s non-coinbase
/// transactions, given the already-connected UTXO bookkeeping in `tx_index`.
///
/// On success, returns every outpoint that must be marked spent once the
/// block is connected. Fails with [`Error::UnconnectableBlock`] on a
/// duplicate-in-block outpoint, a reference to an already-spent output, or
/// an outpoint absent from both the index and the block itself.
pub fn spent_outpts(block: &Block, tx_index: &TxIndex, max_output_index: u64) -> Result<Vec<Outpoint>> {
    let in_block_txs: HashMap<TxId, &Transaction> = block
        .transactions
        .iter()
        .skip(1)
        .map(|tx| (tx.hash(), tx))
        .collect();

    let mut seen: HashSet<Outpoint> = HashSet::new();
    let mut result = Vec::new();

    for tx in block.transactions.iter().skip(1) {
        for input in &tx.inputs {
            let outpt = (input.prev_tx, input.output_index);
            if !seen.insert(outpt) {
                return Err(Error::UnconnectableBlock(block.hash()));
            }

            match tx_index.get_tx_idx(input.prev_tx)? {
                Some(idx) => {
                    if input.output_index as u64 > max_output_index {
                        return Err(Error::UnconnectableBlock(block.hash()));
                    }
                    if tx_index.is_spent(input.prev_tx, input.output_index)?.unwrap_or(true) {
                        return Err(Error::UnconnectableBlock(block.hash()));
                    }
                    let _ = idx;
                },
                None => {
                    let funding = in_block_txs
                        .get(&input.prev_tx)
                        .ok_or_else(|| Error::UnconnectableBlock(block.hash()))?;
                    if input.output_index as usize >= funding.outputs.len() {
                        return Err(Error::UnconnectableBlock(block.hash()));
                    }
                },
            }
            result.push(outpt);
        }
    }

    Ok(result)
}

/// Like [`spent_outpts`] but skips the existence/spent checks against
/// `tx_index` — used by `disconnect_block` to recompute which bits to
/// clear without caring whether they are still marked spent (they must
/// be, by invariant, but disconnect doesn't re-verify that).
pub fn recompute_outpts(block: &Block) -> Vec<Outpoint> {
    block
        .transactions
        .iter()
        .skip(1)
        .flat_map(|tx| tx.inputs.iter().map(|i| (i.prev_tx, i.output_index)))
        .collect()
}

/// Resolves the transaction funding `input`, searching, in order, the tx
/// index, the current block (if given), then the mempool (if
/// `check_mempool`).
fn resolve_funding_tx(
    prev_tx: TxId,
    tx_index: &TxIndex,
    block: Option<&Block>,
    mempool: Option<&dyn MempoolLike>,
    check_mempool: bool,
    source: &mut dyn crate::tx_index::BlockSource,
) -> Result<Option<Transaction>> {
    if let Some(tx) = tx_index.get_tx(prev_tx, source)? {
        return Ok(Some(tx));
    }
    if let Some(block) = block {
        if let Some(tx) = block.transactions.iter().find(|t| t.hash() == prev_tx) {
            return Ok(Some(tx.clone()));
        }
    }
    if check_mempool {
        if let Some(mempool) = mempool {
            if let Some(tx) = mempool.get(prev_tx) {
                return Ok(Some(tx));
            }
        }
    }
    Ok(None)
}

/// Runs the signature check over every input of `tx`. Fails
/// with [`Error::MissingDependency`] if a funding transaction cannot be
/// resolved, or [`Error::BadSignature`] if a resolved signature does not
/// verify.
#[allow(clippy::too_many_arguments)]
pub fn tx_signed(
    tx: &Transaction,
    tx_index: &TxIndex,
    block: Option<&Block>,
    mempool: Option<&dyn MempoolLike>,
    check_mempool: bool,
    source: &mut dyn crate::tx_index::BlockSource,
    verifier: &dyn SignatureVerifier,
) -> Result<()> {
    for (i, input) in tx.inputs.iter().enumerate() {
        let funding = resolve_funding_tx(input.prev_tx, tx_index, block, mempool, check_mempool, source)?
            .ok_or(Error::MissingDependency)?;
        if !verifier.verify_signature(&funding, tx, i) {
            return Err(Error::BadSignature);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{kv::KvStores, tx_index::TxIdx, BlockHash, TxInput, TxOutput};

    fn open_tx_index() -> (tempfile::TempDir, TxIndex) {
        let dir = tempdir().unwrap();
        let cfg = crate::config::Config::default();
        let stores = KvStores::open(dir.path(), &cfg).unwrap();
        (dir, TxIndex::new(stores.tx))
    }

    fn tx_spending(prev: TxId, n: u32) -> Transaction {
        Transaction {
            inputs: vec![TxInput { prev_tx: prev, output_index: n, pubkey: vec![], signature: vec![] }],
            outputs: vec![TxOutput { value: 1, pubkey_hash: vec![] }],
            metadata: None,
            lock_height: 0,
        }
    }

    fn coinbase() -> Transaction {
        Transaction {
            inputs: vec![TxInput::coinbase()],
            outputs: vec![TxOutput { value: 50, pubkey_hash: vec![] }],
            metadata: None,
            lock_height: 0,
        }
    }

    #[test]
    fn duplicate_outpoint_in_block_is_unconnectable() {
        let (_dir, idx) = open_tx_index();
        let prev = TxId([9u8; 32]);
        idx.put_tx_idx(prev, &TxIdx::new(BlockHash([1u8; 32]))).unwrap();
        let block = Block::new(
            1,
            BlockHash::ZERO,
            vec![coinbase(), tx_spending(prev, 0), tx_spending(prev, 0)],
            0,
        );
        let err = spent_outpts(&block, &idx, 100_000).unwrap_err();
        assert!(matches!(err, Error::UnconnectableBlock(_)));
    }

    #[test]
    fn spending_already_spent_output_is_unconnectable() {
        let (_dir, idx) = open_tx_index();
        let prev = TxId([9u8; 32]);
        idx.put_tx_idx(prev, &TxIdx::new(BlockHash([1u8; 32]))).unwrap();
        idx.spend_txout(prev, 0).unwrap();
        let block = Block::new(1, BlockHash::ZERO, vec![coinbase(), tx_spending(prev, 0)], 0);
        let err = spent_outpts(&block, &idx, 100_000).unwrap_err();
        assert!(matches!(err, Error::UnconnectableBlock(_)));
    }

    #[test]
    fn unknown_outpoint_outside_block_is_unconnectable() {
        let (_dir, idx) = open_tx_index();
        let block = Block::new(1, BlockHash::ZERO, vec![coinbase(), tx_spending(TxId([7u8; 32]), 0)], 0);
        let err = spent_outpts(&block, &idx, 100_000).unwrap_err();
        assert!(matches!(err, Error::UnconnectableBlock(_)));
    }

    #[test]
    fn in_block_funding_is_accepted() {
        let (_dir, idx) = open_tx_index();
        let grandparent = TxId([5u8; 32]);
        idx.put_tx_idx(grandparent, &TxIdx::new(BlockHash([1u8; 32]))).unwrap();
        let funding = tx_spending(grandparent, 0);
        let funding_id = funding.hash();
        let spending = tx_spending(funding_id, 0);
        let block = Block::new(1, BlockHash::ZERO, vec![coinbase(), funding, spending], 0);
        let outpts = spent_outpts(&block, &idx, 100_000).unwrap();
        assert_eq!(outpts, vec![(grandparent, 0), (funding_id, 0)]);
    }
}
