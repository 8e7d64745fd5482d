//! Transaction index: maps `txid -> {containing_block_hash, spent_output_bitmask}`.
//!
//! Backed by the `tx` store. Values are the textual encoding:
//! `"0x{blkhash_hex} 0x{spentmask_hex}"`.

use num_bigint::BigUint;
use num_traits::Zero;
use tracing::warn;

use crate::{kv::Store, pow, BlockHash, Error, Result, TxId};

/// Sanity bound on an outpoint's output index.
pub const MAX_OUTPUT_INDEX: u64 = 100_000;

/// A resolver for "the block containing this hash", used by
/// [`TxIndex::get_tx`]. Implemented by [`crate::chain_manager::ChainManager`],
/// which combines the block cache and the `blocks` store.
pub trait BlockSource {
    fn load_block(&mut self, hash: &BlockHash) -> Result<Option<crate::Block>>;
}

/// In-memory view of a transaction index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIdx {
    pub block_hash: BlockHash,
    pub spent_mask: BigUint,
}

impl TxIdx {
    pub fn new(block_hash: BlockHash) -> Self {
        Self { block_hash, spent_mask: BigUint::zero() }
    }

    fn serialize(&self) -> String {
        format!("{} {}", pow::hex_uint256(&self.block_hash.0), pow::hex_biguint(&self.spent_mask))
    }

    fn deserialize(s: &str) -> Result<Self> {
        let mut parts = s.splitn(2, ' ');
        let blkhash_hex = parts.next().ok_or_else(|| Error::MalformedValue(s.to_string()))?;
        let spentmask_hex = parts.next().ok_or_else(|| Error::MalformedValue(s.to_string()))?;
        Ok(Self {
            block_hash: BlockHash(pow::hash_from_hex(blkhash_hex)?),
            spent_mask: pow::biguint_from_hex(spentmask_hex)?,
        })
    }

    fn is_spent(&self, n: u32) -> bool {
        bit_is_set(&self.spent_mask, n as usize)
    }
}

/// `BigUint` has no bounded bit-complement, so bit get/set/clear on an
/// arbitrary-precision mask are implemented by hand via shift + mask/sub
/// rather than via fixed-width bit twiddling.
fn bit_is_set(n: &BigUint, i: usize) -> bool {
    ((n >> i) & BigUint::from(1u8)) == BigUint::from(1u8)
}

fn set_bit(n: &mut BigUint, i: usize) {
    *n |= BigUint::from(1u8) << i;
}

fn clear_bit(n: &mut BigUint, i: usize) {
    if bit_is_set(n, i) {
        *n -= BigUint::from(1u8) << i;
    }
}

/// Thin wrapper over the `tx` store.
pub struct TxIndex {
    store: Store,
    max_output_index: u64,
}

impl TxIndex {
    pub fn new(store: Store) -> Self {
        Self { store, max_output_index: MAX_OUTPUT_INDEX }
    }

    /// Like [`TxIndex::new`], but with the sanity bound on an outpoint's
    /// output index taken from [`crate::config::Config::max_output_index`]
    /// instead of the default constant.
    pub fn with_max_output_index(store: Store, max_output_index: u64) -> Self {
        Self { store, max_output_index }
    }

    /// Writes `idx` for `tx_id`, warning (not failing) if this overwrites
    /// an entry pointing at a *different* block rather than failing outright.
    pub fn put_tx_idx(&self, tx_id: TxId, idx: &TxIdx) -> Result<()> {
        if let Some(old) = self.get_tx_idx(tx_id)? {
            if old.block_hash != idx.block_hash {
                warn!(
                    tx_id = %tx_id,
                    old_block = %old.block_hash,
                    new_block = %idx.block_hash,
                    "overwriting tx index entry pointing at a different block"
                );
            }
        }
        self.store.put(&pow::ser_uint256(&tx_id.0), idx.serialize().as_bytes())
    }

    pub fn get_tx_idx(&self, tx_id: TxId) -> Result<Option<TxIdx>> {
        match self.store.get(&pow::ser_uint256(&tx_id.0))? {
            None => Ok(None),
            Some(raw) => {
                let s = String::from_utf8(raw).map_err(|_| Error::MalformedValue("tx index value not utf8".into()))?;
                Ok(Some(TxIdx::deserialize(&s)?))
            },
        }
    }

    pub fn delete_tx_idx(&self, tx_id: TxId) -> Result<()> {
        self.store.delete(&pow::ser_uint256(&tx_id.0))
    }

    /// Resolves `tx_id` via the index, loads its containing block through
    /// `source`, and returns the matching transaction by re-hashing each
    /// transaction in that block. Logs and returns `Ok(None)` (rather than
    /// propagating an error) if the index points at a block that turns out
    /// not to contain the transaction, which is treated as "not found"
    /// at the read site rather than propagated as a hard error.
    pub fn get_tx(&self, tx_id: TxId, source: &mut dyn BlockSource) -> Result<Option<crate::Transaction>> {
        let idx = match self.get_tx_idx(tx_id)? {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let block = match source.load_block(&idx.block_hash)? {
            Some(b) => b,
            None => return Ok(None),
        };
        for tx in &block.transactions {
            if tx.hash() == tx_id {
                return Ok(Some(tx.clone()));
            }
        }
        warn!(tx_id = %tx_id, block = %idx.block_hash, "tx index points at block missing the transaction");
        Ok(None)
    }

    /// Sets bit `n` of `tx_id`'s spent mask. Fails if the outpoint or its
    /// index is unknown/out of the sanity bound.
    pub fn spend_txout(&self, tx_id: TxId, n: u32) -> Result<()> {
        self.mutate_spent_mask(tx_id, n, true)
    }

    /// Symmetric to [`TxIndex::spend_txout`]: clears bit `n`.
    pub fn clear_txout(&self, tx_id: TxId, n: u32) -> Result<()> {
        self.mutate_spent_mask(tx_id, n, false)
    }

    fn mutate_spent_mask(&self, tx_id: TxId, n: u32, spend: bool) -> Result<()> {
        if n as u64 > self.max_output_index {
            return Err(Error::UnconnectableBlock(BlockHash::ZERO));
        }
        let mut idx = self.get_tx_idx(tx_id)?.ok_or(Error::MissingUtxo)?;
        if spend {
            set_bit(&mut idx.spent_mask, n as usize);
        } else {
            clear_bit(&mut idx.spent_mask, n as usize);
        }
        self.put_tx_idx(tx_id, &idx)
    }

    /// Returns whether output `n` of `tx_id` is currently marked spent, or
    /// `None` if `tx_id` has no index entry.
    pub fn is_spent(&self, tx_id: TxId, n: u32) -> Result<Option<bool>> {
        Ok(self.get_tx_idx(tx_id)?.map(|idx| idx.is_spent(n)))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::kv::KvStores;

    fn open_tx_index() -> (tempfile::TempDir, TxIndex) {
        let dir = tempdir().unwrap();
        let cfg = crate::config::Config::default();
        let stores = KvStores::open(dir.path(), &cfg).unwrap();
        (dir, TxIndex::new(stores.tx))
    }

    #[test]
    fn round_trips_through_textual_encoding() {
        let (_dir, idx) = open_tx_index();
        let tx_id = TxId([1u8; 32]);
        let block_hash = BlockHash([2u8; 32]);
        idx.put_tx_idx(tx_id, &TxIdx::new(block_hash)).unwrap();
        let got = idx.get_tx_idx(tx_id).unwrap().unwrap();
        assert_eq!(got.block_hash, block_hash);
        assert_eq!(got.spent_mask, BigUint::zero());
    }

    #[test]
    fn spend_then_clear_round_trips() {
        let (_dir, idx) = open_tx_index();
        let tx_id = TxId([3u8; 32]);
        idx.put_tx_idx(tx_id, &TxIdx::new(BlockHash([4u8; 32]))).unwrap();
        idx.spend_txout(tx_id, 2).unwrap();
        assert_eq!(idx.is_spent(tx_id, 2).unwrap(), Some(true));
        assert_eq!(idx.is_spent(tx_id, 0).unwrap(), Some(false));
        idx.clear_txout(tx_id, 2).unwrap();
        assert_eq!(idx.is_spent(tx_id, 2).unwrap(), Some(false));
    }

    #[test]
    fn spend_unknown_outpoint_fails() {
        let (_dir, idx) = open_tx_index();
        let err = idx.spend_txout(TxId([9u8; 32]), 0).unwrap_err();
        assert!(matches!(err, Error::MissingUtxo));
    }

    #[test]
    fn spend_absurd_index_rejected() {
        let (_dir, idx) = open_tx_index();
        let tx_id = TxId([5u8; 32]);
        idx.put_tx_idx(tx_id, &TxIdx::new(BlockHash([6u8; 32]))).unwrap();
        let err = idx.spend_txout(tx_id, 100_001).unwrap_err();
        assert!(matches!(err, Error::UnconnectableBlock(_)));
    }
}
