//! Bounded in-memory block cache fronting the `blocks` store.
//!
//! `get` never touches storage — on a miss, callers read and decode from
//! [`crate::kv::KvStores::blocks`] themselves and then [`BlockCache::put`]
//! the result. The cache is purely an optimization: correctness must never
//! depend on a block being resident.

use lru::LruCache;

use crate::{Block, BlockHash};

/// LRU-evicting cache of decoded blocks, keyed by hash.
pub struct BlockCache {
    inner: LruCache<BlockHash, Block>,
}

impl BlockCache {
    /// Creates a cache with room for `capacity` blocks (default: 750).
    pub fn new(capacity: usize) -> Self {
        let cap = std::num::NonZeroUsize::new(capacity).unwrap_or(std::num::NonZeroUsize::new(1).unwrap());
        Self { inner: LruCache::new(cap) }
    }

    pub fn get(&mut self, hash: &BlockHash) -> Option<&Block> {
        self.inner.get(hash)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.inner.contains(hash)
    }

    pub fn put(&mut self, hash: BlockHash, block: Block) {
        self.inner.put(hash, block);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockHeader, Transaction, TxInput, TxOutput};

    fn dummy_block(index: u64) -> Block {
        let coinbase = Transaction {
            inputs: vec![TxInput::coinbase()],
            outputs: vec![TxOutput { value: 50, pubkey_hash: vec![index as u8] }],
            metadata: None,
            lock_height: 0,
        };
        Block {
            header: BlockHeader {
                index,
                timestamp: 0,
                prev_hash: crate::BlockHash::ZERO,
                merkle_root: Block::calc_merkle_root(&[coinbase.clone()]),
                nonce: 0,
                difficulty: 0,
            },
            transactions: vec![coinbase],
        }
    }

    #[test]
    fn hit_avoids_recompute() {
        let mut cache = BlockCache::new(2);
        let b = dummy_block(1);
        let hash = b.hash();
        cache.put(hash, b.clone());
        assert!(cache.contains(&hash));
        assert_eq!(cache.get(&hash).unwrap().header.index, 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = BlockCache::new(2);
        let a = dummy_block(1);
        let b = dummy_block(2);
        let c = dummy_block(3);
        cache.put(a.hash(), a.clone());
        cache.put(b.hash(), b.clone());
        // touch `a` so `b` becomes least-recently-used
        cache.get(&a.hash());
        cache.put(c.hash(), c.clone());
        assert!(cache.contains(&a.hash()));
        assert!(!cache.contains(&b.hash()));
        assert!(cache.contains(&c.hash()));
    }
}
