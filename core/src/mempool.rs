//! Mempool contract and a small in-memory reference
//! implementation used by this crate's own tests.
//!
//! The chain manager is handed a `&mut dyn MempoolLike` and only ever
//! touches it through this trait — the real mempool container (with
//! relay policy, eviction, fee estimation) lives outside this crate.

use std::collections::HashMap;

use crate::{Transaction, TxId};

/// External mempool contract the chain manager consumes.
pub trait MempoolLike {
    /// Returns a clone of the pooled transaction with id `tx_id`, if any.
    fn get(&self, tx_id: TxId) -> Option<Transaction>;

    /// Iterates all pooled transactions. Order is unspecified but stable
    /// for the duration of a single call.
    fn transactions(&self) -> Vec<Transaction>;

    /// Removes `tx_id`, returning `true` iff it was present.
    fn remove(&mut self, tx_id: TxId) -> bool;

    /// Idempotent insertion: re-adding an already-pooled transaction is a
    /// no-op.
    fn add(&mut self, tx: Transaction);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reference in-memory mempool, keyed by transaction id.
#[derive(Debug, Default)]
pub struct InMemoryMempool {
    pool: HashMap<TxId, Transaction>,
}

impl InMemoryMempool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MempoolLike for InMemoryMempool {
    fn get(&self, tx_id: TxId) -> Option<Transaction> {
        self.pool.get(&tx_id).cloned()
    }

    fn transactions(&self) -> Vec<Transaction> {
        self.pool.values().cloned().collect()
    }

    fn remove(&mut self, tx_id: TxId) -> bool {
        self.pool.remove(&tx_id).is_some()
    }

    fn add(&mut self, tx: Transaction) {
        self.pool.entry(tx.hash()).or_insert(tx);
    }

    fn len(&self) -> usize {
        self.pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TxInput, TxOutput};

    fn tx(tag: u8) -> Transaction {
        Transaction {
            inputs: vec![TxInput { prev_tx: TxId([tag; 32]), output_index: 0, pubkey: vec![], signature: vec![] }],
            outputs: vec![TxOutput { value: 1, pubkey_hash: vec![] }],
            metadata: None,
            lock_height: 0,
        }
    }

    #[test]
    fn add_then_remove_round_trips() {
        let mut pool = InMemoryMempool::new();
        let t = tx(1);
        let id = t.hash();
        pool.add(t.clone());
        assert_eq!(pool.len(), 1);
        assert!(pool.get(id).is_some());
        assert!(pool.remove(id));
        assert!(pool.is_empty());
        assert!(!pool.remove(id));
    }

    #[test]
    fn add_is_idempotent() {
        let mut pool = InMemoryMempool::new();
        let t = tx(2);
        pool.add(t.clone());
        pool.add(t);
        assert_eq!(pool.len(), 1);
    }
}
