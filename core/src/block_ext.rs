//! Extension methods for [`Block`] that cover structural ("header-level")
//! validity, independent of chain context.
//!
//! * [`Block::is_structurally_valid`] – merkle root and PoW target checks
//!   that don't require knowing the chain tip.
//! * [`Block::is_valid`] – the same, plus linkage against an expected
//!   parent hash.
//! * [`Block::mine`] – naive single-threaded mining loop suitable for tests.

use crate::{pow, Block, BlockHash};

impl Block {
    /// Structural validity: merkle root matches the transaction list and
    /// the header hash meets its own declared difficulty target. Does not
    /// check parent linkage, connectivity, or signatures — see
    /// [`crate::validation`] for those.
    pub fn is_structurally_valid(&self) -> bool {
        !self.transactions.is_empty()
            && self.transactions[0].is_coinbase()
            && Self::calc_merkle_root(&self.transactions) == self.header.merkle_root
            && pow::hash_meets_difficulty(&self.hash().0, self.header.difficulty)
    }

    /// Returns `true` if the block is structurally valid *and* correctly
    /// linked to `expected_prev`, typically the current chain tip hash.
    pub fn is_valid(&self, expected_prev: &BlockHash) -> bool {
        self.header.prev_hash == *expected_prev && self.is_structurally_valid()
    }

    /// Performs a brute-force mining loop. Useful in tests where
    /// deterministic runtime is not critical. Consumes `self` and returns
    /// the mined block to avoid accidental reuse of a partially-modified
    /// instance.
    pub fn mine(mut self) -> Self {
        while !pow::hash_meets_difficulty(&self.hash().0, self.header.difficulty) {
            self.header.nonce = self.header.nonce.wrapping_add(1);
        }
        self
    }
}
