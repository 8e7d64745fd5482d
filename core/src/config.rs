//! Consensus and runtime configuration for **Obscura** core.
//!
//! The [`Config`] struct centralises every tunable the chain state engine
//! needs: where its five KV stores live, the network magic they must
//! agree on, the genesis block identity, the mining/relay-fee constants
//! used by block assembly, and the bounds the connectivity check and
//! block cache hard-code as magic numbers. It is constructed via the
//! [`ConfigBuilder`] fluent builder, so callers customise only the fields
//! they care about while keeping sensible defaults.
//!
//! All fields are `pub` so read-only access is ergonomic, however mutation
//! should occur through the builder to preserve validation invariants.
//!
//! ```
//! use obscura_core::config::Config;
//!
//! // default main-net configuration
//! let cfg = Config::default();
//! assert_eq!(cfg.difficulty, 8);
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::BlockHash;

/// Runtime configuration shared across the crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// PoW leading-zero difficulty in bits, used when mining test/demo
    /// blocks. Real difficulty retargeting is out of scope.
    pub difficulty: u32,

    /// Initial block subsidy, in the smallest currency unit. Halves every
    /// `subsidy_halving_interval` blocks (`subsidy(h) = initial_subsidy >>
    /// (h / subsidy_halving_interval)`).
    pub initial_subsidy: u64,

    /// Height interval between subsidy halvings.
    pub subsidy_halving_interval: u64,

    /// Human-readable name identifying the network (e.g. "main", "test").
    pub network: String,

    /// Directory the five KV stores (`misc.dat`, `blocks.dat`,
    /// `blkmeta.dat`, `height.dat`, `tx.dat`) are opened under.
    pub datadir: PathBuf,

    /// 4-byte network magic persisted in `misc.msg_start`. Opening a
    /// store whose persisted tag differs fails with
    /// [`crate::Error::NetworkMismatch`].
    pub msg_start: [u8; 4],

    /// Hash of this network's genesis block, the only block allowed to
    /// have no known parent.
    pub genesis_hash: BlockHash,

    /// Open all five stores read-only; every mutating chain-manager
    /// operation then fails with [`crate::Error::ReadOnly`].
    pub readonly: bool,

    /// Fast bulk-import mode: flushes all stores to disk every
    /// `flush_interval` blocks instead of relying on the OS/store's own
    /// durability schedule.
    pub fast_dbm: bool,

    /// Height interval between store flushes while `fast_dbm` is set.
    pub flush_interval: u64,

    /// Block cache capacity (`BlockHash -> Block` entries).
    pub block_cache_capacity: usize,

    /// Sanity upper bound on an outpoint's output index; outpoints above
    /// this are rejected as unconnectable rather than trusted.
    pub max_output_index: u64,

    /// Minimum fee-per-KB (in the same unit as transaction values) below
    /// which a candidate transaction is treated as free for block
    /// assembly ordering purposes.
    pub min_relay_fee_per_kb: u64,

    /// Maximum serialized size of transactions packed into a new block.
    pub max_block_size: usize,

    /// Byte budget reserved for free (zero fee-per-KB) transactions when
    /// assembling a new block.
    pub free_tx_bytes_budget: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            difficulty: 8,
            initial_subsidy: 50 * 100_000_000,
            subsidy_halving_interval: 210_000,
            network: "main".into(),
            datadir: PathBuf::from("./obscura-data"),
            msg_start: *b"OBSC",
            genesis_hash: BlockHash::ZERO,
            readonly: false,
            fast_dbm: false,
            flush_interval: 10_000,
            block_cache_capacity: 750,
            max_output_index: 100_000,
            min_relay_fee_per_kb: 50_000,
            max_block_size: 900_000,
            free_tx_bytes_budget: 50_000,
        }
    }
}

impl Config {
    /// Subsidy paid to the coinbase at `height`, before fees.
    pub fn subsidy(&self, height: u64) -> u64 {
        let halvings = height / self.subsidy_halving_interval;
        if halvings >= 64 {
            0
        } else {
            self.initial_subsidy >> halvings
        }
    }
}

/// Fluent builder for [`Config`].
pub struct ConfigBuilder {
    inner: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Starts a new builder pre-populated with [`Config::default`].
    pub fn new() -> Self {
        Self { inner: Config::default() }
    }

    pub fn difficulty(mut self, diff: u32) -> Self {
        self.inner.difficulty = diff;
        self
    }

    pub fn initial_subsidy(mut self, subsidy: u64) -> Self {
        self.inner.initial_subsidy = subsidy;
        self
    }

    pub fn subsidy_halving_interval(mut self, interval: u64) -> Self {
        self.inner.subsidy_halving_interval = interval;
        self
    }

    pub fn network<S: Into<String>>(mut self, name: S) -> Self {
        self.inner.network = name.into();
        self
    }

    pub fn datadir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.inner.datadir = dir.into();
        self
    }

    pub fn msg_start(mut self, tag: [u8; 4]) -> Self {
        self.inner.msg_start = tag;
        self
    }

    pub fn genesis_hash(mut self, hash: BlockHash) -> Self {
        self.inner.genesis_hash = hash;
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.inner.readonly = readonly;
        self
    }

    pub fn fast_dbm(mut self, fast_dbm: bool) -> Self {
        self.inner.fast_dbm = fast_dbm;
        self
    }

    pub fn flush_interval(mut self, interval: u64) -> Self {
        self.inner.flush_interval = interval;
        self
    }

    pub fn block_cache_capacity(mut self, capacity: usize) -> Self {
        self.inner.block_cache_capacity = capacity;
        self
    }

    pub fn max_output_index(mut self, max: u64) -> Self {
        self.inner.max_output_index = max;
        self
    }

    pub fn min_relay_fee_per_kb(mut self, fee: u64) -> Self {
        self.inner.min_relay_fee_per_kb = fee;
        self
    }

    pub fn max_block_size(mut self, size: usize) -> Self {
        self.inner.max_block_size = size;
        self
    }

    pub fn free_tx_bytes_budget(mut self, budget: usize) -> Self {
        self.inner.free_tx_bytes_budget = budget;
        self
    }

    /// Consumes the builder returning an immutable configuration value.
    pub fn finish(self) -> Config {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_fields() {
        let cfg = ConfigBuilder::new()
            .difficulty(16)
            .network("test")
            .fast_dbm(true)
            .finish();
        assert_eq!(cfg.difficulty, 16);
        assert_eq!(cfg.network, "test");
        assert!(cfg.fast_dbm);
    }

    #[test]
    fn subsidy_halves_on_schedule() {
        let cfg = Config::default();
        assert_eq!(cfg.subsidy(0), 50 * 100_000_000);
        assert_eq!(cfg.subsidy(209_999), 50 * 100_000_000);
        assert_eq!(cfg.subsidy(210_000), 25 * 100_000_000);
        assert_eq!(cfg.subsidy(420_000), 1_250_000_000);
    }
}
