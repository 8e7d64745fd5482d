//! Error types for the **Obscura** core crate.
//!
//! All high-level operations return [`crate::Result`], a convenient alias
//! for `core::result::Result<T, Error>`.
//!
//! Validation failures, storage failures, and the consensus-level error
//! kinds of the chain state engine all share one enum: lower-level errors
//! (`sled`, `bincode`) are mapped in via `#[from]` rather than kept as
//! distinct error types, so callers only ever match on one type.
//!
//! # Examples
//!
//! ```
//! use obscura_core::{Error, Result};
//!
//! fn demo_fn(fail: bool) -> Result<()> {
//!     if fail {
//!         Err(Error::DifficultyFail)
//!     } else {
//!         Ok(())
//!     }
//! }
//! ```

use thiserror::Error;

use crate::BlockHash;

/// Core crate error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Signature could not be verified against the provided public key.
    #[error("signature verification failed")]
    BadSignature,

    /// Referenced UTXO is absent from the current ledger state.
    #[error("referenced UTXO not found")]
    MissingUtxo,

    /// Attempted to spend the same output more than once in a single block.
    #[error("double spend attempted")]
    DoubleSpend,

    /// Sum of transaction outputs exceeds sum of inputs.
    #[error("value outputs exceed inputs")]
    ValueOverflow,

    /// `prev_hash` field does not match tip hash.
    #[error("block previous hash mismatch")]
    PrevHashMismatch,

    /// Block height is not exactly one greater than current height.
    #[error("block height non-sequential")]
    NonSequentialHeight,

    /// Block header hash does not satisfy the difficulty target.
    #[error("difficulty target not met")]
    DifficultyFail,

    /// The store's persisted `msg_start` tag differs from the configured
    /// network magic. Fatal at open — data corruption or wrong network.
    #[error("network magic mismatch: database was initialized for a different network")]
    NetworkMismatch,

    /// A block failed header-level structural validity (merkle root,
    /// coinbase-first, or PoW target).
    #[error("invalid block {0}")]
    InvalidBlock(BlockHash),

    /// The connectivity check failed: a double-spend within the block, a
    /// reference to an already-spent output, or an out-of-range/missing
    /// outpoint.
    #[error("unconnectable block {0}")]
    UnconnectableBlock(BlockHash),

    /// At least one input failed signature verification.
    #[error("signature failure in block {0}")]
    SignatureFailure(BlockHash),

    /// A transaction input references a funding transaction that could not
    /// be found in the tx index, the containing block, or the mempool.
    #[error("missing dependency transaction")]
    MissingDependency,

    /// The block was buffered as an orphan pending its parent; not an
    /// error from the caller's perspective, but distinct from success.
    #[error("orphan block {0} accepted, pending parent")]
    OrphanAccepted(BlockHash),

    /// The reorg walk reached the null hash before finding a common
    /// ancestor. The tip is left unchanged.
    #[error("reorganize failed: no common ancestor found")]
    ReorgFailed,

    /// `tx_idx` pointed at a block that does not actually contain the
    /// expected transaction.
    #[error("storage corruption: tx {0} missing from indexed block {1}")]
    StorageCorruption(crate::TxId, BlockHash),

    /// The block in question, or its parent, is already present.
    #[error("duplicate block {0}")]
    DuplicateBlock(BlockHash),

    /// Attempted a mutating operation against a store opened read-only.
    #[error("store is opened read-only")]
    ReadOnly,

    /// Underlying persistent store failure.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Block or transaction (de)serialization failure.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// A malformed textual KV value (blkmeta/height/tx encodings).
    #[error("malformed stored value: {0}")]
    MalformedValue(String),

    /// Placeholder for errors originating from external crates or call
    /// sites with no dedicated variant.
    #[error("{0}")]
    Other(&'static str),
}

/// Convenient result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
