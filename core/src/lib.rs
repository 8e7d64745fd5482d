//! Obscura Core Library
//!
//! Provides fundamental blockchain data structures and the chain state
//! engine: persistent storage, transaction connectivity/signature
//! validation, best-chain selection under competing forks, and block
//! assembly from a mempool.

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};

pub mod block_ext;
pub mod cache;
pub mod chain_manager;
pub mod chain_meta;
pub mod config;
pub mod error;
pub mod kv;
pub mod mempool;
pub mod pow;
pub mod tx_index;
pub mod validation;

use std::time::{SystemTime, UNIX_EPOCH};

pub use error::{Error, Result};

/// Raw 256-bit digest. Both [`BlockHash`] and [`TxId`] are newtypes over
/// this so the two hash spaces cannot be mixed up at the type level, even
/// though they share the same underlying representation.
pub type Hash = [u8; 32];

/// Returns the UNIX timestamp in seconds.
pub(crate) fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs()
}

/// Identifies a [`Block`] by the hash of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(pub Hash);

impl BlockHash {
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", pow::hex_uint256(&self.0))
    }
}

/// Identifies a [`Transaction`] by its content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub Hash);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", pow::hex_uint256(&self.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// A reference to a previous unspent transaction output (UTXO) being spent.
///
/// Fields
/// -------
/// * `prev_tx` - id of the transaction that created the output.
/// * `output_index` - Position of the output inside `prev_tx`'s `outputs` vector.
/// * `pubkey` - Ed25519 public key (raw bytes) that authorises spending.
/// * `signature` - Ed25519 signature over the deterministic transaction message.
pub struct TxInput {
    pub prev_tx: TxId,
    pub output_index: u32,
    pub pubkey: Vec<u8>,
    pub signature: Vec<u8>,
}

impl TxInput {
    /// A null-outpoint input, used by coinbase transactions.
    pub fn coinbase() -> Self {
        Self {
            prev_tx: TxId([0u8; 32]),
            output_index: u32::MAX,
            pubkey: Vec::new(),
            signature: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.prev_tx.0 == [0u8; 32] && self.output_index == u32::MAX
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// A newly created spendable output produced by a transaction.
///
/// Fields
/// -------
/// * `value` – Amount in "Obsc" (smallest currency unit, currently 1 == 1 Obsc)
///   carried by this output.
/// * `pubkey_hash` – Hash of the recipient's public key. When they later spend
///   the output they will reveal the matching public key and a valid
///   signature.
pub struct TxOutput {
    pub value: u64,
    pub pubkey_hash: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Represents a transfer of value.
///
/// A transaction destroys the UTXOs referenced by all [`TxInput`]s and creates
/// a new set of [`TxOutput`]s. Connectivity (every input refers to an unspent
/// output) and authorization (every input's signature verifies) are enforced
/// by [`validation`], not by this type.
///
/// Coinbase (block-reward) transactions are special: they carry a single
/// null-outpoint input ([`TxInput::coinbase`]) and mint new coins up to the
/// consensus-defined reward schedule.
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub metadata: Option<Vec<u8>>, // Optional extra data
    /// Transactions are not final before this height; block assembly (and
    /// consensus more broadly) skips non-final transactions.
    pub lock_height: u64,
}

impl Transaction {
    pub fn hash(&self) -> TxId {
        let encoded = bincode::serialize(self).expect("tx serialize");
        let digest = Blake2b512::digest(&encoded);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest[..32]);
        TxId(hash)
    }

    /// A transaction is a coinbase iff it has exactly one, null, input.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_null()
    }

    /// A transaction is final at `height` if it is not subject to a future
    /// lock-height restriction.
    pub fn is_final(&self, height: u64) -> bool {
        self.lock_height == 0 || self.lock_height <= height
    }

    /// Serialized size in bytes, used for fee-rate and block-packing math.
    pub fn serialized_size(&self) -> usize {
        bincode::serialize(self).expect("tx serialize").len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Metadata identifying a block.
///
/// The header is the portion hashed to produce the block's identity and
/// proof-of-work input. Changing *any* field results in a completely
/// different hash.
///
/// Fields
/// -------
/// * `index` – An opaque sequence number set by the block's producer. It is
///   **not** authoritative for chain height: the chain manager derives
///   height independently from parent linkage (see
///   [`chain_meta::BlkMeta`]), since competing forks can disagree about
///   `index` but not about the parent-derived height.
/// * `timestamp` – Seconds since Unix epoch.
/// * `prev_hash` – Hash of the previous block's header (all zeros for genesis).
/// * `merkle_root` – Root hash of the merkle tree built from transaction
///   hashes.
/// * `nonce` – Incremented during mining until the header hash satisfies the
///   target difficulty.
/// * `difficulty` – Compact target: the number of leading zero bits `hash()`
///   must have. Doubles as the "compact-target field" from which per-block
///   work is derived (see [`pow::work_from_bits`]).
pub struct BlockHeader {
    pub index: u64,
    pub timestamp: u64,
    pub prev_hash: BlockHash,
    pub merkle_root: Hash,
    pub nonce: u64,
    pub difficulty: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// A container for an ordered set of transactions plus a header linking it
/// into the blockchain.
///
/// The first transaction *must* be the coinbase rewarding the miner. All
/// subsequent transactions must be connectable against the tx index's UTXO
/// bookkeeping before the block can be connected to the best chain.
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Constructs a new block with a freshly calculated merkle root and the
    /// current wall-clock timestamp. The `nonce` starts at 0; callers should
    /// invoke [`Block::mine`] to find a valid nonce.
    pub fn new(index: u64, prev_hash: BlockHash, transactions: Vec<Transaction>, difficulty: u32) -> Self {
        let merkle_root = Self::calc_merkle_root(&transactions);
        Self {
            header: BlockHeader {
                index,
                timestamp: now_ts(),
                prev_hash,
                merkle_root,
                nonce: 0,
                difficulty,
            },
            transactions,
        }
    }

    /// Computes the Merkle root of `txs`.
    ///
    /// NOTE: this is a concatenation hash rather than a binary Merkle tree
    /// with duplicate handling; SPV proofs are not a goal of this crate.
    pub fn calc_merkle_root(txs: &[Transaction]) -> Hash {
        let mut hasher = Blake2b512::new();
        for tx in txs {
            hasher.update(tx.hash().0);
        }
        let result = hasher.finalize();
        let mut root = [0u8; 32];
        root.copy_from_slice(&result[..32]);
        root
    }

    /// Returns the Blake2b-256 hash of the block header.
    ///
    /// This hash functions as both the block identifier and the proof-of-work
    /// input.
    pub fn hash(&self) -> BlockHash {
        let encoded = bincode::serialize(&self.header).expect("header serialize");
        let digest = Blake2b512::digest(&encoded);
        let mut h = [0u8; 32];
        h.copy_from_slice(&digest[..32]);
        BlockHash(h)
    }

    pub fn serialized_size(&self) -> usize {
        bincode::serialize(self).expect("block serialize").len()
    }
}
