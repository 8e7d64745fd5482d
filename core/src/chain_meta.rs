//! Chain metadata: per-block `{height, cumulative_work}` and the
//! append-only per-height list of block hashes.
//!
//! Backed by the `blkmeta` and `height` stores. `blkmeta` values are
//! `"{height} 0x{work_hex}"`; `height` values are space-separated
//! `0x`-prefixed hex hashes.

use num_bigint::BigUint;
use num_traits::Zero;

use crate::{kv::Store, pow, BlockHash, Error, Result};

/// Per-block metadata: height and total proof-of-work from genesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlkMeta {
    pub height: i64,
    pub cumulative_work: BigUint,
}

impl BlkMeta {
    /// Synthetic metadata for "the parent of genesis": height -1, no work.
    /// `put_one_block` reads this instead of consulting storage when the
    /// chain is currently empty.
    pub fn zero() -> Self {
        Self { height: -1, cumulative_work: BigUint::zero() }
    }

    fn serialize(&self) -> String {
        format!("{} {}", self.height, pow::hex_biguint(&self.cumulative_work))
    }

    fn deserialize(s: &str) -> Result<Self> {
        let mut parts = s.splitn(2, ' ');
        let height = parts
            .next()
            .ok_or_else(|| Error::MalformedValue(s.to_string()))?
            .parse::<i64>()
            .map_err(|_| Error::MalformedValue(s.to_string()))?;
        let work_hex = parts.next().ok_or_else(|| Error::MalformedValue(s.to_string()))?;
        Ok(Self { height, cumulative_work: pow::biguint_from_hex(work_hex)? })
    }
}

/// The ordered set of block hashes stored at a given height. Append-only:
/// ingesting a new block at a height that already has entries (a fork)
/// grows the list, it never replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeightIdx(pub Vec<BlockHash>);

impl HeightIdx {
    fn serialize(&self) -> String {
        self.0.iter().map(|h| pow::hex_uint256(&h.0)).collect::<Vec<_>>().join(" ")
    }

    fn deserialize(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let hashes = s
            .split_whitespace()
            .map(|h| pow::hash_from_hex(h).map(BlockHash))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(hashes))
    }
}

/// Thin wrapper over the `blkmeta`/`height` stores.
pub struct ChainMeta {
    blkmeta: Store,
    height: Store,
}

impl ChainMeta {
    pub fn new(blkmeta: Store, height: Store) -> Self {
        Self { blkmeta, height }
    }

    pub fn get_block_meta(&self, hash: BlockHash) -> Result<Option<BlkMeta>> {
        match self.blkmeta.get(&pow::ser_uint256(&hash.0))? {
            None => Ok(None),
            Some(raw) => {
                let s = String::from_utf8(raw).map_err(|_| Error::MalformedValue("blkmeta value not utf8".into()))?;
                Ok(Some(BlkMeta::deserialize(&s)?))
            },
        }
    }

    /// Returns `-1` if `hash` has no recorded metadata.
    pub fn get_block_height(&self, hash: BlockHash) -> Result<i64> {
        Ok(self.get_block_meta(hash)?.map(|m| m.height).unwrap_or(-1))
    }

    pub fn put_block_meta(&self, hash: BlockHash, meta: &BlkMeta) -> Result<()> {
        self.blkmeta.put(&pow::ser_uint256(&hash.0), meta.serialize().as_bytes())
    }

    pub fn get_height_idx(&self, height: i64) -> Result<HeightIdx> {
        match self.height.get(height.to_string().as_bytes())? {
            None => Ok(HeightIdx::default()),
            Some(raw) => {
                let s = String::from_utf8(raw).map_err(|_| Error::MalformedValue("height value not utf8".into()))?;
                HeightIdx::deserialize(&s)
            },
        }
    }

    /// Appends `hash` to the list of blocks recorded at `height`. Never
    /// removes or reorders existing entries.
    pub fn append_height(&self, height: i64, hash: BlockHash) -> Result<()> {
        let mut idx = self.get_height_idx(height)?;
        idx.0.push(hash);
        self.height.put(height.to_string().as_bytes(), idx.serialize().as_bytes())
    }
}
