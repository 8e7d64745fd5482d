//! KV store façade: five logically independent keyed byte-string maps
//! (`misc`, `blocks`, `blkmeta`, `height`, `tx`), opened jointly from one
//! data directory.
//!
//! A single [`sled::Db`] is opened at [`Config::datadir`], with each
//! logical store realized as a named [`sled::Tree`] — `"misc.dat"`,
//! `"blocks.dat"`, `"blkmeta.dat"`, `"height.dat"`, `"tx.dat"` — preserving
//! the five-store shape and on-disk names of the persistent format while adopting
//! sled's directory-per-database layout in place of gdbm's
//! file-per-store layout (see DESIGN.md).
//!
//! On first-time creation (an empty `misc` tree), the façade writes the
//! bootstrap values described below. Reopening a store whose
//! persisted `msg_start` differs from [`Config::msg_start`] fails with
//! [`Error::NetworkMismatch`].

use std::path::Path;

use tracing::info;

use crate::{config::Config, BlockHash, Error, Result};

const KEY_HEIGHT: &[u8] = b"height";
const KEY_MSG_START: &[u8] = b"msg_start";
const KEY_TOPHASH: &[u8] = b"tophash";
const KEY_TOTAL_WORK: &[u8] = b"total_work";

/// A single named map within the façade, with `get`/`put`/`delete`/
/// `contains_key`/`sync` semantics over raw byte strings.
#[derive(Clone)]
pub struct Store {
    tree: sled::Tree,
    readonly: bool,
}

impl Store {
    fn new(tree: sled::Tree, readonly: bool) -> Self {
        Self { tree, readonly }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.readonly {
            return Err(Error::ReadOnly);
        }
        self.tree.insert(key, value)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if self.readonly {
            return Err(Error::ReadOnly);
        }
        self.tree.remove(key)?;
        Ok(())
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.tree.contains_key(key)?)
    }

    pub fn sync(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Iterates all `(key, value)` pairs. Used by tests asserting
    /// byte-for-byte round trips across connect/disconnect.
    pub fn iter_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

/// Owns the joint `sled::Db` and the five named trees the chain state
/// engine reads and writes.
pub struct KvStores {
    db: sled::Db,
    pub misc: Store,
    pub blocks: Store,
    pub blkmeta: Store,
    pub height: Store,
    pub tx: Store,
    readonly: bool,
}

impl KvStores {
    /// Opens (or creates) the five stores under `datadir`. Initializes
    /// `misc` on first use; fails with [`Error::NetworkMismatch`] if an
    /// existing `misc_start` disagrees with `config.msg_start`.
    pub fn open(datadir: &Path, config: &Config) -> Result<Self> {
        std::fs::create_dir_all(datadir).map_err(|_| Error::Other("failed to create data directory"))?;
        let db = sled::open(datadir)?;

        let readonly = config.readonly;
        let misc = Store::new(db.open_tree("misc.dat")?, readonly);
        let blocks = Store::new(db.open_tree("blocks.dat")?, readonly);
        let blkmeta = Store::new(db.open_tree("blkmeta.dat")?, readonly);
        let height = Store::new(db.open_tree("height.dat")?, readonly);
        let tx = Store::new(db.open_tree("tx.dat")?, readonly);

        let stores = Self { db, misc, blocks, blkmeta, height, tx, readonly };

        if !stores.misc.contains_key(KEY_HEIGHT)? {
            if readonly {
                return Err(Error::ReadOnly);
            }
            info!("initializing empty blockchain database");
            stores.misc.put(KEY_HEIGHT, b"-1")?;
            stores.misc.put(KEY_MSG_START, &config.msg_start)?;
            stores.misc.put(KEY_TOPHASH, &crate::pow::ser_uint256(&[0u8; 32]))?;
            stores.misc.put(KEY_TOTAL_WORK, b"0x0")?;
        }

        let stored_magic = stores
            .misc
            .get(KEY_MSG_START)?
            .ok_or(Error::MalformedValue("misc.msg_start missing".into()))?;
        if stored_magic != config.msg_start {
            return Err(Error::NetworkMismatch);
        }

        Ok(stores)
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn height(&self) -> Result<i64> {
        let raw = self
            .misc
            .get(KEY_HEIGHT)?
            .ok_or(Error::MalformedValue("misc.height missing".into()))?;
        let s = String::from_utf8(raw).map_err(|_| Error::MalformedValue("misc.height not utf8".into()))?;
        s.parse::<i64>().map_err(|_| Error::MalformedValue(format!("misc.height {:?} not an integer", s)))
    }

    pub fn top_hash(&self) -> Result<BlockHash> {
        let raw = self
            .misc
            .get(KEY_TOPHASH)?
            .ok_or(Error::MalformedValue("misc.tophash missing".into()))?;
        if raw.len() != 32 {
            return Err(Error::MalformedValue("misc.tophash wrong length".into()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&raw);
        Ok(BlockHash(crate::pow::deser_uint256(&arr)))
    }

    pub fn total_work(&self) -> Result<num_bigint::BigUint> {
        let raw = self
            .misc
            .get(KEY_TOTAL_WORK)?
            .ok_or(Error::MalformedValue("misc.total_work missing".into()))?;
        let s = String::from_utf8(raw).map_err(|_| Error::MalformedValue("misc.total_work not utf8".into()))?;
        crate::pow::biguint_from_hex(&s)
    }

    pub fn set_tip(&self, height: i64, hash: BlockHash, work: &num_bigint::BigUint) -> Result<()> {
        self.misc.put(KEY_HEIGHT, height.to_string().as_bytes())?;
        self.misc.put(KEY_TOPHASH, &crate::pow::ser_uint256(&hash.0))?;
        self.misc.put(KEY_TOTAL_WORK, crate::pow::hex_biguint(work).as_bytes())?;
        Ok(())
    }

    /// Flushes all five stores. Called periodically during bulk import.
    pub fn sync_all(&self) -> Result<()> {
        self.misc.sync()?;
        self.blocks.sync()?;
        self.blkmeta.sync()?;
        self.height.sync()?;
        self.tx.sync()?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn fresh_open_initializes_empty_chain() {
        let dir = tempdir().unwrap();
        let cfg = Config::default();
        let stores = KvStores::open(dir.path(), &cfg).unwrap();
        assert_eq!(stores.height().unwrap(), -1);
        assert!(stores.top_hash().unwrap().is_zero());
        assert_eq!(stores.total_work().unwrap(), num_bigint::BigUint::from(0u32));
    }

    #[test]
    fn reopen_with_different_magic_fails() {
        let dir = tempdir().unwrap();
        let cfg = Config::default();
        {
            let _stores = KvStores::open(dir.path(), &cfg).unwrap();
        }
        let mut other = cfg.clone();
        other.msg_start = *b"XXXX";
        let err = KvStores::open(dir.path(), &other).unwrap_err();
        assert!(matches!(err, Error::NetworkMismatch));
    }

    #[test]
    fn set_tip_round_trips() {
        let dir = tempdir().unwrap();
        let cfg = Config::default();
        let stores = KvStores::open(dir.path(), &cfg).unwrap();
        let hash = BlockHash([7u8; 32]);
        let work = num_bigint::BigUint::from(256u32);
        stores.set_tip(1, hash, &work).unwrap();
        assert_eq!(stores.height().unwrap(), 1);
        assert_eq!(stores.top_hash().unwrap(), hash);
        assert_eq!(stores.total_work().unwrap(), work);
    }
}
