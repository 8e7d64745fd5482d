//! Chain manager: ingestion, orphan buffering, fork choice, reorganization,
//! and new-block assembly. This is the orchestration layer
//! sitting atop the KV façade, block cache, tx index, chain metadata, and
//! validator.
//!
//! A [`ChainManager`] exclusively owns the five durable stores and the
//! block cache. The mempool is *not* owned here — every mutating entry
//! point takes it as `&mut dyn MempoolLike`, reflecting that it is shared
//! with the embedding program.

use std::collections::HashMap;

use ed25519_dalek::{PublicKey, Signature, Verifier};
use tracing::{info, warn};

use crate::{
    cache::BlockCache,
    chain_meta::{BlkMeta, ChainMeta},
    config::Config,
    kv::{KvStores, Store},
    mempool::MempoolLike,
    pow,
    tx_index::{BlockSource, TxIdx, TxIndex},
    validation::{self, SignatureVerifier},
    Block, BlockHash, Error, Result, Transaction, TxInput, TxOutput,
};

/// Ports a transaction's signature check to Ed25519: the spending input's
/// embedded public key must hash to the funding output's `pubkey_hash`,
/// and the signature must verify over the spending transaction with all
/// input signatures blanked out.
pub struct Ed25519Verifier;

/// The message an input's signature is computed over: `tx` with every
/// input signature blanked out. Exposed so external signers (e.g. a
/// wallet) can produce signatures [`Ed25519Verifier`] will accept.
pub fn signing_message(tx: &Transaction) -> Vec<u8> {
    let mut blanked = tx.clone();
    for input in &mut blanked.inputs {
        input.signature.clear();
    }
    bincode::serialize(&blanked).expect("tx serialize")
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify_signature(&self, funding_tx: &Transaction, spending_tx: &Transaction, input_index: usize) -> bool {
        let input = match spending_tx.inputs.get(input_index) {
            Some(i) => i,
            None => return false,
        };
        let output = match funding_tx.outputs.get(input.output_index as usize) {
            Some(o) => o,
            None => return false,
        };

        use blake2::Digest;
        let digest = blake2::Blake2b512::digest(&input.pubkey);
        if digest[..32] != output.pubkey_hash[..] {
            return false;
        }

        let public_key = match PublicKey::from_bytes(&input.pubkey) {
            Ok(k) => k,
            Err(_) => return false,
        };
        let signature = match Signature::from_bytes(&input.signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        public_key.verify(&signing_message(spending_tx), &signature).is_ok()
    }
}

/// A candidate transaction for block assembly, carrying the derived
/// ranking fields block assembly computes.
#[derive(Debug, Clone)]
struct Candidate {
    tx: Transaction,
    fees: u64,
    size: usize,
    priority: f64,
    fee_per_kb: f64,
}

/// Borrows the cache and blocks store disjointly from the rest of a
/// [`ChainManager`], letting [`TxIndex::get_tx`] run without needing a
/// `&mut` borrow of the whole manager.
struct Loader<'a> {
    cache: &'a mut BlockCache,
    blocks: &'a Store,
}

impl<'a> BlockSource for Loader<'a> {
    fn load_block(&mut self, hash: &BlockHash) -> Result<Option<Block>> {
        if let Some(b) = self.cache.get(hash) {
            return Ok(Some(b.clone()));
        }
        match self.blocks.get(&pow::ser_uint256(&hash.0))? {
            None => Ok(None),
            Some(raw) => {
                let block: Block = bincode::deserialize(&raw)?;
                self.cache.put(*hash, block.clone());
                Ok(Some(block))
            },
        }
    }
}

pub struct ChainManager {
    kv: KvStores,
    chain_meta: ChainMeta,
    tx_index: TxIndex,
    cache: BlockCache,
    config: Config,
    verifier: Box<dyn SignatureVerifier>,
    /// `child_hash -> missing_parent_hash`, purely for `put_block`'s
    /// duplicate-submission check.
    orphans: HashMap<BlockHash, BlockHash>,
    /// `missing_parent_hash -> child_block`. At most one orphan
    /// per missing parent; a second orphan on the same parent silently
    /// replaces the first.
    orphan_deps: HashMap<BlockHash, Block>,
}

impl ChainManager {
    /// Opens the five durable stores under `config.datadir` and builds a
    /// manager ready to ingest blocks.
    pub fn open(config: Config, verifier: Box<dyn SignatureVerifier>) -> Result<Self> {
        let kv = KvStores::open(&config.datadir, &config)?;
        let chain_meta = ChainMeta::new(kv.blkmeta.clone(), kv.height.clone());
        let tx_index = TxIndex::with_max_output_index(kv.tx.clone(), config.max_output_index);
        let cache = BlockCache::new(config.block_cache_capacity);
        Ok(Self {
            kv,
            chain_meta,
            tx_index,
            cache,
            config,
            verifier,
            orphans: HashMap::new(),
            orphan_deps: HashMap::new(),
        })
    }

    pub fn height(&self) -> Result<i64> {
        self.kv.height()
    }

    pub fn top_hash(&self) -> Result<BlockHash> {
        self.kv.top_hash()
    }

    pub fn chain_meta(&self) -> &ChainMeta {
        &self.chain_meta
    }

    pub fn tx_index(&self) -> &TxIndex {
        &self.tx_index
    }

    pub fn flush_all(&self) -> Result<()> {
        self.kv.sync_all()
    }

    /// Loads a block by hash, consulting the cache first and falling back
    /// to the `blocks` store, caching the result either way.
    pub fn load_block(&mut self, hash: &BlockHash) -> Result<Option<Block>> {
        Loader { cache: &mut self.cache, blocks: &self.kv.blocks }.load_block(hash)
    }

    fn have_block(&self, hash: &BlockHash) -> Result<bool> {
        Ok(self.cache.contains(hash) || self.orphans.contains_key(hash) || self.kv.blocks.contains_key(&pow::ser_uint256(&hash.0))?)
    }

    /// Ingests `block`. Rejects exact duplicates; on
    /// success, drains any orphans whose parent this block turns out to
    /// be, recursively. A block accepted into the orphan set is reported
    /// as `Ok(())`, not an error.
    pub fn put_block(&mut self, block: Block, mempool: &mut dyn MempoolLike) -> Result<()> {
        let hash = block.hash();
        if self.have_block(&hash)? {
            return Err(Error::DuplicateBlock(hash));
        }

        match self.put_one_block(block, mempool) {
            Ok(()) => {
                self.drain_orphans(hash, mempool);
                Ok(())
            },
            Err(Error::OrphanAccepted(h)) => {
                info!(block = %h, "orphan block accepted, pending parent");
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    fn drain_orphans(&mut self, mut connected_hash: BlockHash, mempool: &mut dyn MempoolLike) {
        while let Some(child) = self.orphan_deps.remove(&connected_hash) {
            let child_hash = child.hash();
            self.orphans.remove(&child_hash);
            match self.put_one_block(child, mempool) {
                Ok(()) => connected_hash = child_hash,
                Err(e) => {
                    warn!(error = %e, block = %child_hash, "halting orphan drain after failure");
                    break;
                },
            }
        }
    }

    /// Single-block ingest.
    fn put_one_block(&mut self, block: Block, mempool: &mut dyn MempoolLike) -> Result<()> {
        let hash = block.hash();
        if !block.is_structurally_valid() {
            return Err(Error::InvalidBlock(hash));
        }

        let prev_hash = block.header.prev_hash;
        let chain_height = self.kv.height()?;
        let is_genesis = chain_height < 0 && hash == self.config.genesis_hash;
        let parent_present = self.kv.blocks.contains_key(&pow::ser_uint256(&prev_hash.0))?;

        if !is_genesis && !parent_present {
            self.orphans.insert(hash, prev_hash);
            self.orphan_deps.insert(prev_hash, block);
            return Err(Error::OrphanAccepted(hash));
        }

        let parent_meta = if is_genesis { BlkMeta::zero() } else {
            self.chain_meta.get_block_meta(prev_hash)?.ok_or(Error::MissingDependency)?
        };

        let encoded = bincode::serialize(&block)?;
        self.kv.blocks.put(&pow::ser_uint256(&hash.0), &encoded)?;

        let work = pow::work_from_bits(block.header.difficulty);
        let new_meta = BlkMeta { height: parent_meta.height + 1, cumulative_work: &parent_meta.cumulative_work + &work };
        self.chain_meta.put_block_meta(hash, &new_meta)?;
        self.chain_meta.append_height(new_meta.height, hash)?;
        self.cache.put(hash, block.clone());

        let current_total_work = self.kv.total_work()?;
        if new_meta.cumulative_work <= current_total_work {
            info!(block = %hash, height = new_meta.height, "block stored, not best chain");
            return Ok(());
        }

        self.set_best_chain(hash, &block, &new_meta, mempool)?;

        if self.config.fast_dbm && new_meta.height >= 0 && (new_meta.height as u64) % self.config.flush_interval == 0 {
            self.kv.sync_all()?;
        }

        Ok(())
    }

    /// Simple extension vs. reorganization.
    fn set_best_chain(
        &mut self,
        hash: BlockHash,
        block: &Block,
        meta: &BlkMeta,
        mempool: &mut dyn MempoolLike,
    ) -> Result<()> {
        let current_top = self.kv.top_hash()?;
        if meta.height == 0 || current_top == block.header.prev_hash {
            self.connect_block(hash, block, meta, mempool)
        } else {
            self.reorganize(hash, mempool)
        }
    }

    /// Connects a block onto the current tip, marking its outpoints spent.
    fn connect_block(
        &mut self,
        hash: BlockHash,
        block: &Block,
        meta: &BlkMeta,
        mempool: &mut dyn MempoolLike,
    ) -> Result<()> {
        let outpts = validation::spent_outpts(block, &self.tx_index, self.config.max_output_index)?;

        for tx in block.transactions.iter().skip(1) {
            let mut loader = Loader { cache: &mut self.cache, blocks: &self.kv.blocks };
            validation::tx_signed(tx, &self.tx_index, Some(block), None, false, &mut loader, self.verifier.as_ref())
                .map_err(|e| match e {
                    Error::BadSignature => Error::SignatureFailure(hash),
                    other => other,
                })?;
        }

        self.kv.set_tip(meta.height, hash, &meta.cumulative_work)?;

        let mut never_seen = 0usize;
        for tx in &block.transactions {
            let tx_id = tx.hash();
            if !mempool.remove(tx_id) {
                never_seen += 1;
            }
            self.tx_index.put_tx_idx(tx_id, &TxIdx::new(hash))?;
        }
        info!(block = %hash, height = meta.height, never_seen, "connected block");

        for (funding_id, n) in outpts {
            self.tx_index.spend_txout(funding_id, n)?;
        }

        Ok(())
    }

    /// Disconnects the current tip, returning the chain to its parent.
    fn disconnect_block(&mut self, hash: BlockHash, block: &Block, mempool: &mut dyn MempoolLike) -> Result<()> {
        let prev_hash = block.header.prev_hash;
        let parent_meta = self.chain_meta.get_block_meta(prev_hash)?.ok_or(Error::MissingDependency)?;

        for (funding_id, n) in validation::recompute_outpts(block) {
            self.tx_index.clear_txout(funding_id, n)?;
        }

        for tx in &block.transactions {
            let tx_id = tx.hash();
            self.tx_index.delete_tx_idx(tx_id)?;
            if !tx.is_coinbase() {
                mempool.add(tx.clone());
            }
        }

        self.kv.set_tip(parent_meta.height, prev_hash, &parent_meta.cumulative_work)?;
        info!(block = %hash, height = parent_meta.height, "disconnected block");
        Ok(())
    }

    /// Walks the higher side down until a common ancestor is
    /// found, then disconnects the old branch tip-first and connects the
    /// new branch ancestor-first.
    ///
    /// The source replays `conn` in the order the backward walk built it
    /// (new tip first), which would leave `misc.tophash` pointing at the
    /// fork's immediate child rather than the actual new tip — violating
    /// the invariant that `tophash` always names the maximum-work block.
    /// This replays `conn` in the reverse (ancestor-first) order instead;
    /// see DESIGN.md.
    fn reorganize(&mut self, new_tip: BlockHash, mempool: &mut dyn MempoolLike) -> Result<()> {
        let old_tip = self.kv.top_hash()?;

        let mut fork = old_tip;
        let mut longer = new_tip;
        let mut conn: Vec<(BlockHash, Block)> = Vec::new();
        let mut disconn: Vec<(BlockHash, Block)> = Vec::new();

        while fork != longer {
            loop {
                let longer_height = self.chain_meta.get_block_height(longer)?;
                let fork_height = self.chain_meta.get_block_height(fork)?;
                if longer_height <= fork_height {
                    break;
                }
                let block = self.load_block(&longer)?.ok_or(Error::ReorgFailed)?;
                let prev = block.header.prev_hash;
                conn.push((longer, block));
                longer = prev;
            }
            if fork == longer {
                break;
            }
            let block = self.load_block(&fork)?.ok_or(Error::ReorgFailed)?;
            let prev = block.header.prev_hash;
            disconn.push((fork, block));
            fork = prev;
        }

        info!(
            old_tip = %old_tip,
            new_tip = %new_tip,
            ancestor = %fork,
            disconnecting = disconn.len(),
            connecting = conn.len(),
            "reorganizing"
        );

        for (hash, block) in &disconn {
            self.disconnect_block(*hash, block, mempool)?;
        }
        for (hash, block) in conn.into_iter().rev() {
            let meta = self.chain_meta.get_block_meta(hash)?.ok_or(Error::MissingDependency)?;
            self.connect_block(hash, &block, &meta, mempool)?;
        }

        Ok(())
    }

    /// Resolves a mempool transaction's ranking fields; `None`
    /// if any input's funding output cannot be resolved.
    fn rank_candidate(&mut self, tx: Transaction) -> Result<Option<Candidate>> {
        let mut value_in: u64 = 0;
        let mut priority_num: f64 = 0.0;
        for input in &tx.inputs {
            let mut loader = Loader { cache: &mut self.cache, blocks: &self.kv.blocks };
            let funding = match self.tx_index.get_tx(input.prev_tx, &mut loader)? {
                Some(tx) => tx,
                None => return Ok(None),
            };
            let output = match funding.outputs.get(input.output_index as usize) {
                Some(o) => o,
                None => return Ok(None),
            };
            value_in += output.value;
            priority_num += output.value as f64;
        }

        let value_out: u64 = tx.outputs.iter().map(|o| o.value).sum();
        if value_in < value_out {
            return Ok(None);
        }
        let fees = value_in - value_out;
        let size = tx.serialized_size();
        let priority = priority_num / size as f64;
        let mut fee_per_kb = fees as f64 / (size as f64 / 1000.0);
        if fee_per_kb < self.config.min_relay_fee_per_kb as f64 {
            fee_per_kb = 0.0;
        }
        Ok(Some(Candidate { tx, fees, size, priority, fee_per_kb }))
    }

    /// Candidate selection and ordering for block assembly.
    fn new_block_txs(&mut self, mempool: &dyn MempoolLike, next_height: u64) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        for tx in mempool.transactions() {
            if tx.is_coinbase() || !tx.is_final(next_height) {
                continue;
            }
            if let Some(c) = self.rank_candidate(tx)? {
                candidates.push(c);
            }
        }

        candidates.sort_by(|a, b| {
            b.fee_per_kb
                .partial_cmp(&a.fee_per_kb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal))
        });

        let mut packed = Vec::new();
        let mut total_bytes = 0usize;
        let mut free_bytes = self.config.free_tx_bytes_budget;
        for c in candidates {
            if total_bytes + c.size > self.config.max_block_size {
                continue;
            }
            if c.fee_per_kb > 0.0 {
                total_bytes += c.size;
                packed.push(c);
            } else if free_bytes >= c.size {
                total_bytes += c.size;
                free_bytes -= c.size;
                packed.push(c);
            }
        }
        Ok(packed)
    }

    /// Assembles a candidate next block atop the current tip.
    pub fn new_block(&mut self, mempool: &dyn MempoolLike) -> Result<Block> {
        let tophash = self.kv.top_hash()?;
        let prev_block = self.load_block(&tophash)?.ok_or(Error::MissingDependency)?;
        let next_height = (self.kv.height()? + 1) as u64;

        let candidates = self.new_block_txs(mempool, next_height)?;
        let total_fees: u64 = candidates.iter().map(|c| c.fees).sum();
        let subsidy = self.config.subsidy(next_height);

        let coinbase = Transaction {
            inputs: vec![TxInput::coinbase()],
            outputs: vec![TxOutput { value: subsidy + total_fees, pubkey_hash: Vec::new() }],
            metadata: None,
            lock_height: 0,
        };

        let mut txs = Vec::with_capacity(candidates.len() + 1);
        txs.push(coinbase);
        txs.extend(candidates.into_iter().map(|c| c.tx));

        Ok(Block::new(next_height, tophash, txs, prev_block.header.difficulty))
    }

    /// Bulk import (`loadfile` format): resynchronizes on the network
    /// magic, parses `<magic><4-byte LE size><block bytes>` records, and
    /// feeds each decoded block to [`ChainManager::put_block`]. Truncated
    /// trailing data is silently ignored. Returns the number of blocks
    /// successfully ingested (directly; orphans and duplicates don't
    /// count).
    pub fn import_file(&mut self, data: &[u8], mempool: &mut dyn MempoolLike) -> Result<usize> {
        let magic = self.config.msg_start;
        let mut pos = 0usize;
        let mut imported = 0usize;

        while pos + 4 <= data.len() {
            if data[pos..pos + 4] != magic {
                pos += 1;
                continue;
            }
            let blk_pos = pos + 8;
            if blk_pos > data.len() {
                break;
            }
            let size = u32::from_le_bytes(data[pos + 4..blk_pos].try_into().expect("4 bytes")) as usize;
            if blk_pos + size > data.len() {
                break;
            }
            let blk_bytes = &data[blk_pos..blk_pos + size];
            pos = blk_pos + size;

            match bincode::deserialize::<Block>(blk_bytes) {
                Ok(block) => {
                    if self.put_block(block, mempool).is_ok() {
                        imported += 1;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "skipping undecodable record during bulk import");
                },
            }
        }

        Ok(imported)
    }
}
