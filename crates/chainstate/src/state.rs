//! Chain state: the UTXO set, block storage and every index derived from the main chain.
//!
//! Blocks are connected and disconnected one at a time at the tip. Each step builds a
//! single [`WriteBatch`] covering the UTXO set, undo data, block index and the optional
//! indexes, and commits it atomically while holding the write lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use cashd_consensus::constants::MEDIAN_TIME_SPAN;
use cashd_consensus::money::money_range;
use cashd_consensus::params::hash256_to_hex;
use cashd_consensus::{ChainParams, Hash256, TipContext};
use cashd_log::Category;
use cashd_primitives::block::Block;
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{Transaction, TxOut};
use cashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::address_index::{AddressBalance, AddressDeltaEntry, AddressId, AddressUnspentEntry};
use crate::block_deltas::BlockDeltas;
use crate::index::{BlockIndexEntry, ChainIndex, ChainTip, STATUS_HAVE_DATA, STATUS_HAVE_UNDO};
use crate::spentindex::SpentIndexValue;
use crate::sync::{IndexConfig, IndexSync};
use crate::txindex::{TxIndex, TxLocation};
use crate::undo::{BlockUndo, SpentOutput};
use crate::utxo::{UtxoEntry, UtxoSet};

const OP_RETURN: u8 = 0x6a;

#[derive(Debug)]
pub enum ChainStateError {
    Store(StoreError),
    MissingInput,
    MissingBlock,
    ValueOutOfRange,
    CorruptIndex(&'static str),
    InvalidBlock(&'static str),
}

impl std::fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainStateError::Store(err) => write!(f, "{err}"),
            ChainStateError::MissingInput => write!(f, "missing input"),
            ChainStateError::MissingBlock => write!(f, "missing block"),
            ChainStateError::ValueOutOfRange => write!(f, "value out of range"),
            ChainStateError::CorruptIndex(message) => write!(f, "{message}"),
            ChainStateError::InvalidBlock(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<StoreError> for ChainStateError {
    fn from(err: StoreError) -> Self {
        ChainStateError::Store(err)
    }
}

/// A confirmed transaction and where it sits in the main chain.
#[derive(Clone, Debug)]
pub struct TxLookup {
    pub tx: Transaction,
    pub block_hash: Hash256,
    pub height: i32,
    pub index: u32,
}

pub struct ChainState<S> {
    store: Arc<S>,
    params: ChainParams,
    index: ChainIndex<Arc<S>>,
    utxos: UtxoSet<Arc<S>>,
    tx_index: TxIndex<Arc<S>>,
    indexes: IndexSync<Arc<S>>,
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> ChainState<S> {
    pub fn new(store: Arc<S>, params: ChainParams, indexes: IndexConfig) -> Self {
        Self {
            index: ChainIndex::new(Arc::clone(&store)),
            utxos: UtxoSet::new(Arc::clone(&store)),
            tx_index: TxIndex::new(Arc::clone(&store)),
            indexes: IndexSync::new(Arc::clone(&store), indexes),
            store,
            params,
            write_lock: Mutex::new(()),
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn index_config(&self) -> IndexConfig {
        self.indexes.config()
    }

    pub fn best_block(&self) -> Result<Option<ChainTip>, ChainStateError> {
        Ok(self.index.best_block()?)
    }

    /// Height and median time past of the tip, the context the next block is checked in.
    pub fn tip_context(&self) -> Result<TipContext, ChainStateError> {
        let Some(tip) = self.index.best_block()? else {
            return Ok(TipContext::EMPTY);
        };
        Ok(TipContext {
            height: tip.height,
            median_time_past: self.index.median_time_past(&tip.hash, MEDIAN_TIME_SPAN)?,
        })
    }

    pub fn median_time_past(&self, hash: &Hash256) -> Result<i64, ChainStateError> {
        Ok(self.index.median_time_past(hash, MEDIAN_TIME_SPAN)?)
    }

    pub fn block_entry(&self, hash: &Hash256) -> Result<Option<BlockIndexEntry>, ChainStateError> {
        Ok(self.index.get(hash)?)
    }

    pub fn hash_at_height(&self, height: i32) -> Result<Option<Hash256>, ChainStateError> {
        Ok(self.index.height_hash(height)?)
    }

    pub fn is_main_chain(&self, hash: &Hash256) -> Result<bool, ChainStateError> {
        let Some(entry) = self.index.get(hash)? else {
            return Ok(false);
        };
        Ok(self.index.height_hash(entry.height)? == Some(*hash))
    }

    pub fn read_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainStateError> {
        let Some(bytes) = self.store.get(Column::Block, hash)? else {
            return Ok(None);
        };
        Block::consensus_decode(&bytes)
            .map(Some)
            .map_err(|_| ChainStateError::CorruptIndex("invalid block bytes"))
    }

    pub fn block_undo(&self, hash: &Hash256) -> Result<Option<BlockUndo>, ChainStateError> {
        let Some(bytes) = self.store.get(Column::BlockUndo, hash)? else {
            return Ok(None);
        };
        BlockUndo::decode(&bytes)
            .map(Some)
            .map_err(|_| ChainStateError::CorruptIndex("invalid block undo bytes"))
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, ChainStateError> {
        Ok(self.utxos.get(outpoint)?)
    }

    pub fn transaction(&self, txid: &Hash256) -> Result<Option<TxLookup>, ChainStateError> {
        let Some(location) = self.tx_index.get(txid)? else {
            return Ok(None);
        };
        let block = self
            .read_block(&location.block_hash)?
            .ok_or(ChainStateError::CorruptIndex("tx index points at missing block"))?;
        let entry = self
            .index
            .get(&location.block_hash)?
            .ok_or(ChainStateError::CorruptIndex("tx index points at unindexed block"))?;
        let tx = block
            .transactions
            .into_iter()
            .nth(location.index as usize)
            .ok_or(ChainStateError::CorruptIndex("tx index position out of range"))?;
        Ok(Some(TxLookup {
            tx,
            block_hash: location.block_hash,
            height: entry.height,
            index: location.index,
        }))
    }

    pub fn lookup_spend(&self, outpoint: &OutPoint) -> Result<Option<SpentIndexValue>, ChainStateError> {
        Ok(self.indexes.spent_index().lookup_spend(outpoint)?)
    }

    pub fn block_deltas(&self, hash: &Hash256) -> Result<Option<BlockDeltas>, ChainStateError> {
        Ok(self.indexes.block_delta_index().get(hash)?)
    }

    pub fn address_deltas(&self, address: &AddressId) -> Result<Vec<AddressDeltaEntry>, ChainStateError> {
        Ok(self.indexes.address_index().address_deltas(address)?)
    }

    pub fn address_utxos(&self, address: &AddressId) -> Result<Vec<AddressUnspentEntry>, ChainStateError> {
        Ok(self.indexes.address_index().address_utxos(address)?)
    }

    pub fn address_balance(&self, address: &AddressId) -> Result<AddressBalance, ChainStateError> {
        Ok(self.indexes.address_index().address_balance(address)?)
    }

    pub fn block_hashes_by_time(&self, high: u32, low: u32) -> Result<Vec<Hash256>, ChainStateError> {
        Ok(self
            .indexes
            .timestamp_index()
            .block_hashes_by_time(high, low)?)
    }

    /// Connects `block` on top of the current tip.
    pub fn connect_block(&self, block: &Block) -> Result<ChainTip, ChainStateError> {
        let _guard = self.lock()?;
        let (batch, tip) = self.connect_batch(block)?;
        self.commit_batch(&batch)?;
        cashd_log::log_debug!(
            "connected block {} at height {} ({} txs)",
            hash256_to_hex(&tip.hash),
            tip.height,
            block.transactions.len()
        );
        Ok(tip)
    }

    fn connect_batch(&self, block: &Block) -> Result<(WriteBatch, ChainTip), ChainStateError> {
        let hash = block.hash();
        let height = match self.index.best_block()? {
            Some(tip) if tip.hash == block.header.prev_block => tip.height + 1,
            None if block.header.prev_block == [0u8; 32] => 0,
            _ => {
                return Err(ChainStateError::InvalidBlock(
                    "block does not extend the best block",
                ))
            }
        };
        let height_u32 = u32::try_from(height).map_err(|_| ChainStateError::ValueOutOfRange)?;

        match block.transactions.split_first() {
            Some((coinbase, rest)) if coinbase.is_coinbase() => {
                if rest.iter().any(Transaction::is_coinbase) {
                    return Err(ChainStateError::InvalidBlock("more than one coinbase"));
                }
            }
            _ => {
                return Err(ChainStateError::InvalidBlock(
                    "first transaction is not a coinbase",
                ))
            }
        }

        let mut batch = WriteBatch::new();
        let mut created: HashMap<OutPoint, UtxoEntry> = HashMap::new();
        let mut spent_in_block: HashSet<OutPoint> = HashSet::new();
        let mut undo = BlockUndo::default();

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let txid = tx.txid();
            let is_coinbase = tx_index == 0;
            let value_out = tx.value_out().ok_or(ChainStateError::ValueOutOfRange)?;

            if !is_coinbase {
                let mut value_in = 0i64;
                for input in &tx.vin {
                    if !spent_in_block.insert(input.prevout.clone()) {
                        return Err(ChainStateError::MissingInput);
                    }
                    let entry = match created.remove(&input.prevout) {
                        Some(entry) => entry,
                        None => self
                            .utxos
                            .get(&input.prevout)?
                            .ok_or(ChainStateError::MissingInput)?,
                    };
                    value_in = value_in
                        .checked_add(entry.value)
                        .filter(|total| money_range(*total))
                        .ok_or(ChainStateError::ValueOutOfRange)?;
                    self.utxos.delete(&mut batch, &input.prevout);
                    undo.spent.push(SpentOutput {
                        outpoint: input.prevout.clone(),
                        entry,
                    });
                }
                if value_in < value_out {
                    return Err(ChainStateError::ValueOutOfRange);
                }
            }

            for (output_index, output) in tx.vout.iter().enumerate() {
                if output.script_pubkey.first() == Some(&OP_RETURN) {
                    continue;
                }
                let outpoint = OutPoint::new(txid, output_index as u32);
                let entry = UtxoEntry::from_output(output, height_u32, is_coinbase);
                self.utxos.put(&mut batch, &outpoint, &entry);
                created.insert(outpoint, entry);
            }
            self.tx_index.insert(
                &mut batch,
                &txid,
                TxLocation {
                    block_hash: hash,
                    index: tx_index as u32,
                },
            );
        }

        self.indexes
            .block_connected(&mut batch, block, &hash, height_u32, &undo.spent)?;

        let bytes = block.consensus_encode();
        let entry = BlockIndexEntry {
            header: block.header.clone(),
            height,
            tx_count: block.transactions.len() as u32,
            size: bytes.len() as u32,
            status: STATUS_HAVE_DATA | STATUS_HAVE_UNDO,
        };
        batch.put(Column::Block, hash, bytes);
        batch.put(Column::BlockUndo, hash, undo.encode());
        self.index.put(&mut batch, &hash, &entry);
        self.index.set_height_hash(&mut batch, height, &hash);
        self.index.set_best_block(&mut batch, &hash);

        Ok((batch, ChainTip { hash, height }))
    }

    /// Disconnects the tip block and returns it.
    ///
    /// `in_mempool` reports which of the block's transactions are back in the mempool;
    /// their spends are kept in the spent index at mempool height.
    pub fn disconnect_tip(
        &self,
        in_mempool: &dyn Fn(&Hash256) -> bool,
    ) -> Result<Block, ChainStateError> {
        let _guard = self.lock()?;
        let tip = self
            .index
            .best_block()?
            .ok_or(ChainStateError::InvalidBlock("no block to disconnect"))?;
        let block = self.read_block(&tip.hash)?.ok_or(ChainStateError::MissingBlock)?;
        let undo = self.block_undo(&tip.hash)?.ok_or(ChainStateError::CorruptIndex(
            "missing block undo entry; reindex required",
        ))?;
        let height_u32 = u32::try_from(tip.height).map_err(|_| ChainStateError::ValueOutOfRange)?;

        let mut batch = WriteBatch::new();
        let mut coins = undo.spent.iter().rev();
        for tx in block.transactions.iter().rev() {
            let txid = tx.txid();
            for index in 0..tx.vout.len() {
                self.utxos.delete(&mut batch, &OutPoint::new(txid, index as u32));
            }
            self.tx_index.delete(&mut batch, &txid);
            if tx.is_coinbase() {
                continue;
            }
            for input in tx.vin.iter().rev() {
                let coin = coins
                    .next()
                    .ok_or(ChainStateError::CorruptIndex("block undo input mismatch"))?;
                if coin.outpoint != input.prevout {
                    return Err(ChainStateError::CorruptIndex("block undo outpoint mismatch"));
                }
                self.utxos.put(&mut batch, &coin.outpoint, &coin.entry);
            }
        }
        if coins.next().is_some() {
            return Err(ChainStateError::CorruptIndex("block undo input mismatch"));
        }

        self.indexes.block_disconnected(
            &mut batch,
            &block,
            &tip.hash,
            height_u32,
            &undo.spent,
            in_mempool,
        )?;

        self.index.clear_height_hash(&mut batch, tip.height);
        if tip.height == 0 {
            self.index.clear_best_block(&mut batch);
        } else {
            self.index.set_best_block(&mut batch, &block.header.prev_block);
        }
        self.commit_batch(&batch)?;
        cashd_log::log_category!(
            Category::Reorg,
            "disconnected block {} at height {}",
            hash256_to_hex(&tip.hash),
            tip.height
        );
        Ok(block)
    }

    /// Records the spends of a transaction entering the mempool.
    pub fn mempool_accepted(&self, tx: &Transaction, prevouts: &[TxOut]) -> Result<(), ChainStateError> {
        let _guard = self.lock()?;
        let mut batch = WriteBatch::new();
        self.indexes.mempool_accepted(&mut batch, tx, prevouts)?;
        self.commit_batch(&batch)
    }

    /// Drops the mempool spends of a transaction leaving the mempool without being mined.
    pub fn mempool_evicted(&self, tx: &Transaction) -> Result<usize, ChainStateError> {
        let _guard = self.lock()?;
        let mut batch = WriteBatch::new();
        let removed = self.indexes.mempool_evicted(&mut batch, tx)?;
        self.commit_batch(&batch)?;
        Ok(removed)
    }

    /// Deletes every spend record whose spender is unconfirmed.
    ///
    /// Run at startup, before the mempool is populated, since nothing survives a restart
    /// in memory.
    pub fn purge_mempool_spends(&self) -> Result<usize, ChainStateError> {
        let _guard = self.lock()?;
        let spent = self.indexes.spent_index();
        let outpoints = spent.mempool_spends()?;
        if outpoints.is_empty() {
            return Ok(0);
        }
        let mut batch = WriteBatch::new();
        for outpoint in &outpoints {
            spent.remove_spend(&mut batch, outpoint);
        }
        self.commit_batch(&batch)?;
        cashd_log::log_info!(
            "purged {} mempool spend records from the spent index",
            outpoints.len()
        );
        Ok(outpoints.len())
    }

    /// Rebuilds the spent index and block deltas from the main chain.
    ///
    /// Mempool spends are dropped; the caller re-records them for transactions still in
    /// its mempool. Returns the number of blocks replayed.
    pub fn reindex_spent(&self) -> Result<usize, ChainStateError> {
        let _guard = self.lock()?;
        let Some(tip) = self.index.best_block()? else {
            return Ok(0);
        };
        let rebuild = IndexSync::new(
            Arc::clone(&self.store),
            IndexConfig {
                spent: true,
                ..IndexConfig::default()
            },
        );
        let mut batch = WriteBatch::new();
        let cleared = rebuild.spent_index().clear(&mut batch)?;

        for height in 0..=tip.height {
            let hash = self
                .index
                .height_hash(height)?
                .ok_or(ChainStateError::CorruptIndex("missing main chain height entry"))?;
            let block = self.read_block(&hash)?.ok_or(ChainStateError::MissingBlock)?;
            let undo = self
                .block_undo(&hash)?
                .ok_or(ChainStateError::CorruptIndex("missing block undo entry"))?;
            rebuild.block_connected(&mut batch, &block, &hash, height as u32, &undo.spent)?;
        }
        self.commit_batch(&batch)?;
        cashd_log::log_info!(
            "rebuilt spent index over {} blocks ({} stale records cleared)",
            tip.height + 1,
            cleared
        );
        Ok(tip.height as usize + 1)
    }

    pub fn commit_batch(&self, batch: &WriteBatch) -> Result<(), ChainStateError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.store.write_batch(batch).map_err(|err| {
            cashd_log::log_error!("chainstate commit failed: {err}");
            ChainStateError::Store(err)
        })
    }

    pub fn flush(&self) -> Result<(), ChainStateError> {
        Ok(self.store.flush()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, ChainStateError> {
        self.write_lock
            .lock()
            .map_err(|_| ChainStateError::CorruptIndex("chainstate write lock poisoned"))
    }
}
