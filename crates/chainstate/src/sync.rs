//! Keeps the spent, address, block delta and timestamp indexes in step with the chain and
//! the mempool.
//!
//! Every handler only stages writes into the caller's batch, so a block's index updates
//! commit atomically with the block itself. Handlers are idempotent: replaying one stages
//! the same puts and deletes again.

use cashd_consensus::params::hash256_to_hex;
use cashd_consensus::Hash256;
use cashd_log::Category;
use cashd_primitives::block::Block;
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{Transaction, TxOut};
use cashd_storage::{KeyValueStore, StoreError, WriteBatch};
use smallvec::SmallVec;

use crate::address_index::{AddressDeltaEntry, AddressId, AddressIndex, AddressUnspentEntry};
use crate::block_deltas::{BlockDeltaIndex, BlockDeltas};
use crate::spentindex::{SpendHeight, SpentIndex, SpentIndexDetails, SpentIndexValue};
use crate::state::ChainStateError;
use crate::timestamp_index::TimestampIndex;
use crate::undo::SpentOutput;

/// Which optional indexes are maintained.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IndexConfig {
    pub spent: bool,
    pub address: bool,
    pub timestamp: bool,
}

impl IndexConfig {
    pub fn all() -> Self {
        Self {
            spent: true,
            address: true,
            timestamp: true,
        }
    }
}

pub struct IndexSync<S> {
    config: IndexConfig,
    spent: SpentIndex<S>,
    address: AddressIndex<S>,
    deltas: BlockDeltaIndex<S>,
    timestamps: TimestampIndex<S>,
}

impl<S: Clone> IndexSync<S> {
    pub fn new(store: S, config: IndexConfig) -> Self {
        Self {
            config,
            spent: SpentIndex::new(store.clone()),
            address: AddressIndex::new(store.clone()),
            deltas: BlockDeltaIndex::new(store.clone()),
            timestamps: TimestampIndex::new(store),
        }
    }
}

impl<S: KeyValueStore> IndexSync<S> {
    pub fn config(&self) -> IndexConfig {
        self.config
    }

    pub fn spent_index(&self) -> &SpentIndex<S> {
        &self.spent
    }

    pub fn address_index(&self) -> &AddressIndex<S> {
        &self.address
    }

    pub fn block_delta_index(&self) -> &BlockDeltaIndex<S> {
        &self.deltas
    }

    pub fn timestamp_index(&self) -> &TimestampIndex<S> {
        &self.timestamps
    }

    /// Stages the index rows of a block connected at `height`.
    ///
    /// `spent` holds the coins consumed by the block's non-coinbase inputs, in order.
    /// A mempool spend record for any of those inputs is overwritten with the block height.
    pub fn block_connected(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        hash: &Hash256,
        height: u32,
        spent: &[SpentOutput],
    ) -> Result<(), ChainStateError> {
        let per_tx = split_spent(block, spent)?;

        for (tx_index, (tx, coins)) in block.transactions.iter().zip(&per_tx).enumerate() {
            let txid = tx.txid();
            for (input_index, coin) in coins.iter().enumerate() {
                if self.config.spent {
                    self.spent.record_spend(
                        batch,
                        &coin.outpoint,
                        &SpentIndexValue {
                            txid,
                            input_index: input_index as u32,
                            height: SpendHeight::Confirmed(height),
                            details: SpentIndexDetails::from_output(
                                coin.entry.value,
                                &coin.entry.script_pubkey,
                            ),
                        },
                    );
                }
                if self.config.address {
                    if let Some(address) = AddressId::from_script(&coin.entry.script_pubkey) {
                        self.address.insert_delta(
                            batch,
                            &address,
                            &AddressDeltaEntry {
                                height,
                                tx_index: tx_index as u32,
                                txid,
                                index: input_index as u32,
                                spending: true,
                                satoshis: -coin.entry.value,
                            },
                        );
                        self.address.delete_unspent(batch, &address, &coin.outpoint);
                    }
                }
            }

            if self.config.address {
                for (output_index, output) in tx.vout.iter().enumerate() {
                    let Some(address) = AddressId::from_script(&output.script_pubkey) else {
                        continue;
                    };
                    self.address.insert_delta(
                        batch,
                        &address,
                        &AddressDeltaEntry {
                            height,
                            tx_index: tx_index as u32,
                            txid,
                            index: output_index as u32,
                            spending: false,
                            satoshis: output.value,
                        },
                    );
                    self.address.put_unspent(
                        batch,
                        &address,
                        &AddressUnspentEntry {
                            outpoint: OutPoint::new(txid, output_index as u32),
                            satoshis: output.value,
                            script_pubkey: output.script_pubkey.clone(),
                            height,
                        },
                    );
                }
            }
        }

        if self.config.spent {
            let deltas = BlockDeltas::build(block, spent)
                .map_err(|_| ChainStateError::CorruptIndex("block undo does not match block"))?;
            self.deltas.put(batch, hash, &deltas);
        }
        if self.config.timestamp {
            self.timestamps.insert(batch, block.header.time, hash);
        }
        cashd_log::log_category!(
            Category::Index,
            "indexed block {} at height {}",
            hash256_to_hex(hash),
            height
        );
        Ok(())
    }

    /// Stages the reversal of [`IndexSync::block_connected`].
    ///
    /// Spends by transactions for which `in_mempool` answers true go back to mempool
    /// status; every other spend record of the block is removed.
    pub fn block_disconnected(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        hash: &Hash256,
        height: u32,
        spent: &[SpentOutput],
        in_mempool: &dyn Fn(&Hash256) -> bool,
    ) -> Result<(), ChainStateError> {
        let per_tx = split_spent(block, spent)?;

        for (tx_index, (tx, coins)) in block.transactions.iter().zip(&per_tx).enumerate().rev() {
            let txid = tx.txid();

            if self.config.address {
                for (output_index, output) in tx.vout.iter().enumerate() {
                    let Some(address) = AddressId::from_script(&output.script_pubkey) else {
                        continue;
                    };
                    self.address.delete_delta(
                        batch,
                        &address,
                        &AddressDeltaEntry {
                            height,
                            tx_index: tx_index as u32,
                            txid,
                            index: output_index as u32,
                            spending: false,
                            satoshis: output.value,
                        },
                    );
                    self.address
                        .delete_unspent(batch, &address, &OutPoint::new(txid, output_index as u32));
                }
            }

            let back_in_mempool = !coins.is_empty() && in_mempool(&txid);
            for (input_index, coin) in coins.iter().enumerate().rev() {
                if self.config.spent {
                    self.revert_spend(batch, coin, &txid, input_index as u32, back_in_mempool)?;
                }
                if self.config.address {
                    if let Some(address) = AddressId::from_script(&coin.entry.script_pubkey) {
                        self.address.delete_delta(
                            batch,
                            &address,
                            &AddressDeltaEntry {
                                height,
                                tx_index: tx_index as u32,
                                txid,
                                index: input_index as u32,
                                spending: true,
                                satoshis: -coin.entry.value,
                            },
                        );
                        self.address.put_unspent(
                            batch,
                            &address,
                            &AddressUnspentEntry {
                                outpoint: coin.outpoint.clone(),
                                satoshis: coin.entry.value,
                                script_pubkey: coin.entry.script_pubkey.clone(),
                                height: coin.entry.height,
                            },
                        );
                    }
                }
            }
        }

        if self.config.spent {
            self.deltas.delete(batch, hash);
        }
        if self.config.timestamp {
            self.timestamps.delete(batch, block.header.time, hash);
        }
        cashd_log::log_category!(
            Category::Reorg,
            "unindexed block {} at height {}",
            hash256_to_hex(hash),
            height
        );
        Ok(())
    }

    fn revert_spend(
        &self,
        batch: &mut WriteBatch,
        coin: &SpentOutput,
        txid: &Hash256,
        input_index: u32,
        back_in_mempool: bool,
    ) -> Result<(), StoreError> {
        if back_in_mempool {
            self.spent.record_spend(
                batch,
                &coin.outpoint,
                &SpentIndexValue {
                    txid: *txid,
                    input_index,
                    height: SpendHeight::Mempool,
                    details: SpentIndexDetails::from_output(
                        coin.entry.value,
                        &coin.entry.script_pubkey,
                    ),
                },
            );
            return Ok(());
        }
        match self.spent.lookup_spend(&coin.outpoint)? {
            Some(record) if record.txid == *txid && record.input_index == input_index => {
                self.spent.remove_spend(batch, &coin.outpoint);
            }
            Some(record) => {
                cashd_log::log_warn!(
                    "spent index: {}:{} recorded as spent by {}:{}, expected {}:{}",
                    hash256_to_hex(&coin.outpoint.hash),
                    coin.outpoint.index,
                    hash256_to_hex(&record.txid),
                    record.input_index,
                    hash256_to_hex(txid),
                    input_index
                );
            }
            None => {
                cashd_log::log_warn!(
                    "spent index: no record for {}:{} while disconnecting {}",
                    hash256_to_hex(&coin.outpoint.hash),
                    coin.outpoint.index,
                    hash256_to_hex(txid)
                );
            }
        }
        Ok(())
    }

    /// Records the spends of a transaction accepted into the mempool.
    ///
    /// `prevouts[i]` is the output spent by input `i`.
    pub fn mempool_accepted(
        &self,
        batch: &mut WriteBatch,
        tx: &Transaction,
        prevouts: &[TxOut],
    ) -> Result<(), ChainStateError> {
        if !self.config.spent {
            return Ok(());
        }
        if prevouts.len() != tx.vin.len() {
            return Err(ChainStateError::MissingInput);
        }
        let txid = tx.txid();
        for (input_index, (input, prevout)) in tx.vin.iter().zip(prevouts).enumerate() {
            self.spent.record_spend(
                batch,
                &input.prevout,
                &SpentIndexValue {
                    txid,
                    input_index: input_index as u32,
                    height: SpendHeight::Mempool,
                    details: SpentIndexDetails::from_output(prevout.value, &prevout.script_pubkey),
                },
            );
        }
        cashd_log::log_category!(
            Category::Index,
            "recorded {} mempool spends of {}",
            tx.vin.len(),
            hash256_to_hex(&txid)
        );
        Ok(())
    }

    /// Removes the mempool spends of an evicted transaction.
    ///
    /// Records that were since confirmed or re-spent by another transaction are kept.
    /// Returns the number of records removed.
    pub fn mempool_evicted(
        &self,
        batch: &mut WriteBatch,
        tx: &Transaction,
    ) -> Result<usize, ChainStateError> {
        if !self.config.spent {
            return Ok(0);
        }
        let txid = tx.txid();
        let mut removed: SmallVec<[&OutPoint; 4]> = SmallVec::new();
        for (input_index, input) in tx.vin.iter().enumerate() {
            match self.spent.lookup_spend(&input.prevout)? {
                Some(record) if record.is_mempool_spend_by(&txid, input_index as u32) => {
                    removed.push(&input.prevout);
                }
                Some(record) if record.txid == txid => {
                    cashd_log::log_category!(
                        Category::Index,
                        "keeping confirmed spend of {}:{} by {}",
                        hash256_to_hex(&input.prevout.hash),
                        input.prevout.index,
                        hash256_to_hex(&txid)
                    );
                }
                // A conflicting transaction was mined; the eviction follows from it.
                Some(record) if !record.height.is_mempool() => {
                    cashd_log::log_category!(
                        Category::Index,
                        "keeping spend of {}:{} confirmed by {}, evicting {}",
                        hash256_to_hex(&input.prevout.hash),
                        input.prevout.index,
                        hash256_to_hex(&record.txid),
                        hash256_to_hex(&txid)
                    );
                }
                Some(record) => {
                    cashd_log::log_warn!(
                        "spent index: {}:{} belongs to {}, not evicted {}",
                        hash256_to_hex(&input.prevout.hash),
                        input.prevout.index,
                        hash256_to_hex(&record.txid),
                        hash256_to_hex(&txid)
                    );
                }
                None => {
                    cashd_log::log_warn!(
                        "spent index: no record for {}:{} while evicting {}",
                        hash256_to_hex(&input.prevout.hash),
                        input.prevout.index,
                        hash256_to_hex(&txid)
                    );
                }
            }
        }
        for outpoint in &removed {
            self.spent.remove_spend(batch, outpoint);
        }
        Ok(removed.len())
    }
}

/// Splits the block's spent coins into one slice per transaction, empty for the coinbase.
fn split_spent<'a>(
    block: &Block,
    spent: &'a [SpentOutput],
) -> Result<SmallVec<[&'a [SpentOutput]; 16]>, ChainStateError> {
    let mut out = SmallVec::with_capacity(block.transactions.len());
    let mut offset = 0usize;
    for tx in &block.transactions {
        if tx.is_coinbase() {
            out.push(&spent[..0]);
            continue;
        }
        let end = offset + tx.vin.len();
        let coins = spent
            .get(offset..end)
            .ok_or(ChainStateError::CorruptIndex("block undo input mismatch"))?;
        if coins
            .iter()
            .zip(&tx.vin)
            .any(|(coin, input)| coin.outpoint != input.prevout)
        {
            return Err(ChainStateError::CorruptIndex("block undo outpoint mismatch"));
        }
        out.push(coins);
        offset = end;
    }
    if offset != spent.len() {
        return Err(ChainStateError::CorruptIndex("block undo input mismatch"));
    }
    Ok(out)
}
