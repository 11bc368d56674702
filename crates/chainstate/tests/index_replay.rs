mod common;

use std::sync::Arc;

use cashd_chainstate::sync::IndexSync;
use cashd_chainstate::{IndexConfig, SpendHeight};
use cashd_consensus::params::hash256_to_hex;
use cashd_log::Level;
use cashd_primitives::address::p2sh_script;
use cashd_primitives::block::Block;
use cashd_primitives::transaction::TxOut;
use cashd_storage::memory::MemoryStore;
use cashd_storage::{Column, KeyValueStore, ScanResult, WriteBatch};

use common::*;

fn pay(value: i64) -> Vec<TxOut> {
    vec![TxOut {
        value,
        script_pubkey: p2sh_script(&[0x6b; 20]),
    }]
}

fn snapshot(store: &MemoryStore) -> Vec<ScanResult> {
    Column::INDEXES
        .iter()
        .map(|column| store.scan_prefix(*column, &[]).expect("scan"))
        .collect()
}

/// A chain of five blocks whose tip spends the coinbase at height 1.
fn chain_with_spend() -> (Arc<MemoryStore>, Block) {
    let store = Arc::new(MemoryStore::new());
    let chain = chainstate(&store);
    mine_empty(&chain, 4, 1);
    let funding = coinbase_outpoint(&chain, 1);
    let block = mine(&chain, 2, vec![spend(&[funding], pay(SUBSIDY - 10_000))]);
    (store, block)
}

#[test]
fn mempool_accept_replays_to_same_rows() {
    let store = Arc::new(MemoryStore::new());
    let chain = chainstate(&store);
    mine_empty(&chain, 3, 1);
    let funding = coinbase_outpoint(&chain, 1);
    let prevout = chain.utxo(&funding).expect("utxo").expect("coin").to_output();
    let tx = spend(&[funding.clone()], pay(SUBSIDY - 10_000));

    chain
        .mempool_accepted(&tx, &[prevout.clone()])
        .expect("mempool accept");
    let first = snapshot(&store);
    chain
        .mempool_accepted(&tx, &[prevout])
        .expect("mempool accept again");
    assert_eq!(snapshot(&store), first);
    assert_eq!(
        chain.lookup_spend(&funding).expect("lookup").map(|r| r.height),
        Some(SpendHeight::Mempool)
    );
}

#[test]
fn mempool_evict_replays_to_same_rows() {
    let store = Arc::new(MemoryStore::new());
    let chain = chainstate(&store);
    mine_empty(&chain, 3, 1);
    let funding = coinbase_outpoint(&chain, 1);
    let prevout = chain.utxo(&funding).expect("utxo").expect("coin").to_output();
    let tx = spend(&[funding.clone()], pay(SUBSIDY - 10_000));
    let before = snapshot(&store);

    chain.mempool_accepted(&tx, &[prevout]).expect("mempool accept");
    assert_eq!(chain.mempool_evicted(&tx).expect("evict"), 1);
    let first = snapshot(&store);
    assert_eq!(first, before);

    assert_eq!(chain.mempool_evicted(&tx).expect("evict again"), 0);
    assert_eq!(snapshot(&store), first);
    assert_eq!(chain.lookup_spend(&funding).expect("lookup"), None);
}

#[test]
fn block_connect_replays_to_same_rows() {
    let (store, block) = chain_with_spend();
    let chain = chainstate(&store);
    let hash = block.hash();
    let undo = chain.block_undo(&hash).expect("undo").expect("undo present");
    let sync = IndexSync::new(Arc::clone(&store), IndexConfig::all());
    let connected = snapshot(&store);
    assert!(!connected[4].is_empty(), "block deltas written");

    for _ in 0..2 {
        let mut batch = WriteBatch::new();
        sync.block_connected(&mut batch, &block, &hash, 4, &undo.spent)
            .expect("connect rows");
        store.write_batch(&batch).expect("write");
        assert_eq!(snapshot(&store), connected);
    }
}

#[test]
fn block_disconnect_replays_to_same_rows() {
    let (store, block) = chain_with_spend();
    let chain = chainstate(&store);
    let hash = block.hash();
    let undo = chain.block_undo(&hash).expect("undo").expect("undo present");
    let funding = undo.spent[0].outpoint.clone();
    let sync = IndexSync::new(Arc::clone(&store), IndexConfig::all());

    let mut batch = WriteBatch::new();
    sync.block_disconnected(&mut batch, &block, &hash, 4, &undo.spent, &|_| false)
        .expect("disconnect rows");
    store.write_batch(&batch).expect("write");
    let first = snapshot(&store);
    assert!(store
        .get(Column::BlockDeltas, &hash)
        .expect("get")
        .is_none());
    assert_eq!(chain.lookup_spend(&funding).expect("lookup"), None);

    let mut batch = WriteBatch::new();
    sync.block_disconnected(&mut batch, &block, &hash, 4, &undo.spent, &|_| false)
        .expect("disconnect rows again");
    store.write_batch(&batch).expect("write");
    assert_eq!(snapshot(&store), first);
}

#[test]
fn evicting_tx_beaten_by_mined_conflict_keeps_confirmed_record_quietly() {
    cashd_log::enable_capture(1024);
    let store = Arc::new(MemoryStore::new());
    let chain = chainstate(&store);
    mine_empty(&chain, 3, 7);
    let funding = coinbase_outpoint(&chain, 1);
    let prevout = chain.utxo(&funding).expect("utxo").expect("coin").to_output();

    let loser = spend(&[funding.clone()], pay(SUBSIDY - 30_000));
    chain.mempool_accepted(&loser, &[prevout]).expect("mempool accept");
    let winner = spend(&[funding.clone()], pay(SUBSIDY - 40_000));
    mine(&chain, 7, vec![winner.clone()]);

    assert_eq!(chain.mempool_evicted(&loser).expect("evict"), 0);
    let record = chain.lookup_spend(&funding).expect("lookup").expect("record");
    assert_eq!(record.txid, winner.txid());
    assert_eq!(record.height, SpendHeight::Confirmed(3));

    let loser_hex = hash256_to_hex(&loser.txid());
    let warnings: Vec<String> = cashd_log::capture_snapshot()
        .into_iter()
        .filter(|entry| entry.level == Level::Warn && entry.msg.contains(&loser_hex))
        .map(|entry| entry.msg)
        .collect();
    assert!(warnings.is_empty(), "{warnings:?}");
}
