mod common;

use std::sync::Arc;

use cashd_chainstate::SpendHeight;
use cashd_primitives::transaction::TxOut;
use cashd_storage::memory::MemoryStore;
use cashd_storage::{Column, KeyValueStore, WriteBatch};

use common::*;

#[test]
fn restart_purges_mempool_spends_only() {
    let store = Arc::new(MemoryStore::new());
    let chain = chainstate(&store);
    mine_empty(&chain, 4, 7);

    let confirmed_input = coinbase_outpoint(&chain, 0);
    let mined = spend(
        &[confirmed_input.clone()],
        vec![TxOut {
            value: SUBSIDY,
            script_pubkey: miner_script(0x70),
        }],
    );
    mine(&chain, 7, vec![mined]);

    let pending_input = coinbase_outpoint(&chain, 1);
    let pending = spend(
        &[pending_input.clone()],
        vec![TxOut {
            value: SUBSIDY - 2_000,
            script_pubkey: miner_script(0x71),
        }],
    );
    let prevout = chain.utxo(&pending_input).expect("utxo").expect("coin").to_output();
    chain.mempool_accepted(&pending, &[prevout]).expect("accept");
    drop(chain);

    // A fresh chain state over the same store stands in for a restarted node.
    let chain = chainstate(&store);
    assert_eq!(chain.purge_mempool_spends().expect("purge"), 1);
    assert_eq!(chain.lookup_spend(&pending_input).expect("lookup"), None);
    assert_eq!(
        chain
            .lookup_spend(&confirmed_input)
            .expect("lookup")
            .map(|record| record.height),
        Some(SpendHeight::Confirmed(4))
    );
    assert_eq!(chain.purge_mempool_spends().expect("purge"), 0);
}

#[test]
fn reindex_rebuilds_spent_index_from_main_chain() {
    let store = Arc::new(MemoryStore::new());
    let chain = chainstate(&store);
    mine_empty(&chain, 3, 8);

    let first = coinbase_outpoint(&chain, 0);
    let second = coinbase_outpoint(&chain, 1);
    let tx_a = spend(
        &[first.clone()],
        vec![TxOut {
            value: SUBSIDY,
            script_pubkey: miner_script(0x80),
        }],
    );
    let tx_b = spend(
        &[second.clone()],
        vec![TxOut {
            value: SUBSIDY,
            script_pubkey: miner_script(0x81),
        }],
    );
    let block_a = mine(&chain, 8, vec![tx_a]);
    mine(&chain, 8, vec![tx_b]);
    let expected_first = chain.lookup_spend(&first).expect("lookup");
    let expected_second = chain.lookup_spend(&second).expect("lookup");
    let expected_deltas = chain.block_deltas(&block_a.hash()).expect("deltas");

    // Lose one record and plant a stale one.
    let mut batch = WriteBatch::new();
    batch.delete(
        Column::SpentIndex,
        cashd_chainstate::utxo::outpoint_key_bytes(&first).as_bytes(),
    );
    batch.delete(Column::BlockDeltas, block_a.hash());
    store.write_batch(&batch).expect("damage");
    let stale = cashd_primitives::outpoint::OutPoint::new([0xdd; 32], 9);
    let template = expected_second.expect("record");
    let mut batch = WriteBatch::new();
    cashd_chainstate::spentindex::SpentIndex::new(Arc::clone(&store))
        .record_spend(&mut batch, &stale, &template);
    store.write_batch(&batch).expect("plant");

    assert_eq!(chain.reindex_spent().expect("reindex"), 5);
    assert_eq!(chain.lookup_spend(&first).expect("lookup"), expected_first);
    assert_eq!(chain.lookup_spend(&second).expect("lookup"), expected_second);
    assert_eq!(chain.lookup_spend(&stale).expect("lookup"), None);
    assert_eq!(
        chain.block_deltas(&block_a.hash()).expect("deltas"),
        expected_deltas
    );
}
