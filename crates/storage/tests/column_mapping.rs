use std::collections::HashSet;

use cashd_storage::{Column, WriteBatch};

#[test]
fn column_index_and_bit_are_stable() {
    let mut seen = 0u32;
    for (idx, column) in Column::ALL.iter().copied().enumerate() {
        assert_eq!(column.index(), idx);
        let bit = column.bit();
        assert_eq!(bit, 1u32 << idx);
        assert_eq!(seen & bit, 0, "duplicate bit for {column:?}");
        seen |= bit;
    }
    assert_eq!(seen.count_ones() as usize, Column::ALL.len());
}

#[test]
fn column_names_are_unique() {
    let names: HashSet<&str> = Column::ALL.iter().map(|column| column.as_str()).collect();
    assert_eq!(names.len(), Column::ALL.len());
}

#[test]
fn index_columns_exclude_chain_state() {
    for column in [
        Column::Meta,
        Column::BlockIndex,
        Column::HeightIndex,
        Column::Block,
        Column::BlockUndo,
        Column::Utxo,
    ] {
        assert!(!Column::INDEXES.contains(&column), "{column:?}");
    }
    let mask = Column::INDEXES.iter().fold(0, |mask, column| mask | column.bit());
    assert_eq!(mask.count_ones() as usize, Column::INDEXES.len());
}

#[test]
fn batch_tracks_touched_columns() {
    let mut batch = WriteBatch::new();
    batch.put(Column::SpentIndex, [1u8; 36], [0u8; 8]);
    batch.delete(Column::AddressDelta, b"delta".as_slice());
    let mut other = WriteBatch::new();
    other.put(Column::BlockDeltas, vec![2u8; 32], vec![]);
    batch.append(other);
    assert_eq!(batch.len(), 3);
    assert_eq!(
        batch.touched(),
        Column::SpentIndex.bit() | Column::AddressDelta.bit() | Column::BlockDeltas.bit()
    );
}
