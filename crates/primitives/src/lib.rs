//! Core block/transaction types and consensus serialization.

pub mod address;
pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use address::{
    address_from_hash, address_to_script_pubkey, script_pubkey_to_address, AddressError,
    AddressType,
};
pub use block::{Block, BlockHeader};
pub use hash::{hash160, ripemd160, sha256, sha256d};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TransactionDecodeError, TxIn, TxOut};
