//! Chain state, UTXO set and the spent/address indexes layered over it.

pub mod address_index;
pub mod block_deltas;
pub mod index;
pub mod spentindex;
pub mod state;
pub mod sync;
pub mod timestamp_index;
pub mod txindex;
pub mod undo;
pub mod utxo;

pub use spentindex::{SpendHeight, SpentIndexDetails, SpentIndexValue};
pub use state::{ChainState, ChainStateError, TxLookup};
pub use sync::IndexConfig;
