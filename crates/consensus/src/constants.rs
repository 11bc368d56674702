//! Consensus-wide constants shared across validation.

/// Transactions smaller than this are rejected (network rule since Magnetic Anomaly).
pub const MIN_TX_SIZE: usize = 100;
/// The maximum allowed size for a transaction, in bytes (network rule).
pub const MAX_TX_SIZE: usize = 1_000_000;
/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 100;

/// Threshold for `lock_time`: below this value it is interpreted as block number,
/// otherwise as UNIX timestamp.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
/// Number of previous blocks used for median time past.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Maximum number of bytes pushable to the stack.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
/// Maximum number of non-push operations per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;
/// Maximum number of public keys per multisig.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;
/// Maximum combined stack and altstack size.
pub const MAX_STACK_SIZE: usize = 1_000;

