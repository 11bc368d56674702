//! Consensus constants, parameters, and upgrade schedule.

pub mod constants;
pub mod money;
pub mod params;
pub mod upgrades;

pub use params::{chain_params, consensus_params, ChainParams, ConsensusParams, Network};
pub use upgrades::{ActivationPoint, Hash256, TipContext, UpgradeIndex};
