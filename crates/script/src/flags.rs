//! Script flag selection from the upgrade schedule.
//!
//! Flags are evaluated for the block that would be built on `tip`, the same context the
//! mempool uses when accepting a transaction.

use cashd_consensus::upgrades::network_upgrade_active;
use cashd_consensus::{ConsensusParams, TipContext, UpgradeIndex};

use crate::interpreter::{
    ScriptFlags, SCRIPT_DISALLOW_SEGWIT_RECOVERY, SCRIPT_ENABLE_CHECKDATASIG,
    SCRIPT_ENABLE_REPLAY_PROTECTION, SCRIPT_ENABLE_SCHNORR_MULTISIG, SCRIPT_ENABLE_SIGHASH_FORKID,
    SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY, SCRIPT_VERIFY_CHECKSEQUENCEVERIFY, SCRIPT_VERIFY_CLEANSTACK,
    SCRIPT_VERIFY_DERSIG, SCRIPT_VERIFY_LOW_S, SCRIPT_VERIFY_MINIMALDATA, SCRIPT_VERIFY_NULLFAIL,
    SCRIPT_VERIFY_P2SH, SCRIPT_VERIFY_SIGPUSHONLY, SCRIPT_VERIFY_STRICTENC,
    STANDARD_SCRIPT_VERIFY_FLAGS,
};

/// Consensus flags for the next block.
pub fn block_script_flags(params: &ConsensusParams, tip: TipContext) -> ScriptFlags {
    let active = |idx| network_upgrade_active(tip, &params.upgrades, idx);

    let mut flags = SCRIPT_VERIFY_P2SH
        | SCRIPT_VERIFY_DERSIG
        | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY
        | SCRIPT_VERIFY_CHECKSEQUENCEVERIFY;

    if active(UpgradeIndex::Uahf) {
        flags |= SCRIPT_VERIFY_STRICTENC | SCRIPT_ENABLE_SIGHASH_FORKID;
    }
    if active(UpgradeIndex::Daa) {
        flags |= SCRIPT_VERIFY_LOW_S | SCRIPT_VERIFY_NULLFAIL;
    }
    if active(UpgradeIndex::MagneticAnomaly) {
        flags |= SCRIPT_VERIFY_SIGPUSHONLY
            | SCRIPT_VERIFY_CLEANSTACK
            | SCRIPT_ENABLE_CHECKDATASIG;
    }
    // Recovery of coins sent to P2SH-wrapped witness programs is a consensus rule only
    // from Great Wall onward.
    if !active(UpgradeIndex::GreatWall) {
        flags |= SCRIPT_DISALLOW_SEGWIT_RECOVERY;
    }
    if active(UpgradeIndex::Graviton) {
        flags |= SCRIPT_ENABLE_SCHNORR_MULTISIG | SCRIPT_VERIFY_MINIMALDATA;
    }
    if active(UpgradeIndex::ReplayProtection) {
        flags |= SCRIPT_ENABLE_REPLAY_PROTECTION;
    }
    flags
}

/// Policy flags for mempool acceptance on top of the next block's consensus flags.
pub fn standard_script_flags(params: &ConsensusParams, tip: TipContext) -> ScriptFlags {
    block_script_flags(params, tip) | STANDARD_SCRIPT_VERIFY_FLAGS
}
