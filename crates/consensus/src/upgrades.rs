//! Network upgrade schedule.
//!
//! Upgrades activate either at a block height or once the median time past of the
//! chain tip reaches a timestamp. Activation is always evaluated against the tip the
//! next block builds on, so a rule is "active" for blocks at `tip_height + 1`.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum UpgradeIndex {
    Uahf = 0,
    Daa = 1,
    MagneticAnomaly = 2,
    GreatWall = 3,
    Graviton = 4,
    ReplayProtection = 5,
}

pub const MAX_NETWORK_UPGRADES: usize = 6;

pub const ALL_UPGRADES: [UpgradeIndex; MAX_NETWORK_UPGRADES] = [
    UpgradeIndex::Uahf,
    UpgradeIndex::Daa,
    UpgradeIndex::MagneticAnomaly,
    UpgradeIndex::GreatWall,
    UpgradeIndex::Graviton,
    UpgradeIndex::ReplayProtection,
];

impl UpgradeIndex {
    pub const fn as_usize(self) -> usize {
        self as usize
    }
}

pub type Hash256 = [u8; 32];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActivationPoint {
    /// Active once the tip height is at least this value.
    Height(i32),
    /// Active once the tip median time past is at least this UNIX time.
    MedianTime(i64),
    Never,
}

#[derive(Clone, Copy, Debug)]
pub struct NetworkUpgrade {
    pub activation: ActivationPoint,
}

impl NetworkUpgrade {
    pub const ALWAYS_ACTIVE: NetworkUpgrade = NetworkUpgrade {
        activation: ActivationPoint::Height(0),
    };
    pub const NEVER: NetworkUpgrade = NetworkUpgrade {
        activation: ActivationPoint::Never,
    };

    pub const fn at_height(height: i32) -> Self {
        Self {
            activation: ActivationPoint::Height(height),
        }
    }

    pub const fn at_time(time: i64) -> Self {
        Self {
            activation: ActivationPoint::MedianTime(time),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpgradeState {
    Disabled,
    Pending,
    Active,
}

#[derive(Clone, Copy, Debug)]
pub struct UpgradeInfo {
    pub name: &'static str,
    pub info: &'static str,
}

pub const NETWORK_UPGRADE_INFO: [UpgradeInfo; MAX_NETWORK_UPGRADES] = [
    UpgradeInfo {
        name: "UAHF",
        info: "User activated hard fork, SIGHASH_FORKID replay protection",
    },
    UpgradeInfo {
        name: "DAA",
        info: "New difficulty adjustment, LOW_S and NULLFAIL enforcement",
    },
    UpgradeInfo {
        name: "Magnetic Anomaly",
        info: "OP_CHECKDATASIG, CLEANSTACK, SIGPUSHONLY, 100 byte minimum tx size",
    },
    UpgradeInfo {
        name: "Great Wall",
        info: "Schnorr signatures, segwit recovery",
    },
    UpgradeInfo {
        name: "Graviton",
        info: "Schnorr multisig, MINIMALDATA enforcement",
    },
    UpgradeInfo {
        name: "Replay protection",
        info: "Next upgrade replay protection",
    },
];

/// Position of the chain tip used to evaluate activation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TipContext {
    pub height: i32,
    pub median_time_past: i64,
}

impl TipContext {
    /// Context before any block has been connected.
    pub const EMPTY: TipContext = TipContext {
        height: -1,
        median_time_past: 0,
    };
}

pub fn network_upgrade_state(
    tip: TipContext,
    upgrades: &[NetworkUpgrade; MAX_NETWORK_UPGRADES],
    idx: UpgradeIndex,
) -> UpgradeState {
    match upgrades[idx.as_usize()].activation {
        ActivationPoint::Never => UpgradeState::Disabled,
        ActivationPoint::Height(height) => {
            if tip.height >= height {
                UpgradeState::Active
            } else {
                UpgradeState::Pending
            }
        }
        ActivationPoint::MedianTime(time) => {
            if tip.height >= 0 && tip.median_time_past >= time {
                UpgradeState::Active
            } else {
                UpgradeState::Pending
            }
        }
    }
}

pub fn network_upgrade_active(
    tip: TipContext,
    upgrades: &[NetworkUpgrade; MAX_NETWORK_UPGRADES],
    idx: UpgradeIndex,
) -> bool {
    network_upgrade_state(tip, upgrades, idx) == UpgradeState::Active
}

pub fn next_upgrade(
    tip: TipContext,
    upgrades: &[NetworkUpgrade; MAX_NETWORK_UPGRADES],
) -> Option<UpgradeIndex> {
    ALL_UPGRADES
        .iter()
        .copied()
        .find(|idx| network_upgrade_state(tip, upgrades, *idx) == UpgradeState::Pending)
}
