//! Consensus parameter definitions.

use crate::upgrades::{Hash256, NetworkUpgrade, UpgradeIndex, MAX_NETWORK_UPGRADES};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Network::Mainnet),
            "test" | "testnet" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub upgrades: [NetworkUpgrade; MAX_NETWORK_UPGRADES],
}

impl ConsensusParams {
    pub fn set_activation(&mut self, idx: UpgradeIndex, upgrade: NetworkUpgrade) {
        self.upgrades[idx.as_usize()] = upgrade;
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hash length"),
            HexError::InvalidHex => write!(f, "invalid hex"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a display-order (byte reversed) 64 character hash.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        let byte = u8::from_str_radix(&hex[start..start + 2], 16)
            .map_err(|_| HexError::InvalidHex)?;
        *byte_out = byte;
    }
    bytes.reverse();

    Ok(bytes)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub consensus: ConsensusParams,
    pub rpc_port: u16,
}

pub fn chain_params(network: Network) -> ChainParams {
    let rpc_port = match network {
        Network::Mainnet => 8332,
        Network::Testnet => 18332,
        Network::Regtest => 18443,
    };
    ChainParams {
        network,
        consensus: consensus_params(network),
        rpc_port,
    }
}

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        upgrades: [
            NetworkUpgrade::at_height(478_558),
            NetworkUpgrade::at_height(504_031),
            NetworkUpgrade::at_height(556_766),
            NetworkUpgrade::at_height(582_679),
            NetworkUpgrade::at_height(609_135),
            NetworkUpgrade::NEVER,
        ],
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Testnet,
        upgrades: [
            NetworkUpgrade::at_height(1_155_875),
            NetworkUpgrade::at_height(1_188_697),
            NetworkUpgrade::at_height(1_267_996),
            NetworkUpgrade::at_height(1_303_884),
            NetworkUpgrade::at_height(1_341_711),
            NetworkUpgrade::NEVER,
        ],
    }
}

fn regtest_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        upgrades: [
            NetworkUpgrade::ALWAYS_ACTIVE,
            NetworkUpgrade::ALWAYS_ACTIVE,
            NetworkUpgrade::ALWAYS_ACTIVE,
            NetworkUpgrade::ALWAYS_ACTIVE,
            NetworkUpgrade::at_time(1_573_819_200),
            NetworkUpgrade::NEVER,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_is_display_order() {
        let text = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";
        let hash = hash256_from_hex(text).expect("parse hash");
        assert_eq!(hash[31], 0x00);
        assert_eq!(hash[0], 0x6f);
        assert_eq!(hash256_to_hex(&hash), text);
    }

    #[test]
    fn hash_hex_rejects_short_input() {
        assert!(matches!(
            hash256_from_hex("abcd"),
            Err(HexError::InvalidLength)
        ));
        assert!(matches!(
            hash256_from_hex(&"zz".repeat(32)),
            Err(HexError::InvalidHex)
        ));
    }

    #[test]
    fn network_names_roundtrip() {
        for network in [Network::Mainnet, Network::Testnet, Network::Regtest] {
            assert_eq!(Network::parse(network.as_str()), Some(network));
        }
        assert_eq!(Network::parse("bogus"), None);
    }
}
