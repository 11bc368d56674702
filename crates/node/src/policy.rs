//! Fee and size policy.

use cashd_consensus::constants::MIN_TX_SIZE;
use cashd_script::standard::DUST_RELAY_TX_FEE;

/// Default relay fee rate in satoshis per 1000 bytes.
pub const DEFAULT_MIN_RELAY_TX_FEE: i64 = 1_000;

#[derive(Clone, Debug)]
pub struct MempoolPolicy {
    /// Reject transactions that break relay standardness rules.
    pub require_standard: bool,
    /// Fee rate in satoshis/KB.
    pub min_relay_fee_per_kb: i64,
    pub dust_relay_fee_per_kb: i64,
}

impl MempoolPolicy {
    pub fn standard(min_relay_fee_per_kb: i64, require_standard: bool) -> Self {
        Self {
            require_standard,
            min_relay_fee_per_kb: min_relay_fee_per_kb.max(0),
            dust_relay_fee_per_kb: DUST_RELAY_TX_FEE,
        }
    }

    pub fn required_fee(&self, size: usize) -> i64 {
        required_fee(size, self.min_relay_fee_per_kb)
    }
}

impl Default for MempoolPolicy {
    fn default() -> Self {
        Self::standard(DEFAULT_MIN_RELAY_TX_FEE, true)
    }
}

/// Fee owed by a transaction of `size` bytes at `fee_per_kb`.
///
/// A non-empty transaction never rounds down to a zero fee while the rate is positive.
pub fn required_fee(size: usize, fee_per_kb: i64) -> i64 {
    if fee_per_kb <= 0 || size == 0 {
        return 0;
    }
    let size = i64::try_from(size).unwrap_or(i64::MAX);
    let fee = fee_per_kb.saturating_mul(size) / 1_000;
    fee.max(1)
}

pub fn is_undersize(size: usize) -> bool {
    size < MIN_TX_SIZE
}

/// Parses a BCH/kB amount such as `0.00001` into satoshis per kB.
pub fn parse_fee_rate(value: &str) -> Option<i64> {
    let value = value.trim();
    let (whole, fractional) = value.split_once('.').unwrap_or((value, ""));
    if whole.is_empty() && fractional.is_empty() {
        return None;
    }
    if fractional.len() > 8 || !whole.chars().chain(fractional.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut fraction = 0i64;
    for (position, digit) in fractional.bytes().enumerate() {
        fraction += i64::from(digit - b'0') * 10i64.pow(7 - position as u32);
    }
    whole.checked_mul(100_000_000)?.checked_add(fraction)
}
