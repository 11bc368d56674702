//! Dry-run transaction evaluation.
//!
//! [`TransactionOracle::evaluate`] answers "would this transaction be accepted on top of the
//! current tip and mempool" without touching either. Every domain problem becomes an entry
//! of [`ValidationVerdict::errors`]; only store failures abort the evaluation.
//!
//! `errors` lists each code once. Script failures are reported per input in
//! [`InputsCheck::errors`] and collapse to a single `input-script-failed` code.

use std::collections::HashSet;

use cashd_chainstate::{ChainState, ChainStateError};
use cashd_consensus::constants::{COINBASE_MATURITY, MAX_TX_SIZE};
use cashd_consensus::money::money_range;
use cashd_consensus::params::hash256_to_hex;
use cashd_log::Category;
use cashd_primitives::transaction::{Transaction, TxOut};
use cashd_script::flags::{block_script_flags, standard_script_flags};
use cashd_script::interpreter::{verify_script, ScriptError, ScriptFlags};
use cashd_script::standard::check_standard_tx;
use cashd_storage::KeyValueStore;
use serde::Serialize;

use crate::mempool::Mempool;
use crate::policy::{is_undersize, MempoolPolicy};

pub const INPUT_SCRIPT_FAILED: &str = "input-script-failed";

/// Why an input's script did not pass under the relay flags.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InputFailure {
    /// Fails under the consensus flags of the next block.
    Invalid(ScriptError),
    /// Passes consensus but breaks a policy-only flag.
    NonStandard(ScriptError),
}

impl InputFailure {
    pub fn reject_reason(&self) -> String {
        match self {
            InputFailure::Invalid(err) => format!("mandatory-script-verify-flag-failed ({err})"),
            InputFailure::NonStandard(err) => format!("non-mandatory-script-verify-flag ({err})"),
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, InputFailure::Invalid(_))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InputError {
    pub index: u32,
    #[serde(skip)]
    pub failure: InputFailure,
    pub reject: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct InputsCheck {
    pub valid: bool,
    pub errors: Vec<InputError>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ValidationVerdict {
    pub minable: bool,
    pub inputscheck: InputsCheck,
    pub txfee: i64,
    pub txfeeneeded: i64,
    pub errors: Vec<String>,
}

impl ValidationVerdict {
    pub fn enough_fee(&self) -> bool {
        self.txfee >= self.txfeeneeded
    }

    fn push_error(&mut self, code: &str) {
        self.errors.push(code.to_string());
    }

    fn push_error_once(&mut self, code: &str) {
        if !self.errors.iter().any(|existing| existing == code) {
            self.push_error(code);
        }
    }
}

/// Read-only view over the chain and a locked mempool.
pub struct TransactionOracle<'a, S> {
    chain: &'a ChainState<S>,
    mempool: &'a Mempool,
    policy: &'a MempoolPolicy,
}

impl<'a, S: KeyValueStore> TransactionOracle<'a, S> {
    pub fn new(chain: &'a ChainState<S>, mempool: &'a Mempool, policy: &'a MempoolPolicy) -> Self {
        Self {
            chain,
            mempool,
            policy,
        }
    }

    /// Evaluates `tx` for the block that would be built on the current tip.
    pub fn evaluate(&self, tx: &Transaction) -> Result<ValidationVerdict, ChainStateError> {
        let mut verdict = ValidationVerdict::default();
        let size = tx.serialized_size();
        let txid = tx.txid();

        self.check_structure(tx, size, &mut verdict);
        if self.policy.require_standard {
            if let Err(reason) = check_standard_tx(tx, self.policy.dust_relay_fee_per_kb) {
                verdict.push_error(reason);
            }
        }

        let tip = self.chain.tip_context()?;
        let spend_height = tip.height + 1;
        let mut prevouts: Vec<Option<TxOut>> = Vec::with_capacity(tx.vin.len());
        let mut missing = false;
        let mut conflicted = false;
        for input in &tx.vin {
            if tx.is_coinbase() {
                break;
            }
            // An output already claimed by another mempool transaction is not available,
            // even though it is still unspent on chain.
            if let Some(spender) = self.mempool.spender(&input.prevout) {
                if spender != txid {
                    conflicted = true;
                    verdict.push_error_once("txn-mempool-conflict");
                }
            }
            if let Some(coin) = self.chain.utxo(&input.prevout)? {
                if coin.is_coinbase && spend_height - (coin.height as i32) < COINBASE_MATURITY {
                    verdict.push_error_once("bad-txns-premature-spend-of-coinbase");
                }
                prevouts.push(Some(coin.to_output()));
            } else if let Some(output) = self.mempool.output(&input.prevout) {
                prevouts.push(Some(output.clone()));
            } else {
                missing = true;
                prevouts.push(None);
            }
        }
        if missing {
            verdict.push_error("bad-txns-inputs-missingorspent");
        }

        let value_in = prevouts
            .iter()
            .flatten()
            .try_fold(0i64, |total, output| total.checked_add(output.value))
            .filter(|total| money_range(*total));
        let value_out = tx.value_out().filter(|total| money_range(*total));
        match (value_in, value_out) {
            (Some(value_in), Some(value_out)) if !missing && !tx.is_coinbase() => {
                verdict.txfee = value_in - value_out;
                if value_in < value_out {
                    verdict.push_error("bad-txns-in-belowout");
                }
            }
            (None, _) if !missing => verdict.push_error("bad-txns-inputvalues-outofrange"),
            _ => {}
        }
        verdict.txfeeneeded = self.policy.required_fee(size);

        let params = &self.chain.params().consensus;
        let standard_flags = standard_script_flags(params, tip);
        let block_flags = block_script_flags(params, tip);
        for (index, prevout) in prevouts.iter().enumerate() {
            let Some(prevout) = prevout else {
                continue;
            };
            if let Some(failure) = check_input(tx, index, prevout, standard_flags, block_flags) {
                cashd_log::log_category!(
                    Category::Script,
                    "input {}:{} failed: {}",
                    hash256_to_hex(&txid),
                    index,
                    failure.reject_reason()
                );
                verdict.push_error_once(INPUT_SCRIPT_FAILED);
                verdict.inputscheck.errors.push(InputError {
                    index: index as u32,
                    reject: failure.reject_reason(),
                    failure,
                });
            }
        }

        verdict.inputscheck.valid = !missing
            && !conflicted
            && !tx.is_coinbase()
            && verdict.inputscheck.errors.is_empty();
        verdict.minable = verdict.inputscheck.valid
            && !is_undersize(size)
            && verdict.enough_fee()
            && verdict.errors.is_empty();
        Ok(verdict)
    }

    fn check_structure(&self, tx: &Transaction, size: usize, verdict: &mut ValidationVerdict) {
        if tx.vin.is_empty() {
            verdict.push_error("bad-txns-vin-empty");
        }
        if tx.vout.is_empty() {
            verdict.push_error("bad-txns-vout-empty");
        }
        if size > MAX_TX_SIZE {
            verdict.push_error("bad-txns-oversize");
        }
        if is_undersize(size) {
            verdict.push_error("bad-txns-undersize");
        }
        if tx.vout.iter().any(|output| output.value < 0) {
            verdict.push_error("bad-txns-vout-negative");
        } else if tx.value_out().map_or(true, |total| !money_range(total)) {
            verdict.push_error("bad-txns-txouttotal-toolarge");
        }
        let mut seen = HashSet::with_capacity(tx.vin.len());
        if !tx.vin.iter().all(|input| seen.insert(&input.prevout)) {
            verdict.push_error("bad-txns-inputs-duplicate");
        }
        if tx.is_coinbase() {
            verdict.push_error("coinbase");
        } else if tx.vin.iter().any(|input| input.prevout.is_null()) {
            verdict.push_error("bad-txns-prevout-null");
        }
    }
}

/// Runs one input under the relay flags and classifies a failure with the consensus flags.
pub fn check_input(
    tx: &Transaction,
    index: usize,
    prevout: &TxOut,
    standard_flags: ScriptFlags,
    block_flags: ScriptFlags,
) -> Option<InputFailure> {
    let script_sig = &tx.vin[index].script_sig;
    let err = verify_script(
        script_sig,
        &prevout.script_pubkey,
        tx,
        index,
        prevout.value,
        standard_flags,
    )
    .err()?;
    match verify_script(
        script_sig,
        &prevout.script_pubkey,
        tx,
        index,
        prevout.value,
        block_flags,
    ) {
        Ok(()) => Some(InputFailure::NonStandard(err)),
        Err(consensus_err) => Some(InputFailure::Invalid(consensus_err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reasons_name_the_flag_class() {
        let invalid = InputFailure::Invalid(ScriptError::MinimalData);
        let policy = InputFailure::NonStandard(ScriptError::CleanStack);
        assert!(invalid
            .reject_reason()
            .starts_with("mandatory-script-verify-flag-failed ("));
        assert!(policy
            .reject_reason()
            .starts_with("non-mandatory-script-verify-flag ("));
        assert!(invalid.is_invalid());
        assert!(!policy.is_invalid());
    }

    #[test]
    fn verdict_serializes_nested_inputs_check() {
        let verdict = ValidationVerdict {
            minable: false,
            inputscheck: InputsCheck {
                valid: false,
                errors: vec![InputError {
                    index: 0,
                    failure: InputFailure::Invalid(ScriptError::EvalFalse),
                    reject: InputFailure::Invalid(ScriptError::EvalFalse).reject_reason(),
                }],
            },
            txfee: 300,
            txfeeneeded: 191,
            errors: vec![INPUT_SCRIPT_FAILED.to_string()],
        };
        let value = serde_json::to_value(&verdict).expect("json");
        assert_eq!(value["minable"], false);
        assert_eq!(value["inputscheck"]["valid"], false);
        assert_eq!(value["inputscheck"]["errors"][0]["index"], 0);
        assert!(value["inputscheck"]["errors"][0].get("failure").is_none());
        assert_eq!(value["txfee"], 300);
        assert_eq!(value["errors"][0], INPUT_SCRIPT_FAILED);
        assert!(verdict.enough_fee());
    }
}
