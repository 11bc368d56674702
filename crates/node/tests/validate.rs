mod common;

use cashd_node::oracle::{InputFailure, INPUT_SCRIPT_FAILED};
use cashd_node::policy::required_fee;
use cashd_primitives::address::p2sh_script;
use cashd_primitives::hash::hash160;
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{Transaction, TxIn, TxOut};
use cashd_script::interpreter::ScriptError;
use cashd_script::opcodes::{push_data, OP_0, OP_1, OP_2};
use cashd_script::sign::SignatureScheme;
use cashd_script::standard::multisig_script;

use common::*;

#[test]
fn signed_spend_is_minable() {
    let harness = funded(regtest_params(), strict_policy());
    let tx = spend_coinbase(&harness, 0, SignatureScheme::Ecdsa);

    let verdict = harness.node.validate_transaction(&tx).expect("evaluate");
    assert!(verdict.minable, "{verdict:?}");
    assert!(verdict.inputscheck.valid);
    assert!(verdict.inputscheck.errors.is_empty());
    assert!(verdict.errors.is_empty());
    assert_eq!(verdict.txfee, FEE);
    assert_eq!(verdict.txfeeneeded, required_fee(tx.serialized_size(), 1_000));
    assert!(verdict.enough_fee());
}

#[test]
fn low_fee_is_valid_but_not_minable() {
    let harness = funded(regtest_params(), strict_policy());
    let mut tx = unsigned(
        coinbase_outpoint(&harness, 0),
        vec![pay_to_miner(&harness, SUBSIDY - 1)],
    );
    let script_pubkey = harness.miner_script.clone();
    sign_input(&harness, &mut tx, &script_pubkey, SUBSIDY, SignatureScheme::Ecdsa);

    let verdict = harness.node.validate_transaction(&tx).expect("evaluate");
    assert!(verdict.inputscheck.valid);
    assert!(!verdict.minable);
    assert_eq!(verdict.txfee, 1);
    assert!(!verdict.enough_fee());
    assert!(verdict.errors.is_empty());
}

#[test]
fn unsigned_input_reports_one_script_failure() {
    let harness = funded(regtest_params(), strict_policy());
    let tx = unsigned(
        coinbase_outpoint(&harness, 0),
        vec![
            pay_to_miner(&harness, SUBSIDY / 2),
            pay_to_miner(&harness, SUBSIDY / 2 - FEE),
        ],
    );
    assert!(tx.serialized_size() >= 100);

    let verdict = harness.node.validate_transaction(&tx).expect("evaluate");
    assert!(!verdict.minable);
    assert!(!verdict.inputscheck.valid);
    assert_eq!(verdict.errors, vec![INPUT_SCRIPT_FAILED.to_string()]);
    assert_eq!(verdict.inputscheck.errors.len(), 1);
    assert_eq!(verdict.inputscheck.errors[0].index, 0);
    assert!(verdict.inputscheck.errors[0]
        .reject
        .starts_with("mandatory-script-verify-flag-failed"));
}

#[test]
fn undersize_unsigned_tx_reports_both_errors() {
    let harness = funded(regtest_params(), strict_policy());
    let tx = unsigned(
        coinbase_outpoint(&harness, 0),
        vec![pay_to_miner(&harness, SUBSIDY - FEE)],
    );
    assert!(tx.serialized_size() < 100);

    let verdict = harness.node.validate_transaction(&tx).expect("evaluate");
    assert!(!verdict.minable);
    assert!(!verdict.inputscheck.valid);
    assert_eq!(verdict.errors.len(), 2);
    assert!(verdict.errors.iter().any(|code| code == "bad-txns-undersize"));
    assert!(verdict.errors.iter().any(|code| code == INPUT_SCRIPT_FAILED));
}

#[test]
fn non_minimal_push_fails_after_graviton() {
    let harness = funded(regtest_params(), strict_policy());
    let outpoint = coinbase_outpoint(&harness, 0);
    let tx = unsigned(outpoint, vec![pay_to_miner(&harness, SUBSIDY - FEE)]);
    let sig = creator(&harness, &tx, SUBSIDY, SignatureScheme::Ecdsa)
        .create_sig(&harness.secret, &harness.miner_script)
        .expect("signature");

    let mut non_minimal = tx.clone();
    let mut script_sig = vec![0x4c, sig.len() as u8];
    script_sig.extend_from_slice(&sig);
    push_data(&mut script_sig, &harness.pubkey);
    non_minimal.vin[0].script_sig = script_sig;

    let verdict = harness
        .node
        .validate_transaction(&non_minimal)
        .expect("evaluate");
    assert!(!verdict.minable);
    assert!(!verdict.inputscheck.valid);
    assert_eq!(verdict.errors, vec![INPUT_SCRIPT_FAILED.to_string()]);
    assert_eq!(
        verdict.inputscheck.errors[0].failure,
        InputFailure::Invalid(ScriptError::MinimalData)
    );

    let mut minimal = tx;
    minimal.vin[0].script_sig = script_of(&[&sig, &harness.pubkey]);
    let verdict = harness.node.validate_transaction(&minimal).expect("evaluate");
    assert!(verdict.minable, "{verdict:?}");
    assert!(verdict.errors.is_empty());
    assert!(verdict.inputscheck.errors.is_empty());
}

#[test]
fn non_minimal_push_is_only_non_standard_before_graviton() {
    let harness = funded(pre_graviton_params(), strict_policy());
    let tx = unsigned(
        coinbase_outpoint(&harness, 0),
        vec![pay_to_miner(&harness, SUBSIDY - FEE)],
    );
    let sig = creator(&harness, &tx, SUBSIDY, SignatureScheme::Ecdsa)
        .create_sig(&harness.secret, &harness.miner_script)
        .expect("signature");
    let mut tx = tx;
    let mut script_sig = vec![0x4c, sig.len() as u8];
    script_sig.extend_from_slice(&sig);
    push_data(&mut script_sig, &harness.pubkey);
    tx.vin[0].script_sig = script_sig;

    let verdict = harness.node.validate_transaction(&tx).expect("evaluate");
    assert!(!verdict.inputscheck.valid);
    assert_eq!(
        verdict.inputscheck.errors[0].failure,
        InputFailure::NonStandard(ScriptError::MinimalData)
    );
    assert!(verdict.inputscheck.errors[0]
        .reject
        .starts_with("non-mandatory-script-verify-flag"));
}

#[test]
fn schnorr_single_sig_is_minable() {
    let harness = funded(regtest_params(), strict_policy());
    let tx = spend_coinbase(&harness, 0, SignatureScheme::Schnorr);
    assert_eq!(tx.vin[0].script_sig[0], 65, "schnorr signature plus sighash byte");

    let verdict = harness.node.validate_transaction(&tx).expect("evaluate");
    assert!(verdict.minable, "{verdict:?}");
    assert!(verdict.errors.is_empty());
}

#[test]
fn schnorr_signature_in_legacy_multisig_fails() {
    let harness = funded(pre_graviton_params(), strict_policy());
    let multisig = multisig_script(1, &[harness.pubkey.clone()]);
    let funding = fund_script(&harness, 0, multisig.clone(), SUBSIDY - FEE);

    let mut tx = unsigned(funding, vec![pay_to_miner(&harness, SUBSIDY - 2 * FEE)]);
    let sig = creator(&harness, &tx, SUBSIDY - FEE, SignatureScheme::Schnorr)
        .create_sig(&harness.secret, &multisig)
        .expect("signature");
    let mut script_sig = vec![OP_0];
    push_data(&mut script_sig, &sig);
    tx.vin[0].script_sig = script_sig;

    let verdict = harness.node.validate_transaction(&tx).expect("evaluate");
    assert!(!verdict.minable);
    assert!(!verdict.inputscheck.valid);
    assert_eq!(verdict.errors, vec![INPUT_SCRIPT_FAILED.to_string()]);
    assert!(verdict.inputscheck.errors[0].failure.is_invalid());
}

#[test]
fn schnorr_multisig_bitfield_dummy_after_graviton() {
    let harness = funded(regtest_params(), strict_policy());
    let multisig = multisig_script(1, &[harness.pubkey.clone()]);
    let funding = fund_script(&harness, 0, multisig.clone(), SUBSIDY - FEE);

    let tx = unsigned(funding, vec![pay_to_miner(&harness, SUBSIDY - 2 * FEE)]);
    let sig = creator(&harness, &tx, SUBSIDY - FEE, SignatureScheme::Schnorr)
        .create_sig(&harness.secret, &multisig)
        .expect("signature");
    let with_dummy = |dummy: u8| {
        let mut spend = tx.clone();
        let mut script_sig = vec![dummy];
        push_data(&mut script_sig, &sig);
        spend.vin[0].script_sig = script_sig;
        harness.node.validate_transaction(&spend).expect("evaluate")
    };

    let passing = with_dummy(OP_1);
    assert!(passing.minable, "{passing:?}");
    assert!(passing.inputscheck.valid);

    for dummy in [OP_0, OP_2] {
        let verdict = with_dummy(dummy);
        assert!(!verdict.minable);
        assert!(!verdict.inputscheck.valid);
        assert_eq!(verdict.errors, vec![INPUT_SCRIPT_FAILED.to_string()]);
    }
}

#[test]
fn segwit_recovery_is_non_standard_on_every_policy() {
    for policy in [permissive_policy(), strict_policy()] {
        let harness = funded(regtest_params(), policy);
        let mut witness_program = vec![OP_0, 0x14];
        witness_program.extend_from_slice(&[0x99; 20]);
        let script_pubkey = p2sh_script(&hash160(&witness_program));
        let funding = fund_script(&harness, 0, script_pubkey, SUBSIDY - FEE);

        let mut tx = unsigned(funding, vec![pay_to_miner(&harness, SUBSIDY - 2 * FEE)]);
        tx.vin[0].script_sig = script_of(&[&witness_program]);

        let verdict = harness.node.validate_transaction(&tx).expect("evaluate");
        assert!(!verdict.minable);
        assert!(!verdict.inputscheck.valid);
        assert_eq!(verdict.errors, vec![INPUT_SCRIPT_FAILED.to_string()]);
        assert_eq!(verdict.inputscheck.errors.len(), 1);
        assert!(!verdict.inputscheck.errors[0].failure.is_invalid());
    }
}

/// Funds one P2SH output per redeem script from the coinbase at `height`, then spends them
/// all in one transaction whose scriptSigs push only the redeem script.
fn recovery_pair(harness: &Harness, height: i32, redeem_scripts: &[Vec<u8>]) -> (Transaction, Transaction) {
    let amount = (SUBSIDY - 1_000) / redeem_scripts.len() as i64;
    let mut funding = unsigned(
        coinbase_outpoint(harness, height),
        redeem_scripts
            .iter()
            .map(|redeem| TxOut {
                value: amount,
                script_pubkey: p2sh_script(&hash160(redeem)),
            })
            .collect(),
    );
    let miner_script = harness.miner_script.clone();
    sign_input(harness, &mut funding, &miner_script, SUBSIDY, SignatureScheme::Ecdsa);

    let funding_txid = funding.txid();
    let spend = Transaction {
        version: 2,
        vin: redeem_scripts
            .iter()
            .enumerate()
            .map(|(index, redeem)| {
                TxIn::new(OutPoint::new(funding_txid, index as u32), script_of(&[redeem.as_slice()]))
            })
            .collect(),
        vout: vec![TxOut {
            value: SUBSIDY - 2_000,
            script_pubkey: p2sh_script(&hash160(&[OP_1])),
        }],
        lock_time: 0,
    };
    (funding, spend)
}

#[test]
fn two_input_segwit_recovery_reports_one_script_failure() {
    let fixtures = [
        vec![
            unhex("0014fcf9969ce1c98a135ed293719721fb69f0b686cb"),
            unhex("0020fc8b08ed636cb23afcb425ff260b3abd03380a2333b54cfa5d51ac52d803baf4"),
        ],
        vec![unhex("51020000"), unhex("53020080")],
    ];
    for policy in [permissive_policy(), strict_policy()] {
        let harness = funded(regtest_params(), policy);
        for (height, redeem_scripts) in fixtures.iter().enumerate() {
            let (funding, spend) = recovery_pair(&harness, height as i32, redeem_scripts);

            let verdict = harness.node.validate_transaction(&funding).expect("evaluate");
            assert!(verdict.minable, "{verdict:?}");
            assert!(verdict.errors.is_empty());
            mine(&harness, vec![funding]);

            let verdict = harness.node.validate_transaction(&spend).expect("evaluate");
            assert!(!verdict.minable);
            assert!(!verdict.inputscheck.valid);
            assert!(verdict.enough_fee());
            assert_eq!(verdict.errors, vec![INPUT_SCRIPT_FAILED.to_string()]);
            assert_eq!(verdict.inputscheck.errors.len(), 2);
            for (index, error) in verdict.inputscheck.errors.iter().enumerate() {
                assert_eq!(error.index, index as u32);
                assert!(!error.failure.is_invalid(), "{error:?}");
            }
        }
    }
}

#[test]
fn output_claimed_by_mempool_is_not_a_valid_input() {
    let harness = funded(regtest_params(), strict_policy());
    let first = spend_coinbase(&harness, 0, SignatureScheme::Ecdsa);
    harness.node.accept_transaction(first.clone()).expect("accept");

    let mut second = unsigned(
        first.vin[0].prevout.clone(),
        vec![pay_to_miner(&harness, SUBSIDY - 2 * FEE)],
    );
    let miner_script = harness.miner_script.clone();
    sign_input(&harness, &mut second, &miner_script, SUBSIDY, SignatureScheme::Ecdsa);

    let verdict = harness.node.validate_transaction(&second).expect("evaluate");
    assert!(!verdict.minable);
    assert!(!verdict.inputscheck.valid);
    assert!(verdict.inputscheck.errors.is_empty());
    assert_eq!(verdict.errors, vec!["txn-mempool-conflict".to_string()]);

    // The transaction already holding the output still validates.
    let verdict = harness.node.validate_transaction(&first).expect("evaluate");
    assert!(verdict.inputscheck.valid);
    assert!(verdict.minable, "{verdict:?}");
}

#[test]
fn missing_and_immature_inputs() {
    let harness = funded(regtest_params(), strict_policy());

    let tip_height = harness
        .node
        .chain()
        .best_block()
        .expect("tip")
        .expect("some tip")
        .height;
    let immature = spend_coinbase(&harness, tip_height, SignatureScheme::Ecdsa);
    let verdict = harness
        .node
        .validate_transaction(&immature)
        .expect("evaluate");
    assert!(!verdict.minable);
    assert!(verdict
        .errors
        .iter()
        .any(|code| code == "bad-txns-premature-spend-of-coinbase"));

    let mut missing = spend_coinbase(&harness, 0, SignatureScheme::Ecdsa);
    missing.vin[0].prevout.index = 7;
    let verdict = harness.node.validate_transaction(&missing).expect("evaluate");
    assert!(!verdict.inputscheck.valid);
    assert!(verdict.inputscheck.errors.is_empty());
    assert_eq!(verdict.errors, vec!["bad-txns-inputs-missingorspent".to_string()]);
}

#[test]
fn validation_leaves_mempool_and_index_untouched() {
    let harness = funded(regtest_params(), strict_policy());
    let tx = spend_coinbase(&harness, 0, SignatureScheme::Ecdsa);
    let outpoint = tx.vin[0].prevout.clone();

    harness.node.validate_transaction(&tx).expect("evaluate");
    assert_eq!(harness.node.mempool().expect("mempool").size(), 0);
    assert!(harness
        .node
        .chain()
        .lookup_spend(&outpoint)
        .expect("lookup")
        .is_none());

    // Spending an output held by an unconfirmed transaction resolves through the mempool.
    let parent_txid = harness.node.accept_transaction(tx).expect("accept");
    let mut child = unsigned(
        OutPoint::new(parent_txid, 0),
        vec![TxOut {
            value: SUBSIDY - 2 * FEE,
            script_pubkey: harness.miner_script.clone(),
        }],
    );
    let miner_script = harness.miner_script.clone();
    sign_input(&harness, &mut child, &miner_script, SUBSIDY - FEE, SignatureScheme::Ecdsa);
    let verdict = harness.node.validate_transaction(&child).expect("evaluate");
    assert!(verdict.minable, "{verdict:?}");
    assert_eq!(verdict.txfee, FEE);
}
