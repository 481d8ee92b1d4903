// Copyright (c) 2020-2021 MobileCoin Inc.

//! cardano-cli command rendering, shared between the subprocess ledger
//! client and the script emitter.

use crate::models::{InputUtxo, PaymentDetail};

/// `--tx-in hash#index ` fragment for each input.
pub fn tx_in_args(inputs: &[InputUtxo]) -> String {
    inputs
        .iter()
        .map(|utxo| format!("--tx-in {}#{} ", utxo.tx_hash, utxo.tx_index))
        .collect()
}

/// `--tx-in` fragments for `count` placeholder inputs.
pub fn placeholder_tx_in_args(count: usize) -> String {
    format!(
        "--tx-in {}#1 ",
        crate::models::PLACEHOLDER_TX_HASH
    )
    .repeat(count)
}

/// `--tx-out address+amount ` fragment for each output. Draft builds render
/// every amount as zero.
pub fn tx_out_args(outputs: &[PaymentDetail], is_draft: bool) -> String {
    outputs
        .iter()
        .map(|detail| {
            let amount = if is_draft { 0 } else { detail.amount };
            format!("--tx-out {}+{} ", detail.address, amount)
        })
        .collect()
}

/// `--tx-out` fragments for `count` placeholder outputs.
pub fn placeholder_tx_out_args(count: usize, placeholder_address: &str) -> String {
    format!("--tx-out {}+0 ", placeholder_address).repeat(count)
}

pub fn transaction_build(
    prefix: &str,
    tx_in_details: &str,
    tx_out_details: &str,
    extra_details: &str,
    tx_filename: &str,
) -> String {
    format!(
        "{prefix}cardano-cli transaction build-raw {tx_in_details}{tx_out_details}{extra_details}--out-file {tx_filename}",
        prefix = prefix,
        tx_in_details = tx_in_details,
        tx_out_details = tx_out_details,
        extra_details = extra_details,
        tx_filename = tx_filename,
    )
}

pub fn transaction_fee(
    prefix: &str,
    draft_file: &str,
    num_input: usize,
    num_output: usize,
    network: &str,
    protocol_file: &str,
    num_witness: usize,
) -> String {
    format!(
        "{prefix}cardano-cli transaction calculate-min-fee --tx-body-file {draft_file} \
         --tx-in-count {num_input} --tx-out-count {num_output} {network} \
         --protocol-params-file {protocol_file} --witness-count {num_witness}",
        prefix = prefix,
        draft_file = draft_file,
        num_input = num_input,
        num_output = num_output,
        network = network,
        protocol_file = protocol_file,
        num_witness = num_witness,
    )
}

pub fn transaction_sign(
    prefix: &str,
    raw_file: &str,
    signing_key_file_details: &str,
    network: &str,
    signed_file: &str,
) -> String {
    format!(
        "{prefix}cardano-cli transaction sign --tx-body-file {raw_file} {signing_key_file_details} {network} --out-file {signed_file}",
        prefix = prefix,
        raw_file = raw_file,
        signing_key_file_details = signing_key_file_details,
        network = network,
        signed_file = signed_file,
    )
}

pub fn transaction_submit(prefix: &str, signed_file: &str, network: &str) -> String {
    format!(
        "{prefix}cardano-cli transaction submit --tx-file {signed_file} {network}",
        prefix = prefix,
        signed_file = signed_file,
        network = network,
    )
}

pub fn transaction_txid(prefix: &str, transaction_file: &str) -> String {
    format!(
        "{prefix}cardano-cli transaction txid --tx-file {transaction_file}",
        prefix = prefix,
        transaction_file = transaction_file,
    )
}

pub fn query_protocol_parameters(prefix: &str, network: &str) -> String {
    format!(
        "{prefix}cardano-cli query protocol-parameters {network}",
        prefix = prefix,
        network = network,
    )
}

pub fn query_protocol_parameters_with_file(
    prefix: &str,
    network: &str,
    protocol_filename: &str,
) -> String {
    format!(
        "{} --out-file {}",
        query_protocol_parameters(prefix, network),
        protocol_filename,
    )
}

pub fn query_tip(prefix: &str, network: &str) -> String {
    format!(
        "{prefix}cardano-cli query tip {network}",
        prefix = prefix,
        network = network,
    )
}

pub fn query_wallet_utxo(prefix: &str, address: &str, network: &str) -> String {
    format!(
        "{prefix}cardano-cli query utxo --address {address} {network}",
        prefix = prefix,
        address = address,
        network = network,
    )
}

pub fn query_wallet_utxo_with_file(
    prefix: &str,
    address: &str,
    network: &str,
    utxo_filename: &str,
) -> String {
    format!(
        "{} --out-file {}",
        query_wallet_utxo(prefix, address, network),
        utxo_filename,
    )
}

pub fn query_wallet_utxo_via_txid(
    prefix: &str,
    tx_hash: &str,
    tx_index: &str,
    network: &str,
) -> String {
    format!(
        "{prefix}cardano-cli query utxo --tx-in {tx_hash}#{tx_index} {network}",
        prefix = prefix,
        tx_hash = tx_hash,
        tx_index = tx_index,
        network = network,
    )
}

pub fn stake_rewards(prefix: &str, address: &str, network: &str) -> String {
    format!(
        "{prefix}cardano-cli query stake-address-info --address {address} {network}",
        prefix = prefix,
        address = address,
        network = network,
    )
}

pub fn read_file(prefix: &str, filename: &str) -> String {
    format!("{}cat {}", prefix, filename)
}

pub fn delete_file(prefix: &str, filename: &str) -> String {
    format!("{}rm {}", prefix, filename)
}

/// Stages a file into the docker container by piping its contents through
/// the shell, so host-only files (signing keys, metadata) are reachable by
/// the containerized cli.
pub fn copy_file_into_docker(prefix: &str, source_filename: &str, filename: &str) -> String {
    format!(
        "sk=$(cat {source_filename}) && {prefix}/bin/bash -c \"echo '$sk' > {filename}\" && unset sk",
        source_filename = source_filename,
        prefix = prefix,
        filename = filename,
    )
}

pub fn inspect_address(full_address: &str) -> String {
    format!(
        "echo '{}' | cardano-address address inspect",
        full_address
    )
}

pub fn inspect_address_docker(prefix: &str, full_address: &str) -> String {
    format!("{}sh -c \"{}\"", prefix, inspect_address(full_address))
}

pub fn stake_address_convert(stake_prefix: &str, stake_hash: &str) -> String {
    format!("bech32 {} <<< {}", stake_prefix, stake_hash)
}

pub fn stake_address_convert_docker(prefix: &str, stake_prefix: &str, stake_hash: &str) -> String {
    format!(
        "{}sh -c \"{}\"",
        prefix,
        stake_address_convert(stake_prefix, stake_hash)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PLACEHOLDER_TX_HASH;

    #[test]
    fn build_command_renders_inputs_and_outputs() {
        let inputs = vec![InputUtxo {
            address: "addr_test_source".to_string(),
            tx_hash: "ab".repeat(32),
            tx_index: 3,
            amount: 5_000,
            dust_collected_utxo: false,
        }];
        let outputs = vec![PaymentDetail {
            address: "addr_test_recipient".to_string(),
            amount: 4_000,
        }];
        let command = transaction_build(
            "docker exec node ",
            &tx_in_args(&inputs),
            &tx_out_args(&outputs, false),
            "--fee 100 --invalid-hereafter 42 ",
            "test.raw",
        );
        assert!(command.starts_with("docker exec node cardano-cli transaction build-raw"));
        assert!(command.contains(&format!("--tx-in {}#3", "ab".repeat(32))));
        assert!(command.contains("--tx-out addr_test_recipient+4000"));
        assert!(command.contains("--fee 100 --invalid-hereafter 42"));
        assert!(command.ends_with("--out-file test.raw"));
    }

    #[test]
    fn draft_outputs_render_zero_amounts() {
        let outputs = vec![PaymentDetail {
            address: "addr_test_recipient".to_string(),
            amount: 4_000,
        }];
        assert_eq!(
            tx_out_args(&outputs, true),
            "--tx-out addr_test_recipient+0 "
        );
    }

    #[test]
    fn placeholder_inputs_use_null_hash() {
        let args = placeholder_tx_in_args(2);
        assert_eq!(args.matches(PLACEHOLDER_TX_HASH).count(), 2);
    }
}
