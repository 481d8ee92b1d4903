// Copyright (c) 2020-2021 MobileCoin Inc.

//! Script emitter.
//!
//! Renders a transaction plan into an idempotent bash submission script.
//! Which steps each sub-transaction gets depends on its recorded status:
//! not-yet-submitted and expired transactions are built, signed, submitted
//! and polled; in-flight ones are only polled with their recorded id; done
//! ones contribute nothing but their id. The script persists every status
//! transition back into the plan file by calling this binary's
//! `update-plan` subcommand, and reads the chain tip through `chain-tip`,
//! so a killed run resumes exactly where it stopped.

use crate::{
    ledger::{commands, LedgerClient, LedgerClientError},
    models::{InputUtxo, PreparationDetail, TransactionPlan},
    service::PaymentsService,
};
use displaydoc::Display;
use itertools::Itertools;
use std::{collections::BTreeMap, fs, io, path::PathBuf};

#[derive(Display, Debug)]
pub enum EmitterError {
    /// Error fetching latest slot number: {0}
    ChainTip(LedgerClientError),

    /// No signing keys known for address {0}
    UnknownSourceAddress(String),

    /// Error writing script file {path:?}: {source}
    FileAccess { path: PathBuf, source: io::Error },
}

pub trait ScriptEmitterService {
    /// Renders the submission script for `plan`.
    fn generate_bash_script(
        &self,
        plan: &TransactionPlan,
        add_comments: bool,
    ) -> Result<String, EmitterError>;

    /// Renders and stores the submission script as `<uuid>.sh`, returning
    /// the filename.
    fn write_bash_script(
        &self,
        plan: &TransactionPlan,
        add_comments: bool,
    ) -> Result<String, EmitterError>;
}

fn bash_comment(lines: &mut Vec<String>, comment: &str) {
    lines.push("\n# ===================================================".to_string());
    lines.push(format!("# {}", comment));
    lines.push("# ===================================================".to_string());
}

/// Commands prepared for one dust consolidation batch.
struct DustBatchCommands {
    create_command: String,
    sign_command: String,
    signed_filename: String,
    txid_command: String,
    txid_variable: String,
    requires_build: bool,
    requires_submission: bool,
    straight_to_poll: bool,
}

impl<L: LedgerClient> PaymentsService<L> {
    fn emitter_prefix(&self) -> String {
        self.context.settings.command_prefix(self.context.method)
    }

    fn emitter_network_flag(&self) -> String {
        self.context.settings.network_flag(self.context.network)
    }

    /// Path a signing key or metadata file is addressed by inside the
    /// generated commands; the docker method stages host files into /tmp.
    fn staged_path(&self, file: &str) -> String {
        match self.context.method {
            crate::config::ScriptMethod::DockerCli => {
                let basename = file.rsplit('/').next().unwrap_or(file);
                format!("/tmp/{}", basename)
            }
            crate::config::ScriptMethod::HostCli => file.to_string(),
        }
    }

    fn signing_key_parameters(&self, addresses: &[&str]) -> Result<String, EmitterError> {
        let mut parameters = Vec::new();
        for address in addresses.iter().unique() {
            let keys = self
                .context
                .source_details
                .get(*address)
                .ok_or_else(|| EmitterError::UnknownSourceAddress(address.to_string()))?;
            for key in keys {
                parameters.push(format!("--signing-key-file {}", self.staged_path(key)));
            }
        }
        Ok(parameters.into_iter().unique().join(" "))
    }

    /// Renders one dust batch's build/sign/txid commands. Chained inputs
    /// reference the previous batch's runtime txid variable since the hash
    /// is unknown until that transaction exists.
    fn dust_batch_commands(
        &self,
        plan: &TransactionPlan,
        target_address: &str,
        batch_index: usize,
        batch: &PreparationDetail,
        ttl: u64,
        metadata_file: Option<&str>,
    ) -> Result<DustBatchCommands, EmitterError> {
        let prefix = self.emitter_prefix();
        let network_flag = self.emitter_network_flag();
        let txid_variable = format!("txid_{}_dust_{}_{}", plan.uuid, target_address, batch_index);
        let batch_filename = format!("{}_dust_{}_{}", plan.uuid, target_address, batch_index);

        let mut inputs = batch.prep_input.clone();
        for input in &mut inputs {
            if input.dust_collected_utxo {
                input.tx_hash = format!(
                    "$txid_{}_dust_{}_{}",
                    plan.uuid,
                    target_address,
                    batch_index - 1
                );
            }
        }
        let input_total: u64 = inputs.iter().map(|input| input.amount).sum();
        let fee = input_total - batch.prep_output[0].amount;

        let mut extra_details = format!("--fee {} --invalid-hereafter {} ", fee, ttl);
        if let Some(metadata_file) = metadata_file {
            extra_details.push_str(&format!("--metadata-json-file {} ", metadata_file));
        }
        let create_command = commands::transaction_build(
            &prefix,
            &commands::tx_in_args(&inputs),
            &commands::tx_out_args(&batch.prep_output, false),
            &extra_details,
            &format!("{}.raw", batch_filename),
        );

        let input_addresses: Vec<&str> =
            inputs.iter().map(|input| input.address.as_str()).collect();
        let sign_command = commands::transaction_sign(
            &prefix,
            &format!("{}.raw", batch_filename),
            &self.signing_key_parameters(&input_addresses)?,
            &network_flag,
            &format!("{}.signed", batch_filename),
        );

        let requires_build = batch.submission_status.requires_build();
        let txid_command = if requires_build {
            format!(
                "{}=$({})",
                txid_variable,
                commands::transaction_txid(&prefix, &format!("{}.signed", batch_filename))
            )
        } else {
            format!("{}=\"{}\"", txid_variable, batch.tx_hash_id)
        };

        Ok(DustBatchCommands {
            create_command,
            sign_command,
            signed_filename: format!("{}.signed", batch_filename),
            txid_command,
            txid_variable,
            requires_build,
            requires_submission: !batch.submission_status.is_terminal(),
            straight_to_poll: batch.submission_status.requires_poll_only(),
        })
    }
}

impl<L: LedgerClient> ScriptEmitterService for PaymentsService<L> {
    fn generate_bash_script(
        &self,
        plan: &TransactionPlan,
        add_comments: bool,
    ) -> Result<String, EmitterError> {
        let prefix = self.emitter_prefix();
        let network_flag = self.emitter_network_flag();
        let source_address = &self.context.source_address;
        let is_docker = self.context.method == crate::config::ScriptMethod::DockerCli;

        let ttl = self
            .ledger
            .chain_tip_slot(self.context.network)
            .map_err(EmitterError::ChainTip)?
            + plan.allowed_ttl_slots;

        let metadata_file = self
            .context
            .metadata_file
            .as_ref()
            .map(|file| self.staged_path(file));
        let metadata_file = metadata_file.as_deref();

        let mut script = vec![
            "#!/bin/bash".to_string(),
            String::new(),
            "masspayments_exec=\"${MASS_PAYMENTS_BIN:-mass-payments}\"".to_string(),
        ];
        let update_plan_base = format!(
            "$masspayments_exec update-plan --plan-file {}",
            plan.filename
        );

        // Stage host-side files into the docker container.
        let mut docker_cleanup: Vec<String> = Vec::new();
        if is_docker {
            let mut staging: Vec<String> = Vec::new();
            for keys in self.context.source_details.values() {
                for key in keys {
                    staging.push(commands::copy_file_into_docker(
                        &prefix,
                        key,
                        &self.staged_path(key),
                    ));
                    docker_cleanup.push(commands::delete_file(&prefix, &self.staged_path(key)));
                }
            }
            if let Some(original) = &self.context.metadata_file {
                staging.push(commands::copy_file_into_docker(
                    &prefix,
                    original,
                    &self.staged_path(original),
                ));
                docker_cleanup.push(commands::delete_file(&prefix, &self.staged_path(original)));
            }
            if !staging.is_empty() {
                if add_comments {
                    bash_comment(&mut script, "Stage signing key and metadata files in docker");
                }
                script.extend(staging.into_iter().unique());
                docker_cleanup = docker_cleanup.into_iter().unique().collect();
            }
        }

        // Dust batch commands, per target address in deterministic order.
        let mut dust_commands: BTreeMap<String, Vec<DustBatchCommands>> = BTreeMap::new();
        for (target_address, batches) in &plan.dust_group_details {
            let mut batch_commands = Vec::new();
            for (batch_index, batch) in batches.iter().enumerate() {
                batch_commands.push(self.dust_batch_commands(
                    plan,
                    target_address,
                    batch_index,
                    batch,
                    ttl,
                    metadata_file,
                )?);
            }
            dust_commands.insert(target_address.clone(), batch_commands);
        }

        // Preparation inputs, with pending dust aggregates resolved to the
        // tail txid variable of their address's chain.
        let mut prep_inputs: Vec<InputUtxo> = plan.prep_detail.prep_input.clone();
        for input in &mut prep_inputs {
            if input.dust_collected_utxo {
                let latest_order = plan
                    .dust_group_details
                    .get(&input.address)
                    .map(|batches| batches.len().saturating_sub(1))
                    .unwrap_or(0);
                input.tx_hash =
                    format!("$txid_{}_dust_{}_{}", plan.uuid, input.address, latest_order);
            }
        }
        let num_witness = prep_inputs
            .iter()
            .map(|input| input.address.as_str())
            .unique()
            .count();

        let prep_status = plan.prep_detail.submission_status;
        let prep_signed_filename = format!("{}_prep.signed", plan.uuid);
        let protocol_filename = match self.context.network {
            crate::config::Network::Mainnet => "mainnet-protocol.json",
            crate::config::Network::Testnet => "testnet-protocol.json",
        };

        if prep_status.requires_build() {
            // Dust transactions are built and signed first; their ids feed
            // the preparation inputs.
            if !dust_commands.is_empty() {
                if add_comments {
                    bash_comment(&mut script, "Create and sign dust transactions");
                }
                script.push("echo \"Creating and Signing Dust Transaction Raw Files\"".to_string());
                for batch_commands in dust_commands.values() {
                    for batch in batch_commands {
                        if batch.requires_build {
                            script.push(batch.create_command.clone());
                            script.push(batch.sign_command.clone());
                        }
                        script.push(batch.txid_command.clone());
                    }
                }
            }

            if add_comments {
                bash_comment(&mut script, "Create the preparation transaction draft");
            }
            let prep_draft_filename = format!("{}_prep.draft", plan.uuid);
            let mut draft_extra = String::new();
            if let Some(reward) = &plan.prep_detail.reward_details {
                draft_extra.push_str(&format!("--withdrawal {}+0 ", reward.stake_address));
            }
            draft_extra.push_str("--fee 0 --invalid-hereafter 0 ");
            if let Some(metadata_file) = metadata_file {
                draft_extra.push_str(&format!("--metadata-json-file {} ", metadata_file));
            }
            script.push(commands::transaction_build(
                &prefix,
                &commands::tx_in_args(&prep_inputs),
                &commands::tx_out_args(&plan.prep_detail.prep_output, true),
                &draft_extra,
                &prep_draft_filename,
            ));

            if add_comments {
                bash_comment(&mut script, "Find the preparation transaction fee");
            }
            script.push(commands::query_protocol_parameters_with_file(
                &prefix,
                &network_flag,
                protocol_filename,
            ));
            script.push(format!(
                "prep_fee=$({})",
                commands::transaction_fee(
                    &prefix,
                    &prep_draft_filename,
                    prep_inputs.len(),
                    plan.prep_detail.prep_output.len(),
                    &network_flag,
                    protocol_filename,
                    num_witness,
                )
            ));
            // The fee response reads `<fee> Lovelace`.
            script.push("prep_fee=$(echo ${prep_fee// Lovelace/})".to_string());

            let delta = plan.prep_detail.input_total() - plan.prep_detail.output_total();
            let prep_fee_argument = if plan.add_change_to_fee {
                script.push(format!(
                    "echo \"Preparation transaction change, amounting to $(({} - prep_fee)) Lovelace, \
will be added to the preparation fee making the total fee {} Lovelace\"",
                    delta, delta
                ));
                delta.to_string()
            } else {
                "$prep_fee".to_string()
            };

            let mut raw_outputs =
                commands::tx_out_args(&plan.prep_detail.prep_output, false);
            if !plan.add_change_to_fee {
                // Change amount depends on the fee, which only exists at
                // run time; leave it as shell arithmetic.
                raw_outputs.push_str(&format!(
                    "--tx-out {}+$(({}-prep_fee)) ",
                    source_address, delta
                ));
            }
            let mut raw_extra = String::new();
            if let Some(reward) = &plan.prep_detail.reward_details {
                raw_extra.push_str(&format!(
                    "--withdrawal {}+{} ",
                    reward.stake_address, reward.stake_amount
                ));
            }
            raw_extra.push_str(&format!(
                "--fee {} --invalid-hereafter {} ",
                prep_fee_argument, ttl
            ));
            if let Some(metadata_file) = metadata_file {
                raw_extra.push_str(&format!("--metadata-json-file {} ", metadata_file));
            }
            if add_comments {
                bash_comment(&mut script, "Create and sign the preparation transaction");
            }
            let prep_raw_filename = format!("{}_prep.raw", plan.uuid);
            script.push(commands::transaction_build(
                &prefix,
                &commands::tx_in_args(&prep_inputs),
                &raw_outputs,
                &raw_extra,
                &prep_raw_filename,
            ));

            let prep_input_addresses: Vec<&str> = prep_inputs
                .iter()
                .map(|input| input.address.as_str())
                .collect();
            script.push(commands::transaction_sign(
                &prefix,
                &prep_raw_filename,
                &self.signing_key_parameters(&prep_input_addresses)?,
                &network_flag,
                &prep_signed_filename,
            ));
            script.push(format!(
                "prep_txid=$({})",
                commands::transaction_txid(&prefix, &prep_signed_filename)
            ));
        } else {
            if add_comments {
                bash_comment(&mut script, "Preparation transaction already submitted");
            }
            script.push(format!("prep_txid=\"{}\"", plan.prep_detail.tx_hash_id));
        }

        // Group transactions that still need to be built.
        let group_signing_parameters = self.signing_key_parameters(&[source_address.as_str()])?;
        let mut group_raw_commands = Vec::new();
        let mut group_sign_commands = Vec::new();
        let mut group_submit_commands = Vec::new();
        let mut group_ongoing_commands = Vec::new();
        let mut group_poll_indexes = Vec::new();
        for group in &plan.group_details {
            if group.submission_status.is_terminal() {
                continue;
            }
            let group_raw_filename = format!("{}_{}.raw", plan.uuid, group.index);
            let group_signed_filename = format!("{}_{}.signed", plan.uuid, group.index);
            if group.submission_status.requires_build() {
                group_raw_commands.push(commands::transaction_build(
                    &prefix,
                    &format!("--tx-in $(echo $prep_txid)#{} ", group.index),
                    &commands::tx_out_args(&group.payment_details, false),
                    &{
                        let mut extra =
                            format!("--fee {} --invalid-hereafter {} ", group.fee, ttl);
                        if let Some(metadata_file) = metadata_file {
                            extra.push_str(&format!("--metadata-json-file {} ", metadata_file));
                        }
                        extra
                    },
                    &group_raw_filename,
                ));
                group_sign_commands.push(commands::transaction_sign(
                    &prefix,
                    &group_raw_filename,
                    &group_signing_parameters,
                    &network_flag,
                    &group_signed_filename,
                ));
                group_submit_commands.push(format!(
                    "group_{}_submit_result=$({})",
                    group.index,
                    commands::transaction_submit(&prefix, &group_signed_filename, &network_flag)
                ));
            }
            group_poll_indexes.push(group.index);
            group_ongoing_commands.push(format!(
                "group_{}_txid=$({})",
                group.index,
                commands::transaction_txid(&prefix, &group_signed_filename)
            ));
            group_ongoing_commands.push(format!(
                "set_group_tx_to_ongoing {} $group_{}_txid",
                group.index, group.index
            ));
        }

        if !group_raw_commands.is_empty() {
            if add_comments {
                bash_comment(&mut script, "Create and sign the group transactions");
            }
            script.push("echo \"Creating and Signing Group Transaction Raw Files\"".to_string());
            script.extend(group_raw_commands);
            script.extend(group_sign_commands);
        }

        if add_comments {
            bash_comment(&mut script, "Status strings and chain tip helper");
        }
        script.push(
            "success_str=\"\\033[1;32mSUCCESS\\033[0m\"\n\
             ongoing_str=\"\\033[1;33mONGOING\\033[0m\"\n\
             ttl_expired_str=\"\\033[1;31mTTL EXPIRED\\033[0m\""
                .to_string(),
        );
        let mut chain_tip_command = format!(
            "$masspayments_exec chain-tip --cardano-network {} --script-method {}",
            plan.network, plan.script_method
        );
        if self.context.network == crate::config::Network::Testnet {
            chain_tip_command.push_str(&format!(
                " --magic-number {}",
                self.context.settings.cardano_testnet_magic
            ));
        }
        script.push(format!(
            "get_latest_slot_no () {{\n    {}\n}}",
            chain_tip_command
        ));

        // Dust submission and polling.
        let any_dust_submission = dust_commands
            .values()
            .flatten()
            .any(|batch| batch.requires_submission);
        if any_dust_submission {
            if add_comments {
                bash_comment(&mut script, "Submit the dust transactions in chain order");
            }
            script.push("echo \"Submitting Dust Transactions to Cardano\"".to_string());
            script.push(format!(
                r#"dust_submit_function () {{
    straight_to_polling=${{5:-false}}
    if [[ $straight_to_polling == false ]] ; then
        dust_submit_result=$({submit_command})
    else
        dust_submit_result=true
    fi
    if [[ $dust_submit_result ]] ; then
        {update_plan} --dust-address $2 --dust-index $4 --status SUBMISSION_ONGOING --tx-id $3
        dust_results=$({utxo_query})
        dust_status=$ongoing_str
        until [[ $dust_results == *$3* ]] || [[ $dust_status != "$ongoing_str" ]]
        do
            dust_results=$({utxo_query})
            latest_slot=$(get_latest_slot_no)
            if (( $latest_slot > {ttl} )) ; then
                dust_status=$ttl_expired_str
                {update_plan} --dust-address $2 --dust-index $4 --status TTL_EXPIRED
            fi
        done
        if [[ $dust_status == "$ongoing_str" ]] ; then
            dust_status=$success_str
            {update_plan} --dust-address $2 --dust-index $4 --status SUBMISSION_DONE --tx-id $3
        fi
        echo -e "Status $3 = $dust_status"
        if [[ $dust_status != "$success_str" ]] ; then
            exit 1
        fi
    else
        echo "There was an error when the Dust Transaction was submitted to Cardano"
        exit 1
    fi
}}"#,
                submit_command = commands::transaction_submit(&prefix, "$1", &network_flag),
                utxo_query = commands::query_wallet_utxo(&prefix, "$2", &network_flag),
                update_plan = update_plan_base,
                ttl = ttl,
            ));
            for (target_address, batch_commands) in &dust_commands {
                for (batch_index, batch) in batch_commands.iter().enumerate() {
                    if batch.requires_submission {
                        script.push(format!(
                            "dust_submit_function {} {} ${} {} {}",
                            batch.signed_filename,
                            target_address,
                            batch.txid_variable,
                            batch_index,
                            batch.straight_to_poll,
                        ));
                    }
                }
            }
            script.push("echo \"Dust Transactions Submission Done\"".to_string());
        }

        // Preparation submission and polling.
        if !prep_status.is_terminal() {
            if add_comments {
                bash_comment(&mut script, "Submit the preparation transaction");
            }
            let prep_submit_command = if prep_status.requires_build() {
                commands::transaction_submit(&prefix, &prep_signed_filename, &network_flag)
            } else {
                "echo \"Preparation Transaction Submitted\"".to_string()
            };
            script.push(format!(
                r#"echo "Submitting Signed Preparation Transaction to Cardano"
prep_submit_result=$({submit_command})
if [[ $prep_submit_result ]] ; then
    {update_plan} --status SUBMISSION_ONGOING --tx-id $prep_txid
    utxo_results=$({utxo_query})
    prep_status=$ongoing_str
    until [[ $utxo_results == *$prep_txid* ]] || [[ $prep_status != "$ongoing_str" ]]
    do
        utxo_results=$({utxo_query})
        latest_slot=$(get_latest_slot_no)
        if (( $latest_slot > {ttl} )) ; then
            prep_status=$ttl_expired_str
            {update_plan} --status TTL_EXPIRED
        fi
    done
    if [[ $prep_status == "$ongoing_str" ]] ; then
        prep_status=$success_str
        {update_plan} --status SUBMISSION_DONE --tx-id $prep_txid
    fi
    echo -e "Status $prep_txid = $prep_status"
    if [[ $prep_status == "$success_str" ]] ; then
        echo "Preparation Transaction Submission Done"
    else
        exit 1
    fi
else
    echo "There was an error when the Preparation Transaction was submitted to Cardano"
    exit 1
fi"#,
                submit_command = prep_submit_command,
                utxo_query = commands::query_wallet_utxo(&prefix, source_address, &network_flag),
                update_plan = update_plan_base,
                ttl = ttl,
            ));
        }

        // Group submission and polling.
        if !group_poll_indexes.is_empty() {
            if add_comments {
                bash_comment(&mut script, "Submit the group transactions and wait");
            }
            script.push(format!(
                "set_group_tx_to_ongoing() {{\n    {} --group-index $1 --status SUBMISSION_ONGOING --tx-id $2\n}}",
                update_plan_base
            ));
            if !group_submit_commands.is_empty() {
                script.push(
                    "echo \"Submitting Signed Group Transactions to Cardano\"".to_string(),
                );
                script.extend(group_submit_commands);
            }
            script.extend(group_ongoing_commands);

            let status_array = vec!["$ongoing_str"; group_poll_indexes.len()].join(" ");
            let index_array = group_poll_indexes
                .iter()
                .map(|index| index.to_string())
                .join(" ");
            script.push(format!(
                r#"utxo_status_array=({status_array})
array_length=${{#utxo_status_array[@]}}
group_index_array=({index_array})
group_txid_array=()
for (( i=0; i<${{array_length}}; i++ ))
do
    group_index=${{group_index_array[$i]}}
    group_txid_array+=($({txid_query}))
done
while [[ " ${{utxo_status_array[*]}} " =~ " $ongoing_str " ]]
do
    latest_slot=$(get_latest_slot_no)
    for (( i=0; i<${{array_length}}; i++ ))
    do
        group_txid=${{group_txid_array[$i]}}
        group_index=${{group_index_array[$i]}}
        echo -e "Status $group_txid = ${{utxo_status_array[$i]}}"
        if [[ ${{utxo_status_array[$i]}} == "$ongoing_str" ]] ; then
            group_utxo_results=$({group_utxo_query})
            if [[ $group_utxo_results != *$prep_txid* ]] ; then
                utxo_status_array[$i]=$success_str
                {update_plan} --group-index $group_index --status SUBMISSION_DONE --tx-id $group_txid
            elif (( $latest_slot > {ttl} )) ; then
                utxo_status_array[$i]=$ttl_expired_str
                {update_plan} --group-index $group_index --status TTL_EXPIRED
            fi
        fi
    done
    sleep 1
done
echo "Group Transaction Submission Checking Done""#,
                status_array = status_array,
                index_array = index_array,
                txid_query = commands::transaction_txid(
                    &prefix,
                    &format!("{}_$group_index.signed", plan.uuid)
                ),
                group_utxo_query = commands::query_wallet_utxo_via_txid(
                    &prefix,
                    "$prep_txid",
                    "$group_index",
                    &network_flag
                ),
                update_plan = update_plan_base,
                ttl = ttl,
            ));
        }

        if !docker_cleanup.is_empty() {
            if add_comments {
                bash_comment(&mut script, "Remove the staged file copies from docker");
            }
            script.extend(docker_cleanup);
        }

        Ok(script.join("\n"))
    }

    fn write_bash_script(
        &self,
        plan: &TransactionPlan,
        add_comments: bool,
    ) -> Result<String, EmitterError> {
        let script = self.generate_bash_script(plan, add_comments)?;
        let script_filename = format!("{}.sh", plan.uuid);
        fs::write(&script_filename, script).map_err(|source| EmitterError::FileAccess {
            path: PathBuf::from(&script_filename),
            source,
        })?;
        Ok(script_filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{DustCollectionMethod, Network, ScriptMethod, Settings},
        models::{PaymentDetail, PaymentGroup, TransactionPlan, TransactionStatus},
        service::{PaymentsService, ServiceContext},
        test_utils::{test_logger, wallet_utxo, MockLedger, RECIPIENT_ADDRESS, SOURCE_ADDRESS},
    };

    fn service(method: ScriptMethod) -> PaymentsService<MockLedger> {
        let context = ServiceContext::new(
            Network::Testnet,
            method,
            Settings::default(),
            SOURCE_ADDRESS.to_string(),
            vec!["source.skey".to_string()],
        );
        PaymentsService::new(MockLedger::default(), context, test_logger())
    }

    fn group(index: usize, count: usize) -> PaymentGroup {
        PaymentGroup {
            index,
            payment_details: (0..count)
                .map(|_| PaymentDetail {
                    address: RECIPIENT_ADDRESS.to_string(),
                    amount: 1_000,
                })
                .collect(),
            amount: 1_000 * count as u64,
            fee: 100,
            tx_size: 500,
            submission_status: TransactionStatus::NotYetSubmitted,
            tx_hash_id: String::new(),
        }
    }

    fn sample_plan() -> TransactionPlan {
        let prep_detail = crate::models::PreparationDetail::new(
            vec![wallet_utxo(SOURCE_ADDRESS, 0, 10_000_000)],
            vec![
                PaymentDetail {
                    address: SOURCE_ADDRESS.to_string(),
                    amount: 2_100,
                },
                PaymentDetail {
                    address: SOURCE_ADDRESS.to_string(),
                    amount: 3_100,
                },
            ],
        );
        let mut plan = TransactionPlan::new(
            prep_detail,
            vec![group(0, 2), group(1, 3)],
            Network::Testnet,
            ScriptMethod::HostCli,
            1000,
            false,
            DustCollectionMethod::CollectToSource,
            10_000_000,
        );
        plan.source_details = vec![crate::models::SourceAddressDetail {
            address: SOURCE_ADDRESS.to_string(),
            signing_key_file: vec!["source.skey".to_string()],
            is_main_source_address: true,
        }];
        plan
    }

    #[test]
    fn fresh_plan_gets_the_full_pipeline() {
        let service = service(ScriptMethod::HostCli);
        let plan = sample_plan();
        let script = service.generate_bash_script(&plan, false).unwrap();

        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains(&format!("{}_prep.draft", plan.uuid)));
        assert!(script.contains("cardano-cli transaction sign"));
        assert!(script.contains("cardano-cli transaction submit"));
        assert!(script.contains(&format!("update-plan --plan-file {}", plan.filename)));
        assert!(script.contains("chain-tip --cardano-network TESTNET"));
        // Group inputs reference the runtime preparation txid.
        assert!(script.contains("--tx-in $(echo $prep_txid)#0"));
        assert!(script.contains("--tx-in $(echo $prep_txid)#1"));
        // TTL is chain tip plus the allowed slots.
        assert!(script.contains(&format!("{}", 12_345 + 1_000)));
    }

    #[test]
    fn change_output_uses_runtime_fee_arithmetic() {
        let service = service(ScriptMethod::HostCli);
        let plan = sample_plan();
        let script = service.generate_bash_script(&plan, false).unwrap();
        // delta = 10_000_000 - 5_200.
        assert!(script.contains(&format!(
            "--tx-out {}+$(({}-prep_fee))",
            SOURCE_ADDRESS,
            10_000_000 - 5_200
        )));
    }

    #[test]
    fn folded_change_becomes_a_literal_fee() {
        let service = service(ScriptMethod::HostCli);
        let mut plan = sample_plan();
        plan.add_change_to_fee = true;
        let script = service.generate_bash_script(&plan, false).unwrap();
        assert!(script.contains("will be added to the preparation fee"));
        assert!(!script.contains("-prep_fee))"));
        assert!(script.contains(&format!("--fee {} ", 10_000_000 - 5_200)));
    }

    #[test]
    fn done_preparation_contributes_only_its_id() {
        let service = service(ScriptMethod::HostCli);
        let mut plan = sample_plan();
        plan.prep_detail.submission_status = TransactionStatus::SubmissionDone;
        plan.prep_detail.tx_hash_id = "prep-done-id".to_string();
        for group in &mut plan.group_details {
            group.submission_status = TransactionStatus::SubmissionDone;
            group.tx_hash_id = "group-done-id".to_string();
        }
        let script = service.generate_bash_script(&plan, false).unwrap();

        assert!(script.contains("prep_txid=\"prep-done-id\""));
        assert!(!script.contains(&format!("{}_prep.draft", plan.uuid)));
        assert!(!script.contains("transaction submit"));
        assert!(!script.contains("group_index_array"));
    }

    #[test]
    fn ongoing_preparation_polls_without_rebuilding() {
        let service = service(ScriptMethod::HostCli);
        let mut plan = sample_plan();
        plan.prep_detail.submission_status = TransactionStatus::SubmissionOngoing;
        plan.prep_detail.tx_hash_id = "prep-ongoing-id".to_string();
        let script = service.generate_bash_script(&plan, false).unwrap();

        assert!(script.contains("prep_txid=\"prep-ongoing-id\""));
        assert!(!script.contains(&format!("{}_prep.draft", plan.uuid)));
        assert!(script.contains("echo \"Preparation Transaction Submitted\""));
        assert!(script.contains("--status SUBMISSION_ONGOING --tx-id $prep_txid"));
    }

    #[test]
    fn done_groups_are_excluded_from_polling() {
        let service = service(ScriptMethod::HostCli);
        let mut plan = sample_plan();
        plan.group_details[0].submission_status = TransactionStatus::SubmissionDone;
        plan.group_details[0].tx_hash_id = "group-0-id".to_string();
        let script = service.generate_bash_script(&plan, false).unwrap();

        assert!(script.contains("group_index_array=(1)"));
        assert!(!script.contains("--tx-in $(echo $prep_txid)#0"));
        assert!(script.contains("--tx-in $(echo $prep_txid)#1"));
    }

    #[test]
    fn dust_chains_resolve_to_runtime_txid_variables() {
        let service = service(ScriptMethod::HostCli);
        let mut plan = sample_plan();
        let batch_one = crate::models::PreparationDetail::new(
            vec![wallet_utxo(SOURCE_ADDRESS, 1, 900)],
            vec![PaymentDetail {
                address: SOURCE_ADDRESS.to_string(),
                amount: 800,
            }],
        );
        let batch_two = crate::models::PreparationDetail::new(
            vec![
                wallet_utxo(SOURCE_ADDRESS, 2, 900),
                crate::models::InputUtxo::dust_collected(SOURCE_ADDRESS, 800),
            ],
            vec![PaymentDetail {
                address: SOURCE_ADDRESS.to_string(),
                amount: 1_600,
            }],
        );
        plan.dust_group_details
            .insert(SOURCE_ADDRESS.to_string(), vec![batch_one, batch_two]);
        plan.prep_detail
            .prep_input
            .push(crate::models::InputUtxo::dust_collected(SOURCE_ADDRESS, 1_600));

        let script = service.generate_bash_script(&plan, false).unwrap();

        // Batch two spends batch one's output through its runtime txid.
        assert!(script.contains(&format!(
            "--tx-in $txid_{}_dust_{}_0#0",
            plan.uuid, SOURCE_ADDRESS
        )));
        // The preparation transaction spends the tail of the chain.
        assert!(script.contains(&format!(
            "--tx-in $txid_{}_dust_{}_1#0",
            plan.uuid, SOURCE_ADDRESS
        )));
        assert!(script.contains("dust_submit_function"));
        // Batch fee is rendered literally: inputs minus output.
        assert!(script.contains("--fee 100 "));
    }

    #[test]
    fn docker_method_stages_and_removes_signing_keys() {
        let service = service(ScriptMethod::DockerCli);
        let plan = sample_plan();
        let script = service.generate_bash_script(&plan, false).unwrap();

        assert!(script.contains("docker exec"));
        assert!(script.contains("/tmp/source.skey"));
        assert!(script.contains("rm /tmp/source.skey"));
        assert!(script.contains("--signing-key-file /tmp/source.skey"));
    }

    #[test]
    fn comments_are_opt_in() {
        let service = service(ScriptMethod::HostCli);
        let plan = sample_plan();
        let bare = service.generate_bash_script(&plan, false).unwrap();
        let commented = service.generate_bash_script(&plan, true).unwrap();
        assert!(!bare.contains("# ==="));
        assert!(commented.contains("# ==="));
        assert!(commented.len() > bare.len());
    }
}

