// Copyright (c) 2020-2021 MobileCoin Inc.

//! The transaction plan: the persisted, resumable representation of a
//! mass payments run.
//!
//! A plan file is a checkpoint. Re-running with a plan file must skip any
//! sub-transaction whose status is terminal, resume in-flight ones by
//! polling, and re-attempt expired ones.

use crate::{
    config::{DustCollectionMethod, Network, ScriptMethod},
    models::status::TransactionStatus,
};
use displaydoc::Display;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io,
    path::{Path, PathBuf},
};

/// Hash used for inputs whose transaction is not yet on chain (dust
/// consolidation outputs). Resolved to a runtime txid at script emission.
pub const PLACEHOLDER_TX_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Display, Debug)]
pub enum PlanError {
    /// Error accessing plan file {path:?}: {source}
    FileAccess { path: PathBuf, source: io::Error },

    /// Error converting plan json: {0}
    Json(serde_json::Error),

    /// Invalid status transition from {from} to {to}
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Payment group {0} not found in plan
    GroupNotFound(usize),

    /// Dust batch {index} for address {address} not found in plan
    DustBatchNotFound { address: String, index: usize },
}

impl From<serde_json::Error> for PlanError {
    fn from(src: serde_json::Error) -> Self {
        Self::Json(src)
    }
}

/// A single unspent output held by a source wallet.
///
/// Identity is `(tx_hash, tx_index)`. `dust_collected_utxo` marks a
/// synthetic input produced by a not-yet-submitted dust consolidation
/// transaction; its `tx_hash` stays [`PLACEHOLDER_TX_HASH`] until the
/// referenced transaction id is known at script run time.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InputUtxo {
    pub address: String,
    pub tx_hash: String,
    pub tx_index: u32,
    pub amount: u64,
    #[serde(default)]
    pub dust_collected_utxo: bool,
}

impl InputUtxo {
    /// A synthetic input standing in for a pending dust consolidation output.
    pub fn dust_collected(address: &str, amount: u64) -> Self {
        Self {
            address: address.to_string(),
            tx_hash: PLACEHOLDER_TX_HASH.to_string(),
            tx_index: 0,
            amount,
            dust_collected_utxo: true,
        }
    }
}

/// A single payment obligation, or an aggregated group/change output.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PaymentDetail {
    pub address: String,
    pub amount: u64,
}

/// One ledger transaction's worth of payments.
///
/// `index` locates the group's slice of the preparation transaction's
/// outputs; reassigning it is only safe together with reordering the
/// preparation outputs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PaymentGroup {
    pub index: usize,
    pub payment_details: Vec<PaymentDetail>,
    pub amount: u64,
    pub fee: u64,
    pub tx_size: usize,
    pub submission_status: TransactionStatus,
    pub tx_hash_id: String,
}

impl PaymentGroup {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            payment_details: Vec::new(),
            amount: 0,
            fee: 0,
            tx_size: 0,
            submission_status: TransactionStatus::default(),
            tx_hash_id: String::new(),
        }
    }
}

/// Stake reward withdrawal folded into the preparation transaction.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RewardDetails {
    pub stake_address: String,
    pub stake_amount: u64,
}

/// A fan-out transaction: selected wallet inputs spent into one aggregated
/// output per payment group (or directly into payment outputs when a single
/// group fits). Also models each dust consolidation batch.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PreparationDetail {
    pub prep_input: Vec<InputUtxo>,
    pub prep_output: Vec<PaymentDetail>,
    pub submission_status: TransactionStatus,
    pub tx_hash_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_details: Option<RewardDetails>,
}

impl PreparationDetail {
    pub fn new(prep_input: Vec<InputUtxo>, prep_output: Vec<PaymentDetail>) -> Self {
        Self {
            prep_input,
            prep_output,
            submission_status: TransactionStatus::default(),
            tx_hash_id: String::new(),
            reward_details: None,
        }
    }

    pub fn input_total(&self) -> u64 {
        self.prep_input.iter().map(|utxo| utxo.amount).sum::<u64>()
            + self
                .reward_details
                .as_ref()
                .map(|reward| reward.stake_amount)
                .unwrap_or(0)
    }

    pub fn output_total(&self) -> u64 {
        self.prep_output.iter().map(|detail| detail.amount).sum()
    }
}

/// One source wallet address and the signing key files able to witness it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SourceAddressDetail {
    pub address: String,
    pub signing_key_file: Vec<String>,
    #[serde(default)]
    pub is_main_source_address: bool,
}

/// The aggregate root. Serialized to `<uuid>_transaction_plan.json` and
/// re-loadable to resume a partially executed run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TransactionPlan {
    pub uuid: String,
    pub prep_detail: PreparationDetail,
    pub group_details: Vec<PaymentGroup>,
    #[serde(default)]
    pub dust_group_details: BTreeMap<String, Vec<PreparationDetail>>,
    pub network: Network,
    pub script_method: ScriptMethod,
    pub allowed_ttl_slots: u64,
    pub add_change_to_fee: bool,
    pub dust_collection_method: DustCollectionMethod,
    pub dust_collection_threshold: u64,
    #[serde(default)]
    pub source_details: Vec<SourceAddressDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub filename: String,
}

impl TransactionPlan {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prep_detail: PreparationDetail,
        group_details: Vec<PaymentGroup>,
        network: Network,
        script_method: ScriptMethod,
        allowed_ttl_slots: u64,
        add_change_to_fee: bool,
        dust_collection_method: DustCollectionMethod,
        dust_collection_threshold: u64,
    ) -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let filename = format!("{}_transaction_plan.json", uuid);
        Self {
            uuid,
            prep_detail,
            group_details,
            dust_group_details: BTreeMap::new(),
            network,
            script_method,
            allowed_ttl_slots,
            add_change_to_fee,
            dust_collection_method,
            dust_collection_threshold,
            source_details: Vec::new(),
            metadata: None,
            filename,
        }
    }

    /// Loads a plan from a previously written plan file. The loaded plan's
    /// `filename` is the path it was read from, so subsequent status updates
    /// land in the same file.
    pub fn from_file(path: &Path) -> Result<Self, PlanError> {
        let contents = fs::read_to_string(path).map_err(|source| PlanError::FileAccess {
            path: path.to_path_buf(),
            source,
        })?;
        let mut plan: TransactionPlan = serde_json::from_str(&contents)?;
        plan.filename = path.to_string_lossy().to_string();
        Ok(plan)
    }

    /// Writes the plan to its `filename`. The write is atomic enough for the
    /// single-writer usage here: serialize fully, then persist.
    pub fn write(&self) -> Result<(), PlanError> {
        let contents = serde_json::to_string(self)?;
        fs::write(&self.filename, contents).map_err(|source| PlanError::FileAccess {
            path: PathBuf::from(&self.filename),
            source,
        })
    }

    /// The main source address recorded in the plan, if any.
    pub fn main_source_address(&self) -> Option<&SourceAddressDetail> {
        self.source_details
            .iter()
            .find(|detail| detail.is_main_source_address)
    }

    /// Signing key files per source address.
    pub fn signing_key_files(&self) -> BTreeMap<String, Vec<String>> {
        self.source_details
            .iter()
            .map(|detail| (detail.address.clone(), detail.signing_key_file.clone()))
            .collect()
    }

    pub fn set_prep_status(
        &mut self,
        status: TransactionStatus,
        tx_id: Option<&str>,
    ) -> Result<(), PlanError> {
        let from = self.prep_detail.submission_status;
        // Re-recording the current state is a no-op so resumed scripts can
        // replay their last transition safely.
        if from != status && !from.can_transition(status) {
            return Err(PlanError::InvalidTransition { from, to: status });
        }
        self.prep_detail.submission_status = status;
        if let Some(tx_id) = tx_id {
            self.prep_detail.tx_hash_id = tx_id.to_string();
        }
        Ok(())
    }

    pub fn set_group_status(
        &mut self,
        index: usize,
        status: TransactionStatus,
        tx_id: Option<&str>,
    ) -> Result<(), PlanError> {
        let group = self
            .group_details
            .iter_mut()
            .find(|group| group.index == index)
            .ok_or(PlanError::GroupNotFound(index))?;
        let from = group.submission_status;
        if from != status && !from.can_transition(status) {
            return Err(PlanError::InvalidTransition { from, to: status });
        }
        group.submission_status = status;
        if let Some(tx_id) = tx_id {
            group.tx_hash_id = tx_id.to_string();
        }
        Ok(())
    }

    pub fn set_dust_status(
        &mut self,
        address: &str,
        index: usize,
        status: TransactionStatus,
        tx_id: Option<&str>,
    ) -> Result<(), PlanError> {
        let batch = self
            .dust_group_details
            .get_mut(address)
            .and_then(|batches| batches.get_mut(index))
            .ok_or_else(|| PlanError::DustBatchNotFound {
                address: address.to_string(),
                index,
            })?;
        let from = batch.submission_status;
        if from != status && !from.can_transition(status) {
            return Err(PlanError::InvalidTransition { from, to: status });
        }
        batch.submission_status = status;
        if let Some(tx_id) = tx_id {
            batch.tx_hash_id = tx_id.to_string();
        }
        Ok(())
    }

    /// General transaction details: file name, pending dust/group counts,
    /// total input amount and expected maximum change return.
    pub fn general_transaction_details(&self) -> String {
        let mut dust_tx_count = 0;
        let mut total_input_tx_amount: u64 = 0;
        for batches in self.dust_group_details.values() {
            for batch in batches {
                total_input_tx_amount += batch
                    .prep_input
                    .iter()
                    .filter(|input| !input.dust_collected_utxo)
                    .map(|input| input.amount)
                    .sum::<u64>();
                if batch.submission_status.requires_build() {
                    dust_tx_count += 1;
                }
            }
        }

        let tx_group_count = self
            .group_details
            .iter()
            .filter(|group| group.submission_status.requires_build())
            .count();

        total_input_tx_amount += self
            .prep_detail
            .prep_input
            .iter()
            .filter(|input| !input.dust_collected_utxo)
            .map(|input| input.amount)
            .sum::<u64>();

        let total_payment_amount = self.prep_detail.output_total();

        format!(
            "Transaction File Name: {}\n\
             Number of Dust Transactions Generated: {}\n\
             Number of Transaction Groups Generated (Excluding preparation Transaction): {}\n\
             Total Amount To Be Used: {} Lovelace\n\
             Expected Maximum Change Return: {} Lovelace",
            self.filename,
            dust_tx_count,
            tx_group_count,
            total_input_tx_amount,
            total_input_tx_amount.saturating_sub(total_payment_amount),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn sample_plan() -> TransactionPlan {
        let mut plan = TransactionPlan::new(
            PreparationDetail {
                prep_input: vec![InputUtxo {
                    address: "addr_test_source".to_string(),
                    tx_hash: "aa".repeat(32),
                    tx_index: 1,
                    amount: 10_000_000,
                    dust_collected_utxo: false,
                }],
                prep_output: vec![
                    PaymentDetail {
                        address: "addr_test_source".to_string(),
                        amount: 5_000_100,
                    },
                    PaymentDetail {
                        address: "addr_test_source".to_string(),
                        amount: 3_000_100,
                    },
                ],
                submission_status: TransactionStatus::NotYetSubmitted,
                tx_hash_id: String::new(),
                reward_details: Some(RewardDetails {
                    stake_address: "stake_test_source".to_string(),
                    stake_amount: 400,
                }),
            },
            vec![PaymentGroup {
                index: 0,
                payment_details: vec![PaymentDetail {
                    address: "addr_test_recipient".to_string(),
                    amount: 5_000_000,
                }],
                amount: 5_000_000,
                fee: 100,
                tx_size: 300,
                submission_status: TransactionStatus::NotYetSubmitted,
                tx_hash_id: String::new(),
            }],
            Network::Testnet,
            ScriptMethod::DockerCli,
            1000,
            false,
            DustCollectionMethod::CollectToSource,
            10_000_000,
        );
        plan.dust_group_details.insert(
            "addr_test_source".to_string(),
            vec![PreparationDetail::new(
                vec![InputUtxo {
                    address: "addr_test_source".to_string(),
                    tx_hash: "bb".repeat(32),
                    tx_index: 0,
                    amount: 900,
                    dust_collected_utxo: false,
                }],
                vec![PaymentDetail {
                    address: "addr_test_source".to_string(),
                    amount: 800,
                }],
            )],
        );
        plan.source_details = vec![SourceAddressDetail {
            address: "addr_test_source".to_string(),
            signing_key_file: vec!["source.skey".to_string()],
            is_main_source_address: true,
        }];
        plan
    }

    #[test]
    fn plan_round_trips_through_file() {
        let dir = TempDir::new("plan").unwrap();
        let mut plan = sample_plan();
        plan.filename = dir
            .path()
            .join(&plan.filename)
            .to_string_lossy()
            .to_string();
        plan.write().unwrap();

        let loaded = TransactionPlan::from_file(Path::new(&plan.filename)).unwrap();
        assert_eq!(loaded, plan);
    }

    #[test]
    fn default_filename_is_uuid_scoped() {
        let plan = sample_plan();
        assert_eq!(plan.filename, format!("{}_transaction_plan.json", plan.uuid));
    }

    #[test]
    fn enum_fields_serialize_as_tags() {
        let plan = sample_plan();
        let value: serde_json::Value = serde_json::from_str(&serde_json::to_string(&plan).unwrap())
            .unwrap();
        assert_eq!(value["network"], "TESTNET");
        assert_eq!(value["script_method"], "DOCKER_CLI");
        assert_eq!(value["dust_collection_method"], "COLLECT_TO_SOURCE");
        assert_eq!(
            value["prep_detail"]["submission_status"],
            "NOT_YET_SUBMITTED"
        );
    }

    #[test]
    fn status_updates_reject_invalid_transitions() {
        let mut plan = sample_plan();
        // Straight to done without going through ongoing.
        let result = plan.set_prep_status(TransactionStatus::SubmissionDone, Some("txid"));
        assert!(matches!(result, Err(PlanError::InvalidTransition { .. })));

        plan.set_prep_status(TransactionStatus::SubmissionOngoing, Some("txid"))
            .unwrap();
        plan.set_prep_status(TransactionStatus::SubmissionDone, None)
            .unwrap();
        assert_eq!(plan.prep_detail.tx_hash_id, "txid");

        // Terminal state cannot move again.
        let result = plan.set_prep_status(TransactionStatus::SubmissionOngoing, None);
        assert!(matches!(result, Err(PlanError::InvalidTransition { .. })));
    }

    #[test]
    fn group_and_dust_updates_target_by_identity() {
        let mut plan = sample_plan();
        plan.set_group_status(0, TransactionStatus::SubmissionOngoing, Some("group-tx"))
            .unwrap();
        assert_eq!(plan.group_details[0].tx_hash_id, "group-tx");

        assert!(matches!(
            plan.set_group_status(9, TransactionStatus::SubmissionOngoing, None),
            Err(PlanError::GroupNotFound(9))
        ));

        plan.set_dust_status(
            "addr_test_source",
            0,
            TransactionStatus::SubmissionOngoing,
            Some("dust-tx"),
        )
        .unwrap();
        assert!(matches!(
            plan.set_dust_status("addr_unknown", 0, TransactionStatus::SubmissionOngoing, None),
            Err(PlanError::DustBatchNotFound { .. })
        ));
    }

    #[test]
    fn summary_excludes_done_transactions_and_synthetic_inputs() {
        let mut plan = sample_plan();
        plan.group_details[0].submission_status = TransactionStatus::SubmissionDone;
        plan.prep_detail.prep_input.push(InputUtxo::dust_collected(
            "addr_test_source",
            800,
        ));
        let summary = plan.general_transaction_details();
        assert!(summary.contains("Number of Transaction Groups Generated (Excluding preparation Transaction): 0"));
        // 10_000_000 real prep input + 900 real dust input; synthetic 800 excluded.
        assert!(summary.contains("Total Amount To Be Used: 10000900 Lovelace"));
    }
}
