// Copyright (c) 2020-2021 MobileCoin Inc.

//! Planning orchestration: source/payment file parsing, the preparation
//! step, and end-to-end plan generation.

use crate::{
    ledger::{BuildParams, InputSpec, LedgerClient, LedgerClientError, OutputSpec, TxArtifact},
    models::{
        InputUtxo, PaymentDetail, PaymentGroup, RewardDetails, SourceAddressDetail,
        TransactionPlan,
    },
    service::{
        adjustment::{AdjustmentError, AdjustmentRequest, AdjustmentService},
        dust::{DustCollectionError, DustCollectionService},
        grouping::{GroupingError, GroupingService},
        oracle::{OracleError, TransactionOracle},
        PaymentsService,
    },
};
use displaydoc::Display;
use slog::{debug, info};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Display, Debug)]
pub enum PlannerError {
    /// Error accessing file {path:?}: {source}
    FileAccess { path: PathBuf, source: io::Error },

    /// Error parsing {path:?} line {line}: {message}
    ParseError {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// {0} list is empty
    EmptyList(&'static str),

    /// Error fetching wallet UTxOs: {0}
    WalletUtxos(LedgerClientError),

    /// Error fetching stake details: {0}
    StakeDetails(LedgerClientError),

    /// Error fetching protocol parameters: {0}
    ProtocolParameters(LedgerClientError),

    /// Error creating preparation TX draft: {0}
    PreparationDraft(LedgerClientError),

    /// Error probing transaction shape: {0}
    Oracle(OracleError),

    /// Error grouping payments: {0}
    Grouping(GroupingError),

    /// Error collecting dust: {0}
    Dust(DustCollectionError),

    /// Error adjusting UTxOs: {0}
    Adjustment(AdjustmentError),

    /// Insufficient balance: required {required_amount}, current {current_amount}
    InsufficientBalance {
        required_amount: u64,
        current_amount: u64,
    },

    /// Dust collection is required but disabled; enable it with --enable-dust-collection
    DustCollectionDisabled,
}

impl From<OracleError> for PlannerError {
    fn from(src: OracleError) -> Self {
        Self::Oracle(src)
    }
}

impl From<GroupingError> for PlannerError {
    fn from(src: GroupingError) -> Self {
        Self::Grouping(src)
    }
}

impl From<DustCollectionError> for PlannerError {
    fn from(src: DustCollectionError) -> Self {
        Self::Dust(src)
    }
}

impl From<AdjustmentError> for PlannerError {
    fn from(src: AdjustmentError) -> Self {
        // The balance failure keeps its amounts at the top level so the
        // caller never digs for them.
        match src {
            AdjustmentError::InsufficientBalance {
                required_amount,
                current_amount,
            } => Self::InsufficientBalance {
                required_amount,
                current_amount,
            },
            other => Self::Adjustment(other),
        }
    }
}

/// Parses a sources CSV (`address,signing_key_file[,...]` per row) into a
/// per-address signing key map, also returning the first address for use as
/// the default source.
pub fn parse_sources_csv(
    path: &Path,
) -> Result<(BTreeMap<String, Vec<String>>, String), PlannerError> {
    let contents = fs::read_to_string(path).map_err(|source| PlannerError::FileAccess {
        path: path.to_path_buf(),
        source,
    })?;
    let mut source_details = BTreeMap::new();
    let mut first_address = None;
    for (line_number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let address = fields.next().unwrap_or_default().to_string();
        let signing_keys: Vec<String> = fields
            .filter(|field| !field.is_empty())
            .map(str::to_string)
            .collect();
        if address.is_empty() {
            return Err(PlannerError::ParseError {
                path: path.to_path_buf(),
                line: line_number + 1,
                message: "missing address".to_string(),
            });
        }
        if signing_keys.is_empty() {
            return Err(PlannerError::EmptyList("Witness"));
        }
        first_address.get_or_insert_with(|| address.clone());
        source_details.insert(address, signing_keys);
    }
    match first_address {
        Some(first_address) => Ok((source_details, first_address)),
        None => Err(PlannerError::EmptyList("Witness")),
    }
}

/// Parses a payments CSV (`address,amount` per row).
pub fn parse_payments_csv(path: &Path) -> Result<Vec<PaymentDetail>, PlannerError> {
    let contents = fs::read_to_string(path).map_err(|source| PlannerError::FileAccess {
        path: path.to_path_buf(),
        source,
    })?;
    let mut payment_details = Vec::new();
    for (line_number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let address = fields.next().unwrap_or_default().to_string();
        let amount = fields
            .next()
            .unwrap_or_default()
            .parse::<u64>()
            .map_err(|error| PlannerError::ParseError {
                path: path.to_path_buf(),
                line: line_number + 1,
                message: format!("invalid amount: {}", error),
            })?;
        payment_details.push(PaymentDetail { address, amount });
    }
    if payment_details.is_empty() {
        return Err(PlannerError::EmptyList("Output UTxO"));
    }
    Ok(payment_details)
}

/// Everything the downstream engines need after the preparation step.
pub struct PreparationOutcome {
    pub output_details: Vec<PaymentGroup>,
    pub wallet_utxos: Vec<InputUtxo>,
    pub prep_draft: TxArtifact,
    pub max_tx_size: usize,
    pub require_dust_collection: bool,
    pub reward_details: Option<RewardDetails>,
}

/// Parameters for a full plan generation run.
pub struct PlanRequest {
    pub payments: Vec<PaymentDetail>,
    pub allowed_ttl_slots: u64,
    pub enable_dust_collection: bool,
    pub dust_collection_method: crate::config::DustCollectionMethod,
    pub dust_collection_threshold: u64,
    pub include_rewards: bool,
}

pub trait PlanningService {
    /// Queries the wallet, groups the payments, checks the total balance,
    /// and drafts the initial preparation transaction.
    fn preparation_step(
        &self,
        output_list: Vec<PaymentDetail>,
        include_rewards: bool,
    ) -> Result<PreparationOutcome, PlannerError>;

    /// Runs the whole pipeline: preparation, dust collection when needed,
    /// and UTXO adjustment into a finalized plan.
    fn generate_plan(&self, request: PlanRequest) -> Result<TransactionPlan, PlannerError>;
}

impl<L: LedgerClient> PlanningService for PaymentsService<L> {
    fn preparation_step(
        &self,
        output_list: Vec<PaymentDetail>,
        include_rewards: bool,
    ) -> Result<PreparationOutcome, PlannerError> {
        if output_list.is_empty() {
            return Err(PlannerError::EmptyList("Output UTxO"));
        }

        let mut wallet_utxo_details: Vec<InputUtxo> = Vec::new();
        for address in self.context.source_details.keys() {
            wallet_utxo_details.extend(
                self.ledger
                    .wallet_utxos(address, self.context.network)
                    .map_err(PlannerError::WalletUtxos)?,
            );
        }

        let reward_details = if include_rewards {
            let stake_address = self
                .ledger
                .stake_address(&self.context.source_address, self.context.network)
                .map_err(PlannerError::StakeDetails)?;
            let stake_amount = self
                .ledger
                .stake_reward_balance(&stake_address, self.context.network)
                .map_err(PlannerError::StakeDetails)?;
            Some(RewardDetails {
                stake_address,
                stake_amount,
            })
        } else {
            None
        };

        let output_group_list = self.group_payments(&output_list)?;

        let mut output_group_details = Vec::new();
        let mut total_output_amount: u64 = 0;
        for (group_index, output_group) in output_group_list.iter().enumerate() {
            let (amount, fee) =
                self.total_amount_plus_fee(InputSpec::Count(1), output_group, 1)?;
            total_output_amount += amount + fee;
            output_group_details.push(PaymentGroup {
                index: group_index,
                payment_details: output_group.clone(),
                amount,
                fee,
                tx_size: 0,
                submission_status: Default::default(),
                tx_hash_id: String::new(),
            });
        }

        let total_input_amount: u64 = wallet_utxo_details
            .iter()
            .map(|utxo| utxo.amount)
            .sum::<u64>()
            + reward_details
                .as_ref()
                .map(|reward| reward.stake_amount)
                .unwrap_or(0);

        if total_input_amount < total_output_amount {
            return Err(PlannerError::InsufficientBalance {
                required_amount: total_output_amount,
                current_amount: total_input_amount,
            });
        }

        wallet_utxo_details.sort_by(|a, b| b.amount.cmp(&a.amount));

        // Enough of the largest inputs to cover the whole run, used to
        // draft the preparation transaction at a realistic input count.
        let mut input_utxos: Vec<InputUtxo> = Vec::new();
        let mut input_amount = 0u64;
        for utxo in &wallet_utxo_details {
            if input_amount >= total_output_amount {
                break;
            }
            input_utxos.push(utxo.clone());
            input_amount += utxo.amount;
        }

        // A single group pays its outputs directly from the preparation
        // transaction; multiple groups get one aggregated output each.
        let output_arg_list: Vec<PaymentDetail> = if output_group_list.len() == 1 {
            output_group_list[0].clone()
        } else {
            output_group_details
                .iter()
                .map(|group| PaymentDetail {
                    address: self.context.source_address.clone(),
                    amount: group.amount + group.fee,
                })
                .collect()
        };

        let mut params = BuildParams::draft(&self.context.source_address);
        params.metadata_file = self.context.metadata_file.as_deref();
        let prep_draft = self
            .ledger
            .build_transaction(
                InputSpec::Utxos(&input_utxos),
                OutputSpec::Payments(&output_arg_list),
                &params,
            )
            .map_err(PlannerError::PreparationDraft)?;

        let protocol = self
            .ledger
            .protocol_parameters(self.context.network)
            .map_err(PlannerError::ProtocolParameters)?;
        let tx_size = self
            .ledger
            .measure_byte_size(&prep_draft)
            .map_err(PlannerError::PreparationDraft)?;

        debug!(
            self.logger,
            "Preparation draft: {} inputs, {} outputs, {} bytes (max {})",
            input_utxos.len(),
            output_arg_list.len(),
            tx_size,
            protocol.max_tx_size
        );

        Ok(PreparationOutcome {
            output_details: output_group_details,
            wallet_utxos: wallet_utxo_details,
            prep_draft,
            max_tx_size: protocol.max_tx_size,
            require_dust_collection: tx_size > protocol.max_tx_size,
            reward_details,
        })
    }

    fn generate_plan(&self, request: PlanRequest) -> Result<TransactionPlan, PlannerError> {
        info!(
            self.logger,
            "Creating preparation TX and initial groupings"
        );
        let outcome = self.preparation_step(request.payments, request.include_rewards)?;

        let (wallet_utxos, dust_group_details) = if outcome.require_dust_collection {
            if !request.enable_dust_collection {
                return Err(PlannerError::DustCollectionDisabled);
            }
            let dust_outcome = self.collect_dust(
                &outcome.wallet_utxos,
                outcome.max_tx_size,
                request.dust_collection_method,
                request.dust_collection_threshold,
            )?;
            (dust_outcome.wallet_utxos, dust_outcome.dust_group_details)
        } else {
            (outcome.wallet_utxos, BTreeMap::new())
        };

        info!(self.logger, "Adjusting payment UTxO groups");
        let mut plan = self.adjust_utxos(AdjustmentRequest {
            output_utxo_details: outcome.output_details,
            input_utxo_list: wallet_utxos,
            prep_tx_file: outcome.prep_draft,
            max_tx_size: outcome.max_tx_size,
            reward_details: outcome.reward_details,
            allowed_ttl_slots: request.allowed_ttl_slots,
            dust_collection_method: request.dust_collection_method,
            dust_collection_threshold: request.dust_collection_threshold,
        })?;

        plan.dust_group_details = dust_group_details;
        plan.source_details = self
            .context
            .source_details
            .iter()
            .map(|(address, signing_keys)| SourceAddressDetail {
                address: address.clone(),
                signing_key_file: signing_keys.clone(),
                is_main_source_address: *address == self.context.source_address,
            })
            .collect();

        Ok(plan)
    }
}
