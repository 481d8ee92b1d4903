// Copyright (c) 2020-2021 MobileCoin Inc.

//! Dust collection engine.
//!
//! When the preparation transaction would have to spend more UTXOs than fit
//! in one transaction, small UTXOs are pre-consolidated per target address
//! into synthetic aggregated inputs. Each consolidation batch chains into
//! the next: batch *i*'s output is batch *i+1*'s extra input, so the
//! batches must be submitted in order.

use crate::{
    config::DustCollectionMethod,
    ledger::{InputSpec, LedgerClient, OutputSpec},
    models::{InputUtxo, PaymentDetail, PreparationDetail},
    service::{
        oracle::{OracleError, TransactionOracle},
        PaymentsService,
    },
};
use displaydoc::Display;
use itertools::Itertools;
use slog::{debug, info};
use std::collections::BTreeMap;

#[derive(Display, Debug)]
pub enum DustCollectionError {
    /// Error probing transaction shape: {0}
    Oracle(OracleError),

    /// A dust batch for {0} cannot fit even one input under the size limit
    IrreducibleBatch(String),

    /// Dust batch total {total} does not cover its own fee {fee}
    BatchValueBelowFee { total: u64, fee: u64 },

    /// No signing keys known for source address {0}
    UnknownSourceAddress(String),
}

impl From<OracleError> for DustCollectionError {
    fn from(src: OracleError) -> Self {
        Self::Oracle(src)
    }
}

/// Result of a dust collection pass: the usable wallet UTXO set (including
/// one synthetic aggregate per target address) and the persisted batches.
pub struct DustCollectionOutcome {
    pub wallet_utxos: Vec<InputUtxo>,
    pub dust_group_details: BTreeMap<String, Vec<PreparationDetail>>,
}

pub trait DustCollectionService {
    fn collect_dust(
        &self,
        input_utxos: &[InputUtxo],
        max_tx_size: usize,
        dust_collection_method: DustCollectionMethod,
        dust_collection_threshold: u64,
    ) -> Result<DustCollectionOutcome, DustCollectionError>;
}

impl<L: LedgerClient> PaymentsService<L> {
    /// Distinct signing key files covering every address in `inputs`.
    fn signing_keys_for(
        &self,
        inputs: &[InputUtxo],
    ) -> Result<Vec<String>, DustCollectionError> {
        let addresses: Vec<&String> = inputs.iter().map(|input| &input.address).unique().collect();
        let mut keys = Vec::new();
        for address in addresses {
            let address_keys = self
                .context
                .source_details
                .get(address)
                .ok_or_else(|| DustCollectionError::UnknownSourceAddress(address.clone()))?;
            keys.extend(address_keys.iter().cloned());
        }
        Ok(keys.into_iter().unique().collect())
    }

    /// Consumes one target address's dust list into a chain of
    /// consolidation batches, each as large as fits under `max_tx_size`.
    fn collect_address_dust(
        &self,
        target_address: &str,
        dust_utxo_list: &[InputUtxo],
        max_tx_size: usize,
    ) -> Result<Vec<PreparationDetail>, DustCollectionError> {
        let mut batches: Vec<PreparationDetail> = Vec::new();

        let mut batch_start = 0;
        let mut committed = 0;
        let mut step = dust_utxo_list.len();
        let mut committed_inputs: Vec<InputUtxo> = Vec::new();
        let mut committed_output: Vec<PaymentDetail> = Vec::new();

        while batch_start < dust_utxo_list.len() {
            if step == 0 {
                if committed == 0 {
                    return Err(DustCollectionError::IrreducibleBatch(
                        target_address.to_string(),
                    ));
                }
                batches.push(PreparationDetail::new(
                    std::mem::take(&mut committed_inputs),
                    std::mem::take(&mut committed_output),
                ));
                batch_start += committed;
                committed = 0;
                step = dust_utxo_list.len();
                continue;
            }

            let probe_end = (batch_start + committed + step).min(dust_utxo_list.len());
            let mut probe_inputs = dust_utxo_list[batch_start..probe_end].to_vec();

            // Chain the previous batch's consolidated output into this one.
            if let Some(previous) = batches.last() {
                probe_inputs.push(InputUtxo::dust_collected(
                    &previous.prep_output[0].address,
                    previous.prep_output[0].amount,
                ));
            }

            let probe_total: u64 = probe_inputs.iter().map(|input| input.amount).sum();
            let signing_keys = self.signing_keys_for(&probe_inputs)?;

            let probe_fee =
                self.transaction_fee(probe_inputs.len(), 1, None, signing_keys.len())?;
            let batch_amount = probe_total.checked_sub(probe_fee).ok_or(
                DustCollectionError::BatchValueBelowFee {
                    total: probe_total,
                    fee: probe_fee,
                },
            )?;
            let probe_output = vec![PaymentDetail {
                address: target_address.to_string(),
                amount: batch_amount,
            }];

            let tx_size = self.transaction_byte_size(
                InputSpec::Utxos(&probe_inputs),
                OutputSpec::Payments(&probe_output),
                None,
                Some(&signing_keys),
            )?;
            if tx_size >= max_tx_size {
                step /= 2;
            } else {
                committed_inputs = probe_inputs;
                committed_output = probe_output;
                committed += step;
            }
            if batch_start + committed >= dust_utxo_list.len() {
                step = 0;
            }
        }

        Ok(batches)
    }
}

impl<L: LedgerClient> DustCollectionService for PaymentsService<L> {
    fn collect_dust(
        &self,
        input_utxos: &[InputUtxo],
        max_tx_size: usize,
        dust_collection_method: DustCollectionMethod,
        dust_collection_threshold: u64,
    ) -> Result<DustCollectionOutcome, DustCollectionError> {
        info!(self.logger, "Creating dust collected UTxOs");

        let (mut dust_utxos, mut wallet_utxos): (Vec<InputUtxo>, Vec<InputUtxo>) = input_utxos
            .iter()
            .cloned()
            .partition(|utxo| utxo.amount < dust_collection_threshold);
        dust_utxos.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut dust_utxo_groups: BTreeMap<String, Vec<InputUtxo>> = BTreeMap::new();
        match dust_collection_method {
            DustCollectionMethod::CollectToSource => {
                dust_utxo_groups.insert(self.context.source_address.clone(), dust_utxos);
            }
            DustCollectionMethod::CollectPerAddress => {
                for utxo in dust_utxos {
                    dust_utxo_groups
                        .entry(utxo.address.clone())
                        .or_default()
                        .push(utxo);
                }
            }
        }

        let mut dust_group_details = BTreeMap::new();
        for (target_address, dust_utxo_list) in &dust_utxo_groups {
            if dust_utxo_list.is_empty() {
                continue;
            }
            debug!(
                self.logger,
                "Consolidating {} dust UTxOs into {}",
                dust_utxo_list.len(),
                target_address
            );
            let batches =
                self.collect_address_dust(target_address, dust_utxo_list, max_tx_size)?;
            dust_group_details.insert(target_address.clone(), batches);
        }

        // The tail batch of every chain becomes a spendable synthetic input.
        for batches in dust_group_details.values() {
            if let Some(last) = batches.last() {
                wallet_utxos.push(InputUtxo::dust_collected(
                    &last.prep_output[0].address,
                    last.prep_output[0].amount,
                ));
            }
        }
        wallet_utxos.sort_by(|a, b| b.amount.cmp(&a.amount));

        Ok(DustCollectionOutcome {
            wallet_utxos,
            dust_group_details,
        })
    }
}
