// Copyright (c) 2020-2021 MobileCoin Inc.

//! UTXO adjustment engine: the reconciliation core.
//!
//! Takes the tentative payment groups and the wallet UTXO set, rebalances
//! oversized/undersized groups, absorbs leftover payments into the
//! preparation transaction, and selects a minimal input set covering all
//! group costs plus fees. Byte size, fee and input selection are mutually
//! dependent (fee grows with size, size grows with inputs), so the engine
//! iterates to a fixed point with an explicit round bound.

use crate::{
    ledger::{InputSpec, LedgerClient, LedgerClientError, OutputSpec, TxArtifact},
    models::{
        InputUtxo, PaymentDetail, PaymentGroup, PreparationDetail, RewardDetails, TransactionPlan,
    },
    service::{
        oracle::{OracleError, TransactionOracle},
        PaymentsService,
    },
};
use displaydoc::Display;
use slog::{debug, info};

#[derive(Display, Debug)]
pub enum AdjustmentError {
    /// Error probing transaction shape: {0}
    Oracle(OracleError),

    /// Insufficient balance: required {required_amount}, current {current_amount}
    InsufficientBalance {
        required_amount: u64,
        current_amount: u64,
    },

    /// Input selection did not converge within {0} rounds
    Convergence(usize),

    /// Error deleting preparation draft: {0}
    Cleanup(LedgerClientError),

    /// Preparation transaction does not fit within {0} bytes
    PreparationTooLarge(usize),
}

impl From<OracleError> for AdjustmentError {
    fn from(src: OracleError) -> Self {
        Self::Oracle(src)
    }
}

/// Inputs the engine needs beyond the service context.
pub struct AdjustmentRequest {
    pub output_utxo_details: Vec<PaymentGroup>,
    pub input_utxo_list: Vec<InputUtxo>,
    pub prep_tx_file: TxArtifact,
    pub max_tx_size: usize,
    pub reward_details: Option<RewardDetails>,
    pub allowed_ttl_slots: u64,
    pub dust_collection_method: crate::config::DustCollectionMethod,
    pub dust_collection_threshold: u64,
}

pub trait AdjustmentService {
    /// Produces the finalized transaction plan, or fails without partial
    /// output.
    fn adjust_utxos(&self, request: AdjustmentRequest)
        -> Result<TransactionPlan, AdjustmentError>;
}

impl<L: LedgerClient> PaymentsService<L> {
    /// Greedily accumulates wallet inputs (assumed sorted descending by
    /// amount) until they cover `required_amount`.
    fn select_inputs(input_utxo_list: &[InputUtxo], required_amount: u64) -> Vec<InputUtxo> {
        let mut selected = Vec::new();
        let mut selected_amount = 0u64;
        for utxo in input_utxo_list {
            if selected_amount >= required_amount {
                break;
            }
            selected.push(utxo.clone());
            selected_amount += utxo.amount;
        }
        selected
    }

    /// One probe of the coupled output-set/input-set fixed point: given a
    /// candidate preparation output list, selects the covering input set
    /// and measures the resulting transaction. Returns the selected
    /// inputs, the probed byte size, and whether change was folded into
    /// the fee.
    fn probe_preparation(
        &self,
        candidate_prep: &[PaymentDetail],
        input_utxo_list: &[InputUtxo],
        wallet_total: u64,
        reward_details: Option<&RewardDetails>,
    ) -> Result<(Vec<InputUtxo>, usize, bool), AdjustmentError> {
        let minimum_amount = self.context.settings.cardano_minimum_amount;
        // Each round either grows the selected input set or terminates, and
        // the selection jumps to cover the current requirement, so the
        // round bound scales with log2 of the wallet size.
        let max_rounds = (input_utxo_list.len().max(2) as u64).ilog2() as usize + 2;

        let mut selected: Vec<InputUtxo> = Vec::new();
        let mut last_selected_len = 0;
        let mut probed_size = 0;
        let mut change_folded = false;
        let mut initial_check = true;

        for round in 0.. {
            if round >= max_rounds {
                return Err(AdjustmentError::Convergence(max_rounds));
            }

            let input_spec = if initial_check {
                InputSpec::Count(1)
            } else {
                InputSpec::Utxos(&selected)
            };
            let (total, fee) = self.total_amount_plus_fee(input_spec, candidate_prep, 1)?;
            let total_with_fee = total + fee;

            if wallet_total < total_with_fee {
                return Err(AdjustmentError::InsufficientBalance {
                    required_amount: total_with_fee,
                    current_amount: wallet_total,
                });
            }
            let change = wallet_total - total_with_fee;
            let required_amount = if change < minimum_amount {
                // Change too small for a usable UTXO; it is folded into the
                // fee instead of becoming an output, so the requirement is
                // the whole wallet.
                change_folded = true;
                total_with_fee + change
            } else {
                change_folded = false;
                total_with_fee + minimum_amount
            };

            selected = Self::select_inputs(input_utxo_list, required_amount);
            if selected.len() == last_selected_len {
                break;
            }
            last_selected_len = selected.len();
            initial_check = false;

            probed_size = self.transaction_byte_size(
                InputSpec::Utxos(&selected),
                OutputSpec::Payments(candidate_prep),
                reward_details,
                None,
            )?;
        }

        Ok((selected, probed_size, change_folded))
    }
}

impl<L: LedgerClient> AdjustmentService for PaymentsService<L> {
    fn adjust_utxos(
        &self,
        request: AdjustmentRequest,
    ) -> Result<TransactionPlan, AdjustmentError> {
        let AdjustmentRequest {
            output_utxo_details,
            input_utxo_list,
            prep_tx_file,
            max_tx_size,
            reward_details,
            allowed_ttl_slots,
            dust_collection_method,
            dust_collection_threshold,
        } = request;
        let source_address = self.context.source_address.clone();

        // Classify groups by measured size. A lone group is dissolved into
        // the spill list so the consolidation logic below applies
        // uniformly.
        let mut spill: Vec<PaymentDetail> = Vec::new();
        let mut groups = output_utxo_details;
        if groups.len() == 1 {
            spill.append(&mut groups[0].payment_details);
        }

        let mut over_max_group: Vec<PaymentGroup> = Vec::new();
        let mut under_max_group: Vec<PaymentGroup> = Vec::new();
        for mut group in groups {
            if group.payment_details.is_empty() {
                continue;
            }
            let tx_size = self.transaction_byte_size(
                InputSpec::Count(1),
                OutputSpec::Payments(&group.payment_details),
                None,
                None,
            )?;
            group.tx_size = tx_size;
            if tx_size > max_tx_size {
                over_max_group.push(group);
            } else {
                under_max_group.push(group);
            }
        }

        // Trim oversized groups from the front until they fit.
        for group in &mut over_max_group {
            while group.tx_size > max_tx_size {
                spill.push(group.payment_details.remove(0));
                let (amount, fee) = self.total_amount_plus_fee(
                    InputSpec::Count(1),
                    &group.payment_details,
                    1,
                )?;
                group.amount = amount;
                group.fee = fee;
                group.tx_size = self.transaction_byte_size(
                    InputSpec::Count(1),
                    OutputSpec::Payments(&group.payment_details),
                    None,
                    None,
                )?;
            }
        }

        // Largest spilled payments are placed first.
        spill.sort_by(|a, b| b.amount.cmp(&a.amount));

        // Pack spill into groups that have room, one payment at a time.
        for group in &mut under_max_group {
            let mut spill_index = 0;
            while spill_index < spill.len() {
                let mut candidate = group.payment_details.clone();
                candidate.push(spill[spill_index].clone());
                let (amount, fee) =
                    self.total_amount_plus_fee(InputSpec::Count(1), &candidate, 1)?;
                let tx_size = self.transaction_byte_size(
                    InputSpec::Count(1),
                    OutputSpec::Payments(&candidate),
                    None,
                    None,
                )?;
                if tx_size <= max_tx_size {
                    group.payment_details.push(spill.remove(spill_index));
                    group.amount = amount;
                    group.fee = fee;
                    group.tx_size = tx_size;
                } else {
                    spill_index += 1;
                }
            }
        }

        self.ledger
            .delete_artifact(&prep_tx_file)
            .map_err(AdjustmentError::Cleanup)?;

        let mut final_group_list: Vec<PaymentGroup> = over_max_group
            .into_iter()
            .chain(under_max_group)
            .collect();
        final_group_list.sort_by_key(|group| group.index);

        // One aggregated preparation output per surviving group, in index
        // order; the group's index is its position in this list.
        let base_outputs: Vec<PaymentDetail> = final_group_list
            .iter()
            .map(|group| PaymentDetail {
                address: source_address.clone(),
                amount: group.amount + group.fee,
            })
            .collect();

        let wallet_total: u64 = input_utxo_list.iter().map(|utxo| utxo.amount).sum::<u64>()
            + reward_details
                .as_ref()
                .map(|reward| reward.stake_amount)
                .unwrap_or(0);

        // Absorb as much of the spill as possible directly into the
        // preparation transaction; whatever cannot fit becomes one final
        // extra group with its own aggregated preparation output.
        let mut absorbed: Vec<PaymentDetail> = Vec::new();
        let mut remaining = spill;
        let mut try_count = remaining.len();
        let mut committed_prep = base_outputs.clone();
        let mut final_inputs: Vec<InputUtxo> = Vec::new();
        let mut extra_group = PaymentGroup::new(base_outputs.len());
        let mut add_change_to_fee = false;
        let mut committed_any = false;
        let mut initial_round = true;

        while (try_count > 0 && !remaining.is_empty()) || initial_round {
            initial_round = false;

            let take = try_count.min(remaining.len());
            let mut candidate_absorbed = absorbed.clone();
            candidate_absorbed.extend_from_slice(&remaining[..take]);
            let candidate_extra: Vec<PaymentDetail> = remaining[take..].to_vec();

            let mut candidate_prep = base_outputs.clone();
            let mut extra_amount = 0;
            let mut extra_fee = 0;
            let mut extra_tx_size = 0;
            if !candidate_extra.is_empty() {
                let (amount, fee) =
                    self.total_amount_plus_fee(InputSpec::Count(1), &candidate_extra, 1)?;
                extra_amount = amount;
                extra_fee = fee;
                extra_tx_size = self.transaction_byte_size(
                    InputSpec::Count(1),
                    OutputSpec::Payments(&candidate_extra),
                    None,
                    None,
                )?;
                // The extra group's aggregate line sits right after the
                // regular group lines, matching its group index.
                candidate_prep.push(PaymentDetail {
                    address: source_address.clone(),
                    amount: extra_amount + extra_fee,
                });
            }
            candidate_prep.extend(candidate_absorbed.iter().cloned());

            let (selected, probed_size, change_folded) = self.probe_preparation(
                &candidate_prep,
                &input_utxo_list,
                wallet_total,
                reward_details.as_ref(),
            )?;

            if probed_size > max_tx_size {
                try_count /= 2;
            } else {
                committed_prep = candidate_prep;
                final_inputs = selected;
                extra_group.payment_details = candidate_extra.clone();
                extra_group.amount = extra_amount;
                extra_group.fee = extra_fee;
                extra_group.tx_size = extra_tx_size;
                extra_group.index = base_outputs.len();
                absorbed = candidate_absorbed;
                remaining = candidate_extra;
                add_change_to_fee = change_folded;
                committed_any = true;
                debug!(
                    self.logger,
                    "Committed preparation shape: {} outputs, {} inputs, {} spilled left",
                    committed_prep.len(),
                    final_inputs.len(),
                    remaining.len()
                );
            }
        }

        // Every probe failed; no spill placement (and no input selection)
        // exists under the size limit.
        if !committed_any {
            return Err(AdjustmentError::PreparationTooLarge(max_tx_size));
        }

        if add_change_to_fee {
            info!(
                self.logger,
                "Change below the minimum UTxO amount will be added to the preparation fee"
            );
        }

        if !extra_group.payment_details.is_empty() {
            final_group_list.push(extra_group);
        }

        let mut prep_detail = PreparationDetail::new(final_inputs, committed_prep);
        prep_detail.reward_details = reward_details;

        Ok(TransactionPlan::new(
            prep_detail,
            final_group_list,
            self.context.network,
            self.context.method,
            allowed_ttl_slots,
            add_change_to_fee,
            dust_collection_method,
            dust_collection_threshold,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Network, ScriptMethod, Settings},
        ledger::BuildParams,
        service::ServiceContext,
        test_utils::{test_logger, wallet_utxo, MockLedger, RECIPIENT_ADDRESS, SOURCE_ADDRESS},
    };

    fn service(ledger: MockLedger) -> PaymentsService<MockLedger> {
        let context = ServiceContext::new(
            Network::Testnet,
            ScriptMethod::HostCli,
            Settings::default(),
            SOURCE_ADDRESS.to_string(),
            vec!["source.skey".to_string()],
        );
        PaymentsService::new(ledger, context, test_logger())
    }

    fn payments(count: usize, amount: u64) -> Vec<PaymentDetail> {
        (0..count)
            .map(|_| PaymentDetail {
                address: RECIPIENT_ADDRESS.to_string(),
                amount,
            })
            .collect()
    }

    fn group(index: usize, payment_details: Vec<PaymentDetail>, fee: u64) -> PaymentGroup {
        let amount = payment_details.iter().map(|detail| detail.amount).sum();
        PaymentGroup {
            index,
            payment_details,
            amount,
            fee,
            tx_size: 0,
            submission_status: Default::default(),
            tx_hash_id: String::new(),
        }
    }

    fn prep_draft(service: &PaymentsService<MockLedger>) -> TxArtifact {
        service
            .ledger()
            .build_transaction(
                InputSpec::Count(1),
                OutputSpec::Count(1),
                &BuildParams::draft(SOURCE_ADDRESS),
            )
            .unwrap()
    }

    fn request(
        service: &PaymentsService<MockLedger>,
        groups: Vec<PaymentGroup>,
        inputs: Vec<InputUtxo>,
        max_tx_size: usize,
    ) -> AdjustmentRequest {
        AdjustmentRequest {
            output_utxo_details: groups,
            input_utxo_list: inputs,
            prep_tx_file: prep_draft(service),
            max_tx_size,
            reward_details: None,
            allowed_ttl_slots: 1000,
            dust_collection_method: crate::config::DustCollectionMethod::CollectToSource,
            dust_collection_threshold: 10_000_000,
        }
    }

    #[test]
    fn single_group_is_folded_into_the_preparation_transaction() {
        let mut ledger = MockLedger::default();
        ledger.flat_fee = Some(100);
        let service = service(ledger);

        let groups = vec![group(0, payments(30, 1_000), 100)];
        let inputs = vec![wallet_utxo(SOURCE_ADDRESS, 0, 1_000_000_000)];
        let plan = service
            .adjust_utxos(request(&service, groups, inputs, 16_384))
            .unwrap();

        assert!(plan.group_details.is_empty());
        assert_eq!(plan.prep_detail.prep_input.len(), 1);
        assert_eq!(plan.prep_detail.prep_output.len(), 30);
        assert_eq!(plan.prep_detail.output_total(), 30_000);
        assert!(!plan.add_change_to_fee);
        // The preparation draft probe was cleaned up.
        assert_eq!(service.ledger().live_artifact_count(), 0);
    }

    #[test]
    fn oversized_groups_shed_into_undersized_ones() {
        // 300 + 50 * outputs <= 1000 fits 14 outputs per group tx.
        let mut ledger = MockLedger::default();
        ledger.protocol.max_tx_size = 1_000;
        ledger.flat_fee = Some(100);
        let service = service(ledger);

        let groups = vec![
            group(0, payments(20, 1_000), 100),
            group(1, payments(5, 1_000), 100),
        ];
        let inputs = vec![wallet_utxo(SOURCE_ADDRESS, 0, 50_000_000)];
        let plan = service
            .adjust_utxos(request(&service, groups, inputs, 1_000))
            .unwrap();

        assert_eq!(plan.group_details.len(), 2);
        let group0 = &plan.group_details[0];
        let group1 = &plan.group_details[1];
        assert_eq!(group0.index, 0);
        assert_eq!(group1.index, 1);
        assert_eq!(group0.payment_details.len(), 14);
        assert_eq!(group1.payment_details.len(), 11);
        // Group amounts stay consistent with their payments.
        for group in &plan.group_details {
            let sum: u64 = group.payment_details.iter().map(|detail| detail.amount).sum();
            assert_eq!(group.amount, sum);
            assert!(group.tx_size <= 1_000);
        }
        // One aggregate preparation output per group, amount + fee each.
        assert_eq!(plan.prep_detail.prep_output.len(), 2);
        assert_eq!(plan.prep_detail.prep_output[0].amount, 14_000 + 100);
        assert_eq!(plan.prep_detail.prep_output[1].amount, 11_000 + 100);
    }

    #[test]
    fn leftover_spill_becomes_one_extra_group_with_one_prep_line() {
        let mut ledger = MockLedger::default();
        ledger.protocol.max_tx_size = 1_000;
        ledger.flat_fee = Some(100);
        let service = service(ledger);

        let groups = vec![group(0, payments(30, 1_000), 100)];
        let inputs = vec![wallet_utxo(SOURCE_ADDRESS, 0, 50_000_000)];
        let plan = service
            .adjust_utxos(request(&service, groups, inputs, 1_000))
            .unwrap();

        // All 30 payments are accounted for exactly once: group payments
        // plus payments paid directly by the preparation transaction.
        let group_payment_count: usize = plan
            .group_details
            .iter()
            .map(|group| group.payment_details.len())
            .sum();
        let direct_payment_count = plan
            .prep_detail
            .prep_output
            .iter()
            .filter(|detail| detail.address == RECIPIENT_ADDRESS)
            .count();
        assert_eq!(group_payment_count + direct_payment_count, 30);

        // Exactly one aggregate line per group, positioned at the group's
        // index within the preparation outputs.
        for group in &plan.group_details {
            let line = &plan.prep_detail.prep_output[group.index];
            assert_eq!(line.address, SOURCE_ADDRESS);
            assert_eq!(line.amount, group.amount + group.fee);
        }
        let aggregate_count = plan
            .prep_detail
            .prep_output
            .iter()
            .filter(|detail| detail.address == SOURCE_ADDRESS)
            .count();
        assert_eq!(aggregate_count, plan.group_details.len());
    }

    #[test]
    fn insufficient_balance_carries_exact_amounts() {
        let mut ledger = MockLedger::default();
        ledger.flat_fee = Some(100);
        let service = service(ledger);

        let groups = vec![group(0, payments(5, 1_000), 100)];
        let inputs = vec![wallet_utxo(SOURCE_ADDRESS, 0, 2_000)];
        let result = service.adjust_utxos(request(&service, groups, inputs, 16_384));

        match result {
            Err(AdjustmentError::InsufficientBalance {
                required_amount,
                current_amount,
            }) => {
                assert_eq!(required_amount, 5_000 + 100);
                assert_eq!(current_amount, 2_000);
            }
            other => panic!("expected insufficient balance, got {:?}", other),
        }
    }

    #[test]
    fn exactly_enough_balance_folds_change_into_fee() {
        let mut ledger = MockLedger::default();
        ledger.flat_fee = Some(100);
        let service = service(ledger);

        // Wallet covers outputs + fee exactly; change is zero.
        let groups = vec![group(0, payments(5, 1_000), 100)];
        let inputs = vec![wallet_utxo(SOURCE_ADDRESS, 0, 5_100)];
        let plan = service
            .adjust_utxos(request(&service, groups, inputs, 16_384))
            .unwrap();

        assert!(plan.add_change_to_fee);
        assert_eq!(plan.prep_detail.input_total(), 5_100);
    }

    #[test]
    fn one_lovelace_short_fails_exactly_at_the_boundary() {
        let mut ledger = MockLedger::default();
        ledger.flat_fee = Some(100);
        let service = service(ledger);

        let groups = vec![group(0, payments(5, 1_000), 100)];
        let inputs = vec![wallet_utxo(SOURCE_ADDRESS, 0, 5_099)];
        let result = service.adjust_utxos(request(&service, groups, inputs, 16_384));
        assert!(matches!(
            result,
            Err(AdjustmentError::InsufficientBalance {
                required_amount: 5_100,
                current_amount: 5_099,
            })
        ));
    }

    #[test]
    fn rewards_count_toward_the_available_balance() {
        let mut ledger = MockLedger::default();
        ledger.flat_fee = Some(100);
        let service = service(ledger);

        let groups = vec![group(0, payments(5, 1_000), 100)];
        let inputs = vec![wallet_utxo(SOURCE_ADDRESS, 0, 3_000)];
        let mut request = request(&service, groups, inputs, 16_384);
        request.reward_details = Some(RewardDetails {
            stake_address: "stake_test_source".to_string(),
            stake_amount: 2_100,
        });
        // 3_000 inputs + 2_100 rewards covers 5_100 exactly.
        let plan = service.adjust_utxos(request).unwrap();
        assert!(plan.add_change_to_fee);
        assert_eq!(
            plan.prep_detail.reward_details.as_ref().unwrap().stake_amount,
            2_100
        );
    }
}
