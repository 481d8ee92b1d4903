// Copyright (c) 2020-2021 MobileCoin Inc.

//! Byte-size and fee oracles.
//!
//! Every packing decision is driven by repeated calls into these two
//! oracles, which build (and always clean up) short-lived transaction
//! artifacts through the ledger client.

use crate::{
    ledger::{BuildParams, InputSpec, LedgerClient, LedgerClientError, OutputSpec, TxArtifact},
    models::{PaymentDetail, RewardDetails},
    service::PaymentsService,
};
use displaydoc::Display;
use slog::warn;

#[derive(Display, Debug)]
pub enum OracleError {
    /// Input UTxO list is empty
    EmptyInputs,

    /// Output UTxO list is empty
    EmptyOutputs,

    /// Witness list is empty
    EmptyWitnesses,

    /// Error creating TX draft: {0}
    Draft(LedgerClientError),

    /// Error computing fee: {0}
    Fee(LedgerClientError),

    /// Error fetching latest slot number: {0}
    ChainTip(LedgerClientError),

    /// Error signing TX file: {0}
    Sign(LedgerClientError),

    /// Error reading TX file size: {0}
    Size(LedgerClientError),

    /// Error deleting temporary TX file: {0}
    Cleanup(LedgerClientError),
}

/// The two oracles plus the combined total+fee helper the engines lean on.
pub trait TransactionOracle {
    /// Byte size of the signed transaction implied by the given shape.
    ///
    /// Builds an unsigned draft, computes its fee, rebuilds with fee and a
    /// fetched TTL, signs with all distinct keys implied by the input
    /// addresses (falling back to the source keys), and measures the
    /// signed artifact. All intermediate artifacts are deleted on every
    /// exit path.
    fn transaction_byte_size(
        &self,
        inputs: InputSpec<'_>,
        outputs: OutputSpec<'_>,
        reward_details: Option<&RewardDetails>,
        signing_key_files: Option<&[String]>,
    ) -> Result<usize, OracleError>;

    /// Minimum fee for the given shape. Synthesizes (and deletes) a draft
    /// when none is supplied.
    fn transaction_fee(
        &self,
        num_inputs: usize,
        num_outputs: usize,
        draft: Option<&TxArtifact>,
        num_witnesses: usize,
    ) -> Result<u64, OracleError>;

    /// Sum of the output amounts plus the minimum fee for the shape.
    fn total_amount_plus_fee(
        &self,
        inputs: InputSpec<'_>,
        output_list: &[PaymentDetail],
        num_witnesses: usize,
    ) -> Result<(u64, u64), OracleError>;
}

impl<L: LedgerClient> PaymentsService<L> {
    /// Deletes scratch artifacts after a successful oracle call. A failed
    /// deletion is an error the caller must see: leaked drafts mean a
    /// resource leak.
    fn remove_artifacts(&self, artifacts: &[TxArtifact]) -> Result<(), OracleError> {
        for artifact in artifacts {
            self.ledger
                .delete_artifact(artifact)
                .map_err(OracleError::Cleanup)?;
        }
        Ok(())
    }

    /// Deletes scratch artifacts while unwinding from an earlier error; the
    /// original error stays primary and deletion failures are logged.
    fn remove_artifacts_best_effort(&self, artifacts: &[TxArtifact]) {
        for artifact in artifacts {
            if let Err(error) = self.ledger.delete_artifact(artifact) {
                warn!(
                    self.logger,
                    "Failed deleting temporary artifact {}: {}",
                    artifact.path(),
                    error
                );
            }
        }
    }
}

impl<L: LedgerClient> TransactionOracle for PaymentsService<L> {
    fn transaction_byte_size(
        &self,
        inputs: InputSpec<'_>,
        outputs: OutputSpec<'_>,
        reward_details: Option<&RewardDetails>,
        signing_key_files: Option<&[String]>,
    ) -> Result<usize, OracleError> {
        if inputs.is_empty() {
            return Err(OracleError::EmptyInputs);
        }
        if outputs.is_empty() {
            return Err(OracleError::EmptyOutputs);
        }

        let mut scratch: Vec<TxArtifact> = Vec::new();
        let result = (|| {
            let mut params = BuildParams::draft(&self.context.source_address);
            params.metadata_file = self.context.metadata_file.as_deref();
            params.reward_details = reward_details;

            let draft = self
                .ledger
                .build_transaction(inputs, outputs, &params)
                .map_err(OracleError::Draft)?;
            scratch.push(draft.clone());

            let fee = self.transaction_fee(inputs.len(), outputs.len(), Some(&draft), 1)?;

            let ttl = self
                .ledger
                .chain_tip_slot(self.context.network)
                .map_err(OracleError::ChainTip)?;

            params.fee = Some(fee);
            params.ttl = Some(ttl);
            let raw = self
                .ledger
                .build_transaction(inputs, outputs, &params)
                .map_err(OracleError::Draft)?;
            scratch.push(raw.clone());

            let keys = signing_key_files.unwrap_or(&self.context.source_signing_keys);
            if keys.is_empty() {
                return Err(OracleError::EmptyWitnesses);
            }
            let signed = self
                .ledger
                .sign_transaction(&raw, keys, self.context.network)
                .map_err(OracleError::Sign)?;
            scratch.push(signed.clone());

            self.ledger
                .measure_byte_size(&signed)
                .map_err(OracleError::Size)
        })();

        match result {
            Ok(size) => {
                self.remove_artifacts(&scratch)?;
                Ok(size)
            }
            Err(error) => {
                self.remove_artifacts_best_effort(&scratch);
                Err(error)
            }
        }
    }

    fn transaction_fee(
        &self,
        num_inputs: usize,
        num_outputs: usize,
        draft: Option<&TxArtifact>,
        num_witnesses: usize,
    ) -> Result<u64, OracleError> {
        if num_inputs < 1 {
            return Err(OracleError::EmptyInputs);
        }
        if num_outputs < 1 {
            return Err(OracleError::EmptyOutputs);
        }
        if num_witnesses < 1 {
            return Err(OracleError::EmptyWitnesses);
        }

        match draft {
            Some(draft) => self
                .ledger
                .min_fee(
                    num_inputs,
                    num_outputs,
                    num_witnesses,
                    draft,
                    self.context.network,
                )
                .map_err(OracleError::Fee),
            None => {
                let params = BuildParams::draft(&self.context.source_address);
                let synthesized = self
                    .ledger
                    .build_transaction(
                        InputSpec::Count(num_inputs),
                        OutputSpec::Count(num_outputs),
                        &params,
                    )
                    .map_err(OracleError::Draft)?;
                let fee = self
                    .ledger
                    .min_fee(
                        num_inputs,
                        num_outputs,
                        num_witnesses,
                        &synthesized,
                        self.context.network,
                    )
                    .map_err(OracleError::Fee);
                match &fee {
                    Ok(_) => self.remove_artifacts(&[synthesized])?,
                    Err(_) => self.remove_artifacts_best_effort(&[synthesized]),
                }
                fee
            }
        }
    }

    fn total_amount_plus_fee(
        &self,
        inputs: InputSpec<'_>,
        output_list: &[PaymentDetail],
        num_witnesses: usize,
    ) -> Result<(u64, u64), OracleError> {
        if inputs.is_empty() {
            return Err(OracleError::EmptyInputs);
        }
        if output_list.is_empty() {
            return Err(OracleError::EmptyOutputs);
        }
        if num_witnesses < 1 {
            return Err(OracleError::EmptyWitnesses);
        }

        let total_amount = output_list.iter().map(|detail| detail.amount).sum();

        let params = BuildParams::draft(&self.context.source_address);
        let draft = self
            .ledger
            .build_transaction(inputs, OutputSpec::Payments(output_list), &params)
            .map_err(OracleError::Draft)?;

        let fee = self.transaction_fee(
            inputs.len(),
            output_list.len(),
            Some(&draft),
            num_witnesses,
        );
        match &fee {
            Ok(_) => self.remove_artifacts(&[draft])?,
            Err(_) => self.remove_artifacts_best_effort(&[draft]),
        }

        Ok((total_amount, fee?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        service::ServiceContext,
        test_utils::{test_logger, MockLedger, SOURCE_ADDRESS},
    };

    fn service(ledger: MockLedger) -> PaymentsService<MockLedger> {
        let context = ServiceContext::new(
            crate::config::Network::Testnet,
            crate::config::ScriptMethod::HostCli,
            crate::config::Settings::default(),
            SOURCE_ADDRESS.to_string(),
            vec!["source.skey".to_string()],
        );
        PaymentsService::new(ledger, context, test_logger())
    }

    #[test]
    fn byte_size_cleans_up_draft_raw_and_signed() {
        let service = service(MockLedger::default());
        let size = service
            .transaction_byte_size(InputSpec::Count(2), OutputSpec::Count(3), None, None)
            .unwrap();
        assert!(size > 0);
        // draft + raw + signed, all removed again.
        assert_eq!(service.ledger().created_count(), 3);
        assert_eq!(service.ledger().live_artifact_count(), 0);
    }

    #[test]
    fn byte_size_rejects_empty_shapes_before_any_ledger_call() {
        let service = service(MockLedger::default());
        assert!(matches!(
            service.transaction_byte_size(InputSpec::Count(0), OutputSpec::Count(3), None, None),
            Err(OracleError::EmptyInputs)
        ));
        assert!(matches!(
            service.transaction_byte_size(InputSpec::Count(1), OutputSpec::Count(0), None, None),
            Err(OracleError::EmptyOutputs)
        ));
        assert_eq!(service.ledger().created_count(), 0);
    }

    #[test]
    fn fee_synthesizes_and_deletes_a_draft_when_none_given() {
        let mut ledger = MockLedger::default();
        ledger.flat_fee = Some(100);
        let service = service(ledger);
        let fee = service.transaction_fee(1, 30, None, 1).unwrap();
        assert_eq!(fee, 100);
        assert_eq!(service.ledger().created_count(), 1);
        assert_eq!(service.ledger().live_artifact_count(), 0);
    }

    #[test]
    fn fee_requires_at_least_one_witness() {
        let service = service(MockLedger::default());
        assert!(matches!(
            service.transaction_fee(1, 1, None, 0),
            Err(OracleError::EmptyWitnesses)
        ));
    }

    #[test]
    fn total_amount_plus_fee_sums_outputs() {
        let mut ledger = MockLedger::default();
        ledger.flat_fee = Some(100);
        let service = service(ledger);
        let outputs = vec![
            PaymentDetail {
                address: "addr_test_recipient".to_string(),
                amount: 1_000,
            },
            PaymentDetail {
                address: "addr_test_recipient".to_string(),
                amount: 2_000,
            },
        ];
        let (total, fee) = service
            .total_amount_plus_fee(InputSpec::Count(1), &outputs, 1)
            .unwrap();
        assert_eq!((total, fee), (3_000, 100));
        assert_eq!(service.ledger().live_artifact_count(), 0);
    }

    #[test]
    fn byte_size_unwinds_artifacts_when_signing_fails() {
        let mut ledger = MockLedger::default();
        ledger.fail_signing = true;
        let service = service(ledger);
        let result =
            service.transaction_byte_size(InputSpec::Count(1), OutputSpec::Count(1), None, None);
        assert!(matches!(result, Err(OracleError::Sign(_))));
        assert_eq!(service.ledger().live_artifact_count(), 0);
    }
}
