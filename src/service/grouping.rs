// Copyright (c) 2020-2021 MobileCoin Inc.

//! Grouping engine: partitions the full payment list into the minimum
//! number of transaction-sized groups.

use crate::{
    ledger::{InputSpec, LedgerClient, LedgerClientError, OutputSpec},
    models::PaymentDetail,
    service::{oracle::OracleError, oracle::TransactionOracle, PaymentsService},
};
use displaydoc::Display;
use slog::debug;

#[derive(Display, Debug)]
pub enum GroupingError {
    /// Error fetching protocol parameters: {0}
    ProtocolParameters(LedgerClientError),

    /// Error probing transaction byte size: {0}
    Oracle(OracleError),

    /// A single payment alone exceeds the maximum transaction size of {0} bytes
    IrreduciblePayment(usize),
}

impl From<OracleError> for GroupingError {
    fn from(src: OracleError) -> Self {
        Self::Oracle(src)
    }
}

pub trait GroupingService {
    /// Splits `output_list` into consecutive chunks, each of which fits in
    /// one transaction under the network's maximum transaction size.
    ///
    /// The group capacity is found by seeding a linear estimate and then
    /// narrowing it: probe a prefix, commit it if it fits, otherwise halve
    /// the step. The search always lands on a capacity that fits, at the
    /// cost of occasionally undershooting the true optimum.
    fn group_payments(
        &self,
        output_list: &[PaymentDetail],
    ) -> Result<Vec<Vec<PaymentDetail>>, GroupingError>;
}

impl<L: LedgerClient> GroupingService for PaymentsService<L> {
    fn group_payments(
        &self,
        output_list: &[PaymentDetail],
    ) -> Result<Vec<Vec<PaymentDetail>>, GroupingError> {
        let protocol = self
            .ledger
            .protocol_parameters(self.context.network)
            .map_err(GroupingError::ProtocolParameters)?;
        let max_tx_size = protocol.max_tx_size;

        let num_output = output_list.len();
        let initial_tx_size = self.transaction_byte_size(
            InputSpec::Count(1),
            OutputSpec::Payments(output_list),
            None,
            None,
        )?;

        if initial_tx_size < max_tx_size {
            return Ok(vec![output_list.to_vec()]);
        }

        // Additive-then-halving narrowing: `step` shrinks on oversize
        // probes, committed entries accumulate in `group_capacity`.
        let mut step = num_output * max_tx_size / initial_tx_size;
        let mut group_capacity = 0;
        while step > 0 {
            let probe_end = (group_capacity + step).min(num_output);
            let tx_size = self.transaction_byte_size(
                InputSpec::Count(1),
                OutputSpec::Payments(&output_list[..probe_end]),
                None,
                None,
            )?;
            if tx_size > max_tx_size {
                step /= 2;
            } else {
                group_capacity += step;
            }
            if group_capacity >= num_output {
                break;
            }
        }

        // The narrowing bottomed out without fitting even one payment.
        if group_capacity == 0 {
            return Err(GroupingError::IrreduciblePayment(max_tx_size));
        }
        let group_capacity = group_capacity.min(num_output);

        debug!(
            self.logger,
            "Grouping {} payments into chunks of {}", num_output, group_capacity
        );

        Ok(output_list
            .chunks(group_capacity)
            .map(|chunk| chunk.to_vec())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Network, ScriptMethod, Settings},
        service::ServiceContext,
        test_utils::{test_logger, MockLedger, RECIPIENT_ADDRESS, SOURCE_ADDRESS},
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

    fn payments(count: usize) -> Vec<PaymentDetail> {
        (0..count)
            .map(|index| PaymentDetail {
                address: RECIPIENT_ADDRESS.to_string(),
                amount: 1_000 + index as u64,
            })
            .collect()
    }

    #[test]
    fn everything_in_one_group_when_it_fits() {
        let service = service(MockLedger::default());
        let output_list = payments(30);
        let groups = service.group_payments(&output_list).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0], output_list);
    }

    #[test]
    fn groups_partition_the_payment_list_exactly() {
        // 200 base + 100 input + 50/output; max 1000 fits 14 outputs.
        let mut ledger = MockLedger::default();
        ledger.protocol.max_tx_size = 1_000;
        let max_tx_size = ledger.protocol.max_tx_size;
        let per_group_limit = (max_tx_size - ledger.base_bytes - ledger.bytes_per_input)
            / ledger.bytes_per_output;
        let service = service(ledger);

        let output_list = payments(100);
        let groups = service.group_payments(&output_list).unwrap();

        assert!(groups.len() > 1);
        for group in &groups {
            assert!(!group.is_empty());
            assert!(group.len() <= per_group_limit);
        }
        let flattened: Vec<PaymentDetail> = groups.into_iter().flatten().collect();
        assert_eq!(flattened, output_list);
    }

    #[test]
    fn all_groups_but_the_last_share_one_size() {
        let mut ledger = MockLedger::default();
        ledger.protocol.max_tx_size = 1_000;
        let service = service(ledger);

        let output_list = payments(100);
        let groups = service.group_payments(&output_list).unwrap();
        let head_size = groups[0].len();
        for group in &groups[..groups.len() - 1] {
            assert_eq!(group.len(), head_size);
        }
        assert!(groups[groups.len() - 1].len() <= head_size);
    }

    #[test]
    fn oversized_single_payment_is_a_distinguishable_error() {
        // One output alone blows the limit.
        let mut ledger = MockLedger::default();
        ledger.protocol.max_tx_size = 300;
        ledger.bytes_per_output = 400;
        let service = service(ledger);

        let result = service.group_payments(&payments(5));
        assert!(matches!(result, Err(GroupingError::IrreduciblePayment(300))));
    }
}
