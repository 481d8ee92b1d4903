// Copyright (c) 2020-2021 MobileCoin Inc.

//! Test helpers: a deterministic mock ledger with a linear size model.

use crate::{
    config::Network,
    ledger::{
        BuildParams, InputSpec, LedgerClient, LedgerClientError, OutputSpec, ProtocolParameters,
        TxArtifact,
    },
    models::InputUtxo,
};
use slog::{o, Logger};
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
};

pub const SOURCE_ADDRESS: &str = "addr_test1vpv2u2aqrvp4qnsw93qck3xagvwlleqs29erxtz3322t8ls46s7ew";
pub const RECIPIENT_ADDRESS: &str =
    "addr_test1vqfvx50fxl8h57jyjsczhvw3u4j6lyecfexs40tkwz7kdcg6d6t3t";
pub const STAKE_ADDRESS: &str = "stake_test1upwy8nx7zj0p3n3tzdrwd4f5f4d4rmwrzf9yq438e64vgdc5pkphd";

pub fn test_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// Builds a wallet UTXO with a synthetic, index-distinguished hash.
pub fn wallet_utxo(address: &str, index: u32, amount: u64) -> InputUtxo {
    InputUtxo {
        address: address.to_string(),
        tx_hash: format!("{:064x}", index + 1),
        tx_index: index,
        amount,
        dust_collected_utxo: false,
    }
}

#[derive(Default)]
struct MockState {
    /// Live artifact path -> (inputs, outputs) shape.
    shapes: HashMap<String, (usize, usize)>,
    created: usize,
    submitted: Vec<String>,
}

/// Ledger client double whose transaction sizes are a linear function of
/// the input/output counts, so the packing searches behave like they do
/// against a real serializer.
pub struct MockLedger {
    pub protocol: ProtocolParameters,
    /// Fee returned for every shape when set; otherwise
    /// `min_fee_per_transaction + fee_per_byte * draft_size`.
    pub flat_fee: Option<u64>,
    pub base_bytes: usize,
    pub bytes_per_input: usize,
    pub bytes_per_output: usize,
    pub slot: u64,
    pub utxos: BTreeMap<String, Vec<InputUtxo>>,
    pub rewards: BTreeMap<String, u64>,
    pub fail_signing: bool,
    state: RefCell<MockState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self {
            protocol: ProtocolParameters {
                max_tx_size: 16_384,
                min_fee_per_transaction: 100,
                fee_per_byte: 0,
            },
            flat_fee: None,
            base_bytes: 200,
            bytes_per_input: 100,
            bytes_per_output: 50,
            slot: 12_345,
            utxos: BTreeMap::new(),
            rewards: BTreeMap::new(),
            fail_signing: false,
            state: RefCell::new(MockState::default()),
        }
    }
}

impl MockLedger {
    pub fn shape_size(&self, num_inputs: usize, num_outputs: usize) -> usize {
        self.base_bytes + num_inputs * self.bytes_per_input + num_outputs * self.bytes_per_output
    }

    /// Number of artifacts built or signed over the mock's lifetime.
    pub fn created_count(&self) -> usize {
        self.state.borrow().created
    }

    /// Artifacts that have not been deleted yet.
    pub fn live_artifact_count(&self) -> usize {
        self.state.borrow().shapes.len()
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.borrow().submitted.clone()
    }

    fn record(&self, extension: &str, shape: (usize, usize)) -> TxArtifact {
        let mut state = self.state.borrow_mut();
        state.created += 1;
        let path = format!("mock-{}.{}", state.created, extension);
        state.shapes.insert(path.clone(), shape);
        TxArtifact::new(path)
    }

    fn shape_of(&self, artifact: &TxArtifact) -> Result<(usize, usize), LedgerClientError> {
        self.state
            .borrow()
            .shapes
            .get(artifact.path())
            .copied()
            .ok_or_else(|| {
                LedgerClientError::MalformedOutput(format!("unknown artifact {}", artifact.path()))
            })
    }
}

impl LedgerClient for MockLedger {
    fn protocol_parameters(
        &self,
        _network: Network,
    ) -> Result<ProtocolParameters, LedgerClientError> {
        Ok(self.protocol)
    }

    fn wallet_utxos(
        &self,
        address: &str,
        _network: Network,
    ) -> Result<Vec<InputUtxo>, LedgerClientError> {
        Ok(self.utxos.get(address).cloned().unwrap_or_default())
    }

    fn chain_tip_slot(&self, _network: Network) -> Result<u64, LedgerClientError> {
        Ok(self.slot)
    }

    fn build_transaction(
        &self,
        inputs: InputSpec<'_>,
        outputs: OutputSpec<'_>,
        params: &BuildParams<'_>,
    ) -> Result<TxArtifact, LedgerClientError> {
        let extension = if params.is_draft() { "draft" } else { "raw" };
        Ok(self.record(extension, (inputs.len(), outputs.len())))
    }

    fn sign_transaction(
        &self,
        artifact: &TxArtifact,
        _signing_key_files: &[String],
        _network: Network,
    ) -> Result<TxArtifact, LedgerClientError> {
        if self.fail_signing {
            return Err(LedgerClientError::CommandFailed {
                command: "transaction sign".to_string(),
                stderr: "mock signing failure".to_string(),
            });
        }
        let shape = self.shape_of(artifact)?;
        Ok(self.record("signed", shape))
    }

    fn measure_byte_size(&self, artifact: &TxArtifact) -> Result<usize, LedgerClientError> {
        let (num_inputs, num_outputs) = self.shape_of(artifact)?;
        Ok(self.shape_size(num_inputs, num_outputs))
    }

    fn min_fee(
        &self,
        num_inputs: usize,
        num_outputs: usize,
        _num_witnesses: usize,
        _draft: &TxArtifact,
        _network: Network,
    ) -> Result<u64, LedgerClientError> {
        match self.flat_fee {
            Some(fee) => Ok(fee),
            None => Ok(self.protocol.min_fee_per_transaction
                + self.protocol.fee_per_byte * self.shape_size(num_inputs, num_outputs) as u64),
        }
    }

    fn submit_transaction(
        &self,
        artifact: &TxArtifact,
        _network: Network,
    ) -> Result<String, LedgerClientError> {
        let mut state = self.state.borrow_mut();
        state.submitted.push(artifact.path().to_string());
        Ok(format!("txid-{}", state.submitted.len()))
    }

    fn transaction_id(&self, artifact: &TxArtifact) -> Result<String, LedgerClientError> {
        Ok(format!("txid-for-{}", artifact.path()))
    }

    fn stake_address(
        &self,
        _address: &str,
        _network: Network,
    ) -> Result<String, LedgerClientError> {
        Ok(STAKE_ADDRESS.to_string())
    }

    fn stake_reward_balance(
        &self,
        stake_address: &str,
        _network: Network,
    ) -> Result<u64, LedgerClientError> {
        Ok(self.rewards.get(stake_address).copied().unwrap_or(0))
    }

    fn delete_artifact(&self, artifact: &TxArtifact) -> Result<(), LedgerClientError> {
        self.state
            .borrow_mut()
            .shapes
            .remove(artifact.path())
            .map(|_| ())
            .ok_or_else(|| {
                LedgerClientError::MalformedOutput(format!(
                    "delete of unknown artifact {}",
                    artifact.path()
                ))
            })
    }
}
