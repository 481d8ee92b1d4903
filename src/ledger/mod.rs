// Copyright (c) 2020-2021 MobileCoin Inc.

//! Ledger client abstraction.
//!
//! The packing engines never talk to the chain directly; everything goes
//! through [`LedgerClient`]. The production implementation shells out to
//! cardano-cli ([`cli::CardanoCli`]); tests use a deterministic mock.

pub mod cli;
pub mod commands;

use crate::{
    config::Network,
    models::{InputUtxo, PaymentDetail, RewardDetails},
};
use displaydoc::Display;
use std::{io, path::PathBuf};

#[derive(Display, Debug)]
pub enum LedgerClientError {
    /// Command `{command}` failed: {stderr}
    CommandFailed { command: String, stderr: String },

    /// Error spawning `{command}`: {source}
    Spawn { command: String, source: io::Error },

    /// Error accessing file {path:?}: {source}
    FileAccess { path: PathBuf, source: io::Error },

    /// Error parsing json output: {0}
    Json(serde_json::Error),

    /// Error decoding transaction cbor hex: {0}
    HexDecode(hex::FromHexError),

    /// Malformed ledger output: {0}
    MalformedOutput(String),
}

impl From<serde_json::Error> for LedgerClientError {
    fn from(src: serde_json::Error) -> Self {
        Self::Json(src)
    }
}

impl From<hex::FromHexError> for LedgerClientError {
    fn from(src: hex::FromHexError) -> Self {
        Self::HexDecode(src)
    }
}

/// Protocol parameters the packing engines depend on.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtocolParameters {
    pub max_tx_size: usize,
    pub min_fee_per_transaction: u64,
    pub fee_per_byte: u64,
}

/// Handle to a transaction artifact (draft, raw or signed) created by the
/// ledger client. Scoped to a single oracle call; the creator is
/// responsible for deleting it on every exit path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxArtifact {
    path: String,
}

impl TxArtifact {
    pub fn new(path: String) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Transaction inputs for drafting: a bare count synthesizes placeholder
/// UTXOs for size estimation before concrete inputs exist.
#[derive(Clone, Copy, Debug)]
pub enum InputSpec<'a> {
    Count(usize),
    Utxos(&'a [InputUtxo]),
}

impl<'a> InputSpec<'a> {
    pub fn len(&self) -> usize {
        match self {
            Self::Count(count) => *count,
            Self::Utxos(utxos) => utxos.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transaction outputs for drafting, mirroring [`InputSpec`].
#[derive(Clone, Copy, Debug)]
pub enum OutputSpec<'a> {
    Count(usize),
    Payments(&'a [PaymentDetail]),
}

impl<'a> OutputSpec<'a> {
    pub fn len(&self) -> usize {
        match self {
            Self::Count(count) => *count,
            Self::Payments(payments) => payments.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Options for building a transaction artifact. A draft build omits fee and
/// TTL (both rendered as zero); a raw build requires them.
#[derive(Clone, Copy, Debug)]
pub struct BuildParams<'a> {
    pub fee: Option<u64>,
    pub ttl: Option<u64>,
    pub metadata_file: Option<&'a str>,
    pub reward_details: Option<&'a RewardDetails>,
    /// Address used for synthesized placeholder outputs.
    pub placeholder_address: &'a str,
}

impl<'a> BuildParams<'a> {
    pub fn draft(placeholder_address: &'a str) -> Self {
        Self {
            fee: None,
            ttl: None,
            metadata_file: None,
            reward_details: None,
            placeholder_address,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.fee.is_none()
    }
}

/// Narrow interface to the underlying ledger. Every operation is a blocking
/// external call; implementations must not share mutable state between
/// calls.
pub trait LedgerClient {
    fn protocol_parameters(&self, network: Network)
        -> Result<ProtocolParameters, LedgerClientError>;

    fn wallet_utxos(
        &self,
        address: &str,
        network: Network,
    ) -> Result<Vec<InputUtxo>, LedgerClientError>;

    fn chain_tip_slot(&self, network: Network) -> Result<u64, LedgerClientError>;

    fn build_transaction(
        &self,
        inputs: InputSpec<'_>,
        outputs: OutputSpec<'_>,
        params: &BuildParams<'_>,
    ) -> Result<TxArtifact, LedgerClientError>;

    fn sign_transaction(
        &self,
        artifact: &TxArtifact,
        signing_key_files: &[String],
        network: Network,
    ) -> Result<TxArtifact, LedgerClientError>;

    fn measure_byte_size(&self, artifact: &TxArtifact) -> Result<usize, LedgerClientError>;

    fn min_fee(
        &self,
        num_inputs: usize,
        num_outputs: usize,
        num_witnesses: usize,
        draft: &TxArtifact,
        network: Network,
    ) -> Result<u64, LedgerClientError>;

    fn submit_transaction(
        &self,
        artifact: &TxArtifact,
        network: Network,
    ) -> Result<String, LedgerClientError>;

    fn transaction_id(&self, artifact: &TxArtifact) -> Result<String, LedgerClientError>;

    fn stake_address(&self, address: &str, network: Network) -> Result<String, LedgerClientError>;

    fn stake_reward_balance(
        &self,
        stake_address: &str,
        network: Network,
    ) -> Result<u64, LedgerClientError>;

    fn delete_artifact(&self, artifact: &TxArtifact) -> Result<(), LedgerClientError>;
}
