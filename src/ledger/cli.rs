// Copyright (c) 2020-2021 MobileCoin Inc.

//! Ledger client backed by cardano-cli subprocess invocations, either on
//! the host or inside the node's docker container.

use crate::{
    config::{Network, ScriptMethod, Settings},
    ledger::{
        commands, BuildParams, InputSpec, LedgerClient, LedgerClientError, OutputSpec,
        ProtocolParameters, TxArtifact,
    },
    models::InputUtxo,
};
use itertools::Itertools;
use slog::{debug, warn, Logger};
use std::{fs, path::PathBuf, process::Command};

pub struct CardanoCli {
    settings: Settings,
    method: ScriptMethod,
    logger: Logger,
}

impl CardanoCli {
    pub fn new(settings: Settings, method: ScriptMethod, logger: Logger) -> Self {
        Self {
            settings,
            method,
            logger,
        }
    }

    fn prefix(&self) -> String {
        self.settings.command_prefix(self.method)
    }

    fn network_flag(&self, network: Network) -> String {
        self.settings.network_flag(network)
    }

    /// Runs a whitespace-safe command, failing if it exits nonzero or
    /// writes to stderr.
    fn run(&self, command: &str) -> Result<String, LedgerClientError> {
        debug!(self.logger, "Running ledger command: {}", command);
        let parts: Vec<&str> = command.split_whitespace().collect();
        let output = Command::new(parts[0])
            .args(&parts[1..])
            .output()
            .map_err(|source| LedgerClientError::Spawn {
                command: command.to_string(),
                source,
            })?;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() || !stderr.trim().is_empty() {
            return Err(LedgerClientError::CommandFailed {
                command: command.to_string(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Runs a command through the shell; needed for pipes, redirects and
    /// `&&` chains (docker file staging, address inspection).
    fn run_shell(&self, command: &str) -> Result<String, LedgerClientError> {
        debug!(self.logger, "Running shell command: {}", command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|source| LedgerClientError::Spawn {
                command: command.to_string(),
                source,
            })?;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() || !stderr.trim().is_empty() {
            return Err(LedgerClientError::CommandFailed {
                command: command.to_string(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Directory where transaction artifacts live. For the docker method
    /// this is the container's /tmp, created on demand.
    fn temp_dir(&self) -> Result<String, LedgerClientError> {
        match self.method {
            ScriptMethod::DockerCli => {
                let command = format!("{}sh -c \"test -d /tmp || mkdir /tmp\"", self.prefix());
                self.run_shell(&command)?;
                Ok("/tmp/".to_string())
            }
            ScriptMethod::HostCli => {
                let mut dir = std::env::temp_dir().to_string_lossy().to_string();
                if !dir.ends_with('/') {
                    dir.push('/');
                }
                Ok(dir)
            }
        }
    }

    fn read_artifact_file(&self, path: &str) -> Result<String, LedgerClientError> {
        match self.method {
            ScriptMethod::DockerCli => self.run(&commands::read_file(&self.prefix(), path)),
            ScriptMethod::HostCli => {
                fs::read_to_string(path).map_err(|source| LedgerClientError::FileAccess {
                    path: PathBuf::from(path),
                    source,
                })
            }
        }
    }

    fn delete_file(&self, path: &str) -> Result<(), LedgerClientError> {
        match self.method {
            ScriptMethod::DockerCli => {
                self.run(&commands::delete_file(&self.prefix(), path))?;
                Ok(())
            }
            ScriptMethod::HostCli => {
                fs::remove_file(path).map_err(|source| LedgerClientError::FileAccess {
                    path: PathBuf::from(path),
                    source,
                })
            }
        }
    }

    /// Stages a host file into the container, returning the staged path.
    fn copy_into_docker(&self, source_filename: &str) -> Result<String, LedgerClientError> {
        let basename = source_filename.rsplit('/').next().unwrap_or(source_filename);
        let staged = format!("{}{}", self.temp_dir()?, basename);
        self.run_shell(&commands::copy_file_into_docker(
            &self.prefix(),
            source_filename,
            &staged,
        ))?;
        Ok(staged)
    }

    /// Fetches the protocol parameter file the fee calculation references,
    /// returning its (cli-relative) filename.
    fn protocol_parameters_file(&self, network: Network) -> Result<String, LedgerClientError> {
        let protocol_filename = match network {
            Network::Mainnet => "mainnet-protocol.json",
            Network::Testnet => "testnet-protocol.json",
        };
        self.run(&commands::query_protocol_parameters_with_file(
            &self.prefix(),
            &self.network_flag(network),
            protocol_filename,
        ))?;
        Ok(protocol_filename.to_string())
    }
}

impl LedgerClient for CardanoCli {
    fn protocol_parameters(
        &self,
        network: Network,
    ) -> Result<ProtocolParameters, LedgerClientError> {
        let output = self.run(&commands::query_protocol_parameters(
            &self.prefix(),
            &self.network_flag(network),
        ))?;
        let details: serde_json::Value = serde_json::from_str(&output)?;
        Ok(ProtocolParameters {
            max_tx_size: details["maxTxSize"].as_u64().unwrap_or(0) as usize,
            min_fee_per_transaction: details["txFeeFixed"].as_u64().unwrap_or(0),
            fee_per_byte: details["txFeePerByte"].as_u64().unwrap_or(0),
        })
    }

    fn wallet_utxos(
        &self,
        address: &str,
        network: Network,
    ) -> Result<Vec<InputUtxo>, LedgerClientError> {
        let utxo_filename = format!("{}utxo-{}.json", self.temp_dir()?, address);
        self.run(&commands::query_wallet_utxo_with_file(
            &self.prefix(),
            address,
            &self.network_flag(network),
            &utxo_filename,
        ))?;
        let contents = self.read_artifact_file(&utxo_filename)?;
        self.delete_file(&utxo_filename)?;

        let entries: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&contents)?;
        let mut utxo_details = Vec::new();
        for (utxo_key, detail) in entries {
            let (tx_hash, tx_index) = utxo_key
                .split_once('#')
                .ok_or_else(|| {
                    LedgerClientError::MalformedOutput(format!("utxo key {}", utxo_key))
                })?;
            let value_details = detail["value"].as_object().cloned().unwrap_or_default();
            // UTXOs carrying native assets cannot be spent as plain value;
            // they are skipped rather than failing the whole query.
            if value_details.keys().any(|key| key != "lovelace") {
                warn!(
                    self.logger,
                    "Ignoring UTxO {} for carrying non-lovelace assets", utxo_key
                );
                continue;
            }
            utxo_details.push(InputUtxo {
                address: address.to_string(),
                tx_hash: tx_hash.to_string(),
                tx_index: tx_index.parse::<u32>().map_err(|_| {
                    LedgerClientError::MalformedOutput(format!("utxo index {}", utxo_key))
                })?,
                amount: value_details
                    .get("lovelace")
                    .and_then(|value| value.as_u64())
                    .unwrap_or(0),
                dust_collected_utxo: false,
            });
        }
        Ok(utxo_details)
    }

    fn chain_tip_slot(&self, network: Network) -> Result<u64, LedgerClientError> {
        let output = self.run(&commands::query_tip(
            &self.prefix(),
            &self.network_flag(network),
        ))?;
        let details: serde_json::Value = serde_json::from_str(&output)?;
        details["slot"]
            .as_u64()
            .ok_or_else(|| LedgerClientError::MalformedOutput("tip query slot".to_string()))
    }

    fn build_transaction(
        &self,
        inputs: InputSpec<'_>,
        outputs: OutputSpec<'_>,
        params: &BuildParams<'_>,
    ) -> Result<TxArtifact, LedgerClientError> {
        let tx_in_details = match inputs {
            InputSpec::Count(count) => commands::placeholder_tx_in_args(count),
            InputSpec::Utxos(utxos) => commands::tx_in_args(utxos),
        };
        let tx_out_details = match outputs {
            OutputSpec::Count(count) => {
                commands::placeholder_tx_out_args(count, params.placeholder_address)
            }
            OutputSpec::Payments(payments) => commands::tx_out_args(payments, params.is_draft()),
        };

        let mut extra_details = String::new();
        if let Some(reward) = params.reward_details {
            let amount = if params.is_draft() {
                0
            } else {
                reward.stake_amount
            };
            extra_details.push_str(&format!(
                "--withdrawal {}+{} ",
                reward.stake_address, amount
            ));
        }
        extra_details.push_str(&format!(
            "--fee {} --invalid-hereafter {} ",
            params.fee.unwrap_or(0),
            params.ttl.unwrap_or(0)
        ));
        if let Some(metadata_file) = params.metadata_file {
            extra_details.push_str(&format!("--metadata-json-file {} ", metadata_file));
        }

        let extension = if params.is_draft() { "draft" } else { "raw" };
        let tx_filename = format!(
            "{}{}.{}",
            self.temp_dir()?,
            uuid::Uuid::new_v4().simple(),
            extension
        );
        self.run(&commands::transaction_build(
            &self.prefix(),
            &tx_in_details,
            &tx_out_details,
            &extra_details,
            &tx_filename,
        ))?;
        Ok(TxArtifact::new(tx_filename))
    }

    fn sign_transaction(
        &self,
        artifact: &TxArtifact,
        signing_key_files: &[String],
        network: Network,
    ) -> Result<TxArtifact, LedgerClientError> {
        let signed_filename = format!("{}.signed", artifact.path());

        // For the docker method, signing keys live on the host and must be
        // staged into the container for the duration of the sign call.
        let staged_files: Vec<String> = match self.method {
            ScriptMethod::DockerCli => signing_key_files
                .iter()
                .map(|file| self.copy_into_docker(file))
                .collect::<Result<Vec<_>, _>>()?,
            ScriptMethod::HostCli => signing_key_files.to_vec(),
        };

        let signing_key_file_details = staged_files
            .iter()
            .unique()
            .map(|file| format!("--signing-key-file {}", file))
            .join(" ");

        let result = self.run(&commands::transaction_sign(
            &self.prefix(),
            artifact.path(),
            &signing_key_file_details,
            &self.network_flag(network),
            &signed_filename,
        ));

        if self.method == ScriptMethod::DockerCli {
            for staged in &staged_files {
                self.delete_file(staged)?;
            }
        }
        result?;

        Ok(TxArtifact::new(signed_filename))
    }

    fn measure_byte_size(&self, artifact: &TxArtifact) -> Result<usize, LedgerClientError> {
        let contents = self.read_artifact_file(artifact.path())?;
        let envelope: serde_json::Value = serde_json::from_str(&contents)?;
        let cbor_hex = envelope["cborHex"].as_str().ok_or_else(|| {
            LedgerClientError::MalformedOutput(format!(
                "transaction envelope {} lacks cborHex",
                artifact.path()
            ))
        })?;
        Ok(hex::decode(cbor_hex)?.len())
    }

    fn min_fee(
        &self,
        num_inputs: usize,
        num_outputs: usize,
        num_witnesses: usize,
        draft: &TxArtifact,
        network: Network,
    ) -> Result<u64, LedgerClientError> {
        let protocol_file = self.protocol_parameters_file(network)?;
        let output = self.run(&commands::transaction_fee(
            &self.prefix(),
            draft.path(),
            num_inputs,
            num_outputs,
            &self.network_flag(network),
            &protocol_file,
            num_witnesses,
        ))?;
        // Response format is `<fee> Lovelace`.
        output
            .split_whitespace()
            .next()
            .and_then(|fee| fee.parse::<u64>().ok())
            .ok_or_else(|| {
                LedgerClientError::MalformedOutput(format!("fee response `{}`", output.trim()))
            })
    }

    fn submit_transaction(
        &self,
        artifact: &TxArtifact,
        network: Network,
    ) -> Result<String, LedgerClientError> {
        self.run(&commands::transaction_submit(
            &self.prefix(),
            artifact.path(),
            &self.network_flag(network),
        ))?;
        self.transaction_id(artifact)
    }

    fn transaction_id(&self, artifact: &TxArtifact) -> Result<String, LedgerClientError> {
        let output = self.run(&commands::transaction_txid(&self.prefix(), artifact.path()))?;
        Ok(output.trim().to_string())
    }

    fn stake_address(&self, address: &str, network: Network) -> Result<String, LedgerClientError> {
        let wallet_prefix = self.settings.wallet_command_prefix(self.method);
        let inspect_command = if wallet_prefix.is_empty() {
            commands::inspect_address(address)
        } else {
            commands::inspect_address_docker(&wallet_prefix, address)
        };
        let inspect_output = self.run_shell(&inspect_command)?;
        let details: serde_json::Value = serde_json::from_str(&inspect_output)?;
        let stake_key_hash = details["stake_key_hash"].as_str().ok_or_else(|| {
            LedgerClientError::MalformedOutput(format!("no stake key hash for {}", address))
        })?;

        // Header byte per network, then re-encode through bech32.
        let stake_hash = match network {
            Network::Mainnet => format!("e1{}", stake_key_hash),
            Network::Testnet => format!("e0{}", stake_key_hash),
        };
        let stake_prefix = match network {
            Network::Mainnet => "stake_",
            Network::Testnet => "stake_test",
        };
        let convert_command = if wallet_prefix.is_empty() {
            commands::stake_address_convert(stake_prefix, &stake_hash)
        } else {
            commands::stake_address_convert_docker(&wallet_prefix, stake_prefix, &stake_hash)
        };
        let stake_address = self.run_shell(&convert_command)?;
        Ok(stake_address.trim().to_string())
    }

    fn stake_reward_balance(
        &self,
        stake_address: &str,
        network: Network,
    ) -> Result<u64, LedgerClientError> {
        let output = self.run(&commands::stake_rewards(
            &self.prefix(),
            stake_address,
            &self.network_flag(network),
        ))?;
        let details: serde_json::Value = serde_json::from_str(&output)?;
        details[0]["rewardAccountBalance"].as_u64().ok_or_else(|| {
            LedgerClientError::MalformedOutput(format!(
                "no reward balance for {}",
                stake_address
            ))
        })
    }

    fn delete_artifact(&self, artifact: &TxArtifact) -> Result<(), LedgerClientError> {
        self.delete_file(artifact.path())
    }
}
