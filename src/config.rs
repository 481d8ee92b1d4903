// Copyright (c) 2020-2021 MobileCoin Inc.

//! Config definition and processing for the mass payments planner.

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum_macros::{Display, EnumIter};

/// Network the planner and the generated script connect to.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, PartialEq, Serialize, ValueEnum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Network {
    Mainnet,
    Testnet,
}

/// How ledger commands are executed: directly on the host, or inside the
/// node's docker container.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, PartialEq, Serialize, ValueEnum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptMethod {
    HostCli,
    DockerCli,
}

/// Where dust consolidation outputs are sent.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, PartialEq, Serialize, ValueEnum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DustCollectionMethod {
    CollectToSource,
    CollectPerAddress,
}

/// Shape of the generator's output.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, PartialEq, Serialize, ValueEnum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputFormat {
    BashScript,
    Console,
    Json,
    TransactionPlan,
}

/// Ledger-environment knobs that are not per-run command arguments.
#[derive(Clone, Debug)]
pub struct Settings {
    pub cardano_node_docker_image: String,
    pub cardano_wallet_docker_image: String,
    pub cardano_testnet_magic: String,
    /// Smallest usable UTXO amount; change below this is folded into the fee.
    pub cardano_minimum_amount: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cardano_node_docker_image: "adatest_cardano-testnet-node_1".to_string(),
            cardano_wallet_docker_image: "adatest_cardano-testnet-wallet_1".to_string(),
            cardano_testnet_magic: "1097911063".to_string(),
            cardano_minimum_amount: 1_000_000,
        }
    }
}

impl Settings {
    pub fn command_prefix(&self, method: ScriptMethod) -> String {
        match method {
            ScriptMethod::HostCli => String::new(),
            ScriptMethod::DockerCli => format!("docker exec {} ", self.cardano_node_docker_image),
        }
    }

    pub fn wallet_command_prefix(&self, method: ScriptMethod) -> String {
        match method {
            ScriptMethod::HostCli => String::new(),
            ScriptMethod::DockerCli => format!("docker exec {} ", self.cardano_wallet_docker_image),
        }
    }

    pub fn network_flag(&self, network: Network) -> String {
        match network {
            Network::Mainnet => "--mainnet".to_string(),
            Network::Testnet => format!("--testnet-magic {}", self.cardano_testnet_magic),
        }
    }
}

/// Command line interface for the mass payments planner.
#[derive(Debug, Parser)]
#[command(
    name = "mass-payments",
    about = "Batches mass payments on Cardano into a resumable transaction plan and submission script"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a transaction plan and its submission script.
    Generate(GenerateConfig),
    /// Update the submission status of one sub-transaction in a plan file.
    /// Invoked by the generated script to persist its progress.
    UpdatePlan(UpdatePlanConfig),
    /// Print the latest slot number of the chain tip.
    /// Invoked by the generated script for TTL checks.
    ChainTip(ChainTipConfig),
}

#[derive(Args, Clone, Debug)]
pub struct GenerateConfig {
    /// Network which the script will connect to.
    #[arg(long, value_enum, default_value_t = Network::Testnet)]
    pub cardano_network: Network,

    /// Method that will be used in generating the script.
    #[arg(long, value_enum, default_value_t = ScriptMethod::DockerCli)]
    pub script_method: ScriptMethod,

    /// Format of the output script.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub output_type: OutputFormat,

    /// CSV file that contains the source address + signing key file details.
    #[arg(long, required_unless_present = "transaction_plan_file")]
    pub sources_csv: Option<PathBuf>,

    /// CSV file that contains the payment details (address, amount).
    #[arg(long, required_unless_present = "transaction_plan_file")]
    pub payments_csv: Option<PathBuf>,

    /// Source address. Defaults to the first address in the sources CSV.
    #[arg(long)]
    pub source_address: Option<String>,

    /// Source signing key file. May be given multiple times.
    #[arg(long)]
    pub source_signing_key_file: Vec<String>,

    /// Metadata JSON file attached to every transaction.
    #[arg(long)]
    pub metadata_json_file: Option<PathBuf>,

    /// Plain-text message file merged into the transaction metadata under
    /// label 674, split into 64-byte lines.
    #[arg(long)]
    pub metadata_message_file: Option<PathBuf>,

    /// Existing transaction plan file to resume from.
    #[arg(long)]
    pub transaction_plan_file: Option<PathBuf>,

    /// Number of allowable slots for the transaction TTL.
    #[arg(long, default_value_t = 1000)]
    pub allowed_ttl_slots: u64,

    /// Cardano network magic number override.
    #[arg(long)]
    pub magic_number: Option<u64>,

    /// Method to be used for dust collection.
    #[arg(long, value_enum, default_value_t = DustCollectionMethod::CollectToSource)]
    pub dust_collection_method: DustCollectionMethod,

    /// Amount that will serve as the criteria for dust collection.
    #[arg(long, default_value_t = 10_000_000)]
    pub dust_collection_threshold: u64,

    /// Enable the dust collection process.
    #[arg(long)]
    pub enable_dust_collection: bool,

    /// Include the main source address stake rewards.
    #[arg(long)]
    pub include_rewards: bool,

    /// Add comments in the generated script.
    #[arg(long)]
    pub add_comments: bool,

    /// Immediately execute the generated script.
    #[arg(long)]
    pub execute_script_now: bool,
}

#[derive(Args, Clone, Debug)]
pub struct UpdatePlanConfig {
    /// Transaction plan file to update.
    #[arg(long)]
    pub plan_file: PathBuf,

    /// New submission status tag, e.g. SUBMISSION_ONGOING.
    #[arg(long)]
    pub status: String,

    /// Transaction id to record alongside the status.
    #[arg(long)]
    pub tx_id: Option<String>,

    /// Payment group index to update. Without a target selector the
    /// preparation transaction is updated.
    #[arg(long, conflicts_with_all = ["dust_address", "dust_index"])]
    pub group_index: Option<usize>,

    /// Dust target address whose batch should be updated.
    #[arg(long, requires = "dust_index")]
    pub dust_address: Option<String>,

    /// Index of the dust batch under the target address.
    #[arg(long, requires = "dust_address")]
    pub dust_index: Option<usize>,
}

#[derive(Args, Clone, Debug)]
pub struct ChainTipConfig {
    #[arg(long, value_enum, default_value_t = Network::Testnet)]
    pub cardano_network: Network,

    #[arg(long, value_enum, default_value_t = ScriptMethod::DockerCli)]
    pub script_method: ScriptMethod,

    #[arg(long)]
    pub magic_number: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_tags_match_cli_values() {
        assert_eq!(Network::Testnet.to_string(), "TESTNET");
        assert_eq!(ScriptMethod::DockerCli.to_string(), "DOCKER_CLI");
        assert_eq!(
            DustCollectionMethod::CollectPerAddress.to_string(),
            "COLLECT_PER_ADDRESS"
        );
        assert_eq!(OutputFormat::TransactionPlan.to_string(), "TRANSACTION_PLAN");
    }

    #[test]
    fn network_flag_uses_magic_on_testnet() {
        let settings = Settings::default();
        assert_eq!(settings.network_flag(Network::Mainnet), "--mainnet");
        assert_eq!(
            settings.network_flag(Network::Testnet),
            "--testnet-magic 1097911063"
        );
    }

    #[test]
    fn host_method_has_no_command_prefix() {
        let settings = Settings::default();
        assert_eq!(settings.command_prefix(ScriptMethod::HostCli), "");
        assert!(settings
            .command_prefix(ScriptMethod::DockerCli)
            .starts_with("docker exec "));
    }
}
