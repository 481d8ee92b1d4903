// Copyright (c) 2020-2021 MobileCoin Inc.

//! Cardano mass payments planner.

use cardano_mass_payments::{
    config::{ChainTipConfig, Cli, Command, GenerateConfig, OutputFormat, Settings, UpdatePlanConfig},
    error::MassPaymentsError,
    ledger::cli::CardanoCli,
    models::{TransactionPlan, TransactionStatus},
    script::ScriptEmitterService,
    service::{
        planner::{parse_payments_csv, parse_sources_csv, PlanRequest, PlanningService},
        PaymentsService, ServiceContext,
    },
    util::{logger::create_app_logger, metadata},
};
use clap::Parser;
use dotenv::dotenv;
use slog::{crit, info, o, Logger};
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write as _},
    path::PathBuf,
    str::FromStr,
};

fn main() {
    dotenv().ok();

    let cli = Cli::parse();
    let (logger, guard) = create_app_logger();

    let result = match cli.command {
        Command::Generate(config) => generate(config, &logger),
        Command::UpdatePlan(config) => update_plan(config),
        Command::ChainTip(config) => chain_tip(config),
    };

    if let Err(error) = result {
        crit!(logger, "{}", error);
        drop(guard);
        std::process::exit(1);
    }
}

fn settings_with_magic(magic_number: Option<u64>) -> Settings {
    let mut settings = Settings::default();
    if let Some(magic_number) = magic_number {
        settings.cardano_testnet_magic = magic_number.to_string();
    }
    settings
}

fn read_file(path: &std::path::Path) -> Result<String, MassPaymentsError> {
    fs::read_to_string(path).map_err(|source| MassPaymentsError::FileAccess {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the source address, its signing keys and the full source map
/// from the resumed plan or the sources CSV, mirroring the precedence of
/// the command line flags.
fn resolve_sources(
    config: &GenerateConfig,
    resumed: Option<&TransactionPlan>,
    logger: &Logger,
) -> Result<(String, Vec<String>, BTreeMap<String, Vec<String>>), MassPaymentsError> {
    let (mut source_details, mut source_address) = match resumed {
        Some(plan) if !plan.source_details.is_empty() => {
            let details = plan.signing_key_files();
            let main_address = plan
                .main_source_address()
                .map(|detail| detail.address.clone());
            let first = details.keys().next().cloned().unwrap_or_default();
            (details, main_address.unwrap_or(first))
        }
        _ => {
            let sources_csv = config
                .sources_csv
                .as_ref()
                .expect("clap enforces --sources-csv without a plan file");
            let (details, first_address) = parse_sources_csv(sources_csv)?;
            (details, first_address)
        }
    };

    if let Some(address) = &config.source_address {
        source_address = address.clone();
    } else {
        info!(logger, "Source address not provided. Will use {}", source_address);
    }

    let signing_keys = if !config.source_signing_key_file.is_empty() {
        source_details.insert(
            source_address.clone(),
            config.source_signing_key_file.clone(),
        );
        config.source_signing_key_file.clone()
    } else {
        match source_details.get(&source_address) {
            Some(keys) => {
                info!(logger, "Signing key file not provided. Will use {:?}", keys);
                keys.clone()
            }
            None => return Err(MassPaymentsError::MissingSigningKey(source_address)),
        }
    };

    Ok((source_address, signing_keys, source_details))
}

/// Builds (or carries over) the metadata file attached to every
/// transaction, merging in the optional message file.
fn resolve_metadata(
    config: &GenerateConfig,
    resumed: Option<&TransactionPlan>,
) -> Result<(Option<String>, Option<serde_json::Value>), MassPaymentsError> {
    if let Some(plan) = resumed {
        if let Some(value) = &plan.metadata {
            let filename = format!("{}_metadata.json", plan.uuid);
            fs::write(&filename, value.to_string()).map_err(|source| {
                MassPaymentsError::FileAccess {
                    path: PathBuf::from(&filename),
                    source,
                }
            })?;
            return Ok((Some(filename), Some(value.clone())));
        }
    }

    let mut metadata_value: Option<serde_json::Value> = match &config.metadata_json_file {
        Some(path) => Some(
            serde_json::from_str(&read_file(path)?)
                .map_err(cardano_mass_payments::models::PlanError::from)
                .map_err(MassPaymentsError::Plan)?,
        ),
        None => None,
    };

    let mut metadata_filename = config
        .metadata_json_file
        .as_ref()
        .map(|path| path.to_string_lossy().to_string());

    if let Some(message_path) = &config.metadata_message_file {
        let message_lines: Vec<String> =
            read_file(message_path)?.lines().map(str::to_string).collect();
        let merged = metadata::merge_message_into_metadata(metadata_value.take(), &message_lines);
        let filename = format!("{}_metadata.json", uuid::Uuid::new_v4().simple());
        fs::write(&filename, merged.to_string()).map_err(|source| {
            MassPaymentsError::FileAccess {
                path: PathBuf::from(&filename),
                source,
            }
        })?;
        metadata_value = Some(merged);
        metadata_filename = Some(filename);
    }

    Ok((metadata_filename, metadata_value))
}

fn generate(config: GenerateConfig, logger: &Logger) -> Result<(), MassPaymentsError> {
    let resumed = match &config.transaction_plan_file {
        Some(path) => {
            info!(logger, "Transaction plan found, parsing");
            Some(TransactionPlan::from_file(path)?)
        }
        None => None,
    };

    let network = resumed
        .as_ref()
        .map(|plan| plan.network)
        .unwrap_or(config.cardano_network);
    let method = resumed
        .as_ref()
        .map(|plan| plan.script_method)
        .unwrap_or(config.script_method);
    let allowed_ttl_slots = resumed
        .as_ref()
        .map(|plan| plan.allowed_ttl_slots)
        .unwrap_or(config.allowed_ttl_slots);
    let dust_collection_method = resumed
        .as_ref()
        .map(|plan| plan.dust_collection_method)
        .unwrap_or(config.dust_collection_method);
    let dust_collection_threshold = resumed
        .as_ref()
        .map(|plan| plan.dust_collection_threshold)
        .unwrap_or(config.dust_collection_threshold);

    let settings = settings_with_magic(config.magic_number);
    let (source_address, signing_keys, source_details) =
        resolve_sources(&config, resumed.as_ref(), logger)?;
    let (metadata_filename, metadata_value) = resolve_metadata(&config, resumed.as_ref())?;

    let mut context = ServiceContext::new(
        network,
        method,
        settings.clone(),
        source_address,
        signing_keys,
    );
    context.source_details = source_details;
    context.metadata_file = metadata_filename;

    let ledger = CardanoCli::new(settings, method, logger.new(o!("component" => "ledger")));
    let service = PaymentsService::new(ledger, context, logger.clone());

    let mut plan = match resumed {
        Some(plan) => plan,
        None => {
            let payments_csv = config
                .payments_csv
                .as_ref()
                .expect("clap enforces --payments-csv without a plan file");
            let payments = parse_payments_csv(payments_csv)?;
            service.generate_plan(PlanRequest {
                payments,
                allowed_ttl_slots,
                enable_dust_collection: config.enable_dust_collection,
                dust_collection_method,
                dust_collection_threshold,
                include_rewards: config.include_rewards,
            })?
        }
    };
    if metadata_value.is_some() {
        plan.metadata = metadata_value;
    }

    plan.write()?;
    info!(logger, "Transaction plan stored in {}", plan.filename);

    if config.output_type == OutputFormat::TransactionPlan {
        println!(
            "{}",
            serde_json::json!({ "transaction_plan_file": plan.filename })
        );
        return Ok(());
    }

    info!(logger, "Generating the final bash script");
    let store_in_file = config.output_type == OutputFormat::BashScript
        || config.output_type == OutputFormat::Json
        || config.execute_script_now;
    if store_in_file {
        let script_filename = service.write_bash_script(&plan, config.add_comments)?;
        match config.output_type {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "script_file": script_filename }));
            }
            _ => info!(logger, "Script generated, stored in {}", script_filename),
        }
    } else {
        let script = service.generate_bash_script(&plan, config.add_comments)?;
        println!("Generated Script:");
        println!("-------------------------------------");
        println!("{}", script);
    }

    if config.execute_script_now {
        execute_script(&plan)?;
    }

    Ok(())
}

/// Prints the plan summary, asks for confirmation, and runs the generated
/// script streaming its output.
fn execute_script(plan: &TransactionPlan) -> Result<(), MassPaymentsError> {
    println!("Transaction Plan Details:");
    println!("-------------------------------------");
    println!("{}", plan.general_transaction_details());

    print!(
        "You specified immediate execution of the transaction plan. \
         You may review the transaction plan above. \
         Are you sure you wish to continue and execute this plan? [YES/No] : "
    );
    io::stdout().flush().map_err(MassPaymentsError::ScriptExecution)?;
    loop {
        let mut answer = String::new();
        io::stdin()
            .read_line(&mut answer)
            .map_err(MassPaymentsError::ScriptExecution)?;
        match answer.trim().to_lowercase().as_str() {
            "" | "yes" => break,
            "no" => {
                println!("Thank you for using the MassPayments Script");
                return Ok(());
            }
            _ => {
                print!("Please select from the following options [YES/No] : ");
                io::stdout()
                    .flush()
                    .map_err(MassPaymentsError::ScriptExecution)?;
            }
        }
    }
    println!("-------------------------------------");

    let status = std::process::Command::new("bash")
        .arg(format!("{}.sh", plan.uuid))
        .status()
        .map_err(MassPaymentsError::ScriptExecution)?;
    if !status.success() {
        return Err(MassPaymentsError::ScriptExecution(io::Error::new(
            io::ErrorKind::Other,
            format!("script exited with {}", status),
        )));
    }
    Ok(())
}

/// `update-plan` subcommand: records a sub-transaction status transition.
/// Called by the generated script after every submission/polling step.
fn update_plan(config: UpdatePlanConfig) -> Result<(), MassPaymentsError> {
    let mut plan = TransactionPlan::from_file(&config.plan_file)?;
    let status = TransactionStatus::from_str(&config.status)
        .map_err(|_| MassPaymentsError::InvalidStatus(config.status.clone()))?;
    let tx_id = config.tx_id.as_deref();

    match (&config.dust_address, config.dust_index, config.group_index) {
        (Some(address), Some(index), _) => plan.set_dust_status(address, index, status, tx_id)?,
        (_, _, Some(index)) => plan.set_group_status(index, status, tx_id)?,
        _ => plan.set_prep_status(status, tx_id)?,
    }
    plan.write()?;
    Ok(())
}

/// `chain-tip` subcommand: prints the latest slot number. Called by the
/// generated script for TTL checks; nothing but the slot may reach stdout.
fn chain_tip(config: ChainTipConfig) -> Result<(), MassPaymentsError> {
    let settings = settings_with_magic(config.magic_number);
    let ledger = CardanoCli::new(
        settings,
        config.script_method,
        Logger::root(slog::Discard, o!()),
    );
    use cardano_mass_payments::ledger::LedgerClient;
    let slot = ledger.chain_tip_slot(config.cardano_network)?;
    println!("{}", slot);
    Ok(())
}
