// Copyright (c) 2020-2021 MobileCoin Inc.

//! Packing and planning services.

pub mod adjustment;
pub mod dust;
pub mod grouping;
pub mod oracle;
pub mod planner;

use crate::{
    config::{Network, ScriptMethod, Settings},
    ledger::LedgerClient,
};
use slog::Logger;
use std::collections::BTreeMap;

/// Run-scoped context threaded through every oracle and engine call, in
/// place of any process-global state. Source details map each source
/// address to its signing key files.
#[derive(Clone, Debug)]
pub struct ServiceContext {
    pub network: Network,
    pub method: ScriptMethod,
    pub settings: Settings,
    pub source_address: String,
    pub source_signing_keys: Vec<String>,
    pub source_details: BTreeMap<String, Vec<String>>,
    pub metadata_file: Option<String>,
}

impl ServiceContext {
    pub fn new(
        network: Network,
        method: ScriptMethod,
        settings: Settings,
        source_address: String,
        source_signing_keys: Vec<String>,
    ) -> Self {
        let mut source_details = BTreeMap::new();
        source_details.insert(source_address.clone(), source_signing_keys.clone());
        Self {
            network,
            method,
            settings,
            source_address,
            source_signing_keys,
            source_details,
            metadata_file: None,
        }
    }
}

/// The mass payments service: owns the ledger client, the run context and
/// the logger, and carries the packing engines as trait impls.
pub struct PaymentsService<L: LedgerClient> {
    pub(crate) ledger: L,
    pub(crate) context: ServiceContext,
    pub(crate) logger: Logger,
}

impl<L: LedgerClient> PaymentsService<L> {
    pub fn new(ledger: L, context: ServiceContext, logger: Logger) -> Self {
        Self {
            ledger,
            context,
            logger,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }
}
