// Copyright (c) 2020-2021 MobileCoin Inc.

//! Top-level error for the mass payments binary, aggregating the
//! per-module errors.

use crate::{
    ledger::LedgerClientError, models::PlanError, script::EmitterError,
    service::planner::PlannerError,
};
use displaydoc::Display;
use std::{io, path::PathBuf};

#[derive(Display, Debug)]
pub enum MassPaymentsError {
    /// Error generating transaction plan: {0}
    Planner(PlannerError),

    /// Error handling transaction plan file: {0}
    Plan(PlanError),

    /// Error emitting submission script: {0}
    Emitter(EmitterError),

    /// Error talking to the ledger: {0}
    Ledger(LedgerClientError),

    /// Invalid submission status tag: {0}
    InvalidStatus(String),

    /// Error accessing file {path:?}: {source}
    FileAccess { path: PathBuf, source: io::Error },

    /// Error executing generated script: {0}
    ScriptExecution(io::Error),

    /// No signing key file found for source address {0}
    MissingSigningKey(String),
}

impl From<PlannerError> for MassPaymentsError {
    fn from(src: PlannerError) -> Self {
        Self::Planner(src)
    }
}

impl From<PlanError> for MassPaymentsError {
    fn from(src: PlanError) -> Self {
        Self::Plan(src)
    }
}

impl From<EmitterError> for MassPaymentsError {
    fn from(src: EmitterError) -> Self {
        Self::Emitter(src)
    }
}

impl From<LedgerClientError> for MassPaymentsError {
    fn from(src: LedgerClientError) -> Self {
        Self::Ledger(src)
    }
}
