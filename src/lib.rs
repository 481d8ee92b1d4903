// Copyright (c) 2020-2021 MobileCoin Inc.

//! Mass payments planner for Cardano.
//!
//! Batches many destination payments into a bounded set of ledger
//! transactions under the protocol's maximum transaction size, reconciles
//! the circular byte-size/fee/input-selection dependency, and emits an
//! idempotent, resumable submission script backed by a persisted
//! transaction plan.

pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod script;
pub mod service;
pub mod util;

pub use error::MassPaymentsError;
pub use models::TransactionPlan;
pub use service::{PaymentsService, ServiceContext};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
