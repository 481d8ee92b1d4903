// Copyright (c) 2020-2021 MobileCoin Inc.

//! Data model for transaction plans.

pub mod plan;
pub mod status;

pub use plan::{
    InputUtxo, PaymentDetail, PaymentGroup, PlanError, PreparationDetail, RewardDetails,
    SourceAddressDetail, TransactionPlan, PLACEHOLDER_TX_HASH,
};
pub use status::TransactionStatus;
