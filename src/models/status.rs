// Copyright (c) 2020-2021 MobileCoin Inc.

//! Submission status state machine shared by every sub-transaction of a
//! transaction plan (preparation, payment groups, dust batches).

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Lifecycle of a single sub-transaction.
///
/// `TTL_EXPIRED` is not terminal: a later run may rebuild and resubmit the
/// transaction. `SUBMISSION_DONE` is terminal.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, EnumString, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    NotYetSubmitted,
    SubmissionOngoing,
    TtlExpired,
    SubmissionDone,
}

impl Default for TransactionStatus {
    fn default() -> Self {
        Self::NotYetSubmitted
    }
}

impl TransactionStatus {
    /// Whether a run that loads this status must emit build + sign + submit
    /// steps for the sub-transaction.
    pub fn requires_build(self) -> bool {
        matches!(self, Self::NotYetSubmitted | Self::TtlExpired)
    }

    /// Whether a run that loads this status must only poll for confirmation,
    /// seeded with the recorded transaction id.
    pub fn requires_poll_only(self) -> bool {
        matches!(self, Self::SubmissionOngoing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SubmissionDone)
    }

    /// Allowed transitions:
    /// `NOT_YET_SUBMITTED -> SUBMISSION_ONGOING -> {SUBMISSION_DONE | TTL_EXPIRED}`
    /// and `TTL_EXPIRED -> SUBMISSION_ONGOING`.
    pub fn can_transition(self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (Self::NotYetSubmitted, Self::SubmissionOngoing)
                | (Self::SubmissionOngoing, Self::SubmissionDone)
                | (Self::SubmissionOngoing, Self::TtlExpired)
                | (Self::TtlExpired, Self::SubmissionOngoing)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn terminal_status_has_no_outgoing_transitions() {
        for next in TransactionStatus::iter() {
            assert!(!TransactionStatus::SubmissionDone.can_transition(next));
        }
    }

    #[test]
    fn expired_transactions_may_be_reattempted() {
        assert!(TransactionStatus::TtlExpired.can_transition(TransactionStatus::SubmissionOngoing));
        assert!(!TransactionStatus::TtlExpired.can_transition(TransactionStatus::SubmissionDone));
    }

    #[test]
    fn submission_must_pass_through_ongoing() {
        assert!(
            !TransactionStatus::NotYetSubmitted.can_transition(TransactionStatus::SubmissionDone)
        );
        assert!(!TransactionStatus::NotYetSubmitted.can_transition(TransactionStatus::TtlExpired));
    }

    #[test]
    fn status_tags_round_trip_as_strings() {
        for status in TransactionStatus::iter() {
            let tag = serde_json::to_string(&status).unwrap();
            let parsed: TransactionStatus = serde_json::from_str(&tag).unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(
            serde_json::to_string(&TransactionStatus::NotYetSubmitted).unwrap(),
            "\"NOT_YET_SUBMITTED\""
        );
    }
}
