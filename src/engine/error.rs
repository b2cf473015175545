//! Error types for the ledger, sale and split engines.

use thiserror::Error;

use crate::domain::{GuildId, MembershipId, ParticipantId, SaleId};
use crate::notify::PayoutLine;

/// Error from balance adjustments and roster operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("membership {0} not found")]
    MembershipNotFound(MembershipId),
    #[error("guild {0} not found")]
    GuildNotFound(GuildId),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("display name {0:?} is already taken in this guild")]
    NameTaken(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Error from sale, bid, draw and participant operations.
#[derive(Debug, Error)]
pub enum SaleError {
    #[error("sale {0} not found")]
    SaleNotFound(SaleId),
    #[error("membership {0} not found")]
    MembershipNotFound(MembershipId),
    #[error("guild {0} not found")]
    GuildNotFound(GuildId),
    #[error("participant {1} not found on sale {0}")]
    ParticipantNotFound(SaleId, ParticipantId),
    #[error("sale {sale_id}: {reason}")]
    InvalidState { sale_id: SaleId, reason: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Error from split planning and payout.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("sale {0} not found")]
    SaleNotFound(SaleId),
    #[error("membership {0} not found")]
    MembershipNotFound(MembershipId),
    #[error("sale {sale_id}: {reason}")]
    InvalidState { sale_id: SaleId, reason: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Payout stopped part-way. `credited` keep their silver; the sale is
    /// left unsplit so the remaining recipients can be paid by a retry.
    #[error("split of {label} failed at membership {failed} after {} credit(s): {reason}", .credited.len())]
    Partial {
        label: String,
        credited: Vec<PayoutLine>,
        failed: MembershipId,
        reason: String,
    },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl SaleError {
    pub(crate) fn invalid_state(sale_id: SaleId, reason: impl Into<String>) -> Self {
        SaleError::InvalidState {
            sale_id,
            reason: reason.into(),
        }
    }
}

impl SplitError {
    pub(crate) fn invalid_state(sale_id: SaleId, reason: impl Into<String>) -> Self {
        SplitError::InvalidState {
            sale_id,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_error_message_counts_credits() {
        let err = SplitError::Partial {
            label: "sale #3".to_string(),
            credited: vec![PayoutLine {
                membership_id: MembershipId::new(1),
                amount: 10,
            }],
            failed: MembershipId::new(2),
            reason: "database is locked".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "split of sale #3 failed at membership 2 after 1 credit(s): database is locked"
        );
    }

    #[test]
    fn test_invalid_state_message() {
        let err = SaleError::invalid_state(SaleId::new(9), "sale is not drawn");
        assert_eq!(err.to_string(), "sale 9: sale is not drawn");
    }
}
