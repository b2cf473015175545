//! Balance adjustment service: the only path that mutates a membership balance.

use crate::db::{AdjustOutcome, BalanceAdjustment, Repository, TransactionFilter, TransactionPage};
use crate::domain::{BalanceTransaction, LedgerAudit, MembershipId, Silver, TransactionId};
use crate::engine::LedgerError;
use crate::notify::{dispatch, Notification, Notifier};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct BalanceService {
    repo: Arc<Repository>,
    notifier: Arc<dyn Notifier>,
    max_page_size: i64,
}

impl BalanceService {
    pub fn new(repo: Arc<Repository>, notifier: Arc<dyn Notifier>, max_page_size: i64) -> Self {
        Self {
            repo,
            notifier,
            max_page_size: max_page_size.max(1),
        }
    }

    /// Credit (positive) or debit (negative) a membership.
    ///
    /// There is no floor: balances may go negative.
    pub async fn adjust(
        &self,
        membership_id: MembershipId,
        amount: Silver,
        reason: &str,
        performed_by: Option<MembershipId>,
    ) -> Result<BalanceTransaction, LedgerError> {
        let outcome = self
            .apply(BalanceAdjustment {
                membership_id,
                amount,
                reason: reason.trim().to_string(),
                performed_by,
                idempotency_key: None,
            })
            .await?;

        match outcome {
            AdjustOutcome::Applied(entry) => {
                dispatch(
                    &self.notifier,
                    Notification::BalanceAdjusted {
                        membership_id,
                        amount,
                        new_balance: entry.balance_after,
                        reason: entry.reason.clone(),
                    },
                );
                Ok(entry)
            }
            // Unkeyed adjustments cannot collide.
            AdjustOutcome::AlreadyApplied { .. } => Err(LedgerError::InvalidArgument(
                "unkeyed adjustment reported as duplicate".to_string(),
            )),
        }
    }

    /// Validated, un-notified adjustment. Used directly by the split engine so
    /// a payout produces one summary notification instead of one per recipient.
    pub async fn apply(&self, adjustment: BalanceAdjustment) -> Result<AdjustOutcome, LedgerError> {
        if adjustment.amount == 0 {
            return Err(LedgerError::InvalidArgument(
                "amount must be non-zero".to_string(),
            ));
        }
        if adjustment.reason.trim().is_empty() {
            return Err(LedgerError::InvalidArgument(
                "reason must not be empty".to_string(),
            ));
        }

        let outcome = self
            .repo
            .adjust_balance(&adjustment)
            .await?
            .ok_or(LedgerError::MembershipNotFound(adjustment.membership_id))?;

        if let AdjustOutcome::Applied(entry) = &outcome {
            info!(
                membership_id = %adjustment.membership_id,
                amount = adjustment.amount,
                balance_after = entry.balance_after,
                performed_by = ?adjustment.performed_by,
                "Balance adjusted"
            );
        }
        Ok(outcome)
    }

    /// Newest-first page of ledger entries; `limit` is clamped to the configured page size.
    pub async fn list_transactions(
        &self,
        filter: TransactionFilter,
        cursor: Option<TransactionId>,
        limit: Option<i64>,
    ) -> Result<TransactionPage, LedgerError> {
        let limit = limit
            .unwrap_or(self.max_page_size)
            .clamp(1, self.max_page_size);
        Ok(self.repo.list_transactions(filter, cursor, limit).await?)
    }

    /// Replay a membership's ledger and compare it with the stored balance.
    pub async fn verify(&self, membership_id: MembershipId) -> Result<LedgerAudit, LedgerError> {
        let balance = self
            .repo
            .get_balance(membership_id)
            .await?
            .ok_or(LedgerError::MembershipNotFound(membership_id))?;
        let history = self.repo.ledger_history(membership_id).await?;
        Ok(LedgerAudit::replay(membership_id, balance, &history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::tests::setup_test_db;
    use crate::domain::{MembershipStatus, Role};
    use crate::notify::ChannelNotifier;

    async fn setup() -> (
        BalanceService,
        MembershipId,
        tokio::sync::mpsc::UnboundedReceiver<Notification>,
        tempfile::TempDir,
    ) {
        let (repo, temp) = setup_test_db().await;
        let guild = repo.create_guild("Blackwater").await.unwrap();
        let member = repo
            .register_member(guild.id, "Ragnar", Role::Member, MembershipStatus::Active)
            .await
            .unwrap()
            .unwrap();
        let (notifier, rx) = ChannelNotifier::new();
        let service = BalanceService::new(Arc::new(repo), Arc::new(notifier), 50);
        (service, member.id, rx, temp)
    }

    #[tokio::test]
    async fn test_adjust_rejects_zero_amount() {
        let (service, id, _rx, _temp) = setup().await;
        let err = service.adjust(id, 0, "nothing", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_adjust_unknown_membership() {
        let (service, _id, _rx, _temp) = setup().await;
        let err = service
            .adjust(MembershipId::new(77), 5, "gift", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::MembershipNotFound(m) if m.as_i64() == 77));
    }

    #[tokio::test]
    async fn test_adjust_allows_debt_and_notifies() {
        let (service, id, mut rx, _temp) = setup().await;
        let entry = service
            .adjust(id, -1_500, "regear advance", Some(id))
            .await
            .unwrap();
        assert_eq!(entry.balance_after, -1_500);

        let notification = rx.recv().await.unwrap();
        assert_eq!(
            notification,
            Notification::BalanceAdjusted {
                membership_id: id,
                amount: -1_500,
                new_balance: -1_500,
                reason: "regear advance".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_verify_after_adjustments() {
        let (service, id, _rx, _temp) = setup().await;
        for amount in [100, -40, 7] {
            service.adjust(id, amount, "mixed", None).await.unwrap();
        }
        let audit = service.verify(id).await.unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.stored_balance, 67);
        assert_eq!(audit.transaction_count, 3);
    }

    #[tokio::test]
    async fn test_list_transactions_clamps_limit() {
        let (service, id, _rx, _temp) = setup().await;
        for _ in 0..3 {
            service.adjust(id, 1, "tick", None).await.unwrap();
        }
        let page = service
            .list_transactions(TransactionFilter::Membership(id), None, Some(0))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.next_cursor.is_some());
    }
}
