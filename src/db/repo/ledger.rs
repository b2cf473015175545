//! Balance adjustments and the append-only transaction log.

use crate::domain::{
    BalanceTransaction, GuildId, MembershipId, Silver, TimeMs, TransactionId,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::Repository;

/// One requested balance change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceAdjustment {
    pub membership_id: MembershipId,
    pub amount: Silver,
    pub reason: String,
    pub performed_by: Option<MembershipId>,
    /// When set, at most one adjustment with this key is ever committed.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustOutcome {
    /// Balance updated and the log entry appended.
    Applied(BalanceTransaction),
    /// An entry with the same idempotency key already exists; nothing changed.
    /// `amount` is what that earlier entry applied.
    AlreadyApplied { amount: Silver, balance: Silver },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionFilter {
    Membership(MembershipId),
    Guild(GuildId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPage {
    pub items: Vec<BalanceTransaction>,
    pub next_cursor: Option<TransactionId>,
}

const TRANSACTION_COLUMNS: &str =
    "bt.id, bt.membership_id, bt.amount, bt.balance_after, bt.reason, bt.performed_by, bt.idempotency_key, bt.created_at";

fn transaction_from_row(row: &SqliteRow) -> BalanceTransaction {
    BalanceTransaction {
        id: TransactionId::new(row.get("id")),
        membership_id: MembershipId::new(row.get("membership_id")),
        amount: row.get("amount"),
        balance_after: row.get("balance_after"),
        reason: row.get("reason"),
        performed_by: row
            .get::<Option<i64>, _>("performed_by")
            .map(MembershipId::new),
        idempotency_key: row.get("idempotency_key"),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

impl Repository {
    /// Apply a balance change and append its ledger entry in one store transaction.
    ///
    /// The balance update is the first statement, so the write lock is taken
    /// before anything is read and concurrent adjustments serialize without
    /// lost updates. Returns `None` when the membership does not exist.
    ///
    /// # Errors
    /// Returns an error if any statement or the commit fails; nothing is applied.
    pub async fn adjust_balance(
        &self,
        adjustment: &BalanceAdjustment,
    ) -> Result<Option<AdjustOutcome>, sqlx::Error> {
        let now = TimeMs::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE memberships SET balance = balance + ? WHERE id = ? RETURNING balance",
        )
        .bind(adjustment.amount)
        .bind(adjustment.membership_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };
        let balance_after: Silver = updated.get("balance");

        let inserted = sqlx::query(
            r#"
            INSERT INTO balance_transactions
                (membership_id, amount, balance_after, reason, performed_by, idempotency_key, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(adjustment.membership_id.as_i64())
        .bind(adjustment.amount)
        .bind(balance_after)
        .bind(&adjustment.reason)
        .bind(adjustment.performed_by.map(|m| m.as_i64()))
        .bind(adjustment.idempotency_key.as_deref())
        .bind(now.as_ms())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(inserted) = inserted else {
            tx.rollback().await?;
            debug!(
                membership_id = %adjustment.membership_id,
                key = ?adjustment.idempotency_key,
                "Adjustment already applied, rolled back"
            );
            let amount = match adjustment.idempotency_key.as_deref() {
                Some(key) => self.keyed_amount(key).await?.unwrap_or_default(),
                None => 0,
            };
            let balance = self
                .get_balance(adjustment.membership_id)
                .await?
                .unwrap_or_default();
            return Ok(Some(AdjustOutcome::AlreadyApplied { amount, balance }));
        };

        tx.commit().await?;

        Ok(Some(AdjustOutcome::Applied(BalanceTransaction {
            id: TransactionId::new(inserted.get("id")),
            membership_id: adjustment.membership_id,
            amount: adjustment.amount,
            balance_after,
            reason: adjustment.reason.clone(),
            performed_by: adjustment.performed_by,
            idempotency_key: adjustment.idempotency_key.clone(),
            created_at: now,
        })))
    }

    pub async fn get_balance(
        &self,
        membership_id: MembershipId,
    ) -> Result<Option<Silver>, sqlx::Error> {
        let row = sqlx::query("SELECT balance FROM memberships WHERE id = ?")
            .bind(membership_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("balance")))
    }

    /// Amount of the committed entry carrying this idempotency key, if any.
    pub async fn keyed_amount(&self, key: &str) -> Result<Option<Silver>, sqlx::Error> {
        let row = sqlx::query("SELECT amount FROM balance_transactions WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("amount")))
    }

    /// Page through ledger entries newest-first.
    ///
    /// `cursor` is the id of the last entry of the previous page; entries
    /// strictly older than it are returned.
    pub async fn list_transactions(
        &self,
        filter: TransactionFilter,
        cursor: Option<TransactionId>,
        limit: i64,
    ) -> Result<TransactionPage, sqlx::Error> {
        let limit = limit.max(1);
        let cursor = cursor.map(|c| c.as_i64()).unwrap_or(i64::MAX);

        let rows = match filter {
            TransactionFilter::Membership(membership_id) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {}
                    FROM balance_transactions bt
                    WHERE bt.membership_id = ? AND bt.id < ?
                    ORDER BY bt.id DESC
                    LIMIT ?
                    "#,
                    TRANSACTION_COLUMNS
                ))
                .bind(membership_id.as_i64())
                .bind(cursor)
                .bind(limit + 1)
                .fetch_all(&self.pool)
                .await?
            }
            TransactionFilter::Guild(guild_id) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {}
                    FROM balance_transactions bt
                    JOIN memberships m ON m.id = bt.membership_id
                    WHERE m.guild_id = ? AND bt.id < ?
                    ORDER BY bt.id DESC
                    LIMIT ?
                    "#,
                    TRANSACTION_COLUMNS
                ))
                .bind(guild_id.as_i64())
                .bind(cursor)
                .bind(limit + 1)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut items: Vec<BalanceTransaction> = rows.iter().map(transaction_from_row).collect();
        let next_cursor = if items.len() as i64 > limit {
            items.truncate(limit as usize);
            items.last().map(|t| t.id)
        } else {
            None
        };

        Ok(TransactionPage { items, next_cursor })
    }

    /// Every ledger entry for a membership in creation order, for replay audits.
    pub async fn ledger_history(
        &self,
        membership_id: MembershipId,
    ) -> Result<Vec<BalanceTransaction>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM balance_transactions bt
            WHERE bt.membership_id = ?
            ORDER BY bt.id ASC
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(membership_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(transaction_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::tests::setup_test_db;
    use crate::domain::{MembershipStatus, Role};

    fn credit(membership_id: MembershipId, amount: Silver) -> BalanceAdjustment {
        BalanceAdjustment {
            membership_id,
            amount,
            reason: "test".to_string(),
            performed_by: None,
            idempotency_key: None,
        }
    }

    async fn member(repo: &Repository) -> MembershipId {
        let guild = repo.create_guild("Blackwater").await.unwrap();
        repo.register_member(guild.id, "Ragnar", Role::Member, MembershipStatus::Active)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_adjust_updates_balance_and_appends_entry() {
        let (repo, _temp) = setup_test_db().await;
        let id = member(&repo).await;

        let outcome = repo.adjust_balance(&credit(id, 500)).await.unwrap().unwrap();
        let AdjustOutcome::Applied(entry) = outcome else {
            panic!("expected Applied");
        };
        assert_eq!(entry.balance_after, 500);

        repo.adjust_balance(&credit(id, -800)).await.unwrap().unwrap();
        assert_eq!(repo.get_balance(id).await.unwrap(), Some(-300));

        let history = repo.ledger_history(id).await.unwrap();
        assert_eq!(
            history.iter().map(|t| t.balance_after).collect::<Vec<_>>(),
            vec![500, -300]
        );
    }

    #[tokio::test]
    async fn test_adjust_missing_membership_returns_none() {
        let (repo, _temp) = setup_test_db().await;
        let outcome = repo
            .adjust_balance(&credit(MembershipId::new(404), 10))
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_idempotency_key_rolls_back_duplicate() {
        let (repo, _temp) = setup_test_db().await;
        let id = member(&repo).await;

        let mut adj = credit(id, 100);
        adj.idempotency_key = Some("sale-split:1:1".to_string());

        let first = repo.adjust_balance(&adj).await.unwrap().unwrap();
        assert!(matches!(first, AdjustOutcome::Applied(_)));

        let second = repo.adjust_balance(&adj).await.unwrap().unwrap();
        assert_eq!(
            second,
            AdjustOutcome::AlreadyApplied {
                amount: 100,
                balance: 100
            }
        );
        assert_eq!(repo.ledger_history(id).await.unwrap().len(), 1);

        // A replay reports the amount first applied, not the one requested now.
        let mut replay = credit(id, 999);
        replay.idempotency_key = Some("sale-split:1:1".to_string());
        assert_eq!(
            repo.adjust_balance(&replay).await.unwrap().unwrap(),
            AdjustOutcome::AlreadyApplied {
                amount: 100,
                balance: 100
            }
        );
        assert_eq!(repo.keyed_amount("sale-split:1:1").await.unwrap(), Some(100));
        assert_eq!(repo.keyed_amount("sale-split:1:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_transactions_paginates_newest_first() {
        let (repo, _temp) = setup_test_db().await;
        let id = member(&repo).await;
        for amount in 1..=5 {
            repo.adjust_balance(&credit(id, amount)).await.unwrap();
        }

        let page1 = repo
            .list_transactions(TransactionFilter::Membership(id), None, 2)
            .await
            .unwrap();
        assert_eq!(page1.items.iter().map(|t| t.amount).collect::<Vec<_>>(), vec![5, 4]);
        assert!(page1.next_cursor.is_some());

        let page2 = repo
            .list_transactions(TransactionFilter::Membership(id), page1.next_cursor, 2)
            .await
            .unwrap();
        assert_eq!(page2.items.iter().map(|t| t.amount).collect::<Vec<_>>(), vec![3, 2]);

        let page3 = repo
            .list_transactions(TransactionFilter::Membership(id), page2.next_cursor, 2)
            .await
            .unwrap();
        assert_eq!(page3.items.iter().map(|t| t.amount).collect::<Vec<_>>(), vec![1]);
        assert_eq!(page3.next_cursor, None);
    }

    #[tokio::test]
    async fn test_list_transactions_by_guild() {
        let (repo, _temp) = setup_test_db().await;
        let guild = repo.create_guild("Blackwater").await.unwrap();
        let other = repo.create_guild("Redtide").await.unwrap();
        let a = repo
            .register_member(guild.id, "A", Role::Member, MembershipStatus::Active)
            .await
            .unwrap()
            .unwrap();
        let b = repo
            .register_member(guild.id, "B", Role::Member, MembershipStatus::Active)
            .await
            .unwrap()
            .unwrap();
        let c = repo
            .register_member(other.id, "C", Role::Member, MembershipStatus::Active)
            .await
            .unwrap()
            .unwrap();
        repo.adjust_balance(&credit(a.id, 1)).await.unwrap();
        repo.adjust_balance(&credit(c.id, 2)).await.unwrap();
        repo.adjust_balance(&credit(b.id, 3)).await.unwrap();

        let page = repo
            .list_transactions(TransactionFilter::Guild(guild.id), None, 10)
            .await
            .unwrap();
        assert_eq!(page.items.iter().map(|t| t.amount).collect::<Vec<_>>(), vec![3, 1]);
    }
}
