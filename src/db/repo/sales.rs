//! Sale, bid and participant operations for the repository.

use crate::domain::{
    Bid, GuildId, MembershipId, NewSale, Participant, ParticipantId, Sale, SaleId, SaleStatus,
    TimeMs,
};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

use super::{decode_error, Repository};

const SALE_COLUMNS: &str = "id, guild_id, created_by, price, duration_hours, repair_cost, bonus_amount, description, status, created_at, expires_at, winner_id, drawn_at, split_completed, split_completed_at";

/// Committed outcome of a draw transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawRecord {
    Drawn { sale: Sale, winner: Bid, bid_count: usize },
    Cancelled { sale: Sale },
}

/// Outcome of a participant insert batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantWrite {
    /// The sale is missing, not drawn, already split, or a split of it has
    /// started. Nothing was written.
    NotEligible,
    Written {
        added: Vec<MembershipId>,
        already_tagged: Vec<MembershipId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRemoval {
    NotEligible,
    NotFound,
    Removed,
}

fn sale_from_row(row: &SqliteRow) -> Result<Sale, sqlx::Error> {
    let status: String = row.get("status");
    Ok(Sale {
        id: SaleId::new(row.get("id")),
        guild_id: GuildId::new(row.get("guild_id")),
        created_by: MembershipId::new(row.get("created_by")),
        price: row.get("price"),
        duration_hours: row.get("duration_hours"),
        repair_cost: row.get("repair_cost"),
        bonus_amount: row.get("bonus_amount"),
        description: row.get("description"),
        status: SaleStatus::from_str(&status).map_err(|_| decode_error("status", &status))?,
        created_at: TimeMs::new(row.get("created_at")),
        expires_at: TimeMs::new(row.get("expires_at")),
        winner_id: row.get::<Option<i64>, _>("winner_id").map(MembershipId::new),
        drawn_at: row.get::<Option<i64>, _>("drawn_at").map(TimeMs::new),
        split_completed: row.get::<i64, _>("split_completed") != 0,
        split_completed_at: row
            .get::<Option<i64>, _>("split_completed_at")
            .map(TimeMs::new),
    })
}

fn bid_from_row(row: &SqliteRow) -> Bid {
    Bid {
        id: row.get("id"),
        sale_id: SaleId::new(row.get("sale_id")),
        membership_id: MembershipId::new(row.get("membership_id")),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

/// Which state a sale must be in for a claim to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SaleClaim {
    Open,
    /// Drawn and not yet marked split.
    DrawnUnsplit,
    /// Drawn, not split, and no split plan pinned yet. Participant changes need this.
    DrawnUnplanned,
}

/// Take the write lock on a sale row if it is still in the claimed state.
///
/// A no-op update is the first statement of the transaction, so the check
/// and the later writes are serialized against every other writer.
pub(super) async fn claim_sale(
    conn: &mut SqliteConnection,
    sale_id: SaleId,
    claim: SaleClaim,
) -> Result<bool, sqlx::Error> {
    let (sql, status) = match claim {
        SaleClaim::Open => (
            "UPDATE sales SET status = status WHERE id = ? AND status = ?",
            SaleStatus::Open,
        ),
        SaleClaim::DrawnUnsplit => (
            "UPDATE sales SET status = status WHERE id = ? AND status = ? AND split_completed = 0",
            SaleStatus::Drawn,
        ),
        SaleClaim::DrawnUnplanned => (
            r#"
            UPDATE sales SET status = status
            WHERE id = ? AND status = ? AND split_completed = 0
              AND NOT EXISTS (SELECT 1 FROM split_plans p WHERE p.sale_id = sales.id)
            "#,
            SaleStatus::Drawn,
        ),
    };
    let result = sqlx::query(sql)
        .bind(sale_id.as_i64())
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

impl Repository {
    // =========================================================================
    // Sale lifecycle
    // =========================================================================

    /// Insert a new OPEN sale expiring `duration_hours` after `now`.
    pub async fn create_sale(&self, new_sale: &NewSale, now: TimeMs) -> Result<Sale, sqlx::Error> {
        let expires_at = now.plus_hours(new_sale.duration_hours);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sales (guild_id, created_by, price, duration_hours, repair_cost, bonus_amount,
                               description, status, created_at, expires_at, split_completed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            RETURNING {}
            "#,
            SALE_COLUMNS
        ))
        .bind(new_sale.guild_id.as_i64())
        .bind(new_sale.created_by.as_i64())
        .bind(new_sale.price)
        .bind(new_sale.duration_hours)
        .bind(new_sale.repair_cost)
        .bind(new_sale.bonus_amount)
        .bind(new_sale.description.as_deref())
        .bind(SaleStatus::Open.as_str())
        .bind(now.as_ms())
        .bind(expires_at.as_ms())
        .fetch_one(&self.pool)
        .await?;

        sale_from_row(&row)
    }

    pub async fn get_sale(&self, sale_id: SaleId) -> Result<Option<Sale>, sqlx::Error> {
        let row = sqlx::query(&format!("SELECT {} FROM sales WHERE id = ?", SALE_COLUMNS))
            .bind(sale_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(sale_from_row).transpose()
    }

    /// List a guild's sales in one status, oldest expiry first.
    ///
    /// With `expired = Some(true)` only sales past `expires_at` are returned,
    /// with `Some(false)` only those still running.
    pub async fn list_sales(
        &self,
        guild_id: GuildId,
        status: SaleStatus,
        expired: Option<bool>,
        now: TimeMs,
    ) -> Result<Vec<Sale>, sqlx::Error> {
        let expiry_clause = match expired {
            Some(true) => "AND expires_at <= ?",
            Some(false) => "AND expires_at > ?",
            None => "AND ? IS NOT NULL",
        };
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM sales
            WHERE guild_id = ? AND status = ? {}
            ORDER BY expires_at ASC, id ASC
            "#,
            SALE_COLUMNS, expiry_clause
        ))
        .bind(guild_id.as_i64())
        .bind(status.as_str())
        .bind(now.as_ms())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sale_from_row).collect()
    }

    /// Transition an OPEN sale to DRAWN (winner chosen by `pick`) or, with no
    /// bids, to CANCELLED.
    ///
    /// `pick` receives the bid count and returns the winning index. Returns
    /// `None` when the sale does not exist or is no longer OPEN; under
    /// concurrent calls exactly one caller gets `Some`.
    pub async fn draw_sale<F>(
        &self,
        sale_id: SaleId,
        now: TimeMs,
        pick: F,
    ) -> Result<Option<DrawRecord>, sqlx::Error>
    where
        F: FnOnce(usize) -> usize + Send,
    {
        let mut tx = self.pool.begin().await?;

        if !claim_sale(&mut tx, sale_id, SaleClaim::Open).await? {
            tx.rollback().await?;
            debug!(sale_id = %sale_id, "Sale not open, nothing to draw");
            return Ok(None);
        }

        let bids: Vec<Bid> = sqlx::query(
            "SELECT id, sale_id, membership_id, created_at FROM bids WHERE sale_id = ? ORDER BY id ASC",
        )
        .bind(sale_id.as_i64())
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(bid_from_row)
        .collect();

        let winner = if bids.is_empty() {
            sqlx::query("UPDATE sales SET status = ? WHERE id = ? AND status = ?")
                .bind(SaleStatus::Cancelled.as_str())
                .bind(sale_id.as_i64())
                .bind(SaleStatus::Open.as_str())
                .execute(&mut *tx)
                .await?;
            None
        } else {
            let index = pick(bids.len()).min(bids.len() - 1);
            let winner = bids[index].clone();
            sqlx::query(
                "UPDATE sales SET status = ?, winner_id = ?, drawn_at = ? WHERE id = ? AND status = ?",
            )
            .bind(SaleStatus::Drawn.as_str())
            .bind(winner.membership_id.as_i64())
            .bind(now.as_ms())
            .bind(sale_id.as_i64())
            .bind(SaleStatus::Open.as_str())
            .execute(&mut *tx)
            .await?;
            Some(winner)
        };

        let row = sqlx::query(&format!("SELECT {} FROM sales WHERE id = ?", SALE_COLUMNS))
            .bind(sale_id.as_i64())
            .fetch_one(&mut *tx)
            .await?;
        let sale = sale_from_row(&row)?;

        tx.commit().await?;

        Ok(Some(match winner {
            Some(winner) => DrawRecord::Drawn {
                sale,
                winner,
                bid_count: bids.len(),
            },
            None => DrawRecord::Cancelled { sale },
        }))
    }

    /// Mark a drawn sale as split. Returns false if it was not drawn or was
    /// already split, in which case nothing changes.
    pub async fn mark_split_completed(
        &self,
        sale_id: SaleId,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE sales SET split_completed = 1, split_completed_at = ?
            WHERE id = ? AND status = ? AND split_completed = 0
            "#,
        )
        .bind(now.as_ms())
        .bind(sale_id.as_i64())
        .bind(SaleStatus::Drawn.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Bids
    // =========================================================================

    /// Sign a member up for a sale.
    ///
    /// The insert is a single conditional statement: it only lands while the
    /// sale is OPEN and unexpired and the member is an active member of the
    /// sale's guild. Returns `None` when any condition fails or the member
    /// already signed up.
    pub async fn insert_bid(
        &self,
        sale_id: SaleId,
        membership_id: MembershipId,
        now: TimeMs,
    ) -> Result<Option<Bid>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO bids (sale_id, membership_id, created_at)
            SELECT s.id, m.id, ?
            FROM sales s
            JOIN memberships m ON m.guild_id = s.guild_id
            WHERE s.id = ? AND m.id = ? AND s.status = ? AND s.expires_at > ? AND m.status = 'active'
            ON CONFLICT(sale_id, membership_id) DO NOTHING
            RETURNING id, sale_id, membership_id, created_at
            "#,
        )
        .bind(now.as_ms())
        .bind(sale_id.as_i64())
        .bind(membership_id.as_i64())
        .bind(SaleStatus::Open.as_str())
        .bind(now.as_ms())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(bid_from_row))
    }

    pub async fn get_bid(
        &self,
        sale_id: SaleId,
        membership_id: MembershipId,
    ) -> Result<Option<Bid>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, sale_id, membership_id, created_at FROM bids WHERE sale_id = ? AND membership_id = ?",
        )
        .bind(sale_id.as_i64())
        .bind(membership_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(bid_from_row))
    }

    pub async fn list_bids(&self, sale_id: SaleId) -> Result<Vec<Bid>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, sale_id, membership_id, created_at FROM bids WHERE sale_id = ? ORDER BY id ASC",
        )
        .bind(sale_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(bid_from_row).collect())
    }

    // =========================================================================
    // Participants
    // =========================================================================

    /// Tag members on a drawn sale whose split has not started. Inserts are
    /// idempotent per (sale, member): an existing row is reported as already tagged.
    pub async fn insert_participants(
        &self,
        sale_id: SaleId,
        members: &[MembershipId],
        tagged_by: MembershipId,
        now: TimeMs,
    ) -> Result<ParticipantWrite, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if !claim_sale(&mut tx, sale_id, SaleClaim::DrawnUnplanned).await? {
            tx.rollback().await?;
            return Ok(ParticipantWrite::NotEligible);
        }

        let mut added = Vec::new();
        let mut already_tagged = Vec::new();
        for membership_id in members {
            let result = sqlx::query(
                r#"
                INSERT INTO participants (sale_id, membership_id, tagged_by, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(sale_id, membership_id) DO NOTHING
                "#,
            )
            .bind(sale_id.as_i64())
            .bind(membership_id.as_i64())
            .bind(tagged_by.as_i64())
            .bind(now.as_ms())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                added.push(*membership_id);
            } else {
                already_tagged.push(*membership_id);
            }
        }

        tx.commit().await?;
        Ok(ParticipantWrite::Written {
            added,
            already_tagged,
        })
    }

    /// Remove one participant from a drawn sale whose split has not started.
    pub async fn delete_participant(
        &self,
        sale_id: SaleId,
        participant_id: ParticipantId,
    ) -> Result<ParticipantRemoval, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if !claim_sale(&mut tx, sale_id, SaleClaim::DrawnUnplanned).await? {
            tx.rollback().await?;
            return Ok(ParticipantRemoval::NotEligible);
        }

        let result = sqlx::query("DELETE FROM participants WHERE id = ? AND sale_id = ?")
            .bind(participant_id.as_i64())
            .bind(sale_id.as_i64())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ParticipantRemoval::NotFound);
        }

        tx.commit().await?;
        Ok(ParticipantRemoval::Removed)
    }

    pub async fn list_participants(&self, sale_id: SaleId) -> Result<Vec<Participant>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.sale_id, p.membership_id, m.display_name, p.tagged_by, p.created_at
            FROM participants p
            JOIN memberships m ON m.id = p.membership_id
            WHERE p.sale_id = ?
            ORDER BY p.id ASC
            "#,
        )
        .bind(sale_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Participant {
                id: ParticipantId::new(row.get("id")),
                sale_id: SaleId::new(row.get("sale_id")),
                membership_id: MembershipId::new(row.get("membership_id")),
                display_name: row.get("display_name"),
                tagged_by: MembershipId::new(row.get("tagged_by")),
                created_at: TimeMs::new(row.get("created_at")),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::tests::setup_test_db;
    use crate::domain::{Membership, MembershipStatus, Role};

    async fn seed(repo: &Repository, names: &[&str]) -> (GuildId, Vec<Membership>) {
        let guild = repo.create_guild("Blackwater").await.unwrap();
        let mut members = Vec::new();
        for name in names {
            members.push(
                repo.register_member(guild.id, name, Role::Member, MembershipStatus::Active)
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        (guild.id, members)
    }

    fn new_sale(guild_id: GuildId, created_by: MembershipId) -> NewSale {
        NewSale {
            guild_id,
            created_by,
            price: 1_000_000,
            duration_hours: 24,
            repair_cost: 0,
            bonus_amount: 0,
            description: Some("T8 tab".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_sale_sets_expiry() {
        let (repo, _temp) = setup_test_db().await;
        let (guild_id, members) = seed(&repo, &["Officer"]).await;
        let now = TimeMs::new(1_000);

        let sale = repo
            .create_sale(&new_sale(guild_id, members[0].id), now)
            .await
            .unwrap();
        assert_eq!(sale.status, SaleStatus::Open);
        assert_eq!(sale.expires_at, now.plus_hours(24));
        assert!(!sale.split_completed);
        assert_eq!(repo.get_sale(sale.id).await.unwrap(), Some(sale));
    }

    #[tokio::test]
    async fn test_insert_bid_is_unique_and_requires_open_unexpired_sale() {
        let (repo, _temp) = setup_test_db().await;
        let (guild_id, members) = seed(&repo, &["A", "B"]).await;
        let now = TimeMs::now();
        let sale = repo
            .create_sale(&new_sale(guild_id, members[0].id), now)
            .await
            .unwrap();

        assert!(repo.insert_bid(sale.id, members[1].id, now).await.unwrap().is_some());
        assert!(repo.insert_bid(sale.id, members[1].id, now).await.unwrap().is_none());
        assert_eq!(repo.list_bids(sale.id).await.unwrap().len(), 1);

        let after_expiry = sale.expires_at;
        assert!(repo
            .insert_bid(sale.id, members[0].id, after_expiry)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_insert_bid_rejects_member_of_other_guild() {
        let (repo, _temp) = setup_test_db().await;
        let (guild_id, members) = seed(&repo, &["A"]).await;
        let other = repo.create_guild("Redtide").await.unwrap();
        let outsider = repo
            .register_member(other.id, "Outsider", Role::Member, MembershipStatus::Active)
            .await
            .unwrap()
            .unwrap();
        let now = TimeMs::now();
        let sale = repo
            .create_sale(&new_sale(guild_id, members[0].id), now)
            .await
            .unwrap();

        assert!(repo.insert_bid(sale.id, outsider.id, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_draw_sale_picks_indexed_bid_once() {
        let (repo, _temp) = setup_test_db().await;
        let (guild_id, members) = seed(&repo, &["A", "B", "C"]).await;
        let now = TimeMs::now();
        let sale = repo
            .create_sale(&new_sale(guild_id, members[0].id), now)
            .await
            .unwrap();
        for m in &members {
            repo.insert_bid(sale.id, m.id, now).await.unwrap();
        }

        let record = repo.draw_sale(sale.id, now, |n| n - 1).await.unwrap();
        match record {
            Some(DrawRecord::Drawn {
                sale,
                winner,
                bid_count,
            }) => {
                assert_eq!(winner.membership_id, members[2].id);
                assert_eq!(sale.status, SaleStatus::Drawn);
                assert_eq!(sale.winner_id, Some(members[2].id));
                assert_eq!(bid_count, 3);
            }
            other => panic!("expected Drawn, got {:?}", other),
        }

        assert!(repo.draw_sale(sale.id, now, |_| 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_draw_sale_without_bids_cancels() {
        let (repo, _temp) = setup_test_db().await;
        let (guild_id, members) = seed(&repo, &["A"]).await;
        let now = TimeMs::now();
        let sale = repo
            .create_sale(&new_sale(guild_id, members[0].id), now)
            .await
            .unwrap();

        let record = repo.draw_sale(sale.id, now, |_| 0).await.unwrap();
        assert!(matches!(
            record,
            Some(DrawRecord::Cancelled { ref sale }) if sale.status == SaleStatus::Cancelled
        ));
        assert!(repo.draw_sale(sale.id, now, |_| 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_participants_require_drawn_unsplit_sale() {
        let (repo, _temp) = setup_test_db().await;
        let (guild_id, members) = seed(&repo, &["A", "B"]).await;
        let now = TimeMs::now();
        let sale = repo
            .create_sale(&new_sale(guild_id, members[0].id), now)
            .await
            .unwrap();
        let ids: Vec<_> = members.iter().map(|m| m.id).collect();

        let open = repo
            .insert_participants(sale.id, &ids, members[0].id, now)
            .await
            .unwrap();
        assert_eq!(open, ParticipantWrite::NotEligible);

        repo.insert_bid(sale.id, members[1].id, now).await.unwrap();
        repo.draw_sale(sale.id, now, |_| 0).await.unwrap();

        let written = repo
            .insert_participants(sale.id, &ids, members[0].id, now)
            .await
            .unwrap();
        assert_eq!(
            written,
            ParticipantWrite::Written {
                added: ids.clone(),
                already_tagged: vec![]
            }
        );
        let again = repo
            .insert_participants(sale.id, &ids[..1], members[0].id, now)
            .await
            .unwrap();
        assert_eq!(
            again,
            ParticipantWrite::Written {
                added: vec![],
                already_tagged: vec![ids[0]]
            }
        );

        let participants = repo.list_participants(sale.id).await.unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[0].display_name, "A");

        assert_eq!(
            repo.delete_participant(sale.id, participants[0].id)
                .await
                .unwrap(),
            ParticipantRemoval::Removed
        );
        assert_eq!(
            repo.delete_participant(sale.id, participants[0].id)
                .await
                .unwrap(),
            ParticipantRemoval::NotFound
        );

        assert!(repo.mark_split_completed(sale.id, now).await.unwrap());
        assert!(!repo.mark_split_completed(sale.id, now).await.unwrap());
        assert_eq!(
            repo.delete_participant(sale.id, participants[1].id)
                .await
                .unwrap(),
            ParticipantRemoval::NotEligible
        );
    }

    #[tokio::test]
    async fn test_list_sales_expiry_filter() {
        let (repo, _temp) = setup_test_db().await;
        let (guild_id, members) = seed(&repo, &["A"]).await;
        let t0 = TimeMs::new(0);
        let mut short = new_sale(guild_id, members[0].id);
        short.duration_hours = 1;
        let short = repo.create_sale(&short, t0).await.unwrap();
        let long = repo
            .create_sale(&new_sale(guild_id, members[0].id), t0)
            .await
            .unwrap();

        let now = t0.plus_hours(2);
        let all = repo
            .list_sales(guild_id, SaleStatus::Open, None, now)
            .await
            .unwrap();
        assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![short.id, long.id]);

        let expired = repo
            .list_sales(guild_id, SaleStatus::Open, Some(true), now)
            .await
            .unwrap();
        assert_eq!(expired.iter().map(|s| s.id).collect::<Vec<_>>(), vec![short.id]);

        let running = repo
            .list_sales(guild_id, SaleStatus::Open, Some(false), now)
            .await
            .unwrap();
        assert_eq!(running.iter().map(|s| s.id).collect::<Vec<_>>(), vec![long.id]);
    }
}
