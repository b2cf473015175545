//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by aggregate:
//! - `mod.rs` - Guild and membership roster operations
//! - `ledger.rs` - Balance adjustments and the transaction log
//! - `sales.rs` - Sales, bids, draws and participants
//! - `splits.rs` - Pinned split plans

mod ledger;
mod sales;
mod splits;

pub use ledger::{AdjustOutcome, BalanceAdjustment, TransactionFilter, TransactionPage};
pub use sales::{DrawRecord, ParticipantRemoval, ParticipantWrite};
pub use splits::{PinnedPlan, PlanShareRecord, SplitPlanRecord};

use crate::domain::{
    display_name_key, Guild, GuildId, Membership, MembershipId, MembershipStatus, Role, TimeMs,
};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

pub(crate) const MEMBERSHIP_COLUMNS: &str =
    "id, guild_id, display_name, role, status, balance, created_at";

pub(crate) fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(format!("invalid {} value: {}", column, value).into())
}

pub(crate) fn membership_from_row(row: &SqliteRow) -> Result<Membership, sqlx::Error> {
    let role: String = row.get("role");
    let status: String = row.get("status");
    Ok(Membership {
        id: MembershipId::new(row.get("id")),
        guild_id: GuildId::new(row.get("guild_id")),
        display_name: row.get("display_name"),
        role: Role::from_str(&role).map_err(|_| decode_error("role", &role))?,
        status: MembershipStatus::from_str(&status).map_err(|_| decode_error("status", &status))?,
        balance: row.get("balance"),
        created_at: TimeMs::new(row.get("created_at")),
    })
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Round-trip a trivial query; used by the readiness probe.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Guild operations
    // =========================================================================

    pub async fn create_guild(&self, name: &str) -> Result<Guild, sqlx::Error> {
        let now = TimeMs::now();
        let row = sqlx::query("INSERT INTO guilds (name, created_at) VALUES (?, ?) RETURNING id")
            .bind(name)
            .bind(now.as_ms())
            .fetch_one(&self.pool)
            .await?;

        Ok(Guild {
            id: GuildId::new(row.get("id")),
            name: name.to_string(),
            created_at: now,
        })
    }

    pub async fn get_guild(&self, guild_id: GuildId) -> Result<Option<Guild>, sqlx::Error> {
        let row = sqlx::query("SELECT id, name, created_at FROM guilds WHERE id = ?")
            .bind(guild_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Guild {
            id: GuildId::new(r.get("id")),
            name: r.get("name"),
            created_at: TimeMs::new(r.get("created_at")),
        }))
    }

    // =========================================================================
    // Membership operations
    // =========================================================================

    /// Register a membership with a zero balance.
    ///
    /// Returns `None` when the display name is already taken in this guild
    /// (compared case-insensitively).
    ///
    /// # Errors
    /// Returns an error if the insert fails, including a foreign key error
    /// for an unknown guild.
    pub async fn register_member(
        &self,
        guild_id: GuildId,
        display_name: &str,
        role: Role,
        status: MembershipStatus,
    ) -> Result<Option<Membership>, sqlx::Error> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO memberships (guild_id, display_name, display_name_key, role, status, balance, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(guild_id, display_name_key) DO NOTHING
            RETURNING {}
            "#,
            MEMBERSHIP_COLUMNS
        ))
        .bind(guild_id.as_i64())
        .bind(display_name.trim())
        .bind(display_name_key(display_name))
        .bind(role.as_str())
        .bind(status.as_str())
        .bind(TimeMs::now().as_ms())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(membership_from_row).transpose()
    }

    pub async fn get_membership(
        &self,
        membership_id: MembershipId,
    ) -> Result<Option<Membership>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM memberships WHERE id = ?",
            MEMBERSHIP_COLUMNS
        ))
        .bind(membership_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(membership_from_row).transpose()
    }

    /// List a guild's memberships, optionally restricted to one status.
    pub async fn list_members(
        &self,
        guild_id: GuildId,
        status: Option<MembershipStatus>,
    ) -> Result<Vec<Membership>, sqlx::Error> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM memberships WHERE guild_id = ? AND status = ? ORDER BY id ASC",
                    MEMBERSHIP_COLUMNS
                ))
                .bind(guild_id.as_i64())
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM memberships WHERE guild_id = ? ORDER BY id ASC",
                    MEMBERSHIP_COLUMNS
                ))
                .bind(guild_id.as_i64())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(membership_from_row).collect()
    }

    /// Move a membership between soft states. Returns false if it does not exist.
    pub async fn set_membership_status(
        &self,
        membership_id: MembershipId,
        status: MembershipStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE memberships SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(membership_id.as_i64())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    pub(crate) async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_register_and_get_member() {
        let (repo, _temp) = setup_test_db().await;
        let guild = repo.create_guild("Blackwater").await.unwrap();

        let member = repo
            .register_member(guild.id, "Ragnar", Role::Member, MembershipStatus::Active)
            .await
            .unwrap()
            .expect("should register");
        assert_eq!(member.balance, 0);
        assert_eq!(member.guild_id, guild.id);

        let loaded = repo.get_membership(member.id).await.unwrap().unwrap();
        assert_eq!(loaded, member);
    }

    #[tokio::test]
    async fn test_duplicate_display_name_is_rejected_case_insensitively() {
        let (repo, _temp) = setup_test_db().await;
        let guild = repo.create_guild("Blackwater").await.unwrap();

        repo.register_member(guild.id, "Ragnar", Role::Member, MembershipStatus::Active)
            .await
            .unwrap()
            .unwrap();
        let dup = repo
            .register_member(guild.id, "RAGNAR", Role::Guest, MembershipStatus::Active)
            .await
            .unwrap();
        assert!(dup.is_none());

        let other_guild = repo.create_guild("Redtide").await.unwrap();
        let elsewhere = repo
            .register_member(other_guild.id, "ragnar", Role::Member, MembershipStatus::Active)
            .await
            .unwrap();
        assert!(elsewhere.is_some());
    }

    #[tokio::test]
    async fn test_list_members_filters_by_status() {
        let (repo, _temp) = setup_test_db().await;
        let guild = repo.create_guild("Blackwater").await.unwrap();
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
        assert!(repo
            .set_membership_status(b.id, MembershipStatus::Suspended)
            .await
            .unwrap());

        let active = repo
            .list_members(guild.id, Some(MembershipStatus::Active))
            .await
            .unwrap();
        assert_eq!(active.iter().map(|m| m.id).collect::<Vec<_>>(), vec![a.id]);
        assert_eq!(repo.list_members(guild.id, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_set_status_on_missing_member() {
        let (repo, _temp) = setup_test_db().await;
        let updated = repo
            .set_membership_status(MembershipId::new(999), MembershipStatus::Active)
            .await
            .unwrap();
        assert!(!updated);
    }
}
