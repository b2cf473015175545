//! Pinned split plans.
//!
//! The first attempt of a split stores its plan. Retries pay against the
//! stored plan so every recipient's amount is fixed once.

use crate::domain::{MembershipId, SaleId, Silver, TimeMs};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use tracing::debug;

use super::sales::{claim_sale, SaleClaim};
use super::{decode_error, Repository};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanShareRecord {
    pub membership_id: MembershipId,
    pub weight: i64,
    pub share: Silver,
}

/// A split plan as stored. Shares keep the order they were planned in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlanRecord {
    pub tax_percent: u32,
    pub pool: Silver,
    pub tax: Silver,
    pub distributable: Silver,
    pub shares: Vec<PlanShareRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinnedPlan {
    /// The sale is missing, not drawn, or already split. Nothing was stored.
    NotEligible,
    /// First attempt; this plan was just stored.
    Created(SplitPlanRecord),
    /// An earlier attempt stored this plan.
    Existing(SplitPlanRecord),
}

fn sale_plan_key(sale_id: SaleId) -> String {
    format!("sale:{}", sale_id)
}

async fn load_plan(
    conn: &mut SqliteConnection,
    plan_key: &str,
) -> Result<Option<SplitPlanRecord>, sqlx::Error> {
    let Some(row) = sqlx::query(
        "SELECT id, tax_percent, pool, tax, distributable FROM split_plans WHERE plan_key = ?",
    )
    .bind(plan_key)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let plan_id: i64 = row.get("id");
    let tax_percent: i64 = row.get("tax_percent");
    let shares = sqlx::query(
        "SELECT membership_id, weight, share FROM split_plan_shares WHERE plan_id = ? ORDER BY position ASC",
    )
    .bind(plan_id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|r| PlanShareRecord {
        membership_id: MembershipId::new(r.get("membership_id")),
        weight: r.get("weight"),
        share: r.get("share"),
    })
    .collect();

    Ok(Some(SplitPlanRecord {
        tax_percent: u32::try_from(tax_percent)
            .map_err(|_| decode_error("tax_percent", &tax_percent.to_string()))?,
        pool: row.get("pool"),
        tax: row.get("tax"),
        distributable: row.get("distributable"),
        shares,
    }))
}

/// Store a plan under `plan_key`. Returns false, writing nothing, when the
/// key is already taken.
async fn insert_plan(
    conn: &mut SqliteConnection,
    plan_key: &str,
    sale_id: Option<SaleId>,
    plan: &SplitPlanRecord,
    now: TimeMs,
) -> Result<bool, sqlx::Error> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO split_plans (plan_key, sale_id, tax_percent, pool, tax, distributable, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(plan_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(plan_key)
    .bind(sale_id.map(|s| s.as_i64()))
    .bind(plan.tax_percent as i64)
    .bind(plan.pool)
    .bind(plan.tax)
    .bind(plan.distributable)
    .bind(now.as_ms())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(inserted) = inserted else {
        return Ok(false);
    };
    let plan_id: i64 = inserted.get("id");

    for (position, share) in plan.shares.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO split_plan_shares (plan_id, position, membership_id, weight, share)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(plan_id)
        .bind(position as i64)
        .bind(share.membership_id.as_i64())
        .bind(share.weight)
        .bind(share.share)
        .execute(&mut *conn)
        .await?;
    }

    Ok(true)
}

impl Repository {
    /// Pin the split plan of a drawn, unsplit sale.
    ///
    /// Runs under the sale's write lock. If a plan is already stored it is
    /// returned untouched. Otherwise `build` receives the tagged members
    /// (ascending id) and its plan is stored in the same transaction. Once a
    /// plan exists, participants can no longer change.
    ///
    /// # Errors
    /// Errors from `build` roll the transaction back; nothing is stored.
    pub async fn pin_sale_split_plan<F, E>(
        &self,
        sale_id: SaleId,
        now: TimeMs,
        build: F,
    ) -> Result<PinnedPlan, E>
    where
        F: FnOnce(&[MembershipId]) -> Result<SplitPlanRecord, E> + Send,
        E: From<sqlx::Error> + Send,
    {
        let mut tx = self.pool.begin().await?;

        if !claim_sale(&mut tx, sale_id, SaleClaim::DrawnUnsplit).await? {
            tx.rollback().await?;
            return Ok(PinnedPlan::NotEligible);
        }

        let key = sale_plan_key(sale_id);
        if let Some(existing) = load_plan(&mut tx, &key).await? {
            tx.commit().await?;
            debug!(sale_id = %sale_id, "Reusing pinned split plan");
            return Ok(PinnedPlan::Existing(existing));
        }

        let tagged: Vec<MembershipId> = sqlx::query(
            "SELECT membership_id FROM participants WHERE sale_id = ? ORDER BY membership_id ASC",
        )
        .bind(sale_id.as_i64())
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|r| MembershipId::new(r.get("membership_id")))
        .collect();

        let plan = match build(&tagged) {
            Ok(plan) => plan,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        insert_plan(&mut tx, &key, Some(sale_id), &plan, now).await?;
        tx.commit().await?;

        debug!(sale_id = %sale_id, recipients = plan.shares.len(), "Split plan pinned");
        Ok(PinnedPlan::Created(plan))
    }

    /// Pin an ad-hoc pool plan under `plan_key`. The first caller stores
    /// `plan`; later callers get back whatever was stored first.
    pub async fn pin_pool_split_plan(
        &self,
        plan_key: &str,
        plan: &SplitPlanRecord,
        now: TimeMs,
    ) -> Result<PinnedPlan, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if insert_plan(&mut tx, plan_key, None, plan, now).await? {
            tx.commit().await?;
            return Ok(PinnedPlan::Created(plan.clone()));
        }

        let existing = load_plan(&mut tx, plan_key).await?;
        tx.commit().await?;
        Ok(existing.map_or(PinnedPlan::NotEligible, PinnedPlan::Existing))
    }
}
