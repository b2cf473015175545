//! Split engine: divides a pool's net proceeds among weighted recipients and
//! credits each one's ledger.
//!
//! Shares are floored, so up to `recipients - 1` silver may stay undistributed.
//! Each credit commits on its own; there is no cross-recipient transaction.
//! The first attempt of a sale split (or a referenced pool split) pins its
//! plan in the store. Retries pay against the pinned plan, and each credit
//! carries a per-(split, member) idempotency key, so a retry after a partial
//! failure pays only the recipients that were missed.

use crate::db::{
    AdjustOutcome, BalanceAdjustment, PinnedPlan, PlanShareRecord, Repository, SplitPlanRecord,
};
use crate::domain::{GuildId, MembershipId, SaleId, SaleStatus, Silver, TimeMs};
use crate::engine::{BalanceService, SplitError};
use crate::notify::{dispatch, Notification, Notifier, PayoutLine};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedRecipient {
    pub membership_id: MembershipId,
    pub weight: i64,
}

/// Gross amounts feeding a pool: `gross + bonus - repair`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolAmounts {
    pub gross: Silver,
    pub bonus: Silver,
    pub repair: Silver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedShare {
    pub membership_id: MembershipId,
    pub weight: i64,
    pub share: Silver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitPlan {
    pub pool: Silver,
    pub tax: Silver,
    pub distributable: Silver,
    pub shares: Vec<PlannedShare>,
    pub total_distributed: Silver,
    pub undistributed: Silver,
}

/// Compute every recipient's share. Pure; performs no I/O.
pub fn plan_split(
    amounts: PoolAmounts,
    tax_percent: u32,
    recipients: &[WeightedRecipient],
) -> Result<SplitPlan, SplitError> {
    if recipients.is_empty() {
        return Err(SplitError::InvalidArgument(
            "at least one recipient is required".to_string(),
        ));
    }
    if tax_percent > 100 {
        return Err(SplitError::InvalidArgument(
            "tax percent must be between 0 and 100".to_string(),
        ));
    }
    if amounts.gross < 0 || amounts.bonus < 0 || amounts.repair < 0 {
        return Err(SplitError::InvalidArgument(
            "pool amounts must not be negative".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut weight_sum: i128 = 0;
    for r in recipients {
        if r.weight < 0 {
            return Err(SplitError::InvalidArgument(format!(
                "weight for membership {} must not be negative",
                r.membership_id
            )));
        }
        if !seen.insert(r.membership_id) {
            return Err(SplitError::InvalidArgument(format!(
                "membership {} listed more than once",
                r.membership_id
            )));
        }
        weight_sum += r.weight as i128;
    }
    if weight_sum == 0 {
        return Err(SplitError::InvalidArgument(
            "sum of weights must be positive".to_string(),
        ));
    }

    let pool = amounts
        .gross
        .checked_add(amounts.bonus)
        .and_then(|p| p.checked_sub(amounts.repair))
        .ok_or_else(|| SplitError::InvalidArgument("pool amount overflows".to_string()))?;
    if pool <= 0 {
        return Err(SplitError::InvalidArgument(format!(
            "nothing to distribute, pool is {}",
            pool
        )));
    }

    let tax = (pool as i128 * tax_percent as i128 / 100) as Silver;
    let distributable = pool - tax;
    if distributable <= 0 {
        return Err(SplitError::InvalidArgument(format!(
            "nothing to distribute after {}% tax",
            tax_percent
        )));
    }

    let shares: Vec<PlannedShare> = recipients
        .iter()
        .map(|r| PlannedShare {
            membership_id: r.membership_id,
            weight: r.weight,
            share: (distributable as i128 * r.weight as i128 / weight_sum) as Silver,
        })
        .collect();
    let total_distributed: Silver = shares.iter().map(|s| s.share).sum();

    Ok(SplitPlan {
        pool,
        tax,
        distributable,
        shares,
        total_distributed,
        undistributed: distributable - total_distributed,
    })
}

impl SplitPlan {
    fn into_record(self, tax_percent: u32) -> SplitPlanRecord {
        SplitPlanRecord {
            tax_percent,
            pool: self.pool,
            tax: self.tax,
            distributable: self.distributable,
            shares: self
                .shares
                .into_iter()
                .map(|s| PlanShareRecord {
                    membership_id: s.membership_id,
                    weight: s.weight,
                    share: s.share,
                })
                .collect(),
        }
    }

    fn from_record(record: SplitPlanRecord) -> Self {
        let shares: Vec<PlannedShare> = record
            .shares
            .into_iter()
            .map(|s| PlannedShare {
                membership_id: s.membership_id,
                weight: s.weight,
                share: s.share,
            })
            .collect();
        let total_distributed: Silver = shares.iter().map(|s| s.share).sum();
        SplitPlan {
            pool: record.pool,
            tax: record.tax,
            distributable: record.distributable,
            shares,
            total_distributed,
            undistributed: record.distributable - total_distributed,
        }
    }
}

/// (membership, weight) pairs sorted by membership, for comparing recipient sets.
fn weight_key<I>(pairs: I) -> Vec<(MembershipId, i64)>
where
    I: IntoIterator<Item = (MembershipId, i64)>,
{
    let mut pairs: Vec<_> = pairs.into_iter().collect();
    pairs.sort();
    pairs
}

/// Reject a retry whose explicit arguments disagree with the pinned plan.
/// Omitted arguments take the pinned values.
fn check_retry_matches(
    sale_id: SaleId,
    pinned: &SplitPlanRecord,
    tax_percent: Option<u32>,
    recipients: Option<&[WeightedRecipient]>,
) -> Result<(), SplitError> {
    if let Some(tax_percent) = tax_percent {
        if tax_percent != pinned.tax_percent {
            return Err(SplitError::InvalidArgument(format!(
                "split of sale {} was started at {}% tax, retry asked for {}%",
                sale_id, pinned.tax_percent, tax_percent
            )));
        }
    }
    if let Some(recipients) = recipients {
        let asked = weight_key(recipients.iter().map(|r| (r.membership_id, r.weight)));
        let planned = weight_key(pinned.shares.iter().map(|s| (s.membership_id, s.weight)));
        if asked != planned {
            return Err(SplitError::InvalidArgument(format!(
                "split of sale {} was started with different recipients or weights",
                sale_id
            )));
        }
    }
    Ok(())
}

/// Recipients of a sale split. Given recipients must all be tagged;
/// without any, every tagged member gets weight 1.
fn resolve_recipients(
    sale_id: SaleId,
    tagged: &[MembershipId],
    recipients: Option<Vec<WeightedRecipient>>,
) -> Result<Vec<WeightedRecipient>, SplitError> {
    let Some(recipients) = recipients else {
        return Ok(tagged
            .iter()
            .map(|&membership_id| WeightedRecipient {
                membership_id,
                weight: 1,
            })
            .collect());
    };
    if let Some(stray) = recipients.iter().find(|r| !tagged.contains(&r.membership_id)) {
        return Err(SplitError::InvalidArgument(format!(
            "membership {} is not a tagged participant of sale {}",
            stray.membership_id, sale_id
        )));
    }
    Ok(recipients)
}

fn same_pool_plan(a: &SplitPlanRecord, b: &SplitPlanRecord) -> bool {
    let shares = |p: &SplitPlanRecord| {
        let mut shares = p.shares.clone();
        shares.sort_by_key(|s| s.membership_id);
        shares
    };
    a.tax_percent == b.tax_percent
        && a.pool == b.pool
        && a.tax == b.tax
        && a.distributable == b.distributable
        && shares(a) == shares(b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PayoutStatus {
    Credited,
    /// Paid by an earlier attempt of the same split.
    AlreadyPaid,
    /// Share floored to zero; no ledger entry.
    SkippedZero,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientPayout {
    pub membership_id: MembershipId,
    pub weight: i64,
    pub share: Silver,
    pub status: PayoutStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_after: Option<Silver>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale_id: Option<SaleId>,
    pub label: String,
    pub pool: Silver,
    pub tax_percent: u32,
    pub tax: Silver,
    pub distributable: Silver,
    pub total_distributed: Silver,
    pub undistributed: Silver,
    pub recipients: Vec<RecipientPayout>,
}

impl SplitReport {
    /// Totals count the silver the ledger actually holds for each recipient.
    fn new(
        sale_id: Option<SaleId>,
        label: String,
        tax_percent: u32,
        plan: &SplitPlan,
        recipients: Vec<RecipientPayout>,
    ) -> Self {
        let total_distributed: Silver = recipients.iter().map(|r| r.share).sum();
        Self {
            sale_id,
            label,
            pool: plan.pool,
            tax_percent,
            tax: plan.tax,
            distributable: plan.distributable,
            total_distributed,
            undistributed: plan.distributable - total_distributed,
            recipients,
        }
    }
}

/// An ad-hoc pool not backed by a sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSplit {
    pub guild_id: GuildId,
    pub label: String,
    pub sold: Silver,
    pub bags: Silver,
    pub repair: Silver,
    pub recipients: Vec<WeightedRecipient>,
    pub tax_percent: Option<u32>,
    /// Makes the payout retry-safe when set.
    pub reference: Option<String>,
}

#[derive(Clone)]
pub struct SplitEngine {
    repo: Arc<Repository>,
    balances: BalanceService,
    notifier: Arc<dyn Notifier>,
    default_tax_percent: u32,
}

impl SplitEngine {
    pub fn new(
        repo: Arc<Repository>,
        balances: BalanceService,
        notifier: Arc<dyn Notifier>,
        default_tax_percent: u32,
    ) -> Self {
        Self {
            repo,
            balances,
            notifier,
            default_tax_percent,
        }
    }

    /// Split a drawn sale's proceeds and close it.
    ///
    /// Without `recipients`, every tagged participant gets weight 1. Given
    /// recipients must all be tagged participants. The first call pins the
    /// plan and locks the participant list; a retry reuses the pinned plan
    /// and rejects explicit arguments that disagree with it.
    pub async fn split_sale(
        &self,
        sale_id: SaleId,
        recipients: Option<Vec<WeightedRecipient>>,
        tax_percent: Option<u32>,
        performed_by: Option<MembershipId>,
    ) -> Result<SplitReport, SplitError> {
        let sale = self
            .repo
            .get_sale(sale_id)
            .await?
            .ok_or(SplitError::SaleNotFound(sale_id))?;
        if sale.status != SaleStatus::Drawn {
            return Err(SplitError::invalid_state(
                sale_id,
                format!("only drawn sales can be split, sale is {}", sale.status),
            ));
        }
        if sale.split_completed {
            return Err(SplitError::invalid_state(sale_id, "sale has already been split"));
        }

        let amounts = PoolAmounts {
            gross: sale.price,
            bonus: sale.bonus_amount,
            repair: sale.repair_cost,
        };
        let requested = recipients.clone();
        let planned_tax = tax_percent.unwrap_or(self.default_tax_percent);
        let pinned = self
            .repo
            .pin_sale_split_plan(sale_id, TimeMs::now(), move |tagged: &[MembershipId]| {
                let recipients = resolve_recipients(sale_id, tagged, recipients)?;
                let plan = plan_split(amounts, planned_tax, &recipients)?;
                Ok::<_, SplitError>(plan.into_record(planned_tax))
            })
            .await?;

        let record = match pinned {
            PinnedPlan::Created(record) => record,
            PinnedPlan::Existing(record) => {
                check_retry_matches(sale_id, &record, tax_percent, requested.as_deref())?;
                info!(sale_id = %sale_id, "Resuming split with its pinned plan");
                record
            }
            // Split by a concurrent call since the read above.
            PinnedPlan::NotEligible => {
                return Err(SplitError::invalid_state(sale_id, "sale has already been split"));
            }
        };
        let tax_percent = record.tax_percent;
        let plan = SplitPlan::from_record(record);

        let label = sale.label();
        let payouts = self
            .pay_out(&label, &plan, performed_by, |membership_id| {
                Some(format!("sale-split:{}:{}", sale_id, membership_id))
            })
            .await?;

        if !self.repo.mark_split_completed(sale_id, TimeMs::now()).await? {
            // A concurrent split closed it first; keyed credits kept payouts single.
            warn!(sale_id = %sale_id, "Sale was already marked split by a concurrent call");
        }

        let report = SplitReport::new(Some(sale_id), label, tax_percent, &plan, payouts);
        info!(
            sale_id = %sale_id,
            distributable = report.distributable,
            total_distributed = report.total_distributed,
            recipients = report.recipients.len(),
            "Sale split completed"
        );
        self.announce(sale.guild_id, &report);
        Ok(report)
    }

    /// Split an ad-hoc pool (`sold + bags - repair`) among guild members.
    pub async fn split_pool(
        &self,
        request: PoolSplit,
        performed_by: Option<MembershipId>,
    ) -> Result<SplitReport, SplitError> {
        let label = request.label.trim().to_string();
        if label.is_empty() {
            return Err(SplitError::InvalidArgument(
                "pool label must not be empty".to_string(),
            ));
        }

        let tax_percent = request.tax_percent.unwrap_or(self.default_tax_percent);
        let plan = plan_split(
            PoolAmounts {
                gross: request.sold,
                bonus: request.bags,
                repair: request.repair,
            },
            tax_percent,
            &request.recipients,
        )?;

        for r in &request.recipients {
            let member = self
                .repo
                .get_membership(r.membership_id)
                .await?
                .ok_or(SplitError::MembershipNotFound(r.membership_id))?;
            if member.guild_id != request.guild_id {
                return Err(SplitError::InvalidArgument(format!(
                    "membership {} does not belong to guild {}",
                    r.membership_id, request.guild_id
                )));
            }
        }

        let reference = request.reference.as_deref().map(str::trim).filter(|r| !r.is_empty());
        let plan = match reference {
            Some(reference) => {
                let record = plan.into_record(tax_percent);
                let key = format!("pool:{}:{}", request.guild_id, reference);
                match self.repo.pin_pool_split_plan(&key, &record, TimeMs::now()).await? {
                    PinnedPlan::Existing(pinned) if !same_pool_plan(&pinned, &record) => {
                        return Err(SplitError::InvalidArgument(format!(
                            "reference {:?} was already used for a different split",
                            reference
                        )));
                    }
                    _ => SplitPlan::from_record(record),
                }
            }
            None => plan,
        };

        let payouts = self
            .pay_out(&label, &plan, performed_by, |membership_id| {
                reference.map(|r| format!("pool-split:{}:{}:{}", request.guild_id, r, membership_id))
            })
            .await?;

        let report = SplitReport::new(None, label, tax_percent, &plan, payouts);
        info!(
            guild_id = %request.guild_id,
            label = %report.label,
            total_distributed = report.total_distributed,
            "Pool split completed"
        );
        self.announce(request.guild_id, &report);
        Ok(report)
    }

    /// Credit each positive share in order. Stops at the first failure and
    /// reports which recipients were already credited.
    async fn pay_out<K>(
        &self,
        label: &str,
        plan: &SplitPlan,
        performed_by: Option<MembershipId>,
        key_for: K,
    ) -> Result<Vec<RecipientPayout>, SplitError>
    where
        K: Fn(MembershipId) -> Option<String>,
    {
        let mut payouts = Vec::with_capacity(plan.shares.len());

        for planned in &plan.shares {
            if planned.share <= 0 {
                payouts.push(RecipientPayout {
                    membership_id: planned.membership_id,
                    weight: planned.weight,
                    share: 0,
                    status: PayoutStatus::SkippedZero,
                    balance_after: None,
                });
                continue;
            }

            let adjustment = BalanceAdjustment {
                membership_id: planned.membership_id,
                amount: planned.share,
                reason: format!("Split of {}: {} silver", label, planned.share),
                performed_by,
                idempotency_key: key_for(planned.membership_id),
            };

            let (status, paid, balance_after) = match self.balances.apply(adjustment).await {
                Ok(AdjustOutcome::Applied(entry)) => {
                    (PayoutStatus::Credited, entry.amount, entry.balance_after)
                }
                Ok(AdjustOutcome::AlreadyApplied { amount, balance }) => {
                    (PayoutStatus::AlreadyPaid, amount, balance)
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!(
                        label = %label,
                        failed = %planned.membership_id,
                        credited = payouts.len(),
                        error = %reason,
                        "Split payout stopped"
                    );
                    return Err(SplitError::Partial {
                        label: label.to_string(),
                        credited: credited_lines(&payouts),
                        failed: planned.membership_id,
                        reason,
                    });
                }
            };

            payouts.push(RecipientPayout {
                membership_id: planned.membership_id,
                weight: planned.weight,
                share: paid,
                status,
                balance_after: Some(balance_after),
            });
        }

        Ok(payouts)
    }

    fn announce(&self, guild_id: GuildId, report: &SplitReport) {
        dispatch(
            &self.notifier,
            Notification::SplitCompleted {
                guild_id,
                sale_id: report.sale_id,
                label: report.label.clone(),
                payouts: credited_lines(&report.recipients),
                total_distributed: report.total_distributed,
            },
        );
    }
}

fn credited_lines(payouts: &[RecipientPayout]) -> Vec<PayoutLine> {
    payouts
        .iter()
        .filter(|p| p.status != PayoutStatus::SkippedZero)
        .map(|p| PayoutLine {
            membership_id: p.membership_id,
            amount: p.share,
        })
        .collect()
}
