//! Sale creation, listing and bid signups.

use crate::db::Repository;
use crate::domain::{
    Bid, GuildId, MembershipId, MembershipStatus, NewSale, Sale, SaleId, SaleStatus, Silver,
    TimeMs,
};
use crate::engine::SaleError;
use std::sync::Arc;
use tracing::info;

/// Longest signup window a sale may be created with (30 days).
pub const MAX_SALE_DURATION_HOURS: i64 = 24 * 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSale {
    pub guild_id: GuildId,
    pub created_by: MembershipId,
    pub price: Silver,
    pub duration_hours: Option<i64>,
    pub repair_cost: Silver,
    pub bonus_amount: Silver,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidOutcome {
    SignedUp(Bid),
    AlreadySignedUp(Bid),
}

#[derive(Clone)]
pub struct SaleBook {
    repo: Arc<Repository>,
    default_duration_hours: i64,
}

impl SaleBook {
    pub fn new(repo: Arc<Repository>, default_duration_hours: i64) -> Self {
        Self {
            repo,
            default_duration_hours,
        }
    }

    /// Open a new sale. Price and auxiliary amounts are fixed from here on.
    pub async fn create_sale(&self, request: CreateSale) -> Result<Sale, SaleError> {
        let duration_hours = request.duration_hours.unwrap_or(self.default_duration_hours);
        if request.price <= 0 {
            return Err(SaleError::InvalidArgument("price must be positive".to_string()));
        }
        if request.repair_cost < 0 || request.bonus_amount < 0 {
            return Err(SaleError::InvalidArgument(
                "repair cost and bonus amount must not be negative".to_string(),
            ));
        }
        if !(1..=MAX_SALE_DURATION_HOURS).contains(&duration_hours) {
            return Err(SaleError::InvalidArgument(format!(
                "duration must be between 1 and {} hours",
                MAX_SALE_DURATION_HOURS
            )));
        }

        self.repo
            .get_guild(request.guild_id)
            .await?
            .ok_or(SaleError::GuildNotFound(request.guild_id))?;
        let creator = self
            .repo
            .get_membership(request.created_by)
            .await?
            .ok_or(SaleError::MembershipNotFound(request.created_by))?;
        if creator.guild_id != request.guild_id {
            return Err(SaleError::InvalidArgument(format!(
                "membership {} does not belong to guild {}",
                creator.id, request.guild_id
            )));
        }

        let description = request
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let sale = self
            .repo
            .create_sale(
                &NewSale {
                    guild_id: request.guild_id,
                    created_by: request.created_by,
                    price: request.price,
                    duration_hours,
                    repair_cost: request.repair_cost,
                    bonus_amount: request.bonus_amount,
                    description,
                },
                TimeMs::now(),
            )
            .await?;

        info!(
            sale_id = %sale.id,
            guild_id = %sale.guild_id,
            price = sale.price,
            expires_at = sale.expires_at.as_ms(),
            "Sale opened"
        );
        Ok(sale)
    }

    pub async fn get_sale(&self, sale_id: SaleId) -> Result<Sale, SaleError> {
        self.repo
            .get_sale(sale_id)
            .await?
            .ok_or(SaleError::SaleNotFound(sale_id))
    }

    /// Sales of a guild in `status` (OPEN by default), optionally only expired or unexpired ones.
    pub async fn list_sales(
        &self,
        guild_id: GuildId,
        status: Option<SaleStatus>,
        expired: Option<bool>,
    ) -> Result<Vec<Sale>, SaleError> {
        Ok(self
            .repo
            .list_sales(
                guild_id,
                status.unwrap_or(SaleStatus::Open),
                expired,
                TimeMs::now(),
            )
            .await?)
    }

    /// Sign a member up for an open sale. Signing up twice is not an error.
    pub async fn sign_up(
        &self,
        sale_id: SaleId,
        membership_id: MembershipId,
    ) -> Result<BidOutcome, SaleError> {
        let now = TimeMs::now();
        if let Some(bid) = self.repo.insert_bid(sale_id, membership_id, now).await? {
            info!(sale_id = %sale_id, membership_id = %membership_id, "Signed up");
            return Ok(BidOutcome::SignedUp(bid));
        }

        if let Some(bid) = self.repo.get_bid(sale_id, membership_id).await? {
            return Ok(BidOutcome::AlreadySignedUp(bid));
        }

        let sale = self.get_sale(sale_id).await?;
        let member = self
            .repo
            .get_membership(membership_id)
            .await?
            .ok_or(SaleError::MembershipNotFound(membership_id))?;

        Err(if member.guild_id != sale.guild_id {
            SaleError::InvalidArgument(format!(
                "membership {} does not belong to guild {}",
                membership_id, sale.guild_id
            ))
        } else if member.status != MembershipStatus::Active {
            SaleError::invalid_state(sale_id, format!("membership {} is not active", membership_id))
        } else if sale.status != SaleStatus::Open {
            SaleError::invalid_state(sale_id, format!("sale is {}", sale.status))
        } else {
            SaleError::invalid_state(sale_id, "signups are closed, the sale has expired")
        })
    }

    pub async fn list_bids(&self, sale_id: SaleId) -> Result<Vec<Bid>, SaleError> {
        self.get_sale(sale_id).await?;
        Ok(self.repo.list_bids(sale_id).await?)
    }
}
