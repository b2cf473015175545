use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::api::{positive_id, AppState};
use crate::domain::{GuildId, MembershipId, SaleId};
use crate::engine::{PoolSplit, SplitReport, WeightedRecipient};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientRequest {
    pub membership_id: i64,
    #[serde(alias = "cutWeight")]
    pub weight: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitSaleRequest {
    pub recipients: Option<Vec<RecipientRequest>>,
    pub tax_percent: Option<u32>,
    pub performed_by: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSplitRequest {
    pub label: String,
    pub sold: i64,
    pub bags: Option<i64>,
    pub repair: Option<i64>,
    pub recipients: Vec<RecipientRequest>,
    pub tax_percent: Option<u32>,
    pub reference: Option<String>,
    pub performed_by: Option<i64>,
}

fn recipients(raw: Vec<RecipientRequest>) -> Result<Vec<WeightedRecipient>, AppError> {
    raw.into_iter()
        .map(|r| {
            Ok(WeightedRecipient {
                membership_id: MembershipId::new(positive_id("membershipId", r.membership_id)?),
                weight: r.weight,
            })
        })
        .collect()
}

fn performed_by(raw: Option<i64>) -> Result<Option<MembershipId>, AppError> {
    raw.map(|id| positive_id("performedBy", id).map(MembershipId::new))
        .transpose()
}

pub async fn split_sale(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<SplitSaleRequest>,
) -> Result<Json<SplitReport>, AppError> {
    let sale_id = SaleId::new(positive_id("sale id", id)?);
    let recipients = body.recipients.map(recipients).transpose()?;

    let report = state
        .economy
        .splits
        .split_sale(
            sale_id,
            recipients,
            body.tax_percent,
            performed_by(body.performed_by)?,
        )
        .await?;
    Ok(Json(report))
}

pub async fn split_pool(
    Path(guild_id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<PoolSplitRequest>,
) -> Result<Json<SplitReport>, AppError> {
    let request = PoolSplit {
        guild_id: GuildId::new(positive_id("guild id", guild_id)?),
        label: body.label,
        sold: body.sold,
        bags: body.bags.unwrap_or(0),
        repair: body.repair.unwrap_or(0),
        recipients: recipients(body.recipients)?,
        tax_percent: body.tax_percent,
        reference: body
            .reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
    };

    let report = state
        .economy
        .splits
        .split_pool(request, performed_by(body.performed_by)?)
        .await?;
    Ok(Json(report))
}
