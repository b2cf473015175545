use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::{positive_id, AppState};
use crate::domain::{Bid, GuildId, MembershipId, Sale, SaleId, SaleStatus, TimeMs};
use crate::engine::{BidOutcome, CreateSale, DrawOutcome};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSaleRequest {
    pub created_by: i64,
    pub price: i64,
    pub duration_hours: Option<i64>,
    pub repair_cost: Option<i64>,
    pub bonus_amount: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSalesQuery {
    pub status: Option<String>,
    pub expired: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleResponse {
    pub id: i64,
    pub guild_id: i64,
    pub created_by: i64,
    pub price: i64,
    pub duration_hours: i64,
    pub repair_cost: i64,
    pub bonus_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: SaleStatus,
    pub expired: bool,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drawn_at_ms: Option<i64>,
    pub split_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_completed_at_ms: Option<i64>,
}

impl SaleResponse {
    pub fn new(sale: Sale, now: TimeMs) -> Self {
        Self {
            expired: sale.status == SaleStatus::Open && sale.is_expired(now),
            id: sale.id.as_i64(),
            guild_id: sale.guild_id.as_i64(),
            created_by: sale.created_by.as_i64(),
            price: sale.price,
            duration_hours: sale.duration_hours,
            repair_cost: sale.repair_cost,
            bonus_amount: sale.bonus_amount,
            description: sale.description,
            status: sale.status,
            created_at_ms: sale.created_at.as_ms(),
            expires_at_ms: sale.expires_at.as_ms(),
            winner_id: sale.winner_id.map(|id| id.as_i64()),
            drawn_at_ms: sale.drawn_at.map(|t| t.as_ms()),
            split_completed: sale.split_completed,
            split_completed_at_ms: sale.split_completed_at.map(|t| t.as_ms()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub membership_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidResponse {
    pub id: i64,
    pub sale_id: i64,
    pub membership_id: i64,
    pub created_at_ms: i64,
}

impl From<Bid> for BidResponse {
    fn from(bid: Bid) -> Self {
        Self {
            id: bid.id,
            sale_id: bid.sale_id.as_i64(),
            membership_id: bid.membership_id.as_i64(),
            created_at_ms: bid.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpResponse {
    /// `signed_up` or `already_signed_up`.
    pub status: &'static str,
    pub bid: BidResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawResponse {
    /// `drawn`, `no_bids` or `not_found`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale: Option<SaleResponse>,
}

fn sale_id(raw: i64) -> Result<SaleId, AppError> {
    Ok(SaleId::new(positive_id("sale id", raw)?))
}

pub async fn create_sale(
    Path(guild_id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<CreateSaleRequest>,
) -> Result<(StatusCode, Json<SaleResponse>), AppError> {
    let request = CreateSale {
        guild_id: GuildId::new(positive_id("guild id", guild_id)?),
        created_by: MembershipId::new(positive_id("createdBy", body.created_by)?),
        price: body.price,
        duration_hours: body.duration_hours,
        repair_cost: body.repair_cost.unwrap_or(0),
        bonus_amount: body.bonus_amount.unwrap_or(0),
        description: body
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
    };

    let sale = state.economy.sales.create_sale(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(SaleResponse::new(sale, TimeMs::now())),
    ))
}

pub async fn list_sales(
    Path(guild_id): Path<i64>,
    Query(params): Query<ListSalesQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<SaleResponse>>, AppError> {
    let guild_id = GuildId::new(positive_id("guild id", guild_id)?);
    let status = params
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            SaleStatus::from_str(s).map_err(|_| AppError::BadRequest(format!("Invalid status: {}", s)))
        })
        .transpose()?;

    let sales = state
        .economy
        .sales
        .list_sales(guild_id, status, params.expired)
        .await?;
    let now = TimeMs::now();
    Ok(Json(
        sales
            .into_iter()
            .map(|sale| SaleResponse::new(sale, now))
            .collect(),
    ))
}

pub async fn get_sale(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<SaleResponse>, AppError> {
    let sale = state.economy.sales.get_sale(sale_id(id)?).await?;
    Ok(Json(SaleResponse::new(sale, TimeMs::now())))
}

pub async fn sign_up(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<SignUpResponse>), AppError> {
    let membership_id = MembershipId::new(positive_id("membershipId", body.membership_id)?);
    let outcome = state
        .economy
        .sales
        .sign_up(sale_id(id)?, membership_id)
        .await?;

    Ok(match outcome {
        BidOutcome::SignedUp(bid) => (
            StatusCode::CREATED,
            Json(SignUpResponse {
                status: "signed_up",
                bid: bid.into(),
            }),
        ),
        BidOutcome::AlreadySignedUp(bid) => (
            StatusCode::OK,
            Json(SignUpResponse {
                status: "already_signed_up",
                bid: bid.into(),
            }),
        ),
    })
}

pub async fn list_bids(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Vec<BidResponse>>, AppError> {
    let bids = state.economy.sales.list_bids(sale_id(id)?).await?;
    Ok(Json(bids.into_iter().map(BidResponse::from).collect()))
}

/// `not_found` is a normal outcome here, not a 404: it means there was
/// nothing left to draw.
pub async fn draw_winner(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<DrawResponse>, AppError> {
    let outcome = state.economy.draws.draw(sale_id(id)?).await?;
    let now = TimeMs::now();

    Ok(Json(match outcome {
        DrawOutcome::Drawn {
            sale,
            winner,
            bid_count,
        } => DrawResponse {
            status: "drawn",
            winner: Some(winner.as_i64()),
            bid_count: Some(bid_count),
            sale: Some(SaleResponse::new(sale, now)),
        },
        DrawOutcome::NoBids { sale } => DrawResponse {
            status: "no_bids",
            winner: None,
            bid_count: Some(0),
            sale: Some(SaleResponse::new(sale, now)),
        },
        DrawOutcome::NotFound => DrawResponse {
            status: "not_found",
            winner: None,
            bid_count: None,
            sale: None,
        },
    }))
}
