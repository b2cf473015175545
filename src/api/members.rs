use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::transactions::TransactionResponse;
use crate::api::{positive_id, AppState};
use crate::domain::{Guild, GuildId, LedgerAudit, Membership, MembershipId, MembershipStatus, Role};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGuildRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildResponse {
    pub id: i64,
    pub name: String,
    pub created_at_ms: i64,
}

impl From<Guild> for GuildResponse {
    fn from(guild: Guild) -> Self {
        Self {
            id: guild.id.as_i64(),
            name: guild.name,
            created_at_ms: guild.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMemberRequest {
    pub display_name: String,
    pub role: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMembersQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberResponse {
    pub id: i64,
    pub guild_id: i64,
    pub display_name: String,
    pub role: Role,
    pub status: MembershipStatus,
    pub balance: i64,
    pub created_at_ms: i64,
}

impl From<Membership> for MemberResponse {
    fn from(m: Membership) -> Self {
        Self {
            id: m.id.as_i64(),
            guild_id: m.guild_id.as_i64(),
            display_name: m.display_name,
            role: m.role,
            status: m.status,
            balance: m.balance,
            created_at_ms: m.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    pub amount: i64,
    pub reason: String,
    pub performed_by: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustResponse {
    pub new_balance: i64,
    pub transaction: TransactionResponse,
}

fn parse_status(raw: &str) -> Result<MembershipStatus, AppError> {
    MembershipStatus::from_str(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid status: {}", raw)))
}

pub async fn create_guild(
    State(state): State<AppState>,
    Json(body): Json<CreateGuildRequest>,
) -> Result<(StatusCode, Json<GuildResponse>), AppError> {
    let guild = state.economy.roster.create_guild(&body.name).await?;
    Ok((StatusCode::CREATED, Json(guild.into())))
}

pub async fn register_member(
    Path(guild_id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<RegisterMemberRequest>,
) -> Result<(StatusCode, Json<MemberResponse>), AppError> {
    let guild_id = GuildId::new(positive_id("guild id", guild_id)?);
    let role = match body.role.as_deref() {
        Some(raw) => Role::from_str(raw.trim())
            .map_err(|_| AppError::BadRequest(format!("Invalid role: {}", raw)))?,
        None => Role::Member,
    };
    let status = match body.status.as_deref() {
        Some(raw) => parse_status(raw)?,
        None => MembershipStatus::Active,
    };

    let member = state
        .economy
        .roster
        .register_member(guild_id, &body.display_name, role, status)
        .await?;
    Ok((StatusCode::CREATED, Json(member.into())))
}

pub async fn list_members(
    Path(guild_id): Path<i64>,
    Query(params): Query<ListMembersQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<MemberResponse>>, AppError> {
    let guild_id = GuildId::new(positive_id("guild id", guild_id)?);
    let status = params
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_status)
        .transpose()?;

    let members = state.economy.roster.list_members(guild_id, status).await?;
    Ok(Json(members.into_iter().map(MemberResponse::from).collect()))
}

pub async fn get_member(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<MemberResponse>, AppError> {
    let id = MembershipId::new(positive_id("membership id", id)?);
    let member = state.economy.roster.get_membership(id).await?;
    Ok(Json(member.into()))
}

pub async fn set_status(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<MemberResponse>, AppError> {
    let id = MembershipId::new(positive_id("membership id", id)?);
    let status = parse_status(&body.status)?;
    let member = state.economy.roster.set_status(id, status).await?;
    Ok(Json(member.into()))
}

pub async fn adjust_balance(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<AdjustRequest>,
) -> Result<Json<AdjustResponse>, AppError> {
    let id = MembershipId::new(positive_id("membership id", id)?);
    let performed_by = body
        .performed_by
        .map(|raw| positive_id("performedBy", raw).map(MembershipId::new))
        .transpose()?;

    let entry = state
        .economy
        .balances
        .adjust(id, body.amount, &body.reason, performed_by)
        .await?;
    Ok(Json(AdjustResponse {
        new_balance: entry.balance_after,
        transaction: entry.into(),
    }))
}

pub async fn verify_ledger(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<LedgerAudit>, AppError> {
    let id = MembershipId::new(positive_id("membership id", id)?);
    let audit = state.economy.balances.verify(id).await?;
    if !audit.consistent {
        tracing::warn!(
            membership_id = %id,
            first_mismatch_id = ?audit.first_mismatch_id,
            "Ledger replay does not match stored balance"
        );
    }
    Ok(Json(audit))
}
