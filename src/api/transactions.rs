use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{positive_id, AppState};
use crate::db::TransactionFilter;
use crate::domain::{BalanceTransaction, GuildId, MembershipId, TransactionId};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsQuery {
    pub membership_id: Option<i64>,
    pub guild_id: Option<i64>,
    pub cursor: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: i64,
    pub membership_id: i64,
    pub amount: i64,
    pub balance_after: i64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at_ms: i64,
}

impl From<BalanceTransaction> for TransactionResponse {
    fn from(t: BalanceTransaction) -> Self {
        Self {
            id: t.id.as_i64(),
            membership_id: t.membership_id.as_i64(),
            amount: t.amount,
            balance_after: t.balance_after,
            reason: t.reason,
            performed_by: t.performed_by.map(|id| id.as_i64()),
            idempotency_key: t.idempotency_key,
            created_at_ms: t.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsResponse {
    pub items: Vec<TransactionResponse>,
    pub next_cursor: Option<i64>,
}

pub async fn list_transactions(
    Query(params): Query<TransactionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<TransactionsResponse>, AppError> {
    let filter = match (params.membership_id, params.guild_id) {
        (Some(id), None) => TransactionFilter::Membership(MembershipId::new(positive_id(
            "membershipId",
            id,
        )?)),
        (None, Some(id)) => TransactionFilter::Guild(GuildId::new(positive_id("guildId", id)?)),
        _ => {
            return Err(AppError::BadRequest(
                "Exactly one of membershipId or guildId is required".to_string(),
            ))
        }
    };
    let cursor = params
        .cursor
        .map(|raw| positive_id("cursor", raw).map(TransactionId::new))
        .transpose()?;
    if matches!(params.limit, Some(limit) if limit <= 0) {
        return Err(AppError::BadRequest("limit must be positive".to_string()));
    }

    let page = state
        .economy
        .balances
        .list_transactions(filter, cursor, params.limit)
        .await?;

    Ok(Json(TransactionsResponse {
        items: page.items.into_iter().map(TransactionResponse::from).collect(),
        next_cursor: page.next_cursor.map(|id| id.as_i64()),
    }))
}
