use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{positive_id, AppState};
use crate::domain::{MembershipId, Participant, ParticipantId, SaleId};
use crate::engine::TagOutcome;
use crate::error::AppError;

const MAX_NAMES_PER_REQUEST: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRequest {
    pub names: Vec<String>,
    pub tagged_by: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResponse {
    pub id: i64,
    pub sale_id: i64,
    pub membership_id: i64,
    pub display_name: String,
    pub tagged_by: i64,
    pub created_at_ms: i64,
}

impl From<Participant> for ParticipantResponse {
    fn from(p: Participant) -> Self {
        Self {
            id: p.id.as_i64(),
            sale_id: p.sale_id.as_i64(),
            membership_id: p.membership_id.as_i64(),
            display_name: p.display_name,
            tagged_by: p.tagged_by.as_i64(),
            created_at_ms: p.created_at.as_ms(),
        }
    }
}

pub async fn tag_participants(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<TagRequest>,
) -> Result<Json<TagOutcome>, AppError> {
    let sale_id = SaleId::new(positive_id("sale id", id)?);
    let tagged_by = MembershipId::new(positive_id("taggedBy", body.tagged_by)?);
    if body.names.is_empty() {
        return Err(AppError::BadRequest("names must not be empty".to_string()));
    }
    if body.names.len() > MAX_NAMES_PER_REQUEST {
        return Err(AppError::BadRequest(format!(
            "at most {} names per request",
            MAX_NAMES_PER_REQUEST
        )));
    }

    let outcome = state
        .economy
        .tagger
        .tag(sale_id, &body.names, tagged_by)
        .await?;
    Ok(Json(outcome))
}

pub async fn list_participants(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ParticipantResponse>>, AppError> {
    let sale_id = SaleId::new(positive_id("sale id", id)?);
    let participants = state.economy.tagger.list(sale_id).await?;
    Ok(Json(
        participants
            .into_iter()
            .map(ParticipantResponse::from)
            .collect(),
    ))
}

pub async fn remove_participant(
    Path((id, participant_id)): Path<(i64, i64)>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let sale_id = SaleId::new(positive_id("sale id", id)?);
    let participant_id = ParticipantId::new(positive_id("participant id", participant_id)?);
    state
        .economy
        .tagger
        .remove(sale_id, participant_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
