pub mod health;
pub mod members;
pub mod participants;
pub mod sales;
pub mod splits;
pub mod transactions;

use crate::config::Config;
use crate::db::Repository;
use crate::engine::Economy;
use crate::error::AppError;
use crate::notify::Notifier;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub economy: Economy,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, config: Config, notifier: Arc<dyn Notifier>) -> Self {
        let economy = Economy::new(repo.clone(), notifier, &config);
        Self {
            repo,
            config,
            economy,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/guilds", post(members::create_guild))
        .route(
            "/v1/guilds/:guild_id/members",
            post(members::register_member).get(members::list_members),
        )
        .route(
            "/v1/guilds/:guild_id/sales",
            post(sales::create_sale).get(sales::list_sales),
        )
        .route("/v1/guilds/:guild_id/pool-splits", post(splits::split_pool))
        .route("/v1/members/:id", get(members::get_member))
        .route("/v1/members/:id/status", put(members::set_status))
        .route("/v1/members/:id/adjust", post(members::adjust_balance))
        .route("/v1/members/:id/ledger/verify", get(members::verify_ledger))
        .route("/v1/transactions", get(transactions::list_transactions))
        .route("/v1/sales/:id", get(sales::get_sale))
        .route(
            "/v1/sales/:id/bids",
            post(sales::sign_up).get(sales::list_bids),
        )
        .route("/v1/sales/:id/draw", post(sales::draw_winner))
        .route(
            "/v1/sales/:id/participants",
            post(participants::tag_participants).get(participants::list_participants),
        )
        .route(
            "/v1/sales/:id/participants/:participant_id",
            delete(participants::remove_participant),
        )
        .route("/v1/sales/:id/split", post(splits::split_sale))
        .layer(cors)
        .with_state(state)
}

/// Path and body ids are plain integers on the wire; reject the impossible ones early.
pub(crate) fn positive_id(name: &str, raw: i64) -> Result<i64, AppError> {
    if raw <= 0 {
        return Err(AppError::BadRequest(format!("Invalid {}", name)));
    }
    Ok(raw)
}
