//! The guild silver economy: roster, ledger, sales, draws, tagging and splits.

use crate::config::Config;
use crate::db::Repository;
use crate::notify::Notifier;
use std::sync::Arc;

pub mod draw;
mod error;
pub mod ledger;
pub mod roster;
pub mod sales;
pub mod split;
pub mod tagger;

pub use draw::{DrawEngine, DrawOutcome};
pub use error::{LedgerError, SaleError, SplitError};
pub use ledger::BalanceService;
pub use roster::GuildRoster;
pub use sales::{BidOutcome, CreateSale, SaleBook};
pub use split::{
    plan_split, PayoutStatus, PoolAmounts, PoolSplit, RecipientPayout, SplitEngine, SplitPlan,
    SplitReport, WeightedRecipient,
};
pub use tagger::{ParticipantTagger, TagOutcome, TaggedName};

/// Busy/locked store errors that may succeed on a second attempt.
///
/// Only idempotent operations (tagging) retry on these; draws and splits
/// surface them immediately.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // SQLITE_BUSY / SQLITE_LOCKED and their extended codes
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

/// All engines wired to one store and one notification sink.
#[derive(Clone)]
pub struct Economy {
    pub roster: GuildRoster,
    pub balances: BalanceService,
    pub sales: SaleBook,
    pub draws: DrawEngine,
    pub tagger: ParticipantTagger,
    pub splits: SplitEngine,
}

impl Economy {
    pub fn new(repo: Arc<Repository>, notifier: Arc<dyn Notifier>, config: &Config) -> Self {
        let balances = BalanceService::new(repo.clone(), notifier.clone(), config.max_page_size);
        Self {
            roster: GuildRoster::new(repo.clone()),
            sales: SaleBook::new(repo.clone(), config.default_sale_duration_hours),
            draws: DrawEngine::new(repo.clone(), notifier.clone()),
            tagger: ParticipantTagger::new(repo.clone()),
            splits: SplitEngine::new(
                repo,
                balances.clone(),
                notifier,
                config.default_tax_percent,
            ),
            balances,
        }
    }
}
