//! Best-effort notification sink for draw, split and balance events.
//!
//! Notifications are dispatched after the authoritative state change has
//! committed. A failing sink is logged and never affects the caller.

use crate::domain::{GuildId, MembershipId, SaleId, Silver};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

pub mod mock;
pub mod webhook;

pub use mock::ChannelNotifier;
pub use webhook::WebhookNotifier;

/// One credited share in a split summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutLine {
    pub membership_id: MembershipId,
    pub amount: Silver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    SaleDrawn {
        guild_id: GuildId,
        sale_id: SaleId,
        label: String,
        winner_id: MembershipId,
        bid_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    SaleCancelled {
        guild_id: GuildId,
        sale_id: SaleId,
        label: String,
    },
    #[serde(rename_all = "camelCase")]
    SplitCompleted {
        guild_id: GuildId,
        sale_id: Option<SaleId>,
        label: String,
        payouts: Vec<PayoutLine>,
        total_distributed: Silver,
    },
    #[serde(rename_all = "camelCase")]
    BalanceAdjusted {
        membership_id: MembershipId,
        amount: Silver,
        new_balance: Silver,
        reason: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::SaleDrawn { .. } => "saleDrawn",
            Notification::SaleCancelled { .. } => "saleCancelled",
            Notification::SplitCompleted { .. } => "splitCompleted",
            Notification::BalanceAdjusted { .. } => "balanceAdjusted",
        }
    }
}

/// Outbound notification channel (chat webhook, bot bridge, ...).
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub enum NotifyError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error status from the sink
    HttpError { status: u16, message: String },
    /// The receiving side of the channel is gone
    Closed,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            NotifyError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            NotifyError::Closed => write!(f, "Notification channel closed"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Sink used when no webhook is configured: logs and drops.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(kind = notification.kind(), ?notification, "Notification");
        Ok(())
    }
}

/// Fire-and-forget delivery on a background task.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&notification).await {
            warn!(kind = notification.kind(), error = %e, "Notification delivery failed");
        }
    });
}
