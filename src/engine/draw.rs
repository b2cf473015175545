//! Draw engine: picks one winner per sale, uniformly over its bids.

use crate::db::{DrawRecord, Repository};
use crate::domain::{MembershipId, Sale, SaleId, TimeMs};
use crate::engine::SaleError;
use crate::notify::{dispatch, Notification, Notifier};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOutcome {
    Drawn {
        sale: Sale,
        winner: MembershipId,
        bid_count: usize,
    },
    /// No one signed up; the sale is now CANCELLED.
    NoBids { sale: Sale },
    /// The sale does not exist or is no longer OPEN. Nothing changed.
    NotFound,
}

#[derive(Clone)]
pub struct DrawEngine {
    repo: Arc<Repository>,
    notifier: Arc<dyn Notifier>,
}

impl DrawEngine {
    pub fn new(repo: Arc<Repository>, notifier: Arc<dyn Notifier>) -> Self {
        Self { repo, notifier }
    }

    /// Finalize an OPEN sale. Under concurrent calls on one sale exactly one
    /// caller observes `Drawn`/`NoBids`; every other caller gets `NotFound`.
    ///
    /// Store errors are returned as-is and never retried here.
    pub async fn draw(&self, sale_id: SaleId) -> Result<DrawOutcome, SaleError> {
        let record = self
            .repo
            .draw_sale(sale_id, TimeMs::now(), |bid_count| {
                rand::random_range(0..bid_count)
            })
            .await?;

        let outcome = match record {
            None => DrawOutcome::NotFound,
            Some(DrawRecord::Cancelled { sale }) => {
                info!(sale_id = %sale_id, "Sale cancelled, no bids");
                dispatch(
                    &self.notifier,
                    Notification::SaleCancelled {
                        guild_id: sale.guild_id,
                        sale_id,
                        label: sale.label(),
                    },
                );
                DrawOutcome::NoBids { sale }
            }
            Some(DrawRecord::Drawn {
                sale,
                winner,
                bid_count,
            }) => {
                info!(
                    sale_id = %sale_id,
                    winner_id = %winner.membership_id,
                    bid_count,
                    "Sale drawn"
                );
                dispatch(
                    &self.notifier,
                    Notification::SaleDrawn {
                        guild_id: sale.guild_id,
                        sale_id,
                        label: sale.label(),
                        winner_id: winner.membership_id,
                        bid_count,
                    },
                );
                DrawOutcome::Drawn {
                    sale,
                    winner: winner.membership_id,
                    bid_count,
                }
            }
        };

        Ok(outcome)
    }
}
