//! Balance ledger entries.

use crate::domain::{MembershipId, Silver, TimeMs, TransactionId};
use serde::{Deserialize, Serialize};

/// An immutable ledger entry. `balance_after` is a snapshot taken inside the
/// same store transaction as the balance update, never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: TransactionId,
    pub membership_id: MembershipId,
    pub amount: Silver,
    pub balance_after: Silver,
    pub reason: String,
    pub performed_by: Option<MembershipId>,
    pub idempotency_key: Option<String>,
    pub created_at: TimeMs,
}

/// Result of replaying a membership's ledger against its stored balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAudit {
    pub membership_id: MembershipId,
    pub consistent: bool,
    pub replayed_balance: Silver,
    pub stored_balance: Silver,
    pub transaction_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_mismatch_id: Option<TransactionId>,
}

impl LedgerAudit {
    /// Replay `entries` (creation order) and compare every snapshot with the running sum.
    pub fn replay(
        membership_id: MembershipId,
        stored_balance: Silver,
        entries: &[BalanceTransaction],
    ) -> Self {
        let mut running: Silver = 0;
        let mut first_mismatch_id = None;

        for entry in entries {
            running = running.saturating_add(entry.amount);
            if first_mismatch_id.is_none() && entry.balance_after != running {
                first_mismatch_id = Some(entry.id);
            }
        }

        LedgerAudit {
            membership_id,
            consistent: first_mismatch_id.is_none() && running == stored_balance,
            replayed_balance: running,
            stored_balance,
            transaction_count: entries.len(),
            first_mismatch_id,
        }
    }
}
