//! Loot tab sales, their bids and tagged participants.

use crate::domain::{GuildId, MembershipId, ParticipantId, SaleId, Silver, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Stored sale status. "Closed" is not a status of its own: it is `Drawn`
/// with `split_completed` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Open,
    Drawn,
    Cancelled,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Open => "open",
            SaleStatus::Drawn => "drawn",
            SaleStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SaleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(SaleStatus::Open),
            "drawn" => Ok(SaleStatus::Drawn),
            "cancelled" => Ok(SaleStatus::Cancelled),
            other => Err(format!("unknown sale status: {}", other)),
        }
    }
}

impl std::fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub guild_id: GuildId,
    pub created_by: MembershipId,
    pub price: Silver,
    pub duration_hours: i64,
    pub repair_cost: Silver,
    pub bonus_amount: Silver,
    pub description: Option<String>,
    pub status: SaleStatus,
    pub created_at: TimeMs,
    pub expires_at: TimeMs,
    pub winner_id: Option<MembershipId>,
    pub drawn_at: Option<TimeMs>,
    pub split_completed: bool,
    pub split_completed_at: Option<TimeMs>,
}

impl Sale {
    /// Expiry is advisory: an expired sale stays open until someone draws it.
    pub fn is_expired(&self, now: TimeMs) -> bool {
        now >= self.expires_at
    }

    /// Cancelled, or drawn and already split.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            SaleStatus::Cancelled => true,
            SaleStatus::Drawn => self.split_completed,
            SaleStatus::Open => false,
        }
    }

    /// Participants may be tagged or removed only in this window.
    pub fn accepts_participant_changes(&self) -> bool {
        self.status == SaleStatus::Drawn && !self.split_completed
    }

    /// Label used in ledger reasons and notifications.
    pub fn label(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => format!("sale #{} ({})", self.id, d),
            _ => format!("sale #{}", self.id),
        }
    }
}

/// Fields fixed at sale creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSale {
    pub guild_id: GuildId,
    pub created_by: MembershipId,
    pub price: Silver,
    pub duration_hours: i64,
    pub repair_cost: Silver,
    pub bonus_amount: Silver,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: i64,
    pub sale_id: SaleId,
    pub membership_id: MembershipId,
    pub created_at: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub sale_id: SaleId,
    pub membership_id: MembershipId,
    pub display_name: String,
    pub tagged_by: MembershipId,
    pub created_at: TimeMs,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale(status: SaleStatus, split_completed: bool) -> Sale {
        Sale {
            id: SaleId::new(7),
            guild_id: GuildId::new(1),
            created_by: MembershipId::new(1),
            price: 1_000_000,
            duration_hours: 24,
            repair_cost: 0,
            bonus_amount: 0,
            description: Some("T8 tab".to_string()),
            status,
            created_at: TimeMs::new(0),
            expires_at: TimeMs::new(0).plus_hours(24),
            winner_id: None,
            drawn_at: None,
            split_completed,
            split_completed_at: None,
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!sale(SaleStatus::Open, false).is_terminal());
        assert!(!sale(SaleStatus::Drawn, false).is_terminal());
        assert!(sale(SaleStatus::Drawn, true).is_terminal());
        assert!(sale(SaleStatus::Cancelled, false).is_terminal());
    }

    #[test]
    fn test_participant_window() {
        assert!(sale(SaleStatus::Drawn, false).accepts_participant_changes());
        assert!(!sale(SaleStatus::Drawn, true).accepts_participant_changes());
        assert!(!sale(SaleStatus::Open, false).accepts_participant_changes());
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let s = sale(SaleStatus::Open, false);
        assert!(!s.is_expired(TimeMs::new(s.expires_at.as_ms() - 1)));
        assert!(s.is_expired(s.expires_at));
    }

    #[test]
    fn test_label() {
        let mut s = sale(SaleStatus::Open, false);
        assert_eq!(s.label(), "sale #7 (T8 tab)");
        s.description = Some("  ".to_string());
        assert_eq!(s.label(), "sale #7");
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(SaleStatus::from_str("OPEN").unwrap(), SaleStatus::Open);
        assert!(SaleStatus::from_str("closed").is_err());
    }
}
