//! Guilds and memberships.

use crate::domain::{GuildId, MembershipId, Silver, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub created_at: TimeMs,
}

/// Guild role. Authorization checks against it happen outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Officer,
    Member,
    Alliance,
    Guest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Officer => "officer",
            Role::Member => "member",
            Role::Alliance => "alliance",
            Role::Guest => "guest",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "officer" => Ok(Role::Officer),
            "member" => Ok(Role::Member),
            "alliance" => Ok(Role::Alliance),
            "guest" => Ok(Role::Guest),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership standing. There is no deleted state: ledger history must outlive the member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Pending,
    Active,
    Suspended,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Pending => "pending",
            MembershipStatus::Active => "active",
            MembershipStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MembershipStatus::Pending),
            "active" => Ok(MembershipStatus::Active),
            "suspended" => Ok(MembershipStatus::Suspended),
            other => Err(format!("unknown membership status: {}", other)),
        }
    }
}

impl std::fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub guild_id: GuildId,
    pub display_name: String,
    pub role: Role,
    pub status: MembershipStatus,
    pub balance: Silver,
    pub created_at: TimeMs,
}

/// Case-insensitive lookup key for a display name.
pub fn display_name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [
            Role::Owner,
            Role::Officer,
            Role::Member,
            Role::Alliance,
            Role::Guest,
        ] {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
        assert!(Role::from_str("admin").is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&MembershipStatus::Suspended).unwrap();
        assert_eq!(json, "\"suspended\"");
    }

    #[test]
    fn test_display_name_key_is_case_insensitive() {
        assert_eq!(display_name_key("  Ragnar "), display_name_key("rAGNAR"));
    }
}
