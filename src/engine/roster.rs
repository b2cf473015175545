//! Guild roster: guilds and the memberships whose balances the ledger tracks.

use crate::db::Repository;
use crate::domain::{Guild, GuildId, Membership, MembershipId, MembershipStatus, Role};
use crate::engine::LedgerError;
use std::sync::Arc;
use tracing::info;

const MAX_NAME_LEN: usize = 64;

#[derive(Clone)]
pub struct GuildRoster {
    repo: Arc<Repository>,
}

impl GuildRoster {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub async fn create_guild(&self, name: &str) -> Result<Guild, LedgerError> {
        let name = validate_name("guild name", name)?;
        let guild = self.repo.create_guild(name).await?;
        info!(guild_id = %guild.id, name = %guild.name, "Guild created");
        Ok(guild)
    }

    /// Register a zero-balance membership. Display names are unique per
    /// guild, ignoring case.
    pub async fn register_member(
        &self,
        guild_id: GuildId,
        display_name: &str,
        role: Role,
        status: MembershipStatus,
    ) -> Result<Membership, LedgerError> {
        let display_name = validate_name("display name", display_name)?;
        self.repo
            .get_guild(guild_id)
            .await?
            .ok_or(LedgerError::GuildNotFound(guild_id))?;

        let membership = self
            .repo
            .register_member(guild_id, display_name, role, status)
            .await?
            .ok_or_else(|| LedgerError::NameTaken(display_name.to_string()))?;

        info!(
            guild_id = %guild_id,
            membership_id = %membership.id,
            role = %membership.role,
            "Member registered"
        );
        Ok(membership)
    }

    pub async fn get_membership(
        &self,
        membership_id: MembershipId,
    ) -> Result<Membership, LedgerError> {
        self.repo
            .get_membership(membership_id)
            .await?
            .ok_or(LedgerError::MembershipNotFound(membership_id))
    }

    pub async fn list_members(
        &self,
        guild_id: GuildId,
        status: Option<MembershipStatus>,
    ) -> Result<Vec<Membership>, LedgerError> {
        self.repo
            .get_guild(guild_id)
            .await?
            .ok_or(LedgerError::GuildNotFound(guild_id))?;
        Ok(self.repo.list_members(guild_id, status).await?)
    }

    /// Soft state change. Memberships are never deleted so their ledger survives.
    pub async fn set_status(
        &self,
        membership_id: MembershipId,
        status: MembershipStatus,
    ) -> Result<Membership, LedgerError> {
        if !self.repo.set_membership_status(membership_id, status).await? {
            return Err(LedgerError::MembershipNotFound(membership_id));
        }
        info!(membership_id = %membership_id, status = %status, "Membership status changed");
        self.get_membership(membership_id).await
    }
}

fn validate_name<'a>(what: &str, name: &'a str) -> Result<&'a str, LedgerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidArgument(format!("{} must not be empty", what)));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(LedgerError::InvalidArgument(format!(
            "{} must be at most {} characters",
            what, MAX_NAME_LEN
        )));
    }
    Ok(name)
}
