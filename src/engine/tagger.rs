//! Participant tagger: associates players with a drawn sale ahead of the split.

use crate::db::{ParticipantRemoval, ParticipantWrite, Repository};
use crate::domain::{
    display_name_key, MembershipId, MembershipStatus, Participant, ParticipantId, Sale, SaleId,
    SaleStatus, TimeMs,
};
use crate::engine::{is_transient, SaleError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedName {
    pub name: String,
    pub membership_id: MembershipId,
}

/// Per-name result of a tag request. Unknown names and repeats are outcomes, not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagOutcome {
    pub added: Vec<TaggedName>,
    pub already_tagged: Vec<TaggedName>,
    pub not_found: Vec<String>,
}

#[derive(Clone)]
pub struct ParticipantTagger {
    repo: Arc<Repository>,
}

impl ParticipantTagger {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Resolve `names` against the guild's active roster (case-insensitive)
    /// and tag every match on the sale.
    pub async fn tag(
        &self,
        sale_id: SaleId,
        names: &[String],
        tagged_by: MembershipId,
    ) -> Result<TagOutcome, SaleError> {
        let sale = self.eligible_sale(sale_id).await?;

        let roster: HashMap<String, (MembershipId, String)> = self
            .repo
            .list_members(sale.guild_id, Some(MembershipStatus::Active))
            .await?
            .into_iter()
            .map(|m| (display_name_key(&m.display_name), (m.id, m.display_name)))
            .collect();

        let mut outcome = TagOutcome::default();
        let mut resolved = Vec::new();
        let mut names_by_id: HashMap<MembershipId, String> = HashMap::new();
        for name in names {
            let key = display_name_key(name);
            if key.is_empty() {
                continue;
            }
            match roster.get(&key) {
                Some((id, display_name)) => {
                    resolved.push(*id);
                    names_by_id.insert(*id, display_name.clone());
                }
                None => outcome.not_found.push(name.trim().to_string()),
            }
        }

        if resolved.is_empty() {
            return Ok(outcome);
        }

        let write = match self
            .repo
            .insert_participants(sale_id, &resolved, tagged_by, TimeMs::now())
            .await
        {
            Err(e) if is_transient(&e) => {
                warn!(sale_id = %sale_id, error = %e, "Tagging hit a transient store error, retrying once");
                self.repo
                    .insert_participants(sale_id, &resolved, tagged_by, TimeMs::now())
                    .await?
            }
            other => other?,
        };

        let (added, already_tagged) = match write {
            ParticipantWrite::Written {
                added,
                already_tagged,
            } => (added, already_tagged),
            // The sale moved on between the read above and the write.
            ParticipantWrite::NotEligible => return Err(self.ineligible(sale_id).await),
        };

        let label = |id: MembershipId| TaggedName {
            name: names_by_id.get(&id).cloned().unwrap_or_default(),
            membership_id: id,
        };
        outcome.added = added.into_iter().map(label).collect();
        outcome.already_tagged = already_tagged.into_iter().map(label).collect();

        info!(
            sale_id = %sale_id,
            added = outcome.added.len(),
            already_tagged = outcome.already_tagged.len(),
            not_found = outcome.not_found.len(),
            "Participants tagged"
        );
        Ok(outcome)
    }

    /// Untag one participant. Rejected once a split of the sale has started.
    pub async fn remove(
        &self,
        sale_id: SaleId,
        participant_id: ParticipantId,
    ) -> Result<(), SaleError> {
        match self.repo.delete_participant(sale_id, participant_id).await? {
            ParticipantRemoval::Removed => {
                info!(sale_id = %sale_id, participant_id = %participant_id, "Participant removed");
                Ok(())
            }
            ParticipantRemoval::NotFound => {
                Err(SaleError::ParticipantNotFound(sale_id, participant_id))
            }
            ParticipantRemoval::NotEligible => Err(self.ineligible(sale_id).await),
        }
    }

    pub async fn list(&self, sale_id: SaleId) -> Result<Vec<Participant>, SaleError> {
        self.repo
            .get_sale(sale_id)
            .await?
            .ok_or(SaleError::SaleNotFound(sale_id))?;
        Ok(self.repo.list_participants(sale_id).await?)
    }

    async fn eligible_sale(&self, sale_id: SaleId) -> Result<Sale, SaleError> {
        let sale = self
            .repo
            .get_sale(sale_id)
            .await?
            .ok_or(SaleError::SaleNotFound(sale_id))?;
        if !sale.accepts_participant_changes() {
            return Err(ineligible_reason(&sale));
        }
        Ok(sale)
    }

    async fn ineligible(&self, sale_id: SaleId) -> SaleError {
        match self.repo.get_sale(sale_id).await {
            Ok(Some(sale)) => ineligible_reason(&sale),
            Ok(None) => SaleError::SaleNotFound(sale_id),
            Err(e) => SaleError::Db(e),
        }
    }
}

fn ineligible_reason(sale: &Sale) -> SaleError {
    let reason = if sale.split_completed {
        "sale has already been split, participants are locked".to_string()
    } else if sale.status == SaleStatus::Drawn {
        "a split of this sale has started, participants are locked".to_string()
    } else {
        format!("participants can only change on a drawn sale, sale is {}", sale.status)
    };
    SaleError::invalid_state(sale.id, reason)
}
