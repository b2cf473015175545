//! Domain types for the guild silver economy.
//!
//! This module provides:
//! - Identifier newtypes, TimeMs and the Silver unit
//! - Guild memberships with their balance snapshot
//! - Append-only balance transactions and the replay audit
//! - Sales, bids and tagged participants

pub mod membership;
pub mod primitives;
pub mod sale;
pub mod transaction;

pub use membership::{display_name_key, Guild, Membership, MembershipStatus, Role};
pub use primitives::{GuildId, MembershipId, ParticipantId, SaleId, Silver, TimeMs, TransactionId};
pub use sale::{Bid, NewSale, Participant, Sale, SaleStatus};
pub use transaction::{BalanceTransaction, LedgerAudit};
