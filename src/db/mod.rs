//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer for the ledger and sale stores

pub mod migrations;
pub mod repo;

pub use migrations::{init_db, init_db_with};
pub use repo::{
    AdjustOutcome, BalanceAdjustment, DrawRecord, ParticipantRemoval, ParticipantWrite,
    PinnedPlan, PlanShareRecord, Repository, SplitPlanRecord, TransactionFilter, TransactionPage,
};
