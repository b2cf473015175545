pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod notify;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    BalanceTransaction, Guild, GuildId, Membership, MembershipId, MembershipStatus, Role, Sale,
    SaleId, SaleStatus, Silver, TimeMs,
};
pub use engine::Economy;
pub use error::AppError;
pub use notify::{Notification, Notifier};
