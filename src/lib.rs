pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod referrers;
pub mod sync;

pub use config::Config;
pub use datasource::{DataSourceError, MockVaultReader, StarknetVaultReader, VaultReader};
pub use db::{init_db, Repository};
pub use domain::{
    Address, Commission, Decimal, EntryType, EventPosition, LedgerEntry, ReferralCode, Referrer,
    StreamType,
};
pub use error::AppError;
pub use orchestration::{OrchestrationError, Pipeline, Stage};
