//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer for raw events, ledger, rates, referrers and commissions

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{RepoError, Repository, UpsertSummary};
