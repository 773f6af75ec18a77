//! Govern Core - life-cycle milestone governance and planning versioning
//!
//! This crate provides the engine behind portfolio entry approval gates:
//! - Milestone instance state machine (pass / approve / reject)
//! - Planning generations that are frozen and re-created at every gate
//! - Resource plan and budget cloning with old-to-new identity maps
//! - Re-pointing of work orders and custom attribute values to cloned rows
//! - Forward projection of planned milestone dates
//!
//! Everything is persisted in SQLite and every gate runs in one transaction.

pub mod config;
pub mod constants;
pub mod error;
pub mod governance;
pub mod paths;
pub mod storage;

// Re-exports for convenience
pub use config::GovernConfig;
pub use error::{GovernanceError, Result};
pub use governance::{GovernanceService, InstanceLocks, MilestonePass};
pub use storage::Database;
