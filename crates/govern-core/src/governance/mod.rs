//! Milestone governance engine
//!
//! A gate decision flows leaves-first through:
//! - `tracker`: validates and records the decision on the milestone instance
//! - `snapshot`: freezes the active planning and creates the next generation
//! - `cloner`: deep-copies allocations and budget lines, yielding an identity map
//! - `remapper`: re-points custom attributes and work orders through that map
//! - `projector`: carries planned milestone dates into the new generation
//!
//! `GovernanceService` runs the whole flow in one immediate transaction per
//! life-cycle instance, guarded by `InstanceLocks`.

pub mod cloner;
pub mod collaborators;
pub mod locks;
pub mod projector;
pub mod remapper;
mod service;
pub mod snapshot;
pub mod tracker;

#[cfg(test)]
mod fixtures;

pub use cloner::{ClonedResources, IdentityMap};
pub use collaborators::{BudgetTracking, DisabledBudgetTracking, OpenDirectory, ResourceDirectory};
pub use locks::{InstanceGuard, InstanceLocks};
pub use remapper::RemapReport;
pub use service::{
    ForecastStatus, GovernanceService, LifeCycleStart, MilestoneDeletion, MilestonePass,
    PlannedMilestoneView,
};
pub use tracker::MilestoneState;
