//! Planning generations: freeze the active one, derive the next

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use super::cloner::{clone_resources, IdentityMap};
use super::projector::project;
use super::remapper::{remap_dependents, RemapReport};
use crate::constants::governance::FIRST_PLANNING_VERSION;
use crate::error::{GovernanceError, Result};
use crate::storage::{LifeCycleInstance, Planning, PlanningStore, ResourceStore};

/// New active generation and what it took to build it
#[derive(Debug, Clone, Serialize)]
pub struct Generation {
    pub active: Planning,
    pub identities: IdentityMap,
    pub remap: RemapReport,
    pub planned_milestones: usize,
}

/// Outcome of rolling a life-cycle instance to its next generation
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// The generation that was active before, now frozen
    pub frozen: Planning,
    pub generation: Generation,
}

/// Freeze the active planning of `instance` and create the next one
pub fn next_generation(conn: &Connection, instance: &LifeCycleInstance) -> Result<Snapshot> {
    let plannings = PlanningStore::new(conn);

    let previous = plannings
        .active_planning(instance.id)?
        .ok_or_else(|| GovernanceError::not_found("active planning of life-cycle instance", instance.id))?;

    let frozen_count = plannings.freeze_all(instance.id)?;
    let version = plannings
        .max_version(instance.id)?
        .map_or(FIRST_PLANNING_VERSION, |v| v + 1);

    let generation = build_generation(conn, instance, version, Some(&previous))?;

    let frozen = plannings
        .get_planning(previous.id)?
        .ok_or_else(|| GovernanceError::not_found("planning", previous.id))?;

    info!(
        life_cycle_instance_id = instance.id,
        frozen_planning_id = frozen.id,
        frozen_count,
        planning_id = generation.active.id,
        version,
        "Created planning generation"
    );
    Ok(Snapshot { frozen, generation })
}

/// First generation of a new life-cycle instance
///
/// With a source planning (process change) its resources are carried over,
/// otherwise the generation starts with an empty resource plan and budget.
pub fn seed_generation(
    conn: &Connection,
    instance: &LifeCycleInstance,
    source: Option<&Planning>,
) -> Result<Generation> {
    let generation = build_generation(conn, instance, FIRST_PLANNING_VERSION, source)?;
    info!(
        life_cycle_instance_id = instance.id,
        planning_id = generation.active.id,
        source_planning_id = source.map(|p| p.id),
        "Seeded first planning generation"
    );
    Ok(generation)
}

fn build_generation(
    conn: &Connection,
    instance: &LifeCycleInstance,
    version: i64,
    source: Option<&Planning>,
) -> Result<Generation> {
    let plannings = PlanningStore::new(conn);

    let (resource_plan_id, budget_id, identities, remap) = match source {
        Some(Planning {
            resource_plan_id: Some(plan),
            budget_id: Some(budget),
            ..
        }) => {
            let cloned = clone_resources(conn, Some(*plan), Some(*budget))?;
            let remap = remap_dependents(conn, instance.portfolio_entry_id, &cloned.identities)?;
            (cloned.resource_plan_id, cloned.budget_id, cloned.identities, remap)
        }
        _ => {
            let resources = ResourceStore::new(conn);
            (
                resources.create_resource_plan()?,
                resources.create_budget()?,
                IdentityMap::new(),
                RemapReport::default(),
            )
        }
    };

    let planning_id = plannings.create_planning(
        instance.id,
        version,
        Some(resource_plan_id),
        Some(budget_id),
        &Utc::now(),
    )?;
    let planned_milestones = project(conn, instance, planning_id)?;

    let active_count = plannings.count_active(instance.id)?;
    if active_count != 1 {
        return Err(GovernanceError::invalid_state(format!(
            "life-cycle instance {} has {} active plannings",
            instance.id, active_count
        )));
    }

    let active = plannings
        .get_planning(planning_id)?
        .ok_or_else(|| GovernanceError::not_found("planning", planning_id))?;

    Ok(Generation {
        active,
        identities,
        remap,
        planned_milestones,
    })
}
