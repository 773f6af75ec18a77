//! Gate state machine
//!
//! ```text
//! NotPassed ──record_decision(approved)──► PassedApproved
//!     │
//!     └──────record_decision(rejected)──► PassedRejected
//! ```
//! Both passed states are terminal.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{GovernanceError, Result};
use crate::storage::{LifeCycleInstance, LifecycleStore, MilestoneInstance, PlanningStore};

/// Position of a milestone instance in the gate state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneState {
    NotPassed,
    PassedApproved,
    PassedRejected,
}

impl MilestoneInstance {
    pub fn state(&self) -> MilestoneState {
        match (self.is_passed, self.is_approved) {
            (false, _) => MilestoneState::NotPassed,
            (true, Some(true)) => MilestoneState::PassedApproved,
            (true, _) => MilestoneState::PassedRejected,
        }
    }
}

/// A recorded gate decision
#[derive(Debug, Clone)]
pub struct Decision {
    pub instance: MilestoneInstance,
    pub life_cycle_instance: LifeCycleInstance,
}

/// Load the life-cycle instance a milestone instance belongs to
pub(crate) fn owning_instance(
    conn: &Connection,
    milestone_instance_id: i64,
) -> Result<(MilestoneInstance, LifeCycleInstance)> {
    let lifecycle = LifecycleStore::new(conn);
    let instance = lifecycle
        .get_milestone_instance(milestone_instance_id)?
        .ok_or_else(|| GovernanceError::not_found("milestone instance", milestone_instance_id))?;
    let life_cycle_instance = lifecycle
        .get_life_cycle_instance(instance.life_cycle_instance_id)?
        .ok_or_else(|| {
            GovernanceError::not_found("life-cycle instance", instance.life_cycle_instance_id)
        })?;
    Ok((instance, life_cycle_instance))
}

/// Move a not-yet-passed milestone instance to one of the passed states
///
/// Stamps the resource plan and budget of the active planning onto the instance.
/// Approval also clears the concept flag and may move the entry's last approved
/// pointer. The planning roll-over is left to the caller.
pub fn record_decision(
    conn: &Connection,
    milestone_instance_id: i64,
    status_type_id: i64,
    gate_comments: Option<&str>,
    passed_date: DateTime<Utc>,
) -> Result<Decision> {
    let lifecycle = LifecycleStore::new(conn);
    let (instance, life_cycle_instance) = owning_instance(conn, milestone_instance_id)?;

    if instance.is_passed {
        return Err(GovernanceError::invalid_state(format!(
            "milestone instance {} is already passed",
            milestone_instance_id
        )));
    }
    if !life_cycle_instance.is_active {
        return Err(GovernanceError::invalid_state(format!(
            "milestone instance {} belongs to retired life-cycle instance {}",
            milestone_instance_id, life_cycle_instance.id
        )));
    }

    let status = lifecycle
        .get_status_type(status_type_id)?
        .ok_or_else(|| GovernanceError::not_found("milestone status type", status_type_id))?;

    let active = PlanningStore::new(conn).active_planning(life_cycle_instance.id)?;
    let (resource_plan_id, budget_id) = active
        .as_ref()
        .map_or((None, None), |p| (p.resource_plan_id, p.budget_id));

    let written = lifecycle.mark_passed(
        milestone_instance_id,
        status.id,
        gate_comments,
        &passed_date,
        resource_plan_id,
        budget_id,
    )?;
    if written != 1 {
        return Err(GovernanceError::invalid_state(format!(
            "milestone instance {} was passed concurrently",
            milestone_instance_id
        )));
    }

    if status.is_approved {
        lifecycle.set_concept(life_cycle_instance.id, false)?;

        let entry = lifecycle
            .get_portfolio_entry(life_cycle_instance.portfolio_entry_id)?
            .ok_or_else(|| {
                GovernanceError::not_found("portfolio entry", life_cycle_instance.portfolio_entry_id)
            })?;
        let existing = match entry.last_approved_milestone_instance_id {
            Some(id) => lifecycle.get_milestone_instance(id)?,
            None => None,
        };
        if supersedes_last_approved(existing.as_ref(), passed_date) {
            lifecycle.set_last_approved_milestone_instance(entry.id, Some(milestone_instance_id))?;
            debug!(portfolio_entry_id = entry.id, milestone_instance_id, "Moved last approved pointer");
        }
    }

    let instance = lifecycle
        .get_milestone_instance(milestone_instance_id)?
        .ok_or_else(|| GovernanceError::not_found("milestone instance", milestone_instance_id))?;
    let life_cycle_instance = lifecycle
        .get_life_cycle_instance(life_cycle_instance.id)?
        .ok_or_else(|| GovernanceError::not_found("life-cycle instance", life_cycle_instance.id))?;

    info!(
        milestone_instance_id,
        status_type_id,
        state = ?instance.state(),
        "Recorded gate decision"
    );
    Ok(Decision {
        instance,
        life_cycle_instance,
    })
}

/// Whether a newly approved instance passed at `passed_date` replaces `existing`
///
/// A missing, soft-deleted or undated pointer is always replaced; otherwise the
/// pointer moves unless the existing one was passed strictly later (ties move it).
pub fn supersedes_last_approved(existing: Option<&MilestoneInstance>, passed_date: DateTime<Utc>) -> bool {
    match existing.and_then(|e| e.passed_date) {
        None => true,
        Some(existing_date) => existing_date <= passed_date,
    }
}

/// Soft-delete a milestone instance and undo its effect on the entry
///
/// The concept flag is recomputed from the approved instances left, and the
/// last approved pointer falls back to the latest remaining approval.
pub fn rollback_deletion(conn: &Connection, milestone_instance_id: i64) -> Result<Decision> {
    let lifecycle = LifecycleStore::new(conn);
    let (instance, life_cycle_instance) = owning_instance(conn, milestone_instance_id)?;

    lifecycle.soft_delete_milestone_instance(milestone_instance_id)?;

    let remaining = lifecycle.list_approved_milestone_instances(life_cycle_instance.id)?;
    lifecycle.set_concept(life_cycle_instance.id, remaining.is_empty())?;

    let entry = lifecycle
        .get_portfolio_entry(life_cycle_instance.portfolio_entry_id)?
        .ok_or_else(|| {
            GovernanceError::not_found("portfolio entry", life_cycle_instance.portfolio_entry_id)
        })?;
    if entry.last_approved_milestone_instance_id == Some(milestone_instance_id) {
        let fallback = remaining.last().map(|m| m.id);
        lifecycle.set_last_approved_milestone_instance(entry.id, fallback)?;
        debug!(portfolio_entry_id = entry.id, ?fallback, "Reset last approved pointer");
    }

    let life_cycle_instance = lifecycle
        .get_life_cycle_instance(life_cycle_instance.id)?
        .ok_or_else(|| GovernanceError::not_found("life-cycle instance", life_cycle_instance.id))?;

    info!(milestone_instance_id, "Deleted milestone instance");
    Ok(Decision {
        instance,
        life_cycle_instance,
    })
}
