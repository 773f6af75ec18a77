//! Forward projection of planned milestone dates into a new generation

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;
use crate::storage::{LifeCycleInstance, LifecycleStore, Milestone, PlanningStore};

/// Process milestones plus the entry's additional milestones, in (order, sub_order)
pub(crate) fn ordered_milestones(
    conn: &Connection,
    process_id: i64,
    portfolio_entry_id: i64,
) -> Result<Vec<Milestone>> {
    let lifecycle = LifecycleStore::new(conn);
    let mut milestones = lifecycle.list_process_milestones(process_id)?;
    milestones.extend(lifecycle.list_additional_milestones(portfolio_entry_id)?);
    milestones.sort_by_key(|m| (m.order, m.sub_order, m.id));
    Ok(milestones)
}

/// Write one planned row per still-open milestone into `planning_id`
///
/// Milestones already approved for the entry are skipped. The date is the last one
/// recorded in the instance's planning history, unset when there is none.
/// Must run before any planned row of `planning_id` exists.
pub fn project(conn: &Connection, instance: &LifeCycleInstance, planning_id: i64) -> Result<usize> {
    let lifecycle = LifecycleStore::new(conn);
    let plannings = PlanningStore::new(conn);

    let mut projected = 0;
    for milestone in ordered_milestones(conn, instance.life_cycle_process_id, instance.portfolio_entry_id)? {
        if lifecycle.has_approved_instance(instance.portfolio_entry_id, milestone.id)? {
            continue;
        }
        let planned_date = plannings.last_planned_date(instance.id, milestone.id)?;
        plannings.add_planned_milestone(planning_id, milestone.id, planned_date)?;
        projected += 1;
    }

    debug!(planning_id, projected, "Projected planned milestones");
    Ok(projected)
}
