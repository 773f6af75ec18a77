//! Services the engine calls out to but does not own

use tracing::debug;

use crate::storage::Planning;

/// Budget and forecast recomputation run after a gate commits
pub trait BudgetTracking: Send + Sync {
    /// Recomputation only runs when the collaborator reports itself active
    fn is_active(&self) -> bool;

    fn recompute_all_budget_and_forecast_from_resource(&self, planning: &Planning) -> anyhow::Result<()>;
}

/// Budget tracking switched off
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledBudgetTracking;

impl BudgetTracking for DisabledBudgetTracking {
    fn is_active(&self) -> bool {
        false
    }

    fn recompute_all_budget_and_forecast_from_resource(&self, planning: &Planning) -> anyhow::Result<()> {
        debug!(planning_id = planning.id, "Budget tracking disabled, nothing to recompute");
        Ok(())
    }
}

/// Read-only lookup of the actors and org units allocations may point at
pub trait ResourceDirectory: Send + Sync {
    fn actor_exists(&self, actor_id: i64) -> bool;

    fn org_unit_exists(&self, org_unit_id: i64) -> bool;
}

/// Directory that accepts every id
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenDirectory;

impl ResourceDirectory for OpenDirectory {
    fn actor_exists(&self, _actor_id: i64) -> bool {
        true
    }

    fn org_unit_exists(&self, _org_unit_id: i64) -> bool {
        true
    }
}
