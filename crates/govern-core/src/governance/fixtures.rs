//! Shared test setup for the governance workflows

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use super::collaborators::{BudgetTracking, DisabledBudgetTracking, OpenDirectory, ResourceDirectory};
use super::locks::InstanceLocks;
use super::service::GovernanceService;
use crate::storage::{Database, LifecycleStore, Planning};

/// One portfolio entry on a three-gate process with a started life cycle
pub(crate) struct World {
    pub db: Database,
    pub path: PathBuf,
    pub locks: Arc<InstanceLocks>,
    pub process: i64,
    pub entry: i64,
    pub approved: i64,
    pub rejected: i64,
    /// Gates in display order; the first has `approved` as default status
    pub milestones: [i64; 3],
    pub life_cycle_instance: i64,
    _temp: TempDir,
}

impl World {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("govern.db");
        let db = Database::new(&path).expect("Failed to create database");

        let (process, entry, approved, rejected, milestones) = {
            let lifecycle = LifecycleStore::new(db.conn());
            let process = lifecycle.create_process("Standard").unwrap();
            let entry = lifecycle.create_portfolio_entry("Customer portal").unwrap();
            let approved = lifecycle.create_status_type("Approved", true).unwrap();
            let rejected = lifecycle.create_status_type("Rejected", false).unwrap();
            let milestones = [
                lifecycle
                    .add_milestone(process, "Initiation", 1, Some(approved))
                    .unwrap(),
                lifecycle.add_milestone(process, "Design", 2, None).unwrap(),
                lifecycle.add_milestone(process, "Go live", 3, None).unwrap(),
            ];
            (process, entry, approved, rejected, milestones)
        };

        let locks = Arc::new(InstanceLocks::default());
        let life_cycle_instance = {
            let service = GovernanceService::new(
                &db,
                Arc::clone(&locks),
                Arc::new(DisabledBudgetTracking),
                Arc::new(OpenDirectory),
            );
            service
                .create_life_cycle_instance(entry, process)
                .unwrap()
                .life_cycle_instance
                .id
        };

        Self {
            db,
            path,
            locks,
            process,
            entry,
            approved,
            rejected,
            milestones,
            life_cycle_instance,
            _temp: temp,
        }
    }

    pub fn service(&self) -> GovernanceService<'_> {
        self.service_with(Arc::new(DisabledBudgetTracking), Arc::new(OpenDirectory))
    }

    pub fn service_with(
        &self,
        budget_tracking: Arc<dyn BudgetTracking>,
        directory: Arc<dyn ResourceDirectory>,
    ) -> GovernanceService<'_> {
        GovernanceService::new(&self.db, Arc::clone(&self.locks), budget_tracking, directory)
    }

    /// Open a milestone instance for gate `index` of the active life cycle
    pub fn open_gate(&self, index: usize) -> i64 {
        self.service()
            .open_milestone_instance(self.entry, self.milestones[index], None)
            .unwrap()
            .id
    }
}

/// Budget tracking that remembers which plannings it was asked about
#[derive(Default)]
pub(crate) struct RecordingBudgetTracking {
    pub seen: Mutex<Vec<i64>>,
}

impl BudgetTracking for RecordingBudgetTracking {
    fn is_active(&self) -> bool {
        true
    }

    fn recompute_all_budget_and_forecast_from_resource(&self, planning: &Planning) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(planning.id);
        Ok(())
    }
}

/// Budget tracking that always fails
pub(crate) struct FailingBudgetTracking;

impl BudgetTracking for FailingBudgetTracking {
    fn is_active(&self) -> bool {
        true
    }

    fn recompute_all_budget_and_forecast_from_resource(&self, _planning: &Planning) -> anyhow::Result<()> {
        anyhow::bail!("forecast service unavailable")
    }
}

/// Directory that knows no actor and no org unit
pub(crate) struct EmptyDirectory;

impl ResourceDirectory for EmptyDirectory {
    fn actor_exists(&self, _actor_id: i64) -> bool {
        false
    }

    fn org_unit_exists(&self, _org_unit_id: i64) -> bool {
        false
    }
}
