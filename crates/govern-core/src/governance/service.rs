//! Gate workflows over one database connection

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rusqlite::Transaction;
use serde::Serialize;
use tracing::{info, warn};

use super::collaborators::{BudgetTracking, ResourceDirectory};
use super::locks::InstanceLocks;
use super::projector::ordered_milestones;
use super::snapshot::{next_generation, seed_generation, Generation, Snapshot};
use super::tracker::{owning_instance, record_decision, rollback_deletion};
use crate::error::{GovernanceError, Result};
use crate::storage::{
    AllocationKind, Approver, Database, LifeCycleInstance, LifecycleStore, Milestone,
    MilestoneInstance, NewAllocation, NewBudgetLine, Planning, PlanningStore, ResourceStore,
};

/// What happened to budget and forecast recomputation after commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ForecastStatus {
    /// Budget tracking reported itself inactive
    Skipped,
    Recomputed,
    /// The gate stays committed; the error is only reported
    Failed(String),
}

/// Outcome of passing a gate
#[derive(Debug, Clone, Serialize)]
pub struct MilestonePass {
    pub instance: MilestoneInstance,
    pub frozen_planning: Planning,
    pub active_planning: Planning,
    pub forecast: ForecastStatus,
}

/// Outcome of deleting a milestone instance
#[derive(Debug, Clone, Serialize)]
pub struct MilestoneDeletion {
    pub life_cycle_instance: LifeCycleInstance,
    pub frozen_planning: Planning,
    pub active_planning: Planning,
    pub forecast: ForecastStatus,
}

/// A freshly started life-cycle instance with its first generation
#[derive(Debug, Clone, Serialize)]
pub struct LifeCycleStart {
    pub life_cycle_instance: LifeCycleInstance,
    pub planning: Planning,
    /// Allocations carried over from the previous process, if any
    pub carried_allocations: usize,
}

/// A milestone with its planned and effective dates in the active planning
#[derive(Debug, Clone, Serialize)]
pub struct PlannedMilestoneView {
    pub planned_milestone_id: i64,
    pub milestone: Milestone,
    pub planned_date: Option<NaiveDate>,
    /// Approval date when the gate is already approved, else the planned date
    pub effective_date: Option<NaiveDate>,
}

/// Life-cycle governance engine
pub struct GovernanceService<'a> {
    db: &'a Database,
    locks: Arc<InstanceLocks>,
    budget_tracking: Arc<dyn BudgetTracking>,
    directory: Arc<dyn ResourceDirectory>,
}

impl<'a> GovernanceService<'a> {
    pub fn new(
        db: &'a Database,
        locks: Arc<InstanceLocks>,
        budget_tracking: Arc<dyn BudgetTracking>,
        directory: Arc<dyn ResourceDirectory>,
    ) -> Self {
        Self {
            db,
            locks,
            budget_tracking,
            directory,
        }
    }

    // =========================================================================
    // Gates
    // =========================================================================

    /// Record a gate decision and roll the planning to its next generation
    pub fn pass_milestone(
        &self,
        milestone_instance_id: i64,
        status_type_id: i64,
        gate_comments: Option<&str>,
    ) -> Result<MilestonePass> {
        let (_, owner) = owning_instance(self.db.conn(), milestone_instance_id)?;

        let (decision, snapshot) = self.in_instance(owner.id, |tx| {
            let decision = record_decision(tx, milestone_instance_id, status_type_id, gate_comments, Utc::now())?;
            let snapshot = next_generation(tx, &decision.life_cycle_instance)?;
            Ok((decision, snapshot))
        })?;

        let forecast = self.recompute_forecast(&snapshot.frozen);
        let Snapshot { frozen, generation } = snapshot;
        info!(
            milestone_instance_id,
            planning_id = generation.active.id,
            version = generation.active.version,
            cloned = generation.identities.len(),
            work_orders = generation.remap.work_orders,
            "Milestone passed"
        );

        Ok(MilestonePass {
            instance: decision.instance,
            frozen_planning: frozen,
            active_planning: generation.active,
            forecast,
        })
    }

    /// Pass a gate with its milestone's default status and the comments already on it
    pub fn pass_milestone_with_default_status(&self, milestone_instance_id: i64) -> Result<MilestonePass> {
        let lifecycle = LifecycleStore::new(self.db.conn());
        let (instance, _) = owning_instance(self.db.conn(), milestone_instance_id)?;
        let milestone = lifecycle
            .get_milestone(instance.milestone_id)?
            .ok_or_else(|| GovernanceError::not_found("milestone", instance.milestone_id))?;
        let status_type_id = milestone.default_status_type_id.ok_or_else(|| {
            GovernanceError::invalid_state(format!("milestone {} has no default status type", milestone.id))
        })?;

        self.pass_milestone(
            milestone_instance_id,
            status_type_id,
            instance.gate_comments.as_deref(),
        )
    }

    /// Soft-delete a milestone instance and record the change in a new generation
    pub fn delete_milestone_instance(&self, milestone_instance_id: i64) -> Result<MilestoneDeletion> {
        let (_, owner) = owning_instance(self.db.conn(), milestone_instance_id)?;

        let (decision, snapshot) = self.in_instance(owner.id, |tx| {
            let decision = rollback_deletion(tx, milestone_instance_id)?;
            let snapshot = next_generation(tx, &decision.life_cycle_instance)?;
            Ok((decision, snapshot))
        })?;

        let forecast = self.recompute_forecast(&snapshot.frozen);
        Ok(MilestoneDeletion {
            life_cycle_instance: decision.life_cycle_instance,
            frozen_planning: snapshot.frozen,
            active_planning: snapshot.generation.active,
            forecast,
        })
    }

    /// Create a new milestone instance for a milestone of the entry's active life cycle
    pub fn open_milestone_instance(
        &self,
        portfolio_entry_id: i64,
        milestone_id: i64,
        gate_comments: Option<&str>,
    ) -> Result<MilestoneInstance> {
        let instance = self.active_life_cycle_instance(portfolio_entry_id)?;
        let lifecycle = LifecycleStore::new(self.db.conn());
        lifecycle
            .get_milestone(milestone_id)?
            .ok_or_else(|| GovernanceError::not_found("milestone", milestone_id))?;

        let id = self.in_instance(instance.id, |tx| {
            Ok(LifecycleStore::new(tx).create_milestone_instance(instance.id, milestone_id, gate_comments)?)
        })?;
        lifecycle
            .get_milestone_instance(id)?
            .ok_or_else(|| GovernanceError::not_found("milestone instance", id))
    }

    pub fn record_approver_vote(
        &self,
        milestone_instance_id: i64,
        actor_id: i64,
        has_approved: bool,
        comments: Option<&str>,
    ) -> Result<Approver> {
        let (instance, owner) = owning_instance(self.db.conn(), milestone_instance_id)?;
        if !self.directory.actor_exists(actor_id) {
            return Err(GovernanceError::not_found("actor", actor_id));
        }

        let vote_id = self.in_instance(owner.id, |tx| {
            // re-read under the lock: a concurrent pass closes the vote
            let (current, _) = owning_instance(tx, instance.id)?;
            if current.is_passed {
                return Err(GovernanceError::invalid_state(format!(
                    "milestone instance {} is already passed",
                    instance.id
                )));
            }
            Ok(LifecycleStore::new(tx).add_approver_vote(
                instance.id,
                actor_id,
                has_approved,
                comments,
                &Utc::now(),
            )?)
        })?;

        LifecycleStore::new(self.db.conn())
            .list_approvers(instance.id)?
            .into_iter()
            .find(|a| a.id == vote_id)
            .ok_or_else(|| GovernanceError::not_found("approver vote", vote_id))
    }

    // =========================================================================
    // Life-cycle instances
    // =========================================================================

    /// Start the entry's life cycle on `process_id` with an empty first generation
    pub fn create_life_cycle_instance(&self, portfolio_entry_id: i64, process_id: i64) -> Result<LifeCycleStart> {
        self.start_life_cycle(portfolio_entry_id, process_id, false)
    }

    /// Move the entry to another process, carrying the active planning over
    pub fn change_life_cycle_process(&self, portfolio_entry_id: i64, process_id: i64) -> Result<LifeCycleStart> {
        self.start_life_cycle(portfolio_entry_id, process_id, true)
    }

    fn start_life_cycle(&self, portfolio_entry_id: i64, process_id: i64, carry_over: bool) -> Result<LifeCycleStart> {
        let lifecycle = LifecycleStore::new(self.db.conn());
        let entry = lifecycle
            .get_portfolio_entry(portfolio_entry_id)?
            .ok_or_else(|| GovernanceError::not_found("portfolio entry", portfolio_entry_id))?;
        lifecycle
            .get_process(process_id)?
            .ok_or_else(|| GovernanceError::not_found("life-cycle process", process_id))?;

        // Hold the outgoing instance so no gate commits while it is being replaced
        let _guard = entry
            .active_life_cycle_instance_id
            .map(|id| self.locks.acquire(id))
            .transpose()?;

        let tx = self.db.begin_immediate()?;
        let lifecycle = LifecycleStore::new(&tx);

        let source = match (carry_over, entry.active_life_cycle_instance_id) {
            (true, Some(previous)) => PlanningStore::new(&tx).active_planning(previous)?,
            _ => None,
        };

        lifecycle.deactivate_life_cycle_instances(portfolio_entry_id)?;
        let id = lifecycle.create_life_cycle_instance(process_id, portfolio_entry_id)?;
        lifecycle.set_active_life_cycle_instance(portfolio_entry_id, Some(id))?;
        if carry_over {
            lifecycle.set_last_approved_milestone_instance(portfolio_entry_id, None)?;
        }

        let instance = lifecycle
            .get_life_cycle_instance(id)?
            .ok_or_else(|| GovernanceError::not_found("life-cycle instance", id))?;
        let Generation {
            active, identities, ..
        } = seed_generation(&tx, &instance, source.as_ref())?;
        tx.commit()?;

        info!(
            portfolio_entry_id,
            process_id,
            life_cycle_instance_id = id,
            carried_allocations = identities.len(),
            "Started life cycle"
        );
        Ok(LifeCycleStart {
            life_cycle_instance: instance,
            planning: active,
            carried_allocations: identities.len(),
        })
    }

    // =========================================================================
    // Planning
    // =========================================================================

    pub fn get_active_planning(&self, portfolio_entry_id: i64) -> Result<Planning> {
        let instance = self.active_life_cycle_instance(portfolio_entry_id)?;
        PlanningStore::new(self.db.conn())
            .active_planning(instance.id)?
            .ok_or_else(|| GovernanceError::not_found("active planning of life-cycle instance", instance.id))
    }

    /// Planned milestones of the active planning in (order, sub_order)
    pub fn get_planned_milestones(&self, portfolio_entry_id: i64) -> Result<Vec<PlannedMilestoneView>> {
        let instance = self.active_life_cycle_instance(portfolio_entry_id)?;
        let planning = self.get_active_planning(portfolio_entry_id)?;
        let conn = self.db.conn();

        let planned = PlanningStore::new(conn).list_planned_milestones(planning.id)?;
        let milestones = ordered_milestones(conn, instance.life_cycle_process_id, portfolio_entry_id)?;

        let mut views = Vec::with_capacity(planned.len());
        for milestone in milestones {
            let Some(row) = planned.iter().find(|p| p.milestone_id == milestone.id) else {
                continue;
            };
            views.push(PlannedMilestoneView {
                planned_milestone_id: row.id,
                effective_date: self.effective_milestone_date(row.id)?,
                planned_date: row.planned_date,
                milestone,
            });
        }
        Ok(views)
    }

    /// Planned date, overridden by the passed date of an approved instance of the milestone
    pub fn effective_milestone_date(&self, planned_milestone_id: i64) -> Result<Option<NaiveDate>> {
        let conn = self.db.conn();
        let plannings = PlanningStore::new(conn);
        let planned = plannings
            .get_planned_milestone(planned_milestone_id)?
            .ok_or_else(|| GovernanceError::not_found("planned milestone", planned_milestone_id))?;
        let planning = plannings
            .get_planning(planned.planning_id)?
            .ok_or_else(|| GovernanceError::not_found("planning", planned.planning_id))?;
        let lifecycle = LifecycleStore::new(conn);
        let instance = lifecycle
            .get_life_cycle_instance(planning.life_cycle_instance_id)?
            .ok_or_else(|| GovernanceError::not_found("life-cycle instance", planning.life_cycle_instance_id))?;

        let approved = lifecycle.latest_approved_passed_date(instance.portfolio_entry_id, planned.milestone_id)?;
        Ok(approved.map(|at| at.date_naive()).or(planned.planned_date))
    }

    /// Set the planned date of a milestone on the entry's active planning
    pub fn set_planned_date(
        &self,
        portfolio_entry_id: i64,
        milestone_id: i64,
        planned_date: Option<NaiveDate>,
    ) -> Result<()> {
        let planning = self.get_active_planning(portfolio_entry_id)?;
        self.set_planned_date_on(planning.id, milestone_id, planned_date)
    }

    /// Set a planned date on a specific generation; frozen generations are read-only
    pub fn set_planned_date_on(
        &self,
        planning_id: i64,
        milestone_id: i64,
        planned_date: Option<NaiveDate>,
    ) -> Result<()> {
        let planning = PlanningStore::new(self.db.conn())
            .get_planning(planning_id)?
            .ok_or_else(|| GovernanceError::not_found("planning", planning_id))?;
        LifecycleStore::new(self.db.conn())
            .get_milestone(milestone_id)?
            .ok_or_else(|| GovernanceError::not_found("milestone", milestone_id))?;

        self.in_instance(planning.life_cycle_instance_id, |tx| {
            let plannings = PlanningStore::new(tx);
            let current = plannings
                .get_planning(planning_id)?
                .ok_or_else(|| GovernanceError::not_found("planning", planning_id))?;
            if current.is_frozen {
                return Err(GovernanceError::invalid_state(format!(
                    "planning {} is frozen",
                    planning_id
                )));
            }
            if plannings.set_planned_date(planning_id, milestone_id, planned_date)? == 0 {
                plannings.add_planned_milestone(planning_id, milestone_id, planned_date)?;
            }
            Ok(())
        })
    }

    // =========================================================================
    // Resources
    // =========================================================================

    pub fn allocate_actor(&self, portfolio_entry_id: i64, allocation: &NewAllocation) -> Result<i64> {
        if !self.directory.actor_exists(allocation.resource_id) {
            return Err(GovernanceError::not_found("actor", allocation.resource_id));
        }
        self.allocate(AllocationKind::Actor, portfolio_entry_id, allocation)
    }

    pub fn allocate_org_unit(&self, portfolio_entry_id: i64, allocation: &NewAllocation) -> Result<i64> {
        if !self.directory.org_unit_exists(allocation.resource_id) {
            return Err(GovernanceError::not_found("org unit", allocation.resource_id));
        }
        self.allocate(AllocationKind::OrgUnit, portfolio_entry_id, allocation)
    }

    pub fn allocate_competency(&self, portfolio_entry_id: i64, allocation: &NewAllocation) -> Result<i64> {
        self.allocate(AllocationKind::Competency, portfolio_entry_id, allocation)
    }

    fn allocate(&self, kind: AllocationKind, portfolio_entry_id: i64, allocation: &NewAllocation) -> Result<i64> {
        let instance = self.active_life_cycle_instance(portfolio_entry_id)?;
        self.in_instance(instance.id, |tx| {
            let planning = writable_planning(tx, instance.id)?;
            let plan = planning.resource_plan_id.ok_or_else(|| {
                GovernanceError::invalid_state(format!("planning {} has no resource plan", planning.id))
            })?;
            Ok(ResourceStore::new(tx).add_allocation(kind, plan, allocation)?)
        })
    }

    pub fn add_budget_line(&self, portfolio_entry_id: i64, line: &NewBudgetLine) -> Result<i64> {
        let instance = self.active_life_cycle_instance(portfolio_entry_id)?;
        self.in_instance(instance.id, |tx| {
            let planning = writable_planning(tx, instance.id)?;
            let budget = planning.budget_id.ok_or_else(|| {
                GovernanceError::invalid_state(format!("planning {} has no budget", planning.id))
            })?;
            Ok(ResourceStore::new(tx).add_budget_line(budget, line)?)
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn active_life_cycle_instance(&self, portfolio_entry_id: i64) -> Result<LifeCycleInstance> {
        let lifecycle = LifecycleStore::new(self.db.conn());
        let entry = lifecycle
            .get_portfolio_entry(portfolio_entry_id)?
            .ok_or_else(|| GovernanceError::not_found("portfolio entry", portfolio_entry_id))?;
        let id = entry
            .active_life_cycle_instance_id
            .ok_or_else(|| GovernanceError::not_found("active life-cycle instance of portfolio entry", entry.id))?;
        lifecycle
            .get_life_cycle_instance(id)?
            .ok_or_else(|| GovernanceError::not_found("life-cycle instance", id))
    }

    /// Run `work` in one immediate transaction while holding the instance lock
    ///
    /// Any error drops the transaction, which rolls every write back.
    fn in_instance<T>(
        &self,
        life_cycle_instance_id: i64,
        work: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.locks.acquire(life_cycle_instance_id)?;
        let tx = self.db.begin_immediate()?;
        let value = work(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn recompute_forecast(&self, planning: &Planning) -> ForecastStatus {
        if !self.budget_tracking.is_active() {
            return ForecastStatus::Skipped;
        }
        match self
            .budget_tracking
            .recompute_all_budget_and_forecast_from_resource(planning)
        {
            Ok(()) => ForecastStatus::Recomputed,
            Err(e) => {
                warn!(planning_id = planning.id, "Budget and forecast recomputation failed: {:#}", e);
                ForecastStatus::Failed(format!("{:#}", e))
            }
        }
    }
}

fn writable_planning(tx: &Transaction<'_>, life_cycle_instance_id: i64) -> Result<Planning> {
    PlanningStore::new(tx)
        .active_planning(life_cycle_instance_id)?
        .ok_or_else(|| GovernanceError::not_found("active planning of life-cycle instance", life_cycle_instance_id))
}
