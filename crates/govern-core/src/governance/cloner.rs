//! Deep copy of a resource plan and budget into a new planning generation

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::error::{GovernanceError, Result};
use crate::storage::{AllocationKind, ResourceStore};

/// Old allocation id to cloned allocation id, per owner kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityMap {
    actors: BTreeMap<i64, i64>,
    org_units: BTreeMap<i64, i64>,
    competencies: BTreeMap<i64, i64>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_kind(&self, kind: AllocationKind) -> &BTreeMap<i64, i64> {
        match kind {
            AllocationKind::Actor => &self.actors,
            AllocationKind::OrgUnit => &self.org_units,
            AllocationKind::Competency => &self.competencies,
        }
    }

    fn for_kind_mut(&mut self, kind: AllocationKind) -> &mut BTreeMap<i64, i64> {
        match kind {
            AllocationKind::Actor => &mut self.actors,
            AllocationKind::OrgUnit => &mut self.org_units,
            AllocationKind::Competency => &mut self.competencies,
        }
    }

    pub fn insert(&mut self, kind: AllocationKind, old_id: i64, new_id: i64) {
        self.for_kind_mut(kind).insert(old_id, new_id);
    }

    pub fn get(&self, kind: AllocationKind, old_id: i64) -> Option<i64> {
        self.for_kind(kind).get(&old_id).copied()
    }

    /// Every (kind, old, new) triple, kinds in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (AllocationKind, i64, i64)> + '_ {
        AllocationKind::ALL.into_iter().flat_map(move |kind| {
            self.for_kind(kind)
                .iter()
                .map(move |(old, new)| (kind, *old, *new))
        })
    }

    pub fn len(&self) -> usize {
        self.actors.len() + self.org_units.len() + self.competencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of cloning one resource plan and budget
#[derive(Debug, Clone, Serialize)]
pub struct ClonedResources {
    pub resource_plan_id: i64,
    pub budget_id: i64,
    pub identities: IdentityMap,
    pub budget_lines: usize,
}

/// Copy every non-deleted allocation and budget line into a fresh plan and budget
///
/// Both sources are required; a generation missing either one cannot be cloned.
pub fn clone_resources(
    conn: &Connection,
    resource_plan_id: Option<i64>,
    budget_id: Option<i64>,
) -> Result<ClonedResources> {
    let (Some(source_plan), Some(source_budget)) = (resource_plan_id, budget_id) else {
        return Err(GovernanceError::invalid_state(
            "cannot clone a planning without both a resource plan and a budget",
        ));
    };

    let store = ResourceStore::new(conn);
    if !store.resource_plan_exists(source_plan)? {
        return Err(GovernanceError::not_found("resource plan", source_plan));
    }
    if !store.budget_exists(source_budget)? {
        return Err(GovernanceError::not_found("budget", source_budget));
    }

    let destination_plan = store.create_resource_plan()?;
    let destination_budget = store.create_budget()?;

    let mut identities = IdentityMap::new();
    for kind in AllocationKind::ALL {
        let source_ids = store.allocation_ids(kind, source_plan)?;
        for old_id in source_ids {
            let new_id = store
                .clone_allocation(kind, old_id, destination_plan)
                .map_err(GovernanceError::remap(kind.table()))?;
            identities.insert(kind, old_id, new_id);
        }
        debug!(
            kind = %kind,
            cloned = identities.for_kind(kind).len(),
            "Cloned allocations"
        );
    }

    let budget_lines = store
        .clone_budget_lines(source_budget, destination_budget)
        .map_err(GovernanceError::remap("budget_lines"))?;
    debug!(budget_lines, "Cloned budget lines");

    Ok(ClonedResources {
        resource_plan_id: destination_plan,
        budget_id: destination_budget,
        identities,
        budget_lines,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tempfile::TempDir;

    use super::*;
    use crate::storage::{Database, NewAllocation, NewBudgetLine};

    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).expect("Failed to create database");
        (db, temp_dir)
    }

    #[test]
    fn test_clone_is_complete_and_bijective() {
        let (db, _temp) = create_test_db();
        let store = ResourceStore::new(db.conn());
        let plan = store.create_resource_plan().unwrap();
        let budget = store.create_budget().unwrap();

        let mut source = BTreeSet::new();
        for actor in 1..=4 {
            let id = store
                .add_allocation(AllocationKind::Actor, plan, &NewAllocation::new(actor, 5.0))
                .unwrap();
            source.insert(id);
        }
        let deleted = store
            .add_allocation(AllocationKind::Actor, plan, &NewAllocation::new(9, 1.0))
            .unwrap();
        store
            .soft_delete_allocation(AllocationKind::Actor, deleted)
            .unwrap();
        store
            .add_allocation(AllocationKind::Competency, plan, &NewAllocation::new(3, 2.0))
            .unwrap();
        store
            .add_budget_line(budget, &NewBudgetLine::new("Licences", 12_000.0, true))
            .unwrap();
        let dropped_line = store
            .add_budget_line(budget, &NewBudgetLine::new("Cancelled training", 800.0, true))
            .unwrap();
        store.soft_delete_budget_line(dropped_line).unwrap();

        let cloned = clone_resources(db.conn(), Some(plan), Some(budget)).unwrap();

        let actors = cloned.identities.for_kind(AllocationKind::Actor);
        let keys: BTreeSet<i64> = actors.keys().copied().collect();
        let values: BTreeSet<i64> = actors.values().copied().collect();
        assert_eq!(keys, source);
        assert_eq!(values.len(), source.len());
        assert!(values.is_disjoint(&source));
        assert_eq!(actors.get(&deleted), None);

        assert_eq!(cloned.identities.len(), 5);
        assert_eq!(cloned.budget_lines, 1);
        assert_eq!(
            store
                .list_allocations(AllocationKind::Actor, cloned.resource_plan_id)
                .unwrap()
                .len(),
            4
        );
        let names: Vec<String> = store
            .list_budget_lines(cloned.budget_id)
            .unwrap()
            .into_iter()
            .map(|line| line.name)
            .collect();
        assert_eq!(names, vec!["Licences".to_string()]);
        // source untouched
        assert_eq!(
            store
                .list_allocations(AllocationKind::Actor, plan)
                .unwrap()
                .len(),
            4
        );
    }

    #[test]
    fn test_clone_requires_plan_and_budget() {
        let (db, _temp) = create_test_db();
        let store = ResourceStore::new(db.conn());
        let plan = store.create_resource_plan().unwrap();

        let err = clone_resources(db.conn(), Some(plan), None).unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidState(_)));

        let err = clone_resources(db.conn(), Some(plan), Some(404)).unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::NotFound {
                entity: "budget",
                id: 404
            }
        ));
    }

    #[test]
    fn test_empty_source_gives_empty_map() {
        let (db, _temp) = create_test_db();
        let store = ResourceStore::new(db.conn());
        let plan = store.create_resource_plan().unwrap();
        let budget = store.create_budget().unwrap();

        let cloned = clone_resources(db.conn(), Some(plan), Some(budget)).unwrap();

        assert!(cloned.identities.is_empty());
        assert_ne!(cloned.resource_plan_id, plan);
        assert_ne!(cloned.budget_id, budget);
    }
}
