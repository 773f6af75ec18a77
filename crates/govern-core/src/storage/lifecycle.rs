//! Portfolio entries, life-cycle processes, milestones and milestone instances

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::timestamp_column;

/// Portfolio entry, reduced to the pointers the gate workflow maintains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioEntry {
    pub id: i64,
    pub name: String,
    pub active_life_cycle_instance_id: Option<i64>,
    pub last_approved_milestone_instance_id: Option<i64>,
}

/// Named governance template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
}

/// Outcome type of a gate decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusType {
    pub id: i64,
    pub name: String,
    pub is_approved: bool,
}

/// Gate definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: i64,
    pub life_cycle_process_id: i64,
    pub name: String,
    pub order: i64,
    pub sub_order: i64,
    pub is_active: bool,
    /// Portfolio-entry specific gate added on top of the process
    pub is_additional: bool,
    pub portfolio_entry_id: Option<i64>,
    pub default_status_type_id: Option<i64>,
}

/// One run of a process for a portfolio entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifeCycleInstance {
    pub id: i64,
    pub life_cycle_process_id: i64,
    pub portfolio_entry_id: i64,
    pub is_active: bool,
    /// True until the first gate is approved
    pub is_concept: bool,
}

/// Decision record of one milestone for one life-cycle instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneInstance {
    pub id: i64,
    pub life_cycle_instance_id: i64,
    pub milestone_id: i64,
    pub is_passed: bool,
    pub status_type_id: Option<i64>,
    /// Approval semantics of the status type, when one is set
    pub is_approved: Option<bool>,
    pub passed_date: Option<DateTime<Utc>>,
    pub gate_comments: Option<String>,
    /// Resource plan of the planning that was active when the gate was passed
    pub resource_plan_id: Option<i64>,
    /// Budget of the planning that was active when the gate was passed
    pub budget_id: Option<i64>,
}

/// Approver vote on a milestone instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approver {
    pub id: i64,
    pub milestone_instance_id: i64,
    pub actor_id: i64,
    pub has_approved: bool,
    pub approval_date: DateTime<Utc>,
    pub comments: Option<String>,
}

macro_rules! milestone_query {
    ($where:literal) => {
        concat!(
            "SELECT id, life_cycle_process_id, name, display_order, sub_order, is_active,
                    is_additional, portfolio_entry_id, default_status_type_id
             FROM life_cycle_milestones WHERE ",
            $where
        )
    };
}

macro_rules! milestone_instance_query {
    ($where:literal) => {
        concat!(
            "SELECT mi.id, mi.life_cycle_instance_id, mi.life_cycle_milestone_id, mi.is_passed,
                    mi.status_type_id, st.is_approved, mi.passed_date, mi.gate_comments,
                    mi.resource_plan_id, mi.budget_id
             FROM life_cycle_milestone_instances mi
             LEFT JOIN milestone_status_types st ON st.id = mi.status_type_id
             WHERE ",
            $where
        )
    };
}

/// Lifecycle store
pub struct LifecycleStore<'a> {
    conn: &'a Connection,
}

impl<'a> LifecycleStore<'a> {
    /// Create a lifecycle store over a connection or an open transaction
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // =========================================================================
    // Portfolio entries
    // =========================================================================

    pub fn create_portfolio_entry(&self, name: &str) -> rusqlite::Result<i64> {
        self.conn
            .execute("INSERT INTO portfolio_entries (name) VALUES (?1)", [name])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_portfolio_entry(&self, id: i64) -> rusqlite::Result<Option<PortfolioEntry>> {
        self.conn
            .query_row(
                "SELECT id, name, active_life_cycle_instance_id, last_approved_milestone_instance_id
                 FROM portfolio_entries WHERE id = ?1 AND deleted = 0",
                [id],
                |row| {
                    Ok(PortfolioEntry {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        active_life_cycle_instance_id: row.get(2)?,
                        last_approved_milestone_instance_id: row.get(3)?,
                    })
                },
            )
            .optional()
    }

    pub fn set_active_life_cycle_instance(
        &self,
        portfolio_entry_id: i64,
        life_cycle_instance_id: Option<i64>,
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE portfolio_entries SET active_life_cycle_instance_id = ?1 WHERE id = ?2",
            params![life_cycle_instance_id, portfolio_entry_id],
        )?;
        Ok(())
    }

    pub fn set_last_approved_milestone_instance(
        &self,
        portfolio_entry_id: i64,
        milestone_instance_id: Option<i64>,
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE portfolio_entries SET last_approved_milestone_instance_id = ?1 WHERE id = ?2",
            params![milestone_instance_id, portfolio_entry_id],
        )?;
        Ok(())
    }

    // =========================================================================
    // Processes, status types and milestones
    // =========================================================================

    pub fn create_process(&self, name: &str) -> rusqlite::Result<i64> {
        self.conn
            .execute("INSERT INTO life_cycle_processes (name) VALUES (?1)", [name])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_process(&self, id: i64) -> rusqlite::Result<Option<Process>> {
        self.conn
            .query_row(
                "SELECT id, name, is_active FROM life_cycle_processes WHERE id = ?1 AND deleted = 0",
                [id],
                |row| {
                    Ok(Process {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        is_active: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn create_status_type(&self, name: &str, is_approved: bool) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO milestone_status_types (name, is_approved) VALUES (?1, ?2)",
            params![name, is_approved],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_status_type(&self, id: i64) -> rusqlite::Result<Option<StatusType>> {
        self.conn
            .query_row(
                "SELECT id, name, is_approved FROM milestone_status_types
                 WHERE id = ?1 AND deleted = 0",
                [id],
                |row| {
                    Ok(StatusType {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        is_approved: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    /// Add a gate to a process
    pub fn add_milestone(
        &self,
        process_id: i64,
        name: &str,
        order: i64,
        default_status_type_id: Option<i64>,
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO life_cycle_milestones
                (life_cycle_process_id, name, display_order, default_status_type_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![process_id, name, order, default_status_type_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Add a gate that only exists for one portfolio entry
    pub fn add_additional_milestone(
        &self,
        process_id: i64,
        portfolio_entry_id: i64,
        name: &str,
        order: i64,
        sub_order: i64,
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO life_cycle_milestones
                (life_cycle_process_id, name, display_order, sub_order, is_additional, portfolio_entry_id)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![process_id, name, order, sub_order, portfolio_entry_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn set_milestone_active(&self, milestone_id: i64, is_active: bool) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE life_cycle_milestones SET is_active = ?1 WHERE id = ?2",
            params![is_active, milestone_id],
        )?;
        Ok(())
    }

    pub fn get_milestone(&self, id: i64) -> rusqlite::Result<Option<Milestone>> {
        self.conn
            .query_row(
                milestone_query!("id = ?1 AND deleted = 0"),
                [id],
                Self::map_milestone_row,
            )
            .optional()
    }

    /// Active, non-additional gates of a process in display order
    pub fn list_process_milestones(&self, process_id: i64) -> rusqlite::Result<Vec<Milestone>> {
        let mut stmt = self.conn.prepare(milestone_query!(
            "life_cycle_process_id = ?1 AND is_additional = 0 AND is_active = 1 AND deleted = 0
             ORDER BY display_order, sub_order, id"
        ))?;
        let milestones = stmt.query_map([process_id], Self::map_milestone_row)?;
        milestones.collect()
    }

    /// Active additional gates of a portfolio entry in display order
    pub fn list_additional_milestones(
        &self,
        portfolio_entry_id: i64,
    ) -> rusqlite::Result<Vec<Milestone>> {
        let mut stmt = self.conn.prepare(milestone_query!(
            "portfolio_entry_id = ?1 AND is_additional = 1 AND is_active = 1 AND deleted = 0
             ORDER BY display_order, sub_order, id"
        ))?;
        let milestones = stmt.query_map([portfolio_entry_id], Self::map_milestone_row)?;
        milestones.collect()
    }

    fn map_milestone_row(row: &rusqlite::Row) -> rusqlite::Result<Milestone> {
        Ok(Milestone {
            id: row.get(0)?,
            life_cycle_process_id: row.get(1)?,
            name: row.get(2)?,
            order: row.get(3)?,
            sub_order: row.get(4)?,
            is_active: row.get(5)?,
            is_additional: row.get(6)?,
            portfolio_entry_id: row.get(7)?,
            default_status_type_id: row.get(8)?,
        })
    }

    // =========================================================================
    // Life-cycle instances
    // =========================================================================

    /// Create an active, concept life-cycle instance
    pub fn create_life_cycle_instance(
        &self,
        process_id: i64,
        portfolio_entry_id: i64,
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO life_cycle_instances (life_cycle_process_id, portfolio_entry_id)
             VALUES (?1, ?2)",
            params![process_id, portfolio_entry_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_life_cycle_instance(&self, id: i64) -> rusqlite::Result<Option<LifeCycleInstance>> {
        self.conn
            .query_row(
                "SELECT id, life_cycle_process_id, portfolio_entry_id, is_active, is_concept
                 FROM life_cycle_instances WHERE id = ?1 AND deleted = 0",
                [id],
                |row| {
                    Ok(LifeCycleInstance {
                        id: row.get(0)?,
                        life_cycle_process_id: row.get(1)?,
                        portfolio_entry_id: row.get(2)?,
                        is_active: row.get(3)?,
                        is_concept: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    pub fn deactivate_life_cycle_instances(&self, portfolio_entry_id: i64) -> rusqlite::Result<usize> {
        self.conn.execute(
            "UPDATE life_cycle_instances SET is_active = 0 WHERE portfolio_entry_id = ?1",
            [portfolio_entry_id],
        )
    }

    pub fn set_concept(&self, life_cycle_instance_id: i64, is_concept: bool) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE life_cycle_instances SET is_concept = ?1 WHERE id = ?2",
            params![is_concept, life_cycle_instance_id],
        )?;
        Ok(())
    }

    // =========================================================================
    // Milestone instances
    // =========================================================================

    pub fn create_milestone_instance(
        &self,
        life_cycle_instance_id: i64,
        milestone_id: i64,
        gate_comments: Option<&str>,
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO life_cycle_milestone_instances
                (life_cycle_instance_id, life_cycle_milestone_id, gate_comments)
             VALUES (?1, ?2, ?3)",
            params![life_cycle_instance_id, milestone_id, gate_comments],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_milestone_instance(&self, id: i64) -> rusqlite::Result<Option<MilestoneInstance>> {
        self.conn
            .query_row(
                milestone_instance_query!("mi.id = ?1 AND mi.deleted = 0"),
                [id],
                Self::map_milestone_instance_row,
            )
            .optional()
    }

    /// Record the gate decision
    ///
    /// Only matches an instance that is not passed yet; returns the number of rows written.
    pub fn mark_passed(
        &self,
        id: i64,
        status_type_id: i64,
        gate_comments: Option<&str>,
        passed_date: &DateTime<Utc>,
        resource_plan_id: Option<i64>,
        budget_id: Option<i64>,
    ) -> rusqlite::Result<usize> {
        self.conn.execute(
            "UPDATE life_cycle_milestone_instances SET
                is_passed = 1,
                status_type_id = ?2,
                gate_comments = ?3,
                passed_date = ?4,
                resource_plan_id = ?5,
                budget_id = ?6
             WHERE id = ?1 AND is_passed = 0 AND deleted = 0",
            params![
                id,
                status_type_id,
                gate_comments,
                passed_date.to_rfc3339(),
                resource_plan_id,
                budget_id
            ],
        )
    }

    pub fn soft_delete_milestone_instance(&self, id: i64) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE life_cycle_milestone_instances SET deleted = 1 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    /// Passed and approved instances of a life-cycle instance, oldest first
    pub fn list_approved_milestone_instances(
        &self,
        life_cycle_instance_id: i64,
    ) -> rusqlite::Result<Vec<MilestoneInstance>> {
        let mut stmt = self.conn.prepare(milestone_instance_query!(
            "mi.life_cycle_instance_id = ?1 AND mi.deleted = 0 AND mi.is_passed = 1
               AND st.is_approved = 1
             ORDER BY mi.passed_date, mi.id"
        ))?;
        let instances = stmt.query_map([life_cycle_instance_id], Self::map_milestone_instance_row)?;
        instances.collect()
    }

    /// Passed date of the latest approved instance of a milestone in the entry's active instances
    pub fn latest_approved_passed_date(
        &self,
        portfolio_entry_id: i64,
        milestone_id: i64,
    ) -> rusqlite::Result<Option<DateTime<Utc>>> {
        let mut stmt = self.conn.prepare(
            "SELECT mi.passed_date
             FROM life_cycle_milestone_instances mi
             JOIN life_cycle_instances li ON li.id = mi.life_cycle_instance_id
             JOIN milestone_status_types st ON st.id = mi.status_type_id
             WHERE li.portfolio_entry_id = ?1 AND li.is_active = 1 AND li.deleted = 0
               AND mi.life_cycle_milestone_id = ?2 AND mi.deleted = 0
               AND mi.is_passed = 1 AND st.is_approved = 1
             ORDER BY mi.passed_date DESC, mi.id DESC
             LIMIT 1",
        )?;
        let date = stmt
            .query_row(params![portfolio_entry_id, milestone_id], |row| {
                timestamp_column(row, 0)
            })
            .optional()?;
        Ok(date.flatten())
    }

    /// Whether the gate is resolved (passed and approved) for the entry
    pub fn has_approved_instance(
        &self,
        portfolio_entry_id: i64,
        milestone_id: i64,
    ) -> rusqlite::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM life_cycle_milestone_instances mi
             JOIN life_cycle_instances li ON li.id = mi.life_cycle_instance_id
             JOIN milestone_status_types st ON st.id = mi.status_type_id
             WHERE li.portfolio_entry_id = ?1 AND li.is_active = 1 AND li.deleted = 0
               AND mi.life_cycle_milestone_id = ?2 AND mi.deleted = 0
               AND mi.is_passed = 1 AND st.is_approved = 1",
            params![portfolio_entry_id, milestone_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn map_milestone_instance_row(row: &rusqlite::Row) -> rusqlite::Result<MilestoneInstance> {
        Ok(MilestoneInstance {
            id: row.get(0)?,
            life_cycle_instance_id: row.get(1)?,
            milestone_id: row.get(2)?,
            is_passed: row.get(3)?,
            status_type_id: row.get(4)?,
            is_approved: row.get(5)?,
            passed_date: timestamp_column(row, 6)?,
            gate_comments: row.get(7)?,
            resource_plan_id: row.get(8)?,
            budget_id: row.get(9)?,
        })
    }

    // =========================================================================
    // Approvers
    // =========================================================================

    pub fn add_approver_vote(
        &self,
        milestone_instance_id: i64,
        actor_id: i64,
        has_approved: bool,
        comments: Option<&str>,
        approval_date: &DateTime<Utc>,
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO milestone_instance_approvers
                (milestone_instance_id, actor_id, has_approved, approval_date, comments)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                milestone_instance_id,
                actor_id,
                has_approved,
                approval_date.to_rfc3339(),
                comments
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_approvers(&self, milestone_instance_id: i64) -> rusqlite::Result<Vec<Approver>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, milestone_instance_id, actor_id, has_approved, approval_date, comments
             FROM milestone_instance_approvers WHERE milestone_instance_id = ?1 ORDER BY id",
        )?;
        let approvers = stmt.query_map([milestone_instance_id], |row| {
            Ok(Approver {
                id: row.get(0)?,
                milestone_instance_id: row.get(1)?,
                actor_id: row.get(2)?,
                has_approved: row.get(3)?,
                approval_date: timestamp_column(row, 4)?.unwrap_or_else(Utc::now),
                comments: row.get(5)?,
            })
        })?;
        approvers.collect()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::storage::Database;

    use super::LifecycleStore;

    /// Helper to create a temporary database for testing
    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).expect("Failed to create database");
        (db, temp_dir)
    }

    #[test]
    fn test_process_milestones_ordered_and_filtered() {
        let (db, _temp) = create_test_db();
        let store = LifecycleStore::new(db.conn());

        let process = store.create_process("Standard").unwrap();
        let entry = store.create_portfolio_entry("ERP rollout").unwrap();
        let late = store.add_milestone(process, "Closure", 3, None).unwrap();
        let early = store.add_milestone(process, "Initiation", 1, None).unwrap();
        let retired = store.add_milestone(process, "Legacy review", 2, None).unwrap();
        store.set_milestone_active(retired, false).unwrap();
        let extra = store
            .add_additional_milestone(process, entry, "Vendor audit", 1, 1)
            .unwrap();

        let ids: Vec<i64> = store
            .list_process_milestones(process)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![early, late]);

        let additional = store.list_additional_milestones(entry).unwrap();
        assert_eq!(additional.len(), 1);
        assert_eq!(additional[0].id, extra);
        assert!(additional[0].is_additional);
    }

    #[test]
    fn test_mark_passed_only_once() {
        let (db, _temp) = create_test_db();
        let store = LifecycleStore::new(db.conn());

        let process = store.create_process("Standard").unwrap();
        let entry = store.create_portfolio_entry("CRM").unwrap();
        let approved = store.create_status_type("Approved", true).unwrap();
        let milestone = store.add_milestone(process, "Gate 1", 1, None).unwrap();
        let instance = store.create_life_cycle_instance(process, entry).unwrap();
        let mi = store
            .create_milestone_instance(instance, milestone, None)
            .unwrap();

        let now = chrono::Utc::now();
        let first = store
            .mark_passed(mi, approved, Some("ok"), &now, None, None)
            .unwrap();
        let second = store
            .mark_passed(mi, approved, Some("again"), &now, None, None)
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);

        let stored = store.get_milestone_instance(mi).unwrap().unwrap();
        assert!(stored.is_passed);
        assert_eq!(stored.is_approved, Some(true));
        assert_eq!(stored.gate_comments.as_deref(), Some("ok"));
        assert!(store.has_approved_instance(entry, milestone).unwrap());
    }

    #[test]
    fn test_soft_deleted_instance_is_hidden() {
        let (db, _temp) = create_test_db();
        let store = LifecycleStore::new(db.conn());

        let process = store.create_process("Standard").unwrap();
        let entry = store.create_portfolio_entry("CRM").unwrap();
        let milestone = store.add_milestone(process, "Gate 1", 1, None).unwrap();
        let instance = store.create_life_cycle_instance(process, entry).unwrap();
        let mi = store
            .create_milestone_instance(instance, milestone, None)
            .unwrap();

        store.soft_delete_milestone_instance(mi).unwrap();

        assert!(store.get_milestone_instance(mi).unwrap().is_none());
    }
}
