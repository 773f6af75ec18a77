//! Planning generations and planned milestone dates

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{date_column, format_date, timestamp_column};

/// Planning generation of a life-cycle instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Planning {
    pub id: i64,
    pub life_cycle_instance_id: i64,
    pub version: i64,
    pub creation_date: DateTime<Utc>,
    /// Frozen generations are read-only audit records
    pub is_frozen: bool,
    pub resource_plan_id: Option<i64>,
    pub budget_id: Option<i64>,
}

/// Planned date of one milestone inside one planning generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMilestone {
    pub id: i64,
    pub planning_id: i64,
    pub milestone_id: i64,
    pub planned_date: Option<NaiveDate>,
}

macro_rules! planning_query {
    ($where:literal) => {
        concat!(
            "SELECT id, life_cycle_instance_id, version, creation_date, is_frozen,
                    resource_plan_id, budget_id
             FROM life_cycle_instance_plannings WHERE ",
            $where
        )
    };
}

/// Planning store
pub struct PlanningStore<'a> {
    conn: &'a Connection,
}

impl<'a> PlanningStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert an active (non-frozen) planning generation
    pub fn create_planning(
        &self,
        life_cycle_instance_id: i64,
        version: i64,
        resource_plan_id: Option<i64>,
        budget_id: Option<i64>,
        creation_date: &DateTime<Utc>,
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO life_cycle_instance_plannings
                (life_cycle_instance_id, version, creation_date, resource_plan_id, budget_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                life_cycle_instance_id,
                version,
                creation_date.to_rfc3339(),
                resource_plan_id,
                budget_id
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_planning(&self, id: i64) -> rusqlite::Result<Option<Planning>> {
        self.conn
            .query_row(
                planning_query!("id = ?1 AND deleted = 0"),
                [id],
                Self::map_planning_row,
            )
            .optional()
    }

    /// The non-frozen generation of a life-cycle instance
    pub fn active_planning(&self, life_cycle_instance_id: i64) -> rusqlite::Result<Option<Planning>> {
        self.conn
            .query_row(
                planning_query!(
                    "life_cycle_instance_id = ?1 AND is_frozen = 0 AND deleted = 0
                     ORDER BY version DESC, id DESC LIMIT 1"
                ),
                [life_cycle_instance_id],
                Self::map_planning_row,
            )
            .optional()
    }

    /// All generations of a life-cycle instance, oldest first
    pub fn list_plannings(&self, life_cycle_instance_id: i64) -> rusqlite::Result<Vec<Planning>> {
        let mut stmt = self.conn.prepare(planning_query!(
            "life_cycle_instance_id = ?1 AND deleted = 0 ORDER BY version, id"
        ))?;
        let plannings = stmt.query_map([life_cycle_instance_id], Self::map_planning_row)?;
        plannings.collect()
    }

    /// Freeze every non-frozen generation; already frozen rows are left alone
    pub fn freeze_all(&self, life_cycle_instance_id: i64) -> rusqlite::Result<usize> {
        self.conn.execute(
            "UPDATE life_cycle_instance_plannings SET is_frozen = 1
             WHERE life_cycle_instance_id = ?1 AND is_frozen = 0 AND deleted = 0",
            [life_cycle_instance_id],
        )
    }

    pub fn count_active(&self, life_cycle_instance_id: i64) -> rusqlite::Result<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM life_cycle_instance_plannings
             WHERE life_cycle_instance_id = ?1 AND is_frozen = 0 AND deleted = 0",
            [life_cycle_instance_id],
            |row| row.get(0),
        )
    }

    pub fn max_version(&self, life_cycle_instance_id: i64) -> rusqlite::Result<Option<i64>> {
        self.conn.query_row(
            "SELECT MAX(version) FROM life_cycle_instance_plannings
             WHERE life_cycle_instance_id = ?1 AND deleted = 0",
            [life_cycle_instance_id],
            |row| row.get(0),
        )
    }

    fn map_planning_row(row: &rusqlite::Row) -> rusqlite::Result<Planning> {
        Ok(Planning {
            id: row.get(0)?,
            life_cycle_instance_id: row.get(1)?,
            version: row.get(2)?,
            creation_date: timestamp_column(row, 3)?.unwrap_or_else(Utc::now),
            is_frozen: row.get(4)?,
            resource_plan_id: row.get(5)?,
            budget_id: row.get(6)?,
        })
    }

    // =========================================================================
    // Planned milestones
    // =========================================================================

    pub fn add_planned_milestone(
        &self,
        planning_id: i64,
        milestone_id: i64,
        planned_date: Option<NaiveDate>,
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO planned_milestone_instances (planning_id, life_cycle_milestone_id, planned_date)
             VALUES (?1, ?2, ?3)",
            params![planning_id, milestone_id, planned_date.map(format_date)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Update the planned date of a milestone; returns the number of rows written
    pub fn set_planned_date(
        &self,
        planning_id: i64,
        milestone_id: i64,
        planned_date: Option<NaiveDate>,
    ) -> rusqlite::Result<usize> {
        self.conn.execute(
            "UPDATE planned_milestone_instances SET planned_date = ?3
             WHERE planning_id = ?1 AND life_cycle_milestone_id = ?2 AND deleted = 0",
            params![planning_id, milestone_id, planned_date.map(format_date)],
        )
    }

    pub fn get_planned_milestone(&self, id: i64) -> rusqlite::Result<Option<PlannedMilestone>> {
        self.conn
            .query_row(
                "SELECT id, planning_id, life_cycle_milestone_id, planned_date
                 FROM planned_milestone_instances WHERE id = ?1 AND deleted = 0",
                [id],
                Self::map_planned_row,
            )
            .optional()
    }

    /// Planned milestones of a generation, in milestone display order
    pub fn list_planned_milestones(&self, planning_id: i64) -> rusqlite::Result<Vec<PlannedMilestone>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.planning_id, p.life_cycle_milestone_id, p.planned_date
             FROM planned_milestone_instances p
             JOIN life_cycle_milestones m ON m.id = p.life_cycle_milestone_id
             WHERE p.planning_id = ?1 AND p.deleted = 0 AND m.deleted = 0
             ORDER BY m.display_order, m.sub_order, m.id",
        )?;
        let planned = stmt.query_map([planning_id], Self::map_planned_row)?;
        planned.collect()
    }

    /// Planned date of a milestone in the latest generation that has a row for it
    ///
    /// A row whose date was cleared counts as the latest record, so `None` is returned
    /// both when the milestone was never planned and when its last plan had no date.
    pub fn last_planned_date(
        &self,
        life_cycle_instance_id: i64,
        milestone_id: i64,
    ) -> rusqlite::Result<Option<NaiveDate>> {
        let date = self
            .conn
            .query_row(
                "SELECT p.planned_date
                 FROM planned_milestone_instances p
                 JOIN life_cycle_instance_plannings g ON g.id = p.planning_id
                 WHERE g.life_cycle_instance_id = ?1 AND g.deleted = 0
                   AND p.life_cycle_milestone_id = ?2 AND p.deleted = 0
                 ORDER BY g.version DESC, g.id DESC
                 LIMIT 1",
                params![life_cycle_instance_id, milestone_id],
                |row| date_column(row, 0),
            )
            .optional()?;
        Ok(date.flatten())
    }

    fn map_planned_row(row: &rusqlite::Row) -> rusqlite::Result<PlannedMilestone> {
        Ok(PlannedMilestone {
            id: row.get(0)?,
            planning_id: row.get(1)?,
            milestone_id: row.get(2)?,
            planned_date: date_column(row, 3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;

    use crate::storage::{Database, LifecycleStore};

    use super::PlanningStore;

    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).expect("Failed to create database");
        (db, temp_dir)
    }

    fn life_cycle_instance(db: &Database) -> (i64, i64) {
        let lifecycle = LifecycleStore::new(db.conn());
        let process = lifecycle.create_process("Standard").unwrap();
        let entry = lifecycle.create_portfolio_entry("Data platform").unwrap();
        let milestone = lifecycle.add_milestone(process, "Gate", 1, None).unwrap();
        let instance = lifecycle.create_life_cycle_instance(process, entry).unwrap();
        (instance, milestone)
    }

    #[test]
    fn test_freeze_all_is_idempotent() {
        let (db, _temp) = create_test_db();
        let (instance, _) = life_cycle_instance(&db);
        let store = PlanningStore::new(db.conn());

        store
            .create_planning(instance, 0, None, None, &Utc::now())
            .unwrap();

        assert_eq!(store.freeze_all(instance).unwrap(), 1);
        assert_eq!(store.freeze_all(instance).unwrap(), 0);
        assert_eq!(store.count_active(instance).unwrap(), 0);
        assert!(store.active_planning(instance).unwrap().is_none());
    }

    #[test]
    fn test_last_planned_date_follows_latest_generation() {
        let (db, _temp) = create_test_db();
        let (instance, milestone) = life_cycle_instance(&db);
        let store = PlanningStore::new(db.conn());
        let june = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let july = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();

        assert_eq!(store.last_planned_date(instance, milestone).unwrap(), None);

        let v0 = store
            .create_planning(instance, 0, None, None, &Utc::now())
            .unwrap();
        store.add_planned_milestone(v0, milestone, Some(june)).unwrap();
        assert_eq!(
            store.last_planned_date(instance, milestone).unwrap(),
            Some(june)
        );

        store.freeze_all(instance).unwrap();
        let v1 = store
            .create_planning(instance, 1, None, None, &Utc::now())
            .unwrap();
        store.add_planned_milestone(v1, milestone, Some(july)).unwrap();
        assert_eq!(
            store.last_planned_date(instance, milestone).unwrap(),
            Some(july)
        );

        store.set_planned_date(v1, milestone, None).unwrap();
        assert_eq!(store.last_planned_date(instance, milestone).unwrap(), None);
    }
}
