//! Resource plans, allocations, budgets, budget lines and work orders
//!
//! Allocations come in three kinds that share one column layout but live in
//! separate tables. Each kind owns a static set of statements, so no SQL is
//! assembled at runtime and identities only ever travel as parameters.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{date_column, format_date, now_timestamp};
use crate::constants::governance::DEFAULT_CURRENCY;
use crate::constants::object_types;

/// Owner kinds that custom attributes and work orders can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    Actor,
    OrgUnit,
    Competency,
}

impl AllocationKind {
    pub const ALL: [AllocationKind; 3] = [
        AllocationKind::Actor,
        AllocationKind::OrgUnit,
        AllocationKind::Competency,
    ];

    /// Discriminator stored in `object_type` / `resource_object_type` columns
    pub fn object_type(self) -> &'static str {
        match self {
            AllocationKind::Actor => object_types::ALLOCATED_ACTOR,
            AllocationKind::OrgUnit => object_types::ALLOCATED_ORG_UNIT,
            AllocationKind::Competency => object_types::ALLOCATED_COMPETENCY,
        }
    }

    pub fn from_object_type(object_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.object_type() == object_type)
    }

    pub fn table(self) -> &'static str {
        self.sql().table
    }

    fn sql(self) -> &'static AllocationSql {
        match self {
            AllocationKind::Actor => &ACTOR_SQL,
            AllocationKind::OrgUnit => &ORG_UNIT_SQL,
            AllocationKind::Competency => &COMPETENCY_SQL,
        }
    }
}

impl std::fmt::Display for AllocationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.object_type())
    }
}

/// Polymorphic (object_type, object_id) address of an allocation row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: AllocationKind,
    pub id: i64,
}

impl ObjectRef {
    pub fn new(kind: AllocationKind, id: i64) -> Self {
        Self { kind, id }
    }
}

struct AllocationSql {
    table: &'static str,
    insert: &'static str,
    select_one: &'static str,
    select_by_plan: &'static str,
    ids_by_plan: &'static str,
    clone_row: &'static str,
    soft_delete: &'static str,
}

macro_rules! allocation_sql {
    ($table:literal, $owner:literal) => {
        AllocationSql {
            table: $table,
            insert: concat!(
                "INSERT INTO ", $table, " (resource_plan_id, ", $owner, ", days, forecast_days,
                    daily_rate, is_confirmed, start_date, end_date, currency_code, currency_rate,
                    comments, last_update)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            select_one: concat!(
                "SELECT id, resource_plan_id, ", $owner, ", days, forecast_days, daily_rate,
                        is_confirmed, start_date, end_date, currency_code, currency_rate, comments
                 FROM ", $table, " WHERE id = ?1 AND deleted = 0"
            ),
            select_by_plan: concat!(
                "SELECT id, resource_plan_id, ", $owner, ", days, forecast_days, daily_rate,
                        is_confirmed, start_date, end_date, currency_code, currency_rate, comments
                 FROM ", $table, " WHERE resource_plan_id = ?1 AND deleted = 0 ORDER BY id"
            ),
            ids_by_plan: concat!(
                "SELECT id FROM ", $table, " WHERE resource_plan_id = ?1 AND deleted = 0 ORDER BY id"
            ),
            clone_row: concat!(
                "INSERT INTO ", $table, " (resource_plan_id, ", $owner, ", days, forecast_days,
                    daily_rate, is_confirmed, start_date, end_date, currency_code, currency_rate,
                    comments, last_update)
                 SELECT ?2, ", $owner, ", days, forecast_days, daily_rate, is_confirmed,
                        start_date, end_date, currency_code, currency_rate, comments, ?3
                 FROM ", $table, " WHERE id = ?1 AND deleted = 0"
            ),
            soft_delete: concat!("UPDATE ", $table, " SET deleted = 1 WHERE id = ?1"),
        }
    };
}

const ACTOR_SQL: AllocationSql = allocation_sql!("allocated_actors", "actor_id");
const ORG_UNIT_SQL: AllocationSql = allocation_sql!("allocated_org_units", "org_unit_id");
const COMPETENCY_SQL: AllocationSql = allocation_sql!("allocated_competencies", "competency_id");

/// Allocation row of any kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: i64,
    pub kind: AllocationKind,
    pub resource_plan_id: i64,
    /// Actor, org unit or competency id depending on `kind`
    pub resource_id: i64,
    pub days: f64,
    pub forecast_days: Option<f64>,
    pub daily_rate: Option<f64>,
    pub is_confirmed: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub currency_code: String,
    pub currency_rate: f64,
    pub comments: Option<String>,
}

/// Fields of an allocation to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewAllocation {
    pub resource_id: i64,
    pub days: f64,
    pub forecast_days: Option<f64>,
    pub daily_rate: Option<f64>,
    pub is_confirmed: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub currency_code: String,
    pub currency_rate: f64,
    pub comments: Option<String>,
}

impl NewAllocation {
    pub fn new(resource_id: i64, days: f64) -> Self {
        Self {
            resource_id,
            days,
            forecast_days: None,
            daily_rate: None,
            is_confirmed: false,
            start_date: None,
            end_date: None,
            currency_code: DEFAULT_CURRENCY.to_string(),
            currency_rate: 1.0,
            comments: None,
        }
    }

    pub fn confirmed(mut self) -> Self {
        self.is_confirmed = true;
        self
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }
}

/// Budget line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLine {
    pub id: i64,
    pub budget_id: i64,
    pub name: String,
    pub ref_id: Option<String>,
    pub amount: f64,
    pub currency_code: String,
    pub currency_rate: f64,
    pub is_opex: bool,
    pub gl_account: Option<String>,
}

/// Fields of a budget line to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewBudgetLine {
    pub name: String,
    pub ref_id: Option<String>,
    pub amount: f64,
    pub currency_code: String,
    pub currency_rate: f64,
    pub is_opex: bool,
    pub gl_account: Option<String>,
}

impl NewBudgetLine {
    pub fn new(name: &str, amount: f64, is_opex: bool) -> Self {
        Self {
            name: name.to_string(),
            ref_id: None,
            amount,
            currency_code: DEFAULT_CURRENCY.to_string(),
            currency_rate: 1.0,
            is_opex,
            gl_account: None,
        }
    }
}

/// Work order, optionally bound to an allocation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: i64,
    pub portfolio_entry_id: i64,
    pub name: String,
    pub amount: f64,
    pub currency_code: String,
    pub is_opex: bool,
    pub resource_object_type: Option<String>,
    pub resource_object_id: Option<i64>,
}

impl WorkOrder {
    /// The allocation this work order is bound to, when the type is a known kind
    pub fn resource(&self) -> Option<ObjectRef> {
        let kind = AllocationKind::from_object_type(self.resource_object_type.as_deref()?)?;
        Some(ObjectRef::new(kind, self.resource_object_id?))
    }
}

/// Resource store
pub struct ResourceStore<'a> {
    conn: &'a Connection,
}

impl<'a> ResourceStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // =========================================================================
    // Containers
    // =========================================================================

    pub fn create_resource_plan(&self) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO resource_plans (last_update) VALUES (?1)",
            [now_timestamp()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn create_budget(&self) -> rusqlite::Result<i64> {
        self.conn
            .execute("INSERT INTO budgets (last_update) VALUES (?1)", [now_timestamp()])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn resource_plan_exists(&self, id: i64) -> rusqlite::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM resource_plans WHERE id = ?1 AND deleted = 0",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn budget_exists(&self, id: i64) -> rusqlite::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM budgets WHERE id = ?1 AND deleted = 0",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // =========================================================================
    // Allocations
    // =========================================================================

    pub fn add_allocation(
        &self,
        kind: AllocationKind,
        resource_plan_id: i64,
        allocation: &NewAllocation,
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            kind.sql().insert,
            params![
                resource_plan_id,
                allocation.resource_id,
                allocation.days,
                allocation.forecast_days,
                allocation.daily_rate,
                allocation.is_confirmed,
                allocation.start_date.map(format_date),
                allocation.end_date.map(format_date),
                allocation.currency_code,
                allocation.currency_rate,
                allocation.comments,
                now_timestamp(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_allocation(&self, kind: AllocationKind, id: i64) -> rusqlite::Result<Option<Allocation>> {
        self.conn
            .query_row(kind.sql().select_one, [id], |row| {
                Self::map_allocation_row(kind, row)
            })
            .optional()
    }

    /// Non-deleted allocations of a kind in a resource plan
    pub fn list_allocations(
        &self,
        kind: AllocationKind,
        resource_plan_id: i64,
    ) -> rusqlite::Result<Vec<Allocation>> {
        let mut stmt = self.conn.prepare(kind.sql().select_by_plan)?;
        let allocations =
            stmt.query_map([resource_plan_id], |row| Self::map_allocation_row(kind, row))?;
        allocations.collect()
    }

    pub fn allocation_ids(&self, kind: AllocationKind, resource_plan_id: i64) -> rusqlite::Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(kind.sql().ids_by_plan)?;
        let ids = stmt.query_map([resource_plan_id], |row| row.get(0))?;
        ids.collect()
    }

    /// Copy one allocation into another resource plan and return the new identity
    pub fn clone_allocation(
        &self,
        kind: AllocationKind,
        id: i64,
        destination_plan_id: i64,
    ) -> rusqlite::Result<i64> {
        let inserted = self.conn.execute(
            kind.sql().clone_row,
            params![id, destination_plan_id, now_timestamp()],
        )?;
        if inserted != 1 {
            return Err(rusqlite::Error::QueryReturnedNoRows);
        }
        Ok(self.conn.last_insert_rowid())
    }

    pub fn soft_delete_allocation(&self, kind: AllocationKind, id: i64) -> rusqlite::Result<()> {
        self.conn.execute(kind.sql().soft_delete, [id])?;
        Ok(())
    }

    fn map_allocation_row(kind: AllocationKind, row: &rusqlite::Row) -> rusqlite::Result<Allocation> {
        Ok(Allocation {
            id: row.get(0)?,
            kind,
            resource_plan_id: row.get(1)?,
            resource_id: row.get(2)?,
            days: row.get(3)?,
            forecast_days: row.get(4)?,
            daily_rate: row.get(5)?,
            is_confirmed: row.get(6)?,
            start_date: date_column(row, 7)?,
            end_date: date_column(row, 8)?,
            currency_code: row.get(9)?,
            currency_rate: row.get(10)?,
            comments: row.get(11)?,
        })
    }

    // =========================================================================
    // Budget lines
    // =========================================================================

    pub fn add_budget_line(&self, budget_id: i64, line: &NewBudgetLine) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO budget_lines
                (budget_id, name, ref_id, amount, currency_code, currency_rate, is_opex,
                 gl_account, last_update)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                budget_id,
                line.name,
                line.ref_id,
                line.amount,
                line.currency_code,
                line.currency_rate,
                line.is_opex,
                line.gl_account,
                now_timestamp(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_budget_lines(&self, budget_id: i64) -> rusqlite::Result<Vec<BudgetLine>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, budget_id, name, ref_id, amount, currency_code, currency_rate, is_opex,
                    gl_account
             FROM budget_lines WHERE budget_id = ?1 AND deleted = 0 ORDER BY id",
        )?;
        let lines = stmt.query_map([budget_id], |row| {
            Ok(BudgetLine {
                id: row.get(0)?,
                budget_id: row.get(1)?,
                name: row.get(2)?,
                ref_id: row.get(3)?,
                amount: row.get(4)?,
                currency_code: row.get(5)?,
                currency_rate: row.get(6)?,
                is_opex: row.get(7)?,
                gl_account: row.get(8)?,
            })
        })?;
        lines.collect()
    }

    pub fn soft_delete_budget_line(&self, id: i64) -> rusqlite::Result<()> {
        self.conn
            .execute("UPDATE budget_lines SET deleted = 1 WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Copy every non-deleted line of a budget into another budget
    pub fn clone_budget_lines(&self, source_budget_id: i64, destination_budget_id: i64) -> rusqlite::Result<usize> {
        self.conn.execute(
            "INSERT INTO budget_lines
                (budget_id, name, ref_id, amount, currency_code, currency_rate, is_opex,
                 gl_account, last_update)
             SELECT ?2, name, ref_id, amount, currency_code, currency_rate, is_opex,
                    gl_account, ?3
             FROM budget_lines WHERE budget_id = ?1 AND deleted = 0 ORDER BY id",
            params![source_budget_id, destination_budget_id, now_timestamp()],
        )
    }

    // =========================================================================
    // Work orders
    // =========================================================================

    pub fn add_work_order(
        &self,
        portfolio_entry_id: i64,
        name: &str,
        amount: f64,
        resource: Option<ObjectRef>,
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO work_orders
                (portfolio_entry_id, name, amount, currency_code, resource_object_type,
                 resource_object_id, last_update)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                portfolio_entry_id,
                name,
                amount,
                DEFAULT_CURRENCY,
                resource.map(|r| r.kind.object_type()),
                resource.map(|r| r.id),
                now_timestamp(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_work_orders(&self, portfolio_entry_id: i64) -> rusqlite::Result<Vec<WorkOrder>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, portfolio_entry_id, name, amount, currency_code, is_opex,
                    resource_object_type, resource_object_id
             FROM work_orders WHERE portfolio_entry_id = ?1 AND deleted = 0 ORDER BY id",
        )?;
        let orders = stmt.query_map([portfolio_entry_id], |row| {
            Ok(WorkOrder {
                id: row.get(0)?,
                portfolio_entry_id: row.get(1)?,
                name: row.get(2)?,
                amount: row.get(3)?,
                currency_code: row.get(4)?,
                is_opex: row.get(5)?,
                resource_object_type: row.get(6)?,
                resource_object_id: row.get(7)?,
            })
        })?;
        orders.collect()
    }

    /// Point the entry's work orders bound to `old_id` at `new_id`
    pub fn rebind_work_orders(
        &self,
        portfolio_entry_id: i64,
        kind: AllocationKind,
        old_id: i64,
        new_id: i64,
    ) -> rusqlite::Result<usize> {
        self.conn.execute(
            "UPDATE work_orders SET resource_object_id = ?4, last_update = ?5
             WHERE portfolio_entry_id = ?1 AND resource_object_type = ?2
               AND resource_object_id = ?3 AND deleted = 0",
            params![
                portfolio_entry_id,
                kind.object_type(),
                old_id,
                new_id,
                now_timestamp()
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tempfile::TempDir;

    use crate::storage::Database;

    use super::*;

    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).expect("Failed to create database");
        (db, temp_dir)
    }

    #[test]
    fn test_object_type_round_trip() {
        for kind in AllocationKind::ALL {
            assert_eq!(AllocationKind::from_object_type(kind.object_type()), Some(kind));
        }
        assert_eq!(AllocationKind::from_object_type("budget_line"), None);
    }

    #[test]
    fn test_clone_allocation_copies_fields() {
        let (db, _temp) = create_test_db();
        let store = ResourceStore::new(db.conn());
        let source = store.create_resource_plan().unwrap();
        let destination = store.create_resource_plan().unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 29).unwrap();
        let mut allocation = NewAllocation::new(42, 12.5).confirmed().between(start, end);
        allocation.daily_rate = Some(850.0);
        allocation.comments = Some("lead architect".to_string());

        let original = store
            .add_allocation(AllocationKind::OrgUnit, source, &allocation)
            .unwrap();
        let copy = store
            .clone_allocation(AllocationKind::OrgUnit, original, destination)
            .unwrap();

        assert_ne!(original, copy);
        let before = store
            .get_allocation(AllocationKind::OrgUnit, original)
            .unwrap()
            .unwrap();
        let after = store
            .get_allocation(AllocationKind::OrgUnit, copy)
            .unwrap()
            .unwrap();
        assert_eq!(after.resource_plan_id, destination);
        assert_eq!(
            Allocation {
                id: before.id,
                resource_plan_id: before.resource_plan_id,
                ..after
            },
            before
        );
    }

    #[test]
    fn test_clone_of_deleted_allocation_fails() {
        let (db, _temp) = create_test_db();
        let store = ResourceStore::new(db.conn());
        let source = store.create_resource_plan().unwrap();
        let destination = store.create_resource_plan().unwrap();

        let id = store
            .add_allocation(AllocationKind::Actor, source, &NewAllocation::new(1, 3.0))
            .unwrap();
        store.soft_delete_allocation(AllocationKind::Actor, id).unwrap();

        assert!(store
            .clone_allocation(AllocationKind::Actor, id, destination)
            .is_err());
        assert!(store
            .allocation_ids(AllocationKind::Actor, source)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_rebind_work_orders_scoped_to_kind() {
        let (db, _temp) = create_test_db();
        let store = ResourceStore::new(db.conn());
        let entry: i64 = {
            db.conn()
                .execute("INSERT INTO portfolio_entries (name) VALUES ('Entry')", [])
                .unwrap();
            db.conn().last_insert_rowid()
        };

        let actor_order = store
            .add_work_order(entry, "Build", 1000.0, Some(ObjectRef::new(AllocationKind::Actor, 7)))
            .unwrap();
        let competency_order = store
            .add_work_order(
                entry,
                "Review",
                200.0,
                Some(ObjectRef::new(AllocationKind::Competency, 7)),
            )
            .unwrap();

        let changed = store
            .rebind_work_orders(entry, AllocationKind::Actor, 7, 70)
            .unwrap();
        assert_eq!(changed, 1);

        let orders = store.list_work_orders(entry).unwrap();
        let actor = orders.iter().find(|o| o.id == actor_order).unwrap();
        let competency = orders.iter().find(|o| o.id == competency_order).unwrap();
        assert_eq!(actor.resource(), Some(ObjectRef::new(AllocationKind::Actor, 70)));
        assert_eq!(
            competency.resource(),
            Some(ObjectRef::new(AllocationKind::Competency, 7))
        );
    }
}
