//! SQLite database wrapper with versioned migrations

use anyhow::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::constants::storage::BUSY_TIMEOUT;

/// Current schema version
const SCHEMA_VERSION: i32 = 4;

/// SQLite database wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new database at the given path
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_busy_timeout(path, BUSY_TIMEOUT)
    }

    /// Create a new database with an explicit busy timeout
    pub fn with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets readers observe the last committed generation while a gate is being passed
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(busy_timeout)?;

        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction that takes the database write lock up front
    ///
    /// Dropping the returned transaction without committing rolls everything back.
    pub fn begin_immediate(&self) -> rusqlite::Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
    }

    /// Get the current schema version from database
    pub(crate) fn get_schema_version(&self) -> i32 {
        if let Err(e) = self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        ) {
            tracing::warn!("Failed to create schema_version table: {}", e);
            return 0;
        }

        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0)
    }

    /// Set schema version after successful migration
    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
        Ok(())
    }

    /// Run database migrations incrementally
    pub(crate) fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version();
        info!(
            "Database schema version: {} (target: {})",
            current_version, SCHEMA_VERSION
        );

        if current_version >= SCHEMA_VERSION {
            return Ok(());
        }

        // Migration 1: Governance core
        if current_version < 1 {
            info!("Running migration 1: Governance core");
            self.conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS portfolio_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    active_life_cycle_instance_id INTEGER REFERENCES life_cycle_instances(id),
                    last_approved_milestone_instance_id INTEGER REFERENCES life_cycle_milestone_instances(id),
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS life_cycle_processes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                -- Outcome of a gate decision; is_approved drives the state machine
                CREATE TABLE IF NOT EXISTS milestone_status_types (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    is_approved INTEGER NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                -- Gate definitions, ordered by (display_order, sub_order)
                -- Additional milestones belong to one portfolio entry instead of the process
                CREATE TABLE IF NOT EXISTS life_cycle_milestones (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    life_cycle_process_id INTEGER NOT NULL REFERENCES life_cycle_processes(id),
                    name TEXT NOT NULL,
                    display_order INTEGER NOT NULL,
                    sub_order INTEGER NOT NULL DEFAULT 0,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    is_additional INTEGER NOT NULL DEFAULT 0,
                    portfolio_entry_id INTEGER REFERENCES portfolio_entries(id),
                    default_status_type_id INTEGER REFERENCES milestone_status_types(id),
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS life_cycle_instances (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    life_cycle_process_id INTEGER NOT NULL REFERENCES life_cycle_processes(id),
                    portfolio_entry_id INTEGER NOT NULL REFERENCES portfolio_entries(id),
                    is_active INTEGER NOT NULL DEFAULT 1,
                    is_concept INTEGER NOT NULL DEFAULT 1,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                -- resource_plan_id / budget_id are written once, when the gate is passed
                CREATE TABLE IF NOT EXISTS life_cycle_milestone_instances (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    life_cycle_instance_id INTEGER NOT NULL REFERENCES life_cycle_instances(id),
                    life_cycle_milestone_id INTEGER NOT NULL REFERENCES life_cycle_milestones(id),
                    is_passed INTEGER NOT NULL DEFAULT 0,
                    status_type_id INTEGER REFERENCES milestone_status_types(id),
                    passed_date TEXT,
                    gate_comments TEXT,
                    resource_plan_id INTEGER,
                    budget_id INTEGER,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS milestone_instance_approvers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    milestone_instance_id INTEGER NOT NULL REFERENCES life_cycle_milestone_instances(id),
                    actor_id INTEGER NOT NULL,
                    has_approved INTEGER NOT NULL,
                    approval_date TEXT NOT NULL,
                    comments TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_milestones_process
                    ON life_cycle_milestones(life_cycle_process_id);
                CREATE INDEX IF NOT EXISTS idx_instances_entry
                    ON life_cycle_instances(portfolio_entry_id);
                CREATE INDEX IF NOT EXISTS idx_milestone_instances_instance
                    ON life_cycle_milestone_instances(life_cycle_instance_id);
                "#,
            )?;
            self.set_schema_version(1)?;
        }

        // Migration 2: Planning generations, resource plans and budgets
        if current_version < 2 {
            info!("Running migration 2: Planning generations");
            self.conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS resource_plans (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS budgets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                -- Exactly one row per life-cycle instance has is_frozen = 0
                CREATE TABLE IF NOT EXISTS life_cycle_instance_plannings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    life_cycle_instance_id INTEGER NOT NULL REFERENCES life_cycle_instances(id),
                    version INTEGER NOT NULL,
                    creation_date TEXT NOT NULL,
                    is_frozen INTEGER NOT NULL DEFAULT 0,
                    resource_plan_id INTEGER REFERENCES resource_plans(id),
                    budget_id INTEGER REFERENCES budgets(id),
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS planned_milestone_instances (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    planning_id INTEGER NOT NULL REFERENCES life_cycle_instance_plannings(id),
                    life_cycle_milestone_id INTEGER NOT NULL REFERENCES life_cycle_milestones(id),
                    planned_date TEXT,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS allocated_actors (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    resource_plan_id INTEGER NOT NULL REFERENCES resource_plans(id),
                    actor_id INTEGER NOT NULL,
                    days REAL NOT NULL DEFAULT 0,
                    forecast_days REAL,
                    daily_rate REAL,
                    is_confirmed INTEGER NOT NULL DEFAULT 0,
                    start_date TEXT,
                    end_date TEXT,
                    currency_code TEXT NOT NULL,
                    currency_rate REAL NOT NULL DEFAULT 1,
                    comments TEXT,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS allocated_org_units (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    resource_plan_id INTEGER NOT NULL REFERENCES resource_plans(id),
                    org_unit_id INTEGER NOT NULL,
                    days REAL NOT NULL DEFAULT 0,
                    forecast_days REAL,
                    daily_rate REAL,
                    is_confirmed INTEGER NOT NULL DEFAULT 0,
                    start_date TEXT,
                    end_date TEXT,
                    currency_code TEXT NOT NULL,
                    currency_rate REAL NOT NULL DEFAULT 1,
                    comments TEXT,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS allocated_competencies (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    resource_plan_id INTEGER NOT NULL REFERENCES resource_plans(id),
                    competency_id INTEGER NOT NULL,
                    days REAL NOT NULL DEFAULT 0,
                    forecast_days REAL,
                    daily_rate REAL,
                    is_confirmed INTEGER NOT NULL DEFAULT 0,
                    start_date TEXT,
                    end_date TEXT,
                    currency_code TEXT NOT NULL,
                    currency_rate REAL NOT NULL DEFAULT 1,
                    comments TEXT,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS budget_lines (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    budget_id INTEGER NOT NULL REFERENCES budgets(id),
                    name TEXT NOT NULL,
                    ref_id TEXT,
                    amount REAL NOT NULL,
                    currency_code TEXT NOT NULL,
                    currency_rate REAL NOT NULL DEFAULT 1,
                    is_opex INTEGER NOT NULL,
                    gl_account TEXT,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                -- (resource_object_type, resource_object_id) points at one allocation row
                CREATE TABLE IF NOT EXISTS work_orders (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    portfolio_entry_id INTEGER NOT NULL REFERENCES portfolio_entries(id),
                    name TEXT NOT NULL,
                    amount REAL NOT NULL DEFAULT 0,
                    currency_code TEXT NOT NULL,
                    is_opex INTEGER NOT NULL DEFAULT 0,
                    resource_object_type TEXT,
                    resource_object_id INTEGER,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_plannings_instance
                    ON life_cycle_instance_plannings(life_cycle_instance_id);
                CREATE INDEX IF NOT EXISTS idx_planned_milestones_planning
                    ON planned_milestone_instances(planning_id);
                CREATE INDEX IF NOT EXISTS idx_allocated_actors_plan
                    ON allocated_actors(resource_plan_id);
                CREATE INDEX IF NOT EXISTS idx_allocated_org_units_plan
                    ON allocated_org_units(resource_plan_id);
                CREATE INDEX IF NOT EXISTS idx_allocated_competencies_plan
                    ON allocated_competencies(resource_plan_id);
                CREATE INDEX IF NOT EXISTS idx_budget_lines_budget
                    ON budget_lines(budget_id);
                "#,
            )?;
            self.set_schema_version(2)?;
        }

        // Migration 3: Custom attribute values
        if current_version < 3 {
            info!("Running migration 3: Custom attribute values");
            self.conn.execute_batch(
                r#"
                -- Values are addressed by (object_type, object_id) so they can hang off any row
                CREATE TABLE IF NOT EXISTS boolean_custom_attribute_values (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_type TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    custom_attribute_definition_id INTEGER NOT NULL,
                    value INTEGER,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS integer_custom_attribute_values (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_type TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    custom_attribute_definition_id INTEGER NOT NULL,
                    value INTEGER,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS date_custom_attribute_values (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_type TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    custom_attribute_definition_id INTEGER NOT NULL,
                    value TEXT,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS decimal_custom_attribute_values (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_type TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    custom_attribute_definition_id INTEGER NOT NULL,
                    value REAL,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS string_custom_attribute_values (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_type TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    custom_attribute_definition_id INTEGER NOT NULL,
                    value TEXT,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS text_custom_attribute_values (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_type TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    custom_attribute_definition_id INTEGER NOT NULL,
                    value TEXT,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                -- value holds the selected custom attribute item id
                CREATE TABLE IF NOT EXISTS single_item_custom_attribute_values (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_type TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    custom_attribute_definition_id INTEGER NOT NULL,
                    value INTEGER,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS multi_item_custom_attribute_values (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_type TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    custom_attribute_definition_id INTEGER NOT NULL,
                    last_update TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                -- Selected options of a multi-item value
                CREATE TABLE IF NOT EXISTS multi_item_custom_attribute_value_items (
                    multi_item_custom_attribute_value_id INTEGER NOT NULL
                        REFERENCES multi_item_custom_attribute_values(id),
                    custom_attribute_item_id INTEGER NOT NULL,
                    PRIMARY KEY (multi_item_custom_attribute_value_id, custom_attribute_item_id)
                );
                "#,
            )?;
            self.set_schema_version(3)?;
        }

        // Migration 4: Indexes for polymorphic owner lookups
        if current_version < 4 {
            info!("Running migration 4: Polymorphic owner indexes");
            self.conn.execute_batch(
                r#"
                CREATE INDEX IF NOT EXISTS idx_boolean_cav_owner
                    ON boolean_custom_attribute_values(object_type, object_id);
                CREATE INDEX IF NOT EXISTS idx_integer_cav_owner
                    ON integer_custom_attribute_values(object_type, object_id);
                CREATE INDEX IF NOT EXISTS idx_date_cav_owner
                    ON date_custom_attribute_values(object_type, object_id);
                CREATE INDEX IF NOT EXISTS idx_decimal_cav_owner
                    ON decimal_custom_attribute_values(object_type, object_id);
                CREATE INDEX IF NOT EXISTS idx_string_cav_owner
                    ON string_custom_attribute_values(object_type, object_id);
                CREATE INDEX IF NOT EXISTS idx_text_cav_owner
                    ON text_custom_attribute_values(object_type, object_id);
                CREATE INDEX IF NOT EXISTS idx_single_item_cav_owner
                    ON single_item_custom_attribute_values(object_type, object_id);
                CREATE INDEX IF NOT EXISTS idx_multi_item_cav_owner
                    ON multi_item_custom_attribute_values(object_type, object_id);
                CREATE INDEX IF NOT EXISTS idx_work_orders_resource
                    ON work_orders(resource_object_type, resource_object_id);
                "#,
            )?;
            self.set_schema_version(4)?;
        }

        info!("Migrations complete");
        Ok(())
    }
}
