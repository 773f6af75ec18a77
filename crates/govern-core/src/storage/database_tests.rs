//! Tests for database migrations
//!
//! These tests verify that:
//! - All migrations apply successfully
//! - Schema version is tracked correctly
//! - Every polymorphic table carries its owner columns
//! - Data survives reopening the database

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::storage::database::Database;
    use crate::storage::{AllocationKind, AttributeKind};

    /// Helper to create a temporary database for testing
    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).expect("Failed to create database");
        (db, temp_dir)
    }

    fn table_columns(db: &Database, table: &str) -> Vec<String> {
        let mut stmt = db
            .conn()
            .prepare("SELECT name FROM pragma_table_info(?1)")
            .expect("Failed to prepare PRAGMA");
        stmt.query_map([table], |row| row.get::<_, String>(0))
            .expect("Failed to get columns")
            .filter_map(Result::ok)
            .collect()
    }

    #[test]
    fn test_database_creation() {
        let (db, _temp) = create_test_db();

        let version = db.get_schema_version();
        assert_eq!(version, 4, "Expected current schema version to be 4");
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let (db, _temp) = create_test_db();

        let fk_enabled: i32 = db
            .conn()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .expect("Failed to get foreign_keys setting");

        assert_eq!(fk_enabled, 1, "Foreign keys should be enabled");
    }

    #[test]
    fn test_wal_mode_enabled() {
        let (db, _temp) = create_test_db();

        let journal_mode: String = db
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .expect("Failed to get journal_mode");

        assert_eq!(journal_mode.to_lowercase(), "wal", "WAL mode should be enabled");
    }

    #[test]
    fn test_migration_idempotency() {
        let (db, _temp) = create_test_db();

        let version1 = db.get_schema_version();
        db.run_migrations().expect("Re-running migrations failed");
        let version2 = db.get_schema_version();

        assert_eq!(version1, version2, "Schema version should not change");
    }

    #[test]
    fn test_allocation_tables_share_layout() {
        let (db, _temp) = create_test_db();

        let owner_columns = ["actor_id", "org_unit_id", "competency_id"];
        for (kind, owner) in AllocationKind::ALL.into_iter().zip(owner_columns) {
            let mut columns = table_columns(&db, kind.table());
            assert!(columns.contains(&owner.to_string()), "{} lacks {}", kind.table(), owner);

            columns.retain(|c| c != owner);
            for expected in ["id", "resource_plan_id", "days", "is_confirmed", "deleted"] {
                assert!(columns.contains(&expected.to_string()));
            }
            assert_eq!(columns.len(), 13, "{} has unexpected columns", kind.table());
        }
    }

    #[test]
    fn test_attribute_tables_are_polymorphic() {
        let (db, _temp) = create_test_db();

        for kind in AttributeKind::ALL {
            let columns = table_columns(&db, kind.table());
            for expected in [
                "object_type",
                "object_id",
                "custom_attribute_definition_id",
                "value",
                "last_update",
                "deleted",
            ] {
                assert!(
                    columns.contains(&expected.to_string()),
                    "{} lacks {}",
                    kind.table(),
                    expected
                );
            }
        }

        let links = table_columns(&db, "multi_item_custom_attribute_value_items");
        assert_eq!(
            links,
            vec![
                "multi_item_custom_attribute_value_id".to_string(),
                "custom_attribute_item_id".to_string()
            ]
        );
    }

    #[test]
    fn test_data_survives_reopen() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        {
            let db = Database::new(&db_path).expect("Failed to create database");
            db.conn()
                .execute("INSERT INTO portfolio_entries (name) VALUES ('Warehouse')", [])
                .expect("Failed to insert entry");
        }

        let db = Database::new(&db_path).expect("Failed to reopen database");
        let name: String = db
            .conn()
            .query_row("SELECT name FROM portfolio_entries", [], |row| row.get(0))
            .expect("Failed to read entry");

        assert_eq!(name, "Warehouse");
        assert_eq!(db.get_schema_version(), 4);
    }

    #[test]
    fn test_immediate_transaction_rolls_back_on_drop() {
        let (db, _temp) = create_test_db();

        {
            let tx = db.begin_immediate().expect("Failed to begin transaction");
            tx.execute("INSERT INTO portfolio_entries (name) VALUES ('Draft')", [])
                .expect("Failed to insert entry");
        }

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM portfolio_entries", [], |row| row.get(0))
            .expect("Failed to count entries");
        assert_eq!(count, 0);
    }
}
