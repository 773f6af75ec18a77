//! Custom attribute values addressed by (object_type, object_id)
//!
//! Seven scalar kinds live in one table each; multi-item values own a link table
//! holding the selected options.

use chrono::NaiveDate;
use rusqlite::{params, Connection, ToSql};
use serde::{Deserialize, Serialize};

use super::{date_column, format_date, now_timestamp, ObjectRef};

/// Scalar custom attribute kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Boolean,
    Integer,
    Date,
    Decimal,
    String,
    Text,
    SingleItem,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 7] = [
        AttributeKind::Boolean,
        AttributeKind::Integer,
        AttributeKind::Date,
        AttributeKind::Decimal,
        AttributeKind::String,
        AttributeKind::Text,
        AttributeKind::SingleItem,
    ];

    pub fn table(self) -> &'static str {
        self.sql().table
    }

    fn sql(self) -> &'static AttributeSql {
        match self {
            AttributeKind::Boolean => &BOOLEAN_SQL,
            AttributeKind::Integer => &INTEGER_SQL,
            AttributeKind::Date => &DATE_SQL,
            AttributeKind::Decimal => &DECIMAL_SQL,
            AttributeKind::String => &STRING_SQL,
            AttributeKind::Text => &TEXT_SQL,
            AttributeKind::SingleItem => &SINGLE_ITEM_SQL,
        }
    }
}

struct AttributeSql {
    table: &'static str,
    insert: &'static str,
    select_by_owner: &'static str,
    copy_owned: &'static str,
    soft_delete: &'static str,
}

macro_rules! attribute_sql {
    ($table:literal) => {
        AttributeSql {
            table: $table,
            insert: concat!(
                "INSERT INTO ", $table,
                " (object_type, object_id, custom_attribute_definition_id, value, last_update)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            select_by_owner: concat!(
                "SELECT id, object_type, object_id, custom_attribute_definition_id, value
                 FROM ", $table,
                " WHERE object_type = ?1 AND object_id = ?2 AND deleted = 0 ORDER BY id"
            ),
            // ?1 object_type, ?2 old owner, ?3 new owner, ?4 timestamp
            copy_owned: concat!(
                "INSERT INTO ", $table,
                " (object_type, object_id, custom_attribute_definition_id, value, last_update)
                 SELECT object_type, ?3, custom_attribute_definition_id, value, ?4
                 FROM ", $table,
                " WHERE object_type = ?1 AND object_id = ?2 AND deleted = 0 ORDER BY id"
            ),
            soft_delete: concat!("UPDATE ", $table, " SET deleted = 1 WHERE id = ?1"),
        }
    };
}

const BOOLEAN_SQL: AttributeSql = attribute_sql!("boolean_custom_attribute_values");
const INTEGER_SQL: AttributeSql = attribute_sql!("integer_custom_attribute_values");
const DATE_SQL: AttributeSql = attribute_sql!("date_custom_attribute_values");
const DECIMAL_SQL: AttributeSql = attribute_sql!("decimal_custom_attribute_values");
const STRING_SQL: AttributeSql = attribute_sql!("string_custom_attribute_values");
const TEXT_SQL: AttributeSql = attribute_sql!("text_custom_attribute_values");
const SINGLE_ITEM_SQL: AttributeSql = attribute_sql!("single_item_custom_attribute_values");

pub(crate) const MULTI_ITEM_TABLE: &str = "multi_item_custom_attribute_values";
pub(crate) const MULTI_ITEM_LINK_TABLE: &str = "multi_item_custom_attribute_value_items";

/// Typed value of a scalar custom attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Boolean(bool),
    Integer(i64),
    Date(NaiveDate),
    Decimal(f64),
    String(String),
    Text(String),
    /// Selected custom attribute item id
    SingleItem(i64),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Boolean(_) => AttributeKind::Boolean,
            AttributeValue::Integer(_) => AttributeKind::Integer,
            AttributeValue::Date(_) => AttributeKind::Date,
            AttributeValue::Decimal(_) => AttributeKind::Decimal,
            AttributeValue::String(_) => AttributeKind::String,
            AttributeValue::Text(_) => AttributeKind::Text,
            AttributeValue::SingleItem(_) => AttributeKind::SingleItem,
        }
    }

    fn to_column(&self) -> Box<dyn ToSql + '_> {
        match self {
            AttributeValue::Boolean(v) => Box::new(*v),
            AttributeValue::Integer(v) | AttributeValue::SingleItem(v) => Box::new(*v),
            AttributeValue::Date(v) => Box::new(format_date(*v)),
            AttributeValue::Decimal(v) => Box::new(*v),
            AttributeValue::String(v) | AttributeValue::Text(v) => Box::new(v.as_str()),
        }
    }

    fn from_column(
        kind: AttributeKind,
        row: &rusqlite::Row,
        idx: usize,
    ) -> rusqlite::Result<Option<Self>> {
        Ok(match kind {
            AttributeKind::Boolean => row.get::<_, Option<bool>>(idx)?.map(AttributeValue::Boolean),
            AttributeKind::Integer => row.get::<_, Option<i64>>(idx)?.map(AttributeValue::Integer),
            AttributeKind::Date => date_column(row, idx)?.map(AttributeValue::Date),
            AttributeKind::Decimal => row.get::<_, Option<f64>>(idx)?.map(AttributeValue::Decimal),
            AttributeKind::String => row.get::<_, Option<String>>(idx)?.map(AttributeValue::String),
            AttributeKind::Text => row.get::<_, Option<String>>(idx)?.map(AttributeValue::Text),
            AttributeKind::SingleItem => {
                row.get::<_, Option<i64>>(idx)?.map(AttributeValue::SingleItem)
            }
        })
    }
}

/// Stored scalar attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRow {
    pub id: i64,
    pub kind: AttributeKind,
    pub object_type: String,
    pub object_id: i64,
    pub definition_id: i64,
    /// `None` when the column is NULL
    pub value: Option<AttributeValue>,
}

/// Stored multi-item value with its selected options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiItemRow {
    pub id: i64,
    pub object_type: String,
    pub object_id: i64,
    pub definition_id: i64,
    /// Selected custom attribute item ids, ascending
    pub items: Vec<i64>,
}

/// Custom attribute store
pub struct AttributeStore<'a> {
    conn: &'a Connection,
}

impl<'a> AttributeStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // =========================================================================
    // Scalar values
    // =========================================================================

    pub fn set_value(
        &self,
        owner: ObjectRef,
        definition_id: i64,
        value: &AttributeValue,
    ) -> rusqlite::Result<i64> {
        let column = value.to_column();
        self.conn.execute(
            value.kind().sql().insert,
            params![
                owner.kind.object_type(),
                owner.id,
                definition_id,
                column,
                now_timestamp()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Non-deleted values of one kind owned by `owner`
    pub fn list_values(
        &self,
        kind: AttributeKind,
        owner: ObjectRef,
    ) -> rusqlite::Result<Vec<AttributeRow>> {
        let mut stmt = self.conn.prepare(kind.sql().select_by_owner)?;
        let rows = stmt.query_map(params![owner.kind.object_type(), owner.id], |row| {
            Ok(AttributeRow {
                id: row.get(0)?,
                kind,
                object_type: row.get(1)?,
                object_id: row.get(2)?,
                definition_id: row.get(3)?,
                value: AttributeValue::from_column(kind, row, 4)?,
            })
        })?;
        rows.collect()
    }

    pub fn soft_delete_value(&self, kind: AttributeKind, id: i64) -> rusqlite::Result<()> {
        self.conn.execute(kind.sql().soft_delete, [id])?;
        Ok(())
    }

    /// Copy every non-deleted value of `kind` owned by `old_id` onto `new_id`
    pub fn copy_values(
        &self,
        kind: AttributeKind,
        object_type: &str,
        old_id: i64,
        new_id: i64,
    ) -> rusqlite::Result<usize> {
        self.conn.execute(
            kind.sql().copy_owned,
            params![object_type, old_id, new_id, now_timestamp()],
        )
    }

    // =========================================================================
    // Multi-item values
    // =========================================================================

    pub fn add_multi_item(
        &self,
        owner: ObjectRef,
        definition_id: i64,
        items: &[i64],
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO multi_item_custom_attribute_values
                (object_type, object_id, custom_attribute_definition_id, last_update)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                owner.kind.object_type(),
                owner.id,
                definition_id,
                now_timestamp()
            ],
        )?;
        let value_id = self.conn.last_insert_rowid();

        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO multi_item_custom_attribute_value_items
                (multi_item_custom_attribute_value_id, custom_attribute_item_id)
             VALUES (?1, ?2)",
        )?;
        for item in items {
            stmt.execute(params![value_id, item])?;
        }
        Ok(value_id)
    }

    pub fn list_multi_items(&self, owner: ObjectRef) -> rusqlite::Result<Vec<MultiItemRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, object_type, object_id, custom_attribute_definition_id
             FROM multi_item_custom_attribute_values
             WHERE object_type = ?1 AND object_id = ?2 AND deleted = 0 ORDER BY id",
        )?;
        let headers = stmt
            .query_map(params![owner.kind.object_type(), owner.id], |row| {
                Ok(MultiItemRow {
                    id: row.get(0)?,
                    object_type: row.get(1)?,
                    object_id: row.get(2)?,
                    definition_id: row.get(3)?,
                    items: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        headers
            .into_iter()
            .map(|mut row| {
                row.items = self.multi_item_options(row.id)?;
                Ok(row)
            })
            .collect()
    }

    /// Selected option ids of a multi-item value, ascending
    pub fn multi_item_options(&self, value_id: i64) -> rusqlite::Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT custom_attribute_item_id FROM multi_item_custom_attribute_value_items
             WHERE multi_item_custom_attribute_value_id = ?1
             ORDER BY custom_attribute_item_id",
        )?;
        let items = stmt.query_map([value_id], |row| row.get(0))?;
        items.collect()
    }

    /// Ids of the non-deleted multi-item values owned by `old_id`
    pub fn multi_item_value_ids(&self, object_type: &str, object_id: i64) -> rusqlite::Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM multi_item_custom_attribute_values
             WHERE object_type = ?1 AND object_id = ?2 AND deleted = 0 ORDER BY id",
        )?;
        let ids = stmt.query_map(params![object_type, object_id], |row| row.get(0))?;
        ids.collect()
    }

    /// Copy one multi-item value row onto `new_owner_id`; returns the new value id
    pub fn copy_multi_item_row(&self, value_id: i64, new_owner_id: i64) -> rusqlite::Result<i64> {
        let inserted = self.conn.execute(
            "INSERT INTO multi_item_custom_attribute_values
                (object_type, object_id, custom_attribute_definition_id, last_update)
             SELECT object_type, ?2, custom_attribute_definition_id, ?3
             FROM multi_item_custom_attribute_values WHERE id = ?1 AND deleted = 0",
            params![value_id, new_owner_id, now_timestamp()],
        )?;
        if inserted != 1 {
            return Err(rusqlite::Error::QueryReturnedNoRows);
        }
        Ok(self.conn.last_insert_rowid())
    }

    /// Copy the option links of one multi-item value onto another
    pub fn copy_multi_item_links(&self, old_value_id: i64, new_value_id: i64) -> rusqlite::Result<usize> {
        self.conn.execute(
            "INSERT INTO multi_item_custom_attribute_value_items
                (multi_item_custom_attribute_value_id, custom_attribute_item_id)
             SELECT ?2, custom_attribute_item_id
             FROM multi_item_custom_attribute_value_items
             WHERE multi_item_custom_attribute_value_id = ?1",
            params![old_value_id, new_value_id],
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tempfile::TempDir;

    use crate::storage::{AllocationKind, Database, ObjectRef};

    use super::*;

    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).expect("Failed to create database");
        (db, temp_dir)
    }

    #[test]
    fn test_values_read_back_typed() {
        let (db, _temp) = create_test_db();
        let store = AttributeStore::new(db.conn());
        let owner = ObjectRef::new(AllocationKind::Actor, 5);
        let due = NaiveDate::from_ymd_opt(2024, 9, 30).unwrap();

        store.set_value(owner, 1, &AttributeValue::Date(due)).unwrap();
        store
            .set_value(owner, 2, &AttributeValue::Decimal(0.75))
            .unwrap();

        let dates = store.list_values(AttributeKind::Date, owner).unwrap();
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].value, Some(AttributeValue::Date(due)));
        assert_eq!(dates[0].object_type, "allocated_actor");

        let decimals = store.list_values(AttributeKind::Decimal, owner).unwrap();
        assert_eq!(decimals[0].value, Some(AttributeValue::Decimal(0.75)));
        assert!(store
            .list_values(AttributeKind::Boolean, owner)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_copy_values_skips_deleted_and_other_owner_types() {
        let (db, _temp) = create_test_db();
        let store = AttributeStore::new(db.conn());
        let actor = ObjectRef::new(AllocationKind::Actor, 9);
        let competency = ObjectRef::new(AllocationKind::Competency, 9);

        store
            .set_value(actor, 1, &AttributeValue::String("keep".into()))
            .unwrap();
        let gone = store
            .set_value(actor, 2, &AttributeValue::String("gone".into()))
            .unwrap();
        store.soft_delete_value(AttributeKind::String, gone).unwrap();
        store
            .set_value(competency, 3, &AttributeValue::String("other".into()))
            .unwrap();

        let copied = store
            .copy_values(AttributeKind::String, actor.kind.object_type(), 9, 90)
            .unwrap();
        assert_eq!(copied, 1);

        let new_owner = ObjectRef::new(AllocationKind::Actor, 90);
        let rows = store.list_values(AttributeKind::String, new_owner).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].definition_id, 1);
        assert_eq!(rows[0].value, Some(AttributeValue::String("keep".into())));
    }

    #[test]
    fn test_multi_item_copy_preserves_options() {
        let (db, _temp) = create_test_db();
        let store = AttributeStore::new(db.conn());
        let owner = ObjectRef::new(AllocationKind::OrgUnit, 3);

        let value = store.add_multi_item(owner, 7, &[30, 10, 20]).unwrap();
        let copy = store.copy_multi_item_row(value, 33).unwrap();
        let links = store.copy_multi_item_links(value, copy).unwrap();

        assert_ne!(value, copy);
        assert_eq!(links, 3);
        assert_eq!(store.multi_item_options(copy).unwrap(), vec![10, 20, 30]);
        assert_eq!(store.multi_item_options(value).unwrap(), vec![10, 20, 30]);

        let rows = store
            .list_multi_items(ObjectRef::new(AllocationKind::OrgUnit, 33))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].definition_id, 7);
    }
}
