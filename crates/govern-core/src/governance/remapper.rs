//! Re-point polymorphic dependents from cloned allocations to their copies
//!
//! Custom attribute values are copied (originals stay on the frozen rows) while
//! work orders are moved, since a work order belongs to the live plan.

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use super::cloner::IdentityMap;
use crate::error::{GovernanceError, Result};
use crate::storage::{AttributeKind, AttributeStore, ResourceStore, MULTI_ITEM_LINK_TABLE, MULTI_ITEM_TABLE};

/// Row counts written by one remap pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemapReport {
    pub attribute_values: usize,
    pub multi_item_values: usize,
    pub multi_item_links: usize,
    pub work_orders: usize,
}

/// Copy custom attributes and rebind work orders for every identity pair
pub fn remap_dependents(
    conn: &Connection,
    portfolio_entry_id: i64,
    identities: &IdentityMap,
) -> Result<RemapReport> {
    let mut report = remap_attributes(conn, identities)?;
    report.work_orders = rebind_work_orders(conn, portfolio_entry_id, identities)?;
    Ok(report)
}

/// Copy every attribute value owned by an old id onto its new id
pub fn remap_attributes(conn: &Connection, identities: &IdentityMap) -> Result<RemapReport> {
    let store = AttributeStore::new(conn);
    let mut report = RemapReport::default();

    for (kind, old_id, new_id) in identities.iter() {
        let object_type = kind.object_type();

        for attribute in AttributeKind::ALL {
            let copied = store
                .copy_values(attribute, object_type, old_id, new_id)
                .map_err(GovernanceError::remap(attribute.table()))?;
            report.attribute_values += copied;
        }

        let values = store
            .multi_item_value_ids(object_type, old_id)
            .map_err(GovernanceError::remap(MULTI_ITEM_TABLE))?;
        for old_value in values {
            let new_value = store
                .copy_multi_item_row(old_value, new_id)
                .map_err(GovernanceError::remap(MULTI_ITEM_TABLE))?;
            report.multi_item_links += store
                .copy_multi_item_links(old_value, new_value)
                .map_err(GovernanceError::remap(MULTI_ITEM_LINK_TABLE))?;
            report.multi_item_values += 1;
        }
    }

    debug!(
        attribute_values = report.attribute_values,
        multi_item_values = report.multi_item_values,
        multi_item_links = report.multi_item_links,
        "Remapped custom attributes"
    );
    Ok(report)
}

/// Move the entry's work orders from old allocation ids to their clones
pub fn rebind_work_orders(
    conn: &Connection,
    portfolio_entry_id: i64,
    identities: &IdentityMap,
) -> Result<usize> {
    let store = ResourceStore::new(conn);
    let mut rebound = 0;
    for (kind, old_id, new_id) in identities.iter() {
        rebound += store
            .rebind_work_orders(portfolio_entry_id, kind, old_id, new_id)
            .map_err(GovernanceError::remap("work_orders"))?;
    }
    debug!(portfolio_entry_id, rebound, "Rebound work orders");
    Ok(rebound)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::storage::{AllocationKind, AttributeValue, Database, LifecycleStore, ObjectRef};

    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).expect("Failed to create database");
        (db, temp_dir)
    }

    #[test]
    fn test_remap_copies_each_table_and_leaves_originals() {
        let (db, _temp) = create_test_db();
        let attributes = AttributeStore::new(db.conn());
        let old = ObjectRef::new(AllocationKind::Actor, 11);
        let new = ObjectRef::new(AllocationKind::Actor, 12);

        attributes.set_value(old, 1, &AttributeValue::Boolean(true)).unwrap();
        attributes.set_value(old, 2, &AttributeValue::Integer(42)).unwrap();
        attributes
            .set_value(old, 3, &AttributeValue::Text("notes".into()))
            .unwrap();
        attributes.add_multi_item(old, 4, &[100, 200]).unwrap();

        let mut identities = IdentityMap::new();
        identities.insert(AllocationKind::Actor, 11, 12);
        let report = remap_attributes(db.conn(), &identities).unwrap();

        assert_eq!(report.attribute_values, 3);
        assert_eq!(report.multi_item_values, 1);
        assert_eq!(report.multi_item_links, 2);

        for kind in [AttributeKind::Boolean, AttributeKind::Integer, AttributeKind::Text] {
            let before = attributes.list_values(kind, old).unwrap();
            let after = attributes.list_values(kind, new).unwrap();
            assert_eq!(before.len(), 1);
            assert_eq!(after.len(), 1);
            assert_eq!(before[0].definition_id, after[0].definition_id);
            assert_eq!(before[0].value, after[0].value);
            assert_ne!(before[0].id, after[0].id);
        }

        let old_multi = attributes.list_multi_items(old).unwrap();
        let new_multi = attributes.list_multi_items(new).unwrap();
        assert_eq!(old_multi[0].items, new_multi[0].items);
        assert_ne!(old_multi[0].id, new_multi[0].id);
    }

    #[test]
    fn test_no_matching_rows_is_a_no_op() {
        let (db, _temp) = create_test_db();

        let mut identities = IdentityMap::new();
        identities.insert(AllocationKind::OrgUnit, 1, 2);
        let report = remap_dependents(db.conn(), 1, &identities).unwrap();

        assert_eq!(report, RemapReport::default());
    }

    #[test]
    fn test_work_orders_follow_identity_map() {
        let (db, _temp) = create_test_db();
        let lifecycle = LifecycleStore::new(db.conn());
        let resources = ResourceStore::new(db.conn());
        let entry = lifecycle.create_portfolio_entry("Billing").unwrap();
        let other_entry = lifecycle.create_portfolio_entry("Payroll").unwrap();

        let bound = resources
            .add_work_order(entry, "Dev", 500.0, Some(ObjectRef::new(AllocationKind::OrgUnit, 5)))
            .unwrap();
        let foreign = resources
            .add_work_order(
                other_entry,
                "Dev",
                500.0,
                Some(ObjectRef::new(AllocationKind::OrgUnit, 5)),
            )
            .unwrap();
        resources.add_work_order(entry, "Unbound", 50.0, None).unwrap();

        let mut identities = IdentityMap::new();
        identities.insert(AllocationKind::OrgUnit, 5, 55);
        let rebound = rebind_work_orders(db.conn(), entry, &identities).unwrap();

        assert_eq!(rebound, 1);
        let orders = resources.list_work_orders(entry).unwrap();
        let order = orders.iter().find(|o| o.id == bound).unwrap();
        assert_eq!(order.resource_object_id, Some(55));
        let untouched = resources.list_work_orders(other_entry).unwrap();
        assert_eq!(untouched[0].id, foreign);
        assert_eq!(untouched[0].resource_object_id, Some(5));
    }
}
