//! Persistence layer
//!
//! SQLite-based storage for:
//! - Portfolio entries, life-cycle processes, milestones and their instances
//! - Planning generations and planned milestone dates
//! - Resource plans (allocations) and budgets (budget lines), work orders
//! - Custom attribute values addressed by (object_type, object_id)

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;

use crate::constants::storage::DATE_FORMAT;

mod attributes;
mod database;
#[cfg(test)]
mod database_tests;
mod lifecycle;
mod planning;
mod resources;

pub(crate) use attributes::{MULTI_ITEM_LINK_TABLE, MULTI_ITEM_TABLE};
pub use attributes::{AttributeKind, AttributeRow, AttributeStore, AttributeValue, MultiItemRow};
pub use database::Database;
pub use lifecycle::{
    Approver, LifeCycleInstance, LifecycleStore, Milestone, MilestoneInstance, PortfolioEntry,
    Process, StatusType,
};
pub use planning::{PlannedMilestone, Planning, PlanningStore};
pub use resources::{
    Allocation, AllocationKind, BudgetLine, NewAllocation, NewBudgetLine, ObjectRef,
    ResourceStore, WorkOrder,
};

/// Current time as stored in TEXT timestamp columns
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Format a calendar date for a TEXT date column
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Read an optional calendar date column
pub(crate) fn date_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, DATE_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read an optional RFC 3339 timestamp column
pub(crate) fn timestamp_column(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
