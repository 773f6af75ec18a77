//! Application constants and configuration defaults
//!
//! Centralized location for magic numbers and default values

use std::time::Duration;

/// Storage configuration
pub mod storage {
    use super::*;

    /// Database file name inside the data directory
    pub const DATABASE_FILE_NAME: &str = "govern.db";

    /// How long SQLite waits on a locked database before failing
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Format of calendar dates stored as TEXT (planned dates, allocation ranges)
    pub const DATE_FORMAT: &str = "%Y-%m-%d";
}

/// Gate workflow configuration
pub mod governance {
    use super::*;

    /// How long a pass waits for another pass on the same life-cycle instance
    pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

    /// Version number of the first planning generation of a life-cycle instance
    pub const FIRST_PLANNING_VERSION: i64 = 0;

    /// Default currency for allocations created without one
    pub const DEFAULT_CURRENCY: &str = "EUR";
}

/// Polymorphic owner discriminators stored in `object_type` columns
pub mod object_types {
    pub const ALLOCATED_ACTOR: &str = "allocated_actor";
    pub const ALLOCATED_ORG_UNIT: &str = "allocated_org_unit";
    pub const ALLOCATED_COMPETENCY: &str = "allocated_competency";
}

/// Paths and file names
pub mod paths {
    /// Data directory name under the platform data dir
    pub const DATA_DIR_NAME: &str = "govern";

    /// Config file name
    pub const CONFIG_FILE_NAME: &str = "govern.toml";

    /// Logs subdirectory name
    pub const LOGS_DIR_NAME: &str = "logs";
}
