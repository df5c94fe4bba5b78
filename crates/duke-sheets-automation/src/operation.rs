//! Operation names.
//!
//! These appear in errors and log fields, and key the [`TimeoutPolicy`](crate::TimeoutPolicy).

pub const CREATE_WORKBOOK: &str = "create_workbook";
pub const OPEN: &str = "open";
pub const CLOSE: &str = "close";
pub const SAVE: &str = "save";
pub const RECALCULATE: &str = "recalculate";
pub const LIST_SHEETS: &str = "list_sheets";
pub const READ_RANGE: &str = "read_range";
pub const WRITE_RANGE: &str = "write_range";
pub const WRITE_FORMULAS: &str = "write_formulas";
pub const ADD_CHART: &str = "add_chart";
pub const ADD_PIVOT_TABLE: &str = "add_pivot_table";
pub const LIST_OBJECTS: &str = "list_objects";
pub const FIND_OBJECT: &str = "find_object";
pub const DELETE_OBJECT: &str = "delete_object";
pub const LINK_PIVOT_CHART: &str = "link_pivot_chart";
pub const PIVOT_CHART_SOURCE: &str = "pivot_chart_source";
pub const ADD_SLICER: &str = "add_slicer";
pub const RELEASE: &str = "release";
pub const RECLAIM: &str = "reclaim";
pub const SHUTDOWN: &str = "shutdown";
