//! Route-state tracking.
//!
//! - [`snapshot`]: parse route tables and capture per-device snapshots
//! - [`diff`](mod@diff): compare two snapshots
//! - [`report`]: render change sets for the change log
//! - [`monitor`]: the polling loop

pub mod diff;
pub mod monitor;
pub mod report;
pub mod snapshot;

pub use diff::{ChangeCounts, ChangeSet, Grouped, RouteChange, RouteUpdate, diff};
pub use monitor::{CycleReport, MonitorSummary, RouteMonitor, run_route_reconciliation};
pub use report::render_change_report;
pub use snapshot::{RouteEntry, RouteSnapshot, RouteTable, collect_snapshot, parse_route_table};
