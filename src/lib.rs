//! # rnetsync - Configuration Transactions and Route Change Tracking
//!
//! `rnetsync` pushes configuration changes to network devices as guarded
//! transactions and watches their route tables for changes.
//!
//! ## Features
//!
//! - **Transactions**: lock, load, diff, commit-check and commit with exactly
//!   one unlock on every path; empty diffs are skipped, commit timeouts are
//!   reported as ambiguous and never retried
//! - **Replace Guard**: objects overwritten by a replace are backed up and
//!   removed in their own transaction first
//! - **Route Monitoring**: periodic snapshots of route tables, diffed per
//!   table and protocol and appended to a change log
//! - **Backups and Health Checks**: full configuration capture, BGP/OSPF
//!   adjacency verification and management-port reachability
//! - **Facts and Baselines**: hostname/model/version facts and pre-change
//!   captures of routes and operational state
//! - **Pluggable Devices**: a small [`device::DeviceDriver`] trait; SSH/Junos
//!   and replay drivers are included
//! - **Async/Await**: built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rnetsync::config::{Credentials, TransactionOptions};
//! use rnetsync::device::DeviceIdentity;
//! use rnetsync::persist::FileSink;
//! use rnetsync::session::SshDriver;
//! use rnetsync::transaction::{ChangeRequest, apply_change};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = SshDriver::juniper()?;
//!     let devices = vec![DeviceIdentity::new("edge1", "192.0.2.1")];
//!     let credentials = Credentials::new("netops", "secret");
//!     let change = ChangeRequest::merge("ntp", "set system ntp server 192.0.2.123");
//!     let sink = FileSink::new("backups", "route_changes.log");
//!
//!     let outcomes = apply_change(
//!         &driver,
//!         &devices,
//!         &credentials,
//!         &change,
//!         &TransactionOptions::default().with_comment("add ntp server"),
//!         &sink,
//!     )
//!     .await;
//!     for outcome in outcomes {
//!         println!("{}: {} {}", outcome.device, outcome.status, outcome.diagnostic);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`device::Session`] - one open management channel
//! - [`transaction`] - the transaction engine and batch entry points
//! - [`route::RouteMonitor`] - the route polling loop
//! - [`templates::CliDialect`] - command vocabulary and output parsing
//! - [`error::DeviceError`] - error type and [`error::ErrorKind`] taxonomy

pub mod backup;
pub mod baseline;
pub mod config;
pub mod device;
pub mod error;
pub mod health;
pub mod persist;
pub mod render;
pub mod route;
pub mod session;
pub mod templates;
pub mod transaction;

pub use backup::{BackupOutcome, backup_configuration};
pub use baseline::{BaselineReport, DeviceFacts, collect_baselines, collect_facts};
pub use config::{Credentials, MonitorOptions, TransactionOptions};
pub use device::{DeviceDriver, DeviceIdentity, LoadMode, Operation, Query, Session};
pub use error::{DeviceError, ErrorKind};
pub use health::{HealthReport, ProtocolCheck, check_protocol_health, check_reachability};
pub use persist::{FileSink, MemorySink, PersistenceSink};
pub use render::{ChangeTemplate, Renderer, render_changes};
pub use route::{ChangeSet, RouteMonitor, RouteSnapshot, run_route_reconciliation};
pub use transaction::{
    ChangeRequest, DeviceOutcome, OutcomeStatus, apply_change, apply_rendered,
};
