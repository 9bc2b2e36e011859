//! Backup artifacts, change-log entries and the sinks that store them.
//!
//! Sink failures are reported to the caller, which logs them. They never
//! change the outcome of a transaction or a monitoring cycle.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::device::DeviceIdentity;
use crate::error::DeviceError;
use crate::route::{ChangeSet, render_change_report};

/// Scope of a backup holding the whole configuration.
pub const FULL_SCOPE: &str = "full";

/// Timestamp layout used in artifact names.
pub const ARTIFACT_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Same-second backups of one scope a sink will number before giving up.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// Immutable capture of configuration taken before a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub device: String,
    /// Configuration path, or [`FULL_SCOPE`].
    pub scope: String,
    pub captured_at: DateTime<Local>,
    pub content: String,
}

impl BackupArtifact {
    pub fn new(device: &DeviceIdentity, scope: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            device: device.name.clone(),
            scope: scope.into(),
            captured_at: Local::now(),
            content: content.into(),
        }
    }

    /// `{device}_{timestamp}.set` for full backups,
    /// `{device}_{scope}_{timestamp}.set` otherwise.
    pub fn file_name(&self) -> String {
        format!("{}.set", self.stem())
    }

    /// Name for the `n`th artifact sharing this one's timestamp. `0` is
    /// [`Self::file_name`], later ones get a `_{n}` suffix.
    pub fn numbered_file_name(&self, n: usize) -> String {
        if n == 0 {
            self.file_name()
        } else {
            format!("{}_{n}.set", self.stem())
        }
    }

    fn stem(&self) -> String {
        let stamp = self.captured_at.format(ARTIFACT_TIME_FORMAT);
        if self.scope == FULL_SCOPE {
            format!("{}_{stamp}", sanitize(&self.device))
        } else {
            format!("{}_{}_{stamp}", sanitize(&self.device), sanitize(&self.scope))
        }
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

/// One device's route changes from one monitoring cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub device: DeviceIdentity,
    pub recorded_at: DateTime<Local>,
    pub changes: ChangeSet,
}

impl ChangeLogEntry {
    pub fn new(device: DeviceIdentity, changes: ChangeSet) -> Self {
        Self {
            device,
            recorded_at: Local::now(),
            changes,
        }
    }

    /// Human-readable change-log block.
    pub fn render(&self) -> String {
        render_change_report(&self.device, &self.recorded_at, &self.changes)
    }
}

/// Where backups and change-log entries go.
pub trait PersistenceSink: Send + Sync {
    /// Stores `artifact` and returns its location.
    fn write_backup(&self, artifact: &BackupArtifact) -> Result<String, DeviceError>;

    fn append_change_log(&self, entry: &ChangeLogEntry) -> Result<(), DeviceError>;
}

/// Writes a backup and logs instead of failing. Returns the location on success.
pub(crate) fn store_backup(sink: &dyn PersistenceSink, artifact: &BackupArtifact) -> Option<String> {
    match sink.write_backup(artifact) {
        Ok(location) => {
            debug!("{}: backup of '{}' written to {location}", artifact.device, artifact.scope);
            Some(location)
        }
        Err(err) => {
            warn!("{}: failed to write backup of '{}': {err}", artifact.device, artifact.scope);
            None
        }
    }
}

/// Filesystem sink.
///
/// Backups land in `{backup_dir}/{device}/`, never overwriting an existing
/// file: a name already taken gets a numeric suffix. Change-log entries are appended to one text file.
#[derive(Debug, Clone)]
pub struct FileSink {
    backup_dir: PathBuf,
    change_log: PathBuf,
}

impl FileSink {
    pub fn new(backup_dir: impl Into<PathBuf>, change_log: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            change_log: change_log.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn change_log(&self) -> &Path {
        &self.change_log
    }
}

fn persist_error(what: &str, path: &Path, err: std::io::Error) -> DeviceError {
    DeviceError::PersistError(format!("{what} {}: {err}", path.display()))
}

impl PersistenceSink for FileSink {
    fn write_backup(&self, artifact: &BackupArtifact) -> Result<String, DeviceError> {
        let dir = self.backup_dir.join(sanitize(&artifact.device));
        fs::create_dir_all(&dir).map_err(|e| persist_error("cannot create", &dir, e))?;
        for n in 0..MAX_NAME_ATTEMPTS {
            let path = dir.join(artifact.numbered_file_name(n));
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(persist_error("cannot create", &path, e)),
            };
            file.write_all(artifact.content.as_bytes())
                .and_then(|_| file.flush())
                .map_err(|e| persist_error("cannot write", &path, e))?;
            return Ok(path.display().to_string());
        }
        Err(DeviceError::PersistError(format!(
            "no free name for {} in {}",
            artifact.file_name(),
            dir.display()
        )))
    }

    fn append_change_log(&self, entry: &ChangeLogEntry) -> Result<(), DeviceError> {
        if let Some(parent) = self.change_log.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| persist_error("cannot create", parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.change_log)
            .map_err(|e| persist_error("cannot open", &self.change_log, e))?;
        file.write_all(entry.render().as_bytes())
            .map_err(|e| persist_error("cannot append to", &self.change_log, e))
    }
}

/// In-memory sink, cheap to clone; clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    backups: Arc<Mutex<Vec<BackupArtifact>>>,
    change_log: Arc<Mutex<Vec<ChangeLogEntry>>>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> DeviceError {
    DeviceError::InternalServerError(format!("sink lock error: {e}"))
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backups(&self) -> Vec<BackupArtifact> {
        self.backups.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn change_log(&self) -> Vec<ChangeLogEntry> {
        self.change_log.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl PersistenceSink for MemorySink {
    fn write_backup(&self, artifact: &BackupArtifact) -> Result<String, DeviceError> {
        self.backups.lock().map_err(poisoned)?.push(artifact.clone());
        Ok(format!("memory://{}/{}", artifact.device, artifact.file_name()))
    }

    fn append_change_log(&self, entry: &ChangeLogEntry) -> Result<(), DeviceError> {
        self.change_log.lock().map_err(poisoned)?.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{RouteEntry, RouteSnapshot, RouteTable, diff};
    use chrono::TimeZone;

    fn artifact(scope: &str) -> BackupArtifact {
        BackupArtifact {
            device: "edge1".to_string(),
            scope: scope.to_string(),
            captured_at: Local.with_ymd_and_hms(2024, 5, 1, 8, 15, 30).unwrap(),
            content: "set system host-name edge1\n".to_string(),
        }
    }

    #[test]
    fn artifact_names_carry_device_scope_and_timestamp() {
        assert_eq!(artifact(FULL_SCOPE).file_name(), "edge1_20240501_081530.set");
        assert_eq!(
            artifact("protocols bgp group EXT").file_name(),
            "edge1_protocols_bgp_group_EXT_20240501_081530.set"
        );
    }

    #[test]
    fn file_sink_never_overwrites_backups() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("backups"), dir.path().join("routes.log"));

        let first = sink.write_backup(&artifact(FULL_SCOPE)).unwrap();
        let mut later = artifact(FULL_SCOPE);
        later.content = "set system host-name edge1-new\n".to_string();
        let second = sink.write_backup(&later).unwrap();
        let third = sink.write_backup(&later).unwrap();

        assert!(first.ends_with("edge1_20240501_081530.set"));
        assert!(second.ends_with("edge1_20240501_081530_1.set"));
        assert!(third.ends_with("edge1_20240501_081530_2.set"));
        assert_eq!(fs::read_to_string(&first).unwrap(), "set system host-name edge1\n");
        assert_eq!(fs::read_to_string(&second).unwrap(), "set system host-name edge1-new\n");
    }

    #[test]
    fn file_sink_reports_unusable_backup_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("backups");
        fs::write(&blocker, "not a directory").unwrap();
        let sink = FileSink::new(&blocker, dir.path().join("routes.log"));

        let err = sink.write_backup(&artifact(FULL_SCOPE)).unwrap_err();
        assert!(matches!(err, DeviceError::PersistError(_)));
    }

    #[test]
    fn file_sink_appends_change_log_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path(), dir.path().join("logs").join("routes.log"));
        let old = RouteSnapshot::new().with_table("inet.0", RouteTable::new());
        let new = RouteSnapshot::new().with_table(
            "inet.0",
            [("10.0.0.0/24".to_string(), RouteEntry::new("BGP", ">10.0.0.1"))]
                .into_iter()
                .collect(),
        );
        let entry = ChangeLogEntry::new(DeviceIdentity::new("edge1", "10.0.0.1"), diff(&old, &new));

        sink.append_change_log(&entry).unwrap();
        sink.append_change_log(&entry).unwrap();
        let log = fs::read_to_string(sink.change_log()).unwrap();
        assert_eq!(log.matches("=== Route Changes at").count(), 2);
        assert!(log.contains("    10.0.0.0/24 - BGP via >10.0.0.1"));
    }

    #[test]
    fn memory_sink_clones_share_storage() {
        let sink = MemorySink::new();
        let clone = sink.clone();
        let location = clone.write_backup(&artifact(FULL_SCOPE)).unwrap();
        assert_eq!(location, "memory://edge1/edge1_20240501_081530.set");
        assert_eq!(sink.backups().len(), 1);
    }
}
