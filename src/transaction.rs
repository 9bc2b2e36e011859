//! Configuration transactions.
//!
//! Every change runs as `lock -> load -> diff -> commit-check -> commit` on one
//! device, followed by exactly one unlock whatever happened in between. A
//! destructive replace first backs up and removes the object it replaces in a
//! separate, complete transaction.
//!
//! Devices in a batch are processed one after another. A failure on one
//! device becomes that device's [`DeviceOutcome`] and never stops the others.

use std::fmt;

use log::{debug, error, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{Credentials, TransactionOptions};
use crate::device::{DeviceDriver, DeviceIdentity, LoadMode, Query, Session};
use crate::error::{DeviceError, ErrorKind};
use crate::persist::{BackupArtifact, PersistenceSink, store_backup};

/// Rendered configuration text plus how to apply it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChangeRequest {
    /// Label used in logs.
    pub name: String,
    pub text: String,
    pub mode: LoadMode,
    /// Configuration object replaced by this change, e.g.
    /// `protocols bgp group EXT`. Required for [`LoadMode::Replace`].
    #[serde(default)]
    pub replace_target: Option<String>,
}

impl ChangeRequest {
    pub fn merge(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            mode: LoadMode::Merge,
            replace_target: None,
        }
    }

    pub fn replace(
        name: impl Into<String>,
        text: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            mode: LoadMode::Replace,
            replace_target: Some(target.into()),
        }
    }

    /// Replace-class change naming the object it overwrites.
    pub fn is_destructive(&self) -> bool {
        self.mode == LoadMode::Replace && self.replace_target.is_some()
    }

    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.text.trim().is_empty() {
            return Err(DeviceError::InvalidChange(format!(
                "'{}' has no configuration text",
                self.name
            )));
        }
        match (&self.mode, &self.replace_target) {
            (LoadMode::Replace, None) => Err(DeviceError::InvalidChange(format!(
                "'{}' replaces configuration but names no target object",
                self.name
            ))),
            (_, Some(target)) if target.trim().is_empty() || target.contains('\n') => Err(
                DeviceError::InvalidChange(format!("'{}' has an invalid target path", self.name)),
            ),
            _ => Ok(()),
        }
    }
}

/// A per-device change, or the reason it could not be produced.
#[derive(Debug)]
pub struct DeviceChange {
    pub device: DeviceIdentity,
    pub change: Result<ChangeRequest, DeviceError>,
}

/// Transaction states, in the order they are reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Idle,
    Locked,
    Loaded,
    Checked,
    Committed,
    Failed(String),
    Unlocked,
}

/// Final status of one device in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Applied,
    NoChange,
    ValidationFailed,
    LockFailed,
    /// The commit timed out. The change may or may not be active.
    TimeoutAmbiguous,
    Error,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutcomeStatus::Applied => "applied",
            OutcomeStatus::NoChange => "no-change",
            OutcomeStatus::ValidationFailed => "validation-failed",
            OutcomeStatus::LockFailed => "lock-failed",
            OutcomeStatus::TimeoutAmbiguous => "timeout-ambiguous",
            OutcomeStatus::Error => "error",
        })
    }
}

/// Outcome of one device in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub device: String,
    pub status: OutcomeStatus,
    pub diagnostic: String,
    pub error_kind: Option<ErrorKind>,
    /// Pending diff at commit-check time, when one was computed.
    pub diff: Option<String>,
    /// Location of the backup written by the replace guard.
    pub backup: Option<String>,
    /// States of the main transaction.
    pub trail: Vec<TxState>,
}

impl DeviceOutcome {
    fn new(device: &DeviceIdentity, status: OutcomeStatus, diagnostic: impl Into<String>) -> Self {
        Self {
            device: device.name.clone(),
            status,
            diagnostic: diagnostic.into(),
            error_kind: None,
            diff: None,
            backup: None,
            trail: Vec::new(),
        }
    }

    fn failed(device: &DeviceIdentity, status: OutcomeStatus, err: &DeviceError) -> Self {
        let mut outcome = Self::new(device, status, err.to_string());
        outcome.error_kind = Some(err.kind());
        outcome
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Applied | OutcomeStatus::NoChange)
    }
}

const AMBIGUOUS_GUIDANCE: &str = "the change may or may not be active; verify the device configuration manually before retrying";

/// How the body of a locked transaction ended.
enum Staged {
    Committed { diff: String },
    Unchanged,
    Failed {
        status: OutcomeStatus,
        error: DeviceError,
        diff: Option<String>,
    },
}

/// One locked configuration transaction on one session.
///
/// Created only once the lock is held. [`ConfigTransaction::release`]
/// consumes the transaction, so the lock is released at most once, and the
/// engine always calls it, so at least once.
pub(crate) struct ConfigTransaction<'s, 'd, D: DeviceDriver> {
    session: &'s mut Session<'d, D>,
    trail: Vec<TxState>,
    notes: Vec<String>,
    released: bool,
}

impl<'s, 'd, D: DeviceDriver> ConfigTransaction<'s, 'd, D> {
    /// Takes the exclusive configuration lock.
    pub(crate) async fn begin(session: &'s mut Session<'d, D>) -> Result<Self, DeviceError> {
        session.lock().await?;
        debug!("{}: configuration locked", session.device());
        Ok(Self {
            session,
            trail: vec![TxState::Idle, TxState::Locked],
            notes: Vec::new(),
            released: false,
        })
    }

    pub(crate) fn session(&mut self) -> &mut Session<'d, D> {
        &mut *self.session
    }

    fn advance(&mut self, state: TxState) {
        debug!("{}: {:?}", self.session.device(), state);
        self.trail.push(state);
    }

    async fn discard_quietly(&mut self) {
        if let Err(err) = self.session.discard().await {
            warn!("{}: discard failed: {err}", self.session.device());
            self.notes.push(format!("discard failed: {err}"));
        }
    }

    async fn fail(&mut self, status: OutcomeStatus, error: DeviceError, diff: Option<String>) -> Staged {
        self.advance(TxState::Failed(error.to_string()));
        if !matches!(error, DeviceError::CommitTimeout { .. }) && !error.is_transport() {
            self.discard_quietly().await;
        }
        Staged::Failed {
            status,
            error,
            diff,
        }
    }

    /// Loads, checks and commits `change`. Never unlocks.
    async fn stage_and_commit(&mut self, change: &ChangeRequest, options: &TransactionOptions) -> Staged {
        if let Err(err) = self.session.load(&change.text, change.mode).await {
            return self.fail(OutcomeStatus::Error, err, None).await;
        }
        self.advance(TxState::Loaded);

        let diff = match self.session.diff().await {
            Ok(Some(diff)) => diff,
            Ok(None) => {
                self.discard_quietly().await;
                return Staged::Unchanged;
            }
            Err(err) => return self.fail(OutcomeStatus::Error, err, None).await,
        };

        match self.session.commit_check(options.commit_check_timeout()).await {
            Ok(check) if check.passed => self.advance(TxState::Checked),
            Ok(check) => {
                let err = DeviceError::ValidationError(check.message);
                return self.fail(OutcomeStatus::ValidationFailed, err, Some(diff)).await;
            }
            Err(err) => return self.fail(OutcomeStatus::Error, err, Some(diff)).await,
        }

        match self
            .session
            .commit(options.commit_timeout(), &options.comment)
            .await
        {
            Ok(()) => {
                self.advance(TxState::Committed);
                Staged::Committed { diff }
            }
            Err(err @ DeviceError::CommitTimeout { .. }) => {
                self.fail(OutcomeStatus::TimeoutAmbiguous, err, Some(diff)).await
            }
            Err(err) => self.fail(OutcomeStatus::Error, err, Some(diff)).await,
        }
    }

    /// Releases the lock. Returns the state trail, notes gathered on the way
    /// and the unlock result.
    pub(crate) async fn release(mut self) -> (Vec<TxState>, Vec<String>, Result<(), DeviceError>) {
        self.released = true;
        let result = self.session.unlock().await;
        match &result {
            Ok(()) => {
                debug!("{}: configuration unlocked", self.session.device());
                self.trail.push(TxState::Unlocked);
            }
            Err(err) => error!("{}: unlock failed: {err}", self.session.device()),
        }
        (
            std::mem::take(&mut self.trail),
            std::mem::take(&mut self.notes),
            result,
        )
    }
}

impl<D: DeviceDriver> Drop for ConfigTransaction<'_, '_, D> {
    fn drop(&mut self) {
        if !self.released {
            error!(
                "{}: transaction dropped while holding the configuration lock",
                self.session.device()
            );
        }
    }
}

/// Runs one locked transaction for `change` and releases the lock.
async fn run_locked<D: DeviceDriver>(
    session: &mut Session<'_, D>,
    change: &ChangeRequest,
    options: &TransactionOptions,
) -> DeviceOutcome {
    let device = session.device().clone();
    let mut tx = match ConfigTransaction::begin(session).await {
        Ok(tx) => tx,
        Err(err) => {
            warn!("{device}: lock failed: {err}");
            let status = if err.kind() == ErrorKind::Lock {
                OutcomeStatus::LockFailed
            } else {
                OutcomeStatus::Error
            };
            let mut outcome = DeviceOutcome::failed(&device, status, &err);
            outcome.trail = vec![TxState::Idle, TxState::Failed(err.to_string())];
            return outcome;
        }
    };

    let staged = tx.stage_and_commit(change, options).await;
    let (trail, notes, unlocked) = tx.release().await;

    let mut outcome = match staged {
        Staged::Committed { diff } => {
            let mut outcome = DeviceOutcome::new(
                &device,
                OutcomeStatus::Applied,
                format!("'{}' committed", change.name),
            );
            outcome.diff = Some(diff);
            outcome
        }
        Staged::Unchanged => DeviceOutcome::new(&device, OutcomeStatus::NoChange, "no changes to apply"),
        Staged::Failed {
            status,
            error,
            diff,
        } => {
            let mut outcome = DeviceOutcome::failed(&device, status, &error);
            match status {
                OutcomeStatus::TimeoutAmbiguous => {
                    outcome.diagnostic = format!("{error}; {AMBIGUOUS_GUIDANCE}");
                }
                OutcomeStatus::ValidationFailed => {
                    if let Some(diff) = &diff {
                        outcome.diagnostic = format!("{error}\nconfiguration diff:\n{diff}");
                    }
                }
                _ => {}
            }
            outcome.diff = diff;
            outcome
        }
    };
    for note in notes {
        outcome.diagnostic.push_str(&format!("; {note}"));
    }
    if let Err(err) = unlocked {
        outcome.diagnostic.push_str(&format!("; unlock failed: {err}"));
    }
    outcome.trail = trail;
    outcome
}

/// Backs up and removes the object a destructive replace overwrites.
///
/// Runs as its own complete transaction before the main lock is taken.
/// Returns the backup location, or the outcome to report when the guard
/// fails.
async fn replace_guard<D: DeviceDriver>(
    session: &mut Session<'_, D>,
    target: &str,
    options: &TransactionOptions,
    sink: &dyn PersistenceSink,
) -> Result<Option<String>, DeviceOutcome> {
    let device = session.device().clone();
    let existing = session
        .query(Query::configuration(Some(target)))
        .await
        .map_err(|err| {
            let mut outcome = DeviceOutcome::failed(&device, OutcomeStatus::Error, &err);
            outcome.diagnostic = format!("could not read existing '{target}': {err}");
            outcome
        })?;
    if existing.is_empty() {
        debug!("{device}: '{target}' not present, nothing to remove");
        return Ok(None);
    }

    let artifact = BackupArtifact::new(&device, target, existing.as_text());
    let backup = store_backup(sink, &artifact);

    info!("{device}: removing existing '{target}' before replace");
    let removal = ChangeRequest::merge(format!("remove {target}"), format!("delete {target}"));
    let mut outcome = run_locked(session, &removal, options).await;
    match outcome.status {
        OutcomeStatus::Applied | OutcomeStatus::NoChange => Ok(backup),
        _ => {
            outcome.diagnostic = format!("removal of existing '{target}' failed: {}", outcome.diagnostic);
            outcome.backup = backup;
            Err(outcome)
        }
    }
}

/// Applies `change` to one open session.
pub async fn apply_to_session<D: DeviceDriver>(
    session: &mut Session<'_, D>,
    change: &ChangeRequest,
    options: &TransactionOptions,
    sink: &dyn PersistenceSink,
) -> DeviceOutcome {
    let device = session.device().clone();
    if let Err(err) = change.validate() {
        return DeviceOutcome::failed(&device, OutcomeStatus::Error, &err);
    }

    let mut backup = None;
    if change.is_destructive()
        && let Some(target) = change.replace_target.as_deref()
    {
        match replace_guard(session, target, options, sink).await {
            Ok(location) => backup = location,
            Err(outcome) => return outcome,
        }
    }

    let mut outcome = run_locked(session, change, options).await;
    outcome.backup = backup;
    outcome
}

async fn apply_to_device<D: DeviceDriver>(
    driver: &D,
    device: &DeviceIdentity,
    credentials: &Credentials,
    change: &ChangeRequest,
    options: &TransactionOptions,
    sink: &dyn PersistenceSink,
) -> DeviceOutcome {
    let mut session = match Session::open(driver, device, credentials).await {
        Ok(session) => session,
        Err(err) => {
            warn!("{device}: {err}");
            return DeviceOutcome::failed(device, OutcomeStatus::Error, &err);
        }
    };
    let outcome = apply_to_session(&mut session, change, options, sink).await;
    session.close().await;
    outcome
}

fn log_outcome(outcome: &DeviceOutcome) {
    match outcome.status {
        OutcomeStatus::Applied | OutcomeStatus::NoChange => {
            info!("{}: {}: {}", outcome.device, outcome.status, outcome.diagnostic)
        }
        _ => error!("{}: {}: {}", outcome.device, outcome.status, outcome.diagnostic),
    }
}

/// Applies the same change to every device.
pub async fn apply_change<D: DeviceDriver>(
    driver: &D,
    devices: &[DeviceIdentity],
    credentials: &Credentials,
    change: &ChangeRequest,
    options: &TransactionOptions,
    sink: &dyn PersistenceSink,
) -> Vec<DeviceOutcome> {
    let mut outcomes = Vec::with_capacity(devices.len());
    for device in devices {
        let outcome = apply_to_device(driver, device, credentials, change, options, sink).await;
        log_outcome(&outcome);
        outcomes.push(outcome);
    }
    outcomes
}

/// Applies per-device changes, typically from [`crate::render::render_changes`].
///
/// Devices whose change failed to render get an `error` outcome without a
/// session being opened.
pub async fn apply_rendered<D: DeviceDriver>(
    driver: &D,
    changes: Vec<DeviceChange>,
    credentials: &Credentials,
    options: &TransactionOptions,
    sink: &dyn PersistenceSink,
) -> Vec<DeviceOutcome> {
    let mut outcomes = Vec::with_capacity(changes.len());
    for DeviceChange { device, change } in changes {
        let outcome = match change {
            Ok(change) => apply_to_device(driver, &device, credentials, &change, options, sink).await,
            Err(err) => DeviceOutcome::failed(&device, OutcomeStatus::Error, &err),
        };
        log_outcome(&outcome);
        outcomes.push(outcome);
    }
    outcomes
}
