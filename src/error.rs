//! Error types for device sessions, configuration transactions and route
//! collection.
//!
//! Every [`DeviceError`] maps onto one [`ErrorKind`], the taxonomy used in
//! per-device outcome records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Coarse error classification reported alongside per-device outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Device unreachable or the management channel broke.
    Connection,
    /// Configuration lock could not be acquired.
    Lock,
    /// Configuration lock could not be released.
    Unlock,
    /// Staged configuration was rejected while loading.
    Load,
    /// Commit-check rejected the staged configuration.
    Validation,
    /// Commit did not finish in time; outcome on the device is unknown.
    CommitTimeout,
    /// Commit was refused by the device.
    CommitRejected,
    /// A read-only query failed.
    Query,
    /// Any other remote invocation failure.
    Rpc,
    /// Operation issued on a closed session.
    SessionClosed,
    /// The external renderer failed.
    Render,
    /// Writing a backup or change-log entry failed.
    Persist,
    /// Programming error or driver contract violation.
    Internal,
}

/// Errors that can occur while talking to a device or running a transaction.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device could not be reached or the session could not be opened.
    #[error("connection to {device} failed: {reason}")]
    Connection { device: String, reason: String },

    /// The session has been closed; no further operations are accepted.
    #[error("session closed")]
    SessionClosed,

    /// The SSH channel was disconnected while waiting for a prompt.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// No prompt was seen within the connect timeout.
    #[error("timed out waiting for initial prompt: {0}")]
    InitTimeout(String),

    /// A single command did not complete within its timeout.
    ///
    /// Carries the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// The exclusive configuration lock could not be acquired.
    #[error("configuration lock failed: {0}")]
    LockError(String),

    /// The configuration lock could not be released.
    #[error("configuration unlock failed: {0}")]
    UnlockError(String),

    /// A configuration line was rejected while staging.
    #[error("configuration load failed: {0}")]
    LoadError(String),

    /// Commit-check reported the staged configuration as invalid.
    #[error("commit check failed: {0}")]
    ValidationError(String),

    /// The commit did not finish in time. The change may or may not be active.
    #[error("commit timed out after {timeout_secs}s: {output}")]
    CommitTimeout { timeout_secs: u64, output: String },

    /// The device refused the commit.
    #[error("commit rejected: {0}")]
    CommitRejected(String),

    /// A read-only query failed.
    #[error("query '{query}' failed: {reason}")]
    QueryError { query: String, reason: String },

    /// Generic remote invocation failure.
    #[error("rpc failed: {0}")]
    RpcError(String),

    /// The driver answered an operation with a result of the wrong shape.
    #[error("unexpected result for {operation}: {result}")]
    UnexpectedResult { operation: String, result: String },

    /// The change request failed its own consistency checks.
    #[error("invalid change: {0}")]
    InvalidChange(String),

    /// The renderer could not produce configuration text.
    #[error("render of '{template}' failed: {reason}")]
    RenderError { template: String, reason: String },

    /// A backup artifact or change-log entry could not be written.
    #[error("persist failed: {0}")]
    PersistError(String),

    /// None of the requested devices could be connected.
    #[error("no devices connected")]
    NoDevicesConnected,

    /// The recording holds no output for the requested command.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),

    /// Internal failure (poisoned lock, encoding error, ...).
    #[error("internal error: {0}")]
    InternalServerError(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to send data through the shell channel.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Classifies this error for outcome reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Connection { .. }
            | DeviceError::ChannelDisconnectError
            | DeviceError::InitTimeout(_)
            | DeviceError::NoDevicesConnected
            | DeviceError::Ssh2Error(_)
            | DeviceError::RusshError(_)
            | DeviceError::SendDataError(_) => ErrorKind::Connection,
            DeviceError::SessionClosed => ErrorKind::SessionClosed,
            DeviceError::LockError(_) => ErrorKind::Lock,
            DeviceError::UnlockError(_) => ErrorKind::Unlock,
            DeviceError::LoadError(_) => ErrorKind::Load,
            DeviceError::ValidationError(_) => ErrorKind::Validation,
            DeviceError::CommitTimeout { .. } => ErrorKind::CommitTimeout,
            DeviceError::CommitRejected(_) => ErrorKind::CommitRejected,
            DeviceError::QueryError { .. } => ErrorKind::Query,
            DeviceError::ExecTimeout(_)
            | DeviceError::RpcError(_)
            | DeviceError::ReplayMismatchError(_) => ErrorKind::Rpc,
            DeviceError::RenderError { .. } => ErrorKind::Render,
            DeviceError::PersistError(_) | DeviceError::Io(_) => ErrorKind::Persist,
            DeviceError::UnexpectedResult { .. }
            | DeviceError::InvalidChange(_)
            | DeviceError::InternalServerError(_) => ErrorKind::Internal,
        }
    }

    /// True when the management channel itself is unusable, as opposed to a
    /// single operation failing on a healthy channel.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::SessionClosed)
    }
}
