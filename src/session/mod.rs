//! SSH transport and session recording.
//!
//! # Main Components
//!
//! - [`SshDriver`] - [`DeviceDriver`] over an interactive SSH shell
//! - [`SshSession`] - one live shell with prompt tracking
//! - [`Output`] - result of one CLI command
//! - [`SessionRecorder`] / [`ReplayDriver`] - capture sessions as JSONL and
//!   play them back offline

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use async_trait::async_trait;
use log::{debug, trace, warn};

use russh::{ChannelMsg, Preferred};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::config::{self, Credentials};
use crate::device::{DeviceDriver, DeviceIdentity, OpResult, Operation};
use crate::error::DeviceError;
use crate::templates::{CliDialect, CommandRunner, IGNORE_START_LINE};

pub use recording::{
    NormalizeOptions, ReplayDriver, SessionEvent, SessionRecordEntry, SessionRecordLevel,
    SessionRecorder, SessionReplayer,
};
pub use security::{ConnectionSecurityOptions, SecurityLevel};

/// Output of one CLI command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Output {
    /// False when an error line was seen before the prompt returned.
    pub success: bool,
    /// Output without the echoed command and the trailing prompt.
    pub content: String,
    /// Everything received, prompt included.
    pub all: String,
    /// Prompt seen once the command completed.
    pub prompt: Option<String>,
}

/// An interactive SSH shell to one device.
pub struct SshSession {
    client: Client,
    sender: Sender<String>,
    recv: Receiver<String>,
    dialect: Arc<CliDialect>,
    prompt: String,
    device_addr: String,

    /// Effective security options used when the connection was established.
    security_options: ConnectionSecurityOptions,

    /// Optional session recorder bound to this connection.
    recorder: Option<SessionRecorder>,
}

/// [`DeviceDriver`] that speaks a [`CliDialect`] over SSH.
#[derive(Clone)]
pub struct SshDriver {
    dialect: Arc<CliDialect>,
    security: ConnectionSecurityOptions,
    recorder: Option<SessionRecorder>,
}

impl SshDriver {
    pub fn new(dialect: CliDialect) -> Self {
        Self {
            dialect: Arc::new(dialect),
            security: ConnectionSecurityOptions::default(),
            recorder: None,
        }
    }

    /// Driver for Junos devices with the default security profile.
    pub fn juniper() -> Result<Self, DeviceError> {
        Ok(Self::new(CliDialect::juniper()?))
    }

    pub fn with_security(mut self, security: ConnectionSecurityOptions) -> Self {
        self.security = security;
        self
    }

    /// Records every session opened by this driver into `recorder`.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn dialect(&self) -> &CliDialect {
        &self.dialect
    }
}

#[async_trait]
impl DeviceDriver for SshDriver {
    type Handle = SshSession;

    async fn open(
        &self,
        device: &DeviceIdentity,
        credentials: &Credentials,
    ) -> Result<SshSession, DeviceError> {
        SshSession::connect(
            device,
            credentials,
            self.dialect.clone(),
            self.security.clone(),
            self.recorder.clone(),
        )
        .await
    }

    async fn close(&self, mut handle: SshSession) -> Result<(), DeviceError> {
        handle.close().await
    }

    async fn invoke(
        &self,
        handle: &mut SshSession,
        operation: Operation,
    ) -> Result<OpResult, DeviceError> {
        let dialect = self.dialect.clone();
        let name = operation.name();
        let result = dialect.execute(handle, operation).await;
        handle.record_operation(name, &result);
        result
    }

    fn is_alive(&self, handle: &SshSession) -> bool {
        handle.is_connected()
    }
}

mod client;
mod recording;
mod security;
