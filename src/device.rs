//! Device identities, the operation vocabulary and the session abstraction.
//!
//! A [`DeviceDriver`] knows how to reach one kind of device and how to carry
//! out an [`Operation`] on it. [`Session`] wraps one open driver handle and
//! guarantees that nothing runs after [`Session::close`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::Credentials;
use crate::error::{DeviceError, ErrorKind};

fn default_port() -> u16 {
    22
}

/// Addressable device plus the descriptive metadata used in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceIdentity {
    /// Hostname used in logs, reports and artifact names.
    pub name: String,
    /// Management address.
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub product_family: Option<String>,
}

impl DeviceIdentity {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: default_port(),
            tags: Vec::new(),
            location: None,
            function: None,
            product_family: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_site(
        mut self,
        location: impl Into<String>,
        function: impl Into<String>,
        product_family: impl Into<String>,
    ) -> Self {
        self.location = Some(location.into());
        self.function = Some(function.into());
        self.product_family = Some(product_family.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// `address:port`, the key recordings use for this device.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// How staged configuration text combines with the candidate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    Merge,
    Replace,
}

/// Named read-only query with string parameters.
///
/// Drivers map the name onto a device command; see
/// [`crate::templates::CliDialect`] for the built-in names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Query {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Query {
    pub const ROUTE_TABLE: &'static str = "route-table";
    pub const CONFIGURATION: &'static str = "configuration";
    pub const BGP_SUMMARY: &'static str = "bgp-summary";
    pub const OSPF_NEIGHBOR: &'static str = "ospf-neighbor";
    pub const OSPF_INTERFACE: &'static str = "ospf-interface";
    pub const VERSION: &'static str = "version";
    pub const CHASSIS_HARDWARE: &'static str = "chassis-hardware";
    pub const ENVIRONMENT: &'static str = "environment";
    pub const POWER: &'static str = "power";
    pub const OPTICS: &'static str = "optics";
    pub const INTERFACE_DESCRIPTIONS: &'static str = "interface-descriptions";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn route_table(table: &str) -> Self {
        Self::new(Self::ROUTE_TABLE).param("table", table)
    }

    /// Active configuration, optionally narrowed to one object path.
    pub fn configuration(path: Option<&str>) -> Self {
        let query = Self::new(Self::CONFIGURATION);
        match path {
            Some(path) => query.param("path", path),
            None => query,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (key, value) in &self.params {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

/// Closed set of operations a driver must support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    LockConfig,
    UnlockConfig,
    LoadConfig { text: String, mode: LoadMode },
    DiffConfig,
    DiscardConfig,
    CommitCheck { timeout: Duration },
    Commit { timeout: Duration, comment: String },
    ReadQuery(Query),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::LockConfig => "lock",
            Operation::UnlockConfig => "unlock",
            Operation::LoadConfig { .. } => "load",
            Operation::DiffConfig => "diff",
            Operation::DiscardConfig => "discard",
            Operation::CommitCheck { .. } => "commit-check",
            Operation::Commit { .. } => "commit",
            Operation::ReadQuery(_) => "query",
        }
    }
}

/// Output of a read-only query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Text(String),
    Structured(serde_json::Value),
}

impl QueryOutput {
    /// Text form; structured output is rendered as compact JSON.
    pub fn as_text(&self) -> String {
        match self {
            QueryOutput::Text(text) => text.clone(),
            QueryOutput::Structured(value) => value.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            QueryOutput::Text(text) => text.trim().is_empty(),
            QueryOutput::Structured(value) => value.is_null(),
        }
    }
}

/// Result of a commit-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub message: String,
}

/// Result of one [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum OpResult {
    Done,
    /// Pending candidate changes; `None` when there are none.
    Diff(Option<String>),
    Check(CheckOutcome),
    Query(QueryOutput),
}

/// Transport-specific way of reaching devices and executing operations.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Per-connection state owned by a [`Session`].
    type Handle: Send;

    async fn open(
        &self,
        device: &DeviceIdentity,
        credentials: &Credentials,
    ) -> Result<Self::Handle, DeviceError>;

    async fn close(&self, handle: Self::Handle) -> Result<(), DeviceError>;

    async fn invoke(
        &self,
        handle: &mut Self::Handle,
        operation: Operation,
    ) -> Result<OpResult, DeviceError>;

    /// Whether the underlying channel still looks usable.
    fn is_alive(&self, _handle: &Self::Handle) -> bool {
        true
    }
}

/// One open management channel to one device.
///
/// Every operation after [`Session::close`] fails with
/// [`DeviceError::SessionClosed`]. A session must not be shared between
/// concurrent tasks; `&mut self` on every operation enforces this.
pub struct Session<'d, D: DeviceDriver> {
    driver: &'d D,
    device: DeviceIdentity,
    handle: Option<D::Handle>,
}

impl<'d, D: DeviceDriver> Session<'d, D> {
    /// Opens a session. Any failure is reported as a connection error.
    pub async fn open(
        driver: &'d D,
        device: &DeviceIdentity,
        credentials: &Credentials,
    ) -> Result<Self, DeviceError> {
        debug!("{device}: opening session as {}", credentials.username);
        let handle = driver
            .open(device, credentials)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::Connection => err,
                _ => DeviceError::Connection {
                    device: device.to_string(),
                    reason: err.to_string(),
                },
            })?;
        Ok(Self {
            driver,
            device: device.clone(),
            handle: Some(handle),
        })
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| self.driver.is_alive(handle))
    }

    /// Closes the session. Safe to call more than once; close errors are
    /// logged and swallowed.
    pub async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.driver.close(handle).await {
            Ok(()) => debug!("{}: session closed", self.device),
            Err(err) => warn!("{}: error while closing session: {err}", self.device),
        }
    }

    pub async fn invoke(&mut self, operation: Operation) -> Result<OpResult, DeviceError> {
        let driver = self.driver;
        let handle = self.handle.as_mut().ok_or(DeviceError::SessionClosed)?;
        trace!("{}: {}", self.device, operation.name());
        driver.invoke(handle, operation).await
    }

    pub async fn lock(&mut self) -> Result<(), DeviceError> {
        self.invoke_done(Operation::LockConfig).await
    }

    pub async fn unlock(&mut self) -> Result<(), DeviceError> {
        self.invoke_done(Operation::UnlockConfig).await
    }

    pub async fn load(&mut self, text: &str, mode: LoadMode) -> Result<(), DeviceError> {
        self.invoke_done(Operation::LoadConfig {
            text: text.to_string(),
            mode,
        })
        .await
    }

    pub async fn discard(&mut self) -> Result<(), DeviceError> {
        self.invoke_done(Operation::DiscardConfig).await
    }

    pub async fn diff(&mut self) -> Result<Option<String>, DeviceError> {
        match self.invoke(Operation::DiffConfig).await? {
            OpResult::Diff(diff) => Ok(diff.filter(|d| !d.trim().is_empty())),
            other => Err(unexpected("diff", &other)),
        }
    }

    pub async fn commit_check(&mut self, timeout: Duration) -> Result<CheckOutcome, DeviceError> {
        match self.invoke(Operation::CommitCheck { timeout }).await? {
            OpResult::Check(outcome) => Ok(outcome),
            other => Err(unexpected("commit-check", &other)),
        }
    }

    pub async fn commit(&mut self, timeout: Duration, comment: &str) -> Result<(), DeviceError> {
        self.invoke_done(Operation::Commit {
            timeout,
            comment: comment.to_string(),
        })
        .await
    }

    pub async fn query(&mut self, query: Query) -> Result<QueryOutput, DeviceError> {
        let name = query.name.clone();
        match self.invoke(Operation::ReadQuery(query)).await? {
            OpResult::Query(output) => Ok(output),
            other => Err(unexpected(&name, &other)),
        }
    }

    async fn invoke_done(&mut self, operation: Operation) -> Result<(), DeviceError> {
        let name = operation.name();
        match self.invoke(operation).await? {
            OpResult::Done => Ok(()),
            other => Err(unexpected(name, &other)),
        }
    }
}

impl<D: DeviceDriver> Drop for Session<'_, D> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("{}: session dropped without close", self.device);
        }
    }
}

fn unexpected(operation: &str, result: &OpResult) -> DeviceError {
    DeviceError::UnexpectedResult {
        operation: operation.to_string(),
        result: format!("{result:?}"),
    }
}

/// Opens a session to every device, collecting the failures separately.
pub async fn open_sessions<'d, D: DeviceDriver>(
    driver: &'d D,
    devices: &[DeviceIdentity],
    credentials: &Credentials,
) -> (Vec<Session<'d, D>>, Vec<(DeviceIdentity, DeviceError)>) {
    let mut sessions = Vec::with_capacity(devices.len());
    let mut failures = Vec::new();
    for device in devices {
        match Session::open(driver, device, credentials).await {
            Ok(session) => sessions.push(session),
            Err(err) => {
                warn!("{device}: connection failed: {err}");
                failures.push((device.clone(), err));
            }
        }
    }
    (sessions, failures)
}
