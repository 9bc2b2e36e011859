#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use rnetsync::config::Credentials;
use rnetsync::device::{
    CheckOutcome, DeviceDriver, DeviceIdentity, OpResult, Operation, Query, QueryOutput,
};
use rnetsync::error::DeviceError;

/// How a scripted device answers `commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitBehavior {
    #[default]
    Complete,
    Timeout,
    Reject,
}

/// Reply to one route-table query.
#[derive(Debug, Clone)]
pub enum RouteReply {
    Text(String),
    /// The query fails but the channel stays usable.
    QueryFailure(String),
    /// The channel drops mid-query.
    Disconnected,
}

/// Behaviour of one scripted device.
#[derive(Debug, Clone)]
pub struct DeviceScript {
    pub unreachable: bool,
    pub lock_error: bool,
    pub load_error: bool,
    pub diff: Option<String>,
    pub check_passes: bool,
    pub commit: CommitBehavior,
    pub unlock_error: bool,
    /// Active configuration by object path; `""` is the full configuration.
    pub config: HashMap<String, String>,
    /// Replies per route table; the last reply repeats.
    pub routes: HashMap<String, VecDeque<RouteReply>>,
    pub bgp_summary: String,
    pub ospf_neighbors: String,
    /// Text answers for any other named query.
    pub outputs: HashMap<String, String>,
    /// Named queries that fail while the channel stays usable.
    pub failing_queries: Vec<String>,
    /// Named query during which the channel drops.
    pub disconnect_on: Option<String>,
}

impl Default for DeviceScript {
    fn default() -> Self {
        Self {
            unreachable: false,
            lock_error: false,
            load_error: false,
            diff: Some("[edit system]\n+  host-name edge1;".to_string()),
            check_passes: true,
            commit: CommitBehavior::Complete,
            unlock_error: false,
            config: HashMap::new(),
            routes: HashMap::new(),
            bgp_summary: String::new(),
            ospf_neighbors: String::new(),
            outputs: HashMap::new(),
            failing_queries: Vec::new(),
            disconnect_on: None,
        }
    }
}

impl DeviceScript {
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn with_config(mut self, path: &str, text: &str) -> Self {
        self.config.insert(path.to_string(), text.to_string());
        self
    }

    pub fn with_output(mut self, query: &str, text: &str) -> Self {
        self.outputs.insert(query.to_string(), text.to_string());
        self
    }

    pub fn with_failing_query(mut self, query: &str) -> Self {
        self.failing_queries.push(query.to_string());
        self
    }

    pub fn with_routes<I>(mut self, table: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = RouteReply>,
    {
        self.routes
            .insert(table.to_string(), replies.into_iter().collect());
        self
    }
}

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    locks: usize,
    unlocks: usize,
}

/// In-memory [`DeviceDriver`] that follows a per-device script and records
/// every call it receives.
#[derive(Default)]
pub struct ScriptedDriver {
    scripts: Mutex<HashMap<String, DeviceScript>>,
    calls: Mutex<Vec<(String, String)>>,
    locks: Mutex<HashMap<String, LockState>>,
    violations: Mutex<Vec<String>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, device: &str, script: DeviceScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(device.to_string(), script);
        self
    }

    /// Calls made for `device`, in order.
    pub fn calls(&self, device: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == device)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn count(&self, device: &str, call: &str) -> usize {
        self.calls(device).iter().filter(|c| *c == call).count()
    }

    /// `(locks, unlocks)` taken on `device`.
    pub fn lock_counts(&self, device: &str) -> (usize, usize) {
        self.locks
            .lock()
            .unwrap()
            .get(device)
            .map(|state| (state.locks, state.unlocks))
            .unwrap_or_default()
    }

    pub fn lock_held(&self, device: &str) -> bool {
        self.locks
            .lock()
            .unwrap()
            .get(device)
            .is_some_and(|state| state.held)
    }

    /// Protocol misuse observed so far, such as unlocking twice.
    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().unwrap().clone()
    }

    fn record(&self, device: &str, call: impl Into<String>) {
        self.calls
            .lock()
            .unwrap()
            .push((device.to_string(), call.into()));
    }

    fn violation(&self, device: &str, what: &str) {
        self.violations
            .lock()
            .unwrap()
            .push(format!("{device}: {what}"));
    }

    fn script_for(&self, device: &str) -> DeviceScript {
        self.scripts
            .lock()
            .unwrap()
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    fn require_lock(&self, device: &str, op: &str) {
        if !self.lock_held(device) {
            self.violation(device, &format!("{op} without lock"));
        }
    }

    fn next_route_reply(&self, device: &str, table: &str) -> RouteReply {
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts
            .get_mut(device)
            .and_then(|script| script.routes.get_mut(table))
        else {
            return RouteReply::Text(String::new());
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or(RouteReply::Text(String::new()))
        }
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    type Handle = String;

    async fn open(
        &self,
        device: &DeviceIdentity,
        _credentials: &Credentials,
    ) -> Result<String, DeviceError> {
        self.record(&device.name, "open");
        if self.script_for(&device.name).unreachable {
            return Err(DeviceError::Connection {
                device: device.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(device.name.clone())
    }

    async fn close(&self, handle: String) -> Result<(), DeviceError> {
        self.record(&handle, "close");
        Ok(())
    }

    async fn invoke(
        &self,
        handle: &mut String,
        operation: Operation,
    ) -> Result<OpResult, DeviceError> {
        let device = handle.as_str();
        let script = self.script_for(device);
        match operation {
            Operation::LockConfig => {
                self.record(device, "lock");
                if script.lock_error {
                    return Err(DeviceError::LockError(
                        "configuration database locked by admin".to_string(),
                    ));
                }
                let mut locks = self.locks.lock().unwrap();
                let state = locks.entry(device.to_string()).or_default();
                if state.held {
                    drop(locks);
                    self.violation(device, "lock while already locked");
                    return Ok(OpResult::Done);
                }
                state.held = true;
                state.locks += 1;
                Ok(OpResult::Done)
            }
            Operation::UnlockConfig => {
                self.record(device, "unlock");
                let mut locks = self.locks.lock().unwrap();
                let state = locks.entry(device.to_string()).or_default();
                let was_held = state.held;
                state.held = false;
                state.unlocks += 1;
                drop(locks);
                if !was_held {
                    self.violation(device, "unlock without lock");
                }
                if script.unlock_error {
                    return Err(DeviceError::UnlockError("exit refused".to_string()));
                }
                Ok(OpResult::Done)
            }
            Operation::LoadConfig { text, .. } => {
                self.record(device, format!("load {text}"));
                self.require_lock(device, "load");
                if script.load_error {
                    return Err(DeviceError::LoadError(format!(
                        "{text}: syntax error"
                    )));
                }
                Ok(OpResult::Done)
            }
            Operation::DiffConfig => {
                self.record(device, "diff");
                Ok(OpResult::Diff(script.diff.clone()))
            }
            Operation::DiscardConfig => {
                self.record(device, "discard");
                Ok(OpResult::Done)
            }
            Operation::CommitCheck { .. } => {
                self.record(device, "commit-check");
                self.require_lock(device, "commit-check");
                Ok(OpResult::Check(CheckOutcome {
                    passed: script.check_passes,
                    message: if script.check_passes {
                        "configuration check succeeds".to_string()
                    } else {
                        "error: commit failed: (missing mandatory statements)".to_string()
                    },
                }))
            }
            Operation::Commit { timeout, .. } => {
                self.record(device, "commit");
                self.require_lock(device, "commit");
                match script.commit {
                    CommitBehavior::Complete => Ok(OpResult::Done),
                    CommitBehavior::Timeout => Err(DeviceError::CommitTimeout {
                        timeout_secs: timeout.as_secs(),
                        output: "commit in progress".to_string(),
                    }),
                    CommitBehavior::Reject => Err(DeviceError::CommitRejected(
                        "error: configuration database modified".to_string(),
                    )),
                }
            }
            Operation::ReadQuery(query) => {
                self.record(device, format!("query {query}"));
                answer_query(self, device, &script, &query)
            }
        }
    }
}

fn answer_query(
    driver: &ScriptedDriver,
    device: &str,
    script: &DeviceScript,
    query: &Query,
) -> Result<OpResult, DeviceError> {
    if script.disconnect_on.as_deref() == Some(query.name.as_str()) {
        return Err(DeviceError::ChannelDisconnectError);
    }
    if script.failing_queries.contains(&query.name) {
        return Err(DeviceError::QueryError {
            query: query.to_string(),
            reason: "syntax error".to_string(),
        });
    }
    let text = match query.name.as_str() {
        Query::ROUTE_TABLE => {
            let table = query.params.get("table").cloned().unwrap_or_default();
            match driver.next_route_reply(device, &table) {
                RouteReply::Text(text) => text,
                RouteReply::QueryFailure(reason) => {
                    return Err(DeviceError::QueryError {
                        query: query.to_string(),
                        reason,
                    });
                }
                RouteReply::Disconnected => return Err(DeviceError::ChannelDisconnectError),
            }
        }
        Query::CONFIGURATION => {
            let path = query.params.get("path").cloned().unwrap_or_default();
            script.config.get(&path).cloned().unwrap_or_default()
        }
        Query::BGP_SUMMARY => script.bgp_summary.clone(),
        Query::OSPF_NEIGHBOR => script.ospf_neighbors.clone(),
        other if script.outputs.contains_key(other) => script.outputs[other].clone(),
        other => {
            return Err(DeviceError::QueryError {
                query: other.to_string(),
                reason: "unknown query".to_string(),
            });
        }
    };
    Ok(OpResult::Query(QueryOutput::Text(text)))
}

pub fn credentials() -> Credentials {
    Credentials::new("netops", "secret")
}

pub fn device(name: &str, last_octet: u8) -> DeviceIdentity {
    DeviceIdentity::new(name, format!("192.0.2.{last_octet}"))
}
