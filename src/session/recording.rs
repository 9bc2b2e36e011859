use super::*;
use chrono::Utc;
use std::sync::Mutex;

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and raw chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: i64,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep raw shell chunk events.
    pub keep_raw_chunks: bool,
    /// Keep prompt-changed events.
    pub keep_prompt_changed: bool,
    /// Keep per-operation summary events.
    pub keep_operations: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: false,
            keep_prompt_changed: false,
            keep_operations: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        device_addr: String,
        #[serde(alias = "prompt")]
        prompt_after: String,
    },
    ConnectionFailed {
        device_addr: String,
        reason: String,
    },
    ConnectionClosed {
        device_addr: String,
        reason: String,
        #[serde(default)]
        prompt_before: Option<String>,
    },
    CommandOutput {
        /// Missing in single-device recordings; such outputs replay for any device.
        #[serde(default)]
        device_addr: Option<String>,
        command: String,
        #[serde(default)]
        prompt_before: Option<String>,
        #[serde(default)]
        prompt_after: Option<String>,
        success: bool,
        #[serde(default)]
        timed_out: bool,
        content: String,
        all: String,
    },
    OperationFinished {
        device_addr: String,
        operation: String,
        ok: bool,
        #[serde(default)]
        detail: Option<String>,
    },
    PromptChanged {
        device_addr: String,
        prompt: String,
    },
    RawChunk {
        data: String,
    },
}

impl SessionEvent {
    /// Device the event belongs to, if recorded.
    pub fn device_addr(&self) -> Option<&str> {
        match self {
            SessionEvent::ConnectionEstablished { device_addr, .. }
            | SessionEvent::ConnectionFailed { device_addr, .. }
            | SessionEvent::ConnectionClosed { device_addr, .. }
            | SessionEvent::OperationFinished { device_addr, .. }
            | SessionEvent::PromptChanged { device_addr, .. } => Some(device_addr),
            SessionEvent::CommandOutput { device_addr, .. } => device_addr.as_deref(),
            SessionEvent::RawChunk { .. } => None,
        }
    }
}

/// In-memory session recorder, cheap to clone and share between sessions.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

fn lock_error<E: std::fmt::Display>(e: E) -> DeviceError {
    DeviceError::InternalServerError(format!("record lock error: {e}"))
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), DeviceError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self.entries.lock().map_err(lock_error)?;
        guard.push(SessionRecordEntry {
            ts_ms: Utc::now().timestamp_millis(),
            event,
        });
        Ok(())
    }

    /// Record raw shell data chunk when enabled.
    pub fn record_raw_chunk(&self, data: String) -> Result<(), DeviceError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, DeviceError> {
        let guard = self.entries.lock().map_err(lock_error)?;
        Ok(guard.clone())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), DeviceError> {
        self.entries.lock().map_err(lock_error)?.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, DeviceError> {
        let entries = self.entries()?;
        let lines = entries
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DeviceError::InternalServerError(format!("record encode error: {e}")))?;
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, DeviceError> {
        let mut parsed = Vec::new();
        for (idx, line) in jsonl.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line).map_err(|e| {
                DeviceError::InternalServerError(format!(
                    "record decode error on line {}: {e}",
                    idx + 1
                ))
            })?;
            parsed.push(entry);
        }
        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Sorts events by timestamp (stable for equal timestamps) and drops the
    /// noisy event kinds `options` excludes.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, DeviceError> {
        let mut entries = Self::from_jsonl(jsonl)?.entries()?;
        entries.sort_by_key(|entry| entry.ts_ms);
        entries.retain(|entry| match &entry.event {
            SessionEvent::RawChunk { .. } => options.keep_raw_chunks,
            SessionEvent::PromptChanged { .. } => options.keep_prompt_changed,
            SessionEvent::OperationFinished { .. } => options.keep_operations,
            _ => true,
        });

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(entries)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Offline stand-in for one device's shell, fed from recorded command output.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    device_addr: String,
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
    prompt: Option<String>,
}

impl SessionReplayer {
    /// Replayer over every command output in `recorder`, whatever the device.
    pub fn from_recorder(recorder: &SessionRecorder) -> Result<Self, DeviceError> {
        let entries = recorder.entries()?;
        let connected = entries.iter().find_map(|entry| match &entry.event {
            SessionEvent::ConnectionEstablished {
                device_addr,
                prompt_after,
            } => Some((device_addr.clone(), prompt_after.clone())),
            _ => None,
        });
        let (device_addr, prompt) = match connected {
            Some((addr, prompt)) => (addr, Some(prompt)),
            None => (String::new(), None),
        };
        Ok(Self {
            device_addr,
            entries,
            cursor: 0,
            prompt,
        })
    }

    /// Build a replayer from JSONL recording data.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, DeviceError> {
        Self::from_recorder(&SessionRecorder::from_jsonl(jsonl)?)
    }

    /// Replayer for the session recorded for `device_addr`.
    ///
    /// Fails like a real connection would when the recording holds a failed
    /// connection attempt or nothing at all for that device.
    pub fn for_device(entries: &[SessionRecordEntry], device_addr: &str) -> Result<Self, String> {
        let mut prompt = None;
        for entry in entries {
            match &entry.event {
                SessionEvent::ConnectionFailed {
                    device_addr: addr,
                    reason,
                } if addr == device_addr && prompt.is_none() => return Err(reason.clone()),
                SessionEvent::ConnectionEstablished {
                    device_addr: addr,
                    prompt_after,
                } if addr == device_addr => {
                    prompt = Some(prompt_after.clone());
                    break;
                }
                _ => {}
            }
        }
        let Some(prompt) = prompt else {
            return Err(format!("no recorded session for {device_addr}"));
        };
        let entries = entries
            .iter()
            .filter(|entry| {
                matches!(&entry.event, SessionEvent::CommandOutput { device_addr: addr, .. }
                    if addr.as_deref().is_none_or(|addr| addr == device_addr))
            })
            .cloned()
            .collect();
        Ok(Self {
            device_addr: device_addr.to_string(),
            entries,
            cursor: 0,
            prompt: Some(prompt),
        })
    }

    pub fn device_addr(&self) -> &str {
        &self.device_addr
    }

    /// Recorded outputs not yet consumed.
    pub fn remaining(&self) -> usize {
        self.entries[self.cursor.min(self.entries.len())..]
            .iter()
            .filter(|entry| matches!(entry.event, SessionEvent::CommandOutput { .. }))
            .count()
    }

    /// Replay the next recorded output for the given command.
    ///
    /// Recorded commands that do not match are skipped. A recorded timeout
    /// replays as [`DeviceError::ExecTimeout`].
    pub fn replay_next(&mut self, command: &str) -> Result<Output, DeviceError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;

            let SessionEvent::CommandOutput {
                command: recorded_command,
                prompt_after,
                success,
                timed_out,
                content,
                all,
                ..
            } = &entry.event
            else {
                continue;
            };
            if recorded_command != command {
                continue;
            }
            if *timed_out {
                return Err(DeviceError::ExecTimeout(content.clone()));
            }
            if prompt_after.is_some() {
                self.prompt = prompt_after.clone();
            }
            return Ok(Output {
                success: *success,
                content: content.clone(),
                all: all.clone(),
                prompt: prompt_after.clone(),
            });
        }

        Err(DeviceError::ReplayMismatchError(format!(
            "no replayable output found for command '{command}'"
        )))
    }
}

#[async_trait]
impl CommandRunner for SessionReplayer {
    async fn run(&mut self, command: &str, _timeout: Duration) -> Result<Output, DeviceError> {
        self.replay_next(command)
    }

    fn current_prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }
}

/// [`DeviceDriver`] that answers every device from a recording.
#[derive(Debug, Clone)]
pub struct ReplayDriver {
    dialect: Arc<CliDialect>,
    entries: Vec<SessionRecordEntry>,
}

impl ReplayDriver {
    pub fn from_recorder(recorder: &SessionRecorder, dialect: CliDialect) -> Result<Self, DeviceError> {
        Ok(Self {
            dialect: Arc::new(dialect),
            entries: recorder.entries()?,
        })
    }

    pub fn from_jsonl(jsonl: &str, dialect: CliDialect) -> Result<Self, DeviceError> {
        Self::from_recorder(&SessionRecorder::from_jsonl(jsonl)?, dialect)
    }
}

#[async_trait]
impl DeviceDriver for ReplayDriver {
    type Handle = SessionReplayer;

    async fn open(
        &self,
        device: &DeviceIdentity,
        _credentials: &Credentials,
    ) -> Result<SessionReplayer, DeviceError> {
        SessionReplayer::for_device(&self.entries, &device.endpoint()).map_err(|reason| {
            DeviceError::Connection {
                device: device.to_string(),
                reason,
            }
        })
    }

    async fn close(&self, handle: SessionReplayer) -> Result<(), DeviceError> {
        let left = handle.remaining();
        if left > 0 {
            debug!("{}: {left} recorded output(s) not replayed", handle.device_addr());
        }
        Ok(())
    }

    async fn invoke(
        &self,
        handle: &mut SessionReplayer,
        operation: Operation,
    ) -> Result<OpResult, DeviceError> {
        self.dialect.execute(handle, operation).await
    }
}
