//! CLI dialects.
//!
//! A [`CliDialect`] turns each [`Operation`] into one or more CLI commands,
//! runs them through a [`CommandRunner`] (a live SSH shell or a recorded
//! session) and judges the output. The built-in [`CliDialect::juniper`]
//! dialect drives Junos devices through `configure exclusive`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexSet};

use crate::device::{CheckOutcome, LoadMode, OpResult, Operation, Query, QueryOutput};
use crate::error::DeviceError;
use crate::session::Output;

/// Built-in dialect names.
pub const BUILTIN_DIALECTS: &[&str] = &["juniper"];

/// Timeout applied to every command that has no explicit bound.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Carriage returns and backspaces some devices emit at line starts.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(\?)?\}") {
        Ok(re) => re,
        Err(err) => panic!("invalid PLACEHOLDER regex: {err}"),
    });

/// Sends one CLI command and collects its output up to the next prompt.
#[async_trait]
pub trait CommandRunner: Send {
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<Output, DeviceError>;

    /// Prompt seen after the last command, if any.
    fn current_prompt(&self) -> Option<&str>;
}

/// Fixed command strings of a dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectCommands {
    pub lock: String,
    pub unlock: String,
    pub discard: String,
    pub diff: String,
    pub commit_check: String,
    pub commit: String,
    /// Output marker of a passed commit-check.
    pub check_succeeded: String,
    /// Output marker of a completed commit.
    pub commit_succeeded: String,
    /// Prefix that runs an operational command from configuration mode.
    pub operational_prefix: String,
}

/// Prompts, error patterns and command vocabulary of one CLI family.
#[derive(Debug, Clone)]
pub struct CliDialect {
    name: String,
    prompt: Regex,
    config_prompt: Regex,
    more: Regex,
    errors: RegexSet,
    ignore_errors: RegexSet,
    confirmations: Vec<(Regex, String)>,
    setup_commands: Vec<String>,
    commands: DialectCommands,
    queries: BTreeMap<String, String>,
    command_timeout: Duration,
}

fn compile(what: &str, pattern: &str) -> Result<Regex, DeviceError> {
    Regex::new(pattern)
        .map_err(|err| DeviceError::InternalServerError(format!("invalid {what} pattern: {err}")))
}

fn compile_set(what: &str, patterns: &[&str]) -> Result<RegexSet, DeviceError> {
    RegexSet::new(patterns)
        .map_err(|err| DeviceError::InternalServerError(format!("invalid {what} patterns: {err}")))
}

impl CliDialect {
    /// Looks up a built-in dialect by name.
    pub fn by_name(name: &str) -> Result<Self, DeviceError> {
        match name.to_ascii_lowercase().as_str() {
            "juniper" | "junos" => Self::juniper(),
            other => Err(DeviceError::InternalServerError(format!(
                "unknown dialect '{other}', available: {BUILTIN_DIALECTS:?}"
            ))),
        }
    }

    /// Junos CLI.
    pub fn juniper() -> Result<Self, DeviceError> {
        let queries = [
            (Query::ROUTE_TABLE, "show route table {table} terse"),
            (Query::CONFIGURATION, "show configuration {path?} | display set"),
            (Query::BGP_SUMMARY, "show bgp summary"),
            (Query::OSPF_NEIGHBOR, "show ospf neighbor"),
            (Query::OSPF_INTERFACE, "show ospf interface"),
            (Query::VERSION, "show version"),
            (Query::CHASSIS_HARDWARE, "show chassis hardware"),
            (Query::ENVIRONMENT, "show chassis environment"),
            (Query::POWER, "show chassis power"),
            (Query::OPTICS, "show interfaces diagnostics optics"),
            (Query::INTERFACE_DESCRIPTIONS, "show interfaces descriptions"),
        ]
        .into_iter()
        .map(|(name, command)| (name.to_string(), command.to_string()))
        .collect();

        Ok(Self {
            name: "juniper".to_string(),
            prompt: compile("prompt", r"^\S+@\S+[>#]\s*$")?,
            config_prompt: compile("config prompt", r"^\S+@\S+#\s*$")?,
            more: compile("more", r"---\(more.*\)---")?,
            errors: compile_set(
                "error",
                &[
                    r"^\s*unknown command\.?\s*$",
                    r"^\s*syntax error.*$",
                    r"^\s*error:.+$",
                    r"^\s*invalid value.*$",
                    r"^\s*missing argument\.?\s*$",
                    r"^\s+\^$",
                ],
            )?,
            ignore_errors: compile_set(
                "ignored error",
                &[r"warning: statement not found", r"warning: element \S+ not found"],
            )?,
            confirmations: vec![
                (
                    compile("confirmation", r"Exit with uncommitted changes\? \[yes,no\].*$")?,
                    "yes\n".to_string(),
                ),
                (
                    compile("confirmation", r"Discard uncommitted changes\? \[yes,no\].*$")?,
                    "yes\n".to_string(),
                ),
            ],
            setup_commands: vec![
                "set cli screen-length 0".to_string(),
                "set cli screen-width 0".to_string(),
            ],
            commands: DialectCommands {
                lock: "configure exclusive".to_string(),
                unlock: "exit configuration-mode".to_string(),
                discard: "rollback 0".to_string(),
                diff: "show | compare".to_string(),
                commit_check: "commit check".to_string(),
                commit: "commit".to_string(),
                check_succeeded: "configuration check succeeds".to_string(),
                commit_succeeded: "commit complete".to_string(),
                operational_prefix: "run ".to_string(),
            },
            queries,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    /// Adds or overrides a named query. `{key}` placeholders are filled from
    /// the query parameters, `{key?}` ones may be absent.
    pub fn with_query(mut self, name: impl Into<String>, command: impl Into<String>) -> Self {
        self.queries.insert(name.into(), command.into());
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &DialectCommands {
        &self.commands
    }

    /// Commands sent once right after login.
    pub fn setup_commands(&self) -> &[String] {
        &self.setup_commands
    }

    pub fn is_prompt(&self, text: &str) -> bool {
        self.prompt.is_match(text.trim_start_matches(['\r', '\n']))
    }

    pub fn is_config_prompt(&self, text: &str) -> bool {
        self.config_prompt
            .is_match(text.trim_start_matches(['\r', '\n']))
    }

    pub fn is_more(&self, text: &str) -> bool {
        self.more.is_match(text)
    }

    /// Answer to send when the device asks for confirmation.
    pub fn confirmation_for(&self, text: &str) -> Option<&str> {
        self.confirmations
            .iter()
            .find(|(pattern, _)| pattern.is_match(text))
            .map(|(_, answer)| answer.as_str())
    }

    pub fn is_error_line(&self, line: &str) -> bool {
        self.errors.is_match(line) && !self.ignore_errors.is_match(line)
    }

    /// Drops the `[edit]` banner Junos prints before each configuration-mode
    /// prompt, along with surrounding blank lines. Hierarchy headers such as
    /// `[edit system]` are part of diff output and kept.
    pub fn strip_context(&self, content: &str) -> String {
        content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| line.trim() != "[edit]")
            .collect::<Vec<_>>()
            .join("\n")
            .trim_matches('\n')
            .to_string()
    }

    fn in_config_mode<R: CommandRunner + ?Sized>(&self, runner: &R) -> bool {
        runner
            .current_prompt()
            .is_some_and(|prompt| self.is_config_prompt(prompt))
    }

    /// Renders the CLI command of a named query.
    pub fn render_query(&self, query: &Query, in_config: bool) -> Result<String, DeviceError> {
        let query_error = |reason: String| DeviceError::QueryError {
            query: query.to_string(),
            reason,
        };
        let template = self
            .queries
            .get(&query.name)
            .ok_or_else(|| query_error(format!("no '{}' query in {} dialect", query.name, self.name)))?;

        if let Some((key, _)) = query
            .params
            .iter()
            .find(|(_, value)| value.contains(['\n', '\r', '|', ';']))
        {
            return Err(query_error(format!("parameter '{key}' contains forbidden characters")));
        }

        let mut missing = Vec::new();
        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            match query.params.get(key) {
                Some(value) => value.clone(),
                None => {
                    if caps.get(2).is_none() {
                        missing.push(key.to_string());
                    }
                    String::new()
                }
            }
        });
        if !missing.is_empty() {
            return Err(query_error(format!("missing parameter(s): {}", missing.join(", "))));
        }

        let mut command = rendered.split_whitespace().collect::<Vec<_>>().join(" ");
        if wants_json(query) {
            command.push_str(" | display json");
        }
        if in_config {
            command.insert_str(0, &self.commands.operational_prefix);
        }
        Ok(command)
    }

    /// Carries out one operation through `runner`.
    pub async fn execute<R>(
        &self,
        runner: &mut R,
        operation: Operation,
    ) -> Result<OpResult, DeviceError>
    where
        R: CommandRunner + ?Sized,
    {
        match operation {
            Operation::LockConfig => self.lock(runner).await.map(|_| OpResult::Done),
            Operation::UnlockConfig => self.unlock(runner).await.map(|_| OpResult::Done),
            Operation::LoadConfig { text, mode } => {
                self.load(runner, &text, mode).await.map(|_| OpResult::Done)
            }
            Operation::DiffConfig => self.diff(runner).await.map(OpResult::Diff),
            Operation::DiscardConfig => self.discard(runner).await.map(|_| OpResult::Done),
            Operation::CommitCheck { timeout } => {
                self.commit_check(runner, timeout).await.map(OpResult::Check)
            }
            Operation::Commit { timeout, comment } => self
                .commit(runner, timeout, &comment)
                .await
                .map(|_| OpResult::Done),
            Operation::ReadQuery(query) => self.query(runner, &query).await.map(OpResult::Query),
        }
    }

    async fn send<R: CommandRunner + ?Sized>(
        &self,
        runner: &mut R,
        command: &str,
        timeout: Duration,
    ) -> Result<Output, DeviceError> {
        trace!("[{}] >> {command}", self.name);
        let output = runner.run(command, timeout).await?;
        trace!("[{}] << success={} {:?}", self.name, output.success, output.content);
        Ok(output)
    }

    async fn lock<R: CommandRunner + ?Sized>(&self, runner: &mut R) -> Result<(), DeviceError> {
        let output = self
            .send(runner, &self.commands.lock, self.command_timeout)
            .await
            .map_err(|err| match err {
                DeviceError::ExecTimeout(partial) => {
                    DeviceError::LockError(format!("timed out: {}", partial.trim()))
                }
                other => other,
            })?;
        if output.success && self.in_config_mode(runner) {
            return Ok(());
        }
        let reason = failure_reason(
            &self.strip_context(&output.content),
            "configuration mode not entered",
        );
        // A refused lock can still leave the CLI in configuration mode.
        if self.in_config_mode(runner)
            && let Err(err) = self.unlock(runner).await
        {
            warn!("[{}] could not leave configuration mode after failed lock: {err}", self.name);
            return Err(DeviceError::LockError(format!("{reason}; {err}")));
        }
        Err(DeviceError::LockError(reason))
    }

    async fn unlock<R: CommandRunner + ?Sized>(&self, runner: &mut R) -> Result<(), DeviceError> {
        let output = self
            .send(runner, &self.commands.unlock, self.command_timeout)
            .await
            .map_err(|err| match err {
                DeviceError::ExecTimeout(partial) => {
                    DeviceError::UnlockError(format!("timed out: {}", partial.trim()))
                }
                other => other,
            })?;
        if !output.success || self.in_config_mode(runner) {
            return Err(DeviceError::UnlockError(failure_reason(
                &self.strip_context(&output.content),
                "still in configuration mode",
            )));
        }
        Ok(())
    }

    async fn load<R: CommandRunner + ?Sized>(
        &self,
        runner: &mut R,
        text: &str,
        mode: LoadMode,
    ) -> Result<(), DeviceError> {
        if !self.in_config_mode(runner) {
            return Err(DeviceError::LoadError("not in configuration mode".to_string()));
        }
        let mut loaded = 0usize;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let output = self
                .send(runner, line, self.command_timeout)
                .await
                .map_err(|err| match err {
                    DeviceError::ExecTimeout(_) => {
                        DeviceError::LoadError(format!("'{line}' timed out"))
                    }
                    other => other,
                })?;
            if !output.success {
                return Err(DeviceError::LoadError(format!(
                    "'{line}': {}",
                    self.strip_context(&output.content)
                )));
            }
            loaded += 1;
        }
        if loaded == 0 {
            return Err(DeviceError::LoadError("no configuration statements".to_string()));
        }
        debug!("[{}] staged {loaded} statement(s) ({mode:?})", self.name);
        Ok(())
    }

    async fn diff<R: CommandRunner + ?Sized>(
        &self,
        runner: &mut R,
    ) -> Result<Option<String>, DeviceError> {
        let output = self
            .send(runner, &self.commands.diff, self.command_timeout)
            .await
            .map_err(|err| match err {
                DeviceError::ExecTimeout(_) => DeviceError::RpcError("diff timed out".to_string()),
                other => other,
            })?;
        let content = self.strip_context(&output.content);
        if !output.success {
            return Err(DeviceError::RpcError(format!("diff failed: {content}")));
        }
        Ok(Some(content).filter(|c| !c.trim().is_empty()))
    }

    async fn discard<R: CommandRunner + ?Sized>(&self, runner: &mut R) -> Result<(), DeviceError> {
        let output = self
            .send(runner, &self.commands.discard, self.command_timeout)
            .await
            .map_err(|err| match err {
                DeviceError::ExecTimeout(_) => {
                    DeviceError::RpcError("discard timed out".to_string())
                }
                other => other,
            })?;
        if !output.success {
            return Err(DeviceError::RpcError(format!(
                "discard failed: {}",
                self.strip_context(&output.content)
            )));
        }
        Ok(())
    }

    async fn commit_check<R: CommandRunner + ?Sized>(
        &self,
        runner: &mut R,
        timeout: Duration,
    ) -> Result<CheckOutcome, DeviceError> {
        let output = match self.send(runner, &self.commands.commit_check, timeout).await {
            Ok(output) => output,
            Err(DeviceError::ExecTimeout(_)) => {
                return Ok(CheckOutcome {
                    passed: false,
                    message: format!("commit check timed out after {}s", timeout.as_secs()),
                });
            }
            Err(err) => return Err(err),
        };
        let message = self.strip_context(&output.content);
        let passed = output.success && output.all.contains(&self.commands.check_succeeded);
        Ok(CheckOutcome { passed, message })
    }

    async fn commit<R: CommandRunner + ?Sized>(
        &self,
        runner: &mut R,
        timeout: Duration,
        comment: &str,
    ) -> Result<(), DeviceError> {
        let command = if comment.trim().is_empty() {
            self.commands.commit.clone()
        } else {
            format!(
                "{} comment \"{}\"",
                self.commands.commit,
                comment.replace(['"', '\n', '\r'], "'")
            )
        };
        let output = self
            .send(runner, &command, timeout)
            .await
            .map_err(|err| match err {
                DeviceError::ExecTimeout(partial) => DeviceError::CommitTimeout {
                    timeout_secs: timeout.as_secs(),
                    output: partial.trim().to_string(),
                },
                other => other,
            })?;
        if output.success && output.all.contains(&self.commands.commit_succeeded) {
            return Ok(());
        }
        Err(DeviceError::CommitRejected(failure_reason(
            &self.strip_context(&output.content),
            "no commit confirmation in output",
        )))
    }

    async fn query<R: CommandRunner + ?Sized>(
        &self,
        runner: &mut R,
        query: &Query,
    ) -> Result<QueryOutput, DeviceError> {
        let command = self.render_query(query, self.in_config_mode(runner))?;
        let query_error = |reason: String| DeviceError::QueryError {
            query: query.to_string(),
            reason,
        };
        let output = self
            .send(runner, &command, self.command_timeout)
            .await
            .map_err(|err| match err {
                DeviceError::ExecTimeout(_) => query_error("timed out".to_string()),
                other => other,
            })?;
        let content = self.strip_context(&output.content);
        if !output.success {
            return Err(query_error(content));
        }
        if wants_json(query) {
            return serde_json::from_str(&content)
                .map(QueryOutput::Structured)
                .map_err(|err| query_error(format!("invalid json output: {err}")));
        }
        Ok(QueryOutput::Text(content))
    }
}

fn wants_json(query: &Query) -> bool {
    query.params.get("format").is_some_and(|f| f == "json")
}

fn failure_reason(content: &str, fallback: &str) -> String {
    let content = content.trim();
    if content.is_empty() {
        fallback.to_string()
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Runner fed from a fixed script of (expected command, reply).
    struct ScriptRunner {
        script: VecDeque<(String, Result<Output, DeviceError>)>,
        prompt: Option<String>,
        sent: Vec<String>,
        timeouts: Vec<Duration>,
    }

    impl ScriptRunner {
        fn new(prompt: &str) -> Self {
            Self {
                script: VecDeque::new(),
                prompt: Some(prompt.to_string()),
                sent: Vec::new(),
                timeouts: Vec::new(),
            }
        }

        fn reply(mut self, command: &str, success: bool, content: &str, prompt: &str) -> Self {
            self.script.push_back((
                command.to_string(),
                Ok(Output {
                    success,
                    content: content.to_string(),
                    all: format!("{command}\n{content}\n{prompt}"),
                    prompt: Some(prompt.to_string()),
                }),
            ));
            self
        }

        fn fail(mut self, command: &str, err: DeviceError) -> Self {
            self.script.push_back((command.to_string(), Err(err)));
            self
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptRunner {
        async fn run(&mut self, command: &str, timeout: Duration) -> Result<Output, DeviceError> {
            self.sent.push(command.to_string());
            self.timeouts.push(timeout);
            let (expected, reply) = self
                .script
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected command '{command}'"));
            assert_eq!(expected, command);
            if let Ok(output) = &reply {
                self.prompt = output.prompt.clone();
            }
            reply
        }

        fn current_prompt(&self) -> Option<&str> {
            self.prompt.as_deref()
        }
    }

    const OPER: &str = "netops@edge1> ";
    const CONF: &str = "netops@edge1# ";

    fn junos() -> CliDialect {
        CliDialect::juniper().unwrap()
    }

    #[test]
    fn junos_prompts_and_errors() {
        let dialect = junos();
        assert!(dialect.is_prompt(OPER));
        assert!(dialect.is_prompt(CONF));
        assert!(dialect.is_config_prompt(CONF));
        assert!(!dialect.is_config_prompt(OPER));
        assert!(dialect.is_error_line("error: configuration database locked by:"));
        assert!(dialect.is_error_line("syntax error, expecting <command>."));
        assert!(!dialect.is_error_line("warning: statement not found"));
        assert!(dialect.is_more("---(more 42%)---"));
        assert_eq!(
            dialect.confirmation_for("Exit with uncommitted changes? [yes,no] (yes) "),
            Some("yes\n")
        );
    }

    #[test]
    fn query_rendering_prefixes_run_in_configuration_mode() {
        let dialect = junos();
        let query = Query::route_table("inet.0");
        assert_eq!(
            dialect.render_query(&query, false).unwrap(),
            "show route table inet.0 terse"
        );
        assert_eq!(
            dialect.render_query(&query, true).unwrap(),
            "run show route table inet.0 terse"
        );
        assert_eq!(
            dialect.render_query(&Query::configuration(None), false).unwrap(),
            "show configuration | display set"
        );
        let scoped = Query::configuration(Some("protocols bgp group EXT"));
        assert_eq!(
            dialect.render_query(&scoped, false).unwrap(),
            "show configuration protocols bgp group EXT | display set"
        );
    }

    #[test]
    fn dialects_are_found_by_name() {
        assert_eq!(CliDialect::by_name("JunOS").unwrap().name(), "juniper");
        assert_eq!(CliDialect::by_name("juniper").unwrap().name(), "juniper");
        let err = CliDialect::by_name("ios").unwrap_err();
        assert!(err.to_string().contains("unknown dialect 'ios'"));
    }

    #[test]
    fn custom_queries_extend_the_vocabulary() {
        let dialect = junos().with_query("interface-terse", "show interfaces {name} terse");
        let query = Query::new("interface-terse").param("name", "ge-0/0/0");
        assert_eq!(
            dialect.render_query(&query, true).unwrap(),
            "run show interfaces ge-0/0/0 terse"
        );

        let dialect = dialect.with_query(Query::VERSION, "show version brief");
        assert_eq!(
            dialect.render_query(&Query::new(Query::VERSION), false).unwrap(),
            "show version brief"
        );
    }

    #[tokio::test]
    async fn command_timeout_bounds_plain_commands() {
        let dialect = junos().with_command_timeout(Duration::from_secs(5));
        let mut runner = ScriptRunner::new(OPER).reply(
            "configure exclusive",
            true,
            "Entering configuration mode\n\n[edit]",
            CONF,
        );
        dialect
            .execute(&mut runner, Operation::LockConfig)
            .await
            .unwrap();
        assert_eq!(runner.timeouts, vec![Duration::from_secs(5)]);
    }

    #[test]
    fn query_rendering_rejects_missing_and_unsafe_parameters() {
        let dialect = junos();
        let err = dialect
            .render_query(&Query::new(Query::ROUTE_TABLE), false)
            .unwrap_err();
        assert!(err.to_string().contains("missing parameter(s): table"));

        let err = dialect
            .render_query(&Query::route_table("inet.0 | save /tmp/x"), false)
            .unwrap_err();
        assert!(matches!(err, DeviceError::QueryError { .. }));

        let err = dialect
            .render_query(&Query::new("interfaces"), false)
            .unwrap_err();
        assert!(err.to_string().contains("no 'interfaces' query"));
    }

    #[tokio::test]
    async fn lock_requires_configuration_prompt() {
        let dialect = junos();
        let mut runner = ScriptRunner::new(OPER).reply(
            "configure exclusive",
            false,
            "error: configuration database locked by:\n  admin terminal p0",
            OPER,
        );
        let err = dialect
            .execute(&mut runner, Operation::LockConfig)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::LockError(ref msg) if msg.contains("locked by")));

        let mut runner = ScriptRunner::new(OPER).reply(
            "configure exclusive",
            true,
            "Entering configuration mode\n\n[edit]",
            CONF,
        );
        let result = dialect.execute(&mut runner, Operation::LockConfig).await;
        assert_eq!(result.unwrap(), OpResult::Done);
    }

    #[tokio::test]
    async fn refused_lock_leaves_configuration_mode() {
        let dialect = junos();
        let mut runner = ScriptRunner::new(OPER)
            .reply(
                "configure exclusive",
                false,
                "error: shared configuration database modified
Users currently editing the configuration:
  admin terminal p0

[edit]",
                CONF,
            )
            .reply("exit configuration-mode", true, "Exiting configuration mode", OPER);

        let err = dialect
            .execute(&mut runner, Operation::LockConfig)
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceError::LockError(ref msg) if msg.contains("database modified")));
        assert_eq!(runner.sent, vec!["configure exclusive", "exit configuration-mode"]);
        assert_eq!(runner.current_prompt(), Some(OPER));
    }

    #[tokio::test]
    async fn refused_lock_reports_a_stuck_configuration_mode() {
        let dialect = junos();
        let mut runner = ScriptRunner::new(OPER)
            .reply("configure exclusive", false, "error: configuration database locked", CONF)
            .reply("exit configuration-mode", false, "error: session busy", CONF);

        let err = dialect
            .execute(&mut runner, Operation::LockConfig)
            .await
            .unwrap_err();

        let DeviceError::LockError(msg) = err else {
            panic!("expected a lock error");
        };
        assert!(msg.contains("database locked"));
        assert!(msg.contains("session busy"));
    }

    #[tokio::test]
    async fn load_stops_at_first_rejected_statement() {
        let dialect = junos();
        let mut runner = ScriptRunner::new(CONF)
            .reply("set system host-name edge1", true, "\n[edit]", CONF)
            .reply(
                "set protocols bgp group EXT neighbor 10.0.0.300",
                false,
                "                                          ^\ninvalid value '10.0.0.300'\n\n[edit]",
                CONF,
            );
        let text = "# generated\nset system host-name edge1\n\nset protocols bgp group EXT neighbor 10.0.0.300\nset never sent";
        let err = dialect
            .execute(
                &mut runner,
                Operation::LoadConfig {
                    text: text.to_string(),
                    mode: LoadMode::Merge,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::LoadError(ref msg) if msg.contains("10.0.0.300")));
        assert_eq!(runner.sent.len(), 2);
    }

    #[tokio::test]
    async fn empty_compare_is_no_diff() {
        let dialect = junos();
        let mut runner = ScriptRunner::new(CONF).reply("show | compare", true, "\n[edit]", CONF);
        assert_eq!(
            dialect.execute(&mut runner, Operation::DiffConfig).await.unwrap(),
            OpResult::Diff(None)
        );

        let mut runner = ScriptRunner::new(CONF).reply(
            "show | compare",
            true,
            "[edit system]\n-  host-name old;\n+  host-name new;\n\n[edit]",
            CONF,
        );
        let OpResult::Diff(Some(diff)) =
            dialect.execute(&mut runner, Operation::DiffConfig).await.unwrap()
        else {
            panic!("expected a diff");
        };
        assert!(diff.contains("+  host-name new;"));
        assert!(diff.starts_with("[edit system]"));
        assert!(!diff.ends_with("[edit]"));
    }

    #[tokio::test]
    async fn commit_check_reads_success_marker() {
        let dialect = junos();
        let timeout = Duration::from_secs(60);
        let mut runner = ScriptRunner::new(CONF).reply(
            "commit check",
            true,
            "configuration check succeeds\n\n[edit]",
            CONF,
        );
        let result = dialect
            .execute(&mut runner, Operation::CommitCheck { timeout })
            .await
            .unwrap();
        assert!(matches!(result, OpResult::Check(CheckOutcome { passed: true, .. })));

        let mut runner = ScriptRunner::new(CONF).reply(
            "commit check",
            false,
            "[edit protocols bgp]\n  'group EXT'\n    error: peer-as not configured\nerror: configuration check-out failed\n\n[edit]",
            CONF,
        );
        let OpResult::Check(outcome) = dialect
            .execute(&mut runner, Operation::CommitCheck { timeout })
            .await
            .unwrap()
        else {
            panic!("expected check outcome");
        };
        assert!(!outcome.passed);
        assert!(outcome.message.contains("peer-as not configured"));
    }

    #[tokio::test]
    async fn commit_timeout_is_distinct_from_rejection() {
        let dialect = junos();
        let timeout = Duration::from_secs(120);
        let mut runner = ScriptRunner::new(CONF).fail(
            "commit comment \"nightly 'bgp'\"",
            DeviceError::ExecTimeout("commit in progress".to_string()),
        );
        let err = dialect
            .execute(
                &mut runner,
                Operation::Commit {
                    timeout,
                    comment: "nightly \"bgp\"".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::CommitTimeout { timeout_secs: 120, .. }));

        let mut runner = ScriptRunner::new(CONF).reply(
            "commit",
            false,
            "error: commit failed: (statements constraint check failed)",
            CONF,
        );
        let err = dialect
            .execute(
                &mut runner,
                Operation::Commit {
                    timeout,
                    comment: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::CommitRejected(_)));
    }

    #[tokio::test]
    async fn json_queries_are_parsed() {
        let dialect = junos();
        let mut runner = ScriptRunner::new(OPER).reply(
            "show version | display json",
            true,
            r#"{"software-information": [{"host-name": [{"data": "edge1"}]}]}"#,
            OPER,
        );
        let result = dialect
            .execute(
                &mut runner,
                Operation::ReadQuery(Query::new(Query::VERSION).param("format", "json")),
            )
            .await
            .unwrap();
        let OpResult::Query(QueryOutput::Structured(value)) = result else {
            panic!("expected structured output");
        };
        assert_eq!(value["software-information"][0]["host-name"][0]["data"], "edge1");
    }
}
