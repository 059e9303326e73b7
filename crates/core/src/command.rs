//! Host command execution
//!
//! Every interaction with git, docker and docker compose goes through a
//! [`CommandRunner`]. The runner itself only reports what happened (exit code
//! and output); the [`CommandRunnerExt`] helpers decide how a non-zero exit is
//! interpreted:
//!
//! - [`CommandRunnerExt::run`] / [`CommandRunnerExt::run_with_progress`]: fatal,
//!   a non-zero exit becomes [`CommandError::Failed`]
//! - [`CommandRunnerExt::probe`]: existence check, a non-zero exit means "absent"
//! - [`CommandRunnerExt::run_tolerant`]: best-effort cleanup, always returns a
//!   [`TolerantOutcome`] and never an error
//!
//! Command lines are executed with `sh -c` and inherit the caller's environment.

use crate::errors::{CommandError, Result};
use crate::redaction::redact_command;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Number of trailing stderr lines kept in a failure error
const STDERR_TAIL_LINES: usize = 20;

/// Result of a finished host command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when the process was terminated by a signal)
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Normalized outcome of a best-effort command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TolerantOutcome {
    /// Command exited with status zero
    Succeeded,
    /// Command ran but exited non-zero
    Failed { exit_code: i32 },
    /// Command could not be run at all (spawn failure, timeout)
    Unavailable { reason: String },
}

impl TolerantOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Host command execution abstraction
///
/// Implementations only fail when the command could not be executed or
/// observed; a non-zero exit status is reported through [`CommandOutput`].
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a command line and capture its output
    async fn output(&self, command: &str) -> Result<CommandOutput>;

    /// Run a command line, logging stdout/stderr lines as they arrive
    async fn stream(&self, command: &str, label: &str) -> Result<CommandOutput>;
}

impl<T: CommandRunner> CommandRunner for &T {
    async fn output(&self, command: &str) -> Result<CommandOutput> {
        (*self).output(command).await
    }

    async fn stream(&self, command: &str, label: &str) -> Result<CommandOutput> {
        (*self).stream(command, label).await
    }
}

/// Exit-status interpretation on top of [`CommandRunner`]
#[allow(async_fn_in_trait)]
pub trait CommandRunnerExt: CommandRunner {
    /// Run and capture; a non-zero exit is a [`CommandError::Failed`]
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let output = self.output(command).await?;
        ensure_success(command, output)
    }

    /// Run with streamed output; a non-zero exit is a [`CommandError::Failed`]
    async fn run_with_progress(&self, command: &str, label: &str) -> Result<()> {
        info!("{}", label);
        let output = self.stream(command, label).await?;
        ensure_success(command, output).map(|_| ())
    }

    /// Existence check: true only when the command ran and exited zero
    async fn probe(&self, command: &str) -> bool {
        match self.output(command).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("Probe could not run: {}", e);
                false
            }
        }
    }

    /// Best-effort execution that never fails
    async fn run_tolerant(&self, command: &str, label: &str) -> TolerantOutcome {
        match self.stream(command, label).await {
            Ok(output) if output.success() => TolerantOutcome::Succeeded,
            Ok(output) => {
                warn!(
                    "Ignoring failure of best-effort command (exit code {}): {}",
                    output.exit_code,
                    redact_command(command)
                );
                TolerantOutcome::Failed {
                    exit_code: output.exit_code,
                }
            }
            Err(e) => {
                warn!("Ignoring best-effort command that could not run: {}", e);
                TolerantOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

impl<T: CommandRunner> CommandRunnerExt for T {}

fn ensure_success(command: &str, output: CommandOutput) -> Result<CommandOutput> {
    if output.success() {
        return Ok(output);
    }
    Err(CommandError::Failed {
        command: redact_command(command),
        exit_code: output.exit_code,
        stderr: stderr_tail(&output.stderr),
    }
    .into())
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Runner executing command lines through `sh -c`
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    timeout: Option<Duration>,
}

impl ShellRunner {
    /// Create a runner without a per-command timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or clear) the per-command timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn bounded<F, T>(&self, shown: &str, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        match self.timeout {
            None => Ok(fut.await),
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                CommandError::TimedOut {
                    command: shown.to_string(),
                    seconds: limit.as_secs(),
                }
                .into()
            }),
        }
    }
}

impl CommandRunner for ShellRunner {
    #[instrument(skip_all)]
    async fn output(&self, command: &str) -> Result<CommandOutput> {
        let shown = redact_command(command);
        debug!("Executing command: {}", shown);

        let child = Self::command(command)
            .spawn()
            .map_err(|e| spawn_error(&shown, e))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = self
            .bounded(&shown, child.wait_with_output())
            .await?
            .map_err(|e| io_error(&shown, e))?;

        let exit_code = output.status.code().unwrap_or(-1);
        debug!("Command exited with code {}: {}", exit_code, shown);

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    #[instrument(skip_all, fields(label = %label))]
    async fn stream(&self, command: &str, label: &str) -> Result<CommandOutput> {
        let shown = redact_command(command);
        debug!("Executing command with streamed output: {}", shown);

        let mut child = Self::command(command)
            .spawn()
            .map_err(|e| spawn_error(&shown, e))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            let (stdout_lines, stderr_lines) = tokio::try_join!(
                forward_lines(stdout, label, "stdout"),
                forward_lines(stderr, label, "stderr"),
            )?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout_lines, stderr_lines))
        };

        let (status, stdout_lines, stderr_lines) = self
            .bounded(&shown, run)
            .await?
            .map_err(|e| io_error(&shown, e))?;

        let exit_code = status.code().unwrap_or(-1);
        debug!("Command exited with code {}: {}", exit_code, shown);

        Ok(CommandOutput {
            exit_code,
            stdout: stdout_lines.join("\n"),
            stderr: stderr_lines.join("\n"),
        })
    }
}

async fn forward_lines<R>(
    reader: Option<R>,
    label: &str,
    stream: &'static str,
) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let Some(reader) = reader else {
        return Ok(collected);
    };

    // Build tools print arbitrary bytes; decode lossily instead of failing.
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        let trimmed = line.trim_end();
        if !trimmed.is_empty() {
            info!(stream, "[{}] {}", label, trimmed);
        }
        collected.push(line);
    }
    Ok(collected)
}

fn spawn_error(shown: &str, e: std::io::Error) -> crate::errors::DockhandError {
    CommandError::Spawn {
        command: shown.to_string(),
        message: e.to_string(),
    }
    .into()
}

fn io_error(shown: &str, e: std::io::Error) -> crate::errors::DockhandError {
    CommandError::Io {
        command: shown.to_string(),
        message: e.to_string(),
    }
    .into()
}

pub mod mock {
    //! Scripted command runner for tests
    //!
    //! [`MockRunner`] records every command line it receives. Commands whose
    //! line starts with a registered prefix get the scripted response (and
    //! optional filesystem side effect); everything else is passed through to
    //! a real [`ShellRunner`], so existence probes like `test -f` work against
    //! temporary directory fixtures.

    use super::{CommandOutput, CommandRunner, ShellRunner};
    use crate::errors::{CommandError, Result};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use tracing::debug;

    type SideEffect = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

    /// Scripted response for a matched command
    #[derive(Debug, Clone, Default)]
    pub struct MockResponse {
        pub exit_code: i32,
        pub stdout: String,
        pub stderr: String,
    }

    impl MockResponse {
        pub fn success() -> Self {
            Self::default()
        }

        pub fn failure(exit_code: i32) -> Self {
            Self {
                exit_code,
                ..Self::default()
            }
        }

        pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
            self.stdout = stdout.into();
            self
        }

        pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
            self.stderr = stderr.into();
            self
        }
    }

    struct Rule {
        prefix: String,
        response: MockResponse,
        effect: Option<SideEffect>,
    }

    /// Recording, scripted [`CommandRunner`]
    #[derive(Clone)]
    pub struct MockRunner {
        rules: Arc<Mutex<Vec<Rule>>>,
        history: Arc<Mutex<Vec<String>>>,
        passthrough: Option<ShellRunner>,
    }

    impl Default for MockRunner {
        fn default() -> Self {
            Self::new()
        }
    }

    impl std::fmt::Debug for MockRunner {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockRunner")
                .field("history", &self.history())
                .field("passthrough", &self.passthrough.is_some())
                .finish()
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    impl MockRunner {
        /// Runner that passes unmatched commands to a real shell
        pub fn new() -> Self {
            Self {
                rules: Arc::default(),
                history: Arc::default(),
                passthrough: Some(ShellRunner::new()),
            }
        }

        /// Runner that answers unmatched commands with exit code 0
        pub fn without_passthrough() -> Self {
            Self {
                passthrough: None,
                ..Self::new()
            }
        }

        /// Script a response for commands starting with `prefix`.
        ///
        /// Later registrations take precedence over earlier ones.
        pub fn on(&self, prefix: impl Into<String>, response: MockResponse) -> &Self {
            lock(&self.rules).push(Rule {
                prefix: prefix.into(),
                response,
                effect: None,
            });
            self
        }

        /// Script a response plus a side effect run before responding
        pub fn on_with<F>(&self, prefix: impl Into<String>, response: MockResponse, effect: F) -> &Self
        where
            F: Fn(&str) -> std::io::Result<()> + Send + Sync + 'static,
        {
            lock(&self.rules).push(Rule {
                prefix: prefix.into(),
                response,
                effect: Some(Arc::new(effect)),
            });
            self
        }

        /// All command lines received, in order
        pub fn history(&self) -> Vec<String> {
            lock(&self.history).clone()
        }

        /// Received command lines starting with `prefix`
        pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
            lock(&self.history)
                .iter()
                .filter(|c| c.starts_with(prefix))
                .cloned()
                .collect()
        }

        fn scripted(&self, command: &str) -> Option<Result<CommandOutput>> {
            let (response, effect) = {
                let rules = lock(&self.rules);
                let rule = rules.iter().rev().find(|r| command.starts_with(&r.prefix))?;
                (rule.response.clone(), rule.effect.clone())
            };

            if let Some(effect) = effect {
                if let Err(e) = effect(command) {
                    return Some(Err(CommandError::Io {
                        command: command.to_string(),
                        message: e.to_string(),
                    }
                    .into()));
                }
            }

            Some(Ok(CommandOutput {
                exit_code: response.exit_code,
                stdout: response.stdout,
                stderr: response.stderr,
            }))
        }

        fn record(&self, command: &str) {
            debug!("MockRunner received: {}", command);
            lock(&self.history).push(command.to_string());
        }
    }

    impl CommandRunner for MockRunner {
        async fn output(&self, command: &str) -> Result<CommandOutput> {
            self.record(command);
            if let Some(result) = self.scripted(command) {
                return result;
            }
            match &self.passthrough {
                Some(shell) => shell.output(command).await,
                None => Ok(CommandOutput::default()),
            }
        }

        async fn stream(&self, command: &str, label: &str) -> Result<CommandOutput> {
            self.record(command);
            if let Some(result) = self.scripted(command) {
                return result;
            }
            match &self.passthrough {
                Some(shell) => shell.stream(command, label).await,
                None => Ok(CommandOutput::default()),
            }
        }
    }
}
