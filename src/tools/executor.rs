//! Tool Executor
//!
//! This module is the execution engine. It validates a command, admits it
//! against the concurrency ceiling, spawns it without a shell, captures its
//! output, enforces the timeout and resource ceilings, and always returns a
//! single structured [`ExecutionResult`].
//!
//! # Termination
//!
//! Timeouts, resource-limit violations and registry shutdown all end a child
//! the same way: SIGTERM to its process group, then SIGKILL once the grace
//! window has passed. The result is produced by the one exit path that
//! observes the child's exit, never by the code that requested termination.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::environment::EnvironmentPolicy;
use super::error::{ErrorKind, ExecutionError};
use super::monitor::{self, LimitKind, MonitorConfig, MonitorHandle, ResourceViolation};
use super::options::ExecutionOptions;
use super::output::{self, OutputBuffer, SharedOutput};
use super::process;
use super::registry::{ActiveExecution, ProcessRegistry};
use super::timeout::{ExecutionTimeout, DEFAULT_GRACE};
use super::validator::{CommandValidationError, CommandValidator, RiskClass, SafeCommand};
use crate::metrics;

/// Upper bound on waiting for output readers once the child has exited
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Execution id, shared with logs and the active-execution listing
    pub id: Option<String>,

    /// Whether the command exited with code 0
    pub success: bool,

    /// Exit code (None if the process was killed or never started)
    pub exit_code: Option<i32>,

    /// Captured standard output (capped)
    pub stdout: String,

    /// Captured standard error (capped)
    pub stderr: String,

    /// Human-readable failure reason
    pub error: Option<String>,

    pub error_kind: Option<ErrorKind>,

    /// Set for validation rejections only
    pub risk_class: Option<RiskClass>,

    /// Set for resource-limit terminations only
    pub limit_exceeded: Option<LimitKind>,

    /// Whether any captured output was dropped at the cap
    pub truncated: bool,

    pub pid: Option<u32>,

    /// Wall-clock time from the call to the result, in milliseconds
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// Create a result for a call that never produced a running process
    fn rejected(id: &str, error: &ExecutionError, execution_time_ms: u64) -> Self {
        Self {
            id: Some(id.to_string()),
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            risk_class: error.risk_class(),
            limit_exceeded: limit_of(error),
            truncated: false,
            pid: None,
            execution_time_ms,
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match (&self.error_kind, self.success) {
            (_, true) => format!(
                "Success (exit code: {:?}, {}ms, {} bytes output)",
                self.exit_code,
                self.execution_time_ms,
                self.stdout.len()
            ),
            (Some(ErrorKind::Timeout), _) => format!("Timeout after {}ms", self.execution_time_ms),
            (Some(kind), _) => format!(
                "Failed [{}] (exit code: {:?}, {}ms): {}",
                kind,
                self.exit_code,
                self.execution_time_ms,
                self.error.as_deref().unwrap_or("unknown error")
            ),
            (None, false) => format!(
                "Failed (exit code: {:?}, {}ms)",
                self.exit_code, self.execution_time_ms
            ),
        }
    }
}

fn limit_of(error: &ExecutionError) -> Option<LimitKind> {
    match error {
        ExecutionError::ResourceLimit(violation) => Some(violation.limit),
        _ => None,
    }
}

/// Configuration for tool execution
///
/// Per-call behaviour lives in [`ExecutionOptions`]; this holds what is fixed
/// for the lifetime of the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Time between SIGTERM and SIGKILL (default: 2 seconds)
    pub grace: Duration,

    /// Resource sampling cadence
    pub monitor: MonitorConfig,

    /// Restricted environment policy
    pub environment: EnvironmentPolicy,

    /// Options used by callers that do not bring their own
    pub default_options: ExecutionOptions,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
            monitor: MonitorConfig::default(),
            environment: EnvironmentPolicy::default(),
            default_options: ExecutionOptions::default(),
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor config with a custom grace window
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Create a new executor config with a custom monitor cadence
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentPolicy) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_default_options(mut self, options: ExecutionOptions) -> Self {
        self.default_options = options;
        self
    }
}

/// Tool executor for secure subprocess execution
///
/// # Security
///
/// This executor implements secure subprocess execution by:
/// 1. Spawning the validated, resolved program path directly (never a shell)
/// 2. Validating commands against a whitelist before anything is spawned
/// 3. Enforcing a global concurrency ceiling through the process registry
/// 4. Running children in their own process group with a restricted environment
/// 5. Enforcing timeouts and resource limits with a two-phase kill
/// 6. Capping captured output to prevent memory exhaustion
///
/// Clones share the same registry and spawn counter.
///
/// # Example
///
/// ```no_run
/// use toolguard::tools::{ExecutionOptions, ToolExecutor};
///
/// #[tokio::main]
/// async fn main() {
///     let executor = ToolExecutor::new();
///
///     let result = executor
///         .execute("echo", &["hello"], &ExecutionOptions::default())
///         .await;
///     assert!(result.success);
///     assert_eq!(result.stdout, "hello\n");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    /// Command validator
    validator: Arc<CommandValidator>,

    /// Running processes and admission control
    registry: Arc<ProcessRegistry>,

    /// Executor configuration
    config: ExecutorConfig,

    /// `nice` binary used for niceness > 0, resolved once
    nice_program: Option<PathBuf>,

    /// Number of spawn attempts made
    spawn_count: Arc<AtomicU64>,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor {
    /// Create a new tool executor with default configuration
    pub fn new() -> Self {
        Self::from_parts(CommandValidator::new(), ExecutorConfig::default())
    }

    /// Create a new tool executor with custom configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self::from_parts(CommandValidator::new(), config)
    }

    /// Create a new tool executor with custom validator
    pub fn with_validator(validator: CommandValidator) -> Self {
        Self::from_parts(validator, ExecutorConfig::default())
    }

    /// Create a new tool executor from a validator and configuration
    pub fn from_parts(validator: CommandValidator, config: ExecutorConfig) -> Self {
        Self {
            validator: Arc::new(validator),
            registry: Arc::new(ProcessRegistry::new()),
            config,
            nice_program: which::which("nice").ok(),
            spawn_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Execute with the configured default options
    pub async fn execute_default<S: AsRef<str>>(&self, command: &str, args: &[S]) -> ExecutionResult {
        let options = self.config.default_options.clone();
        self.execute(command, args, &options).await
    }

    /// Execute a command and return the result
    ///
    /// # Arguments
    ///
    /// * `command` - Executable name or path (e.g., `"nmap"`)
    /// * `args` - Arguments, passed to the program as-is
    /// * `options` - Per-call limits and capture settings
    ///
    /// # Returns
    ///
    /// Always returns an `ExecutionResult`. Rejections, spawn failures,
    /// timeouts, limit violations and non-zero exits are reported through
    /// `success`, `error` and `error_kind`.
    pub async fn execute<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
        options: &ExecutionOptions,
    ) -> ExecutionResult {
        let id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();

        info!(
            execution_id = %id,
            program = %command,
            args = args.len(),
            "Executing command"
        );

        let result = match self.prepare(command, args, options) {
            Ok(prepared) => self.run(&id, prepared, options, start).await,
            Err(error) => {
                self.note_rejection(&id, &error);
                ExecutionResult::rejected(&id, &error, elapsed_ms(start))
            }
        };

        let outcome = match result.error_kind {
            None if result.success => "success",
            None => "failure",
            Some(kind) => kind.as_str(),
        };
        metrics::record_execution(outcome, start.elapsed().as_secs_f64());

        if result.success {
            info!(execution_id = %id, "{}", result.summary());
        } else {
            warn!(execution_id = %id, "{}", result.summary());
        }
        result
    }

    /// Validate a command without running it
    pub fn validate_only<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
    ) -> Result<SafeCommand, CommandValidationError> {
        self.validator.validate(command, args)
    }

    /// Validation and admission; nothing is spawned here
    fn prepare<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
        options: &ExecutionOptions,
    ) -> Result<Prepared, ExecutionError> {
        options.validate()?;
        let safe = self.validator.validate(command, args)?;
        let admission = self.registry.try_admit(options.max_concurrent_processes)?;
        Ok(Prepared { safe, admission })
    }

    fn note_rejection(&self, id: &str, error: &ExecutionError) {
        match error {
            ExecutionError::Validation(err) => {
                let risk = err.risk_class();
                metrics::VALIDATION_REJECTIONS_TOTAL
                    .with_label_values(&[risk.as_str()])
                    .inc();
                warn!(execution_id = %id, risk = %risk, "Command rejected: {}", err);
            }
            ExecutionError::Capacity { .. } | ExecutionError::ShuttingDown => {
                metrics::CAPACITY_REJECTIONS_TOTAL.inc();
                warn!(execution_id = %id, "Execution refused: {}", error);
            }
            _ => warn!(execution_id = %id, "Execution refused: {}", error),
        }
    }

    /// Build the OS command for a validated invocation
    fn build_command(
        &self,
        safe: &SafeCommand,
        options: &ExecutionOptions,
    ) -> Result<TokioCommand, ExecutionError> {
        let mut command = if options.niceness > 0 && cfg!(unix) {
            let nice = self.nice_program.as_ref().ok_or_else(|| ExecutionError::Spawn {
                program: "nice".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "nice is required for niceness > 0",
                ),
            })?;
            let mut command = TokioCommand::new(nice);
            command
                .arg("-n")
                .arg(options.niceness.to_string())
                .arg(&safe.program);
            command
        } else {
            TokioCommand::new(&safe.program)
        };

        command
            .args(&safe.args)
            .stdin(Stdio::null())
            .stdout(capture(options.capture_stdout))
            .stderr(capture(options.capture_stderr))
            .kill_on_drop(true);
        process::isolate_process_group(&mut command);

        if let Some(dir) = &options.working_directory {
            command.current_dir(dir);
        }

        if options.restricted_environment {
            command.env_clear();
            command.envs(self.config.environment.build(std::env::vars_os()));
        }
        command.envs(&options.extra_env);

        Ok(command)
    }

    /// Spawn, supervise and collect one admitted command
    async fn run(
        &self,
        id: &str,
        prepared: Prepared,
        options: &ExecutionOptions,
        start: Instant,
    ) -> ExecutionResult {
        let Prepared { safe, admission } = prepared;
        let label = program_label(&safe.program);

        let mut command = match self.build_command(&safe, options) {
            Ok(command) => command,
            Err(error) => {
                metrics::SPAWN_ERRORS_TOTAL.inc();
                return ExecutionResult::rejected(id, &error, elapsed_ms(start));
            }
        };

        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        metrics::PROCESSES_SPAWNED_TOTAL.inc();

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                metrics::SPAWN_ERRORS_TOTAL.inc();
                let error = ExecutionError::Spawn {
                    program: label,
                    source,
                };
                warn!(execution_id = %id, "{}", error);
                return ExecutionResult::rejected(id, &error, elapsed_ms(start));
            }
        };

        // `id()` is only None once the child has been reaped
        let pid = child.id().unwrap_or(0);
        let (registration, shutdown_rx) = admission.register(id, pid, label.as_str());
        debug!(execution_id = %id, pid, program = %label, "Spawned managed process");

        let mut supervision = Supervision {
            pid,
            timeout: options.timeout().with_grace(self.config.grace),
            start,
            shutdown_rx,
            shutdown_open: true,
            reason: None,
            kill_at: None,
        };

        let collected = if options.uses_streaming() {
            let monitor = if options.resource_limits().is_unlimited() {
                None
            } else {
                Some(monitor::attach(pid, options.resource_limits(), self.config.monitor))
            };
            supervision
                .supervise(child, monitor, options.max_output_bytes)
                .await
        } else {
            // Buffer everything, cap once the child is gone
            let mut collected = supervision.supervise(child, None, usize::MAX).await;
            collected.stdout = collected.stdout.capped(options.max_output_bytes);
            collected.stderr = collected.stderr.capped(options.max_output_bytes);
            collected
        };
        drop(registration);

        finish(id, pid, collected, supervision.reason, elapsed_ms(start))
    }

    /// Snapshot of running executions
    pub fn list_active_executions(&self) -> Vec<ActiveExecution> {
        self.registry.list_active()
    }

    /// Close admission and terminate every running execution
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }

    /// Terminate every running execution but keep accepting new ones
    pub fn kill_all(&self) -> usize {
        self.registry.kill_all()
    }

    /// Number of spawn attempts made by this executor (and its clones)
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.load(Ordering::SeqCst)
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Get a reference to the validator
    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    /// Get a reference to the config
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

/// A validated command holding an admission slot
struct Prepared {
    safe: SafeCommand,
    admission: super::registry::AdmissionToken,
}

/// What came back from a supervised child
struct Collected {
    status: Result<ExitStatus, std::io::Error>,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
}

/// Drain task feeding a capture buffer the executor can read at any time
struct Reader {
    sink: SharedOutput,
    task: JoinHandle<()>,
}

impl Reader {
    fn spawn<R>(stream: R, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let sink = SharedOutput::new(cap);
        let task = tokio::spawn(output::drain(stream, sink.clone()));
        Self { sink, task }
    }

    /// Wait a bounded time for EOF, then keep whatever was captured
    async fn finish(mut self) -> OutputBuffer {
        match time::timeout(READER_DRAIN_TIMEOUT, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Output reader failed: {}", e),
            Err(_) => {
                warn!("Output still open after process exit, keeping partial capture");
                self.task.abort();
            }
        }
        self.sink.take()
    }
}

async fn finish_reader(reader: Option<Reader>) -> OutputBuffer {
    match reader {
        Some(reader) => reader.finish().await,
        None => OutputBuffer::default(),
    }
}

/// Timeout, violation and shutdown handling for one child
struct Supervision {
    pid: u32,
    timeout: ExecutionTimeout,
    start: Instant,
    shutdown_rx: oneshot::Receiver<()>,
    shutdown_open: bool,
    reason: Option<ExecutionError>,
    kill_at: Option<Instant>,
}

impl Supervision {
    fn terminating(&self) -> bool {
        self.reason.is_some()
    }

    /// First phase of termination: SIGTERM and arm the kill timer
    fn request_termination(&mut self, reason: ExecutionError) {
        if self.reason.is_some() {
            return;
        }
        info!(pid = self.pid, "Terminating process: {}", reason);
        if let ExecutionError::ResourceLimit(violation) = &reason {
            metrics::RESOURCE_VIOLATIONS_TOTAL
                .with_label_values(&[violation.limit.as_str()])
                .inc();
        }
        process::terminate_group(self.pid);
        self.reason = Some(reason);
        self.kill_at = Some(Instant::now() + self.timeout.grace());
    }

    /// A shutdown notice can race the exit it caused; attribute the exit to it
    fn absorb_pending_shutdown(&mut self, exited_cleanly: bool) {
        if self.reason.is_some() || !self.shutdown_open || exited_cleanly {
            return;
        }
        if self.shutdown_rx.try_recv().is_ok() {
            self.shutdown_open = false;
            self.reason = Some(ExecutionError::Shutdown);
        }
    }

    fn on_shutdown_signal(&mut self, received: Result<(), oneshot::error::RecvError>) {
        self.shutdown_open = false;
        if received.is_ok() {
            self.request_termination(ExecutionError::Shutdown);
        }
    }

    /// Race the child's exit against timeout, limit violations and shutdown
    ///
    /// `reader_cap` bounds what the drain tasks keep per stream.
    async fn supervise(
        &mut self,
        mut child: Child,
        mut monitor: Option<MonitorHandle>,
        reader_cap: usize,
    ) -> Collected {
        let stdout = child.stdout.take().map(|out| Reader::spawn(out, reader_cap));
        let stderr = child.stderr.take().map(|err| Reader::spawn(err, reader_cap));

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = self.timeout.expired(self.start), if !self.terminating() => {
                    self.request_termination(ExecutionError::Timeout(self.timeout.as_millis()));
                }
                violation = next_violation(&mut monitor), if monitor.is_some() && !self.terminating() => {
                    match violation {
                        Some(violation) => {
                            self.request_termination(ExecutionError::ResourceLimit(violation))
                        }
                        None => monitor = None,
                    }
                }
                received = &mut self.shutdown_rx, if self.shutdown_open && !self.terminating() => {
                    self.on_shutdown_signal(received);
                }
                _ = sleep_until(self.kill_at), if self.kill_at.is_some() => {
                    warn!(pid = self.pid, "Grace window expired, killing process group");
                    process::kill_group(self.pid);
                    let _ = child.start_kill();
                    self.kill_at = None;
                }
            }
        };

        // Background children the tool left in its group would hold the pipes open
        process::kill_group(self.pid);

        if let Some(monitor) = monitor.take() {
            monitor.detach();
        }
        self.absorb_pending_shutdown(matches!(&status, Ok(s) if s.success()));

        let (stdout, stderr) = tokio::join!(finish_reader(stdout), finish_reader(stderr));
        Collected {
            status,
            stdout,
            stderr,
        }
    }
}

/// Turn what was collected into the single result for this call
fn finish(
    id: &str,
    pid: u32,
    collected: Collected,
    reason: Option<ExecutionError>,
    execution_time_ms: u64,
) -> ExecutionResult {
    let truncated = collected.stdout.truncated() || collected.stderr.truncated();
    let status = collected.status;

    let (exit_code, error) = match (reason, status) {
        (Some(reason), _) => (None, Some(reason)),
        (None, Err(e)) => (None, Some(ExecutionError::Wait(e))),
        (None, Ok(status)) if status.success() => (status.code(), None),
        (None, Ok(status)) => match status.code() {
            Some(code) => (Some(code), Some(ExecutionError::Exit(code))),
            None => (
                None,
                Some(ExecutionError::Signaled(
                    process::terminating_signal(&status).unwrap_or(-1),
                )),
            ),
        },
    };

    ExecutionResult {
        id: Some(id.to_string()),
        success: error.is_none(),
        exit_code,
        stdout: collected.stdout.into_string(),
        stderr: collected.stderr.into_string(),
        error: error.as_ref().map(|e| e.to_string()),
        error_kind: error.as_ref().map(|e| e.kind()),
        risk_class: None,
        limit_exceeded: error.as_ref().and_then(limit_of),
        truncated,
        pid: Some(pid),
        execution_time_ms,
    }
}

async fn next_violation(monitor: &mut Option<MonitorHandle>) -> Option<ResourceViolation> {
    match monitor {
        Some(monitor) => monitor.violation().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn capture(enabled: bool) -> Stdio {
    if enabled {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

fn program_label(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
