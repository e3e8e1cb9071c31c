//! Test execution backends.
//!
//! The scheduler only needs one capability: run a named test once under a
//! given [`ExecutionContext`] and report how it went. Backends decide how the
//! selection reaches the program under test and how coverage comes back.

use crate::coverage::read_coverage_file;
use crate::model::TestCase;
use crate::selector::{ExecutionContext, MutantSelection};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

/// Environment variable carrying the raw selection (`-1`, `0` or a mutant id).
pub const MUTANT_ENV: &str = "KILLMAP_MUTANT";
/// Environment variable naming the file a coverage run appends covered ids to.
pub const COVERAGE_FILE_ENV: &str = "KILLMAP_COVERAGE_FILE";

/// Signal reported by one test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub timed_out: bool,
    pub crashed: bool,
}

impl ExecutionResult {
    pub fn passed() -> Self {
        Self::from_success(true)
    }

    pub fn failed() -> Self {
        Self::from_success(false)
    }

    pub fn from_success(success: bool) -> Self {
        Self {
            success,
            timed_out: false,
            crashed: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            success: false,
            timed_out: true,
            crashed: false,
        }
    }

    pub fn crashed() -> Self {
        Self {
            success: false,
            timed_out: false,
            crashed: true,
        }
    }

    /// True when the run did not terminate normally.
    pub fn is_abnormal(&self) -> bool {
        self.timed_out || self.crashed
    }

    pub fn describe(&self) -> &'static str {
        if self.timed_out {
            "timed out"
        } else if self.crashed {
            "crashed"
        } else if self.success {
            "passed"
        } else {
            "failed"
        }
    }
}

/// A backend able to run one test under one mutant selection.
pub trait TestExecutor: Send + Sync {
    /// Runs `test` once. Coverage observed during a coverage run is reported
    /// through `context`. The returned future may be dropped before it
    /// completes when the run exceeds its time budget.
    fn run(&self, test: &TestCase, context: ExecutionContext) -> BoxFuture<'static, ExecutionResult>;

    /// Whether concurrent runs are independent of each other, i.e. no state
    /// is shared between executions outside of their contexts.
    fn is_isolated(&self) -> bool {
        false
    }
}

impl<E: TestExecutor + ?Sized> TestExecutor for Arc<E> {
    fn run(&self, test: &TestCase, context: ExecutionContext) -> BoxFuture<'static, ExecutionResult> {
        (**self).run(test, context)
    }

    fn is_isolated(&self) -> bool {
        (**self).is_isolated()
    }
}

/// Runs tests in-process through a synchronous closure.
///
/// The closure runs on tokio's blocking pool; a panic counts as a crash. A
/// closure that never returns keeps its blocking thread busy after the
/// scheduler has given up on it, so hang-prone mutants belong in
/// [`ShellExecutor`].
pub struct FnExecutor<F> {
    body: Arc<F>,
}

impl<F> FnExecutor<F>
where
    F: Fn(&TestCase, &ExecutionContext) -> ExecutionResult + Send + Sync + 'static,
{
    pub fn new(body: F) -> Self {
        Self { body: Arc::new(body) }
    }
}

impl<F> TestExecutor for FnExecutor<F>
where
    F: Fn(&TestCase, &ExecutionContext) -> ExecutionResult + Send + Sync + 'static,
{
    fn run(&self, test: &TestCase, context: ExecutionContext) -> BoxFuture<'static, ExecutionResult> {
        let body = Arc::clone(&self.body);
        let test = test.clone();
        async move {
            let name = test.canonical_name();
            match tokio::task::spawn_blocking(move || (*body)(&test, &context)).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(test = %name, error = %err, "test body panicked");
                    ExecutionResult::crashed()
                }
            }
        }
        .boxed()
    }
}

/// Runs each test as a shell command.
///
/// The command template may use `{test}` (canonical name), `{class}` and
/// `{method}`. The selection is exported as [`MUTANT_ENV`]; coverage runs
/// also get [`COVERAGE_FILE_ENV`] pointing at a fresh file the instrumented
/// program writes covered ids into, one id or `from-to` range per line.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    command: String,
    working_dir: Option<PathBuf>,
}

impl ShellExecutor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn render(&self, test: &TestCase) -> String {
        self.command
            .replace("{test}", &test.canonical_name())
            .replace("{class}", test.class())
            .replace("{method}", test.method())
    }
}

impl TestExecutor for ShellExecutor {
    fn run(&self, test: &TestCase, context: ExecutionContext) -> BoxFuture<'static, ExecutionResult> {
        let command = self.render(test);
        let working_dir = self.working_dir.clone();
        async move { run_shell(command, working_dir, context).await }.boxed()
    }

    fn is_isolated(&self) -> bool {
        true
    }
}

/// Kills the process group of a spawned test command when dropped before
/// [`disarm`](ProcessGroupGuard::disarm). A run dropped on timeout takes the
/// command's descendants down with it, not only the shell.
struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(pid) = self.pid.take() else {
            return;
        };
        debug!(pid, "killing process group of abandoned run");

        #[cfg(unix)]
        let group = format!("-{}", pid);
        #[cfg(unix)]
        let status = std::process::Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        #[cfg(not(unix))]
        let pid_arg = pid.to_string();
        #[cfg(not(unix))]
        let status = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", pid_arg.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        if let Err(err) = status {
            warn!(pid, error = %err, "could not kill process group");
        }
    }
}

/// Maps an exit status to an execution result. Termination by a signal, a
/// shell reporting one (128 + signo) and negative Windows exception codes
/// are crashes.
fn status_result(status: ExitStatus) -> ExecutionResult {
    match status.code() {
        None => ExecutionResult::crashed(),
        #[cfg(unix)]
        Some(code) if code >= 128 => ExecutionResult::crashed(),
        Some(code) if code < 0 => ExecutionResult::crashed(),
        Some(_) => ExecutionResult::from_success(status.success()),
    }
}

async fn run_shell(
    command: String,
    working_dir: Option<PathBuf>,
    context: ExecutionContext,
) -> ExecutionResult {
    let selection = context.selection();

    let coverage_file = if selection == MutantSelection::Coverage {
        match NamedTempFile::new() {
            Ok(file) => Some(file),
            Err(err) => {
                warn!(error = %err, "could not create coverage file");
                return ExecutionResult::crashed();
            }
        }
    } else {
        None
    };

    let (shell, shell_arg) = if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    };

    let mut std_cmd = std::process::Command::new(shell);
    std_cmd
        .arg(shell_arg)
        .arg(&command)
        .env(MUTANT_ENV, selection.as_raw().to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group, so a timed-out run can be killed with its children.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        std_cmd.process_group(0);
    }
    if let Some(file) = &coverage_file {
        std_cmd.env(COVERAGE_FILE_ENV, file.path());
    }
    if let Some(dir) = &working_dir {
        std_cmd.current_dir(dir);
    }

    let mut cmd = TokioCommand::from(std_cmd);
    cmd.kill_on_drop(true);

    debug!(%command, %selection, "executing");

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(%command, error = %err, "command execution failed");
            return ExecutionResult::crashed();
        }
    };
    let mut group = ProcessGroupGuard::new(child.id());

    let output = match child.wait_with_output().await {
        Ok(output) => output,
        Err(err) => {
            warn!(%command, error = %err, "command execution failed");
            return ExecutionResult::crashed();
        }
    };
    group.disarm();

    if !output.stderr.is_empty() {
        debug!(stderr = %String::from_utf8_lossy(&output.stderr), "command stderr");
    }

    if let Some(file) = &coverage_file {
        match read_coverage_file(file.path()) {
            Ok(report) => {
                for rejected in &report.rejected {
                    warn!(%command, "skipping coverage entry: {}", rejected);
                }
                for mutant in report.covered {
                    context.record_covered(mutant);
                }
            }
            Err(err) => {
                // Without coverage every mutant would pass as uncovered.
                warn!(%command, error = %err, "unreadable coverage file; counting the run as crashed");
                return ExecutionResult::crashed();
            }
        }
    }

    status_result(output.status)
}
