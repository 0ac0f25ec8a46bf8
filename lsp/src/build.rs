//! Build invocation: picks the toolchain command and runs it.
//!
//! With a build descriptor under the workspace root the whole project is
//! cleaned and rebuilt, since includes and macros cross file boundaries.
//! Without one the document is assembled alone and the object discarded.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::{AbortHandle, JoinHandle};

use crate::types::CommandSpec;
use crate::workspace::{BuildMode, DocumentRef, Workspace};

/// Grace period for output readers once a step has exited or been killed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// Failure to run the toolchain itself, as opposed to the assembler
/// reporting errors (which is a normal, successful run).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{program} not found in PATH")]
    ToolNotFound {
        program: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to spawn {program} in {}", working_dir.display())]
    Spawn {
        program: String,
        working_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for {program}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

/// Outcome of one build invocation. Consumed by the parser, then dropped.
#[derive(Debug, Default)]
pub struct BuildResult {
    pub exit_succeeded: bool,
    /// Standard output, a newline, then standard error.
    pub combined_output: String,
    /// Set when the command could not be started or finished abnormally.
    pub tooling_error: Option<BuildError>,
}

/// One program invocation within a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub program: String,
    pub args: Vec<OsString>,
}

impl BuildStep {
    fn from_spec(spec: &CommandSpec) -> Self {
        Self {
            program: spec.command.clone(),
            args: spec.args.iter().map(OsString::from).collect(),
        }
    }

    fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }
}

/// The fully resolved command line for a build.
///
/// Steps run in order; a failing step stops the sequence, like `&&`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub mode: BuildMode,
    pub working_dir: PathBuf,
    pub steps: Vec<BuildStep>,
}

impl BuildCommand {
    /// Choose the command for `document`, checking the descriptor now.
    #[must_use]
    pub fn select(workspace: &Workspace, document: &DocumentRef) -> Self {
        let settings = workspace.settings();
        let mode = workspace.build_mode();
        let steps = match mode {
            BuildMode::Project => settings
                .project_build
                .iter()
                .map(BuildStep::from_spec)
                .collect(),
            BuildMode::SingleFile => {
                let mut step = BuildStep::from_spec(&settings.assembler);
                step.args.push(OsString::from("-o"));
                step.args.push(OsString::from(NULL_DEVICE));
                step.args.push(document.absolute_path().as_os_str().to_owned());
                vec![step]
            }
        };
        Self {
            mode,
            working_dir: workspace.root().to_path_buf(),
            steps,
        }
    }

    /// Human-readable form for logs, e.g. `make clean -s && make -s`.
    #[must_use]
    pub fn display(&self) -> String {
        self.steps
            .iter()
            .map(BuildStep::display)
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

/// Executes a [`BuildCommand`]. The seam between the pipeline and the OS.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, command: &BuildCommand) -> impl Future<Output = BuildResult> + Send;
}

/// Runs build steps as child processes, buffering all output.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

struct StepOutput {
    success: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Output read so far. Shared with the reader task so a step that never
/// closes its pipes still yields what it printed.
type OutputBuffer = Arc<Mutex<Vec<u8>>>;

fn take_buffer(buffer: &OutputBuffer) -> Vec<u8> {
    std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner))
}

async fn read_into<R: AsyncRead + Unpin>(mut reader: R, buffer: OutputBuffer) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&chunk[..n]),
            Err(e) => {
                tracing::debug!("Build output read error: {e}");
                break;
            }
        }
    }
}

/// Wait for the readers to hit EOF, but no longer than [`DRAIN_TIMEOUT`].
async fn drain(readers: Vec<JoinHandle<()>>) {
    let aborts: Vec<AbortHandle> = readers.iter().map(JoinHandle::abort_handle).collect();
    let joined = tokio::time::timeout(DRAIN_TIMEOUT, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;
    if joined.is_err() {
        tracing::debug!("Build output still open after exit, keeping what was read");
        for abort in aborts {
            abort.abort();
        }
    }
}

/// Owns a running step. The step leads its own process group on Unix, so
/// killing the group also takes down whatever it spawned (`make` -> `rgbasm`).
/// Dropping the guard kills the group.
struct StepGuard {
    child: Child,
    #[cfg(unix)]
    group: Option<libc::pid_t>,
}

impl StepGuard {
    fn new(child: Child) -> Self {
        Self {
            #[cfg(unix)]
            group: child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()),
            child,
        }
    }

    fn kill_group(&mut self) {
        #[cfg(unix)]
        if let Some(group) = self.group.take() {
            // SAFETY: killpg only sends a signal to the group this step leads.
            unsafe {
                libc::killpg(group, libc::SIGKILL);
            }
        }
        let _ = self.child.start_kill();
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        self.kill_group();
    }
}

impl ProcessRunner {
    async fn run_step(
        &self,
        step: &BuildStep,
        working_dir: &Path,
    ) -> Result<StepOutput, (BuildError, StepOutput)> {
        let empty = || StepOutput {
            success: false,
            stdout: Vec::new(),
            stderr: Vec::new(),
        };

        // Relative commands such as `./tools/check.sh` resolve against the
        // workspace root, not the server's own directory.
        let path_var = std::env::var_os("PATH");
        let resolved = match which::which_in(&step.program, path_var, working_dir) {
            Ok(path) => path,
            Err(source) => {
                let err = BuildError::ToolNotFound {
                    program: step.program.clone(),
                    source,
                };
                return Err((err, empty()));
            }
        };

        let mut cmd = Command::new(&resolved);
        cmd.args(&step.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = BuildError::Spawn {
                    program: step.program.clone(),
                    working_dir: working_dir.to_path_buf(),
                    source,
                };
                return Err((err, empty()));
            }
        };
        let mut guard = StepGuard::new(child);

        let stdout: OutputBuffer = Arc::default();
        let stderr: OutputBuffer = Arc::default();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = guard.child.stdout.take() {
            readers.push(tokio::spawn(read_into(out, Arc::clone(&stdout))));
        }
        if let Some(err) = guard.child.stderr.take() {
            readers.push(tokio::spawn(read_into(err, Arc::clone(&stderr))));
        }

        let waited = tokio::time::timeout(self.timeout, guard.child.wait()).await;
        // Anything the step left running goes with it, closing the pipes it
        // inherited.
        guard.kill_group();
        drain(readers).await;

        let output = StepOutput {
            success: matches!(&waited, Ok(Ok(status)) if status.success()),
            stdout: take_buffer(&stdout),
            stderr: take_buffer(&stderr),
        };

        match waited {
            Ok(Ok(_)) => Ok(output),
            Ok(Err(source)) => Err((
                BuildError::Wait {
                    program: step.program.clone(),
                    source,
                },
                output,
            )),
            Err(_) => {
                tracing::warn!(
                    program = %step.program,
                    "Build exceeded {:?}, killed",
                    self.timeout
                );
                Err((
                    BuildError::TimedOut {
                        program: step.program.clone(),
                        timeout: self.timeout,
                    },
                    output,
                ))
            }
        }
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &BuildCommand) -> BuildResult {
        tracing::debug!(
            cwd = %command.working_dir.display(),
            "Running build: {}",
            command.display()
        );

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_succeeded = true;
        let mut tooling_error = None;

        for step in &command.steps {
            let output = match self.run_step(step, &command.working_dir).await {
                Ok(output) => output,
                Err((err, output)) => {
                    tracing::error!("Error running command '{}': {err}", command.display());
                    tooling_error = Some(err);
                    output
                }
            };
            stdout.extend_from_slice(&output.stdout);
            stderr.extend_from_slice(&output.stderr);

            if !output.success {
                exit_succeeded = false;
                break;
            }
        }

        if tooling_error.is_none() && !exit_succeeded {
            tracing::debug!("Build exited with failure status (expected when errors exist)");
        }

        let mut combined_output = String::from_utf8_lossy(&stdout).into_owned();
        combined_output.push('\n');
        combined_output.push_str(&String::from_utf8_lossy(&stderr));

        BuildResult {
            exit_succeeded,
            combined_output,
            tooling_error,
        }
    }
}

/// Selects and runs the build for a document.
#[derive(Debug, Clone)]
pub struct BuildInvoker<R> {
    runner: R,
}

impl<R: CommandRunner> BuildInvoker<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub async fn invoke(&self, workspace: &Workspace, document: &DocumentRef) -> BuildResult {
        let command = BuildCommand::select(workspace, document);
        tracing::debug!(
            mode = ?command.mode,
            file = %document.relative_path().display(),
            "Selected build command"
        );
        self.runner.run(&command).await
    }
}
