//! Launching a parsed [`Pipeline`] as a chain of child processes.
//!
//! Every stage gets its own `fork`; adjacent stages are connected with
//! pipes and the outer ends may be redirected to files. Stages fail
//! independently: a stage that cannot be resolved or started is reported
//! and skipped while its siblings still run.

use crate::command::{EXIT_CANNOT_EXECUTE, EXIT_NOT_FOUND, ExitCode};
use crate::parser::{Pipeline, RedirectMode, Stage};
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{self, ForkResult, Pid};
use std::borrow::Cow;
use std::convert::Infallible;
use std::ffi::{CString, OsStr};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Directories searched when `PATH` is not set.
pub const DEFAULT_SEARCH_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Ordered list of directories searched for programs, like `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Parse a colon-separated list such as the value of `PATH`.
    pub fn parse(value: impl AsRef<OsStr>) -> Self {
        Self::new(
            std::env::split_paths(value.as_ref())
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect(),
        )
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Resolve a program name the way a typical shell would.
    ///
    /// Behavior:
    /// - Absolute path: returns it if it is an executable file.
    /// - Relative with a separator (e.g., `bin/sh`, `./foo`): checked against the current dir.
    /// - Single component: each directory of the search path in order, first match wins.
    /// - Empty name: `None`.
    pub fn resolve<'a>(&self, program: &'a str) -> Option<Cow<'a, Path>> {
        if program.is_empty() {
            return None;
        }
        let path = Path::new(program);
        if program.contains('/') {
            return is_executable(path).then_some(Cow::Borrowed(path));
        }
        self.dirs
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| is_executable(candidate))
            .map(Cow::Owned)
    }
}

impl Default for SearchPath {
    fn default() -> Self {
        Self::parse(DEFAULT_SEARCH_PATH)
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Why a single stage could not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The program is not in the search path.
    NotFound(String),
    /// A program name or argument contains a NUL byte.
    InvalidArgument(String),
    /// Creating the pipes between stages failed; nothing was started.
    Pipe(Errno),
    /// `fork` failed for this stage.
    Fork(Errno),
    /// A redirection file could not be opened (reported by the child).
    Redirect { path: String, reason: String },
    /// Duplicating a descriptor onto stdin or stdout failed (reported by the child).
    Wire(Errno),
    /// `execv` itself failed (reported by the child).
    Exec(Errno),
}

impl StageError {
    /// Status recorded for a stage that failed this way.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            StageError::NotFound(_) => EXIT_NOT_FOUND,
            StageError::Redirect { .. } => 1,
            _ => EXIT_CANNOT_EXECUTE,
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::NotFound(_) => write!(f, "command not found"),
            StageError::InvalidArgument(arg) => write!(f, "argument contains a NUL byte: {:?}", arg),
            StageError::Pipe(e) => write!(f, "cannot create pipe: {}", e.desc()),
            StageError::Fork(e) => write!(f, "cannot fork: {}", e.desc()),
            StageError::Redirect { path, reason } => write!(f, "{}: {}", path, reason),
            StageError::Wire(e) => write!(f, "cannot redirect: {}", e.desc()),
            StageError::Exec(e) => write!(f, "{}", e.desc()),
        }
    }
}

impl std::error::Error for StageError {}

/// What happened to one stage after [`Executor::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageLaunch {
    /// A child process was forked for the stage.
    Running(Pid),
    /// The stage never started.
    Failed(StageError),
}

/// Everything a child needs, prepared before forking.
struct PreparedStage {
    path: CString,
    argv: Vec<CString>,
}

fn prepare(stage: &Stage, search_path: &SearchPath) -> Result<PreparedStage, StageError> {
    let resolved = search_path
        .resolve(&stage.program)
        .ok_or_else(|| StageError::NotFound(stage.program.clone()))?;

    let to_cstring = |s: &str| CString::new(s).map_err(|_| StageError::InvalidArgument(s.to_string()));
    let path = CString::new(resolved.as_os_str().as_encoded_bytes())
        .map_err(|_| StageError::InvalidArgument(stage.program.clone()))?;
    let argv = std::iter::once(stage.program.as_str())
        .chain(stage.arguments.iter().map(String::as_str))
        .map(to_cstring)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PreparedStage { path, argv })
}

/// Launches pipelines by searching programs in a [`SearchPath`].
#[derive(Debug, Clone)]
pub struct Executor {
    search_path: SearchPath,
    shell_name: String,
}

impl Executor {
    pub fn new(search_path: SearchPath, shell_name: impl Into<String>) -> Self {
        Self {
            search_path,
            shell_name: shell_name.into(),
        }
    }

    fn report(&self, program: &str, error: &StageError) {
        eprintln!("-{}: {}: {}", self.shell_name, program, error);
    }

    /// Fork one process per stage, wired together with pipes.
    ///
    /// Returns one [`StageLaunch`] per stage, in stage order. Only a failure to
    /// allocate the pipes aborts the whole pipeline; it happens before any fork.
    pub fn execute(&self, pipeline: Pipeline) -> Result<Vec<StageLaunch>, StageError> {
        let stages = &pipeline.stages;
        let last = stages.len().saturating_sub(1);

        let mut pipes: Vec<(OwnedFd, OwnedFd)> = (0..last)
            .map(|_| unistd::pipe().map_err(StageError::Pipe))
            .collect::<Result<_, _>>()?;

        for (i, stage) in stages.iter().enumerate() {
            if i > 0 && stage.redirect_in.is_some() {
                tracing::warn!("{}: input redirection ignored inside a pipeline", stage.program);
            }
            if i < last && stage.redirect_out.is_some() {
                tracing::warn!("{}: output redirection ignored inside a pipeline", stage.program);
            }
        }

        let _ = io::stdout().flush();

        let mut launches = Vec::with_capacity(stages.len());
        let mut group: Option<Pid> = None;

        for (i, stage) in stages.iter().enumerate() {
            let prepared = match prepare(stage, &self.search_path) {
                Ok(p) => p,
                Err(e) => {
                    self.report(&stage.program, &e);
                    launches.push(StageLaunch::Failed(e));
                    continue;
                }
            };

            let wiring = Wiring {
                stdin: if i > 0 { Some(pipes[i - 1].0.as_raw_fd()) } else { None },
                stdout: if i < last { Some(pipes[i].1.as_raw_fd()) } else { None },
                redirect_in: if i == 0 { stage.redirect_in.as_deref() } else { None },
                redirect_out: if i == last {
                    stage.redirect_out.as_ref().map(|r| (r.path.as_str(), r.mode))
                } else {
                    None
                },
                group: pipeline.background.then(|| group.unwrap_or(Pid::from_raw(0))),
            };

            // SAFETY: the interpreter is single-threaded; the child only wires
            // descriptors and execs, or exits through `_exit`.
            match unsafe { unistd::fork() } {
                Ok(ForkResult::Parent { child }) => {
                    if pipeline.background {
                        let leader = *group.get_or_insert(child);
                        let _ = unistd::setpgid(child, leader);
                    }
                    tracing::debug!("stage {} `{}` started as pid {}", i, stage.program, child);
                    launches.push(StageLaunch::Running(child));
                }
                Ok(ForkResult::Child) => {
                    let pipes = std::mem::take(&mut pipes);
                    let error = match run_child(&prepared, &wiring, pipes) {
                        Err(e) => e,
                        Ok(never) => match never {},
                    };
                    self.report(&stage.program, &error);
                    // SAFETY: leave the forked copy without running the parent's destructors.
                    unsafe { libc::_exit(error.exit_code()) }
                }
                Err(e) => {
                    let error = StageError::Fork(e);
                    self.report(&stage.program, &error);
                    launches.push(StageLaunch::Failed(error));
                }
            }
        }

        // parent's copies of every pipe end are closed here
        drop(pipes);
        Ok(launches)
    }
}

/// Descriptor plumbing for one child.
struct Wiring<'a> {
    stdin: Option<RawFd>,
    stdout: Option<RawFd>,
    redirect_in: Option<&'a str>,
    redirect_out: Option<(&'a str, RedirectMode)>,
    /// Process group to join, for background pipelines. Pid 0 starts a new one.
    group: Option<Pid>,
}

fn open_redirect(path: &str, mode: Option<RedirectMode>) -> Result<std::fs::File, StageError> {
    let mut options = OpenOptions::new();
    match mode {
        None => options.read(true),
        Some(RedirectMode::Truncate) => options.write(true).create(true).truncate(true).mode(0o644),
        Some(RedirectMode::Append) => options.append(true).create(true).mode(0o644),
    };
    options.open(path).map_err(|e| StageError::Redirect {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

fn dup_onto(fd: RawFd, target: RawFd) -> Result<(), StageError> {
    unistd::dup2(fd, target).map(drop).map_err(StageError::Wire)
}

/// Runs in the forked child. Only returns on failure.
fn run_child(
    prepared: &PreparedStage,
    wiring: &Wiring<'_>,
    pipes: Vec<(OwnedFd, OwnedFd)>,
) -> Result<Infallible, StageError> {
    // The interpreter ignores SIGINT and the Rust runtime ignores SIGPIPE;
    // ignored dispositions survive exec, so put both back.
    for sig in [Signal::SIGINT, Signal::SIGPIPE] {
        // SAFETY: restoring the default disposition installs no handler.
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }

    if let Some(group) = wiring.group {
        let _ = unistd::setpgid(Pid::from_raw(0), group);
    }

    if let Some(fd) = wiring.stdin {
        dup_onto(fd, libc::STDIN_FILENO)?;
    }
    if let Some(fd) = wiring.stdout {
        dup_onto(fd, libc::STDOUT_FILENO)?;
    }
    drop(pipes);

    if let Some(path) = wiring.redirect_in {
        let file = open_redirect(path, None)?;
        dup_onto(file.as_raw_fd(), libc::STDIN_FILENO)?;
    }
    if let Some((path, mode)) = wiring.redirect_out {
        let file = open_redirect(path, Some(mode))?;
        dup_onto(file.as_raw_fd(), libc::STDOUT_FILENO)?;
    }

    match unistd::execv(&prepared.path, &prepared.argv) {
        Err(e) => Err(StageError::Exec(e)),
        Ok(never) => match never {},
    }
}
