use crate::command::ExitCode;
use crate::executor::{StageError, StageLaunch};
use nix::errno::Errno;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Lifecycle of one stage's process.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProcessState {
    Running,
    Completed(ExitCode),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Process {
    pub pid: Pid,
    pub state: ProcessState,
}

/// A background pipeline the interpreter did not wait for.
#[derive(Debug)]
pub struct Job {
    pub id: usize,
    pub command_line: String,
    pub processes: Vec<Process>,
}

impl Job {
    pub fn is_completed(&self) -> bool {
        self.processes
            .iter()
            .all(|pr| matches!(pr.state, ProcessState::Completed(_)))
    }

    /// Status of the last stage, once every stage has completed.
    pub fn status(&self) -> Option<ExitCode> {
        if !self.is_completed() {
            return None;
        }
        match self.processes.last()?.state {
            ProcessState::Completed(code) => Some(code),
            ProcessState::Running => None,
        }
    }
}

/// Outcome of a foreground pipeline, one status per stage in stage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    pub exit_statuses: Vec<ExitCode>,
    /// The first stage that failed to start, if any.
    pub spawn_error: Option<StageError>,
}

impl PipelineResult {
    /// Status of the pipeline as a whole: the last stage's.
    pub fn status(&self) -> ExitCode {
        self.exit_statuses.last().copied().unwrap_or(0)
    }
}

/// Background job that finished since the last [`JobController::reap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedJob {
    pub id: usize,
    pub command_line: String,
    pub status: ExitCode,
}

/// Map a terminal wait status to a shell exit code.
fn exit_code(status: WaitStatus) -> Option<ExitCode> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}

/// System call wrapper retrying on EINTR.
fn syscall<F, T>(f: F) -> nix::Result<T>
where
    F: Fn() -> nix::Result<T>,
{
    loop {
        match f() {
            Err(Errno::EINTR) => (),
            result => return result,
        }
    }
}

/// Block until `pid` terminates.
fn wait_for(pid: Pid) -> ExitCode {
    loop {
        match syscall(|| wait::waitpid(pid, None)) {
            Ok(status) => {
                if let Some(code) = exit_code(status) {
                    return code;
                }
            }
            Err(e) => {
                tracing::error!("waitpid({}) failed: {}", pid, e);
                return 1;
            }
        }
    }
}

/// Waits for foreground pipelines and keeps track of background ones.
///
/// Every wait targets a specific pid, so waiting for a foreground pipeline
/// never consumes the status of a background child.
#[derive(Debug, Default)]
pub struct JobController {
    jobs: Vec<Job>,
    next_id: usize,
}

impl JobController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every started stage terminates and collect statuses in stage order.
    pub fn wait_foreground(&mut self, launches: Vec<StageLaunch>) -> PipelineResult {
        let mut exit_statuses = Vec::with_capacity(launches.len());
        let mut spawn_error = None;

        for launch in launches {
            match launch {
                StageLaunch::Running(pid) => exit_statuses.push(wait_for(pid)),
                StageLaunch::Failed(e) => {
                    exit_statuses.push(e.exit_code());
                    spawn_error.get_or_insert(e);
                }
            }
        }

        PipelineResult {
            exit_statuses,
            spawn_error,
        }
    }

    /// Register a background pipeline and return its job id without waiting.
    ///
    /// Returns `None` when no stage could be started.
    pub fn track_background(
        &mut self,
        command_line: impl Into<String>,
        launches: Vec<StageLaunch>,
    ) -> Option<&Job> {
        let processes: Vec<Process> = launches
            .into_iter()
            .filter_map(|launch| match launch {
                StageLaunch::Running(pid) => Some(Process {
                    pid,
                    state: ProcessState::Running,
                }),
                StageLaunch::Failed(_) => None,
            })
            .collect();
        if processes.is_empty() {
            return None;
        }

        self.next_id += 1;
        self.jobs.push(Job {
            id: self.next_id,
            command_line: command_line.into(),
            processes,
        });
        self.jobs.last()
    }

    /// Poll background processes without blocking and drop completed jobs.
    pub fn reap(&mut self) -> Vec<FinishedJob> {
        for job in &mut self.jobs {
            for pr in job.processes.iter_mut() {
                if pr.state != ProcessState::Running {
                    continue;
                }
                match syscall(|| wait::waitpid(pr.pid, Some(WaitPidFlag::WNOHANG))) {
                    Ok(status) => {
                        if let Some(code) = exit_code(status) {
                            pr.state = ProcessState::Completed(code);
                        }
                    }
                    Err(e) => {
                        // ECHILD: someone else reaped it, nothing left to wait for
                        tracing::error!("waitpid({}) failed: {}", pr.pid, e);
                        pr.state = ProcessState::Completed(1);
                    }
                }
            }
        }

        let mut finished = Vec::new();
        self.jobs.retain(|job| match job.status() {
            Some(status) => {
                finished.push(FinishedJob {
                    id: job.id,
                    command_line: job.command_line.clone(),
                    status,
                });
                false
            }
            None => true,
        });
        if self.jobs.is_empty() {
            self.next_id = 0;
        }
        finished
    }

    /// Background jobs that have not been reaped yet.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }
}
