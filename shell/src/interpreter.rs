use crate::builtin::default_builtins;
use crate::command::{CommandFactory, ExitCode};
use crate::config::Config;
use crate::env::Environment;
use crate::executor::{Executor, StageError, StageLaunch};
use crate::job::JobController;
use crate::line_reader::{LineReader, LineResult};
use crate::parser::{self, Stage};
use anyhow::{Context, Result};
use nix::sys::signal::{self, SigHandler, Signal};
use std::io::{self, Write};

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports the builtins defined in this crate.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// Result of processing one input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// The line was handled; keep reading.
    Success,
    /// `exit` was run; the loop should stop.
    ExitRequested,
    /// Some stage named a program that is neither a builtin nor in the search path.
    Unrecognized,
}

/// The interactive command interpreter.
///
/// Each line goes through the parser, then the builtin dispatcher, and only
/// then is forked by the [`Executor`] and awaited (or not) by the
/// [`JobController`].
///
/// Example
/// ```no_run
/// use shellington::{Config, Environment, Interpreter, ReturnCode};
/// let env = Environment::new();
/// let mut sh = Interpreter::new(Config::from_env(&env), env);
/// assert_eq!(sh.run_line("echo hello | wc -c"), ReturnCode::Success);
/// ```
pub struct Interpreter {
    env: Environment,
    builtins: Vec<Box<dyn CommandFactory>>,
    executor: Executor,
    jobs: JobController,
    shell_name: String,
    last_status: ExitCode,
}

impl Interpreter {
    pub fn new(config: Config, env: Environment) -> Self {
        Self {
            env,
            builtins: default_builtins(),
            executor: Executor::new(config.search_path, config.shell_name.clone()),
            jobs: JobController::new(),
            shell_name: config.shell_name,
            last_status: 0,
        }
    }

    /// Status of the last foreground pipeline or builtin.
    pub fn last_status(&self) -> ExitCode {
        self.last_status
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn jobs(&self) -> &JobController {
        &self.jobs
    }

    fn diagnostic(&self, command: &str, reason: impl std::fmt::Display) {
        eprintln!("-{}: {}: {}", self.shell_name, command, reason);
    }

    /// `<user>@<hostname>:<cwd> <shellname>$ `
    pub fn prompt(&self) -> String {
        let user = self.env.get_var("USER").unwrap_or_default();
        let host = nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "{}@{}:{} {}$ ",
            user,
            host,
            self.env.current_dir.display(),
            self.shell_name
        )
    }

    /// Announce background jobs that finished since the last call.
    fn report_finished_jobs(&mut self) {
        for job in self.jobs.reap() {
            if job.status == 0 {
                eprintln!("[{}] Done\t{}", job.id, job.command_line);
            } else {
                eprintln!("[{}] Exit {}\t{}", job.id, job.status, job.command_line);
            }
        }
    }

    fn run_builtin(&mut self, stage: &Stage) -> Option<ExitCode> {
        let args: Vec<&str> = stage.arguments.iter().map(String::as_str).collect();
        let cmd = self
            .builtins
            .iter()
            .find_map(|factory| factory.try_create(&stage.program, &args))?;

        let status = match cmd.execute(&mut io::stdout(), &mut self.env) {
            Ok(code) => code,
            Err(e) => {
                self.diagnostic(&stage.program, format!("{:#}", e));
                1
            }
        };
        Some(status)
    }

    /// Parse and run one line.
    pub fn run_line(&mut self, line: &str) -> ReturnCode {
        self.report_finished_jobs();

        let pipeline = match parser::parse(line) {
            Ok(p) => p,
            Err(e) => {
                self.diagnostic("syntax error", e);
                self.last_status = 2;
                return ReturnCode::Success;
            }
        };
        tracing::debug!("parsed: {:?}", pipeline);

        if pipeline.autocomplete_requested {
            tracing::debug!("completion requested for `{}`, line abandoned", pipeline);
            return ReturnCode::Success;
        }
        if pipeline.is_noop() {
            return ReturnCode::Success;
        }

        if let Some(status) = self.run_builtin(&pipeline.stages[0]) {
            if pipeline.stages.len() > 1 {
                tracing::warn!(
                    "`{}` is a builtin; the rest of the pipeline was dropped",
                    pipeline.stages[0].program
                );
            }
            self.last_status = status;
            return if self.env.should_exit {
                ReturnCode::ExitRequested
            } else {
                ReturnCode::Success
            };
        }

        let command_line = pipeline.to_string();
        let background = pipeline.background;

        let launches = match self.executor.execute(pipeline) {
            Ok(launches) => launches,
            Err(e) => {
                self.diagnostic(&command_line, &e);
                self.last_status = e.exit_code();
                return ReturnCode::Success;
            }
        };

        let unrecognized = launches
            .iter()
            .any(|l| matches!(l, StageLaunch::Failed(StageError::NotFound(_))));

        if background {
            if let Some(job) = self.jobs.track_background(command_line, launches) {
                let pids: Vec<String> = job.processes.iter().map(|p| p.pid.to_string()).collect();
                eprintln!("[{}] {}", job.id, pids.join(" "));
            }
            self.last_status = 0;
        } else {
            let result = self.jobs.wait_foreground(launches);
            tracing::debug!("statuses: {:?}", result.exit_statuses);
            self.last_status = result.status();
        }

        if unrecognized {
            ReturnCode::Unrecognized
        } else {
            ReturnCode::Success
        }
    }

    /// Read-eval loop over the terminal until `exit` or end of input.
    pub fn repl(&mut self) -> Result<()> {
        // SAFETY: ignoring a signal installs no handler; children reset it.
        unsafe { signal::signal(Signal::SIGINT, SigHandler::SigIgn) }
            .context("cannot ignore SIGINT")?;

        let mut reader = LineReader::from_terminal().context("cannot open stdin")?;
        let mut stdout = io::stdout();

        loop {
            self.report_finished_jobs();
            write!(stdout, "{}", self.prompt())?;
            stdout.flush()?;

            let line = match reader.read_line().context("cannot read input")? {
                LineResult::Line(line) => line,
                LineResult::AutocompleteRequested(partial) => {
                    writeln!(stdout)?;
                    format!("{}?", partial)
                }
                LineResult::EndOfInput => {
                    writeln!(stdout)?;
                    break;
                }
            };

            if self.run_line(&line) == ReturnCode::ExitRequested {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{lock_current_dir, make_unique_temp_dir};
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn interpreter() -> Interpreter {
        let env = Environment::new();
        Interpreter::new(Config::from_env(&env), env)
    }

    #[test]
    fn test_empty_line_is_noop() {
        let mut sh = interpreter();
        assert_eq!(sh.run_line(""), ReturnCode::Success);
        assert_eq!(sh.run_line("   \t "), ReturnCode::Success);
        assert_eq!(sh.last_status(), 0);
    }

    #[test]
    fn test_exit_requests_termination() {
        let mut sh = interpreter();
        assert_eq!(sh.run_line("exit"), ReturnCode::ExitRequested);
    }

    #[test]
    fn test_unknown_program_is_unrecognized() {
        let mut sh = interpreter();
        assert_eq!(
            sh.run_line("no_such_program_for_tests --flag"),
            ReturnCode::Unrecognized
        );
        assert_eq!(sh.last_status(), 127);
    }

    #[test]
    fn test_quoted_empty_program_is_not_found() {
        let mut sh = interpreter();
        assert_eq!(sh.run_line("\"\" x"), ReturnCode::Unrecognized);
        assert_eq!(sh.last_status(), 127);
        assert_eq!(sh.run_line("\"\""), ReturnCode::Success);
    }

    #[test]
    fn test_syntax_error_spawns_nothing() {
        let dir = make_unique_temp_dir("interp_syntax").unwrap();
        let out = dir.join("out.txt");

        let mut sh = interpreter();
        assert_eq!(
            sh.run_line(&format!("echo \"oops > {}", out.display())),
            ReturnCode::Success
        );
        assert_eq!(sh.last_status(), 2);
        assert!(!out.exists());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_autocomplete_abandons_line() {
        let dir = make_unique_temp_dir("interp_complete").unwrap();
        let out = dir.join("out.txt");

        let mut sh = interpreter();
        assert_eq!(
            sh.run_line(&format!("echo hi > {}?", out.display())),
            ReturnCode::Success
        );
        assert!(!out.exists());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_redirect_truncate_and_append() {
        let dir = make_unique_temp_dir("interp_redirect").unwrap();
        let out = dir.join("out.txt");

        let mut sh = interpreter();
        assert_eq!(
            sh.run_line(&format!("echo hello > {}", out.display())),
            ReturnCode::Success
        );
        assert_eq!(
            sh.run_line(&format!("echo world >> {}", out.display())),
            ReturnCode::Success
        );
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello\nworld\n");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_pipeline_status_is_last_stage() {
        let mut sh = interpreter();
        sh.run_line("true | false");
        assert_eq!(sh.last_status(), 1);
        sh.run_line("false | true");
        assert_eq!(sh.last_status(), 0);
    }

    #[test]
    fn test_background_does_not_block() {
        let mut sh = interpreter();
        let start = Instant::now();
        assert_eq!(sh.run_line("sleep 2 &"), ReturnCode::Success);
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(sh.jobs().jobs().len(), 1);
    }

    #[test]
    fn test_cd_failure_keeps_directory() {
        let _lock = lock_current_dir();
        let orig = std::env::current_dir().unwrap();

        let mut sh = interpreter();
        assert_eq!(sh.run_line("cd /nonexistent/path"), ReturnCode::Success);
        assert_eq!(sh.last_status(), 1);
        assert_eq!(std::env::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_short_set_cd_jump() {
        let _lock = lock_current_dir();
        let orig = std::env::current_dir().unwrap();
        let home = make_unique_temp_dir("interp_short").unwrap();
        let canonical_home = fs::canonicalize(&home).unwrap();

        let mut sh = interpreter();
        sh.run_line(&format!("cd {}", home.display()));
        assert_eq!(sh.run_line("short set home"), ReturnCode::Success);
        sh.run_line("cd /");
        assert_eq!(sh.env().current_dir, Path::new("/"));
        assert_eq!(sh.run_line("short jump home"), ReturnCode::Success);
        assert_eq!(sh.last_status(), 0);
        assert_eq!(sh.env().current_dir, canonical_home);

        std::env::set_current_dir(orig).expect("failed to restore cwd");
        let _ = fs::remove_dir_all(home);
    }

    #[test]
    fn test_prompt_format() {
        let mut env = Environment::new();
        env.set_var("USER", "alice");
        env.current_dir = "/work".into();
        let sh = Interpreter::new(Config::from_env(&env), env);

        let prompt = sh.prompt();
        assert!(prompt.starts_with("alice@"));
        assert!(prompt.ends_with(":/work shellington$ "));
    }
}
