use crate::env::Environment;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Processes killed by a signal are reported as `128 + signal`, like POSIX shells do.
pub type ExitCode = i32;

/// Status of a stage whose program could not be found.
pub const EXIT_NOT_FOUND: ExitCode = 127;

/// Status of a stage that was found but could not be started.
pub const EXIT_CANNOT_EXECUTE: ExitCode = 126;

/// Object-safe trait for a builtin invocation ready to run in the interpreter process.
pub trait ExecutableCommand {
    /// Executes the command.
    ///
    /// An `Err` is reported by the caller as a diagnostic and treated as status 1.
    fn execute(self: Box<Self>, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

/// Factory that tries to create a builtin from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`, in which case
/// the stage falls through to the pipeline executor.
pub trait CommandFactory {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
