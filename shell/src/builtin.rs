use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::interpreter::Factory;
use anyhow::{Context, Result, anyhow};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in the interpreter process, before anything is forked. They only ever see the
/// first stage of a pipeline.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd" or "short".
    fn name() -> &'static str;

    /// Executes the command against the interpreter state.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        T::execute(*self, stdout, env)
    }
}

/// Outcome of `--help` or of arguments argh refused.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode> {
        if self.is_error {
            return Err(anyhow!("{}", self.output.trim_end()));
        }
        stdout.write_all(self.output.as_bytes())?;
        Ok(0)
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name != T::name() {
            return None;
        }
        Some(match T::from_args(&[name], args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

/// The builtins every interpreter starts with.
pub(crate) fn default_builtins() -> Vec<Box<dyn CommandFactory>> {
    vec![
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Short>::default()),
    ]
}

/// Switch the process and `env` to `target`, resolved against `env.current_dir`.
fn change_dir(env: &mut Environment, target: &Path) -> Result<()> {
    let new_dir = if target.is_absolute() {
        target.to_path_buf()
    } else {
        env.current_dir.join(target)
    };

    let canonical =
        fs::canonicalize(&new_dir).with_context(|| format!("{}", target.display()))?;

    env::set_current_dir(&canonical).with_context(|| format!("{}", target.display()))?;
    env.current_dir = canonical;
    Ok(())
}

#[derive(FromArgs)]
/// Leave the interpreter after the current line.
pub struct Exit {}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => return Err(anyhow!("HOME not set")),
            },
        };

        change_dir(env, &target)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Manage named directory shortcuts.
pub struct Short {
    #[argh(subcommand)]
    pub action: ShortAction,
}

#[derive(FromArgs)]
#[argh(subcommand)]
pub enum ShortAction {
    Set(ShortSet),
    Jump(ShortJump),
}

#[derive(FromArgs)]
/// Remember the current directory under a name.
#[argh(subcommand, name = "set")]
pub struct ShortSet {
    #[argh(positional)]
    /// name of the shortcut; an existing shortcut with that name is replaced.
    pub name: String,
}

#[derive(FromArgs)]
/// Change to the directory remembered under a name.
#[argh(subcommand, name = "jump")]
pub struct ShortJump {
    #[argh(positional)]
    /// name given to `short set`.
    pub name: String,
}

impl BuiltinCommand for Short {
    fn name() -> &'static str {
        "short"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        match self.action {
            ShortAction::Set(ShortSet { name }) => {
                let dir = env.current_dir.clone();
                tracing::debug!("shortcut {} -> {}", name, dir.display());
                env.shortcuts.set(name, dir);
                Ok(0)
            }
            ShortAction::Jump(ShortJump { name }) => {
                let dir = env
                    .shortcuts
                    .get(&name)
                    .map(Path::to_path_buf)
                    .ok_or_else(|| anyhow!("no shortcut named '{}'", name))?;
                change_dir(env, &dir)?;
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shortcut::ShortcutTable;
    use crate::test_support::{lock_current_dir, make_unique_temp_dir};
    use std::collections::HashMap;
    use std::env as stdenv;

    fn test_env() -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir: stdenv::current_dir().unwrap(),
            should_exit: false,
            shortcuts: ShortcutTable::new(),
        }
    }

    fn run(name: &str, args: &[&str], env: &mut Environment) -> Option<Result<ExitCode>> {
        default_builtins()
            .iter()
            .find_map(|f| f.try_create(name, args))
            .map(|cmd| cmd.execute(&mut Vec::new(), env))
    }

    #[test]
    fn test_exit_sets_flag() {
        let mut env = test_env();
        let res = run("exit", &[], &mut env).expect("exit is a builtin");
        assert_eq!(res.unwrap(), 0);
        assert!(env.should_exit);
    }

    #[test]
    fn test_unknown_name_falls_through() {
        let mut env = test_env();
        assert!(run("ls", &["-l"], &mut env).is_none());
        assert!(run("shortcut", &[], &mut env).is_none());
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let temp = make_unique_temp_dir("cd_abs").unwrap();
        let canonical_temp = fs::canonicalize(&temp).unwrap();

        let mut env = test_env();
        let cmd = Cd {
            target: Some(temp.to_string_lossy().to_string()),
        };
        let res = BuiltinCommand::execute(cmd, &mut Vec::new(), &mut env);

        assert!(res.is_ok());
        assert_eq!(
            fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(),
            canonical_temp
        );
        assert_eq!(env.current_dir, canonical_temp);

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_cd_relative_to_current_dir() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let temp = make_unique_temp_dir("cd_rel").unwrap();
        fs::create_dir_all(temp.join("inner")).unwrap();
        let canonical_temp = fs::canonicalize(&temp).unwrap();

        let mut env = test_env();
        change_dir(&mut env, &temp).unwrap();
        let res = run("cd", &["inner"], &mut env).unwrap();

        assert!(res.is_ok());
        assert_eq!(env.current_dir, canonical_temp.join("inner"));

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_cd_to_home_when_none() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let temp = make_unique_temp_dir("cd_home").unwrap();
        let canonical_temp = fs::canonicalize(&temp).unwrap();

        let mut env = test_env();
        env.set_var("HOME", canonical_temp.to_string_lossy().to_string());

        let res = run("cd", &[], &mut env).unwrap();

        assert!(res.is_ok());
        assert_eq!(env.current_dir, canonical_temp);

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_cd_nonexistent_path_errors() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();

        let mut env = test_env();
        let res = run("cd", &["/nonexistent/path"], &mut env).unwrap();

        let err = res.unwrap_err();
        assert!(format!("{:#}", err).starts_with("/nonexistent/path: "));
        assert_eq!(stdenv::current_dir().unwrap(), orig);
        assert_eq!(env.current_dir, orig);
    }

    #[test]
    fn test_cd_rejects_extra_arguments() {
        let mut env = test_env();
        let res = run("cd", &["a", "b"], &mut env).unwrap();
        assert!(res.is_err());
    }

    #[test]
    fn test_short_set_then_jump_restores_directory() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let home = make_unique_temp_dir("short_home").unwrap();
        let other = make_unique_temp_dir("short_other").unwrap();
        let canonical_home = fs::canonicalize(&home).unwrap();

        let mut env = test_env();
        change_dir(&mut env, &home).unwrap();

        assert_eq!(run("short", &["set", "home"], &mut env).unwrap().unwrap(), 0);
        change_dir(&mut env, &other).unwrap();
        assert_ne!(env.current_dir, canonical_home);

        assert_eq!(run("short", &["jump", "home"], &mut env).unwrap().unwrap(), 0);
        assert_eq!(env.current_dir, canonical_home);
        assert_eq!(
            fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(),
            canonical_home
        );

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
        let _ = fs::remove_dir_all(&home);
        let _ = fs::remove_dir_all(&other);
    }

    #[test]
    fn test_short_jump_unknown_name_errors() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();

        let mut env = test_env();
        let err = run("short", &["jump", "nowhere"], &mut env)
            .unwrap()
            .unwrap_err();

        assert_eq!(err.to_string(), "no shortcut named 'nowhere'");
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_short_without_action_errors() {
        let mut env = test_env();
        assert!(run("short", &[], &mut env).unwrap().is_err());
        assert!(run("short", &["set"], &mut env).unwrap().is_err());
    }
}
