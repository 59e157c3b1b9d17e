use crate::shortcut::ShortcutTable;
use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

/// Interpreter-local state shared by the builtins.
///
/// The environment contains:
/// - `vars`: a snapshot of the process environment variables (USER, HOME, PATH...).
/// - `current_dir`: the working directory, kept in sync with the process by `cd`.
/// - `should_exit`: set by the `exit` builtin, checked by the interactive loop.
/// - `shortcuts`: directory shortcuts recorded with `short set`.
#[derive(Debug, Clone)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub should_exit: bool,
    pub shortcuts: ShortcutTable,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            vars,
            current_dir,
            should_exit: false,
            shortcuts: ShortcutTable::new(),
        }
    }

    /// Get the value of an environment variable.
    ///
    /// Looks up the key in `self.vars` first, falling back to `std::env::var`.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Set or override a variable in `self.vars`.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
