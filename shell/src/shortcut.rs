use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Named directory shortcuts, managed by the `short` builtin.
///
/// Lives for the lifetime of the interpreter and is never written to disk.
#[derive(Debug, Clone, Default)]
pub struct ShortcutTable {
    entries: HashMap<String, PathBuf>,
}

impl ShortcutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `name` to `dir`, returning the directory it pointed to before, if any.
    pub fn set(&mut self, name: impl Into<String>, dir: impl Into<PathBuf>) -> Option<PathBuf> {
        self.entries.insert(name.into(), dir.into())
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.entries.get(name).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
