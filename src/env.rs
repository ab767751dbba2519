use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Interpreter state shared by built-ins and the execution engine.
///
/// - `vars`: environment variables passed to every child process.
/// - `current_dir`: working directory of children and base of relative paths.
/// - `should_exit`: set by the `exit` built-in; the interactive loop stops.
#[derive(Debug, Clone)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub should_exit: bool,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            vars,
            current_dir,
            should_exit: false,
        }
    }

    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Directories searched for programs, from `PATH`.
    pub fn search_path(&self) -> OsString {
        self.get_var("PATH").map(OsString::from).unwrap_or_default()
    }

    /// Change the working directory of the interpreter and of future children.
    ///
    /// Relative targets are resolved against `current_dir`. `PWD` follows the change.
    pub fn change_dir(&mut self, target: &Path) -> Result<&Path> {
        let new_dir = self.current_dir.join(target);
        let canonical = new_dir
            .canonicalize()
            .with_context(|| format!("cd: {}", target.display()))?;
        stdenv::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;
        self.set_var("PWD", canonical.to_string_lossy());
        self.current_dir = canonical;
        Ok(&self.current_dir)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
