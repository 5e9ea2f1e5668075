//! Typed environment threaded through a test's steps.
//!
//! Well-known keys live in named fields; tool paths, flags and values derived
//! by earlier steps live in an ordered side-channel map. Both are reachable by
//! name so command templates can refer to either.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::types::ConfigError;

/// A single environment value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Path(PathBuf),
    /// A list of flags. Spliced as separate arguments when a template argument
    /// consists of nothing but the placeholder.
    Flags(Vec<String>),
}

impl Value {
    /// Parse a user-supplied flag string (`"-O3 -g"`) into a flag list.
    pub fn flags_from_str(raw: &str) -> Self {
        Value::Flags(raw.split_whitespace().map(str::to_string).collect())
    }

    /// Render the value for embedding inside a larger argument.
    pub fn render(&self) -> String {
        match self {
            Value::Str(value) => value.clone(),
            Value::Path(path) => path.display().to_string(),
            Value::Flags(flags) => flags.join(" "),
        }
    }

    /// Expand the value into whole arguments.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Value::Flags(flags) => flags.clone(),
            other => vec![other.render()],
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<PathBuf> for Value {
    fn from(value: PathBuf) -> Self {
        Value::Path(value)
    }
}

impl From<&Path> for Value {
    fn from(value: &Path) -> Self {
        Value::Path(value.to_path_buf())
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::Flags(value)
    }
}

/// Mapping of configuration and derived values for one test.
///
/// Created once per suite from defaults plus overrides, then cloned per test so
/// derived keys never leak into sibling tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Test input file name, relative to `workdir`.
    pub testname: Option<String>,
    /// Directory every step's process runs in.
    pub workdir: PathBuf,
    /// Directory for build artifacts.
    pub builddir: PathBuf,
    /// Executable produced by a compile step.
    pub executable: Option<PathBuf>,
    vars: BTreeMap<String, Value>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(".", "build")
    }
}

impl Environment {
    pub fn new(workdir: impl Into<PathBuf>, builddir: impl Into<PathBuf>) -> Self {
        Self {
            testname: None,
            workdir: workdir.into(),
            builddir: builddir.into(),
            executable: None,
            vars: BTreeMap::new(),
        }
    }

    /// Set `key`, overwriting any earlier value. Well-known keys update their
    /// typed field.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            "testname" => self.testname = Some(value.render()),
            "workdir" => self.workdir = PathBuf::from(value.render()),
            "builddir" => self.builddir = PathBuf::from(value.render()),
            "executable" => self.executable = Some(PathBuf::from(value.render())),
            _ => {
                self.vars.insert(key, value);
            }
        }
    }

    /// Builder form of [`Environment::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Apply overrides on top of this environment; overrides win.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, Value>) -> Self {
        for (key, value) in overrides {
            self.set(key.clone(), value.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "testname" => self.testname.clone().map(Value::Str),
            "workdir" => Some(Value::Path(self.workdir.clone())),
            "builddir" => Some(Value::Path(self.builddir.clone())),
            "executable" => self.executable.clone().map(Value::Path),
            _ => self.vars.get(key).cloned(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Look up `key`, failing with [`ConfigError::MissingConfiguration`].
    pub fn require(&self, key: &str) -> Result<Value, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingConfiguration {
                key: key.to_string(),
            })
    }

    pub fn testname(&self) -> Result<&str, ConfigError> {
        self.testname
            .as_deref()
            .ok_or_else(|| ConfigError::MissingConfiguration {
                key: "testname".to_string(),
            })
    }

    /// Resolve a possibly relative path against `workdir`.
    pub fn in_workdir(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}
