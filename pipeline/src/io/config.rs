//! Suite configuration, optionally stored as TOML.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::check::WhitespacePolicy;
use crate::core::env::{Environment, Value};
use crate::step::ExecLimits;

/// Suite configuration (TOML).
///
/// Missing fields default to values that run a suite sequentially from the
/// current directory. `vars` and `flags` seed the base environment; flags are
/// whitespace-split into flag lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SuiteConfig {
    /// Directory test inputs live in and steps run in.
    pub workdir: PathBuf,

    /// Directory for build artifacts, relative to `workdir` unless absolute.
    pub builddir: PathBuf,

    /// Number of tests run concurrently.
    pub jobs: usize,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Wall-clock budget for the whole suite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite_timeout_secs: Option<u64>,

    /// How reference files are compared with captured stdout.
    pub whitespace: WhitespacePolicy,

    /// Where failing tests are recorded after a run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_log: Option<PathBuf>,

    /// Expected-failures file to compare the run against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expectations: Option<PathBuf>,

    /// Per-step timeout overrides in seconds, keyed by step name.
    pub step_timeouts: BTreeMap<String, u64>,

    /// String values seeded into the base environment (tool paths etc.).
    pub vars: BTreeMap<String, String>,

    /// Flag strings seeded into the base environment as flag lists.
    pub flags: BTreeMap<String, String>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            builddir: PathBuf::from("build"),
            jobs: 1,
            output_limit_bytes: 1_000_000,
            suite_timeout_secs: None,
            whitespace: WhitespacePolicy::default(),
            failure_log: None,
            expectations: None,
            step_timeouts: BTreeMap::new(),
            vars: BTreeMap::new(),
            flags: BTreeMap::new(),
        }
    }
}

impl SuiteConfig {
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(anyhow!("jobs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.suite_timeout_secs == Some(0) {
            return Err(anyhow!("suite_timeout_secs must be > 0"));
        }
        if self.workdir.as_os_str().is_empty() {
            return Err(anyhow!("workdir must be non-empty"));
        }
        if self.builddir.as_os_str().is_empty() {
            return Err(anyhow!("builddir must be non-empty"));
        }
        for (step, secs) in &self.step_timeouts {
            if *secs == 0 {
                return Err(anyhow!("step_timeouts.{step} must be > 0"));
            }
        }
        for key in self.vars.keys().chain(self.flags.keys()) {
            if key.trim().is_empty() {
                return Err(anyhow!("environment keys must be non-empty"));
            }
        }
        Ok(())
    }

    pub fn limits(&self) -> ExecLimits {
        ExecLimits {
            output_limit_bytes: self.output_limit_bytes,
        }
    }

    /// Timeout for `step`, falling back to `default`.
    pub fn step_timeout(&self, step: &str, default: Duration) -> Duration {
        self.step_timeouts
            .get(step)
            .map_or(default, |secs| Duration::from_secs(*secs))
    }

    pub fn suite_timeout(&self) -> Option<Duration> {
        self.suite_timeout_secs.map(Duration::from_secs)
    }

    /// Build directory resolved against `workdir`.
    pub fn resolved_builddir(&self) -> PathBuf {
        if self.builddir.is_absolute() {
            self.builddir.clone()
        } else {
            self.workdir.join(&self.builddir)
        }
    }

    /// The read-only environment every test clones.
    pub fn base_environment(&self) -> Environment {
        Environment::new(self.workdir.clone(), self.resolved_builddir())
            .with_overrides(&self.overrides())
    }

    /// `vars` and `flags` as environment values. A key set in both takes its
    /// flag list.
    pub fn overrides(&self) -> BTreeMap<String, Value> {
        let vars = self
            .vars
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value.as_str())));
        let flags = self
            .flags
            .iter()
            .map(|(key, value)| (key.clone(), Value::flags_from_str(value)));
        vars.chain(flags).collect()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SuiteConfig::default()`.
pub fn load_config(path: &Path) -> Result<SuiteConfig> {
    if !path.exists() {
        let cfg = SuiteConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SuiteConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Render config as TOML, as [`write_config`] stores it.
pub fn render_config(cfg: &SuiteConfig) -> Result<String> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    Ok(buf)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SuiteConfig) -> Result<()> {
    let buf = render_config(cfg)?;
    super::write_atomic(path, &buf)
}
