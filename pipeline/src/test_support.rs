//! Test-only helpers: temporary test directories and fake tool scripts.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::check::check_retcode_zero;
use crate::core::template::CommandTemplate;
use crate::io::config::SuiteConfig;
use crate::step::Step;

/// A temporary directory acting as a suite's working directory.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file relative to the sandbox root.
    pub fn write_file(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Write an executable `sh` script relative to the sandbox root.
    pub fn write_script(&self, rel: &str, body: &str) -> Result<PathBuf> {
        let path = self.write_file(rel, &format!("#!/bin/sh\n{body}\n"))?;
        let mut perms = fs::metadata(&path)
            .with_context(|| format!("stat {}", path.display()))?
            .permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms)
            .with_context(|| format!("chmod {}", path.display()))?;
        Ok(path)
    }

    /// Default config rooted at the sandbox.
    pub fn config(&self) -> SuiteConfig {
        SuiteConfig {
            workdir: self.dir.path().to_path_buf(),
            ..SuiteConfig::default()
        }
    }
}

/// A step running `sh -c script` with a retcode check.
///
/// `script` must not contain `{` or `}`; they are template syntax.
pub fn sh_step(name: &str, script: &str, timeout: Duration) -> Step {
    Step::command(name, CommandTemplate::new(["sh", "-c", script]), timeout)
        .with_check(check_retcode_zero())
}
