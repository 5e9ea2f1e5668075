//! Suite configuration merging.
//!
//! Precedence, lowest first: built-in defaults, the optional config file,
//! command-line flags.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use pipeline::check::WhitespacePolicy;
use pipeline::io::config::{SuiteConfig, load_config};

use crate::bc2firm;

/// Configuration flags shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct SuiteArgs {
    /// Directory containing the `*.java` tests; steps run here.
    #[arg(short = 'C', long)]
    pub dir: Option<PathBuf>,
    /// TOML config file (missing file means defaults).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Use JAVAC to compile Java programs.
    #[arg(long, value_name = "JAVAC")]
    pub javac: Option<String>,
    /// Use BC2FIRM to compile Java class files.
    #[arg(long, value_name = "BC2FIRM")]
    pub bc2firm: Option<String>,
    /// Extra flags for bytecode2firm (whitespace separated).
    #[arg(long, value_name = "FLAGS", allow_hyphen_values = true)]
    pub bc2firmflags: Option<String>,
    /// Directory for produced executables.
    #[arg(long)]
    pub builddir: Option<PathBuf>,
    /// Number of tests run concurrently.
    #[arg(short, long)]
    pub jobs: Option<usize>,
    /// Timeout in seconds for each compile step.
    #[arg(long, value_name = "SECS")]
    pub timeout_compile: Option<u64>,
    /// Timeout in seconds for running the compiled program.
    #[arg(long, value_name = "SECS")]
    pub timeout_run: Option<u64>,
    /// Wall-clock budget in seconds for the whole run.
    #[arg(long, value_name = "SECS")]
    pub suite_timeout: Option<u64>,
    /// Compare reference output byte for byte.
    #[arg(long)]
    pub exact: bool,
    /// Record failing tests here after the run.
    #[arg(long)]
    pub failure_log: Option<PathBuf>,
    /// Expected-failures file (default: `fail_expectations.log`).
    #[arg(long)]
    pub expectations: Option<PathBuf>,
}

/// Build the effective suite config.
pub fn resolve_config(args: &SuiteArgs) -> Result<SuiteConfig> {
    let base = match &args.config {
        Some(path) => load_config(path)?,
        None => SuiteConfig::default(),
    };
    apply_overrides(bc2firm::with_defaults(base), args)
}

/// Apply command-line overrides to `base`.
pub fn apply_overrides(mut base: SuiteConfig, args: &SuiteArgs) -> Result<SuiteConfig> {
    if let Some(dir) = &args.dir {
        base.workdir = dir.clone();
    }
    if let Some(javac) = &args.javac {
        base.vars.insert(bc2firm::JAVAC.to_string(), javac.clone());
    }
    if let Some(tool) = &args.bc2firm {
        base.vars.insert(bc2firm::BC2FIRM.to_string(), tool.clone());
    }
    if let Some(flags) = &args.bc2firmflags {
        base.flags
            .insert(bc2firm::BC2FIRMFLAGS.to_string(), flags.clone());
    }
    if let Some(builddir) = &args.builddir {
        base.builddir = builddir.clone();
    }
    if let Some(jobs) = args.jobs {
        base.jobs = jobs;
    }
    if let Some(secs) = args.timeout_compile {
        for step in [bc2firm::STEP_COMPILE_JAVA, bc2firm::STEP_COMPILE_CLASS] {
            base.step_timeouts.insert(step.to_string(), secs);
        }
    }
    if let Some(secs) = args.timeout_run {
        base.step_timeouts
            .insert(bc2firm::STEP_EXECUTE.to_string(), secs);
    }
    if let Some(secs) = args.suite_timeout {
        base.suite_timeout_secs = Some(secs);
    }
    if args.exact {
        base.whitespace = WhitespacePolicy::Exact;
    }
    if let Some(path) = &args.failure_log {
        base.failure_log = Some(path.clone());
    }
    if let Some(path) = &args.expectations {
        base.expectations = Some(path.clone());
    }
    base.validate()?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_without_overrides() {
        let cfg = resolve_config(&SuiteArgs::default()).expect("resolve");
        assert_eq!(cfg.vars["javac"], "javac");
        assert_eq!(cfg.vars["bc2firm"], "bytecode2firm");
        assert_eq!(cfg.flags["bc2firmflags"], "");
        assert_eq!(
            cfg.expectations.as_deref(),
            Some(std::path::Path::new("fail_expectations.log"))
        );
    }

    #[test]
    fn flags_beat_config_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("suite.toml");
        fs::write(&path, "jobs = 2\n\n[vars]\njavac = \"/from/file/javac\"\n").expect("write");
        let args = SuiteArgs {
            config: Some(path),
            bc2firm: Some("/from/flag/bc2firm".to_string()),
            timeout_run: Some(7),
            exact: true,
            ..SuiteArgs::default()
        };
        let cfg = resolve_config(&args).expect("resolve");
        assert_eq!(cfg.jobs, 2);
        assert_eq!(cfg.vars["javac"], "/from/file/javac");
        assert_eq!(cfg.vars["bc2firm"], "/from/flag/bc2firm");
        assert_eq!(cfg.step_timeouts["execute"], 7);
        assert_eq!(cfg.whitespace, WhitespacePolicy::Exact);
    }

    #[test]
    fn rejects_zero_jobs() {
        let args = SuiteArgs {
            jobs: Some(0),
            ..SuiteArgs::default()
        };
        let err = resolve_config(&args).expect_err("invalid");
        assert!(err.to_string().contains("jobs"));
    }
}
