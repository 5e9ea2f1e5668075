//! CLI command implementations.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pipeline::cancel::CancelToken;
use pipeline::core::expect::compare;
use pipeline::exit_codes;
use pipeline::io::config::{SuiteConfig, render_config, write_config};
use pipeline::io::expectations::{load_expectations, update_expectations, write_failure_log};
use pipeline::io::results::{load_results_json, write_results_json};
use pipeline::report::{exit_code, render_report};
use pipeline::suite::Suite;
use tracing::{debug, info};

use crate::bc2firm::make_bc2firm_test;
use crate::config::{SuiteArgs, resolve_config};
use crate::discover::discover_tests;

const SUITE_NAME: &str = "bc2firm-tests";

/// Options of the `run` subcommand that do not affect the suite config.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub tests: Vec<String>,
    pub verbose: bool,
    pub json: Option<PathBuf>,
    pub update_expectations: bool,
}

/// Print the discovered test ids, one per line.
pub fn list_tests(args: &SuiteArgs) -> Result<i32> {
    let cfg = resolve_config(args)?;
    for test in discover_tests(&cfg.workdir)? {
        println!("{test}");
    }
    Ok(exit_codes::OK)
}

/// Run the suite, print the report and persist the failure log.
pub fn run_suite(args: &SuiteArgs, opts: &RunOptions) -> Result<i32> {
    let mut cfg = resolve_config(args)?;
    cfg.workdir = fs::canonicalize(&cfg.workdir)
        .with_context(|| format!("resolve test dir {}", cfg.workdir.display()))?;
    let builddir = cfg.resolved_builddir();
    fs::create_dir_all(&builddir)
        .with_context(|| format!("create build dir {}", builddir.display()))?;

    let names = discover_tests(&cfg.workdir)?;
    debug!(tests = names.len(), workdir = %cfg.workdir.display(), "tests discovered");
    let tests = names
        .iter()
        .map(|name| make_bc2firm_test(name, &cfg))
        .collect::<Result<Vec<_>>>()?;
    let suite = Suite::new(SUITE_NAME, cfg.clone(), tests)?.filter(&opts.tests)?;

    let result = suite.run(&CancelToken::new());

    let comparisons = match &cfg.expectations {
        Some(path) => {
            let expectations = load_expectations(&in_workdir(&cfg, path))?;
            compare(result.verdicts(), &expectations)
        }
        None => BTreeMap::new(),
    };
    print!("{}", render_report(&result, &comparisons, opts.verbose));

    if let Some(path) = &cfg.failure_log {
        let path = in_workdir(&cfg, path);
        write_failure_log(&path, &result)?;
        info!(path = %path.display(), "failure log written");
    }
    if opts.update_expectations
        && let Some(path) = &cfg.expectations
    {
        let path = in_workdir(&cfg, path);
        update_expectations(&path, &result)?;
        info!(path = %path.display(), "expectations updated");
    }
    if let Some(path) = &opts.json {
        write_results_json(path, &result)?;
        info!(path = %path.display(), "results written");
    }
    Ok(exit_code(&result))
}

/// Re-render the report of a saved JSON result.
pub fn report_results(path: &Path, verbose: bool) -> Result<i32> {
    let result = load_results_json(path).context("load results")?;
    print!("{}", render_report(&result, &BTreeMap::new(), verbose));
    Ok(exit_code(&result))
}

/// Print the effective configuration as TOML, or save it to `write`.
pub fn show_config(args: &SuiteArgs, write: Option<&Path>) -> Result<i32> {
    let cfg = resolve_config(args)?;
    match write {
        Some(path) => {
            write_config(path, &cfg)?;
            println!("config: written={}", path.display());
        }
        None => print!("{}", render_config(&cfg)?),
    }
    Ok(exit_codes::OK)
}

/// Remove the build directory.
pub fn clean(args: &SuiteArgs) -> Result<i32> {
    let cfg = resolve_config(args)?;
    let builddir = cfg.resolved_builddir();
    if builddir.exists() {
        fs::remove_dir_all(&builddir)
            .with_context(|| format!("remove {}", builddir.display()))?;
    }
    println!("clean: builddir={}", builddir.display());
    Ok(exit_codes::OK)
}

fn in_workdir(cfg: &SuiteConfig, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cfg.workdir.join(path)
    }
}
