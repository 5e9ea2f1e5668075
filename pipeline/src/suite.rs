//! Suite orchestration: run independent tests and aggregate their results.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::env::Environment;
use crate::core::state::Verdict;
use crate::io::config::SuiteConfig;
use crate::test::{Test, TestResult, run_test};

/// A named collection of tests sharing one base environment.
#[derive(Debug, Clone)]
pub struct Suite {
    name: String,
    config: SuiteConfig,
    base: Environment,
    tests: Vec<Test>,
}

/// Pass/fail counts for a suite run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Configuration errors.
    pub errors: usize,
    pub cancelled: usize,
}

impl SuiteSummary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a TestResult>) -> Self {
        let mut summary = SuiteSummary::default();
        for result in results {
            summary.total += 1;
            match result.verdict {
                Verdict::Passed => summary.passed += 1,
                Verdict::Failed { .. } => summary.failed += 1,
                Verdict::ConfigError { .. } => summary.errors += 1,
                Verdict::Cancelled { .. } => summary.cancelled += 1,
            }
        }
        summary
    }
}

/// Results of a suite run, keyed by test id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Test ids in registration order.
    pub order: Vec<String>,
    pub tests: BTreeMap<String, TestResult>,
    pub summary: SuiteSummary,
}

impl SuiteResult {
    pub fn all_passed(&self) -> bool {
        self.summary.passed == self.summary.total
    }

    /// Results in registration order.
    pub fn in_order(&self) -> impl Iterator<Item = &TestResult> {
        self.order.iter().filter_map(|id| self.tests.get(id))
    }

    /// `(test id, failure summary)` for every test that did not pass, sorted by id.
    pub fn failures(&self) -> impl Iterator<Item = (&str, String)> {
        self.tests.iter().filter_map(|(id, result)| {
            result
                .verdict
                .failure_summary()
                .map(|summary| (id.as_str(), summary))
        })
    }

    /// `(test id, failure summary or None)` for every test, in registration order.
    pub fn verdicts(&self) -> impl Iterator<Item = (&str, Option<String>)> {
        self.in_order()
            .map(|result| (result.name.as_str(), result.verdict.failure_summary()))
    }
}

impl Suite {
    /// Build a suite from an explicit test list. Test ids must be unique.
    pub fn new(name: impl Into<String>, config: SuiteConfig, tests: Vec<Test>) -> Result<Self> {
        config.validate()?;
        let mut seen = BTreeSet::new();
        for test in &tests {
            if !seen.insert(test.id()) {
                bail!("duplicate test {}", test.id());
            }
        }
        let base = config.base_environment();
        Ok(Self {
            name: name.into(),
            config,
            base,
            tests,
        })
    }

    /// Keep only the named tests. Unknown names are an error.
    pub fn filter(mut self, names: &[String]) -> Result<Self> {
        if names.is_empty() {
            return Ok(self);
        }
        for name in names {
            if !self.tests.iter().any(|test| test.id() == name) {
                bail!("unknown test {name}");
            }
        }
        self.tests
            .retain(|test| names.iter().any(|name| name == test.id()));
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn base_environment(&self) -> &Environment {
        &self.base
    }

    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    /// Run every test and collect the results.
    ///
    /// Tests share nothing mutable. With `jobs > 1` they run on a bounded set of
    /// worker threads, but each test still runs its own steps sequentially.
    /// Cancellation (by `cancel` or the configured suite deadline) kills
    /// in-flight processes; every test still gets a result.
    #[instrument(skip_all, fields(suite = %self.name, tests = self.tests.len(), jobs = self.config.jobs))]
    pub fn run(&self, cancel: &CancelToken) -> SuiteResult {
        let started_at = Utc::now();
        let cancel = match self.config.suite_timeout() {
            Some(timeout) => cancel.with_timeout(timeout),
            None => cancel.clone(),
        };
        info!("suite started");

        let results = if self.config.jobs <= 1 || self.tests.len() <= 1 {
            self.tests
                .iter()
                .map(|test| run_test(test, &self.base, self.config.limits(), &cancel))
                .collect()
        } else {
            self.run_parallel(&cancel)
        };

        let order: Vec<String> = self.tests.iter().map(|test| test.id().to_string()).collect();
        let tests: BTreeMap<String, TestResult> = results
            .into_iter()
            .map(|result| (result.name.clone(), result))
            .collect();
        let summary = SuiteSummary::from_results(tests.values());
        if cancel.is_cancelled() {
            warn!(cancelled = summary.cancelled, "suite was cancelled");
        }
        info!(
            passed = summary.passed,
            failed = summary.failed,
            errors = summary.errors,
            "suite finished"
        );

        SuiteResult {
            name: self.name.clone(),
            started_at,
            finished_at: Utc::now(),
            order,
            tests,
            summary,
        }
    }

    fn run_parallel(&self, cancel: &CancelToken) -> Vec<TestResult> {
        let next = AtomicUsize::new(0);
        let workers = self.config.jobs.min(self.tests.len());
        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(test) = self.tests.get(index) else {
                            break;
                        };
                        let result = run_test(test, &self.base, self.config.limits(), cancel);
                        if tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(tx);

        let mut slots: Vec<Option<TestResult>> = vec![None; self.tests.len()];
        for (index, result) in rx {
            slots[index] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::check_retcode_zero;
    use crate::core::template::CommandTemplate;
    use crate::step::Step;
    use std::time::Duration;

    fn one_step_test(id: &str, script: &str) -> Test {
        Test::new(id)
            .with_step(
                Step::command(
                    "run",
                    CommandTemplate::new(["sh", "-c", script]),
                    Duration::from_secs(5),
                )
                .with_check(check_retcode_zero()),
            )
            .expect("build")
    }

    #[test]
    fn rejects_duplicate_tests() {
        let tests = vec![one_step_test("a", "true"), one_step_test("a", "true")];
        let err = Suite::new("s", SuiteConfig::default(), tests).expect_err("dup");
        assert!(err.to_string().contains("duplicate test a"));
    }

    #[test]
    fn aggregates_counts_and_keeps_order() {
        let tests = vec![
            one_step_test("b-pass", "true"),
            one_step_test("a-fail", "exit 1"),
            one_step_test("c-pass", "true"),
        ];
        let suite = Suite::new("s", SuiteConfig::default(), tests).expect("suite");
        let result = suite.run(&CancelToken::new());
        assert_eq!(result.summary.total, 3);
        assert_eq!(result.summary.passed, 2);
        assert_eq!(result.summary.failed, 1);
        assert!(!result.all_passed());
        let order: Vec<&str> = result.in_order().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["b-pass", "a-fail", "c-pass"]);
        let failures: Vec<(&str, String)> = result.failures().collect();
        assert_eq!(failures, vec![("a-fail", "run: non_zero_exit".to_string())]);
    }

    #[test]
    fn parallel_run_matches_sequential_verdicts() {
        let tests: Vec<Test> = (0..6)
            .map(|i| one_step_test(&format!("t{i}"), if i % 2 == 0 { "true" } else { "exit 1" }))
            .collect();
        let config = SuiteConfig {
            jobs: 3,
            ..SuiteConfig::default()
        };
        let suite = Suite::new("s", config, tests).expect("suite");
        let result = suite.run(&CancelToken::new());
        assert_eq!(result.summary.total, 6);
        assert_eq!(result.summary.passed, 3);
        assert_eq!(result.order.len(), 6);
        assert!(result.tests["t0"].passed());
        assert!(!result.tests["t1"].passed());
    }

    #[test]
    fn filter_selects_subset_and_rejects_unknown() {
        let tests = vec![one_step_test("a", "true"), one_step_test("b", "true")];
        let suite = Suite::new("s", SuiteConfig::default(), tests).expect("suite");
        let err = suite
            .clone()
            .filter(&["zzz".to_string()])
            .expect_err("unknown");
        assert!(err.to_string().contains("unknown test zzz"));
        let filtered = suite.filter(&["b".to_string()]).expect("filter");
        assert_eq!(filtered.tests().len(), 1);
        assert_eq!(filtered.tests()[0].id(), "b");
    }
}
