//! Comparison of a run's failures against recorded expected failures.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a test's result relates to the expectations file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Passed and was not expected to fail.
    Pass,
    /// Failed exactly as recorded.
    ExpectedFailure,
    /// Failed but was expected to pass.
    Regression,
    /// Passed but was recorded as failing.
    Fixed,
    /// Failed, but differently than recorded.
    ChangedFailure,
}

impl Comparison {
    pub fn is_unexpected(self) -> bool {
        matches!(self, Comparison::Regression | Comparison::ChangedFailure)
    }
}

pub fn classify(actual: Option<&str>, expected: Option<&str>) -> Comparison {
    match (actual, expected) {
        (None, None) => Comparison::Pass,
        (None, Some(_)) => Comparison::Fixed,
        (Some(_), None) => Comparison::Regression,
        (Some(actual), Some(expected)) if actual == expected => Comparison::ExpectedFailure,
        (Some(_), Some(_)) => Comparison::ChangedFailure,
    }
}

/// Classify every test. `actual` maps test id to its failure summary
/// (`None` when it passed). Expectations for tests that did not run are ignored.
pub fn compare<'a, I>(actual: I, expectations: &BTreeMap<String, String>) -> BTreeMap<String, Comparison>
where
    I: IntoIterator<Item = (&'a str, Option<String>)>,
{
    actual
        .into_iter()
        .map(|(id, failure)| {
            let expected = expectations.get(id).map(String::as_str);
            (id.to_string(), classify(failure.as_deref(), expected))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_all_combinations() {
        assert_eq!(classify(None, None), Comparison::Pass);
        assert_eq!(classify(None, Some("run: non_zero_exit")), Comparison::Fixed);
        assert_eq!(classify(Some("run: non_zero_exit"), None), Comparison::Regression);
        assert_eq!(
            classify(Some("run: non_zero_exit"), Some("run: non_zero_exit")),
            Comparison::ExpectedFailure
        );
        assert_eq!(
            classify(Some("compile: non_zero_exit"), Some("run: non_zero_exit")),
            Comparison::ChangedFailure
        );
    }

    #[test]
    fn compare_ignores_unrun_expectations() {
        let mut expectations = BTreeMap::new();
        expectations.insert("Gone.java".to_string(), "run: non_zero_exit".to_string());
        expectations.insert(
            "Arrays.java".to_string(),
            "execute: reference_mismatch".to_string(),
        );
        let actual = vec![
            ("Arrays.java", Some("execute: reference_mismatch".to_string())),
            ("Hello.java", None),
        ];
        let result = compare(actual, &expectations);
        assert_eq!(result.len(), 2);
        assert_eq!(result["Arrays.java"], Comparison::ExpectedFailure);
        assert_eq!(result["Hello.java"], Comparison::Pass);
        assert!(!result["Arrays.java"].is_unexpected());
    }
}
