//! Flattening of a [`ResultTree`] into [`ReportRecord`]s.
//!
//! Traversal follows the tree order: features, then each feature's elements,
//! then each element's steps. Setup and teardown steps (`Before`/`After`)
//! are only reported when they carry a failure.

use std::collections::HashMap;

use tracing::warn;

use crate::report::ReportRecord;
use crate::results::{Element, ErrorPayload, Feature, ResultTree, Step};

const NANOS_PER_MILLI: u64 = 1_000_000;
const HALF_MILLI_NANOS: u64 = 500_000;

/// Convert a run's result tree into the submission batch for `framework`.
///
/// Identifiers are `element id + keyword + step name`. When a tree holds the
/// same triple more than once, later occurrences get a `#n` suffix so no
/// record overwrites another in the reporting service.
#[must_use]
pub fn normalise(tree: &ResultTree, framework: &str) -> Vec<ReportRecord> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut records = Vec::with_capacity(tree.step_count());

    for (feature, element, step) in tree.steps() {
        let Some(mut record) = normalise_step(feature, element, step, framework) else {
            continue;
        };

        let occurrences = seen.entry(record.id.clone()).or_insert(0);
        *occurrences += 1;
        if *occurrences > 1 {
            warn!(id = %record.id, "duplicate step identifier in result tree");
            record.id = format!("{}#{occurrences}", record.id);
        }
        records.push(record);
    }

    records
}

/// Build the record for one step, or `None` for a passing hook.
#[must_use]
pub fn normalise_step(
    feature: &Feature,
    element: &Element,
    step: &Step,
    framework: &str,
) -> Option<ReportRecord> {
    let (failure_type, failure_detail) = step
        .result
        .error_message
        .as_ref()
        .map_or((None, None), split_failure);

    let has_failure = failure_detail.as_deref().is_some_and(|detail| !detail.is_empty());
    if is_hook(step) && !has_failure {
        return None;
    }

    Some(ReportRecord {
        id: format!("{}{}{}", element.id, step.keyword, step.name),
        framework: framework.to_string(),
        name: format!("{}{}", step.keyword, step.name),
        result: step.result.status.clone(),
        ancestors: vec![element.name.clone(), feature.name.clone()],
        duration: step
            .result
            .duration
            .filter(|nanos| *nanos > 0)
            .map(nanos_to_millis),
        failure_type,
        failure_detail,
    })
}

/// Round nanoseconds to the nearest millisecond, halves rounding up.
#[expect(
    clippy::integer_division,
    reason = "rounding is applied explicitly before truncating"
)]
#[must_use]
pub fn nanos_to_millis(nanos: u64) -> u64 {
    nanos.saturating_add(HALF_MILLI_NANOS) / NANOS_PER_MILLI
}

fn is_hook(step: &Step) -> bool {
    matches!(step.keyword.trim(), "Before" | "After")
}

fn split_failure(payload: &ErrorPayload) -> (Option<String>, Option<String>) {
    match payload {
        ErrorPayload::Text(text) => (None, Some(text.clone())),
        ErrorPayload::Error { name, message } => (
            name.as_deref()
                .filter(|name| !name.is_empty())
                .map(ToString::to_string),
            message.clone(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::results::StepResult;

    fn step(keyword: &str, name: &str, status: &str) -> Step {
        Step {
            keyword: keyword.to_string(),
            name: name.to_string(),
            result: StepResult {
                status: status.to_string(),
                ..StepResult::default()
            },
            ..Step::default()
        }
    }

    fn tree(steps: Vec<Step>) -> ResultTree {
        ResultTree {
            features: vec![Feature {
                id: "checkout".to_string(),
                name: "Checkout".to_string(),
                elements: vec![Element {
                    id: "checkout;pay".to_string(),
                    name: "Pay".to_string(),
                    steps,
                    ..Element::default()
                }],
                ..Feature::default()
            }],
        }
    }

    fn failing(mut step: Step, payload: ErrorPayload) -> Step {
        step.result.error_message = Some(payload);
        step
    }

    #[test]
    fn builds_identifier_name_and_ancestors() {
        let records = normalise(&tree(vec![step("Given ", "a basket", "passed")]), "cucumber");
        assert_eq!(
            records,
            vec![ReportRecord {
                id: "checkout;payGiven a basket".to_string(),
                framework: "cucumber".to_string(),
                name: "Given a basket".to_string(),
                result: "passed".to_string(),
                ancestors: vec!["Pay".to_string(), "Checkout".to_string()],
                duration: None,
                failure_type: None,
                failure_detail: None,
            }]
        );
    }

    #[rstest]
    #[case(1_500_000, 2)]
    #[case(1_499_999, 1)]
    #[case(2_500_000, 3)]
    #[case(500_000, 1)]
    #[case(499_999, 0)]
    #[case(1_000_000, 1)]
    fn converts_duration_rounding_halves_up(#[case] nanos: u64, #[case] millis: u64) {
        assert_eq!(nanos_to_millis(nanos), millis);

        let mut timed = step("When ", "paying", "passed");
        timed.result.duration = Some(nanos);
        let records = normalise(&tree(vec![timed]), "cucumber");
        assert_eq!(records.first().and_then(|r| r.duration), Some(millis));
    }

    #[test]
    fn zero_duration_is_treated_as_absent() {
        let mut timed = step("When ", "paying", "passed");
        timed.result.duration = Some(0);
        let records = normalise(&tree(vec![timed]), "cucumber");
        assert_eq!(records.first().and_then(|r| r.duration), None);
    }

    #[test]
    fn named_error_yields_classification_and_detail() {
        let records = normalise(
            &tree(vec![failing(
                step("Then ", "it is paid", "failed"),
                ErrorPayload::Error {
                    name: Some("AssertionError".to_string()),
                    message: Some("expected true".to_string()),
                },
            )]),
            "cucumber",
        );
        let record = records.first().cloned();
        assert_eq!(
            record.as_ref().and_then(|r| r.failure_type.as_deref()),
            Some("AssertionError")
        );
        assert_eq!(
            record.as_ref().and_then(|r| r.failure_detail.as_deref()),
            Some("expected true")
        );
    }

    #[rstest]
    #[case(Some(""))]
    #[case(None)]
    fn unnamed_error_yields_detail_only(#[case] name: Option<&str>) {
        let records = normalise(
            &tree(vec![failing(
                step("Then ", "it is paid", "failed"),
                ErrorPayload::Error {
                    name: name.map(ToString::to_string),
                    message: Some("expected true".to_string()),
                },
            )]),
            "cucumber",
        );
        let record = records.first().cloned();
        assert_eq!(record.as_ref().and_then(|r| r.failure_type.clone()), None);
        assert_eq!(
            record.and_then(|r| r.failure_detail),
            Some("expected true".to_string())
        );
    }

    #[test]
    fn bare_string_error_yields_detail_only() {
        let records = normalise(
            &tree(vec![failing(
                step("Then ", "it is paid", "failed"),
                ErrorPayload::Text("boom".to_string()),
            )]),
            "cucumber",
        );
        let record = records.first().cloned();
        assert_eq!(record.as_ref().and_then(|r| r.failure_type.clone()), None);
        assert_eq!(
            record.and_then(|r| r.failure_detail),
            Some("boom".to_string())
        );
    }

    #[rstest]
    #[case("Before ")]
    #[case("After ")]
    #[case("Before")]
    #[case(" After  ")]
    fn passing_hooks_are_dropped(#[case] keyword: &str) {
        let records = normalise(&tree(vec![step(keyword, "", "passed")]), "cucumber");
        assert!(records.is_empty());
    }

    #[rstest]
    #[case("Before ")]
    #[case("After ")]
    fn failing_hooks_are_kept(#[case] keyword: &str) {
        let hook = failing(
            step(keyword, "", "failed"),
            ErrorPayload::Text("db unavailable".to_string()),
        );
        let records = normalise(&tree(vec![hook]), "cucumber");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn hook_with_empty_failure_text_is_dropped() {
        let hook = failing(
            step("Before ", "", "failed"),
            ErrorPayload::Error {
                name: Some("Error".to_string()),
                message: Some(String::new()),
            },
        );
        assert!(normalise(&tree(vec![hook]), "cucumber").is_empty());
    }

    #[test]
    fn keyword_that_only_starts_with_before_is_a_step() {
        let records = normalise(&tree(vec![step("Beforehand ", "x", "passed")]), "cucumber");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn output_count_excludes_only_passing_hooks() {
        let steps = vec![
            step("Before ", "", "passed"),
            step("Given ", "a", "passed"),
            step("When ", "b", "passed"),
            failing(
                step("Then ", "c", "failed"),
                ErrorPayload::Text("nope".to_string()),
            ),
            step("After ", "", "passed"),
        ];
        let tree = tree(steps);
        let records = normalise(&tree, "cucumber");
        assert_eq!(records.len(), tree.step_count() - 2);
    }

    #[test]
    fn identifiers_are_unique_even_for_repeated_steps() {
        let records = normalise(
            &tree(vec![
                step("Given ", "a", "passed"),
                step("Given ", "a", "passed"),
                step("Given ", "b", "passed"),
            ]),
            "cucumber",
        );
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            ["checkout;payGiven a", "checkout;payGiven a#2", "checkout;payGiven b"]
        );
    }

    #[test]
    fn preserves_traversal_order_across_features() {
        let mut tree = tree(vec![step("Given ", "first", "passed")]);
        tree.features.push(Feature {
            name: "Refunds".to_string(),
            elements: vec![Element {
                id: "refunds;full".to_string(),
                name: "Full".to_string(),
                steps: vec![step("Given ", "second", "passed")],
                ..Element::default()
            }],
            ..Feature::default()
        });
        let names: Vec<_> = normalise(&tree, "cucumber")
            .into_iter()
            .map(|r| (r.name, r.ancestors))
            .collect();
        assert_eq!(
            names,
            vec![
                (
                    "Given first".to_string(),
                    vec!["Pay".to_string(), "Checkout".to_string()]
                ),
                (
                    "Given second".to_string(),
                    vec!["Full".to_string(), "Refunds".to_string()]
                ),
            ]
        );
    }
}
