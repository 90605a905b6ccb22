//! Engine-native result tree in cucumber JSON shape.
//!
//! The tree is a sequence of features, each holding elements (scenarios),
//! each holding steps. Only the fields the relay reads are modelled; unknown
//! fields in engine output are ignored.

use serde::{Deserialize, Serialize};

/// Raw output of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultTree {
    /// Features in execution order.
    pub features: Vec<Feature>,
}

impl ResultTree {
    /// Parse a tree from cucumber JSON text.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Total number of steps across all features.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.features
            .iter()
            .flat_map(|feature| &feature.elements)
            .map(|element| element.steps.len())
            .sum()
    }

    /// Iterate over every step with its owning feature and element.
    pub fn steps(&self) -> impl Iterator<Item = (&Feature, &Element, &Step)> {
        self.features.iter().flat_map(|feature| {
            feature.elements.iter().flat_map(move |element| {
                element.steps.iter().map(move |step| (feature, element, step))
            })
        })
    }
}

/// One feature file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// Engine-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// Source location of the feature file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    /// Gherkin keyword, usually `Feature`.
    #[serde(default)]
    pub keyword: String,
    /// Feature title.
    #[serde(default)]
    pub name: String,
    /// One-based line of the feature keyword.
    #[serde(default)]
    pub line: usize,
    /// Tags applied to the feature.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    /// Scenarios and backgrounds.
    #[serde(default)]
    pub elements: Vec<Element>,
}

/// One scenario (or expanded outline row).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Engine-assigned identifier, unique within the run.
    #[serde(default)]
    pub id: String,
    /// Gherkin keyword.
    #[serde(default)]
    pub keyword: String,
    /// Scenario title.
    #[serde(default)]
    pub name: String,
    /// One-based line of the scenario keyword.
    #[serde(default)]
    pub line: usize,
    /// Element kind, `scenario` or `background`.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Tags applied to the scenario, inherited ones included.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    /// Steps in execution order, hooks included.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One step or hook invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Step keyword with its trailing space, e.g. `Given ` or `Before `.
    #[serde(default)]
    pub keyword: String,
    /// Step text; empty for hooks.
    #[serde(default)]
    pub name: String,
    /// One-based source line, absent for hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Whether the engine hides this step from pretty output.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    /// Outcome of the step.
    #[serde(default)]
    pub result: StepResult,
}

/// Outcome of a single step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Status string as produced by the engine.
    #[serde(default)]
    pub status: String,
    /// Duration in nanoseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Error payload for failed steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<ErrorPayload>,
}

/// Failure information attached to a step.
///
/// Engines emit either a structured error carrying a type name and message,
/// or a bare string (usually a stack trace).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    /// Bare error text.
    Text(String),
    /// Structured error.
    Error {
        /// Error type name, e.g. `AssertionError`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Error message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// A Gherkin tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag text including the leading `@`.
    pub name: String,
    /// One-based source line.
    #[serde(default)]
    pub line: usize,
}

/// Step statuses known to the bundled engines and formatters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepStatus {
    /// The step ran and succeeded.
    Passed,
    /// The step ran and failed.
    Failed,
    /// The step was not run because an earlier one did not pass.
    Skipped,
    /// No step definition matched.
    Undefined,
    /// More than one step definition matched.
    Ambiguous,
    /// The step definition is not finished.
    Pending,
}

impl StepStatus {
    /// The lowercase label used in cucumber JSON.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Undefined => "undefined",
            Self::Ambiguous => "ambiguous",
            Self::Pending => "pending",
        }
    }

    /// Parse a cucumber JSON status label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "undefined" => Some(Self::Undefined),
            "ambiguous" => Some(Self::Ambiguous),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

#[cfg(test)]
#[expect(
    clippy::expect_used,
    reason = "tests fail loudly on malformed fixtures"
)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
      {
        "id": "checkout",
        "uri": "features/checkout.feature",
        "keyword": "Feature",
        "name": "Checkout",
        "line": 1,
        "elements": [
          {
            "id": "checkout;pay-by-card",
            "keyword": "Scenario",
            "name": "Pay by card",
            "line": 3,
            "type": "scenario",
            "steps": [
              {"keyword": "Before ", "hidden": true, "result": {"status": "passed", "duration": 1200}},
              {"keyword": "Given ", "name": "a basket", "line": 4, "match": {"location": "steps.js:3"},
               "result": {"status": "passed", "duration": 1500000}},
              {"keyword": "Then ", "name": "it is paid", "line": 5,
               "result": {"status": "failed", "error_message": {"name": "AssertionError", "message": "expected true", "stack": "..."}}},
              {"keyword": "And ", "name": "a receipt", "line": 6,
               "result": {"status": "skipped", "error_message": "plain text"}}
            ]
          }
        ]
      }
    ]"#;

    #[test]
    fn parses_cucumber_json() {
        let tree = ResultTree::from_json(SAMPLE).expect("sample parses");
        assert_eq!(tree.features.len(), 1);
        assert_eq!(tree.step_count(), 4);

        let steps: Vec<_> = tree.steps().map(|(_, _, step)| step).collect();
        let hook = steps.first().expect("hook step");
        assert_eq!(hook.keyword, "Before ");
        assert!(hook.name.is_empty());
        assert!(hook.hidden);

        let failing = steps.get(2).expect("failing step");
        assert_eq!(
            failing.result.error_message,
            Some(ErrorPayload::Error {
                name: Some("AssertionError".to_string()),
                message: Some("expected true".to_string()),
            })
        );

        let skipped = steps.get(3).expect("skipped step");
        assert_eq!(
            skipped.result.error_message,
            Some(ErrorPayload::Text("plain text".to_string()))
        );
    }

    #[test]
    fn serialises_back_to_equivalent_tree() {
        let tree = ResultTree::from_json(SAMPLE).expect("sample parses");
        let text = serde_json::to_string(&tree).expect("serialise");
        assert_eq!(ResultTree::from_json(&text).expect("reparse"), tree);
    }

    #[test]
    fn rejects_non_array_input() {
        assert!(ResultTree::from_json(r#"{"features": []}"#).is_err());
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            StepStatus::Passed,
            StepStatus::Failed,
            StepStatus::Skipped,
            StepStatus::Undefined,
            StepStatus::Ambiguous,
            StepStatus::Pending,
        ] {
            assert_eq!(StepStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(StepStatus::parse("exploded"), None);
    }
}
