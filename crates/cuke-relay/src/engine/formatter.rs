//! Built-in output formatters.
//!
//! A formatter is selected with `--format <name>` or `--format <name>:<path>`
//! and renders run progress as a [`Listener`]. Without a path, output goes to
//! stdout. Known names are `progress`, `summary`, `pretty` and `json`.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::warn;

use super::{EngineError, Listener};
use crate::results::{Element, ErrorPayload, Feature, ResultTree, Step, StepStatus};

/// Output styles understood by [`Formatter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// One character per step, then a summary.
    Progress,
    /// Only the final counts.
    Summary,
    /// Features, scenarios and steps as they run.
    Pretty,
    /// The complete result tree as cucumber JSON.
    Json,
}

impl FormatKind {
    /// Parse a format name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "progress" => Some(Self::Progress),
            "summary" => Some(Self::Summary),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Listener rendering a run to a writer.
pub struct Formatter {
    kind: FormatKind,
    out: Box<dyn Write + Send>,
    current: Option<(String, String)>,
    failed_writes: bool,
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formatter")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Formatter {
    /// Create a formatter writing to `out`.
    #[must_use]
    pub fn new(kind: FormatKind, out: Box<dyn Write + Send>) -> Self {
        Self {
            kind,
            out,
            current: None,
            failed_writes: false,
        }
    }

    /// Build the formatter for a `--format` selector.
    ///
    /// Returns `Ok(None)` for names no built-in formatter handles.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] when the output file cannot be created.
    pub fn from_selector(selector: &str) -> Result<Option<Self>, EngineError> {
        let (name, target) = match selector.split_once(':') {
            Some((name, path)) if !path.is_empty() => (name, Some(Path::new(path))),
            _ => (selector, None),
        };
        let Some(kind) = FormatKind::parse(name) else {
            warn!(format = selector, "no built-in formatter for format");
            return Ok(None);
        };
        let out: Box<dyn Write + Send> = match target {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(io::stdout()),
        };
        Ok(Some(Self::new(kind, out)))
    }

    fn emit(&mut self, text: &str) {
        if self.out.write_all(text.as_bytes()).is_err() && !self.failed_writes {
            self.failed_writes = true;
            warn!(kind = ?self.kind, "formatter output failed");
        }
    }

    fn pretty_step(&mut self, feature: &Feature, element: &Element, step: &Step) {
        let key = (feature.id.clone(), element.id.clone());
        if self.current.as_ref().is_none_or(|(feature_id, _)| *feature_id != key.0) {
            self.emit(&format!("{}: {}\n", feature.keyword, feature.name));
        }
        if self.current.as_ref() != Some(&key) {
            self.emit(&format!("\n  {}: {}\n", element.keyword, element.name));
        }
        self.current = Some(key);
        if step.hidden && status_of(step) == Some(StepStatus::Passed) {
            return;
        }
        self.emit(&format!(
            "    {} {}{}\n",
            symbol(status_of(step)),
            step.keyword,
            step.name
        ));
    }

    fn failures(&mut self, tree: &ResultTree) {
        let failing: Vec<String> = tree
            .steps()
            .filter(|(_, _, step)| status_of(step) == Some(StepStatus::Failed))
            .map(|(feature, element, step)| {
                let detail = step
                    .result
                    .error_message
                    .as_ref()
                    .map(describe_error)
                    .unwrap_or_default();
                format!(
                    "{} > {} > {}{}\n      {detail}\n",
                    feature.name, element.name, step.keyword, step.name
                )
            })
            .collect();
        if failing.is_empty() {
            return;
        }
        self.emit("\nFailures:\n\n");
        for (index, failure) in failing.iter().enumerate() {
            self.emit(&format!("{}) {failure}", index + 1));
        }
    }
}

impl Listener for Formatter {
    fn step_finished(&mut self, feature: &Feature, element: &Element, step: &Step) {
        match self.kind {
            FormatKind::Progress => {
                if step.hidden && status_of(step) == Some(StepStatus::Passed) {
                    return;
                }
                self.emit(symbol(status_of(step)));
            }
            FormatKind::Pretty => self.pretty_step(feature, element, step),
            FormatKind::Summary | FormatKind::Json => {}
        }
    }

    fn run_finished(&mut self, tree: &ResultTree) {
        match self.kind {
            FormatKind::Json => match serde_json::to_string_pretty(tree) {
                Ok(text) => self.emit(&format!("{text}\n")),
                Err(err) => warn!(error = %err, "failed to render JSON results"),
            },
            FormatKind::Progress => {
                self.emit("\n");
                self.failures(tree);
                self.emit(&format!("\n{}", Summary::of(tree)));
            }
            FormatKind::Pretty => {
                self.failures(tree);
                self.emit(&format!("\n{}", Summary::of(tree)));
            }
            FormatKind::Summary => self.emit(&Summary::of(tree).to_string()),
        }
        if self.out.flush().is_err() {
            warn!(kind = ?self.kind, "formatter flush failed");
        }
    }
}

/// Scenario and step counts by status.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    scenarios: Counts,
    steps: Counts,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Counts {
    total: usize,
    by_status: Vec<(StepStatus, usize)>,
}

impl Counts {
    fn add(&mut self, status: StepStatus) {
        self.total += 1;
        if let Some(entry) = self.by_status.iter_mut().find(|(s, _)| *s == status) {
            entry.1 += 1;
        } else {
            self.by_status.push((status, 1));
        }
    }

    fn count(&self, status: StepStatus) -> usize {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, n)| *n)
    }
}

impl fmt::Display for Counts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.by_status.is_empty() {
            return Ok(());
        }
        let parts: Vec<String> = ORDER
            .iter()
            .filter_map(|status| {
                let count = self.count(*status);
                (count > 0).then(|| format!("{count} {}", status.as_str()))
            })
            .collect();
        write!(f, " ({})", parts.join(", "))
    }
}

const ORDER: [StepStatus; 6] = [
    StepStatus::Failed,
    StepStatus::Ambiguous,
    StepStatus::Undefined,
    StepStatus::Pending,
    StepStatus::Skipped,
    StepStatus::Passed,
];

impl Summary {
    /// Count scenarios and visible steps in `tree`.
    ///
    /// A scenario takes the most severe status among its steps; hooks count
    /// toward the scenario status but not the step total.
    #[must_use]
    pub fn of(tree: &ResultTree) -> Self {
        let mut summary = Self::default();
        for element in tree.features.iter().flat_map(|feature| &feature.elements) {
            let mut worst = StepStatus::Passed;
            for step in &element.steps {
                let status = status_of(step).unwrap_or(StepStatus::Failed);
                if severity(status) < severity(worst) {
                    worst = status;
                }
                if !step.hidden {
                    summary.steps.add(status);
                }
            }
            summary.scenarios.add(worst);
        }
        summary
    }

    /// Number of scenarios with the given overall status.
    #[must_use]
    pub fn scenarios(&self, status: StepStatus) -> usize {
        self.scenarios.count(status)
    }

    /// Number of visible steps with the given status.
    #[must_use]
    pub fn steps(&self, status: StepStatus) -> usize {
        self.steps.count(status)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} scenario{}{}",
            self.scenarios.total,
            plural(self.scenarios.total),
            self.scenarios
        )?;
        writeln!(
            f,
            "{} step{}{}",
            self.steps.total,
            plural(self.steps.total),
            self.steps
        )
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn severity(status: StepStatus) -> usize {
    ORDER.iter().position(|s| *s == status).unwrap_or(0)
}

fn status_of(step: &Step) -> Option<StepStatus> {
    StepStatus::parse(&step.result.status)
}

fn symbol(status: Option<StepStatus>) -> &'static str {
    match status {
        Some(StepStatus::Passed) => ".",
        Some(StepStatus::Failed) | None => "F",
        Some(StepStatus::Skipped) => "-",
        Some(StepStatus::Undefined) => "U",
        Some(StepStatus::Ambiguous) => "A",
        Some(StepStatus::Pending) => "P",
    }
}

fn describe_error(payload: &ErrorPayload) -> String {
    match payload {
        ErrorPayload::Text(text) => text.clone(),
        ErrorPayload::Error { name, message } => match (name, message) {
            (Some(name), Some(message)) => format!("{name}: {message}"),
            (Some(text), None) | (None, Some(text)) => text.clone(),
            (None, None) => String::new(),
        },
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests inspect captured output")]
mod tests {
    use std::sync::{Arc, Mutex};

    use rstest::rstest;

    use super::*;
    use crate::results::StepResult;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .map_err(|_| io::Error::other("poisoned"))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().expect("lock").clone()).expect("utf8")
        }
    }

    fn step(keyword: &str, name: &str, status: StepStatus) -> Step {
        Step {
            keyword: keyword.to_string(),
            name: name.to_string(),
            hidden: keyword.trim() == "Before",
            result: StepResult {
                status: status.as_str().to_string(),
                ..StepResult::default()
            },
            ..Step::default()
        }
    }

    fn tree() -> ResultTree {
        let mut failing = step("Then ", "it is paid", StepStatus::Failed);
        failing.result.error_message = Some(ErrorPayload::Error {
            name: Some("AssertionError".to_string()),
            message: Some("expected true".to_string()),
        });
        ResultTree {
            features: vec![Feature {
                id: "checkout".to_string(),
                keyword: "Feature".to_string(),
                name: "Checkout".to_string(),
                elements: vec![
                    Element {
                        id: "checkout;pay".to_string(),
                        keyword: "Scenario".to_string(),
                        name: "Pay".to_string(),
                        steps: vec![
                            step("Before ", "", StepStatus::Passed),
                            step("Given ", "a basket", StepStatus::Passed),
                            failing,
                            step("And ", "a receipt", StepStatus::Skipped),
                        ],
                        ..Element::default()
                    },
                    Element {
                        id: "checkout;browse".to_string(),
                        keyword: "Scenario".to_string(),
                        name: "Browse".to_string(),
                        steps: vec![step("Given ", "a shop", StepStatus::Passed)],
                        ..Element::default()
                    },
                ],
                ..Feature::default()
            }],
        }
    }

    fn render(kind: FormatKind) -> String {
        let captured = Captured::default();
        let mut formatter = Formatter::new(kind, Box::new(captured.clone()));
        let tree = tree();
        for (feature, element, step) in tree.steps() {
            formatter.step_finished(feature, element, step);
        }
        formatter.run_finished(&tree);
        captured.text()
    }

    #[test]
    fn progress_prints_one_symbol_per_visible_step() {
        let output = render(FormatKind::Progress);
        assert!(output.starts_with(".F-.\n"), "got {output:?}");
        assert!(output.contains("1) Checkout > Pay > Then it is paid"));
        assert!(output.contains("AssertionError: expected true"));
        assert!(output.contains("2 scenarios (1 failed, 1 passed)"));
        assert!(output.contains("4 steps (1 failed, 1 skipped, 2 passed)"));
    }

    #[test]
    fn pretty_prints_headers_once() {
        let output = render(FormatKind::Pretty);
        assert_eq!(output.matches("Feature: Checkout").count(), 1);
        assert!(output.contains("  Scenario: Browse"));
        assert!(output.contains("    F Then it is paid"));
    }

    #[test]
    fn json_renders_the_tree() {
        let output = render(FormatKind::Json);
        let parsed = ResultTree::from_json(&output).expect("valid JSON");
        assert_eq!(parsed, tree());
    }

    #[test]
    fn summary_only_prints_counts() {
        let output = render(FormatKind::Summary);
        assert!(output.starts_with("2 scenarios"));
        assert!(!output.contains('.'));
    }

    #[rstest]
    #[case("progress", true)]
    #[case("pretty", true)]
    #[case("rerun", false)]
    fn selector_resolves_known_names(#[case] selector: &str, #[case] known: bool) {
        let formatter = Formatter::from_selector(selector).expect("selector");
        assert_eq!(formatter.is_some(), known);
    }

    #[test]
    fn selector_with_path_writes_to_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.json");
        let selector = format!("json:{}", path.display());
        let mut formatter = Formatter::from_selector(&selector)
            .expect("selector")
            .expect("known format");
        formatter.run_finished(&tree());
        drop(formatter);
        let written = std::fs::read_to_string(&path).expect("written");
        assert_eq!(ResultTree::from_json(&written).expect("valid"), tree());
    }

    #[test]
    fn summary_counts_scenarios_by_worst_step() {
        let summary = Summary::of(&tree());
        assert_eq!(summary.scenarios(StepStatus::Failed), 1);
        assert_eq!(summary.scenarios(StepStatus::Passed), 1);
        assert_eq!(summary.steps(StepStatus::Skipped), 1);
    }
}
