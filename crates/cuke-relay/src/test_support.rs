//! Shared test support utilities for cuke-relay tests.
//!
//! This module provides common infrastructure for both unit and integration
//! tests, including:
//! - a reporter that records every call
//! - an engine that replays a fixed result tree
//! - result tree builders
//! - scratch spec directories

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tempfile::TempDir;

use crate::engine::{Engine, EngineError, HostContext, Listener, Listeners, Runtime};
use crate::options::RunOptions;
use crate::report::{ReportError, ReportRecord, Reporter};
use crate::results::{Element, ErrorPayload, Feature, ResultTree, Step, StepResult, StepStatus};

/// One reporting call as seen by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `reset(framework)`.
    Reset(String),
    /// `submit(record)`.
    Submit(ReportRecord),
    /// `completed(framework)`.
    Completed(String),
}

/// Reporter that records calls in order and can be told to fail one kind.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_on: Option<&'static str>,
}

impl RecordingReporter {
    /// A reporter whose `call` RPC (`reset`, `submit` or `completed`) is
    /// rejected.
    #[must_use]
    pub fn failing_on(call: &'static str) -> Self {
        Self {
            fail_on: Some(call),
            ..Self::default()
        }
    }

    /// Every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records passed to `submit`, in order.
    #[must_use]
    pub fn submitted(&self) -> Vec<ReportRecord> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Submit(record) => Some(record),
                Call::Reset(_) | Call::Completed(_) => None,
            })
            .collect()
    }

    /// Number of `completed` calls.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Completed(_)))
            .count()
    }

    fn record(&self, name: &'static str, call: Call) -> Result<(), ReportError> {
        if self.fail_on == Some(name) {
            return Err(ReportError::Rejected {
                call: name,
                reason: "rejected by test reporter".to_string(),
            });
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        Ok(())
    }
}

impl Reporter for RecordingReporter {
    async fn reset(&self, framework: &str) -> Result<(), ReportError> {
        self.record("reset", Call::Reset(framework.to_string()))
    }

    async fn submit(&self, record: &ReportRecord) -> Result<(), ReportError> {
        self.record("submit", Call::Submit(record.clone()))
    }

    async fn completed(&self, framework: &str) -> Result<(), ReportError> {
        self.record("completed", Call::Completed(framework.to_string()))
    }
}

#[derive(Debug, Default)]
struct Gauge {
    configured: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    invalidated: Mutex<Vec<PathBuf>>,
}

/// Engine that replays a fixed result tree, optionally after a delay.
#[derive(Debug, Clone)]
pub struct StaticEngine {
    tree: Option<ResultTree>,
    delay: Option<Duration>,
    gauge: Arc<Gauge>,
}

impl Default for StaticEngine {
    fn default() -> Self {
        Self::new(sample_tree())
    }
}

impl StaticEngine {
    /// An engine whose every run produces `tree`.
    #[must_use]
    pub fn new(tree: ResultTree) -> Self {
        Self {
            tree: Some(tree),
            delay: None,
            gauge: Arc::default(),
        }
    }

    /// An engine whose every run crashes.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            tree: None,
            ..Self::default()
        }
    }

    /// Sleep for `delay` inside each run before finishing.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of runs configured so far.
    #[must_use]
    pub fn configured(&self) -> usize {
        self.gauge.configured.load(Ordering::SeqCst)
    }

    /// Highest number of runs that were executing at the same time.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    /// Paths passed to [`Engine::invalidate`], in order.
    #[must_use]
    pub fn invalidated(&self) -> Vec<PathBuf> {
        self.gauge
            .invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Engine for StaticEngine {
    type Runtime = StaticRuntime;

    fn configure(
        &self,
        _options: &RunOptions,
        context: &HostContext,
    ) -> Result<Self::Runtime, EngineError> {
        self.gauge.configured.fetch_add(1, Ordering::SeqCst);
        Ok(StaticRuntime {
            tree: self.tree.clone(),
            delay: self.delay,
            gauge: Arc::clone(&self.gauge),
            listeners: Listeners::default(),
            context: context.clone(),
        })
    }

    fn invalidate(&self, path: &Path) {
        self.gauge
            .invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_path_buf());
    }
}

/// Runtime produced by [`StaticEngine`].
#[derive(Debug)]
pub struct StaticRuntime {
    tree: Option<ResultTree>,
    delay: Option<Duration>,
    gauge: Arc<Gauge>,
    listeners: Listeners,
    context: HostContext,
}

impl Runtime for StaticRuntime {
    fn attach_listener(&mut self, listener: Box<dyn Listener>) {
        self.listeners.push(listener);
    }

    async fn start(mut self) -> Result<(), EngineError> {
        let active = self.gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);

        let tree = self
            .tree
            .take()
            .ok_or_else(|| EngineError::Crashed("static engine failure".to_string()))?;
        let mut listeners = self.listeners;
        self.context.enter(|| listeners.replay(&tree));
        Ok(())
    }
}

/// A passing step.
#[must_use]
pub fn passed_step(keyword: &str, name: &str) -> Step {
    step(keyword, name, StepStatus::Passed, None)
}

/// A failing step carrying `error`.
#[must_use]
pub fn failed_step(keyword: &str, name: &str, error: ErrorPayload) -> Step {
    step(keyword, name, StepStatus::Failed, Some(error))
}

/// A step with an explicit status and optional error.
#[must_use]
pub fn step(
    keyword: &str,
    name: &str,
    status: StepStatus,
    error: Option<ErrorPayload>,
) -> Step {
    Step {
        keyword: keyword.to_string(),
        name: name.to_string(),
        line: None,
        hidden: false,
        result: StepResult {
            status: status.as_str().to_string(),
            duration: None,
            error_message: error,
        },
    }
}

/// A scenario element.
#[must_use]
pub fn element(id: &str, name: &str, steps: Vec<Step>) -> Element {
    Element {
        id: id.to_string(),
        keyword: "Scenario".to_string(),
        name: name.to_string(),
        kind: "scenario".to_string(),
        steps,
        ..Element::default()
    }
}

/// A feature holding `elements`.
#[must_use]
pub fn feature(name: &str, elements: Vec<Element>) -> Feature {
    Feature {
        id: name.to_lowercase().replace(' ', "-"),
        keyword: "Feature".to_string(),
        name: name.to_string(),
        elements,
        ..Feature::default()
    }
}

/// One feature, one scenario: a passing `Before` hook, a passing step and a
/// step failing with a named error.
#[must_use]
pub fn sample_tree() -> ResultTree {
    let mut given = passed_step("Given ", "a basket");
    given.result.duration = Some(1_500_000);
    ResultTree {
        features: vec![feature(
            "Checkout",
            vec![element(
                "checkout;pay",
                "Pay",
                vec![
                    passed_step("Before ", ""),
                    given,
                    failed_step(
                        "Then ",
                        "the order is paid",
                        ErrorPayload::Error {
                            name: Some("AssertionError".to_string()),
                            message: Some("expected true".to_string()),
                        },
                    ),
                ],
            )],
        )],
    }
}

/// Scratch test tree with a `<framework>/features` directory.
#[derive(Debug)]
pub struct SpecDir {
    /// Root of the test tree.
    pub dir: TempDir,
    framework: String,
}

impl SpecDir {
    /// Create an empty test tree for `framework`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directories cannot be created.
    pub fn new(framework: &str) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join(framework).join("features"))?;
        Ok(Self {
            dir,
            framework: framework.to_string(),
        })
    }

    /// Root of the test tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// The features directory.
    #[must_use]
    pub fn features(&self) -> PathBuf {
        self.root().join(&self.framework).join("features")
    }

    /// Write `content` to `name` below the features directory.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be written.
    pub fn write(&self, name: &str, content: &str) -> std::io::Result<PathBuf> {
        let path = self.features().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }
}
