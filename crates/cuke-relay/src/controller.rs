//! Run controller: owns the lifecycle of one test run.
//!
//! A run moves through `Idle -> Running -> Reporting -> Idle`. While
//! Running, the controller builds the run options, prepares the engine
//! through the [`EngineAdapter`], attaches a [`ResultCollector`] and the
//! built-in formatter, and waits for the engine to finish. While Reporting,
//! the normalised records are sent as one batch: `reset`, one `submit` per
//! record, then `completed`.
//!
//! Errors are returned to the caller unchanged. Nothing is retried and a
//! partially submitted batch is left as is; the next triggered run replaces
//! it.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span};

use crate::engine::{Engine, EngineAdapter, EngineError, HostContext, ResultCollector, Runtime};
use crate::normalise::normalise;
use crate::options::{RunOptions, RunSettings};
use crate::report::{ReportError, ReportRecord, Reporter};
use crate::results::StepStatus;
use crate::watcher::registry::SpecFile;

/// Phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// No run in progress.
    #[default]
    Idle,
    /// The engine is executing.
    Running,
    /// Records are being submitted.
    Reporting,
}

/// Errors that end a run without a complete report batch.
#[derive(Debug, Error)]
pub enum RunError {
    /// The engine could not be configured or crashed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A reporting call failed.
    #[error(transparent)]
    Report(#[from] ReportError),

    /// The engine finished without delivering a result tree.
    #[error("engine finished without delivering results")]
    MissingResults,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Sequence number of the run, starting at 1.
    pub run: u64,
    /// Records submitted to the reporting service, in order.
    pub records: Vec<ReportRecord>,
}

impl RunOutcome {
    /// Number of submitted records with a failed result.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.result == StepStatus::Failed.as_str())
            .count()
    }
}

/// Drives runs of one engine for one framework.
#[derive(Debug)]
pub struct RunController<E, R> {
    framework: String,
    settings: RunSettings,
    adapter: EngineAdapter<E>,
    reporter: R,
    state: watch::Sender<RunState>,
    runs: AtomicU64,
}

impl<E: Engine, R: Reporter> RunController<E, R> {
    /// Create a controller reporting under `framework`.
    #[must_use]
    pub fn new(
        framework: impl Into<String>,
        settings: RunSettings,
        engine: E,
        reporter: R,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            framework: framework.into(),
            settings,
            adapter: EngineAdapter::new(engine),
            reporter,
            state,
            runs: AtomicU64::new(0),
        }
    }

    /// Framework tag attached to every record.
    #[must_use]
    pub fn framework(&self) -> &str {
        &self.framework
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Receive phase changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Number of runs started so far.
    #[must_use]
    pub fn runs_started(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Borrow the engine.
    #[must_use]
    pub fn engine(&self) -> &E {
        self.adapter.engine()
    }

    /// Borrow the reporter.
    #[must_use]
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Execute one run triggered by `trigger` and report its results.
    ///
    /// The controller is back in [`RunState::Idle`] when the returned future
    /// completes, whether the run succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the engine fails, delivers no results, or a
    /// reporting call fails.
    pub async fn run(&self, trigger: &SpecFile) -> Result<RunOutcome, RunError> {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("run", framework = %self.framework, run);
        self.execute(trigger, run).instrument(span).await
    }

    async fn execute(&self, trigger: &SpecFile, run: u64) -> Result<RunOutcome, RunError> {
        let _idle = IdleOnDrop(&self.state);
        self.state.send_replace(RunState::Running);
        info!(trigger = %trigger.path.display(), "run started");

        let options = RunOptions::build(&self.settings);
        debug!(tokens = ?options.tokens(), "run options");
        let context = HostContext::capture(&self.framework, run);

        let mut runtime = self.adapter.prepare(&trigger.path, &options, &context)?;
        let (collector, tree) = ResultCollector::channel();
        runtime.attach_listener(Box::new(collector));
        if let Some(formatter) = self.adapter.builtin_formatter(&options)? {
            runtime.attach_listener(formatter);
        }
        runtime.start().await?;
        let tree = tree.await.map_err(|_| RunError::MissingResults)?;

        self.state.send_replace(RunState::Reporting);
        let records = normalise(&tree, &self.framework);
        self.submit(&records).await?;

        let outcome = RunOutcome { run, records };
        info!(
            records = outcome.records.len(),
            failed = outcome.failed(),
            "run reported"
        );
        Ok(outcome)
    }

    async fn submit(&self, records: &[ReportRecord]) -> Result<(), ReportError> {
        self.reporter.reset(&self.framework).await?;
        for record in records {
            self.reporter.submit(record).await?;
        }
        self.reporter.completed(&self.framework).await
    }
}

struct IdleOnDrop<'a>(&'a watch::Sender<RunState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(RunState::Idle);
    }
}
