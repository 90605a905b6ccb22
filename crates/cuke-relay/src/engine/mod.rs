//! Engine invocation surface.
//!
//! An [`Engine`] turns [`RunOptions`] into a [`Runtime`]; listeners are
//! attached to the runtime, then [`Runtime::start`] executes the run. The
//! returned future is the completion continuation: it resolves once the
//! engine is finished and every listener has seen the final tree.
//!
//! Two engines ship with the crate:
//!
//! - [`command::CommandEngine`] drives an external cucumber-compatible CLI.
//! - [`local::LocalEngine`] parses features with `gherkin` and executes
//!   step definitions registered on a [`support::SupportCodeLibrary`].

use std::future::Future;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::options::RunOptions;
use crate::results::{Element, Feature, ResultTree, Step};

pub mod adapter;
pub mod command;
pub mod context;
pub mod formatter;
pub mod local;
pub mod support;
pub mod tags;

pub use adapter::EngineAdapter;
pub use context::HostContext;

/// Errors raised while configuring or running an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The options carried no program to execute.
    #[error("no engine program configured")]
    EmptyProgram,

    /// The engine process could not be started.
    #[error("failed to start engine '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The engine finished without producing structured results.
    #[error("engine exited ({status}) without writing results to {}", path.display())]
    MissingResults {
        /// Exit status of the engine process.
        status: String,
        /// Location the results were expected at.
        path: PathBuf,
    },

    /// The engine produced results that are not a valid result tree.
    #[error("malformed engine results: {0}")]
    MalformedResults(#[from] serde_json::Error),

    /// A feature file could not be parsed.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        /// Feature file path.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: Box<gherkin::ParseError>,
    },

    /// The tag filter is not a valid expression.
    #[error(transparent)]
    Tags(#[from] tags::TagExprError),

    /// Support code failed to register.
    #[error(transparent)]
    SupportCode(#[from] support::SupportCodeError),

    /// A run-level hook failed, aborting the run.
    #[error("{hook} hook failed: {message}")]
    Hook {
        /// Hook entry point name.
        hook: &'static str,
        /// Failure message.
        message: String,
    },

    /// The engine task panicked or was cancelled.
    #[error("engine crashed: {0}")]
    Crashed(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives run events from an engine.
pub trait Listener: Send {
    /// Called after each step (hooks included) completes.
    fn step_finished(&mut self, feature: &Feature, element: &Element, step: &Step) {
        let _ = (feature, element, step);
    }

    /// Called once with the complete tree when the run finishes.
    fn run_finished(&mut self, tree: &ResultTree);
}

/// Ordered set of attached listeners.
#[derive(Default)]
pub struct Listeners {
    inner: Vec<Box<dyn Listener>>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.inner.len())
            .finish()
    }
}

impl Listeners {
    /// Append a listener; listeners are notified in attachment order.
    pub fn push(&mut self, listener: Box<dyn Listener>) {
        self.inner.push(listener);
    }

    /// Number of attached listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no listener is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Broadcast a finished step.
    pub fn step_finished(&mut self, feature: &Feature, element: &Element, step: &Step) {
        for listener in &mut self.inner {
            listener.step_finished(feature, element, step);
        }
    }

    /// Broadcast the finished run.
    pub fn run_finished(&mut self, tree: &ResultTree) {
        for listener in &mut self.inner {
            listener.run_finished(tree);
        }
    }

    /// Replay a complete tree: every step in order, then the run end.
    pub fn replay(&mut self, tree: &ResultTree) {
        for (feature, element, step) in tree.steps() {
            self.step_finished(feature, element, step);
        }
        self.run_finished(tree);
    }
}

/// A configured, ready-to-start run.
pub trait Runtime: Send {
    /// Attach a listener before the run starts.
    fn attach_listener(&mut self, listener: Box<dyn Listener>);

    /// Execute the run; resolves when the engine has finished.
    fn start(self) -> impl Future<Output = Result<(), EngineError>> + Send;
}

/// A BDD engine able to configure runs.
pub trait Engine: Send + Sync {
    /// Runtime produced for one run.
    type Runtime: Runtime;

    /// Build a runtime for `options`, bound to the host `context`.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the options cannot be turned into a
    /// runnable configuration.
    fn configure(
        &self,
        options: &RunOptions,
        context: &HostContext,
    ) -> Result<Self::Runtime, EngineError>;

    /// Drop any cached state derived from `path`.
    fn invalidate(&self, path: &Path) {
        let _ = path;
    }

    /// Whether the engine renders its own `--format` output.
    fn renders_own_output(&self) -> bool {
        false
    }
}

/// Listener that hands the finished tree to a continuation.
#[derive(Debug)]
pub struct ResultCollector {
    sender: Option<oneshot::Sender<ResultTree>>,
}

impl ResultCollector {
    /// Create a collector and the receiving end of its continuation.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<ResultTree>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }
}

impl Listener for ResultCollector {
    fn run_finished(&mut self, tree: &ResultTree) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(tree.clone());
        }
    }
}

#[cfg(test)]
#[expect(
    clippy::expect_used,
    reason = "tests fail loudly when the continuation is not called"
)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Counting(Arc<Mutex<(usize, usize)>>);

    impl Listener for Counting {
        fn step_finished(&mut self, _: &Feature, _: &Element, _: &Step) {
            if let Ok(mut counts) = self.0.lock() {
                counts.0 += 1;
            }
        }

        fn run_finished(&mut self, _: &ResultTree) {
            if let Ok(mut counts) = self.0.lock() {
                counts.1 += 1;
            }
        }
    }

    fn tree() -> ResultTree {
        ResultTree {
            features: vec![Feature {
                elements: vec![Element {
                    steps: vec![Step::default(), Step::default()],
                    ..Element::default()
                }],
                ..Feature::default()
            }],
        }
    }

    #[test]
    fn replay_visits_every_step_then_finishes() {
        let counting = Counting::default();
        let mut listeners = Listeners::default();
        listeners.push(Box::new(counting.clone()));
        listeners.replay(&tree());
        let counts = *counting.0.lock().expect("lock");
        assert_eq!(counts, (2, 1));
    }

    #[tokio::test]
    async fn collector_delivers_the_tree_once() {
        let (mut collector, receiver) = ResultCollector::channel();
        collector.run_finished(&tree());
        collector.run_finished(&ResultTree::default());
        let delivered = receiver.await.expect("tree delivered");
        assert_eq!(delivered, tree());
    }

    #[tokio::test]
    async fn dropped_collector_closes_the_continuation() {
        let (collector, receiver) = ResultCollector::channel();
        drop(collector);
        assert!(receiver.await.is_err());
    }
}
