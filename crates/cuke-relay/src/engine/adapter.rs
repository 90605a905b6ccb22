//! Engine adapter: the single place engine-specific setup happens.

use std::path::Path;

use tracing::debug;

use super::formatter::Formatter;
use super::{Engine, EngineError, HostContext, Listener};
use crate::options::RunOptions;

/// Wraps an [`Engine`] so a run can be prepared as one opaque step.
#[derive(Debug)]
pub struct EngineAdapter<E> {
    engine: E,
}

impl<E: Engine> EngineAdapter<E> {
    /// Wrap `engine`.
    #[must_use]
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Borrow the wrapped engine.
    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Prepare a runtime for one run triggered by `trigger`.
    ///
    /// Cached state for the trigger file is dropped first so edited sources
    /// are re-read.
    ///
    /// # Errors
    ///
    /// Propagates the engine's configuration error.
    pub fn prepare(
        &self,
        trigger: &Path,
        options: &RunOptions,
        context: &HostContext,
    ) -> Result<E::Runtime, EngineError> {
        debug!(path = %trigger.display(), "invalidating cached spec source");
        self.engine.invalidate(trigger);
        self.engine.configure(options, context)
    }

    /// The built-in formatter for the run's `--format`, unless the engine
    /// renders its own output.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] when a formatter output file cannot be
    /// created.
    pub fn builtin_formatter(
        &self,
        options: &RunOptions,
    ) -> Result<Option<Box<dyn Listener>>, EngineError> {
        if self.engine.renders_own_output() {
            return Ok(None);
        }
        let Some(selector) = options.format() else {
            return Ok(None);
        };
        Ok(Formatter::from_selector(selector)?.map(|f| Box::new(f) as Box<dyn Listener>))
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests fail loudly on setup errors")]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use tracing::Span;

    use super::*;
    use crate::options::RunSettings;
    use crate::test_support::StaticEngine;

    fn options(format: &str) -> RunOptions {
        RunOptions::build(&RunSettings {
            program: Vec::new(),
            spec_root: PathBuf::from("/specs"),
            require: None,
            tags: Vec::new(),
            format: format.to_string(),
        })
    }

    #[derive(Default)]
    struct Tracking {
        invalidated: Mutex<Vec<PathBuf>>,
        own_output: bool,
    }

    impl Engine for Tracking {
        type Runtime = <StaticEngine as Engine>::Runtime;

        fn configure(
            &self,
            options: &RunOptions,
            context: &HostContext,
        ) -> Result<Self::Runtime, EngineError> {
            StaticEngine::default().configure(options, context)
        }

        fn invalidate(&self, path: &Path) {
            self.invalidated
                .lock()
                .expect("lock")
                .push(path.to_path_buf());
        }

        fn renders_own_output(&self) -> bool {
            self.own_output
        }
    }

    #[test]
    fn prepare_invalidates_the_trigger_first() {
        let adapter = EngineAdapter::new(Tracking::default());
        let context = HostContext::with_span("cucumber", 1, Span::none());
        adapter
            .prepare(Path::new("/specs/a.feature"), &options("progress"), &context)
            .expect("configured");
        assert_eq!(
            *adapter.engine().invalidated.lock().expect("lock"),
            [PathBuf::from("/specs/a.feature")]
        );
    }

    #[test]
    fn formatter_follows_the_format_option() {
        let adapter = EngineAdapter::new(Tracking::default());
        assert!(
            adapter
                .builtin_formatter(&options("progress"))
                .expect("formatter")
                .is_some()
        );
        assert!(
            adapter
                .builtin_formatter(&options(""))
                .expect("formatter")
                .is_none()
        );
    }

    #[test]
    fn engines_rendering_their_own_output_get_no_formatter() {
        let adapter = EngineAdapter::new(Tracking {
            own_output: true,
            ..Tracking::default()
        });
        assert!(
            adapter
                .builtin_formatter(&options("progress"))
                .expect("formatter")
                .is_none()
        );
    }
}
