//! Ambient host context for engine callbacks.
//!
//! Engines invoke callbacks (step definitions, hooks, completion handlers)
//! from wherever they happen to run, frequently a blocking worker thread that
//! has neither the run's tracing span nor any notion of which run it belongs
//! to. A [`HostContext`] is captured by the run controller and every callback
//! handed to an engine is wrapped with [`HostContext::enter`], which enters
//! the run span and installs the context as [`HostContext::current`] for the
//! duration of the call.

use std::cell::RefCell;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::Span;

thread_local! {
    static CURRENT: RefCell<Option<HostContext>> = const { RefCell::new(None) };
}

#[derive(Debug)]
struct Inner {
    framework: String,
    run: u64,
    span: Span,
    handle: Option<Handle>,
}

/// Host-side execution context for one run.
#[derive(Debug, Clone)]
pub struct HostContext {
    inner: Arc<Inner>,
}

impl HostContext {
    /// Capture the caller's current span and tokio runtime.
    #[must_use]
    pub fn capture(framework: impl Into<String>, run: u64) -> Self {
        Self::with_span(framework, run, Span::current())
    }

    /// Build a context around an explicit span.
    #[must_use]
    pub fn with_span(framework: impl Into<String>, run: u64, span: Span) -> Self {
        Self {
            inner: Arc::new(Inner {
                framework: framework.into(),
                run,
                span,
                handle: Handle::try_current().ok(),
            }),
        }
    }

    /// Framework tag of the run.
    #[must_use]
    pub fn framework(&self) -> &str {
        &self.inner.framework
    }

    /// Sequence number of the run.
    #[must_use]
    pub fn run(&self) -> u64 {
        self.inner.run
    }

    /// The run's tracing span.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    /// Handle to the host runtime, letting synchronous step code drive host
    /// futures with `handle.block_on(..)` from worker threads.
    #[must_use]
    pub fn handle(&self) -> Option<&Handle> {
        self.inner.handle.as_ref()
    }

    /// The context installed on this thread, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Run `f` with the span entered and this context installed.
    ///
    /// The previously installed context, if any, is restored afterwards,
    /// including when `f` unwinds.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let _entered = self.inner.span.enter();
        let _installed = Installed::new(self.clone());
        f()
    }
}

struct Installed {
    previous: Option<HostContext>,
}

impl Installed {
    fn new(context: HostContext) -> Self {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(context));
        Self { previous }
    }
}

impl Drop for Installed {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_context_outside_enter() {
        assert!(HostContext::current().is_none());
    }

    #[test]
    fn enter_installs_and_restores() {
        let outer = HostContext::with_span("cucumber", 1, Span::none());
        let inner = HostContext::with_span("cucumber", 2, Span::none());

        outer.enter(|| {
            assert_eq!(HostContext::current().map(|c| c.run()), Some(1));
            inner.enter(|| {
                assert_eq!(HostContext::current().map(|c| c.run()), Some(2));
            });
            assert_eq!(HostContext::current().map(|c| c.run()), Some(1));
        });
        assert!(HostContext::current().is_none());
    }

    #[test]
    fn entered_context_is_visible_on_another_thread() {
        let context = HostContext::with_span("cucumber", 7, Span::none());
        let seen = std::thread::spawn(move || {
            context.enter(|| HostContext::current().map(|c| c.run()))
        })
        .join()
        .ok()
        .flatten();
        assert_eq!(seen, Some(7));
    }

    #[test]
    fn context_is_restored_after_panic() {
        let context = HostContext::with_span("cucumber", 3, Span::none());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            context.enter(|| -> u8 { panic!("step blew up") })
        }));
        assert!(result.is_err());
        assert!(HostContext::current().is_none());
    }

    #[tokio::test]
    async fn capture_records_the_runtime_handle() {
        let context = HostContext::capture("cucumber", 1);
        assert!(context.handle().is_some());
        assert_eq!(context.framework(), "cucumber");
    }
}
