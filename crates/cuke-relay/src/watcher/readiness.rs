//! Engine readiness notifications.

use tokio::sync::watch;

/// Lifecycle state of the engine resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Not usable yet.
    #[default]
    Pending,
    /// Runs may be triggered.
    Ready,
    /// Shut down; no further runs.
    Stopped,
}

/// Publishes [`EngineState`] changes to any number of subscribers.
///
/// Marking the engine ready again after it was ready (for example after a
/// restart) is delivered to subscribers as a fresh notification.
#[derive(Debug)]
pub struct ReadinessNotifier {
    state: watch::Sender<EngineState>,
}

impl Default for ReadinessNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessNotifier {
    /// Create a notifier in the [`EngineState::Pending`] state.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(EngineState::Pending);
        Self { state }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Signal that the engine is ready.
    pub fn mark_ready(&self) {
        self.state.send_replace(EngineState::Ready);
    }

    /// Signal that the engine is gone for good.
    pub fn stop(&self) {
        self.state.send_replace(EngineState::Stopped);
    }

    /// Receive state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }
}
