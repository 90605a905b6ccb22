//! Change watcher and run scheduler.
//!
//! [`RunScheduler`] owns two tasks. The watch task waits for the engine to
//! be reported ready, subscribes to the spec registry and debounces bursts
//! of events: the last event of a burst is handed on once no further event
//! arrives for the quiet period. The worker task runs the controller for
//! each handed-on trigger, one run at a time. Triggers arriving while a run
//! is in progress collapse into a single pending re-run.
//!
//! Run errors are logged and the scheduler keeps waiting for the next
//! change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::controller::RunController;
use crate::engine::Engine;
use crate::report::Reporter;

pub mod readiness;
pub mod registry;

use readiness::EngineState;
use registry::{SpecFile, SpecRegistry};

/// Debounced, serialising trigger for a [`RunController`].
#[derive(Debug)]
pub struct RunScheduler<E, R, G> {
    controller: Arc<RunController<E, R>>,
    registry: Arc<G>,
    readiness: watch::Receiver<EngineState>,
    debounce: Duration,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<E, R, G> RunScheduler<E, R, G>
where
    E: Engine + 'static,
    R: Reporter + 'static,
    G: SpecRegistry + 'static,
{
    /// Create a stopped scheduler.
    #[must_use]
    pub fn new(
        controller: Arc<RunController<E, R>>,
        registry: Arc<G>,
        readiness: watch::Receiver<EngineState>,
        debounce: Duration,
    ) -> Self {
        Self {
            controller,
            registry,
            readiness,
            debounce,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// The controller runs are scheduled on.
    #[must_use]
    pub fn controller(&self) -> &Arc<RunController<E, R>> {
        &self.controller
    }

    /// Whether the scheduler's tasks have been spawned.
    #[must_use]
    pub fn is_started(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawn the watch and worker tasks. Starting twice is a no-op; a
    /// stopped scheduler can be started again.
    pub fn start(&mut self) {
        if self.is_started() {
            return;
        }
        self.cancel = CancellationToken::new();
        let (pending_tx, pending_rx) = watch::channel(None);

        let watch = WatchLoop {
            framework: self.controller.framework().to_string(),
            registry: Arc::clone(&self.registry),
            readiness: self.readiness.clone(),
            debounce: self.debounce,
            cancel: self.cancel.clone(),
            pending: pending_tx,
        };
        self.tasks.push(tokio::spawn(watch.run()));
        self.tasks.push(tokio::spawn(work(
            Arc::clone(&self.controller),
            pending_rx,
            self.cancel.clone(),
        )));
    }

    /// Stop watching and wait for both tasks to finish.
    ///
    /// A run already in progress is allowed to complete.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                error!(error = %err, "scheduler task ended abnormally");
            }
        }
    }
}

struct WatchLoop<G> {
    framework: String,
    registry: Arc<G>,
    readiness: watch::Receiver<EngineState>,
    debounce: Duration,
    cancel: CancellationToken,
    pending: watch::Sender<Option<SpecFile>>,
}

impl<G: SpecRegistry> WatchLoop<G> {
    async fn run(mut self) {
        let mut first = true;
        while self.await_ready(first).await {
            first = false;
            info!(framework = %self.framework, "engine ready, watching spec changes");
            if !self.watch_subscription().await {
                return;
            }
            debug!("spec subscription ended");
        }
    }

    /// Wait until the engine is ready. The first wait accepts the current
    /// state; later waits need a fresh ready signal.
    async fn await_ready(&mut self, first: bool) -> bool {
        let current = *self.readiness.borrow_and_update();
        if first {
            match current {
                EngineState::Ready => return true,
                EngineState::Stopped => return false,
                EngineState::Pending => {}
            }
        }
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                changed = self.readiness.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
            match *self.readiness.borrow_and_update() {
                EngineState::Ready => return true,
                EngineState::Stopped => return false,
                EngineState::Pending => {}
            }
        }
    }

    /// Debounce one subscription's events. Returns `false` when the
    /// scheduler should stop altogether.
    async fn watch_subscription(&mut self) -> bool {
        let mut events = self.registry.subscribe(&self.framework);
        let mut last: Option<SpecFile> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                changed = self.readiness.changed() => {
                    let stopped = changed.is_err()
                        || *self.readiness.borrow_and_update() == EngineState::Stopped;
                    if stopped {
                        return false;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        self.flush(&mut last);
                        return true;
                    };
                    debug!(kind = event.kind(), path = %event.file().path.display(), "spec change");
                    last = Some(event.file().clone());
                    deadline = Some(Instant::now() + self.debounce);
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.flush(&mut last);
                }
            }
        }
    }

    fn flush(&self, last: &mut Option<SpecFile>) {
        if let Some(file) = last.take() {
            debug!(path = %file.path.display(), "scheduling run");
            self.pending.send_replace(Some(file));
        }
    }
}

async fn work<E, R>(
    controller: Arc<RunController<E, R>>,
    mut pending: watch::Receiver<Option<SpecFile>>,
    cancel: CancellationToken,
) where
    E: Engine,
    R: Reporter,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            changed = pending.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        let Some(trigger) = pending.borrow_and_update().clone() else {
            continue;
        };
        if let Err(err) = controller.run(&trigger).await {
            error!(error = %err, trigger = %trigger.path.display(), "run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::options::RunSettings;
    use crate::test_support::{RecordingReporter, StaticEngine};
    use crate::watcher::readiness::ReadinessNotifier;
    use crate::watcher::registry::{ChannelRegistry, SpecEvent};

    type Scheduler = RunScheduler<StaticEngine, RecordingReporter, ChannelRegistry>;

    const DEBOUNCE: Duration = Duration::from_millis(300);

    fn scheduler(
        engine: StaticEngine,
        notifier: &ReadinessNotifier,
    ) -> (Scheduler, Arc<ChannelRegistry>) {
        let settings = RunSettings {
            program: Vec::new(),
            spec_root: PathBuf::from("/specs"),
            require: None,
            tags: Vec::new(),
            format: String::new(),
        };
        let controller = Arc::new(RunController::new(
            "cucumber",
            settings,
            engine,
            RecordingReporter::default(),
        ));
        let registry = Arc::new(ChannelRegistry::new());
        let scheduler = RunScheduler::new(
            controller,
            Arc::clone(&registry),
            notifier.subscribe(),
            DEBOUNCE,
        );
        (scheduler, registry)
    }

    fn changed(name: &str) -> SpecEvent {
        SpecEvent::Changed(SpecFile::new(format!("/specs/{name}"), "cucumber"))
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_events_triggers_one_run_with_the_last_event() {
        let notifier = ReadinessNotifier::new();
        let (mut scheduler, registry) = scheduler(StaticEngine::default(), &notifier);
        scheduler.start();
        notifier.mark_ready();
        settle().await;

        for name in ["a.feature", "b.feature", "c.feature"] {
            registry.publish(changed(name)).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(DEBOUNCE * 2).await;
        settle().await;

        let engine = scheduler.controller().engine();
        assert_eq!(engine.configured(), 1);
        assert_eq!(engine.invalidated(), [PathBuf::from("/specs/c.feature")]);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_subscription_before_ready() {
        let notifier = ReadinessNotifier::new();
        let (mut scheduler, registry) = scheduler(StaticEngine::default(), &notifier);
        scheduler.start();
        settle().await;
        assert_eq!(registry.subscriber_count(), 0);

        notifier.mark_ready();
        settle().await;
        assert_eq!(registry.subscriber_count(), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_ready_does_not_subscribe_twice() {
        let notifier = ReadinessNotifier::new();
        let (mut scheduler, registry) = scheduler(StaticEngine::default(), &notifier);
        notifier.mark_ready();
        scheduler.start();
        settle().await;

        notifier.mark_ready();
        settle().await;
        assert_eq!(registry.subscriber_count(), 1);

        registry.close();
        settle().await;
        assert_eq!(registry.subscriber_count(), 0);

        notifier.mark_ready();
        settle().await;
        assert_eq!(registry.subscriber_count(), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn changes_during_a_run_queue_one_rerun() {
        let notifier = ReadinessNotifier::new();
        let engine = StaticEngine::default().with_delay(Duration::from_secs(5));
        let (mut scheduler, registry) = scheduler(engine, &notifier);
        notifier.mark_ready();
        scheduler.start();
        settle().await;

        registry.publish(changed("a.feature")).await;
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(10)).await;
        settle().await;
        assert_eq!(scheduler.controller().engine().configured(), 1);

        for name in ["b.feature", "c.feature"] {
            registry.publish(changed(name)).await;
            tokio::time::sleep(DEBOUNCE * 2).await;
        }
        tokio::time::sleep(Duration::from_secs(20)).await;
        settle().await;

        let engine = scheduler.controller().engine();
        assert_eq!(engine.configured(), 2);
        assert_eq!(engine.peak_concurrency(), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_errors_do_not_stop_the_scheduler() {
        let notifier = ReadinessNotifier::new();
        let (mut scheduler, registry) = scheduler(StaticEngine::failing(), &notifier);
        notifier.mark_ready();
        scheduler.start();
        settle().await;

        for name in ["a.feature", "b.feature"] {
            registry.publish(changed(name)).await;
            tokio::time::sleep(DEBOUNCE * 2).await;
            settle().await;
        }
        assert_eq!(scheduler.controller().engine().configured(), 2);
        assert!(scheduler.controller().reporter().calls().is_empty());
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_after_stop() {
        let notifier = ReadinessNotifier::new();
        let (mut scheduler, registry) = scheduler(StaticEngine::default(), &notifier);
        notifier.mark_ready();
        scheduler.start();
        settle().await;
        scheduler.stop().await;
        assert!(!scheduler.is_started());
        assert_eq!(registry.subscriber_count(), 0);

        scheduler.start();
        settle().await;
        assert!(scheduler.is_started());
        assert_eq!(registry.subscriber_count(), 1);

        registry.publish(changed("a.feature")).await;
        tokio::time::sleep(DEBOUNCE * 2).await;
        settle().await;
        assert_eq!(scheduler.controller().engine().configured(), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_engine_ends_the_watch() {
        let notifier = ReadinessNotifier::new();
        let (mut scheduler, registry) = scheduler(StaticEngine::default(), &notifier);
        notifier.mark_ready();
        scheduler.start();
        settle().await;
        assert_eq!(registry.subscriber_count(), 1);

        notifier.stop();
        settle().await;
        assert_eq!(registry.subscriber_count(), 0);
        scheduler.stop().await;
        assert!(!scheduler.is_started());
    }
}
