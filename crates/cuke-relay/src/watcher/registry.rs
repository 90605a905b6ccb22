//! Spec-file registries: sources of add/change/remove events.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

/// One spec source file belonging to a framework.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecFile {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Framework tag the file belongs to.
    pub framework: String,
}

impl SpecFile {
    /// Describe `path` as a spec file of `framework`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, framework: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            framework: framework.into(),
        }
    }
}

/// A change to the set of spec files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecEvent {
    /// The file appeared.
    Added(SpecFile),
    /// The file's contents changed.
    Changed(SpecFile),
    /// The file disappeared.
    Removed(SpecFile),
}

impl SpecEvent {
    /// The file the event concerns.
    #[must_use]
    pub fn file(&self) -> &SpecFile {
        match self {
            Self::Added(file) | Self::Changed(file) | Self::Removed(file) => file,
        }
    }

    /// Short label for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Changed(_) => "changed",
            Self::Removed(_) => "removed",
        }
    }
}

/// Source of spec-file events scoped to a framework.
pub trait SpecRegistry: Send + Sync {
    /// Start delivering events for `framework`.
    ///
    /// The receiver yields `None` once the registry stops delivering, after
    /// which a new subscription may be taken.
    fn subscribe(&self, framework: &str) -> mpsc::Receiver<SpecEvent>;
}

/// Registry that polls the file system.
///
/// Every file below `root` whose `/`-separated path relative to `root`
/// matches the framework pattern is tracked by length and modification time.
/// Files present when a subscription starts are reported as added.
#[derive(Debug, Clone)]
pub struct PollingRegistry {
    root: PathBuf,
    pattern: Regex,
    interval: Duration,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileSnapshot {
    len: u64,
    modified: Option<SystemTime>,
}

type Snapshot = BTreeMap<PathBuf, FileSnapshot>;

impl PollingRegistry {
    /// Poll `root` every `interval` for files matching `pattern`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, pattern: Regex, interval: Duration) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self {
            root,
            pattern,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop every subscription's polling task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn snapshot(&self) -> Snapshot {
        let root = self.root.clone();
        let pattern = self.pattern.clone();
        tokio::task::spawn_blocking(move || snapshot(&root, &pattern))
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "spec snapshot task failed");
                Snapshot::new()
            })
    }
}

impl SpecRegistry for PollingRegistry {
    fn subscribe(&self, framework: &str) -> mpsc::Receiver<SpecEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let registry = self.clone();
        let framework = framework.to_string();

        tokio::spawn(async move {
            let mut known = Snapshot::new();
            loop {
                let current = registry.snapshot().await;
                for event in diff(&known, &current, &framework) {
                    debug!(kind = event.kind(), path = %event.file().path.display(), "spec event");
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                known = current;

                tokio::select! {
                    () = registry.cancel.cancelled() => return,
                    () = tx.closed() => return,
                    () = tokio::time::sleep(registry.interval) => {}
                }
            }
        });

        rx
    }
}

fn snapshot(root: &Path, pattern: &Regex) -> Snapshot {
    let mut out = Snapshot::new();
    collect(root, root, pattern, &mut out);
    out
}

fn collect(root: &Path, dir: &Path, pattern: &Regex, out: &mut Snapshot) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            collect(root, &path, pattern, out);
            continue;
        }
        if !relative_match(root, &path, pattern) {
            continue;
        }
        out.insert(
            path,
            FileSnapshot {
                len: meta.len(),
                modified: meta.modified().ok(),
            },
        );
    }
}

fn relative_match(root: &Path, path: &Path, pattern: &Regex) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let relative: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    pattern.is_match(&relative.join("/"))
}

fn diff(previous: &Snapshot, current: &Snapshot, framework: &str) -> Vec<SpecEvent> {
    let file = |path: &PathBuf| SpecFile::new(path.clone(), framework);
    let mut events = Vec::new();
    for (path, state) in current {
        match previous.get(path) {
            None => events.push(SpecEvent::Added(file(path))),
            Some(old) if old != state => events.push(SpecEvent::Changed(file(path))),
            Some(_) => {}
        }
    }
    for path in previous.keys().filter(|path| !current.contains_key(*path)) {
        events.push(SpecEvent::Removed(file(path)));
    }
    events
}

/// Registry fed programmatically, used by embedders and tests.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    subscribers: Mutex<Vec<mpsc::Sender<SpecEvent>>>,
}

impl ChannelRegistry {
    /// Create a registry with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every live subscriber.
    pub async fn publish(&self, event: SpecEvent) {
        let senders: Vec<_> = {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.retain(|tx| !tx.is_closed());
            subscribers.clone()
        };
        for tx in senders {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// End every current subscription.
    pub fn close(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of subscriptions still open.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl SpecRegistry for ChannelRegistry {
    fn subscribe(&self, _framework: &str) -> mpsc::Receiver<SpecEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}
