//! In-process engine over the `gherkin` parser.
//!
//! Feature files below the run's spec paths are read on every run. Parsed
//! features are cached by absolute path together with the source text they
//! were parsed from, so only files whose contents changed are parsed again.
//! [`Engine::invalidate`] drops a cached entry outright. Each run builds a fresh [`SupportCodeLibrary`], binds it to
//! the run's [`HostContext`] and then populates it through the configured
//! loader, so every callback is registered already bound.
//!
//! Scenarios execute sequentially on a blocking worker thread.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gherkin::GherkinEnv;
use tracing::debug;

use super::support::{SupportCodeError, SupportCodeLibrary, SupportCodeLoader};
use super::tags::TagExpression;
use super::{Engine, EngineError, HostContext, Listener, Listeners, Runtime};
use crate::options::RunOptions;

mod execute;
pub mod plan;

const FEATURE_EXTENSION: &str = "feature";

type FeatureCache = Arc<Mutex<HashMap<PathBuf, CachedFeature>>>;

#[derive(Debug)]
struct CachedFeature {
    source: String,
    feature: Arc<gherkin::Feature>,
}

/// A parsed feature and the location it was read from.
#[derive(Debug, Clone)]
struct LoadedFeature {
    uri: String,
    feature: Arc<gherkin::Feature>,
}

/// Engine executing registered Rust step definitions.
#[derive(Clone)]
pub struct LocalEngine {
    loader: SupportCodeLoader,
    cache: FeatureCache,
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}

impl LocalEngine {
    /// Create an engine whose support code is registered by `loader`.
    #[must_use]
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn(&mut SupportCodeLibrary) -> Result<(), SupportCodeError> + Send + Sync + 'static,
    {
        Self {
            loader: Arc::new(loader),
            cache: FeatureCache::default(),
        }
    }

    /// Number of parsed features currently cached.
    #[must_use]
    pub fn cached(&self) -> usize {
        lock(&self.cache).len()
    }
}

impl Engine for LocalEngine {
    type Runtime = LocalRuntime;

    fn configure(
        &self,
        options: &RunOptions,
        context: &HostContext,
    ) -> Result<Self::Runtime, EngineError> {
        let filter = options.tags().map(TagExpression::parse).transpose()?;

        let mut library = SupportCodeLibrary::new();
        library.bind(context);
        (self.loader)(&mut library)?;
        debug!(steps = library.step_count(), "support code loaded");

        Ok(LocalRuntime {
            roots: options.paths().map(Path::to_path_buf).collect(),
            filter,
            library,
            cache: Arc::clone(&self.cache),
            listeners: Listeners::default(),
            context: context.clone(),
        })
    }

    fn invalidate(&self, path: &Path) {
        if lock(&self.cache).remove(&cache_key(path)).is_some() {
            debug!(path = %path.display(), "dropped cached feature");
        }
    }
}

/// One configured in-process run.
#[derive(Debug)]
pub struct LocalRuntime {
    roots: Vec<PathBuf>,
    filter: Option<TagExpression>,
    library: SupportCodeLibrary,
    cache: FeatureCache,
    listeners: Listeners,
    context: HostContext,
}

impl LocalRuntime {
    fn execute(mut self) -> Result<(), EngineError> {
        let features = discover(&self.roots)?
            .iter()
            .map(|path| load(&self.cache, path))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(features = features.len(), "executing features");

        let tree = execute::Execution::new(&self.library, self.filter.as_ref(), &mut self.listeners)
            .run(&features)?;
        self.listeners.run_finished(&tree);
        Ok(())
    }
}

impl Runtime for LocalRuntime {
    fn attach_listener(&mut self, listener: Box<dyn Listener>) {
        self.listeners.push(listener);
    }

    async fn start(self) -> Result<(), EngineError> {
        let context = self.context.clone();
        tokio::task::spawn_blocking(move || context.enter(move || self.execute()))
            .await
            .map_err(|err| EngineError::Crashed(err.to_string()))?
    }
}

fn lock(cache: &FeatureCache) -> MutexGuard<'_, HashMap<PathBuf, CachedFeature>> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cache_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Feature files below `roots`, each root's files sorted by path.
fn discover(roots: &[PathBuf]) -> Result<Vec<PathBuf>, EngineError> {
    let mut found = Vec::new();
    for root in roots {
        if root.is_file() {
            found.push(root.clone());
            continue;
        }
        let mut below = Vec::new();
        walk(root, &mut below)?;
        below.sort();
        found.extend(below);
    }
    Ok(found)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), EngineError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == FEATURE_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

fn load(cache: &FeatureCache, path: &Path) -> Result<LoadedFeature, EngineError> {
    let key = cache_key(path);
    let uri = path.display().to_string();
    let mut source = fs::read_to_string(path)?;
    if !source.ends_with('\n') {
        source.push('\n');
    }
    if let Some(cached) = lock(cache).get(&key).filter(|cached| cached.source == source) {
        return Ok(LoadedFeature {
            uri,
            feature: Arc::clone(&cached.feature),
        });
    }

    let feature = gherkin::Feature::parse(&source, GherkinEnv::default()).map_err(|err| {
        EngineError::Parse {
            path: path.to_path_buf(),
            source: Box::new(err),
        }
    })?;
    let feature = Arc::new(feature);
    debug!(path = %path.display(), "parsed feature");
    lock(cache).insert(
        key,
        CachedFeature {
            source,
            feature: Arc::clone(&feature),
        },
    );
    Ok(LoadedFeature { uri, feature })
}
