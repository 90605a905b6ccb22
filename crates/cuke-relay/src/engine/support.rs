//! Step-definition and hook registration surface for the in-process engine.
//!
//! Support code registers callbacks against a fixed set of entry points
//! ([`EntryPoint::ALL`]). `Given`, `When` and `Then` are aliases of
//! [`EntryPoint::DefineStep`]. Once [`SupportCodeLibrary::bind`] has been
//! called with a [`HostContext`], every callback (already registered or
//! registered later) runs with that context entered. Binding is one-shot:
//! further calls are no-ops.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use super::context::HostContext;
use super::tags::{TagExprError, TagExpression};

/// Result of a single callback.
pub type Outcome = Result<(), StepFailure>;

/// A registered callback. Arguments are regex captures for steps, the phase
/// for `Around` hooks, the step text for step hooks and the feature name for
/// feature hooks.
pub type Callback = Arc<dyn Fn(&mut World, &[String]) -> Outcome + Send + Sync>;

/// Populates a fresh library for each run.
pub type SupportCodeLoader =
    Arc<dyn Fn(&mut SupportCodeLibrary) -> Result<(), SupportCodeError> + Send + Sync>;

/// Argument passed to `Around` hooks before the scenario runs.
pub const AROUND_START: &str = "start";
/// Argument passed to `Around` hooks after the scenario ran.
pub const AROUND_END: &str = "end";

/// Why a callback did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    /// The callback failed.
    Error {
        /// Error classification, e.g. `AssertionError`.
        name: Option<String>,
        /// Human-readable detail.
        message: String,
    },
    /// The step is declared but not implemented yet.
    Pending(Option<String>),
}

impl StepFailure {
    /// A failure with a classification.
    #[must_use]
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            name: Some(name.into()),
            message: message.into(),
        }
    }

    /// A failure carrying only a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Error {
            name: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error {
                name: Some(name),
                message,
            } => write!(f, "{name}: {message}"),
            Self::Error { name: None, message } => f.write_str(message),
            Self::Pending(Some(reason)) => write!(f, "pending: {reason}"),
            Self::Pending(None) => f.write_str("pending"),
        }
    }
}

/// Registration entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Initialises the scenario world.
    World,
    /// Runs around each scenario.
    Around,
    /// Runs before each scenario.
    Before,
    /// Runs after each scenario.
    After,
    /// Defines a step; `Given`, `When` and `Then` alias this.
    DefineStep,
    /// Runs before each step.
    BeforeStep,
    /// Runs after each step.
    AfterStep,
    /// Runs before each scenario, after `Before` hooks.
    BeforeScenario,
    /// Runs after each scenario, before `After` hooks.
    AfterScenario,
    /// Runs before each feature.
    BeforeFeature,
    /// Runs after each feature.
    AfterFeature,
    /// Runs once before the whole run.
    BeforeFeatures,
    /// Runs once after the whole run.
    AfterFeatures,
}

impl EntryPoint {
    /// Every entry point, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::World,
        Self::Around,
        Self::Before,
        Self::After,
        Self::DefineStep,
        Self::BeforeStep,
        Self::AfterStep,
        Self::BeforeScenario,
        Self::AfterScenario,
        Self::BeforeFeature,
        Self::AfterFeature,
        Self::BeforeFeatures,
        Self::AfterFeatures,
    ];

    /// Conventional name of the entry point.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::World => "World",
            Self::Around => "Around",
            Self::Before => "Before",
            Self::After => "After",
            Self::DefineStep => "defineStep",
            Self::BeforeStep => "BeforeStep",
            Self::AfterStep => "AfterStep",
            Self::BeforeScenario => "BeforeScenario",
            Self::AfterScenario => "AfterScenario",
            Self::BeforeFeature => "BeforeFeature",
            Self::AfterFeature => "AfterFeature",
            Self::BeforeFeatures => "BeforeFeatures",
            Self::AfterFeatures => "AfterFeatures",
        }
    }

    fn accepts_tag_filter(self) -> bool {
        matches!(
            self,
            Self::Around
                | Self::Before
                | Self::After
                | Self::BeforeStep
                | Self::AfterStep
                | Self::BeforeScenario
                | Self::AfterScenario
                | Self::BeforeFeature
                | Self::AfterFeature
        )
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised while registering support code.
#[derive(Debug, Error)]
pub enum SupportCodeError {
    /// A step pattern is not a valid regular expression.
    #[error("invalid step pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// A step definition was registered without a pattern.
    #[error("defineStep requires a pattern")]
    MissingPattern,

    /// A hook tag filter is malformed.
    #[error("invalid tag filter for {entry}: {source}")]
    InvalidFilter {
        /// Entry point the filter was given to.
        entry: EntryPoint,
        /// Parser error.
        #[source]
        source: TagExprError,
    },

    /// The entry point does not take a tag filter.
    #[error("{0} does not accept a tag filter")]
    UnexpectedFilter(EntryPoint),

    /// The loader reported a failure of its own.
    #[error("support code failed to load: {0}")]
    Load(String),
}

/// Per-scenario state shared between steps, keyed by type.
#[derive(Default)]
pub struct World {
    values: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("values", &self.values.len())
            .finish()
    }
}

impl World {
    /// Store a value, returning the one it replaced.
    pub fn insert<T: Any + Send>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Borrow a stored value.
    #[must_use]
    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Mutably borrow a stored value.
    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }
}

/// A registered hook.
#[derive(Clone)]
pub struct Hook {
    entry: EntryPoint,
    filter: Option<TagExpression>,
    callback: Callback,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("entry", &self.entry)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl Hook {
    /// Entry point the hook was registered on.
    #[must_use]
    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    /// Whether the hook's tag filter admits `tags`.
    pub fn applies_to<I, S>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filter.as_ref().is_none_or(|filter| filter.matches(tags))
    }

    /// Invoke the hook, converting a panic into a failure.
    pub fn call(&self, world: &mut World, args: &[String]) -> Outcome {
        invoke(&self.callback, world, args)
    }
}

/// A registered step definition.
#[derive(Clone)]
pub struct StepDefinition {
    pattern: String,
    regex: Regex,
    callback: Callback,
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl StepDefinition {
    /// Pattern as it was registered.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Invoke the definition, converting a panic into a failure.
    pub fn call(&self, world: &mut World, args: &[String]) -> Outcome {
        invoke(&self.callback, world, args)
    }
}

/// Outcome of looking up the definition for a step's text.
#[derive(Debug)]
pub enum StepMatch<'a> {
    /// No definition matches.
    Undefined,
    /// Exactly one definition matches; captures are its arguments.
    Found(&'a StepDefinition, Vec<String>),
    /// Several definitions match; their patterns are listed.
    Ambiguous(Vec<&'a str>),
}

/// Registered support code for one run.
#[derive(Default)]
pub struct SupportCodeLibrary {
    steps: Vec<StepDefinition>,
    hooks: Vec<Hook>,
    binding: Option<HostContext>,
}

impl fmt::Debug for SupportCodeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupportCodeLibrary")
            .field("steps", &self.steps)
            .field("hooks", &self.hooks)
            .field("bound", &self.binding.is_some())
            .finish()
    }
}

impl SupportCodeLibrary {
    /// Create an empty, unbound library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every callback to `context`.
    ///
    /// Returns `false` without changing anything when the library is already
    /// bound.
    pub fn bind(&mut self, context: &HostContext) -> bool {
        if self.binding.is_some() {
            return false;
        }
        for step in &mut self.steps {
            step.callback = bind_callback(context, Arc::clone(&step.callback));
        }
        for hook in &mut self.hooks {
            hook.callback = bind_callback(context, Arc::clone(&hook.callback));
        }
        self.binding = Some(context.clone());
        true
    }

    /// Whether [`bind`](Self::bind) has been applied.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Register `callback` on `entry`.
    ///
    /// For [`EntryPoint::DefineStep`] `pattern` is the step regex and is
    /// required. For scenario, step and feature hooks it is an optional tag
    /// expression.
    ///
    /// # Errors
    ///
    /// Returns [`SupportCodeError`] for a missing or invalid pattern, or a
    /// filter on an entry point that does not take one.
    pub fn register<F>(
        &mut self,
        entry: EntryPoint,
        pattern: Option<&str>,
        callback: F,
    ) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let callback = if let Some(context) = self.binding.as_ref() {
            bind_callback(context, callback)
        } else {
            callback
        };

        if entry == EntryPoint::DefineStep {
            let pattern = pattern.ok_or(SupportCodeError::MissingPattern)?;
            let regex = anchored(pattern).map_err(|source| SupportCodeError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            self.steps.push(StepDefinition {
                pattern: pattern.to_string(),
                regex,
                callback,
            });
            return Ok(());
        }

        let filter = match pattern {
            None => None,
            Some(_) if !entry.accepts_tag_filter() => {
                return Err(SupportCodeError::UnexpectedFilter(entry));
            }
            Some(expr) => Some(
                TagExpression::parse(expr)
                    .map_err(|source| SupportCodeError::InvalidFilter { entry, source })?,
            ),
        };
        self.hooks.push(Hook {
            entry,
            filter,
            callback,
        });
        Ok(())
    }

    /// Register a world initialiser.
    ///
    /// # Errors
    ///
    /// Infallible in practice; kept fallible to match [`register`](Self::register).
    pub fn world<F>(&mut self, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::World, None, callback)
    }

    /// Register an `Around` hook, called with [`AROUND_START`] and
    /// [`AROUND_END`].
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn around<F>(&mut self, tags: Option<&str>, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::Around, tags, callback)
    }

    /// Register a `Before` hook.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn before<F>(&mut self, tags: Option<&str>, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::Before, tags, callback)
    }

    /// Register an `After` hook.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn after<F>(&mut self, tags: Option<&str>, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::After, tags, callback)
    }

    /// Register a step definition.
    ///
    /// # Errors
    ///
    /// Returns [`SupportCodeError::InvalidPattern`] for a bad regex.
    pub fn define_step<F>(&mut self, pattern: &str, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::DefineStep, Some(pattern), callback)
    }

    /// Alias of [`define_step`](Self::define_step).
    ///
    /// # Errors
    ///
    /// See [`define_step`](Self::define_step).
    pub fn given<F>(&mut self, pattern: &str, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.define_step(pattern, callback)
    }

    /// Alias of [`define_step`](Self::define_step).
    ///
    /// # Errors
    ///
    /// See [`define_step`](Self::define_step).
    pub fn when<F>(&mut self, pattern: &str, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.define_step(pattern, callback)
    }

    /// Alias of [`define_step`](Self::define_step).
    ///
    /// # Errors
    ///
    /// See [`define_step`](Self::define_step).
    pub fn then<F>(&mut self, pattern: &str, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.define_step(pattern, callback)
    }

    /// Register a hook run before every step.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn before_step<F>(&mut self, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::BeforeStep, None, callback)
    }

    /// Register a hook run after every step.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn after_step<F>(&mut self, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::AfterStep, None, callback)
    }

    /// Register a `BeforeScenario` hook.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn before_scenario<F>(&mut self, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::BeforeScenario, None, callback)
    }

    /// Register an `AfterScenario` hook.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn after_scenario<F>(&mut self, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::AfterScenario, None, callback)
    }

    /// Register a `BeforeFeature` hook; the argument is the feature name.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn before_feature<F>(&mut self, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::BeforeFeature, None, callback)
    }

    /// Register an `AfterFeature` hook; the argument is the feature name.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn after_feature<F>(&mut self, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::AfterFeature, None, callback)
    }

    /// Register a hook run once before any feature.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn before_features<F>(&mut self, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::BeforeFeatures, None, callback)
    }

    /// Register a hook run once after every feature.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn after_features<F>(&mut self, callback: F) -> Result<(), SupportCodeError>
    where
        F: Fn(&mut World, &[String]) -> Outcome + Send + Sync + 'static,
    {
        self.register(EntryPoint::AfterFeatures, None, callback)
    }

    /// Hooks registered on `entry`, in registration order.
    pub fn hooks(&self, entry: EntryPoint) -> impl Iterator<Item = &Hook> {
        self.hooks.iter().filter(move |hook| hook.entry == entry)
    }

    /// Number of registered step definitions.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Find the definition matching `text`.
    #[must_use]
    pub fn find_step(&self, text: &str) -> StepMatch<'_> {
        let mut matches: Vec<(&StepDefinition, Vec<String>)> = self
            .steps
            .iter()
            .filter_map(|step| {
                step.regex.captures(text).map(|caps| {
                    let args = caps
                        .iter()
                        .skip(1)
                        .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
                        .collect();
                    (step, args)
                })
            })
            .collect();

        if matches.len() > 1 {
            return StepMatch::Ambiguous(matches.iter().map(|(step, _)| step.pattern()).collect());
        }
        matches
            .pop()
            .map_or(StepMatch::Undefined, |(step, args)| StepMatch::Found(step, args))
    }
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

fn bind_callback(context: &HostContext, callback: Callback) -> Callback {
    let context = context.clone();
    Arc::new(move |world: &mut World, args: &[String]| {
        context.enter(|| callback(world, args))
    })
}

fn invoke(callback: &Callback, world: &mut World, args: &[String]) -> Outcome {
    catch_unwind(AssertUnwindSafe(|| callback(world, args))).unwrap_or_else(|payload| {
        Err(StepFailure::error("panic", panic_message(payload.as_ref())))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "step panicked".to_string())
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "tests register known-good support code")]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;
    use tracing::Span;

    use super::*;

    fn noop(_: &mut World, _: &[String]) -> Outcome {
        Ok(())
    }

    #[test]
    fn enumerates_every_entry_point_once() {
        let names: Vec<_> = EntryPoint::ALL.iter().map(|entry| entry.name()).collect();
        assert_eq!(
            names,
            [
                "World",
                "Around",
                "Before",
                "After",
                "defineStep",
                "BeforeStep",
                "AfterStep",
                "BeforeScenario",
                "AfterScenario",
                "BeforeFeature",
                "AfterFeature",
                "BeforeFeatures",
                "AfterFeatures",
            ]
        );
    }

    #[test]
    fn aliases_register_step_definitions() {
        let mut library = SupportCodeLibrary::new();
        library.given("a basket", noop).expect("given");
        library.when("I pay", noop).expect("when");
        library.then("it is paid", noop).expect("then");
        library.define_step("a receipt", noop).expect("define");
        assert_eq!(library.step_count(), 4);
    }

    #[test]
    fn captures_become_arguments() {
        let mut library = SupportCodeLibrary::new();
        library
            .given(r"(\d+) items? cost (\d+)", noop)
            .expect("pattern");
        match library.find_step("3 items cost 12") {
            StepMatch::Found(_, args) => assert_eq!(args, ["3", "12"]),
            other => panic!("unexpected match: {other:?}"),
        }
    }

    #[rstest]
    #[case("a basket", "a basket with apples", false)]
    #[case("a basket", "a basket", true)]
    #[case("a basket|an empty cart", "a basket with apples", false)]
    #[case("a basket|an empty cart", "an empty cart", true)]
    #[case("^a basket$", "a basket", true)]
    #[case("^a (.*)$", "a basket", true)]
    fn patterns_match_the_whole_step(
        #[case] pattern: &str,
        #[case] text: &str,
        #[case] matches: bool,
    ) {
        let mut library = SupportCodeLibrary::new();
        library.given(pattern, noop).expect("pattern");
        assert_eq!(
            matches!(library.find_step(text), StepMatch::Found(..)),
            matches
        );
    }

    #[test]
    fn alternation_does_not_make_definitions_ambiguous() {
        let mut library = SupportCodeLibrary::new();
        library.given("a basket|an empty cart", noop).expect("first");
        library.given("a basket with (.*)", noop).expect("second");
        assert!(matches!(
            library.find_step("a basket with apples"),
            StepMatch::Found(..)
        ));
    }

    #[test]
    fn reports_ambiguous_definitions() {
        let mut library = SupportCodeLibrary::new();
        library.given("a (.*)", noop).expect("first");
        library.given("a basket", noop).expect("second");
        match library.find_step("a basket") {
            StepMatch::Ambiguous(patterns) => assert_eq!(patterns.len(), 2),
            other => panic!("unexpected match: {other:?}"),
        }
    }

    #[rstest]
    #[case(EntryPoint::DefineStep, None)]
    #[case(EntryPoint::DefineStep, Some("("))]
    #[case(EntryPoint::Before, Some("@a and"))]
    #[case(EntryPoint::World, Some("@a"))]
    #[case(EntryPoint::BeforeFeatures, Some("@a"))]
    fn rejects_bad_registrations(#[case] entry: EntryPoint, #[case] pattern: Option<&str>) {
        let mut library = SupportCodeLibrary::new();
        assert!(library.register(entry, pattern, noop).is_err());
    }

    #[test]
    fn tag_filtered_hooks_apply_selectively() {
        let mut library = SupportCodeLibrary::new();
        library.before(Some("@db"), noop).expect("hook");
        let hook = library
            .hooks(EntryPoint::Before)
            .next()
            .expect("registered");
        assert!(hook.applies_to(["@db"]));
        assert!(!hook.applies_to(["@ui"]));
    }

    #[test]
    fn panics_become_failures() {
        let mut library = SupportCodeLibrary::new();
        library
            .given("it explodes", |_, _| panic!("kaboom"))
            .expect("pattern");
        let StepMatch::Found(step, args) = library.find_step("it explodes") else {
            panic!("definition not found");
        };
        let outcome = step.call(&mut World::default(), &args);
        assert_eq!(outcome, Err(StepFailure::error("panic", "kaboom")));
    }

    #[test]
    fn bind_is_applied_once_and_covers_all_registrations() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = |seen: Arc<Mutex<Vec<Option<u64>>>>| {
            move |_: &mut World, _: &[String]| {
                seen.lock()
                    .expect("lock")
                    .push(HostContext::current().map(|c| c.run()));
                Ok(())
            }
        };

        let mut library = SupportCodeLibrary::new();
        library.given("early", record(Arc::clone(&seen))).expect("early");

        let first = HostContext::with_span("cucumber", 1, Span::none());
        let second = HostContext::with_span("cucumber", 2, Span::none());
        assert!(library.bind(&first));
        assert!(!library.bind(&second));
        assert!(library.is_bound());

        library.given("late", record(Arc::clone(&seen))).expect("late");

        for text in ["early", "late"] {
            let StepMatch::Found(step, args) = library.find_step(text) else {
                panic!("definition not found");
            };
            step.call(&mut World::default(), &args).expect("passes");
        }
        assert_eq!(*seen.lock().expect("lock"), [Some(1), Some(1)]);
        assert!(HostContext::current().is_none());
    }

    #[test]
    fn world_stores_values_by_type() {
        let mut world = World::default();
        assert!(world.insert(5_u32).is_none());
        assert_eq!(world.insert(7_u32), Some(5));
        *world.get_mut::<u32>().expect("stored") += 1;
        assert_eq!(world.get::<u32>(), Some(&8));
    }
}
