//! Sequential execution of planned scenarios against a support library.

use std::time::Instant;

use super::LoadedFeature;
use super::plan::{PlannedScenario, feature_tags, plan_feature, slug};
use crate::engine::support::{
    AROUND_END, AROUND_START, EntryPoint, Hook, Outcome, StepFailure, StepMatch,
    SupportCodeLibrary, World,
};
use crate::engine::tags::TagExpression;
use crate::engine::{EngineError, Listeners};
use crate::results::{
    Element, ErrorPayload, Feature, ResultTree, Step, StepResult, StepStatus, Tag,
};

const BEFORE_KEYWORD: &str = "Before ";
const AFTER_KEYWORD: &str = "After ";

/// One pass over a set of features.
pub(super) struct Execution<'a> {
    library: &'a SupportCodeLibrary,
    filter: Option<&'a TagExpression>,
    listeners: &'a mut Listeners,
}

impl<'a> Execution<'a> {
    pub(super) fn new(
        library: &'a SupportCodeLibrary,
        filter: Option<&'a TagExpression>,
        listeners: &'a mut Listeners,
    ) -> Self {
        Self {
            library,
            filter,
            listeners,
        }
    }

    /// Execute every selected scenario and build the result tree.
    ///
    /// Failing run-level or feature-level hooks abort the run.
    pub(super) fn run(mut self, features: &[LoadedFeature]) -> Result<ResultTree, EngineError> {
        let mut run_world = World::default();
        self.strict_hooks(EntryPoint::BeforeFeatures, &mut run_world, &[], &[])?;

        let mut tree = ResultTree::default();
        for loaded in features {
            if let Some(feature) = self.run_feature(loaded)? {
                tree.features.push(feature);
            }
        }

        self.strict_hooks(EntryPoint::AfterFeatures, &mut run_world, &[], &[])?;
        Ok(tree)
    }

    fn run_feature(&mut self, loaded: &LoadedFeature) -> Result<Option<Feature>, EngineError> {
        let source = &loaded.feature;
        let planned: Vec<PlannedScenario> = plan_feature(source)
            .into_iter()
            .filter(|scenario| self.selected(scenario))
            .collect();
        if planned.is_empty() {
            return Ok(None);
        }

        let tags = feature_tags(source);
        let mut feature = Feature {
            id: slug(&source.name),
            uri: loaded.uri.clone(),
            keyword: source.keyword.clone(),
            name: source.name.clone(),
            line: source.position.line,
            tags: to_tags(&tags, source.position.line),
            elements: Vec::with_capacity(planned.len()),
        };

        let args = [source.name.clone()];
        let mut feature_world = World::default();
        self.strict_hooks(EntryPoint::BeforeFeature, &mut feature_world, &args, &tags)?;
        for scenario in &planned {
            let element = self.run_scenario(&feature, scenario);
            feature.elements.push(element);
        }
        self.strict_hooks(EntryPoint::AfterFeature, &mut feature_world, &args, &tags)?;

        Ok(Some(feature))
    }

    fn selected(&self, scenario: &PlannedScenario) -> bool {
        self.filter
            .is_none_or(|filter| filter.matches(&scenario.tags))
    }

    fn run_scenario(&mut self, feature: &Feature, planned: &PlannedScenario) -> Element {
        let library = self.library;
        let mut element = Element {
            id: planned.id.clone(),
            keyword: planned.keyword.clone(),
            name: planned.name.clone(),
            line: planned.line,
            kind: "scenario".to_string(),
            tags: to_tags(&planned.tags, planned.line),
            steps: Vec::new(),
        };
        let mut world = World::default();
        let mut blocked = false;

        let start = [AROUND_START.to_string()];
        let before = scenario_hooks(library, EntryPoint::World, &planned.tags, &[])
            .chain(scenario_hooks(library, EntryPoint::Around, &planned.tags, &start))
            .chain(scenario_hooks(library, EntryPoint::Before, &planned.tags, &[]))
            .chain(scenario_hooks(
                library,
                EntryPoint::BeforeScenario,
                &planned.tags,
                &[],
            ));
        for (hook, args) in before {
            let step = if blocked {
                hook_step(BEFORE_KEYWORD, skipped())
            } else {
                let (outcome, nanos) = timed(|| hook.call(&mut world, args));
                blocked = outcome.is_err();
                hook_step(BEFORE_KEYWORD, result_of(&outcome, nanos))
            };
            self.record(feature, &mut element, step);
        }

        for planned_step in &planned.steps {
            let mut step = Step {
                keyword: planned_step.keyword.clone(),
                name: planned_step.text.clone(),
                line: Some(planned_step.line),
                hidden: false,
                result: StepResult::default(),
            };
            step.result = if blocked {
                skipped()
            } else {
                let result = self.run_step(&mut world, &planned.tags, &planned_step.text);
                blocked = result.status != StepStatus::Passed.as_str();
                result
            };
            self.record(feature, &mut element, step);
        }

        let end = [AROUND_END.to_string()];
        let after = scenario_hooks(library, EntryPoint::AfterScenario, &planned.tags, &[])
            .chain(scenario_hooks(library, EntryPoint::After, &planned.tags, &[]))
            .chain(scenario_hooks(library, EntryPoint::Around, &planned.tags, &end));
        for (hook, args) in after {
            let (outcome, nanos) = timed(|| hook.call(&mut world, args));
            self.record(feature, &mut element, hook_step(AFTER_KEYWORD, result_of(&outcome, nanos)));
        }

        element
    }

    fn run_step(&self, world: &mut World, tags: &[String], text: &str) -> StepResult {
        let library = self.library;
        match library.find_step(text) {
            StepMatch::Undefined => status(StepStatus::Undefined),
            StepMatch::Ambiguous(patterns) => StepResult {
                error_message: Some(ErrorPayload::Text(format!(
                    "multiple step definitions match '{text}': {}",
                    patterns.join(", ")
                ))),
                ..status(StepStatus::Ambiguous)
            },
            StepMatch::Found(definition, args) => {
                let text_arg = [text.to_string()];
                let (outcome, nanos) = timed(|| {
                    call_hooks(library, EntryPoint::BeforeStep, tags, world, &text_arg)?;
                    let outcome = definition.call(world, &args);
                    let after = call_hooks(library, EntryPoint::AfterStep, tags, world, &text_arg);
                    outcome.and(after)
                });
                result_of(&outcome, nanos)
            }
        }
    }

    fn strict_hooks(
        &self,
        entry: EntryPoint,
        world: &mut World,
        args: &[String],
        tags: &[String],
    ) -> Result<(), EngineError> {
        call_hooks(self.library, entry, tags, world, args).map_err(|failure| EngineError::Hook {
            hook: entry.name(),
            message: failure.to_string(),
        })
    }

    fn record(&mut self, feature: &Feature, element: &mut Element, step: Step) {
        element.steps.push(step);
        if let Some(last) = element.steps.last() {
            self.listeners.step_finished(feature, element, last);
        }
    }
}

fn scenario_hooks<'l, 'a>(
    library: &'l SupportCodeLibrary,
    entry: EntryPoint,
    tags: &'a [String],
    args: &'a [String],
) -> impl Iterator<Item = (&'l Hook, &'a [String])> {
    library
        .hooks(entry)
        .filter(move |hook| hook.applies_to(tags))
        .map(move |hook| (hook, args))
}

fn call_hooks(
    library: &SupportCodeLibrary,
    entry: EntryPoint,
    tags: &[String],
    world: &mut World,
    args: &[String],
) -> Outcome {
    for hook in library.hooks(entry).filter(|hook| hook.applies_to(tags)) {
        hook.call(world, args)?;
    }
    Ok(())
}

fn timed(f: impl FnOnce() -> Outcome) -> (Outcome, u64) {
    let started = Instant::now();
    let outcome = f();
    let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
    (outcome, nanos)
}

fn status(status: StepStatus) -> StepResult {
    StepResult {
        status: status.as_str().to_string(),
        ..StepResult::default()
    }
}

fn skipped() -> StepResult {
    status(StepStatus::Skipped)
}

fn result_of(outcome: &Outcome, nanos: u64) -> StepResult {
    let mut result = match outcome {
        Ok(()) => status(StepStatus::Passed),
        Err(StepFailure::Pending(_)) => status(StepStatus::Pending),
        Err(StepFailure::Error { name, message }) => StepResult {
            error_message: Some(name.as_ref().map_or_else(
                || ErrorPayload::Text(message.clone()),
                |name| ErrorPayload::Error {
                    name: Some(name.clone()),
                    message: Some(message.clone()),
                },
            )),
            ..status(StepStatus::Failed)
        },
    };
    result.duration = Some(nanos);
    result
}

fn hook_step(keyword: &str, result: StepResult) -> Step {
    Step {
        keyword: keyword.to_string(),
        name: String::new(),
        line: None,
        hidden: true,
        result,
    }
}

fn to_tags(tags: &[String], line: usize) -> Vec<Tag> {
    tags.iter()
        .map(|name| Tag {
            name: name.clone(),
            line,
        })
        .collect()
}
