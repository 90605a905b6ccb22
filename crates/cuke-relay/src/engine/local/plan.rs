//! Expansion of parsed features into concrete scenario runs.
//!
//! Backgrounds are prepended to each scenario, rule backgrounds after the
//! feature background. Scenario outlines produce one run per examples row
//! with `<column>` placeholders substituted in the scenario name and step
//! text. Tags accumulate from feature, rule, scenario and examples.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::engine::tags::normalise_tag;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([^>\s][^>]*)>").unwrap_or_else(|_| unreachable!("placeholder regex is valid"))
});

/// One scenario, or one outline row, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedScenario {
    /// Identifier: `feature-slug;scenario-slug`, plus examples and row for
    /// outline rows.
    pub id: String,
    /// Gherkin keyword.
    pub keyword: String,
    /// Name with placeholders substituted.
    pub name: String,
    /// One-based line of the scenario (or examples row).
    pub line: usize,
    /// Accumulated tags, each starting with `@`.
    pub tags: Vec<String>,
    /// Background steps followed by the scenario's own steps.
    pub steps: Vec<PlannedStep>,
}

/// One step of a planned scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// Keyword with a single trailing space, e.g. `Given `.
    pub keyword: String,
    /// Step text with placeholders substituted.
    pub text: String,
    /// One-based source line.
    pub line: usize,
}

/// Identifier-friendly form of a name: spaces become `-`, letters lowercase.
#[must_use]
pub fn slug(name: &str) -> String {
    name.trim().replace(' ', "-").to_lowercase()
}

/// Tags declared directly on the feature, normalised.
#[must_use]
pub fn feature_tags(feature: &gherkin::Feature) -> Vec<String> {
    merge(&[], &feature.tags)
}

/// Expand every scenario of `feature`, rules included, in source order.
#[must_use]
pub fn plan_feature(feature: &gherkin::Feature) -> Vec<PlannedScenario> {
    let feature_id = slug(&feature.name);
    let base_tags = feature_tags(feature);
    let background = feature
        .background
        .as_ref()
        .map(|bg| bg.steps.as_slice())
        .unwrap_or_default();

    let mut planned = Vec::new();
    for scenario in &feature.scenarios {
        expand(&feature_id, &base_tags, &[background], scenario, &mut planned);
    }
    for rule in &feature.rules {
        let rule_tags = merge(&base_tags, &rule.tags);
        let rule_background = rule
            .background
            .as_ref()
            .map(|bg| bg.steps.as_slice())
            .unwrap_or_default();
        for scenario in &rule.scenarios {
            expand(
                &feature_id,
                &rule_tags,
                &[background, rule_background],
                scenario,
                &mut planned,
            );
        }
    }
    planned
}

fn expand(
    feature_id: &str,
    base_tags: &[String],
    backgrounds: &[&[gherkin::Step]],
    scenario: &gherkin::Scenario,
    out: &mut Vec<PlannedScenario>,
) {
    let scenario_id = format!("{feature_id};{}", slug(&scenario.name));
    let scenario_tags = merge(base_tags, &scenario.tags);
    let background_steps: Vec<&gherkin::Step> =
        backgrounds.iter().flat_map(|steps| steps.iter()).collect();

    if scenario.examples.is_empty() {
        out.push(PlannedScenario {
            id: scenario_id,
            keyword: scenario.keyword.clone(),
            name: scenario.name.clone(),
            line: scenario.position.line,
            tags: scenario_tags,
            steps: background_steps
                .into_iter()
                .chain(&scenario.steps)
                .map(|step| planned_step(step, &[], &[]))
                .collect(),
        });
        return;
    }

    for examples in &scenario.examples {
        let Some(table) = examples.table.as_ref() else {
            continue;
        };
        let Some((headers, rows)) = table.rows.split_first() else {
            continue;
        };
        let tags = merge(&scenario_tags, &examples.tags);
        let examples_id = format!("{scenario_id};{}", slug(&examples.keyword));
        for (index, row) in rows.iter().enumerate() {
            out.push(PlannedScenario {
                id: format!("{examples_id};{}", index + 2),
                keyword: scenario.keyword.clone(),
                name: substitute(&scenario.name, headers, row),
                line: table.position.line + index + 1,
                tags: tags.clone(),
                steps: background_steps
                    .iter()
                    .copied()
                    .chain(&scenario.steps)
                    .map(|step| planned_step(step, headers, row))
                    .collect(),
            });
        }
    }
}

fn planned_step(step: &gherkin::Step, headers: &[String], row: &[String]) -> PlannedStep {
    PlannedStep {
        keyword: format!("{} ", step.keyword.trim()),
        text: substitute(&step.value, headers, row),
        line: step.position.line,
    }
}

/// Replace `<column>` placeholders with the row's values. Placeholders with
/// no matching column are left untouched.
#[must_use]
pub fn substitute(text: &str, headers: &[String], row: &[String]) -> String {
    if headers.is_empty() {
        return text.to_string();
    }
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            caps.get(1)
                .and_then(|name| headers.iter().position(|h| h == name.as_str()))
                .and_then(|index| row.get(index))
                .map_or_else(|| whole.to_string(), Clone::clone)
        })
        .into_owned()
}

fn merge(base: &[String], additions: &[String]) -> Vec<String> {
    let mut merged = base.to_vec();
    for tag in additions {
        let tag = normalise_tag(tag);
        if !merged.contains(&tag) {
            merged.push(tag);
        }
    }
    merged
}
