//! Behavioural tests for a full run: feature file, in-process engine,
//! normalisation and the reporting batch.

use std::sync::{Arc, Mutex};

use cuke_relay::controller::RunController;
use cuke_relay::engine::HostContext;
use cuke_relay::engine::local::LocalEngine;
use cuke_relay::engine::support::{StepFailure, SupportCodeError, SupportCodeLibrary};
use cuke_relay::options::RunSettings;
use cuke_relay::test_support::{Call, RecordingReporter, SpecDir};
use cuke_relay::watcher::registry::SpecFile;

const CHECKOUT: &str = "\
Feature: Checkout

  Scenario: Pay by card
    Given a basket with 2 items
    Then the card is charged
";

fn settings(spec: &SpecDir) -> RunSettings {
    RunSettings {
        program: Vec::new(),
        spec_root: spec.features(),
        require: None,
        tags: Vec::new(),
        format: String::new(),
    }
}

fn checkout_steps(library: &mut SupportCodeLibrary) -> Result<(), SupportCodeError> {
    library.given(r"a basket with (\d+) items", |_, _| Ok(()))?;
    library.then("the card is charged", |_, _| {
        Err(StepFailure::error("AssertionError", "card declined"))
    })
}

#[expect(
    clippy::expect_used,
    reason = "behavioural tests use explicit panics for clarity"
)]
#[tokio::test]
async fn passing_and_failing_steps_produce_two_records() {
    let spec = SpecDir::new("cucumber").expect("spec dir");
    let path = spec.write("checkout.feature", CHECKOUT).expect("feature");
    let reporter = RecordingReporter::default();
    let controller = RunController::new(
        "cucumber",
        settings(&spec),
        LocalEngine::new(checkout_steps),
        reporter.clone(),
    );

    let outcome = controller
        .run(&SpecFile::new(path, "cucumber"))
        .await
        .expect("run");
    assert_eq!(outcome.records.len(), 2);

    let records = reporter.submitted();
    let [given, then] = records.as_slice() else {
        panic!("expected two records, got {records:?}");
    };
    assert_eq!(given.id, "checkout;pay-by-cardGiven a basket with 2 items");
    assert_eq!(given.name, "Given a basket with 2 items");
    assert_eq!(given.result, "passed");
    assert_eq!(given.ancestors, ["Pay by card", "Checkout"]);
    assert_eq!(given.failure_type, None);

    assert_eq!(then.result, "failed");
    assert_eq!(then.failure_type.as_deref(), Some("AssertionError"));
    assert_eq!(then.failure_detail.as_deref(), Some("card declined"));

    let calls = reporter.calls();
    assert_eq!(calls.first(), Some(&Call::Reset("cucumber".to_string())));
    assert_eq!(calls.last(), Some(&Call::Completed("cucumber".to_string())));
    assert_eq!(reporter.completed_count(), 1);
}

#[expect(
    clippy::expect_used,
    reason = "behavioural tests use explicit panics for clarity"
)]
#[tokio::test]
async fn only_failing_hooks_are_reported() {
    let spec = SpecDir::new("cucumber").expect("spec dir");
    let path = spec.write("checkout.feature", CHECKOUT).expect("feature");
    let reporter = RecordingReporter::default();
    let engine = LocalEngine::new(|library| {
        library.before(None, |_, _| Ok(()))?;
        library.after(None, |_, _| Err(StepFailure::message("teardown failed")))?;
        library.given(r"a basket with (\d+) items", |_, _| Ok(()))?;
        library.then("the card is charged", |_, _| Ok(()))
    });
    let controller = RunController::new("cucumber", settings(&spec), engine, reporter.clone());

    controller
        .run(&SpecFile::new(path, "cucumber"))
        .await
        .expect("run");

    let names: Vec<_> = reporter
        .submitted()
        .into_iter()
        .map(|record| (record.name, record.failure_detail))
        .collect();
    assert_eq!(
        names,
        [
            ("Given a basket with 2 items".to_string(), None),
            ("Then the card is charged".to_string(), None),
            ("After ".to_string(), Some("teardown failed".to_string())),
        ]
    );
}

#[expect(
    clippy::expect_used,
    reason = "behavioural tests use explicit panics for clarity"
)]
#[tokio::test]
async fn step_callbacks_run_inside_the_run_context() {
    let spec = SpecDir::new("cucumber").expect("spec dir");
    let path = spec.write("checkout.feature", CHECKOUT).expect("feature");
    let seen: Arc<Mutex<Vec<(String, u64)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let engine = LocalEngine::new(move |library| {
        let sink = Arc::clone(&sink);
        library.define_step(".*", move |_, _| {
            if let Some(context) = HostContext::current() {
                sink.lock()
                    .expect("lock")
                    .push((context.framework().to_string(), context.run()));
            }
            Ok(())
        })
    });
    let controller = RunController::new(
        "cucumber",
        settings(&spec),
        engine,
        RecordingReporter::default(),
    );

    let trigger = SpecFile::new(path, "cucumber");
    controller.run(&trigger).await.expect("first run");
    controller.run(&trigger).await.expect("second run");

    let seen = seen.lock().expect("lock").clone();
    assert_eq!(
        seen,
        [
            ("cucumber".to_string(), 1),
            ("cucumber".to_string(), 1),
            ("cucumber".to_string(), 2),
            ("cucumber".to_string(), 2),
        ]
    );
}
