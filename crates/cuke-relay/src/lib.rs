//! Watch-and-relay adapter between Gherkin specs, a BDD engine and a
//! reporting service.
//!
//! The crate watches a directory of behaviour-driven specifications, triggers
//! a run of a BDD engine whenever the specs change, flattens the engine's
//! cucumber-style result tree into per-step report records, and forwards the
//! records to an external reporting service.
//!
//! # Overview
//!
//! The pipeline is:
//!
//! - [`watcher`]: subscribes to spec-file changes once the engine reports
//!   ready, debounces bursts and serialises runs.
//! - [`controller`]: owns one run (Idle, Running, Reporting).
//! - [`options`]: builds the engine argument list for a run.
//! - [`engine`]: the engine invocation surface, the context-binding support
//!   library and the bundled engines.
//! - [`normalise`]: converts a [`results::ResultTree`] into
//!   [`report::ReportRecord`]s.
//! - [`report`]: the reporting RPC surface.
//!
//! # Configuration
//!
//! The binary is configured through `CUKE_RELAY_*` environment variables and
//! command-line overrides; see [`config::RelayConfig`].
//!
//! # Example
//!
//! ```ignore
//! use cuke_relay::config::RelayConfig;
//! use cuke_relay::controller::RunController;
//! use cuke_relay::engine::command::CommandEngine;
//! use cuke_relay::report::LogReporter;
//!
//! let config = RelayConfig::from_env()?;
//! let controller = RunController::new(
//!     config.framework.clone(),
//!     config.run_settings(),
//!     CommandEngine::new(),
//!     LogReporter,
//! );
//! ```

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod logging;
pub mod normalise;
pub mod options;
pub mod report;
pub mod results;
pub mod watcher;

/// Test support utilities for unit and integration tests.
///
/// This module is hidden from documentation as it's intended for internal
/// test use only.
#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support;
