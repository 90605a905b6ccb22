//! Reporting RPC surface.
//!
//! A run's submission batch is `reset`, one `submit` per record, then
//! `completed`. Calls are never retried; a failing call aborts the batch and
//! the error surfaces to whoever started the run.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

mod http;

pub use http::HttpReporter;

/// Normalised per-step unit sent to the reporting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    /// Identifier used by the service to upsert the record.
    pub id: String,
    /// Framework tag.
    pub framework: String,
    /// Display name: keyword followed by step text.
    pub name: String,
    /// Step status, passed through from the engine.
    pub result: String,
    /// Scenario name then feature name.
    pub ancestors: Vec<String>,
    /// Duration in whole milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Error type name for structured failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<String>,
    /// Failure message or stack text.
    #[serde(
        default,
        rename = "failureStackTrace",
        skip_serializing_if = "Option::is_none"
    )]
    pub failure_detail: Option<String>,
}

/// Errors raised by a reporting call.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The HTTP request failed or the service answered with an error status.
    #[error("reporting request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service refused the call.
    #[error("reporting service rejected {call}: {reason}")]
    Rejected {
        /// The RPC that was refused.
        call: &'static str,
        /// Reason given by the service.
        reason: String,
    },
}

/// Client side of the reporting service.
pub trait Reporter: Send + Sync {
    /// Clear previously submitted reports for `framework`.
    fn reset(&self, framework: &str) -> impl Future<Output = Result<(), ReportError>> + Send;

    /// Submit one record.
    fn submit(&self, record: &ReportRecord)
    -> impl Future<Output = Result<(), ReportError>> + Send;

    /// Signal that a run's reporting for `framework` is complete.
    fn completed(&self, framework: &str) -> impl Future<Output = Result<(), ReportError>> + Send;
}

/// Reporter that writes every call to the log.
///
/// Used when no reporting service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    async fn reset(&self, framework: &str) -> Result<(), ReportError> {
        info!(framework, "reports reset");
        Ok(())
    }

    async fn submit(&self, record: &ReportRecord) -> Result<(), ReportError> {
        info!(
            id = %record.id,
            result = %record.result,
            duration_ms = ?record.duration,
            failure = ?record.failure_type,
            "{}",
            record.name
        );
        Ok(())
    }

    async fn completed(&self, framework: &str) -> Result<(), ReportError> {
        info!(framework, "reports completed");
        Ok(())
    }
}

#[cfg(test)]
#[expect(
    clippy::expect_used,
    reason = "tests fail loudly on serialisation errors"
)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record() -> ReportRecord {
        ReportRecord {
            id: "checkout;payGiven a basket".to_string(),
            framework: "cucumber".to_string(),
            name: "Given a basket".to_string(),
            result: "failed".to_string(),
            ancestors: vec!["Pay".to_string(), "Checkout".to_string()],
            duration: Some(2),
            failure_type: Some("AssertionError".to_string()),
            failure_detail: Some("expected true".to_string()),
        }
    }

    #[test]
    fn serialises_with_service_field_names() {
        let value = serde_json::to_value(record()).expect("serialise");
        assert_eq!(
            value,
            json!({
                "id": "checkout;payGiven a basket",
                "framework": "cucumber",
                "name": "Given a basket",
                "result": "failed",
                "ancestors": ["Pay", "Checkout"],
                "duration": 2,
                "failureType": "AssertionError",
                "failureStackTrace": "expected true",
            })
        );
    }

    #[test]
    fn omits_absent_optionals() {
        let value = serde_json::to_value(ReportRecord {
            duration: None,
            failure_type: None,
            failure_detail: None,
            ..record()
        })
        .expect("serialise");
        let object = value.as_object().expect("object");
        assert!(!object.contains_key("duration"));
        assert!(!object.contains_key("failureType"));
        assert!(!object.contains_key("failureStackTrace"));
    }

    #[tokio::test]
    async fn log_reporter_accepts_a_batch() {
        let reporter = LogReporter;
        reporter.reset("cucumber").await.expect("reset");
        reporter.submit(&record()).await.expect("submit");
        reporter.completed("cucumber").await.expect("completed");
    }
}
