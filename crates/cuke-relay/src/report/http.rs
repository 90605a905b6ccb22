//! HTTP client for the reporting service.

use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::{ReportError, ReportRecord, Reporter};

const RESET_PATH: &str = "velocity/reports/reset";
const SUBMIT_PATH: &str = "velocity/reports/submit";
const COMPLETED_PATH: &str = "velocity/reports/completed";

/// Posts report calls as JSON to `<base>/velocity/reports/*`.
#[derive(Debug, Clone)]
pub struct HttpReporter {
    client: Client,
    base: String,
}

impl HttpReporter {
    /// Create a reporter for the service at `base`.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base)
    }

    /// Create a reporter reusing an existing client.
    #[must_use]
    pub fn with_client(client: Client, base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { client, base }
    }

    /// Full URL for an RPC path.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    async fn call<B>(&self, call: &'static str, path: &str, body: &B) -> Result<(), ReportError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = self.endpoint(path);
        debug!(%url, call, "reporting call");
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(ReportError::Rejected {
            call,
            reason: format!("{status}: {}", text.trim()),
        })
    }
}

impl Reporter for HttpReporter {
    async fn reset(&self, framework: &str) -> Result<(), ReportError> {
        self.call("reset", RESET_PATH, &json!({ "framework": framework }))
            .await
    }

    async fn submit(&self, record: &ReportRecord) -> Result<(), ReportError> {
        self.call("submit", SUBMIT_PATH, record).await
    }

    async fn completed(&self, framework: &str) -> Result<(), ReportError> {
        self.call("completed", COMPLETED_PATH, &json!({ "framework": framework }))
            .await
    }
}
