//! HTTP implementation of the triage backend

use crate::backend::TriageBackend;
use crate::config::BackendConfig;
use crate::engine::analytics::{AnalyticsSummary, ReportCard};
use crate::engine::report::ReportDraft;
use crate::types::{ActionReceipt, ActionRequest, Event, Group, Report};
use crate::{Result, remote_error};
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

const EVENTS_PATH: &str = "/api/fake-events";
const GROUPS_PATH: &str = "/api/grouped-alerts";
const REPORTS_PATH: &str = "/api/reports";
const RESUME_PATH: &str = "/api/resume";
const START_SIMULATOR_PATH: &str = "/api/start-simulator";
const RESET_SIMULATOR_PATH: &str = "/api/reset-simulator";
const ANALYTICS_PATH: &str = "/api/analytics";
const REPORT_CARD_PATH: &str = "/api/analytics/report_card";

/// `reqwest`-backed client for the triage API
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a client with the configured request timeout
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.client.get(self.url(path)).send().await?;
        Self::decode(path, response).await
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::decode(path, response).await
    }

    /// Non-2xx statuses become remote errors; bodies are parsed with
    /// `serde_json` so malformed payloads surface as decode errors.
    async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T> {
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(remote_error!("{} returned {}: {}", path, status, detail));
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl TriageBackend for HttpBackend {
    async fn list_events(&self) -> Result<Vec<Event>> {
        self.get_json(EVENTS_PATH).await
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        self.get_json(GROUPS_PATH).await
    }

    async fn list_reports(&self) -> Result<Vec<Report>> {
        self.get_json(REPORTS_PATH).await
    }

    async fn commit_action(&self, request: &ActionRequest) -> Result<ActionReceipt> {
        self.send_json(Method::POST, RESUME_PATH, Some(request)).await
    }

    async fn create_report(&self, draft: &ReportDraft) -> Result<ActionReceipt> {
        self.send_json(Method::POST, REPORTS_PATH, Some(draft)).await
    }

    async fn update_report(&self, report_id: &str, draft: &ReportDraft) -> Result<ActionReceipt> {
        let path = format!("{REPORTS_PATH}/{report_id}");
        self.send_json(Method::PUT, &path, Some(draft)).await
    }

    async fn start_simulator(&self) -> Result<ActionReceipt> {
        self.send_json::<(), _>(Method::POST, START_SIMULATOR_PATH, None)
            .await
    }

    async fn reset_simulator(&self) -> Result<ActionReceipt> {
        self.send_json::<(), _>(Method::POST, RESET_SIMULATOR_PATH, None)
            .await
    }

    async fn analytics(&self) -> Result<AnalyticsSummary> {
        self.get_json(ANALYTICS_PATH).await
    }

    async fn report_card(&self) -> Result<ReportCard> {
        self.get_json(REPORT_CARD_PATH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_url_building() {
        let mut config = Config::for_testing().backend;
        config.base_url = "http://soc.local:5000/".to_string();

        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(backend.base_url(), "http://soc.local:5000");
        assert_eq!(backend.url(GROUPS_PATH), "http://soc.local:5000/api/grouped-alerts");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transient_error() {
        let mut config = Config::for_testing().backend;
        // Port 9 (discard) on loopback is closed in test environments
        config.base_url = "http://127.0.0.1:9".to_string();
        config.request_timeout_seconds = 1;

        let backend = HttpBackend::new(&config).unwrap();
        let err = backend.list_groups().await.unwrap_err();
        assert!(err.is_transient());
    }
}
