// External Session API: the backend that owns sessions, questions and hints
use crate::error::ApiError;
use async_trait::async_trait;
use practice_common::config::ApiConfig;
use practice_common::types::{Difficulty, HintGrant, RunReport, Session};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn start(&self, difficulty: Difficulty, topic: &str) -> Result<Session, ApiError>;

    /// Rationing is enforced by the backend
    async fn request_hint(&self, session_id: &str) -> Result<HintGrant, ApiError>;

    async fn submit(&self, session_id: &str, report: Option<&RunReport>) -> Result<Session, ApiError>;

    async fn history(&self, user_id: &str) -> Result<Vec<Session>, ApiError>;
}

#[derive(Debug, Serialize)]
struct StartBody<'a> {
    difficulty: Difficulty,
    topic: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    last_run_report: Option<&'a RunReport>,
}

/// REST client for the Session API
pub struct HttpSessionApi {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpSessionApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn start(&self, difficulty: Difficulty, topic: &str) -> Result<Session, ApiError> {
        let url = self.endpoint("sessions");
        debug!(url = %url, %difficulty, topic, "Starting session");
        let response = self
            .authorized(self.client.post(&url))
            .json(&StartBody { difficulty, topic })
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn request_hint(&self, session_id: &str) -> Result<HintGrant, ApiError> {
        let url = self.endpoint(&format!("sessions/{}/hint", session_id));
        let response = self.authorized(self.client.post(&url)).send().await?;
        Self::decode(response).await
    }

    async fn submit(&self, session_id: &str, report: Option<&RunReport>) -> Result<Session, ApiError> {
        let url = self.endpoint(&format!("sessions/{}/submit", session_id));
        let response = self
            .authorized(self.client.post(&url))
            .json(&SubmitBody { last_run_report: report })
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn history(&self, user_id: &str) -> Result<Vec<Session>, ApiError> {
        let url = self.endpoint(&format!("sessions/history/{}", user_id));
        let response = self.authorized(self.client.get(&url)).send().await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client(base_url: &str) -> HttpSessionApi {
        HttpSessionApi::new(&ApiConfig {
            base_url: base_url.to_string(),
            token: None,
            timeout_ms: 1000,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let api = make_client("http://backend/api/");
        assert_eq!(api.endpoint("sessions"), "http://backend/api/sessions");
        assert_eq!(api.endpoint("/sessions/s1/hint"), "http://backend/api/sessions/s1/hint");
    }

    #[test]
    fn test_submit_body_shape() {
        let body = serde_json::to_value(SubmitBody { last_run_report: None }).unwrap();
        assert_eq!(body, serde_json::json!({ "lastRunReport": null }));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        // Port 9 (discard) is closed on test hosts
        let api = make_client("http://127.0.0.1:9");
        let result = api.request_hint("s1").await;
        assert!(matches!(result, Err(ApiError::Http(_))));
    }
}
