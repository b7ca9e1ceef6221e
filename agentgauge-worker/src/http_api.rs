// Copyright 2025 AgentGauge (https://github.com/agentgauge)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! HTTP client for the platform session API.

use agentgauge_core::{ApiError, EvalResult, SessionApi, SessionMessage, SessionMeta};
use async_trait::async_trait;
use tracing::debug;

/// REST implementation of [`SessionApi`].
pub struct HttpSessionApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSessionApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorized(self.client.get(format!("{}{}", self.base_url, path)))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-AgentGauge-API-Key", key),
            None => request,
        }
    }
}

fn transport(error: reqwest::Error) -> ApiError {
    ApiError::Transport(error.to_string())
}

async fn check_status(
    response: reqwest::Response,
    session_id: &str,
) -> Result<reqwest::Response, ApiError> {
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound(session_id.to_string()));
    }
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::UnexpectedResponse(format!(
            "HTTP {}: {}",
            status, body
        )));
    }
    Ok(response)
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn get_session(&self, session_id: &str) -> Result<SessionMeta, ApiError> {
        let response = self
            .get(&format!("/api/v1/sessions/{}", session_id))
            .send()
            .await
            .map_err(transport)?;
        check_status(response, session_id)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::UnexpectedResponse(e.to_string()))
    }

    async fn get_session_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionMessage>, ApiError> {
        let response = self
            .get(&format!("/api/v1/sessions/{}/messages", session_id))
            .send()
            .await
            .map_err(transport)?;
        check_status(response, session_id)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::UnexpectedResponse(e.to_string()))
    }

    async fn write_eval_results(&self, results: &[EvalResult]) -> Result<(), ApiError> {
        if results.is_empty() {
            return Ok(());
        }
        debug!(count = results.len(), "writing eval results");
        let response = self
            .authorized(
                self.client
                    .post(format!("{}/api/v1/eval-results", self.base_url)),
            )
            .json(results)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::UnexpectedResponse(format!(
                "HTTP {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}
