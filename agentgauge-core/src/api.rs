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

//! Contracts for the platform services the eval worker consumes.
//!
//! The worker never implements these against real infrastructure itself; it
//! is handed trait objects at construction. `agentgauge-worker` ships an HTTP
//! `SessionApi` client, and tests use in-memory fakes.

use crate::eval_result::EvalResult;
use crate::provider::ProviderSpec;
use crate::session::{SessionMessage, SessionMeta};
use crate::EvalPack;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced by the consumed platform services.
///
/// Every variant is transient from the worker's perspective: the message that
/// triggered the call is left unacknowledged and redelivered by the broker.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// The session/data API storing transcripts and eval results.
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<SessionMeta, ApiError>;

    /// Ordered transcript of the session.
    async fn get_session_messages(&self, session_id: &str)
        -> Result<Vec<SessionMessage>, ApiError>;

    async fn write_eval_results(&self, results: &[EvalResult]) -> Result<(), ApiError>;
}

/// Loader of versioned eval-definition packs.
#[async_trait]
pub trait EvalPackLoader: Send + Sync {
    async fn load_evals(
        &self,
        namespace: &str,
        pack_name: &str,
        pack_version: &str,
    ) -> Result<EvalPack, ApiError>;
}

/// Resolver of model-provider credentials from cluster secrets.
///
/// Resolution failures are logged by the caller and treated as "no providers
/// available" so non-judge evals can still proceed.
#[async_trait]
pub trait ProviderResolver: Send + Sync {
    async fn resolve_provider_specs(
        &self,
        agent_name: &str,
        namespace: &str,
    ) -> Result<HashMap<String, ProviderSpec>, ApiError>;
}
