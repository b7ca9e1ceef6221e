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

//! Resolved model-provider credentials for judge evals.

use serde::{Deserialize, Serialize};

/// A model provider resolved from cluster secrets for one agent/namespace.
///
/// The `credential` is a live secret; the struct deliberately has no `Debug`
/// passthrough of it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Provider family, e.g. `"openai"` or `"anthropic"`.
    pub provider_type: String,
    pub model: String,
    pub credential: String,
    /// Base URL override for OpenAI-compatible gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("provider_type", &self.provider_type)
            .field("model", &self.model)
            .field("credential", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
