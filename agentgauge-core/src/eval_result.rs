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

//! Evaluation outputs: the raw runner outcome and the persisted result record.

use crate::eval_def::{EvalKind, EvalTrigger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which component produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// The stream-consuming eval worker.
    Worker,
    /// Evaluation embedded in the serving process.
    InProcess,
}

/// Raw output of one eval execution, before linkage and stamping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub passed: bool,
    /// Normalized score in [0.0, 1.0], when the eval produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A persisted evaluation result. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub agent_name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_version: Option<String>,

    pub eval_id: String,
    pub kind: EvalKind,
    pub trigger: EvalTrigger,

    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    pub source: ResultSource,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_serialization_omits_empty_fields() {
        let result = EvalResult {
            session_id: "s1".to_string(),
            message_id: None,
            agent_name: "support-bot".to_string(),
            namespace: "acme".to_string(),
            pack_name: Some("quality".to_string()),
            pack_version: Some("3".to_string()),
            eval_id: "helpfulness".to_string(),
            kind: EvalKind::ModelJudge,
            trigger: EvalTrigger::OnSessionComplete,
            passed: true,
            score: Some(0.9),
            duration_ms: None,
            source: ResultSource::Worker,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["source"], "worker");
        assert_eq!(json["kind"], "model_judge");
        assert!(json.get("message_id").is_none());
        assert!(json.get("duration_ms").is_none());
    }
}
