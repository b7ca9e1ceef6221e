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

//! Default eval runner.
//!
//! Rule-based and assertion definitions are deterministic checks over the
//! latest assistant message, driven entirely by the definition's parameter
//! bag. Model-judge definitions call an OpenAI-compatible chat-completions
//! endpoint with the credentials resolved for the session's agent.

use crate::dispatcher::{EvalInvocation, EvalRunError, EvalRunner};
use agentgauge_core::{
    EvalDefinition, EvalKind, EvalOutcome, MessageRole, ProviderSpec, SessionMessage,
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

const DEFAULT_PROVIDER: &str = "openai";
const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";

/// Built-in [`EvalRunner`] covering all three eval kinds.
pub struct BuiltinRunner {
    client: reqwest::Client,
}

impl BuiltinRunner {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for BuiltinRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EvalRunner for BuiltinRunner {
    async fn run(&self, invocation: EvalInvocation<'_>) -> Result<EvalOutcome, EvalRunError> {
        let definition = invocation.definition();
        match definition.kind {
            EvalKind::RuleBased => run_rule(definition, invocation.messages()),
            EvalKind::Assertion => run_assertions(definition, invocation.messages()),
            EvalKind::ModelJudge => match invocation {
                EvalInvocation::WithProviders {
                    definition,
                    messages,
                    providers,
                } => {
                    let provider_name = definition.params["provider"]
                        .as_str()
                        .unwrap_or(DEFAULT_PROVIDER);
                    let spec = providers
                        .get(provider_name)
                        .ok_or_else(|| EvalRunError::MissingProvider(provider_name.to_string()))?;
                    self.run_judge(definition, messages, spec).await
                }
                EvalInvocation::Plain { definition, .. } => {
                    Err(EvalRunError::MissingProvider(format!(
                        "judge eval {} dispatched without resolved providers",
                        definition.id
                    )))
                }
            },
        }
    }
}

impl BuiltinRunner {
    async fn run_judge(
        &self,
        definition: &EvalDefinition,
        messages: &[SessionMessage],
        spec: &ProviderSpec,
    ) -> Result<EvalOutcome, EvalRunError> {
        let criteria = definition.params["criteria"]
            .as_str()
            .unwrap_or("Was the assistant helpful, accurate, and safe?");
        let transcript = messages
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Judge the following conversation against this criterion: {}\n\n\
             Conversation:\n{}\n\n\
             Respond with JSON: {{\"passed\": bool, \"score\": number between 0 and 1, \"reason\": string}}",
            criteria, transcript
        );

        let base_url = spec
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_ENDPOINT)
            .trim_end_matches('/');
        let request = serde_json::json!({
            "model": spec.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are an expert evaluator. Respond only with valid JSON."
                },
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": 0.0,
            "response_format": { "type": "json_object" }
        });

        debug!(eval_id = %definition.id, model = %spec.model, "invoking judge model");
        let response = self
            .client
            .post(format!("{}/chat/completions", base_url))
            .header("Authorization", format!("Bearer {}", spec.credential))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EvalRunError::Execution(format!(
                "judge endpoint returned {}: {}",
                status, body
            )));
        }

        let response_data: Value = response
            .json()
            .await
            .map_err(|e| EvalRunError::Execution(format!("judge response not JSON: {}", e)))?;
        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EvalRunError::Execution("judge response missing content".to_string()))?;
        let verdict: Value = serde_json::from_str(content)
            .map_err(|e| EvalRunError::Execution(format!("judge verdict not JSON: {}", e)))?;

        let passed = verdict["passed"].as_bool().ok_or_else(|| {
            EvalRunError::Execution("judge verdict missing passed field".to_string())
        })?;
        Ok(EvalOutcome {
            passed,
            score: verdict["score"].as_f64(),
            explanation: verdict["reason"].as_str().map(String::from),
            duration_ms: None,
        })
    }
}

fn run_rule(
    definition: &EvalDefinition,
    messages: &[SessionMessage],
) -> Result<EvalOutcome, EvalRunError> {
    let content = latest_assistant_content(messages)?;
    let passed = apply_check(&definition.params, content)?;
    Ok(EvalOutcome {
        passed,
        score: Some(if passed { 1.0 } else { 0.0 }),
        explanation: None,
        duration_ms: None,
    })
}

fn run_assertions(
    definition: &EvalDefinition,
    messages: &[SessionMessage],
) -> Result<EvalOutcome, EvalRunError> {
    let content = latest_assistant_content(messages)?;
    let assertions = definition.params["assertions"].as_array().ok_or_else(|| {
        EvalRunError::InvalidParams("assertion eval requires an assertions array".to_string())
    })?;
    if assertions.is_empty() {
        return Err(EvalRunError::InvalidParams(
            "assertions array is empty".to_string(),
        ));
    }

    let mut passed_count = 0usize;
    for assertion in assertions {
        if apply_check(assertion, content)? {
            passed_count += 1;
        }
    }

    Ok(EvalOutcome {
        passed: passed_count == assertions.len(),
        score: Some(passed_count as f64 / assertions.len() as f64),
        explanation: None,
        duration_ms: None,
    })
}

fn latest_assistant_content(messages: &[SessionMessage]) -> Result<&str, EvalRunError> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::Assistant)
        .map(|m| m.content.as_str())
        .ok_or_else(|| EvalRunError::Execution("no assistant message to evaluate".to_string()))
}

/// Apply one check object, e.g. `{"check": "contains", "value": "refund"}`.
fn apply_check(params: &Value, content: &str) -> Result<bool, EvalRunError> {
    let check = params["check"]
        .as_str()
        .ok_or_else(|| EvalRunError::InvalidParams("missing check field".to_string()))?;

    match check {
        "contains" => Ok(content.contains(required_str(params, "value")?)),
        "not_contains" => Ok(!content.contains(required_str(params, "value")?)),
        "regex" => {
            let pattern = required_str(params, "pattern")?;
            let re = regex::Regex::new(pattern)
                .map_err(|e| EvalRunError::InvalidParams(format!("bad pattern: {}", e)))?;
            Ok(re.is_match(content))
        }
        "max_chars" => Ok(content.chars().count() as u64 <= required_u64(params, "limit")?),
        "min_chars" => Ok(content.chars().count() as u64 >= required_u64(params, "limit")?),
        other => Err(EvalRunError::InvalidParams(format!(
            "unknown check: {}",
            other
        ))),
    }
}

fn required_str<'a>(params: &'a Value, field: &str) -> Result<&'a str, EvalRunError> {
    params[field]
        .as_str()
        .ok_or_else(|| EvalRunError::InvalidParams(format!("missing {} field", field)))
}

fn required_u64(params: &Value, field: &str) -> Result<u64, EvalRunError> {
    params[field]
        .as_u64()
        .ok_or_else(|| EvalRunError::InvalidParams(format!("missing {} field", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgauge_core::EvalTrigger;
    use std::collections::HashMap;

    fn rule_definition(params: Value) -> EvalDefinition {
        EvalDefinition {
            id: "rule".to_string(),
            kind: EvalKind::RuleBased,
            trigger: EvalTrigger::PerTurn,
            params,
        }
    }

    fn transcript() -> Vec<SessionMessage> {
        vec![
            SessionMessage::user("I want a refund"),
            SessionMessage::assistant("I can help with your refund request."),
        ]
    }

    #[tokio::test]
    async fn test_contains_check() {
        let runner = BuiltinRunner::new();
        let messages = transcript();

        let def = rule_definition(serde_json::json!({"check": "contains", "value": "refund"}));
        let outcome = runner
            .run(EvalInvocation::Plain {
                definition: &def,
                messages: &messages,
            })
            .await
            .unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.score, Some(1.0));

        let def = rule_definition(serde_json::json!({"check": "not_contains", "value": "refund"}));
        let outcome = runner
            .run(EvalInvocation::Plain {
                definition: &def,
                messages: &messages,
            })
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.score, Some(0.0));
    }

    #[tokio::test]
    async fn test_regex_and_length_checks() {
        let runner = BuiltinRunner::new();
        let messages = transcript();

        let def = rule_definition(serde_json::json!({"check": "regex", "pattern": "refund\\s+request"}));
        assert!(runner
            .run(EvalInvocation::Plain {
                definition: &def,
                messages: &messages,
            })
            .await
            .unwrap()
            .passed);

        let def = rule_definition(serde_json::json!({"check": "max_chars", "limit": 10}));
        assert!(!runner
            .run(EvalInvocation::Plain {
                definition: &def,
                messages: &messages,
            })
            .await
            .unwrap()
            .passed);
    }

    #[tokio::test]
    async fn test_invalid_params_are_rejected() {
        let runner = BuiltinRunner::new();
        let messages = transcript();

        let def = rule_definition(serde_json::json!({"check": "regex", "pattern": "("}));
        assert!(matches!(
            runner
                .run(EvalInvocation::Plain {
                    definition: &def,
                    messages: &messages,
                })
                .await,
            Err(EvalRunError::InvalidParams(_))
        ));

        let def = rule_definition(serde_json::json!({"value": "no check field"}));
        assert!(matches!(
            runner
                .run(EvalInvocation::Plain {
                    definition: &def,
                    messages: &messages,
                })
                .await,
            Err(EvalRunError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn test_assertions_score_fraction_passed() {
        let runner = BuiltinRunner::new();
        let messages = transcript();
        let def = EvalDefinition {
            id: "assert".to_string(),
            kind: EvalKind::Assertion,
            trigger: EvalTrigger::OnSessionComplete,
            params: serde_json::json!({
                "assertions": [
                    {"check": "contains", "value": "refund"},
                    {"check": "not_contains", "value": "lawsuit"},
                    {"check": "max_chars", "limit": 5}
                ]
            }),
        };

        let outcome = runner
            .run(EvalInvocation::Plain {
                definition: &def,
                messages: &messages,
            })
            .await
            .unwrap();
        assert!(!outcome.passed);
        let score = outcome.score.unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_judge_without_providers_is_an_error() {
        let runner = BuiltinRunner::new();
        let messages = transcript();
        let def = EvalDefinition {
            id: "judge".to_string(),
            kind: EvalKind::ModelJudge,
            trigger: EvalTrigger::PerTurn,
            params: Value::Null,
        };

        assert!(matches!(
            runner
                .run(EvalInvocation::Plain {
                    definition: &def,
                    messages: &messages,
                })
                .await,
            Err(EvalRunError::MissingProvider(_))
        ));

        // Providers resolved, but not the one the definition asks for.
        let providers: HashMap<String, ProviderSpec> = HashMap::from([(
            "anthropic".to_string(),
            ProviderSpec {
                provider_type: "anthropic".to_string(),
                model: "claude".to_string(),
                credential: "key".to_string(),
                endpoint: None,
            },
        )]);
        assert!(matches!(
            runner
                .run(EvalInvocation::WithProviders {
                    definition: &def,
                    messages: &messages,
                    providers: &providers,
                })
                .await,
            Err(EvalRunError::MissingProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_no_assistant_message_is_an_error() {
        let runner = BuiltinRunner::new();
        let messages = vec![SessionMessage::user("hello?")];
        let def = rule_definition(serde_json::json!({"check": "contains", "value": "x"}));
        assert!(matches!(
            runner
                .run(EvalInvocation::Plain {
                    definition: &def,
                    messages: &messages,
                })
                .await,
            Err(EvalRunError::Execution(_))
        ));
    }
}
