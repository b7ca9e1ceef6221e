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

//! Eval dispatch: sampling, rate limiting, pluggable execution, result
//! stamping.
//!
//! The execution seam is a tagged invocation rather than a runner hierarchy:
//! rule-based evals take the provider-agnostic path, judge and assertion
//! evals take the provider-aware path when credentials were resolved, and a
//! single [`EvalRunner::run`] implementation matches on the variant.

use crate::rate_limit::RateLimiter;
use crate::sampler::Sampler;
use agentgauge_core::{
    EvalDefinition, EvalKind, EvalOutcome, EvalResult, ProviderSpec, ResultSource, SessionMessage,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One eval execution request, shaped by the definition's kind.
#[derive(Debug)]
pub enum EvalInvocation<'a> {
    /// Provider-agnostic path: definition plus transcript. Rule-based evals
    /// and any dispatch without resolved credentials land here.
    Plain {
        definition: &'a EvalDefinition,
        messages: &'a [SessionMessage],
    },
    /// Provider-aware path for judge and assertion evals.
    WithProviders {
        definition: &'a EvalDefinition,
        messages: &'a [SessionMessage],
        providers: &'a HashMap<String, ProviderSpec>,
    },
}

impl<'a> EvalInvocation<'a> {
    pub fn definition(&self) -> &'a EvalDefinition {
        match self {
            EvalInvocation::Plain { definition, .. } => definition,
            EvalInvocation::WithProviders { definition, .. } => definition,
        }
    }

    pub fn messages(&self) -> &'a [SessionMessage] {
        match self {
            EvalInvocation::Plain { messages, .. } => messages,
            EvalInvocation::WithProviders { messages, .. } => messages,
        }
    }
}

#[derive(Debug, Error)]
pub enum EvalRunError {
    #[error("invalid eval params: {0}")]
    InvalidParams(String),

    #[error("no provider spec resolved for {0}")]
    MissingProvider(String),

    #[error("judge call failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("eval execution failed: {0}")]
    Execution(String),
}

/// Pluggable eval execution.
#[async_trait]
pub trait EvalRunner: Send + Sync {
    async fn run(&self, invocation: EvalInvocation<'_>) -> Result<EvalOutcome, EvalRunError>;
}

/// Linkage for the results produced by one dispatch call.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub session_id: String,
    pub message_id: Option<String>,
    pub agent_name: String,
    pub namespace: String,
    pub pack_name: Option<String>,
    pub pack_version: Option<String>,
    /// Count of assistant messages seen so far, including the current one.
    pub turn_index: u32,
}

/// Executes eval definitions under sampling and rate-limit control.
pub struct EvalDispatcher {
    sampler: Sampler,
    limiter: Arc<RateLimiter>,
    runner: Arc<dyn EvalRunner>,
    source: ResultSource,
}

impl EvalDispatcher {
    pub fn new(sampler: Sampler, limiter: Arc<RateLimiter>, runner: Arc<dyn EvalRunner>) -> Self {
        Self {
            sampler,
            limiter,
            runner,
            source: ResultSource::Worker,
        }
    }

    /// Run `definitions` (already filtered by trigger) in order against the
    /// transcript, returning the results that executed successfully.
    ///
    /// A sampled-out definition is skipped silently. A cancelled rate-limit
    /// wait aborts the remaining batch but keeps the results already
    /// produced. A failing eval is logged and skipped; its siblings still
    /// run.
    pub async fn dispatch(
        &self,
        ctx: &DispatchContext,
        definitions: &[&EvalDefinition],
        messages: &[SessionMessage],
        providers: Option<&HashMap<String, ProviderSpec>>,
        cancel: &CancellationToken,
    ) -> Vec<EvalResult> {
        let mut results = Vec::new();

        for definition in definitions.iter().copied() {
            let judge = definition.is_judge();
            if !self
                .sampler
                .should_run(&ctx.session_id, ctx.turn_index, judge)
            {
                debug!(
                    eval_id = %definition.id,
                    session_id = %ctx.session_id,
                    turn = ctx.turn_index,
                    "eval sampled out"
                );
                continue;
            }

            if self.limiter.acquire(cancel).await.is_err() {
                warn!(
                    session_id = %ctx.session_id,
                    executed = results.len(),
                    "rate limit wait cancelled, aborting eval batch"
                );
                break;
            }

            // Slot released when the permit drops at the end of the iteration.
            let _judge_permit = if judge {
                match self.limiter.acquire_judge(cancel).await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        warn!(
                            session_id = %ctx.session_id,
                            eval_id = %definition.id,
                            "judge slot wait cancelled, aborting eval batch"
                        );
                        break;
                    }
                }
            } else {
                None
            };

            let invocation = match (definition.kind, providers) {
                (EvalKind::RuleBased, _) | (_, None) => EvalInvocation::Plain {
                    definition,
                    messages,
                },
                (_, Some(providers)) => EvalInvocation::WithProviders {
                    definition,
                    messages,
                    providers,
                },
            };

            let started = Instant::now();
            match self.runner.run(invocation).await {
                Ok(outcome) => results.push(self.stamp(ctx, definition, outcome, started)),
                Err(error) => {
                    warn!(
                        eval_id = %definition.id,
                        session_id = %ctx.session_id,
                        error = %error,
                        "eval execution failed, skipping"
                    );
                }
            }
        }

        results
    }

    fn stamp(
        &self,
        ctx: &DispatchContext,
        definition: &EvalDefinition,
        outcome: EvalOutcome,
        started: Instant,
    ) -> EvalResult {
        EvalResult {
            session_id: ctx.session_id.clone(),
            message_id: ctx.message_id.clone(),
            agent_name: ctx.agent_name.clone(),
            namespace: ctx.namespace.clone(),
            pack_name: ctx.pack_name.clone(),
            pack_version: ctx.pack_version.clone(),
            eval_id: definition.id.clone(),
            kind: definition.kind,
            trigger: definition.trigger,
            passed: outcome.passed,
            score: outcome.score.map(|s| s.clamp(0.0, 1.0)),
            duration_ms: outcome
                .duration_ms
                .or_else(|| Some(started.elapsed().as_millis() as u64)),
            source: self.source,
            created_at: Utc::now(),
        }
    }
}
