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

//! The eval worker: consumer-group read loop, event routing, and the
//! per-turn / session-complete processing pipelines.
//!
//! One worker process runs exactly two long-lived tasks — the blocking read
//! loop and the periodic inactivity sweep — and processes each message
//! in-line. Throughput scales horizontally: replicas watching the same
//! namespace set share one consumer group and compete for partitions.
//!
//! Acknowledgment is the retry boundary. A message is acked after successful
//! processing, after a completion hand-off, or immediately when it can never
//! be processed (malformed payload, ignored event kind). A message whose
//! processing failed transiently is left unacked for the broker to redeliver.

use crate::broker::{BrokerError, StreamBroker, StreamDelivery, EVENT_FIELD};
use crate::config::WorkerConfig;
use crate::dispatcher::{DispatchContext, EvalDispatcher, EvalRunner};
use crate::rate_limit::RateLimiter;
use crate::runners::BuiltinRunner;
use crate::sampler::Sampler;
use crate::tracker::CompletionTracker;
use agentgauge_core::{
    assistant_turn_count, EvalDefinition, EvalPackLoader, ProviderResolver, ProviderSpec,
    SessionApi, SessionEvent, SessionEventKind, SessionMeta,
};
use anyhow::Context;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STREAM_KEY_PREFIX: &str = "agent-sessions";
const GROUP_PREFIX: &str = "eval-worker";
const DEFAULT_PACK_VERSION: &str = "latest";

/// Stream key carrying one tenant namespace's session events.
pub fn stream_key(namespace: &str) -> String {
    format!("{}:{}", STREAM_KEY_PREFIX, namespace)
}

/// Consumer-group name shared by all replicas watching the same namespace
/// set. Groups are per-stream, so the `multi` name cannot collide across
/// disjoint sets.
pub fn consumer_group_name(namespaces: &[String]) -> String {
    match namespaces {
        [single] => format!("{}:{}", GROUP_PREFIX, single),
        _ => format!("{}:multi", GROUP_PREFIX),
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no namespaces configured")]
    NoNamespaces,

    #[error("failed to create consumer group {group} on {stream}: {source}")]
    GroupCreate {
        stream: String,
        group: String,
        source: BrokerError,
    },
}

/// Monotonic processing counters, readable while the worker runs.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub events_seen: AtomicU64,
    pub events_acked: AtomicU64,
    pub turns_processed: AtomicU64,
    pub turns_failed: AtomicU64,
    pub completions_fired: AtomicU64,
    pub results_written: AtomicU64,
}

/// Everything a worker needs at construction.
pub struct WorkerOptions {
    pub broker: Arc<dyn StreamBroker>,
    pub session_api: Arc<dyn SessionApi>,
    pub pack_loader: Arc<dyn EvalPackLoader>,
    pub provider_resolver: Option<Arc<dyn ProviderResolver>>,
    /// Override for the eval execution function; [`BuiltinRunner`] if unset.
    pub runner: Option<Arc<dyn EvalRunner>>,
    pub config: WorkerConfig,
}

/// Shared by the read loop and the completion callback: loads definitions,
/// fetches the transcript, dispatches, and persists results.
struct EvalPipeline {
    session_api: Arc<dyn SessionApi>,
    pack_loader: Arc<dyn EvalPackLoader>,
    provider_resolver: Option<Arc<dyn ProviderResolver>>,
    dispatcher: EvalDispatcher,
    stats: Arc<WorkerStats>,
}

impl EvalPipeline {
    /// Per-turn processing for one assistant message. Any error here leaves
    /// the triggering stream message unacknowledged.
    async fn run_turn(
        &self,
        event: &SessionEvent,
        cancel: &CancellationToken,
    ) -> anyhow::Result<usize> {
        let meta = self
            .session_api
            .get_session(&event.session_id)
            .await
            .context("fetching session")?;

        let Some((pack_name, pack_version)) = pack_attribution(event, &meta) else {
            debug!(session_id = %event.session_id, "no eval pack configured, skipping turn");
            return Ok(0);
        };
        let pack = self
            .pack_loader
            .load_evals(&event.namespace, &pack_name, &pack_version)
            .await
            .context("loading eval pack")?;

        let messages = self
            .session_api
            .get_session_messages(&event.session_id)
            .await
            .context("fetching session messages")?;
        let turn_index = assistant_turn_count(&messages);

        let definitions: Vec<&EvalDefinition> = pack
            .evals
            .iter()
            .filter(|d| d.trigger.fires_on_turn(turn_index))
            .collect();
        if definitions.is_empty() {
            return Ok(0);
        }

        let providers = self.resolve_providers(&meta).await;
        let ctx = DispatchContext {
            session_id: event.session_id.clone(),
            message_id: event.message_id.clone(),
            agent_name: meta.agent_name.clone(),
            namespace: event.namespace.clone(),
            pack_name: Some(pack.name.clone()),
            pack_version: Some(pack.version.clone()),
            turn_index,
        };

        let results = self
            .dispatcher
            .dispatch(&ctx, &definitions, &messages, providers.as_ref(), cancel)
            .await;
        if !results.is_empty() {
            self.session_api
                .write_eval_results(&results)
                .await
                .context("writing eval results")?;
            self.stats
                .results_written
                .fetch_add(results.len() as u64, Ordering::Relaxed);
        }
        Ok(results.len())
    }

    /// On-session-complete processing, invoked from the tracker callback.
    async fn run_completion(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.stats.completions_fired.fetch_add(1, Ordering::Relaxed);

        let meta = self
            .session_api
            .get_session(session_id)
            .await
            .context("fetching session")?;
        let Some(pack_name) = meta.pack_name.clone() else {
            debug!(session_id = %session_id, "no eval pack configured, skipping completion evals");
            return Ok(());
        };
        let pack_version = meta
            .pack_version
            .clone()
            .unwrap_or_else(|| DEFAULT_PACK_VERSION.to_string());
        let pack = self
            .pack_loader
            .load_evals(&meta.namespace, &pack_name, &pack_version)
            .await
            .context("loading eval pack")?;

        let definitions: Vec<&EvalDefinition> = pack
            .evals
            .iter()
            .filter(|d| d.trigger.fires_on_completion())
            .collect();
        if definitions.is_empty() {
            return Ok(());
        }

        let messages = self
            .session_api
            .get_session_messages(session_id)
            .await
            .context("fetching session messages")?;
        let providers = self.resolve_providers(&meta).await;
        let ctx = DispatchContext {
            session_id: session_id.to_string(),
            message_id: None,
            agent_name: meta.agent_name.clone(),
            namespace: meta.namespace.clone(),
            pack_name: Some(pack.name.clone()),
            pack_version: Some(pack.version.clone()),
            turn_index: assistant_turn_count(&messages),
        };

        let results = self
            .dispatcher
            .dispatch(&ctx, &definitions, &messages, providers.as_ref(), cancel)
            .await;
        if !results.is_empty() {
            self.session_api
                .write_eval_results(&results)
                .await
                .context("writing eval results")?;
            self.stats
                .results_written
                .fetch_add(results.len() as u64, Ordering::Relaxed);
        }

        info!(
            session_id = %session_id,
            results = results.len(),
            "session-complete evals finished"
        );
        Ok(())
    }

    /// Provider resolution is best-effort: a failure means judge evals will
    /// be skipped by the runner, not that the turn fails.
    async fn resolve_providers(
        &self,
        meta: &SessionMeta,
    ) -> Option<HashMap<String, ProviderSpec>> {
        let resolver = self.provider_resolver.as_ref()?;
        match resolver
            .resolve_provider_specs(&meta.agent_name, &meta.namespace)
            .await
        {
            Ok(specs) => Some(specs),
            Err(error) => {
                warn!(
                    agent = %meta.agent_name,
                    namespace = %meta.namespace,
                    error = %error,
                    "provider resolution failed, continuing without providers"
                );
                None
            }
        }
    }
}

fn pack_attribution(event: &SessionEvent, meta: &SessionMeta) -> Option<(String, String)> {
    // Event attribution wins over session metadata.
    let name = event.pack_name.clone().or_else(|| meta.pack_name.clone())?;
    let version = event
        .pack_version
        .clone()
        .or_else(|| meta.pack_version.clone())
        .unwrap_or_else(|| DEFAULT_PACK_VERSION.to_string());
    Some((name, version))
}

/// The stream-consuming eval worker.
pub struct EvalWorker {
    broker: Arc<dyn StreamBroker>,
    pipeline: Arc<EvalPipeline>,
    tracker: Arc<CompletionTracker>,
    config: WorkerConfig,
    stream_keys: Vec<String>,
    group: String,
    consumer: String,
    stats: Arc<WorkerStats>,
    shutdown: CancellationToken,
}

impl EvalWorker {
    pub fn new(options: WorkerOptions) -> Self {
        let config = options.config;
        let stats = Arc::new(WorkerStats::default());
        let shutdown = CancellationToken::new();

        let runner: Arc<dyn EvalRunner> = options
            .runner
            .unwrap_or_else(|| Arc::new(BuiltinRunner::new()));
        let dispatcher = EvalDispatcher::new(
            Sampler::new(config.sampler),
            Arc::new(RateLimiter::new(config.rate_limit)),
            runner,
        );

        let pipeline = Arc::new(EvalPipeline {
            session_api: options.session_api,
            pack_loader: options.pack_loader,
            provider_resolver: options.provider_resolver,
            dispatcher,
            stats: stats.clone(),
        });

        let tracker = Arc::new(CompletionTracker::new(config.inactivity_timeout));
        {
            let pipeline = pipeline.clone();
            let weak_tracker = Arc::downgrade(&tracker);
            let cancel = shutdown.clone();
            tracker.set_on_complete(Arc::new(
                move |session_id| -> futures::future::BoxFuture<'static, anyhow::Result<()>> {
                    let pipeline = pipeline.clone();
                    let weak_tracker = weak_tracker.clone();
                    let cancel = cancel.clone();
                    Box::pin(async move {
                        let result = pipeline.run_completion(&session_id, &cancel).await;
                        // Cleanup runs even when completion processing failed:
                        // the completion has fired either way, and a reused
                        // session id must start a fresh lifecycle.
                        if let Some(tracker) = weak_tracker.upgrade() {
                            tracker.cleanup(&session_id);
                        }
                        result
                    })
                },
            ));
        }

        let stream_keys = config.namespaces.iter().map(|ns| stream_key(ns)).collect();
        let group = consumer_group_name(&config.namespaces);
        let consumer = config
            .consumer_name
            .clone()
            .unwrap_or_else(|| format!("eval-worker-{}", uuid::Uuid::new_v4()));

        Self {
            broker: options.broker,
            pipeline,
            tracker,
            config,
            stream_keys,
            group,
            consumer,
            stats,
            shutdown,
        }
    }

    pub fn namespaces(&self) -> &[String] {
        &self.config.namespaces
    }

    pub fn stream_keys(&self) -> &[String] {
        &self.stream_keys
    }

    pub fn consumer_group(&self) -> &str {
        &self.group
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Run the worker until `cancel` fires. Blocks for the worker's entire
    /// lifetime; returns `Ok(())` on cancellation and an error only for
    /// fatal startup failures.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), WorkerError> {
        if self.config.namespaces.is_empty() {
            return Err(WorkerError::NoNamespaces);
        }

        // Propagate the caller's token to the internal one shared with the
        // completion callback.
        let forwarder: JoinHandle<()> = {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                shutdown.cancel();
            })
        };

        let result = self.run().await;
        forwarder.abort();
        result
    }

    async fn run(&self) -> Result<(), WorkerError> {
        for key in &self.stream_keys {
            match self.broker.create_group(key, &self.group).await {
                Ok(()) => info!(stream = %key, group = %self.group, "created consumer group"),
                Err(BrokerError::GroupAlreadyExists) => {
                    debug!(stream = %key, group = %self.group, "consumer group already exists");
                }
                Err(source) => {
                    return Err(WorkerError::GroupCreate {
                        stream: key.clone(),
                        group: self.group.clone(),
                        source,
                    });
                }
            }
        }

        let sweep = self.spawn_sweep();
        info!(
            group = %self.group,
            consumer = %self.consumer,
            streams = ?self.stream_keys,
            "eval worker started"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let deliveries = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.broker.read_group(
                    &self.group,
                    &self.consumer,
                    &self.stream_keys,
                    self.config.read_batch_size,
                    self.config.read_block,
                ) => match result {
                    Ok(deliveries) => deliveries,
                    Err(BrokerError::Cancelled) => break,
                    Err(error) => {
                        // Persistent broker failure shows up as a stream of
                        // these; visible, not fatal.
                        error!(error = %error, "stream read failed, retrying");
                        continue;
                    }
                },
            };

            for delivery in deliveries {
                self.handle_delivery(delivery).await;
            }
        }

        let _ = sweep.await;
        info!(group = %self.group, "eval worker stopped");
        Ok(())
    }

    fn spawn_sweep(&self) -> JoinHandle<()> {
        let tracker = self.tracker.clone();
        let cancel = self.shutdown.clone();
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let fired = tracker.check_inactive().await;
                        if fired > 0 {
                            debug!(fired, "inactivity sweep completed sessions");
                        }
                    }
                }
            }
        })
    }

    async fn handle_delivery(&self, delivery: StreamDelivery) {
        self.stats.events_seen.fetch_add(1, Ordering::Relaxed);

        let event: SessionEvent = match delivery.field(EVENT_FIELD).map(serde_json::from_str) {
            Some(Ok(event)) => event,
            Some(Err(error)) => {
                // Malformed payloads can never be processed; retrying them
                // forever would wedge the cursor.
                warn!(
                    stream = %delivery.stream,
                    id = %delivery.id,
                    error = %error,
                    "malformed session event, acknowledging"
                );
                self.ack(&delivery).await;
                return;
            }
            None => {
                warn!(
                    stream = %delivery.stream,
                    id = %delivery.id,
                    "stream message missing event field, acknowledging"
                );
                self.ack(&delivery).await;
                return;
            }
        };

        match event.kind {
            SessionEventKind::SessionCompleted => {
                self.tracker.mark_completed(&event.session_id).await;
                self.ack(&delivery).await;
            }
            SessionEventKind::AgentMessage if event.is_assistant_turn() => {
                self.tracker.record_activity(&event.session_id);
                match self.pipeline.run_turn(&event, &self.shutdown).await {
                    Ok(results) => {
                        self.stats.turns_processed.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            session_id = %event.session_id,
                            results,
                            "turn processed"
                        );
                        self.ack(&delivery).await;
                    }
                    Err(error) => {
                        // No ack: the broker redelivers this message, which
                        // is the sole retry mechanism for transient failures.
                        self.stats.turns_failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            session_id = %event.session_id,
                            stream = %delivery.stream,
                            id = %delivery.id,
                            error = %error,
                            "turn processing failed, leaving message for redelivery"
                        );
                    }
                }
            }
            _ => {
                debug!(
                    kind = ?event.kind,
                    session_id = %event.session_id,
                    "ignoring event kind"
                );
                self.ack(&delivery).await;
            }
        }
    }

    async fn ack(&self, delivery: &StreamDelivery) {
        match self
            .broker
            .ack(&delivery.stream, &self.group, &delivery.id)
            .await
        {
            Ok(()) => {
                self.stats.events_acked.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                // The message stays pending and will be redelivered; worst
                // case is duplicate processing, which the broker contract
                // already allows.
                error!(
                    stream = %delivery.stream,
                    id = %delivery.id,
                    error = %error,
                    "failed to acknowledge message"
                );
            }
        }
    }
}
