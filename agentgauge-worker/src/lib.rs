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

//! # AgentGauge Eval Worker
//!
//! Real-time evaluation pipeline for a multi-tenant agent platform. The
//! worker drains per-namespace session-event streams through a broker
//! consumer group and, per event, decides whether to run quality/safety
//! evaluations, executes them under cost and throughput controls, and
//! persists results exactly once per logical trigger.
//!
//! ## Architecture
//!
//! - [`broker`]: consumer-group stream contract plus an in-memory backend
//! - [`sampler`]: deterministic, replica-stable sampling decisions
//! - [`rate_limit`]: token-bucket throughput gate and judge-slot semaphore
//! - [`tracker`]: exactly-once session-completion state machine
//! - [`dispatcher`]: ordered eval execution with a pluggable runner seam
//! - [`runners`]: default runner (rule checks + OpenAI-compatible judge)
//! - [`http_api`]: REST client for the platform session API
//! - [`worker`]: the read loop tying everything together
//!
//! ## Delivery semantics
//!
//! The broker guarantees at-least-once delivery; the worker guarantees
//! exactly-once *effect* for session completion (the callback fires once per
//! tracked lifecycle no matter which trigger wins) and idempotent sampling so
//! redelivered turns reproduce the same eval decisions.
//!
//! ```rust,ignore
//! use agentgauge_worker::{broker::memory::MemoryBroker, EvalWorker, WorkerConfig, WorkerOptions};
//! use agentgauge_worker::http_api::HttpSessionApi;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(pack_loader: Arc<dyn agentgauge_core::EvalPackLoader>) {
//! let mut config = WorkerConfig::from_env();
//! config.namespaces = vec!["acme".to_string()];
//!
//! let worker = EvalWorker::new(WorkerOptions {
//!     broker: Arc::new(MemoryBroker::new()),
//!     session_api: Arc::new(HttpSessionApi::new("http://localhost:9040")),
//!     pack_loader,
//!     provider_resolver: None,
//!     runner: None,
//!     config,
//! });
//!
//! let cancel = CancellationToken::new();
//! worker.start(cancel).await.unwrap();
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod http_api;
pub mod rate_limit;
pub mod runners;
pub mod sampler;
pub mod tracker;
pub mod worker;

pub use broker::{BrokerError, StreamBroker, StreamDelivery};
pub use config::WorkerConfig;
pub use dispatcher::{DispatchContext, EvalDispatcher, EvalInvocation, EvalRunError, EvalRunner};
pub use http_api::HttpSessionApi;
pub use rate_limit::{JudgePermit, RateLimitConfig, RateLimitError, RateLimiter};
pub use runners::BuiltinRunner;
pub use sampler::{Sampler, SamplerConfig};
pub use tracker::{Clock, CompletionCallback, CompletionTracker, SystemClock};
pub use worker::{
    consumer_group_name, stream_key, EvalWorker, WorkerError, WorkerOptions, WorkerStats,
};
