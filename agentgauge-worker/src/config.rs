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

//! Worker configuration.

use crate::rate_limit::RateLimitConfig;
use crate::sampler::SamplerConfig;
use std::env;
use std::time::Duration;

/// Tuning knobs for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Tenant namespaces to watch; one stream key per namespace.
    pub namespaces: Vec<String>,
    /// Consumer identity within the group. Defaults to a generated
    /// `eval-worker-{uuid}` so replicas never collide.
    pub consumer_name: Option<String>,
    /// Messages requested per blocking read.
    pub read_batch_size: usize,
    /// Upper bound on one blocking read, so cancellation is observed promptly.
    pub read_block: Duration,
    /// Interval of the inactivity sweep.
    pub sweep_interval: Duration,
    /// Idle time after which a session is considered completed.
    pub inactivity_timeout: Duration,
    pub sampler: SamplerConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            consumer_name: None,
            read_batch_size: 1,
            read_block: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(600),
            sampler: SamplerConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Build a config from `AGENTGAUGE_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(list) = env::var("AGENTGAUGE_NAMESPACES") {
            config.namespaces = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        config.consumer_name = env::var("AGENTGAUGE_CONSUMER_NAME").ok();

        if let Some(timeout) = env_secs("AGENTGAUGE_INACTIVITY_TIMEOUT_SECS") {
            config.inactivity_timeout = timeout;
        }
        if let Some(interval) = env_secs("AGENTGAUGE_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = interval;
        }

        if let Some(rate) = env_u8("AGENTGAUGE_SAMPLE_RATE") {
            config.sampler.default_rate = rate;
        }
        if let Some(rate) = env_u8("AGENTGAUGE_JUDGE_SAMPLE_RATE") {
            config.sampler.llm_judge_rate = rate;
        }

        if let Some(rate) = env::var("AGENTGAUGE_EVALS_PER_SECOND")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.rate_limit.evals_per_second = rate;
        }
        if let Some(slots) = env::var("AGENTGAUGE_JUDGE_SLOTS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.rate_limit.max_concurrent_judges = slots;
        }

        config
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}

fn env_u8(name: &str) -> Option<u8> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
