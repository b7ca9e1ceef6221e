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

//! Deterministic sampling of eval executions.
//!
//! The decision for a given `(session, turn)` pair must be identical across
//! retries, process restarts, and worker replicas, so redelivered messages
//! never flip a prior skip into an execution (or vice versa). That rules out
//! anything seeded per process: the sampler hashes `"{session_id}:{turn_index}"`
//! with a fixed-seed xxHash64 and compares the value mod 100 against the
//! configured percentage.

use std::hash::Hasher;
use twox_hash::XxHash64;

/// Sampling percentages, 0–100.
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Rate for rule-based and assertion evals. Defaults to 100: free checks
    /// always run.
    pub default_rate: u8,
    /// Rate for model-judge evals, which cost real money per execution.
    pub llm_judge_rate: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            default_rate: 100,
            llm_judge_rate: 10,
        }
    }
}

/// Stateless, reproducible sampling decisions.
#[derive(Debug, Clone)]
pub struct Sampler {
    config: SamplerConfig,
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    /// Whether the eval for this `(session, turn)` pair should execute.
    ///
    /// Pure: no shared state, no clock, no RNG. Repeated calls with the same
    /// inputs always agree, on every replica.
    pub fn should_run(&self, session_id: &str, turn_index: u32, judge: bool) -> bool {
        let rate = if judge {
            self.config.llm_judge_rate
        } else {
            self.config.default_rate
        };
        if rate >= 100 {
            return true;
        }
        if rate == 0 {
            return false;
        }

        let mut hasher = XxHash64::with_seed(0);
        hasher.write(format!("{}:{}", session_id, turn_index).as_bytes());
        hasher.finish() % 100 < u64::from(rate)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(SamplerConfig::default())
    }
}
