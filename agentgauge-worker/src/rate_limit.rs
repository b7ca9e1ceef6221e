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

//! Throughput and concurrency limits for eval execution.
//!
//! Two independent gates:
//!
//! - A token bucket bounding overall eval throughput. Refill is computed
//!   lazily from elapsed time on each acquire attempt; no background task.
//! - A counting semaphore capping concurrently in-flight model-judge calls,
//!   handed out as an RAII [`JudgePermit`] so a slot is released exactly once
//!   when the eval's execution scope ends.
//!
//! Both waits race the caller's cancellation token, and both fail fast when
//! the token is already cancelled so an aborted batch never consumes capacity.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Throughput limits.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Token-bucket refill rate and capacity: evals permitted per second.
    pub evals_per_second: u32,
    /// Concurrent model-judge call slots.
    pub max_concurrent_judges: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            evals_per_second: 50,
            max_concurrent_judges: 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit wait cancelled")]
    Cancelled,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared rate-limit state for all concurrent dispatch calls.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: parking_lot::Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
    judges: Arc<Semaphore>,
}

/// Held for the duration of one model-judge call; dropping it frees the slot.
#[derive(Debug)]
pub struct JudgePermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.evals_per_second.max(1));
        Self {
            bucket: parking_lot::Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity,
            judges: Arc::new(Semaphore::new(config.max_concurrent_judges.max(1))),
        }
    }

    /// Take one throughput token, waiting for refill if the bucket is empty.
    ///
    /// Returns [`RateLimitError::Cancelled`] if `cancel` fires first or was
    /// already cancelled on entry.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled);
            }

            // Lock held only to refill and take; the wait happens outside it.
            let wait = {
                let mut bucket = self.bucket.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill);
                bucket.tokens =
                    (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Claim a model-judge slot, waiting until one is free.
    pub async fn acquire_judge(
        &self,
        cancel: &CancellationToken,
    ) -> Result<JudgePermit, RateLimitError> {
        if cancel.is_cancelled() {
            return Err(RateLimitError::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(RateLimitError::Cancelled),
            permit = self.judges.clone().acquire_owned() => {
                // The semaphore is never closed.
                permit
                    .map(|p| JudgePermit { _permit: p })
                    .map_err(|_| RateLimitError::Cancelled)
            }
        }
    }

    /// Free judge slots right now, for diagnostics.
    pub fn available_judge_slots(&self) -> usize {
        self.judges.available_permits()
    }
}
