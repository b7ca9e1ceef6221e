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

//! Exactly-once session-completion tracking.
//!
//! Two independent triggers race to end a session: an explicit
//! `session_completed` event from the consumer loop, and the periodic
//! inactivity sweep. Whichever wins, the completion callback must fire exactly
//! once per tracked session lifecycle.
//!
//! Per-session state machine: `untracked -> active -> completed -> (deleted)`.
//! The flip to `completed` happens under the map lock and is the single
//! serialization point; the callback runs strictly after the lock is released,
//! so a callback that calls [`CompletionTracker::cleanup`] cannot deadlock.
//!
//! State is in-memory only. A process restart mid-inactivity-window re-tracks
//! the session from scratch on its next activity; if none arrives, the
//! on-session-complete evals for it are skipped. Known trade-off, accepted in
//! exchange for not running worker-side coordination storage.

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Monotonic time source, swappable for deterministic inactivity tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock-backed [`Clock`] used outside tests.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Invoked exactly once per completed session, outside any tracker lock.
/// Errors are logged and never retried: the completion has fired regardless.
pub type CompletionCallback =
    Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug)]
struct TrackedSession {
    last_activity: Instant,
    completed: bool,
}

/// Per-session completion state machine.
///
/// All operations are safe to call concurrently from the consumer loop and
/// the sweep task; the map mutex is held only for the duration of a single
/// state check/transition, never across a callback invocation.
pub struct CompletionTracker {
    sessions: Mutex<HashMap<String, TrackedSession>>,
    inactivity_timeout: Duration,
    clock: Arc<dyn Clock>,
    on_complete: RwLock<Option<CompletionCallback>>,
}

impl CompletionTracker {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self::with_clock(inactivity_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(inactivity_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            inactivity_timeout,
            clock,
            on_complete: RwLock::new(None),
        }
    }

    /// Install the completion callback. An unset callback is a no-op,
    /// supporting configurations with session-complete evaluation disabled.
    pub fn set_on_complete(&self, callback: CompletionCallback) {
        *self.on_complete.write() = Some(callback);
    }

    /// Record activity for a session: create it as active, or refresh its
    /// last-activity time. Activity after completion is ignored — it must not
    /// resurrect the session.
    pub fn record_activity(&self, session_id: &str) {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(session) if session.completed => {}
            Some(session) => session.last_activity = now,
            None => {
                sessions.insert(
                    session_id.to_string(),
                    TrackedSession {
                        last_activity: now,
                        completed: false,
                    },
                );
            }
        }
    }

    /// Transition the session to completed and fire the callback, unless it
    /// already completed. Returns whether this call won the transition.
    ///
    /// An untracked session id completes directly: an explicit completion
    /// event for a session with no recorded activity still fires once.
    pub async fn mark_completed(&self, session_id: &str) -> bool {
        let fired = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| TrackedSession {
                    last_activity: self.clock.now(),
                    completed: false,
                });
            if session.completed {
                false
            } else {
                session.completed = true;
                true
            }
        };

        if fired {
            self.fire(session_id).await;
        }
        fired
    }

    /// Complete every active session idle for at least the inactivity
    /// timeout. Each expired session fires independently. Returns how many
    /// fired.
    pub async fn check_inactive(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = {
            let mut sessions = self.sessions.lock();
            sessions
                .iter_mut()
                .filter_map(|(id, session)| {
                    if !session.completed
                        && now.duration_since(session.last_activity) >= self.inactivity_timeout
                    {
                        session.completed = true;
                        Some(id.clone())
                    } else {
                        None
                    }
                })
                .collect()
        };

        for session_id in &expired {
            debug!(session_id = %session_id, "session timed out, firing completion");
            self.fire(session_id).await;
        }
        expired.len()
    }

    /// Drop the session's tracked entry entirely, so a later session reusing
    /// the same identifier starts from untracked. Typically called by the
    /// completion callback after it finishes.
    pub fn cleanup(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    /// Number of tracked sessions, for diagnostics.
    pub fn tracked_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    async fn fire(&self, session_id: &str) {
        let callback = self.on_complete.read().clone();
        if let Some(callback) = callback {
            if let Err(error) = callback(session_id.to_string()).await {
                warn!(session_id = %session_id, error = %error, "completion callback failed");
            }
        }
    }
}
