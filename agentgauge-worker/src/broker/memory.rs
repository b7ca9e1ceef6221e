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

//! In-process [`StreamBroker`] with real consumer-group semantics, for tests
//! and local development.
//!
//! Each group tracks a read cursor and a pending (delivered-unacknowledged)
//! set per stream. Unacked entries are redelivered at the front of the next
//! read, which satisfies the at-least-once contract the worker is written
//! against; a production Redis adapter would reclaim pending entries with
//! `XAUTOCLAIM` instead.

use super::{BrokerError, StreamBroker, StreamDelivery};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    fields: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Group {
    /// Index of the next never-delivered entry.
    cursor: usize,
    /// Delivered-unacknowledged entries: entry index -> id. Ordered so
    /// redelivery preserves stream order.
    pending: BTreeMap<usize, String>,
}

#[derive(Debug, Default)]
struct Stream {
    entries: Vec<Entry>,
    groups: HashMap<String, Group>,
}

/// In-memory multi-stream broker.
#[derive(Default)]
pub struct MemoryBroker {
    streams: Mutex<HashMap<String, Stream>>,
    next_seq: Mutex<u64>,
    arrivals: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry to a stream, creating the stream if needed. Returns
    /// the assigned message id.
    pub fn publish(&self, stream: &str, fields: Vec<(String, String)>) -> String {
        let id = {
            let mut seq = self.next_seq.lock();
            *seq += 1;
            format!("{}-0", *seq)
        };
        {
            let mut streams = self.streams.lock();
            streams
                .entry(stream.to_string())
                .or_default()
                .entries
                .push(Entry {
                    id: id.clone(),
                    fields,
                });
        }
        self.arrivals.notify_waiters();
        id
    }

    /// Number of delivered-unacknowledged entries for a group on a stream.
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.streams
            .lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    fn try_read(
        &self,
        group: &str,
        streams: &[String],
        count: usize,
    ) -> Result<Vec<StreamDelivery>, BrokerError> {
        let mut state = self.streams.lock();
        let mut deliveries = Vec::new();

        for stream_key in streams {
            if deliveries.len() >= count {
                break;
            }
            let Some(stream) = state.get_mut(stream_key) else {
                continue;
            };
            let Some(group_state) = stream.groups.get_mut(group) else {
                return Err(BrokerError::NoSuchGroup(group.to_string()));
            };

            // Redeliver unacked entries first, oldest first.
            for (&index, _) in group_state.pending.iter() {
                if deliveries.len() >= count {
                    break;
                }
                let entry = &stream.entries[index];
                deliveries.push(StreamDelivery {
                    stream: stream_key.clone(),
                    id: entry.id.clone(),
                    fields: entry.fields.clone(),
                });
            }

            // Then new entries past the cursor.
            while deliveries.len() < count && group_state.cursor < stream.entries.len() {
                let index = group_state.cursor;
                group_state.cursor += 1;
                let entry = &stream.entries[index];
                group_state.pending.insert(index, entry.id.clone());
                deliveries.push(StreamDelivery {
                    stream: stream_key.clone(),
                    id: entry.id.clone(),
                    fields: entry.fields.clone(),
                });
            }
        }

        Ok(deliveries)
    }
}

#[async_trait]
impl StreamBroker for MemoryBroker {
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        let mut streams = self.streams.lock();
        let stream = streams.entry(stream.to_string()).or_default();
        if stream.groups.contains_key(group) {
            return Err(BrokerError::GroupAlreadyExists);
        }
        stream.groups.insert(group.to_string(), Group::default());
        Ok(())
    }

    async fn read_group(
        &self,
        group: &str,
        _consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamDelivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking, so a publish between the
            // check and the wait is not missed.
            notified.as_mut().enable();

            let deliveries = self.try_read(group, streams, count)?;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BrokerError> {
        let mut streams = self.streams.lock();
        let group_state = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| BrokerError::NoSuchGroup(group.to_string()))?;
        group_state.pending.retain(|_, entry_id| entry_id != id);
        Ok(())
    }
}
