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

//! Stream-broker contract: a persistent, partitioned log read through
//! consumer groups, in the shape of Redis Streams.
//!
//! The worker needs exactly three operations — idempotent group creation,
//! blocking multi-stream reads under a consumer identity, and per-message
//! acknowledgment — and relies on the broker for at-least-once delivery: a
//! delivered-but-unacknowledged message is redelivered to this or another
//! consumer in the group on a later read.

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Name of the stream field carrying the JSON-serialized `SessionEvent`.
pub const EVENT_FIELD: &str = "event";

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The consumer group already exists on the stream. Callers creating
    /// groups idempotently treat this as success.
    #[error("consumer group already exists")]
    GroupAlreadyExists,

    #[error("no such consumer group: {0}")]
    NoSuchGroup(String),

    /// The read was interrupted by client shutdown rather than a broker
    /// fault. The consumer loop returns cleanly on this.
    #[error("read cancelled")]
    Cancelled,

    #[error("broker backend error: {0}")]
    Backend(String),
}

/// One message delivered from a stream read.
#[derive(Debug, Clone)]
pub struct StreamDelivery {
    /// Stream key the message was read from.
    pub stream: String,
    /// Broker-assigned message id, used for acknowledgment.
    pub id: String,
    /// Field/value payload pairs.
    pub fields: Vec<(String, String)>,
}

impl StreamDelivery {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Consumer-group access to a partitioned stream broker.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Create `group` on `stream`, reading from the beginning of the log.
    /// Returns [`BrokerError::GroupAlreadyExists`] if the group is already
    /// present.
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), BrokerError>;

    /// Blocking read of up to `count` new messages for this consumer across
    /// `streams`, waiting at most `block`. An empty vec means the block
    /// timed out with no data; that is not an error.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamDelivery>, BrokerError>;

    /// Acknowledge one message, removing it from the group's pending set.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BrokerError>;
}
