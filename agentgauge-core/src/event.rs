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

//! Session events consumed off the per-namespace event streams.
//!
//! An event is an immutable fact about something that happened in a
//! conversation. The worker only acts on two kinds — agent messages with an
//! assistant role, and explicit session completions — but must tolerate and
//! acknowledge every other kind the platform emits, including kinds added
//! after this crate was compiled (`SessionEventKind::Other`).

use serde::{Deserialize, Serialize};

/// Classification of a session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    /// A message produced by the agent (any role; see [`SessionEvent::role`]).
    AgentMessage,
    /// The session was explicitly closed by the platform.
    SessionCompleted,
    /// A message produced by the end user.
    UserMessage,
    /// A tool invocation within the conversation.
    ToolCall,
    /// Any kind this build does not understand. Acknowledged and ignored.
    #[serde(other)]
    Other,
}

/// Role of the message an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// An immutable fact describing something that happened in a conversation.
///
/// Produced by the platform, consumed read-only by the eval worker. The
/// stream payload is one JSON-serialized `SessionEvent` per message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session_id: String,
    pub namespace: String,
    pub agent_name: String,
    /// Role of the message, when the event describes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Eval-pack attribution carried by the event, overriding the session's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_version: Option<String>,
}

impl SessionEvent {
    /// Whether this event is an assistant-produced conversation turn, the
    /// only kind that triggers per-turn evaluation and counts as activity.
    pub fn is_assistant_turn(&self) -> bool {
        self.kind == SessionEventKind::AgentMessage && self.role == Some(MessageRole::Assistant)
    }
}
