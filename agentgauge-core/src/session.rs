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

//! The session API's view of a conversation: metadata and transcript.

use crate::event::MessageRole;
use serde::{Deserialize, Serialize};

/// Session metadata as returned by the session API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub agent_name: String,
    pub namespace: String,
    /// Eval pack configured for the session's agent, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_version: Option<String>,
}

/// One message of a session transcript, in conversation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl SessionMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            message_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            message_id: None,
        }
    }
}

/// Count of assistant messages in a transcript, used as the turn index.
pub fn assistant_turn_count(messages: &[SessionMessage]) -> u32 {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_turn_count() {
        let messages = vec![
            SessionMessage::user("hi"),
            SessionMessage::assistant("hello"),
            SessionMessage::user("help me"),
            SessionMessage::assistant("sure"),
        ];
        assert_eq!(assistant_turn_count(&messages), 2);
        assert_eq!(assistant_turn_count(&[]), 0);
    }
}
