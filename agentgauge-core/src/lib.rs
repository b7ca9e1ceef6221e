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

//! # AgentGauge Core
//!
//! Shared data model and platform contracts for the AgentGauge evaluation
//! pipeline:
//!
//! - **Session events**: the immutable facts consumed off the event streams
//! - **Eval definitions**: named evaluation rules loaded from versioned packs
//! - **Eval results**: the records the pipeline persists, exactly once per
//!   logical trigger
//! - **Service contracts**: traits for the session API, eval-pack loader, and
//!   provider resolver that the worker consumes but does not implement

pub mod api;
pub mod eval_def;
pub mod eval_result;
pub mod event;
pub mod provider;
pub mod session;

pub use api::{ApiError, EvalPackLoader, ProviderResolver, SessionApi};
pub use eval_def::{EvalDefinition, EvalKind, EvalPack, EvalTrigger};
pub use eval_result::{EvalOutcome, EvalResult, ResultSource};
pub use event::{MessageRole, SessionEvent, SessionEventKind};
pub use provider::ProviderSpec;
pub use session::{assistant_turn_count, SessionMessage, SessionMeta};
