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

//! Eval definitions and the versioned packs that carry them.

use serde::{Deserialize, Serialize};

/// How an evaluation is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalKind {
    /// Cheap deterministic check, no model call.
    RuleBased,
    /// LLM-as-judge: the eval itself invokes a language model.
    ModelJudge,
    /// Arena-style assertion list over the transcript.
    Assertion,
}

/// When an evaluation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalTrigger {
    /// After every assistant-produced message.
    PerTurn,
    /// Once, after the session is determined to have ended.
    OnSessionComplete,
    /// After every `n`-th assistant message.
    EveryNTurns { n: u32 },
}

impl EvalTrigger {
    /// Whether this trigger fires for the given turn (turn indices start at 1,
    /// the count of assistant messages including the current one).
    pub fn fires_on_turn(&self, turn_index: u32) -> bool {
        match self {
            EvalTrigger::PerTurn => true,
            EvalTrigger::OnSessionComplete => false,
            EvalTrigger::EveryNTurns { n } => *n > 0 && turn_index % n == 0,
        }
    }

    pub fn fires_on_completion(&self) -> bool {
        matches!(self, EvalTrigger::OnSessionComplete)
    }
}

/// A named evaluation rule, immutable for the lifetime of one dispatch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalDefinition {
    pub id: String,
    pub kind: EvalKind,
    pub trigger: EvalTrigger,
    /// Arbitrary parameter bag interpreted by the eval runner.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl EvalDefinition {
    /// Model-judge evals are sampled and rate limited more aggressively than
    /// free rule checks.
    pub fn is_judge(&self) -> bool {
        self.kind == EvalKind::ModelJudge
    }
}

/// A versioned bundle of eval definitions loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalPack {
    pub name: String,
    pub version: String,
    pub evals: Vec<EvalDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_fires_on_turn() {
        assert!(EvalTrigger::PerTurn.fires_on_turn(1));
        assert!(EvalTrigger::PerTurn.fires_on_turn(7));
        assert!(!EvalTrigger::OnSessionComplete.fires_on_turn(1));

        let every_three = EvalTrigger::EveryNTurns { n: 3 };
        assert!(!every_three.fires_on_turn(1));
        assert!(!every_three.fires_on_turn(2));
        assert!(every_three.fires_on_turn(3));
        assert!(every_three.fires_on_turn(6));

        // n == 0 would otherwise fire on every turn via modulo-by-zero
        assert!(!EvalTrigger::EveryNTurns { n: 0 }.fires_on_turn(4));
    }

    #[test]
    fn test_trigger_fires_on_completion() {
        assert!(EvalTrigger::OnSessionComplete.fires_on_completion());
        assert!(!EvalTrigger::PerTurn.fires_on_completion());
        assert!(!EvalTrigger::EveryNTurns { n: 2 }.fires_on_completion());
    }

    #[test]
    fn test_definition_deserializes_from_pack_config() {
        let json = r#"{
            "id": "no-competitor-mentions",
            "kind": "rule_based",
            "trigger": "per_turn",
            "params": { "check": "not_contains", "value": "CompetitorCo" }
        }"#;
        let def: EvalDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.kind, EvalKind::RuleBased);
        assert!(!def.is_judge());
        assert_eq!(def.params["check"], "not_contains");

        let judge_json = r#"{
            "id": "helpfulness",
            "kind": "model_judge",
            "trigger": { "every_n_turns": { "n": 5 } }
        }"#;
        let judge: EvalDefinition = serde_json::from_str(judge_json).unwrap();
        assert!(judge.is_judge());
        assert_eq!(judge.trigger, EvalTrigger::EveryNTurns { n: 5 });
        assert!(judge.params.is_null());
    }
}
