//! Per-character action pass.
//!
//! Before prose is written, the most relevant characters each get a private
//! decision (goal, reasoning, chosen action) and the decisions are merged
//! into one ordered scene. Like planning, this pass never fails: a backend
//! error or an unusable reply produces [`CharacterActionPlan::fallback`].

use crate::llm::{extract_json_object, stream_to_string, ProgressStream, StreamItem};
use crate::outline::OutlineInfo;
use crate::state::normalize::{integer, text, text_list};
use crate::state::{head_chars, tail_chars, Character, WorldState};
use crate::thinking::ThinkingPlan;
use chat_client::LanguageModel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Maximum number of characters considered for one chapter.
pub const MAX_CANDIDATES: usize = 6;
const MAX_PLANS: usize = 6;
const MAX_STEPS: usize = 8;
const MAX_TARGETS: usize = 3;
const MAX_MEMORY_LINES: usize = 2;
const DERIVED_STEPS: usize = 5;
const OVERVIEW_CHARS: usize = 60;
const DEFAULT_GOAL: &str = "维持当前生存与优势";

const ACTION_SYSTEM_PROMPT: &str = "You simulate character behavior. Derive each character's actions \
     for this chapter from their personality and memories. Output JSON only.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MemoryImplication {
    pub short_term: Vec<String>,
    pub long_term: Vec<String>,
    pub action_log: String,
}

/// One character's private decision for the chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CharacterPlan {
    pub name: String,
    pub personality_anchor: String,
    pub current_goal: String,
    pub internal_thought: String,
    pub action_choice: String,
    pub interaction_targets: Vec<String>,
    pub risk_assessment: String,
    pub expected_change: String,
    pub memory_implication: MemoryImplication,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ActionStep {
    pub step: u32,
    pub actor: String,
    pub action: String,
    pub reason: String,
}

/// Scene-level result of the action pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CharacterActionPlan {
    pub scene_overview: String,
    pub character_plans: Vec<CharacterPlan>,
    pub scene_action_order: Vec<ActionStep>,
}

impl CharacterActionPlan {
    pub fn is_empty(&self) -> bool {
        self.character_plans.is_empty() && self.scene_action_order.is_empty()
    }

    /// Goal-driven plan built from the characters alone.
    pub fn fallback(candidates: &[&Character], outline: &OutlineInfo) -> Self {
        let mut plans = Vec::new();
        let mut order = Vec::new();
        for character in candidates.iter().take(MAX_PLANS) {
            let name = character.name.trim();
            if name.is_empty() {
                continue;
            }
            let goal = [&character.current_goal, &character.desire]
                .into_iter()
                .map(|s| s.trim())
                .find(|s| !s.is_empty())
                .unwrap_or(DEFAULT_GOAL)
                .to_string();
            let action_choice = format!("advance \"{goal}\" cautiously while watching how things shift");
            let personality = character.personality.trim();
            plans.push(CharacterPlan {
                name: name.to_string(),
                personality_anchor: if personality.is_empty() {
                    "cautious".to_string()
                } else {
                    personality.to_string()
                },
                current_goal: goal.clone(),
                internal_thought: format!("stay safe first, then look for a chance to advance \"{goal}\""),
                action_choice: action_choice.clone(),
                interaction_targets: Vec::new(),
                risk_assessment: "misjudging the situation for lack of information".to_string(),
                expected_change: "minor shifts in state".to_string(),
                memory_implication: MemoryImplication {
                    short_term: vec![format!("{name} tried to advance their goal this chapter: {goal}")],
                    long_term: Vec::new(),
                    action_log: action_choice.clone(),
                },
            });
            order.push(ActionStep {
                step: order.len() as u32 + 1,
                actor: name.to_string(),
                action: action_choice,
                reason: "goal-driven".to_string(),
            });
        }

        Self {
            scene_overview: overview_from_goal(outline, "characters push forward around the current conflict"),
            character_plans: plans,
            scene_action_order: order,
        }
    }

    /// Normalize a model reply against the candidate set.
    ///
    /// Plans and steps naming characters outside the candidates are dropped.
    /// A reply with no usable plan yields the fallback.
    pub fn from_value(map: &Map<String, Value>, candidates: &[&Character], outline: &OutlineInfo) -> Self {
        let names: HashSet<&str> = candidates
            .iter()
            .map(|c| c.name.trim())
            .filter(|n| !n.is_empty())
            .collect();
        let allowed = |name: &str| names.is_empty() || names.contains(name);

        let mut plans = Vec::new();
        for item in map.get("character_plans").and_then(Value::as_array).into_iter().flatten() {
            let Some(obj) = item.as_object() else { continue };
            let name = text(obj.get("name"));
            if name.is_empty() || !allowed(&name) {
                continue;
            }
            let memory = obj.get("memory_implication").and_then(Value::as_object);
            plans.push(CharacterPlan {
                name,
                personality_anchor: text(obj.get("personality_anchor")),
                current_goal: text(obj.get("current_goal")),
                internal_thought: text(obj.get("internal_thought")),
                action_choice: text(obj.get("action_choice")),
                interaction_targets: text_list(obj.get("interaction_targets"), MAX_TARGETS),
                risk_assessment: text(obj.get("risk_assessment")),
                expected_change: text(obj.get("expected_change")),
                memory_implication: MemoryImplication {
                    short_term: text_list(memory.and_then(|m| m.get("short_term")), MAX_MEMORY_LINES),
                    long_term: text_list(memory.and_then(|m| m.get("long_term")), MAX_MEMORY_LINES),
                    action_log: text(memory.and_then(|m| m.get("action_log"))),
                },
            });
            if plans.len() >= MAX_PLANS {
                break;
            }
        }

        let mut order: Vec<ActionStep> = Vec::new();
        for item in map.get("scene_action_order").and_then(Value::as_array).into_iter().flatten() {
            let Some(obj) = item.as_object() else { continue };
            let actor = text(obj.get("actor"));
            let action = text(obj.get("action"));
            if actor.is_empty() || action.is_empty() || !allowed(&actor) {
                continue;
            }
            let step = integer(obj.get("step"))
                .and_then(|n| u32::try_from(n).ok())
                .filter(|&n| n > 0)
                .unwrap_or(order.len() as u32 + 1);
            order.push(ActionStep {
                step,
                actor,
                action,
                reason: text(obj.get("reason")),
            });
            if order.len() >= MAX_STEPS {
                break;
            }
        }

        if plans.is_empty() {
            return Self::fallback(candidates, outline);
        }

        let mut scene_overview = text(map.get("scene_overview"));
        if scene_overview.is_empty() {
            scene_overview = overview_from_goal(outline, "characters push forward around the conflict");
        }

        if order.is_empty() {
            order = plans
                .iter()
                .take(DERIVED_STEPS)
                .filter(|p| !p.name.is_empty() && !p.action_choice.is_empty())
                .enumerate()
                .map(|(i, p)| ActionStep {
                    step: i as u32 + 1,
                    actor: p.name.clone(),
                    action: p.action_choice.clone(),
                    reason: p.current_goal.clone(),
                })
                .collect();
        }

        Self {
            scene_overview,
            character_plans: plans,
            scene_action_order: order,
        }
    }

    /// One-line progress summary.
    pub fn summary_line(&self) -> String {
        let names: Vec<&str> = self
            .character_plans
            .iter()
            .map(|p| p.name.trim())
            .filter(|n| !n.is_empty())
            .collect();
        let shown = if names.is_empty() {
            "none".to_string()
        } else {
            names.iter().take(4).copied().collect::<Vec<_>>().join("、")
        };
        let scene = self.scene_overview.trim();
        if scene.is_empty() {
            format!(
                "character actions ready: {} ({shown}) | steps: {}",
                names.len(),
                self.scene_action_order.len()
            )
        } else {
            format!(
                "character actions ready: {} ({shown}) | scene: {} | steps: {}",
                names.len(),
                head_chars(scene, 30),
                self.scene_action_order.len()
            )
        }
    }

    /// Prompt block injected into the generation request.
    pub fn format_for_generation(&self) -> String {
        let mut lines = vec!["[Character decisions - scene level]".to_string()];
        if !self.scene_overview.trim().is_empty() {
            lines.push(format!("Scene driver: {}", self.scene_overview.trim()));
        }

        for plan in self.character_plans.iter().take(MAX_PLANS) {
            let name = plan.name.trim();
            let action = plan.action_choice.trim();
            if name.is_empty() || action.is_empty() {
                continue;
            }
            let mut line = format!("- {name}: action={action}");
            if !plan.current_goal.trim().is_empty() {
                line.push_str(&format!(" | goal={}", plan.current_goal.trim()));
            }
            if !plan.personality_anchor.trim().is_empty() {
                line.push_str(&format!(" | anchor={}", plan.personality_anchor.trim()));
            }
            lines.push(line);
            if !plan.internal_thought.trim().is_empty() {
                lines.push(format!("  inner judgment: {}", plan.internal_thought.trim()));
            }
            if !plan.risk_assessment.trim().is_empty() {
                lines.push(format!("  main risk: {}", plan.risk_assessment.trim()));
            }
        }

        if !self.scene_action_order.is_empty() {
            lines.push("Action order (follow it where possible):".to_string());
            for step in self.scene_action_order.iter().take(6) {
                if step.actor.trim().is_empty() || step.action.trim().is_empty() {
                    continue;
                }
                let mut line = format!("{}. {} -> {}", step.step, step.actor.trim(), step.action.trim());
                if !step.reason.trim().is_empty() {
                    line.push_str(&format!(" (because: {})", step.reason.trim()));
                }
                lines.push(line);
            }
        }
        lines.join("\n")
    }
}

fn overview_from_goal(outline: &OutlineInfo, default: &str) -> String {
    let goal = outline.specific_goal.trim();
    if goal.is_empty() {
        default.to_string()
    } else {
        head_chars(goal, OVERVIEW_CHARS)
    }
}

/// Pick up to `limit` characters for the action pass.
///
/// Protagonists come first, then characters with more dynamic state
/// (status, action history, relationships), then original order.
pub fn select_candidates(world: &WorldState, limit: usize) -> Vec<&Character> {
    let mut scored: Vec<((u8, i32, usize), &Character)> = world
        .characters
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.name.trim().is_empty())
        .map(|(index, c)| {
            let role_rank = if c.is_protagonist() { 0 } else { 1 };
            let dynamic = [
                c.current_status.iter().any(|s| !s.trim().is_empty()),
                !c.action_history.is_empty(),
                !c.relationships.is_empty(),
            ]
            .into_iter()
            .filter(|b| *b)
            .count() as i32;
            ((role_rank, -dynamic, index), c)
        })
        .collect();
    scored.sort_by_key(|(key, _)| *key);
    scored.into_iter().take(limit).map(|(_, c)| c).collect()
}

fn storyboard_seed(plan: Option<&ThinkingPlan>) -> String {
    let Some(plan) = plan else {
        return String::new();
    };
    plan.chapter_blueprint
        .storyboard
        .iter()
        .take(3)
        .map(|shot| {
            let location = if shot.location.trim().is_empty() {
                "unknown scene"
            } else {
                shot.location.trim()
            };
            let mut line = format!("- {location}");
            if !shot.purpose.trim().is_empty() {
                line.push_str(&format!(" | purpose: {}", shot.purpose.trim()));
            }
            if let Some(beat) = shot.action_beats.iter().find(|b| !b.action.trim().is_empty()) {
                line.push_str(&format!(" | core action: {}", beat.action.trim()));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_unknown(value: &str) -> &str {
    if value.trim().is_empty() {
        "unknown"
    } else {
        value.trim()
    }
}

fn candidate_block(character: &Character) -> String {
    let mut block = format!(
        "- {} [{}] | personality:{} | desire:{} | goal:{} | level:{}",
        character.name.trim(),
        character.role,
        or_unknown(&character.personality),
        or_unknown(&character.desire),
        if character.current_goal.trim().is_empty() {
            "unset"
        } else {
            character.current_goal.trim()
        },
        character.display_level(),
    );
    if !character.physical_state.trim().is_empty() || !character.mental_state.trim().is_empty() {
        block.push_str(&format!(
            "\n  state: body={}; mind={}",
            or_unknown(&character.physical_state),
            or_unknown(&character.mental_state)
        ));
    }
    let status: Vec<&str> = character
        .current_status
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(2)
        .collect();
    if !status.is_empty() {
        block.push_str(&format!("\n  recent status: {}", status.join("；")));
    }
    let start = character.action_history.len().saturating_sub(3);
    let actions: Vec<String> = character.action_history[start..]
        .iter()
        .map(|a| a.format_line())
        .filter(|l| !l.is_empty())
        .collect();
    if !actions.is_empty() {
        block.push_str(&format!("\n  action history: {}", actions.join(" | ")));
    }
    let relations: Vec<String> = character
        .relationships
        .iter()
        .take(3)
        .filter(|r| !r.target.trim().is_empty())
        .map(|r| format!("{}->{}", or_unknown(&r.relation_type), r.target.trim()))
        .collect();
    if !relations.is_empty() {
        block.push_str(&format!("\n  relationships: {}", relations.join(", ")));
    }
    block
}

/// Prompt for the action pass.
pub fn build_action_prompt(
    chapter: u32,
    outline: &OutlineInfo,
    previous_content: &str,
    plan: Option<&ThinkingPlan>,
    candidates: &[&Character],
) -> String {
    let blocks: Vec<String> = candidates.iter().map(|c| candidate_block(c)).collect();
    let seed = storyboard_seed(plan);
    let previous = if previous_content.is_empty() {
        "(start of the story)"
    } else {
        tail_chars(previous_content, 1500)
    };
    let seed = if seed.is_empty() {
        "(no storyboard, derive from the chapter goal)".to_string()
    } else {
        seed
    };

    format!(
        r#"Simulate the characters' decisions for this chapter:
1) read each character's personality, memories and current state;
2) decide privately for each character, then merge the decisions into one scene order;
3) output structured JSON that can be used directly for writing.

[Chapter] {chapter}
[Volume goal] {volume}
[Current phase] {phase}
[Chapter goal] {goal}

[Previous ending]
{previous}

[Storyboard seed]
{seed}

[Candidates, by priority]
{blocks}

Output JSON (no explanation):
{{
  "scene_overview": "what drives the scene (under 50 words)",
  "character_plans": [
    {{
      "name": "character name",
      "personality_anchor": "the trait that most shapes the decision",
      "current_goal": "short-term goal this chapter",
      "internal_thought": "inner judgment",
      "action_choice": "final action",
      "interaction_targets": ["who they engage first"],
      "risk_assessment": "main risk of the choice",
      "expected_change": "likely change of state",
      "memory_implication": {{
        "short_term": ["facts for short-term memory"],
        "long_term": ["events for long-term memory"],
        "action_log": "one line for the action history"
      }}
    }}
  ],
  "scene_action_order": [
    {{"step": 1, "actor": "character name", "action": "action", "reason": "why"}}
  ]
}}

Rules:
1. Cover at least 3 characters in character_plans (all of them if fewer).
2. Actions must fit personality and existing relationships.
3. scene_action_order has at least 3 steps consistent with character_plans.
4. Output JSON only."#,
        volume = outline.volume,
        phase = outline.phase,
        goal = outline.specific_goal,
        blocks = blocks.join("\n"),
    )
}

/// Inputs for one action pass.
#[derive(Debug, Clone, Copy)]
pub struct ActionRequest<'a> {
    pub chapter: u32,
    pub outline: &'a OutlineInfo,
    pub previous_content: &'a str,
    pub thinking_plan: Option<&'a ThinkingPlan>,
    pub world: &'a WorldState,
    /// Label of the model in use, shown in progress output.
    pub source: &'a str,
}

/// Run the action pass. Ends with exactly one `Result`.
pub fn plan_character_actions<'a>(
    model: &'a dyn LanguageModel,
    request: ActionRequest<'a>,
) -> ProgressStream<'a, CharacterActionPlan> {
    Box::pin(async_stream::stream! {
        let candidates = select_candidates(request.world, MAX_CANDIDATES);
        if candidates.is_empty() {
            yield StreamItem::Result(CharacterActionPlan::default());
            return;
        }

        yield StreamItem::progress(format!("simulating character actions ({})...", request.source));
        let prompt = build_action_prompt(
            request.chapter,
            request.outline,
            request.previous_content,
            request.thinking_plan,
            &candidates,
        );

        let plan = match stream_to_string(model, &prompt, ACTION_SYSTEM_PROMPT).await {
            Ok(response) => match extract_json_object(&response) {
                Some(map) => CharacterActionPlan::from_value(&map, &candidates, request.outline),
                None => {
                    tracing::debug!(chapter = request.chapter, "action plan reply had no JSON object");
                    CharacterActionPlan::fallback(&candidates, request.outline)
                }
            },
            Err(e) => {
                tracing::warn!(chapter = request.chapter, error = %e, "action pass failed");
                yield StreamItem::progress(format!("action pass failed: {e}"));
                CharacterActionPlan::fallback(&candidates, request.outline)
            }
        };

        yield StreamItem::progress(plan.summary_line());
        yield StreamItem::Result(plan);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::collect;
    use crate::state::{ActionEntry, CharacterRole, Relationship};
    use crate::testing::{sample_world, ScriptedModel};
    use serde_json::json;

    fn outline(goal: &str) -> OutlineInfo {
        OutlineInfo {
            volume: "第一卷".into(),
            phase: "破封".into(),
            specific_goal: goal.into(),
        }
    }

    fn cast() -> WorldState {
        let mut busy = Character::new("白衣女鬼");
        busy.current_status.push("潜伏".into());
        busy.action_history.push(ActionEntry::new("窥视"));
        busy.relationships.push(Relationship {
            target: "沈焱笙".into(),
            relation_type: "敌对".into(),
            description: String::new(),
        });
        WorldState::new()
            .with_character(Character::new("路人甲"))
            .with_character(busy)
            .with_character(Character::new("沈焱笙").with_role(CharacterRole::Protagonist))
    }

    #[test]
    fn test_candidate_ordering() {
        let world = cast();
        let names: Vec<&str> = select_candidates(&world, 6).iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["沈焱笙", "白衣女鬼", "路人甲"]);
        assert_eq!(select_candidates(&world, 1).len(), 1);
    }

    #[test]
    fn test_normalization_limits_and_renumbering() {
        let world = cast();
        let candidates = select_candidates(&world, 6);
        let map = json!({
            "character_plans": [
                {"name": "沈焱笙", "action_choice": "破井", "interaction_targets": ["a", "b", "c", "d"],
                 "memory_implication": {"short_term": ["1", "2", "3"]}},
                {"name": "陌生人", "action_choice": "乱入"},
                "not an object"
            ],
            "scene_action_order": [
                {"step": 0, "actor": "沈焱笙", "action": "破井"},
                {"step": 7, "actor": "白衣女鬼", "action": "偷袭"},
                {"actor": "陌生人", "action": "乱入"},
                {"actor": "路人甲", "action": ""}
            ]
        });
        let plan = CharacterActionPlan::from_value(map.as_object().unwrap(), &candidates, &outline("离开阴井"));
        assert_eq!(plan.character_plans.len(), 1);
        assert_eq!(plan.character_plans[0].interaction_targets.len(), 3);
        assert_eq!(plan.character_plans[0].memory_implication.short_term.len(), 2);
        assert_eq!(plan.scene_overview, "离开阴井");
        let steps: Vec<u32> = plan.scene_action_order.iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![1, 7]);
    }

    #[test]
    fn test_out_of_range_steps_are_renumbered() {
        let world = cast();
        let candidates = select_candidates(&world, 6);
        let map = json!({
            "scene_action_order": [
                {"step": -3, "actor": "沈焱笙", "action": "破井"},
                {"step": 5_000_000_000_i64, "actor": "白衣女鬼", "action": "偷袭"},
                {"step": "4294967297", "actor": "路人甲", "action": "逃窜"}
            ]
        });
        let plan = CharacterActionPlan::from_value(map.as_object().unwrap(), &candidates, &outline("离开阴井"));
        let steps: Vec<u32> = plan.scene_action_order.iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_order_is_derived() {
        let world = cast();
        let candidates = select_candidates(&world, 6);
        let map = json!({
            "scene_overview": "夜探",
            "character_plans": [
                {"name": "沈焱笙", "action_choice": "潜行", "current_goal": "查探"},
                {"name": "白衣女鬼", "action_choice": "引诱"}
            ]
        });
        let plan = CharacterActionPlan::from_value(map.as_object().unwrap(), &candidates, &outline(""));
        assert_eq!(plan.scene_action_order.len(), 2);
        assert_eq!(plan.scene_action_order[0].reason, "查探");
        assert_eq!(plan.scene_action_order[1].step, 2);
    }

    #[test]
    fn test_fallback_goal_chain() {
        let mut hero = Character::new("沈焱笙");
        hero.desire = "复仇".into();
        let idle = Character::new("路人甲");
        let plan = CharacterActionPlan::fallback(&[&hero, &idle], &outline(""));
        assert_eq!(plan.character_plans[0].current_goal, "复仇");
        assert_eq!(plan.character_plans[1].current_goal, DEFAULT_GOAL);
        assert_eq!(plan.scene_action_order.len(), 2);
        assert!(plan.format_for_generation().contains("- 沈焱笙: action="));
    }

    #[tokio::test]
    async fn test_no_candidates_skips_model() {
        let model = ScriptedModel::new(["{}"]);
        let world = WorldState::new();
        let info = outline("");
        let request = ActionRequest {
            chapter: 1,
            outline: &info,
            previous_content: "",
            thinking_plan: None,
            world: &world,
            source: "chat",
        };
        let (lines, plan) = collect(plan_character_actions(&model, request)).await;
        assert!(lines.is_empty());
        assert!(plan.unwrap().is_empty());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_uses_fallback() {
        let model = ScriptedModel::new(Vec::<String>::new());
        model.push_error("timeout");
        let world = sample_world();
        let info = outline("与将军鬼物交手");
        let request = ActionRequest {
            chapter: 2,
            outline: &info,
            previous_content: "井底",
            thinking_plan: None,
            world: &world,
            source: "think",
        };
        let (lines, plan) = collect(plan_character_actions(&model, request)).await;
        let plan = plan.unwrap();
        assert_eq!(plan.character_plans.len(), 2);
        assert_eq!(plan.character_plans[0].current_goal, "离开阴井");
        assert!(lines.iter().any(|l| l.starts_with("action pass failed")));
        assert!(lines.last().unwrap().starts_with("character actions ready: 2"));
    }
}
