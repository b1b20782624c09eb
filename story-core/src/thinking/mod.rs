//! Plot planning pass.
//!
//! [`PlotThinkingEngine`] asks a reasoning model for a structured chapter
//! plan before any prose is written. Planning is optional and always
//! degrades: a failed call or unparseable reply yields
//! [`ThinkingPlan::fallback`] instead of an error.

mod cache;
mod format;
mod mode;
pub mod plan;

pub use cache::{build_cache_key, PlanCache};
pub use format::{format_for_generation, format_full_plan_display, format_summary};
pub use mode::{clip_tail, resolve_thinking_mode};
pub use plan::ThinkingPlan;

use crate::config::{StoryConfig, ThinkingMode};
use crate::llm::{extract_json_object, stream_to_string, ProgressStream, StreamItem};
use crate::outline::OutlineInfo;
use crate::state::head_chars;
use chat_client::LanguageModel;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Inputs for planning one chapter.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub chapter: u32,
    pub outline: OutlineInfo,
    pub world_context: String,
    pub previous_content: String,
    pub is_append: bool,
    /// Already resolved; `Auto` falls back to fast for appends, deep otherwise.
    pub mode: ThinkingMode,
}

pub struct PlotThinkingEngine {
    model: Arc<dyn LanguageModel>,
    cache: Mutex<PlanCache>,
    previous_context_chars: usize,
    world_context_chars: usize,
}

impl PlotThinkingEngine {
    pub fn new(model: Arc<dyn LanguageModel>, config: &StoryConfig) -> Self {
        Self {
            model,
            cache: Mutex::new(PlanCache::new(config.thinking_cache_size)),
            previous_context_chars: config.thinking_previous_context_chars.max(500),
            world_context_chars: config.thinking_world_context_chars.max(500),
        }
    }

    /// The reasoning model, also used for state analysis when present.
    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    pub async fn cached_plans(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Plan one chapter. Ends with exactly one `Result`.
    pub fn analyze_chapter(&self, request: PlanRequest) -> ProgressStream<'_, ThinkingPlan> {
        Box::pin(async_stream::stream! {
            let mode = match request.mode {
                ThinkingMode::Auto if request.is_append => ThinkingMode::Fast,
                ThinkingMode::Auto => ThinkingMode::Deep,
                explicit => explicit,
            };
            let world_context = clip_tail(&request.world_context, self.world_context_chars);
            let previous = clip_tail(&request.previous_content, self.previous_context_chars);
            let key = build_cache_key(request.chapter, mode, &request.outline, world_context, previous);

            let cached = self.cache.lock().await.get(&key);
            if let Some(plan) = cached {
                tracing::debug!(chapter = request.chapter, %mode, "plan cache hit");
                yield StreamItem::progress(format!("using cached plan ({mode})"));
                yield StreamItem::progress(format_summary(&plan));
                yield StreamItem::Result(plan);
                return;
            }

            let prompt = build_plan_prompt(mode, request.chapter, &request.outline, world_context, previous);
            yield StreamItem::progress(format!("analyzing plot ({mode})..."));

            let response = match stream_to_string(self.model.as_ref(), &prompt, plan_system_prompt(mode)).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(chapter = request.chapter, error = %e, "planning call failed");
                    yield StreamItem::progress(format!("API call failed: {e}"));
                    yield StreamItem::Result(ThinkingPlan::fallback(
                        request.chapter,
                        &request.outline.specific_goal,
                        mode,
                    ));
                    return;
                }
            };

            match extract_json_object(&response) {
                Some(map) => {
                    let mut plan = ThinkingPlan::from_value(&map);
                    plan.meta.thinking_mode = Some(mode);
                    self.cache.lock().await.insert(key, &plan);
                    yield StreamItem::progress(format_summary(&plan));
                    yield StreamItem::Result(plan);
                }
                None => {
                    tracing::warn!(chapter = request.chapter, len = response.len(), "plan parse failed");
                    yield StreamItem::progress("plan parse failed");
                    yield StreamItem::progress(format!("response length: {} chars", response.chars().count()));
                    if response.is_empty() {
                        yield StreamItem::progress("response empty");
                    } else {
                        yield StreamItem::progress(format!("response head: {}...", head_chars(&response, 200)));
                    }
                    yield StreamItem::progress("using default plan");
                    yield StreamItem::Result(ThinkingPlan::fallback(
                        request.chapter,
                        &request.outline.specific_goal,
                        mode,
                    ));
                }
            }
        })
    }

    /// Revise a plan from reviewer feedback. Keeps `current` when the reply
    /// cannot be parsed.
    pub fn refine_plan<'a>(
        &'a self,
        current: &'a ThinkingPlan,
        feedback: &'a str,
    ) -> ProgressStream<'a, ThinkingPlan> {
        Box::pin(async_stream::stream! {
            let current_json = serde_json::to_string_pretty(current).unwrap_or_default();
            let prompt = format!(
                "The current chapter plan is:\n\n```json\n{current_json}\n```\n\n\
                 The author wants these changes:\n{feedback}\n\n\
                 Adjust the plan accordingly and output the complete revised JSON plan. \
                 Keep the JSON structure unchanged."
            );
            let system = "You are a senior fiction screenwriter revising a chapter plan from feedback. \
                          Keep the JSON format and change only what the feedback asks for. \
                          Output valid JSON only.";

            yield StreamItem::progress("adjusting plan...");
            let parsed = match stream_to_string(self.model.as_ref(), &prompt, system).await {
                Ok(text) => extract_json_object(&text),
                Err(e) => {
                    yield StreamItem::progress(format!("API call failed: {e}"));
                    None
                }
            };
            match parsed {
                Some(map) => {
                    let mut plan = ThinkingPlan::from_value(&map);
                    if plan.meta.thinking_mode.is_none() {
                        plan.meta.thinking_mode = current.meta.thinking_mode;
                    }
                    yield StreamItem::progress("plan adjusted");
                    yield StreamItem::Result(plan);
                }
                None => {
                    yield StreamItem::progress("adjustment failed, keeping the current plan");
                    yield StreamItem::Result(current.clone());
                }
            }
        })
    }

    /// Polish a finished chapter. Streams the new text as progress and ends
    /// with the full result.
    pub fn refine_chapter<'a>(
        &'a self,
        content: &'a str,
        world_context: &'a str,
        style_ref: &'a str,
        focus: &'a str,
    ) -> ProgressStream<'a, String> {
        Box::pin(async_stream::stream! {
            let style_hint = if style_ref.is_empty() {
                String::new()
            } else {
                format!("\n[Style reference]\nImitate the writing style of this text:\n{}\n", head_chars(style_ref, 1000))
            };
            let prompt = format!(
                "Polish the following novel chapter.\n\n[Focus] {focus}\n\n\
                 [World and characters]\n{world_context}\n{style_hint}\n\
                 [Chapter]\n{content}\n\n---\n\n\
                 Keep the plot, the characters and roughly the same length. \
                 Improve rhythm, dialogue and imagery. Output only the polished chapter."
            );
            let system = "You are a senior fiction editor. Raise the quality of the prose without changing the story. \
                          Output the polished text only, with no commentary.";

            yield StreamItem::progress("polishing chapter...");
            let mut stream = match self.model.stream_chat(&prompt, system).await {
                Ok(stream) => stream,
                Err(e) => {
                    yield StreamItem::progress(format!("API call failed: {e}"));
                    yield StreamItem::Result(content.to_string());
                    return;
                }
            };
            let mut refined = String::new();
            while let Some(fragment) = stream.next().await {
                match fragment {
                    Ok(text) => {
                        refined.push_str(&text);
                        yield StreamItem::Progress(text);
                    }
                    Err(e) => {
                        yield StreamItem::progress(format!("stream interrupted: {e}"));
                        break;
                    }
                }
            }
            yield StreamItem::Result(refined);
        })
    }
}

fn plan_system_prompt(mode: ThinkingMode) -> &'static str {
    match mode {
        ThinkingMode::Fast => {
            "You are a senior web-fiction editor. Produce an actionable chapter plan quickly. \
             Prioritize continuity and relationship logic. Output valid JSON only, no explanation."
        }
        _ => {
            "You are a senior screenwriter who specializes in plot continuity and character \
             relationship logic. Build a detailed storyboard and make sure the output is valid JSON."
        }
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

fn build_plan_prompt(
    mode: ThinkingMode,
    chapter: u32,
    outline: &OutlineInfo,
    world_context: &str,
    previous: &str,
) -> String {
    let guidance = format!(
        "[World and character state]\n{world_context}\n\n\
         [Outline guidance]\n- volume goal: {}\n- current phase: {}\n- this chapter: {}\n",
        or_default(&outline.volume, "unknown"),
        or_default(&outline.phase, "unknown"),
        or_default(&outline.specific_goal, "unspecified"),
    );
    let previous = or_default(previous, "(start of the story)");

    if mode == ThinkingMode::Fast {
        return format!(
            "Make a quick plot plan for chapter {chapter}. Use as few tokens as possible while \
             keeping continuity and character logic.\n\n{guidance}\n\
             [Previous ending - must connect]\n{previous}\n\n\
             Output JSON:\n{FAST_SCHEMA}\n\n\
             Rules:\n1. Keep the storyboard to 3-5 shots.\n\
             2. Characters meeting for the first time must not talk familiarly.\n\
             3. Output JSON only."
        );
    }

    format!(
        "Create a detailed storyboard for chapter {chapter}.\n\n\
         Core requirements:\n\
         1. Continue directly from the previous ending or deal with its consequences. No jumps.\n\
         2. Actions and dialogue must match each character's personality and current mood.\n\
         3. Check whether the protagonist already knows everyone who appears. First meetings need \
         observation, probing and introductions. Information the protagonist lacks stays unknown \
         from their point of view.\n\
         4. Plan every scene like a film storyboard.\n\n{guidance}\n\
         [Previous content - focus on the ending and the protagonist's relationships]\n{previous}\n\n\
         ---\n\nOutput the JSON plan:\n{DEEP_SCHEMA}\n\n\
         Check relationship logic, make the opening seamless, and show relationships through \
         expressions and subtext. Output JSON:"
    )
}

const FAST_SCHEMA: &str = r#"```json
{
  "plot_analysis": {
    "pre_chapter_context": {"previous_ending": "", "immediate_consequences": "", "character_emotional_carryover": ""},
    "interaction_logic_check": [{"characters": ["A", "B"], "relation_status": "strangers/acquainted/hostile/unknown", "interaction_guidance": ""}],
    "current_situation": ""
  },
  "chapter_blueprint": {
    "title_suggestion": "", "theme": "", "opening_hook": "",
    "storyboard": [{"shot_number": 1, "location": "", "action_beats": [{"beat": 1, "actor": "", "action": "", "reaction": ""}],
                    "dialogue_script": [{"speaker": "", "line": "", "tone": ""}], "purpose": "", "word_count": 400}],
    "key_moments": [{"moment_type": "", "description": "", "impact": ""}],
    "cliffhanger": {"type": "", "final_line": "", "reader_hook": ""},
    "writing_guidance": {"tone": "", "pacing": "", "highlight": [], "avoid": []}
  }
}
```"#;

const DEEP_SCHEMA: &str = r#"```json
{
  "plot_analysis": {
    "pre_chapter_context": {"previous_ending": "", "immediate_consequences": "", "character_emotional_carryover": ""},
    "interaction_logic_check": [{"characters": ["A", "B"], "relation_status": "", "interaction_guidance": ""}],
    "current_situation": "",
    "unresolved_threads": []
  },
  "chapter_blueprint": {
    "title_suggestion": "", "theme": "", "opening_hook": "", "total_word_target": 3500,
    "storyboard": [{
      "shot_number": 1, "shot_type": "", "location": "", "time": "", "atmosphere": "",
      "characters_on_screen": [{"name": "", "position": "", "posture": "", "expression": "", "emotion": "", "inner_thought": ""}],
      "action_beats": [{"beat": 1, "actor": "", "action": "", "reaction": ""}],
      "dialogue_script": [{"speaker": "", "line": "", "tone": "", "subtext": "", "action_during": ""}],
      "sensory_details": {"visual": "", "audio": "", "smell": ""},
      "tension_level": 7, "word_count": 500, "purpose": ""
    }],
    "character_journey": {"name": {"start_state": "", "trigger_event": "", "internal_conflict": "", "decision": "", "end_state": "", "growth_delta": ""}},
    "conflict_escalation": [{"stage": "", "conflict_type": "", "parties": [], "stakes": "", "beat_description": ""}],
    "key_moments": [{"moment_type": "", "description": "", "impact": ""}],
    "foreshadowing": [{"hint": "", "how_to_plant": "", "payoff_chapter": ""}],
    "cliffhanger": {"type": "", "final_line": "", "reader_hook": ""},
    "writing_guidance": {"tone": "", "pacing": "", "style_notes": "", "highlight": [], "avoid": []}
  }
}
```"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::collect;
    use crate::testing::ScriptedModel;

    fn request(goal: &str) -> PlanRequest {
        PlanRequest {
            chapter: 5,
            outline: OutlineInfo {
                volume: "第一卷".into(),
                phase: "立足".into(),
                specific_goal: goal.into(),
            },
            world_context: "world".into(),
            previous_content: "previous".into(),
            is_append: false,
            mode: ThinkingMode::Deep,
        }
    }

    const PLAN: &str = r#"```json
{"chapter_blueprint": {"theme": "交手", "storyboard": [{"shot_number": 1, "location": "凛阴岗"}]}}
```"#;

    #[tokio::test]
    async fn test_identical_requests_hit_cache() {
        let model = Arc::new(ScriptedModel::new([PLAN, PLAN]));
        let engine = PlotThinkingEngine::new(model.clone(), &StoryConfig::default());

        let (_, first) = collect(engine.analyze_chapter(request("与将军鬼物交手"))).await;
        let (lines, second) = collect(engine.analyze_chapter(request("与将军鬼物交手"))).await;
        assert_eq!(model.call_count(), 1);
        assert!(lines[0].starts_with("using cached plan"));
        assert_eq!(first, second);
        assert_eq!(second.unwrap().chapter_blueprint.theme, "交手");

        collect(engine.analyze_chapter(request("another goal"))).await;
        assert_eq!(model.call_count(), 2);
        assert_eq!(engine.cached_plans().await, 2);
    }

    #[tokio::test]
    async fn test_unparseable_reply_degrades() {
        let model = Arc::new(ScriptedModel::new(["I cannot plan this chapter."]));
        let engine = PlotThinkingEngine::new(model, &StoryConfig::default());
        let (lines, plan) = collect(engine.analyze_chapter(request("破局"))).await;
        let plan = plan.unwrap();
        assert_eq!(plan.chapter_blueprint.theme, "破局");
        assert_eq!(plan.mode(), Some(ThinkingMode::Deep));
        assert!(lines.contains(&"plan parse failed".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("response head: I cannot")));
        assert_eq!(engine.cached_plans().await, 0);
    }

    #[tokio::test]
    async fn test_backend_failure_degrades() {
        let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        model.push_error("connection reset");
        let engine = PlotThinkingEngine::new(model, &StoryConfig::default());
        let (lines, plan) = collect(engine.analyze_chapter(request(""))).await;
        assert!(lines.iter().any(|l| l.starts_with("API call failed")));
        assert_eq!(plan.unwrap().chapter_blueprint.theme, "Chapter 5");
    }

    #[tokio::test]
    async fn test_refine_plan_keeps_current_on_garbage() {
        let model = Arc::new(ScriptedModel::new(["not json", r#"{"chapter_plan": {"theme": "新"}}"#]));
        let engine = PlotThinkingEngine::new(model, &StoryConfig::default());
        let current = ThinkingPlan::fallback(2, "旧", ThinkingMode::Fast);

        let (_, kept) = collect(engine.refine_plan(&current, "more tension")).await;
        assert_eq!(kept.unwrap(), current);

        let (_, revised) = collect(engine.refine_plan(&current, "more tension")).await;
        let revised = revised.unwrap();
        assert_eq!(revised.chapter_blueprint.theme, "新");
        assert_eq!(revised.mode(), Some(ThinkingMode::Fast));
    }

    #[tokio::test]
    async fn test_refine_chapter_streams_text() {
        let model = Arc::new(ScriptedModel::new(["润色后的正文"]));
        let engine = PlotThinkingEngine::new(model, &StoryConfig::default());
        let (lines, text) = collect(engine.refine_chapter("原文", "world", "", "style")).await;
        assert_eq!(lines[0], "polishing chapter...");
        assert_eq!(text.unwrap(), "润色后的正文");
    }
}
