//! Typed chapter plan produced by the planning pass.
//!
//! Model output is loose: the same concept arrives under several key names
//! depending on prompt version. [`ThinkingPlan::from_value`] folds every
//! known alias into one shape; the serde derive uses the canonical names so
//! a plan can be stored with a preparation bundle and read back unchanged.

use crate::config::ThinkingMode;
use crate::state::normalize::{integer, text, text_any, text_list};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PreChapterContext {
    pub previous_ending: String,
    pub immediate_consequences: String,
    pub character_emotional_carryover: String,
}

impl PreChapterContext {
    pub fn is_empty(&self) -> bool {
        self.previous_ending.is_empty()
            && self.immediate_consequences.is_empty()
            && self.character_emotional_carryover.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InteractionCheck {
    pub characters: Vec<String>,
    pub relation_status: String,
    pub interaction_guidance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlotAnalysis {
    pub pre_chapter_context: PreChapterContext,
    pub interaction_logic_check: Vec<InteractionCheck>,
    pub current_situation: String,
    pub unresolved_threads: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OnScreen {
    pub name: String,
    pub position: String,
    pub posture: String,
    pub expression: String,
    pub emotion: String,
    pub inner_thought: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ActionBeat {
    pub beat: String,
    pub actor: String,
    pub action: String,
    pub reaction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DialogueLine {
    pub speaker: String,
    pub line: String,
    pub tone: String,
    pub subtext: String,
    pub action_during: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SensoryDetails {
    pub visual: String,
    pub audio: String,
    pub smell: String,
}

/// One storyboard shot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Shot {
    pub shot_number: String,
    pub shot_type: String,
    pub location: String,
    pub time: String,
    pub atmosphere: String,
    pub characters_on_screen: Vec<OnScreen>,
    pub action_beats: Vec<ActionBeat>,
    pub dialogue_script: Vec<DialogueLine>,
    pub sensory_details: SensoryDetails,
    pub tension_level: Option<i64>,
    pub word_count: Option<i64>,
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CharacterArc {
    pub name: String,
    pub start_state: String,
    pub trigger_event: String,
    pub internal_conflict: String,
    pub decision: String,
    pub end_state: String,
    pub growth_delta: String,
    /// Free text when the arc was given as a plain string.
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Conflict {
    pub stage: String,
    pub conflict_type: String,
    pub parties: Vec<String>,
    pub stakes: String,
    pub beat_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeyMoment {
    pub moment_type: String,
    pub description: String,
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Foreshadowing {
    pub hint: String,
    pub how_to_plant: String,
    pub payoff_chapter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Cliffhanger {
    #[serde(rename = "type")]
    pub kind: String,
    pub final_line: String,
    /// Design note, or the whole hook when the model sent a string.
    pub content: String,
    pub reader_hook: String,
}

impl Cliffhanger {
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty()
            && self.final_line.is_empty()
            && self.content.is_empty()
            && self.reader_hook.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChapterBlueprint {
    pub title_suggestion: String,
    pub theme: String,
    pub opening_hook: String,
    pub storyboard: Vec<Shot>,
    pub character_journey: Vec<CharacterArc>,
    pub conflict_escalation: Vec<Conflict>,
    pub key_moments: Vec<KeyMoment>,
    pub foreshadowing: Vec<Foreshadowing>,
    pub cliffhanger: Cliffhanger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WritingGuidance {
    pub tone: String,
    pub pacing: String,
    pub focus: String,
    pub style_notes: String,
    pub highlight: Vec<String>,
    pub avoid: Vec<String>,
}

impl WritingGuidance {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlanMeta {
    pub thinking_mode: Option<ThinkingMode>,
}

/// Structured plan for one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ThinkingPlan {
    pub plot_analysis: PlotAnalysis,
    pub chapter_blueprint: ChapterBlueprint,
    pub writing_guidance: WritingGuidance,
    #[serde(rename = "_meta")]
    pub meta: PlanMeta,
}

impl ThinkingPlan {
    /// Fallback plan used when planning fails.
    pub fn fallback(chapter: u32, specific_goal: &str, mode: ThinkingMode) -> Self {
        let theme = if specific_goal.trim().is_empty() {
            format!("Chapter {chapter}")
        } else {
            specific_goal.trim().to_string()
        };
        Self {
            chapter_blueprint: ChapterBlueprint {
                theme,
                ..Default::default()
            },
            writing_guidance: WritingGuidance {
                tone: "follow the outline".to_string(),
                pacing: "normal".to_string(),
                focus: "plot progression".to_string(),
                ..Default::default()
            },
            meta: PlanMeta {
                thinking_mode: Some(mode),
            },
            ..Default::default()
        }
    }

    pub fn mode(&self) -> Option<ThinkingMode> {
        self.meta.thinking_mode
    }

    /// Normalize a model-produced plan object.
    pub fn from_value(map: &Map<String, Value>) -> Self {
        let blueprint = first_object(map, &["chapter_blueprint", "chapter_plan"]);
        let guidance = first_object(map, &["writing_guidance", "writing_notes"])
            .or_else(|| blueprint.and_then(|b| first_object(b, &["writing_guidance", "writing_notes"])));
        let meta = map.get("_meta").and_then(Value::as_object);

        Self {
            plot_analysis: map
                .get("plot_analysis")
                .and_then(Value::as_object)
                .map(analysis_from_map)
                .unwrap_or_default(),
            chapter_blueprint: blueprint.map(blueprint_from_map).unwrap_or_default(),
            writing_guidance: guidance.map(guidance_from_map).unwrap_or_default(),
            meta: PlanMeta {
                thinking_mode: meta
                    .map(|m| text(m.get("thinking_mode")))
                    .filter(|m| !m.is_empty())
                    .map(|m| ThinkingMode::parse(&m)),
            },
        }
    }
}

fn first_object<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Map<String, Value>> {
    keys.iter().find_map(|k| map.get(*k).and_then(Value::as_object))
}

fn first_array<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> &'a [Value] {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn objects<'a>(items: &'a [Value]) -> impl Iterator<Item = &'a Map<String, Value>> {
    items.iter().filter_map(Value::as_object)
}

fn analysis_from_map(map: &Map<String, Value>) -> PlotAnalysis {
    let pre = map.get("pre_chapter_context").and_then(Value::as_object);
    PlotAnalysis {
        pre_chapter_context: pre
            .map(|p| PreChapterContext {
                previous_ending: text(p.get("previous_ending")),
                immediate_consequences: text(p.get("immediate_consequences")),
                character_emotional_carryover: text(p.get("character_emotional_carryover")),
            })
            .unwrap_or_default(),
        interaction_logic_check: objects(first_array(map, &["interaction_logic_check"]))
            .map(|i| InteractionCheck {
                characters: text_list(i.get("characters"), 0),
                relation_status: text(i.get("relation_status")),
                interaction_guidance: text(i.get("interaction_guidance")),
            })
            .collect(),
        current_situation: text(map.get("current_situation")),
        unresolved_threads: text_list(map.get("unresolved_threads"), 0),
    }
}

fn shot_from_map(map: &Map<String, Value>) -> Shot {
    let on_screen = first_array(map, &["characters_on_screen", "characters"])
        .iter()
        .filter_map(|c| match c {
            Value::Object(o) => Some(OnScreen {
                name: text(o.get("name")),
                position: text(o.get("position")),
                posture: text(o.get("posture")),
                expression: text(o.get("expression")),
                emotion: text(o.get("emotion")),
                inner_thought: text(o.get("inner_thought")),
            }),
            other => {
                let name = text(Some(other));
                (!name.is_empty()).then(|| OnScreen {
                    name,
                    ..Default::default()
                })
            }
        })
        .collect();

    let mut action_beats: Vec<ActionBeat> = objects(first_array(map, &["action_beats"]))
        .map(|b| ActionBeat {
            beat: text(b.get("beat")),
            actor: text(b.get("actor")),
            action: text(b.get("action")),
            reaction: text(b.get("reaction")),
        })
        .collect();
    if action_beats.is_empty() {
        action_beats = text_list(map.get("key_actions"), 0)
            .into_iter()
            .map(|action| ActionBeat {
                action,
                ..Default::default()
            })
            .collect();
    }

    let sensory = map.get("sensory_details");
    let sensory_details = match sensory {
        Some(Value::Object(s)) => SensoryDetails {
            visual: text(s.get("visual")),
            audio: text(s.get("audio")),
            smell: text(s.get("smell")),
        },
        other => SensoryDetails {
            visual: text(other),
            ..Default::default()
        },
    };

    Shot {
        shot_number: text_any(map, &["shot_number", "scene_number"]),
        shot_type: text(map.get("shot_type")),
        location: text(map.get("location")),
        time: text(map.get("time")),
        atmosphere: text_any(map, &["atmosphere", "weather_mood"]),
        characters_on_screen: on_screen,
        action_beats,
        dialogue_script: objects(first_array(map, &["dialogue_script"]))
            .map(|d| DialogueLine {
                speaker: text(d.get("speaker")),
                line: text(d.get("line")),
                tone: text(d.get("tone")),
                subtext: text(d.get("subtext")),
                action_during: text(d.get("action_during")),
            })
            .collect(),
        sensory_details,
        tension_level: integer(map.get("tension_level")),
        word_count: integer(map.get("word_count")).or_else(|| integer(map.get("word_count_target"))),
        purpose: text(map.get("purpose")),
    }
}

fn arc_from_value(name: &str, value: &Value) -> CharacterArc {
    match value {
        Value::Object(a) => CharacterArc {
            name: name.to_string(),
            start_state: text(a.get("start_state")),
            trigger_event: text_any(a, &["trigger_event", "obstacle"]),
            internal_conflict: text(a.get("internal_conflict")),
            decision: text(a.get("decision")),
            end_state: text(a.get("end_state")),
            growth_delta: text(a.get("growth_delta")),
            summary: text(a.get("goal")),
        },
        other => CharacterArc {
            name: name.to_string(),
            summary: text(Some(other)),
            ..Default::default()
        },
    }
}

fn blueprint_from_map(map: &Map<String, Value>) -> ChapterBlueprint {
    let character_journey = match first_object(map, &["character_journey", "character_arcs"]) {
        Some(arcs) => arcs.iter().map(|(name, arc)| arc_from_value(name, arc)).collect(),
        None => Vec::new(),
    };

    let cliffhanger = match map.get("cliffhanger") {
        Some(Value::Object(c)) => Cliffhanger {
            kind: text(c.get("type")),
            final_line: text(c.get("final_line")),
            content: text(c.get("content")),
            reader_hook: text_any(c, &["reader_hook", "reader_question"]),
        },
        other => Cliffhanger {
            content: text(other),
            ..Default::default()
        },
    };

    ChapterBlueprint {
        title_suggestion: text(map.get("title_suggestion")),
        theme: text(map.get("theme")),
        opening_hook: text(map.get("opening_hook")),
        storyboard: objects(first_array(map, &["storyboard", "scenes"]))
            .map(shot_from_map)
            .collect(),
        character_journey,
        conflict_escalation: objects(first_array(map, &["conflict_escalation", "conflicts"]))
            .map(|c| Conflict {
                stage: text_any(c, &["stage", "intensity"]),
                conflict_type: text_any(c, &["conflict_type", "type"]),
                parties: text_list(c.get("parties"), 0),
                stakes: text(c.get("stakes")),
                beat_description: text(c.get("beat_description")),
            })
            .collect(),
        key_moments: objects(first_array(map, &["key_moments"]))
            .map(|m| KeyMoment {
                moment_type: text(m.get("moment_type")),
                description: text(m.get("description")),
                impact: text(m.get("impact")),
            })
            .collect(),
        foreshadowing: first_array(map, &["foreshadowing"])
            .iter()
            .filter_map(|f| match f {
                Value::Object(o) => Some(Foreshadowing {
                    hint: text(o.get("hint")),
                    how_to_plant: text(o.get("how_to_plant")),
                    payoff_chapter: text(o.get("payoff_chapter")),
                }),
                other => {
                    let hint = text(Some(other));
                    (!hint.is_empty()).then(|| Foreshadowing {
                        hint,
                        ..Default::default()
                    })
                }
            })
            .collect(),
        cliffhanger,
    }
}

fn guidance_from_map(map: &Map<String, Value>) -> WritingGuidance {
    let pacing = match map.get("pacing") {
        Some(Value::Object(p)) => text(p.get("overall")),
        other => text(other),
    };
    WritingGuidance {
        tone: text(map.get("tone")),
        pacing,
        focus: text(map.get("focus")),
        style_notes: text(map.get("style_notes")),
        highlight: text_list(map.get("highlight"), 0),
        avoid: text_list(map.get("avoid"), 0),
    }
}
