//! Project setup: idea -> structured blueprint -> detailed outline -> world state.
//!
//! Each step is one model call whose JSON reply is normalized with defaults,
//! so an unparseable reply still yields a usable document.

use crate::llm::extract_json_object;
use crate::state::normalize::{integer, text, text_any, text_list};
use crate::state::{Character, CharacterRole, WorldState};
use crate::store::{ProjectStore, StoreError};
use chat_client::LanguageModel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

pub const BLUEPRINT_DOCUMENT: &str = "story_blueprint";
pub const DETAILED_OUTLINE_DOCUMENT: &str = "detailed_outline";

const MAX_CAST: usize = 12;
const MAX_CONFLICTS: usize = 12;
const MAX_SCENES: usize = 12;
const MAX_VOLUMES: usize = 8;
const MAX_BEATS: usize = 200;
const MAX_BEAT_SCENES: usize = 6;
const MAX_SCENE_CHARACTERS: usize = 6;
const MAX_WORLD_CHARACTERS: usize = 20;
const MAX_LOCATIONS: usize = 40;
const SAMPLE_CHAPTERS: usize = 3;
const SAMPLE_CHARS: usize = 1200;

const BLUEPRINT_SYSTEM_PROMPT: &str =
    "You are a meticulous story planning editor. Output valid JSON only.";
const OUTLINE_SYSTEM_PROMPT: &str =
    "You break story blueprints into chapter outlines. Output valid JSON only.";
const WORLD_SYSTEM_PROMPT: &str = "You model the world state of long novels. Output valid JSON only.";

/// Errors from the setup pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(#[from] chat_client::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn or_default(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

fn objects(value: Option<&Value>, limit: usize) -> impl Iterator<Item = &Map<String, Value>> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .take(limit)
}

fn chapter_number(value: Option<&Value>, default: u32) -> u32 {
    integer(value)
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(default)
}

// ============================================================================
// Blueprint
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CastMember {
    pub name: String,
    pub gender: String,
    pub identity: String,
    pub age: String,
    pub appearance: String,
    pub personality_temperament: String,
    pub desire: String,
    pub short_term_goal: String,
}

impl CastMember {
    fn from_map(map: &Map<String, Value>) -> Option<Self> {
        let name = text(map.get("name"));
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name,
            gender: or_default(text(map.get("gender")), "未知"),
            identity: or_default(text(map.get("identity")), "未知身份"),
            age: or_default(text(map.get("age")), "未知"),
            appearance: or_default(text(map.get("appearance")), "外貌待补充"),
            personality_temperament: or_default(
                text_any(map, &["personality_temperament", "personality"]),
                "性格待补充",
            ),
            desire: or_default(text(map.get("desire")), "达成核心目标"),
            short_term_goal: or_default(text(map.get("short_term_goal")), "推进当前主线"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoreEvent {
    pub event_goal: String,
    pub meaning: String,
    pub difficulties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConflictLine {
    pub conflict: String,
    pub phase_result: String,
    pub resolution_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlotDevelopment {
    pub cause: String,
    pub development: String,
    pub twist: String,
    pub climax: String,
    pub ending: String,
}

/// One scene as location + characters + event + result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SceneFormula {
    pub location: String,
    pub characters: Vec<String>,
    pub event: String,
    pub result: String,
}

impl SceneFormula {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            location: or_default(text(map.get("location")), "未知地点"),
            characters: text_list(map.get("characters"), MAX_SCENE_CHARACTERS),
            event: or_default(text(map.get("event")), "事件待补充"),
            result: or_default(text(map.get("result")), "结果待补充"),
        }
    }
}

/// High-level plan of a story, produced from the initial idea.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoryBlueprint {
    pub title_candidate: String,
    pub genre: String,
    pub target_audience: String,
    pub idea: String,
    pub character_setup: Vec<CastMember>,
    pub core_event: CoreEvent,
    pub conflicts: Vec<ConflictLine>,
    pub plot_development: PlotDevelopment,
    pub scene_formula: Vec<SceneFormula>,
}

impl StoryBlueprint {
    /// Normalize a model reply. `None` yields the all-defaults blueprint.
    pub fn from_json(map: Option<&Map<String, Value>>, idea: &str) -> Self {
        let empty = Map::new();
        let map = map.unwrap_or(&empty);
        let core = map.get("core_event").and_then(Value::as_object).unwrap_or(&empty);
        let plot = map
            .get("plot_development")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        Self {
            title_candidate: or_default(text(map.get("title_candidate")), "未命名故事"),
            genre: or_default(text(map.get("genre")), "未分类"),
            target_audience: or_default(text(map.get("target_audience")), "网络小说读者"),
            idea: idea.trim().to_string(),
            character_setup: objects(map.get("character_setup"), MAX_CAST)
                .filter_map(CastMember::from_map)
                .collect(),
            core_event: CoreEvent {
                event_goal: or_default(text(core.get("event_goal")), "推进主角核心目标"),
                meaning: or_default(text(core.get("meaning")), "决定主角命运"),
                difficulties: text_list(core.get("difficulties"), 8),
            },
            conflicts: objects(map.get("conflicts"), MAX_CONFLICTS)
                .map(|c| ConflictLine {
                    conflict: or_default(text(c.get("conflict")), "冲突待补充"),
                    phase_result: or_default(text(c.get("phase_result")), "阶段结果待补充"),
                    resolution_path: or_default(text(c.get("resolution_path")), "解决路径待补充"),
                })
                .collect(),
            plot_development: PlotDevelopment {
                cause: or_default(text(plot.get("cause")), "起因待补充"),
                development: or_default(text(plot.get("development")), "发展待补充"),
                twist: or_default(text(plot.get("twist")), "转折待补充"),
                climax: or_default(text(plot.get("climax")), "高潮待补充"),
                ending: or_default(text(plot.get("ending")), "结局待补充"),
            },
            scene_formula: objects(map.get("scene_formula"), MAX_SCENES)
                .map(SceneFormula::from_map)
                .collect(),
        }
    }
}

// ============================================================================
// Detailed outline
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChapterBeat {
    pub chapter: u32,
    pub title: String,
    pub goal: String,
    pub conflict: String,
    pub hook: String,
    pub scene_formula: Vec<SceneFormula>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OutlineVolume {
    pub title: String,
    pub start_chapter: u32,
    pub end_chapter: u32,
    pub phase: String,
    pub volume_goal: String,
    pub chapter_beats: Vec<ChapterBeat>,
}

impl OutlineVolume {
    fn from_map(map: &Map<String, Value>, index: usize) -> Self {
        let start = chapter_number(map.get("start_chapter"), 1);
        let end = chapter_number(map.get("end_chapter"), start);
        let beats = objects(map.get("chapter_beats"), MAX_BEATS)
            .map(|beat| {
                let chapter = chapter_number(beat.get("chapter"), start);
                ChapterBeat {
                    chapter,
                    title: or_default(text(beat.get("title")), &format!("第{chapter}章")),
                    goal: or_default(text(beat.get("goal")), "推进主线"),
                    conflict: text(beat.get("conflict")),
                    hook: text(beat.get("hook")),
                    scene_formula: objects(beat.get("scene_formula"), MAX_BEAT_SCENES)
                        .map(SceneFormula::from_map)
                        .collect(),
                }
            })
            .collect();
        Self {
            title: or_default(text(map.get("title")), &format!("卷{index}")),
            start_chapter: start,
            end_chapter: end,
            phase: or_default(text(map.get("phase")), "阶段"),
            volume_goal: text(map.get("volume_goal")),
            chapter_beats: beats,
        }
    }

    /// Single opening volume used when the model produced none.
    fn opening(chapter_count: usize) -> Self {
        let end = u32::try_from(chapter_count.max(1)).unwrap_or(u32::MAX);
        Self {
            title: "卷一：开局".to_string(),
            start_chapter: 1,
            end_chapter: end,
            phase: "开局".to_string(),
            volume_goal: "建立主线冲突".to_string(),
            chapter_beats: vec![ChapterBeat {
                chapter: 1,
                title: "第一章".to_string(),
                goal: "主角卷入核心事件".to_string(),
                conflict: "与外部规则产生正面碰撞".to_string(),
                hook: "发现更大阴谋".to_string(),
                scene_formula: vec![SceneFormula {
                    location: "起始场景".to_string(),
                    characters: vec!["主角".to_string()],
                    event: "触发主线事件".to_string(),
                    result: "被迫进入主线".to_string(),
                }],
            }],
        }
    }
}

/// Volume and chapter plan, with its Markdown rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DetailedOutline {
    pub summary: String,
    pub volumes: Vec<OutlineVolume>,
    /// The text saved as the project outline.
    pub outline_markdown: String,
}

impl DetailedOutline {
    /// Normalize a model reply. Renders Markdown when the reply has none.
    pub fn from_json(map: Option<&Map<String, Value>>, chapter_count: usize) -> Self {
        let empty = Map::new();
        let map = map.unwrap_or(&empty);
        let mut volumes: Vec<OutlineVolume> = objects(map.get("volumes"), MAX_VOLUMES)
            .enumerate()
            .map(|(i, v)| OutlineVolume::from_map(v, i + 1))
            .collect();
        if volumes.is_empty() {
            volumes.push(OutlineVolume::opening(chapter_count));
        }

        let mut outline = Self {
            summary: or_default(text(map.get("summary")), "细纲已生成"),
            volumes,
            outline_markdown: text(map.get("outline_markdown")),
        };
        if outline.outline_markdown.is_empty() {
            outline.outline_markdown = outline.render_markdown();
        }
        outline
    }

    /// Markdown in the heading format the outline resolver reads.
    pub fn render_markdown(&self) -> String {
        let mut lines = Vec::new();
        if !self.summary.trim().is_empty() {
            lines.push("## 细纲摘要".to_string());
            lines.push(self.summary.trim().to_string());
            lines.push(String::new());
        }

        for volume in &self.volumes {
            let span = format!("（第{}-{}章）", volume.start_chapter, volume.end_chapter);
            lines.push(format!("## {}{span}", volume.title));
            lines.push(format!("### {}{span}", volume.phase));
            if !volume.volume_goal.is_empty() {
                lines.push(format!("- 本卷目标：{}", volume.volume_goal));
            }
            for beat in &volume.chapter_beats {
                let main_line = [&beat.goal, &beat.title]
                    .into_iter()
                    .find(|s| !s.trim().is_empty())
                    .map(|s| s.trim())
                    .unwrap_or("推进主线");
                lines.push(format!("- **第{}章**: {main_line}", beat.chapter));
                if !beat.conflict.is_empty() {
                    lines.push(format!("  - 冲突：{}", beat.conflict));
                }
                if !beat.hook.is_empty() {
                    lines.push(format!("  - 钩子：{}", beat.hook));
                }
            }
            lines.push(String::new());
        }
        lines.join("\n").trim().to_string()
    }
}

// ============================================================================
// Initial world state
// ============================================================================

/// Normalize an initial world document and add any blueprint cast it missed.
pub fn normalize_initial_world(map: Option<&Map<String, Value>>, blueprint: &StoryBlueprint) -> WorldState {
    let value = map.cloned().map(Value::Object).unwrap_or(Value::Null);
    let mut world = WorldState::from_value(&value);

    world.characters.truncate(MAX_WORLD_CHARACTERS);
    for character in &mut world.characters {
        fill_character_defaults(character);
    }

    let mut known: HashSet<String> = world.characters.iter().map(|c| c.name.clone()).collect();
    for member in &blueprint.character_setup {
        if !known.insert(member.name.clone()) {
            continue;
        }
        let mut character = Character::new(member.name.clone())
            .with_role(CharacterRole::Supporting)
            .with_level("凡人");
        character.personality = or_default(member.personality_temperament.trim().to_string(), "待补充");
        character.current_goal = or_default(member.short_term_goal.trim().to_string(), "推进主线");
        character.action_tendency = "按性格行动".to_string();
        world.characters.push(character);
    }

    let info = &mut world.world;
    if info.environment.trim().is_empty() {
        info.environment = "环境待补充".to_string();
    }
    info.factions.truncate(30);
    info.known_methods.truncate(30);
    info.known_artifacts.truncate(30);
    info.scene_rules.truncate(20);
    world.locations.truncate(MAX_LOCATIONS);
    for history in [
        &mut world.plot_history,
        &mut world.timeline,
        &mut world.faction_history,
        &mut world.world_state_notes,
    ] {
        history.truncate(30);
    }
    world
}

fn fill_character_defaults(character: &mut Character) {
    for (field, default) in [
        (&mut character.personality, "待补充"),
        (&mut character.level, "凡人"),
        (&mut character.current_goal, "推进主线"),
        (&mut character.action_tendency, "按性格谨慎行动"),
    ] {
        if field.trim().is_empty() {
            *field = default.to_string();
        }
    }
    character.abilities.truncate(20);
    character.items.truncate(20);
    character.current_status.truncate(30);
    character.memory_short_term.truncate(30);
    character.memory_long_term.truncate(40);
}

// ============================================================================
// Pipeline
// ============================================================================

/// Everything the setup pipeline produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub blueprint: StoryBlueprint,
    pub detailed_outline: DetailedOutline,
    pub world_state: WorldState,
}

/// Runs the project setup steps against one model.
pub struct StoryPipeline {
    model: Arc<dyn LanguageModel>,
    store: ProjectStore,
}

impl StoryPipeline {
    pub fn new(model: Arc<dyn LanguageModel>, store: ProjectStore) -> Self {
        Self { model, store }
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    async fn ask_json(&self, prompt: &str, system: &str) -> Result<Option<Map<String, Value>>, PipelineError> {
        let response = self.model.chat(prompt, system).await?;
        let parsed = extract_json_object(&response);
        if parsed.is_none() {
            tracing::warn!(chars = response.chars().count(), "pipeline reply had no JSON object; using defaults");
        }
        Ok(parsed)
    }

    pub async fn generate_structured_blueprint(&self, idea: &str) -> Result<StoryBlueprint, PipelineError> {
        let prompt = format!(
            "Turn the idea below into a structured story blueprint as JSON.\n\n\
             [Idea]\n{idea}\n\n\
             Requirements:\n\
             1. Output JSON only, no explanation.\n\
             2. Fill every field; when unsure, give a reasonable default instead of an empty string.\n\
             3. Every scene_formula entry is strictly location + characters + event + result.\n\n\
             JSON structure:\n{BLUEPRINT_SCHEMA}"
        );
        let parsed = self.ask_json(&prompt, BLUEPRINT_SYSTEM_PROMPT).await?;
        let blueprint = StoryBlueprint::from_json(parsed.as_ref(), idea);
        tracing::info!(
            title = %blueprint.title_candidate,
            cast = blueprint.character_setup.len(),
            "blueprint generated"
        );
        Ok(blueprint)
    }

    pub async fn generate_detailed_outline(
        &self,
        blueprint: &StoryBlueprint,
        chapter_count: usize,
    ) -> Result<DetailedOutline, PipelineError> {
        let prompt = format!(
            "Break the structured blueprint below into a writable chapter outline as JSON.\n\n\
             [Blueprint JSON]\n{blueprint}\n\n\
             [Target] about {chapter_count} chapters in total.\n\n\
             Requirements:\n\
             1. Output JSON only, no explanation.\n\
             2. outline_markdown is readable Markdown in this pattern:\n\
                - volume heading: `## 卷X：title（第a-b章）`\n\
                - phase heading: `### phase（第a-b章）`\n\
                - chapter entry: `- **第n章**: chapter goal`\n\
             3. Every chapter has a scene_formula (location + characters + event + result).\n\n\
             JSON structure:\n{OUTLINE_SCHEMA}",
            blueprint = serde_json::to_string_pretty(blueprint)?,
        );
        let parsed = self.ask_json(&prompt, OUTLINE_SYSTEM_PROMPT).await?;
        let outline = DetailedOutline::from_json(parsed.as_ref(), chapter_count);
        tracing::info!(volumes = outline.volumes.len(), "detailed outline generated");
        Ok(outline)
    }

    pub async fn initialize_world_state(
        &self,
        blueprint: &StoryBlueprint,
        outline: &DetailedOutline,
        chapter_samples: &str,
    ) -> Result<WorldState, PipelineError> {
        let samples = if chapter_samples.trim().is_empty() {
            "(none)"
        } else {
            chapter_samples
        };
        let prompt = format!(
            "Initialize the world state JSON from the blueprint and outline below.\n\n\
             [Blueprint JSON]\n{blueprint}\n\n\
             [Outline JSON]\n{outline}\n\n\
             [Chapter samples]\n{samples}\n\n\
             Requirements:\n\
             1. Output JSON only, no explanation.\n\
             2. Mark whether each character has appeared.\n\
             3. Every character has a level, abilities, personality, items and a current goal.\n\
             4. The protagonist has a concrete action_tendency that follows from their personality.\n\n\
             JSON structure:\n{WORLD_SCHEMA}",
            blueprint = serde_json::to_string_pretty(blueprint)?,
            outline = serde_json::to_string_pretty(outline)?,
        );
        let parsed = self.ask_json(&prompt, WORLD_SYSTEM_PROMPT).await?;
        let world = normalize_initial_world(parsed.as_ref(), blueprint);
        tracing::info!(characters = world.characters.len(), "world state initialized");
        Ok(world)
    }

    /// Opening text of the most recent chapters, for grounding the world model.
    pub async fn recent_chapter_samples(&self, project: &str) -> Result<String, PipelineError> {
        let chapters = self.store.list_chapters(project).await?;
        let start = chapters.len().saturating_sub(SAMPLE_CHAPTERS);
        let mut snippets = Vec::new();
        for name in &chapters[start..] {
            let text = self.store.read_chapter(project, name).await?;
            let text = text.trim();
            if !text.is_empty() {
                let head: String = text.chars().take(SAMPLE_CHARS).collect();
                snippets.push(format!("【{name}】\n{head}"));
            }
        }
        Ok(snippets.join("\n\n"))
    }

    /// Run all three steps and save the blueprint, outline and world state.
    pub async fn build_story_pipeline(
        &self,
        idea: &str,
        project: &str,
        chapter_count: usize,
    ) -> Result<PipelineOutput, PipelineError> {
        let blueprint = self.generate_structured_blueprint(idea).await?;
        self.store.save_document(project, BLUEPRINT_DOCUMENT, &blueprint).await?;

        let detailed_outline = self.generate_detailed_outline(&blueprint, chapter_count).await?;
        self.store
            .save_document(project, DETAILED_OUTLINE_DOCUMENT, &detailed_outline)
            .await?;
        self.store
            .save_outline(project, &detailed_outline.outline_markdown)
            .await?;

        let samples = self.recent_chapter_samples(project).await?;
        let world_state = self
            .initialize_world_state(&blueprint, &detailed_outline, &samples)
            .await?;
        self.store.save_world_state(project, &world_state).await?;

        Ok(PipelineOutput {
            blueprint,
            detailed_outline,
            world_state,
        })
    }

    /// Rebuild the world state from the saved blueprint and outline.
    pub async fn initialize_world_from_saved(&self, project: &str) -> Result<WorldState, PipelineError> {
        let blueprint: StoryBlueprint = self
            .store
            .load_document(project, BLUEPRINT_DOCUMENT)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: "story blueprint",
                project: project.to_string(),
            })?;
        let outline: DetailedOutline = self
            .store
            .load_document(project, DETAILED_OUTLINE_DOCUMENT)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: "detailed outline",
                project: project.to_string(),
            })?;

        let samples = self.recent_chapter_samples(project).await?;
        let world = self.initialize_world_state(&blueprint, &outline, &samples).await?;
        self.store.save_world_state(project, &world).await?;
        Ok(world)
    }
}

const BLUEPRINT_SCHEMA: &str = r#"{
  "title_candidate": "title",
  "genre": "genre",
  "target_audience": "target readers",
  "character_setup": [
    {
      "name": "name",
      "gender": "gender",
      "identity": "identity",
      "age": "age",
      "appearance": "appearance",
      "personality_temperament": "personality and temperament",
      "desire": "core desire",
      "short_term_goal": "short-term goal"
    }
  ],
  "core_event": {"event_goal": "what the protagonist must do", "meaning": "why it matters", "difficulties": ["difficulty"]},
  "conflicts": [{"conflict": "conflict", "phase_result": "phase result", "resolution_path": "resolution path"}],
  "plot_development": {"cause": "cause", "development": "development", "twist": "twist", "climax": "climax", "ending": "ending"},
  "scene_formula": [{"location": "place", "characters": ["A", "B"], "event": "event", "result": "result"}]
}"#;

const OUTLINE_SCHEMA: &str = r#"{
  "summary": "overall summary",
  "volumes": [
    {
      "title": "volume title",
      "start_chapter": 1,
      "end_chapter": 10,
      "phase": "phase name",
      "volume_goal": "volume goal",
      "chapter_beats": [
        {
          "chapter": 1,
          "title": "chapter title",
          "goal": "chapter goal",
          "conflict": "chapter conflict",
          "hook": "closing hook",
          "scene_formula": [{"location": "place", "characters": ["A"], "event": "event", "result": "result"}]
        }
      ]
    }
  ],
  "outline_markdown": "full Markdown outline"
}"#;

const WORLD_SCHEMA: &str = r#"{
  "characters": [
    {
      "name": "name",
      "role": "主角/反派/配角",
      "appeared": false,
      "personality": "personality",
      "level": "system·major realm·stage",
      "abilities": ["ability"],
      "items": ["item"],
      "current_goal": "current goal",
      "action_tendency": "how this character acts on their personality",
      "relationships": [{"target": "other character", "relation_type": "ally/hostile/master-disciple/kin/stranger", "description": "details"}],
      "current_status": [],
      "action_history": [],
      "memory_short_term": [],
      "memory_long_term": []
    }
  ],
  "world": {
    "environment": "environment",
    "power_system": "power system summary",
    "factions": ["faction"],
    "known_methods": ["method"],
    "known_artifacts": ["artifact"],
    "scene_rules": ["scene rule"]
  },
  "locations": [{"name": "place", "description": "description"}],
  "plot_history": [],
  "timeline": [],
  "faction_history": [],
  "world_state_notes": []
}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::resolve_chapter;
    use crate::testing::ScriptedModel;
    use serde_json::json;
    use tempfile::TempDir;

    fn as_map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_blueprint_defaults() {
        let blueprint = StoryBlueprint::from_json(None, "  井底鬼修  ");
        assert_eq!(blueprint.title_candidate, "未命名故事");
        assert_eq!(blueprint.idea, "井底鬼修");
        assert_eq!(blueprint.plot_development.twist, "转折待补充");

        let map = as_map(json!({
            "character_setup": [{"name": "沈焱笙", "personality": "隐忍"}, {"name": ""}, "junk"],
            "conflicts": [{"conflict": "破井"}]
        }));
        let blueprint = StoryBlueprint::from_json(Some(&map), "idea");
        assert_eq!(blueprint.character_setup.len(), 1);
        assert_eq!(blueprint.character_setup[0].personality_temperament, "隐忍");
        assert_eq!(blueprint.character_setup[0].gender, "未知");
        assert_eq!(blueprint.conflicts[0].phase_result, "阶段结果待补充");
    }

    #[test]
    fn test_outline_fallback_and_markdown() {
        let outline = DetailedOutline::from_json(None, 12);
        assert_eq!(outline.volumes.len(), 1);
        assert_eq!(outline.volumes[0].end_chapter, 12);
        assert!(outline.outline_markdown.contains("## 卷一：开局（第1-12章）"));
        assert!(outline.outline_markdown.contains("### 开局（第1-12章）"));
        assert!(outline.outline_markdown.contains("- **第1章**: 主角卷入核心事件"));
        assert!(outline.outline_markdown.contains("  - 冲突：与外部规则产生正面碰撞"));
        assert!(outline.outline_markdown.contains("  - 钩子：发现更大阴谋"));

        let info = resolve_chapter(&outline.outline_markdown, 1);
        assert!(info.specific_goal.starts_with("主角卷入核心事件\ndetails: 冲突："));
        assert_eq!(info.volume, "卷一：开局");
    }

    #[test]
    fn test_outline_keeps_model_markdown() {
        let map = as_map(json!({
            "volumes": [{"title": "卷一", "start_chapter": "3", "chapter_beats": [{"goal": ""}]}],
            "outline_markdown": "## custom"
        }));
        let outline = DetailedOutline::from_json(Some(&map), 10);
        let volume = &outline.volumes[0];
        assert_eq!((volume.start_chapter, volume.end_chapter), (3, 3));
        assert_eq!(volume.chapter_beats[0].chapter, 3);
        assert_eq!(volume.chapter_beats[0].goal, "推进主线");
        assert_eq!(outline.outline_markdown, "## custom");
    }

    #[test]
    fn test_initial_world_adds_missing_cast() {
        let blueprint = StoryBlueprint::from_json(
            Some(&as_map(json!({
                "character_setup": [
                    {"name": "沈焱笙", "personality_temperament": "隐忍"},
                    {"name": "城隍", "personality_temperament": "威严", "short_term_goal": "镇压阴井"}
                ]
            }))),
            "idea",
        );
        let world = normalize_initial_world(
            Some(&as_map(json!({
                "characters": [{"name": "沈焱笙", "role": "主角", "level": ""}]
            }))),
            &blueprint,
        );
        assert_eq!(world.characters.len(), 2);
        assert!(world.characters[0].is_protagonist());
        assert_eq!(world.characters[0].level, "凡人");
        let added = &world.characters[1];
        assert_eq!(added.name, "城隍");
        assert_eq!(added.role, CharacterRole::Supporting);
        assert_eq!(added.level, "凡人");
        assert_eq!(added.current_goal, "镇压阴井");
        assert_eq!(world.world.environment, "环境待补充");
    }

    #[tokio::test]
    async fn test_build_story_pipeline_saves_everything() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"```json
{"title_candidate": "阴井", "character_setup": [{"name": "沈焱笙"}]}
```"#,
            "not json at all",
            r#"{"characters": [{"name": "沈焱笙", "role": "主角", "level": "鬼道·怨灵境·初期"}]}"#,
        ]));
        let pipeline = StoryPipeline::new(model.clone(), ProjectStore::new(dir.path()));

        let output = pipeline.build_story_pipeline("井底鬼修", "阴井", 8).await.unwrap();
        assert_eq!(output.blueprint.title_candidate, "阴井");
        assert_eq!(output.detailed_outline.volumes[0].end_chapter, 8);
        assert_eq!(output.world_state.characters[0].level, "鬼道·怨灵境·初期");
        assert_eq!(model.call_count(), 3);
        assert!(model.prompts()[1].contains("about 8 chapters"));

        let store = pipeline.store();
        assert!(store.require_outline("阴井").await.unwrap().contains("卷一：开局"));
        assert_eq!(store.require_world_state("阴井").await.unwrap(), output.world_state);
        let saved: Option<StoryBlueprint> = store.load_document("阴井", BLUEPRINT_DOCUMENT).await.unwrap();
        assert_eq!(saved.unwrap(), output.blueprint);
    }

    #[tokio::test]
    async fn test_world_from_saved_requires_documents() {
        let dir = TempDir::new().unwrap();
        let pipeline = StoryPipeline::new(Arc::new(ScriptedModel::new(Vec::<String>::new())), ProjectStore::new(dir.path()));
        let err = pipeline.initialize_world_from_saved("空项目").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Store(StoreError::NotFound { what: "story blueprint", .. })
        ));
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new(Vec::<String>::new());
        model.push_error("connection reset");
        let pipeline = StoryPipeline::new(Arc::new(model), ProjectStore::new(dir.path()));
        let err = pipeline.generate_structured_blueprint("idea").await.unwrap_err();
        assert!(matches!(err, PipelineError::Model(chat_client::Error::Network(_))));
    }
}
