//! Chapter generation.
//!
//! [`ChapterGenerator`] runs in two phases so a plan can be reviewed before
//! the expensive prose call:
//!
//! 1. [`prepare`](ChapterGenerator::prepare) decides append vs new chapter,
//!    gathers context and runs the optional planning and action passes.
//!    The resulting [`ChapterPreparation`] is plain data and can be stored.
//! 2. [`generate_from_plan`](ChapterGenerator::generate_from_plan) turns a
//!    preparation into prose.
//!
//! After a chapter is saved, [`update_world_state`](ChapterGenerator::update_world_state)
//! feeds it back into the world state through the gate and the merger.

mod context;
mod prompts;

pub use context::{
    breakthrough_rules, build_world_context, character_memory_lines, cultivation_info,
    level_format_guide, realm_rules_context, style_prompt,
};
pub use prompts::{build_generation_prompt, extract_title, Continuity, GENERATION_SYSTEM_PROMPT};

use crate::actions::{plan_character_actions, ActionRequest, CharacterActionPlan};
use crate::config::StoryConfig;
use crate::llm::{extract_json_object, stream_to_string, ProgressStream, StreamItem};
use crate::merge::apply_state_update;
use crate::outline::{resolve_chapter, OutlineInfo};
use crate::state::{head_chars, StateUpdate, WorldState};
use crate::store::{LatestChapter, ProjectStore, StoreError};
use crate::thinking::{
    format_for_generation, resolve_thinking_mode, PlanRequest, PlotThinkingEngine, ThinkingPlan,
};
use crate::word_count::count_words;
use chat_client::{ChatClient, LanguageModel};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Chapters shorter than this are continued instead of starting a new one.
pub const MIN_CHAPTER_WORDS: usize = 3000;
/// Added to every word target.
pub const WORD_MARGIN: usize = 500;

const STATE_PROMPT_CHARACTERS: usize = 12;
const STATE_PROMPT_CONTENT_CHARS: usize = 3000;

/// Errors from chapter generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(#[from] chat_client::Error),
}

/// Whether the next call extends the latest chapter or starts a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Append,
    #[default]
    New,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Append => "append",
            GenerationMode::New => "new",
        }
    }
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target chapter and length for the next generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationTarget {
    pub mode: GenerationMode,
    pub chapter: u32,
    pub target_words: usize,
}

/// Append to a short latest chapter, otherwise start the next one.
pub fn resolve_generation_target(latest: &LatestChapter, default_chapter_words: usize) -> GenerationTarget {
    if latest.number > 0 && latest.word_count < MIN_CHAPTER_WORDS {
        GenerationTarget {
            mode: GenerationMode::Append,
            chapter: latest.number,
            target_words: MIN_CHAPTER_WORDS - latest.word_count + WORD_MARGIN,
        }
    } else {
        GenerationTarget {
            mode: GenerationMode::New,
            chapter: latest.number + 1,
            target_words: default_chapter_words + WORD_MARGIN,
        }
    }
}

/// Everything the generation call needs, gathered ahead of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChapterPreparation {
    pub mode: GenerationMode,
    pub chapter_num: u32,
    /// Title of the latest chapter; inherited in append mode.
    pub chapter_title: String,
    /// Text of the latest chapter.
    pub chapter_content: String,
    pub chapter_len: usize,
    pub target_words: usize,
    pub world_context: String,
    pub outline_info: OutlineInfo,
    pub style_ref: String,
    pub realm_rules_context: String,
    pub thinking_plan: Option<ThinkingPlan>,
    pub character_action_plan: Option<CharacterActionPlan>,
    pub character_action_context: String,
}

/// Outcome of one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub mode: GenerationMode,
    pub chapter: u32,
    pub title: String,
    pub added_words: usize,
    pub total_words: usize,
    pub new_content: String,
    pub full_text: String,
}

impl GenerationResult {
    fn build(prep: &ChapterPreparation, generated: String) -> Self {
        let (title, full_text) = match prep.mode {
            GenerationMode::Append => (
                prep.chapter_title.clone(),
                format!("{}\n\n{}", prep.chapter_content, generated),
            ),
            GenerationMode::New => (extract_title(&generated, prep.chapter_num), generated.clone()),
        };
        Self {
            mode: prep.mode,
            chapter: prep.chapter_num,
            title,
            added_words: count_words(&generated),
            total_words: count_words(&full_text),
            new_content: generated,
            full_text,
        }
    }
}

/// Result of the post-chapter world-state pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldUpdateOutcome {
    pub updated: bool,
    /// `no_world_data` or `no_json` when nothing was applied.
    pub reason: Option<String>,
    pub update: Option<StateUpdate>,
}

impl WorldUpdateOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            updated: false,
            reason: Some(reason.to_string()),
            update: None,
        }
    }
}

/// Chapter generator for one project.
pub struct ChapterGenerator {
    project: String,
    model: Arc<dyn LanguageModel>,
    store: ProjectStore,
    thinking: Option<Arc<PlotThinkingEngine>>,
    config: StoryConfig,
    world: WorldState,
}

impl ChapterGenerator {
    /// Create a generator, loading the project's world state if it exists.
    pub async fn new(
        project: impl Into<String>,
        model: Arc<dyn LanguageModel>,
        store: ProjectStore,
        config: StoryConfig,
    ) -> Result<Self, StoreError> {
        let project = project.into();
        let world = store.load_world_state(&project).await?.unwrap_or_default();
        Ok(Self {
            project,
            model,
            store,
            thinking: None,
            config,
            world,
        })
    }

    /// Build model clients from configuration.
    ///
    /// The planning engine is optional: if its client cannot be created the
    /// generator runs without it.
    pub async fn from_config(project: impl Into<String>, config: StoryConfig) -> Result<Self, GenerationError> {
        let model: Arc<dyn LanguageModel> = Arc::new(ChatClient::from_model_name(&config.model_name)?);
        let thinking = if config.enable_plot_thinking {
            match ChatClient::from_model_name(&config.thinking_model) {
                Ok(client) => Some(Arc::new(PlotThinkingEngine::new(Arc::new(client), &config))),
                Err(e) => {
                    tracing::warn!(model = %config.thinking_model, error = %e, "plot thinking disabled");
                    None
                }
            }
        } else {
            None
        };
        let store = ProjectStore::new(config.output_dir.clone());
        let mut generator = Self::new(project, model, store, config).await?;
        generator.thinking = thinking;
        Ok(generator)
    }

    pub fn with_thinking_engine(mut self, engine: Arc<PlotThinkingEngine>) -> Self {
        self.thinking = Some(engine);
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn thinking_engine(&self) -> Option<&PlotThinkingEngine> {
        self.thinking.as_deref()
    }

    /// Re-read the world state from disk.
    pub async fn reload_world(&mut self) -> Result<(), StoreError> {
        self.world = self.store.load_world_state(&self.project).await?.unwrap_or_default();
        Ok(())
    }

    /// Model for analysis passes: the planning model when present.
    fn analysis_model(&self) -> (&dyn LanguageModel, &'static str) {
        match &self.thinking {
            Some(engine) => (engine.model().as_ref(), "think"),
            None => (self.model.as_ref(), "chat"),
        }
    }

    pub fn world_context(&self) -> String {
        build_world_context(&self.world)
    }

    /// Gather context and run the optional passes. Ends with one `Result`.
    pub fn prepare(&self) -> ProgressStream<'_, Result<ChapterPreparation, GenerationError>> {
        Box::pin(async_stream::stream! {
            let loaded = async {
                let latest = self.store.latest_chapter(&self.project).await?;
                let outline = self.store.load_outline(&self.project).await?;
                let style_ref = self.store.load_style_reference().await?;
                Ok::<_, StoreError>((latest, outline, style_ref))
            }
            .await;
            let (latest, outline, style_ref) = match loaded {
                Ok(loaded) => loaded,
                Err(e) => {
                    yield StreamItem::Result(Err(e.into()));
                    return;
                }
            };

            let target = resolve_generation_target(&latest, self.config.default_chapter_words);
            let is_append = target.mode == GenerationMode::Append;
            let outline_info = resolve_chapter(&outline, target.chapter);
            let world_context = self.world_context();
            tracing::info!(
                project = %self.project,
                chapter = target.chapter,
                mode = %target.mode,
                target_words = target.target_words,
                "preparing chapter"
            );

            let mut thinking_plan = None;
            if let Some(engine) = &self.thinking {
                let (mode, reason) = resolve_thinking_mode(
                    self.config.thinking_mode,
                    is_append,
                    target.chapter,
                    &latest.content,
                );
                yield StreamItem::progress(format!("thinking mode: {mode} ({reason})"));
                let mut plans = engine.analyze_chapter(PlanRequest {
                    chapter: target.chapter,
                    outline: outline_info.clone(),
                    world_context: world_context.clone(),
                    previous_content: latest.content.clone(),
                    is_append,
                    mode,
                });
                while let Some(item) = plans.next().await {
                    match item {
                        StreamItem::Progress(text) => yield StreamItem::Progress(text),
                        StreamItem::Result(plan) => thinking_plan = Some(plan),
                    }
                }
            }

            let (model, source) = self.analysis_model();
            let mut action_plan = None;
            let mut actions = plan_character_actions(model, ActionRequest {
                chapter: target.chapter,
                outline: &outline_info,
                previous_content: &latest.content,
                thinking_plan: thinking_plan.as_ref(),
                world: &self.world,
                source,
            });
            while let Some(item) = actions.next().await {
                match item {
                    StreamItem::Progress(text) => yield StreamItem::Progress(text),
                    StreamItem::Result(plan) => action_plan = Some(plan),
                }
            }
            drop(actions);
            let character_action_context = action_plan
                .as_ref()
                .filter(|p| !p.is_empty())
                .map(CharacterActionPlan::format_for_generation)
                .unwrap_or_default();

            yield StreamItem::Result(Ok(ChapterPreparation {
                mode: target.mode,
                chapter_num: target.chapter,
                chapter_title: latest.title,
                chapter_len: latest.word_count,
                chapter_content: latest.content,
                target_words: target.target_words,
                world_context,
                outline_info,
                style_ref,
                realm_rules_context: realm_rules_context(&outline, &self.world),
                thinking_plan,
                character_action_plan: action_plan,
                character_action_context,
            }));
        })
    }

    /// Prompt for a preparation. Deterministic in its inputs.
    pub fn generation_prompt(&self, prep: &ChapterPreparation, continuity: Continuity) -> String {
        let thinking_context = prep
            .thinking_plan
            .as_ref()
            .map(format_for_generation)
            .unwrap_or_default();
        let action_context = if prep.character_action_context.trim().is_empty() {
            prep.character_action_plan
                .as_ref()
                .filter(|p| !p.is_empty())
                .map(CharacterActionPlan::format_for_generation)
                .unwrap_or_default()
        } else {
            prep.character_action_context.clone()
        };
        build_generation_prompt(
            prep,
            &style_prompt(&prep.style_ref),
            &thinking_context,
            &action_context,
            continuity,
        )
    }

    /// Write the chapter for a preparation with strict continuity.
    ///
    /// Streams the prose as progress and ends with the result.
    pub fn generate_from_plan<'a>(
        &'a self,
        prep: &'a ChapterPreparation,
    ) -> ProgressStream<'a, Result<GenerationResult, GenerationError>> {
        self.write(prep.clone(), Continuity::Strict)
    }

    /// Prepare and write in one go, without review, using loose continuity.
    pub fn continue_writing(&self) -> ProgressStream<'_, Result<GenerationResult, GenerationError>> {
        Box::pin(async_stream::stream! {
            let mut preparation = None;
            let mut steps = self.prepare();
            while let Some(item) = steps.next().await {
                match item {
                    StreamItem::Progress(text) => yield StreamItem::Progress(text),
                    StreamItem::Result(result) => preparation = Some(result),
                }
            }
            drop(steps);

            let prep = match preparation {
                Some(Ok(prep)) => prep,
                Some(Err(e)) => {
                    yield StreamItem::Result(Err(e));
                    return;
                }
                None => return,
            };
            let mut writing = self.write(prep, Continuity::Loose);
            while let Some(item) = writing.next().await {
                yield item;
            }
        })
    }

    fn write(
        &self,
        prep: ChapterPreparation,
        continuity: Continuity,
    ) -> ProgressStream<'_, Result<GenerationResult, GenerationError>> {
        Box::pin(async_stream::stream! {
            let prompt = self.generation_prompt(&prep, continuity);
            tracing::info!(chapter = prep.chapter_num, mode = %prep.mode, "generating chapter");
            let mut fragments = match self.model.stream_chat(&prompt, GENERATION_SYSTEM_PROMPT).await {
                Ok(stream) => stream,
                Err(e) => {
                    yield StreamItem::Result(Err(e.into()));
                    return;
                }
            };

            let mut generated = String::new();
            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(text) => {
                        generated.push_str(&text);
                        yield StreamItem::Progress(text);
                    }
                    Err(e) => {
                        tracing::warn!(chapter = prep.chapter_num, error = %e, "generation stream failed");
                        yield StreamItem::Result(Err(e.into()));
                        return;
                    }
                }
            }
            yield StreamItem::Result(Ok(GenerationResult::build(&prep, generated)));
        })
    }

    fn state_update_prompt(&self, outline: &str, new_content: &str) -> String {
        let cast: Vec<String> = self
            .world
            .characters
            .iter()
            .take(STATE_PROMPT_CHARACTERS)
            .map(|c| {
                let relations: Vec<String> = c
                    .relationships
                    .iter()
                    .map(|r| format!("{}->{}", r.relation_type, r.target))
                    .collect();
                let start = c.current_status.len().saturating_sub(2);
                let status = c.current_status[start..].join("; ");
                let last_action = c
                    .action_history
                    .last()
                    .map(|a| a.format_line())
                    .unwrap_or_default();
                format!(
                    "- {}: level={} | status={} | goal={} | relationships={} | last action={}",
                    c.name,
                    c.display_level(),
                    none_if_empty(&status),
                    none_if_empty(&c.current_goal),
                    none_if_empty(&relations.join(", ")),
                    none_if_empty(&last_action),
                )
            })
            .collect();

        format!(
            "Analyze the new chapter below and update character and world state.\n\n\
             [Current characters]\n{cast}\n\n\
             [Cultivation reference]\n{cultivation}\n{guide}\n{rules}\n\n\
             [New chapter]\n{content}\n\n\
             Extra constraints:\n\
             1. The protagonist's level must respect resource thresholds and breakthrough conditions. \
             Never give a level_update while resources are missing.\n\
             2. If the protagonist only gathered some resources, report them in breakthrough_progress \
             instead of upgrading.\n\n\
             Output the state update as JSON:\n{STATE_UPDATE_SCHEMA}",
            cast = cast.join("\n"),
            cultivation = cultivation_info(&self.world),
            guide = level_format_guide(&self.world),
            rules = realm_rules_context(outline, &self.world),
            content = head_chars(new_content, STATE_PROMPT_CONTENT_CHARS),
        )
    }

    /// Analyze a saved chapter and merge the result into the world state.
    ///
    /// The world state is only touched after the full reply has arrived, and
    /// is persisted whole.
    pub fn update_world_state<'a>(
        &'a mut self,
        new_content: &'a str,
    ) -> ProgressStream<'a, Result<WorldUpdateOutcome, GenerationError>> {
        Box::pin(async_stream::stream! {
            if self.world.is_empty() {
                yield StreamItem::Result(Ok(WorldUpdateOutcome::skipped("no_world_data")));
                return;
            }

            let loaded = async {
                let latest = self.store.latest_chapter(&self.project).await?;
                let outline = self.store.load_outline(&self.project).await?;
                Ok::<_, StoreError>((latest.number, outline))
            }
            .await;
            let (chapter, outline) = match loaded {
                Ok(loaded) => loaded,
                Err(e) => {
                    yield StreamItem::Result(Err(e.into()));
                    return;
                }
            };

            let prompt = self.state_update_prompt(&outline, new_content);
            let (model, source) = self.analysis_model();
            yield StreamItem::progress(format!("updating world state ({source})..."));
            let response = match stream_to_string(model, &prompt, prompts::STATE_SYSTEM_PROMPT).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(chapter, error = %e, "state analysis failed");
                    yield StreamItem::Result(Err(e.into()));
                    return;
                }
            };

            let Some(map) = extract_json_object(&response) else {
                tracing::warn!(chapter, "state analysis reply had no JSON object");
                yield StreamItem::Result(Ok(WorldUpdateOutcome::skipped("no_json")));
                return;
            };

            let mut update = StateUpdate::from_json(&map);
            let mut world = self.world.clone();
            let summary = apply_state_update(&mut world, &mut update, chapter, new_content);
            if let Err(e) = self.store.save_world_state(&self.project, &world).await {
                yield StreamItem::Result(Err(e.into()));
                return;
            }
            self.world = world;
            tracing::info!(chapter, characters = update.character_updates.len(), "world state updated");

            yield StreamItem::progress("world state updated");
            for line in summary {
                yield StreamItem::Progress(line);
            }
            if !update.chapter_summary.trim().is_empty() {
                yield StreamItem::progress(format!("chapter: {}", update.chapter_summary.trim()));
            }
            yield StreamItem::Result(Ok(WorldUpdateOutcome {
                updated: true,
                reason: None,
                update: Some(update),
            }));
        })
    }
}

fn none_if_empty(value: &str) -> &str {
    if value.trim().is_empty() {
        "none"
    } else {
        value.trim()
    }
}

const STATE_UPDATE_SCHEMA: &str = r#"{
  "character_updates": [
    {
      "name": "character name",
      "status_change": "what changed",
      "status_entries": ["status note"],
      "status_tags": ["injured", "wary"],
      "physical_state": "body",
      "mental_state": "mind",
      "current_goal": "next short-term goal",
      "level_update": "new level (optional, form: system·major realm·stage)",
      "breakthrough_progress": {
        "resources_acquired": ["resources gained this chapter (protagonist only)"],
        "conditions_completed": ["breakthrough conditions met this chapter (protagonist only)"]
      },
      "action_history_entries": [
        {"action": "what they did", "reason": "why", "outcome": "result", "impact": "effect on the plot"}
      ],
      "memory_updates": {
        "short_term": ["recent memory"],
        "long_term": ["lasting memory"],
        "beliefs": ["changed values or judgments (optional)"]
      },
      "new_abilities": ["new methods or skills"],
      "new_items": ["new artifacts or items"],
      "relationship_updates": [
        {"target": "other character", "relation_type": "ally/hostile/master-disciple/kin/stranger", "description": "what changed"}
      ],
      "relationship_changes": ["relationship change (legacy form)"]
    }
  ],
  "world_updates": {
    "new_locations": ["new place"],
    "new_methods": ["new method"],
    "new_artifacts": ["new artifact"],
    "plot_progress": "plot progress summary",
    "new_factions": ["new faction"],
    "time_advance": "time passed",
    "faction_changes": ["faction change"],
    "world_state_notes": ["world note"]
  },
  "chapter_summary": "chapter summary (under 50 words)"
}"#;
