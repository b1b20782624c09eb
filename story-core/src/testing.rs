//! Testing utilities for the story engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedModel` for deterministic tests without API calls
//! - `TestHarness` for applying scripted chapter updates to a world
//! - Assertion helpers for verifying world state

use crate::merge::apply_state_update;
use crate::state::{
    Character, CharacterRole, ProtagonistProgression, Requirement, StateUpdate, Transition,
    WorldState,
};
use async_trait::async_trait;
use chat_client::{Error, LanguageModel, TextStream};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Size of the fragments a scripted reply is streamed in.
const FRAGMENT_CHARS: usize = 16;

/// A language model that replays queued replies in order.
///
/// Every prompt it receives is recorded so tests can inspect what was sent.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    name: String,
}

impl ScriptedModel {
    /// Create a model that answers with `replies`, one per call.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
            name: "scripted".to_string(),
        }
    }

    /// Queue another reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        lock(&self.replies).push_back(Ok(reply.into()));
    }

    /// Queue a backend failure.
    pub fn push_error(&self, message: impl Into<String>) {
        lock(&self.replies).push_back(Err(message.into()));
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }

    fn next_reply(&self, prompt: &str) -> Result<String, Error> {
        lock(&self.prompts).push(prompt.to_string());
        match lock(&self.replies).pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(Error::Network(message)),
            None => Err(Error::Config("no scripted reply left".to_string())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn chat(&self, prompt: &str, _system_prompt: &str) -> Result<String, Error> {
        self.next_reply(prompt)
    }

    async fn stream_chat(&self, prompt: &str, _system_prompt: &str) -> Result<TextStream, Error> {
        let reply = self.next_reply(prompt)?;
        let chars: Vec<char> = reply.chars().collect();
        let fragments: Vec<Result<String, Error>> = chars
            .chunks(FRAGMENT_CHARS)
            .map(|chunk| Ok(chunk.iter().collect()))
            .collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// The cast used across engine tests: a gated protagonist one breakthrough
/// away from the next realm, and a rival.
pub fn sample_world() -> WorldState {
    let mut hero = Character::new("沈焱笙")
        .with_role(CharacterRole::Protagonist)
        .with_level("鬼道·怨灵境·后期（井底破封后）");
    hero.personality = "隐忍狠厉".to_string();
    hero.current_goal = "离开阴井".to_string();

    let mut rival = Character::new("将军鬼物").with_level("鬼道·厉鬼境·中期");
    rival.personality = "暴烈".to_string();

    WorldState::new()
        .with_character(hero)
        .with_character(rival)
        .with_progression(
            ProtagonistProgression::new("沈焱笙", "鬼道·怨灵境·后期（井底破封后）")
                .with_transition(
                    Transition::new("鬼道·怨灵境·后期", "鬼道·厉鬼境·初期")
                        .with_resource(Requirement::pending("阴煞核心").with_keywords(&["煞核"]))
                        .with_resource(Requirement::pending("城隍香火"))
                        .with_condition(Requirement::pending("斩杀将军鬼物")),
                )
                .with_transition(Transition::new("鬼道·厉鬼境·初期", "鬼道·厉鬼境·中期")),
        )
}

/// Test harness for applying chapter updates to a world.
pub struct TestHarness {
    /// The world under test.
    pub world: WorldState,
    chapter: u32,
    /// Summary lines from the last update.
    pub last_summary: Vec<String>,
    /// Progress logs from the last update.
    pub last_progress: Vec<String>,
}

impl TestHarness {
    /// Create a harness over [`sample_world`].
    pub fn new() -> Self {
        Self::with_world(sample_world())
    }

    pub fn with_world(world: WorldState) -> Self {
        Self {
            world,
            chapter: 0,
            last_summary: Vec::new(),
            last_progress: Vec::new(),
        }
    }

    /// Apply a model-shaped update as the next chapter.
    pub fn apply_json(&mut self, value: serde_json::Value) -> &mut Self {
        let update = value
            .as_object()
            .map(StateUpdate::from_json)
            .unwrap_or_default();
        self.apply(update, "")
    }

    /// Apply a typed update as the next chapter with its text.
    pub fn apply(&mut self, mut update: StateUpdate, content: &str) -> &mut Self {
        self.chapter += 1;
        self.last_summary = apply_state_update(&mut self.world, &mut update, self.chapter, content);
        self.last_progress = update.progression_logs;
        self
    }

    pub fn chapter(&self) -> u32 {
        self.chapter
    }

    pub fn character(&self, name: &str) -> Option<&Character> {
        self.world.character(name)
    }

    pub fn level(&self, name: &str) -> Option<&str> {
        self.character(name).map(|c| c.level.as_str())
    }

    pub fn progression(&self) -> Option<&ProtagonistProgression> {
        self.world.world.protagonist_progression.as_ref()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert a character's level.
#[track_caller]
pub fn assert_level(harness: &TestHarness, name: &str, level: &str) {
    assert_eq!(
        harness.level(name),
        Some(level),
        "Expected '{name}' at level '{level}'"
    );
}

/// Assert a character has a status entry containing `needle`.
#[track_caller]
pub fn assert_status_contains(harness: &TestHarness, name: &str, needle: &str) {
    let status = harness
        .character(name)
        .map(|c| c.current_status.clone())
        .unwrap_or_default();
    assert!(
        status.iter().any(|s| s.contains(needle)),
        "Expected a status of '{name}' containing '{needle}', got {status:?}"
    );
}

/// Assert a relationship exists with the given type.
#[track_caller]
pub fn assert_relationship(harness: &TestHarness, name: &str, target: &str, relation_type: &str) {
    let found = harness
        .character(name)
        .and_then(|c| c.relationship(target))
        .map(|r| r.relation_type.as_str());
    assert_eq!(
        found,
        Some(relation_type),
        "Expected '{name}' -> '{target}' to be '{relation_type}'"
    );
}

/// Assert the protagonist plan points at transition `index`.
#[track_caller]
pub fn assert_active_transition(harness: &TestHarness, index: Option<usize>) {
    let actual = harness.progression().and_then(|p| p.active_transition_index);
    assert_eq!(actual, index, "Expected active transition {index:?}, got {actual:?}");
}
