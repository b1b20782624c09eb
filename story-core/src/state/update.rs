use super::{ActionEntry, Location};
use serde::{Deserialize, Serialize};

/// Explicit breakthrough signals reported for the gated character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BreakthroughProgress {
    #[serde(default)]
    pub resources_acquired: Vec<String>,
    #[serde(default)]
    pub conditions_completed: Vec<String>,
}

impl BreakthroughProgress {
    pub fn is_empty(&self) -> bool {
        self.resources_acquired.is_empty() && self.conditions_completed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MemoryUpdates {
    #[serde(default)]
    pub short_term: Vec<String>,
    #[serde(default)]
    pub long_term: Vec<String>,
    #[serde(default)]
    pub beliefs: Vec<String>,
}

impl MemoryUpdates {
    pub fn len(&self) -> usize {
        self.short_term.len() + self.long_term.len() + self.beliefs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipUpdate {
    pub target: String,
    #[serde(default)]
    pub relation_type: String,
    #[serde(default)]
    pub description: String,
}

/// One character's changes in a chapter, as reported by the analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CharacterUpdate {
    pub name: String,
    #[serde(default)]
    pub status_change: String,
    #[serde(default)]
    pub status_entries: Vec<String>,
    #[serde(default)]
    pub status_tags: Vec<String>,
    #[serde(default)]
    pub physical_state: String,
    #[serde(default)]
    pub mental_state: String,
    #[serde(default)]
    pub current_goal: String,
    #[serde(default)]
    pub level_update: String,
    #[serde(default)]
    pub breakthrough_progress: Option<BreakthroughProgress>,
    #[serde(default)]
    pub action_history_entries: Vec<ActionEntry>,
    #[serde(default)]
    pub memory_updates: MemoryUpdates,
    #[serde(default)]
    pub new_abilities: Vec<String>,
    #[serde(default)]
    pub new_items: Vec<String>,
    #[serde(default)]
    pub relationship_updates: Vec<RelationshipUpdate>,
    #[serde(default)]
    pub relationship_changes: Vec<String>,
}

impl CharacterUpdate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// `status_change` followed by `status_entries`, empties removed.
    pub fn status_lines(&self) -> Vec<String> {
        std::iter::once(&self.status_change)
            .chain(self.status_entries.iter())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorldUpdates {
    #[serde(default)]
    pub new_locations: Vec<Location>,
    #[serde(default)]
    pub new_methods: Vec<String>,
    #[serde(default)]
    pub new_artifacts: Vec<String>,
    #[serde(default)]
    pub new_factions: Vec<String>,
    #[serde(default)]
    pub plot_progress: Option<String>,
    #[serde(default)]
    pub time_advance: String,
    #[serde(default)]
    pub faction_changes: Vec<String>,
    #[serde(default)]
    pub world_state_notes: Vec<String>,
}

/// Structured changes extracted from one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StateUpdate {
    #[serde(default)]
    pub character_updates: Vec<CharacterUpdate>,
    #[serde(default)]
    pub world_updates: WorldUpdates,
    #[serde(default)]
    pub chapter_summary: String,
    /// Progress lines from the breakthrough gate, filled in during merge.
    #[serde(default)]
    pub progression_logs: Vec<String>,
}
