use super::{Character, ProtagonistProgression};
use serde::{Deserialize, Serialize};

/// A named place in the story world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One rank in a cultivation system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CultivationRank {
    pub name: String,
    #[serde(default)]
    pub level_index: i64,
    #[serde(default)]
    pub abilities: Vec<String>,
}

/// A power system with ordered ranks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CultivationSystem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ranks: Vec<CultivationRank>,
}

impl CultivationSystem {
    /// Ranks sorted by `level_index`.
    pub fn ordered_ranks(&self) -> Vec<&CultivationRank> {
        let mut ranks: Vec<&CultivationRank> = self.ranks.iter().collect();
        ranks.sort_by_key(|r| r.level_index);
        ranks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionSummary {
    pub from_level: String,
    pub to_level: String,
}

/// Advancement chain of one system, as described to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmSystemRules {
    pub name: String,
    #[serde(default)]
    pub transitions: Vec<TransitionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RealmUpgradeRules {
    #[serde(default)]
    pub hard_constraints: Vec<String>,
    #[serde(default)]
    pub systems: Vec<RealmSystemRules>,
}

impl RealmUpgradeRules {
    pub fn is_empty(&self) -> bool {
        self.hard_constraints.is_empty() && self.systems.is_empty()
    }
}

/// Setting-level facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorldInfo {
    #[serde(default)]
    pub environment: String,
    /// Free-form power system description, used when no structured systems exist.
    #[serde(default)]
    pub power_system: String,
    #[serde(default)]
    pub factions: Vec<String>,
    #[serde(default)]
    pub known_methods: Vec<String>,
    #[serde(default)]
    pub known_artifacts: Vec<String>,
    #[serde(default)]
    pub scene_rules: Vec<String>,
    #[serde(default)]
    pub cultivation_systems: Vec<CultivationSystem>,
    #[serde(default, skip_serializing_if = "RealmUpgradeRules::is_empty")]
    pub realm_upgrade_rules: RealmUpgradeRules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protagonist_progression: Option<ProtagonistProgression>,
}

/// Root document, one per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorldState {
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub world: WorldInfo,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub plot_history: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<String>,
    #[serde(default)]
    pub faction_history: Vec<String>,
    #[serde(default)]
    pub world_state_notes: Vec<String>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_character(mut self, character: Character) -> Self {
        self.characters.push(character);
        self
    }

    pub fn with_progression(mut self, progression: ProtagonistProgression) -> Self {
        self.world.protagonist_progression = Some(progression);
        self
    }

    pub fn character(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    pub fn character_mut(&mut self, name: &str) -> Option<&mut Character> {
        self.characters.iter_mut().find(|c| c.name == name)
    }

    /// A document with no characters and no setting is treated as uninitialized.
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty() && self.world == WorldInfo::default() && self.locations.is_empty()
    }
}
