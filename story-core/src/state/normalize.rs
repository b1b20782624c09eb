//! Coercion of loosely-typed JSON into the typed world-state schema.
//!
//! Every reader here is permissive: wrong types become defaults and
//! malformed list items are skipped one at a time, so a single bad entry
//! never discards the rest of a payload.

use super::{
    ActionEntry, BreakthroughProgress, Character, CharacterRole, CharacterUpdate,
    CultivationRank, CultivationSystem, Location, MemoryUpdates, ProtagonistProgression,
    RealmSystemRules, RealmUpgradeRules, Relationship, RelationshipUpdate, Requirement,
    RequirementStatus, StateUpdate, Transition, TransitionSummary, WorldInfo, WorldState,
    WorldUpdates,
};
use serde_json::{Map, Value};

/// Scalar value as trimmed text. Containers and null become empty.
pub fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Text of the first key present with a non-empty value.
pub fn text_any(map: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| text(map.get(*k)))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

/// Non-empty scalar items of a list, up to `limit` (0 = unbounded).
pub fn text_list(value: Option<&Value>, limit: usize) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    let iter = items.iter().map(|v| text(Some(v))).filter(|s| !s.is_empty());
    if limit > 0 {
        iter.take(limit).collect()
    } else {
        iter.collect()
    }
}

pub fn integer(value: Option<&Value>) -> Option<i64> {
    match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn objects(value: Option<&Value>) -> impl Iterator<Item = &Map<String, Value>> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn object(value: Option<&Value>) -> Option<&Map<String, Value>> {
    value.and_then(Value::as_object)
}

// ============================================================================
// World state
// ============================================================================

impl WorldState {
    /// Normalize a stored or model-produced world document.
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        Self {
            characters: objects(map.get("characters"))
                .filter_map(character_from_map)
                .collect(),
            world: object(map.get("world")).map(world_info_from_map).unwrap_or_default(),
            locations: map
                .get("locations")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(location_from_value)
                .collect(),
            plot_history: text_list(map.get("plot_history"), 0),
            timeline: text_list(map.get("timeline"), 0),
            faction_history: text_list(map.get("faction_history"), 0),
            world_state_notes: text_list(map.get("world_state_notes"), 0),
        }
    }
}

pub(crate) fn character_from_map(map: &Map<String, Value>) -> Option<Character> {
    let name = text(map.get("name"));
    if name.is_empty() {
        return None;
    }
    Some(Character {
        name,
        role: CharacterRole::parse(&text(map.get("role"))),
        appeared: map.get("appeared").and_then(Value::as_bool).unwrap_or(false),
        personality: text_any(map, &["personality", "personality_temperament"]),
        desire: text(map.get("desire")),
        level: text(map.get("level")),
        abilities: text_list(map.get("abilities"), 0),
        items: text_list(map.get("items"), 0),
        current_goal: text(map.get("current_goal")),
        action_tendency: text(map.get("action_tendency")),
        physical_state: text(map.get("physical_state")),
        mental_state: text(map.get("mental_state")),
        relationships: objects(map.get("relationships"))
            .filter_map(relationship_from_map)
            .collect(),
        relationship_history: text_list(map.get("relationship_history"), 0),
        current_status: text_list(map.get("current_status"), 0),
        status_tags: text_list(map.get("status_tags"), 0),
        action_history: map
            .get("action_history")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|v| action_entry_from_value(v, 4))
            .collect(),
        memory_short_term: text_list(map.get("memory_short_term"), 0),
        memory_long_term: text_list(map.get("memory_long_term"), 0),
        memory_beliefs: text_list(map.get("memory_beliefs"), 0),
    })
}

fn relationship_from_map(map: &Map<String, Value>) -> Option<Relationship> {
    let target = text(map.get("target"));
    if target.is_empty() {
        return None;
    }
    let relation_type = text_any(map, &["relation_type", "type"]);
    Some(Relationship {
        target,
        relation_type: if relation_type.is_empty() {
            "未知".to_string()
        } else {
            relation_type
        },
        description: text(map.get("description")),
    })
}

/// Action entry from an object or a plain string. Tags are cut to `tag_limit`.
pub(crate) fn action_entry_from_value(value: &Value, tag_limit: usize) -> Option<ActionEntry> {
    match value {
        Value::Object(map) => {
            let action = text_any(map, &["action", "summary"]);
            if action.is_empty() {
                return None;
            }
            Some(ActionEntry {
                chapter: integer(map.get("chapter")).and_then(|n| u32::try_from(n).ok()),
                action,
                reason: text(map.get("reason")),
                outcome: text(map.get("outcome")),
                impact: text(map.get("impact")),
                location: text(map.get("location")),
                target: text(map.get("target")),
                tags: text_list(map.get("tags"), tag_limit),
            })
        }
        other => {
            let action = text(Some(other));
            (!action.is_empty()).then(|| ActionEntry::new(action))
        }
    }
}

fn location_from_value(value: &Value) -> Option<Location> {
    let (name, description) = match value {
        Value::Object(map) => (text(map.get("name")), text(map.get("description"))),
        other => (text(Some(other)), String::new()),
    };
    (!name.is_empty()).then_some(Location { name, description })
}

fn world_info_from_map(map: &Map<String, Value>) -> WorldInfo {
    let power_system = match map.get("power_system") {
        Some(Value::Object(_)) | Some(Value::Array(_)) => map
            .get("power_system")
            .map(Value::to_string)
            .unwrap_or_default(),
        other => text(other),
    };
    WorldInfo {
        environment: text(map.get("environment")),
        power_system,
        factions: text_list(map.get("factions"), 0),
        known_methods: text_list(map.get("known_methods"), 0),
        known_artifacts: text_list(map.get("known_artifacts"), 0),
        scene_rules: text_list(map.get("scene_rules"), 0),
        cultivation_systems: objects(map.get("cultivation_systems"))
            .filter_map(cultivation_system_from_map)
            .collect(),
        realm_upgrade_rules: object(map.get("realm_upgrade_rules"))
            .map(realm_rules_from_map)
            .unwrap_or_default(),
        protagonist_progression: object(map.get("protagonist_progression"))
            .map(progression_from_map),
    }
}

fn cultivation_system_from_map(map: &Map<String, Value>) -> Option<CultivationSystem> {
    let name = text(map.get("name"));
    if name.is_empty() {
        return None;
    }
    Some(CultivationSystem {
        name,
        description: text(map.get("description")),
        ranks: objects(map.get("ranks"))
            .filter_map(|rank| {
                let name = text(rank.get("name"));
                (!name.is_empty()).then(|| CultivationRank {
                    name,
                    level_index: integer(rank.get("level_index")).unwrap_or(0),
                    abilities: text_list(rank.get("abilities"), 0),
                })
            })
            .collect(),
    })
}

fn realm_rules_from_map(map: &Map<String, Value>) -> RealmUpgradeRules {
    RealmUpgradeRules {
        hard_constraints: text_list(map.get("hard_constraints"), 0),
        systems: objects(map.get("systems"))
            .filter_map(|system| {
                let name = text(system.get("name"));
                (!name.is_empty()).then(|| RealmSystemRules {
                    name,
                    transitions: objects(system.get("transitions"))
                        .map(|t| TransitionSummary {
                            from_level: text(t.get("from_level")),
                            to_level: text(t.get("to_level")),
                        })
                        .collect(),
                })
            })
            .collect(),
    }
}

fn requirement_from_value(value: &Value) -> Option<Requirement> {
    match value {
        Value::Object(map) => {
            let name = text(map.get("name"));
            (!name.is_empty()).then(|| Requirement {
                name,
                status: RequirementStatus::new(text(map.get("status"))),
                keywords: text_list(map.get("keywords"), 0),
            })
        }
        other => {
            let name = text(Some(other));
            (!name.is_empty()).then(|| Requirement::pending(name))
        }
    }
}

fn requirements(value: Option<&Value>) -> Vec<Requirement> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(requirement_from_value)
        .collect()
}

fn transition_from_map(map: &Map<String, Value>) -> Transition {
    Transition {
        from_level: text(map.get("from_level")),
        to_level: text(map.get("to_level")),
        required_resources: requirements(map.get("required_resources")),
        required_conditions: requirements(map.get("required_conditions")),
        completed: map.get("completed").and_then(Value::as_bool).unwrap_or(false),
    }
}

pub(crate) fn progression_from_map(map: &Map<String, Value>) -> ProtagonistProgression {
    let transitions: Vec<Transition> = objects(map.get("transitions"))
        .map(transition_from_map)
        .collect();

    let mut active_transition_index = integer(map.get("active_transition_index"))
        .and_then(|i| usize::try_from(i).ok())
        .filter(|i| *i < transitions.len());

    // Older documents point at the active step by value instead of index.
    if active_transition_index.is_none() {
        if let Some(direct) = object(map.get("active_transition")) {
            let from = text(direct.get("from_level"));
            let to = text(direct.get("to_level"));
            active_transition_index = transitions
                .iter()
                .position(|t| t.from_level == from && t.to_level == to);
        }
    }

    ProtagonistProgression {
        name: text(map.get("name")),
        current_level: text(map.get("current_level")),
        next_level: text(map.get("next_level")),
        transitions,
        active_transition_index,
        resource_inventory: text_list(map.get("resource_inventory"), 0),
        history: text_list(map.get("history"), 0),
    }
}

// ============================================================================
// State updates
// ============================================================================

impl StateUpdate {
    /// Normalize the analysis pass output.
    pub fn from_json(map: &Map<String, Value>) -> Self {
        Self {
            character_updates: objects(map.get("character_updates"))
                .filter_map(character_update_from_map)
                .collect(),
            world_updates: object(map.get("world_updates"))
                .map(world_updates_from_map)
                .unwrap_or_default(),
            chapter_summary: text(map.get("chapter_summary")),
            progression_logs: Vec::new(),
        }
    }
}

fn character_update_from_map(map: &Map<String, Value>) -> Option<CharacterUpdate> {
    let name = text(map.get("name"));
    if name.is_empty() {
        return None;
    }
    let breakthrough_progress = object(map.get("breakthrough_progress")).map(|p| {
        BreakthroughProgress {
            resources_acquired: text_list(p.get("resources_acquired"), 0),
            conditions_completed: text_list(p.get("conditions_completed"), 0),
        }
    });
    let memory = object(map.get("memory_updates"));

    Some(CharacterUpdate {
        name,
        status_change: text(map.get("status_change")),
        status_entries: text_list(map.get("status_entries"), 0),
        status_tags: text_list(map.get("status_tags"), 0),
        physical_state: text(map.get("physical_state")),
        mental_state: text(map.get("mental_state")),
        current_goal: text(map.get("current_goal")),
        level_update: text(map.get("level_update")),
        breakthrough_progress,
        action_history_entries: map
            .get("action_history_entries")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|v| action_entry_from_value(v, 3))
            .collect(),
        memory_updates: MemoryUpdates {
            short_term: text_list(memory.and_then(|m| m.get("short_term")), 6),
            long_term: text_list(memory.and_then(|m| m.get("long_term")), 6),
            beliefs: text_list(memory.and_then(|m| m.get("beliefs")), 4),
        },
        new_abilities: text_list(map.get("new_abilities"), 0),
        new_items: text_list(map.get("new_items"), 0),
        relationship_updates: objects(map.get("relationship_updates"))
            .filter_map(|rel| {
                let target = text(rel.get("target"));
                (!target.is_empty()).then(|| RelationshipUpdate {
                    target,
                    relation_type: text_any(rel, &["relation_type", "type"]),
                    description: text(rel.get("description")),
                })
            })
            .collect(),
        relationship_changes: text_list(map.get("relationship_changes"), 0),
    })
}

fn world_updates_from_map(map: &Map<String, Value>) -> WorldUpdates {
    let plot_progress = text(map.get("plot_progress"));
    WorldUpdates {
        new_locations: map
            .get("new_locations")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(location_from_value)
            .collect(),
        new_methods: text_list(map.get("new_methods"), 0),
        new_artifacts: text_list(map.get("new_artifacts"), 0),
        new_factions: text_list(map.get("new_factions"), 0),
        plot_progress: (!plot_progress.is_empty()).then_some(plot_progress),
        time_advance: text(map.get("time_advance")),
        faction_changes: text_list(map.get("faction_changes"), 0),
        world_state_notes: text_list(map.get("world_state_notes"), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_world_state_skips_malformed_entries() {
        let value = json!({
            "characters": [
                {"name": "沈焱笙", "role": "主角", "level": "鬼道·怨灵境·后期",
                 "relationships": [{"target": "将军鬼物", "type": "合作"}, {"target": ""}, 7]},
                {"role": "配角"},
                "not a character"
            ],
            "world": {"power_system": {"name": "鬼道"}, "factions": ["幽冥宗", "", 3]},
            "locations": ["阴井", {"name": "凛阴岗", "description": "荒岗"}, {"description": "x"}],
            "timeline": "not a list"
        });
        let state = WorldState::from_value(&value);
        assert_eq!(state.characters.len(), 1);
        let hero = &state.characters[0];
        assert!(hero.is_protagonist());
        assert_eq!(hero.relationships.len(), 1);
        assert_eq!(hero.relationships[0].relation_type, "合作");
        assert!(state.world.power_system.contains("鬼道"));
        assert_eq!(state.world.factions, vec!["幽冥宗", "3"]);
        assert_eq!(state.locations.len(), 2);
        assert!(state.timeline.is_empty());
    }

    #[test]
    fn test_progression_legacy_active_transition() {
        let value = json!({
            "name": "hero",
            "transitions": [
                {"from_level": "a", "to_level": "b", "completed": true},
                {"from_level": "b", "to_level": "c",
                 "required_resources": ["核", {"name": "香火", "status": "missing", "keywords": ["香"]}]}
            ],
            "active_transition": {"from_level": "b", "to_level": "c"}
        });
        let progression = progression_from_map(value.as_object().unwrap());
        assert_eq!(progression.active_transition_index, Some(1));
        let reqs = &progression.transitions[1].required_resources;
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[1].keywords, vec!["香"]);
        assert!(!reqs[0].is_done());
    }

    #[test]
    fn test_state_update_aliases_and_limits() {
        let value = json!({
            "character_updates": [
                {
                    "name": "沈焱笙",
                    "action_history_entries": [
                        {"summary": "潜伏", "tags": ["a", "b", "c", "d"]},
                        {"reason": "no action"},
                        "plain action"
                    ],
                    "memory_updates": {"short_term": ["1","2","3","4","5","6","7"], "beliefs": "bad"},
                    "relationship_updates": [{"target": "将军鬼物", "type": "盟友"}, {"target": " "}]
                },
                {"status_change": "nameless"}
            ],
            "world_updates": {"new_locations": ["阴井"], "plot_progress": ""}
        });
        let update = StateUpdate::from_json(value.as_object().unwrap());
        assert_eq!(update.character_updates.len(), 1);
        let cu = &update.character_updates[0];
        assert_eq!(cu.action_history_entries.len(), 2);
        assert_eq!(cu.action_history_entries[0].action, "潜伏");
        assert_eq!(cu.action_history_entries[0].tags.len(), 3);
        assert_eq!(cu.memory_updates.short_term.len(), 6);
        assert!(cu.memory_updates.beliefs.is_empty());
        assert_eq!(cu.relationship_updates.len(), 1);
        assert_eq!(cu.relationship_updates[0].relation_type, "盟友");
        assert_eq!(update.world_updates.new_locations[0].name, "阴井");
        assert!(update.world_updates.plot_progress.is_none());
    }
}
