//! Folding a chapter's [`StateUpdate`] into the world document.
//!
//! Every collection is bounded and de-duplicated; truncation always keeps
//! the most recent entries.

use crate::gate::{self, ProgressSignals};
use crate::state::{
    dedupe_keep_order, keep_tail, merge_dedupe, push_ring, ActionEntry, Character,
    CharacterUpdate, Location, Relationship, StateUpdate, WorldState, WorldUpdates,
};
use std::collections::HashSet;

const STATUS_CAP: usize = 10;
const ACTION_CAP: usize = 40;
const ACTION_INPUT_TAGS: usize = 3;
const SHORT_TERM_CAP: usize = 30;
const LONG_TERM_CAP: usize = 40;
const BELIEFS_CAP: usize = 20;
const RELATIONSHIP_HISTORY_CAP: usize = 20;
const PLOT_HISTORY_CAP: usize = 10;
const TIMELINE_CAP: usize = 20;
const FACTION_HISTORY_CAP: usize = 30;
const WORLD_NOTES_CAP: usize = 30;

/// Merge `update` into `world` for chapter `chapter`.
///
/// Gate logs are written back into `update.progression_logs`. Returns the
/// human-readable summary lines.
pub fn apply_state_update(
    world: &mut WorldState,
    update: &mut StateUpdate,
    chapter: u32,
    chapter_content: &str,
) -> Vec<String> {
    let mut progress_logs = Vec::new();

    for char_update in &update.character_updates {
        let Some(idx) = world
            .characters
            .iter()
            .position(|c| c.name == char_update.name)
        else {
            tracing::debug!(name = %char_update.name, "update for unknown character skipped");
            continue;
        };
        let character = &mut world.characters[idx];
        let progression = world.world.protagonist_progression.as_mut();
        let signals = ProgressSignals::from_update(char_update, chapter_content);

        let status_lines = char_update.status_lines();
        push_ring(&mut character.current_status, &status_lines, STATUS_CAP);
        apply_scalars(character, char_update);

        let level = char_update.level_update.trim();
        if !level.is_empty() {
            let decision = gate::evaluate_level_update(progression, character, level, &signals);
            if decision.ignored {
                let line = format!("level update ignored (too coarse): {level}");
                push_ring(&mut character.current_status, &[line], STATUS_CAP);
            } else if decision.allowed {
                character.level = level.to_string();
            } else if let Some(reason) = &decision.reason {
                tracing::info!(name = %character.name, %reason, "level update blocked");
                let line = format!("level update blocked: {reason}");
                push_ring(&mut character.current_status, &[line], STATUS_CAP);
            }
            progress_logs.extend(decision.progress_log);
        } else if char_update
            .breakthrough_progress
            .as_ref()
            .is_some_and(|p| !p.is_empty())
        {
            progress_logs.extend(gate::record_progress(
                progression,
                &character.name,
                &signals,
            ));
        }

        let new_actions = merge_actions(character, &char_update.action_history_entries, chapter);
        merge_memories(character, char_update, &status_lines, &new_actions);
        merge_dedupe(&mut character.abilities, &char_update.new_abilities, 0);
        merge_dedupe(&mut character.items, &char_update.new_items, 0);
        merge_relationships(character, char_update);
    }

    merge_world(world, &update.world_updates);

    update.progression_logs = dedupe_keep_order(progress_logs);
    summarize(update)
}

fn apply_scalars(character: &mut Character, update: &CharacterUpdate) {
    for (target, value) in [
        (&mut character.physical_state, &update.physical_state),
        (&mut character.mental_state, &update.mental_state),
        (&mut character.current_goal, &update.current_goal),
    ] {
        if !value.trim().is_empty() {
            *target = value.trim().to_string();
        }
    }
    merge_dedupe(&mut character.status_tags, &update.status_tags, 0);
}

/// Stamp, append and de-duplicate actions. Returns the stamped entries.
fn merge_actions(character: &mut Character, entries: &[ActionEntry], chapter: u32) -> Vec<ActionEntry> {
    let stamped: Vec<ActionEntry> = entries
        .iter()
        .filter(|e| !e.action.trim().is_empty())
        .map(|e| {
            let mut entry = e.clone();
            entry.chapter = Some(chapter);
            entry.tags.truncate(ACTION_INPUT_TAGS);
            entry
        })
        .collect();

    let mut combined = std::mem::take(&mut character.action_history);
    combined.extend(stamped.iter().cloned());

    let mut seen = HashSet::new();
    let mut deduped = Vec::with_capacity(combined.len());
    for entry in combined {
        let key = format!("{:?}", entry.dedupe_key());
        if seen.insert(key) {
            deduped.push(entry);
        }
    }
    keep_tail(&mut deduped, ACTION_CAP);
    character.action_history = deduped;
    stamped
}

fn merge_memories(
    character: &mut Character,
    update: &CharacterUpdate,
    status_lines: &[String],
    new_actions: &[ActionEntry],
) {
    let memory = &update.memory_updates;
    let mut short_term: Vec<String> = memory.short_term.clone();
    let recent_status = status_lines.len().saturating_sub(2);
    short_term.extend(status_lines[recent_status..].iter().cloned());
    if let Some(line) = new_actions
        .iter()
        .map(ActionEntry::format_line)
        .find(|l| !l.is_empty())
    {
        short_term.push(line);
    }

    merge_dedupe(&mut character.memory_short_term, &short_term, SHORT_TERM_CAP);
    merge_dedupe(&mut character.memory_long_term, &memory.long_term, LONG_TERM_CAP);
    merge_dedupe(&mut character.memory_beliefs, &memory.beliefs, BELIEFS_CAP);
}

fn merge_relationships(character: &mut Character, update: &CharacterUpdate) {
    for rel in &update.relationship_updates {
        let target = rel.target.trim();
        if target.is_empty() {
            continue;
        }
        let relation_type = rel.relation_type.trim();
        let description = rel.description.trim();
        match character
            .relationships
            .iter_mut()
            .find(|r| r.target == target)
        {
            Some(existing) => {
                if !relation_type.is_empty() {
                    existing.relation_type = relation_type.to_string();
                }
                if !description.is_empty() {
                    existing.description = description.to_string();
                }
            }
            None => character.relationships.push(Relationship {
                target: target.to_string(),
                relation_type: if relation_type.is_empty() {
                    "未知".to_string()
                } else {
                    relation_type.to_string()
                },
                description: description.to_string(),
            }),
        }
    }
    push_ring(
        &mut character.relationship_history,
        &update.relationship_changes,
        RELATIONSHIP_HISTORY_CAP,
    );
}

fn upsert_location(locations: &mut Vec<Location>, incoming: &Location) {
    let name = incoming.name.trim();
    if name.is_empty() {
        return;
    }
    match locations.iter_mut().find(|l| l.name == name) {
        Some(existing) => {
            if !incoming.description.trim().is_empty() {
                existing.description = incoming.description.trim().to_string();
            }
        }
        None => locations.push(Location {
            name: name.to_string(),
            description: incoming.description.trim().to_string(),
        }),
    }
}

fn merge_world(world: &mut WorldState, updates: &WorldUpdates) {
    if let Some(plot) = &updates.plot_progress {
        push_ring(&mut world.plot_history, std::slice::from_ref(plot), PLOT_HISTORY_CAP);
    }
    for location in &updates.new_locations {
        upsert_location(&mut world.locations, location);
    }
    merge_dedupe(&mut world.world.known_methods, &updates.new_methods, 0);
    merge_dedupe(&mut world.world.known_artifacts, &updates.new_artifacts, 0);
    merge_dedupe(&mut world.world.factions, &updates.new_factions, 0);
    if !updates.time_advance.trim().is_empty() {
        push_ring(
            &mut world.timeline,
            std::slice::from_ref(&updates.time_advance),
            TIMELINE_CAP,
        );
    }
    push_ring(&mut world.faction_history, &updates.faction_changes, FACTION_HISTORY_CAP);
    push_ring(&mut world.world_state_notes, &updates.world_state_notes, WORLD_NOTES_CAP);
}

/// Summary lines describing what an update changed.
pub fn summarize(update: &StateUpdate) -> Vec<String> {
    let mut lines = Vec::new();
    let updates = &update.character_updates;

    if !updates.is_empty() {
        let names: Vec<&str> = updates.iter().take(5).map(|u| u.name.as_str()).collect();
        lines.push(format!(
            "characters updated: {} ({})",
            updates.len(),
            names.join(", ")
        ));
    }

    let status = updates.iter().map(|u| u.status_lines().len()).sum::<usize>();
    let relations = updates
        .iter()
        .map(|u| {
            u.relationship_updates
                .iter()
                .filter(|r| !r.target.trim().is_empty())
                .count()
                + u.relationship_changes.len()
        })
        .sum::<usize>();
    let goals = updates
        .iter()
        .filter(|u| !u.current_goal.trim().is_empty())
        .count();
    let actions = updates
        .iter()
        .map(|u| u.action_history_entries.len())
        .sum::<usize>();
    let memories = updates.iter().map(|u| u.memory_updates.len()).sum::<usize>();

    for (label, count) in [
        ("status changes", status),
        ("relationship changes", relations),
        ("goal updates", goals),
        ("action entries", actions),
        ("memory entries", memories),
    ] {
        if count > 0 {
            lines.push(format!("{label}: {count}"));
        }
    }

    let world = &update.world_updates;
    let additions: Vec<String> = [
        ("locations", world.new_locations.len()),
        ("methods", world.new_methods.len()),
        ("artifacts", world.new_artifacts.len()),
        ("factions", world.new_factions.len()),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .map(|(label, n)| format!("{label} +{n}"))
    .collect();
    if !additions.is_empty() {
        lines.push(format!("world additions: {}", additions.join(", ")));
    }
    if !world.faction_changes.is_empty() {
        lines.push(format!("faction dynamics: {}", world.faction_changes.len()));
    }
    if !world.world_state_notes.is_empty() {
        lines.push(format!("world notes: {}", world.world_state_notes.len()));
    }
    if !world.time_advance.trim().is_empty() {
        lines.push(format!("time advance: {}", world.time_advance.trim()));
    }

    if !update.progression_logs.is_empty() {
        lines.push(format!("progression logs: {}", update.progression_logs.len()));
        lines.extend(
            update
                .progression_logs
                .iter()
                .take(2)
                .map(|l| format!("  - {l}")),
        );
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        BreakthroughProgress, CharacterRole, MemoryUpdates, ProtagonistProgression,
        RelationshipUpdate, Requirement, Transition,
    };

    fn world() -> WorldState {
        WorldState::new()
            .with_character(
                Character::new("沈焱笙")
                    .with_role(CharacterRole::Protagonist)
                    .with_level("鬼道·怨灵境·后期（井底破封后）"),
            )
            .with_character(Character::new("将军鬼物").with_level("鬼道·厉鬼境·中期"))
            .with_progression(
                ProtagonistProgression::new("沈焱笙", "鬼道·怨灵境·后期（井底破封后）")
                    .with_transition(
                        Transition::new("鬼道·怨灵境·后期", "鬼道·厉鬼境·初期")
                            .with_resource(Requirement::pending("阴煞核心"))
                            .with_resource(Requirement::pending("城隍香火"))
                            .with_condition(Requirement::pending("斩杀将军鬼物")),
                    )
                    .with_transition(Transition::new("鬼道·厉鬼境·初期", "鬼道·厉鬼境·中期")),
            )
    }

    fn single(update: CharacterUpdate) -> StateUpdate {
        StateUpdate {
            character_updates: vec![update],
            ..Default::default()
        }
    }

    #[test]
    fn test_blocked_level_update_records_status() {
        let mut state = world();
        let mut update = CharacterUpdate::new("沈焱笙");
        update.level_update = "鬼道·厉鬼境·初期".to_string();
        let mut update = single(update);
        apply_state_update(&mut state, &mut update, 4, "");

        let hero = state.character("沈焱笙").unwrap();
        assert_eq!(hero.level, "鬼道·怨灵境·后期（井底破封后）");
        assert!(hero
            .current_status
            .iter()
            .any(|s| s.starts_with("level update blocked: breakthrough requirements unmet")));
    }

    #[test]
    fn test_satisfied_level_update_applies() {
        let mut state = world();
        let mut cu = CharacterUpdate::new("沈焱笙");
        cu.level_update = "鬼道·厉鬼境·初期".to_string();
        cu.breakthrough_progress = Some(BreakthroughProgress {
            resources_acquired: vec!["阴煞核心".into(), "城隍香火".into()],
            conditions_completed: vec!["斩杀将军鬼物".into()],
        });
        let mut update = single(cu);
        let summary = apply_state_update(&mut state, &mut update, 5, "");

        assert_eq!(state.character("沈焱笙").unwrap().level, "鬼道·厉鬼境·初期");
        let progression = state.world.protagonist_progression.as_ref().unwrap();
        assert_eq!(progression.next_level, "鬼道·厉鬼境·中期");
        assert_eq!(progression.active_transition_index, Some(1));
        assert!(update
            .progression_logs
            .iter()
            .any(|l| l.starts_with("breakthrough: ")));
        assert!(summary.iter().any(|l| l.starts_with("progression logs: ")));
    }

    #[test]
    fn test_coarse_level_is_ignored() {
        let mut state = world();
        let mut cu = CharacterUpdate::new("将军鬼物");
        cu.level_update = "鬼物".to_string();
        let mut update = single(cu);
        apply_state_update(&mut state, &mut update, 2, "");
        let general = state.character("将军鬼物").unwrap();
        assert_eq!(general.level, "鬼道·厉鬼境·中期");
        assert_eq!(
            general.current_status,
            vec!["level update ignored (too coarse): 鬼物"]
        );
    }

    #[test]
    fn test_progress_without_level_request() {
        let mut state = world();
        let mut cu = CharacterUpdate::new("沈焱笙");
        cu.breakthrough_progress = Some(BreakthroughProgress {
            resources_acquired: vec!["阴煞核心".into()],
            conditions_completed: vec![],
        });
        let mut update = single(cu);
        apply_state_update(&mut state, &mut update, 3, "");
        let progression = state.world.protagonist_progression.as_ref().unwrap();
        assert!(progression.transitions[0].required_resources[0].is_done());
        assert_eq!(progression.resource_inventory, vec!["阴煞核心"]);
        assert!(update
            .progression_logs
            .contains(&"breakthrough resource acquired: 阴煞核心".to_string()));
    }

    #[test]
    fn test_collections_stay_bounded() {
        let mut state = world();
        for chapter in 1..=50u32 {
            let mut cu = CharacterUpdate::new("将军鬼物");
            cu.status_change = format!("status {chapter}");
            cu.action_history_entries = vec![ActionEntry::new(format!("act {chapter}"))];
            cu.memory_updates = MemoryUpdates {
                short_term: vec![format!("memory {chapter}")],
                ..Default::default()
            };
            let mut update = single(cu);
            apply_state_update(&mut state, &mut update, chapter, "");
        }
        let general = state.character("将军鬼物").unwrap();
        assert_eq!(general.current_status.len(), 10);
        assert_eq!(general.current_status.last().unwrap(), "status 50");
        assert_eq!(general.current_status[0], "status 41");
        assert_eq!(general.action_history.len(), 40);
        assert_eq!(general.action_history[0].action, "act 11");
        assert_eq!(general.action_history.last().unwrap().chapter, Some(50));
        assert!(general.memory_short_term.len() <= 30);
        assert_eq!(general.memory_short_term.last().unwrap(), "第50章:act 50");
    }

    #[test]
    fn test_duplicate_actions_collapse() {
        let mut state = world();
        for _ in 0..2 {
            let mut cu = CharacterUpdate::new("将军鬼物");
            let mut entry = ActionEntry::new("镇守凛阴岗");
            entry.tags = vec!["a".into(), "b".into(), "c".into(), "d".into()];
            cu.action_history_entries = vec![entry];
            let mut update = single(cu);
            apply_state_update(&mut state, &mut update, 7, "");
        }
        let general = state.character("将军鬼物").unwrap();
        assert_eq!(general.action_history.len(), 1);
        assert_eq!(general.action_history[0].tags.len(), 3);
    }

    #[test]
    fn test_relationship_upsert() {
        let mut state = world();
        let mut first = CharacterUpdate::new("沈焱笙");
        first.relationship_updates = vec![RelationshipUpdate {
            target: "将军鬼物".into(),
            relation_type: "敌对".into(),
            description: "井底交手".into(),
        }];
        first.relationship_changes = vec!["与将军鬼物结仇".into()];
        let mut second = CharacterUpdate::new("沈焱笙");
        second.relationship_updates = vec![
            RelationshipUpdate {
                target: "将军鬼物".into(),
                relation_type: "暂时合作".into(),
                description: String::new(),
            },
            RelationshipUpdate {
                target: "  ".into(),
                relation_type: "x".into(),
                description: String::new(),
            },
            RelationshipUpdate {
                target: "城隍".into(),
                relation_type: String::new(),
                description: String::new(),
            },
        ];
        apply_state_update(&mut state, &mut single(first), 1, "");
        apply_state_update(&mut state, &mut single(second), 2, "");

        let hero = state.character("沈焱笙").unwrap();
        assert_eq!(hero.relationships.len(), 2);
        let general = hero.relationship("将军鬼物").unwrap();
        assert_eq!(general.relation_type, "暂时合作");
        assert_eq!(general.description, "井底交手");
        assert_eq!(hero.relationship("城隍").unwrap().relation_type, "未知");
        assert_eq!(hero.relationship_history, vec!["与将军鬼物结仇"]);
    }

    #[test]
    fn test_world_updates_merge() {
        let mut state = world();
        state.locations.push(Location {
            name: "阴井".into(),
            description: "旧".into(),
        });
        let mut update = StateUpdate {
            world_updates: WorldUpdates {
                new_locations: vec![
                    Location {
                        name: "阴井".into(),
                        description: "封印已破".into(),
                    },
                    Location {
                        name: "凛阴岗".into(),
                        description: String::new(),
                    },
                ],
                new_methods: vec!["摄魂术".into(), "摄魂术".into()],
                plot_progress: Some("主角破封".into()),
                time_advance: "三日后".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let summary = apply_state_update(&mut state, &mut update, 1, "");
        assert_eq!(state.locations.len(), 2);
        assert_eq!(state.locations[0].description, "封印已破");
        assert_eq!(state.world.known_methods, vec!["摄魂术"]);
        assert_eq!(state.plot_history, vec!["主角破封"]);
        assert_eq!(state.timeline, vec!["三日后"]);
        assert!(summary.contains(&"time advance: 三日后".to_string()));
        assert!(summary.contains(&"world additions: locations +2, methods +2".to_string()));
    }
}
