//! Prompt context assembled from the world state.

use crate::gate::missing_requirements;
use crate::outline::extract_outline_section;
use crate::state::{head_chars, Character, WorldState};

const CONTEXT_CHARACTERS: usize = 8;
const KNOWN_ITEMS_SHOWN: usize = 5;
const ENVIRONMENT_CHARS: usize = 100;
const POWER_SYSTEM_CHARS: usize = 300;
const REALM_OUTLINE_HEADING: &str = "境界晋升总纲";
const REALM_OUTLINE_CHARS: usize = 3000;

fn or_unknown(value: &str) -> &str {
    let value = value.trim();
    if value.is_empty() {
        "unknown"
    } else {
        value
    }
}

fn first_non_empty(values: &[String], n: usize) -> Vec<&str> {
    values
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(n)
        .collect()
}

/// State and memory lines for one character.
pub fn character_memory_lines(character: &Character) -> Vec<String> {
    let mut lines = Vec::new();

    if !character.current_goal.trim().is_empty() {
        lines.push(format!("  · goal: {}", character.current_goal.trim()));
    }
    if !character.physical_state.trim().is_empty() || !character.mental_state.trim().is_empty() {
        lines.push(format!(
            "  · condition: body={}; mind={}",
            or_unknown(&character.physical_state),
            or_unknown(&character.mental_state)
        ));
    }

    let status = first_non_empty(&character.current_status, 2);
    if !status.is_empty() {
        lines.push(format!("  · recent status: {}", status.join("；")));
    }

    let start = character.action_history.len().saturating_sub(3);
    let actions: Vec<String> = character.action_history[start..]
        .iter()
        .map(|a| a.format_line())
        .filter(|l| !l.is_empty())
        .collect();
    if !actions.is_empty() {
        lines.push(format!("  · action history: {}", actions.join(" | ")));
    }

    let short = first_non_empty(&character.memory_short_term, 2);
    if !short.is_empty() {
        lines.push(format!("  · recent memory: {}", short.join("；")));
    }
    let long = first_non_empty(&character.memory_long_term, 2);
    if !long.is_empty() {
        lines.push(format!("  · long-term memory: {}", long.join("；")));
    }
    lines
}

fn character_line(character: &Character) -> String {
    let mut line = format!(
        "- {} [{}]: {} | level: {}",
        character.name,
        character.role,
        character.personality,
        character.display_level()
    );
    if !character.abilities.is_empty() {
        line.push_str(&format!(" | methods: {}", character.abilities.join(", ")));
    }
    if !character.items.is_empty() {
        line.push_str(&format!(" | artifacts: {}", character.items.join(", ")));
    }
    let relations: Vec<String> = character
        .relationships
        .iter()
        .map(|r| {
            if r.description.trim().is_empty() {
                format!("{}->{}", r.relation_type, r.target)
            } else {
                format!("{}->{}({})", r.relation_type, r.target, r.description.trim())
            }
        })
        .collect();
    if !relations.is_empty() {
        line.push_str(&format!(" | relationships: {}", relations.join(", ")));
    }
    line
}

/// Full world context for generation and planning prompts.
pub fn build_world_context(world: &WorldState) -> String {
    let mut parts = Vec::new();

    if !world.characters.is_empty() {
        parts.push("[Characters]".to_string());
        for character in world.characters.iter().take(CONTEXT_CHARACTERS) {
            parts.push(character_line(character));
            parts.extend(character_memory_lines(character));
        }
    }

    let info = &world.world;
    parts.push("\n[Setting]".to_string());
    if !info.cultivation_systems.is_empty() {
        parts.push(cultivation_info(world));
    } else if !info.power_system.trim().is_empty() {
        parts.push(format!(
            "- power system: {}",
            head_chars(info.power_system.trim(), POWER_SYSTEM_CHARS)
        ));
    }
    if !info.known_methods.is_empty() {
        parts.push(format!(
            "- known methods: {}",
            first_non_empty(&info.known_methods, KNOWN_ITEMS_SHOWN).join(", ")
        ));
    }
    if !info.known_artifacts.is_empty() {
        parts.push(format!(
            "- known artifacts: {}",
            first_non_empty(&info.known_artifacts, KNOWN_ITEMS_SHOWN).join(", ")
        ));
    }
    if !info.environment.trim().is_empty() {
        parts.push(format!(
            "- environment: {}",
            head_chars(info.environment.trim(), ENVIRONMENT_CHARS)
        ));
    }

    let rules = breakthrough_rules(world);
    if !rules.is_empty() {
        parts.push("\n[Hard advancement rules]".to_string());
        parts.push(rules);
    }

    parts.join("\n")
}

/// Structured description of every cultivation system, ranks in order.
pub fn cultivation_info(world: &WorldState) -> String {
    let systems = &world.world.cultivation_systems;
    if systems.is_empty() {
        return String::new();
    }
    let mut parts = vec!["[Cultivation systems]".to_string()];
    for system in systems {
        parts.push(format!("  * {}: {}", system.name, system.description));
        let ranks = system.ordered_ranks();
        let sequence: Vec<&str> = ranks.iter().map(|r| r.name.as_str()).collect();
        parts.push(format!("    ranks: {}", sequence.join(" -> ")));
        for rank in ranks.iter().filter(|r| !r.abilities.is_empty()) {
            parts.push(format!("    - {} traits: {}", rank.name, rank.abilities.join(", ")));
        }
    }
    parts.join("\n")
}

/// Output format rules for `level_update`, with examples from the world's systems.
pub fn level_format_guide(world: &WorldState) -> String {
    let mut examples: Vec<String> = world
        .world
        .cultivation_systems
        .iter()
        .filter(|s| !s.name.trim().is_empty())
        .filter_map(|s| {
            let first = s.ranks.first()?.name.trim();
            (!first.is_empty()).then(|| format!("{}·{}·初期", s.name.trim(), first))
        })
        .collect();
    if examples.is_empty() {
        examples = vec![
            "鬼道·怨灵境·后期".to_string(),
            "人道·灵台境·中期".to_string(),
            "武道·百战境·后期".to_string(),
        ];
    }
    examples.truncate(3);
    format!(
        "[Level format]\n\
         1. level_update must use the form system·major realm·stage, for example: {}\n\
         2. Never use coarse labels such as 人类/道士/武夫/将军/修士/鬼物/未知 as a level.",
        examples.join("；")
    )
}

/// Hard rules and the protagonist's current breakthrough task.
pub fn breakthrough_rules(world: &WorldState) -> String {
    let info = &world.world;
    let mut lines = Vec::new();

    let constraints = first_non_empty(&info.realm_upgrade_rules.hard_constraints, 4);
    if !constraints.is_empty() {
        lines.push(format!("hard rules: {}", constraints.join("；")));
    }
    for system in info.realm_upgrade_rules.systems.iter().take(3) {
        let Some(first) = system.transitions.first() else {
            continue;
        };
        if system.name.trim().is_empty() {
            continue;
        }
        lines.push(format!(
            "{} chain: {} steps, e.g. {}→{}",
            system.name.trim(),
            system.transitions.len(),
            first.from_level,
            first.to_level
        ));
    }

    if let Some(progression) = &info.protagonist_progression {
        let current = progression.current_level.trim();
        if !current.is_empty() {
            let mut line = format!("protagonist level: {current}");
            if !progression.next_level.trim().is_empty() {
                line.push_str(&format!(" | next: {}", progression.next_level.trim()));
            }
            lines.push(line);
        }
        if let Some(active) = progression.active_transition() {
            let missing = missing_requirements(active);
            if !missing.is_empty() {
                let shown: Vec<&str> = missing.iter().take(4).map(String::as_str).collect();
                lines.push(format!("protagonist blocked on: {}", shown.join("；")));
            }
        }
    }

    lines
        .into_iter()
        .map(|l| format!("- {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Advancement rules from the outline section and the world state.
pub fn realm_rules_context(outline: &str, world: &WorldState) -> String {
    let mut parts = Vec::new();
    let section = extract_outline_section(outline, REALM_OUTLINE_HEADING);
    if !section.is_empty() {
        parts.push(format!(
            "[Outline - advancement plan]\n{}",
            head_chars(&section, REALM_OUTLINE_CHARS)
        ));
    }
    let rules = breakthrough_rules(world);
    if !rules.is_empty() {
        parts.push(format!("[World state - advancement rules]\n{rules}"));
    }
    parts.join("\n\n")
}

pub fn style_prompt(style_ref: &str) -> String {
    if style_ref.trim().is_empty() {
        return String::new();
    }
    format!(
        "\n[Style reference]\nClosely imitate the sentence rhythm, paragraph length and description style of this text:\n{style_ref}\n"
    )
}
