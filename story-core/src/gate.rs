//! Resource-gated level advancement.
//!
//! A character named by the world's [`ProtagonistProgression`] may only move
//! to the `to_level` of the active transition, and only once every resource
//! and condition on that transition is satisfied. Everyone else advances
//! freely.

use crate::state::{
    dedupe_keep_order, head_chars, push_ring, Character, CharacterUpdate, ProtagonistProgression,
    Requirement, RequirementStatus, Transition,
};

/// Labels the model uses when it collapses a rank into a generic word.
const COARSE_LEVELS: &[&str] = &[
    "人类", "道士", "武夫", "将军", "修士", "鬼物", "未知", "凡人", "human", "cultivator",
    "unknown", "mortal",
];

const RANK_TOKENS: &[&str] = &["境", "Realm", "realm"];

const HISTORY_CAP: usize = 20;
const EVIDENCE_CONTENT_CHARS: usize = 1500;
const MISSING_SHOWN: usize = 4;

/// Whether `level` names a concrete rank rather than a generic label.
pub fn is_granular_level(level: &str) -> bool {
    let text = level.trim();
    if text.is_empty() {
        return false;
    }
    if text.contains('·') {
        return true;
    }
    if RANK_TOKENS.iter().any(|t| text.contains(t)) && text.chars().count() >= 4 {
        return true;
    }
    let lowered = text.to_lowercase();
    !COARSE_LEVELS.iter().any(|c| *c == text || *c == lowered)
}

/// Comparison key: qualifiers in parentheses dropped, at most three segments.
pub fn normalize_level_key(level: &str) -> String {
    let text = level.trim();
    let cut = text
        .find(|c| c == '（' || c == '(')
        .map(|idx| &text[..idx])
        .unwrap_or(text);
    cut.split('·')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join("·")
}

/// Evidence reported for one character in one chapter.
#[derive(Debug, Clone, Default)]
pub struct ProgressSignals {
    pub resources: Vec<String>,
    pub conditions: Vec<String>,
    pub mental_state: String,
    pub physical_state: String,
    pub content: String,
}

impl ProgressSignals {
    pub fn from_update(update: &CharacterUpdate, chapter_content: &str) -> Self {
        let progress = update.breakthrough_progress.clone().unwrap_or_default();
        Self {
            resources: dedupe_keep_order(
                progress
                    .resources_acquired
                    .iter()
                    .chain(update.new_items.iter()),
            ),
            conditions: dedupe_keep_order(
                progress
                    .conditions_completed
                    .iter()
                    .chain(update.status_lines().iter()),
            ),
            mental_state: update.mental_state.clone(),
            physical_state: update.physical_state.clone(),
            content: head_chars(chapter_content, EVIDENCE_CONTENT_CHARS),
        }
    }

    fn evidence(&self) -> String {
        self.resources
            .iter()
            .chain(self.conditions.iter())
            .map(String::as_str)
            .chain([
                self.mental_state.as_str(),
                self.physical_state.as_str(),
                self.content.as_str(),
            ])
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of a requested level change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GateDecision {
    pub allowed: bool,
    /// Why the request was refused.
    pub reason: Option<String>,
    /// The request was a generic label and was dropped without evaluation.
    pub ignored: bool,
    pub progress_log: Vec<String>,
}

impl GateDecision {
    fn allow(progress_log: Vec<String>) -> Self {
        Self {
            allowed: true,
            progress_log,
            ..Default::default()
        }
    }

    fn block(reason: String, progress_log: Vec<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            ignored: false,
            progress_log,
        }
    }
}

fn requirement_matches(req: &Requirement, explicit: &[String], evidence: &str) -> bool {
    let name = req.name.trim();
    if name.is_empty() {
        return false;
    }
    explicit.iter().any(|e| e.trim() == name)
        || evidence.contains(name)
        || req
            .keywords
            .iter()
            .map(|k| k.trim())
            .any(|k| !k.is_empty() && evidence.contains(k))
}

/// Record explicit resources and mark satisfied requirements on the
/// transition at `index`. Already satisfied requirements are left alone.
pub fn mark_transition_progress(
    progression: &mut ProtagonistProgression,
    index: usize,
    signals: &ProgressSignals,
) -> Vec<String> {
    let mut logs = Vec::new();

    for resource in &signals.resources {
        if !progression.resource_inventory.contains(resource) {
            progression.resource_inventory.push(resource.clone());
            logs.push(format!("resource stored: {resource}"));
        }
    }

    let Some(transition) = progression.transitions.get_mut(index) else {
        return logs;
    };
    let evidence = signals.evidence();

    for req in transition.required_resources.iter_mut() {
        if !req.is_done() && requirement_matches(req, &signals.resources, &evidence) {
            req.status = RequirementStatus::acquired();
            logs.push(format!("breakthrough resource acquired: {}", req.name));
        }
    }
    for req in transition.required_conditions.iter_mut() {
        if !req.is_done() && requirement_matches(req, &signals.conditions, &evidence) {
            req.status = RequirementStatus::done();
            logs.push(format!("breakthrough condition met: {}", req.name));
        }
    }
    logs
}

/// Unsatisfied requirements as `Resource:<name>` / `Condition:<name>`.
pub fn missing_requirements(transition: &Transition) -> Vec<String> {
    let resources = transition
        .required_resources
        .iter()
        .filter(|r| !r.name.trim().is_empty() && !r.is_done())
        .map(|r| format!("Resource:{}", r.name));
    let conditions = transition
        .required_conditions
        .iter()
        .filter(|r| !r.name.trim().is_empty() && !r.is_done())
        .map(|r| format!("Condition:{}", r.name));
    resources.chain(conditions).collect()
}

fn complete_transition(
    progression: &mut ProtagonistProgression,
    index: usize,
    requested: &str,
) -> String {
    let transition = &mut progression.transitions[index];
    transition.completed = true;
    let line = format!(
        "breakthrough: {} -> {}",
        transition.from_level, transition.to_level
    );
    progression.current_level = requested.to_string();
    push_ring(&mut progression.history, std::slice::from_ref(&line), HISTORY_CAP);

    match progression
        .transitions
        .iter()
        .enumerate()
        .skip(index + 1)
        .find(|(_, t)| !t.completed)
    {
        Some((next, t)) => {
            progression.next_level = t.to_level.clone();
            progression.active_transition_index = Some(next);
        }
        None => {
            progression.next_level.clear();
            progression.active_transition_index = None;
        }
    }
    line
}

/// Decide whether `character` may move to `requested`.
///
/// Progress marking runs before the decision, so evidence in a rejected
/// update still counts toward the next attempt.
pub fn evaluate_level_update(
    progression: Option<&mut ProtagonistProgression>,
    character: &Character,
    requested: &str,
    signals: &ProgressSignals,
) -> GateDecision {
    let requested = requested.trim();
    if !is_granular_level(requested) {
        return GateDecision {
            allowed: false,
            reason: None,
            ignored: true,
            progress_log: Vec::new(),
        };
    }

    let Some(progression) = progression else {
        return GateDecision::allow(Vec::new());
    };
    if !progression.gates(&character.name) {
        return GateDecision::allow(Vec::new());
    }

    let Some(index) = progression.resolve_active_index() else {
        progression.current_level = requested.to_string();
        return GateDecision::allow(vec![format!("level synced: {requested}")]);
    };

    let mut logs = mark_transition_progress(progression, index, signals);

    let transition = &progression.transitions[index];
    let expected = normalize_level_key(&transition.to_level);
    let requested_key = normalize_level_key(requested);
    let current_source = if progression.current_level.trim().is_empty() {
        character.level.as_str()
    } else {
        progression.current_level.as_str()
    };
    let current_key = normalize_level_key(current_source);

    if !requested_key.is_empty() && requested_key == current_key {
        return GateDecision::allow(logs);
    }
    if !expected.is_empty() && expected != requested_key {
        let reason = format!(
            "progression path is fixed; next level must be {}",
            transition.to_level
        );
        return GateDecision::block(reason, logs);
    }

    let missing = missing_requirements(transition);
    if !missing.is_empty() {
        let shown: Vec<&str> = missing.iter().take(MISSING_SHOWN).map(String::as_str).collect();
        let reason = format!("breakthrough requirements unmet: {}", shown.join("; "));
        return GateDecision::block(reason, logs);
    }

    logs.push(complete_transition(progression, index, requested));
    tracing::info!(character = %character.name, level = %requested, "breakthrough completed");
    GateDecision::allow(logs)
}

/// Progress marking for an update that reports breakthrough evidence
/// without asking for a level change.
pub fn record_progress(
    progression: Option<&mut ProtagonistProgression>,
    character_name: &str,
    signals: &ProgressSignals,
) -> Vec<String> {
    let Some(progression) = progression else {
        return Vec::new();
    };
    if !progression.gates(character_name) {
        return Vec::new();
    }
    match progression.resolve_active_index() {
        Some(index) => mark_transition_progress(progression, index, signals),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BreakthroughProgress, CharacterRole};

    const START: &str = "鬼道·怨灵境·后期（井底破封后）";
    const NEXT: &str = "鬼道·厉鬼境·初期";

    fn hero() -> Character {
        Character::new("沈焱笙")
            .with_role(CharacterRole::Protagonist)
            .with_level(START)
    }

    fn plan() -> ProtagonistProgression {
        ProtagonistProgression::new("沈焱笙", START)
            .with_transition(
                Transition::new("鬼道·怨灵境·后期", NEXT)
                    .with_resource(Requirement::pending("阴煞核心").with_keywords(&["煞核"]))
                    .with_resource(Requirement::pending("城隍香火"))
                    .with_condition(Requirement::pending("斩杀将军鬼物")),
            )
            .with_transition(Transition::new(NEXT, "鬼道·厉鬼境·中期"))
    }

    fn satisfied_signals() -> ProgressSignals {
        let mut update = CharacterUpdate::new("沈焱笙");
        update.breakthrough_progress = Some(BreakthroughProgress {
            resources_acquired: vec!["阴煞核心".into(), "城隍香火".into()],
            conditions_completed: vec!["斩杀将军鬼物".into()],
        });
        ProgressSignals::from_update(&update, "")
    }

    #[test]
    fn test_granular_levels() {
        assert!(is_granular_level("鬼道·怨灵境·后期"));
        assert!(is_granular_level("筑基境中期"));
        assert!(is_granular_level("Golden Core Realm"));
        assert!(is_granular_level("something specific"));
        for coarse in ["", "  ", "凡人", "修士", "Human", "MORTAL", "unknown"] {
            assert!(!is_granular_level(coarse), "{coarse}");
        }
    }

    #[test]
    fn test_normalize_level_key() {
        assert_eq!(normalize_level_key(START), "鬼道·怨灵境·后期");
        assert_eq!(normalize_level_key("a·b·c·d"), "a·b·c");
        assert_eq!(normalize_level_key(" a ·· b (note)"), "a·b");
    }

    #[test]
    fn test_blocked_breakthrough_keeps_level() {
        let mut progression = plan();
        let character = hero();
        for _ in 0..3 {
            let decision = evaluate_level_update(
                Some(&mut progression),
                &character,
                NEXT,
                &ProgressSignals::default(),
            );
            assert!(!decision.allowed);
            let reason = decision.reason.unwrap();
            assert!(reason.starts_with("breakthrough requirements unmet: "));
            assert!(reason.contains("Resource:阴煞核心"));
            assert!(reason.contains("Condition:斩杀将军鬼物"));
        }
        assert_eq!(progression.current_level, START);
        assert_eq!(progression.active_transition_index, Some(0));
        assert!(progression.history.is_empty());
    }

    #[test]
    fn test_wrong_target_is_rejected() {
        let mut progression = plan();
        let decision = evaluate_level_update(
            Some(&mut progression),
            &hero(),
            "鬼道·鬼王境·初期",
            &satisfied_signals(),
        );
        assert!(!decision.allowed);
        assert_eq!(
            decision.reason.as_deref(),
            Some("progression path is fixed; next level must be 鬼道·厉鬼境·初期")
        );
        // evidence still counts
        assert!(missing_requirements(&progression.transitions[0]).is_empty());
    }

    #[test]
    fn test_satisfied_breakthrough_advances_once() {
        let mut progression = plan();
        let character = hero();
        let decision =
            evaluate_level_update(Some(&mut progression), &character, NEXT, &satisfied_signals());
        assert!(decision.allowed);
        assert!(decision
            .progress_log
            .contains(&"breakthrough: 鬼道·怨灵境·后期 -> 鬼道·厉鬼境·初期".to_string()));
        assert_eq!(progression.current_level, NEXT);
        assert_eq!(progression.active_transition_index, Some(1));
        assert_eq!(progression.next_level, "鬼道·厉鬼境·中期");
        assert!(progression.transitions[0].completed);

        // same level again is a confirmation, not a second completion
        let again =
            evaluate_level_update(Some(&mut progression), &character, NEXT, &satisfied_signals());
        assert!(again.allowed);
        assert_eq!(progression.history.len(), 1);
        assert_eq!(progression.active_transition_index, Some(1));
    }

    #[test]
    fn test_progress_marking_is_idempotent() {
        let mut progression = plan();
        let signals = satisfied_signals();
        let first = mark_transition_progress(&mut progression, 0, &signals);
        let second = mark_transition_progress(&mut progression, 0, &signals);
        assert!(first.contains(&"resource stored: 阴煞核心".to_string()));
        assert!(first.contains(&"breakthrough condition met: 斩杀将军鬼物".to_string()));
        assert!(second.is_empty());
        assert_eq!(progression.resource_inventory, vec!["阴煞核心", "城隍香火"]);
    }

    #[test]
    fn test_keyword_evidence_from_content() {
        let mut progression = plan();
        let signals = ProgressSignals {
            content: "他从井底挖出一枚煞核，握在掌心。".to_string(),
            ..Default::default()
        };
        let logs = mark_transition_progress(&mut progression, 0, &signals);
        assert_eq!(logs, vec!["breakthrough resource acquired: 阴煞核心"]);
        assert!(progression.transitions[0].required_resources[0].is_done());
        assert!(!progression.transitions[0].required_resources[1].is_done());
    }

    #[test]
    fn test_coarse_request_ignored_without_mutation() {
        let mut progression = plan();
        let before = progression.clone();
        let decision =
            evaluate_level_update(Some(&mut progression), &hero(), "凡人", &satisfied_signals());
        assert!(decision.ignored);
        assert!(!decision.allowed);
        assert_eq!(progression, before);
    }

    #[test]
    fn test_ungated_characters_advance_freely() {
        let mut progression = plan();
        let npc = Character::new("将军鬼物");
        let decision = evaluate_level_update(
            Some(&mut progression),
            &npc,
            "鬼道·鬼王境·初期",
            &ProgressSignals::default(),
        );
        assert!(decision.allowed);
        assert!(decision.progress_log.is_empty());
        let free = evaluate_level_update(None, &hero(), NEXT, &ProgressSignals::default());
        assert!(free.allowed);
    }

    #[test]
    fn test_exhausted_plan_syncs_level() {
        let mut progression = ProtagonistProgression::new("沈焱笙", START);
        let decision = evaluate_level_update(
            Some(&mut progression),
            &hero(),
            NEXT,
            &ProgressSignals::default(),
        );
        assert!(decision.allowed);
        assert_eq!(decision.progress_log, vec![format!("level synced: {NEXT}")]);
        assert_eq!(progression.current_level, NEXT);
    }

    #[test]
    fn test_blank_requirement_does_not_block() {
        let mut progression = ProtagonistProgression::new("沈焱笙", START).with_transition(
            Transition::new("鬼道·怨灵境·后期", NEXT)
                .with_resource(Requirement::pending(""))
                .with_condition(Requirement::pending("  ")),
        );
        assert!(missing_requirements(&progression.transitions[0]).is_empty());

        let decision = evaluate_level_update(
            Some(&mut progression),
            &hero(),
            NEXT,
            &ProgressSignals::default(),
        );
        assert!(decision.allowed);
        assert_eq!(progression.current_level, NEXT);
    }
}
