//! The per-project world-state document.
//!
//! [`WorldState`] is loaded, mutated in memory and written back as a whole.
//! Model-produced JSON never reaches these types directly; it passes through
//! the normalizers in [`normalize`] first.

mod character;
pub mod normalize;
mod progression;
mod update;
mod world;

pub use character::{ActionEntry, Character, CharacterRole, Relationship};
pub use progression::{ProtagonistProgression, Requirement, RequirementStatus, Transition};
pub use update::{
    BreakthroughProgress, CharacterUpdate, MemoryUpdates, RelationshipUpdate, StateUpdate,
    WorldUpdates,
};
pub use world::{
    CultivationRank, CultivationSystem, Location, RealmSystemRules, RealmUpgradeRules,
    TransitionSummary, WorldInfo, WorldState,
};

/// Drop leading items so that at most `cap` remain.
pub(crate) fn keep_tail<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        items.drain(..items.len() - cap);
    }
}

/// Trim, drop empties and remove duplicates, keeping first-seen order.
pub(crate) fn dedupe_keep_order<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for value in values {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
            continue;
        }
        result.push(trimmed.to_string());
    }
    result
}

/// Append `extra` to `target`, dedupe, then keep the most recent `cap` (0 = unbounded).
pub(crate) fn merge_dedupe(target: &mut Vec<String>, extra: &[String], cap: usize) {
    let merged = dedupe_keep_order(target.iter().chain(extra.iter()));
    *target = merged;
    if cap > 0 {
        keep_tail(target, cap);
    }
}

/// Append trimmed non-empty lines and keep the most recent `cap`.
pub(crate) fn push_ring(target: &mut Vec<String>, extra: &[String], cap: usize) {
    target.extend(
        extra
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    );
    keep_tail(target, cap);
}

/// First `n` characters of `text`.
pub(crate) fn head_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

/// Last `n` characters of `text`.
pub(crate) fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    match text.char_indices().nth(count - n) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_tail() {
        let mut items: Vec<u32> = (0..50).collect();
        keep_tail(&mut items, 40);
        assert_eq!(items.len(), 40);
        assert_eq!(items[0], 10);
        assert_eq!(*items.last().unwrap(), 49);
    }

    #[test]
    fn test_dedupe_keep_order() {
        let values = vec![" b", "a", "b", "", "c", "a "];
        assert_eq!(dedupe_keep_order(values), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_merge_dedupe_keeps_newest() {
        let mut target: Vec<String> = (0..30).map(|i| format!("m{i}")).collect();
        merge_dedupe(&mut target, &["m5".to_string(), "new".to_string()], 30);
        assert_eq!(target.len(), 30);
        assert_eq!(target.last().unwrap(), "new");
        assert_eq!(target[0], "m1");
    }

    #[test]
    fn test_char_slicing() {
        assert_eq!(tail_chars("沈焱笙说话", 2), "说话");
        assert_eq!(tail_chars("ab", 5), "ab");
        assert_eq!(head_chars("沈焱笙说话", 3), "沈焱笙");
    }
}
