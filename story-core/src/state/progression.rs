use serde::{Deserialize, Serialize};

/// Status words that count as satisfied, compared trimmed and lowercased.
const DONE_TOKENS: &[&str] = &[
    "done",
    "completed",
    "acquired",
    "fulfilled",
    "acquire",
    "已完成",
    "完成",
    "达成",
    "已获取",
    "获取",
    "获得",
];

/// Raw status text of a requirement.
///
/// Anything outside the done vocabulary means pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RequirementStatus(String);

impl RequirementStatus {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn pending() -> Self {
        Self::new("pending")
    }

    pub fn acquired() -> Self {
        Self::new("acquired")
    }

    pub fn done() -> Self {
        Self::new("done")
    }

    pub fn is_done(&self) -> bool {
        let normalized = self.0.trim().to_lowercase();
        !normalized.is_empty() && DONE_TOKENS.contains(&normalized.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A resource or condition gating a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    #[serde(default)]
    pub status: RequirementStatus,
    /// Extra phrases that count as evidence in free text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl Requirement {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: RequirementStatus::pending(),
            keywords: Vec::new(),
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }
}

/// One step in the fixed advancement plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from_level: String,
    pub to_level: String,
    #[serde(default)]
    pub required_resources: Vec<Requirement>,
    #[serde(default)]
    pub required_conditions: Vec<Requirement>,
    #[serde(default)]
    pub completed: bool,
}

impl Transition {
    pub fn new(from_level: impl Into<String>, to_level: impl Into<String>) -> Self {
        Self {
            from_level: from_level.into(),
            to_level: to_level.into(),
            required_resources: Vec::new(),
            required_conditions: Vec::new(),
            completed: false,
        }
    }

    pub fn with_resource(mut self, requirement: Requirement) -> Self {
        self.required_resources.push(requirement);
        self
    }

    pub fn with_condition(mut self, requirement: Requirement) -> Self {
        self.required_conditions.push(requirement);
        self
    }
}

/// Gated advancement plan for one character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProtagonistProgression {
    /// Gated character; empty gates whoever is updated.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub current_level: String,
    #[serde(default)]
    pub next_level: String,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// The only transition eligible to complete.
    #[serde(default)]
    pub active_transition_index: Option<usize>,
    #[serde(default)]
    pub resource_inventory: Vec<String>,
    #[serde(default)]
    pub history: Vec<String>,
}

impl ProtagonistProgression {
    pub fn new(name: impl Into<String>, current_level: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_level: current_level.into(),
            ..Default::default()
        }
    }

    /// Append a transition. The first one added becomes active.
    pub fn with_transition(mut self, transition: Transition) -> Self {
        if self.active_transition_index.is_none() && !transition.completed {
            self.active_transition_index = Some(self.transitions.len());
            self.next_level = transition.to_level.clone();
        }
        self.transitions.push(transition);
        self
    }

    /// Whether this plan gates updates for `character_name`.
    pub fn gates(&self, character_name: &str) -> bool {
        let name = self.name.trim();
        name.is_empty() || name == character_name
    }

    /// Resolve the active transition index, repairing a stale pointer.
    pub fn resolve_active_index(&mut self) -> Option<usize> {
        if let Some(idx) = self.active_transition_index {
            if idx < self.transitions.len() {
                return Some(idx);
            }
        }
        let idx = self.transitions.iter().position(|t| !t.completed);
        if idx.is_some() {
            self.active_transition_index = idx;
        }
        idx
    }

    pub fn active_transition(&self) -> Option<&Transition> {
        match self.active_transition_index {
            Some(idx) if idx < self.transitions.len() => self.transitions.get(idx),
            _ => self.transitions.iter().find(|t| !t.completed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_vocabulary() {
        for word in ["done", " Completed ", "ACQUIRED", "已获取", "达成", "acquire"] {
            assert!(RequirementStatus::new(word).is_done(), "{word}");
        }
        for word in ["", "missing", "pending", "未完成"] {
            assert!(!RequirementStatus::new(word).is_done(), "{word}");
        }
    }

    #[test]
    fn test_resolve_active_index_repairs_pointer() {
        let mut progression = ProtagonistProgression::new("hero", "a")
            .with_transition(Transition::new("a", "b"))
            .with_transition(Transition::new("b", "c"));
        progression.transitions[0].completed = true;
        progression.active_transition_index = Some(9);
        assert_eq!(progression.resolve_active_index(), Some(1));
        assert_eq!(progression.active_transition_index, Some(1));
    }

    #[test]
    fn test_gates() {
        let named = ProtagonistProgression::new("hero", "");
        assert!(named.gates("hero"));
        assert!(!named.gates("villain"));
        assert!(ProtagonistProgression::default().gates("anyone"));
    }
}
