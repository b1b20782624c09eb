use serde::{Deserialize, Serialize};

/// Narrative role of a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum CharacterRole {
    Protagonist,
    Antagonist,
    #[default]
    Supporting,
}

impl CharacterRole {
    /// Parse a role label. Unknown labels are treated as supporting.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "主角" | "protagonist" => CharacterRole::Protagonist,
            "反派" | "antagonist" => CharacterRole::Antagonist,
            _ => CharacterRole::Supporting,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CharacterRole::Protagonist => "protagonist",
            CharacterRole::Antagonist => "antagonist",
            CharacterRole::Supporting => "supporting",
        }
    }
}

impl From<String> for CharacterRole {
    fn from(label: String) -> Self {
        CharacterRole::parse(&label)
    }
}

impl From<CharacterRole> for String {
    fn from(role: CharacterRole) -> Self {
        role.as_str().to_string()
    }
}

impl std::fmt::Display for CharacterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed relationship from one character to a named target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub target: String,
    pub relation_type: String,
    #[serde(default)]
    pub description: String,
}

/// One recorded action in a character's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ActionEntry {
    /// Chapter the action happened in; absent for legacy plain-text entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<u32>,
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub outcome: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub impact: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ActionEntry {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn in_chapter(mut self, chapter: u32) -> Self {
        self.chapter = Some(chapter);
        self
    }

    /// Composite identity used for de-duplication. Tags are capped at 4.
    pub(crate) fn dedupe_key(&self) -> (Option<u32>, &str, &str, &str, &str, &str, &str, Vec<&str>) {
        (
            self.chapter,
            self.action.trim(),
            self.reason.trim(),
            self.outcome.trim(),
            self.impact.trim(),
            self.location.trim(),
            self.target.trim(),
            self.tags.iter().map(|t| t.trim()).take(4).collect(),
        )
    }

    /// Short single-line rendering used in prompts and derived memories.
    pub fn format_line(&self) -> String {
        let mut parts = Vec::new();
        if !self.action.trim().is_empty() {
            parts.push(self.action.trim().to_string());
        }
        if !self.reason.trim().is_empty() {
            parts.push(format!("motive:{}", self.reason.trim()));
        }
        if !self.outcome.trim().is_empty() {
            parts.push(format!("outcome:{}", self.outcome.trim()));
        }
        if !self.impact.trim().is_empty() {
            parts.push(format!("impact:{}", self.impact.trim()));
        }
        let body = parts.join("；");
        if body.is_empty() {
            return body;
        }
        match self.chapter {
            Some(chapter) => format!("第{chapter}章:{body}"),
            None => body,
        }
    }
}

/// A tracked character. `name` is the primary key within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub role: CharacterRole,
    #[serde(default)]
    pub appeared: bool,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub desire: String,
    /// Free-text rank, conventionally `system·major·minor`.
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub abilities: Vec<String>,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub current_goal: String,
    #[serde(default)]
    pub action_tendency: String,
    #[serde(default)]
    pub physical_state: String,
    #[serde(default)]
    pub mental_state: String,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub relationship_history: Vec<String>,
    #[serde(default)]
    pub current_status: Vec<String>,
    #[serde(default)]
    pub status_tags: Vec<String>,
    #[serde(default)]
    pub action_history: Vec<ActionEntry>,
    #[serde(default)]
    pub memory_short_term: Vec<String>,
    #[serde(default)]
    pub memory_long_term: Vec<String>,
    #[serde(default)]
    pub memory_beliefs: Vec<String>,
}

impl Character {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: CharacterRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn is_protagonist(&self) -> bool {
        self.role == CharacterRole::Protagonist
    }

    pub fn relationship(&self, target: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.target == target)
    }

    /// Level for display, with a placeholder when unset.
    pub fn display_level(&self) -> &str {
        if self.level.trim().is_empty() {
            "凡人"
        } else {
            &self.level
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(CharacterRole::parse("主角"), CharacterRole::Protagonist);
        assert_eq!(CharacterRole::parse("Antagonist"), CharacterRole::Antagonist);
        assert_eq!(CharacterRole::parse("配角"), CharacterRole::Supporting);
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&CharacterRole::Protagonist).unwrap();
        assert_eq!(json, "\"protagonist\"");
        let role: CharacterRole = serde_json::from_str("\"反派\"").unwrap();
        assert_eq!(role, CharacterRole::Antagonist);
    }

    #[test]
    fn test_action_format_line() {
        let mut entry = ActionEntry::new("借阴井余气压住魂核裂纹").in_chapter(3);
        entry.reason = "防止魂力溃散".to_string();
        entry.outcome = "短时稳定".to_string();
        assert_eq!(
            entry.format_line(),
            "第3章:借阴井余气压住魂核裂纹；motive:防止魂力溃散；outcome:短时稳定"
        );
        assert_eq!(ActionEntry::new("  ").format_line(), "");
    }
}
