//! File-backed project storage.
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/reference.txt                 optional style reference
//! <base>/<project>/大纲.txt             outline
//! <base>/<project>/world_state.json    world state, written whole
//! <base>/<project>/<name>.json          pipeline documents
//! <base>/<project>/chapters/NNN_title.txt
//! ```

use crate::state::{head_chars, WorldState};
use crate::word_count::count_words;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

const OUTLINE_FILE: &str = "大纲.txt";
const WORLD_STATE_FILE: &str = "world_state.json";
const STYLE_REFERENCE_FILE: &str = "reference.txt";
const CHAPTERS_DIR: &str = "chapters";
const OUTLINE_MAX_CHARS: usize = 12000;
const STYLE_REFERENCE_MAX_CHARS: usize = 2000;
const HEADER_RULE_WIDTH: usize = 40;

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{what} not found for project '{project}'")]
    NotFound { what: &'static str, project: String },
}

/// The most recent chapter of a project.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatestChapter {
    /// 0 when the project has no chapters.
    pub number: u32,
    pub title: String,
    /// Chapter text without the file header.
    pub content: String,
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_name: String,
    pub project_dir: PathBuf,
    pub chapter_count: usize,
    pub total_characters: usize,
    pub chapters: Vec<String>,
}

/// Directory name for a project: alphanumerics, spaces, `_` and `-` are
/// kept and spaces become underscores.
pub fn safe_project_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let safe = kept.trim().replace(' ', "_");
    if safe.is_empty() {
        "unnamed_project".to_string()
    } else {
        safe
    }
}

/// File-name form of a chapter title.
pub fn safe_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-' | '，' | '。'))
        .collect();
    let safe = kept.trim();
    if safe.is_empty() {
        "untitled".to_string()
    } else {
        safe.to_string()
    }
}

/// Split `NNN_title.txt` into number and title.
fn parse_chapter_file_name(name: &str) -> Option<(u32, String)> {
    let stem = name.strip_suffix(".txt").unwrap_or(name);
    let (number, title) = stem.split_once('_')?;
    Some((number.parse().ok()?, title.to_string()))
}

/// Drop the `第N章 title` header and rule written by [`ProjectStore::save_chapter`].
fn strip_chapter_header(text: &str) -> &str {
    let mut lines = text.splitn(3, '\n');
    let (Some(first), Some(rule)) = (lines.next(), lines.next()) else {
        return text;
    };
    let is_rule = !rule.trim().is_empty() && rule.trim().chars().all(|c| c == '=');
    if first.starts_with('第') && is_rule {
        lines.next().unwrap_or("").trim_start_matches('\n')
    } else {
        text
    }
}

/// Project storage rooted at a base directory.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    base_dir: PathBuf,
}

impl ProjectStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.base_dir.join(safe_project_name(project))
    }

    fn chapters_dir(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(CHAPTERS_DIR)
    }

    async fn ensure_project_dir(&self, project: &str) -> Result<PathBuf, StoreError> {
        let dir = self.project_dir(project);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Write a chapter file and return its path.
    pub async fn save_chapter(
        &self,
        project: &str,
        number: u32,
        title: &str,
        content: &str,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.chapters_dir(project);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{number:03}_{}.txt", safe_title(title)));
        let body = format!(
            "第{number}章 {title}\n{}\n\n{content}",
            "=".repeat(HEADER_RULE_WIDTH)
        );
        fs::write(&path, body).await?;
        tracing::info!(project, chapter = number, path = %path.display(), "chapter saved");
        Ok(path)
    }

    /// Chapter file names, sorted.
    pub async fn list_chapters(&self, project: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.chapters_dir(project);
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".txt") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Raw text of one chapter file.
    pub async fn read_chapter(&self, project: &str, file_name: &str) -> Result<String, StoreError> {
        Ok(fs::read_to_string(self.chapters_dir(project).join(file_name)).await?)
    }

    /// The last chapter in file-name order.
    ///
    /// A file name that cannot be parsed takes the list length as its number
    /// and "untitled" as its title. An unreadable file yields empty content.
    pub async fn latest_chapter(&self, project: &str) -> Result<LatestChapter, StoreError> {
        let chapters = self.list_chapters(project).await?;
        let Some(latest) = chapters.last() else {
            return Ok(LatestChapter::default());
        };
        let (number, title) = parse_chapter_file_name(latest)
            .unwrap_or_else(|| (chapters.len() as u32, "untitled".to_string()));

        let content = match self.read_chapter(project, latest).await {
            Ok(text) => strip_chapter_header(&text).to_string(),
            Err(e) => {
                tracing::warn!(project, file = %latest, error = %e, "chapter unreadable");
                String::new()
            }
        };
        let word_count = count_words(&content);
        Ok(LatestChapter {
            number,
            title,
            content,
            word_count,
        })
    }

    /// Load the world state, or `None` when it has not been created.
    pub async fn load_world_state(&self, project: &str) -> Result<Option<WorldState>, StoreError> {
        let path = self.project_dir(project).join(WORLD_STATE_FILE);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        let value: serde_json::Value = serde_json::from_str(&content)?;
        Ok(Some(WorldState::from_value(&value)))
    }

    pub async fn require_world_state(&self, project: &str) -> Result<WorldState, StoreError> {
        self.load_world_state(project)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: "world state",
                project: project.to_string(),
            })
    }

    /// Write the whole world state document.
    pub async fn save_world_state(&self, project: &str, world: &WorldState) -> Result<PathBuf, StoreError> {
        let path = self.ensure_project_dir(project).await?.join(WORLD_STATE_FILE);
        let content = serde_json::to_string_pretty(world)?;
        fs::write(&path, content).await?;
        tracing::debug!(project, characters = world.characters.len(), "world state saved");
        Ok(path)
    }

    /// Outline text, truncated; empty when no outline was saved.
    pub async fn load_outline(&self, project: &str) -> Result<String, StoreError> {
        let path = self.project_dir(project).join(OUTLINE_FILE);
        if !fs::try_exists(&path).await? {
            return Ok(String::new());
        }
        let text = fs::read_to_string(&path).await?;
        Ok(head_chars(&text, OUTLINE_MAX_CHARS))
    }

    pub async fn require_outline(&self, project: &str) -> Result<String, StoreError> {
        let outline = self.load_outline(project).await?;
        if outline.trim().is_empty() {
            return Err(StoreError::NotFound {
                what: "outline",
                project: project.to_string(),
            });
        }
        Ok(outline)
    }

    pub async fn save_outline(&self, project: &str, outline: &str) -> Result<PathBuf, StoreError> {
        let path = self.ensure_project_dir(project).await?.join(OUTLINE_FILE);
        let body = format!(
            "《{project}》大纲\n{}\n\n{outline}",
            "=".repeat(HEADER_RULE_WIDTH)
        );
        fs::write(&path, body).await?;
        Ok(path)
    }

    /// Shared style reference, truncated; empty when absent.
    pub async fn load_style_reference(&self) -> Result<String, StoreError> {
        let path = self.base_dir.join(STYLE_REFERENCE_FILE);
        if !fs::try_exists(&path).await? {
            return Ok(String::new());
        }
        let text = fs::read_to_string(&path).await?;
        Ok(head_chars(&text, STYLE_REFERENCE_MAX_CHARS))
    }

    /// Load a JSON document saved with [`save_document`](Self::save_document).
    pub async fn load_document<T: DeserializeOwned>(
        &self,
        project: &str,
        name: &str,
    ) -> Result<Option<T>, StoreError> {
        let path = self.project_dir(project).join(format!("{name}.json"));
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub async fn save_document<T: Serialize>(
        &self,
        project: &str,
        name: &str,
        document: &T,
    ) -> Result<PathBuf, StoreError> {
        let path = self
            .ensure_project_dir(project)
            .await?
            .join(format!("{name}.json"));
        fs::write(&path, serde_json::to_string_pretty(document)?).await?;
        Ok(path)
    }

    /// Concatenate every chapter into `<project>_full.txt`.
    pub async fn export_full_novel(&self, project: &str) -> Result<PathBuf, StoreError> {
        let chapters = self.list_chapters(project).await?;
        if chapters.is_empty() {
            return Err(StoreError::NotFound {
                what: "chapters",
                project: project.to_string(),
            });
        }

        let mut full = format!("《{project}》\n\n{}\n\n", "=".repeat(50));
        for name in &chapters {
            full.push_str(&self.read_chapter(project, name).await?);
            full.push_str(&format!("\n\n{}\n\n", "-".repeat(HEADER_RULE_WIDTH)));
        }

        let path = self
            .project_dir(project)
            .join(format!("{}_full.txt", safe_project_name(project)));
        fs::write(&path, full).await?;
        tracing::info!(project, chapters = chapters.len(), "novel exported");
        Ok(path)
    }

    pub async fn project_info(&self, project: &str) -> Result<ProjectInfo, StoreError> {
        let chapters = self.list_chapters(project).await?;
        let mut total_characters = 0;
        for name in &chapters {
            total_characters += self.read_chapter(project, name).await?.chars().count();
        }
        Ok(ProjectInfo {
            project_name: project.to_string(),
            project_dir: self.project_dir(project),
            chapter_count: chapters.len(),
            total_characters,
            chapters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Character;
    use tempfile::TempDir;

    #[test]
    fn test_safe_names() {
        assert_eq!(safe_project_name("鬼道 长生"), "鬼道_长生");
        assert_eq!(safe_project_name("../"), "unnamed_project");
        assert_eq!(safe_title("井底：破封！"), "井底破封");
        assert_eq!(safe_title("？"), "untitled");
    }

    #[test]
    fn test_parse_chapter_file_name() {
        assert_eq!(parse_chapter_file_name("007_井底破封.txt"), Some((7, "井底破封".to_string())));
        assert_eq!(parse_chapter_file_name("notes.txt"), None);
        assert_eq!(parse_chapter_file_name("x_y.txt"), None);
    }

    #[tokio::test]
    async fn test_chapter_round_trip_strips_header() {
        let dir = TempDir::new().unwrap();
        let store = ProjectStore::new(dir.path());
        store.save_chapter("demo", 1, "开端", "第一段").await.unwrap();
        store.save_chapter("demo", 2, "井底", "阴气翻涌").await.unwrap();

        assert_eq!(store.list_chapters("demo").await.unwrap(), vec!["001_开端.txt", "002_井底.txt"]);
        let latest = store.latest_chapter("demo").await.unwrap();
        assert_eq!(latest.number, 2);
        assert_eq!(latest.title, "井底");
        assert_eq!(latest.content, "阴气翻涌");
        assert_eq!(latest.word_count, 4);
    }

    #[tokio::test]
    async fn test_empty_project() {
        let dir = TempDir::new().unwrap();
        let store = ProjectStore::new(dir.path());
        assert_eq!(store.latest_chapter("none").await.unwrap(), LatestChapter::default());
        assert!(store.load_world_state("none").await.unwrap().is_none());
        assert!(matches!(
            store.require_outline("none").await,
            Err(StoreError::NotFound { what: "outline", .. })
        ));
        assert!(matches!(
            store.require_world_state("none").await,
            Err(StoreError::NotFound { what: "world state", .. })
        ));
        assert!(store.load_style_reference().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_world_state_and_outline() {
        let dir = TempDir::new().unwrap();
        let store = ProjectStore::new(dir.path());
        let world = WorldState::new().with_character(Character::new("沈焱笙"));
        store.save_world_state("demo", &world).await.unwrap();
        assert_eq!(store.require_world_state("demo").await.unwrap(), world);

        store.save_outline("demo", "## 第一卷（第1-10章）").await.unwrap();
        let outline = store.require_outline("demo").await.unwrap();
        assert!(outline.starts_with("《demo》大纲"));
        assert!(outline.contains("## 第一卷"));
    }

    #[tokio::test]
    async fn test_export_and_info() {
        let dir = TempDir::new().unwrap();
        let store = ProjectStore::new(dir.path());
        assert!(store.export_full_novel("demo").await.is_err());
        store.save_chapter("demo", 1, "开端", "正文").await.unwrap();
        let path = store.export_full_novel("demo").await.unwrap();
        let exported = std::fs::read_to_string(path).unwrap();
        assert!(exported.starts_with("《demo》"));
        assert!(exported.contains("第1章 开端"));

        let info = store.project_info("demo").await.unwrap();
        assert_eq!(info.chapter_count, 1);
        assert!(info.total_characters > 0);
    }
}
