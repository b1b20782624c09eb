//! Engine configuration.
//!
//! Every knob has a default and may be overridden from `STORY_*`
//! environment variables via [`StoryConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Requested depth of the plot planning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    /// Pick fast or deep per chapter.
    #[default]
    Auto,
    /// Compact plan, fewer tokens.
    Fast,
    /// Full storyboard plan.
    Deep,
}

impl ThinkingMode {
    /// Parse a mode name; unknown values fall back to `Auto`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "fast" => ThinkingMode::Fast,
            "deep" => ThinkingMode::Deep,
            _ => ThinkingMode::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingMode::Auto => "auto",
            ThinkingMode::Fast => "fast",
            ThinkingMode::Deep => "deep",
        }
    }
}

impl std::fmt::Display for ThinkingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for chapter generation and planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryConfig {
    /// Model name for prose generation.
    pub model_name: String,

    /// Model name for the planning and state-analysis passes.
    pub thinking_model: String,

    /// Whether to run the plot planning pass at all.
    pub enable_plot_thinking: bool,

    pub thinking_mode: ThinkingMode,

    /// Maximum number of cached plans.
    pub thinking_cache_size: usize,

    /// Tail of the previous chapter fed to the planner.
    pub thinking_previous_context_chars: usize,

    /// Tail of the world context fed to the planner.
    pub thinking_world_context_chars: usize,

    /// Root directory for project output.
    pub output_dir: PathBuf,

    /// Word target for a new chapter, before the overshoot margin.
    pub default_chapter_words: usize,

    pub default_outline_chapters: usize,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            model_name: "deepseek".to_string(),
            thinking_model: "glm-4-plus".to_string(),
            enable_plot_thinking: true,
            thinking_mode: ThinkingMode::Auto,
            thinking_cache_size: 20,
            thinking_previous_context_chars: 3000,
            thinking_world_context_chars: 2500,
            output_dir: PathBuf::from("./output"),
            default_chapter_words: 3000,
            default_outline_chapters: 10,
        }
    }
}

impl StoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `STORY_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model_name: env_string("STORY_MODEL", &defaults.model_name),
            thinking_model: env_string("STORY_THINKING_MODEL", &defaults.thinking_model),
            enable_plot_thinking: env_bool(
                "STORY_ENABLE_PLOT_THINKING",
                defaults.enable_plot_thinking,
            ),
            thinking_mode: std::env::var("STORY_THINKING_MODE")
                .map(|v| ThinkingMode::parse(&v))
                .unwrap_or(defaults.thinking_mode),
            thinking_cache_size: env_int("STORY_THINKING_CACHE_SIZE", defaults.thinking_cache_size),
            thinking_previous_context_chars: env_int(
                "STORY_THINKING_PREVIOUS_CONTEXT_CHARS",
                defaults.thinking_previous_context_chars,
            ),
            thinking_world_context_chars: env_int(
                "STORY_THINKING_WORLD_CONTEXT_CHARS",
                defaults.thinking_world_context_chars,
            ),
            output_dir: std::env::var("STORY_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            default_chapter_words: env_int(
                "STORY_DEFAULT_CHAPTER_WORDS",
                defaults.default_chapter_words,
            ),
            default_outline_chapters: env_int(
                "STORY_DEFAULT_OUTLINE_CHAPTERS",
                defaults.default_outline_chapters,
            ),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_name = model.into();
        self
    }

    pub fn with_thinking_model(mut self, model: impl Into<String>) -> Self {
        self.thinking_model = model.into();
        self
    }

    pub fn with_plot_thinking(mut self, enabled: bool) -> Self {
        self.enable_plot_thinking = enabled;
        self
    }

    pub fn with_thinking_mode(mut self, mode: ThinkingMode) -> Self {
        self.thinking_mode = mode;
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.thinking_cache_size = size;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_chapter_words(mut self, words: usize) -> Self {
        self.default_chapter_words = words;
        self
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read a boolean variable; unrecognized values keep the default.
pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value).unwrap_or(default),
        Err(_) => default,
    }
}

/// Read an integer variable; unparseable values keep the default.
pub(crate) fn env_int(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoryConfig::default();
        assert_eq!(config.model_name, "deepseek");
        assert_eq!(config.thinking_cache_size, 20);
        assert_eq!(config.default_chapter_words, 3000);
        assert_eq!(config.thinking_mode, ThinkingMode::Auto);
        assert!(config.enable_plot_thinking);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool(" YES "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_thinking_mode_parse() {
        assert_eq!(ThinkingMode::parse("Deep"), ThinkingMode::Deep);
        assert_eq!(ThinkingMode::parse(" fast"), ThinkingMode::Fast);
        assert_eq!(ThinkingMode::parse("turbo"), ThinkingMode::Auto);
    }

    #[test]
    fn test_env_int_fallback() {
        std::env::set_var("STORY_TEST_ENV_INT_BAD", "many");
        assert_eq!(env_int("STORY_TEST_ENV_INT_BAD", 7), 7);
        std::env::set_var("STORY_TEST_ENV_INT_GOOD", " 42 ");
        assert_eq!(env_int("STORY_TEST_ENV_INT_GOOD", 7), 42);
    }

    #[test]
    fn test_builder() {
        let config = StoryConfig::new()
            .with_model("glm")
            .with_plot_thinking(false)
            .with_cache_size(3);
        assert_eq!(config.model_name, "glm");
        assert!(!config.enable_plot_thinking);
        assert_eq!(config.thinking_cache_size, 3);
    }
}
