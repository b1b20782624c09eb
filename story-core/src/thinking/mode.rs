use crate::config::ThinkingMode;

/// Previous chapters longer than this get the compact plan.
const LONG_PREVIOUS_CHARS: usize = 7000;
const OPENING_CHAPTERS: u32 = 3;

/// Pick fast or deep planning for one chapter, with the reason.
pub fn resolve_thinking_mode(
    configured: ThinkingMode,
    is_append: bool,
    chapter: u32,
    previous_content: &str,
) -> (ThinkingMode, &'static str) {
    match configured {
        ThinkingMode::Fast | ThinkingMode::Deep => (configured, "configured explicitly"),
        ThinkingMode::Auto if is_append => (ThinkingMode::Fast, "appending to the current chapter"),
        ThinkingMode::Auto if chapter <= OPENING_CHAPTERS => {
            (ThinkingMode::Deep, "opening chapters set the foundation")
        }
        ThinkingMode::Auto if previous_content.chars().count() > LONG_PREVIOUS_CHARS => {
            (ThinkingMode::Fast, "long previous chapter")
        }
        ThinkingMode::Auto => (ThinkingMode::Deep, "regular new chapter"),
    }
}

/// Tail of `text` no longer than `limit` characters; `limit` is floored at 500.
pub fn clip_tail(text: &str, limit: usize) -> &str {
    crate::state::tail_chars(text, limit.max(500))
}
