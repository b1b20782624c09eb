use super::{ChapterPreparation, GenerationMode};
use crate::state::tail_chars;

pub const GENERATION_SYSTEM_PROMPT: &str = "You are a veteran web-fiction author. \
     Your prose is fluent and tightly paced, your dialogue gives every character a voice, \
     and you are good at suspense and hooks. Output the content directly. \
     When a plot plan is given, follow it strictly.";

pub const STATE_SYSTEM_PROMPT: &str = "You are a precise state analyst who tracks characters, \
     relationships and status changes. Output JSON only.";

const APPEND_TAIL_CHARS: usize = 2000;
const STRICT_TAIL_CHARS: usize = 3000;
const LOOSE_TAIL_CHARS: usize = 1500;
const TITLE_SCAN_LINES: usize = 5;

/// How tightly a new chapter is tied to the previous ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// Continue directly from the last 3000 characters.
    Strict,
    /// Use the last 1500 characters as a recap.
    Loose,
}

/// Title from the first lines of generated text, or "Chapter N".
///
/// A line qualifies when it contains "章" and a colon; the title is the text
/// after the first colon.
pub fn extract_title(content: &str, chapter: u32) -> String {
    for line in content.lines().take(TITLE_SCAN_LINES) {
        if !line.contains('章') {
            continue;
        }
        let split = line.split_once('：').or_else(|| line.split_once(':'));
        if let Some((_, title)) = split {
            let title = title.trim().trim_end_matches(['#', '*']).trim();
            return if title.is_empty() {
                format!("Chapter {chapter}")
            } else {
                title.to_string()
            };
        }
    }
    format!("Chapter {chapter}")
}

fn rules_block(realm_rules: &str) -> String {
    if realm_rules.trim().is_empty() {
        return String::new();
    }
    format!(
        "\n[Advancement constraints - mandatory]\n{realm_rules}\n\
         If the protagonist has not met the conditions for the next realm, do not let them break through; \
         write only preparation, obstacles or failure.\n"
    )
}

/// Generation prompt for a prepared chapter.
///
/// The same preparation and contexts always yield the same prompt.
pub fn build_generation_prompt(
    prep: &ChapterPreparation,
    style_prompt: &str,
    thinking_context: &str,
    action_context: &str,
    continuity: Continuity,
) -> String {
    let outline = &prep.outline_info;
    let rules = rules_block(&prep.realm_rules_context);

    if prep.mode == GenerationMode::Append {
        return format!(
            "Keep writing the chapter below until it is over 3000 words.\n\n\
             {world}\n{style_prompt}\n\
             [Volume progress] {volume}\n[Current phase] {phase}\n[Chapter guidance] {goal}\n\n\
             {thinking_context}\n{action_context}\n{rules}\n\n\
             [Current chapter] 第{chapter}章《{title}》\n\
             [Current length] {len} words\n\
             [Still needed] about {target} words\n\n\
             [Existing text]\n{existing}\n\n\
             Continue directly without repeating existing text:\n",
            world = prep.world_context,
            volume = outline.volume,
            phase = outline.phase,
            goal = outline.specific_goal,
            chapter = prep.chapter_num,
            title = prep.chapter_title,
            len = prep.chapter_len,
            target = prep.target_words,
            existing = tail_chars(&prep.chapter_content, APPEND_TAIL_CHARS),
        );
    }

    let (previous_block, requirements, planning_line) = match continuity {
        Continuity::Strict => {
            let previous = if prep.chapter_content.is_empty() {
                "(start of the story; write chapter 1 from the outline)"
            } else {
                tail_chars(&prep.chapter_content, STRICT_TAIL_CHARS)
            };
            (
                format!(
                    "[End of the previous chapter - this chapter must continue from here]\n------\n{previous}\n------\n\n\
                     Important: connect naturally to the ending above. Do not repeat it; \
                     start directly from the next scene or moment."
                ),
                "[Requirements]\n1. Length: 3000-4000 words\n\
                 2. Characters act according to their personalities and the storyboard\n\
                 3. Pacing follows the storyboard's tension curve\n\
                 4. Dialogue has personality and follows the scripted lines and tone\n\
                 5. Give the chapter a title first",
                "(Follow the storyboard above strictly so the plot advances as planned)",
            )
        }
        Continuity::Loose => {
            let previous = if prep.chapter_content.is_empty() {
                "the story begins"
            } else {
                tail_chars(&prep.chapter_content, LOOSE_TAIL_CHARS)
            };
            (
                format!("[Previously]\n{previous}"),
                "[Requirements]\n1. Length: 3000-4000 words\n\
                 2. Characters act according to their personalities and the plan above\n\
                 3. Pacing: setup, conflict, small climax, hook\n\
                 4. Dialogue has personality\n\
                 5. Give the chapter a title first",
                "(Follow the plan above so the plot keeps to the outline's rhythm)",
            )
        }
    };

    format!(
        "Write the complete chapter {chapter} of the novel (3000-4000 words).\n\n\
         {world}\n{style_prompt}\n\
         [Plot guidance - do not deviate]\n\
         1. Volume goal: {volume}\n2. Current phase: {phase}\n3. This chapter:\n{goal}\n\n\
         {thinking_context}\n{action_context}\n{rules}\n\n\
         {planning_line}\n\n{previous_block}\n\n{requirements}\n\n\
         Output format:\n## 第{chapter}章：[title]\n\n[body]\n",
        chapter = prep.chapter_num,
        world = prep.world_context,
        volume = outline.volume,
        phase = outline.phase,
        goal = outline.specific_goal,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_title() {
        assert_eq!(extract_title("## 第3章：井底破封\n\n正文", 3), "井底破封");
        assert_eq!(extract_title("第4章: Night Walk", 4), "Night Walk");
        assert_eq!(extract_title("## 第5章：\n正文", 5), "Chapter 5");
        assert_eq!(extract_title("没有标题\n正文", 6), "Chapter 6");
        assert_eq!(extract_title("a\nb\nc\nd\ne\n第7章：太迟", 7), "Chapter 7");
    }

    fn prep(mode: GenerationMode, previous: &str) -> ChapterPreparation {
        ChapterPreparation {
            mode,
            chapter_num: 2,
            chapter_title: "开端".into(),
            chapter_content: previous.into(),
            chapter_len: 1200,
            target_words: 2300,
            realm_rules_context: "- protagonist level: 鬼道·怨灵境·后期".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_strict_and_loose_tails() {
        let previous = format!("{}END", "字".repeat(4000));
        let new_chapter = prep(GenerationMode::New, &previous);
        let strict = build_generation_prompt(&new_chapter, "", "", "", Continuity::Strict);
        let loose = build_generation_prompt(&new_chapter, "", "", "", Continuity::Loose);
        assert!(strict.contains(&format!("{}END", "字".repeat(2997))));
        assert!(!strict.contains(&format!("{}END", "字".repeat(2998))));
        assert!(loose.contains(&format!("{}END", "字".repeat(1497))));
        assert!(!loose.contains(&format!("{}END", "字".repeat(1498))));
        assert!(strict.contains("[Advancement constraints - mandatory]"));
        assert!(strict.contains("## 第2章：[title]"));
    }

    #[test]
    fn test_append_prompt_and_determinism() {
        let append = prep(GenerationMode::Append, "井底阴气翻涌");
        let first = build_generation_prompt(&append, "", "plan", "actions", Continuity::Strict);
        let second = build_generation_prompt(&append, "", "plan", "actions", Continuity::Strict);
        assert_eq!(first, second);
        assert!(first.contains("[Current chapter] 第2章《开端》"));
        assert!(first.contains("[Still needed] about 2300 words"));
        assert!(first.contains("井底阴气翻涌"));
    }
}
