//! Chapter lookup in the heading/bullet outline document.
//!
//! Volumes are `## title（第a-b章）`, phases `### title（第a-b章）` and
//! chapter items `- **第N章**: goal` or `- **N-M章**: goal`. Detail lines
//! may follow an item until the next heading or item.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref VOLUME: Regex =
        Regex::new(r"^##\s+(.+?)(?:（第(\d+)-(\d+)章）)?$").expect("valid regex");
    static ref PHASE: Regex =
        Regex::new(r"^###\s+(.+?)(?:（第(\d+)-(\d+)章）)?$").expect("valid regex");
    static ref ITEM: Regex =
        Regex::new(r"^\s*-\s*\*\*(?:第)?(\d+)(?:-(\d+))?章\*\*[:：](.+)$").expect("valid regex");
}

const OPEN_END: u32 = 9999;

/// Narrative unit governing one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutlineInfo {
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub phase: String,
    /// Empty when no chapter item matched.
    #[serde(default)]
    pub specific_goal: String,
}

fn parse_bound(m: Option<regex::Match<'_>>, default: u32) -> u32 {
    m.and_then(|m| m.as_str().parse().ok()).unwrap_or(default)
}

fn heading_covers(caps: &regex::Captures<'_>, chapter: u32) -> bool {
    let start = parse_bound(caps.get(2), 0);
    let end = parse_bound(caps.get(3), OPEN_END);
    (start..=end).contains(&chapter)
}

/// Resolve the volume, phase and goal for `chapter`. The first matching
/// item wins.
pub fn resolve_chapter(outline: &str, chapter: u32) -> OutlineInfo {
    let lines: Vec<&str> = outline.lines().collect();
    let mut volume = String::new();
    let mut phase = String::new();

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = VOLUME.captures(line) {
            if heading_covers(&caps, chapter) {
                volume = caps[1].trim().to_string();
                phase.clear();
            }
            continue;
        }
        if let Some(caps) = PHASE.captures(line) {
            if heading_covers(&caps, chapter) {
                phase = caps[1].trim().to_string();
            }
            continue;
        }
        let Some(caps) = ITEM.captures(line) else {
            continue;
        };

        let start = parse_bound(caps.get(1), 0);
        let end = parse_bound(caps.get(2), start);
        if !(start..=end).contains(&chapter) {
            continue;
        }

        let mut specific_goal = caps[3].trim().to_string();
        let details = item_details(&lines[idx + 1..]);
        if !details.is_empty() {
            specific_goal.push_str("\ndetails: ");
            specific_goal.push_str(&details.join("\n"));
        }
        return OutlineInfo {
            volume,
            phase,
            specific_goal,
        };
    }

    OutlineInfo {
        volume,
        phase,
        specific_goal: String::new(),
    }
}

fn item_details(rest: &[&str]) -> Vec<String> {
    let mut details = Vec::new();
    for raw in rest {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') || line.starts_with("- **") {
            break;
        }
        if line.starts_with('-') || line.starts_with('*') {
            details.push(line.trim_start_matches(['-', '*', ' ']).to_string());
        } else {
            details.push(line.to_string());
        }
    }
    details
}

/// The `##` section whose heading contains `keyword`, up to the next `## `.
pub fn extract_outline_section(outline: &str, keyword: &str) -> String {
    if outline.is_empty() || keyword.is_empty() {
        return String::new();
    }
    let lines: Vec<&str> = outline.lines().collect();
    let Some(start) = lines.iter().position(|l| {
        let l = l.trim();
        l.starts_with("##") && l.contains(keyword)
    }) else {
        return String::new();
    };
    let end = lines[start + 1..]
        .iter()
        .position(|l| l.trim().starts_with("## "))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());
    lines[start..end].join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTLINE: &str = "\
《阴井》大纲
========================================

## 境界晋升总纲
- 怨灵境后期需阴煞核心方可突破

## 第一卷：井底（第1-10章）
### 破封（第1-3章）
- **第1章**: 沈焱笙在井底苏醒
  - 封印松动
  * 将军鬼物察觉
- **第2-3章**：初探凛阴岗
### 立足（第4-10章）
- **第4章**: 与将军鬼物交手

## 第二卷：城隍（第11-20章）
- **第11章**: 入城
";

    #[test]
    fn test_resolve_item_with_details() {
        let info = resolve_chapter(OUTLINE, 1);
        assert_eq!(info.volume, "第一卷：井底");
        assert_eq!(info.phase, "破封");
        assert_eq!(
            info.specific_goal,
            "沈焱笙在井底苏醒\ndetails: 封印松动\n将军鬼物察觉"
        );
    }

    #[test]
    fn test_resolve_ranged_item() {
        let info = resolve_chapter(OUTLINE, 3);
        assert_eq!(info.phase, "破封");
        assert_eq!(info.specific_goal, "初探凛阴岗");
    }

    #[test]
    fn test_later_volume_resets_phase() {
        let info = resolve_chapter(OUTLINE, 11);
        assert_eq!(info.volume, "第二卷：城隍");
        assert_eq!(info.phase, "");
        assert_eq!(info.specific_goal, "入城");
    }

    #[test]
    fn test_unmatched_chapter_keeps_headings() {
        let info = resolve_chapter(OUTLINE, 7);
        assert_eq!(info.volume, "第一卷：井底");
        assert_eq!(info.phase, "立足");
        assert!(info.specific_goal.is_empty());
        assert_eq!(resolve_chapter(OUTLINE, 7), info);
    }

    #[test]
    fn test_open_ended_heading() {
        // the rules heading has no range, so it covers every chapter
        let info = resolve_chapter(OUTLINE, 50);
        assert_eq!(info.volume, "境界晋升总纲");
        assert!(info.specific_goal.is_empty());
    }

    #[test]
    fn test_extract_outline_section() {
        let section = extract_outline_section(OUTLINE, "境界晋升总纲");
        assert_eq!(section, "## 境界晋升总纲\n- 怨灵境后期需阴煞核心方可突破");
        assert!(extract_outline_section(OUTLINE, "missing").is_empty());
        assert!(extract_outline_section("", "x").is_empty());
    }
}
