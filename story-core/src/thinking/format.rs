//! Text renderings of a [`ThinkingPlan`].

use super::plan::{Shot, ThinkingPlan, WritingGuidance};
use crate::config::ThinkingMode;
use crate::state::head_chars;

fn push_if(lines: &mut Vec<String>, label: &str, value: &str) {
    if !value.is_empty() {
        lines.push(format!("{label}{value}"));
    }
}

fn rule(width: usize) -> String {
    "=".repeat(width)
}

/// Short progress summary emitted after planning.
pub fn format_summary(plan: &ThinkingPlan) -> String {
    let mut lines = vec!["storyboard ready:".to_string()];
    if let Some(mode) = plan.mode() {
        lines.push(format!("   mode: {mode}"));
    }
    let bp = &plan.chapter_blueprint;
    push_if(&mut lines, "   title: ", &bp.title_suggestion);
    push_if(&mut lines, "   theme: ", &bp.theme);

    let carry = &plan.plot_analysis.pre_chapter_context.immediate_consequences;
    if !carry.is_empty() {
        lines.push(format!("   carries over: {}...", head_chars(carry, 20)));
    }

    if !bp.storyboard.is_empty() {
        lines.push(format!("   shots: {}", bp.storyboard.len()));
        let dialogue: usize = bp.storyboard.iter().map(|s| s.dialogue_script.len()).sum();
        let beats: usize = bp.storyboard.iter().map(|s| s.action_beats.len()).sum();
        if dialogue > 0 {
            lines.push(format!("   dialogue: {dialogue}"));
        }
        if beats > 0 {
            lines.push(format!("   action beats: {beats}"));
        }
    }
    if !bp.conflict_escalation.is_empty() {
        let kinds: Vec<&str> = bp
            .conflict_escalation
            .iter()
            .take(2)
            .map(|c| {
                if c.conflict_type.is_empty() {
                    "?"
                } else {
                    c.conflict_type.as_str()
                }
            })
            .collect();
        lines.push(format!("   conflicts: {}", kinds.join(", ")));
    }
    if !bp.key_moments.is_empty() {
        lines.push(format!("   key moments: {}", bp.key_moments.len()));
    }
    lines.join("\n")
}

/// Plan block injected into the generation prompt.
pub fn format_for_generation(plan: &ThinkingPlan) -> String {
    if plan.mode() == Some(ThinkingMode::Fast) {
        return format_fast(plan);
    }

    let mut lines = vec!["[Storyboard - follow it when writing]".to_string()];
    let analysis = &plan.plot_analysis;
    let pre = &analysis.pre_chapter_context;
    if !pre.is_empty() {
        lines.push("\n[Continuity requirements]".to_string());
        push_if(&mut lines, "- previous ending: ", &pre.previous_ending);
        push_if(&mut lines, "- must happen now: ", &pre.immediate_consequences);
        push_if(&mut lines, "- emotional carryover: ", &pre.character_emotional_carryover);
        lines.push("(the opening scene must answer the previous ending directly)".to_string());
    }

    if !analysis.interaction_logic_check.is_empty() {
        lines.push("\n[Interaction logic]".to_string());
        for check in &analysis.interaction_logic_check {
            lines.push(format!(
                "- {} ({}): {}",
                check.characters.join(" & "),
                or_unknown(&check.relation_status),
                check.interaction_guidance
            ));
        }
        lines.push("(characters meeting for the first time must not talk like old friends)".to_string());
    }

    let bp = &plan.chapter_blueprint;
    push_if(&mut lines, "\nchapter title: ", &bp.title_suggestion);
    push_if(&mut lines, "theme: ", &bp.theme);
    push_if(&mut lines, "opening hook: ", &bp.opening_hook);

    if !bp.storyboard.is_empty() {
        lines.push(format!("\n{}", rule(40)));
        lines.push("[Shots] write in this order".to_string());
        lines.push(rule(40));
        for shot in &bp.storyboard {
            render_shot(&mut lines, shot);
        }
    }

    if !bp.character_journey.is_empty() {
        lines.push("\n[Character journeys]".to_string());
        for arc in &bp.character_journey {
            lines.push(format!("  {}:", arc.name));
            push_if(&mut lines, "    start: ", &arc.start_state);
            push_if(&mut lines, "    trigger: ", &arc.trigger_event);
            push_if(&mut lines, "    inner conflict: ", &arc.internal_conflict);
            push_if(&mut lines, "    decision: ", &arc.decision);
            push_if(&mut lines, "    end: ", &arc.end_state);
            push_if(&mut lines, "    growth: ", &arc.growth_delta);
            push_if(&mut lines, "    note: ", &arc.summary);
        }
    }

    if !bp.conflict_escalation.is_empty() {
        lines.push("\n[Conflict escalation]".to_string());
        for c in &bp.conflict_escalation {
            lines.push(format!(
                "  [{}] {}: {}",
                c.stage,
                c.conflict_type,
                c.parties.join(" vs ")
            ));
            push_if(&mut lines, "    stakes: ", &c.stakes);
            push_if(&mut lines, "    beat: ", &c.beat_description);
        }
    }

    if !bp.key_moments.is_empty() {
        lines.push("\n[Key moments] these must be written:".to_string());
        for m in &bp.key_moments {
            lines.push(format!("  - [{}] {}", or_unknown(&m.moment_type), m.description));
            push_if(&mut lines, "    impact: ", &m.impact);
        }
    }

    if !bp.foreshadowing.is_empty() {
        lines.push("\n[Foreshadowing]".to_string());
        for f in &bp.foreshadowing {
            lines.push(format!("  - {}", f.hint));
            push_if(&mut lines, "    plant by: ", &f.how_to_plant);
        }
    }

    let cliff = &bp.cliffhanger;
    if !cliff.is_empty() {
        lines.push("\n[Chapter-end hook]".to_string());
        push_if(&mut lines, "  type: ", &cliff.kind);
        if !cliff.final_line.is_empty() {
            lines.push(format!("  final line: \"{}\"", cliff.final_line));
        }
        push_if(&mut lines, "  design: ", &cliff.content);
        push_if(&mut lines, "  reader asks: ", &cliff.reader_hook);
    }

    render_guidance(&mut lines, &plan.writing_guidance, "\n[Writing guidance]", "  ");
    lines.join("\n")
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "?"
    } else {
        value
    }
}

fn render_shot(lines: &mut Vec<String>, shot: &Shot) {
    lines.push(format!(
        "\nshot {}: [{}]",
        or_unknown(&shot.shot_number),
        if shot.location.is_empty() { "unknown" } else { &shot.location }
    ));
    push_if(lines, "   type: ", &shot.shot_type);
    if !shot.time.is_empty() {
        lines.push(format!("   time: {} | mood: {}", shot.time, shot.atmosphere));
    }

    if !shot.characters_on_screen.is_empty() {
        lines.push("   blocking:".to_string());
        for c in &shot.characters_on_screen {
            lines.push(format!("      - {}: {} {}", c.name, c.position, c.posture).trim_end().to_string());
            if !c.expression.is_empty() || !c.emotion.is_empty() {
                lines.push(format!("        face: {} | inside: {}", c.expression, c.emotion));
            }
            if !c.inner_thought.is_empty() {
                lines.push(format!("        thinks: \"{}\"", c.inner_thought));
            }
        }
    }

    if !shot.action_beats.is_empty() {
        lines.push("   beats:".to_string());
        for b in &shot.action_beats {
            lines.push(format!(
                "      [{}] {}: {}",
                or_unknown(&b.beat),
                or_unknown(&b.actor),
                b.action
            ));
            push_if(lines, "          reaction: ", &b.reaction);
        }
    }

    if !shot.dialogue_script.is_empty() {
        lines.push("   dialogue:".to_string());
        for d in &shot.dialogue_script {
            lines.push(format!("      {} ({}): \"{}\"", or_unknown(&d.speaker), d.tone, d.line));
            push_if(lines, "        subtext: ", &d.subtext);
            push_if(lines, "        action: ", &d.action_during);
        }
    }

    let s = &shot.sensory_details;
    let senses: Vec<String> = [("sight", &s.visual), ("sound", &s.audio), ("smell", &s.smell)]
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}: {v}"))
        .collect();
    if !senses.is_empty() {
        lines.push(format!("   senses: {}", senses.join(" | ")));
    }

    if let Some(tension) = shot.tension_level {
        lines.push(format!(
            "   tension: {tension}/10 | target words: ~{}",
            shot.word_count.unwrap_or(500)
        ));
    }
    push_if(lines, "   purpose: ", &shot.purpose);
}

fn render_guidance(lines: &mut Vec<String>, guidance: &WritingGuidance, header: &str, indent: &str) {
    if guidance.is_empty() {
        return;
    }
    if !header.is_empty() {
        lines.push(header.to_string());
    }
    let mut parts = Vec::new();
    if !guidance.tone.is_empty() {
        parts.push(format!("tone: {}", guidance.tone));
    }
    if !guidance.pacing.is_empty() {
        parts.push(format!("pacing: {}", guidance.pacing));
    }
    if !guidance.focus.is_empty() {
        parts.push(format!("focus: {}", guidance.focus));
    }
    if !parts.is_empty() {
        lines.push(format!("{indent}{}", parts.join(" | ")));
    }
    if !guidance.style_notes.is_empty() {
        lines.push(format!("{indent}style: {}", guidance.style_notes));
    }
    if !guidance.highlight.is_empty() {
        lines.push(format!("{indent}highlight: {}", guidance.highlight.join(", ")));
    }
    if !guidance.avoid.is_empty() {
        lines.push(format!("{indent}avoid: {}", guidance.avoid.join(", ")));
    }
}

/// Compact rendering for fast plans.
fn format_fast(plan: &ThinkingPlan) -> String {
    let mut lines = vec!["[Quick plan - follow it]".to_string()];
    let analysis = &plan.plot_analysis;
    let pre = &analysis.pre_chapter_context;
    if !pre.is_empty() {
        lines.push(format!("previous ending: {}", pre.previous_ending));
        lines.push(format!("open by handling: {}", pre.immediate_consequences));
        push_if(&mut lines, "emotional carryover: ", &pre.character_emotional_carryover);
    }
    if !analysis.interaction_logic_check.is_empty() {
        lines.push("interaction logic:".to_string());
        for check in analysis.interaction_logic_check.iter().take(3) {
            lines.push(format!(
                "- {}({}): {}",
                check.characters.join(" & "),
                or_unknown(&check.relation_status),
                check.interaction_guidance
            ));
        }
    }

    let bp = &plan.chapter_blueprint;
    push_if(&mut lines, "title: ", &bp.title_suggestion);
    push_if(&mut lines, "theme: ", &bp.theme);
    push_if(&mut lines, "opening hook: ", &bp.opening_hook);

    if !bp.storyboard.is_empty() {
        lines.push("shots:".to_string());
        for shot in bp.storyboard.iter().take(5) {
            lines.push(format!(
                "- shot {} @ {}: {}",
                or_unknown(&shot.shot_number),
                if shot.location.is_empty() { "unknown" } else { &shot.location },
                shot.purpose
            ));
            for b in shot.action_beats.iter().take(2) {
                lines.push(format!(
                    "  beat[{}] {}: {}",
                    or_unknown(&b.beat),
                    or_unknown(&b.actor),
                    b.action
                ));
            }
            for d in shot.dialogue_script.iter().take(2) {
                lines.push(format!("  line {}({}): {}", or_unknown(&d.speaker), d.tone, d.line));
            }
        }
    }

    if !bp.key_moments.is_empty() {
        lines.push("key moments:".to_string());
        for m in bp.key_moments.iter().take(3) {
            lines.push(format!("- {}", m.description));
        }
    }
    push_if(&mut lines, "chapter-end hook: ", &bp.cliffhanger.reader_hook);

    let g = &plan.writing_guidance;
    if !g.tone.is_empty() || !g.pacing.is_empty() {
        lines.push(format!("tone: {} | pacing: {}", g.tone, g.pacing));
    }
    if !g.highlight.is_empty() {
        lines.push(format!("highlight: {}", g.highlight.join(", ")));
    }
    if !g.avoid.is_empty() {
        lines.push(format!("avoid: {}", g.avoid.join(", ")));
    }
    lines.join("\n")
}

/// Full rendering for human review before generation.
pub fn format_full_plan_display(plan: Option<&ThinkingPlan>) -> String {
    let Some(plan) = plan else {
        return "(no plan)".to_string();
    };
    let mut lines = Vec::new();

    let analysis = &plan.plot_analysis;
    if *analysis != Default::default() {
        lines.push(rule(50));
        lines.push("[Plot analysis]".to_string());
        lines.push(rule(50));
        let pre = &analysis.pre_chapter_context;
        if !pre.is_empty() {
            lines.push("continuity:".to_string());
            push_if(&mut lines, "  - previous ending: ", &pre.previous_ending);
            push_if(&mut lines, "  - must happen: ", &pre.immediate_consequences);
            push_if(&mut lines, "  - emotional carryover: ", &pre.character_emotional_carryover);
            lines.push("-".repeat(30));
        }
        if !analysis.interaction_logic_check.is_empty() {
            lines.push("interactions:".to_string());
            for check in &analysis.interaction_logic_check {
                lines.push(format!(
                    "  - [{}] {}",
                    or_unknown(&check.relation_status),
                    check.characters.join(" & ")
                ));
                if !check.interaction_guidance.is_empty() {
                    lines.push(format!(
                        "    guidance: {}...",
                        head_chars(&check.interaction_guidance, 30)
                    ));
                }
            }
            lines.push("-".repeat(30));
        }
        push_if(&mut lines, "situation: ", &analysis.current_situation);
        if !analysis.unresolved_threads.is_empty() {
            lines.push(format!("open threads: {}", analysis.unresolved_threads.join(", ")));
        }
    }

    let bp = &plan.chapter_blueprint;
    if *bp != Default::default() {
        lines.push(String::new());
        lines.push(rule(50));
        lines.push("[Storyboard]".to_string());
        lines.push(rule(50));
        push_if(&mut lines, "chapter title: ", &bp.title_suggestion);
        push_if(&mut lines, "theme: ", &bp.theme);
        push_if(&mut lines, "opening hook: ", &bp.opening_hook);

        if !bp.storyboard.is_empty() {
            lines.push("\nshots:".to_string());
            for shot in &bp.storyboard {
                lines.push(format!(
                    "\n  [shot {}] {}",
                    or_unknown(&shot.shot_number),
                    or_unknown(&shot.location)
                ));
                push_if(&mut lines, "    type: ", &shot.shot_type);
                if !shot.time.is_empty() {
                    lines.push(format!("    time: {} | mood: {}", shot.time, shot.atmosphere));
                }
                if !shot.characters_on_screen.is_empty() {
                    lines.push("    cast:".to_string());
                    for c in shot.characters_on_screen.iter().take(3) {
                        lines.push(format!(
                            "      - {}: {} | {} | {}",
                            c.name, c.posture, c.expression, c.emotion
                        ));
                    }
                }
                if !shot.action_beats.is_empty() {
                    lines.push("    beats:".to_string());
                    for b in shot.action_beats.iter().take(3) {
                        lines.push(format!(
                            "      [{}] {}: {}",
                            or_unknown(&b.beat),
                            or_unknown(&b.actor),
                            b.action
                        ));
                    }
                }
                if !shot.dialogue_script.is_empty() {
                    lines.push("    dialogue:".to_string());
                    for d in shot.dialogue_script.iter().take(2) {
                        lines.push(format!(
                            "      {}({}): \"{}...\"",
                            or_unknown(&d.speaker),
                            d.tone,
                            head_chars(&d.line, 30)
                        ));
                    }
                }
                if let Some(tension) = shot.tension_level {
                    lines.push(format!(
                        "    tension: {tension}/10 | ~{} words",
                        shot.word_count.unwrap_or(500)
                    ));
                }
            }
        }

        if !bp.character_journey.is_empty() {
            lines.push("\njourneys:".to_string());
            for arc in &bp.character_journey {
                lines.push(format!("  {}:", arc.name));
                for (label, value) in [
                    ("start", &arc.start_state),
                    ("decision", &arc.decision),
                    ("end", &arc.end_state),
                ] {
                    if !value.is_empty() {
                        lines.push(format!("    {label}: {}...", head_chars(value, 50)));
                    }
                }
                push_if(&mut lines, "    note: ", &arc.summary);
            }
        }

        if !bp.conflict_escalation.is_empty() {
            lines.push("\nconflicts:".to_string());
            for c in &bp.conflict_escalation {
                lines.push(format!(
                    "  [{}] {}: {}",
                    c.stage,
                    c.conflict_type,
                    c.parties.join(" vs ")
                ));
            }
        }

        if !bp.key_moments.is_empty() {
            lines.push("\nkey moments:".to_string());
            for m in &bp.key_moments {
                lines.push(format!(
                    "  - [{}] {}...",
                    or_unknown(&m.moment_type),
                    head_chars(&m.description, 50)
                ));
            }
        }

        if !bp.foreshadowing.is_empty() {
            lines.push("\nforeshadowing:".to_string());
            for f in bp.foreshadowing.iter().take(3) {
                lines.push(format!(
                    "  - {} (pays off in chapter {})",
                    f.hint,
                    or_unknown(&f.payoff_chapter)
                ));
            }
        }

        let cliff = &bp.cliffhanger;
        if !cliff.is_empty() {
            lines.push("\nchapter-end hook:".to_string());
            push_if(&mut lines, "  type: ", &cliff.kind);
            if !cliff.final_line.is_empty() {
                lines.push(format!("  final line: \"{}\"", cliff.final_line));
            }
            if !cliff.content.is_empty() {
                lines.push(format!("  design: {}...", head_chars(&cliff.content, 60)));
            }
            if !cliff.reader_hook.is_empty() {
                lines.push(format!("  hook: {}...", head_chars(&cliff.reader_hook, 50)));
            }
        }
    }

    if !plan.writing_guidance.is_empty() {
        lines.push(String::new());
        lines.push(rule(50));
        lines.push("[Writing guidance]".to_string());
        lines.push(rule(50));
        render_guidance(&mut lines, &plan.writing_guidance, "", "");
    }

    lines.push(rule(50));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thinking::plan::{ActionBeat, Shot};

    fn deep_plan() -> ThinkingPlan {
        let mut plan = ThinkingPlan::fallback(3, "沈焱笙破封而出", ThinkingMode::Deep);
        plan.chapter_blueprint.title_suggestion = "井底".to_string();
        plan.chapter_blueprint.storyboard = vec![Shot {
            shot_number: "1".to_string(),
            location: "阴井".to_string(),
            action_beats: vec![ActionBeat {
                beat: "1".to_string(),
                actor: "沈焱笙".to_string(),
                action: "撕开封印".to_string(),
                reaction: String::new(),
            }],
            tension_level: Some(8),
            ..Default::default()
        }];
        plan
    }

    #[test]
    fn test_deep_generation_block() {
        let text = format_for_generation(&deep_plan());
        assert!(text.starts_with("[Storyboard - follow it when writing]"));
        assert!(text.contains("shot 1: [阴井]"));
        assert!(text.contains("[1] 沈焱笙: 撕开封印"));
        assert!(text.contains("tension: 8/10 | target words: ~500"));
        assert!(text.contains("tone: follow the outline | pacing: normal | focus: plot progression"));
    }

    #[test]
    fn test_fast_generation_block() {
        let mut plan = deep_plan();
        plan.meta.thinking_mode = Some(ThinkingMode::Fast);
        let text = format_for_generation(&plan);
        assert!(text.starts_with("[Quick plan - follow it]"));
        assert!(text.contains("- shot 1 @ 阴井: "));
        assert!(text.contains("tone: follow the outline | pacing: normal"));
    }

    #[test]
    fn test_summary_and_display() {
        let plan = deep_plan();
        let summary = format_summary(&plan);
        assert!(summary.contains("mode: deep"));
        assert!(summary.contains("shots: 1"));
        assert!(summary.contains("action beats: 1"));

        let display = format_full_plan_display(Some(&plan));
        assert!(display.contains("[Storyboard]"));
        assert!(display.contains("[Writing guidance]"));
        assert!(display.ends_with(&"=".repeat(50)));
        assert_eq!(format_full_plan_display(None), "(no plan)");
    }
}
