use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// What a session appears to be waiting on, judged from its recent output.
/// Callers strip control sequences first (`strip_control_sequences`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitingState {
    Question,
    Permission,
    Confirmation,
}

lazy_static! {
    // "❯ 1. Yes" style arrow-navigated menu option.
    static ref ARROW_MENU: Regex = Regex::new(r"(?m)^\s*❯\s*\d+[.)]\s").unwrap();
    // ">"-highlighted numbered line.
    static ref HIGHLIGHTED_NUMBERED: Regex = Regex::new(r"(?m)^\s*>\s*\d+[.)]\s").unwrap();
    // Any numbered list line.
    static ref NUMBERED_LINE: Regex = Regex::new(r"(?m)^\s*\d+[.)]\s").unwrap();
    static ref ALLOW: Regex = Regex::new(r"(?i)\ballow\b").unwrap();
    static ref DENY: Regex = Regex::new(r"(?i)\bdeny\b|\bdon't allow\b|\bdo not allow\b").unwrap();
    static ref CONFIRM_AFFORDANCE: Regex =
        Regex::new(r"\((?i:y/n)\)|\[y/N\]|\[Y/n\]|\((?i:yes/no)\)").unwrap();
    // Horizontal rules and bullet lines used as section separators.
    static ref SECTION_SEPARATOR: Regex =
        Regex::new(r"(?m)^\s*(?:[─—═_=*]{3,}|-{3,})\s*$|^\s*[•·]\s").unwrap();
    // A bare prompt glyph, optionally boxed.
    static ref IDLE_PROMPT: Regex = Regex::new(r"(?m)^\s*[│|]?\s*[>❯]\s*$").unwrap();
    static ref QUESTION_KEYWORD: Regex = Regex::new(
        r"(?i)\b(what|which|how|would you|could you|should i|do you want|prefer|choose|select|confirm|proceed)\b",
    )
    .unwrap();
}

const IDLE_HINTS: &[&str] = &[
    "? for shortcuts",
    "esc to interrupt",
    "ctrl+c to exit",
    "bypassing permissions",
    "auto-accept edits",
];

const NOISE_PHRASES: &[&str] = &[
    "(esc to interrupt)",
    "? for shortcuts",
    "tokens used",
    "thinking…",
    "thinking...",
];

const MIN_TRAILING_QUESTION_LEN: usize = 12;

/// Classify stripped output into a waiting-state category. First match wins:
/// arrow menus and numbered selections read as questions, allow/deny pairs
/// as permission prompts, y/n affordances as confirmations, and only then is
/// the trailing text inspected for natural-language questions.
pub fn detect_waiting_state(recent: &str) -> Option<WaitingState> {
    if ARROW_MENU.is_match(recent) {
        return Some(WaitingState::Question);
    }
    if HIGHLIGHTED_NUMBERED.is_match(recent) && NUMBERED_LINE.find_iter(recent).count() >= 2 {
        return Some(WaitingState::Question);
    }
    if ALLOW.is_match(recent) && DENY.is_match(recent) {
        return Some(WaitingState::Permission);
    }
    if CONFIRM_AFFORDANCE.is_match(recent) {
        return Some(WaitingState::Confirmation);
    }

    let section = last_meaningful_section(recent)?;
    let cleaned = strip_noise(&section);
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return None;
    }
    if QUESTION_KEYWORD.is_match(trimmed) {
        return Some(WaitingState::Question);
    }
    if trimmed.ends_with('?') && trimmed.len() >= MIN_TRAILING_QUESTION_LEN {
        return Some(WaitingState::Question);
    }
    None
}

/// Detect the first-run idle prompt: onboarding hints, or a bare prompt
/// glyph after a separator. Used only to know when a session is ready to
/// receive its first prompt.
pub fn is_ready_for_initial_input(output: &str) -> bool {
    let lower = output.to_lowercase();
    if lower.contains("welcome to") || lower.contains("/help for help") {
        return true;
    }
    let Some(separator) = SECTION_SEPARATOR.find_iter(output).last() else {
        return false;
    };
    IDLE_PROMPT.is_match(&output[separator.end()..])
}

fn last_meaningful_section(text: &str) -> Option<String> {
    let mut sections: Vec<&str> = Vec::new();
    let mut start = 0;
    for sep in SECTION_SEPARATOR.find_iter(text) {
        sections.push(&text[start..sep.start()]);
        start = sep.end();
    }
    sections.push(&text[start..]);

    for section in sections.into_iter().rev() {
        let trimmed = section.trim();
        if trimmed.is_empty() {
            continue;
        }
        if IDLE_PROMPT.is_match(trimmed) && trimmed.lines().count() <= 1 {
            continue;
        }
        let lower = trimmed.to_lowercase();
        if IDLE_HINTS.iter().any(|hint| lower.contains(hint)) && trimmed.lines().count() <= 2 {
            continue;
        }
        return Some(trimmed.to_string());
    }
    None
}

fn strip_noise(section: &str) -> String {
    let mut out = section.to_string();
    for phrase in NOISE_PHRASES {
        let lower = out.to_lowercase();
        if let Some(idx) = lower.find(phrase) {
            out.replace_range(idx..idx + phrase.len(), "");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrow_menu_is_question() {
        let text = "Pick an option:\n❯ 1. Create a new file\n  2. Edit existing\n";
        assert_eq!(detect_waiting_state(text), Some(WaitingState::Question));
    }

    #[test]
    fn highlighted_numbered_list_is_question() {
        let text = "> 1. apply the patch\n  2. skip this change\n";
        assert_eq!(detect_waiting_state(text), Some(WaitingState::Question));
    }

    #[test]
    fn single_numbered_line_is_not_a_menu() {
        let text = "> 1. summary of changes follows\nall done\n";
        assert_ne!(detect_waiting_state(text), Some(WaitingState::Question));
    }

    #[test]
    fn allow_and_deny_wins_over_question_mark() {
        let text = "Do you want to run `rm -rf target`?\n  Allow\n  Deny\n";
        assert_eq!(detect_waiting_state(text), Some(WaitingState::Permission));
    }

    #[test]
    fn yn_affordance_is_confirmation() {
        let text = "Overwrite existing file? (y/n)";
        assert_eq!(
            detect_waiting_state(text),
            Some(WaitingState::Confirmation)
        );
    }

    #[test]
    fn bracketed_default_is_confirmation() {
        let text = "Continue with install [Y/n]";
        assert_eq!(
            detect_waiting_state(text),
            Some(WaitingState::Confirmation)
        );
    }

    #[test]
    fn trailing_natural_language_question() {
        let text = "I finished the refactor.\n───\nWhich database should the migration target?";
        assert_eq!(detect_waiting_state(text), Some(WaitingState::Question));
    }

    #[test]
    fn idle_prompt_is_not_a_question() {
        let text = "Task complete.\n───\n> \n? for shortcuts";
        assert_eq!(detect_waiting_state(text), None);
    }

    #[test]
    fn short_trailing_question_mark_ignored() {
        assert_eq!(detect_waiting_state("done?"), None);
    }

    #[test]
    fn ready_detects_bare_prompt_after_separator() {
        let text = "booting...\n──────\n> ";
        assert!(is_ready_for_initial_input(text));
    }

    #[test]
    fn ready_detects_onboarding_hints() {
        assert!(is_ready_for_initial_input("Welcome to the agent! /help for help"));
        assert!(!is_ready_for_initial_input("still starting up"));
    }
}
