//! Deterministic intent matcher.
//!
//! High-frequency commands (tab management, navigation, text formatting) skip
//! the planner entirely: a canned verified-action script and reply are cheaper,
//! faster, and less error-prone than a freshly generated plan. Matching is
//! substring/regex over the normalized utterance; no match falls through to
//! planning.

use once_cell::sync::Lazy;
use regex::Regex;

/// A matched intent: the script to execute and the reply to speak.
#[derive(Debug, Clone)]
pub struct CannedPlan {
    pub name: &'static str,
    pub script: String,
    pub reply: String,
}

struct IntentRule {
    name: &'static str,
    pattern: Regex,
    script: &'static str,
    reply: &'static str,
}

/// Tab-strip close buttons drift with window width; three spread candidates
/// cover maximized, half, and narrow layouts.
const CLOSE_TAB_SCRIPT: &str = concat!(
    "ensure_focus_and_hotkey([\"ctrl\", \"w\"], label=\"close tab\", ",
    "fallbacks=[(1877, 17), (960, 17), (40, 17)])"
);

static RULES: Lazy<Vec<IntentRule>> = Lazy::new(|| {
    let rule = |name, pattern: &str, script, reply| IntentRule {
        name,
        pattern: Regex::new(pattern).expect("intent pattern"),
        script,
        reply,
    };
    vec![
        rule(
            "reopen_tab",
            r"(reopen|restore|bring back).*\btabs?\b|undo.*clos.*\btabs?\b",
            r#"hotkey_and_verify(["ctrl", "shift", "t"], label="reopen tab")"#,
            "Reopened the last closed tab.",
        ),
        rule(
            "close_tab",
            r"(close|kill|shut).*\btabs?\b",
            CLOSE_TAB_SCRIPT,
            "Closed the tab.",
        ),
        rule(
            "new_tab",
            r"(open|new|create).*\btabs?\b",
            r#"hotkey_and_verify(["ctrl", "t"], label="new tab")"#,
            "Opened a new tab.",
        ),
        rule(
            "go_back",
            r"^(go |navigate )?back(ward)?s?$|go back a page",
            r#"hotkey_and_verify(["alt", "left"], label="navigate back")"#,
            "Went back a page.",
        ),
        rule(
            "go_forward",
            r"^(go |navigate )?forwards?$|go forward a page",
            r#"hotkey_and_verify(["alt", "right"], label="navigate forward")"#,
            "Went forward a page.",
        ),
        rule(
            "bold",
            r"\bbold\b",
            r#"hotkey_and_verify(["ctrl", "b"], label="toggle bold")"#,
            "Toggled bold.",
        ),
        rule(
            "italic",
            r"\bitalics?\b",
            r#"hotkey_and_verify(["ctrl", "i"], label="toggle italic")"#,
            "Toggled italics.",
        ),
        rule(
            "underline",
            r"\bunderline\b",
            r#"hotkey_and_verify(["ctrl", "u"], label="toggle underline")"#,
            "Toggled underline.",
        ),
    ]
});

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Match a user utterance against the fixed intent table.
pub fn match_intent(text: &str) -> Option<CannedPlan> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }
    for rule in RULES.iter() {
        if rule.pattern.is_match(&normalized) {
            tracing::debug!(intent = rule.name, "deterministic intent matched");
            return Some(CannedPlan {
                name: rule.name,
                script: rule.script.to_string(),
                reply: rule.reply.to_string(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script;
    use crate::validator::{validate, ValidationPolicy};

    #[test]
    fn close_tab_matches_with_hotkey_and_three_fallbacks() {
        let plan = match_intent("close tab").unwrap();
        assert_eq!(plan.name, "close_tab");
        let parsed = script::parse(&plan.script).unwrap();
        let stmt = &parsed.stmts[0];
        let keys = stmt.positional(0).unwrap().as_strings().unwrap();
        assert_eq!(keys.len(), 2);
        let fallbacks = stmt.keyword("fallbacks").unwrap().as_points().unwrap();
        assert_eq!(fallbacks.len(), 3);
    }

    #[test]
    fn reopen_wins_over_close_and_new() {
        assert_eq!(match_intent("reopen the closed tab").unwrap().name, "reopen_tab");
        assert_eq!(match_intent("Close that tab please").unwrap().name, "close_tab");
        assert_eq!(match_intent("open a new tab").unwrap().name, "new_tab");
    }

    #[test]
    fn navigation_and_formatting_match() {
        assert_eq!(match_intent("go back").unwrap().name, "go_back");
        assert_eq!(match_intent("forward").unwrap().name, "go_forward");
        assert_eq!(match_intent("make it bold").unwrap().name, "bold");
        assert_eq!(match_intent("underline that").unwrap().name, "underline");
    }

    #[test]
    fn unmatched_utterances_fall_through() {
        assert!(match_intent("summarize this page").is_none());
        assert!(match_intent("").is_none());
    }

    #[test]
    fn tab_must_be_a_whole_word() {
        assert!(match_intent("close the table of contents").is_none());
        assert!(match_intent("open the tabulated report").is_none());
        assert_eq!(match_intent("close those tabs").unwrap().name, "close_tab");
    }

    #[test]
    fn every_canned_script_passes_allow_list_validation() {
        for rule in RULES.iter() {
            validate(rule.script, ValidationPolicy::AllowList)
                .unwrap_or_else(|e| panic!("{} script invalid: {}", rule.name, e));
        }
    }
}
