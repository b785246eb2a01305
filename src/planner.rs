//! Planner and classifier contracts, plus planner output parsing.
//!
//! The planner is an external LLM-style service that maps (instructions,
//! conversation state, screen image, user text) to raw text. Its output is
//! split on a fixed delimiter into a script and a spoken reply. Transport and
//! API shape live in `llm`; this module owns only the contract.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::memory::Turn;
use crate::prompts::DELIMITER;
use crate::screen::CaptureMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Chat,
    Agent,
    Unsafe,
}

impl Classification {
    pub fn label(self) -> &'static str {
        match self {
            Classification::Chat => "---CHAT---",
            Classification::Agent => "---AGENT---",
            Classification::Unsafe => "---UNSAFE---",
        }
    }

    /// Tolerant of stray text or markup around the label; small models pad
    /// their answers despite instructions.
    pub fn from_label(raw: &str) -> Result<Self, AgentError> {
        let upper = raw.to_uppercase();
        for c in [
            Classification::Unsafe,
            Classification::Agent,
            Classification::Chat,
        ] {
            if upper.contains(c.label()) || upper.contains(c.label().trim_matches('-')) {
                return Ok(c);
            }
        }
        Err(AgentError::InvalidClassification(raw.trim().to_string()))
    }
}

/// Everything the planner sees for one cycle. `history` excludes the current
/// utterance, which rides in `user_text` alongside the image.
pub struct PlanRequest<'a> {
    pub instructions: &'a str,
    pub classification: Classification,
    pub user_text: &'a str,
    pub image_png: &'a [u8],
    pub metadata: &'a CaptureMetadata,
    pub history: &'a [Turn],
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Returns the model's raw text; callers parse it with `parse_plan_output`.
    async fn plan(&self, request: PlanRequest<'_>) -> anyhow::Result<String>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> anyhow::Result<Classification>;
}

/// A parsed planner response.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub script: String,
    pub reply: String,
}

/// Split raw planner output into script and reply. CHAT output is reply-only;
/// AGENT output requires the delimiter and a non-empty reply below it.
pub fn parse_plan_output(raw: &str, classification: Classification) -> Result<Plan, AgentError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AgentError::PlanParse("empty output from model".to_string()));
    }

    if classification == Classification::Chat {
        return Ok(Plan {
            script: String::new(),
            reply: raw.to_string(),
        });
    }

    let (script_part, reply_part) = raw.split_once(DELIMITER).ok_or_else(|| {
        AgentError::PlanParse(format!("output missing required delimiter '{}'", DELIMITER))
    })?;

    let script = strip_fences(script_part.trim());
    let reply = reply_part.trim();
    if reply.is_empty() {
        return Err(AgentError::PlanParse(
            "reply text below the delimiter cannot be empty".to_string(),
        ));
    }

    Ok(Plan {
        script,
        reply: reply.to_string(),
    })
}

/// Models wrap scripts in markdown fences despite instructions.
fn strip_fences(script: &str) -> String {
    let mut script = script.trim();
    for fence in ["```python", "```"] {
        if let Some(rest) = script.strip_prefix(fence) {
            script = rest.trim_start();
        }
    }
    if let Some(rest) = script.strip_suffix("```") {
        script = rest.trim_end();
    }
    script.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_labels_parse_with_surrounding_noise() {
        assert_eq!(
            Classification::from_label("the answer is ---AGENT--- thanks").unwrap(),
            Classification::Agent
        );
        assert_eq!(
            Classification::from_label("---chat---").unwrap(),
            Classification::Chat
        );
        assert_eq!(
            Classification::from_label("UNSAFE").unwrap(),
            Classification::Unsafe
        );
    }

    #[test]
    fn unsafe_wins_when_multiple_labels_appear() {
        let c = Classification::from_label("---AGENT--- or maybe ---UNSAFE---").unwrap();
        assert_eq!(c, Classification::Unsafe);
    }

    #[test]
    fn unknown_label_is_rejected() {
        assert!(matches!(
            Classification::from_label("banana"),
            Err(AgentError::InvalidClassification(_))
        ));
    }

    #[test]
    fn agent_output_splits_on_delimiter() {
        let raw = "click_and_verify(10, 20, \"x\")\n---DELIMITER---\nDone, I clicked it.";
        let plan = parse_plan_output(raw, Classification::Agent).unwrap();
        assert_eq!(plan.script, "click_and_verify(10, 20, \"x\")");
        assert_eq!(plan.reply, "Done, I clicked it.");
    }

    #[test]
    fn agent_output_without_delimiter_is_a_parse_error() {
        let err = parse_plan_output("just some text", Classification::Agent).unwrap_err();
        assert!(err.to_string().contains("---DELIMITER---"));
    }

    #[test]
    fn agent_output_with_empty_reply_is_a_parse_error() {
        let raw = "sleep(1)\n---DELIMITER---\n   ";
        assert!(parse_plan_output(raw, Classification::Agent).is_err());
    }

    #[test]
    fn chat_output_is_reply_only() {
        let plan = parse_plan_output("Sure, happy to help!", Classification::Chat).unwrap();
        assert!(plan.script.is_empty());
        assert_eq!(plan.reply, "Sure, happy to help!");
    }

    #[test]
    fn code_fences_are_stripped_from_scripts() {
        let raw = "```python\nsleep(1)\n```\n---DELIMITER---\nWaited a second.";
        let plan = parse_plan_output(raw, Classification::Agent).unwrap();
        assert_eq!(plan.script, "sleep(1)");
    }

    #[test]
    fn empty_output_is_a_parse_error() {
        assert!(parse_plan_output("  \n ", Classification::Chat).is_err());
    }
}
