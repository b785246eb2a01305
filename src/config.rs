use std::env;
use std::time::Duration;

use crate::validator::ValidationPolicy;

/// Runtime configuration, loaded once at startup from the environment
/// (a `.env` file is honored via dotenv in main).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Extra verification attempts after the first click (total = retries + 1).
    pub verify_retries: u32,
    /// Settle time between an input action and the after-frame grab.
    pub post_delay_ms: u64,
    /// Mean absolute pixel difference required to count as a visible change.
    pub min_change: f64,
    /// Pointer travel time before a click.
    pub move_duration_ms: u64,
    /// Retries per candidate point in multi-candidate clicks.
    pub retries_per_point: u32,
    /// Conversation memory cap (user + assistant turns combined).
    pub memory_cap: usize,
    pub policy: ValidationPolicy,
    pub planner_model: String,
    pub planner_api_base: String,
    pub classifier_model: String,
    pub classifier_api_base: String,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let policy = match env::var("AGENT_SCRIPT_POLICY").as_deref() {
            Ok("syntax") | Ok("permissive") => ValidationPolicy::SyntaxOnly,
            _ => ValidationPolicy::AllowList,
        };
        Self {
            verify_retries: env_u32("AGENT_VERIFY_RETRIES", 2),
            post_delay_ms: env_u64("AGENT_POST_DELAY_MS", 800),
            min_change: env_f64("AGENT_MIN_CHANGE", 1.5),
            move_duration_ms: env_u64("AGENT_MOVE_DURATION_MS", 150),
            retries_per_point: env_u32("AGENT_RETRIES_PER_POINT", 1),
            memory_cap: env_u32("AGENT_MEMORY_CAP", 12) as usize,
            policy,
            planner_model: env_str("AGENT_PLANNER_MODEL", "gpt-5.2"),
            planner_api_base: env_str("AGENT_PLANNER_API_BASE", "https://api.openai.com/v1"),
            classifier_model: env_str("AGENT_CLASSIFIER_MODEL", "llama-3.1-8b-instant"),
            classifier_api_base: env_str(
                "AGENT_CLASSIFIER_API_BASE",
                "https://api.groq.com/openai/v1",
            ),
        }
    }

    pub fn post_delay(&self) -> Duration {
        Duration::from_millis(self.post_delay_ms)
    }

    pub fn move_duration(&self) -> Duration {
        Duration::from_millis(self.move_duration_ms)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            verify_retries: 2,
            post_delay_ms: 800,
            min_change: 1.5,
            move_duration_ms: 150,
            retries_per_point: 1,
            memory_cap: 12,
            policy: ValidationPolicy::AllowList,
            planner_model: "gpt-5.2".to_string(),
            planner_api_base: "https://api.openai.com/v1".to_string(),
            classifier_model: "llama-3.1-8b-instant".to_string(),
            classifier_api_base: "https://api.groq.com/openai/v1".to_string(),
        }
    }
}

fn env_str(key: &str, default_val: &str) -> String {
    env::var(key).unwrap_or_else(|_| default_val.to_string())
}

fn env_u32(key: &str, default_val: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}

fn env_u64(key: &str, default_val: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}

fn env_f64(key: &str, default_val: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}
