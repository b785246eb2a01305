//! Script executor.
//!
//! Dispatches parsed statements to the verified action library. The executor
//! re-applies the validation policy to every statement before dispatch, so a
//! script that somehow reaches execution unvalidated still cannot touch a
//! blocked name. Execution is sequential and stops at the first failure; the
//! planner receives the failing statement's error and decides what to do.

use std::time::Duration;

use serde::Serialize;

use crate::actions::{ActionDriver, ActionResult, VerifyParams};
use crate::error::AgentError;
use crate::script::{Script, Stmt};
use crate::validator::{self, ValidationPolicy, ALLOWED_MODULES};

/// Longest pause a script statement may request, in seconds.
const MAX_SLEEP_SECS: f64 = 30.0;

/// Bounds on per-statement verification overrides. Scripts may tighten the
/// configured defaults but a typo like `retries=500` must not stall a cycle.
const MAX_RETRY_OVERRIDE: u32 = 5;
const MAX_DELAY_SECS: f64 = 5.0;

/// What a script run produced, in the shape the planner sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptExecutionResult {
    pub ok: bool,
    /// `{errorType}: {message}` for the statement that failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Verified-action outcomes, in statement order, up to the failure point.
    pub actions: Vec<ActionResult>,
}

impl ScriptExecutionResult {
    fn success(actions: Vec<ActionResult>) -> Self {
        Self { ok: true, error: None, actions }
    }

    fn failure(actions: Vec<ActionResult>, e: &AgentError) -> Self {
        Self {
            ok: false,
            error: Some(format_error(e)),
            actions,
        }
    }
}

fn format_error(e: &AgentError) -> String {
    match e {
        // The Script variant already displays as `{kind}: {message}`.
        AgentError::Script { .. } => e.to_string(),
        other => format!("{}: {}", other.kind(), other),
    }
}

pub struct ScriptExecutor {
    driver: ActionDriver,
    policy: ValidationPolicy,
    defaults: VerifyParams,
    retries_per_point: u32,
}

impl ScriptExecutor {
    pub fn new(
        driver: ActionDriver,
        policy: ValidationPolicy,
        defaults: VerifyParams,
        retries_per_point: u32,
    ) -> Self {
        Self {
            driver,
            policy,
            defaults,
            retries_per_point,
        }
    }

    /// Run every statement in order. Blocking; callers run this off the async
    /// runtime.
    pub fn execute(&self, script: &Script) -> ScriptExecutionResult {
        let mut actions = Vec::new();
        for stmt in &script.stmts {
            if self.policy == ValidationPolicy::AllowList {
                if let Err(e) = validator::check_stmt(stmt) {
                    tracing::warn!(line = stmt.line, error = %e, "statement rejected at dispatch");
                    return ScriptExecutionResult::failure(actions, &e);
                }
            }
            match self.dispatch(stmt) {
                Ok(Some(result)) => actions.push(result),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(line = stmt.line, op = %stmt.full_name(), error = %e, "statement failed");
                    return ScriptExecutionResult::failure(actions, &e);
                }
            }
        }
        ScriptExecutionResult::success(actions)
    }

    fn dispatch(&self, stmt: &Stmt) -> Result<Option<ActionResult>, AgentError> {
        let name = stmt.full_name();
        match name.as_str() {
            "import" => Ok(None),
            "sleep" | "wait" | "time.sleep" => {
                let secs = stmt
                    .arg("seconds", 0)
                    .and_then(|v| v.as_num())
                    .ok_or_else(|| type_err(stmt, "sleep expects a numeric duration"))?;
                std::thread::sleep(Duration::from_secs_f64(clamped_sleep_secs(secs)));
                Ok(None)
            }
            "move_to" => {
                let x = num_arg(stmt, "x", 0)?;
                let y = num_arg(stmt, "y", 1)?;
                self.driver.move_to(x, y, self.defaults.move_duration)?;
                Ok(None)
            }
            "click_and_verify" => {
                let x = num_arg(stmt, "x", 0)?;
                let y = num_arg(stmt, "y", 1)?;
                let label = label_arg(stmt, 2);
                let p = self.params_for(stmt)?;
                self.driver.click_and_verify(x, y, &label, p).map(Some)
            }
            "click_candidates" => {
                let points = stmt
                    .arg("points", 0)
                    .and_then(|v| v.as_points())
                    .ok_or_else(|| {
                        type_err(stmt, "click_candidates expects a list of (x, y) points")
                    })?;
                let label = label_arg(stmt, 1);
                let retries = stmt
                    .keyword("retries_per_point")
                    .and_then(|v| v.as_num())
                    .map(clamped_retries)
                    .unwrap_or(self.retries_per_point);
                let p = self.params_for(stmt)?;
                self.driver
                    .click_candidates(&points, &label, retries, p)
                    .map(Some)
            }
            "hotkey_and_verify" => {
                let keys = keys_arg(stmt)?;
                let label = stmt
                    .keyword("label")
                    .and_then(|v| v.as_str())
                    .unwrap_or("hotkey")
                    .to_string();
                let p = self.params_for(stmt)?;
                self.driver.hotkey_and_verify(&keys, &label, p).map(Some)
            }
            "ensure_focus_and_hotkey" => {
                let keys = keys_arg(stmt)?;
                let label = stmt
                    .keyword("label")
                    .and_then(|v| v.as_str())
                    .unwrap_or("hotkey")
                    .to_string();
                let focus = stmt.keyword("focus").and_then(|v| v.as_point());
                let fallbacks = stmt
                    .keyword("fallbacks")
                    .and_then(|v| v.as_points())
                    .unwrap_or_default();
                let p = self.params_for(stmt)?;
                self.driver
                    .ensure_focus_and_hotkey(&keys, focus, &fallbacks, &label, p)
                    .map(Some)
            }
            other if ALLOWED_MODULES.contains(stmt.root()) => {
                // Permitted utility-module calls with no executor counterpart
                // have no effect as bare statements.
                tracing::debug!(op = other, line = stmt.line, "ignoring effect-free module call");
                Ok(None)
            }
            other => Err(AgentError::Script {
                kind: "NameError".to_string(),
                message: format!("'{}' is not defined", other),
            }),
        }
    }

    /// Per-statement verification overrides on top of configured defaults,
    /// clamped to the same bounded-retry discipline sleep gets.
    fn params_for(&self, stmt: &Stmt) -> Result<VerifyParams, AgentError> {
        let mut p = self.defaults;
        if let Some(v) = stmt.keyword("retries") {
            let n = v
                .as_num()
                .ok_or_else(|| type_err(stmt, "retries must be a number"))?;
            p.retries = clamped_retries(n);
        }
        if let Some(v) = stmt.keyword("post_delay") {
            let n = v
                .as_num()
                .ok_or_else(|| type_err(stmt, "post_delay must be a number"))?;
            p.post_delay = Duration::from_secs_f64(clamped_delay_secs(n));
        }
        if let Some(v) = stmt.keyword("min_change") {
            p.min_change = v
                .as_num()
                .ok_or_else(|| type_err(stmt, "min_change must be a number"))?;
        }
        if let Some(v) = stmt.keyword("move_duration") {
            let n = v
                .as_num()
                .ok_or_else(|| type_err(stmt, "move_duration must be a number"))?;
            p.move_duration = Duration::from_secs_f64(clamped_delay_secs(n));
        }
        Ok(p)
    }
}

fn clamped_sleep_secs(secs: f64) -> f64 {
    secs.clamp(0.0, MAX_SLEEP_SECS)
}

fn clamped_retries(n: f64) -> u32 {
    n.clamp(0.0, MAX_RETRY_OVERRIDE as f64) as u32
}

/// Keeps overflow literals like `1e400` out of `Duration::from_secs_f64`,
/// which panics on non-finite input.
fn clamped_delay_secs(secs: f64) -> f64 {
    secs.clamp(0.0, MAX_DELAY_SECS)
}

fn type_err(stmt: &Stmt, message: impl Into<String>) -> AgentError {
    AgentError::Script {
        kind: "TypeError".to_string(),
        message: format!("line {}: {}", stmt.line, message.into()),
    }
}

fn num_arg(stmt: &Stmt, key: &str, idx: usize) -> Result<f64, AgentError> {
    stmt.arg(key, idx)
        .and_then(|v| v.as_num())
        .ok_or_else(|| {
            type_err(
                stmt,
                format!("{} expects a numeric '{}'", stmt.full_name(), key),
            )
        })
}

fn label_arg(stmt: &Stmt, idx: usize) -> String {
    stmt.arg("label", idx)
        .and_then(|v| v.as_str())
        .unwrap_or("target")
        .to_string()
}

/// Keys are either a single list argument or variadic string positionals,
/// matching both planner output shapes.
fn keys_arg(stmt: &Stmt) -> Result<Vec<String>, AgentError> {
    if let Some(keys) = stmt.positional(0).and_then(|v| v.as_strings()) {
        if keys.is_empty() {
            return Err(type_err(stmt, "key list must not be empty"));
        }
        return Ok(keys);
    }
    let keys: Vec<String> = stmt
        .args
        .iter()
        .filter(|a| a.key.is_none())
        .filter_map(|a| a.value.as_str().map(|s| s.to_string()))
        .collect();
    if keys.is_empty() {
        return Err(type_err(
            stmt,
            format!("{} expects a key list or key strings", stmt.full_name()),
        ));
    }
    Ok(keys)
}
