use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Script validation failed: {0}")]
    Validation(String),

    #[error("verification failed for '{label}': no visible screen change after {attempts} attempts (last_change={last_change:.3}, required={required:.3})")]
    Verification {
        label: String,
        attempts: u32,
        last_change: f64,
        required: f64,
    },

    #[error("{kind}: {message}")]
    Script { kind: String, message: String },

    #[error("Planner output error: {0}")]
    PlanParse(String),

    #[error("Invalid classification: {0}")]
    InvalidClassification(String),
}

impl AgentError {
    /// Error category reported in ScriptExecutionResult, mirroring the
    /// `{errorType}: {message}` shape scripts surface to the planner.
    pub fn kind(&self) -> &str {
        match self {
            AgentError::Capture(_) => "CaptureError",
            AgentError::Validation(_) => "ValidationError",
            AgentError::Verification { .. } => "VerificationError",
            AgentError::Script { kind, .. } => kind,
            AgentError::PlanParse(_) => "PlanParseError",
            AgentError::InvalidClassification(_) => "InvalidClassification",
        }
    }
}
