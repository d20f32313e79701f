//! Error types for the agent and its sandbox.

use serde::{Deserialize, Serialize};

/// Which validation rule a candidate program violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The source did not parse.
    Syntax,
    /// A denied statement kind (import, def, try, ...).
    Construct,
    /// Access to a denied attribute name.
    Attribute,
    /// A direct call to a denied builtin.
    Call,
    /// A denied lexical pattern in the raw source.
    Pattern,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ViolationKind::Syntax => "syntax",
            ViolationKind::Construct => "construct",
            ViolationKind::Attribute => "attribute",
            ViolationKind::Call => "call",
            ViolationKind::Pattern => "pattern",
        };
        f.write_str(label)
    }
}

/// Errors produced by the agent layer.
///
/// Ordinary runtime failures of a candidate program are *not* errors at this
/// level: they are captured into [`crate::sandbox::runner::ExecutionResult`]
/// so the retry loop can inspect them. Only non-retryable conditions
/// (policy violations, timeouts, malformed input, host faults) surface here.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("policy violation ({kind}): {reason}")]
    PolicyViolation { kind: ViolationKind, reason: String },

    #[error("execution timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("code generation failed: {0}")]
    CodeGen(String),

    #[error("sandbox worker unavailable: {0}")]
    Worker(String),
}

impl AgentError {
    /// Returns `true` for conditions the retry loop must not retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentError::PolicyViolation { .. }
                | AgentError::Timeout { .. }
                | AgentError::Validation(_)
        )
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_kind_display() {
        assert_eq!(ViolationKind::Pattern.to_string(), "pattern");
        assert_eq!(ViolationKind::Syntax.to_string(), "syntax");
    }

    #[test]
    fn test_terminal_classification() {
        let policy = AgentError::PolicyViolation {
            kind: ViolationKind::Call,
            reason: "eval".into(),
        };
        assert!(policy.is_terminal());

        let timeout = AgentError::Timeout {
            elapsed_ms: 30_000,
            limit_ms: 30_000,
        };
        assert!(timeout.is_terminal());

        assert!(!AgentError::Worker("gone".into()).is_terminal());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = AgentError::PolicyViolation {
            kind: ViolationKind::Attribute,
            reason: "blocked attribute access: __class__".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("attribute"));
        assert!(msg.contains("__class__"));
    }
}
