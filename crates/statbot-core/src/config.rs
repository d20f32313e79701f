//! Sandbox configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};

/// Process-wide resource ceilings.
///
/// Applied once when the runner is constructed and cumulative for the
/// process lifetime; they are not reset between attempts. `None` disables
/// a ceiling. On platforms without the underlying primitive the ceilings
/// degrade to a no-op and the wall-clock timeout is the only backstop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum resident address space in megabytes.
    pub memory_mb: Option<u64>,
    /// Maximum accumulated CPU time in seconds.
    pub cpu_secs: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: Some(512),
            cpu_secs: Some(30),
        }
    }
}

impl ResourceLimits {
    /// Limits that leave the process untouched.
    pub fn unbounded() -> Self {
        Self {
            memory_mb: None,
            cpu_secs: None,
        }
    }

    /// Returns `true` when no ceiling is configured.
    pub fn is_unbounded(&self) -> bool {
        self.memory_mb.is_none() && self.cpu_secs.is_none()
    }
}

/// Configuration for one sandbox instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock deadline for a single execution, in seconds.
    pub timeout_secs: u64,
    /// Maximum generate-validate-execute attempts per question.
    pub max_retries: u32,
    /// Captured stdout is truncated to this many characters.
    pub max_output_chars: usize,
    /// Directory where chart artifacts are written.
    pub chart_dir: PathBuf,
    /// URL prefix under which chart files are served back to callers.
    pub chart_url_prefix: String,
    /// Process-wide resource ceilings.
    pub limits: ResourceLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            max_output_chars: 10_000,
            chart_dir: PathBuf::from("static"),
            chart_url_prefix: "/static".to_string(),
            limits: ResourceLimits::default(),
        }
    }
}

impl SandboxConfig {
    /// Reject configurations that cannot produce a usable sandbox.
    pub fn validate(&self) -> AgentResult<()> {
        if self.timeout_secs == 0 {
            return Err(AgentError::InvalidConfig(
                "timeout_secs must be at least 1".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(AgentError::InvalidConfig(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.max_output_chars == 0 {
            return Err(AgentError::InvalidConfig(
                "max_output_chars must be at least 1".into(),
            ));
        }
        if self.chart_url_prefix.is_empty() {
            return Err(AgentError::InvalidConfig(
                "chart_url_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.max_output_chars, 10_000);
        assert_eq!(cfg.limits.memory_mb, Some(512));
        assert_eq!(cfg.limits.cpu_secs, Some(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cfg = SandboxConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        match cfg.validate() {
            Err(AgentError::InvalidConfig(msg)) => assert!(msg.contains("timeout")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_retries_rejected() {
        let cfg = SandboxConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let cfg = SandboxConfig {
            timeout_secs: 5,
            limits: ResourceLimits::unbounded(),
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SandboxConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_unbounded_limits() {
        assert!(ResourceLimits::unbounded().is_unbounded());
        assert!(!ResourceLimits::default().is_unbounded());
    }
}
