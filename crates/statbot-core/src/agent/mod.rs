//! The question-answering agent.
//!
//! [`Agent::process_question`] drives the full pipeline: generate candidate
//! code, statically validate it, execute it in the monitored sandbox, and
//! retry with revised code on ordinary runtime failures. Policy violations
//! and timeouts are terminal and propagate as errors; a candidate that still
//! fails on the last attempt is returned as an unsuccessful [`Answer`], not
//! an error.

pub mod codegen;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::SandboxConfig;
use crate::error::{AgentError, AgentResult};
use crate::sandbox::policy::ExecPolicy;
use crate::sandbox::runner::{ExecutionResult, MonitoredRunner};
use crate::sandbox::validator::StaticValidator;
use crate::table::DataTable;

pub use codegen::{CodeGenerator, FailedAttempt, TemplateGenerator};

/// Final answer for one question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub success: bool,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_url: Option<String>,
    pub attempts: u32,
    pub execution_time_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

/// Natural-language data analysis agent.
pub struct Agent {
    generator: Arc<dyn CodeGenerator>,
    validator: StaticValidator,
    runner: MonitoredRunner,
    max_retries: u32,
}

impl Agent {
    /// Agent with the default policy and the built-in template generator.
    pub fn new(config: &SandboxConfig) -> AgentResult<Self> {
        Self::with_generator(config, Arc::new(TemplateGenerator::new()))
    }

    pub fn with_generator(
        config: &SandboxConfig,
        generator: Arc<dyn CodeGenerator>,
    ) -> AgentResult<Self> {
        let policy = Arc::new(ExecPolicy::default());
        let validator = StaticValidator::new(Arc::clone(&policy))?;
        let runner = MonitoredRunner::new(config, policy)?;
        Ok(Self {
            generator,
            validator,
            runner,
            max_retries: config.max_retries,
        })
    }

    /// Answers `question` over `table`.
    ///
    /// Returns `Err` only for non-retryable conditions: malformed input, a
    /// candidate that fails static validation (never executed), a wall-clock
    /// timeout, or a host fault. Runtime failures are retried up to the
    /// configured attempt count and the final failure is reported inside the
    /// returned [`Answer`].
    pub async fn process_question(&self, question: &str, table: &DataTable) -> AgentResult<Answer> {
        if question.trim().is_empty() {
            return Err(AgentError::Validation("question must not be empty".into()));
        }
        if table.is_empty() {
            return Err(AgentError::Validation(
                "table must have at least one row and one column".into(),
            ));
        }

        let schema = table.schema();
        let started = Instant::now();
        let mut last_failure: Option<FailedAttempt> = None;

        for attempt in 1..=self.max_retries {
            let code = match &last_failure {
                None => self.generator.initial(question, &schema).await?,
                Some(failed) => self.generator.revise(question, &schema, failed).await?,
            };

            // A rejected candidate is never executed; the violation is
            // terminal for the whole question.
            self.validator.validate(&code)?;

            tracing::debug!(attempt, "executing candidate");
            match self.runner.run(&code, table).await? {
                ExecutionResult::Success { output, chart, .. } => {
                    let text = if output.is_empty() {
                        "Analysis completed successfully".to_string()
                    } else {
                        output
                    };
                    tracing::info!(attempt, "question answered");
                    return Ok(Answer {
                        success: true,
                        text,
                        chart_url: chart.map(|c| c.url),
                        attempts: attempt,
                        execution_time_seconds: started.elapsed().as_secs_f64(),
                        error: None,
                        error_type: None,
                    });
                }
                ExecutionResult::Failure {
                    message, category, ..
                } => {
                    tracing::warn!(attempt, error = %message, "candidate failed");
                    if attempt == self.max_retries {
                        return Ok(Answer {
                            success: false,
                            text: format!(
                                "Analysis failed after {} attempts. Last error: {}",
                                attempt, message
                            ),
                            chart_url: None,
                            attempts: attempt,
                            execution_time_seconds: started.elapsed().as_secs_f64(),
                            error: Some(message),
                            error_type: Some(category.label().to_string()),
                        });
                    }
                    last_failure = Some(FailedAttempt {
                        code,
                        error: message,
                        category,
                        attempt,
                    });
                }
            }
        }

        // max_retries >= 1 is enforced by config validation, so the loop
        // always returns.
        Err(AgentError::Validation("retry loop exhausted".into()))
    }
}
