//! Monitored execution.
//!
//! A [`MonitoredRunner`] owns one dedicated interpreter thread. Each run is
//! queued to that thread and awaited under a wall-clock deadline; the host
//! side classifies the outcome, applies output truncation and exports chart
//! artifacts.
//!
//! A timed-out candidate keeps the worker thread busy until the process
//! exits. Timeouts are terminal for the question being answered, so no
//! further job is queued behind a hung one within a single retry loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::chart::render_svg;
use crate::config::SandboxConfig;
use crate::error::{AgentError, AgentResult};
use crate::sandbox::limits::platform_limiter;
use crate::sandbox::policy::ExecPolicy;
use crate::sandbox::vm::{self, VmError, VmOutcome};
use crate::table::DataTable;

/// Appended to truncated stdout.
pub const TRUNCATION_MARKER: &str = "\n... (output truncated)";

/// Why a candidate program failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCategory {
    /// An ordinary interpreter exception, retryable with revised code.
    Runtime { type_name: String },
    /// The candidate ran out of memory.
    ResourceExhaustion,
    /// The candidate was interrupted (CPU ceiling or signal).
    Interruption,
}

impl FailureCategory {
    pub fn label(&self) -> &str {
        match self {
            FailureCategory::Runtime { type_name } => type_name,
            FailureCategory::ResourceExhaustion => "ResourceExhaustion",
            FailureCategory::Interruption => "Interruption",
        }
    }
}

/// A chart artifact written during a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRef {
    /// Filesystem location of the rendered SVG.
    pub path: PathBuf,
    /// URL under which the artifact is served.
    pub url: String,
}

/// Outcome of one monitored execution.
///
/// A failed candidate is data, not an error: the retry loop inspects it to
/// revise the next attempt. Only timeouts and host faults surface as
/// [`AgentError`].
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Success {
        output: String,
        errors: String,
        chart: Option<ChartRef>,
        elapsed: Duration,
    },
    Failure {
        message: String,
        category: FailureCategory,
        traceback: String,
        elapsed: Duration,
    },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }
}

struct Job {
    source: String,
    table: DataTable,
    reply: oneshot::Sender<ExecutionResult>,
}

/// Queues candidate programs to the interpreter thread and enforces the
/// wall-clock deadline.
pub struct MonitoredRunner {
    jobs: mpsc::UnboundedSender<Job>,
    timeout: Duration,
}

impl MonitoredRunner {
    pub fn new(config: &SandboxConfig, policy: Arc<ExecPolicy>) -> AgentResult<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.chart_dir).map_err(|e| {
            AgentError::InvalidConfig(format!(
                "cannot create chart directory {}: {}",
                config.chart_dir.display(),
                e
            ))
        })?;

        let limiter = platform_limiter();
        if let Err(e) = limiter.apply(&config.limits) {
            // Degrade to the wall-clock timeout alone rather than refusing
            // to start.
            tracing::warn!(limiter = limiter.name(), error = %e, "resource ceilings not applied");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            policy,
            chart_dir: config.chart_dir.clone(),
            chart_url_prefix: config.chart_url_prefix.trim_end_matches('/').to_string(),
            max_output_chars: config.max_output_chars,
        };
        std::thread::Builder::new()
            .name("sandbox-worker".into())
            .spawn(move || worker_loop(rx, ctx))
            .map_err(|e| AgentError::Worker(format!("failed to spawn worker thread: {}", e)))?;

        Ok(Self {
            jobs: tx,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Executes `source` against `table` on the worker thread.
    pub async fn run(&self, source: &str, table: &DataTable) -> AgentResult<ExecutionResult> {
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job {
                source: source.to_string(),
                table: table.clone(),
                reply,
            })
            .map_err(|_| AgentError::Worker("worker thread has exited".into()))?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(AgentError::Worker(
                "worker dropped the reply channel".into(),
            )),
            Err(_) => {
                let limit_ms = self.timeout.as_millis() as u64;
                tracing::warn!(limit_ms, "candidate execution timed out");
                Err(AgentError::Timeout {
                    elapsed_ms: limit_ms,
                    limit_ms,
                })
            }
        }
    }
}

struct WorkerContext {
    policy: Arc<ExecPolicy>,
    chart_dir: PathBuf,
    chart_url_prefix: String,
    max_output_chars: usize,
}

fn worker_loop(mut jobs: mpsc::UnboundedReceiver<Job>, ctx: WorkerContext) {
    while let Some(job) = jobs.blocking_recv() {
        let started = Instant::now();
        let outcome = vm::execute(&ctx.policy, &job.table, &job.source, ctx.max_output_chars);
        let result = classify(outcome, started.elapsed(), &ctx);
        // A send error means the caller timed out and dropped the receiver.
        let _ = job.reply.send(result);
    }
}

fn classify(outcome: VmOutcome, elapsed: Duration, ctx: &WorkerContext) -> ExecutionResult {
    match outcome.error {
        Some(VmError::Syntax { message }) => ExecutionResult::Failure {
            message: format!("SyntaxError: {}", message),
            category: FailureCategory::Runtime {
                type_name: "SyntaxError".to_string(),
            },
            traceback: String::new(),
            elapsed,
        },
        Some(VmError::Runtime {
            type_name,
            message,
            traceback,
        }) => {
            let category = match type_name.as_str() {
                "MemoryError" => FailureCategory::ResourceExhaustion,
                "KeyboardInterrupt" => FailureCategory::Interruption,
                _ => FailureCategory::Runtime {
                    type_name: type_name.clone(),
                },
            };
            tracing::debug!(error_type = %type_name, "candidate execution failed");
            ExecutionResult::Failure {
                message: format!("{}: {}", type_name, message),
                category,
                traceback,
                elapsed,
            }
        }
        None => {
            let output = if outcome.truncated {
                format!("{}{}", outcome.stdout, TRUNCATION_MARKER)
            } else {
                outcome.stdout.trim().to_string()
            };
            let chart = outcome
                .figures
                .first()
                .and_then(|figure| export_chart(figure, ctx));
            ExecutionResult::Success {
                output,
                errors: outcome.stderr,
                chart,
                elapsed,
            }
        }
    }
}

/// Renders the first recorded figure to `chart_dir` and returns its
/// reference. Render failures degrade to a chartless success.
fn export_chart(figure: &crate::chart::FigureSpec, ctx: &WorkerContext) -> Option<ChartRef> {
    let filename = format!("chart_{}.svg", Uuid::new_v4().simple());
    let path = ctx.chart_dir.join(&filename);
    match render_svg(figure, &path) {
        Ok(()) => {
            let url = format!("{}/{}", ctx.chart_url_prefix, filename);
            tracing::debug!(%url, "chart artifact written");
            Some(ChartRef { path, url })
        }
        Err(e) => {
            tracing::warn!(error = %e, "chart rendering failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> WorkerContext {
        WorkerContext {
            policy: Arc::new(ExecPolicy::default()),
            chart_dir: std::env::temp_dir(),
            chart_url_prefix: "/static".to_string(),
            max_output_chars: 10_000,
        }
    }

    fn outcome(error: Option<VmError>) -> VmOutcome {
        VmOutcome {
            stdout: "result\n".to_string(),
            stderr: String::new(),
            truncated: false,
            figures: Vec::new(),
            error,
        }
    }

    #[test]
    fn test_memory_error_classified_as_resource_exhaustion() {
        let result = classify(
            outcome(Some(VmError::Runtime {
                type_name: "MemoryError".into(),
                message: "out of memory".into(),
                traceback: String::new(),
            })),
            Duration::from_millis(10),
            &ctx(),
        );
        match result {
            ExecutionResult::Failure { category, .. } => {
                assert_eq!(category, FailureCategory::ResourceExhaustion);
            }
            other => panic!("expected Failure, got {:?}", other),
        }
    }

    #[test]
    fn test_key_error_keeps_type_name() {
        let result = classify(
            outcome(Some(VmError::Runtime {
                type_name: "KeyError".into(),
                message: "'profit'".into(),
                traceback: "Traceback...".into(),
            })),
            Duration::from_millis(10),
            &ctx(),
        );
        match result {
            ExecutionResult::Failure {
                category, message, ..
            } => {
                assert_eq!(category.label(), "KeyError");
                assert!(message.starts_with("KeyError:"));
            }
            other => panic!("expected Failure, got {:?}", other),
        }
    }

    #[test]
    fn test_success_output_trimmed() {
        let result = classify(outcome(None), Duration::from_millis(5), &ctx());
        match result {
            ExecutionResult::Success { output, chart, .. } => {
                assert_eq!(output, "result");
                assert!(chart.is_none());
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_output_gets_marker() {
        let mut o = outcome(None);
        o.truncated = true;
        o.stdout = "x".repeat(10_000);
        let result = classify(o, Duration::from_millis(5), &ctx());
        match result {
            ExecutionResult::Success { output, .. } => {
                assert!(output.ends_with(TRUNCATION_MARKER));
                assert_eq!(
                    output.chars().count(),
                    10_000 + TRUNCATION_MARKER.chars().count()
                );
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }
}
