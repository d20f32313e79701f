//! StatBot Core Library
//!
//! A secure execution sandbox for natural-language tabular data analysis:
//! candidate programs are statically validated, executed in a restricted
//! embedded interpreter under resource ceilings, and retried with revised
//! code when they fail at runtime.

pub mod agent;
pub mod chart;
pub mod config;
pub mod error;
pub mod sandbox;
pub mod table;
pub mod telemetry;

pub use agent::{Agent, Answer, CodeGenerator, FailedAttempt, TemplateGenerator};

pub use chart::{ChartError, FigureSpec, SeriesSpec};

pub use config::{ResourceLimits, SandboxConfig};

pub use error::{AgentError, AgentResult, ViolationKind};

pub use sandbox::runner::TRUNCATION_MARKER;
pub use sandbox::{
    ChartRef, ExecPolicy, ExecutionResult, FailureCategory, MonitoredRunner, StaticValidator,
};

pub use table::{DataTable, TableSchema, Value};

pub use telemetry::init_tracing;

/// StatBot version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
