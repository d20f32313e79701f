//! Secure execution sandbox.
//!
//! Candidate programs pass through three layers before their results reach
//! the agent:
//!
//! 1. [`validator::StaticValidator`] rejects disallowed source before any
//!    execution (lexical patterns first, then an AST walk).
//! 2. An embedded interpreter ([`vm`]) runs accepted programs inside a
//!    restricted namespace with captured stdout/stderr.
//! 3. [`runner::MonitoredRunner`] owns the worker thread, enforces the
//!    wall-clock deadline, truncates output and exports chart artifacts.

pub mod limits;
pub mod output;
pub mod policy;
pub mod runner;
pub mod validator;

pub(crate) mod vm;

pub use policy::ExecPolicy;
pub use runner::{ChartRef, ExecutionResult, FailureCategory, MonitoredRunner};
pub use validator::StaticValidator;
