//! StatBot - sandboxed natural-language data analysis CLI
//!
//! Loads a table from a JSON file (an array of flat objects), answers a
//! question about it with the sandboxed agent, and prints the answer as
//! JSON. Chart artifacts are written under the chart directory.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use statbot_core::{Agent, DataTable, ResourceLimits, SandboxConfig};

#[derive(Parser)]
#[command(name = "statbot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Answer natural-language questions about tabular data", long_about = None)]
struct Cli {
    /// Path to the data file (JSON array of objects)
    #[arg(short, long)]
    data: PathBuf,

    /// The question to answer
    question: String,

    /// Wall-clock timeout per execution, in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Maximum generate-validate-execute attempts
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Directory for chart artifacts
    #[arg(long, default_value = "static")]
    chart_dir: PathBuf,

    /// Skip process-wide memory/CPU ceilings
    #[arg(long)]
    no_limits: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    statbot_core::init_tracing(cli.json, level);

    let raw = std::fs::read_to_string(&cli.data)
        .with_context(|| format!("failed to read data file {}", cli.data.display()))?;
    let records: Vec<BTreeMap<String, serde_json::Value>> =
        serde_json::from_str(&raw).context("data file must be a JSON array of flat objects")?;
    let table = DataTable::from_records(&records).context("failed to build table")?;
    tracing::info!(
        rows = table.row_count(),
        columns = table.column_count(),
        "table loaded"
    );

    let config = SandboxConfig {
        timeout_secs: cli.timeout,
        max_retries: cli.retries,
        chart_dir: cli.chart_dir,
        limits: if cli.no_limits {
            ResourceLimits::unbounded()
        } else {
            ResourceLimits::default()
        },
        ..Default::default()
    };

    let agent = Agent::new(&config).context("failed to start the sandbox")?;
    let answer = agent
        .process_question(&cli.question, &table)
        .await
        .context("question could not be processed")?;

    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}
