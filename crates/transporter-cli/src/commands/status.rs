use std::path::Path;

use transporter_engine::config::parser;
use transporter_engine::{pipeline_status, PipelineError};

/// Execute the `status` command: print a pipeline's durable state.
pub fn execute(pipeline_path: &Path) -> Result<(), PipelineError> {
    let config = parser::parse_pipeline(pipeline_path)?;
    let report = pipeline_status(&config)?;

    println!("Pipeline '{}'", report.pipeline);
    println!("  Writers:");
    for writer in &report.writers {
        let fmt = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |o| o.to_string());
        println!(
            "    {:<16} offset {:>8}  log head {:>8}  uncommitted {:>6}  errors {:>4}",
            writer.id.as_str(),
            fmt(writer.store_offset),
            fmt(writer.log_head),
            writer.uncommitted,
            writer.errors,
        );
    }
    if report.states.is_empty() {
        println!("  Namespaces: none");
    } else {
        println!("  Namespaces:");
        for state in &report.states {
            println!(
                "    {:<24} {:<5} ts {:>10}  identifier {}",
                state.namespace.as_str(),
                state.phase,
                state.timestamp,
                state.identifier.as_deref().unwrap_or("-"),
            );
        }
    }
    if report.has_errors() {
        println!("  Error log entries present: run `transporter truncate-errors` before restarting.");
    }

    Ok(())
}
