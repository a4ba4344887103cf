use std::path::Path;

use transporter_engine::config::parser;
use transporter_engine::{truncate_errors, PipelineError};

/// Execute the `truncate-errors` command: clear every writer's error
/// log so the pipeline can restart.
pub fn execute(pipeline_path: &Path) -> Result<(), PipelineError> {
    let config = parser::parse_pipeline(pipeline_path)?;
    let dropped = truncate_errors(&config)?;

    let total: usize = dropped.iter().map(|(_, n)| n).sum();
    for (writer, count) in &dropped {
        if *count > 0 {
            println!("Writer '{writer}': dropped {count} error entries");
        }
    }
    if total == 0 {
        println!("No error log entries to drop.");
    }

    Ok(())
}
