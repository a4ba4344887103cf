use std::path::Path;

use tokio_util::sync::CancellationToken;

use transporter_engine::config::parser;
use transporter_engine::{run_pipeline, AdaptorRegistry, PipelineError, TransformRegistry};

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(pipeline_path: &Path) -> Result<(), PipelineError> {
    let config = parser::parse_pipeline(pipeline_path)?;

    let registry = AdaptorRegistry::with_builtins();
    let transforms = TransformRegistry::new();

    // First interrupt asks for a clean stop; the supervisor drains
    // writers before returning.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received; stopping pipeline");
                cancel.cancel();
            }
        });
    }

    let report = run_pipeline(&config, &registry, &transforms, &cancel).await?;

    println!("Pipeline '{}' completed.", report.pipeline);
    println!("  Records read:     {}", report.records_read);
    println!("  Records filtered: {}", report.records_filtered);
    println!("  Records dropped:  {}", report.records_dropped);
    for writer in &report.writers {
        let offset = writer
            .durable_offset
            .map_or_else(|| "-".to_string(), |o| o.to_string());
        println!(
            "  Writer {:<16} committed {:>8}  durable offset {}",
            writer.id.as_str(),
            writer.committed,
            offset
        );
    }

    Ok(())
}
