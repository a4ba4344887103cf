mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "transporter",
    version,
    about = "Streams records from a reader through transforms into one or more writers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline until its source is exhausted or it is interrupted
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Print per-writer offsets, log heads, error counts, and per-namespace states
    Status {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Drop all error-log entries so a stopped pipeline can restart
    TruncateErrors {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let result = match cli.command {
        Commands::Run { pipeline } => commands::run::execute(&pipeline).await,
        Commands::Status { pipeline } => commands::status::execute(&pipeline),
        Commands::TruncateErrors { pipeline } => commands::truncate::execute(&pipeline),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            u8::try_from(err.exit_code()).map_or(ExitCode::FAILURE, ExitCode::from)
        }
    }
}
