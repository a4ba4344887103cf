//! Core runtime crate for transporter pipeline execution.
//!
//! A pipeline is a directed acyclic graph rooted at one reader, flowing
//! through per-edge namespace filters and transform chains into one or
//! more writers. The [`supervisor`] wires the graph from a declarative
//! [`config`], the [`writer`] runtime drives durability through the
//! commit and error logs, and the [`reader`] runtime resumes from
//! persisted states. Delivery is at-least-once: after any crash, a
//! functional sink eventually receives every filtered message at least
//! once.

#![warn(clippy::pedantic)]

pub mod adaptor;
pub mod adaptors;
pub mod config;
pub mod error;
pub mod filter;
pub mod reader;
pub mod registry;
pub mod status;
pub mod supervisor;
pub mod transform;
pub mod writer;

// Re-export public API for convenience
pub use error::PipelineError;
pub use registry::{AdaptorRegistry, TransformRegistry};
pub use status::{pipeline_status, StatusReport};
pub use supervisor::{run_pipeline, truncate_errors, TerminationReport, WriterReport};
