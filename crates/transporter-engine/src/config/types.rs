//! Parsed pipeline configuration types.

use std::path::PathBuf;

use serde::Deserialize;

fn default_version() -> String {
    "1.0".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_batch_records() -> usize {
    500
}

fn default_max_batch_delay_ms() -> u64 {
    1000
}

fn default_buffer_capacity() -> usize {
    1024
}

/// Top-level pipeline declaration: one reader fanning out into one or
/// more writers, each behind its own filter and transform chain.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_version")]
    pub version: String,
    /// Pipeline name; also the directory name under `data_dir`.
    pub pipeline: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub reader: ReaderDecl,
    pub writers: Vec<WriterDecl>,
    #[serde(default)]
    pub batching: BatchingConfig,
    /// Commit-log size past which committed entries are compacted away.
    #[serde(default)]
    pub commit_log_max_bytes: Option<u64>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl PipelineConfig {
    /// Directory holding this pipeline's durable files.
    #[must_use]
    pub fn pipeline_dir(&self) -> PathBuf {
        self.data_dir.join(&self.pipeline)
    }

    /// Path of the state/offset store database.
    #[must_use]
    pub fn state_db_path(&self) -> PathBuf {
        self.pipeline_dir().join("state.db")
    }

    /// Path of a writer's commit log.
    #[must_use]
    pub fn commit_log_path(&self, writer_name: &str) -> PathBuf {
        self.pipeline_dir().join(format!("{writer_name}.commitlog"))
    }

    /// Path of a writer's error log.
    #[must_use]
    pub fn error_log_path(&self, writer_name: &str) -> PathBuf {
        self.pipeline_dir().join(format!("{writer_name}.errorlog"))
    }
}

/// Reader declaration: adaptor name, optional namespace filter, opaque
/// adaptor config.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderDecl {
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Writer declaration with its transform chain.
#[derive(Debug, Clone, Deserialize)]
pub struct WriterDecl {
    pub name: String,
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub transforms: Vec<TransformDecl>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// One transform stage in a writer's chain.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformDecl {
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Batch sizing shared by every writer in the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "default_max_batch_records")]
    pub max_batch_records: usize,
    #[serde(default = "default_max_batch_delay_ms")]
    pub max_batch_delay_ms: u64,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_records: default_max_batch_records(),
            max_batch_delay_ms: default_max_batch_delay_ms(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in() {
        let yaml = r#"
pipeline: p
reader:
  use: memory
writers:
  - name: w1
    use: memory
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.batching.max_batch_records, 500);
        assert_eq!(config.batching.max_batch_delay_ms, 1000);
        assert_eq!(config.batching.buffer_capacity, 1024);
        assert_eq!(config.shutdown_timeout_seconds, 30);
        assert!(config.commit_log_max_bytes.is_none());
        assert!(config.reader.namespace.is_none());
        assert!(config.reader.config.is_null());
        assert!(config.writers[0].transforms.is_empty());
    }

    #[test]
    fn paths_derive_from_pipeline_name() {
        let yaml = r"
pipeline: orders
data_dir: /var/lib/transporter
reader:
  use: memory
writers:
  - name: pg
    use: memory
";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.state_db_path(),
            PathBuf::from("/var/lib/transporter/orders/state.db")
        );
        assert_eq!(
            config.commit_log_path("pg"),
            PathBuf::from("/var/lib/transporter/orders/pg.commitlog")
        );
        assert_eq!(
            config.error_log_path("pg"),
            PathBuf::from("/var/lib/transporter/orders/pg.errorlog")
        );
    }

    #[test]
    fn full_declaration_parses() {
        let yaml = r#"
version: "1.0"
pipeline: users_sync
reader:
  use: memory
  namespace: "db\\..*"
  config:
    messages:
      - namespace: db.users
        data: {id: 1}
writers:
  - name: w1
    use: memory
    namespace: "db\\.users"
    transforms:
      - use: omit_deletes
    config:
      fail_after: 10
batching:
  max_batch_records: 4
  max_batch_delay_ms: 50
commit_log_max_bytes: 1048576
shutdown_timeout_seconds: 10
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.writers[0].transforms[0].use_ref, "omit_deletes");
        assert_eq!(config.writers[0].config["fail_after"], 10);
        assert_eq!(config.commit_log_max_bytes, Some(1_048_576));
        assert_eq!(config.batching.max_batch_records, 4);
        assert_eq!(
            config.reader.config["messages"][0]["namespace"],
            "db.users"
        );
    }
}
