//! Semantic validation for parsed pipeline configuration values.

use std::collections::HashSet;

use crate::config::types::PipelineConfig;
use crate::error::PipelineError;

fn check_pattern(pattern: Option<&str>, context: &str, errors: &mut Vec<String>) {
    if let Some(pattern) = pattern {
        if let Err(e) = regex::Regex::new(pattern) {
            errors.push(format!("{context}: invalid namespace pattern '{pattern}': {e}"));
        }
    }
}

/// Validate a parsed pipeline configuration. Collects every problem
/// before failing so the operator fixes them in one pass.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] listing all validation failures.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<(), PipelineError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("pipeline name must not be empty".to_string());
    }

    if config.reader.use_ref.trim().is_empty() {
        errors.push("reader adaptor reference (use) must not be empty".to_string());
    }
    check_pattern(config.reader.namespace.as_deref(), "reader", &mut errors);

    if config.writers.is_empty() {
        errors.push("pipeline must declare at least one writer".to_string());
    }

    let mut seen_names = HashSet::new();
    for (i, writer) in config.writers.iter().enumerate() {
        let context = format!("writers[{i}]");
        if writer.name.trim().is_empty() {
            errors.push(format!("{context}: writer name must not be empty"));
        } else if !seen_names.insert(writer.name.clone()) {
            errors.push(format!(
                "{context}: duplicate writer name '{}'",
                writer.name
            ));
        }
        if writer.use_ref.trim().is_empty() {
            errors.push(format!(
                "{context}: writer adaptor reference (use) must not be empty"
            ));
        }
        check_pattern(writer.namespace.as_deref(), &context, &mut errors);
        for (j, transform) in writer.transforms.iter().enumerate() {
            let t_context = format!("{context}.transforms[{j}]");
            if transform.use_ref.trim().is_empty() {
                errors.push(format!("{t_context}: transform reference (use) must not be empty"));
            }
            check_pattern(transform.namespace.as_deref(), &t_context, &mut errors);
        }
    }

    if config.batching.max_batch_records == 0 {
        errors.push("batching.max_batch_records must be at least 1".to_string());
    }
    if config.batching.buffer_capacity == 0 {
        errors.push("batching.buffer_capacity must be at least 1".to_string());
    }
    if config.shutdown_timeout_seconds == 0 {
        errors.push("shutdown_timeout_seconds must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "pipeline validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn valid_yaml() -> &'static str {
        r#"
pipeline: p
reader:
  use: memory
writers:
  - name: w1
    use: memory
    namespace: "db\\.a"
"#
    }

    #[test]
    fn valid_config_passes() {
        let config = parse_pipeline_str(valid_yaml()).unwrap();
        validate_pipeline(&config).unwrap();
    }

    #[test]
    fn bad_regex_reported_with_context() {
        let yaml = r#"
pipeline: p
reader:
  use: memory
  namespace: "[unclosed"
writers:
  - name: w1
    use: memory
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("reader"), "got: {msg}");
        assert!(msg.contains("[unclosed"), "got: {msg}");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn duplicate_writer_names_rejected() {
        let yaml = r"
pipeline: p
reader:
  use: memory
writers:
  - name: w1
    use: memory
  - name: w1
    use: memory
";
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate writer name"));
    }

    #[test]
    fn no_writers_rejected() {
        let yaml = r"
pipeline: p
reader:
  use: memory
writers: []
";
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err();
        assert!(err.to_string().contains("at least one writer"));
    }

    #[test]
    fn multiple_problems_all_reported() {
        let yaml = r#"
version: "2.0"
pipeline: ""
reader:
  use: ""
writers: []
batching:
  max_batch_records: 0
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("version"));
        assert!(msg.contains("pipeline name"));
        assert!(msg.contains("reader adaptor"));
        assert!(msg.contains("max_batch_records"));
    }

    #[test]
    fn zero_shutdown_timeout_rejected() {
        let yaml = r"
pipeline: p
reader:
  use: memory
writers:
  - name: w1
    use: memory
shutdown_timeout_seconds: 0
";
        let config = parse_pipeline_str(yaml).unwrap();
        assert!(validate_pipeline(&config).is_err());
    }

    #[test]
    fn transform_pattern_checked() {
        let yaml = r#"
pipeline: p
reader:
  use: memory
writers:
  - name: w1
    use: memory
    transforms:
      - use: t1
        namespace: "(bad"
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err();
        assert!(err.to_string().contains("transforms[0]"));
    }
}
