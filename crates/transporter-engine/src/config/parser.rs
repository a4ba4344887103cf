//! Pipeline YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::types::PipelineConfig;
use crate::error::PipelineError;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] naming every referenced variable
/// that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String, PipelineError> {
    let mut result = input.to_string();
    let mut missing = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => missing.push(var_name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(PipelineError::Config(format!(
            "missing environment variable(s): {}",
            missing.join(", ")
        )));
    }

    Ok(result)
}

/// Parse a pipeline YAML string (after env var substitution).
///
/// # Errors
///
/// Returns [`PipelineError::Config`] when substitution fails or the
/// YAML is invalid.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineConfig, PipelineError> {
    let substituted = substitute_env_vars(yaml_str)?;
    serde_yaml::from_str(&substituted)
        .map_err(|e| PipelineError::Config(format!("failed to parse pipeline YAML: {e}")))
}

/// Parse a pipeline YAML file.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] when the file cannot be read or
/// the YAML is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!("failed to read pipeline file {}: {e}", path.display()))
    })?;
    parse_pipeline_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_substitution() {
        std::env::set_var("TP_TEST_NS", "db.users");
        let input = "namespace: ${TP_TEST_NS}";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "namespace: db.users");
        std::env::remove_var("TP_TEST_NS");
    }

    #[test]
    fn no_env_vars_passthrough() {
        let input = "pipeline: p\nversion: '1.0'";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn missing_env_vars_all_reported() {
        let input = "${TP_MISSING_X} and ${TP_MISSING_Y}";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        let msg = err.to_string();
        assert!(msg.contains("TP_MISSING_X"));
        assert!(msg.contains("TP_MISSING_Y"));
    }

    #[test]
    fn parse_pipeline_from_string_with_env() {
        std::env::set_var("TP_TEST_DATA_DIR", "/tmp/tp");
        let yaml = r"
pipeline: test
data_dir: ${TP_TEST_DATA_DIR}
reader:
  use: memory
writers:
  - name: w1
    use: memory
";
        let config = parse_pipeline_str(yaml).unwrap();
        assert_eq!(config.data_dir, std::path::PathBuf::from("/tmp/tp"));
        std::env::remove_var("TP_TEST_DATA_DIR");
    }

    #[test]
    fn invalid_yaml_is_config_error() {
        let err = parse_pipeline_str("writers: [not, {a").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = parse_pipeline(Path::new("/nonexistent/pipeline.yaml")).unwrap_err();
        assert!(err.to_string().contains("failed to read pipeline file"));
    }
}
