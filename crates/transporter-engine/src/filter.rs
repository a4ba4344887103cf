//! Per-edge namespace filter.

use regex::Regex;
use transporter_types::Namespace;

use crate::error::PipelineError;

/// Regex predicate applied to `message.namespace` on every edge before
/// transforms and before writer ingestion.
///
/// Matching is **partial** (unanchored `Regex::is_match`), which is what
/// makes the default pattern `.*` pass everything. Anchor explicitly
/// (`^db\.users$`) when exact matching is wanted.
#[derive(Debug, Clone)]
pub struct NamespaceFilter {
    regex: Regex,
}

impl NamespaceFilter {
    /// Default pattern when a node declares no filter.
    pub const DEFAULT_PATTERN: &'static str = ".*";

    /// Compile a filter from an optional pattern. `None` means match
    /// everything.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when the pattern does not
    /// compile.
    pub fn compile(pattern: Option<&str>) -> Result<Self, PipelineError> {
        let pattern = pattern.unwrap_or(Self::DEFAULT_PATTERN);
        let regex = Regex::new(pattern).map_err(|e| {
            PipelineError::Config(format!("invalid namespace filter '{pattern}': {e}"))
        })?;
        Ok(Self { regex })
    }

    /// Does `namespace` pass this filter?
    #[must_use]
    pub fn matches(&self, namespace: &Namespace) -> bool {
        self.regex.is_match(namespace.as_str())
    }

    /// The compiled pattern, for status output.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}
