//! Registration tables for adaptors and transforms.
//!
//! The supervisor composes pipeline instances from configuration
//! without knowing any concrete type: adaptors and transforms are
//! looked up by name and built from their JSON config blocks. The
//! built-in `memory` adaptor pair is registered by default.

use std::collections::HashMap;

use crate::adaptor::{ReaderAdaptor, WriterAdaptor};
use crate::error::PipelineError;
use crate::transform::Transform;

/// Factory building a reader adaptor from its config block.
pub type ReaderFactory =
    Box<dyn Fn(&serde_json::Value) -> anyhow::Result<Box<dyn ReaderAdaptor>> + Send + Sync>;

/// Factory building a writer adaptor from its config block.
pub type WriterFactory =
    Box<dyn Fn(&serde_json::Value) -> anyhow::Result<Box<dyn WriterAdaptor>> + Send + Sync>;

/// Name-keyed table of reader and writer adaptor factories.
pub struct AdaptorRegistry {
    readers: HashMap<String, ReaderFactory>,
    writers: HashMap<String, WriterFactory>,
}

impl AdaptorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
            writers: HashMap::new(),
        }
    }

    /// A registry with the built-in `memory` adaptor pair registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::adaptors::register_builtins(&mut registry);
        registry
    }

    /// Register a reader factory under `name`, replacing any previous
    /// registration.
    pub fn register_reader(&mut self, name: impl Into<String>, factory: ReaderFactory) {
        self.readers.insert(name.into(), factory);
    }

    /// Register a writer factory under `name`, replacing any previous
    /// registration.
    pub fn register_writer(&mut self, name: impl Into<String>, factory: WriterFactory) {
        self.writers.insert(name.into(), factory);
    }

    /// Build a reader adaptor by name.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] for an unknown name or a factory that
    /// rejects its config.
    pub fn build_reader(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn ReaderAdaptor>, PipelineError> {
        let factory = self
            .readers
            .get(name)
            .ok_or_else(|| PipelineError::Config(format!("unknown reader adaptor '{name}'")))?;
        factory(config)
            .map_err(|e| PipelineError::Config(format!("reader adaptor '{name}' rejected config: {e}")))
    }

    /// Build a writer adaptor by name.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] for an unknown name or a factory that
    /// rejects its config.
    pub fn build_writer(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn WriterAdaptor>, PipelineError> {
        let factory = self
            .writers
            .get(name)
            .ok_or_else(|| PipelineError::Config(format!("unknown writer adaptor '{name}'")))?;
        factory(config)
            .map_err(|e| PipelineError::Config(format!("writer adaptor '{name}' rejected config: {e}")))
    }
}

impl Default for AdaptorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Factory building a transform from its config block.
pub type TransformFactory =
    Box<dyn Fn(&serde_json::Value) -> anyhow::Result<Box<dyn Transform>> + Send + Sync>;

/// Name-keyed function table of transforms.
#[derive(Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFactory>,
}

impl TransformRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform factory under `name`, replacing any
    /// previous registration.
    pub fn register(&mut self, name: impl Into<String>, factory: TransformFactory) {
        self.transforms.insert(name.into(), factory);
    }

    /// Build a transform by name.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] for an unknown name or a factory that
    /// rejects its config.
    pub fn build(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn Transform>, PipelineError> {
        let factory = self
            .transforms
            .get(name)
            .ok_or_else(|| PipelineError::Config(format!("unknown transform '{name}'")))?;
        factory(config)
            .map_err(|e| PipelineError::Config(format!("transform '{name}' rejected config: {e}")))
    }
}
