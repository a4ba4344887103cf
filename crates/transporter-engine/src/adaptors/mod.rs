//! Built-in adaptors.
//!
//! Real source and sink systems live behind out-of-tree adaptors; the
//! in-memory pair here is the reference implementation of the contracts
//! and the workhorse of the integration suite.

pub mod memory;

use crate::registry::AdaptorRegistry;

/// Register every built-in adaptor under its canonical name.
pub(crate) fn register_builtins(registry: &mut AdaptorRegistry) {
    registry.register_reader(
        "memory",
        Box::new(|config| Ok(Box::new(memory::MemoryReader::from_config(config)?) as _)),
    );
    registry.register_writer(
        "memory",
        Box::new(|config| Ok(Box::new(memory::MemoryWriter::from_config(config)?) as _)),
    );
}
