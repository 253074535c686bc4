//! Error types for the emission backend.
//!
//! Only resource-exhaustion conditions are recoverable errors. Internal
//! consistency violations (illegal operand combinations, size estimate vs.
//! emitted byte mismatches, unhandled IR shapes in the decomposition pass)
//! are compiler defects and panic immediately with a diagnostic.

use thiserror::Error;

/// Errors surfaced to the driver of a method compilation.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The laid-out method exceeds the maximum representable code size.
    #[error("method code size {size} exceeds limit {limit}")]
    MethodTooLarge { size: u64, limit: u64 },

    /// Executable-memory finalization failed.
    #[cfg(feature = "exec")]
    #[error(transparent)]
    Memory(#[from] crate::memory::MemoryError),
}
