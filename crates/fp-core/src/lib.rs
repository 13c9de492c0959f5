pub mod diagnostics;
pub mod error;
pub mod span;
pub mod thir;

// Re-export commonly used items for convenience
pub use tracing;

pub use diagnostics::{Diagnostic, DiagnosticLevel, DiagnosticReport};
pub use span::{FileId, Span};

// Alias for error types
pub type Error = crate::error::Error;
pub type Result<T> = crate::error::Result<T>;
