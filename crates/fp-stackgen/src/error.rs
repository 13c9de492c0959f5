use fp_bytecode::BytecodeError;
use fp_core::diagnostics::Diagnostic;
use thiserror::Error;

/// Violations of the generator's own invariants. Any of these aborts the whole
/// run: they point at a generator bug or a malformed tree, not at user code.
#[derive(Debug, Error)]
pub enum GenError {
    #[error("internal generator error: {message}")]
    Internal { message: String },
    #[error("call site {site} references {target}, which was never generated")]
    UnresolvedOffset { site: usize, target: String },
    #[error("generic instantiation limit of {limit} exceeded while instantiating {function}")]
    InstantiationLimit { limit: usize, function: String },
    #[error("frame layout mismatch in {context}: tracked {actual} words, expected {expected}")]
    FrameMismatch {
        context: String,
        expected: i64,
        actual: i64,
    },
    #[error("unknown node: {message}")]
    UnknownNode { message: String },
    #[error("invalid generator options: {message}")]
    Config { message: String },
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

impl GenError {
    pub fn internal(message: impl Into<String>) -> Self {
        GenError::Internal {
            message: message.into(),
        }
    }
}

/// Failure of a single node. User diagnostics abandon the statement being
/// lowered; fatal errors unwind the whole generation.
#[derive(Debug)]
pub(crate) enum LowerError {
    Diagnostic(Box<Diagnostic>),
    Fatal(GenError),
}

pub(crate) type LowerResult<T> = Result<T, LowerError>;

impl From<GenError> for LowerError {
    fn from(err: GenError) -> Self {
        LowerError::Fatal(err)
    }
}

impl From<BytecodeError> for LowerError {
    fn from(err: BytecodeError) -> Self {
        LowerError::Fatal(err.into())
    }
}

impl From<Diagnostic> for LowerError {
    fn from(diagnostic: Diagnostic) -> Self {
        LowerError::Diagnostic(Box::new(diagnostic))
    }
}

impl From<fp_core::Error> for LowerError {
    fn from(err: fp_core::Error) -> Self {
        match err {
            fp_core::Error::UnknownType { .. } | fp_core::Error::UnknownFunction { .. } => {
                LowerError::Fatal(GenError::UnknownNode {
                    message: err.to_string(),
                })
            }
            other => Diagnostic::error(other.to_string()).into(),
        }
    }
}
