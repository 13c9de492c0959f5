use std::result;
use thiserror::Error;

/// Errors raised by the layout and lookup tables built over a typed program.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown type id {id}")]
    UnknownType { id: u32 },
    #[error("unknown function id {id}")]
    UnknownFunction { id: u32 },
    #[error("type parameter {name} is not bound")]
    UnboundTypeParam { name: String },
    #[error("type {name} contains itself by value")]
    RecursiveLayout { name: String },
    #[error("type {name} expects {expected} type arguments but got {actual}")]
    TypeArity {
        name: String,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = result::Result<T, Error>;
