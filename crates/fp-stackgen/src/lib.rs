//! Lowering of typed programs to stack-machine instruction streams.
//!
//! [`generate`] walks a [`ThirProgram`] once, emitting instructions for every
//! top-level statement, every concrete function and every generic instance
//! the program reaches, and links all forward references before returning.
//! User errors are collected as diagnostics; only violations of the
//! generator's own invariants surface as [`GenError`].

mod address;
mod context;
pub mod debug_info;
pub mod error;
mod fold;
mod frame;
pub mod generics;
pub mod link;
mod lower;
pub mod options;
mod scope;

pub use address::ValueAddress;
pub use debug_info::DebugInfo;
pub use error::GenError;
pub use generics::InstanceKey;
pub use options::GeneratorOptions;

use fp_bytecode::{encode_file, InstructionStream};
use fp_core::diagnostics::{Diagnostic, DiagnosticReport};
use fp_core::thir::ThirProgram;

use crate::context::Generator;

#[derive(Debug, Clone)]
pub struct GeneratedProgram {
    pub stream: InstructionStream,
    /// Present when [`GeneratorOptions::emit_debug_info`] is set.
    pub debug_info: Option<DebugInfo>,
}

impl GeneratedProgram {
    /// Serialized stream in the stack-file container format.
    pub fn encode(&self) -> Result<Vec<u8>, GenError> {
        Ok(encode_file(&self.stream)?)
    }
}

/// Generate the instruction stream of a whole program.
///
/// The report carries no value when any error diagnostic was produced; the
/// diagnostics then describe every statement that could not be lowered.
pub fn generate(
    program: &ThirProgram,
    options: &GeneratorOptions,
) -> Result<DiagnosticReport<GeneratedProgram>, GenError> {
    let mut generator = Generator::new(program, options.clone());
    generator.generate_program()?;

    let Generator {
        stream,
        diagnostics,
        debug,
        ..
    } = generator;
    if diagnostics.iter().any(Diagnostic::is_error) {
        return Ok(DiagnosticReport::failure(diagnostics));
    }
    Ok(DiagnosticReport::success_with_diagnostics(
        GeneratedProgram {
            stream,
            debug_info: debug.finish(),
        },
        diagnostics,
    ))
}
