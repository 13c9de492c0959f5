pub mod format;
pub mod instr;
pub mod stream;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use format::format_stream;
pub use instr::{AddressingMode, Immediate, Instruction, Opcode};
pub use stream::{InstrIndex, InstructionStream, PLACEHOLDER};

pub const STACK_MAGIC: [u8; 4] = *b"FPSV";
pub const STACK_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFile {
    pub version: u32,
    pub stream: InstructionStream,
}

#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("instruction patch failed: {message}")]
    Patch { message: String },
    #[error("bytecode encode failed: {0}")]
    Encode(#[from] bincode::Error),
    #[error("bytecode decode failed: {0}")]
    Decode(bincode::Error),
    #[error("bytecode format error: {message}")]
    Format { message: String },
}

pub fn encode_file(stream: &InstructionStream) -> Result<Vec<u8>, BytecodeError> {
    validate_stream(stream)?;
    let file = StackFile {
        version: STACK_VERSION,
        stream: stream.clone(),
    };
    let mut encoded = Vec::new();
    encoded.extend_from_slice(&STACK_MAGIC);
    encoded.extend_from_slice(&STACK_VERSION.to_le_bytes());
    encoded.extend_from_slice(&bincode::serialize(&file)?);
    Ok(encoded)
}

pub fn decode_file(bytes: &[u8]) -> Result<StackFile, BytecodeError> {
    if bytes.len() < 8 {
        return Err(BytecodeError::Format {
            message: "bytecode header too short".to_string(),
        });
    }
    let magic = &bytes[..4];
    if magic != STACK_MAGIC {
        return Err(BytecodeError::Format {
            message: "invalid bytecode magic".to_string(),
        });
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != STACK_VERSION {
        return Err(BytecodeError::Format {
            message: format!(
                "unsupported bytecode version {}, expected {}",
                version, STACK_VERSION
            ),
        });
    }
    let file: StackFile = bincode::deserialize(&bytes[8..]).map_err(BytecodeError::Decode)?;
    if file.version != STACK_VERSION {
        return Err(BytecodeError::Format {
            message: format!(
                "bytecode payload version {} does not match expected {}",
                file.version, STACK_VERSION
            ),
        });
    }
    validate_stream(&file.stream)?;
    Ok(file)
}

/// Check that the stream is fully linked and every static jump lands inside it.
pub fn validate_stream(stream: &InstructionStream) -> Result<(), BytecodeError> {
    if let Some(site) = stream.pending().next() {
        return Err(BytecodeError::Format {
            message: format!("instruction {} was never patched", site),
        });
    }
    for (index, instruction) in stream.iter() {
        validate_instruction(stream, index, instruction)?;
    }
    Ok(())
}

fn validate_instruction(
    stream: &InstructionStream,
    index: InstrIndex,
    instruction: &Instruction,
) -> Result<(), BytecodeError> {
    match instruction.opcode {
        Opcode::Pop | Opcode::CallExternal => {
            if !matches!(instruction.immediate.as_int(), Some(count) if count >= 0) {
                return Err(BytecodeError::Format {
                    message: format!(
                        "instruction {} ({}) needs a non-negative count",
                        index, instruction.opcode
                    ),
                });
            }
        }
        Opcode::NewString => {
            if !matches!(instruction.immediate, Immediate::Str(_)) {
                return Err(BytecodeError::Format {
                    message: format!("instruction {} creates a string without text", index),
                });
            }
        }
        _ if instruction.opcode.is_jump() => validate_jump(stream, index, instruction)?,
        _ => {}
    }
    Ok(())
}

fn validate_jump(
    stream: &InstructionStream,
    index: InstrIndex,
    instruction: &Instruction,
) -> Result<(), BytecodeError> {
    let value = instruction.immediate.as_int();
    let target = match (instruction.mode, value) {
        (AddressingMode::Runtime, _) => return Ok(()),
        (AddressingMode::Absolute, Some(value)) => value,
        (AddressingMode::Relative, Some(value)) => index.0 as i64 + value,
        (mode, _) => {
            return Err(BytecodeError::Format {
                message: format!("jump at {} has unsupported operand ({})", index, mode),
            })
        }
    };
    if target < 0 || target as usize >= stream.len() {
        return Err(BytecodeError::Format {
            message: format!("jump at {} targets {} outside the stream", index, target),
        });
    }
    Ok(())
}
