use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Opcode {
    Push,
    Load,
    Store,
    Pop,
    Duplicate,
    Jump,
    JumpIfTrue,
    JumpIfFalse,
    PushBasePointer,
    SetBasePointer,
    PopBasePointer,
    Allocate,
    Deallocate,
    HeapGet,
    HeapSet,
    NewString,
    CallExternal,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negate,
    Not,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    IntToFloat,
    FloatToInt,
    Exit,
}

impl Opcode {
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse)
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Subtract
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::Modulo
                | Opcode::BitAnd
                | Opcode::BitOr
                | Opcode::BitXor
                | Opcode::ShiftLeft
                | Opcode::ShiftRight
                | Opcode::Equal
                | Opcode::NotEqual
                | Opcode::Less
                | Opcode::LessEqual
                | Opcode::Greater
                | Opcode::GreaterEqual
        )
    }
}

/// How an instruction's immediate is interpreted.
///
/// `Relative` addresses are `sp + imm`, with `sp` read before the instruction
/// pops anything. `Runtime` pops a base address and adds the immediate. `Pop`
/// takes the operand itself from the top of the stack.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    IntoStaticStr,
)]
pub enum AddressingMode {
    #[strum(serialize = "abs")]
    Absolute,
    #[strum(serialize = "bp")]
    BasePointerRelative,
    #[strum(serialize = "rel")]
    Relative,
    #[strum(serialize = "rt")]
    Runtime,
    #[strum(serialize = "pop")]
    Pop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Immediate {
    None,
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
}

impl Immediate {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Immediate::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl Display for Immediate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Immediate::None => Ok(()),
            Immediate::Int(value) => write!(f, "{}", value),
            Immediate::Float(value) => write!(f, "{:?}", value),
            Immediate::Bool(value) => write!(f, "{}", value),
            Immediate::Char(value) => write!(f, "{:?}", value),
            Immediate::Str(value) => write!(f, "{:?}", value),
        }
    }
}

impl From<i64> for Immediate {
    fn from(value: i64) -> Self {
        Immediate::Int(value)
    }
}

impl From<f64> for Immediate {
    fn from(value: f64) -> Self {
        Immediate::Float(value)
    }
}

impl From<bool> for Immediate {
    fn from(value: bool) -> Self {
        Immediate::Bool(value)
    }
}

impl From<char> for Immediate {
    fn from(value: char) -> Self {
        Immediate::Char(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub mode: AddressingMode,
    pub immediate: Immediate,
}

impl Instruction {
    pub fn new(opcode: Opcode, mode: AddressingMode, immediate: impl Into<Immediate>) -> Self {
        Self {
            opcode,
            mode,
            immediate: immediate.into(),
        }
    }

    /// An instruction that takes no immediate.
    pub fn bare(opcode: Opcode) -> Self {
        Self {
            opcode,
            mode: AddressingMode::Absolute,
            immediate: Immediate::None,
        }
    }

    /// Net change of the stack height when the instruction executes and falls
    /// through. `None` for `CallExternal`, whose result size is only known to
    /// the caller.
    pub fn stack_effect(&self) -> Option<i64> {
        let runtime = self.mode == AddressingMode::Runtime;
        let popped = self.mode == AddressingMode::Pop;
        let effect = match self.opcode {
            Opcode::Push | Opcode::Duplicate | Opcode::PushBasePointer | Opcode::NewString => 1,
            Opcode::Load if runtime => 0,
            Opcode::Load => 1,
            Opcode::HeapGet if runtime => -1,
            Opcode::HeapGet => 0,
            Opcode::Store if runtime => -2,
            Opcode::Store => -1,
            Opcode::HeapSet if runtime => -3,
            Opcode::HeapSet => -2,
            Opcode::Pop => -self.immediate.as_int().unwrap_or(0),
            Opcode::Jump if runtime => -1,
            Opcode::Jump => 0,
            Opcode::JumpIfTrue | Opcode::JumpIfFalse => -1,
            Opcode::SetBasePointer => 0,
            Opcode::PopBasePointer | Opcode::Deallocate => -1,
            Opcode::Allocate if popped => 0,
            Opcode::Allocate => 1,
            Opcode::CallExternal => return None,
            Opcode::Negate | Opcode::Not | Opcode::IntToFloat | Opcode::FloatToInt => 0,
            Opcode::Exit => 0,
            _ if self.opcode.is_binary() => -1,
            _ => 0,
        };
        Some(effect)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.immediate {
            Immediate::None => write!(f, "{}", self.opcode),
            immediate => write!(f, "{} {} {}", self.opcode, self.mode, immediate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn opcode_names_round_trip_through_strings() {
        assert_eq!(Opcode::JumpIfFalse.to_string(), "jump_if_false");
        assert_eq!(Opcode::from_str("heap_set").unwrap(), Opcode::HeapSet);
        assert_eq!(AddressingMode::BasePointerRelative.to_string(), "bp");
    }

    #[test]
    fn stack_effects_follow_addressing_mode() {
        let load = Instruction::new(Opcode::Load, AddressingMode::BasePointerRelative, 2i64);
        let deref = Instruction::new(Opcode::Load, AddressingMode::Runtime, 0i64);
        let set = Instruction::new(Opcode::HeapSet, AddressingMode::Runtime, 0i64);
        let pop = Instruction::new(Opcode::Pop, AddressingMode::Absolute, 3i64);
        assert_eq!(load.stack_effect(), Some(1));
        assert_eq!(deref.stack_effect(), Some(0));
        assert_eq!(set.stack_effect(), Some(-3));
        assert_eq!(pop.stack_effect(), Some(-3));
        assert_eq!(Instruction::bare(Opcode::Add).stack_effect(), Some(-1));
        assert_eq!(
            Instruction::new(Opcode::CallExternal, AddressingMode::Absolute, 2i64).stack_effect(),
            None
        );
    }

    #[test]
    fn display_omits_empty_immediates() {
        let push = Instruction::new(Opcode::Push, AddressingMode::Absolute, 1.5f64);
        assert_eq!(push.to_string(), "push abs 1.5");
        assert_eq!(Instruction::bare(Opcode::Exit).to_string(), "exit");
    }
}
