//! Append-only instruction arena.
//!
//! Instructions are addressed by their [`InstrIndex`]; once appended only the
//! immediate may change, through [`InstructionStream::patch`]. Placeholders are
//! emitted with [`PLACEHOLDER`] as their immediate and stay in the pending set
//! until patched.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::instr::{AddressingMode, Immediate, Instruction, Opcode};
use crate::BytecodeError;

pub const PLACEHOLDER: i64 = -1;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
pub struct InstrIndex(pub usize);

impl InstrIndex {
    pub fn next(self) -> InstrIndex {
        InstrIndex(self.0 + 1)
    }

    /// Signed distance from `self` to `target`, as used by relative jumps.
    pub fn delta_to(self, target: InstrIndex) -> i64 {
        target.0 as i64 - self.0 as i64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionStream {
    instructions: Vec<Instruction>,
    pending: BTreeSet<InstrIndex>,
    comments: BTreeMap<InstrIndex, Vec<String>>,
}

impl InstructionStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Index the next appended instruction will receive.
    pub fn next_index(&self) -> InstrIndex {
        InstrIndex(self.instructions.len())
    }

    pub fn emit(&mut self, instruction: Instruction) -> InstrIndex {
        let index = self.next_index();
        self.instructions.push(instruction);
        index
    }

    pub fn emit_placeholder(&mut self, opcode: Opcode, mode: AddressingMode) -> InstrIndex {
        let index = self.emit(Instruction::new(opcode, mode, PLACEHOLDER));
        self.pending.insert(index);
        index
    }

    pub fn patch(&mut self, index: InstrIndex, value: i64) -> Result<(), BytecodeError> {
        let instruction =
            self.instructions
                .get_mut(index.0)
                .ok_or_else(|| BytecodeError::Patch {
                    message: format!("instruction {} does not exist", index),
                })?;
        instruction.immediate = Immediate::Int(value);
        self.pending.remove(&index);
        Ok(())
    }

    pub fn get(&self, index: InstrIndex) -> Option<&Instruction> {
        self.instructions.get(index.0)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn is_pending(&self, index: InstrIndex) -> bool {
        self.pending.contains(&index)
    }

    pub fn pending(&self) -> impl Iterator<Item = InstrIndex> + '_ {
        self.pending.iter().copied()
    }

    pub fn is_fully_linked(&self) -> bool {
        self.pending.is_empty()
    }

    /// Attach a note to the next instruction to be emitted.
    pub fn comment(&mut self, text: impl Into<String>) {
        let index = self.next_index();
        self.comments.entry(index).or_default().push(text.into());
    }

    pub fn comments_at(&self, index: InstrIndex) -> &[String] {
        self.comments
            .get(&index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstrIndex, &Instruction)> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(index, instruction)| (InstrIndex(index), instruction))
    }
}
