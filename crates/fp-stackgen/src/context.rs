use std::collections::HashMap;

use fp_bytecode::{AddressingMode, Immediate, InstrIndex, Instruction, InstructionStream, Opcode};
use fp_core::diagnostics::Diagnostic;
use fp_core::span::{FileId, Span};
use fp_core::thir::{FunctionId, ThirProgram, Ty, TypeBindings, TypeId};

use crate::address::ValueAddress;
use crate::debug_info::DebugInfoBuilder;
use crate::error::{GenError, LowerError, LowerResult};
use crate::frame::FrameLayout;
use crate::generics::{InstanceKey, InstantiationQueue};
use crate::link::Linker;
use crate::options::GeneratorOptions;
use crate::scope::{LoopFrame, Scope};

/// A named storage slot visible to lowering: a local, a global or a bound
/// macro parameter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VarSlot {
    pub name: String,
    pub ty: Ty,
    pub address: ValueAddress,
}

/// All mutable state of one generation run. Every lowering routine takes
/// `&mut Generator`; nothing lives in statics.
pub(crate) struct Generator<'p> {
    pub program: &'p ThirProgram,
    pub options: GeneratorOptions,
    pub stream: InstructionStream,
    pub diagnostics: Vec<Diagnostic>,
    /// Words above the base pointer (inside a function) or above the bottom of
    /// the stack (top level), tracked from the stack effect of every emitted
    /// instruction.
    pub depth: i64,
    pub scopes: Vec<Scope>,
    pub loops: Vec<LoopFrame>,
    pub bindings: TypeBindings,
    pub frame: Option<FrameLayout>,
    pub globals: Vec<VarSlot>,
    pub name_cache: HashMap<String, i64>,
    pub offsets: HashMap<InstanceKey, InstrIndex>,
    pub linker: Linker,
    pub queue: InstantiationQueue,
    pub debug: DebugInfoBuilder,
    pub macro_depth: usize,
    pub current_file: FileId,
    pub entry_site: Option<(FunctionId, InstrIndex)>,
}

/// State restored when a statement is abandoned after a user error.
pub(crate) struct Snapshot {
    depth: i64,
    scopes: usize,
    loops: usize,
}

impl<'p> Generator<'p> {
    pub fn new(program: &'p ThirProgram, options: GeneratorOptions) -> Self {
        let debug = DebugInfoBuilder::new(options.emit_debug_info);
        let queue = InstantiationQueue::new(options.max_generic_instantiations);
        Self {
            program,
            options,
            stream: InstructionStream::new(),
            diagnostics: Vec::new(),
            depth: 0,
            scopes: Vec::new(),
            loops: Vec::new(),
            bindings: TypeBindings::new(),
            frame: None,
            globals: Vec::new(),
            name_cache: HashMap::new(),
            offsets: HashMap::new(),
            linker: Linker::default(),
            queue,
            debug,
            macro_depth: 0,
            current_file: 0,
            entry_site: None,
        }
    }

    pub fn emit(
        &mut self,
        opcode: Opcode,
        mode: AddressingMode,
        immediate: impl Into<Immediate>,
    ) -> InstrIndex {
        let instruction = Instruction::new(opcode, mode, immediate);
        if let Some(effect) = instruction.stack_effect() {
            self.depth += effect;
        }
        self.stream.emit(instruction)
    }

    pub fn emit_bare(&mut self, opcode: Opcode) -> InstrIndex {
        let instruction = Instruction::bare(opcode);
        if let Some(effect) = instruction.stack_effect() {
            self.depth += effect;
        }
        self.stream.emit(instruction)
    }

    pub fn placeholder(&mut self, opcode: Opcode, mode: AddressingMode) -> InstrIndex {
        let index = self.stream.emit_placeholder(opcode, mode);
        if let Some(effect) = self.stream.get(index).and_then(Instruction::stack_effect) {
            self.depth += effect;
        }
        index
    }

    pub fn push_int(&mut self, value: i64) -> InstrIndex {
        self.emit(Opcode::Push, AddressingMode::Absolute, value)
    }

    pub fn emit_pop(&mut self, words: usize) {
        if words > 0 {
            self.emit(Opcode::Pop, AddressingMode::Absolute, words as i64);
        }
    }

    /// Point an absolute jump at the next instruction to be emitted.
    pub fn patch_here(&mut self, site: InstrIndex) -> LowerResult<()> {
        let target = self.stream.next_index();
        self.patch_to(site, target)
    }

    pub fn patch_to(&mut self, site: InstrIndex, target: InstrIndex) -> LowerResult<()> {
        self.stream.patch(site, target.0 as i64)?;
        Ok(())
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.stream.comment(text);
    }

    pub fn adjust_depth(&mut self, delta: i64) {
        self.depth += delta;
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            depth: self.depth,
            scopes: self.scopes.len(),
            loops: self.loops.len(),
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) {
        self.depth = snapshot.depth;
        self.scopes.truncate(snapshot.scopes);
        self.loops.truncate(snapshot.loops);
    }

    /// Whether slots are addressed from the base pointer: true inside a
    /// function body, false for top-level code.
    pub fn frame_relative(&self) -> bool {
        self.frame.is_some()
    }

    pub fn slot_mode(&self, frame_relative: bool) -> AddressingMode {
        if frame_relative {
            AddressingMode::BasePointerRelative
        } else {
            AddressingMode::Absolute
        }
    }

    pub fn resolve(&self, ty: &Ty) -> Ty {
        ty.substitute(&self.bindings)
    }

    pub fn size_of(&self, ty: &Ty) -> LowerResult<usize> {
        Ok(self.program.size_of(&self.resolve(ty))?)
    }

    pub fn current_owner(&self) -> Option<TypeId> {
        self.frame.as_ref().and_then(|frame| frame.owner)
    }

    /// Run `f` with `bindings` as the type parameter bindings in effect, then
    /// restore the previous ones whatever the outcome.
    pub fn with_bindings<T>(
        &mut self,
        bindings: TypeBindings,
        f: impl FnOnce(&mut Self) -> LowerResult<T>,
    ) -> LowerResult<T> {
        let saved = std::mem::replace(&mut self.bindings, bindings);
        let result = f(self);
        self.bindings = saved;
        result
    }

    pub fn error(&self, span: Span, message: impl Into<String>) -> LowerError {
        Diagnostic::error(message).with_span(span).into()
    }

    pub fn warn(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(message).with_span(span));
    }

    pub fn note(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::info(message).with_span(span));
    }

    pub fn type_name(&self, ty: &Ty) -> String {
        self.program.type_name(&self.resolve(ty))
    }

    pub fn check_depth(&self, context: impl Into<String>, expected: i64) -> Result<(), GenError> {
        if self.depth != expected {
            return Err(GenError::FrameMismatch {
                context: context.into(),
                expected,
                actual: self.depth,
            });
        }
        Ok(())
    }
}
