//! Call frame layout and the call / return instruction sequences.
//!
//! Offsets are relative to the callee's base pointer:
//!
//! ```text
//!  -(2+P+R) ..   return value slots (R words)
//!  -(2+P)   ..   `this`, then the declared parameters (P words)
//!  -2            saved code pointer
//!  -1            saved base pointer
//!   0            return flag
//!   1 ..         locals
//! ```

use fp_bytecode::{AddressingMode, InstrIndex, Opcode};
use fp_core::thir::{ThirExpr, ThirFunction, Ty, TypeId};

use crate::context::Generator;
use crate::error::LowerResult;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParamSlot {
    pub name: String,
    pub ty: Ty,
    pub offset: i64,
    pub by_ref: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FrameLayout {
    pub function: String,
    pub ret: Ty,
    pub ret_size: usize,
    pub param_size: usize,
    pub params: Vec<ParamSlot>,
    /// Whether a `return` can occur, so scope exits must re-test the flag.
    pub can_return: bool,
    pub owner: Option<TypeId>,
}

impl FrameLayout {
    pub fn ret_offset(&self) -> i64 {
        -(2 + self.param_size as i64 + self.ret_size as i64)
    }

    pub fn param(&self, name: &str) -> Option<&ParamSlot> {
        self.params.iter().find(|param| param.name == name)
    }
}

/// Where a call transfers control to.
pub(crate) enum CallTarget<'e> {
    /// Start of the callee is already known.
    Known(InstrIndex),
    /// Patched later through the linker or the entry fix-up.
    Deferred,
    /// Address computed at run time from a function value.
    Runtime(&'e ThirExpr),
}

impl<'p> Generator<'p> {
    pub fn frame_layout(&self, function: &ThirFunction) -> LowerResult<FrameLayout> {
        let mut slots = Vec::new();
        if let Some(this_ty) = &function.this_ty {
            slots.push(("this".to_string(), self.resolve(this_ty), false));
        }
        for param in &function.params {
            slots.push((param.name.clone(), self.resolve(&param.ty), param.by_ref));
        }

        let mut sizes = Vec::with_capacity(slots.len());
        for (_, ty, by_ref) in &slots {
            sizes.push(if *by_ref { 1 } else { self.size_of(ty)? });
        }
        let param_size: usize = sizes.iter().sum();
        let ret = self.resolve(&function.ret);
        let ret_size = self.size_of(&ret)?;

        let mut offset = -(2 + param_size as i64);
        let mut params = Vec::with_capacity(slots.len());
        for ((name, ty, by_ref), size) in slots.into_iter().zip(sizes) {
            params.push(ParamSlot {
                name,
                ty,
                offset,
                by_ref,
            });
            offset += size as i64;
        }

        Ok(FrameLayout {
            function: function.name.clone(),
            ret,
            ret_size,
            param_size,
            params,
            can_return: !function.ret.is_void() || function.body.contains_return(),
            owner: function.owner(),
        })
    }

    pub fn emit_prologue(&mut self) {
        self.comment("return flag");
        self.emit(Opcode::Push, AddressingMode::Absolute, false);
    }

    pub fn emit_epilogue(&mut self) -> LowerResult<()> {
        self.check_depth("function epilogue", 1)?;
        self.comment("return to caller");
        self.emit_pop(1);
        self.emit_bare(Opcode::PopBasePointer);
        self.emit(Opcode::Jump, AddressingMode::Runtime, 0i64);
        Ok(())
    }

    /// Push the return address and the caller's base pointer, move the base
    /// pointer to the stack top and jump. Returns the jump instruction.
    pub fn emit_call_transfer(&mut self, target: CallTarget<'_>) -> LowerResult<InstrIndex> {
        let return_address = self.placeholder(Opcode::Push, AddressingMode::Absolute);
        self.emit_bare(Opcode::PushBasePointer);
        let jump = match target {
            CallTarget::Known(start) => {
                self.emit(Opcode::SetBasePointer, AddressingMode::Relative, 0i64);
                let site = self.stream.next_index();
                self.emit(Opcode::Jump, AddressingMode::Relative, site.delta_to(start))
            }
            CallTarget::Deferred => {
                self.emit(Opcode::SetBasePointer, AddressingMode::Relative, 0i64);
                self.placeholder(Opcode::Jump, AddressingMode::Relative)
            }
            CallTarget::Runtime(callee) => {
                self.lower_expr(callee)?;
                self.emit(Opcode::SetBasePointer, AddressingMode::Relative, -1i64);
                self.emit(Opcode::Jump, AddressingMode::Runtime, 0i64)
            }
        };
        self.stream.patch(return_address, jump.next().0 as i64)?;
        // the callee's epilogue consumes the saved base pointer and return address
        self.adjust_depth(-2);
        Ok(jump)
    }

    /// Store the value on top of the stack into the frame's return slots and
    /// raise the return flag.
    pub fn emit_return_store(&mut self, ret_offset: i64, ret_size: usize) {
        for word in (0..ret_size as i64).rev() {
            self.emit(
                Opcode::Store,
                AddressingMode::BasePointerRelative,
                ret_offset + word,
            );
        }
        self.emit(Opcode::Push, AddressingMode::Absolute, true);
        self.emit(Opcode::Store, AddressingMode::BasePointerRelative, 0i64);
    }
}
