//! Lexical scopes, cleanup of locals and the return-flag unwinding protocol.
//!
//! Locals declared directly in a block are hoisted: their default words are
//! pushed when the scope opens and each one records a [`CleanupItem`]. A name
//! becomes visible only once its declaration statement is reached. On exit the
//! items are released in reverse declaration order.
//!
//! `return` stores the result, sets the frame's return flag and jumps to the
//! exit of the innermost scope. Every non-root scope exit of a function that
//! can return re-tests the flag and, while it is set, jumps on to the exit of
//! its parent, so each enclosing scope runs its cleanup exactly once.

use fp_bytecode::{AddressingMode, InstrIndex, Opcode};
use fp_core::span::Span;
use fp_core::thir::{ThirLocal, Ty};

use crate::address::ValueAddress;
use crate::context::{Generator, VarSlot};
use crate::debug_info::{SlotKind, SlotRecord};
use crate::error::{GenError, LowerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Global,
    FunctionRoot,
    Block,
    LoopBody,
    /// Inlined macro body; names of the caller are not visible inside.
    Macro,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CleanupItem {
    pub name: String,
    pub size: usize,
    pub should_deallocate: bool,
    pub ty: Ty,
}

#[derive(Debug)]
pub(crate) struct Scope {
    pub kind: ScopeKind,
    pub base_depth: i64,
    pub items: Vec<CleanupItem>,
    pub vars: Vec<VarSlot>,
    hoisted: Vec<VarSlot>,
    next_hoisted: usize,
    pub returns: Vec<InstrIndex>,
    pub start: InstrIndex,
    pub slots: Vec<SlotRecord>,
}

impl Scope {
    pub fn locals_size(&self) -> i64 {
        self.items.iter().map(|item| item.size as i64).sum()
    }
}

#[derive(Debug)]
pub(crate) struct LoopFrame {
    /// Index of the loop body scope in the scope stack.
    pub body_scope: usize,
    pub breaks: Vec<InstrIndex>,
    pub continues: Vec<InstrIndex>,
}

impl<'p> Generator<'p> {
    pub fn enter_scope(&mut self, kind: ScopeKind) {
        let start = self.stream.next_index();
        self.scopes.push(Scope {
            kind,
            base_depth: self.depth,
            items: Vec::new(),
            vars: Vec::new(),
            hoisted: Vec::new(),
            next_hoisted: 0,
            returns: Vec::new(),
            start,
            slots: Vec::new(),
        });
    }

    /// Push default storage for every local the scope declares.
    pub fn hoist_locals<'a>(
        &mut self,
        locals: impl IntoIterator<Item = &'a ThirLocal>,
    ) -> LowerResult<()> {
        let frame_relative = self.frame_relative();
        for local in locals {
            let ty = self.resolve(&local.ty);
            let size = self.size_of(&ty)?;
            let offset = self.depth;
            self.comment(format!("local {}: {}", local.name, self.type_name(&ty)));
            self.push_default(&ty)?;
            let should_deallocate = local.owned && ty.is_heap_backed();
            let slot = VarSlot {
                name: local.name.clone(),
                ty: ty.clone(),
                address: ValueAddress::slot(offset, frame_relative),
            };
            self.record_slot(SlotKind::Variable, &slot);
            let scope = self.current_scope_mut()?;
            scope.items.push(CleanupItem {
                name: local.name.clone(),
                size,
                should_deallocate,
                ty,
            });
            scope.hoisted.push(slot);
        }
        Ok(())
    }

    /// The hoisted slot of the next declaration in the current scope.
    pub fn next_hoisted(&mut self, local: &ThirLocal, span: Span) -> LowerResult<VarSlot> {
        let scope = self.current_scope_mut()?;
        let found = scope
            .hoisted
            .get(scope.next_hoisted)
            .filter(|slot| slot.name == local.name)
            .cloned();
        if found.is_some() {
            scope.next_hoisted += 1;
        }
        found.ok_or_else(|| {
            self.error(
                span,
                format!("declaration of `{}` is not allowed here", local.name),
            )
        })
    }

    pub fn activate(&mut self, slot: VarSlot) -> LowerResult<()> {
        self.current_scope_mut()?.vars.push(slot);
        Ok(())
    }

    /// Bind a name to storage that is already on the stack, registering it for
    /// cleanup in the current scope.
    pub fn bind_local(&mut self, name: &str, ty: Ty, offset: i64) -> LowerResult<()> {
        let size = self.size_of(&ty)?;
        let slot = VarSlot {
            name: name.to_string(),
            ty: ty.clone(),
            address: ValueAddress::slot(offset, self.frame_relative()),
        };
        self.record_slot(SlotKind::Parameter, &slot);
        let scope = self.current_scope_mut()?;
        scope.items.push(CleanupItem {
            name: name.to_string(),
            size,
            should_deallocate: false,
            ty,
        });
        scope.vars.push(slot);
        Ok(())
    }

    #[cfg(test)]
    pub fn declare_variable(&mut self, name: &str, ty: Ty, address: ValueAddress) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.push(VarSlot {
                name: name.to_string(),
                ty,
                address,
            });
        }
    }

    /// Find a name in the open scopes (stopping at a macro boundary), then in
    /// the current function's parameters, then among globals.
    pub fn lookup_variable(&self, name: &str) -> Option<VarSlot> {
        let mut in_macro = false;
        for scope in self.scopes.iter().rev() {
            if let Some(slot) = scope.vars.iter().rev().find(|slot| slot.name == name) {
                return Some(slot.clone());
            }
            if scope.kind == ScopeKind::Macro {
                in_macro = true;
                break;
            }
        }
        if !in_macro {
            if let Some(param) = self.frame.as_ref().and_then(|frame| frame.param(name)) {
                return Some(VarSlot {
                    name: param.name.clone(),
                    ty: param.ty.clone(),
                    address: ValueAddress {
                        offset: param.offset,
                        frame_relative: true,
                        is_reference: param.by_ref,
                        in_heap: false,
                    },
                });
            }
        }
        self.globals.iter().rev().find(|slot| slot.name == name).cloned()
    }

    pub fn current_scope_mut(&mut self) -> Result<&mut Scope, GenError> {
        self.scopes
            .last_mut()
            .ok_or_else(|| GenError::internal("no open scope"))
    }

    fn current_scope(&self) -> Result<&Scope, GenError> {
        self.scopes
            .last()
            .ok_or_else(|| GenError::internal("no open scope"))
    }

    /// Release every cleanup item of `scope_index` in reverse declaration
    /// order. The items must sit on top of the stack.
    fn emit_cleanup(&mut self, scope_index: usize, span: Span) -> LowerResult<()> {
        let items = match self.scopes.get(scope_index) {
            Some(scope) => scope.items.clone(),
            None => return Err(GenError::internal("cleanup of a closed scope").into()),
        };
        for item in items.iter().rev() {
            self.comment(format!("drop {}", item.name));
            if item.should_deallocate && item.size == 1 {
                self.emit_release(&item.ty, span)?;
            } else {
                self.emit_pop(item.size);
            }
        }
        Ok(())
    }

    /// The frame is consistent when the tracked depth equals the base of the
    /// innermost scope plus the storage of its locals, and every scope starts
    /// where its parent's locals end.
    pub fn check_frame(&self, context: &str) -> Result<(), GenError> {
        let scope = self.current_scope()?;
        let first = self
            .scopes
            .iter()
            .rposition(|scope| matches!(scope.kind, ScopeKind::FunctionRoot | ScopeKind::Global))
            .unwrap_or(0);
        for pair in self.scopes[first..].windows(2) {
            let (outer, inner) = (&pair[0], &pair[1]);
            let outer_end = outer.base_depth + outer.locals_size();
            let consistent = if inner.kind == ScopeKind::Macro {
                inner.base_depth >= outer_end
            } else {
                inner.base_depth == outer_end
            };
            if !consistent {
                return Err(GenError::FrameMismatch {
                    context: context.to_string(),
                    expected: outer_end,
                    actual: inner.base_depth,
                });
            }
        }
        self.check_depth(context, scope.base_depth + scope.locals_size())
    }

    pub fn exit_scope(&mut self, span: Span) -> LowerResult<()> {
        self.check_frame("scope exit")?;
        let returns = std::mem::take(&mut self.current_scope_mut()?.returns);
        for site in returns {
            self.patch_here(site)?;
        }
        let index = self.scopes.len() - 1;
        self.emit_cleanup(index, span)?;

        let scope = self
            .scopes
            .pop()
            .ok_or_else(|| GenError::internal("no open scope"))?;
        self.check_depth("scope cleanup", scope.base_depth)?;
        self.debug.scope(scope.start, self.stream.next_index(), scope.slots);

        let propagates = matches!(scope.kind, ScopeKind::Block | ScopeKind::LoopBody)
            && self.frame.as_ref().is_some_and(|frame| frame.can_return);
        if propagates {
            self.comment("propagate return");
            self.emit(Opcode::Load, AddressingMode::BasePointerRelative, 0i64);
            let site = self.placeholder(Opcode::JumpIfTrue, AddressingMode::Absolute);
            self.current_scope_mut()?.returns.push(site);
        }
        Ok(())
    }

    /// Emit the cleanup of every scope from the innermost one down to
    /// `outermost` without closing them, for jumps that leave those scopes.
    pub fn emit_unwind(&mut self, outermost: usize, span: Span) -> LowerResult<()> {
        let depth = self.depth;
        for index in (outermost..self.scopes.len()).rev() {
            self.emit_cleanup(index, span)?;
        }
        let expected = self
            .scopes
            .get(outermost)
            .map(|scope| scope.base_depth)
            .unwrap_or(depth);
        self.check_depth("loop exit", expected)?;
        Ok(())
    }

    pub fn record_slot(&mut self, kind: SlotKind, slot: &VarSlot) {
        if !self.debug.enabled() {
            return;
        }
        let record = SlotRecord::new(&slot.name, kind, &slot.ty, &slot.address);
        if let Some(scope) = self.scopes.last_mut() {
            scope.slots.push(record);
        }
    }
}
