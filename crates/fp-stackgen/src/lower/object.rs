//! Construction, copying and release of values, and indexing of class
//! objects and raw heap storage.

use fp_bytecode::{AddressingMode, Immediate, Opcode};
use fp_core::diagnostics::Diagnostic;
use fp_core::span::Span;
use fp_core::thir::{GeneralKind, ThirExpr, ThirField, Ty, TypeBindings, TypeRef};
use itertools::Itertools;

use super::Receiver;
use crate::context::Generator;
use crate::error::LowerResult;

impl<'p> Generator<'p> {
    /// Push the zero value of `ty`: scalars are zero, handles and function
    /// values are null, aggregates repeat their members' defaults.
    pub fn push_default(&mut self, ty: &Ty) -> LowerResult<()> {
        match self.resolve(ty) {
            Ty::Void => {}
            Ty::Int | Ty::String | Ty::Heap(_) | Ty::Class(_) | Ty::Function(_) => {
                self.push_int(0);
            }
            Ty::Float => {
                self.emit(Opcode::Push, AddressingMode::Absolute, 0.0f64);
            }
            Ty::Bool => {
                self.emit(Opcode::Push, AddressingMode::Absolute, false);
            }
            Ty::Char => {
                self.emit(Opcode::Push, AddressingMode::Absolute, '\0');
            }
            Ty::Struct(type_ref) => {
                let program = self.program;
                for slot in program.fields(&type_ref)? {
                    self.push_default(&slot.ty)?;
                }
            }
            Ty::Array(element, len) => {
                for _ in 0..len {
                    self.push_default(&element)?;
                }
            }
            Ty::Param(name) => {
                return Err(fp_core::Error::UnboundTypeParam { name }.into());
            }
        }
        Ok(())
    }

    pub(super) fn has_field_defaults(&self, type_ref: &TypeRef) -> LowerResult<bool> {
        let def = self.program.type_def(type_ref.id)?;
        Ok(def.fields.iter().any(|field| field.default.is_some()))
    }

    /// Push the initial value of one field, evaluating its declared default
    /// under the owning type's bindings.
    fn lower_field_default(
        &mut self,
        field: &ThirField,
        ty: &Ty,
        bindings: &TypeBindings,
    ) -> LowerResult<()> {
        match &field.default {
            Some(default) => {
                self.with_bindings(bindings.clone(), |generator| generator.lower_expr(default))
            }
            None => self.push_default(ty),
        }
    }

    pub(super) fn lower_new(&mut self, expr: &ThirExpr, args: &[ThirExpr]) -> LowerResult<()> {
        let ty = self.resolve(&expr.ty);
        match &ty {
            Ty::Struct(type_ref) => self.lower_new_struct(type_ref, args, expr.span),
            Ty::Class(type_ref) => self.lower_new_class(type_ref, &ty, args, expr.span),
            other => Err(self.error(
                expr.span,
                format!("cannot construct a value of type {} with new", self.type_name(other)),
            )),
        }
    }

    /// Structs are built in place on the stack: positional initializers first,
    /// then the remaining fields' defaults.
    pub(super) fn lower_new_struct(
        &mut self,
        type_ref: &TypeRef,
        args: &[ThirExpr],
        span: Span,
    ) -> LowerResult<()> {
        let program = self.program;
        let def = program.type_def(type_ref.id)?;
        let slots = program.fields(type_ref)?;
        if args.len() > slots.len() {
            return Err(self.error(
                span,
                format!(
                    "{} has {} fields but {} initializers were given",
                    def.name,
                    slots.len(),
                    args.len()
                ),
            ));
        }
        let bindings = program.type_bindings(type_ref)?;
        self.comment(format!("new {}", def.name));
        for (index, (slot, field)) in slots.iter().zip(&def.fields).enumerate() {
            match args.get(index) {
                Some(arg) => {
                    self.check_assignable(&slot.ty, arg)?;
                    self.lower_expr(arg)?;
                }
                None => self.lower_field_default(field, &slot.ty, &bindings)?,
            }
        }
        Ok(())
    }

    /// Allocate the object, write every field's initial value, then run the
    /// constructor matching `args` on the fresh handle.
    fn lower_new_class(
        &mut self,
        type_ref: &TypeRef,
        ty: &Ty,
        args: &[ThirExpr],
        span: Span,
    ) -> LowerResult<()> {
        let program = self.program;
        let def = program.type_def(type_ref.id)?;
        let size = program.class_size(type_ref)?;
        let bindings = program.type_bindings(type_ref)?;
        self.comment(format!("new {}", def.name));
        self.emit(Opcode::Allocate, AddressingMode::Absolute, size as i64);

        for (slot, field) in program.fields(type_ref)?.iter().zip(&def.fields) {
            let width = self.size_of(&slot.ty)? as i64;
            self.lower_field_default(field, &slot.ty, &bindings)?;
            for word in (0..width).rev() {
                self.emit(Opcode::Load, AddressingMode::Relative, -(word + 2));
                self.emit(Opcode::HeapSet, AddressingMode::Absolute, slot.offset as i64 + word);
            }
        }

        let arg_tys: Vec<Ty> = args.iter().map(|arg| self.resolve(&arg.ty)).collect();
        match program.find_general(ty, GeneralKind::Constructor, &arg_tys) {
            Some(candidate) => {
                let constructor = program.function(candidate.function())?;
                let args: Vec<&ThirExpr> = args.iter().collect();
                self.emit_bare(Opcode::Duplicate);
                self.lower_function_call(
                    constructor,
                    candidate.type_args(),
                    Receiver::OnStack,
                    &args,
                    span,
                )?;
            }
            None if args.is_empty() => {}
            None => {
                return Err(self.error(
                    span,
                    format!(
                        "{} has no constructor taking ({})",
                        def.name,
                        arg_tys.iter().map(|ty| self.type_name(ty)).join(", ")
                    ),
                ));
            }
        }
        Ok(())
    }

    /// `new T[count]`: one allocation of `count` elements, uninitialized.
    pub(super) fn lower_new_array(&mut self, element: &Ty, count: &ThirExpr) -> LowerResult<()> {
        if self.resolve(&count.ty) != Ty::Int {
            return Err(self.error(
                count.span,
                format!("array length must be int, found {}", self.type_name(&count.ty)),
            ));
        }
        let element_size = self.size_of(element)?;
        self.comment(format!("new {}[]", self.type_name(element)));
        self.lower_expr(count)?;
        if element_size != 1 {
            self.push_int(element_size as i64);
            self.emit_bare(Opcode::Multiply);
        }
        self.emit(Opcode::Allocate, AddressingMode::Pop, Immediate::None);
        Ok(())
    }

    /// Class objects are copied by their cloner; everything else is a plain
    /// copy of its words.
    pub(super) fn lower_clone(&mut self, expr: &ThirExpr, inner: &ThirExpr) -> LowerResult<()> {
        let ty = self.resolve(&inner.ty);
        if !matches!(ty, Ty::Class(_)) {
            return self.lower_expr(inner);
        }
        let program = self.program;
        let Some(candidate) = program.find_general(&ty, GeneralKind::Cloner, &[]) else {
            return Err(self.error(
                expr.span,
                format!("{} has no cloner", self.type_name(&ty)),
            ));
        };
        let cloner = program.function(candidate.function())?;
        self.lower_function_call(
            cloner,
            candidate.type_args(),
            Receiver::Expr(inner),
            &[],
            expr.span,
        )?;
        Ok(())
    }

    /// Release the value of type `ty` on top of the stack, consuming it.
    pub fn emit_release(&mut self, ty: &Ty, span: Span) -> LowerResult<()> {
        let ty = self.resolve(ty);
        match &ty {
            Ty::Class(_) => {
                let program = self.program;
                let Some(candidate) = program.find_general(&ty, GeneralKind::Destructor, &[]) else {
                    let name = self.type_name(&ty);
                    return Err(Diagnostic::error(format!("{} has no destructor", name))
                        .with_span(span)
                        .with_suggestion(format!("define a destructor for {}", name))
                        .into());
                };
                let destructor = program.function(candidate.function())?;
                self.check_access(destructor, span)?;
                self.comment(format!("destroy {}", self.type_name(&ty)));
                // a handle never assigned is still null
                self.emit_bare(Opcode::Duplicate);
                self.push_int(0);
                self.emit_bare(Opcode::NotEqual);
                let skip = self.placeholder(Opcode::JumpIfFalse, AddressingMode::Absolute);
                self.emit_bare(Opcode::Duplicate);
                self.lower_function_call(
                    destructor,
                    candidate.type_args(),
                    Receiver::OnStack,
                    &[],
                    span,
                )?;
                self.patch_here(skip)?;
                self.emit_bare(Opcode::Deallocate);
            }
            Ty::Heap(_) => {
                self.emit_bare(Opcode::Deallocate);
            }
            Ty::String => self.emit_string_release(),
            other => {
                self.warn(
                    span,
                    format!("value of type {} cannot be deallocated", self.type_name(other)),
                );
                let size = self.size_of(other)?;
                self.emit_pop(size);
            }
        }
        Ok(())
    }

    /// `object[index]` on a class calls its index getter.
    pub(super) fn lower_index_call(
        &mut self,
        expr: &ThirExpr,
        prefix: &ThirExpr,
        index: &ThirExpr,
    ) -> LowerResult<()> {
        let prefix_ty = self.resolve(&prefix.ty);
        let index_ty = self.resolve(&index.ty);
        let program = self.program;
        let Some(candidate) =
            program.find_general(&prefix_ty, GeneralKind::IndexGet, std::slice::from_ref(&index_ty))
        else {
            return Err(self.error(
                expr.span,
                format!(
                    "{} cannot be indexed by {}",
                    self.type_name(&prefix_ty),
                    self.type_name(&index_ty)
                ),
            ));
        };
        let getter = program.function(candidate.function())?;
        self.lower_function_call(
            getter,
            candidate.type_args(),
            Receiver::Expr(prefix),
            &[index],
            expr.span,
        )?;
        Ok(())
    }

    /// `object[index] = value` on a class calls its index setter.
    pub(super) fn lower_index_set(
        &mut self,
        prefix: &ThirExpr,
        index: &ThirExpr,
        value: &ThirExpr,
        span: Span,
    ) -> LowerResult<()> {
        let prefix_ty = self.resolve(&prefix.ty);
        let arg_tys = [self.resolve(&index.ty), self.resolve(&value.ty)];
        let program = self.program;
        let Some(candidate) = program.find_general(&prefix_ty, GeneralKind::IndexSet, &arg_tys)
        else {
            return Err(self.error(
                span,
                format!(
                    "{} has no index setter for ({})",
                    self.type_name(&prefix_ty),
                    arg_tys.iter().map(|ty| self.type_name(ty)).join(", ")
                ),
            ));
        };
        let setter = program.function(candidate.function())?;
        let result = self.lower_function_call(
            setter,
            candidate.type_args(),
            Receiver::Expr(prefix),
            &[index, value],
            span,
        )?;
        self.emit_pop(result);
        Ok(())
    }

    /// Element store through a raw heap handle with a run-time offset.
    pub(super) fn lower_heap_store(
        &mut self,
        prefix: &ThirExpr,
        index: &ThirExpr,
        element: &Ty,
        value: &ThirExpr,
    ) -> LowerResult<()> {
        self.check_assignable(element, value)?;
        let element_size = self.size_of(element)?;
        self.lower_heap_offset(prefix, index, element_size)?;
        self.lower_expr(value)?;
        for word in (0..element_size as i64).rev() {
            self.emit(Opcode::Load, AddressingMode::Relative, -(word + 3));
            self.emit(Opcode::Load, AddressingMode::Relative, -(word + 3));
            self.emit(Opcode::HeapSet, AddressingMode::Runtime, word);
        }
        self.emit_pop(2);
        Ok(())
    }
}
