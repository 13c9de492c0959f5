//! Calls of user functions, operators, function values and host functions,
//! plus inline expansion of macros.

use fp_bytecode::{AddressingMode, Immediate, Opcode};
use fp_core::span::Span;
use fp_core::thir::{
    Candidate, ThirCall, ThirCallee, ThirExpr, ThirFunction, ThirStmtKind, Ty, TypeBindings,
    Visibility,
};
use tracing::debug;

use super::expr::callee_kind;
use crate::context::Generator;
use crate::debug_info::FunctionRecord;
use crate::error::{GenError, LowerResult};
use crate::frame::CallTarget;
use crate::generics::InstanceKey;
use crate::link::{ReferenceKind, UndefinedOffset};
use crate::scope::ScopeKind;

/// Where the implicit `this` argument of a call comes from.
#[derive(Clone, Copy)]
pub(crate) enum Receiver<'e> {
    None,
    /// Evaluated after the return slots are reserved.
    Expr(&'e ThirExpr),
    /// Already on top of the stack; only valid for calls without a result.
    OnStack,
}

impl<'p> Generator<'p> {
    pub(super) fn lower_call(&mut self, call: &ThirCall, expr: &ThirExpr) -> LowerResult<()> {
        let args: Vec<&ThirExpr> = call.args.iter().collect();
        match &call.callee {
            ThirCallee::Function {
                function,
                type_args,
            } => {
                let program = self.program;
                let func = program.function(*function)?;
                let receiver = match &call.prefix {
                    Some(prefix) => Receiver::Expr(prefix),
                    None => Receiver::None,
                };
                self.lower_function_call(func, type_args, receiver, &args, expr.span)?;
                Ok(())
            }
            ThirCallee::Value(callee) => self.lower_value_call(callee, &args, expr.span),
            ThirCallee::External(name) => self.lower_external_call(name, &args, expr.span),
        }
    }

    /// Private members are only reachable from functions of the same type.
    pub(super) fn check_access(&self, func: &ThirFunction, span: Span) -> LowerResult<()> {
        if func.visibility == Visibility::Private {
            if let Some(owner) = func.owner() {
                if self.current_owner() != Some(owner) {
                    return Err(self.error(
                        span,
                        format!("`{}` is private to its type", func.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolve the instance a reference to `func` names, queueing generic
    /// instances that were not requested before.
    pub(super) fn instance_key(
        &mut self,
        func: &ThirFunction,
        type_args: &[Ty],
        span: Span,
    ) -> LowerResult<InstanceKey> {
        self.check_type_arity(func, type_args, span)?;
        if !func.is_generic() {
            return Ok(InstanceKey::concrete(func.id));
        }
        let type_args: Vec<Ty> = type_args.iter().map(|ty| self.resolve(ty)).collect();
        if type_args.iter().any(Ty::contains_params) {
            return Err(GenError::internal(format!(
                "unbound type arguments in reference to `{}`",
                func.name
            ))
            .into());
        }
        let key = InstanceKey::new(func.id, type_args);
        if self.queue.request(key.clone()) {
            debug!("queued instance {}", self.instance_name(&key));
        }
        Ok(key)
    }

    fn check_type_arity(
        &self,
        func: &ThirFunction,
        type_args: &[Ty],
        span: Span,
    ) -> LowerResult<()> {
        if type_args.len() != func.type_params.len() {
            return Err(self.error(
                span,
                format!(
                    "`{}` expects {} type arguments but got {}",
                    func.name,
                    func.type_params.len(),
                    type_args.len()
                ),
            ));
        }
        Ok(())
    }

    fn callee_bindings(&self, func: &ThirFunction, type_args: &[Ty]) -> TypeBindings {
        func.type_params
            .iter()
            .cloned()
            .zip(type_args.iter().map(|ty| self.resolve(ty)))
            .collect()
    }

    /// Lower a call of a user function, operator or general function. Returns
    /// the number of result words left on the stack.
    pub(crate) fn lower_function_call(
        &mut self,
        func: &'p ThirFunction,
        type_args: &[Ty],
        receiver: Receiver<'_>,
        args: &[&ThirExpr],
        span: Span,
    ) -> LowerResult<usize> {
        self.check_access(func, span)?;
        if args.len() != func.params.len() {
            return Err(self.error(
                span,
                format!(
                    "`{}` expects {} arguments but got {}",
                    func.name,
                    func.params.len(),
                    args.len()
                ),
            ));
        }
        match (&func.this_ty, receiver) {
            (Some(_), Receiver::None) => {
                return Err(self.error(span, format!("method `{}` needs a receiver", func.name)));
            }
            (None, Receiver::Expr(_) | Receiver::OnStack) => {
                return Err(self.error(
                    span,
                    format!("function `{}` does not take a receiver", func.name),
                ));
            }
            _ => {}
        }

        let bindings = self.callee_bindings(func, type_args);
        if func.is_macro {
            self.check_type_arity(func, type_args, span)?;
            return self.expand_macro(func, bindings, receiver, args, span);
        }
        let key = self.instance_key(func, type_args, span)?;

        let ret = self.resolve(&func.ret.substitute(&bindings));
        let ret_size = self.size_of(&ret)?;
        if matches!(receiver, Receiver::OnStack) && ret_size > 0 {
            return Err(self.error(
                span,
                format!("`{}` must not return a value", func.name),
            ));
        }

        self.comment(format!("call {}", self.instance_name(&key)));
        self.push_default(&ret)?;
        let this_ty = func
            .this_ty
            .as_ref()
            .map(|ty| self.resolve(&ty.substitute(&bindings)));
        if let Receiver::Expr(prefix) = receiver {
            if let Some(this_ty) = &this_ty {
                self.check_assignable(this_ty, prefix)?;
            }
            self.lower_expr(prefix)?;
        }

        let mut param_tys = Vec::with_capacity(args.len());
        for (param, arg) in func.params.iter().zip(args) {
            let param_ty = self.resolve(&param.ty.substitute(&bindings));
            if param.by_ref {
                let Some(place) = self.resolve_place(arg)? else {
                    return Err(self.error(
                        arg.span,
                        format!("argument for `{}` must be a variable", param.name),
                    ));
                };
                if place.ty != param_ty {
                    return Err(self.error(
                        arg.span,
                        format!(
                            "type mismatch: expected {}, found {}",
                            self.type_name(&param_ty),
                            self.type_name(&place.ty)
                        ),
                    ));
                }
                self.emit_place_address(&place, arg)?;
            } else {
                self.check_assignable(&param_ty, arg)?;
                self.lower_expr(arg)?;
            }
            param_tys.push(param_ty);
        }

        let known = self.offsets.get(&key).copied();
        let target = match known {
            Some(start) => CallTarget::Known(start),
            None => CallTarget::Deferred,
        };
        let jump = self.emit_call_transfer(target)?;
        if known.is_none() {
            self.linker.record(UndefinedOffset {
                site: jump,
                target: key,
                reference: ReferenceKind::Relative,
                callee: callee_kind(func),
                span,
                file: self.current_file,
            });
        }

        // arguments come off in reverse; consumed heap values are released
        let mut pending = 0;
        for ((param, arg), param_ty) in func.params.iter().zip(args).zip(&param_tys).rev() {
            if param.by_ref {
                pending += 1;
            } else if param.consumes && param_ty.is_heap_backed() {
                self.emit_pop(pending);
                pending = 0;
                self.emit_release(param_ty, arg.span)?;
            } else {
                pending += self.size_of(param_ty)?;
            }
        }
        if let Some(this_ty) = &this_ty {
            pending += self.size_of(this_ty)?;
        }
        self.emit_pop(pending);
        Ok(ret_size)
    }

    pub(super) fn lower_operator_call(
        &mut self,
        candidate: &Candidate,
        operands: &[&ThirExpr],
        span: Span,
    ) -> LowerResult<()> {
        let program = self.program;
        let func = program.function(candidate.function())?;
        self.lower_function_call(func, candidate.type_args(), Receiver::None, operands, span)?;
        Ok(())
    }

    /// Call through a function value: the callee's offset is computed last
    /// and consumed by the runtime jump.
    fn lower_value_call(
        &mut self,
        callee: &ThirExpr,
        args: &[&ThirExpr],
        span: Span,
    ) -> LowerResult<()> {
        let Ty::Function(sig) = self.resolve(&callee.ty) else {
            return Err(self.error(
                callee.span,
                format!("type {} is not callable", self.type_name(&callee.ty)),
            ));
        };
        if sig.params.len() != args.len() {
            return Err(self.error(
                span,
                format!(
                    "function value expects {} arguments but got {}",
                    sig.params.len(),
                    args.len()
                ),
            ));
        }
        self.comment("call by value");
        self.push_default(&sig.ret)?;
        let mut arg_words = 0;
        for (param_ty, arg) in sig.params.iter().zip(args) {
            self.check_assignable(param_ty, arg)?;
            self.lower_expr(arg)?;
            arg_words += self.size_of(param_ty)?;
        }
        self.emit_call_transfer(CallTarget::Runtime(callee))?;
        self.emit_pop(arg_words);
        Ok(())
    }

    /// Host calls pass the callee's name as a string object on top of the
    /// arguments. With the name cache the string is preallocated once.
    fn lower_external_call(
        &mut self,
        name: &str,
        args: &[&ThirExpr],
        span: Span,
    ) -> LowerResult<()> {
        let program = self.program;
        let Some(external) = program.external(name) else {
            return Err(self.error(span, format!("unknown external function `{}`", name)));
        };
        if external.params.len() != args.len() {
            return Err(self.error(
                span,
                format!(
                    "external `{}` expects {} arguments but got {}",
                    name,
                    external.params.len(),
                    args.len()
                ),
            ));
        }
        let mut arg_words = 0;
        for param in &external.params {
            arg_words += self.size_of(param)?;
        }
        let ret_size = self.size_of(&external.ret)?;
        let (arg_words, ret_words) = (arg_words as i64, ret_size as i64);

        self.comment(format!("external {}", name));
        match self.name_cache.get(name).copied() {
            Some(slot) => {
                self.lower_external_args(&external.params, args)?;
                self.emit(Opcode::Load, AddressingMode::Absolute, slot);
                self.emit(Opcode::CallExternal, AddressingMode::Absolute, arg_words);
                self.adjust_depth(ret_words - 1 - arg_words);
            }
            None => {
                self.emit(
                    Opcode::NewString,
                    AddressingMode::Absolute,
                    Immediate::Str(name.to_string()),
                );
                self.lower_external_args(&external.params, args)?;
                self.emit(Opcode::Load, AddressingMode::Relative, -(arg_words + 1));
                self.emit(Opcode::CallExternal, AddressingMode::Absolute, arg_words);
                self.adjust_depth(ret_words - 1 - arg_words);
                self.emit(Opcode::Load, AddressingMode::Relative, -(ret_words + 1));
                self.emit_string_release();
                self.emit_squash(ret_size, 1);
            }
        }
        Ok(())
    }

    fn lower_external_args(&mut self, params: &[Ty], args: &[&ThirExpr]) -> LowerResult<()> {
        for (param, arg) in params.iter().zip(args) {
            self.check_assignable(param, arg)?;
            self.lower_expr(arg)?;
        }
        Ok(())
    }

    /// Inline a macro body at the call site. Arguments are evaluated once and
    /// bound to the parameter names; the value of the body's final expression
    /// statement becomes the result.
    fn expand_macro(
        &mut self,
        func: &'p ThirFunction,
        bindings: TypeBindings,
        receiver: Receiver<'_>,
        args: &[&ThirExpr],
        span: Span,
    ) -> LowerResult<usize> {
        if self.macro_depth >= self.options.max_macro_depth {
            return Err(self.error(
                span,
                format!(
                    "expansion of macro `{}` exceeds the nesting limit of {}",
                    func.name, self.options.max_macro_depth
                ),
            ));
        }
        let ret = self.resolve(&func.ret.substitute(&bindings));
        let ret_size = self.size_of(&ret)?;
        let start = self.stream.next_index();
        self.comment(format!("expand macro {}", func.name));

        let result_offset = self.depth;
        self.push_default(&ret)?;
        let saved_loops = std::mem::take(&mut self.loops);
        self.macro_depth += 1;
        let result =
            self.expand_macro_body(func, bindings, receiver, args, result_offset, ret_size);
        self.macro_depth -= 1;
        self.loops = saved_loops;
        result?;

        let end = self.stream.next_index();
        self.debug.function(FunctionRecord {
            name: func.name.clone(),
            file: func.file,
            span,
            start: start.0,
            end: end.0,
            is_macro: true,
        });
        Ok(ret_size)
    }

    fn expand_macro_body(
        &mut self,
        func: &'p ThirFunction,
        bindings: TypeBindings,
        receiver: Receiver<'_>,
        args: &[&ThirExpr],
        result_offset: i64,
        ret_size: usize,
    ) -> LowerResult<()> {
        // arguments see the caller's names, so they are evaluated before the
        // macro scope opens over them
        let args_base = self.depth;
        let mut bound = Vec::with_capacity(args.len() + 1);
        if let Some(this_ty) = &func.this_ty {
            let Receiver::Expr(prefix) = receiver else {
                return Err(GenError::internal("macro receiver must be an expression").into());
            };
            let this_ty = self.resolve(&this_ty.substitute(&bindings));
            self.check_assignable(&this_ty, prefix)?;
            bound.push(("this", this_ty, self.depth));
            self.lower_expr(prefix)?;
        }
        for (param, arg) in func.params.iter().zip(args) {
            if param.by_ref {
                return Err(self.error(
                    arg.span,
                    format!("macro parameter `{}` cannot be by reference", param.name),
                ));
            }
            let param_ty = self.resolve(&param.ty.substitute(&bindings));
            self.check_assignable(&param_ty, arg)?;
            bound.push((param.name.as_str(), param_ty, self.depth));
            self.lower_expr(arg)?;
        }

        self.enter_scope(ScopeKind::Macro);
        self.current_scope_mut()?.base_depth = args_base;
        for (name, ty, offset) in bound {
            self.bind_local(name, ty, offset)?;
        }

        let body = &func.body;
        self.with_bindings(bindings, |generator| {
            generator.hoist_locals(body.local_decls())?;
            let tail = match body.stmts.split_last() {
                Some((last, rest)) if ret_size > 0 => {
                    for stmt in rest {
                        generator.lower_stmt(stmt)?;
                    }
                    Some(last)
                }
                _ => {
                    for stmt in &body.stmts {
                        generator.lower_stmt(stmt)?;
                    }
                    None
                }
            };
            if ret_size > 0 {
                let Some(ThirStmtKind::Expr(value)) = tail.map(|stmt| &stmt.kind) else {
                    return Err(generator.error(
                        func.span,
                        format!(
                            "macro `{}` must end with an expression of its result type",
                            func.name
                        ),
                    ));
                };
                generator.check_assignable(&func.ret, value)?;
                generator.lower_expr(value)?;
                let mode = generator.slot_mode(generator.frame_relative());
                for word in (0..ret_size as i64).rev() {
                    generator.emit(Opcode::Store, mode, result_offset + word);
                }
            }
            generator.exit_scope(body.span)
        })
    }
}
