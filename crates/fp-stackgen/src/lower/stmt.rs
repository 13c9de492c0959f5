use fp_bytecode::{AddressingMode, Opcode};
use fp_core::span::Span;
use fp_core::thir::{
    BinaryOp, ThirBlock, ThirExpr, ThirExprKind, ThirIfBranch, ThirLit, ThirLocal, ThirStmt,
    ThirStmtKind, Ty,
};
use tracing::warn;

use crate::address::Place;
use crate::context::{Generator, VarSlot};
use crate::error::{GenError, LowerResult};
use crate::fold::{fold_expr, Const};
use crate::scope::{LoopFrame, ScopeKind};

impl<'p> Generator<'p> {
    pub(super) fn lower_stmt_kind(&mut self, stmt: &ThirStmt) -> LowerResult<()> {
        match &stmt.kind {
            ThirStmtKind::Expr(expr) => {
                let size = self.size_of(&expr.ty)?;
                self.lower_expr(expr)?;
                self.emit_pop(size);
                Ok(())
            }
            ThirStmtKind::Let(local) => self.lower_let(local, stmt.span),
            ThirStmtKind::Assign { target, op, value } => {
                self.lower_assign(target, *op, value, stmt.span)
            }
            ThirStmtKind::Block(block) => self.lower_block(block, ScopeKind::Block),
            ThirStmtKind::If {
                branches,
                otherwise,
            } => self.lower_if(branches, otherwise.as_ref()),
            ThirStmtKind::While { cond, body } => {
                self.lower_loop(Some(cond), None, body, stmt.span)
            }
            ThirStmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.lower_for(init.as_deref(), cond.as_ref(), step.as_deref(), body, stmt.span),
            ThirStmtKind::Break => self.lower_jump_out(true, stmt.span),
            ThirStmtKind::Continue => self.lower_jump_out(false, stmt.span),
            ThirStmtKind::Return(value) => self.lower_return(value.as_ref(), stmt.span),
            ThirStmtKind::Delete(expr) => {
                self.comment("delete");
                let ty = self.resolve(&expr.ty);
                self.lower_expr(expr)?;
                self.emit_release(&ty, stmt.span)
            }
        }
    }

    fn lower_let(&mut self, local: &ThirLocal, span: Span) -> LowerResult<()> {
        let slot = self.next_hoisted(local, span)?;
        let result = self.initialize_local(local, &slot, span);
        // the name stays visible even when its initializer failed
        self.activate(slot)?;
        result
    }

    fn initialize_local(
        &mut self,
        local: &ThirLocal,
        slot: &VarSlot,
        span: Span,
    ) -> LowerResult<()> {
        let place = Place {
            address: slot.address,
            root_offset: 0,
            hops: Vec::new(),
            data_offset: 0,
            ty: slot.ty.clone(),
        };
        if let Some(init) = &local.init {
            self.check_assignable(&slot.ty, init)?;
            self.comment(format!("init {}", local.name));
            self.lower_expr(init)?;
            return self.emit_store_place(&place);
        }
        if let Ty::Struct(type_ref) = &slot.ty {
            if self.has_field_defaults(type_ref)? {
                self.comment(format!("init {}", local.name));
                self.lower_new_struct(type_ref, &[], span)?;
                return self.emit_store_place(&place);
            }
        }
        Ok(())
    }

    /// Values must have the declared type; `null` is accepted for any single-word
    /// reference.
    pub(super) fn check_assignable(&self, expected: &Ty, value: &ThirExpr) -> LowerResult<()> {
        let expected = self.resolve(expected);
        let actual = self.resolve(&value.ty);
        if expected == actual {
            return Ok(());
        }
        let is_null = matches!(value.kind, ThirExprKind::Literal(ThirLit::Null));
        if is_null && (expected.is_heap_backed() || matches!(expected, Ty::Function(_))) {
            return Ok(());
        }
        Err(self.error(
            value.span,
            format!(
                "type mismatch: expected {}, found {}",
                self.type_name(&expected),
                self.type_name(&actual)
            ),
        ))
    }

    pub(super) fn check_bool(&self, cond: &ThirExpr) -> LowerResult<()> {
        let ty = self.resolve(&cond.ty);
        if ty != Ty::Bool {
            return Err(self.error(
                cond.span,
                format!("condition must be bool, found {}", self.type_name(&ty)),
            ));
        }
        Ok(())
    }

    fn lower_assign(
        &mut self,
        target: &ThirExpr,
        op: Option<BinaryOp>,
        value: &ThirExpr,
        span: Span,
    ) -> LowerResult<()> {
        // `a op= b` is lowered as `a = a op b`
        let combined;
        let value = match op {
            Some(op) => {
                combined = ThirExpr::new(
                    ThirExprKind::Binary {
                        op,
                        lhs: Box::new(target.clone()),
                        rhs: Box::new(value.clone()),
                    },
                    target.ty.clone(),
                    value.span,
                );
                &combined
            }
            None => value,
        };

        if let ThirExprKind::Index { prefix, index } = &target.kind {
            match self.resolve(&prefix.ty) {
                Ty::Class(_) => return self.lower_index_set(prefix, index, value, span),
                Ty::Heap(element) => return self.lower_heap_store(prefix, index, &element, value),
                _ => {}
            }
        }

        let Some(place) = self.resolve_place(target)? else {
            return Err(self.error(target.span, "expression is not assignable"));
        };
        self.check_assignable(&place.ty, value)?;
        self.lower_expr(value)?;
        self.emit_store_place(&place)
    }

    fn lower_if(
        &mut self,
        branches: &[ThirIfBranch],
        otherwise: Option<&ThirBlock>,
    ) -> LowerResult<()> {
        let mut end_jumps = Vec::new();
        let mut settled = false;
        for branch in branches {
            if settled {
                self.warn(branch.cond.span, "branch is unreachable");
                continue;
            }
            self.check_bool(&branch.cond)?;
            if self.options.optimize {
                match fold_expr(&branch.cond) {
                    Some(Const::Bool(false)) => {
                        warn!("dropping branch at {}: condition is always false", branch.cond.span);
                        self.warn(
                            branch.cond.span,
                            "branch is unreachable: condition is always false",
                        );
                        continue;
                    }
                    Some(Const::Bool(true)) => {
                        self.lower_block(&branch.body, ScopeKind::Block)?;
                        settled = true;
                        continue;
                    }
                    _ => {}
                }
            }
            self.comment("if");
            self.lower_expr(&branch.cond)?;
            let skip = self.placeholder(Opcode::JumpIfFalse, AddressingMode::Absolute);
            self.lower_block(&branch.body, ScopeKind::Block)?;
            end_jumps.push(self.placeholder(Opcode::Jump, AddressingMode::Absolute));
            self.patch_here(skip)?;
        }
        if let Some(otherwise) = otherwise {
            if settled {
                self.warn(otherwise.span, "else branch is unreachable");
            } else {
                self.comment("else");
                self.lower_block(otherwise, ScopeKind::Block)?;
            }
        }
        for site in end_jumps {
            self.patch_here(site)?;
        }
        Ok(())
    }

    fn lower_for(
        &mut self,
        init: Option<&ThirStmt>,
        cond: Option<&ThirExpr>,
        step: Option<&ThirStmt>,
        body: &ThirBlock,
        span: Span,
    ) -> LowerResult<()> {
        self.enter_scope(ScopeKind::Block);
        let declared = init.and_then(|stmt| match &stmt.kind {
            ThirStmtKind::Let(local) => Some(local),
            _ => None,
        });
        self.hoist_locals(declared)?;
        if let Some(init) = init {
            self.lower_stmt(init)?;
        }
        self.lower_loop(cond, step, body, span)?;
        self.exit_scope(span)
    }

    /// Shared shape of `while` and `for`:
    ///
    /// ```text
    ///     cond; jump_if_false exit      (only for a non-constant condition)
    /// body:
    ///     <body>
    /// continue:
    ///     <step>
    ///     cond; jump_if_true body       (or an unconditional jump)
    /// exit:
    /// ```
    fn lower_loop(
        &mut self,
        cond: Option<&ThirExpr>,
        step: Option<&ThirStmt>,
        body: &ThirBlock,
        span: Span,
    ) -> LowerResult<()> {
        let folded = match cond {
            None => Some(true),
            Some(cond) => {
                self.check_bool(cond)?;
                match fold_expr(cond) {
                    Some(Const::Bool(value)) if self.options.optimize => Some(value),
                    _ => None,
                }
            }
        };
        if folded == Some(false) {
            warn!("dropping loop at {}: condition is always false", span);
            self.warn(span, "loop body is unreachable: condition is always false");
            return Ok(());
        }
        if folded == Some(true) && !breaks_out(body) {
            self.warn(
                span,
                "potential infinite loop: condition is always true and the body never breaks",
            );
        }

        let tested = cond.filter(|_| folded.is_none());
        let exit_test = match tested {
            Some(cond) => {
                self.comment("loop test");
                self.lower_expr(cond)?;
                Some(self.placeholder(Opcode::JumpIfFalse, AddressingMode::Absolute))
            }
            None => None,
        };

        let body_start = self.stream.next_index();
        self.loops.push(LoopFrame {
            body_scope: self.scopes.len(),
            breaks: Vec::new(),
            continues: Vec::new(),
        });
        let body_result = self.lower_block(body, ScopeKind::LoopBody);
        let frame = self
            .loops
            .pop()
            .ok_or_else(|| GenError::internal("loop stack underflow"))?;
        body_result?;

        for site in frame.continues {
            self.patch_here(site)?;
        }
        if let Some(step) = step {
            self.lower_stmt(step)?;
        }
        match tested {
            Some(cond) => {
                self.comment("loop retest");
                self.lower_expr(cond)?;
                let site = self.emit(Opcode::JumpIfTrue, AddressingMode::Absolute, 0i64);
                self.patch_to(site, body_start)?;
            }
            None => {
                let site = self.emit(Opcode::Jump, AddressingMode::Absolute, 0i64);
                self.patch_to(site, body_start)?;
            }
        }
        if let Some(site) = exit_test {
            self.patch_here(site)?;
        }
        for site in frame.breaks {
            self.patch_here(site)?;
        }
        Ok(())
    }

    /// `break` (`is_break`) or `continue`: release the locals of every scope
    /// inside the loop body, then jump.
    fn lower_jump_out(&mut self, is_break: bool, span: Span) -> LowerResult<()> {
        let keyword = if is_break { "break" } else { "continue" };
        let Some(body_scope) = self.loops.last().map(|frame| frame.body_scope) else {
            return Err(self.error(span, format!("`{}` outside of a loop", keyword)));
        };
        self.comment(keyword);
        let depth = self.depth;
        self.emit_unwind(body_scope, span)?;
        let site = self.placeholder(Opcode::Jump, AddressingMode::Absolute);
        // code after the jump still sees the unwound locals
        self.depth = depth;
        let frame = self
            .loops
            .last_mut()
            .ok_or_else(|| GenError::internal("loop stack underflow"))?;
        if is_break {
            frame.breaks.push(site);
        } else {
            frame.continues.push(site);
        }
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&ThirExpr>, span: Span) -> LowerResult<()> {
        let Some(frame) = self.frame.as_ref() else {
            return Err(self.error(span, "`return` outside of a function"));
        };
        let (function, ret, ret_offset, ret_size) = (
            frame.function.clone(),
            frame.ret.clone(),
            frame.ret_offset(),
            frame.ret_size,
        );
        if self.scopes.iter().any(|scope| scope.kind == ScopeKind::Macro) {
            return Err(self.error(span, "`return` is not allowed inside a macro"));
        }
        match (value, ret.is_void()) {
            (Some(value), true) => {
                return Err(self.error(
                    value.span,
                    format!("function `{}` does not return a value", function),
                ));
            }
            (None, false) => {
                return Err(self.error(
                    span,
                    format!(
                        "function `{}` must return a value of type {}",
                        function,
                        self.type_name(&ret)
                    ),
                ));
            }
            (Some(value), false) => {
                self.check_assignable(&ret, value)?;
                self.lower_expr(value)?;
            }
            (None, true) => {}
        }
        self.comment("return");
        self.emit_return_store(ret_offset, ret_size);
        self.check_frame("return")?;
        let site = self.placeholder(Opcode::Jump, AddressingMode::Absolute);
        self.current_scope_mut()?.returns.push(site);
        Ok(())
    }
}

/// Whether a `break` leaves this loop body. Nested loops are not searched:
/// their breaks only leave themselves.
fn breaks_out(block: &ThirBlock) -> bool {
    block.stmts.iter().any(|stmt| match &stmt.kind {
        ThirStmtKind::Break => true,
        ThirStmtKind::Block(inner) => breaks_out(inner),
        ThirStmtKind::If {
            branches,
            otherwise,
        } => {
            branches.iter().any(|branch| breaks_out(&branch.body))
                || otherwise.as_ref().is_some_and(breaks_out)
        }
        _ => false,
    })
}
