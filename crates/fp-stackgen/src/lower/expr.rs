use fp_bytecode::{AddressingMode, Immediate, Opcode};
use fp_core::thir::{
    BinaryOp, FunctionId, FunctionKind, OperatorKind, ThirExpr, ThirExprKind, ThirFunction,
    ThirLit, Ty, UnaryOp,
};

use crate::context::Generator;
use crate::error::{GenError, LowerResult};
use crate::fold::{fold_expr, Const};
use crate::link::{CalleeKind, ReferenceKind, UndefinedOffset};

impl<'p> Generator<'p> {
    /// Lower an expression so that exactly its value's words are left on the
    /// stack.
    pub fn lower_expr(&mut self, expr: &ThirExpr) -> LowerResult<()> {
        let before = self.depth;
        self.lower_expr_kind(expr)?;
        let expected = before + self.size_of(&expr.ty)? as i64;
        if self.depth != expected {
            return Err(GenError::FrameMismatch {
                context: format!("expression at {}", expr.span),
                expected,
                actual: self.depth,
            }
            .into());
        }
        Ok(())
    }

    fn lower_expr_kind(&mut self, expr: &ThirExpr) -> LowerResult<()> {
        match &expr.kind {
            ThirExprKind::Literal(lit) => {
                self.lower_literal(lit);
                Ok(())
            }
            ThirExprKind::Ident(_) | ThirExprKind::Field { .. } | ThirExprKind::Index { .. } => {
                self.lower_access(expr)
            }
            ThirExprKind::Unary { op, operand } => self.lower_unary(expr, *op, operand),
            ThirExprKind::Binary { op, lhs, rhs } => self.lower_binary(expr, *op, lhs, rhs),
            ThirExprKind::Call(call) => self.lower_call(call, expr),
            ThirExprKind::New(args) => self.lower_new(expr, args),
            ThirExprKind::NewArray { element, count } => self.lower_new_array(element, count),
            ThirExprKind::Clone(inner) => self.lower_clone(expr, inner),
            ThirExprKind::Cast(inner) => self.lower_cast(expr, inner),
            ThirExprKind::FunctionRef {
                function,
                type_args,
            } => self.lower_function_ref(expr, *function, type_args),
        }
    }

    fn lower_literal(&mut self, lit: &ThirLit) {
        let immediate = match lit {
            ThirLit::Int(value) => Immediate::Int(*value),
            ThirLit::Float(value) => Immediate::Float(*value),
            ThirLit::Bool(value) => Immediate::Bool(*value),
            ThirLit::Char(value) => Immediate::Char(*value),
            ThirLit::Null => Immediate::Int(0),
            ThirLit::Str(value) => {
                self.emit(
                    Opcode::NewString,
                    AddressingMode::Absolute,
                    Immediate::Str(value.clone()),
                );
                return;
            }
        };
        self.emit(Opcode::Push, AddressingMode::Absolute, immediate);
    }

    fn emit_folded(&mut self, expr: &ThirExpr, value: Const) {
        self.emit(Opcode::Push, AddressingMode::Absolute, value.immediate());
        self.note(expr.span, format!("folded constant expression to {}", value));
    }

    fn try_fold(&mut self, expr: &ThirExpr) -> bool {
        if !self.options.optimize {
            return false;
        }
        match fold_expr(expr) {
            Some(value) => {
                self.emit_folded(expr, value);
                true
            }
            None => false,
        }
    }

    /// Reads of names, fields and elements.
    fn lower_access(&mut self, expr: &ThirExpr) -> LowerResult<()> {
        if let Some(place) = self.resolve_place(expr)? {
            return self.emit_load_place(&place);
        }
        match &expr.kind {
            ThirExprKind::Field { prefix, name } => {
                let prefix_ty = self.resolve(&prefix.ty);
                let (offset, field_ty) = self.field_offset(&prefix_ty, name, expr)?;
                let width = self.size_of(&field_ty)?;
                self.lower_expr(prefix)?;
                match &prefix_ty {
                    Ty::Class(_) => {
                        for word in 0..width as i64 {
                            self.emit(Opcode::Load, AddressingMode::Relative, -(1 + word));
                            self.emit(Opcode::HeapGet, AddressingMode::Absolute, offset + word);
                        }
                        self.emit_squash(width, 1);
                    }
                    _ => {
                        let total = self.size_of(&prefix_ty)?;
                        self.emit_extract(total, offset as usize, width);
                    }
                }
                Ok(())
            }
            ThirExprKind::Index { prefix, index } => self.lower_index_get(expr, prefix, index),
            _ => Err(GenError::internal("identifier without a storage slot").into()),
        }
    }

    fn lower_index_get(
        &mut self,
        expr: &ThirExpr,
        prefix: &ThirExpr,
        index: &ThirExpr,
    ) -> LowerResult<()> {
        let prefix_ty = self.resolve(&prefix.ty);
        match &prefix_ty {
            Ty::Array(element, len) => {
                let position = self.constant_index(index, *len)?;
                if position < 0 || position as usize >= *len {
                    return Err(self.error(index.span, "constant index is out of range"));
                }
                let element_size = self.size_of(element)?;
                let total = self.size_of(&prefix_ty)?;
                self.lower_expr(prefix)?;
                self.emit_extract(total, position as usize * element_size, element_size);
                Ok(())
            }
            Ty::Heap(element) => {
                let element_size = self.size_of(element)?;
                self.lower_heap_offset(prefix, index, element_size)?;
                for word in 0..element_size as i64 {
                    self.emit(Opcode::Load, AddressingMode::Relative, -(2 + word));
                    self.emit(Opcode::Load, AddressingMode::Relative, -(2 + word));
                    self.emit(Opcode::HeapGet, AddressingMode::Runtime, word);
                }
                self.emit_squash(element_size, 2);
                Ok(())
            }
            Ty::Class(_) => self.lower_index_call(expr, prefix, index),
            other => Err(self.error(
                expr.span,
                format!("type {} cannot be indexed", self.type_name(other)),
            )),
        }
    }

    /// Push a heap handle and the word offset of element `index` inside it.
    pub(super) fn lower_heap_offset(
        &mut self,
        prefix: &ThirExpr,
        index: &ThirExpr,
        element_size: usize,
    ) -> LowerResult<()> {
        if self.resolve(&index.ty) != Ty::Int {
            return Err(self.error(
                index.span,
                format!("index must be int, found {}", self.type_name(&index.ty)),
            ));
        }
        self.lower_expr(prefix)?;
        self.lower_expr(index)?;
        if element_size != 1 {
            self.push_int(element_size as i64);
            self.emit_bare(Opcode::Multiply);
        }
        Ok(())
    }

    fn lower_unary(&mut self, expr: &ThirExpr, op: UnaryOp, operand: &ThirExpr) -> LowerResult<()> {
        if self.try_fold(expr) {
            return Ok(());
        }
        let ty = self.resolve(&operand.ty);
        let opcode = match (op, &ty) {
            (UnaryOp::Neg, Ty::Int | Ty::Float) => Some(Opcode::Negate),
            (UnaryOp::Not, Ty::Int | Ty::Bool) => Some(Opcode::Not),
            _ => None,
        };
        if let Some(opcode) = opcode {
            self.lower_expr(operand)?;
            self.emit_bare(opcode);
            return Ok(());
        }
        let program = self.program;
        match program.find_operator(OperatorKind::Unary(op), std::slice::from_ref(&ty)) {
            Some(candidate) => self.lower_operator_call(&candidate, &[operand], expr.span),
            None => Err(self.error(
                expr.span,
                format!("no operator {:?} for {}", op, self.type_name(&ty)),
            )),
        }
    }

    fn lower_binary(
        &mut self,
        expr: &ThirExpr,
        op: BinaryOp,
        lhs: &ThirExpr,
        rhs: &ThirExpr,
    ) -> LowerResult<()> {
        if self.try_fold(expr) {
            return Ok(());
        }
        let lhs_ty = self.resolve(&lhs.ty);
        let rhs_ty = self.resolve(&rhs.ty);
        if op.is_short_circuit() {
            return self.lower_short_circuit(op, lhs, rhs, &lhs_ty, &rhs_ty);
        }

        if lhs_ty == rhs_ty {
            let opcode = scalar_opcode(op, &lhs_ty).or_else(|| {
                // identity comparison of handles and function values
                match op {
                    BinaryOp::Eq if lhs_ty.is_word() => Some(Opcode::Equal),
                    BinaryOp::Ne if lhs_ty.is_word() => Some(Opcode::NotEqual),
                    _ => None,
                }
            });
            if let Some(opcode) = opcode {
                self.lower_expr(lhs)?;
                self.lower_expr(rhs)?;
                self.emit_bare(opcode);
                return Ok(());
            }
        }

        let program = self.program;
        let operands = [lhs_ty.clone(), rhs_ty.clone()];
        match program.find_operator(OperatorKind::Binary(op), &operands) {
            Some(candidate) => self.lower_operator_call(&candidate, &[lhs, rhs], expr.span),
            None => Err(self.error(
                expr.span,
                format!(
                    "no operator {:?} for {} and {}",
                    op,
                    self.type_name(&lhs_ty),
                    self.type_name(&rhs_ty)
                ),
            )),
        }
    }

    /// `a && b` keeps `a` when it is false without evaluating `b`; `||` keeps
    /// a true `a`.
    fn lower_short_circuit(
        &mut self,
        op: BinaryOp,
        lhs: &ThirExpr,
        rhs: &ThirExpr,
        lhs_ty: &Ty,
        rhs_ty: &Ty,
    ) -> LowerResult<()> {
        if *lhs_ty != Ty::Bool || *rhs_ty != Ty::Bool {
            return Err(self.error(
                lhs.span,
                format!(
                    "logical operator needs bool operands, found {} and {}",
                    self.type_name(lhs_ty),
                    self.type_name(rhs_ty)
                ),
            ));
        }
        let skip = if op == BinaryOp::And {
            Opcode::JumpIfFalse
        } else {
            Opcode::JumpIfTrue
        };
        self.lower_expr(lhs)?;
        self.emit_bare(Opcode::Duplicate);
        let site = self.placeholder(skip, AddressingMode::Absolute);
        self.emit_pop(1);
        self.lower_expr(rhs)?;
        self.patch_here(site)
    }

    fn lower_cast(&mut self, expr: &ThirExpr, inner: &ThirExpr) -> LowerResult<()> {
        let target = self.resolve(&expr.ty);
        let source = self.resolve(&inner.ty);
        if source == target {
            self.warn(
                expr.span,
                format!("redundant cast to {}", self.type_name(&target)),
            );
            return self.lower_expr(inner);
        }
        if self.try_fold(expr) {
            return Ok(());
        }
        let opcode = match (&source, &target) {
            (Ty::Int, Ty::Float) => Opcode::IntToFloat,
            (Ty::Float, Ty::Int) => Opcode::FloatToInt,
            _ => {
                return Err(self.error(
                    expr.span,
                    format!(
                        "cannot cast {} to {}",
                        self.type_name(&source),
                        self.type_name(&target)
                    ),
                ))
            }
        };
        self.lower_expr(inner)?;
        self.emit_bare(opcode);
        Ok(())
    }

    /// A function value is the instruction offset of the function's start.
    fn lower_function_ref(
        &mut self,
        expr: &ThirExpr,
        function: FunctionId,
        type_args: &[Ty],
    ) -> LowerResult<()> {
        let program = self.program;
        let func = program.function(function)?;
        if func.is_macro {
            return Err(self.error(
                expr.span,
                format!("macro `{}` cannot be used as a value", func.name),
            ));
        }
        self.check_access(func, expr.span)?;
        let key = self.instance_key(func, type_args, expr.span)?;
        match self.offsets.get(&key).copied() {
            Some(start) => {
                self.push_int(start.0 as i64);
            }
            None => {
                let site = self.placeholder(Opcode::Push, AddressingMode::Absolute);
                self.linker.record(UndefinedOffset {
                    site,
                    target: key,
                    reference: ReferenceKind::Absolute,
                    callee: callee_kind(func),
                    span: expr.span,
                    file: self.current_file,
                });
            }
        }
        Ok(())
    }
}

pub(super) fn callee_kind(func: &ThirFunction) -> CalleeKind {
    match func.kind {
        FunctionKind::Plain => CalleeKind::Function,
        FunctionKind::Operator(_) => CalleeKind::Operator,
        FunctionKind::General { .. } => CalleeKind::General,
    }
}

/// Opcode of a built-in operator on two operands of the scalar type `ty`.
fn scalar_opcode(op: BinaryOp, ty: &Ty) -> Option<Opcode> {
    if !ty.is_scalar() {
        return None;
    }
    let numeric = ty.is_numeric();
    let ordered = numeric || *ty == Ty::Char;
    let integer = *ty == Ty::Int;
    let opcode = match op {
        BinaryOp::Add if numeric => Opcode::Add,
        BinaryOp::Sub if numeric => Opcode::Subtract,
        BinaryOp::Mul if numeric => Opcode::Multiply,
        BinaryOp::Div if numeric => Opcode::Divide,
        BinaryOp::Rem if numeric => Opcode::Modulo,
        BinaryOp::BitAnd if integer => Opcode::BitAnd,
        BinaryOp::BitOr if integer => Opcode::BitOr,
        BinaryOp::BitXor if integer => Opcode::BitXor,
        BinaryOp::Shl if integer => Opcode::ShiftLeft,
        BinaryOp::Shr if integer => Opcode::ShiftRight,
        BinaryOp::Eq => Opcode::Equal,
        BinaryOp::Ne => Opcode::NotEqual,
        BinaryOp::Lt if ordered => Opcode::Less,
        BinaryOp::Le if ordered => Opcode::LessEqual,
        BinaryOp::Gt if ordered => Opcode::Greater,
        BinaryOp::Ge if ordered => Opcode::GreaterEqual,
        _ => return None,
    };
    Some(opcode)
}
