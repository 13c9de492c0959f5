//! Compile-time evaluation of operator expressions over literal operands.
//!
//! Results match what the machine computes at run time: integer arithmetic
//! wraps, and anything that would trap (division by zero, shifts out of range)
//! is left unfolded.

use fp_bytecode::Immediate;
use fp_core::thir::{BinaryOp, ThirExpr, ThirExprKind, ThirLit, Ty, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Const {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
}

impl Const {
    pub fn immediate(self) -> Immediate {
        match self {
            Const::Int(value) => Immediate::Int(value),
            Const::Float(value) => Immediate::Float(value),
            Const::Bool(value) => Immediate::Bool(value),
            Const::Char(value) => Immediate::Char(value),
        }
    }
}

impl std::fmt::Display for Const {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Const::Int(value) => write!(f, "{}", value),
            Const::Float(value) => write!(f, "{:?}", value),
            Const::Bool(value) => write!(f, "{}", value),
            Const::Char(value) => write!(f, "{:?}", value),
        }
    }
}

pub fn fold_expr(expr: &ThirExpr) -> Option<Const> {
    match &expr.kind {
        ThirExprKind::Literal(lit) => match lit {
            ThirLit::Int(value) => Some(Const::Int(*value)),
            ThirLit::Float(value) => Some(Const::Float(*value)),
            ThirLit::Bool(value) => Some(Const::Bool(*value)),
            ThirLit::Char(value) => Some(Const::Char(*value)),
            ThirLit::Str(_) | ThirLit::Null => None,
        },
        ThirExprKind::Unary { op, operand } => fold_unary(*op, fold_expr(operand)?),
        ThirExprKind::Binary { op, lhs, rhs } => {
            fold_binary(*op, fold_expr(lhs)?, fold_expr(rhs)?)
        }
        ThirExprKind::Cast(inner) => fold_cast(fold_expr(inner)?, &expr.ty),
        _ => None,
    }
}

fn fold_unary(op: UnaryOp, value: Const) -> Option<Const> {
    match (op, value) {
        (UnaryOp::Neg, Const::Int(v)) => Some(Const::Int(v.wrapping_neg())),
        (UnaryOp::Neg, Const::Float(v)) => Some(Const::Float(-v)),
        (UnaryOp::Not, Const::Bool(v)) => Some(Const::Bool(!v)),
        (UnaryOp::Not, Const::Int(v)) => Some(Const::Int(!v)),
        _ => None,
    }
}

fn fold_cast(value: Const, target: &Ty) -> Option<Const> {
    match (value, target) {
        (Const::Int(v), Ty::Float) => Some(Const::Float(v as f64)),
        (Const::Float(v), Ty::Int) => Some(Const::Int(v as i64)),
        (Const::Int(_), Ty::Int)
        | (Const::Float(_), Ty::Float)
        | (Const::Bool(_), Ty::Bool)
        | (Const::Char(_), Ty::Char) => Some(value),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, lhs: Const, rhs: Const) -> Option<Const> {
    match (lhs, rhs) {
        (Const::Int(a), Const::Int(b)) => fold_int(op, a, b),
        (Const::Float(a), Const::Float(b)) => fold_float(op, a, b),
        (Const::Bool(a), Const::Bool(b)) => match op {
            BinaryOp::And => Some(Const::Bool(a && b)),
            BinaryOp::Or => Some(Const::Bool(a || b)),
            BinaryOp::Eq => Some(Const::Bool(a == b)),
            BinaryOp::Ne => Some(Const::Bool(a != b)),
            _ => None,
        },
        (Const::Char(a), Const::Char(b)) => compare(op, a, b),
        _ => None,
    }
}

fn fold_int(op: BinaryOp, a: i64, b: i64) -> Option<Const> {
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div if b != 0 => a.wrapping_div(b),
        BinaryOp::Rem if b != 0 => a.wrapping_rem(b),
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::Shl => a.checked_shl(u32::try_from(b).ok()?)?,
        BinaryOp::Shr => a.checked_shr(u32::try_from(b).ok()?)?,
        _ => return compare(op, a, b),
    };
    Some(Const::Int(value))
}

fn fold_float(op: BinaryOp, a: f64, b: f64) -> Option<Const> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => {
            return match op {
                BinaryOp::Eq => Some(Const::Bool(a == b)),
                BinaryOp::Ne => Some(Const::Bool(a != b)),
                BinaryOp::Lt => Some(Const::Bool(a < b)),
                BinaryOp::Le => Some(Const::Bool(a <= b)),
                BinaryOp::Gt => Some(Const::Bool(a > b)),
                BinaryOp::Ge => Some(Const::Bool(a >= b)),
                _ => None,
            }
        }
    };
    Some(Const::Float(value))
}

fn compare<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> Option<Const> {
    let value = match op {
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        _ => return None,
    };
    Some(Const::Bool(value))
}
