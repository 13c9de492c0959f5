//! Typed, fully resolved statement tree handed from the front end to code
//! generation, plus the lookups ([`layout`], [`lookup`]) the generator queries.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::span::{FileId, Span};

pub mod layout;
pub mod lookup;
pub mod ty;

pub use layout::FieldSlot;
pub use lookup::Candidate;
pub use ty::{FnSig, Ty, TypeBindings, TypeRef};

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
pub struct TypeId(pub u32);

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
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThirProgram {
    pub files: Vec<PathBuf>,
    pub types: Vec<ThirType>,
    /// Plain functions, operators and general functions share this arena;
    /// `FunctionId(n)` indexes position `n`.
    pub functions: Vec<ThirFunction>,
    pub externals: Vec<ThirExternal>,
    /// Top-level statements, executed before the entry function is called.
    pub statements: Vec<ThirStmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Struct,
    Class,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirType {
    pub id: TypeId,
    pub name: String,
    pub kind: TypeKind,
    pub type_params: Vec<String>,
    pub fields: Vec<ThirField>,
    pub file: FileId,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirField {
    pub name: String,
    pub ty: Ty,
    /// Initial value written when the owning value is constructed.
    pub default: Option<ThirExpr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GeneralKind {
    Constructor,
    Destructor,
    Cloner,
    IndexGet,
    IndexSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    Binary(BinaryOp),
    Unary(UnaryOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    Plain,
    Operator(OperatorKind),
    General { kind: GeneralKind, owner: TypeId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirParam {
    pub name: String,
    pub ty: Ty,
    /// The slot holds the address of the caller's storage instead of a copy.
    pub by_ref: bool,
    /// The callee takes ownership: the caller releases heap-backed arguments
    /// once the call returns.
    pub consumes: bool,
}

impl ThirParam {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Self {
            name: name.into(),
            ty,
            by_ref: false,
            consumes: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirFunction {
    pub id: FunctionId,
    pub name: String,
    pub kind: FunctionKind,
    pub type_params: Vec<String>,
    /// Type of the implicit `this` parameter for methods and general functions.
    pub this_ty: Option<Ty>,
    pub params: Vec<ThirParam>,
    pub ret: Ty,
    pub body: ThirBlock,
    pub visibility: Visibility,
    pub is_entry: bool,
    pub is_macro: bool,
    pub file: FileId,
    pub span: Span,
}

impl ThirFunction {
    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }

    /// Type the function is a member of, used for accessibility checks.
    pub fn owner(&self) -> Option<TypeId> {
        match self.kind {
            FunctionKind::General { owner, .. } => Some(owner),
            _ => self
                .this_ty
                .as_ref()
                .and_then(Ty::type_ref)
                .map(|r| r.id),
        }
    }
}

/// Host function provided by the virtual machine, called by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirExternal {
    pub name: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThirBlock {
    pub stmts: Vec<ThirStmt>,
    pub span: Span,
}

impl ThirBlock {
    pub fn new(stmts: Vec<ThirStmt>) -> Self {
        Self {
            stmts,
            span: Span::default(),
        }
    }

    /// Local declarations made directly in this block, in declaration order.
    pub fn local_decls(&self) -> impl Iterator<Item = &ThirLocal> {
        self.stmts.iter().filter_map(|stmt| match &stmt.kind {
            ThirStmtKind::Let(local) => Some(local),
            _ => None,
        })
    }

    pub fn contains_return(&self) -> bool {
        self.stmts.iter().any(ThirStmt::contains_return)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirLocal {
    pub name: String,
    pub ty: Ty,
    pub init: Option<ThirExpr>,
    /// Release the value when its scope exits.
    pub owned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirIfBranch {
    pub cond: ThirExpr,
    pub body: ThirBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirStmt {
    pub kind: ThirStmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThirStmtKind {
    Expr(ThirExpr),
    Let(ThirLocal),
    Assign {
        target: ThirExpr,
        op: Option<BinaryOp>,
        value: ThirExpr,
    },
    Block(ThirBlock),
    /// `if` / `elseif` chain with an optional trailing `else`.
    If {
        branches: Vec<ThirIfBranch>,
        otherwise: Option<ThirBlock>,
    },
    While {
        cond: ThirExpr,
        body: ThirBlock,
    },
    For {
        init: Option<Box<ThirStmt>>,
        cond: Option<ThirExpr>,
        step: Option<Box<ThirStmt>>,
        body: ThirBlock,
    },
    Break,
    Continue,
    Return(Option<ThirExpr>),
    Delete(ThirExpr),
}

impl ThirStmt {
    pub fn new(kind: ThirStmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn contains_return(&self) -> bool {
        match &self.kind {
            ThirStmtKind::Return(_) => true,
            ThirStmtKind::Block(block) => block.contains_return(),
            ThirStmtKind::If {
                branches,
                otherwise,
            } => {
                branches.iter().any(|b| b.body.contains_return())
                    || otherwise.as_ref().is_some_and(ThirBlock::contains_return)
            }
            ThirStmtKind::While { body, .. } => body.contains_return(),
            ThirStmtKind::For {
                init, step, body, ..
            } => {
                body.contains_return()
                    || init.as_ref().is_some_and(|s| s.contains_return())
                    || step.as_ref().is_some_and(|s| s.contains_return())
            }
            ThirStmtKind::Expr(_)
            | ThirStmtKind::Let(_)
            | ThirStmtKind::Assign { .. }
            | ThirStmtKind::Break
            | ThirStmtKind::Continue
            | ThirStmtKind::Delete(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirExpr {
    pub kind: ThirExprKind,
    pub ty: Ty,
    pub span: Span,
}

impl ThirExpr {
    pub fn new(kind: ThirExprKind, ty: Ty, span: Span) -> Self {
        Self { kind, ty, span }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThirLit {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Short-circuit `&&`.
    And,
    /// Short-circuit `||`.
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThirCallee {
    /// A user function, operator or general function; `type_args` binds the
    /// target's type parameters when it is generic.
    Function {
        function: FunctionId,
        type_args: Vec<Ty>,
    },
    /// Call through a function-typed value.
    Value(Box<ThirExpr>),
    /// Host function provided by the virtual machine.
    External(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirCall {
    pub callee: ThirCallee,
    /// Receiver passed as the implicit `this` argument.
    pub prefix: Option<Box<ThirExpr>>,
    pub args: Vec<ThirExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThirExprKind {
    Literal(ThirLit),
    /// Local, parameter or global, by name.
    Ident(String),
    Field {
        prefix: Box<ThirExpr>,
        name: String,
    },
    Index {
        prefix: Box<ThirExpr>,
        index: Box<ThirExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<ThirExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<ThirExpr>,
        rhs: Box<ThirExpr>,
    },
    Call(ThirCall),
    /// Construct a value of the expression's own type.
    New(Vec<ThirExpr>),
    /// Allocate `count` elements on the heap; the expression type is `Ty::Heap`.
    NewArray {
        element: Ty,
        count: Box<ThirExpr>,
    },
    Clone(Box<ThirExpr>),
    /// Convert the operand to the expression's own type.
    Cast(Box<ThirExpr>),
    /// Address of a function, as a function value.
    FunctionRef {
        function: FunctionId,
        type_args: Vec<Ty>,
    },
}
