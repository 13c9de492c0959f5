//! Types as seen by the code generator.
//!
//! Every type that reaches code generation has already been resolved by the
//! front end; the only open part left is [`Ty::Param`], which refers to a type
//! parameter of the generic function or type currently being instantiated.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use super::TypeId;

/// Concrete bindings for the type parameters in scope, keyed by parameter name.
pub type TypeBindings = BTreeMap<String, Ty>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ty {
    Void,
    Int,
    Float,
    Bool,
    Char,
    /// Heap-allocated string object; the stack holds its handle.
    String,
    /// Raw heap handle to storage of the inner type, e.g. from `new int[n]`.
    Heap(Box<Ty>),
    /// Value type laid out inline on the stack.
    Struct(TypeRef),
    /// Reference type; the stack holds a heap handle.
    Class(TypeRef),
    /// Fixed-size array stored inline on the stack.
    Array(Box<Ty>, usize),
    /// Function value; the stack holds the callee's instruction offset.
    Function(Box<FnSig>),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeRef {
    pub id: TypeId,
    pub args: Vec<Ty>,
}

impl TypeRef {
    pub fn new(id: TypeId, args: Vec<Ty>) -> Self {
        Self { id, args }
    }

    pub fn plain(id: TypeId) -> Self {
        Self {
            id,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FnSig {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

impl Ty {
    pub fn heap(inner: Ty) -> Ty {
        Ty::Heap(Box::new(inner))
    }

    pub fn array(element: Ty, len: usize) -> Ty {
        Ty::Array(Box::new(element), len)
    }

    pub fn function(params: Vec<Ty>, ret: Ty) -> Ty {
        Ty::Function(Box::new(FnSig { params, ret }))
    }

    pub fn param(name: impl Into<String>) -> Ty {
        Ty::Param(name.into())
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Void)
    }

    /// Single-word values the arithmetic and comparison opcodes operate on.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Ty::Int | Ty::Float | Ty::Bool | Ty::Char)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Float)
    }

    /// Whether the stack slot of this type holds a handle into heap storage.
    pub fn is_heap_backed(&self) -> bool {
        matches!(self, Ty::String | Ty::Heap(_) | Ty::Class(_))
    }

    /// Single-word values that can be compared for identity with `==`/`!=`.
    pub fn is_word(&self) -> bool {
        self.is_scalar() || self.is_heap_backed() || matches!(self, Ty::Function(_))
    }

    pub fn type_ref(&self) -> Option<&TypeRef> {
        match self {
            Ty::Struct(r) | Ty::Class(r) => Some(r),
            _ => None,
        }
    }

    pub fn contains_params(&self) -> bool {
        match self {
            Ty::Param(_) => true,
            Ty::Heap(inner) | Ty::Array(inner, _) => inner.contains_params(),
            Ty::Struct(r) | Ty::Class(r) => r.args.iter().any(Ty::contains_params),
            Ty::Function(sig) => {
                sig.params.iter().any(Ty::contains_params) || sig.ret.contains_params()
            }
            Ty::Void | Ty::Int | Ty::Float | Ty::Bool | Ty::Char | Ty::String => false,
        }
    }

    /// Replace every bound type parameter; unbound parameters are left in place.
    pub fn substitute(&self, bindings: &TypeBindings) -> Ty {
        if bindings.is_empty() {
            return self.clone();
        }
        match self {
            Ty::Param(name) => bindings
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Ty::Heap(inner) => Ty::Heap(Box::new(inner.substitute(bindings))),
            Ty::Array(inner, len) => Ty::Array(Box::new(inner.substitute(bindings)), *len),
            Ty::Struct(r) => Ty::Struct(r.substitute(bindings)),
            Ty::Class(r) => Ty::Class(r.substitute(bindings)),
            Ty::Function(sig) => Ty::Function(Box::new(FnSig {
                params: sig.params.iter().map(|p| p.substitute(bindings)).collect(),
                ret: sig.ret.substitute(bindings),
            })),
            Ty::Void | Ty::Int | Ty::Float | Ty::Bool | Ty::Char | Ty::String => self.clone(),
        }
    }

    /// Structurally match `self` (which may mention type parameters) against a
    /// concrete type, extending `bindings`. A parameter already bound must match
    /// the same concrete type again.
    pub fn unify(&self, concrete: &Ty, bindings: &mut TypeBindings) -> bool {
        match (self, concrete) {
            (Ty::Param(name), _) => match bindings.get(name) {
                Some(bound) => bound == concrete,
                None => {
                    bindings.insert(name.clone(), concrete.clone());
                    true
                }
            },
            (Ty::Heap(a), Ty::Heap(b)) => a.unify(b, bindings),
            (Ty::Array(a, n), Ty::Array(b, m)) => n == m && a.unify(b, bindings),
            (Ty::Struct(a), Ty::Struct(b)) | (Ty::Class(a), Ty::Class(b)) => {
                a.id == b.id
                    && a.args.len() == b.args.len()
                    && a.args
                        .iter()
                        .zip(&b.args)
                        .all(|(x, y)| x.unify(y, bindings))
            }
            (Ty::Function(a), Ty::Function(b)) => {
                a.params.len() == b.params.len()
                    && a.params
                        .iter()
                        .zip(&b.params)
                        .all(|(x, y)| x.unify(y, bindings))
                    && a.ret.unify(&b.ret, bindings)
            }
            (a, b) => a == b,
        }
    }
}

impl TypeRef {
    pub fn substitute(&self, bindings: &TypeBindings) -> TypeRef {
        TypeRef {
            id: self.id,
            args: self.args.iter().map(|a| a.substitute(bindings)).collect(),
        }
    }
}

impl Display for Ty {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Int => write!(f, "int"),
            Ty::Float => write!(f, "float"),
            Ty::Bool => write!(f, "bool"),
            Ty::Char => write!(f, "char"),
            Ty::String => write!(f, "string"),
            Ty::Heap(inner) => write!(f, "{}*", inner),
            Ty::Struct(r) => write!(f, "struct {}", r),
            Ty::Class(r) => write!(f, "class {}", r),
            Ty::Array(inner, len) => write!(f, "{}[{}]", inner, len),
            Ty::Function(sig) => write!(
                f,
                "fn({}) -> {}",
                sig.params.iter().map(|p| p.to_string()).join(", "),
                sig.ret
            ),
            Ty::Param(name) => write!(f, "{}", name),
        }
    }
}

impl Display for TypeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.args.is_empty() {
            write!(f, "#{}", self.id)
        } else {
            write!(
                f,
                "#{}<{}>",
                self.id,
                self.args.iter().map(|a| a.to_string()).join(", ")
            )
        }
    }
}
