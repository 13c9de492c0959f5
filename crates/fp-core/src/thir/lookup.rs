//! Candidate selection for operators and general functions.
//!
//! An exact (non-generic) candidate always wins. When none exists, the first
//! generic template whose parameter types unify with the operand types is
//! returned together with the concrete type arguments that bind it.

use super::{
    FunctionId, FunctionKind, GeneralKind, OperatorKind, ThirExternal, ThirFunction, ThirProgram,
    Ty, TypeBindings,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Candidate {
    Concrete(FunctionId),
    Generic {
        function: FunctionId,
        type_args: Vec<Ty>,
    },
}

impl Candidate {
    pub fn function(&self) -> FunctionId {
        match self {
            Candidate::Concrete(function) => *function,
            Candidate::Generic { function, .. } => *function,
        }
    }

    pub fn type_args(&self) -> &[Ty] {
        match self {
            Candidate::Concrete(_) => &[],
            Candidate::Generic { type_args, .. } => type_args,
        }
    }
}

fn bind_params(
    func: &ThirFunction,
    expected: &[Ty],
    mut bindings: TypeBindings,
) -> Option<Vec<Ty>> {
    if func.params.len() != expected.len() {
        return None;
    }
    for (param, actual) in func.params.iter().zip(expected) {
        if !param.ty.unify(actual, &mut bindings) {
            return None;
        }
    }
    func.type_params
        .iter()
        .map(|name| bindings.get(name).cloned())
        .collect()
}

impl ThirProgram {
    pub fn find_operator(&self, op: OperatorKind, operands: &[Ty]) -> Option<Candidate> {
        let candidates = || {
            self.functions
                .iter()
                .filter(move |func| func.kind == FunctionKind::Operator(op))
        };

        let exact = candidates().find(|func| {
            !func.is_generic()
                && func.params.len() == operands.len()
                && func.params.iter().zip(operands).all(|(p, t)| &p.ty == t)
        });
        if let Some(func) = exact {
            return Some(Candidate::Concrete(func.id));
        }

        candidates()
            .filter(|func| func.is_generic())
            .find_map(|func| {
                bind_params(func, operands, TypeBindings::new()).map(|type_args| {
                    Candidate::Generic {
                        function: func.id,
                        type_args,
                    }
                })
            })
    }

    /// Find the constructor, destructor, cloner or indexer of `owner` whose
    /// explicit parameters accept `args`. A function written for exactly
    /// `owner` wins; otherwise a template of a generic type takes the owner's
    /// type arguments as its own.
    pub fn find_general(&self, owner: &Ty, kind: GeneralKind, args: &[Ty]) -> Option<Candidate> {
        let owner_ref = owner.type_ref()?;
        let owner_bindings = self.type_bindings(owner_ref).ok()?;
        let candidates = || {
            self.functions.iter().filter(move |func| {
                func.kind
                    == FunctionKind::General {
                        kind,
                        owner: owner_ref.id,
                    }
            })
        };

        let exact = candidates().find(|func| {
            let for_owner = match &func.this_ty {
                Some(this_ty) => this_ty == owner,
                None => owner_ref.args.is_empty(),
            };
            !func.is_generic()
                && for_owner
                && func.params.len() == args.len()
                && func.params.iter().zip(args).all(|(p, t)| &p.ty == t)
        });
        if let Some(func) = exact {
            return Some(Candidate::Concrete(func.id));
        }

        candidates()
            .filter(|func| func.is_generic())
            .find_map(|func| {
                let mut bindings = owner_bindings.clone();
                if let Some(this_ty) = &func.this_ty {
                    if !this_ty.unify(owner, &mut bindings) {
                        return None;
                    }
                }
                bind_params(func, args, bindings).map(|type_args| Candidate::Generic {
                    function: func.id,
                    type_args,
                })
            })
    }

    pub fn external(&self, name: &str) -> Option<&ThirExternal> {
        self.externals.iter().find(|ext| ext.name == name)
    }

    pub fn entry_functions(&self) -> impl Iterator<Item = &ThirFunction> {
        self.functions.iter().filter(|func| func.is_entry)
    }
}
