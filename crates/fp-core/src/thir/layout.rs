//! Word layout of types: on-stack sizes and per-type field offset tables.
//!
//! Sizes are counted in machine words. Structs are laid out inline, field after
//! field, with no padding; classes store the same field sequence in their heap
//! object and occupy a single word (the handle) on the stack.

use crate::error::{Error, Result};

use super::{FunctionId, ThirFunction, ThirProgram, ThirType, Ty, TypeBindings, TypeId, TypeRef};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlot {
    pub name: String,
    pub index: usize,
    pub offset: usize,
    /// Field type with the owner's type arguments substituted.
    pub ty: Ty,
}

impl ThirProgram {
    pub fn type_def(&self, id: TypeId) -> Result<&ThirType> {
        self.types
            .get(id.0 as usize)
            .filter(|def| def.id == id)
            .or_else(|| self.types.iter().find(|def| def.id == id))
            .ok_or(Error::UnknownType { id: id.0 })
    }

    pub fn function(&self, id: FunctionId) -> Result<&ThirFunction> {
        self.functions
            .get(id.0 as usize)
            .filter(|func| func.id == id)
            .or_else(|| self.functions.iter().find(|func| func.id == id))
            .ok_or(Error::UnknownFunction { id: id.0 })
    }

    /// Bindings of a type definition's parameters to the arguments of `r`.
    pub fn type_bindings(&self, r: &TypeRef) -> Result<TypeBindings> {
        let def = self.type_def(r.id)?;
        if def.type_params.len() != r.args.len() {
            return Err(Error::TypeArity {
                name: def.name.clone(),
                expected: def.type_params.len(),
                actual: r.args.len(),
            });
        }
        Ok(def
            .type_params
            .iter()
            .cloned()
            .zip(r.args.iter().cloned())
            .collect())
    }

    pub fn size_of(&self, ty: &Ty) -> Result<usize> {
        let mut visiting = Vec::new();
        self.size_of_inner(ty, &mut visiting)
    }

    fn size_of_inner(&self, ty: &Ty, visiting: &mut Vec<TypeRef>) -> Result<usize> {
        match ty {
            Ty::Void => Ok(0),
            Ty::Int
            | Ty::Float
            | Ty::Bool
            | Ty::Char
            | Ty::String
            | Ty::Heap(_)
            | Ty::Class(_)
            | Ty::Function(_) => Ok(1),
            Ty::Array(element, len) => Ok(self.size_of_inner(element, visiting)? * len),
            Ty::Struct(r) => {
                if visiting.contains(r) {
                    return Err(Error::RecursiveLayout {
                        name: self.type_def(r.id)?.name.clone(),
                    });
                }
                visiting.push(r.clone());
                let size = self.fields_size(r, visiting);
                visiting.pop();
                size
            }
            Ty::Param(name) => Err(Error::UnboundTypeParam { name: name.clone() }),
        }
    }

    fn fields_size(&self, r: &TypeRef, visiting: &mut Vec<TypeRef>) -> Result<usize> {
        let bindings = self.type_bindings(r)?;
        let def = self.type_def(r.id)?;
        let mut total = 0;
        for field in &def.fields {
            total += self.size_of_inner(&field.ty.substitute(&bindings), visiting)?;
        }
        Ok(total)
    }

    /// Offset table of a struct or class, fields in declaration order.
    pub fn fields(&self, r: &TypeRef) -> Result<Vec<FieldSlot>> {
        let bindings = self.type_bindings(r)?;
        let def = self.type_def(r.id)?;
        let mut offset = 0;
        let mut slots = Vec::with_capacity(def.fields.len());
        for (index, field) in def.fields.iter().enumerate() {
            let ty = field.ty.substitute(&bindings);
            let size = self.size_of(&ty)?;
            slots.push(FieldSlot {
                name: field.name.clone(),
                index,
                offset,
                ty,
            });
            offset += size;
        }
        Ok(slots)
    }

    pub fn field_slot(&self, r: &TypeRef, name: &str) -> Result<Option<FieldSlot>> {
        Ok(self.fields(r)?.into_iter().find(|slot| slot.name == name))
    }

    /// Number of heap words a class instance occupies.
    pub fn class_size(&self, r: &TypeRef) -> Result<usize> {
        let mut visiting = Vec::new();
        self.fields_size(r, &mut visiting)
    }

    pub fn type_name(&self, ty: &Ty) -> String {
        match ty {
            Ty::Struct(r) | Ty::Class(r) => match self.type_def(r.id) {
                Ok(def) if r.args.is_empty() => def.name.clone(),
                Ok(def) => format!(
                    "{}<{}>",
                    def.name,
                    r.args
                        .iter()
                        .map(|arg| self.type_name(arg))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                Err(_) => ty.to_string(),
            },
            Ty::Heap(inner) => format!("{}*", self.type_name(inner)),
            Ty::Array(inner, len) => format!("{}[{}]", self.type_name(inner), len),
            _ => ty.to_string(),
        }
    }
}
