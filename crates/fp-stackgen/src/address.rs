//! Address resolution for readable and assignable expressions.
//!
//! A [`Place`] describes where the words of a value live: a root slot on the
//! stack ([`ValueAddress`]), an optional chain of heap handles reached from it,
//! and the word offset of the value inside its final container. Places are
//! recomputed for every reference and never cached.

use fp_bytecode::{AddressingMode, Opcode};
use fp_core::thir::{ThirExpr, ThirExprKind, Ty};
use serde::Serialize;

use crate::context::Generator;
use crate::error::LowerResult;
use crate::fold::{fold_expr, Const};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValueAddress {
    pub offset: i64,
    pub frame_relative: bool,
    /// The slot holds the stack address of the real storage.
    pub is_reference: bool,
    /// The described bytes live behind a heap handle.
    pub in_heap: bool,
}

impl ValueAddress {
    pub fn slot(offset: i64, frame_relative: bool) -> Self {
        Self {
            offset,
            frame_relative,
            is_reference: false,
            in_heap: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Place {
    pub address: ValueAddress,
    /// Word offset, inside the root storage, of the first heap handle.
    pub root_offset: i64,
    /// Offsets of the intermediate handles followed after the first one.
    pub hops: Vec<i64>,
    pub data_offset: i64,
    pub ty: Ty,
}

impl<'p> Generator<'p> {
    /// Resolve an identifier, field or constant-index chain to its storage.
    /// Returns `None` for expressions that only produce values.
    pub fn resolve_place(&mut self, expr: &ThirExpr) -> LowerResult<Option<Place>> {
        match &expr.kind {
            ThirExprKind::Ident(name) => {
                let Some(slot) = self.lookup_variable(name) else {
                    return Err(self.error(expr.span, format!("unknown identifier `{}`", name)));
                };
                Ok(Some(Place {
                    address: slot.address,
                    root_offset: 0,
                    hops: Vec::new(),
                    data_offset: 0,
                    ty: self.resolve(&slot.ty),
                }))
            }
            ThirExprKind::Field { prefix, name } => {
                let Some(mut place) = self.resolve_place(prefix)? else {
                    return Ok(None);
                };
                let (offset, field_ty) = self.field_offset(&place.ty, name, expr)?;
                if matches!(place.ty, Ty::Class(_)) {
                    if place.address.in_heap {
                        place.hops.push(place.data_offset);
                    } else {
                        place.address.in_heap = true;
                        place.root_offset = place.data_offset;
                    }
                    place.data_offset = offset;
                } else {
                    place.data_offset += offset;
                }
                place.ty = field_ty;
                Ok(Some(place))
            }
            ThirExprKind::Index { prefix, index } => {
                let prefix_ty = self.resolve(&prefix.ty);
                let Ty::Array(element, len) = prefix_ty else {
                    return Ok(None);
                };
                let Some(mut place) = self.resolve_place(prefix)? else {
                    return Ok(None);
                };
                let position = self.constant_index(index, len)?;
                let element_size = self.size_of(&element)? as i64;
                place.data_offset += position * element_size;
                place.ty = *element;
                Ok(Some(place))
            }
            _ => Ok(None),
        }
    }

    pub fn field_offset(&self, ty: &Ty, name: &str, expr: &ThirExpr) -> LowerResult<(i64, Ty)> {
        let Some(type_ref) = ty.type_ref() else {
            return Err(self.error(
                expr.span,
                format!("type {} has no field `{}`", self.type_name(ty), name),
            ));
        };
        match self.program.field_slot(type_ref, name)? {
            Some(slot) => Ok((slot.offset as i64, slot.ty)),
            None => Err(self.error(
                expr.span,
                format!("type {} has no field `{}`", self.type_name(ty), name),
            )),
        }
    }

    /// Stack arrays are only addressed by indices known at compile time.
    pub fn constant_index(&mut self, index: &ThirExpr, len: usize) -> LowerResult<i64> {
        match fold_expr(index) {
            Some(Const::Int(position)) => {
                if position < 0 || position as usize >= len {
                    self.warn(
                        index.span,
                        format!("constant index {} is out of range for length {}", position, len),
                    );
                }
                Ok(position)
            }
            _ => Err(self.error(
                index.span,
                "dynamic index into a stack array is not supported",
            )),
        }
    }

    fn emit_load_root(&mut self, address: &ValueAddress, word: i64) {
        let mode = self.slot_mode(address.frame_relative);
        if address.is_reference {
            self.emit(Opcode::Load, mode, address.offset);
            self.emit(Opcode::Load, AddressingMode::Runtime, word);
        } else {
            self.emit(Opcode::Load, mode, address.offset + word);
        }
    }

    /// Push the handle of the heap object that directly contains the place.
    fn emit_load_handle(&mut self, place: &Place) {
        self.emit_load_root(&place.address, place.root_offset);
        for hop in &place.hops {
            self.emit(Opcode::HeapGet, AddressingMode::Absolute, *hop);
        }
    }

    pub fn emit_load_place(&mut self, place: &Place) -> LowerResult<()> {
        let size = self.size_of(&place.ty)? as i64;
        for word in 0..size {
            if place.address.in_heap {
                self.emit_load_handle(place);
                self.emit(Opcode::HeapGet, AddressingMode::Absolute, place.data_offset + word);
            } else {
                self.emit_load_root(&place.address, place.data_offset + word);
            }
        }
        Ok(())
    }

    /// Store the value on top of the stack into `place`, last word first.
    pub fn emit_store_place(&mut self, place: &Place) -> LowerResult<()> {
        let size = self.size_of(&place.ty)? as i64;
        let mode = self.slot_mode(place.address.frame_relative);
        for word in (0..size).rev() {
            if place.address.in_heap {
                self.emit_load_handle(place);
                self.emit(Opcode::HeapSet, AddressingMode::Absolute, place.data_offset + word);
            } else if place.address.is_reference {
                self.emit(Opcode::Load, mode, place.address.offset);
                self.emit(Opcode::Store, AddressingMode::Runtime, place.data_offset + word);
            } else {
                self.emit(Opcode::Store, mode, place.address.offset + place.data_offset + word);
            }
        }
        Ok(())
    }

    /// Push the absolute stack address of a place, for by-reference arguments.
    pub fn emit_place_address(&mut self, place: &Place, expr: &ThirExpr) -> LowerResult<()> {
        if place.address.in_heap {
            return Err(self.error(
                expr.span,
                "a value stored on the heap cannot be passed by reference",
            ));
        }
        let address = &place.address;
        if address.is_reference {
            let mode = self.slot_mode(address.frame_relative);
            self.emit(Opcode::Load, mode, address.offset);
            if place.data_offset != 0 {
                self.push_int(place.data_offset);
                self.emit_bare(Opcode::Add);
            }
        } else {
            let mode = self.slot_mode(address.frame_relative);
            self.emit(Opcode::Push, mode, address.offset + place.data_offset);
        }
        Ok(())
    }

    /// Drop `drop` words sitting directly below the top `keep` words.
    pub fn emit_squash(&mut self, keep: usize, drop: usize) {
        if drop == 0 {
            return;
        }
        let (keep, dropped) = (keep as i64, drop as i64);
        for word in 0..keep {
            self.emit(Opcode::Load, AddressingMode::Relative, -(keep - word));
            self.emit(Opcode::Store, AddressingMode::Relative, -(keep + dropped + 1 - word));
        }
        self.emit_pop(drop);
    }

    /// Narrow a `total`-word value on top of the stack to the `width` words
    /// starting at `offset`.
    pub fn emit_extract(&mut self, total: usize, offset: usize, width: usize) {
        self.emit_pop(total - offset - width);
        self.emit_squash(width, offset);
    }
}
