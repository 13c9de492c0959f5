//! Side-channel records for disassemblers and runtime error reporting.
//! Written during generation, never read back by it.

use fp_bytecode::InstrIndex;
use fp_core::span::{FileId, Span};
use fp_core::thir::Ty;
use serde::Serialize;

use crate::address::ValueAddress;
use crate::error::GenError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugInfo {
    pub functions: Vec<FunctionRecord>,
    pub positions: Vec<PositionRecord>,
    pub scopes: Vec<ScopeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionRecord {
    pub name: String,
    pub file: FileId,
    pub span: Span,
    pub start: usize,
    pub end: usize,
    pub is_macro: bool,
}

/// Instructions `start..end` were emitted for the statement at `span`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRecord {
    pub start: usize,
    pub end: usize,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeRecord {
    pub start: usize,
    pub end: usize,
    pub slots: Vec<SlotRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotKind {
    Variable,
    Parameter,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotStorage {
    HeapPointer,
    StackPointer,
    Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotRecord {
    pub name: String,
    pub kind: SlotKind,
    pub storage: SlotStorage,
    pub ty: String,
    pub offset: i64,
    pub frame_relative: bool,
}

impl SlotRecord {
    pub fn new(name: &str, kind: SlotKind, ty: &Ty, address: &ValueAddress) -> Self {
        let storage = if address.is_reference {
            SlotStorage::StackPointer
        } else if ty.is_heap_backed() {
            SlotStorage::HeapPointer
        } else {
            SlotStorage::Value
        };
        Self {
            name: name.to_string(),
            kind,
            storage,
            ty: ty.to_string(),
            offset: address.offset,
            frame_relative: address.frame_relative,
        }
    }
}

impl DebugInfo {
    /// Source position of the innermost statement covering `index`.
    pub fn position_of(&self, index: usize) -> Option<Span> {
        self.positions
            .iter()
            .filter(|record| record.start <= index && index < record.end)
            .min_by_key(|record| record.end - record.start)
            .map(|record| record.span)
    }

    pub fn function_at(&self, index: usize) -> Option<&FunctionRecord> {
        self.functions
            .iter()
            .filter(|record| record.start <= index && index < record.end)
            .min_by_key(|record| record.end - record.start)
    }

    pub fn to_json(&self) -> Result<String, GenError> {
        serde_json::to_string_pretty(self).map_err(|err| GenError::Internal {
            message: format!("failed to serialize debug info: {}", err),
        })
    }
}

#[derive(Debug)]
pub struct DebugInfoBuilder {
    enabled: bool,
    info: DebugInfo,
}

impl DebugInfoBuilder {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            info: DebugInfo::default(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn function(&mut self, record: FunctionRecord) {
        if self.enabled {
            self.info.functions.push(record);
        }
    }

    pub fn position(&mut self, start: InstrIndex, end: InstrIndex, span: Span) {
        if self.enabled && end > start {
            self.info.positions.push(PositionRecord {
                start: start.0,
                end: end.0,
                span,
            });
        }
    }

    pub fn scope(&mut self, start: InstrIndex, end: InstrIndex, slots: Vec<SlotRecord>) {
        if self.enabled {
            self.info.scopes.push(ScopeRecord {
                start: start.0,
                end: end.0,
                slots,
            });
        }
    }

    pub fn finish(self) -> Option<DebugInfo> {
        self.enabled.then_some(self.info)
    }
}
