//! Deferred patches for references to functions that had no start offset yet.

use std::collections::HashMap;

use fp_bytecode::{InstrIndex, InstructionStream};
use fp_core::span::{FileId, Span};
use tracing::debug;

use crate::error::GenError;
use crate::generics::InstanceKey;

/// How the final offset is written into the referencing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Jump delta from the site to the target, for direct calls.
    Relative,
    /// Target instruction index, for function values.
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalleeKind {
    Function,
    Operator,
    General,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UndefinedOffset {
    pub site: InstrIndex,
    pub target: InstanceKey,
    pub reference: ReferenceKind,
    pub callee: CalleeKind,
    pub span: Span,
    pub file: FileId,
}

#[derive(Debug, Default)]
pub struct Linker {
    entries: Vec<UndefinedOffset>,
}

impl Linker {
    pub fn record(&mut self, entry: UndefinedOffset) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite every recorded site now that all functions have offsets.
    /// Returns the number of patched sites.
    pub fn link(
        &mut self,
        stream: &mut InstructionStream,
        offsets: &HashMap<InstanceKey, InstrIndex>,
        names: impl Fn(&InstanceKey) -> String,
    ) -> Result<usize, GenError> {
        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            let Some(target) = offsets.get(&entry.target) else {
                return Err(GenError::UnresolvedOffset {
                    site: entry.site.0,
                    target: names(&entry.target),
                });
            };
            let value = match entry.reference {
                ReferenceKind::Relative => entry.site.delta_to(*target),
                ReferenceKind::Absolute => target.0 as i64,
            };
            debug!(
                "link {:?} site {} -> {} ({:?} {})",
                entry.callee, entry.site, target, entry.reference, value
            );
            stream.patch(entry.site, value)?;
        }
        Ok(entries.len())
    }
}
