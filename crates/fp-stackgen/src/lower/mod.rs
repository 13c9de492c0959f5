//! Lowering of a typed program into one instruction stream.
//!
//! Layout of the generated stream:
//!
//! ```text
//! external name cache
//! top-level statements (global scope)
//! call of the entry function
//! global cleanup, name cache release, exit
//! concrete functions
//! generic instances, in the order they were first requested
//! ```

mod call;
mod expr;
mod object;
mod stmt;

pub(crate) use call::Receiver;

use fp_bytecode::{AddressingMode, Immediate, Opcode};
use fp_core::diagnostics::Diagnostic;
use fp_core::span::Span;
use fp_core::thir::{
    ThirBlock, ThirFunction, ThirProgram, ThirStmt, ThirStmtKind, Ty, TypeBindings,
};
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::address::ValueAddress;
use crate::context::{Generator, VarSlot};
use crate::debug_info::{FunctionRecord, SlotKind};
use crate::error::{GenError, LowerError, LowerResult};
use crate::frame::CallTarget;
use crate::generics::InstanceKey;
use crate::scope::ScopeKind;

impl<'p> Generator<'p> {
    pub fn generate_program(&mut self) -> Result<(), GenError> {
        let program = self.program;
        info!(
            "lowering {} functions, {} top-level statements, {} externals",
            program.functions.len(),
            program.statements.len(),
            program.externals.len()
        );

        self.emit_name_cache();

        self.enter_scope(ScopeKind::Global);
        let globals = program.statements.iter().filter_map(|stmt| match &stmt.kind {
            ThirStmtKind::Let(local) => Some(local),
            _ => None,
        });
        if let Err(err) = self.hoist_locals(globals) {
            self.absorb(err, Span::default())?;
        }
        for stmt in &program.statements {
            self.lower_stmt(stmt)?;
        }
        if let Err(err) = self.lower_entry_call() {
            self.absorb(err, Span::default())?;
        }
        self.globals = self
            .scopes
            .last()
            .map(|scope| scope.vars.clone())
            .unwrap_or_default();
        if let Err(err) = self.exit_scope(Span::default()) {
            self.absorb(err, Span::default())?;
        }
        self.release_name_cache();
        self.emit_bare(Opcode::Exit);

        for function in &program.functions {
            if function.is_generic() || function.is_macro {
                continue;
            }
            let key = InstanceKey::concrete(function.id);
            self.generate_function(function, key, TypeBindings::new())?;
        }
        self.patch_entry()?;

        while let Some(key) = self.queue.next()? {
            let function = program.function(key.function).map_err(|err| GenError::UnknownNode {
                message: err.to_string(),
            })?;
            let bindings: TypeBindings = function
                .type_params
                .iter()
                .cloned()
                .zip(key.type_args.iter().cloned())
                .collect();
            self.generate_function(function, key, bindings)?;
        }

        if !self.linker.is_empty() {
            debug!("linking {} deferred references", self.linker.len());
        }
        let patched = self.linker.link(&mut self.stream, &self.offsets, |key| {
            instance_name(program, key)
        })?;

        let errors = self.diagnostics.iter().filter(|d| d.is_error()).count();
        if errors == 0 && !self.stream.is_fully_linked() {
            let pending = self.stream.pending().map(|index| index.to_string()).join(", ");
            return Err(GenError::internal(format!(
                "placeholders left unpatched at {}",
                pending
            )));
        }
        info!(
            "generated {} instructions, {} generic instances, {} linked sites, {} errors",
            self.stream.len(),
            self.queue.drained(),
            patched,
            errors
        );
        Ok(())
    }

    /// Record a user error in the diagnostics; fatal errors are returned.
    pub(crate) fn absorb(&mut self, err: LowerError, span: Span) -> Result<(), GenError> {
        match err {
            LowerError::Diagnostic(diagnostic) => {
                let mut diagnostic = *diagnostic;
                // nodes without a position report the enclosing statement's
                if diagnostic.span.unwrap_or_default() == Span::default() {
                    diagnostic = diagnostic.with_span(span);
                }
                debug!("abandoned statement at {}: {}", span, diagnostic);
                self.diagnostics.push(diagnostic);
                Ok(())
            }
            LowerError::Fatal(err) => Err(err),
        }
    }

    /// Lower one statement. A user error abandons the statement, restores the
    /// tracked frame state and continues with the next one.
    pub fn lower_stmt(&mut self, stmt: &ThirStmt) -> Result<(), GenError> {
        let start = self.stream.next_index();
        let snapshot = self.snapshot();
        if let Err(err) = self.lower_stmt_kind(stmt) {
            self.restore(snapshot);
            self.absorb(err, stmt.span)?;
        }
        self.debug.position(start, self.stream.next_index(), stmt.span);
        Ok(())
    }

    pub fn lower_block(&mut self, block: &ThirBlock, kind: ScopeKind) -> LowerResult<()> {
        self.enter_scope(kind);
        self.hoist_locals(block.local_decls())?;
        for stmt in &block.stmts {
            self.lower_stmt(stmt)?;
        }
        self.exit_scope(block.span)
    }

    fn generate_function(
        &mut self,
        function: &ThirFunction,
        key: InstanceKey,
        bindings: TypeBindings,
    ) -> Result<(), GenError> {
        let start = self.stream.next_index();
        let name = self.instance_name(&key);
        self.offsets.insert(key, start);
        self.bindings = bindings;
        self.current_file = function.file;
        self.depth = 0;
        self.scopes.clear();
        self.loops.clear();

        if let Err(err) = self.lower_function_body(function, &name) {
            self.absorb(err, function.span)?;
        }

        self.frame = None;
        self.bindings = TypeBindings::new();
        let end = self.stream.next_index();
        debug!("generated {} at {}..{}", name, start, end);
        self.debug.function(FunctionRecord {
            name,
            file: function.file,
            span: function.span,
            start: start.0,
            end: end.0,
            is_macro: false,
        });
        Ok(())
    }

    fn lower_function_body(&mut self, function: &ThirFunction, name: &str) -> LowerResult<()> {
        let frame = self.frame_layout(function)?;
        if !frame.ret.is_void() && !function.body.contains_return() {
            self.diagnostics.push(
                Diagnostic::warning(format!("function `{}` never returns a value", name))
                    .with_span(function.span)
                    .with_suggestion("end every path with a `return` statement"),
            );
        }
        let params = frame.params.clone();
        self.frame = Some(frame);

        self.comment(format!("fn {}", name));
        self.emit_prologue();
        self.enter_scope(ScopeKind::FunctionRoot);
        let flag = VarSlot {
            name: "return flag".to_string(),
            ty: Ty::Bool,
            address: ValueAddress::slot(0, true),
        };
        self.record_slot(SlotKind::Internal, &flag);
        for param in &params {
            let slot = VarSlot {
                name: param.name.clone(),
                ty: param.ty.clone(),
                address: ValueAddress {
                    offset: param.offset,
                    frame_relative: true,
                    is_reference: param.by_ref,
                    in_heap: false,
                },
            };
            self.record_slot(SlotKind::Parameter, &slot);
        }
        self.hoist_locals(function.body.local_decls())?;
        for stmt in &function.body.stmts {
            self.lower_stmt(stmt)?;
        }
        self.exit_scope(function.body.span)?;
        self.emit_epilogue()
    }

    /// Call the program's entry function after the top-level statements.
    fn lower_entry_call(&mut self) -> LowerResult<()> {
        let program = self.program;
        let entries: Vec<&ThirFunction> = program.entry_functions().collect();
        let Some(entry) = entries.first().copied() else {
            return Ok(());
        };
        if let Some(extra) = entries.get(1) {
            return Err(self.error(
                extra.span,
                format!(
                    "multiple entry functions: {}",
                    entries.iter().map(|func| func.name.as_str()).join(", ")
                ),
            ));
        }
        if entry.is_generic()
            || entry.is_macro
            || !entry.params.is_empty()
            || entry.this_ty.is_some()
        {
            return Err(self.error(
                entry.span,
                format!(
                    "entry function `{}` must be a plain function without parameters",
                    entry.name
                ),
            ));
        }

        self.comment(format!("call entry {}", entry.name));
        let ret_size = self.size_of(&entry.ret)?;
        self.push_default(&entry.ret)?;
        let jump = self.emit_call_transfer(CallTarget::Deferred)?;
        self.entry_site = Some((entry.id, jump));
        self.emit_pop(ret_size);
        Ok(())
    }

    fn patch_entry(&mut self) -> Result<(), GenError> {
        let Some((function, site)) = self.entry_site.take() else {
            return Ok(());
        };
        let key = InstanceKey::concrete(function);
        let Some(start) = self.offsets.get(&key).copied() else {
            return Err(GenError::UnresolvedOffset {
                site: site.0,
                target: self.instance_name(&key),
            });
        };
        self.stream.patch(site, site.delta_to(start))?;
        Ok(())
    }

    fn emit_name_cache(&mut self) {
        let program = self.program;
        if program.externals.is_empty() {
            return;
        }
        if !self.options.build_name_cache {
            warn!(
                "external name cache disabled; {} externals allocate their name on every call",
                program.externals.len()
            );
            return;
        }
        self.comment("external name cache");
        for external in &program.externals {
            let slot = self.depth;
            self.emit(
                Opcode::NewString,
                AddressingMode::Absolute,
                Immediate::Str(external.name.clone()),
            );
            self.name_cache.insert(external.name.clone(), slot);
        }
    }

    fn release_name_cache(&mut self) {
        let names: Vec<(String, i64)> = self
            .name_cache
            .iter()
            .map(|(name, slot)| (name.clone(), *slot))
            .sorted_by_key(|(_, slot)| std::cmp::Reverse(*slot))
            .collect();
        for (name, _) in names {
            self.comment(format!("release name {}", name));
            self.emit_string_release();
        }
    }

    /// Free the string object whose handle is on top of the stack: its
    /// payload first, then the object itself.
    pub fn emit_string_release(&mut self) {
        self.emit_bare(Opcode::Duplicate);
        self.emit(Opcode::HeapGet, AddressingMode::Absolute, 0i64);
        self.emit_bare(Opcode::Deallocate);
        self.emit_bare(Opcode::Deallocate);
    }

    pub fn instance_name(&self, key: &InstanceKey) -> String {
        instance_name(self.program, key)
    }
}

/// Readable name of a function instance, e.g. `max<int>`.
fn instance_name(program: &ThirProgram, key: &InstanceKey) -> String {
    let Ok(function) = program.function(key.function) else {
        return key.to_string();
    };
    if key.type_args.is_empty() {
        function.name.clone()
    } else {
        format!(
            "{}<{}>",
            function.name,
            key.type_args.iter().map(|arg| program.type_name(arg)).join(", ")
        )
    }
}
