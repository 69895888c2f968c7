//! Instruction selection. Every MIR value lives in a stack slot and every
//! operation is an indirect call through the operation table of one of its
//! operands, so selection is mostly a matter of getting pointers into the
//! right argument registers.
//!
//! Each defined subroutine goes through the same phases, each under its own
//! local label:
//!
//! 1. `entry`: save the caller's frame, reserve every slot at once and spill
//!    the incoming pointers
//! 2. `copy`: copy each parameter into a slot the subroutine owns
//! 3. `init`: give locals and temporaries a default value
//! 4. `bbN`: the basic blocks
//! 5. `deinit`: drop everything the subroutine owns
//! 6. `epilogue`: return, or leave the process for the entry subroutine

use std::collections::VecDeque;

use hashbrown::HashSet;
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::{
    backend::{
        CodegenOptions,
        assemblers::x86_64::{ARG_REGS, Assembler, Operand, X86FullRegister},
        context::{FrameContext, START_SYMBOL, Slot, SymbolIndex, local_label},
        debug::{DebugTables, InfoEntry, LineEntry, VariableEntry, VariableRole},
        runtime::{Helper, INLINE_SLOT_SIZE, OPS_OFFSET, Operation},
        unit::{AssemblyUnit, Data, Item},
    },
    diagnostics::{DiagnosticKind, Diagnostics, Stage},
    index::Index,
    middle::{
        hir::{PrimitiveKind, TypeId, TypeKind},
        mir::{
            self, BlockId, Body, LiteralId, OperatorKind, StatementKind, SubroutineId,
            SubroutineKind, Terminator, ValueId,
        },
    },
    source::SourceLocation,
};

mod call;
mod class;
mod foreign;
mod statement;

pub use call::{Argument, CallFrame, marshal, release};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    /// The construct is well formed MIR but can't be compiled; reported
    /// with its own diagnostic kind
    #[error("{message}")]
    Rejected {
        kind: DiagnosticKind,
        message: String,
    },
    #[error("value %{} has no stack slot", .0.index())]
    MissingSlot(ValueId),
    #[error("value %{} is expected to hold a reference", .0.index())]
    NotAReference(ValueId),
    #[error("subroutine #{} has no symbol", .0.index())]
    MissingSubroutine(SubroutineId),
    #[error("subroutine #{} does not have a function type", .0.index())]
    NotCallable(SubroutineId),
    #[error("literal #{} can't be materialized", .0.index())]
    UnusableLiteral(LiteralId),
    #[error("statement has no result value")]
    MissingResult,
    #[error("no scratch space was reserved for a native call")]
    MissingScratch,
    #[error("no class layout for `{0}`")]
    MissingClass(String),
}

impl SelectError {
    fn rejected(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        SelectError::Rejected {
            kind,
            message: message.into(),
        }
    }
}

/// Lowers every reachable subroutine of `program` to assembly
pub fn select_program(
    program: &mir::Program,
    options: &CodegenOptions,
    diagnostics: &mut Diagnostics,
) -> AssemblyUnit {
    let mut selector = InstructionSelector::new(program, options, diagnostics);
    selector.run();
    selector.finish()
}

/// Subroutine bodies and initializers still to be emitted
enum Work {
    Subroutine(SubroutineId),
    Initializer { ty: TypeId, symbol: String },
}

pub struct InstructionSelector<'p> {
    program: &'p mir::Program,
    debug_info: bool,
    diagnostics: &'p mut Diagnostics,
    symbols: SymbolIndex,
    debug: DebugTables,
    unit: AssemblyUnit,
    queue: VecDeque<Work>,
    emitted: HashSet<SubroutineId>,
}

impl<'p> InstructionSelector<'p> {
    pub fn new(
        program: &'p mir::Program,
        options: &CodegenOptions,
        diagnostics: &'p mut Diagnostics,
    ) -> Self {
        let reserved = runtime_symbols();
        let reserved = reserved.iter().map(String::as_str).collect::<Vec<_>>();

        Self {
            program,
            debug_info: options.debug_info,
            diagnostics,
            symbols: SymbolIndex::new(program, &reserved),
            debug: DebugTables::new(),
            unit: AssemblyUnit::new(),
            queue: VecDeque::new(),
            emitted: HashSet::new(),
        }
    }

    pub fn run(&mut self) {
        self.queue
            .extend(self.program.defined.iter().map(|id| Work::Subroutine(*id)));

        while let Some(work) = self.queue.pop_front() {
            match work {
                Work::Subroutine(id) => self.emit_subroutine(id),
                Work::Initializer { ty, symbol } => self.emit_initializer(ty, &symbol),
            }
        }

        self.emit_start();
    }

    pub fn finish(mut self) -> AssemblyUnit {
        let rodata = self
            .symbols
            .strings()
            .flat_map(|(value, symbol)| {
                [
                    Item::Label(symbol.to_owned()),
                    Item::Data(Data::Ascii(value.to_owned())),
                ]
            })
            .collect::<Vec<_>>();
        self.unit.rodata.items.extend(rodata);

        if self.debug_info {
            self.debug.emit(&mut self.unit);
        }

        self.unit
    }

    /// Symbol of a subroutine about to be referenced. Methods are queued for
    /// emission the first time they're referenced and anything without a
    /// body becomes an extern.
    fn subroutine_symbol(&mut self, id: SubroutineId) -> Result<String, SelectError> {
        let subroutine = self
            .program
            .subroutines
            .get(id)
            .ok_or(SelectError::MissingSubroutine(id))?;
        let symbol = self
            .symbols
            .subroutine(id)
            .ok_or(SelectError::MissingSubroutine(id))?
            .to_owned();

        match subroutine.kind {
            SubroutineKind::Defined(_) => {
                if subroutine.owner.is_some() && self.symbols.reference_method(id) {
                    self.queue.push_back(Work::Subroutine(id));
                }
            }
            SubroutineKind::Declared | SubroutineKind::Imported { .. } => {
                self.unit.externs.insert(symbol.clone());
            }
        }

        Ok(symbol)
    }

    fn initializer_symbol(&mut self, ty: TypeId) -> String {
        let (symbol, first) = self.symbols.initializer(self.program, ty);
        if first {
            self.queue.push_back(Work::Initializer {
                ty,
                symbol: symbol.clone(),
            });
        }
        symbol
    }

    fn report(&mut self, location: SourceLocation, what: &str, error: SelectError) {
        let (kind, message) = match error {
            SelectError::Rejected { kind, message } => (kind, message),
            internal => (DiagnosticKind::MissingSymbol, internal.to_string()),
        };
        self.diagnostics.error(
            Stage::Codegen,
            kind,
            location,
            format!("{what} was not compiled: {message}"),
        );
    }

    fn emit_subroutine(&mut self, id: SubroutineId) {
        let program = self.program;
        let Some(subroutine) = program.subroutines.get(id) else {
            return;
        };
        let Some(body) = subroutine.body() else {
            return;
        };
        let what = format!("`{}`", mir::pretty_print::subroutine_name(program, id));

        let Some(symbol) = self.symbols.subroutine(id).map(str::to_owned) else {
            self.report(subroutine.symbol.location, &what, SelectError::MissingSubroutine(id));
            return;
        };

        tracing::debug!(subroutine = %symbol, blocks = body.blocks.len(), "selecting instructions");

        let mut function = FunctionSelector::new(self, id, body, symbol);
        match function.select() {
            Ok(()) => {
                let output = function.into_output();
                self.commit(output);
                self.emitted.insert(id);
            }
            Err(error) => {
                tracing::debug!(subroutine = %what, %error, "subroutine skipped");
                self.report(subroutine.symbol.location, &what, error);
            }
        }
    }

    fn commit(&mut self, output: FunctionOutput) {
        self.unit.text.items.extend(output.items);

        if !self.debug_info {
            return;
        }

        self.debug.push_lines(output.lines);
        let name = self.debug.string(&output.name);
        let variables = output
            .variables
            .into_iter()
            .map(|(offset, variable, role)| VariableEntry {
                offset,
                name: self.debug.string(variable),
                role,
            })
            .collect();
        self.debug.push_info(InfoEntry {
            start: output.start,
            end: output.end,
            name,
            variables,
        });
    }

    /// The process entry point: builds a `none` return slot on the initial
    /// stack and hands it to the entry subroutine, which never returns
    fn emit_start(&mut self) {
        let Some(entry) = self.program.entry else {
            return;
        };

        if !self.emitted.contains(&entry) {
            // a defined entry that failed has been reported already
            let undefined = self
                .program
                .subroutines
                .get(entry)
                .filter(|subroutine| subroutine.body().is_none());
            if let Some(subroutine) = undefined {
                self.diagnostics.error(
                    Stage::Codegen,
                    DiagnosticKind::MissingEntry,
                    subroutine.symbol.location,
                    format!("entry subroutine `{}` has no body", subroutine.symbol.name),
                );
            }
            return;
        }

        let Some(symbol) = self.symbols.subroutine(entry).map(str::to_owned) else {
            return;
        };

        let mut emitter = Emitter::new(self);
        emitter.asm.global_label(START_SYMBOL);
        emitter.asm.movq(
            Operand::reg(X86FullRegister::Rsp),
            Operand::reg(X86FullRegister::Rbp),
        );
        let offset = emitter.frame.reserve(INLINE_SLOT_SIZE);
        emitter.asm.subq(offset, X86FullRegister::Rsp);

        let result = Argument::Value(Slot {
            offset: -offset,
            by_reference: false,
        });
        emitter.call_helper(Helper::MakeNone, &[result.clone()]);
        emitter.call_direct(&symbol, &[result]);

        let items = emitter.asm.into_items();
        self.unit.text.items.splice(0..0, items);
    }
}

/// Every helper symbol of the runtime library, which user code must not
/// shadow
fn runtime_symbols() -> Vec<String> {
    PrimitiveKind::iter()
        .flat_map(|kind| [Helper::Make(kind), Helper::Unwrap(kind)])
        .chain([
            Helper::MakeNone,
            Helper::MakeFunction,
            Helper::MakeArray,
            Helper::MakeObject,
            Helper::PrintValue,
            Helper::FlushOutput,
        ])
        .map(Helper::symbol)
        .collect()
}

/// An assembler and frame bound to the selector, with the runtime calling
/// conventions on top
struct Emitter<'s, 'p> {
    cx: &'s mut InstructionSelector<'p>,
    asm: Assembler,
    frame: FrameContext,
}

impl<'s, 'p> Emitter<'s, 'p> {
    fn new(cx: &'s mut InstructionSelector<'p>) -> Self {
        Self {
            cx,
            asm: Assembler::new(),
            frame: FrameContext::new(),
        }
    }

    fn call_direct(&mut self, symbol: &str, arguments: &[Argument]) {
        let call = marshal(&mut self.asm, &mut self.frame, arguments);
        self.asm.call(Operand::Symbol(symbol.to_owned()));
        release(&mut self.asm, &mut self.frame, call);
    }

    fn call_helper(&mut self, helper: Helper, arguments: &[Argument]) {
        let symbol = helper.symbol();
        self.call_direct(&symbol, arguments);
        self.cx.unit.externs.insert(symbol);
    }

    /// Calls `operation` out of the table of `arguments[receiver]`, which
    /// has to be a register argument
    fn call_operation(&mut self, operation: Operation, arguments: &[Argument], receiver: usize) {
        let call = marshal(&mut self.asm, &mut self.frame, arguments);

        self.asm.movq(
            Operand::BaseDisplacement(ARG_REGS[receiver], OPS_OFFSET),
            Operand::reg(X86FullRegister::R11),
        );
        if operation == Operation::Call {
            // variadic
            self.asm.zero(X86FullRegister::Rax);
        }
        let entry = match operation.offset() {
            0 => Operand::Indirect(X86FullRegister::R11),
            offset => Operand::BaseDisplacement(X86FullRegister::R11, offset),
        };
        self.asm.call(entry);

        release(&mut self.asm, &mut self.frame, call);
    }

    fn drop_value(&mut self, value: Argument) {
        self.call_operation(Operation::Drop, &[value], 0);
    }

    /// `(pointer, length)` arguments for a string in `.rodata`
    fn string(&mut self, value: &str) -> [Argument; 2] {
        [
            Argument::Symbol(self.cx.symbols.string(value)),
            Argument::Immediate(value.len() as i64),
        ]
    }

    /// Writes the zero value of `ty` into the uninitialized `target`
    fn default_initialize(&mut self, target: Argument, ty: TypeId) {
        match self.cx.program.types.get(ty) {
            TypeKind::Primitive(PrimitiveKind::String) => {
                let [pointer, length] = self.string("");
                self.call_helper(Helper::Make(PrimitiveKind::String), &[target, pointer, length]);
            }
            TypeKind::Primitive(kind) => {
                self.call_helper(Helper::Make(*kind), &[target, Argument::Immediate(0)]);
            }
            TypeKind::Array(_) => self.call_helper(Helper::MakeArray, &[target]),
            TypeKind::Void
            | TypeKind::Dynamic
            | TypeKind::Function { .. }
            | TypeKind::Class { .. } => self.call_helper(Helper::MakeNone, &[target]),
        }
    }
}

/// How a subroutine ends
enum Exit {
    Return,
    /// Leave the process, with the return value unwrapped as this primitive
    /// for the exit code
    Process(Option<PrimitiveKind>),
}

struct FunctionOutput {
    items: Vec<Item>,
    lines: Vec<LineEntry>,
    name: String,
    start: String,
    end: String,
    variables: Vec<(i64, &'static str, VariableRole)>,
}

struct FunctionSelector<'s, 'p> {
    emitter: Emitter<'s, 'p>,
    program: &'p mir::Program,
    id: SubroutineId,
    body: &'p Body,
    symbol: String,
    /// Temporaries holding a `Value*` rather than a value
    references: HashSet<ValueId>,
    owned_parameters: Vec<(ValueId, Slot)>,
    /// Start of the native scratch area, see [`foreign_arity`]
    scratch: Option<i64>,
    lines: Vec<LineEntry>,
    statements: usize,
}

impl<'s, 'p> FunctionSelector<'s, 'p> {
    fn new(
        cx: &'s mut InstructionSelector<'p>,
        id: SubroutineId,
        body: &'p Body,
        symbol: String,
    ) -> Self {
        let program = cx.program;
        Self {
            emitter: Emitter::new(cx),
            program,
            id,
            body,
            symbol,
            references: reference_values(body),
            owned_parameters: Vec::new(),
            scratch: None,
            lines: Vec::new(),
            statements: 0,
        }
    }

    fn label(&self, role: impl std::fmt::Display) -> String {
        local_label(&self.symbol, role)
    }

    fn block_label(&self, block: BlockId) -> String {
        self.label(format!("bb{}", block.index()))
    }

    fn value(&self, value: ValueId) -> Result<Argument, SelectError> {
        self.emitter
            .frame
            .slot(value)
            .map(Argument::Value)
            .ok_or(SelectError::MissingSlot(value))
    }

    fn values(&self, values: &[ValueId]) -> Result<Vec<Argument>, SelectError> {
        values.iter().map(|v| self.value(*v)).collect()
    }

    fn owned_values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.body
            .parameters
            .iter()
            .chain(&self.body.locals)
            .chain(&self.body.temporaries)
            .copied()
            .filter(|v| !self.references.contains(v))
    }

    fn select(&mut self) -> Result<(), SelectError> {
        let exit = if self.program.entry == Some(self.id) {
            Exit::Process(self.entry_exit_code()?)
        } else {
            Exit::Return
        };

        self.prologue();
        self.copy_parameters()?;
        self.initialize()?;
        for block in self.body.blocks.indices() {
            self.block(block)?;
        }
        self.deinitialize()?;
        self.epilogue(exit)?;

        tracing::trace!(
            subroutine = %self.symbol,
            frame_size = self.emitter.frame.frame_size(),
            "selected"
        );
        Ok(())
    }

    fn entry_exit_code(&self) -> Result<Option<PrimitiveKind>, SelectError> {
        let subroutine = &self.program.subroutines[self.id];
        let (parameters, return_type) = self
            .program
            .types
            .signature(subroutine.ty)
            .ok_or(SelectError::NotCallable(self.id))?;

        if !parameters.is_empty() {
            return Err(SelectError::rejected(
                DiagnosticKind::WrongArgumentCount,
                "the entry subroutine can't take parameters",
            ));
        }

        match self.program.types.get(return_type) {
            TypeKind::Void => Ok(None),
            TypeKind::Dynamic => Ok(Some(PrimitiveKind::Int)),
            TypeKind::Primitive(kind) if kind.is_scalar() => Ok(Some(*kind)),
            _ => Err(SelectError::rejected(
                DiagnosticKind::UnsupportedReturnType,
                format!(
                    "the entry subroutine can't return `{}` as an exit code",
                    self.program.type_name(return_type)
                ),
            )),
        }
    }

    /// Lays out the whole frame, then spills the return slot pointer and the
    /// parameter pointers passed in registers
    fn prologue(&mut self) {
        let entry = self.label("entry");
        let asm = &mut self.emitter.asm;
        let frame = &mut self.emitter.frame;

        asm.global_label(&self.symbol);
        asm.label(entry);
        asm.function_prologue();

        let return_slot = frame.allocate(self.body.return_value, true);

        // %rdi carries the return slot, leaving five registers
        let registers = &ARG_REGS[1..];
        let (in_registers, on_stack) = self
            .body
            .parameters
            .split_at(self.body.parameters.len().min(registers.len()));
        let incoming = in_registers
            .iter()
            .map(|p| frame.allocate(*p, true))
            .collect::<Vec<_>>();
        for (k, parameter) in on_stack.iter().enumerate() {
            // above the saved %rbp and the return address
            frame.rebind(
                *parameter,
                Slot {
                    offset: 16 + 8 * k as i64,
                    by_reference: true,
                },
            );
        }

        self.owned_parameters = self
            .body
            .parameters
            .iter()
            .map(|p| {
                let slot = Slot {
                    offset: -frame.reserve(INLINE_SLOT_SIZE),
                    by_reference: false,
                };
                (*p, slot)
            })
            .collect();

        for local in &self.body.locals {
            frame.allocate(*local, false);
        }
        for temporary in &self.body.temporaries {
            frame.allocate(*temporary, self.references.contains(temporary));
        }

        let arity = foreign_arity(self.program, self.body);
        if arity > 0 {
            self.scratch = Some(-frame.reserve(8 * arity as i64));
        }

        if frame.frame_size() > 0 {
            asm.subq(frame.frame_size(), X86FullRegister::Rsp);
        }
        asm.movq(
            Operand::reg(X86FullRegister::Rdi),
            Operand::frame(return_slot.offset),
        );
        for (slot, register) in incoming.iter().zip(registers) {
            asm.movq(Operand::reg(*register), Operand::frame(slot.offset));
        }
    }

    /// Parameters arrive as pointers into the caller's storage
    fn copy_parameters(&mut self) -> Result<(), SelectError> {
        let copy = self.label("copy");
        self.emitter.asm.label(copy);

        for (parameter, owned) in self.owned_parameters.clone() {
            let source = self.value(parameter)?;
            self.emitter
                .call_operation(Operation::Copy, &[Argument::Value(owned), source], 1);
            self.emitter.frame.rebind(parameter, owned);
        }

        Ok(())
    }

    fn initialize(&mut self) -> Result<(), SelectError> {
        let init = self.label("init");
        self.emitter.asm.label(init);

        let values = self
            .body
            .locals
            .iter()
            .chain(&self.body.temporaries)
            .copied()
            .filter(|v| !self.references.contains(v))
            .collect::<Vec<_>>();
        for value in values {
            let target = self.value(value)?;
            self.emitter.default_initialize(target, self.body.values[value].ty);
        }

        Ok(())
    }

    fn block(&mut self, block: BlockId) -> Result<(), SelectError> {
        let label = self.block_label(block);
        self.emitter.asm.label(label);

        let body = self.body;
        let block = &body.blocks[block];
        for statement in &block.statements {
            self.statement(statement)?;
        }

        self.terminator(block.terminator)
    }

    fn terminator(&mut self, terminator: Terminator) -> Result<(), SelectError> {
        match terminator {
            Terminator::Conditional {
                condition,
                positive,
                negative,
            } => {
                let condition = self.value(condition)?;
                self.emitter
                    .call_helper(Helper::Unwrap(PrimitiveKind::Bool), &[condition]);
                let (positive, negative) = (self.block_label(positive), self.block_label(negative));
                self.emitter
                    .asm
                    .branch_if_set(X86FullRegister::Rax, &positive, &negative);
            }
            Terminator::Unconditional(target) => {
                let target = self.block_label(target);
                self.emitter.asm.jmp(target);
            }
            Terminator::Sink => {
                let deinit = self.label("deinit");
                self.emitter.asm.jmp(deinit);
            }
        }
        Ok(())
    }

    /// Drops parameters, locals and temporaries, in that order
    fn deinitialize(&mut self) -> Result<(), SelectError> {
        let deinit = self.label("deinit");
        self.emitter.asm.label(deinit);

        for value in self.owned_values().collect::<Vec<_>>() {
            let value = self.value(value)?;
            self.emitter.drop_value(value);
        }

        Ok(())
    }

    fn epilogue(&mut self, exit: Exit) -> Result<(), SelectError> {
        let (epilogue, end) = (self.label("epilogue"), self.label("exit"));
        self.emitter.asm.label(epilogue);

        match exit {
            Exit::Return => self.emitter.asm.function_epilogue(),
            Exit::Process(code) => {
                self.emitter.call_helper(Helper::FlushOutput, &[]);
                match code {
                    Some(kind) => {
                        let value = self.value(self.body.return_value)?;
                        self.emitter.call_helper(Helper::Unwrap(kind), &[value]);
                        self.emitter.asm.movq(
                            Operand::reg(X86FullRegister::Rax),
                            Operand::reg(X86FullRegister::Rdi),
                        );
                    }
                    None => self.emitter.asm.zero(X86FullRegister::Rdi),
                }
                self.emitter.asm.exit_syscall();
            }
        }

        self.emitter.asm.label(end);
        Ok(())
    }

    fn into_output(self) -> FunctionOutput {
        let frame = &self.emitter.frame;
        let variables = self
            .body
            .parameters
            .iter()
            .map(|v| (*v, VariableRole::Parameter))
            .chain(self.body.locals.iter().map(|v| (*v, VariableRole::Local)))
            .filter_map(|(value, role)| {
                let symbol = self.body.values[value].symbol?;
                let slot = frame.slot(value)?;
                Some((slot.offset, symbol.name.value(), role))
            })
            .collect();

        FunctionOutput {
            name: mir::pretty_print::subroutine_name(self.program, self.id),
            start: self.label("entry"),
            end: self.label("exit"),
            lines: self.lines,
            variables,
            items: self.emitter.asm.into_items(),
        }
    }
}

/// Temporaries that receive a `Value*` from the runtime instead of a value
fn reference_values(body: &Body) -> HashSet<ValueId> {
    body.blocks
        .iter()
        .flat_map(|block| &block.statements)
        .filter_map(|statement| match &statement.kind {
            StatementKind::Operator {
                kind: OperatorKind::IndexRef,
                result,
                ..
            }
            | StatementKind::MemberRef { result, .. } => Some(*result),
            _ => None,
        })
        .collect()
}

/// Native scratch words a body needs: one per argument of its widest call
/// to a foreign subroutine, and at least one for the native return value
fn foreign_arity(program: &mir::Program, body: &Body) -> usize {
    body.blocks
        .iter()
        .flat_map(|block| &block.statements)
        .filter_map(|statement| match &statement.kind {
            StatementKind::Call { callee, .. } => {
                program.subroutines.get(*callee).filter(|s| s.is_foreign())
            }
            _ => None,
        })
        .map(|callee| {
            program
                .types
                .signature(callee.ty)
                .map_or(0, |(parameters, _)| parameters.len())
                .max(1)
        })
        .max()
        .unwrap_or(0)
}
