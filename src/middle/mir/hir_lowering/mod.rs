//! Lowers resolved HIR into MIR control flow graphs.
//!
//! Every statement lowers to a [`Sequence`] of blocks whose last block may be
//! left open (without a terminator) for the caller to wire up. Once the whole
//! body is built, anything still open falls into the synthetic sink block.

use hashbrown::{HashMap, HashSet};

use crate::{
    diagnostics::{DiagnosticKind, Diagnostics, Stage},
    index::{Index, IndexVec},
    middle::{
        hir,
        mir::{self, BlockId, LiteralId, Statement, StatementKind, Terminator, ValueId},
    },
    source::SourceLocation,
};

mod class;
mod expression;

/// Lowers every function and class of `program`. Constructs that can't be
/// lowered are reported to `diagnostics` and skipped.
pub fn lower_to_mir(program: &hir::Program, diagnostics: &mut Diagnostics) -> mir::Program {
    let mut literals = IndexVec::new();
    let mut subroutines = IndexVec::new();
    let mut defined = Vec::new();
    let mut declared = Vec::new();
    let mut imported = Vec::new();
    let mut methods = Vec::new();

    let owners = program
        .classes
        .iter()
        .flat_map(|class| class.methods.iter().map(|m| (*m, class.ty)))
        .collect::<HashMap<_, _>>();

    for (id, function) in program.functions.enumerate() {
        let kind = match &function.kind {
            hir::FunctionKind::Defined {
                parameters,
                locals,
                body,
            } => {
                tracing::debug!(function = %function.symbol.name, "lowering body");

                let ctx = BodyLoweringContext::new(
                    program,
                    function,
                    parameters,
                    locals,
                    &mut literals,
                    diagnostics,
                );
                let body = ctx.lower_body(body);

                tracing::trace!(
                    function = %function.symbol.name,
                    blocks = body.blocks.len(),
                    values = body.values.len(),
                    "lowered body"
                );

                if cfg!(feature = "verify-mir") {
                    if let Err(error) = mir::verify(&body) {
                        tracing::error!(function = %function.symbol.name, "malformed MIR: {error}");
                    }
                }

                mir::SubroutineKind::Defined(body)
            }
            hir::FunctionKind::Declared => mir::SubroutineKind::Declared,
            hir::FunctionKind::Imported {
                library,
                entry_point,
            } => mir::SubroutineKind::Imported {
                library: library.clone(),
                entry_point: entry_point.clone(),
            },
        };

        let subroutine = mir::SubroutineId::new(id.index());
        match &kind {
            mir::SubroutineKind::Defined(_) if function.is_method => methods.push(subroutine),
            mir::SubroutineKind::Defined(_) => defined.push(subroutine),
            mir::SubroutineKind::Declared => declared.push(subroutine),
            mir::SubroutineKind::Imported { .. } => imported.push(subroutine),
        }

        subroutines.push(mir::Subroutine {
            symbol: function.symbol,
            ty: function.ty,
            linkage: function.linkage,
            owner: owners.get(&id).copied(),
            kind,
        });
    }

    let classes = class::lower_classes(program, diagnostics);

    mir::Program {
        files: program.files.clone(),
        types: program.types.clone(),
        class_names: program.classes.iter().map(|c| c.symbol.name).collect(),
        subroutines,
        defined,
        declared,
        imported,
        methods,
        classes,
        literals,
        entry: program.entry.map(|f| mir::SubroutineId::new(f.index())),
    }
}

/// Blocks produced for one construct. `last` may still be open.
#[derive(Debug, Clone, Copy)]
struct Sequence {
    first: BlockId,
    last: BlockId,
}

impl Sequence {
    fn single(block: BlockId) -> Self {
        Self {
            first: block,
            last: block,
        }
    }
}

/// A block under construction; `None` marks an open terminator
#[derive(Debug, Default)]
struct PendingBlock {
    statements: Vec<Statement>,
    terminator: Option<Terminator>,
    expressions: Vec<hir::ExpressionId>,
}

struct BodyLoweringContext<'hir> {
    function: &'hir hir::Function,
    literals: &'hir mut IndexVec<LiteralId, mir::Literal>,
    diagnostics: &'hir mut Diagnostics,

    values: IndexVec<ValueId, mir::Value>,
    variable_map: HashMap<hir::VariableId, ValueId>,
    return_value: ValueId,
    parameters: Vec<ValueId>,
    locals: Vec<ValueId>,
    temporaries: Vec<ValueId>,

    blocks: IndexVec<BlockId, PendingBlock>,
    sink: Option<BlockId>,
    /// Exit blocks of the loops enclosing the statement being lowered
    loop_exits: Vec<BlockId>,
}

impl<'hir> BodyLoweringContext<'hir> {
    fn new(
        program: &'hir hir::Program,
        function: &'hir hir::Function,
        parameters: &'hir [hir::Variable],
        locals: &'hir [hir::Variable],
        literals: &'hir mut IndexVec<LiteralId, mir::Literal>,
        diagnostics: &'hir mut Diagnostics,
    ) -> Self {
        let return_type = match program.types.signature(function.ty) {
            Some((_, return_type)) => return_type,
            None => function.ty,
        };

        let mut ctx = Self {
            function,
            literals,
            diagnostics,
            values: IndexVec::new(),
            variable_map: HashMap::new(),
            return_value: ValueId::new(0),
            parameters: Vec::new(),
            locals: Vec::new(),
            temporaries: Vec::new(),
            blocks: IndexVec::new(),
            sink: None,
            loop_exits: Vec::new(),
        };

        ctx.return_value = ctx.create_value(None, return_type);

        for parameter in parameters {
            let id = ctx.create_value(Some(parameter.symbol), parameter.ty);
            ctx.variable_map.insert(parameter.id, id);
            ctx.parameters.push(id);
        }

        for local in locals {
            let id = ctx.create_value(Some(local.symbol), local.ty);
            ctx.variable_map.insert(local.id, id);
            ctx.locals.push(id);
        }

        ctx
    }

    fn create_value(&mut self, symbol: Option<hir::Symbol>, ty: hir::TypeId) -> ValueId {
        let id = self.values.next_index();
        self.values.push(mir::Value { id, symbol, ty })
    }

    fn create_temporary(&mut self, ty: hir::TypeId) -> ValueId {
        let id = self.create_value(None, ty);
        self.temporaries.push(id);
        id
    }

    fn create_block(&mut self) -> BlockId {
        self.blocks.push(PendingBlock::default())
    }

    fn sink(&mut self) -> BlockId {
        match self.sink {
            Some(sink) => sink,
            None => {
                let sink = self.create_block();
                self.blocks[sink].terminator = Some(Terminator::Sink);
                self.sink = Some(sink);
                sink
            }
        }
    }

    fn push_statement(&mut self, block: BlockId, kind: StatementKind, location: SourceLocation) {
        self.blocks[block]
            .statements
            .push(Statement { kind, location });
    }

    fn terminate(&mut self, block: BlockId, terminator: Terminator) {
        self.blocks[block].terminator = Some(terminator);
    }

    /// Closes `from` with a jump to `to`, unless it was already closed by a
    /// `break` or `return`
    fn connect(&mut self, from: BlockId, to: BlockId) {
        let terminator = &mut self.blocks[from].terminator;
        if terminator.is_none() {
            *terminator = Some(Terminator::Unconditional(to));
        }
    }

    fn error(
        &mut self,
        kind: DiagnosticKind,
        location: SourceLocation,
        message: impl Into<String>,
    ) {
        self.diagnostics
            .error(Stage::Lowering, kind, location, message);
    }

    fn lower_body(mut self, body: &'hir hir::Statement) -> mir::Body {
        let sequence = self.lower_statement(body);
        let sink = self.sink();
        self.connect(sequence.last, sink);

        for block in self.blocks.iter_mut() {
            if block.terminator.is_none() {
                block.terminator = Some(Terminator::Unconditional(sink));
            }
        }

        let mut body = mir::Body {
            return_value: self.return_value,
            parameters: self.parameters,
            locals: self.locals,
            temporaries: self.temporaries,
            values: self.values,
            blocks: self
                .blocks
                .raw
                .into_iter()
                .map(|block| mir::BasicBlock {
                    statements: block.statements,
                    terminator: block.terminator.unwrap_or(Terminator::Unconditional(sink)),
                    expressions: block.expressions,
                })
                .collect(),
            entry: sequence.first,
            sink,
        };

        // code after a `break` or `return` never runs
        let keep = body
            .reachable_blocks()
            .into_iter()
            .chain([sink])
            .collect::<HashSet<_>>();
        body.compact(&keep);

        body
    }

    fn lower_statement(&mut self, statement: &'hir hir::Statement) -> Sequence {
        match &statement.kind {
            hir::StatementKind::Block(statements) => {
                let mut sequence: Option<Sequence> = None;

                for statement in statements {
                    let next = self.lower_statement(statement);
                    sequence = Some(match sequence {
                        Some(previous) => {
                            self.connect(previous.last, next.first);
                            Sequence {
                                first: previous.first,
                                last: next.last,
                            }
                        }
                        None => next,
                    });
                }

                match sequence {
                    Some(sequence) => sequence,
                    None => Sequence::single(self.create_block()),
                }
            }
            hir::StatementKind::If {
                condition,
                positive,
                negative,
            } => {
                let condition_block = self.create_block();
                let condition_value = self.lower_root_value(condition, condition_block);
                let after = self.create_block();

                let positive = self.lower_statement(positive);
                self.connect(positive.last, after);

                let negative_first = match negative {
                    Some(negative) => {
                        let negative = self.lower_statement(negative);
                        self.connect(negative.last, after);
                        negative.first
                    }
                    None => after,
                };

                self.terminate(
                    condition_block,
                    Terminator::Conditional {
                        condition: condition_value,
                        positive: positive.first,
                        negative: negative_first,
                    },
                );

                Sequence {
                    first: condition_block,
                    last: after,
                }
            }
            hir::StatementKind::While { condition, body } => {
                let condition_block = self.create_block();
                let condition_value = self.lower_root_value(condition, condition_block);
                let exit = self.create_block();

                self.loop_exits.push(exit);
                let body = self.lower_statement(body);
                self.loop_exits.pop();

                // loop back edge
                self.connect(body.last, condition_block);

                self.terminate(
                    condition_block,
                    Terminator::Conditional {
                        condition: condition_value,
                        positive: body.first,
                        negative: exit,
                    },
                );

                Sequence {
                    first: condition_block,
                    last: exit,
                }
            }
            hir::StatementKind::Do {
                body,
                condition,
                negated,
            } => {
                let exit = self.create_block();

                self.loop_exits.push(exit);
                let body = self.lower_statement(body);
                self.loop_exits.pop();

                let condition_block = self.create_block();
                self.connect(body.last, condition_block);
                let condition_value = self.lower_root_value(condition, condition_block);

                let (positive, negative) = match negated {
                    false => (body.first, exit),
                    true => (exit, body.first),
                };
                self.terminate(
                    condition_block,
                    Terminator::Conditional {
                        condition: condition_value,
                        positive,
                        negative,
                    },
                );

                Sequence {
                    first: body.first,
                    last: exit,
                }
            }
            hir::StatementKind::Break => {
                let block = self.create_block();

                match self.loop_exits.last().copied() {
                    Some(exit) => self.terminate(block, Terminator::Unconditional(exit)),
                    None => self.error(
                        DiagnosticKind::UnexpectedBreak,
                        statement.location,
                        "`break` outside of a loop",
                    ),
                }

                Sequence::single(block)
            }
            hir::StatementKind::Return(value) => {
                let block = self.create_block();

                if let Some(value) = value {
                    self.blocks[block].expressions.push(value.id);
                    let source = self.lower_assign_source(value, block);
                    self.push_statement(
                        block,
                        StatementKind::Assign {
                            destination: self.return_value,
                            source,
                        },
                        value.location,
                    );
                }

                let sink = self.sink();
                self.terminate(block, Terminator::Unconditional(sink));

                Sequence::single(block)
            }
            hir::StatementKind::Expression(expression) => {
                let block = self.create_block();
                self.blocks[block].expressions.push(expression.id);
                self.lower_expression(expression, block, false);

                Sequence::single(block)
            }
        }
    }

    /// Lowers a condition or similar root expression and records it on the
    /// block for diagnostics
    fn lower_root_value(&mut self, expression: &'hir hir::Expression, block: BlockId) -> ValueId {
        self.blocks[block].expressions.push(expression.id);
        self.lower_value(expression, block)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::middle::{
        hir::{BinaryOperator, build::ProgramBuilder},
        mir::{AssignSource, OperatorKind},
    };

    fn lower(builder: ProgramBuilder) -> (mir::Program, Diagnostics) {
        let program = builder.finish();
        let mut diagnostics = Diagnostics::new();
        let mir = lower_to_mir(&program, &mut diagnostics);
        (mir, diagnostics)
    }

    fn body_of(program: &mir::Program, index: usize) -> &mir::Body {
        program.subroutines[mir::SubroutineId::new(index)]
            .body()
            .unwrap()
    }

    fn kinds(block: &mir::BasicBlock) -> Vec<&StatementKind> {
        block.statements.iter().map(|s| &s.kind).collect()
    }

    #[test]
    fn empty_body_is_a_single_jump_to_the_sink() {
        let mut b = ProgramBuilder::new();
        let void = b.void_ty();
        b.function("noop", &[], void);

        let (program, diagnostics) = lower(b);
        let body = body_of(&program, 0);

        assert!(diagnostics.is_empty());
        assert_eq!(body.blocks.len(), 2);
        assert_eq!(
            body.blocks[body.entry].terminator,
            Terminator::Unconditional(body.sink)
        );
        assert_eq!(body.blocks[body.sink].terminator, Terminator::Sink);
    }

    #[test]
    fn while_with_break_jumps_straight_to_the_exit() {
        // while (x) { if (c) break; }
        let mut b = ProgramBuilder::new();
        let void = b.void_ty();
        let boolean = b.bool_ty();
        let f = b.function("spin", &[("x", boolean), ("c", boolean)], void);
        let x = b.parameter(f, 0);
        let c = b.parameter(f, 1);

        let x = b.variable(f, x);
        let c = b.variable(f, c);
        let brk = b.break_();
        let if_ = b.if_(c, brk, None);
        let loop_body = b.block(vec![if_]);
        let while_ = b.while_(x, loop_body);
        let body = b.block(vec![while_]);
        b.define(f, body);

        let (program, diagnostics) = lower(b);
        let body = body_of(&program, 0);
        assert!(diagnostics.is_empty());
        assert_eq!(mir::verify(body), Ok(()));

        // entry is the loop condition
        let Terminator::Conditional {
            positive: loop_body,
            negative: exit,
            ..
        } = body.blocks[body.entry].terminator
        else {
            panic!("the loop condition ends in a branch");
        };

        let Terminator::Conditional {
            positive: break_block,
            negative: after_if,
            ..
        } = body.blocks[loop_body].terminator
        else {
            panic!("the loop body starts with the `if` condition");
        };

        assert_eq!(
            body.blocks[break_block].terminator,
            Terminator::Unconditional(exit)
        );
        assert_eq!(
            body.blocks[after_if].terminator,
            Terminator::Unconditional(body.entry)
        );
        assert_eq!(
            body.blocks[exit].terminator,
            Terminator::Unconditional(body.sink)
        );
    }

    #[test]
    fn do_loops_branch_back_by_polarity() {
        for negated in [false, true] {
            let mut b = ProgramBuilder::new();
            let void = b.void_ty();
            let f = b.function("repeat", &[], void);
            let hello = b.string("hello");
            let print = b.print(vec![hello]);
            let print = b.expr(print);
            let condition = b.boolean(true);
            let do_ = b.do_(print, condition, negated);
            b.define(f, do_);

            let (program, _) = lower(b);
            let body = body_of(&program, 0);
            assert_eq!(mir::verify(body), Ok(()));

            let Terminator::Unconditional(condition_block) = body.blocks[body.entry].terminator
            else {
                panic!("the body falls into the trailing condition");
            };
            let Terminator::Conditional {
                positive, negative, ..
            } = body.blocks[condition_block].terminator
            else {
                panic!("the trailing condition ends in a branch");
            };

            let (back, forward) = if negated {
                (negative, positive)
            } else {
                (positive, negative)
            };
            assert_eq!(back, body.entry);
            assert_ne!(forward, body.entry);
        }
    }

    #[test]
    fn break_without_a_loop_is_reported_once() {
        let mut b = ProgramBuilder::new();
        let void = b.void_ty();
        let f = b.function("lost", &[], void);
        let brk = b.break_();
        let s = b.string("still lowered");
        let print = b.print(vec![s]);
        let print = b.expr(print);
        let body = b.block(vec![brk, print]);
        b.define(f, body);

        let (program, diagnostics) = lower(b);

        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(
            diagnostics.iter().next().unwrap().kind,
            DiagnosticKind::UnexpectedBreak
        );

        let body = body_of(&program, 0);
        assert_eq!(mir::verify(body), Ok(()));
        let printed = body.blocks.iter().any(|block| {
            block.statements.iter().any(|s| {
                matches!(
                    s.kind,
                    StatementKind::Builtin {
                        kind: mir::BuiltinKind::Print,
                        ..
                    }
                )
            })
        });
        assert!(printed);
    }

    #[test]
    fn code_after_return_is_pruned() {
        let mut b = ProgramBuilder::new();
        let int = b.int_ty();
        let f = b.function("early", &[], int);
        let one = b.int(1);
        let ret = b.return_(Some(one));
        let two = b.int(2);
        let dead = b.print(vec![two]);
        let dead = b.expr(dead);
        let body = b.block(vec![ret, dead]);
        b.define(f, body);

        let (program, _) = lower(b);
        let body = body_of(&program, 0);

        assert_eq!(body.blocks.len(), 2);
        assert_eq!(mir::verify(body), Ok(()));
        assert_eq!(
            kinds(&body.blocks[body.entry]),
            vec![&StatementKind::Assign {
                destination: body.return_value,
                source: AssignSource::Literal(LiteralId::new(0)),
            }]
        );
    }

    #[test]
    fn greater_than_swaps_operands() {
        let mut b = ProgramBuilder::new();
        let boolean = b.bool_ty();
        let int = b.int_ty();
        let f = b.function("gt", &[("a", int), ("b", int)], boolean);
        let (pa, pb) = (b.parameter(f, 0), b.parameter(f, 1));
        let a = b.variable(f, pa);
        let bv = b.variable(f, pb);
        let gt = b.binary(BinaryOperator::Greater, a, bv);
        let ret = b.return_(Some(gt));
        b.define(f, ret);

        let (program, _) = lower(b);
        let body = body_of(&program, 0);
        let a = body.parameters[0];
        let bv = body.parameters[1];

        let StatementKind::Operator {
            kind, arguments, ..
        } = &body.blocks[body.entry].statements[0].kind
        else {
            panic!("expected the comparison first");
        };
        assert_eq!(*kind, OperatorKind::Less);
        assert_eq!(arguments, &vec![bv, a]);
    }
}
