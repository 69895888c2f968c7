//! MIR (Mid-level Intermediate Representation). Each defined subroutine is a
//! control flow graph of basic blocks. Values are abstract storage slots that
//! are bound to stack offsets only during codegen; statements refer to values,
//! literals and subroutines by id and own none of them.

use hashbrown::HashSet;
use thiserror::Error;

use crate::{
    index::{Index, IndexVec, simple_index},
    intern::InternedSymbol,
    middle::hir::{self, LiteralValue, TypeId, TypeTable},
    source::{SourceFile, SourceLocation},
};

pub mod hir_lowering;
pub mod pretty_print;

simple_index! {
    /// Identifies a value slot within its subroutine
    pub struct ValueId;
}

simple_index! {
    /// Identifies a basic block within its subroutine
    pub struct BlockId;
}

simple_index! {
    /// Identifies an entry of the program's literal pool
    pub struct LiteralId;
}

simple_index! {
    pub struct SubroutineId;
}

simple_index! {
    pub struct ClassId;
}

#[derive(Debug)]
pub struct Program {
    pub files: Vec<SourceFile>,
    pub types: TypeTable,
    /// Names of the front end's classes, for rendering class types
    pub class_names: IndexVec<hir::ClassId, InternedSymbol>,
    pub subroutines: IndexVec<SubroutineId, Subroutine>,
    pub defined: Vec<SubroutineId>,
    pub declared: Vec<SubroutineId>,
    pub imported: Vec<SubroutineId>,
    pub methods: Vec<SubroutineId>,
    pub classes: IndexVec<ClassId, Class>,
    pub literals: IndexVec<LiteralId, Literal>,
    pub entry: Option<SubroutineId>,
}

impl Program {
    pub fn type_name(&self, ty: TypeId) -> String {
        self.types.display(ty, &|class| self.class_names[class])
    }

    /// The merged class for a front end class type, if it was lowered
    pub fn class_of_type(&self, ty: TypeId) -> Option<&Class> {
        self.classes.iter().find(|class| class.ty == ty)
    }
}

#[derive(Debug, Clone)]
pub struct Value {
    pub id: ValueId,
    /// The variable this value was created for, if it isn't a temporary
    pub symbol: Option<hir::Symbol>,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub id: LiteralId,
    pub ty: TypeId,
    pub value: LiteralValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// Dispatch through the operation table of the first argument
    Operator {
        kind: OperatorKind,
        result: ValueId,
        arguments: Vec<ValueId>,
    },
    /// Direct call of a known subroutine
    Call {
        result: ValueId,
        callee: SubroutineId,
        arguments: Vec<ValueId>,
    },
    Member {
        result: ValueId,
        object: ValueId,
        name: LiteralId,
    },
    /// Like [`StatementKind::Member`], but `result` refers to the member
    /// instead of holding a copy
    MemberRef {
        result: ValueId,
        object: ValueId,
        name: LiteralId,
    },
    Builtin {
        kind: BuiltinKind,
        template: Option<TypeId>,
        result: Option<ValueId>,
        arguments: Vec<ValueId>,
    },
    Assign {
        destination: ValueId,
        source: AssignSource,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Pos,
    Neg,
    Not,
    BitNot,
    Increment,
    Decrement,
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    ShiftLeft,
    ShiftRight,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Index,
    /// Yields a reference to the indexed element
    IndexRef,
    /// Copies the referenced value into the result
    Deref,
    /// Indirect call; the first argument is the callee
    Call,
}

impl OperatorKind {
    pub fn symbol(self) -> &'static str {
        match self {
            OperatorKind::Pos => "+",
            OperatorKind::Neg => "-",
            OperatorKind::Not => "!",
            OperatorKind::BitNot => "~",
            OperatorKind::Increment => "++",
            OperatorKind::Decrement => "--",
            OperatorKind::Or => "||",
            OperatorKind::And => "&&",
            OperatorKind::BitOr => "|",
            OperatorKind::BitXor => "^",
            OperatorKind::BitAnd => "&",
            OperatorKind::Equal => "==",
            OperatorKind::NotEqual => "!=",
            OperatorKind::Less => "<",
            OperatorKind::LessEqual => "<=",
            OperatorKind::ShiftLeft => "<<",
            OperatorKind::ShiftRight => ">>",
            OperatorKind::Add => "+",
            OperatorKind::Subtract => "-",
            OperatorKind::Multiply => "*",
            OperatorKind::Divide => "/",
            OperatorKind::Remainder => "%",
            OperatorKind::Index => "index",
            OperatorKind::IndexRef => "index_ref",
            OperatorKind::Deref => "deref",
            OperatorKind::Call => "call",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    Cast,
    Make,
    Print,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignSource {
    Value(ValueId),
    Literal(LiteralId),
    Subroutine(SubroutineId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Conditional {
        condition: ValueId,
        positive: BlockId,
        negative: BlockId,
    },
    Unconditional(BlockId),
    /// Falls into the subroutine's shared return path
    Sink,
}

impl Terminator {
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + use<> {
        let (a, b) = match *self {
            Terminator::Conditional {
                positive, negative, ..
            } => (Some(positive), (positive != negative).then_some(negative)),
            Terminator::Unconditional(target) => (Some(target), None),
            Terminator::Sink => (None, None),
        };
        a.into_iter().chain(b)
    }

    /// Points every edge to `from` at `to` instead
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match self {
            Terminator::Conditional {
                positive, negative, ..
            } => {
                if *positive == from {
                    *positive = to;
                }
                if *negative == from {
                    *negative = to;
                }
            }
            Terminator::Unconditional(target) if *target == from => *target = to,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub statements: Vec<Statement>,
    pub terminator: Terminator,
    /// The HIR expressions lowered into this block, kept for diagnostics and
    /// graph dumps only
    pub expressions: Vec<hir::ExpressionId>,
}

impl BasicBlock {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.expressions.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Body {
    pub return_value: ValueId,
    pub parameters: Vec<ValueId>,
    pub locals: Vec<ValueId>,
    pub temporaries: Vec<ValueId>,
    pub values: IndexVec<ValueId, Value>,
    pub blocks: IndexVec<BlockId, BasicBlock>,
    pub entry: BlockId,
    pub sink: BlockId,
}

impl Body {
    /// Blocks reachable from the entry, in depth first preorder
    pub fn reachable_blocks(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![self.entry];

        while let Some(block) = stack.pop() {
            if !visited.insert(block) {
                continue;
            }
            order.push(block);

            // reversed so the positive edge is explored first
            let successors = self.blocks[block].terminator.successors().collect::<Vec<_>>();
            stack.extend(successors.into_iter().rev());
        }

        order
    }

    /// Drops every block in `keep`'s complement and renumbers the rest so
    /// that the entry comes first and the sink last. Edges are rewritten.
    pub fn compact(&mut self, keep: &HashSet<BlockId>) {
        let mut order = self
            .blocks
            .indices()
            .filter(|b| keep.contains(b) && *b != self.entry && *b != self.sink)
            .collect::<Vec<_>>();
        order.insert(0, self.entry);
        if self.sink != self.entry {
            order.push(self.sink);
        }

        let mut renumbered = vec![None; self.blocks.len()];
        for (new, old) in order.iter().enumerate() {
            renumbered[old.index()] = Some(BlockId::new(new));
        }
        // edges only ever lead to kept blocks; the fallback is never taken
        let map = |b: BlockId| renumbered[b.index()].unwrap_or(b);

        let mut old_blocks = std::mem::take(&mut self.blocks.raw)
            .into_iter()
            .map(Some)
            .collect::<Vec<_>>();
        for old in &order {
            let Some(mut block) = old_blocks[old.index()].take() else {
                continue;
            };
            block.terminator = match block.terminator {
                Terminator::Conditional {
                    condition,
                    positive,
                    negative,
                } => Terminator::Conditional {
                    condition,
                    positive: map(positive),
                    negative: map(negative),
                },
                Terminator::Unconditional(target) => Terminator::Unconditional(map(target)),
                Terminator::Sink => Terminator::Sink,
            };
            self.blocks.push(block);
        }

        self.entry = map(self.entry);
        self.sink = map(self.sink);
    }
}

#[derive(Debug, Clone)]
pub struct Subroutine {
    pub symbol: hir::Symbol,
    pub ty: TypeId,
    pub linkage: hir::Linkage,
    /// The class type a method belongs to
    pub owner: Option<TypeId>,
    pub kind: SubroutineKind,
}

impl Subroutine {
    pub fn is_foreign(&self) -> bool {
        self.linkage == hir::Linkage::Foreign
    }

    pub fn body(&self) -> Option<&Body> {
        match &self.kind {
            SubroutineKind::Defined(body) => Some(body),
            _ => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut Body> {
        match &mut self.kind {
            SubroutineKind::Defined(body) => Some(body),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SubroutineKind {
    Defined(Body),
    Declared,
    Imported {
        library: String,
        entry_point: Option<String>,
    },
}

/// A class with its inherited members merged in
#[derive(Debug, Clone)]
pub struct Class {
    pub symbol: hir::Symbol,
    pub ty: TypeId,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: InternedSymbol,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: InternedSymbol,
    pub subroutine: SubroutineId,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("{0:?} is not reachable from the entry block")]
    Unreachable(BlockId),
    #[error("{block:?} jumps to {target:?}, which does not exist")]
    DanglingEdge { block: BlockId, target: BlockId },
    #[error("{0:?} is not the sink block but has a sink terminator")]
    StraySink(BlockId),
    #[error("the sink block {0:?} does not end in a sink terminator")]
    MissingSink(BlockId),
    #[error("{value:?} is used in {block:?} but never declared")]
    UndeclaredValue { block: BlockId, value: ValueId },
}

/// Checks the structural invariants every lowered body upholds: all edges
/// lead to existing blocks, every block except possibly the sink is reachable
/// and exactly one block (the sink) ends in a sink terminator.
///
/// The sink stays even when nothing reaches it, e.g. in a body that loops
/// forever, since codegen always emits the shared return path.
pub fn verify(body: &Body) -> Result<(), VerifyError> {
    for (id, block) in body.blocks.enumerate() {
        for target in block.terminator.successors() {
            if target.index() >= body.blocks.len() {
                return Err(VerifyError::DanglingEdge { block: id, target });
            }
        }

        let used = block.statements.iter().flat_map(|s| s.values()).chain(
            match block.terminator {
                Terminator::Conditional { condition, .. } => Some(condition),
                _ => None,
            },
        );
        for value in used {
            if value.index() >= body.values.len() {
                return Err(VerifyError::UndeclaredValue { block: id, value });
            }
        }

        match block.terminator {
            Terminator::Sink if id != body.sink => return Err(VerifyError::StraySink(id)),
            Terminator::Unconditional(_) | Terminator::Conditional { .. } if id == body.sink => {
                return Err(VerifyError::MissingSink(id));
            }
            _ => {}
        }
    }

    let reachable = body.reachable_blocks().into_iter().collect::<HashSet<_>>();
    match body
        .blocks
        .indices()
        .find(|b| *b != body.sink && !reachable.contains(b))
    {
        Some(block) => Err(VerifyError::Unreachable(block)),
        None => Ok(()),
    }
}

impl Statement {
    /// Every value the statement reads or writes
    pub fn values(&self) -> Vec<ValueId> {
        match &self.kind {
            StatementKind::Operator {
                result, arguments, ..
            }
            | StatementKind::Call {
                result, arguments, ..
            } => std::iter::once(*result).chain(arguments.iter().copied()).collect(),
            StatementKind::Member { result, object, .. }
            | StatementKind::MemberRef { result, object, .. } => vec![*result, *object],
            StatementKind::Builtin {
                result, arguments, ..
            } => result.iter().chain(arguments).copied().collect(),
            StatementKind::Assign {
                destination,
                source,
            } => match source {
                AssignSource::Value(source) => vec![*destination, *source],
                AssignSource::Literal(_) | AssignSource::Subroutine(_) => vec![*destination],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(terminator: Terminator) -> BasicBlock {
        BasicBlock {
            statements: Vec::new(),
            terminator,
            expressions: Vec::new(),
        }
    }

    fn body(blocks: Vec<BasicBlock>) -> Body {
        let sink = BlockId::new(blocks.len() - 1);
        Body {
            return_value: ValueId::new(0),
            parameters: Vec::new(),
            locals: Vec::new(),
            temporaries: Vec::new(),
            values: IndexVec::from_raw(vec![Value {
                id: ValueId::new(0),
                symbol: None,
                ty: TypeId::new(0),
            }]),
            blocks: IndexVec::from_raw(blocks),
            entry: BlockId::new(0),
            sink,
        }
    }

    #[test]
    fn reachability_follows_cycles() {
        let b = |n| BlockId::new(n);
        let body = body(vec![
            block(Terminator::Unconditional(b(1))),
            block(Terminator::Conditional {
                condition: ValueId::new(0),
                positive: b(2),
                negative: b(3),
            }),
            block(Terminator::Unconditional(b(1))),
            block(Terminator::Sink),
        ]);

        assert_eq!(body.reachable_blocks(), vec![b(0), b(1), b(2), b(3)]);
        assert_eq!(verify(&body), Ok(()));
    }

    #[test]
    fn unreachable_blocks_fail_verification() {
        let b = |n| BlockId::new(n);
        let body = body(vec![
            block(Terminator::Unconditional(b(2))),
            block(Terminator::Unconditional(b(2))),
            block(Terminator::Sink),
        ]);

        assert_eq!(verify(&body), Err(VerifyError::Unreachable(b(1))));
    }

    #[test]
    fn compaction_puts_entry_first_and_sink_last() {
        let b = |n| BlockId::new(n);
        let mut body = body(vec![
            block(Terminator::Sink),
            block(Terminator::Unconditional(b(3))),
            block(Terminator::Unconditional(b(0))),
            block(Terminator::Unconditional(b(0))),
        ]);
        body.entry = b(1);
        body.sink = b(0);

        let keep = [b(0), b(1), b(3)].into_iter().collect();
        body.compact(&keep);

        assert_eq!(body.entry, b(0));
        assert_eq!(body.sink, b(2));
        assert_eq!(body.blocks[b(0)].terminator, Terminator::Unconditional(b(1)));
        assert_eq!(body.blocks[b(1)].terminator, Terminator::Unconditional(b(2)));
        assert_eq!(body.blocks[b(2)].terminator, Terminator::Sink);
        assert_eq!(verify(&body), Ok(()));
    }
}
