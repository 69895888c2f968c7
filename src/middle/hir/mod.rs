//! HIR (High-level Intermediate Representation) as handed over by the front
//! end. Every node already carries its resolved type and symbol; this crate
//! never re-checks them, it only lowers the tree into MIR.

use serde::{Deserialize, Serialize};

use crate::{
    index::{IndexVec, simple_index},
    intern::InternedSymbol,
    source::{SourceFile, SourceLocation},
};

pub mod build;
pub mod ty;

pub use ty::{PrimitiveKind, TypeId, TypeKind, TypeTable};

simple_index! {
    /// Identifies a function (free function, method or foreign declaration)
    pub struct FunctionId;
}

simple_index! {
    pub struct ClassId;
}

simple_index! {
    /// Identifies a parameter or local variable within its function
    pub struct VariableId;
}

simple_index! {
    /// Identifies an expression node; unique within a program
    pub struct ExpressionId;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub files: Vec<SourceFile>,
    pub types: TypeTable,
    pub functions: IndexVec<FunctionId, Function>,
    pub classes: IndexVec<ClassId, Class>,
    /// The function the process starts in, if this program is an executable
    pub entry: Option<FunctionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub name: InternedSymbol,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    Internal,
    /// Called through the native C ABI instead of the tagged value ABI
    Foreign,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub symbol: Symbol,
    /// Always a [`TypeKind::Function`]
    pub ty: TypeId,
    pub linkage: Linkage,
    pub is_method: bool,
    pub kind: FunctionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FunctionKind {
    Defined {
        parameters: Vec<Variable>,
        locals: Vec<Variable>,
        body: Statement,
    },
    /// Signature only, defined in another compilation unit
    Declared,
    Imported {
        library: String,
        entry_point: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: VariableId,
    pub symbol: Symbol,
    pub ty: TypeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub symbol: Symbol,
    /// The instantiated [`TypeKind::Class`] of this class
    pub ty: TypeId,
    pub parent: Option<ClassId>,
    pub fields: Vec<Variable>,
    pub methods: Vec<FunctionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatementKind {
    Block(Vec<Statement>),
    If {
        condition: Expression,
        positive: Box<Statement>,
        negative: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    /// `do body while (condition)`, or `do body until (condition)` when negated
    Do {
        body: Box<Statement>,
        condition: Expression,
        negated: bool,
    },
    Break,
    Return(Option<Expression>),
    Expression(Expression),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expression {
    pub id: ExpressionId,
    pub ty: TypeId,
    pub location: SourceLocation,
    pub kind: ExpressionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExpressionKind {
    Literal(LiteralValue),
    Variable(VariableId),
    Function(FunctionId),
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        operator: BinaryOperator,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    IncDec {
        operator: IncDecOperator,
        fixity: Fixity,
        target: Box<Expression>,
    },
    Assign {
        target: Box<Expression>,
        value: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
    },
    Member {
        object: Box<Expression>,
        key: Box<Expression>,
    },
    Cast {
        value: Box<Expression>,
        target: TypeId,
    },
    /// Construct a fresh value of `target`, e.g. a new object or an empty array
    Make {
        target: TypeId,
        arguments: Vec<Expression>,
    },
    Print(Vec<Expression>),
    TypeOf(Box<Expression>),
}

impl ExpressionKind {
    /// Whether the expression denotes a storage location that can be written
    pub fn is_place(&self) -> bool {
        matches!(
            self,
            ExpressionKind::Variable(_)
                | ExpressionKind::Index { .. }
                | ExpressionKind::Member { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiteralValue {
    Bool(bool),
    Byte(u8),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Char(char),
    String(String),
}

impl LiteralValue {
    pub fn primitive(&self) -> PrimitiveKind {
        match self {
            LiteralValue::Bool(_) => PrimitiveKind::Bool,
            LiteralValue::Byte(_) => PrimitiveKind::Byte,
            LiteralValue::Int(_) => PrimitiveKind::Int,
            LiteralValue::UInt(_) => PrimitiveKind::UInt,
            LiteralValue::Long(_) => PrimitiveKind::Long,
            LiteralValue::ULong(_) => PrimitiveKind::ULong,
            LiteralValue::Char(_) => PrimitiveKind::Char,
            LiteralValue::String(_) => PrimitiveKind::String,
        }
    }

    /// The raw payload word handed to `make_<primitive>`, `None` for strings
    pub fn as_raw(&self) -> Option<i64> {
        Some(match self {
            LiteralValue::Bool(v) => *v as i64,
            LiteralValue::Byte(v) => *v as i64,
            LiteralValue::Int(v) => *v as i64,
            LiteralValue::UInt(v) => *v as i64,
            LiteralValue::Long(v) => *v,
            LiteralValue::ULong(v) => *v as i64,
            LiteralValue::Char(v) => *v as i64,
            LiteralValue::String(_) => return None,
        })
    }
}

impl core::fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiteralValue::Bool(v) => write!(f, "{v}"),
            LiteralValue::Byte(v) => write!(f, "{v}b"),
            LiteralValue::Int(v) => write!(f, "{v}"),
            LiteralValue::UInt(v) => write!(f, "{v}u"),
            LiteralValue::Long(v) => write!(f, "{v}l"),
            LiteralValue::ULong(v) => write!(f, "{v}ul"),
            LiteralValue::Char(v) => write!(f, "{v:?}"),
            LiteralValue::String(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Plus,
    Negate,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    ShiftLeft,
    ShiftRight,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncDecOperator {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fixity {
    Prefix,
    Postfix,
}

impl Program {
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id]
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id]
    }

    /// Human readable name of a type, used for diagnostics, mangling and the
    /// runtime `make_object` name
    pub fn type_name(&self, id: TypeId) -> String {
        self.types
            .display(id, &|class| self.classes[class].symbol.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    #[test]
    fn literal_payloads() {
        assert_eq!(LiteralValue::Bool(true).as_raw(), Some(1));
        assert_eq!(LiteralValue::Char('A').as_raw(), Some(65));
        assert_eq!(LiteralValue::Int(-3).as_raw(), Some(-3));
        assert_eq!(LiteralValue::String("hi".into()).as_raw(), None);
        assert_eq!(LiteralValue::ULong(7).primitive(), PrimitiveKind::ULong);
    }

    #[test]
    fn generic_class_type_names() {
        let mut program = Program {
            files: Vec::new(),
            types: TypeTable::new(),
            functions: IndexVec::new(),
            classes: IndexVec::new(),
            entry: None,
        };
        let int = program.types.primitive(PrimitiveKind::Int);
        let boxed = program.types.intern(TypeKind::Class {
            class: ClassId::new(0),
            arguments: vec![int],
        });
        program.classes.push(Class {
            symbol: Symbol {
                name: "Box".into(),
                location: SourceLocation::UNKNOWN,
            },
            ty: boxed,
            parent: None,
            fields: Vec::new(),
            methods: Vec::new(),
        });
        let array = program.types.intern(TypeKind::Array(boxed));

        assert_eq!(program.type_name(array), "Box<int>[]");
    }
}
