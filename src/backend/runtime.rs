//! The binary contract with the dynamic value runtime library. Everything
//! the generated code knows about value layout, operation table layout and
//! helper symbols lives here.

use strum::{EnumCount, EnumIter};

use crate::middle::{hir::PrimitiveKind, mir::OperatorKind};

/// Size of a value record: `{ tag, ops, payload }`
pub const VALUE_SIZE: i64 = 24;
pub const TAG_OFFSET: i64 = 0;
/// Offset of the operation table pointer within a value record
pub const OPS_OFFSET: i64 = 8;
pub const PAYLOAD_OFFSET: i64 = 16;

/// Stack slots are reserved in multiples of this, which keeps the frame
/// aligned for calls without any bookkeeping
pub const SLOT_GRANULE: i64 = 16;
/// Stack bytes reserved for a value stored inline
pub const INLINE_SLOT_SIZE: i64 = align_to(VALUE_SIZE, SLOT_GRANULE);
/// Stack bytes reserved for a slot holding a pointer to a value
pub const POINTER_SLOT_SIZE: i64 = SLOT_GRANULE;

pub const SYS_EXIT: i64 = 60;

pub const fn align_to(value: i64, alignment: i64) -> i64 {
    (value + alignment - 1) / alignment * alignment
}

/// One function pointer slot of the per-type operation table, in table order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
pub enum Operation {
    // unary
    Pos,
    Neg,
    Not,
    BitNot,
    Inc,
    Dec,
    // binary
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    // access
    Index,
    IndexRef,
    Member,
    MemberRef,
    Deref,
    Call,
    Assign,
    Drop,
    Copy,
    Cast,
    Repr,
    TypeName,
}

impl Operation {
    /// Byte offset of this operation's slot within the operation table
    pub fn offset(self) -> i64 {
        self as i64 * 8
    }

    pub fn for_operator(kind: OperatorKind) -> Self {
        match kind {
            OperatorKind::Pos => Operation::Pos,
            OperatorKind::Neg => Operation::Neg,
            OperatorKind::Not => Operation::Not,
            OperatorKind::BitNot => Operation::BitNot,
            OperatorKind::Increment => Operation::Inc,
            OperatorKind::Decrement => Operation::Dec,
            OperatorKind::Or => Operation::Or,
            OperatorKind::And => Operation::And,
            OperatorKind::BitOr => Operation::BitOr,
            OperatorKind::BitXor => Operation::BitXor,
            OperatorKind::BitAnd => Operation::BitAnd,
            OperatorKind::Equal => Operation::Eq,
            OperatorKind::NotEqual => Operation::Ne,
            OperatorKind::Less => Operation::Lt,
            OperatorKind::LessEqual => Operation::Le,
            OperatorKind::ShiftLeft => Operation::Shl,
            OperatorKind::ShiftRight => Operation::Shr,
            OperatorKind::Add => Operation::Add,
            OperatorKind::Subtract => Operation::Sub,
            OperatorKind::Multiply => Operation::Mul,
            OperatorKind::Divide => Operation::Div,
            OperatorKind::Remainder => Operation::Rem,
            OperatorKind::Index => Operation::Index,
            OperatorKind::IndexRef => Operation::IndexRef,
            OperatorKind::Deref => Operation::Deref,
            OperatorKind::Call => Operation::Call,
        }
    }
}

/// Externally defined runtime helpers called directly by symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Helper {
    /// `make_<primitive>(result*, raw)`, strings take `(result*, ptr, len)`
    Make(PrimitiveKind),
    MakeNone,
    /// `make_function(result*, code*)`
    MakeFunction,
    MakeArray,
    /// `make_object(result*, class_name_ptr, class_name_len)`
    MakeObject,
    /// `unwrap_<primitive>(value*)`, the native value comes back in `%rax`
    Unwrap(PrimitiveKind),
    PrintValue,
    FlushOutput,
}

impl Helper {
    pub fn symbol(self) -> String {
        match self {
            Helper::Make(kind) => format!("make_{kind}"),
            Helper::MakeNone => "make_none".to_owned(),
            Helper::MakeFunction => "make_function".to_owned(),
            Helper::MakeArray => "make_array".to_owned(),
            Helper::MakeObject => "make_object".to_owned(),
            Helper::Unwrap(kind) => format!("unwrap_{kind}"),
            Helper::PrintValue => "print_value".to_owned(),
            Helper::FlushOutput => "flush_output".to_owned(),
        }
    }
}
