//! In-memory x86-64 assembly: registers, operands with every addressing mode
//! the backend uses, instructions, and an [`Assembler`] that appends them to
//! a section while tracking nothing but the output itself.

use strum::Display;

use crate::backend::unit::Item;

/// General Purpose Register 64-bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum X86FullRegister {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
}

/// System V integer argument registers, in order
pub const ARG_REGS: &[X86FullRegister] = &[
    X86FullRegister::Rdi,
    X86FullRegister::Rsi,
    X86FullRegister::Rdx,
    X86FullRegister::Rcx,
    X86FullRegister::R8,
    X86FullRegister::R9,
];

impl X86FullRegister {
    pub fn as_64_bit(self) -> X86Register {
        match self {
            Self::Rax => X86Register::Rax,
            Self::Rbx => X86Register::Rbx,
            Self::Rcx => X86Register::Rcx,
            Self::Rdx => X86Register::Rdx,
            Self::Rsi => X86Register::Rsi,
            Self::Rdi => X86Register::Rdi,
            Self::Rbp => X86Register::Rbp,
            Self::Rsp => X86Register::Rsp,
            Self::R8 => X86Register::R8,
            Self::R9 => X86Register::R9,
            Self::R10 => X86Register::R10,
            Self::R11 => X86Register::R11,
        }
    }

    pub fn as_32_bit(self) -> X86Register {
        match self {
            Self::Rax => X86Register::Eax,
            Self::Rbx => X86Register::Ebx,
            Self::Rcx => X86Register::Ecx,
            Self::Rdx => X86Register::Edx,
            Self::Rsi => X86Register::Esi,
            Self::Rdi => X86Register::Edi,
            Self::Rbp => X86Register::Ebp,
            Self::Rsp => X86Register::Esp,
            Self::R8 => X86Register::R8d,
            Self::R9 => X86Register::R9d,
            Self::R10 => X86Register::R10d,
            Self::R11 => X86Register::R11d,
        }
    }

    pub fn as_8_bit(self) -> X86Register {
        match self {
            Self::Rax => X86Register::Al,
            Self::Rbx => X86Register::Bl,
            Self::Rcx => X86Register::Cl,
            Self::Rdx => X86Register::Dl,
            Self::Rsi => X86Register::Sil,
            Self::Rdi => X86Register::Dil,
            Self::Rbp => X86Register::Bpl,
            Self::Rsp => X86Register::Spl,
            Self::R8 => X86Register::R8b,
            Self::R9 => X86Register::R9b,
            Self::R10 => X86Register::R10b,
            Self::R11 => X86Register::R11b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
#[rustfmt::skip]
pub enum X86Register {
    // 64-bit
    Rax, Rbx, Rcx, Rdx,
    Rsi, Rdi, Rbp, Rsp,
    R8, R9, R10, R11,

    // 32-bit
    Eax, Ebx, Ecx, Edx,
    Esi, Edi, Ebp, Esp,
    R8d, R9d, R10d, R11d,

    // 8-bit low
    Al, Bl, Cl, Dl,
    Sil, Dil, Bpl, Spl,
    R8b, R9b, R10b, R11b,
}

/// Operand size, printed as the mnemonic suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Byte,
    Word,
    Long,
    Quad,
}

impl Size {
    pub fn suffix(self) -> char {
        match self {
            Size::Byte => 'b',
            Size::Word => 'w',
            Size::Long => 'l',
            Size::Quad => 'q',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// `%rax`
    Register(X86Register),
    /// `$42`
    Immediate(i64),
    /// `label`, only meaningful as a call or jump target
    Symbol(String),
    /// `displacement(base, index, scale)`
    Indexed {
        base: Option<X86FullRegister>,
        index: X86FullRegister,
        scale: u8,
        displacement: i64,
    },
    /// `(%rax)`
    Indirect(X86FullRegister),
    /// `-16(%rbp)`
    BaseDisplacement(X86FullRegister, i64),
    /// `label(%rip)`
    RipRelative(String),
}

impl Operand {
    pub fn reg(register: X86FullRegister) -> Self {
        Operand::Register(register.as_64_bit())
    }

    pub fn frame(offset: i64) -> Self {
        Operand::BaseDisplacement(X86FullRegister::Rbp, offset)
    }

    pub fn rip(symbol: impl Into<String>) -> Self {
        Operand::RipRelative(symbol.into())
    }

    /// Whether the operand names a code location directly, as opposed to
    /// holding its address somewhere
    pub fn is_direct_target(&self) -> bool {
        matches!(self, Operand::Symbol(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Mnemonic {
    Mov,
    Lea,
    Push,
    Pop,
    Add,
    Sub,
    Xor,
    Test,
    Cmp,
    Call,
    Jmp,
    Jne,
    Je,
    Ret,
    Syscall,
}

impl Mnemonic {
    /// Control transfers take an indirection marker on non symbol targets
    pub fn is_branch(self) -> bool {
        matches!(self, Mnemonic::Call | Mnemonic::Jmp | Mnemonic::Jne | Mnemonic::Je)
    }
}

/// One instruction, operands in source then destination order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub size: Option<Size>,
    pub operands: Vec<Operand>,
}

pub struct Assembler {
    items: Vec<Item>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.items.iter().filter_map(|item| match item {
            Item::Instruction(instruction) => Some(instruction),
            _ => None,
        })
    }

    pub fn emit(&mut self, mnemonic: Mnemonic, size: Option<Size>, operands: Vec<Operand>) {
        self.items.push(Item::Instruction(Instruction {
            mnemonic,
            size,
            operands,
        }));
    }

    pub fn global_label(&mut self, name: &str) {
        self.items.push(Item::Global(name.to_owned()));
        self.label(name);
    }

    pub fn label(&mut self, name: impl Into<String>) {
        self.items.push(Item::Label(name.into()));
    }

    pub fn comment(&mut self, comment: impl Into<String>) {
        self.items.push(Item::Comment(comment.into()));
    }

    pub fn movq(&mut self, source: Operand, destination: Operand) {
        self.emit(Mnemonic::Mov, Some(Size::Quad), vec![source, destination]);
    }

    pub fn leaq(&mut self, source: Operand, destination: X86FullRegister) {
        self.emit(
            Mnemonic::Lea,
            Some(Size::Quad),
            vec![source, Operand::reg(destination)],
        );
    }

    pub fn pushq(&mut self, operand: Operand) {
        self.emit(Mnemonic::Push, Some(Size::Quad), vec![operand]);
    }

    pub fn popq(&mut self, register: X86FullRegister) {
        self.emit(Mnemonic::Pop, Some(Size::Quad), vec![Operand::reg(register)]);
    }

    pub fn addq(&mut self, amount: i64, register: X86FullRegister) {
        self.emit(
            Mnemonic::Add,
            Some(Size::Quad),
            vec![Operand::Immediate(amount), Operand::reg(register)],
        );
    }

    pub fn subq(&mut self, amount: i64, register: X86FullRegister) {
        self.emit(
            Mnemonic::Sub,
            Some(Size::Quad),
            vec![Operand::Immediate(amount), Operand::reg(register)],
        );
    }

    /// Zeroes a register through its 32-bit half
    pub fn zero(&mut self, register: X86FullRegister) {
        let register = Operand::Register(register.as_32_bit());
        self.emit(Mnemonic::Xor, Some(Size::Long), vec![register.clone(), register]);
    }

    pub fn call(&mut self, target: Operand) {
        self.emit(Mnemonic::Call, None, vec![target]);
    }

    pub fn jmp(&mut self, label: impl Into<String>) {
        self.emit(Mnemonic::Jmp, None, vec![Operand::Symbol(label.into())]);
    }

    /// Branches on the low byte of `register` being non zero
    pub fn branch_if_set(&mut self, register: X86FullRegister, positive: &str, negative: &str) {
        let low = Operand::Register(register.as_8_bit());
        self.emit(Mnemonic::Test, Some(Size::Byte), vec![low.clone(), low]);
        self.emit(Mnemonic::Jne, None, vec![Operand::Symbol(positive.to_owned())]);
        self.jmp(negative);
    }

    pub fn function_prologue(&mut self) {
        self.pushq(Operand::reg(X86FullRegister::Rbp));
        self.movq(
            Operand::reg(X86FullRegister::Rsp),
            Operand::reg(X86FullRegister::Rbp),
        );
    }

    pub fn function_epilogue(&mut self) {
        self.movq(
            Operand::reg(X86FullRegister::Rbp),
            Operand::reg(X86FullRegister::Rsp),
        );
        self.popq(X86FullRegister::Rbp);
        self.emit(Mnemonic::Ret, None, Vec::new());
    }

    /// Terminates the process with the exit code in `%rdi`
    pub fn exit_syscall(&mut self) {
        self.movq(
            Operand::Immediate(crate::backend::runtime::SYS_EXIT),
            Operand::reg(X86FullRegister::Rax),
        );
        self.emit(Mnemonic::Syscall, None, Vec::new());
    }
}
