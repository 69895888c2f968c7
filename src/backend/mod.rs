//! The backend turns optimized MIR into GNU assembler source for x86-64.
//!
//! Nothing here allocates registers. Every MIR value owns a stack slot
//! holding a tagged runtime value, and every operation on values is an
//! indirect call into the runtime library, so code generation boils down to:
//! 1. Naming everything that ends up in the object file ([`context`]).
//! 2. Selecting instructions per subroutine into an [`unit::AssemblyUnit`]
//!    ([`isel`]), optionally with [`debug`] tables alongside.
//! 3. Printing the unit as AT&T syntax ([`printer`]).

pub mod assemblers;
pub mod context;
pub mod debug;
pub mod isel;
pub mod printer;
pub mod runtime;
pub mod targets;
pub mod unit;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Emits the line and variable tables and a source comment per statement
    pub debug_info: bool,
}
