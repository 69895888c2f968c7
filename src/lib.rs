//! `tagc` compiles resolved HIR of a dynamically tagged language into x86-64
//! assembly. The HIR is lowered into MIR control flow graphs
//! ([`middle::mir`]), simplified ([`middle::optimization`]) and translated
//! by the [`backend`] into GNU assembler source that calls into the tagged
//! value runtime library.

pub mod backend;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod index;
pub mod intern;
pub mod middle;
pub mod source;

pub use driver::{CompileOptions, compile_to_asm, compile_to_mir, emit_mir, read_program};
pub use error::{CompileError, Result};
