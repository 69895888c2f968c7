//! Resolved HIR is lowered to MIR control flow graphs here, which are then
//! simplified before being handed to the backend.

pub mod hir;
pub mod mir;
pub mod optimization;
