//! Graph simplifications run on MIR before codegen. Lowering produces lots
//! of empty and single-entry blocks; folding them keeps the emitted assembly
//! free of jump chains.

use crate::middle::mir;

pub mod block_merge;

/// Runs every pass on every defined subroutine of `program`
pub fn optimize_program(program: &mut mir::Program) {
    for subroutine in program.subroutines.iter_mut() {
        let name = subroutine.symbol.name;
        let Some(body) = subroutine.body_mut() else {
            continue;
        };

        let before = body.blocks.len();
        let removed = block_merge::merge_blocks(body);

        tracing::debug!(
            subroutine = %name,
            before,
            after = body.blocks.len(),
            removed,
            "merged blocks"
        );
    }
}
