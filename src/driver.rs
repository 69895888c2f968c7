//! The compilation pipeline from HIR to assembly text. Each stage reports
//! into a shared [`Diagnostics`] list and the pipeline stops after the first
//! stage that produced errors, unless told to carry on regardless.

use std::path::Path;

use crate::{
    backend::{
        CodegenOptions,
        targets::{CodeGenerator, Target},
    },
    diagnostics::{Diagnostics, Stage},
    error::{CompileError, Result},
    middle::{
        hir,
        mir::{self, hir_lowering::lower_to_mir, pretty_print::pretty_print_program},
        optimization::optimize_program,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Keep going after a stage reported errors
    pub ignore_errors: bool,
    pub debug_info: bool,
    /// Run the block merge pass
    pub optimize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            ignore_errors: false,
            debug_info: false,
            optimize: true,
        }
    }
}

impl CompileOptions {
    fn codegen(&self) -> CodegenOptions {
        CodegenOptions {
            debug_info: self.debug_info,
        }
    }
}

/// Reads a JSON encoded HIR program
pub fn read_program(path: &Path) -> Result<hir::Program> {
    let text = std::fs::read_to_string(path).map_err(|source| CompileError::Read {
        path: path.to_owned(),
        source,
    })?;

    let program = serde_json::from_str(&text)?;
    Ok(program)
}

/// Lowers `program` to MIR and optionally simplifies it
pub fn compile_to_mir(
    program: &hir::Program,
    options: &CompileOptions,
    diagnostics: &mut Diagnostics,
) -> Result<mir::Program> {
    tracing::debug!(functions = program.functions.len(), "lowering to MIR");
    let mut mir = lower_to_mir(program, diagnostics);
    checkpoint(Stage::Lowering, options, diagnostics)?;

    if options.optimize {
        tracing::debug!("optimizing MIR");
        optimize_program(&mut mir);
        verify_program(&mir);
        checkpoint(Stage::Optimization, options, diagnostics)?;
    }

    Ok(mir)
}

/// Compiles `program` all the way to assembler source
pub fn compile_to_asm(
    program: &hir::Program,
    options: &CompileOptions,
    diagnostics: &mut Diagnostics,
) -> Result<String> {
    let mir = compile_to_mir(program, options, diagnostics)?;

    tracing::debug!(subroutines = mir.subroutines.len(), "generating code");
    let generator = Target::x86_64LinuxGnu.get_code_generator();
    let asm = generator.translate_to_asm(&mir, &options.codegen(), diagnostics);
    checkpoint(Stage::Codegen, options, diagnostics)?;

    Ok(asm)
}

/// Renders the MIR of `program` in its textual form
pub fn emit_mir(
    program: &hir::Program,
    options: &CompileOptions,
    diagnostics: &mut Diagnostics,
) -> Result<String> {
    let mir = compile_to_mir(program, options, diagnostics)?;
    Ok(pretty_print_program(&mir))
}

/// Halts with everything reported so far if `stage` left errors behind
fn checkpoint(stage: Stage, options: &CompileOptions, diagnostics: &mut Diagnostics) -> Result<()> {
    if !diagnostics.has_errors() {
        return Ok(());
    }

    if options.ignore_errors {
        tracing::warn!(
            %stage,
            errors = diagnostics.error_count(),
            "continuing despite errors"
        );
        return Ok(());
    }

    Err(CompileError::Halted {
        stage,
        diagnostics: std::mem::take(diagnostics).into_vec(),
    })
}

fn verify_program(program: &mir::Program) {
    if !cfg!(feature = "verify-mir") {
        return;
    }

    for subroutine in program.subroutines.iter() {
        if let Some(body) = subroutine.body() {
            if let Err(error) = mir::verify(body) {
                tracing::error!(
                    subroutine = %subroutine.symbol.name,
                    "malformed MIR after optimization: {error}"
                );
            }
        }
    }
}
