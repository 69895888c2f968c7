//! Calls into native code. Tagged arguments are unwrapped into plain
//! integers, passed in registers, and a scalar result is wrapped back into
//! a value.

use crate::{
    backend::{
        assemblers::x86_64::{ARG_REGS, Operand, X86FullRegister},
        isel::{
            Argument, FunctionSelector, SelectError, marshal, release,
            statement::check_argument_count,
        },
        runtime::Helper,
    },
    diagnostics::DiagnosticKind,
    middle::{
        hir::{PrimitiveKind, TypeId},
        mir::{self, SubroutineId, ValueId},
    },
};

/// The native representation of `ty`, if it has one
fn native_kind(program: &mir::Program, ty: TypeId) -> Option<PrimitiveKind> {
    program.types.as_primitive(ty).filter(|kind| kind.is_scalar())
}

impl FunctionSelector<'_, '_> {
    pub(super) fn foreign_call(
        &mut self,
        result: ValueId,
        callee: SubroutineId,
        arguments: &[ValueId],
    ) -> Result<(), SelectError> {
        let program = self.program;
        let subroutine = program
            .subroutines
            .get(callee)
            .ok_or(SelectError::MissingSubroutine(callee))?;
        let name = subroutine.symbol.name;
        let (parameters, return_type) = program
            .types
            .signature(subroutine.ty)
            .ok_or(SelectError::NotCallable(callee))?;

        check_argument_count(name.value(), parameters.len(), arguments.len())?;
        if parameters.len() > ARG_REGS.len() {
            return Err(SelectError::rejected(
                DiagnosticKind::ForeignMisuse,
                format!(
                    "foreign subroutine `{name}` takes {} arguments, at most {} are supported",
                    parameters.len(),
                    ARG_REGS.len()
                ),
            ));
        }

        let kinds = parameters
            .iter()
            .map(|parameter| {
                native_kind(program, *parameter).ok_or_else(|| {
                    SelectError::rejected(
                        DiagnosticKind::UnsupportedForeignType,
                        format!(
                            "`{}` can't be passed to foreign subroutine `{name}`",
                            program.type_name(*parameter)
                        ),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let returns = if program.types.is_void(return_type) {
            None
        } else {
            let kind = native_kind(program, return_type).ok_or_else(|| {
                SelectError::rejected(
                    DiagnosticKind::UnsupportedReturnType,
                    format!(
                        "foreign subroutine `{name}` returns `{}`, which has no native form",
                        program.type_name(return_type)
                    ),
                )
            })?;
            Some(kind)
        };

        let scratch = self.scratch.ok_or(SelectError::MissingScratch)?;
        let values = self.values(arguments)?;
        let result = self.value(result)?;
        let symbol = self.emitter.cx.subroutine_symbol(callee)?;

        // unwrapping calls clobber every argument register, so park the
        // native words until all of them are ready
        let natives = (0..kinds.len())
            .map(|i| scratch + 8 * i as i64)
            .collect::<Vec<_>>();
        for ((value, kind), offset) in values.into_iter().zip(&kinds).zip(&natives) {
            self.emitter.call_helper(Helper::Unwrap(*kind), &[value]);
            self.emitter.asm.movq(
                Operand::reg(X86FullRegister::Rax),
                Operand::frame(*offset),
            );
        }

        let natives = natives.into_iter().map(Argument::Load).collect::<Vec<_>>();
        let call = marshal(&mut self.emitter.asm, &mut self.emitter.frame, &natives);
        self.emitter.asm.zero(X86FullRegister::Rax);
        self.emitter.asm.call(Operand::Symbol(symbol));
        release(&mut self.emitter.asm, &mut self.emitter.frame, call);

        if let Some(kind) = returns {
            self.emitter.asm.movq(
                Operand::reg(X86FullRegister::Rax),
                Operand::frame(scratch),
            );
            self.emitter.drop_value(result.clone());
            self.emitter
                .call_helper(Helper::Make(kind), &[result, Argument::Load(scratch)]);
        }

        Ok(())
    }
}
