//! Class initializers. One is emitted per concrete class type, the first
//! time a `make` of that type is selected. It builds an empty object, gives
//! every field its zero value and binds every method as a function value.

use crate::{
    backend::{
        assemblers::x86_64::{Operand, X86FullRegister},
        isel::{Argument, Emitter, InstructionSelector, SelectError},
        runtime::{Helper, Operation},
    },
    middle::{hir::TypeId, mir},
    source::SourceLocation,
};

impl InstructionSelector<'_> {
    pub(super) fn emit_initializer(&mut self, ty: TypeId, symbol: &str) {
        let program = self.program;
        let what = format!("initializer `{symbol}`");
        let Some(class) = program.class_of_type(ty) else {
            self.report(
                SourceLocation::UNKNOWN,
                &what,
                SelectError::MissingClass(program.type_name(ty)),
            );
            return;
        };

        tracing::debug!(class = %class.symbol.name, %symbol, "emitting initializer");

        let mut emitter = Emitter::new(self);
        match emitter.initializer(class, symbol) {
            Ok(()) => {
                let items = emitter.asm.into_items();
                self.unit.text.items.extend(items);
            }
            Err(error) => self.report(class.symbol.location, &what, error),
        }
    }
}

impl Emitter<'_, '_> {
    /// `init(result*)`, with `result` holding no value yet
    fn initializer(&mut self, class: &mir::Class, symbol: &str) -> Result<(), SelectError> {
        self.asm.label(symbol);
        self.asm.function_prologue();

        let object = -self.frame.reserve(8);
        let member = -self.frame.reserve(8);
        self.asm
            .subq(self.frame.frame_size(), X86FullRegister::Rsp);
        self.asm.movq(
            Operand::reg(X86FullRegister::Rdi),
            Operand::frame(object),
        );

        let name = self.cx.program.type_name(class.ty);
        let [pointer, length] = self.string(&name);
        self.call_helper(Helper::MakeObject, &[Argument::Load(object), pointer, length]);

        for field in &class.fields {
            self.member_pointer(object, member, field.name.value());
            self.default_initialize(Argument::Load(member), field.ty);
        }

        for method in &class.methods {
            let code = self.cx.subroutine_symbol(method.subroutine)?;
            self.member_pointer(object, member, method.name.value());
            self.call_helper(
                Helper::MakeFunction,
                &[Argument::Load(member), Argument::Symbol(code)],
            );
        }

        self.asm.function_epilogue();
        Ok(())
    }

    /// Looks up member `name` of the object pointed to from `object` and
    /// parks the returned `Value*` at `member`
    fn member_pointer(&mut self, object: i64, member: i64, name: &str) {
        let [pointer, length] = self.string(name);
        self.call_operation(
            Operation::MemberRef,
            &[Argument::Load(object), pointer, length],
            0,
        );
        self.asm.movq(
            Operand::reg(X86FullRegister::Rax),
            Operand::frame(member),
        );
    }
}
