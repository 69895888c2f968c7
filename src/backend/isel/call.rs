//! System V argument passing. The first six arguments travel in registers,
//! the rest are pushed right to left, and `%rsp` is padded so it sits on a
//! 16 byte boundary at the `call`.

use crate::backend::{
    assemblers::x86_64::{ARG_REGS, Assembler, Operand, X86FullRegister},
    context::{FrameContext, Slot},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// Pointer to a value. Inline slots pass their address, by reference
    /// slots pass the pointer they hold.
    Value(Slot),
    /// The 8 bytes stored at this frame offset
    Load(i64),
    Immediate(i64),
    /// Address of a label
    Symbol(String),
}

impl Argument {
    pub fn load_into(&self, asm: &mut Assembler, register: X86FullRegister) {
        match self {
            Argument::Value(Slot {
                offset,
                by_reference: false,
            }) => asm.leaq(Operand::frame(*offset), register),
            Argument::Value(Slot {
                offset,
                by_reference: true,
            })
            | Argument::Load(offset) => asm.movq(Operand::frame(*offset), Operand::reg(register)),
            Argument::Immediate(value) => {
                asm.movq(Operand::Immediate(*value), Operand::reg(register))
            }
            Argument::Symbol(symbol) => asm.leaq(Operand::rip(symbol.as_str()), register),
        }
    }
}

/// Stack bytes a marshalled call occupies until [`release`] gives them back
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub padding: i64,
    pub pushed: i64,
}

/// Moves `arguments` into place for a call
pub fn marshal(asm: &mut Assembler, frame: &mut FrameContext, arguments: &[Argument]) -> CallFrame {
    let (in_registers, on_stack) = arguments.split_at(arguments.len().min(ARG_REGS.len()));

    let pushed = 8 * on_stack.len() as i64;
    let padding = (16 - (frame.frame_size() + pushed) % 16) % 16;
    if padding > 0 {
        asm.subq(padding, X86FullRegister::Rsp);
        frame.grow(padding);
    }

    for argument in on_stack.iter().rev() {
        argument.load_into(asm, X86FullRegister::Rax);
        asm.pushq(Operand::reg(X86FullRegister::Rax));
        frame.grow(8);
    }

    for (argument, register) in in_registers.iter().zip(ARG_REGS) {
        argument.load_into(asm, *register);
    }

    CallFrame { padding, pushed }
}

/// Pops the stack arguments and padding of a finished call
pub fn release(asm: &mut Assembler, frame: &mut FrameContext, call: CallFrame) {
    let total = call.padding + call.pushed;
    if total > 0 {
        asm.addq(total, X86FullRegister::Rsp);
        frame.shrink(total);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::backend::{
        assemblers::x86_64::{Instruction, Mnemonic, Size},
        runtime::INLINE_SLOT_SIZE,
    };

    fn inline(offset: i64) -> Argument {
        Argument::Value(Slot {
            offset,
            by_reference: false,
        })
    }

    fn pushes(asm: &Assembler) -> usize {
        asm.instructions()
            .filter(|i| i.mnemonic == Mnemonic::Push)
            .count()
    }

    fn loads_into(asm: &Assembler, register: X86FullRegister) -> Vec<Operand> {
        asm.instructions()
            .filter(|i| i.mnemonic != Mnemonic::Push)
            .filter(|i| i.operands.last() == Some(&Operand::reg(register)))
            .map(|i| i.operands[0].clone())
            .collect()
    }

    #[test]
    fn eight_arguments_push_two_in_reverse() {
        let mut asm = Assembler::new();
        let mut frame = FrameContext::new();
        frame.reserve(3 * INLINE_SLOT_SIZE);
        let arguments = (1..=8).map(|i| inline(-32 * i)).collect::<Vec<_>>();

        let call = marshal(&mut asm, &mut frame, &arguments);

        assert_eq!(pushes(&asm), 2);
        assert_eq!(call, CallFrame { padding: 0, pushed: 16 });
        assert_eq!(frame.frame_size() % 16, 0);

        // argument 8 is loaded and pushed before argument 7
        assert_eq!(
            loads_into(&asm, X86FullRegister::Rax),
            vec![Operand::frame(-256), Operand::frame(-224)]
        );
        for (i, register) in ARG_REGS.iter().enumerate() {
            assert_eq!(
                loads_into(&asm, *register),
                vec![Operand::frame(-32 * (i as i64 + 1))]
            );
        }
    }

    #[test]
    fn seven_arguments_pad_and_restore_the_frame() {
        let mut asm = Assembler::new();
        let mut frame = FrameContext::new();
        frame.reserve(INLINE_SLOT_SIZE);
        let before = frame.frame_size();
        let arguments = (0..7).map(Argument::Immediate).collect::<Vec<_>>();

        let call = marshal(&mut asm, &mut frame, &arguments);
        assert_eq!(pushes(&asm), 1);
        assert_eq!(call, CallFrame { padding: 8, pushed: 8 });
        assert_eq!(frame.frame_size() % 16, 0);
        assert_eq!(
            asm.instructions().next(),
            Some(&Instruction {
                mnemonic: Mnemonic::Sub,
                size: Some(Size::Quad),
                operands: vec![Operand::Immediate(8), Operand::reg(X86FullRegister::Rsp)],
            })
        );

        release(&mut asm, &mut frame, call);
        assert_eq!(frame.frame_size(), before);
        assert_eq!(
            asm.instructions().last(),
            Some(&Instruction {
                mnemonic: Mnemonic::Add,
                size: Some(Size::Quad),
                operands: vec![Operand::Immediate(16), Operand::reg(X86FullRegister::Rsp)],
            })
        );
    }

    #[test]
    fn register_only_calls_touch_nothing_else() {
        let mut asm = Assembler::new();
        let mut frame = FrameContext::new();

        let by_reference = Argument::Value(Slot {
            offset: -16,
            by_reference: true,
        });
        let call = marshal(
            &mut asm,
            &mut frame,
            &[by_reference, Argument::Symbol(".Lstr0".into())],
        );
        release(&mut asm, &mut frame, call);

        let mnemonics = asm.instructions().map(|i| i.mnemonic).collect::<Vec<_>>();
        assert_eq!(mnemonics, vec![Mnemonic::Mov, Mnemonic::Lea]);
        assert_eq!(frame.frame_size(), 0);
    }
}
