//! Serializes an [`AssemblyUnit`] as GNU assembler (AT&T syntax) text.

use std::fmt::Write;

use itertools::Itertools;

use crate::backend::{
    assemblers::x86_64::{Instruction, Operand},
    unit::{AssemblyUnit, Data, Item, Section},
};

pub fn print_unit(unit: &AssemblyUnit) -> String {
    let mut out = String::new();

    for symbol in &unit.externs {
        let _ = writeln!(out, "\t.extern {symbol}");
    }

    for section in unit.sections() {
        if section.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        print_section(&mut out, section);
    }

    out
}

fn print_section(out: &mut String, section: &Section) {
    let _ = writeln!(out, "\t{}", section.directive);

    for item in &section.items {
        match item {
            Item::Label(label) => {
                let _ = writeln!(out, "{label}:");
            }
            Item::Global(symbol) => {
                let _ = writeln!(out, "\t.globl {symbol}");
            }
            Item::Instruction(instruction) => {
                let _ = writeln!(out, "\t{}", format_instruction(instruction));
            }
            Item::Comment(comment) => {
                let _ = writeln!(out, "\t# {comment}");
            }
            Item::Data(data) => {
                let _ = writeln!(out, "\t{}", format_data(data));
            }
        }
    }
}

pub fn format_instruction(instruction: &Instruction) -> String {
    let mut mnemonic = instruction.mnemonic.to_string();
    if let Some(size) = instruction.size {
        mnemonic.push(size.suffix());
    }

    if instruction.operands.is_empty() {
        return mnemonic;
    }

    let operands = instruction
        .operands
        .iter()
        .map(|operand| {
            // indirect control transfer through memory or a register
            if instruction.mnemonic.is_branch() && !operand.is_direct_target() {
                format!("*{}", format_operand(operand))
            } else {
                format_operand(operand)
            }
        })
        .join(", ");

    format!("{mnemonic} {operands}")
}

pub fn format_operand(operand: &Operand) -> String {
    match operand {
        Operand::Register(register) => format!("%{register}"),
        Operand::Immediate(value) => format!("${value}"),
        Operand::Symbol(symbol) => symbol.clone(),
        Operand::Indexed {
            base,
            index,
            scale,
            displacement,
        } => {
            let base = base.map(|b| format!("%{b}")).unwrap_or_default();
            let displacement = if *displacement == 0 {
                String::new()
            } else {
                displacement.to_string()
            };
            format!("{displacement}({base}, %{index}, {scale})")
        }
        Operand::Indirect(register) => format!("(%{register})"),
        Operand::BaseDisplacement(register, 0) => format!("(%{register})"),
        Operand::BaseDisplacement(register, displacement) => {
            format!("{displacement}(%{register})")
        }
        Operand::RipRelative(symbol) => format!("{symbol}(%rip)"),
    }
}

fn format_data(data: &Data) -> String {
    match data {
        Data::Ascii(value) => format!(".ascii \"{}\"", escape(value)),
        Data::Quad(value) => format!(".quad {value}"),
        Data::QuadSymbol(symbol) => format!(".quad {symbol}"),
        Data::Long(value) => format!(".long {value}"),
    }
}

/// Escapes `value` for a GNU assembler string directive. Anything outside
/// printable ASCII is written as octal bytes.
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'"' => escaped.push_str("\\\""),
            b'\\' => escaped.push_str("\\\\"),
            b'\n' => escaped.push_str("\\n"),
            b'\t' => escaped.push_str("\\t"),
            0x20..=0x7e => escaped.push(byte as char),
            _ => {
                let _ = write!(escaped, "\\{byte:03o}");
            }
        }
    }
    escaped
}
