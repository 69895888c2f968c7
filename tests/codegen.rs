use std::collections::BTreeSet;

use pretty_assertions::assert_eq;
use tagc::{
    CompileError, CompileOptions, compile_to_asm,
    diagnostics::{DiagnosticKind, Diagnostics, Stage},
    middle::hir::{self, PrimitiveKind, build::ProgramBuilder},
};

fn options(debug_info: bool) -> CompileOptions {
    CompileOptions {
        ignore_errors: true,
        debug_info,
        optimize: true,
    }
}

fn compile(program: &hir::Program, debug_info: bool) -> (String, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let asm = compile_to_asm(program, &options(debug_info), &mut diagnostics)
        .expect("errors are ignored");
    (asm, diagnostics)
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

/// `main` returning `int`, with `statements` as its body
fn entry_program(
    build: impl FnOnce(&mut ProgramBuilder, hir::FunctionId) -> Vec<hir::Statement>,
) -> hir::Program {
    let mut b = ProgramBuilder::new();
    let int = b.int_ty();
    let main = b.function("main", &[], int);
    let statements = build(&mut b, main);
    let body = b.block(statements);
    b.define(main, body);
    b.set_entry(main);
    b.finish()
}

#[test]
fn start_calls_the_entry_which_exits_the_process() {
    let program = entry_program(|b, _| {
        let code = b.int(3);
        vec![b.return_(Some(code))]
    });

    let (asm, diagnostics) = compile(&program, false);

    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    // `_start` leads the text section
    assert!(asm.contains("\t.text\n\t.globl _start\n_start:\n\tmovq %rsp, %rbp\n"));
    assert!(asm.contains("\tcall make_none\n\tleaq -32(%rbp), %rdi\n\tcall main\n"));
    assert!(asm.contains("\t.globl main\nmain:\n.Lmain.entry:\n"));
    assert!(asm.contains("\tcall flush_output\n"));
    assert!(asm.contains("\tcall unwrap_int\n\tmovq %rax, %rdi\n\tmovq $60, %rax\n\tsyscall\n"));
    assert!(asm.contains("\t.extern flush_output\n"));
}

#[test]
fn no_start_without_an_entry() {
    let mut b = ProgramBuilder::new();
    let void = b.void_ty();
    b.function("helper", &[], void);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    assert!(diagnostics.is_empty());
    assert!(!asm.contains("_start"));
    assert!(asm.contains("\tret\n"));
}

#[test]
fn entry_without_a_body_is_reported() {
    let mut b = ProgramBuilder::new();
    let void = b.void_ty();
    let main = b.declare("main", &[], void);
    b.set_entry(main);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    let kinds = diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>();
    assert_eq!(kinds, vec![DiagnosticKind::MissingEntry]);
    assert!(!asm.contains("_start"));
}

#[test]
fn repeated_strings_share_one_constant() {
    let program = entry_program(|b, _| {
        (0..2)
            .map(|_| {
                let greeting = b.string("hi");
                let print = b.print(vec![greeting]);
                b.expr(print)
            })
            .collect()
    });

    let (asm, _) = compile(&program, false);

    assert_eq!(count(&asm, "\t.ascii \"hi\"\n"), 1);
    assert_eq!(count(&asm, "\tcall print_value\n"), 2);

    let labels = asm
        .lines()
        .filter(|line| line.starts_with(".Lstr"))
        .collect::<Vec<_>>();
    let unique = labels.iter().collect::<BTreeSet<_>>();
    assert_eq!(labels.len(), unique.len());
}

#[test]
fn seventh_argument_goes_on_the_stack() {
    let mut b = ProgramBuilder::new();
    let int = b.int_ty();
    let void = b.void_ty();
    let parameters = ["a", "b", "c", "d", "e", "f"].map(|name| (name, int));
    let six = b.function("six", &parameters, void);
    let main = b.function("main", &[], int);

    let arguments = (1..=6).map(|n| b.int(n)).collect();
    let call = b.call_function(six, arguments);
    let body = b.block(vec![b.expr(call)]);
    b.define(main, body);
    b.set_entry(main);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    // the return slot takes %rdi, so only the last parameter is pushed
    assert_eq!(count(&asm, "\tpushq %rax\n"), 1);
    assert!(asm.contains("\tsubq $8, %rsp\n"));
    assert!(asm.contains("\tcall six\n\taddq $16, %rsp\n"));
    // and the callee copies it from above its return address
    assert!(asm.contains("\tmovq 16(%rbp), %rsi\n"));
}

#[test]
fn foreign_calls_unwrap_and_rewrap_scalars() {
    let mut b = ProgramBuilder::new();
    let int = b.int_ty();
    let string = b.string_ty();
    let abs = b.import("abs", "libc", &[int], int);
    let puts = b.import("puts", "libc", &[string], int);

    let main = b.function("main", &[], int);
    let negative = b.int(-4);
    let call_abs = b.call_function(abs, vec![negative]);
    let text = b.string("x");
    let call_puts = b.call_function(puts, vec![text]);
    let body = b.block(vec![b.expr(call_abs), b.expr(call_puts)]);
    b.define(main, body);
    b.set_entry(main);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    let reported = diagnostics
        .iter()
        .map(|d| (d.stage, d.kind))
        .collect::<Vec<_>>();
    assert_eq!(
        reported,
        vec![(Stage::Codegen, DiagnosticKind::UnsupportedForeignType)]
    );

    assert!(asm.contains("\t.extern abs\n"));
    assert!(asm.contains("\tcall unwrap_int\n"));
    assert!(asm.contains("\txorl %eax, %eax\n\tcall abs\n"));
    assert!(asm.contains("\tcall make_int\n"));
    assert!(!asm.contains("\tcall puts\n"));
    assert!(!asm.contains(".extern puts"));
}

#[test]
fn rejected_statements_halt_codegen() {
    let mut b = ProgramBuilder::new();
    let void = b.void_ty();
    let int = b.int_ty();
    let callback = b.import("callback", "libc", &[], void);
    let dynamic = b.dynamic_ty();
    let main = b.function("main", &[], int);
    let f = b.local(main, "f", dynamic);
    let target = b.variable(main, f);
    let reference = b.function_ref(callback);
    let assign = b.assign(target, reference);
    let body = b.block(vec![b.expr(assign)]);
    b.define(main, body);
    b.set_entry(main);
    let program = b.finish();

    let mut diagnostics = Diagnostics::new();
    let error = compile_to_asm(&program, &CompileOptions::default(), &mut diagnostics)
        .expect_err("codegen should halt");

    let CompileError::Halted { stage, diagnostics } = error else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(stage, Stage::Codegen);
    let kinds = diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>();
    assert_eq!(kinds, vec![DiagnosticKind::ForeignSubroutineAssignment]);
}

#[test]
fn classes_get_one_lazily_emitted_initializer() {
    let mut b = ProgramBuilder::new();
    let int = b.int_ty();
    let void = b.void_ty();
    let point = b.class("Point", None, &[("x", int)]);
    let ty = b.class_ty(point);
    b.method(point, "get", &[], void);

    let main = b.function("main", &[], int);
    let p = b.local(main, "p", ty);
    let statements = (0..2)
        .map(|_| {
            let target = b.variable(main, p);
            let made = b.make(ty, Vec::new());
            let assign = b.assign(target, made);
            b.expr(assign)
        })
        .collect();
    let body = b.block(statements);
    b.define(main, body);
    b.set_entry(main);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    assert_eq!(count(&asm, "\nPoint.init:\n"), 1);
    assert_eq!(count(&asm, "\tcall Point.init\n"), 2);
    assert!(asm.contains("\tcall make_object\n"));
    assert!(asm.contains("\t.ascii \"Point\"\n"));
    assert!(asm.contains("\t.ascii \"x\"\n"));

    // the method is emitted because the initializer binds it
    assert_eq!(count(&asm, "\nPoint.get:\n"), 1);
    assert!(asm.contains("\tleaq Point.get(%rip), %rsi\n\tcall make_function\n"));
}

#[test]
fn a_method_named_init_keeps_its_own_symbol() {
    let mut b = ProgramBuilder::new();
    let int = b.int_ty();
    let void = b.void_ty();
    let point = b.class("Point", None, &[("x", int)]);
    let ty = b.class_ty(point);
    b.method(point, "init", &[], void);

    let main = b.function("main", &[], void);
    let p = b.local(main, "p", ty);
    let target = b.variable(main, p);
    let made = b.make(ty, Vec::new());
    let assign = b.assign(target, made);
    let body = b.block(vec![b.expr(assign)]);
    b.define(main, body);
    b.set_entry(main);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    assert_eq!(count(&asm, "\nPoint.init:\n"), 1);
    assert_eq!(count(&asm, "\nPoint.init.1:\n"), 1);
    assert_eq!(count(&asm, "\tcall Point.init.1\n"), 1);
    assert!(asm.contains("\tleaq Point.init(%rip), %rsi\n\tcall make_function\n"));
}

#[test]
fn malformed_statements_skip_only_themselves() {
    let mut b = ProgramBuilder::new();
    let int = b.int_ty();
    let void = b.void_ty();
    let dynamic = b.dynamic_ty();
    let point = b.class("Point", None, &[]);
    let point = b.class_ty(point);
    let two = b.function("two", &[("a", int), ("b", int)], void);

    let main = b.function("main", &[], void);
    let one = b.int(1);
    let cast = b.cast(one, point);
    let one = b.int(1);
    let call = b.call_function(two, vec![one]);
    let make = b.make(dynamic, Vec::new());
    let after = b.string("after");
    let print = b.print(vec![after]);
    let body = b.block(vec![b.expr(cast), b.expr(call), b.expr(make), b.expr(print)]);
    b.define(main, body);
    b.set_entry(main);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    let reported = diagnostics
        .iter()
        .map(|d| (d.stage, d.kind))
        .collect::<Vec<_>>();
    assert_eq!(
        reported,
        vec![
            (Stage::Codegen, DiagnosticKind::UnimplementedCast),
            (Stage::Codegen, DiagnosticKind::MissingArgument),
            (Stage::Codegen, DiagnosticKind::UnsupportedMakeTarget),
        ]
    );

    // the rest of `main` is still there
    assert!(asm.contains("\nmain:\n"));
    assert!(asm.contains("_start:"));
    assert_eq!(count(&asm, "\tcall print_value\n"), 1);
    assert!(asm.contains("\t.ascii \"after\"\n"));
    assert!(!asm.contains("\tcall two\n"));
}

#[test]
fn foreign_calls_are_limited_to_register_arguments() {
    let mut b = ProgramBuilder::new();
    let int = b.int_ty();
    let void = b.void_ty();
    let wide = b.import("wide", "libc", &[int; 7], void);

    let main = b.function("main", &[], void);
    let arguments = (1..=7).map(|n| b.int(n)).collect();
    let call = b.call_function(wide, arguments);
    let body = b.block(vec![b.expr(call)]);
    b.define(main, body);
    b.set_entry(main);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    let kinds = diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>();
    assert_eq!(kinds, vec![DiagnosticKind::ForeignMisuse]);
    assert!(!asm.contains("\tcall wide\n"));
    assert!(!asm.contains(".extern wide"));
}

#[test]
fn entry_must_return_an_exit_code() {
    let mut b = ProgramBuilder::new();
    let string = b.string_ty();
    let main = b.function("main", &[], string);
    b.set_entry(main);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    let kinds = diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>();
    assert_eq!(kinds, vec![DiagnosticKind::UnsupportedReturnType]);
    assert!(!asm.contains("_start"));
    assert!(!asm.contains("main:"));
}

#[test]
fn builtins_dispatch_through_the_operation_table() {
    let mut b = ProgramBuilder::new();
    let int = b.int_ty();
    let void = b.void_ty();
    let dynamic = b.dynamic_ty();
    let list = b.array_ty(int);

    let main = b.function("main", &[], void);
    let d = b.local(main, "d", dynamic);
    let yes = b.boolean(true);
    let cast = b.cast(yes, int);
    let value = b.variable(main, d);
    let type_of = b.type_of(value);
    let make = b.make(list, Vec::new());
    let body = b.block(vec![b.expr(cast), b.expr(type_of), b.expr(make)]);
    b.define(main, body);
    b.set_entry(main);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    // cast(result*, value*, tag) out of the value's table
    let cast = format!(
        "\tmovq ${}, %rdx\n\tmovq 8(%rsi), %r11\n\tcall *248(%r11)\n",
        PrimitiveKind::Int.tag()
    );
    assert!(asm.contains(&cast));
    // type_name(result*, value*)
    assert!(asm.contains("\tmovq 8(%rsi), %r11\n\tcall *264(%r11)\n"));
    // once for the temporary's zero value, once for the make
    assert_eq!(count(&asm, "\tcall make_array\n"), 2);
}

#[test]
fn parameters_are_copied_in_and_dropped_in_order() {
    let mut b = ProgramBuilder::new();
    let int = b.int_ty();
    let void = b.void_ty();
    let pair = b.function("pair", &[("a", int), ("b", int)], void);
    b.local(pair, "c", int);
    let program = b.finish();

    let (asm, diagnostics) = compile(&program, false);

    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    // incoming pointers at -32 and -48, owned copies at -80 and -112
    assert!(asm.contains(concat!(
        ".Lpair.copy:\n",
        "\tleaq -80(%rbp), %rdi\n",
        "\tmovq -32(%rbp), %rsi\n",
        "\tmovq 8(%rsi), %r11\n",
        "\tcall *240(%r11)\n",
        "\tleaq -112(%rbp), %rdi\n",
        "\tmovq -48(%rbp), %rsi\n",
        "\tmovq 8(%rsi), %r11\n",
        "\tcall *240(%r11)\n",
        ".Lpair.init:\n",
    )));
    // parameters, then the local
    assert!(asm.contains(concat!(
        ".Lpair.deinit:\n",
        "\tleaq -80(%rbp), %rdi\n",
        "\tmovq 8(%rdi), %r11\n",
        "\tcall *232(%r11)\n",
        "\tleaq -112(%rbp), %rdi\n",
        "\tmovq 8(%rdi), %r11\n",
        "\tcall *232(%r11)\n",
        "\tleaq -144(%rbp), %rdi\n",
        "\tmovq 8(%rdi), %r11\n",
        "\tcall *232(%r11)\n",
        ".Lpair.epilogue:\n",
    )));
}

#[test]
fn debug_tables_only_with_debug_info() {
    let program = entry_program(|b, _| {
        let code = b.at(4).int(0);
        vec![b.return_(Some(code))]
    });

    let (plain, _) = compile(&program, false);
    assert!(!plain.contains(".tagc_"));
    assert!(!plain.contains(".Lmain.line"));

    let (debug, diagnostics) = compile(&program, true);
    assert!(diagnostics.is_empty(), "{diagnostics:?}");
    assert!(debug.contains("\t.section .tagc_line,\"\",@progbits\n\t.quad .Lmain.line0\n"));
    assert!(debug.contains("\n.Lmain.line0:\n"));
    assert!(debug.contains(
        "\t.section .tagc_info,\"\",@progbits\n\t.quad .Lmain.entry\n\t.quad .Lmain.exit\n"
    ));
    assert!(debug.contains("\t.section .tagc_str,\"\",@progbits\n"));
    assert!(debug.contains("\t.ascii \"main\"\n"));
}
