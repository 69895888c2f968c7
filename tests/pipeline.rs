use pretty_assertions::assert_eq;
use tagc::{
    CompileOptions, compile_to_asm, compile_to_mir, emit_mir,
    diagnostics::{DiagnosticKind, Diagnostics},
    index::Index,
    middle::{
        hir::{self, build::ProgramBuilder},
        mir::{self, BuiltinKind, StatementKind, SubroutineId, Terminator},
        optimization::block_merge::merge_blocks,
    },
    read_program,
};

fn body(program: &mir::Program, function: hir::FunctionId) -> &mir::Body {
    program.subroutines[SubroutineId::new(function.index())]
        .body()
        .expect("defined function")
}

/// `f(a: bool, c: bool)` with `statement` built as its body
fn with_conditions(
    build: impl FnOnce(&mut ProgramBuilder, hir::FunctionId) -> hir::Statement,
) -> (hir::Program, hir::FunctionId) {
    let mut b = ProgramBuilder::new();
    let boolean = b.bool_ty();
    let void = b.void_ty();
    let f = b.function("f", &[("a", boolean), ("c", boolean)], void);
    let statement = build(&mut b, f);
    b.define(f, statement);
    (b.finish(), f)
}

#[test]
fn empty_then_branch_is_merged_away() {
    let (program, f) = with_conditions(|b, f| {
        let a = b.parameter(f, 0);
        let condition = b.variable(f, a);
        let then = b.block(Vec::new());
        let branch = b.if_(condition, then, None);
        b.block(vec![branch])
    });

    let mut diagnostics = Diagnostics::new();
    let unoptimized = compile_to_mir(
        &program,
        &CompileOptions {
            optimize: false,
            ..CompileOptions::default()
        },
        &mut diagnostics,
    )
    .expect("lowers cleanly");
    let optimized = compile_to_mir(&program, &CompileOptions::default(), &mut diagnostics)
        .expect("lowers cleanly");

    let before = body(&unoptimized, f).blocks.len();
    let body = body(&optimized, f);
    assert!(body.blocks.len() < before);
    assert_eq!(body.blocks.len(), 2);
    let Terminator::Conditional {
        positive, negative, ..
    } = body.blocks[body.entry].terminator
    else {
        panic!("entry should branch on `a`");
    };
    assert_eq!(positive, negative);
    assert_eq!(positive, body.sink);
}

#[test]
fn optimized_bodies_stay_well_formed_and_settled() {
    let (program, _) = with_conditions(|b, f| {
        let (a, c) = (b.parameter(f, 0), b.parameter(f, 1));
        let loop_condition = b.variable(f, a);
        let break_condition = b.variable(f, c);
        let stop = b.break_();
        let branch = b.if_(break_condition, stop, None);
        let greeting = b.string("again");
        let print = b.print(vec![greeting]);
        let print = b.expr(print);
        let body = b.block(vec![branch, print]);
        let repeat = b.while_(loop_condition, body);
        b.block(vec![repeat])
    });

    let mut diagnostics = Diagnostics::new();
    let mut optimized = compile_to_mir(&program, &CompileOptions::default(), &mut diagnostics)
        .expect("lowers cleanly");
    assert!(diagnostics.is_empty());

    for subroutine in optimized.subroutines.iter_mut() {
        let Some(body) = subroutine.body_mut() else {
            continue;
        };
        assert_eq!(mir::verify(body), Ok(()));
        assert_eq!(merge_blocks(body), 0, "a second merge changes nothing");
    }
}

#[test]
fn stray_break_is_reported_and_lowering_continues() {
    let (program, f) = with_conditions(|b, _| {
        let stray = b.break_();
        let greeting = b.string("still here");
        let print = b.print(vec![greeting]);
        let print = b.expr(print);
        b.block(vec![stray, print])
    });

    let mut diagnostics = Diagnostics::new();
    let options = CompileOptions {
        ignore_errors: true,
        ..CompileOptions::default()
    };
    let optimized =
        compile_to_mir(&program, &options, &mut diagnostics).expect("errors are ignored");

    let kinds = diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>();
    assert_eq!(kinds, vec![DiagnosticKind::UnexpectedBreak]);

    let prints = body(&optimized, f)
        .blocks
        .iter()
        .flat_map(|block| &block.statements)
        .filter(|statement| {
            matches!(
                statement.kind,
                StatementKind::Builtin {
                    kind: BuiltinKind::Print,
                    ..
                }
            )
        })
        .count();
    assert_eq!(prints, 1);
}

#[test]
fn mir_text_names_every_subroutine() {
    let (program, _) = with_conditions(|b, _| b.block(Vec::new()));

    colored::control::set_override(false);
    let mut diagnostics = Diagnostics::new();
    let text = emit_mir(&program, &CompileOptions::default(), &mut diagnostics)
        .expect("lowers cleanly");

    assert!(text.contains("fn f("));
    assert!(!text.contains('\u{1b}'));
}

#[test]
fn programs_survive_the_json_interchange() {
    let (program, _) = with_conditions(|b, f| {
        let a = b.parameter(f, 0);
        let condition = b.variable(f, a);
        let greeting = b.string("yes");
        let print = b.print(vec![greeting]);
        let then = b.expr(print);
        let branch = b.if_(condition, then, None);
        b.block(vec![branch])
    });

    let file = mktemp::Temp::new_file().expect("temporary file");
    let path: &std::path::Path = file.as_ref();
    std::fs::write(path, serde_json::to_string(&program).expect("serializable"))
        .expect("writable");

    let decoded = read_program(path).expect("decodes");

    let options = CompileOptions::default();
    let mut diagnostics = Diagnostics::new();
    let expected = compile_to_asm(&program, &options, &mut diagnostics).expect("compiles");
    let actual = compile_to_asm(&decoded, &options, &mut diagnostics).expect("compiles");
    assert_eq!(actual, expected);
}

#[test]
fn malformed_json_is_a_decode_error() {
    let file = mktemp::Temp::new_file().expect("temporary file");
    let path: &std::path::Path = file.as_ref();
    std::fs::write(path, "{ \"files\": [").expect("writable");

    let error = read_program(path).expect_err("truncated input");
    assert!(matches!(error, tagc::CompileError::Decode(_)));
}
