use std::fmt::Write;

use colored::Colorize;
use itertools::Itertools;

use crate::{
    index::Index,
    middle::mir::{self, AssignSource, BuiltinKind, StatementKind, SubroutineKind, Terminator},
};

/// Renders every subroutine of the program
pub fn pretty_print_program(program: &mir::Program) -> String {
    let mut out = String::new();

    for (id, literal) in program.literals.enumerate() {
        // infallible, writing into a String
        let _ = writeln!(
            out,
            "{} {} {} {}",
            "const".magenta(),
            format!("$lit{}", id.index()).purple(),
            "=".white(),
            literal.value
        );
    }
    if !program.literals.is_empty() {
        out.push('\n');
    }

    for class in program.classes.iter() {
        let _ = writeln!(
            out,
            "{} {} {{ {} }}",
            "class".magenta(),
            program.type_name(class.ty).blue(),
            class
                .fields
                .iter()
                .map(|f| f.name.value().to_owned())
                .chain(class.methods.iter().map(|m| format!(
                    "{}()",
                    m.name
                )))
                .join(", ")
        );
    }

    for id in program.subroutines.indices() {
        out.push_str(&pretty_print_subroutine(program, id));
        out.push('\n');
    }

    out
}

pub fn pretty_print_subroutine(program: &mir::Program, id: mir::SubroutineId) -> String {
    let subroutine = &program.subroutines[id];
    let mut out = String::new();

    let keyword = match &subroutine.kind {
        SubroutineKind::Defined(_) => "fn",
        SubroutineKind::Declared => "declare fn",
        SubroutineKind::Imported { .. } => "import fn",
    };
    let _ = write!(
        out,
        "{} {}{}",
        keyword.magenta(),
        subroutine_name(program, id).blue(),
        "(".white()
    );

    let body = match &subroutine.kind {
        SubroutineKind::Defined(body) => body,
        SubroutineKind::Imported {
            library,
            entry_point,
        } => {
            let _ = writeln!(
                out,
                "{} {} {}",
                ")".white(),
                "from".magenta(),
                format!(
                    "{library:?}{}",
                    entry_point
                        .as_deref()
                        .map(|e| format!(" as {e}"))
                        .unwrap_or_default()
                )
                .green()
            );
            return out;
        }
        SubroutineKind::Declared => {
            let _ = writeln!(out, "{}", ")".white());
            return out;
        }
    };

    let _ = write!(
        out,
        "{}",
        body.parameters
            .iter()
            .map(|p| value_name(body, *p))
            .join(", ")
            .white()
    );
    let _ = writeln!(
        out,
        "{} {} {}",
        ") ->".white(),
        value_name(body, body.return_value),
        "{".white()
    );

    for local in body.locals.iter().chain(&body.temporaries) {
        let _ = writeln!(
            out,
            "    {} {}: {}",
            "let".magenta(),
            value_name(body, *local),
            program.type_name(body.values[*local].ty).white()
        );
    }

    for (id, block) in body.blocks.enumerate() {
        let mut label = format!("bb{}:", id.index());
        if id == body.entry {
            label.push_str(" (entry)");
        }
        let _ = writeln!(out, "{}", label.bright_red());

        for statement in &block.statements {
            let _ = writeln!(out, "    {}", statement_to_string(program, body, &statement.kind));
        }

        let _ = writeln!(out, "    {}", terminator_to_string(body, &block.terminator));
    }

    let _ = writeln!(out, "{}", "}".white());
    out
}

pub fn subroutine_name(program: &mir::Program, id: mir::SubroutineId) -> String {
    let subroutine = &program.subroutines[id];
    match subroutine.owner {
        Some(owner) => format!("{}.{}", program.type_name(owner), subroutine.symbol.name),
        None => subroutine.symbol.name.to_string(),
    }
}

fn value_name(body: &mir::Body, id: mir::ValueId) -> String {
    let name = match body.values[id].symbol {
        Some(symbol) => format!("%{}.{}", id.index(), symbol.name),
        None => format!("%{}", id.index()),
    };
    name.yellow().to_string()
}

fn literal_name(program: &mir::Program, id: mir::LiteralId) -> String {
    program.literals[id].value.to_string().purple().to_string()
}

pub fn statement_to_string(
    program: &mir::Program,
    body: &mir::Body,
    kind: &StatementKind,
) -> String {
    let value = |id| value_name(body, id);
    let values = |ids: &[mir::ValueId]| ids.iter().map(|v| value_name(body, *v)).join(", ");

    match kind {
        StatementKind::Operator {
            kind,
            result,
            arguments,
        } => format!(
            "{} {} {} {}",
            value(*result),
            "=".white(),
            kind.symbol().cyan(),
            values(arguments)
        ),
        StatementKind::Call {
            result,
            callee,
            arguments,
        } => format!(
            "{} {} {} {}({})",
            value(*result),
            "=".white(),
            "call".cyan(),
            subroutine_name(program, *callee).blue(),
            values(arguments)
        ),
        StatementKind::Member {
            result,
            object,
            name,
        } => format!(
            "{} {} {}.{}",
            value(*result),
            "=".white(),
            value(*object),
            literal_name(program, *name)
        ),
        StatementKind::MemberRef {
            result,
            object,
            name,
        } => format!(
            "{} {} &{}.{}",
            value(*result),
            "=".white(),
            value(*object),
            literal_name(program, *name)
        ),
        StatementKind::Builtin {
            kind,
            template,
            result,
            arguments,
        } => {
            let name = match kind {
                BuiltinKind::Cast => "cast",
                BuiltinKind::Make => "make",
                BuiltinKind::Print => "print",
                BuiltinKind::TypeOf => "typeof",
            };
            let template = template
                .map(|t| format!("<{}>", program.type_name(t)))
                .unwrap_or_default();
            let call = format!("{}{template}({})", name.cyan(), values(arguments));
            match result {
                Some(result) => format!("{} {} {call}", value(*result), "=".white()),
                None => call,
            }
        }
        StatementKind::Assign {
            destination,
            source,
        } => {
            let source = match source {
                AssignSource::Value(v) => value(*v),
                AssignSource::Literal(l) => literal_name(program, *l),
                AssignSource::Subroutine(s) => subroutine_name(program, *s).blue().to_string(),
            };
            format!("{} {} {source}", value(*destination), "<-".white())
        }
    }
}

fn terminator_to_string(body: &mir::Body, terminator: &Terminator) -> String {
    let label = |b: mir::BlockId| format!("bb{}", b.index()).blue().to_string();

    match terminator {
        Terminator::Conditional {
            condition,
            positive,
            negative,
        } => format!(
            "{} {} {} {}",
            "br".cyan(),
            value_name(body, *condition),
            label(*positive),
            label(*negative)
        ),
        Terminator::Unconditional(target) => format!("{} {}", "jmp".cyan(), label(*target)),
        Terminator::Sink => "sink".cyan().to_string(),
    }
}
