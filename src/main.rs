use std::{
    path::{Path, PathBuf},
    process::{Command, ExitCode},
};

use clap::{ArgAction, CommandFactory, Parser as ClapParser, ValueEnum, error::ErrorKind};
use colored::Colorize;
use tagc::{
    CompileError, CompileOptions,
    backend::targets::{CodeGenerator, Target},
    diagnostics::Diagnostics,
    driver,
    middle::hir,
    source::SourceFile,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    Asm,
    Mir,
}

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Resolved HIR of the program, as JSON
    input: PathBuf,

    /// Where to write the output; defaults to stdout, or `a.out` with --build
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Emit::Asm)]
    emit: Emit,

    /// Emit line and variable tables
    #[arg(short = 'g')]
    debug_info: bool,

    /// Keep compiling after a stage reported errors
    #[arg(long)]
    ignore_errors: bool,

    /// Skip the block merge pass
    #[arg(long)]
    no_optimize: bool,

    /// Assemble and link an executable instead of printing assembly
    #[arg(long)]
    build: bool,

    /// Runtime library to link against with --build
    #[arg(long, requires = "build")]
    runtime: Option<PathBuf>,

    /// Enable verbose logging (use multiple times for increased verbosity)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            ignore_errors: self.ignore_errors,
            debug_info: self.debug_info,
            optimize: !self.no_optimize,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(args.verbose, args.quiet);

    if !args.input.is_file() {
        Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("Input path '{}' is not a file!", args.input.display()),
            )
            .exit()
    }

    if args.build && args.emit == Emit::Mir {
        Args::command()
            .error(
                ErrorKind::ArgumentConflict,
                "--build can only link assembly, not MIR",
            )
            .exit()
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}: {error}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> tagc::Result<()> {
    let program = driver::read_program(&args.input)?;
    tracing::info!(
        input = %args.input.display(),
        functions = program.functions.len(),
        classes = program.classes.len(),
        "read program"
    );

    let mut diagnostics = Diagnostics::new();
    let result = compile(args, &program, &mut diagnostics);

    report(diagnostics.iter(), &program.files);
    if let Err(CompileError::Halted { diagnostics, .. }) = &result {
        report(diagnostics.iter(), &program.files);
    }

    result
}

fn compile(args: &Args, program: &hir::Program, diagnostics: &mut Diagnostics) -> tagc::Result<()> {
    let options = args.compile_options();

    if args.build {
        let asm = driver::compile_to_asm(program, &options, diagnostics)?;
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from("a.out"));
        return build(&asm, args.runtime.as_deref(), &output);
    }

    let text = match args.emit {
        Emit::Asm => driver::compile_to_asm(program, &options, diagnostics)?,
        Emit::Mir => {
            if args.output.is_some() {
                colored::control::set_override(false);
            }
            driver::emit_mir(program, &options, diagnostics)?
        }
    };

    match &args.output {
        Some(path) => write(path, &text),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

/// Assembles and links `asm` into an executable at `output`
fn build(asm: &str, runtime: Option<&Path>, output: &Path) -> tagc::Result<()> {
    let temp = mktemp::Temp::new_dir().map_err(|source| CompileError::Write {
        path: std::env::temp_dir(),
        source,
    })?;
    let dir: &Path = temp.as_ref();
    let asm_file = dir.join("out.s");
    let object_file = dir.join("out.o");

    write(&asm_file, asm)?;

    let generator = Target::x86_64LinuxGnu.get_code_generator();
    run_tool(generator.create_assembler_command(&asm_file, &object_file))?;
    run_tool(generator.create_linker_command(&object_file, runtime, output))?;

    tracing::info!(output = %output.display(), "linked executable");
    Ok(())
}

fn run_tool(mut cmd: Command) -> tagc::Result<()> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    tracing::debug!(?cmd, "running");

    let output = cmd.output().map_err(|error| CompileError::Tool {
        program: program.clone(),
        detail: error.to_string(),
    })?;

    if !output.status.success() {
        return Err(CompileError::Tool {
            program,
            detail: format!(
                "{}\n{}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim_end()
            ),
        });
    }

    Ok(())
}

fn write(path: &Path, text: &str) -> tagc::Result<()> {
    std::fs::write(path, text).map_err(|source| CompileError::Write {
        path: path.to_owned(),
        source,
    })
}

fn report<'a>(
    diagnostics: impl Iterator<Item = &'a tagc::diagnostics::Diagnostic>,
    files: &[SourceFile],
) {
    for diagnostic in diagnostics {
        eprintln!("{}", diagnostic.render(files));
    }
}
