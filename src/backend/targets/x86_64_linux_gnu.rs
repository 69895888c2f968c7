use std::{path::Path, process::Command};

use crate::{
    backend::{CodegenOptions, isel::select_program, printer::print_unit, targets::CodeGenerator},
    diagnostics::Diagnostics,
    middle::mir,
};

pub struct CodeGeneratorX86_64LinuxGnu;

impl CodeGenerator for CodeGeneratorX86_64LinuxGnu {
    fn translate_to_asm(
        &self,
        program: &mir::Program,
        options: &CodegenOptions,
        diagnostics: &mut Diagnostics,
    ) -> String {
        let unit = select_program(program, options, diagnostics);

        tracing::debug!(
            externs = unit.externs.len(),
            rodata = unit.rodata.items.len(),
            "selected instructions"
        );

        print_unit(&unit)
    }

    fn create_assembler_command(&self, input_file: &Path, output_file: &Path) -> Command {
        let mut cmd = Command::new("as");

        cmd.arg("--64")
            .arg("-o")
            .arg(output_file)
            .arg(input_file);

        cmd
    }

    fn create_linker_command(
        &self,
        input_file: &Path,
        runtime: Option<&Path>,
        output_file: &Path,
    ) -> Command {
        let mut cmd = Command::new("ld");

        cmd.arg("-o").arg(output_file).arg(input_file);
        if let Some(runtime) = runtime {
            cmd.arg(runtime);
        }

        cmd
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;

    fn arguments(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn runtime_is_linked_after_the_object() {
        let generator = CodeGeneratorX86_64LinuxGnu;
        let cmd = generator.create_linker_command(
            &PathBuf::from("out.o"),
            Some(&PathBuf::from("libtagrt.a")),
            &PathBuf::from("a.out"),
        );

        assert_eq!(cmd.get_program(), "ld");
        assert_eq!(arguments(&cmd), ["-o", "a.out", "out.o", "libtagrt.a"]);
    }

    #[test]
    fn assembler_emits_64_bit_objects() {
        let generator = CodeGeneratorX86_64LinuxGnu;
        let cmd =
            generator.create_assembler_command(&PathBuf::from("in.s"), &PathBuf::from("in.o"));

        assert_eq!(cmd.get_program(), "as");
        assert_eq!(arguments(&cmd), ["--64", "-o", "in.o", "in.s"]);
    }
}
