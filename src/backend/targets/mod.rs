use std::{path::Path, process::Command};

use crate::{backend::CodegenOptions, diagnostics::Diagnostics, middle::mir};

mod x86_64_linux_gnu;

pub trait CodeGenerator {
    fn translate_to_asm(
        &self,
        program: &mir::Program,
        options: &CodegenOptions,
        diagnostics: &mut Diagnostics,
    ) -> String;
    fn create_assembler_command(&self, input_file: &Path, output_file: &Path) -> Command;
    /// Links a single object against the runtime library, when one is given
    fn create_linker_command(
        &self,
        input_file: &Path,
        runtime: Option<&Path>,
        output_file: &Path,
    ) -> Command;
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    x86_64LinuxGnu,
}

impl Target {
    pub fn get_code_generator(self) -> impl CodeGenerator {
        match self {
            Target::x86_64LinuxGnu => x86_64_linux_gnu::CodeGeneratorX86_64LinuxGnu,
        }
    }
}
