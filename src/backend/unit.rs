use indexmap::IndexSet;

use crate::backend::assemblers::x86_64::Instruction;

/// One line of a section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Label(String),
    /// Exports the symbol from the object file
    Global(String),
    Instruction(Instruction),
    Comment(String),
    Data(Data),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    /// Raw bytes, without a terminating NUL
    Ascii(String),
    Quad(i64),
    /// An 8 byte address of a label
    QuadSymbol(String),
    Long(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// The directive that switches the assembler into this section
    pub directive: &'static str,
    pub items: Vec<Item>,
}

impl Section {
    pub fn new(directive: &'static str) -> Self {
        Self {
            directive,
            items: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Everything emitted for one program, section by section in output order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyUnit {
    /// Runtime helpers and foreign symbols resolved at link time
    pub externs: IndexSet<String>,
    pub rodata: Section,
    pub text: Section,
    pub line: Section,
    pub info: Section,
    pub strings: Section,
}

impl Default for AssemblyUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl AssemblyUnit {
    pub fn new() -> Self {
        Self {
            externs: IndexSet::new(),
            rodata: Section::new(".section .rodata"),
            text: Section::new(".text"),
            line: Section::new(".section .tagc_line,\"\",@progbits"),
            info: Section::new(".section .tagc_info,\"\",@progbits"),
            strings: Section::new(".section .tagc_str,\"\",@progbits"),
        }
    }

    pub fn sections(&self) -> [&Section; 5] {
        [
            &self.rodata,
            &self.text,
            &self.line,
            &self.info,
            &self.strings,
        ]
    }
}
