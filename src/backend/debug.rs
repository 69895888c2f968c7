//! Line, info and string tables describing the emitted code, written into
//! their own sections when debug output is enabled.

use indexmap::IndexSet;

use crate::{
    backend::unit::{AssemblyUnit, Data, Item},
    index::Index,
    source::SourceLocation,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry {
    pub label: String,
    pub file: u32,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableRole {
    Parameter = 0,
    Local = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableEntry {
    pub offset: i64,
    pub name: u32,
    pub role: VariableRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoEntry {
    pub start: String,
    pub end: String,
    pub name: u32,
    pub variables: Vec<VariableEntry>,
}

#[derive(Debug, Default)]
pub struct DebugTables {
    strings: IndexSet<String>,
    lines: Vec<LineEntry>,
    infos: Vec<InfoEntry>,
}

impl DebugTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `value` in the string table, assigned on first use
    pub fn string(&mut self, value: &str) -> u32 {
        match self.strings.get_index_of(value) {
            Some(index) => index as u32,
            None => self.strings.insert_full(value.to_owned()).0 as u32,
        }
    }

    /// Builds the line entry for `label`, or nothing when the position is
    /// unknown. Entries are committed with [`Self::push_lines`] once the
    /// subroutine they belong to made it into the output.
    pub fn line_entry(label: &str, location: SourceLocation) -> Option<LineEntry> {
        let file = location.file.filter(|_| location.is_known())?;

        Some(LineEntry {
            label: label.to_owned(),
            file: file.index() as u32,
            line: location.line,
        })
    }

    pub fn push_lines(&mut self, lines: impl IntoIterator<Item = LineEntry>) {
        self.lines.extend(lines);
    }

    pub fn push_info(&mut self, info: InfoEntry) {
        self.infos.push(info);
    }

    pub fn emit(&self, unit: &mut AssemblyUnit) {
        let line = &mut unit.line.items;
        for entry in &self.lines {
            line.push(Item::Data(Data::QuadSymbol(entry.label.clone())));
            line.push(Item::Data(Data::Long(entry.file.into())));
            line.push(Item::Data(Data::Long(entry.line.into())));
        }

        let info = &mut unit.info.items;
        for entry in &self.infos {
            info.push(Item::Data(Data::QuadSymbol(entry.start.clone())));
            info.push(Item::Data(Data::QuadSymbol(entry.end.clone())));
            info.push(Item::Data(Data::Long(entry.name.into())));
            info.push(Item::Data(Data::Long(entry.variables.len() as i64)));
            for variable in &entry.variables {
                info.push(Item::Data(Data::Quad(variable.offset)));
                info.push(Item::Data(Data::Long(variable.name.into())));
                info.push(Item::Data(Data::Long(variable.role as i64)));
            }
        }

        let strings = &mut unit.strings.items;
        for value in &self.strings {
            strings.push(Item::Data(Data::Long(value.len() as i64)));
            strings.push(Item::Data(Data::Ascii(value.clone())));
        }
    }
}
