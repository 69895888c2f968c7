use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::index::simple_index;

simple_index! {
    /// Identifies one of the source files a program was compiled from
    pub struct SourceFileId;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub origin: SourceFileOrigin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

/// A resolved position in some source file. Lines and columns are 1-based;
/// a zero line means the position is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: Option<SourceFileId>,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub const UNKNOWN: Self = Self {
        file: None,
        line: 0,
        column: 0,
    };

    pub fn new(file: SourceFileId, line: u32, column: u32) -> Self {
        Self {
            file: Some(file),
            line,
            column,
        }
    }

    pub fn is_known(&self) -> bool {
        self.file.is_some() && self.line != 0
    }
}
