use std::{io, path::PathBuf};

use thiserror::Error;

use crate::diagnostics::{Diagnostic, Severity, Stage};

/// Failures that stop the whole compilation. Per-construct problems are
/// [`Diagnostic`]s; this type only carries them once a stage decides to halt.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("failed to read `{path}`: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write `{path}`: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("malformed HIR input: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("compilation halted after {stage} with {} error(s)", error_count(.diagnostics))]
    Halted {
        stage: Stage,
        diagnostics: Vec<Diagnostic>,
    },
    #[error("`{program}` failed: {detail}")]
    Tool { program: String, detail: String },
}

fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count()
}

pub type Result<T> = std::result::Result<T, CompileError>;
