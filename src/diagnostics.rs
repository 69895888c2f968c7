//! Structured diagnostics shared by every pipeline stage.
//!
//! Stages never abort on a malformed construct. They push a [`Diagnostic`]
//! into the [`Diagnostics`] list they were handed and skip only the offending
//! statement, subroutine or class. The driver decides after each stage
//! whether accumulated errors halt the pipeline.

use colored::Colorize;
use strum::{Display, IntoStaticStr};

use crate::{
    index::Index,
    source::{SourceFile, SourceLocation},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Lowering,
    Optimization,
    Codegen,
    Driver,
}

/// Stable subtype code of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum DiagnosticKind {
    /// `break` used outside of any loop
    UnexpectedBreak,
    InvalidAssignmentTarget,
    InvalidIncrementTarget,
    /// Member access with a key that is not a string literal
    NonLiteralMemberKey,
    /// Field or method name collides with an inherited or sibling member
    DuplicateMember,
    /// A class that is its own ancestor
    CyclicInheritance,
    WrongArgumentCount,
    MissingArgument,
    UnsupportedForeignType,
    UnsupportedReturnType,
    UnimplementedCast,
    UnsupportedMakeTarget,
    /// A foreign subroutine used as a first class value
    ForeignSubroutineAssignment,
    /// A foreign subroutine called in a way its native ABI can't express
    ForeignMisuse,
    /// Internal consistency failure: an entity has no entry in a symbol index
    MissingSymbol,
    MissingEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub stage: Stage,
    pub kind: DiagnosticKind,
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn error(
        stage: Stage,
        kind: DiagnosticKind,
        location: SourceLocation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            stage,
            kind,
            location,
            message: message.into(),
        }
    }

    pub fn warning(
        stage: Stage,
        kind: DiagnosticKind,
        location: SourceLocation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(stage, kind, location, message)
        }
    }

    /// Renders the diagnostic header and location, e.g.
    ///
    /// ```text
    /// error[lowering/unexpected-break]: `break` outside of a loop
    ///   --> main.tg:4:9
    /// ```
    pub fn render(&self, files: &[SourceFile]) -> String {
        let severity = match self.severity {
            Severity::Error => self.severity.to_string().red().bold(),
            Severity::Warning => self.severity.to_string().yellow().bold(),
            Severity::Note => self.severity.to_string().cyan().bold(),
        };

        let file = self
            .location
            .file
            .and_then(|file| files.get(file.index()))
            .map(|f| f.origin.to_string())
            .unwrap_or_else(|| "<unknown>".to_owned());

        format!(
            "{severity}{}: {}\n  {} {file}:{}:{}",
            format!("[{}/{}]", self.stage, self.kind).bold(),
            self.message,
            "-->".blue(),
            self.location.line,
            self.location.column,
        )
    }
}

/// Append-only list of diagnostics accumulated across the pipeline
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::debug!(
            kind = %diagnostic.kind,
            stage = %diagnostic.stage,
            "{}: {}",
            diagnostic.severity,
            diagnostic.message
        );
        self.items.push(diagnostic);
    }

    pub fn error(
        &mut self,
        stage: Stage,
        kind: DiagnosticKind,
        location: SourceLocation,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic::error(stage, kind, location, message));
    }

    pub fn error_count(&self) -> usize {
        self.items
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
