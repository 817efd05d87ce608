//! The boundary between the pipeline and whatever actually compiles source
//! text.

use std::{
    fmt::Display,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use itertools::Itertools;

use crate::{
    artifact::{Artifact, Reference},
    unit::{CompileUnit, OutputKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub col: usize,
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location {
            Some(location) => write!(f, "{} at {}: {}", self.severity, location, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// One call into a compiler service.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub unit: &'a str,
    pub source: &'a str,
    pub kind: OutputKind,
    pub references: &'a [Reference],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    pub bytes: Option<Vec<u8>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Something that can compile a single unit against binary references.
///
/// Implementations may be called from several threads at once for
/// independent units.
pub trait CompilerService: Send + Sync {
    fn compile(&self, request: &CompileRequest<'_>) -> CompileOutput;
}

impl<S: CompilerService + ?Sized> CompilerService for Arc<S> {
    fn compile(&self, request: &CompileRequest<'_>) -> CompileOutput {
        (**self).compile(request)
    }
}

impl<S: CompilerService + ?Sized> CompilerService for &S {
    fn compile(&self, request: &CompileRequest<'_>) -> CompileOutput {
        (**self).compile(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{unit}{}: {message}", .location.map(|l| format!(":{}", l)).unwrap_or_default())]
pub struct DiagnosticError {
    pub unit: String,
    pub message: String,
    pub location: Option<Location>,
}

/// A successful compilation and the warnings the service reported for it.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub artifact: Artifact,
    pub warnings: Vec<Diagnostic>,
}

pub struct CompilerAdapter<S> {
    service: S,
    foundation: Reference,
}

impl<S: CompilerService> CompilerAdapter<S> {
    pub fn new(service: S, foundation: Reference) -> Self {
        Self {
            service,
            foundation,
        }
    }

    pub fn foundation(&self) -> &Reference {
        &self.foundation
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn compile(
        &self,
        unit: &CompileUnit,
        references: &[Reference],
    ) -> Result<Artifact, DiagnosticError> {
        self.compile_unit(unit, references).map(|c| c.artifact)
    }

    /// Compiles `unit` against the foundation followed by `references`.
    pub fn compile_unit(
        &self,
        unit: &CompileUnit,
        references: &[Reference],
    ) -> Result<Compiled, DiagnosticError> {
        let references = std::iter::once(self.foundation.clone())
            .chain(references.iter().cloned())
            .collect_vec();

        let reference_names = references.iter().map(|r| r.display_name()).join(", ");
        tracing::debug!(
            target: "pipeline",
            stage = "compile.request",
            unit = %unit.name,
            kind = %unit.kind,
            references = %reference_names,
        );

        let request = CompileRequest {
            unit: &unit.name,
            source: &unit.source,
            kind: unit.kind,
            references: &references,
        };
        let output = panic::catch_unwind(AssertUnwindSafe(|| self.service.compile(&request)))
            .map_err(|_| DiagnosticError {
                unit: unit.name.clone(),
                message: "compiler service panicked".to_owned(),
                location: None,
            })?;

        let (errors, warnings): (Vec<Diagnostic>, Vec<Diagnostic>) = output
            .diagnostics
            .into_iter()
            .partition(Diagnostic::is_error);

        for warning in &warnings {
            tracing::warn!(
                target: "pipeline",
                stage = "compile.diagnostic",
                unit = %unit.name,
                "{}",
                warning
            );
        }

        if let Some(first) = errors.into_iter().next() {
            return Err(DiagnosticError {
                unit: unit.name.clone(),
                message: first.message,
                location: first.location,
            });
        }

        let Some(bytes) = output.bytes else {
            return Err(DiagnosticError {
                unit: unit.name.clone(),
                message: "compiler reported success but produced no output".to_owned(),
                location: None,
            });
        };

        Ok(Compiled {
            artifact: Artifact::new(unit.name.clone(), unit.kind, bytes),
            warnings,
        })
    }
}
