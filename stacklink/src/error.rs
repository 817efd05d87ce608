use std::fmt::Display;

use crate::{
    compiler::DiagnosticError,
    linker,
    loader::{InvokeError, LoadError},
    resolver,
};

/// Any reason a build run can end in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Resolve(#[from] resolver::Error),

    #[error(transparent)]
    Diagnostic(#[from] DiagnosticError),

    #[error(transparent)]
    Link(#[from] linker::Error),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("build cancelled")]
    Cancelled,
}

/// Flat discriminant of [`BuildError`], carried by the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateUnit,
    ReservedName,
    ExecutableCount,
    UnknownDependency,
    CyclicDependency,
    Diagnostic,
    Link,
    MissingModule,
    Load,
    EntryNotFound,
    InvocationFailure,
    Cancelled,
}

/// The pipeline step an error surfaced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Validate,
    Resolve,
    Compile,
    Link,
    Load,
    Invoke,
}

impl Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Step::Validate => "validate",
            Step::Resolve => "resolve",
            Step::Compile => "compile",
            Step::Link => "link",
            Step::Load => "load",
            Step::Invoke => "invoke",
        })
    }
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Resolve(e) => match e {
                resolver::Error::DuplicateUnit { .. } => ErrorKind::DuplicateUnit,
                resolver::Error::ReservedName { .. } => ErrorKind::ReservedName,
                resolver::Error::ExecutableCount { .. } => ErrorKind::ExecutableCount,
                resolver::Error::UnknownDependency { .. } => ErrorKind::UnknownDependency,
                resolver::Error::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            },
            BuildError::Diagnostic(_) => ErrorKind::Diagnostic,
            BuildError::Link(_) => ErrorKind::Link,
            BuildError::Load(LoadError::MissingModule { .. }) => ErrorKind::MissingModule,
            BuildError::Load(LoadError::Bind { .. }) => ErrorKind::Load,
            BuildError::Invoke(InvokeError::EntryNotFound { .. }) => ErrorKind::EntryNotFound,
            BuildError::Invoke(InvokeError::InvocationFailure { .. }) => {
                ErrorKind::InvocationFailure
            }
            BuildError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Cancellation is reported against the compile step, the only place a
    /// run observes it.
    pub fn step(&self) -> Step {
        match self.kind() {
            ErrorKind::DuplicateUnit | ErrorKind::ReservedName | ErrorKind::ExecutableCount => {
                Step::Validate
            }
            ErrorKind::UnknownDependency | ErrorKind::CyclicDependency => Step::Resolve,
            ErrorKind::Diagnostic | ErrorKind::Cancelled => Step::Compile,
            ErrorKind::Link => Step::Link,
            ErrorKind::MissingModule | ErrorKind::Load => Step::Load,
            ErrorKind::EntryNotFound | ErrorKind::InvocationFailure => Step::Invoke,
        }
    }
}
