//! Separate compilation, binary linking and dynamic loading of stack-language
//! units.
//!
//! A [`pipeline::Pipeline`] takes a [`unit::BuildRequest`], orders its units
//! with the [`resolver`], compiles each through a [`compiler::CompilerService`]
//! against the artifacts of its dependencies, merges the results with the
//! [`linker`] and hands the image to the [`loader`] for invocation.

pub mod artifact;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod error;
pub mod linker;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod resolver;
pub mod runtime;
pub mod toolchain;
pub mod unit;
pub mod vm;

pub use artifact::{Artifact, Reference};
pub use config::{BuildConfig, ExecutionLimits, Manifest};
pub use error::{BuildError, ErrorKind};
pub use pipeline::{BuildContext, BuildReport, CancelToken, Outcome, Pipeline, Stage};
pub use unit::{BuildRequest, CompileUnit, OutputKind};
