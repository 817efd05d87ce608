//! A small stack language and its compiler, used as the default
//! [`CompilerService`].

pub mod ast;
mod codegen;
mod parser;

pub use parser::parse;

use crate::compiler::{CompileOutput, CompileRequest, CompilerService};

/// Compiles stack-language source into a JSON-encoded
/// [`crate::bytecode::Library`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StackCompiler;

impl CompilerService for StackCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> CompileOutput {
        let mut diagnostics = vec![];

        let file = match parse(request.source) {
            Ok(file) => file,
            Err(diagnostic) => {
                return CompileOutput {
                    bytes: None,
                    diagnostics: vec![diagnostic],
                }
            }
        };

        let mut codegen = codegen::Codegen::new(request.unit, request.kind, &mut diagnostics);
        codegen.add_references(request.references);
        let library = codegen.generate(&file);

        if diagnostics.iter().any(|d| d.is_error()) {
            return CompileOutput {
                bytes: None,
                diagnostics,
            };
        }

        match library.encode() {
            Ok(bytes) => CompileOutput {
                bytes: Some(bytes),
                diagnostics,
            },
            Err(e) => {
                diagnostics.push(crate::compiler::Diagnostic::error(format!(
                    "failed to encode module: {}",
                    e
                )));
                CompileOutput {
                    bytes: None,
                    diagnostics,
                }
            }
        }
    }
}
