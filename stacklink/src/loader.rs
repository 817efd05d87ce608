//! Binding order is the foundation module, the root executable, then every
//! module in image order. A module's imports are resolved as soon as it is
//! bound, against modules bound before it; the root's imports are resolved
//! last, once every module is in place.

use std::{
    collections::{HashMap, HashSet},
    io::Write,
    panic::{self, AssertUnwindSafe},
};

use derive_more::derive::{From, Into};
use typed_index_collections::TiVec;

use crate::{
    artifact::Artifact,
    bytecode::{Import, ImportIndex, Library, SentenceIndex, Word, FOUNDATION},
    config::ExecutionLimits,
    linker::ProgramImage,
    runtime::{self, Runtime},
    unit::OutputKind,
    vm::{Fault, Stack, Value, Vm},
};

#[derive(From, Into, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIndex(usize);

/// A resolved call destination: a sentence in a bound module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub module: ModuleIndex,
    pub sentence: SentenceIndex,
}

#[derive(Debug)]
pub struct BoundModule {
    pub display_name: String,
    pub library: Library,
    pub imports: TiVec<ImportIndex, Target>,
}

#[derive(Debug, Default)]
pub struct ExecutionContext {
    modules: TiVec<ModuleIndex, BoundModule>,
    by_name: HashMap<String, ModuleIndex>,
}

impl ExecutionContext {
    pub fn module(&self, idx: ModuleIndex) -> Option<&BoundModule> {
        self.modules.get(idx)
    }

    pub fn find(&self, name: &str) -> Option<ModuleIndex> {
        self.by_name.get(name).copied()
    }

    pub fn modules(&self) -> impl Iterator<Item = &BoundModule> {
        self.modules.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("module {module} references {missing:?}, which is not part of the program image")]
    MissingModule { module: String, missing: String },

    #[error("failed to load {module}: {reason}")]
    Bind { module: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    #[error("entry point {symbol:?} not found")]
    EntryNotFound { symbol: String },

    #[error("{symbol} failed: {description}")]
    InvocationFailure { symbol: String, description: String },
}

/// The observable result of a completed invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub entry: String,
    /// Values the entry procedure left on the stack.
    pub remaining: Vec<Value>,
    pub steps: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Loader {
    limits: ExecutionLimits,
}

impl Loader {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self { limits }
    }

    pub fn load(&self, image: &ProgramImage) -> Result<LoadedProgram, LoadError> {
        let present: HashSet<&str> = image.artifacts().map(Artifact::owner).collect();
        let mut binder = Binder {
            context: ExecutionContext::default(),
            present,
        };

        let foundation = format!("{}.{}", FOUNDATION, OutputKind::Module.extension());
        binder.insert(foundation, runtime::foundation(), TiVec::new())?;

        let root_lib = decode(image.root(), OutputKind::Executable)?;
        let root_imports = root_lib.imports.clone();
        let root = binder.insert(
            image.root().display_name().to_owned(),
            root_lib,
            TiVec::new(),
        )?;

        for artifact in image.modules() {
            let lib = decode(artifact, OutputKind::Module)?;
            let imports = binder.resolve_imports(artifact.display_name(), &lib.imports)?;
            binder.insert(artifact.display_name().to_owned(), lib, imports)?;
        }

        let resolved = binder.resolve_imports(image.root().display_name(), &root_imports)?;
        binder.context.modules[root].imports = resolved;

        for module in binder.context.modules.iter() {
            check_structure(module)?;
        }

        tracing::debug!(
            target: "pipeline",
            stage = "load",
            root = %image.root().display_name(),
            modules = binder.context.modules.len(),
        );

        Ok(LoadedProgram {
            context: binder.context,
            root,
            limits: self.limits,
        })
    }
}

fn decode(artifact: &Artifact, expected: OutputKind) -> Result<Library, LoadError> {
    let bind_error = |reason: String| LoadError::Bind {
        module: artifact.display_name().to_owned(),
        reason,
    };
    let lib = Library::decode(artifact.bytes()).map_err(|e| bind_error(e.to_string()))?;
    if lib.name != artifact.owner() {
        return Err(bind_error(format!(
            "payload belongs to module {:?}",
            lib.name
        )));
    }
    if lib.kind != expected {
        return Err(bind_error(format!(
            "payload is {}, expected {}",
            lib.kind, expected
        )));
    }
    Ok(lib)
}

/// Rejects indices that would send the VM outside of a module.
fn check_structure(module: &BoundModule) -> Result<(), LoadError> {
    let sentences = module.library.sentences.len();
    let imports = module.imports.len();
    let in_range = |idx: &SentenceIndex| usize::from(*idx) < sentences;

    let bad = module.library.sentences.iter().flat_map(|s| &s.words).find(|w| match w {
        Word::Call(idx) => !in_range(idx),
        Word::Branch(t, f) => !in_range(t) || !in_range(f),
        Word::CallImport(idx) => usize::from(*idx) >= imports,
        Word::Push(_) | Word::Native(_) => false,
    });
    if let Some(word) = bad {
        return Err(LoadError::Bind {
            module: module.display_name.clone(),
            reason: format!("word {:?} refers outside of the module", word),
        });
    }
    if let Some((name, _)) = module
        .library
        .symbols
        .iter()
        .find(|(_, s)| !in_range(&s.sentence))
    {
        return Err(LoadError::Bind {
            module: module.display_name.clone(),
            reason: format!("symbol {} refers outside of the module", name),
        });
    }
    Ok(())
}

struct Binder<'i> {
    context: ExecutionContext,
    present: HashSet<&'i str>,
}

impl Binder<'_> {
    fn insert(
        &mut self,
        display_name: String,
        library: Library,
        imports: TiVec<ImportIndex, Target>,
    ) -> Result<ModuleIndex, LoadError> {
        if self.context.by_name.contains_key(&library.name) {
            return Err(LoadError::Bind {
                module: display_name,
                reason: format!("module {:?} is already loaded", library.name),
            });
        }
        let name = library.name.clone();
        let idx = self.context.modules.push_and_get_key(BoundModule {
            display_name,
            library,
            imports,
        });
        self.context.by_name.insert(name, idx);
        Ok(idx)
    }

    fn resolve_imports(
        &self,
        display_name: &str,
        imports: &TiVec<ImportIndex, Import>,
    ) -> Result<TiVec<ImportIndex, Target>, LoadError> {
        imports
            .iter()
            .map(|import| {
                let bind_error = |reason: String| LoadError::Bind {
                    module: display_name.to_owned(),
                    reason,
                };
                let Some(module) = self.context.find(&import.module) else {
                    if self.present.contains(import.module.as_str()) {
                        return Err(bind_error(format!(
                            "module {:?} is referenced before it is loaded",
                            import.module
                        )));
                    }
                    return Err(LoadError::MissingModule {
                        module: display_name.to_owned(),
                        missing: import.module.clone(),
                    });
                };
                let target = &self.context.modules[module];
                if target.library.kind != OutputKind::Module {
                    return Err(bind_error(format!(
                        "{} is an executable and cannot be imported from",
                        target.display_name
                    )));
                }
                let sentence = target.library.export(&import.symbol).ok_or_else(|| {
                    bind_error(format!(
                        "{} does not export {}",
                        target.display_name, import.symbol
                    ))
                })?;
                Ok(Target { module, sentence })
            })
            .collect()
    }
}

/// A program bound into its own execution context, ready to be invoked.
#[derive(Debug)]
pub struct LoadedProgram {
    context: ExecutionContext,
    root: ModuleIndex,
    limits: ExecutionLimits,
}

impl LoadedProgram {
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Finds `symbol` in the root, where private members are allowed, then in
    /// the public symbols of each module in image order.
    pub fn find_entry(&self, symbol: &str) -> Option<Target> {
        let root = &self.context.modules[self.root];
        if let Some(found) = root.library.find_symbol(symbol) {
            return Some(Target {
                module: self.root,
                sentence: found.sentence,
            });
        }
        self.context
            .modules
            .iter_enumerated()
            .filter(|(idx, m)| *idx != self.root && m.library.name != FOUNDATION)
            .find_map(|(module, m)| {
                m.library
                    .export(symbol)
                    .map(|sentence| Target { module, sentence })
            })
    }

    /// Runs `symbol` to completion, writing program output to `output`. Any
    /// failure inside the program, including a panic in the host, comes back
    /// as [`InvokeError::InvocationFailure`].
    pub fn invoke(&self, symbol: &str, output: &mut dyn Write) -> Result<Invocation, InvokeError> {
        let target = self
            .find_entry(symbol)
            .ok_or_else(|| InvokeError::EntryNotFound {
                symbol: symbol.to_owned(),
            })?;

        tracing::info!(target: "pipeline", stage = "invoke", entry = %symbol);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(u64, Stack), Fault> {
            let mut vm = Vm::new(&self.context, Runtime::new(&mut *output), self.limits);
            vm.jump_to(target)?;
            vm.run()?;
            let steps = vm.steps();
            Ok((steps, vm.into_stack()))
        }));

        let failure = |description: String| InvokeError::InvocationFailure {
            symbol: symbol.to_owned(),
            description,
        };
        match outcome {
            Ok(Ok((steps, stack))) => {
                output
                    .flush()
                    .map_err(|e| failure(format!("flushing output: {}", e)))?;
                Ok(Invocation {
                    entry: symbol.to_owned(),
                    remaining: stack.into_vec(),
                    steps,
                })
            }
            Ok(Err(fault)) => Err(failure(fault.to_string())),
            Err(payload) => Err(failure(format!("host panic: {}", panic_message(&*payload)))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
