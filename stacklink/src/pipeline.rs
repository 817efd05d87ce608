//! Drives one build run from a [`BuildRequest`] to an invoked program.
//!
//! A run moves through `Registered -> Resolved -> Compiling(i) -> Linked ->
//! Loaded -> Invoked` and ends in `Succeeded` or `Failed(kind)`. Everything a
//! run produces lives in its [`BuildContext`] and is dropped with it.

use std::{
    collections::HashSet,
    fmt::Display,
    io::{self, Write},
    panic,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use itertools::Itertools;

use crate::{
    artifact::Reference,
    compiler::{Compiled, CompilerAdapter, CompilerService, Diagnostic},
    config::BuildConfig,
    error::{BuildError, ErrorKind, Step},
    linker::{self, ProgramImage},
    loader::{Invocation, Loader},
    resolver,
    runtime,
    toolchain::StackCompiler,
    unit::{BuildRequest, CompileUnit, OutputKind},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Registered,
    Resolved,
    Compiling {
        index: usize,
        total: usize,
        unit: String,
    },
    Linked,
    Loaded,
    Invoked,
    Succeeded,
    Failed(ErrorKind),
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Registered => f.write_str("registered"),
            Stage::Resolved => f.write_str("resolved"),
            Stage::Compiling { index, total, unit } => {
                write!(f, "compiling {}/{} ({})", index + 1, total, unit)
            }
            Stage::Linked => f.write_str("linked"),
            Stage::Loaded => f.write_str("loaded"),
            Stage::Invoked => f.write_str("invoked"),
            Stage::Succeeded => f.write_str("succeeded"),
            Stage::Failed(kind) => write!(f, "failed ({:?})", kind),
        }
    }
}

/// Shared flag that asks a run to stop before its next compilation or link.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A warning reported while compiling `unit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDiagnostic {
    pub unit: String,
    pub diagnostic: Diagnostic,
}

impl Display for UnitDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.unit, self.diagnostic)
    }
}

/// State of a single run: stage history, artifacts produced so far and the
/// warnings collected along the way.
#[derive(Debug)]
pub struct BuildContext {
    stages: Vec<Stage>,
    artifacts: Vec<Reference>,
    warnings: Vec<UnitDiagnostic>,
    cancel: CancelToken,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    pub fn new() -> Self {
        Self::with_cancel(CancelToken::default())
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            stages: vec![Stage::Registered],
            artifacts: vec![],
            warnings: vec![],
            cancel,
        }
    }

    pub fn stage(&self) -> &Stage {
        self.stages.last().unwrap_or(&Stage::Registered)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Artifacts in the order they were produced.
    pub fn artifacts(&self) -> &[Reference] {
        &self.artifacts
    }

    pub fn artifact(&self, unit: &str) -> Option<&Reference> {
        self.artifacts.iter().find(|a| a.owner() == unit)
    }

    pub fn warnings(&self) -> &[UnitDiagnostic] {
        &self.warnings
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn enter(&mut self, stage: Stage) {
        tracing::info!(target: "pipeline", stage = %stage);
        self.stages.push(stage);
    }

    fn check_cancelled(&self) -> Result<(), BuildError> {
        if self.cancel.is_cancelled() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// References for `unit`'s declared dependencies, each once, in declared
    /// order. Resolved order guarantees every dependency is already built.
    fn references(&self, unit: &CompileUnit) -> Vec<Reference> {
        unit.dependencies
            .iter()
            .unique()
            .filter_map(|dep| self.artifact(dep).cloned())
            .collect()
    }

    fn record(&mut self, unit: &CompileUnit, compiled: Compiled) {
        self.warnings
            .extend(compiled.warnings.into_iter().map(|diagnostic| UnitDiagnostic {
                unit: unit.name.clone(),
                diagnostic,
            }));
        self.artifacts.push(compiled.artifact.into());
    }
}

#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Failed { step: Step, error: BuildError },
}

#[derive(Debug)]
pub struct BuildReport {
    pub outcome: Outcome,
    /// Everything the invoked program wrote.
    pub output: Vec<u8>,
    pub warnings: Vec<UnitDiagnostic>,
    pub stages: Vec<Stage>,
    pub invocation: Option<Invocation>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded)
    }

    pub fn error(&self) -> Option<&BuildError> {
        match &self.outcome {
            Outcome::Succeeded => None,
            Outcome::Failed { error, .. } => Some(error),
        }
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

pub struct Pipeline<S> {
    adapter: CompilerAdapter<S>,
    config: BuildConfig,
}

impl Pipeline<StackCompiler> {
    pub fn stack(config: BuildConfig) -> Self {
        Self::new(StackCompiler, config)
    }
}

impl<S: CompilerService> Pipeline<S> {
    pub fn new(service: S, config: BuildConfig) -> Self {
        Self {
            adapter: CompilerAdapter::new(service, runtime::foundation_artifact().into()),
            config,
        }
    }

    pub fn adapter(&self) -> &CompilerAdapter<S> {
        &self.adapter
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Validates, resolves, compiles and links `request`.
    pub fn build(
        &self,
        request: &BuildRequest,
        ctx: &mut BuildContext,
    ) -> Result<ProgramImage, BuildError> {
        resolver::validate(&request.units)?;
        let order = resolver::resolve(&request.units)?;
        let names = order.iter().map(|u| u.name.as_str()).join(", ");
        tracing::debug!(target: "pipeline", stage = "resolve", order = %names);
        ctx.enter(Stage::Resolved);

        if self.config.parallel {
            self.compile_layers(&order, ctx)?;
        } else {
            self.compile_in_order(&order, ctx)?;
        }

        ctx.check_cancelled()?;
        let root = order
            .iter()
            .find(|u| u.kind == OutputKind::Executable)
            .and_then(|u| Some((*u, ctx.artifact(&u.name)?.clone())));
        let Some((root, root_artifact)) = root else {
            return Err(resolver::Error::ExecutableCount {
                found: 0,
                names: vec![],
            }
            .into());
        };
        let modules = module_closure(root, &order)
            .into_iter()
            .filter_map(|name| ctx.artifact(name).cloned())
            .collect_vec();

        let image = linker::link(&root_artifact, &modules)?;
        ctx.enter(Stage::Linked);
        Ok(image)
    }

    /// Builds, loads and invokes `request`, capturing program output.
    pub fn run(&self, request: &BuildRequest) -> BuildReport {
        self.run_with(request, BuildContext::new())
    }

    pub fn run_with(&self, request: &BuildRequest, ctx: BuildContext) -> BuildReport {
        self.run_to(request, ctx, &mut io::sink())
    }

    /// Like [`Pipeline::run_with`], also forwarding program output to `sink`
    /// as it is written.
    pub fn run_to(
        &self,
        request: &BuildRequest,
        mut ctx: BuildContext,
        sink: &mut dyn Write,
    ) -> BuildReport {
        tracing::info!(
            target: "pipeline",
            stage = "run.start",
            units = request.units.len(),
            entry = %request.entry,
            parallel = self.config.parallel,
        );

        let mut output = Tee {
            captured: Vec::new(),
            sink,
        };
        let result = self.execute(request, &mut ctx, &mut output);
        let output = output.captured;

        let (outcome, invocation) = match result {
            Ok(invocation) => {
                ctx.enter(Stage::Succeeded);
                (Outcome::Succeeded, Some(invocation))
            }
            Err(error) => {
                let step = error.step();
                tracing::error!(target: "pipeline", stage = "run.failed", %step, "{}", error);
                ctx.enter(Stage::Failed(error.kind()));
                (Outcome::Failed { step, error }, None)
            }
        };

        BuildReport {
            outcome,
            output,
            warnings: ctx.warnings,
            stages: ctx.stages,
            invocation,
        }
    }

    fn execute(
        &self,
        request: &BuildRequest,
        ctx: &mut BuildContext,
        output: &mut dyn Write,
    ) -> Result<Invocation, BuildError> {
        let image = self.build(request, ctx)?;

        let program = Loader::new(self.config.limits).load(&image)?;
        ctx.enter(Stage::Loaded);

        let invocation = program.invoke(&request.entry, output)?;
        ctx.enter(Stage::Invoked);
        Ok(invocation)
    }

    fn compile_in_order(
        &self,
        order: &[&CompileUnit],
        ctx: &mut BuildContext,
    ) -> Result<(), BuildError> {
        let total = order.len();
        for (index, unit) in order.iter().enumerate() {
            ctx.check_cancelled()?;
            ctx.enter(Stage::Compiling {
                index,
                total,
                unit: unit.name.clone(),
            });
            let references = ctx.references(unit);
            let compiled = self.adapter.compile_unit(unit, &references)?;
            ctx.record(unit, compiled);
        }
        Ok(())
    }

    /// Compiles each dependency layer on scoped threads. A layer is joined
    /// completely before the next one starts.
    fn compile_layers(
        &self,
        order: &[&CompileUnit],
        ctx: &mut BuildContext,
    ) -> Result<(), BuildError> {
        let total = order.len();
        let mut index = 0;
        for layer in resolver::layers(order) {
            ctx.check_cancelled()?;
            let jobs = layer
                .iter()
                .map(|unit| (*unit, ctx.references(unit)))
                .collect_vec();
            for (unit, _) in &jobs {
                ctx.enter(Stage::Compiling {
                    index,
                    total,
                    unit: unit.name.clone(),
                });
                index += 1;
            }

            let results = std::thread::scope(|s| {
                let handles = jobs
                    .iter()
                    .map(|(unit, references)| {
                        s.spawn(move || self.adapter.compile_unit(unit, references))
                    })
                    .collect_vec();
                // The adapter contains service panics, so a failed join is a
                // bug in the pipeline itself.
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or_else(|e| panic::resume_unwind(e)))
                    .collect_vec()
            });

            let mut first_error = None;
            for ((unit, _), result) in jobs.iter().zip(results) {
                match result {
                    Ok(compiled) => ctx.record(unit, compiled),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

/// Keeps a copy of everything written through to `sink`.
struct Tee<'s> {
    captured: Vec<u8>,
    sink: &'s mut dyn Write,
}

impl Write for Tee<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.sink.write(buf)?;
        self.captured.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Names of the modules `root` transitively depends on, in resolved order.
fn module_closure<'u>(root: &CompileUnit, order: &[&'u CompileUnit]) -> Vec<&'u str> {
    let mut needed: HashSet<&str> = root.dependencies.iter().map(String::as_str).collect();
    // Walking the order backwards sees every dependent before its
    // dependencies, so one pass suffices.
    for unit in order.iter().rev() {
        if needed.contains(unit.name.as_str()) {
            needed.extend(unit.dependencies.iter().map(String::as_str));
        }
    }
    order
        .iter()
        .filter(|u| u.name != root.name && needed.contains(u.name.as_str()))
        .map(|u| u.name.as_str())
        .collect()
}
