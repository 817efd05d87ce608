//! End-to-end runs of the build pipeline with the stack toolchain.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use stacklink::{
    compiler::{CompileOutput, CompileRequest, CompilerService, DiagnosticError},
    error::Step,
    loader::{InvokeError, LoadError},
    pipeline::{BuildContext, CancelToken, Outcome, Pipeline, Stage},
    resolver,
    runtime,
    toolchain::StackCompiler,
    Artifact, BuildConfig, BuildError, BuildRequest, CompileUnit, ErrorKind, ExecutionLimits,
    OutputKind, Reference,
};

/// Counts calls into the wrapped service.
#[derive(Default)]
struct Counting<S> {
    inner: S,
    calls: AtomicUsize,
}

impl<S: CompilerService> CompilerService for Counting<S> {
    fn compile(&self, request: &CompileRequest<'_>) -> CompileOutput {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.compile(request)
    }
}

fn counting(config: BuildConfig) -> Pipeline<Counting<StackCompiler>> {
    Pipeline::new(Counting::default(), config)
}

fn calls(pipeline: &Pipeline<Counting<StackCompiler>>) -> usize {
    pipeline.adapter().service().calls.load(Ordering::SeqCst)
}

fn hello_world() -> BuildRequest {
    BuildRequest::new("Program.main")
        .unit(CompileUnit::module(
            "a",
            r#"type A { pub const hello = "Hello "; }"#,
        ))
        .unit(
            CompileUnit::module(
                "b",
                r#"type B {
                    const world = "World!";
                    pub fn greeting { A.hello world String.concat }
                }"#,
            )
            .depends_on(["a"]),
        )
        .unit(
            CompileUnit::executable("app", "type Program { fn main { B.greeting Console.write } }")
                .depends_on(["a", "b"]),
        )
}

fn failure(outcome: &Outcome) -> (&Step, &BuildError) {
    match outcome {
        Outcome::Failed { step, error } => (step, error),
        Outcome::Succeeded => panic!("expected the run to fail"),
    }
}

#[test]
fn hello_world_runs_across_three_units() {
    let pipeline = counting(BuildConfig::default());
    let report = pipeline.run(&hello_world());

    assert!(report.is_success(), "{:?}", report.error());
    assert_eq!(report.output_text(), "Hello World!");
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(calls(&pipeline), 3);

    let compiling = |index: usize, unit: &str| Stage::Compiling {
        index,
        total: 3,
        unit: unit.into(),
    };
    assert_eq!(
        report.stages,
        vec![
            Stage::Registered,
            Stage::Resolved,
            compiling(0, "a"),
            compiling(1, "b"),
            compiling(2, "app"),
            Stage::Linked,
            Stage::Loaded,
            Stage::Invoked,
            Stage::Succeeded,
        ]
    );
    assert!(report.invocation.unwrap().remaining.is_empty());
}

#[test]
fn declaration_order_does_not_matter() {
    let mut request = hello_world();
    request.units.reverse();
    let report = Pipeline::stack(BuildConfig::default()).run(&request);
    assert_eq!(report.output_text(), "Hello World!");
}

#[test]
fn cycles_fail_before_any_compilation() {
    let request = BuildRequest::new("App.main")
        .unit(CompileUnit::module("a", "").depends_on(["b"]))
        .unit(CompileUnit::module("b", "").depends_on(["a"]))
        .unit(CompileUnit::executable("app", "").depends_on(["a"]));
    let pipeline = counting(BuildConfig::default());
    let report = pipeline.run(&request);

    let (step, error) = failure(&report.outcome);
    assert_eq!(*step, Step::Resolve);
    assert_eq!(error.kind(), ErrorKind::CyclicDependency);
    assert_eq!(calls(&pipeline), 0);
    assert_eq!(
        report.stages,
        vec![Stage::Registered, Stage::Failed(ErrorKind::CyclicDependency)]
    );
}

#[test]
fn unknown_dependency_names_unit_and_missing_name() {
    let request = BuildRequest::new("App.main")
        .unit(CompileUnit::module("a", ""))
        .unit(CompileUnit::executable("app", "").depends_on(["a", "ghost"]));
    let pipeline = counting(BuildConfig::default());
    let report = pipeline.run(&request);

    let (_, error) = failure(&report.outcome);
    assert_eq!(
        *error,
        BuildError::Resolve(resolver::Error::UnknownDependency {
            unit: "app".into(),
            missing: "ghost".into(),
        })
    );
    assert_eq!(calls(&pipeline), 0);
}

#[test]
fn two_executables_are_rejected() {
    let request = BuildRequest::new("App.main")
        .unit(CompileUnit::executable("one", ""))
        .unit(CompileUnit::executable("two", ""));
    let report = Pipeline::stack(BuildConfig::default()).run(&request);
    let (step, error) = failure(&report.outcome);
    assert_eq!(*step, Step::Validate);
    assert_eq!(error.kind(), ErrorKind::ExecutableCount);
}

#[test]
fn compile_error_stops_at_the_failing_unit() {
    let mut request = hello_world();
    request.units[1].source = "type B {\n  pub fn greeting { A.nope }\n}".into();
    let pipeline = counting(BuildConfig::default());
    let report = pipeline.run(&request);

    let (step, error) = failure(&report.outcome);
    assert_eq!(*step, Step::Compile);
    let BuildError::Diagnostic(DiagnosticError {
        unit,
        message,
        location,
    }) = error
    else {
        panic!("expected a diagnostic error, got {:?}", error);
    };
    assert_eq!(unit, "b");
    assert_eq!(message, "cannot find `A.nope`");
    assert!(location.is_some());

    // `app` is never compiled and nothing is linked or run.
    assert_eq!(calls(&pipeline), 2);
    assert!(!report.stages.contains(&Stage::Linked));
    assert!(report.output.is_empty());
    assert!(report.invocation.is_none());
}

#[test]
fn warnings_are_reported_but_do_not_fail() {
    let mut request = hello_world();
    request.units[0].source = r#"type A { pub const hello = "Hello "; const spare = 1; }"#.into();
    let report = Pipeline::stack(BuildConfig::default()).run(&request);

    assert!(report.is_success());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].unit, "a");
    assert_eq!(report.warnings[0].diagnostic.message, "`A.spare` is never used");
}

#[test]
fn failing_entry_is_contained() {
    let request = BuildRequest::new("App.main").unit(CompileUnit::executable(
        "app",
        r#"type App { fn main { "partial" Console.write "boom" Runtime.fail } }"#,
    ));
    let report = Pipeline::stack(BuildConfig::default()).run(&request);

    let (step, error) = failure(&report.outcome);
    assert_eq!(*step, Step::Invoke);
    assert_eq!(
        *error,
        BuildError::Invoke(InvokeError::InvocationFailure {
            symbol: "App.main".into(),
            description: "in core.mod: Runtime.fail: boom".into(),
        })
    );
    assert_eq!(report.output_text(), "partial");
    assert_eq!(
        report.stages.last(),
        Some(&Stage::Failed(ErrorKind::InvocationFailure))
    );
}

#[test]
fn runaway_programs_hit_the_step_limit() {
    let request = BuildRequest::new("App.main").unit(CompileUnit::executable(
        "app",
        "type App { fn main { main } }",
    ));
    let config = BuildConfig {
        parallel: false,
        limits: ExecutionLimits {
            max_steps: 1_000,
            ..ExecutionLimits::default()
        },
    };
    let report = Pipeline::stack(config).run(&request);
    let (_, error) = failure(&report.outcome);
    assert!(error.to_string().contains("step limit of 1000"), "{}", error);
}

#[test]
fn missing_entry_point() {
    let mut request = hello_world();
    request.entry = "Program.nope".into();
    let report = Pipeline::stack(BuildConfig::default()).run(&request);
    let (_, error) = failure(&report.outcome);
    assert_eq!(
        *error,
        BuildError::Invoke(InvokeError::EntryNotFound {
            symbol: "Program.nope".into()
        })
    );
}

/// Compiles with an extra module reference the build request knows nothing
/// about, as a stale prebuilt artifact would be.
struct WithStaleReference {
    stale: Reference,
}

impl CompilerService for WithStaleReference {
    fn compile(&self, request: &CompileRequest<'_>) -> CompileOutput {
        let mut references = request.references.to_vec();
        references.push(self.stale.clone());
        StackCompiler.compile(&CompileRequest {
            references: &references,
            ..*request
        })
    }
}

#[test]
fn reference_outside_the_image_is_a_missing_module() {
    let ghost = StackCompiler.compile(&CompileRequest {
        unit: "ghost",
        source: r#"type Ghost { pub const boo = "boo"; }"#,
        kind: OutputKind::Module,
        references: &[runtime::foundation_artifact().into()],
    });
    let stale: Reference = Artifact::new("ghost", OutputKind::Module, ghost.bytes.unwrap()).into();

    let request = BuildRequest::new("App.main").unit(CompileUnit::executable(
        "app",
        "type App { fn main { Ghost.boo Console.write } }",
    ));
    let report = Pipeline::new(WithStaleReference { stale }, BuildConfig::default()).run(&request);

    let (step, error) = failure(&report.outcome);
    assert_eq!(*step, Step::Load);
    assert_eq!(
        *error,
        BuildError::Load(LoadError::MissingModule {
            module: "app.exe".into(),
            missing: "ghost".into(),
        })
    );
}

#[test]
fn parallel_build_matches_sequential() {
    let request = hello_world()
        .unit(CompileUnit::module("c", "type C { pub const x = 1; }"))
        .unit(CompileUnit::module("d", "type D { pub const y = 2; }").depends_on(["c"]));

    let sequential = Pipeline::stack(BuildConfig::default());
    let parallel = Pipeline::stack(BuildConfig {
        parallel: true,
        ..BuildConfig::default()
    });

    let mut seq_ctx = BuildContext::new();
    let mut par_ctx = BuildContext::new();
    let seq_image = sequential.build(&request, &mut seq_ctx).unwrap();
    let par_image = parallel.build(&request, &mut par_ctx).unwrap();

    for unit in ["a", "b", "c", "d", "app"] {
        assert_eq!(
            seq_ctx.artifact(unit).unwrap().bytes(),
            par_ctx.artifact(unit).unwrap().bytes(),
            "{}",
            unit
        );
    }
    let names = |image: &stacklink::linker::ProgramImage| {
        image
            .modules()
            .iter()
            .map(|m| m.display_name().to_owned())
            .collect::<Vec<_>>()
    };
    // c and d are compiled but nothing reaches them from the root.
    assert_eq!(names(&seq_image), vec!["a.mod", "b.mod"]);
    assert_eq!(names(&par_image), names(&seq_image));

    assert_eq!(parallel.run(&request).output_text(), "Hello World!");
}

#[test]
fn cancelled_run_never_compiles() {
    let token = CancelToken::default();
    token.cancel();
    let pipeline = counting(BuildConfig::default());
    let report = pipeline.run_with(&hello_world(), BuildContext::with_cancel(token));

    let (_, error) = failure(&report.outcome);
    assert_eq!(*error, BuildError::Cancelled);
    assert_eq!(calls(&pipeline), 0);
    assert_eq!(
        report.stages,
        vec![
            Stage::Registered,
            Stage::Resolved,
            Stage::Failed(ErrorKind::Cancelled)
        ]
    );
}

/// Cancels the run from inside the first compilation.
struct CancelOnFirstCall {
    token: Mutex<Option<CancelToken>>,
    calls: AtomicUsize,
}

impl CompilerService for CancelOnFirstCall {
    fn compile(&self, request: &CompileRequest<'_>) -> CompileOutput {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.token.lock().unwrap().take() {
            token.cancel();
        }
        StackCompiler.compile(request)
    }
}

#[test]
fn cancellation_is_checked_between_compilations() {
    let token = CancelToken::default();
    let pipeline = Pipeline::new(
        CancelOnFirstCall {
            token: Mutex::new(Some(token.clone())),
            calls: AtomicUsize::new(0),
        },
        BuildConfig::default(),
    );
    let report = pipeline.run_with(&hello_world(), BuildContext::with_cancel(token));

    let (_, error) = failure(&report.outcome);
    assert_eq!(*error, BuildError::Cancelled);
    assert_eq!(pipeline.adapter().service().calls.load(Ordering::SeqCst), 1);
    assert!(report.invocation.is_none());
}

#[test]
fn unit_named_like_the_foundation_is_rejected() {
    let request = BuildRequest::new("App.main")
        .unit(CompileUnit::module("core", "type Util { pub const x = 1; }"))
        .unit(
            CompileUnit::executable("app", "type App { fn main { Util.x drop } }")
                .depends_on(["core"]),
        );
    let pipeline = counting(BuildConfig::default());
    let report = pipeline.run(&request);

    let (step, error) = failure(&report.outcome);
    assert_eq!(*step, Step::Validate);
    assert_eq!(
        *error,
        BuildError::Resolve(resolver::Error::ReservedName {
            name: "core".into(),
        })
    );
    assert_eq!(error.kind(), ErrorKind::ReservedName);
    assert_eq!(calls(&pipeline), 0);
}

struct PanicsOn(&'static str);

impl CompilerService for PanicsOn {
    fn compile(&self, request: &CompileRequest<'_>) -> CompileOutput {
        if request.unit == self.0 {
            panic!("compiler bug in {}", request.unit);
        }
        StackCompiler.compile(request)
    }
}

#[test]
fn service_panics_fail_the_compile_step_in_both_modes() {
    for parallel in [false, true] {
        let pipeline = Pipeline::new(
            PanicsOn("b"),
            BuildConfig {
                parallel,
                ..BuildConfig::default()
            },
        );
        let report = pipeline.run(&hello_world());

        let (step, error) = failure(&report.outcome);
        assert_eq!(*step, Step::Compile, "parallel: {}", parallel);
        let BuildError::Diagnostic(DiagnosticError { unit, message, .. }) = error else {
            panic!("unexpected error {:?}", error);
        };
        assert_eq!(unit, "b");
        assert_eq!(message, "compiler service panicked");
    }
}

#[test]
fn output_reaches_the_sink_even_when_the_entry_fails() {
    let request = BuildRequest::new("App.main").unit(CompileUnit::executable(
        "app",
        r#"type App { fn main { "partial" Console.write "boom" Runtime.fail } }"#,
    ));
    let mut sink = Vec::new();
    let report =
        Pipeline::stack(BuildConfig::default()).run_to(&request, BuildContext::new(), &mut sink);

    assert!(!report.is_success());
    assert_eq!(sink, b"partial");
    assert_eq!(report.output, sink);
}
