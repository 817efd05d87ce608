//! Runs the `stacklink` binary against the bundled demo manifest.

use std::{
    fs,
    path::PathBuf,
    process::{Command, Output},
};

fn stacklink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stacklink"))
        .args(args)
        .env_remove("STACKLINK_LOG_LEVEL")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run stacklink")
}

fn demo_manifest() -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../demos/hello/manifest.yaml")
        .to_string_lossy()
        .into_owned()
}

#[test]
fn run_prints_program_output() {
    let output = stacklink(&["run", &demo_manifest()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout), "Hello World!\n");
}

#[test]
fn order_lists_dependencies_first() {
    let output = stacklink(&["order", &demo_manifest()]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "hello.mod\nworld.mod\nprogram.exe\n"
    );
}

#[test]
fn build_writes_every_artifact() {
    let out = tempfile::tempdir().unwrap();
    let out_dir = out.path().to_string_lossy().into_owned();
    let output = stacklink(&["build", &demo_manifest(), "--out-dir", &out_dir]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    for name in ["hello.mod", "world.mod", "program.exe"] {
        let bytes = fs::read(out.path().join(name)).unwrap();
        let lib = stacklink::bytecode::Library::decode(&bytes).unwrap();
        assert_eq!(format!("{}.{}", lib.name, lib.kind.extension()), name);
    }
}

#[test]
fn failed_run_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("manifest.yaml");
    fs::write(
        &manifest,
        r#"entry: App.main
units:
  - name: app
    kind: executable
    source: 'type App { fn main { "no" Runtime.fail } }'
"#,
    )
    .unwrap();

    let output = stacklink(&["run", &manifest.to_string_lossy()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error during invoke"), "{}", stderr);
}
