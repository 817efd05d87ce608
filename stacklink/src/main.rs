use std::{
    io::Write,
    path::{Path, PathBuf},
    process::exit,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use itertools::Itertools;
use stacklink::{
    logging::{self, LogFormat, LogLevel, LogOptions},
    pipeline::{BuildContext, Outcome, Pipeline},
    resolver, Manifest,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// error, warn, info, debug or trace. Overrides STACKLINK_LOG_LEVEL.
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// text or json. Overrides STACKLINK_LOG_FORMAT.
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the manifest and invoke its entry point.
    Run {
        manifest: PathBuf,
        #[arg(long)]
        parallel: bool,
        #[arg(long)]
        max_steps: Option<u64>,
    },
    /// Compile and link, writing every artifact to `out_dir`.
    Build {
        manifest: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long)]
        parallel: bool,
    },
    /// Print the order units would be compiled in.
    Order { manifest: PathBuf },
}

fn run(manifest: &Path, parallel: bool, max_steps: Option<u64>) -> anyhow::Result<()> {
    let (request, mut config) = Manifest::load(manifest)?;
    config.parallel |= parallel;
    if let Some(max_steps) = max_steps {
        config.limits.max_steps = max_steps;
    }

    let mut stdout = std::io::stdout().lock();
    let report = Pipeline::stack(config).run_to(&request, BuildContext::new(), &mut stdout);
    stdout.flush()?;
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }

    match report.outcome {
        Outcome::Succeeded => Ok(()),
        Outcome::Failed { step, error } => {
            eprintln!("error during {}: {}", step, error);
            exit(1);
        }
    }
}

fn build(manifest: &Path, out_dir: &Path, parallel: bool) -> anyhow::Result<()> {
    let (request, mut config) = Manifest::load(manifest)?;
    config.parallel |= parallel;

    let mut ctx = BuildContext::new();
    let image = Pipeline::stack(config).build(&request, &mut ctx);
    for warning in ctx.warnings() {
        eprintln!("warning: {}", warning);
    }
    let image = image?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    for artifact in ctx.artifacts() {
        let path = out_dir.join(artifact.display_name());
        std::fs::write(&path, artifact.bytes())
            .with_context(|| format!("writing {}", path.display()))?;
    }
    println!(
        "linked {} with {}",
        image.root().display_name(),
        image.modules().iter().map(|m| m.display_name()).join(", ")
    );
    Ok(())
}

fn order(manifest: &Path) -> anyhow::Result<()> {
    let (request, _) = Manifest::load(manifest)?;
    resolver::validate(&request.units)?;
    for unit in resolver::resolve(&request.units)? {
        println!("{}", unit.display_name());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(&LogOptions::resolve(args.log_format, args.log_level));

    match args.command {
        Commands::Run {
            manifest,
            parallel,
            max_steps,
        } => run(&manifest, parallel, max_steps),
        Commands::Build {
            manifest,
            out_dir,
            parallel,
        } => build(&manifest, &out_dir, parallel),
        Commands::Order { manifest } => order(&manifest),
    }
}
