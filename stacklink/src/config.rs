use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::unit::{BuildRequest, CompileUnit, OutputKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub max_steps: u64,
    pub max_call_depth: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            max_call_depth: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildConfig {
    /// Compile the units of each dependency layer concurrently.
    pub parallel: bool,
    pub limits: ExecutionLimits,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOptions {
    parallel: Option<bool>,
    max_steps: Option<u64>,
    max_call_depth: Option<usize>,
}

impl From<RawOptions> for BuildConfig {
    fn from(raw: RawOptions) -> Self {
        let defaults = ExecutionLimits::default();
        Self {
            parallel: raw.parallel.unwrap_or_default(),
            limits: ExecutionLimits {
                max_steps: raw.max_steps.unwrap_or(defaults.max_steps),
                max_call_depth: raw.max_call_depth.unwrap_or(defaults.max_call_depth),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    entry: String,
    #[serde(default)]
    options: RawOptions,
    units: Vec<RawUnit>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUnit {
    name: String,
    kind: OutputKind,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

pub struct Manifest;

impl Manifest {
    /// Reads a manifest and the sources it points at. Unit paths are relative
    /// to the manifest's directory.
    pub fn load(path: &Path) -> anyhow::Result<(BuildRequest, BuildConfig)> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&contents, base).with_context(|| format!("in manifest {}", path.display()))
    }

    pub fn parse(contents: &str, base: &Path) -> anyhow::Result<(BuildRequest, BuildConfig)> {
        let raw: RawManifest = serde_yaml::from_str(contents).context("invalid manifest")?;

        let mut request = BuildRequest::new(raw.entry);
        for unit in raw.units {
            let source = match (unit.path, unit.source) {
                (Some(path), None) => {
                    let full = base.join(&path);
                    fs::read_to_string(&full).with_context(|| {
                        format!("reading source of unit {:?} from {}", unit.name, full.display())
                    })?
                }
                (None, Some(source)) => source,
                (Some(_), Some(_)) => {
                    bail!("unit {:?} has both `path` and `source`", unit.name)
                }
                (None, None) => bail!("unit {:?} has neither `path` nor `source`", unit.name),
            };
            request.units.push(CompileUnit {
                name: unit.name,
                source,
                kind: unit.kind,
                dependencies: unit.dependencies,
            });
        }
        Ok((request, raw.options.into()))
    }
}
