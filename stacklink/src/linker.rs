use std::collections::HashSet;

use crate::{
    artifact::{Artifact, Reference},
    unit::OutputKind,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("root artifact {display_name} is not an executable")]
    RootNotExecutable { display_name: String },

    #[error("artifact {display_name} is not a module")]
    NotAModule { display_name: String },

    #[error("module {display_name} is linked more than once")]
    DuplicateModule { display_name: String },
}

// Payloads are kept as they are; cross-module symbols are the loader's job.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    root: Artifact,
    modules: Vec<Artifact>,
}

impl ProgramImage {
    pub fn root(&self) -> &Artifact {
        &self.root
    }

    pub fn modules(&self) -> &[Artifact] {
        &self.modules
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        std::iter::once(&self.root).chain(self.modules.iter())
    }

    pub fn contains(&self, owner: &str) -> bool {
        self.artifacts().any(|a| a.owner() == owner)
    }
}

pub fn link(root: &Artifact, modules: &[Reference]) -> Result<ProgramImage, Error> {
    if root.kind() != OutputKind::Executable {
        return Err(Error::RootNotExecutable {
            display_name: root.display_name().to_owned(),
        });
    }

    let mut seen = HashSet::new();
    let mut linked = Vec::with_capacity(modules.len());
    for module in modules {
        if module.kind() != OutputKind::Module {
            return Err(Error::NotAModule {
                display_name: module.display_name().to_owned(),
            });
        }
        if !seen.insert(module.owner()) {
            return Err(Error::DuplicateModule {
                display_name: module.display_name().to_owned(),
            });
        }
        linked.push(module.artifact().clone());
    }

    tracing::debug!(
        target: "pipeline",
        stage = "link",
        root = %root.display_name(),
        modules = linked.len(),
    );

    Ok(ProgramImage {
        root: root.clone(),
        modules: linked,
    })
}
