use std::{ops::Deref, sync::Arc};

use crate::unit::OutputKind;

/// The binary result of successfully compiling one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    owner: String,
    kind: OutputKind,
    display_name: String,
    bytes: Arc<[u8]>,
}

impl Artifact {
    pub fn new(owner: impl Into<String>, kind: OutputKind, bytes: Vec<u8>) -> Self {
        let owner = owner.into();
        Self {
            display_name: format!("{}.{}", owner, kind.extension()),
            owner,
            kind,
            bytes: bytes.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A shared, read-only handle over an [`Artifact`], handed to the compiler
/// when building units that depend on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference(Arc<Artifact>);

impl Reference {
    pub fn new(artifact: Artifact) -> Self {
        Self(Arc::new(artifact))
    }

    pub fn artifact(&self) -> &Artifact {
        &self.0
    }

    pub fn ptr_eq(&self, other: &Reference) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Reference {
    type Target = Artifact;

    fn deref(&self) -> &Artifact {
        &self.0
    }
}

impl From<Artifact> for Reference {
    fn from(artifact: Artifact) -> Self {
        Self::new(artifact)
    }
}
