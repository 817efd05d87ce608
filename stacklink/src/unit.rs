use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// What a unit compiles into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Module,
    Executable,
}

impl OutputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputKind::Module => "module",
            OutputKind::Executable => "executable",
        }
    }

    /// Suffix used for the display name of artifacts of this kind.
    pub fn extension(self) -> &'static str {
        match self {
            OutputKind::Module => "mod",
            OutputKind::Executable => "exe",
        }
    }
}

impl Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named, independently compiled piece of source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileUnit {
    pub name: String,
    pub source: String,
    pub kind: OutputKind,
    pub dependencies: Vec<String>,
}

impl CompileUnit {
    pub fn module(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            kind: OutputKind::Module,
            dependencies: vec![],
        }
    }

    pub fn executable(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            kind: OutputKind::Executable,
            dependencies: vec![],
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn display_name(&self) -> String {
        format!("{}.{}", self.name, self.kind.extension())
    }
}

/// Everything a single build run needs from its caller.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub units: Vec<CompileUnit>,
    /// Fully qualified `Type.procedure` invoked once the image is loaded.
    pub entry: String,
}

impl BuildRequest {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            units: vec![],
            entry: entry.into(),
        }
    }

    pub fn unit(mut self, unit: CompileUnit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn find(&self, name: &str) -> Option<&CompileUnit> {
        self.units.iter().find(|u| u.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_uses_kind_extension() {
        assert_eq!(CompileUnit::module("hello", "").display_name(), "hello.mod");
        assert_eq!(CompileUnit::executable("app", "").display_name(), "app.exe");
    }

    #[test]
    fn depends_on_preserves_declaration_order() {
        let unit = CompileUnit::executable("app", "").depends_on(["b", "a", "c"]);
        assert_eq!(unit.dependencies, vec!["b", "a", "c"]);
    }

    #[test]
    fn output_kind_parses_lowercase() {
        let kind: OutputKind = serde_yaml::from_str("executable").unwrap();
        assert_eq!(kind, OutputKind::Executable);
        assert!(serde_yaml::from_str::<OutputKind>("library").is_err());
    }
}
