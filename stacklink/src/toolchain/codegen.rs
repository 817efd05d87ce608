//! Lowers a parsed unit into a [`bytecode::Library`].
//!
//! Names are resolved in two places: members of the unit itself become direct
//! calls, everything else must be a public symbol of exactly one reference and
//! becomes an entry in the import table.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use typed_index_collections::TiVec;

use crate::{
    artifact::Reference,
    bytecode::{self, Import, ImportIndex, Library, SentenceIndex, Symbol, FOUNDATION},
    compiler::{Diagnostic, Location},
    toolchain::ast,
    unit::OutputKind,
};

struct Extern {
    module: String,
    public: bool,
}

pub struct Codegen<'a> {
    lib: Library,
    sentences: TiVec<SentenceIndex, Option<bytecode::Sentence>>,
    externs: BTreeMap<String, Vec<Extern>>,
    import_index: BTreeMap<Import, ImportIndex>,
    used: BTreeSet<String>,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl<'a> Codegen<'a> {
    pub fn new(unit: &str, kind: OutputKind, diagnostics: &'a mut Vec<Diagnostic>) -> Self {
        Self {
            lib: Library::new(unit, kind),
            sentences: TiVec::new(),
            externs: BTreeMap::new(),
            import_index: BTreeMap::new(),
            used: BTreeSet::new(),
            diagnostics,
        }
    }

    /// Reads the symbol tables of the references. Payloads are not re-parsed
    /// as source: only their exported names and visibility are consulted.
    pub fn add_references(&mut self, references: &[Reference]) {
        let mut seen = BTreeSet::new();
        for reference in references {
            let lib = match Library::decode(reference.bytes()) {
                Ok(lib) => lib,
                Err(e) => {
                    self.diagnostics.push(Diagnostic::error(format!(
                        "reference `{}` is not a valid module: {}",
                        reference.display_name(),
                        e
                    )));
                    continue;
                }
            };
            if lib.kind != OutputKind::Module {
                self.diagnostics.push(Diagnostic::error(format!(
                    "reference `{}` is an executable and cannot be referenced",
                    reference.display_name()
                )));
                continue;
            }
            if !seen.insert(lib.name.clone()) {
                continue;
            }
            for (name, symbol) in lib.symbols {
                self.externs.entry(name).or_default().push(Extern {
                    module: lib.name.clone(),
                    public: symbol.public,
                });
            }
        }
        if !seen.contains(FOUNDATION) {
            self.diagnostics.push(Diagnostic::error(format!(
                "the `{}` foundation reference is missing",
                FOUNDATION
            )));
        }
    }

    pub fn generate(mut self, file: &ast::File) -> Library {
        self.declare(file);
        for ty in &file.types {
            for member in &ty.members {
                let name = qualified(&ty.name.name, &member.name().name);
                let Some(symbol) = self.lib.find_symbol(&name) else {
                    continue;
                };
                if self.sentences[symbol.sentence].is_some() {
                    // duplicate definition, already reported
                    continue;
                }
                let words = match member {
                    ast::Member::Const(c) => vec![bytecode::Word::Push(c.value.value.clone())],
                    ast::Member::Fn(f) => self.block(&ty.name.name, &f.body),
                };
                self.sentences[symbol.sentence] = Some(bytecode::Sentence { words });
            }
        }
        self.warn_unused(file);

        self.lib.sentences = self
            .sentences
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        self.lib.imports = self
            .import_index
            .into_iter()
            .sorted_by_key(|(_, idx)| usize::from(*idx))
            .map(|(import, _)| import)
            .collect();
        self.lib
    }

    fn declare(&mut self, file: &ast::File) {
        for ty in &file.types {
            for member in &ty.members {
                let name = qualified(&ty.name.name, &member.name().name);
                if self.lib.symbols.contains_key(&name) {
                    self.error(
                        member.name().location,
                        format!("`{}` is defined more than once", name),
                    );
                    continue;
                }
                let sentence = self.sentences.push_and_get_key(None);
                self.lib.symbols.insert(
                    name,
                    Symbol {
                        sentence,
                        public: member.is_public(),
                    },
                );
            }
        }
    }

    fn block(&mut self, ty: &str, block: &ast::Block) -> Vec<bytecode::Word> {
        let mut words = vec![];
        for word in &block.words {
            match word {
                ast::Word::Literal(l) => words.push(bytecode::Word::Push(l.value.clone())),
                ast::Word::Path(path) => {
                    if let Some(w) = self.call(ty, path) {
                        words.push(w);
                    }
                }
                ast::Word::If {
                    then, otherwise, ..
                } => {
                    let then = self.anonymous(ty, then);
                    let otherwise = match otherwise {
                        Some(b) => self.anonymous(ty, b),
                        None => self.anonymous(ty, &ast::Block::default()),
                    };
                    words.push(bytecode::Word::Branch(then, otherwise));
                }
            }
        }
        words
    }

    fn anonymous(&mut self, ty: &str, block: &ast::Block) -> SentenceIndex {
        let idx = self.sentences.push_and_get_key(None);
        let words = self.block(ty, block);
        self.sentences[idx] = Some(bytecode::Sentence { words });
        idx
    }

    fn call(&mut self, ty: &str, path: &ast::Path) -> Option<bytecode::Word> {
        let name = match path.segments.as_slice() {
            [member] => {
                let name = qualified(ty, member);
                if self.lib.symbols.contains_key(&name) {
                    self.used.insert(name.clone());
                    return self.lib.find_symbol(&name).map(|s| bytecode::Word::Call(s.sentence));
                }
                self.error(
                    path.location,
                    format!("cannot find `{}` in type `{}`", member, ty),
                );
                return None;
            }
            [owner, member] => qualified(owner, member),
            _ => {
                self.error(
                    path.location,
                    format!("`{}` is not a `Type.member` path", path.as_string()),
                );
                return None;
            }
        };

        if let Some(symbol) = self.lib.find_symbol(&name) {
            self.used.insert(name);
            return Some(bytecode::Word::Call(symbol.sentence));
        }

        let resolved = match self.externs.get(&name) {
            None => Err(format!("cannot find `{}`", name)),
            Some(candidates) => {
                let public = candidates.iter().filter(|e| e.public).collect_vec();
                match public.as_slice() {
                    [single] => Ok(single.module.clone()),
                    [] => Err(format!(
                        "`{}` is private to module `{}`",
                        name,
                        candidates
                            .first()
                            .map(|e| e.module.as_str())
                            .unwrap_or_default()
                    )),
                    many => Err(format!(
                        "`{}` is ambiguous: exported by {}",
                        name,
                        many.iter().map(|e| e.module.as_str()).join(", ")
                    )),
                }
            }
        };
        let module = match resolved {
            Ok(module) => module,
            Err(message) => {
                self.error(path.location, message);
                return None;
            }
        };

        let import = Import {
            module,
            symbol: name,
        };
        let next = ImportIndex::from(self.import_index.len());
        let idx = *self.import_index.entry(import).or_insert(next);
        Some(bytecode::Word::CallImport(idx))
    }

    fn warn_unused(&mut self, file: &ast::File) {
        if self.lib.kind != OutputKind::Module {
            return;
        }
        for ty in &file.types {
            for member in ty.members.iter().filter(|m| !m.is_public()) {
                let name = qualified(&ty.name.name, &member.name().name);
                if !self.used.contains(&name) {
                    self.diagnostics.push(
                        Diagnostic::warning(format!("`{}` is never used", name))
                            .at(member.name().location),
                    );
                }
            }
        }
    }

    fn error(&mut self, location: Location, message: String) {
        self.diagnostics
            .push(Diagnostic::error(message).at(location));
    }
}

fn qualified(ty: &str, member: &str) -> String {
    format!("{}.{}", ty, member)
}
