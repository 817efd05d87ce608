//! The payload format of compiled artifacts.
//!
//! A [`Library`] is what the stack toolchain emits for one unit and what the
//! loader binds into an execution context. Cross-module calls go through the
//! library's import table and are resolved by name at load time.

use derive_more::derive::{From, Into};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use typed_index_collections::TiVec;

use crate::unit::OutputKind;

pub const FORMAT_VERSION: u32 = 1;

/// Name of the host-provided module every unit is compiled against.
pub const FOUNDATION: &str = "core";

macro_rules! natives {
    {
        $(($ident:ident, $name:literal),)*
    } => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Native {
            $($ident,)*
        }

        impl Native {
            pub const ALL: &'static [Native] = &[
                $(Native::$ident,)*
            ];

            pub fn name(self) -> &'static str {
                match self {
                    $(Native::$ident => $name,)*
                }
            }
        }
    };
}

natives! {
    (ConsoleWrite, "Console.write"),
    (ConsoleWriteln, "Console.writeln"),

    (StringConcat, "String.concat"),
    (StringFrom, "String.from"),
    (StringLength, "String.length"),

    (IntAdd, "Int.add"),
    (IntSub, "Int.sub"),
    (IntMul, "Int.mul"),
    (IntDiv, "Int.div"),
    (IntEq, "Int.eq"),
    (IntLt, "Int.lt"),

    (BoolNot, "Bool.not"),

    (StackDup, "Stack.dup"),
    (StackDrop, "Stack.drop"),
    (StackSwap, "Stack.swap"),

    (RuntimeFail, "Runtime.fail"),
    (RuntimeAssert, "Runtime.assert"),
}

#[derive(From, Into, Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentenceIndex(usize);

#[derive(From, Into, Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportIndex(usize);

#[derive(Clone, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum PrimitiveValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Word {
    Push(PrimitiveValue),
    Call(SentenceIndex),
    CallImport(ImportIndex),
    Native(Native),
    Branch(SentenceIndex, SentenceIndex),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sentence {
    pub words: Vec<Word>,
}

/// A symbol this library expects another module to provide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Import {
    pub module: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub sentence: SentenceIndex,
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub name: String,
    pub kind: OutputKind,
    pub imports: TiVec<ImportIndex, Import>,
    pub sentences: TiVec<SentenceIndex, Sentence>,
    pub symbols: BTreeMap<String, Symbol>,
}

#[derive(Serialize, Deserialize)]
struct LibrarySerde {
    format: u32,
    name: String,
    kind: OutputKind,
    imports: Vec<Import>,
    sentences: Vec<Sentence>,
    symbols: BTreeMap<String, Symbol>,
}

impl Serialize for Library {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let serde_repr = LibrarySerde {
            format: FORMAT_VERSION,
            name: self.name.clone(),
            kind: self.kind,
            imports: self.imports.iter().cloned().collect(),
            sentences: self.sentences.iter().cloned().collect(),
            symbols: self.symbols.clone(),
        };
        serde_repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Library {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let serde_repr = LibrarySerde::deserialize(deserializer)?;
        if serde_repr.format != FORMAT_VERSION {
            return Err(serde::de::Error::custom(format!(
                "unsupported format version {}, expected {}",
                serde_repr.format, FORMAT_VERSION
            )));
        }
        Ok(Library {
            name: serde_repr.name,
            kind: serde_repr.kind,
            imports: serde_repr.imports.into_iter().collect(),
            sentences: serde_repr.sentences.into_iter().collect(),
            symbols: serde_repr.symbols,
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed module payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl Library {
    pub fn new(name: impl Into<String>, kind: OutputKind) -> Self {
        Self {
            name: name.into(),
            kind,
            imports: TiVec::new(),
            sentences: TiVec::new(),
            symbols: BTreeMap::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn find_symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).copied()
    }

    /// Looks up a symbol other modules are allowed to call.
    pub fn export(&self, name: &str) -> Option<SentenceIndex> {
        self.find_symbol(name)
            .filter(|s| s.public)
            .map(|s| s.sentence)
    }

    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.symbols
            .iter()
            .filter(|(_, s)| s.public)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Library {
        let mut lib = Library::new("greeting", OutputKind::Module);
        let hello = lib.sentences.push_and_get_key(Sentence {
            words: vec![Word::Push(PrimitiveValue::Str("Hello ".into()))],
        });
        let helper = lib.sentences.push_and_get_key(Sentence::default());
        lib.symbols.insert(
            "Greeting.hello".into(),
            Symbol {
                sentence: hello,
                public: true,
            },
        );
        lib.symbols.insert(
            "Greeting.helper".into(),
            Symbol {
                sentence: helper,
                public: false,
            },
        );
        lib
    }

    #[test]
    fn exports_only_public_symbols() {
        let lib = sample();
        assert_eq!(lib.export("Greeting.hello"), Some(SentenceIndex::from(0)));
        assert_eq!(lib.export("Greeting.helper"), None);
        assert!(lib.find_symbol("Greeting.helper").is_some());
        assert_eq!(lib.exports().collect::<Vec<_>>(), vec!["Greeting.hello"]);
    }

    #[test]
    fn decode_rejects_garbage_and_wrong_versions() {
        assert!(Library::decode(b"not json").is_err());

        let mut value: serde_json::Value =
            serde_json::from_slice(&sample().encode().unwrap()).unwrap();
        value["format"] = serde_json::json!(99);
        let bytes = serde_json::to_vec(&value).unwrap();
        let err = Library::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported format version 99"));
    }

    #[test]
    fn decode_restores_encoded_library() {
        let lib = sample();
        assert_eq!(Library::decode(&lib.encode().unwrap()).unwrap(), lib);
    }

    #[test]
    fn native_names_are_qualified() {
        for native in Native::ALL {
            assert!(native.name().contains('.'), "{:?}", native);
        }
    }
}
