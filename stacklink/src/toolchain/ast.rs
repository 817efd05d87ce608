use crate::{bytecode::PrimitiveValue, compiler::Location};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub types: Vec<TypeDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: Identifier,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Const(ConstDecl),
    Fn(FnDecl),
}

impl Member {
    pub fn name(&self) -> &Identifier {
        match self {
            Member::Const(c) => &c.name,
            Member::Fn(f) => &f.name,
        }
    }

    pub fn is_public(&self) -> bool {
        match self {
            Member::Const(c) => c.public,
            Member::Fn(f) => f.public,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstDecl {
    pub public: bool,
    pub name: Identifier,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnDecl {
    pub public: bool,
    pub name: Identifier,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    Literal(Literal),
    Path(Path),
    If {
        location: Location,
        then: Block,
        otherwise: Option<Block>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    pub value: PrimitiveValue,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub segments: Vec<String>,
    pub location: Location,
}

impl Path {
    pub fn as_string(&self) -> String {
        self.segments.join(".")
    }
}
