use pest::{
    error::LineColLocation,
    iterators::{Pair, Pairs},
    Parser,
};
use pest_derive::Parser;

use crate::{
    bytecode::PrimitiveValue,
    compiler::{Diagnostic, Location},
    toolchain::ast::*,
};

#[derive(Parser)]
#[grammar = "toolchain/stack.pest"]
struct StackParser;

pub fn parse(source: &str) -> Result<File, Diagnostic> {
    let mut pairs = StackParser::parse(Rule::file, source).map_err(|e| {
        let (line, col) = match e.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        Diagnostic::error(format!("syntax error: {}", e.variant.message()))
            .at(Location { line, col })
    })?;
    let file = next(&mut pairs, Rule::file)?;
    Factory.file(file)
}

fn location(p: &Pair<Rule>) -> Location {
    let (line, col) = p.as_span().start_pos().line_col();
    Location { line, col }
}

fn next<'i>(pairs: &mut Pairs<'i, Rule>, rule: Rule) -> Result<Pair<'i, Rule>, Diagnostic> {
    match pairs.next() {
        Some(p) if p.as_rule() == rule => Ok(p),
        Some(p) => Err(malformed(&format!("{:?}", p.as_rule()), rule)),
        None => Err(malformed("end of input", rule)),
    }
}

fn malformed(found: &str, expected: Rule) -> Diagnostic {
    Diagnostic::error(format!(
        "internal parser error: expected {:?}, found {}",
        expected, found
    ))
}

struct Factory;

impl Factory {
    fn file(&self, p: Pair<Rule>) -> Result<File, Diagnostic> {
        let mut types = vec![];
        for pair in p.into_inner() {
            match pair.as_rule() {
                Rule::type_decl => types.push(self.type_decl(pair)?),
                Rule::EOI => {}
                other => return Err(malformed(&format!("{:?}", other), Rule::type_decl)),
            }
        }
        Ok(File { types })
    }

    fn type_decl(&self, p: Pair<Rule>) -> Result<TypeDecl, Diagnostic> {
        let mut pairs = p.into_inner();
        let name = self.identifier(next(&mut pairs, Rule::identifier)?);
        let members = pairs
            .map(|m| self.member(m))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TypeDecl { name, members })
    }

    fn member(&self, p: Pair<Rule>) -> Result<Member, Diagnostic> {
        let mut pairs = p.into_inner();
        let Some(inner) = pairs.next() else {
            return Err(malformed("end of input", Rule::member));
        };
        match inner.as_rule() {
            Rule::const_decl => self.const_decl(inner).map(Member::Const),
            Rule::fn_decl => self.fn_decl(inner).map(Member::Fn),
            other => Err(malformed(&format!("{:?}", other), Rule::member)),
        }
    }

    /// Consumes the optional `pub` marker at the front of a declaration.
    fn visibility(&self, pairs: &mut Pairs<Rule>) -> bool {
        let public = pairs
            .peek()
            .is_some_and(|p| p.as_rule() == Rule::visibility);
        if public {
            pairs.next();
        }
        public
    }

    fn const_decl(&self, p: Pair<Rule>) -> Result<ConstDecl, Diagnostic> {
        let mut pairs = p.into_inner();
        let public = self.visibility(&mut pairs);
        let name = self.identifier(next(&mut pairs, Rule::identifier)?);
        let value = self.literal(next(&mut pairs, Rule::literal)?)?;
        Ok(ConstDecl {
            public,
            name,
            value,
        })
    }

    fn fn_decl(&self, p: Pair<Rule>) -> Result<FnDecl, Diagnostic> {
        let mut pairs = p.into_inner();
        let public = self.visibility(&mut pairs);
        let name = self.identifier(next(&mut pairs, Rule::identifier)?);
        let body = self.block(next(&mut pairs, Rule::block)?)?;
        Ok(FnDecl { public, name, body })
    }

    fn block(&self, p: Pair<Rule>) -> Result<Block, Diagnostic> {
        let words = p
            .into_inner()
            .map(|w| self.word(w))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block { words })
    }

    fn word(&self, p: Pair<Rule>) -> Result<Word, Diagnostic> {
        let mut pairs = p.into_inner();
        let Some(inner) = pairs.next() else {
            return Err(malformed("end of input", Rule::word));
        };
        match inner.as_rule() {
            Rule::literal => self.literal(inner).map(Word::Literal),
            Rule::path => Ok(Word::Path(self.path(inner))),
            Rule::if_word => {
                let location = location(&inner);
                let mut blocks = inner.into_inner();
                let then = self.block(next(&mut blocks, Rule::block)?)?;
                let otherwise = match blocks.next() {
                    Some(b) => Some(self.block(b)?),
                    None => None,
                };
                Ok(Word::If {
                    location,
                    then,
                    otherwise,
                })
            }
            other => Err(malformed(&format!("{:?}", other), Rule::word)),
        }
    }

    fn literal(&self, p: Pair<Rule>) -> Result<Literal, Diagnostic> {
        let location = location(&p);
        let mut pairs = p.into_inner();
        let Some(inner) = pairs.next() else {
            return Err(malformed("end of input", Rule::literal));
        };
        let value = match inner.as_rule() {
            Rule::int => inner.as_str().parse().map(PrimitiveValue::Int).map_err(|_| {
                Diagnostic::error(format!(
                    "integer literal {} does not fit in 64 bits",
                    inner.as_str()
                ))
                .at(location)
            })?,
            Rule::bool => PrimitiveValue::Bool(inner.as_str() == "true"),
            Rule::string => {
                let mut parts = inner.into_inner();
                let raw = next(&mut parts, Rule::string_inner)?;
                PrimitiveValue::Str(unescape(raw.as_str()))
            }
            other => return Err(malformed(&format!("{:?}", other), Rule::literal)),
        };
        Ok(Literal { value, location })
    }

    fn path(&self, p: Pair<Rule>) -> Path {
        let location = location(&p);
        let segments = p.into_inner().map(|s| s.as_str().to_owned()).collect();
        Path { segments, location }
    }

    fn identifier(&self, p: Pair<Rule>) -> Identifier {
        Identifier {
            name: p.as_str().to_owned(),
            location: location(&p),
        }
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_types_members_and_words() {
        let file = parse(
            r#"
            // greeting module
            type Greeting {
                pub const hello = "Hello ";
                fn helper { 1 -2 Int.add true if { "a" } else { "b" } Console.writeln }
                pub fn greet { hello Console.write }
            }
            "#,
        )
        .unwrap();

        assert_eq!(file.types.len(), 1);
        let ty = &file.types[0];
        assert_eq!(ty.name.name, "Greeting");
        assert_eq!(ty.members.len(), 3);

        let Member::Const(hello) = &ty.members[0] else {
            panic!("expected const")
        };
        assert!(hello.public);
        assert_eq!(hello.value.value, PrimitiveValue::Str("Hello ".into()));

        let Member::Fn(helper) = &ty.members[1] else {
            panic!("expected fn")
        };
        assert!(!helper.public);
        assert_eq!(helper.body.words.len(), 6);
        assert!(matches!(
            &helper.body.words[1],
            Word::Literal(Literal {
                value: PrimitiveValue::Int(-2),
                ..
            })
        ));
        let Word::Path(add) = &helper.body.words[2] else {
            panic!("expected path")
        };
        assert_eq!(add.segments, vec!["Int", "add"]);
        assert!(matches!(
            &helper.body.words[4],
            Word::If {
                otherwise: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn string_escapes_are_decoded() {
        let file = parse(r#"type T { const s = "a\"b\\c\nd\t"; }"#).unwrap();
        let Member::Const(c) = &file.types[0].members[0] else {
            panic!("expected const")
        };
        assert_eq!(c.value.value, PrimitiveValue::Str("a\"b\\c\nd\t".into()));
    }

    #[test]
    fn syntax_errors_carry_a_location() {
        let err = parse("type T {\n  fn broken { \"unterminated }\n}").unwrap_err();
        assert!(err.is_error());
        assert!(err.message.starts_with("syntax error"));
        assert!(err.location.is_some());
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert!(parse("type if { }").is_err());
        // but identifiers may start with a keyword
        assert!(parse("type types { fn iffy { } }").is_ok());
    }

    #[test]
    fn oversized_integers_are_rejected() {
        let err = parse("type T { const big = 99999999999999999999; }").unwrap_err();
        assert!(err.message.contains("does not fit"));
        assert_eq!(err.location, Some(Location { line: 1, col: 22 }));
    }
}
