use std::io::Write;

use crate::{
    artifact::Artifact,
    bytecode::{Library, Native, Sentence, Symbol, Word, FOUNDATION},
    unit::OutputKind,
    vm::{ConversionError, Stack},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not enough arguments: need {needed}, found {found}")]
    InsufficientArguments { needed: usize, found: usize },

    #[error("while converting argument {index}: {source}")]
    InvalidArgument {
        index: usize,
        source: ConversionError,
    },

    #[error("division by zero")]
    DivideByZero,

    #[error("integer overflow in {op}")]
    Overflow { op: &'static str },

    #[error("{0}")]
    Failed(String),

    #[error("assertion failed")]
    AssertionFailed,

    #[error("writing output: {0}")]
    Output(#[from] std::io::Error),
}

pub fn foundation() -> Library {
    let mut lib = Library::new(FOUNDATION, OutputKind::Module);
    for native in Native::ALL {
        let sentence = lib.sentences.push_and_get_key(Sentence {
            words: vec![Word::Native(*native)],
        });
        lib.symbols.insert(
            native.name().to_owned(),
            Symbol {
                sentence,
                public: true,
            },
        );
    }
    lib
}

pub fn foundation_artifact() -> Artifact {
    let bytes = foundation()
        .encode()
        .expect("foundation library is plain data and always serializes");
    Artifact::new(FOUNDATION, OutputKind::Module, bytes)
}

pub struct Runtime<'o> {
    output: &'o mut dyn Write,
}

impl<'o> Runtime<'o> {
    pub fn new(output: &'o mut dyn Write) -> Self {
        Self { output }
    }

    pub fn call(&mut self, native: Native, stack: &mut Stack) -> Result<(), Error> {
        match native {
            Native::ConsoleWrite => {
                stack.check_size(1)?;
                let v = stack.pop_any(0)?;
                write!(self.output, "{}", v)?;
            }
            Native::ConsoleWriteln => {
                stack.check_size(1)?;
                let v = stack.pop_any(0)?;
                writeln!(self.output, "{}", v)?;
            }
            Native::StringConcat => {
                stack.check_size(2)?;
                let b: String = stack.pop_arg(1)?;
                let a: String = stack.pop_arg(0)?;
                stack.push(a + &b);
            }
            Native::StringFrom => {
                stack.check_size(1)?;
                let v = stack.pop_any(0)?;
                stack.push(v.to_string());
            }
            Native::StringLength => {
                stack.check_size(1)?;
                let s: String = stack.pop_arg(0)?;
                stack.push(s.chars().count() as i64);
            }
            Native::IntAdd => int_op(stack, "Int.add", i64::checked_add)?,
            Native::IntSub => int_op(stack, "Int.sub", i64::checked_sub)?,
            Native::IntMul => int_op(stack, "Int.mul", i64::checked_mul)?,
            Native::IntDiv => {
                stack.check_size(2)?;
                let b: i64 = stack.pop_arg(1)?;
                let a: i64 = stack.pop_arg(0)?;
                if b == 0 {
                    return Err(Error::DivideByZero);
                }
                let q = a.checked_div(b).ok_or(Error::Overflow { op: "Int.div" })?;
                stack.push(q);
            }
            Native::IntEq => {
                stack.check_size(2)?;
                let b: i64 = stack.pop_arg(1)?;
                let a: i64 = stack.pop_arg(0)?;
                stack.push(a == b);
            }
            Native::IntLt => {
                stack.check_size(2)?;
                let b: i64 = stack.pop_arg(1)?;
                let a: i64 = stack.pop_arg(0)?;
                stack.push(a < b);
            }
            Native::BoolNot => {
                stack.check_size(1)?;
                let a: bool = stack.pop_arg(0)?;
                stack.push(!a);
            }
            Native::StackDup => {
                stack.check_size(1)?;
                let v = stack.pop_any(0)?;
                stack.push(v.clone());
                stack.push(v);
            }
            Native::StackDrop => {
                stack.check_size(1)?;
                stack.pop_any(0)?;
            }
            Native::StackSwap => {
                stack.check_size(2)?;
                let b = stack.pop_any(1)?;
                let a = stack.pop_any(0)?;
                stack.push(b);
                stack.push(a);
            }
            Native::RuntimeFail => {
                let message = match stack.pop() {
                    Some(v) => v.to_string(),
                    None => "explicit failure".to_owned(),
                };
                return Err(Error::Failed(message));
            }
            Native::RuntimeAssert => {
                stack.check_size(1)?;
                let cond: bool = stack.pop_arg(0)?;
                if !cond {
                    return Err(Error::AssertionFailed);
                }
            }
        }
        Ok(())
    }
}

fn int_op(
    stack: &mut Stack,
    op: &'static str,
    f: fn(i64, i64) -> Option<i64>,
) -> Result<(), Error> {
    stack.check_size(2)?;
    let b: i64 = stack.pop_arg(1)?;
    let a: i64 = stack.pop_arg(0)?;
    let result = f(a, b).ok_or(Error::Overflow { op })?;
    stack.push(result);
    Ok(())
}
