use crate::{
    bytecode::{Native, SentenceIndex, Word},
    config::ExecutionLimits,
    loader::{BoundModule, ExecutionContext, ModuleIndex, Target},
    runtime::{self, Runtime},
};

mod stack;
mod value;

pub use stack::*;
pub use value::*;

pub struct Vm<'c, 'o> {
    context: &'c ExecutionContext,
    call_stack: Vec<ProgramCounter>,
    stack: Stack,
    runtime: Runtime<'o>,
    limits: ExecutionLimits,
    steps: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramCounter {
    pub module: ModuleIndex,
    pub sentence_idx: SentenceIndex,
    pub word_idx: usize,
}

pub enum StepResult {
    Exit,
    Continue,
}

enum EvalResult {
    Continue,
    Call(Target),
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("{native}: {source}")]
    Native {
        native: &'static str,
        source: runtime::Error,
    },

    #[error("branch on an empty stack")]
    EmptyStack,

    #[error("invalid branch condition: {source}")]
    InvalidBranchCondition { source: ConversionError },

    #[error("call depth limit of {limit} exceeded")]
    CallDepthExceeded { limit: usize },

    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u64 },

    #[error("invalid program: {0}")]
    InvalidProgram(String),
}

/// An [`EvalError`] together with the module that was executing.
#[derive(Debug, thiserror::Error)]
#[error("in {module}: {error}")]
pub struct Fault {
    pub module: String,
    #[source]
    pub error: EvalError,
}

impl<'c, 'o> Vm<'c, 'o> {
    pub fn new(context: &'c ExecutionContext, runtime: Runtime<'o>, limits: ExecutionLimits) -> Self {
        Vm {
            context,
            call_stack: vec![],
            stack: Stack::default(),
            runtime,
            limits,
            steps: 0,
        }
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn into_stack(self) -> Stack {
        self.stack
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn current_word(&self) -> Option<&'c Word> {
        let pc = self.call_stack.last()?;
        self.context
            .module(pc.module)?
            .library
            .sentences
            .get(pc.sentence_idx)?
            .words
            .get(pc.word_idx)
    }

    pub fn jump_to(&mut self, target: Target) -> Result<(), Fault> {
        self.enter(target)
            .map_err(|error| self.fault(target.module, error))
    }

    pub fn run(&mut self) -> Result<(), Fault> {
        while let StepResult::Continue = self.step()? {}
        Ok(())
    }

    pub fn step(&mut self) -> Result<StepResult, Fault> {
        let context = self.context;
        let Some(pc) = self.call_stack.last_mut() else {
            return Ok(StepResult::Exit);
        };
        let module = pc.module;

        self.steps += 1;
        if self.steps > self.limits.max_steps {
            let limit = self.limits.max_steps;
            return Err(self.fault(module, EvalError::StepLimitExceeded { limit }));
        }

        let Some(bound) = context.module(module) else {
            return Err(self.fault(
                module,
                EvalError::InvalidProgram(format!("no module at {:?}", module)),
            ));
        };
        let Some(sentence) = bound.library.sentences.get(pc.sentence_idx) else {
            let msg = format!("no sentence at {:?}", pc.sentence_idx);
            return Err(self.fault(module, EvalError::InvalidProgram(msg)));
        };
        let Some(word) = sentence.words.get(pc.word_idx) else {
            let msg = format!("no word {} in {:?}", pc.word_idx, pc.sentence_idx);
            return Err(self.fault(module, EvalError::InvalidProgram(msg)));
        };

        let res = Self::eval_word(&mut self.stack, &mut self.runtime, module, bound, word);
        pc.word_idx += 1;
        if pc.word_idx == sentence.words.len() {
            self.call_stack.pop();
        }

        match res.map_err(|error| self.fault(module, error))? {
            EvalResult::Call(target) => self.jump_to(target)?,
            EvalResult::Continue => {}
        }
        Ok(StepResult::Continue)
    }

    fn enter(&mut self, target: Target) -> Result<(), EvalError> {
        let words = self
            .context
            .module(target.module)
            .and_then(|m| m.library.sentences.get(target.sentence))
            .map(|s| s.words.len())
            .ok_or_else(|| {
                EvalError::InvalidProgram(format!("no sentence at {:?}", target))
            })?;
        if words == 0 {
            return Ok(());
        }
        if self.call_stack.len() >= self.limits.max_call_depth {
            return Err(EvalError::CallDepthExceeded {
                limit: self.limits.max_call_depth,
            });
        }
        self.call_stack.push(ProgramCounter {
            module: target.module,
            sentence_idx: target.sentence,
            word_idx: 0,
        });
        Ok(())
    }

    fn fault(&self, module: ModuleIndex, error: EvalError) -> Fault {
        let module = self
            .context
            .module(module)
            .map(|m| m.display_name.clone())
            .unwrap_or_else(|| format!("{:?}", module));
        Fault { module, error }
    }

    fn eval_word(
        stack: &mut Stack,
        runtime: &mut Runtime,
        module: ModuleIndex,
        bound: &BoundModule,
        word: &Word,
    ) -> Result<EvalResult, EvalError> {
        match word {
            Word::Push(value) => {
                stack.push(value.clone());
                Ok(EvalResult::Continue)
            }
            Word::Call(sentence) => Ok(EvalResult::Call(Target {
                module,
                sentence: *sentence,
            })),
            Word::CallImport(import) => bound
                .imports
                .get(*import)
                .copied()
                .map(EvalResult::Call)
                .ok_or_else(|| EvalError::InvalidProgram(format!("no import at {:?}", import))),
            Word::Native(native) => {
                call_native(runtime, *native, stack)?;
                Ok(EvalResult::Continue)
            }
            Word::Branch(true_case, false_case) => {
                let cond = stack.pop().ok_or(EvalError::EmptyStack)?;
                let cond: bool = cond
                    .try_into()
                    .map_err(|e| EvalError::InvalidBranchCondition { source: e })?;
                let sentence = if cond { *true_case } else { *false_case };
                Ok(EvalResult::Call(Target { module, sentence }))
            }
        }
    }
}

fn call_native(runtime: &mut Runtime, native: Native, stack: &mut Stack) -> Result<(), EvalError> {
    runtime
        .call(native, stack)
        .map_err(|source| EvalError::Native {
            native: native.name(),
            source,
        })
}
