//! Running compiled code.
//!
//! Generated functions report failures through [`crate::runtime::imp_fault`]
//! and bail out with nil. Every entry into generated code from here clears the
//! fault state first and checks it afterwards, so a faulted run never decodes a
//! result.
use crate::{
    compiler::{CompileError, Compilation, Jit},
    reader::{self, ReadError},
    runtime::{self, DecodeError, EncodeError, Fault, Word},
    value::{Closure, Value},
};

/// Most arguments [`Closure::apply`] can pass.
pub const MAX_HOST_ARGS: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum EvalError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("runtime fault: {0}")]
    Fault(#[from] Fault),
    #[error("cannot read result: {0}")]
    Decode(#[from] DecodeError),
    #[error("cannot pass argument: {0}")]
    Encode(#[from] EncodeError),
    #[error("function takes {expected} arguments, got {got}")]
    Arity { expected: usize, got: usize },
    #[error("cannot pass more than {MAX_HOST_ARGS} arguments from the host, got {0}")]
    TooManyArguments(usize),
}

// Runs `call` with a clean fault state and decodes what it returned.
fn invoke(call: impl FnOnce() -> Word) -> Result<Value, EvalError> {
    runtime::clear_fault();
    let word = call();
    if let Some(fault) = runtime::take_fault() {
        Err(fault)?
    }
    // SAFETY: a run that did not fault returns a word built by generated code or
    // by `encode`
    Ok(unsafe { runtime::decode(word)? })
}

impl Compilation {
    /// Calls the compiled top-level function once.
    pub fn run(&self) -> Result<Value, EvalError> {
        // SAFETY: the top-level function is finalized with a `() -> word` signature
        let entry: extern "C" fn() -> Word = unsafe { std::mem::transmute(self.entrypoint) };
        invoke(|| entry())
    }
}

impl Jit {
    /// Compiles and runs `form`.
    pub fn eval(&mut self, form: &Value) -> Result<Value, EvalError> {
        Ok(self.compile(form)?.run()?)
    }

    /// Reads the first form of `source`, then compiles and runs it.
    pub fn eval_str(&mut self, source: &str) -> Result<Value, EvalError> {
        let form = reader::read(source)?;
        self.eval(&form)
    }
}

type Entry0 = extern "C" fn(Word) -> Word;
type Entry1 = extern "C" fn(Word, Word) -> Word;
type Entry2 = extern "C" fn(Word, Word, Word) -> Word;
type Entry3 = extern "C" fn(Word, Word, Word, Word) -> Word;
type Entry4 = extern "C" fn(Word, Word, Word, Word, Word) -> Word;

impl Closure {
    /// Calls this closure from Rust.
    ///
    /// `args` does not include the closure argument, so it must hold one less
    /// value than [`Closure::arity`].
    pub fn apply(&self, args: &[Value]) -> Result<Value, EvalError> {
        let expected = self.arity().saturating_sub(1);
        if args.len() != expected {
            Err(EvalError::Arity {
                expected,
                got: args.len(),
            })?
        }
        let args = args
            .iter()
            .map(runtime::encode)
            .collect::<Result<Vec<_>, _>>()?;
        let this = Word::from_bits(self.address as u64);
        let entry = self.entrypoint();

        // SAFETY: every function object's entrypoint takes `arity` words and
        // returns one, and the arity was checked above
        unsafe {
            match args[..] {
                [] => {
                    let f: Entry0 = std::mem::transmute(entry);
                    invoke(|| f(this))
                }
                [a] => {
                    let f: Entry1 = std::mem::transmute(entry);
                    invoke(|| f(this, a))
                }
                [a, b] => {
                    let f: Entry2 = std::mem::transmute(entry);
                    invoke(|| f(this, a, b))
                }
                [a, b, c] => {
                    let f: Entry3 = std::mem::transmute(entry);
                    invoke(|| f(this, a, b, c))
                }
                [a, b, c, d] => {
                    let f: Entry4 = std::mem::transmute(entry);
                    invoke(|| f(this, a, b, c, d))
                }
                _ => Err(EvalError::TooManyArguments(args.len())),
            }
        }
    }
}
