//! A tiny S-expression language compiled straight to native code.
//!
//! Forms are read into [`Value`]s, compiled with Cranelift into functions that
//! work on tagged machine words, and run in-process. `fn` forms become real
//! closures: heap objects holding an entrypoint and the values the function
//! captured when the object was built.
//!
//! ```no_run
//! use imp::{CompilerOptions, Jit};
//!
//! let mut jit = Jit::new(CompilerOptions::default())?;
//! let value = jit.eval_str("(let (x 3) ((fn (y) (+ x y)) 4))")?;
//! assert_eq!(value.to_string(), "7");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod compiler;
pub mod eval;
pub mod lexer;
pub mod reader;
pub mod runtime;
pub mod value;

pub use compiler::{Compilation, CompileError, CompilerOptions, FunctionInfo, Jit};
pub use eval::EvalError;
pub use reader::{read, ReadError, Reader};
pub use runtime::Fault;
pub use value::Value;
