//! Representation of imp values
//!
//! This is the host-side view of everything the compiler reads, builds and
//! returns. The generated code never sees a [`Value`] directly: it works on
//! tagged machine words (see [`crate::runtime`]), and values cross that boundary
//! only through [`crate::runtime::encode`] and [`crate::runtime::decode`].
use core::fmt;
use std::rc::Rc;

use arbitrary::{Arbitrary, Unstructured};
use cranelift_codegen::ir;

pub use list::{Cons, ListError, ListIter};
pub use symbol::Symbol;

pub mod list;
mod symbol;

// Closed set of everything that can be read, compiled or returned.
#[derive(Clone, Default, Debug)]
pub enum Value {
    // Written as `nil` or `()`, also terminates every proper list
    #[default]
    Nil,
    Boolean(bool),
    Character(char),
    Symbol(Symbol),
    // Boxed integer, never produced by the reader
    Number(i64),
    // Immediate integer, lives in the tagged word itself
    Fixnum(Fixnum),
    // An in-flight value of the function being compiled. Only ever stored in
    // compiler environments.
    Pointer(Handle),
    Cons(Rc<Cons>),
    Function(Closure),
}

impl Value {
    pub fn symbol(name: impl AsRef<str>) -> Self {
        Self::Symbol(Symbol::new(name))
    }

    /// Builds a fixnum, returns `None` when `value` does not fit in 63 bits.
    pub fn fixnum(value: i64) -> Option<Self> {
        Fixnum::new(value).map(Self::Fixnum)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Self::Symbol(sym) => Some(*sym),
            _ => None,
        }
    }

    pub fn as_fixnum(&self) -> Option<i64> {
        match self {
            Self::Fixnum(fix) => Some(fix.get()),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Closure> {
        match self {
            Self::Function(closure) => Some(closure),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Character(_) => "character",
            Self::Symbol(_) => "symbol",
            Self::Number(_) => "number",
            Self::Fixnum(_) => "fixnum",
            Self::Pointer(_) => "pointer",
            Self::Cons(_) => "cons",
            Self::Function(_) => "function",
        }
    }
}

// Structural for symbols, numbers, characters and conses; identity for
// everything else.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Character(a), Self::Character(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Fixnum(a), Self::Fixnum(b)) => a == b,
            (Self::Pointer(a), Self::Pointer(b)) => a == b,
            (Self::Cons(a), Self::Cons(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Function(a), Self::Function(b)) => a.address == b.address,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<char> for Value {
    fn from(value: char) -> Self {
        Self::Character(value)
    }
}

impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Self::Symbol(value)
    }
}

impl From<Fixnum> for Value {
    fn from(value: Fixnum) -> Self {
        Self::Fixnum(value)
    }
}

impl From<Handle> for Value {
    fn from(value: Handle) -> Self {
        Self::Pointer(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Character(c) => write!(f, "\\{c}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Fixnum(n) => write!(f, "{n}"),
            Value::Pointer(handle) => write!(f, "#pointer {handle}"),
            Value::Cons(cell) => {
                write!(f, "(")?;
                write!(f, "{}", cell.head())?;
                let mut tail = cell.tail();
                loop {
                    match tail {
                        Value::Nil => break,
                        Value::Cons(next) => {
                            write!(f, " {}", next.head())?;
                            tail = next.tail();
                        }
                        improper => {
                            write!(f, " . {improper}")?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Value::Function(closure) => write!(f, "{closure}"),
        }
    }
}

/// An integer small enough to be stored inline in a tagged word.
///
/// The low bit of a word is `1` for fixnums and `0` for everything else, so a
/// fixnum only has 63 bits to work with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixnum(i64);

impl Fixnum {
    pub const MIN: i64 = i64::MIN >> 1;
    pub const MAX: i64 = i64::MAX >> 1;

    pub fn new(value: i64) -> Option<Self> {
        (Self::MIN..=Self::MAX)
            .contains(&value)
            .then_some(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// `(value << 1) | 1`
    pub fn encode(self) -> u64 {
        (self.0.wrapping_shl(1) | 1) as u64
    }

    /// Arithmetic shift back down. Fails for words without the fixnum tag.
    pub fn decode(bits: u64) -> Option<Self> {
        (bits & 1 == 1).then_some(Self((bits as i64) >> 1))
    }
}

impl fmt::Display for Fixnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'a> Arbitrary<'a> for Fixnum {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self(u.int_in_range(Self::MIN..=Self::MAX)?))
    }
}

/// Wraps a value of the function currently being emitted, so it can sit in an
/// environment list like any other binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub(crate) ir::Value);

impl Handle {
    pub fn new(value: ir::Value) -> Self {
        Self(value)
    }

    pub fn get(self) -> ir::Value {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A closure object produced by running compiled code.
///
/// Only the header is mirrored here; captured slots stay in native memory,
/// which is never reclaimed.
#[derive(Debug, Clone, Copy)]
pub struct Closure {
    pub(crate) address: usize,
    pub(crate) entrypoint: usize,
    pub(crate) arity: usize,
}

impl Closure {
    pub fn entrypoint(&self) -> *const u8 {
        self.entrypoint as *const u8
    }

    /// Declared parameter count, including the implicit closure argument.
    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#fn {{:entrypoint {:#x} :arity {}}}",
            self.entrypoint, self.arity
        )
    }
}
