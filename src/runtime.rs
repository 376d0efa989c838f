//! The machine-level object model shared by the compiler and generated code.
//!
//! Every runtime value is one 64-bit [`Word`]:
//!
//! - `0` is nil
//! - a word with the low bit set is a fixnum, `(n << 1) | 1`
//! - any other word points to a word-aligned object whose first word is a [`Tag`]
//!
//! Function objects are laid out as
//!
//! ```text
//! offset  0: Tag::Function
//! offset  8: entrypoint
//! offset 16: arity (including the closure argument)
//! offset 24: captured slot 0
//! offset 32: captured slot 1
//! ...
//! ```
//!
//! Objects are never freed. Everything here leaks until the process exits.
use core::fmt;
use std::{alloc::Layout, cell::Cell};

use crate::value::{list, Closure, Fixnum, Symbol, Value};

pub const WORD_SIZE: usize = 8;
pub const FUNCTION_TAG_OFFSET: i32 = 0;
pub const FUNCTION_ENTRYPOINT_OFFSET: i32 = 8;
pub const FUNCTION_ARITY_OFFSET: i32 = 16;
pub const FUNCTION_HEADER_SIZE: usize = 3 * WORD_SIZE;

/// Byte offset of captured slot `index` inside a function object.
pub fn closure_slot_offset(index: usize) -> usize {
    FUNCTION_HEADER_SIZE + index * WORD_SIZE
}

/// A tagged machine word, exactly what generated code passes around.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Word(u64);

impl Word {
    pub const NIL: Word = Word(0);

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn is_fixnum(self) -> bool {
        self.0 & 1 == 1
    }

    fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as u64)
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({:#018x})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Tag {
    Boolean = 2,
    Character = 4,
    Symbol = 6,
    Number = 8,
    Cons = 10,
    Function = 12,
}

impl TryFrom<u64> for Tag {
    type Error = DecodeError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            2 => Tag::Boolean,
            4 => Tag::Character,
            6 => Tag::Symbol,
            8 => Tag::Number,
            10 => Tag::Cons,
            12 => Tag::Function,
            tag => Err(DecodeError::UnknownTag(tag))?,
        })
    }
}

#[repr(C)]
struct BooleanObject {
    tag: u64,
    value: u64,
}

#[repr(C)]
struct CharacterObject {
    tag: u64,
    codepoint: u64,
}

#[repr(C)]
struct SymbolObject {
    tag: u64,
    key: u64,
}

#[repr(C)]
struct NumberObject {
    tag: u64,
    value: i64,
}

#[repr(C)]
struct ConsObject {
    tag: u64,
    head: Word,
    tail: Word,
}

#[repr(C)]
struct FunctionHeader {
    tag: u64,
    entrypoint: u64,
    arity: u64,
}

// The two canonical booleans. Their addresses are their identity.
static TRUE: BooleanObject = BooleanObject {
    tag: Tag::Boolean as u64,
    value: 1,
};
static FALSE: BooleanObject = BooleanObject {
    tag: Tag::Boolean as u64,
    value: 0,
};

pub fn true_word() -> Word {
    Word::from_ptr(&TRUE)
}

pub fn false_word() -> Word {
    Word::from_ptr(&FALSE)
}

fn leak<T>(object: T) -> Word {
    // Box respects the 8-byte alignment of the repr(C) objects, which keeps
    // the low bit clear.
    Word::from_ptr(Box::into_raw(Box::new(object)))
}

/// Heap allocation entry point for generated code.
///
/// Returns `size` bytes aligned to a word. The memory is never freed.
pub extern "C" fn imp_alloc(size: u64) -> *mut u8 {
    let size = usize::try_from(size).unwrap_or(usize::MAX).max(WORD_SIZE);
    let Ok(layout) = Layout::from_size_align(size, WORD_SIZE) else {
        return std::ptr::null_mut();
    };
    // SAFETY: layout has a non-zero size
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        std::alloc::handle_alloc_error(layout);
    }
    ptr
}

/// Runtime failures detected by generated code.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Fault {
    #[error("division by zero")]
    DivisionByZero = 1,
    #[error("attempted to call a value that is not a function")]
    NotCallable = 2,
    #[error("function called with the wrong number of arguments")]
    ArityMismatch = 3,
    #[error("arithmetic on a value that is not a fixnum")]
    NotAFixnum = 4,
}

impl Fault {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::DivisionByZero),
            2 => Some(Self::NotCallable),
            3 => Some(Self::ArityMismatch),
            4 => Some(Self::NotAFixnum),
            _ => None,
        }
    }
}

thread_local! {
    static FAULT: Cell<u64> = const { Cell::new(0) };
}

/// Fault entry point for generated code. Only the first fault of a run is kept.
pub extern "C" fn imp_fault(code: u64) {
    FAULT.with(|fault| {
        if fault.get() == 0 {
            fault.set(code);
        }
    });
}

pub(crate) fn clear_fault() {
    FAULT.with(|fault| fault.set(0));
}

pub(crate) fn take_fault() -> Option<Fault> {
    FAULT.with(|fault| Fault::from_code(fault.replace(0)))
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("compiler handle {0} has no runtime representation")]
    Handle(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unknown object tag {0:#x}")]
    UnknownTag(u64),
    #[error("misaligned object reference {0:#x}")]
    Misaligned(u64),
    #[error("invalid Unicode codepoint: {0}")]
    InvalidCodepoint(u64),
    #[error("unknown symbol key {0}")]
    UnknownSymbol(u64),
}

/// Builds the runtime representation of `value`, allocating (and leaking) any
/// objects it needs.
pub fn encode(value: &Value) -> Result<Word, EncodeError> {
    Ok(match value {
        Value::Nil => Word::NIL,
        Value::Boolean(true) => true_word(),
        Value::Boolean(false) => false_word(),
        Value::Character(c) => leak(CharacterObject {
            tag: Tag::Character as u64,
            codepoint: u64::from(*c),
        }),
        Value::Symbol(sym) => leak(SymbolObject {
            tag: Tag::Symbol as u64,
            key: sym.key(),
        }),
        Value::Number(n) => leak(NumberObject {
            tag: Tag::Number as u64,
            value: *n,
        }),
        Value::Fixnum(fix) => Word(fix.encode()),
        Value::Cons(cell) => leak(ConsObject {
            tag: Tag::Cons as u64,
            head: encode(cell.head())?,
            tail: encode(cell.tail())?,
        }),
        Value::Function(closure) => Word(closure.address as u64),
        Value::Pointer(handle) => Err(EncodeError::Handle(handle.to_string()))?,
    })
}

/// Reads a runtime word back into a [`Value`].
///
/// # Safety
///
/// `word` must be nil, a fixnum, or a reference produced by [`encode`],
/// [`imp_alloc`]-backed generated code, or one of the boolean singletons.
pub unsafe fn decode(word: Word) -> Result<Value, DecodeError> {
    if word == Word::NIL {
        return Ok(Value::Nil);
    }
    if let Some(fix) = Fixnum::decode(word.0) {
        return Ok(Value::Fixnum(fix));
    }
    if word.0 % WORD_SIZE as u64 != 0 {
        return Err(DecodeError::Misaligned(word.0));
    }

    let tag = unsafe { *(word.0 as *const u64) };
    Ok(match Tag::try_from(tag)? {
        Tag::Boolean => {
            let object = unsafe { &*(word.0 as *const BooleanObject) };
            Value::Boolean(object.value != 0)
        }
        Tag::Character => {
            let object = unsafe { &*(word.0 as *const CharacterObject) };
            u32::try_from(object.codepoint)
                .ok()
                .and_then(char::from_u32)
                .map(Value::Character)
                .ok_or(DecodeError::InvalidCodepoint(object.codepoint))?
        }
        Tag::Symbol => {
            let object = unsafe { &*(word.0 as *const SymbolObject) };
            Symbol::from_key(object.key)
                .map(Value::Symbol)
                .ok_or(DecodeError::UnknownSymbol(object.key))?
        }
        Tag::Number => {
            let object = unsafe { &*(word.0 as *const NumberObject) };
            Value::Number(object.value)
        }
        Tag::Cons => {
            let object = unsafe { &*(word.0 as *const ConsObject) };
            let head = unsafe { decode(object.head)? };
            let tail = unsafe { decode(object.tail)? };
            list::cons(head, tail)
        }
        Tag::Function => {
            let header = unsafe { &*(word.0 as *const FunctionHeader) };
            Value::Function(Closure {
                address: word.0 as usize,
                entrypoint: header.entrypoint as usize,
                arity: header.arity as usize,
            })
        }
    })
}
