//! Lexical environments, and the captures they give rise to.
//!
//! An environment is an association list of `(name handle)` pairs, innermost
//! binding first. Entering a function pushes a nil entry, which marks the end of
//! that function's frame: everything before the first marker was bound by the
//! function currently being compiled, everything after it belongs to some
//! enclosing function and has to be reached through the closure object.
use cranelift_codegen::ir;

use crate::value::{list, Handle, ListError, Symbol, Value};

#[derive(Debug, Clone, Default)]
pub struct Environment(Value);

/// Where a name was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Bound in the innermost frame, usable as-is
    Local(Handle),
    /// Bound by an enclosing function, so it must be captured
    Enclosing,
    Unbound,
}

impl Environment {
    pub fn empty() -> Self {
        Self(Value::Nil)
    }

    /// A new environment with `name` bound to `value` in the innermost frame.
    pub fn bind(&self, name: Symbol, value: ir::Value) -> Self {
        Self(list::assoc(
            &self.0,
            Value::Symbol(name),
            Value::Pointer(Handle::new(value)),
        ))
    }

    /// A new environment with an empty innermost frame, for a function body.
    pub fn enter_frame(&self) -> Self {
        Self(list::cons(Value::Nil, self.0.clone()))
    }

    pub fn resolve(&self, name: Symbol) -> Result<Resolution, ListError> {
        let mut entries = self.0.iter();

        for entry in entries.by_ref() {
            let entry = entry?;
            if entry.is_nil() {
                break;
            }
            if entry.first()?.as_symbol() == Some(name) {
                if let Value::Pointer(handle) = entry.second()? {
                    return Ok(Resolution::Local(*handle));
                }
            }
        }

        for entry in entries {
            let entry = entry?;
            if !entry.is_nil() && entry.first()?.as_symbol() == Some(name) {
                return Ok(Resolution::Enclosing);
            }
        }

        Ok(Resolution::Unbound)
    }
}

/// The names a function reads from its enclosing functions, in slot order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSet {
    entries: Vec<Symbol>,
}

impl CaptureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot index of `name`, assigning the next free one on first use.
    pub fn register(&mut self, name: Symbol) -> usize {
        if let Some(index) = self.entries.iter().position(|&e| e == name) {
            index
        } else {
            self.entries.push(name);
            self.entries.len() - 1
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Captured names paired with their slot index
    pub fn iter(&self) -> impl Iterator<Item = (Symbol, usize)> + '_ {
        self.entries.iter().copied().zip(0..)
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use cranelift_codegen::{entity::EntityRef, ir};

    use super::{CaptureSet, Environment, Resolution};
    use crate::value::{Handle, Symbol};

    fn handle(n: usize) -> ir::Value {
        ir::Value::new(n)
    }

    #[test]
    fn empty_environment_binds_nothing() {
        let env = Environment::empty();
        check!(env.resolve(Symbol::new("x")) == Ok(Resolution::Unbound));
    }

    #[test]
    fn innermost_frame_is_local() {
        let x = Symbol::new("x");
        let env = Environment::empty().bind(x, handle(1));
        check!(env.resolve(x) == Ok(Resolution::Local(Handle::new(handle(1)))));
    }

    #[test]
    fn latest_binding_shadows() {
        let x = Symbol::new("x");
        let env = Environment::empty().bind(x, handle(1)).bind(x, handle(2));
        check!(env.resolve(x) == Ok(Resolution::Local(Handle::new(handle(2)))));
    }

    #[test]
    fn outer_frames_are_captured() {
        let x = Symbol::new("x");
        let y = Symbol::new("y");
        let outer = Environment::empty().bind(x, handle(1));
        let inner = outer.enter_frame().bind(y, handle(0));

        check!(inner.resolve(y) == Ok(Resolution::Local(Handle::new(handle(0)))));
        check!(inner.resolve(x) == Ok(Resolution::Enclosing));
        check!(inner.resolve(Symbol::new("z")) == Ok(Resolution::Unbound));

        // markers further out are skipped too
        let innermost = inner.enter_frame();
        check!(innermost.resolve(x) == Ok(Resolution::Enclosing));
        check!(innermost.resolve(y) == Ok(Resolution::Enclosing));
    }

    #[test]
    fn local_binding_beats_enclosing() {
        let x = Symbol::new("x");
        let env = Environment::empty()
            .bind(x, handle(1))
            .enter_frame()
            .bind(x, handle(5));
        check!(env.resolve(x) == Ok(Resolution::Local(Handle::new(handle(5)))));
    }

    #[test]
    fn extending_leaves_original_untouched() {
        let x = Symbol::new("x");
        let base = Environment::empty();
        let _extended = base.bind(x, handle(1));
        check!(base.resolve(x) == Ok(Resolution::Unbound));
    }

    #[test]
    fn capture_slots_are_assigned_in_order() {
        let mut captures = CaptureSet::new();
        check!(captures.is_empty());
        check!(captures.register(Symbol::new("a")) == 0);
        check!(captures.register(Symbol::new("b")) == 1);
        check!(captures.register(Symbol::new("a")) == 0);
        check!(captures.len() == 2);
        check!(
            captures.iter().collect::<Vec<_>>()
                == vec![(Symbol::new("a"), 0), (Symbol::new("b"), 1)]
        );
    }
}
