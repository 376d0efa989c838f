use core::fmt;
use std::sync::LazyLock;

use lasso::{Key, Spur, ThreadedRodeo};

// Symbols outlive every compilation (native symbol objects store the key), so the
// interner is process-wide and never shrinks.
static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// An interned name. Two symbols are equal exactly when their names are.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(Spur);

impl Symbol {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(INTERNER.get_or_intern(name.as_ref()))
    }

    pub fn as_str(self) -> &'static str {
        INTERNER.resolve(&self.0)
    }

    /// The key stored in native symbol objects.
    pub(crate) fn key(self) -> u64 {
        self.0.into_usize() as u64
    }

    /// Recovers a symbol from a native key, `None` if the key was never handed out.
    pub(crate) fn from_key(key: u64) -> Option<Self> {
        let spur = Spur::try_from_usize(usize::try_from(key).ok()?)?;
        INTERNER.contains_key(&spur).then_some(Self(spur))
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
