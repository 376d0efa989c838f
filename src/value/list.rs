//! Immutable linked lists built from [`Cons`] cells.
//!
//! The same lists carry parsed syntax and the compiler's lexical environment.
//! Nothing here mutates a cell: extending a list always allocates a new cell in
//! front, and tails are shared through [`Rc`].
use std::rc::Rc;

use super::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Cons {
    head: Value,
    tail: Value,
}

impl Cons {
    pub fn head(&self) -> &Value {
        &self.head
    }

    pub fn tail(&self) -> &Value {
        &self.tail
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ListError {
    #[error("expected a list, found {0}")]
    NotAList(&'static str),
    #[error("improper list: tail is a {0}")]
    Improper(&'static str),
    #[error("list index {index} out of bounds (length {length})")]
    OutOfBounds { index: usize, length: usize },
}

pub fn cons(head: Value, tail: Value) -> Value {
    Value::Cons(Rc::new(Cons { head, tail }))
}

/// `(x y)`
pub fn pair(x: Value, y: Value) -> Value {
    cons(x, cons(y, Value::Nil))
}

/// Builds a proper list holding `items` in order.
pub fn list<I>(items: I) -> Value
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: DoubleEndedIterator,
{
    items
        .into_iter()
        .rev()
        .fold(Value::Nil, |tail, head| cons(head, tail))
}

/// Prepends the binding `(key value)` to the association list `map`.
pub fn assoc(map: &Value, key: Value, value: Value) -> Value {
    cons(pair(key, value), map.clone())
}

impl Value {
    /// Iterates the elements of a list. An improper tail shows up as a final error.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { rest: Some(self) }
    }

    pub fn first(&self) -> Result<&Value, ListError> {
        match self {
            Value::Cons(cell) => Ok(cell.head()),
            other => Err(ListError::NotAList(other.type_name())),
        }
    }

    pub fn rest(&self) -> Result<&Value, ListError> {
        match self {
            Value::Cons(cell) => Ok(cell.tail()),
            other => Err(ListError::NotAList(other.type_name())),
        }
    }

    pub fn second(&self) -> Result<&Value, ListError> {
        self.nth(1)
    }

    pub fn nth(&self, index: usize) -> Result<&Value, ListError> {
        let mut length = 0;
        for item in self.iter() {
            let item = item?;
            if length == index {
                return Ok(item);
            }
            length += 1;
        }
        Err(ListError::OutOfBounds { index, length })
    }

    /// Number of elements. Fails loudly on an improper tail instead of counting
    /// whatever is hanging off the end.
    pub fn count(&self) -> Result<usize, ListError> {
        self.iter().try_fold(0, |n, item| item.map(|_| n + 1))
    }

    /// Collects the elements of a proper list.
    pub fn elements(&self) -> Result<Vec<&Value>, ListError> {
        self.iter().collect()
    }
}

pub struct ListIter<'a> {
    rest: Option<&'a Value>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = Result<&'a Value, ListError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rest.take()? {
            Value::Nil => None,
            Value::Cons(cell) => {
                self.rest = Some(cell.tail());
                Some(Ok(cell.head()))
            }
            other => Some(Err(ListError::Improper(other.type_name()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{assoc, cons, list, pair, ListError};
    use crate::Value;

    fn fix(n: i64) -> Value {
        Value::fixnum(n).unwrap()
    }

    #[test]
    fn accessors() {
        let l = list([fix(1), fix(2), fix(3)]);
        check!(l.first() == Ok(&fix(1)));
        check!(l.second() == Ok(&fix(2)));
        check!(l.nth(2) == Ok(&fix(3)));
        check!(l.count() == Ok(3));
        check!(l.nth(3) == Err(ListError::OutOfBounds { index: 3, length: 3 }));
        check!(Value::Nil.count() == Ok(0));
        check!(fix(1).first() == Err(ListError::NotAList("fixnum")));
    }

    #[test]
    fn improper_lists_fail_loudly() {
        let improper = cons(fix(1), fix(2));
        check!(improper.count() == Err(ListError::Improper("fixnum")));
        check!(improper.second() == Err(ListError::Improper("fixnum")));
        let_assert!(Err(ListError::Improper(_)) = improper.elements());
    }

    #[test]
    fn assoc_prepends_and_shadows() {
        let x = Value::symbol("x");
        let env = assoc(&Value::Nil, x.clone(), fix(1));
        let shadowed = assoc(&env, x.clone(), fix(2));
        check!(env.first() == Ok(&pair(x.clone(), fix(1))));
        check!(shadowed.first() == Ok(&pair(x.clone(), fix(2))));
        check!(shadowed.count() == Ok(2));
        // the older binding is still there, behind the new one
        check!(shadowed.second() == Ok(&pair(x.clone(), fix(1))));
        // old environment is untouched
        check!(env.count() == Ok(1));
    }

    #[test]
    fn pair_is_two_element_list() {
        check!(pair(fix(1), fix(2)) == list([fix(1), fix(2)]));
    }
}
