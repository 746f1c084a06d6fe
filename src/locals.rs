//! Request-scoped typed storage.
//!
//! Middleware writes values here; later middleware and the terminal handler
//! read them back. Each lookup names the type it expects, so a missing key and
//! a value stored under a different type are both reported as a
//! [`LocalError`] instead of silently yielding nothing.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;

use crate::error::LocalError;

/// String-keyed values living for exactly one request.
#[derive(Default)]
pub struct Locals {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing whatever was there.
    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Borrows the value stored under `key` as a `T`.
    ///
    /// ```rust
    /// use trellis::Locals;
    ///
    /// let mut locals = Locals::new();
    /// locals.insert("id", 1_i64);
    /// assert_eq!(locals.get::<i64>("id"), Ok(&1));
    /// assert!(locals.get::<String>("id").is_err());
    /// ```
    pub fn get<T: Any>(&self, key: &str) -> Result<&T, LocalError> {
        let value = self.values.get(key).ok_or_else(|| missing(key))?;
        value.downcast_ref::<T>().ok_or_else(|| mismatch::<T>(key))
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Result<&mut T, LocalError> {
        let value = self.values.get_mut(key).ok_or_else(|| missing(key))?;
        value.downcast_mut::<T>().ok_or_else(|| mismatch::<T>(key))
    }

    /// Takes the value out. A type mismatch leaves the stored value in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Result<T, LocalError> {
        match self.values.get(key) {
            None => return Err(missing(key)),
            Some(value) if !value.is::<T>() => return Err(mismatch::<T>(key)),
            Some(_) => {}
        }
        self.values
            .remove(key)
            .and_then(|value| value.downcast::<T>().ok())
            .map(|boxed| *boxed)
            .ok_or_else(|| missing(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Locals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

fn missing(key: &str) -> LocalError {
    LocalError::Missing { key: key.to_owned() }
}

fn mismatch<T>(key: &str) -> LocalError {
    LocalError::TypeMismatch { key: key.to_owned(), expected: type_name::<T>() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_roundtrip() {
        let mut locals = Locals::new();
        locals.insert("id", 1_i64);
        locals.insert("name", String::from("mid Man"));

        assert_eq!(locals.get::<i64>("id"), Ok(&1));
        assert_eq!(locals.get::<String>("name").map(String::as_str), Ok("mid Man"));
        assert_eq!(locals.len(), 2);
    }

    #[test]
    fn missing_and_mismatch_are_distinct() {
        let mut locals = Locals::new();
        locals.insert("name", "mid Man");

        assert_eq!(
            locals.get::<String>("name"),
            Err(LocalError::TypeMismatch {
                key: "name".into(),
                expected: type_name::<String>(),
            }),
        );
        assert_eq!(locals.get::<i64>("id"), Err(LocalError::Missing { key: "id".into() }));
    }

    #[test]
    fn remove_keeps_value_on_mismatch() {
        let mut locals = Locals::new();
        locals.insert("n", 7_u8);

        assert!(locals.remove::<u16>("n").is_err());
        assert!(locals.contains_key("n"));
        assert_eq!(locals.remove::<u8>("n"), Ok(7));
        assert!(locals.is_empty());
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut locals = Locals::new();
        locals.insert("hits", 1_u32);
        *locals.get_mut::<u32>("hits").unwrap() += 1;
        assert_eq!(locals.get::<u32>("hits"), Ok(&2));
    }
}
