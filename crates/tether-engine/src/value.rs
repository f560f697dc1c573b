//! Script values
//!
//! Scalars and strings are immediate values copied between host and engine.
//! Objects live in the isolate's heap and are referred to by `ObjectId`,
//! a generational handle: the slot index plus the generation the slot had
//! when the object was allocated. A reclaimed slot bumps its generation,
//! so handles to dead objects fail lookups instead of aliasing new ones.

use std::fmt;
use std::sync::Arc;

/// Generational handle to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the owning heap
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation this handle was minted against
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

/// A script-side value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value
    Undefined,
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// Double-precision float
    Number(f64),
    /// Immutable string (immediate, not heap-managed)
    Str(Arc<str>),
    /// Reference to a heap object
    Object(ObjectId),
}

impl Value {
    /// Wrap a string slice
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// True for `Undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// True for `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for `Object`
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Extract a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract a float, widening integers
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Extract a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Extract an object handle
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_identity() {
        let a = ObjectId::new(3, 0);
        let b = ObjectId::new(3, 0);
        let c = ObjectId::new(3, 1);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.index(), c.index());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::from(42i64).as_int(), Some(42));
        assert_eq!(Value::from(42i64).as_number(), Some(42.0));
        assert_eq!(Value::from(1.5).as_number(), Some(1.5));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert!(Value::Null.is_null());
        assert!(Value::Undefined.is_undefined());
        assert_eq!(Value::Null.as_int(), None);
    }

    #[test]
    fn test_value_object_roundtrip() {
        let id = ObjectId::new(7, 2);
        let v = Value::from(id);
        assert!(v.is_object());
        assert_eq!(v.as_object(), Some(id));
    }
}
