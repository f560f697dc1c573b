//! Signature descriptors for host-callable bindings
//!
//! A descriptor is a compact string of the form `(si)o`: parameter shape
//! codes between parentheses, followed by exactly one return shape code.
//!
//! | Code | Shape | Admits |
//! |------|--------|--------|
//! | `b` | boolean | `Bool` |
//! | `i` | integer | `Int` |
//! | `n` | number | `Number`, `Int` |
//! | `s` | string | `Str` |
//! | `o` | object | `Object`, `Null` |
//! | `a` | any | every value |
//! | `v` | void | return position only |
//!
//! Descriptors are parsed once at registration time, so a malformed
//! descriptor is rejected before the binding ever becomes callable.

use std::fmt;

use tether_engine::Value;

use crate::error::{BridgeError, BridgeResult};

/// Value shape admitted by one signature position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating-point value (integers widen)
    Number,
    /// String value
    Str,
    /// Object reference (null admitted)
    Object,
    /// Any value
    Any,
    /// No value (return position only)
    Void,
}

impl Shape {
    /// Single-character descriptor code for this shape
    pub fn code(&self) -> char {
        match self {
            Shape::Bool => 'b',
            Shape::Int => 'i',
            Shape::Number => 'n',
            Shape::Str => 's',
            Shape::Object => 'o',
            Shape::Any => 'a',
            Shape::Void => 'v',
        }
    }

    /// Parse a descriptor code
    pub fn from_code(code: char) -> Option<Shape> {
        match code {
            'b' => Some(Shape::Bool),
            'i' => Some(Shape::Int),
            'n' => Some(Shape::Number),
            's' => Some(Shape::Str),
            'o' => Some(Shape::Object),
            'a' => Some(Shape::Any),
            'v' => Some(Shape::Void),
            _ => None,
        }
    }

    /// Whether a runtime value satisfies this shape
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            Shape::Bool => matches!(value, Value::Bool(_)),
            Shape::Int => matches!(value, Value::Int(_)),
            Shape::Number => matches!(value, Value::Number(_) | Value::Int(_)),
            Shape::Str => matches!(value, Value::Str(_)),
            Shape::Object => matches!(value, Value::Object(_) | Value::Null),
            Shape::Any => true,
            Shape::Void => false,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Parsed form of a binding signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<Shape>,
    ret: Shape,
}

impl Signature {
    /// Parse a descriptor such as `(si)o` or `()v`
    pub fn parse(descriptor: &str) -> BridgeResult<Signature> {
        let bad = |reason: &str| BridgeError::BadSignature {
            descriptor: descriptor.to_string(),
            reason: reason.to_string(),
        };

        let mut chars = descriptor.chars();
        if chars.next() != Some('(') {
            return Err(bad("expected opening parenthesis"));
        }

        let mut params = Vec::new();
        let ret = loop {
            match chars.next() {
                Some(')') => match chars.next() {
                    Some(code) => match Shape::from_code(code) {
                        Some(shape) => break shape,
                        None => return Err(bad("unknown return shape code")),
                    },
                    None => return Err(bad("missing return shape")),
                },
                Some(code) => match Shape::from_code(code) {
                    Some(Shape::Void) => {
                        return Err(bad("void is only valid as a return shape"))
                    }
                    Some(shape) => params.push(shape),
                    None => return Err(bad("unknown parameter shape code")),
                },
                None => return Err(bad("unterminated parameter list")),
            }
        };

        if chars.next().is_some() {
            return Err(bad("trailing characters after return shape"));
        }

        Ok(Signature { params, ret })
    }

    /// Parameter shapes, in call order
    pub fn params(&self) -> &[Shape] {
        &self.params
    }

    /// Return shape
    pub fn ret(&self) -> Shape {
        self.ret
    }

    /// Validate call arguments against the parameter shapes
    pub fn check(&self, method: &str, args: &[Value]) -> BridgeResult<()> {
        let mismatch = |got: String| BridgeError::InvalidArguments {
            method: method.to_string(),
            expected: self.to_string(),
            got,
        };

        if args.len() != self.params.len() {
            return Err(mismatch(format!(
                "expected {} arguments, got {}",
                self.params.len(),
                args.len()
            )));
        }
        for (index, (shape, value)) in self.params.iter().zip(args).enumerate() {
            if !shape.admits(value) {
                return Err(mismatch(format!(
                    "argument {} is {}, wanted {}",
                    index,
                    value_kind(value),
                    shape
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for shape in &self.params {
            write!(f, "{shape}")?;
        }
        write!(f, "){}", self.ret)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Number(_) => "number",
        Value::Str(_) => "str",
        Value::Object(_) => "object",
    }
}
