use std::{ffi::c_void, fmt};

use crate::runtime::gc::GcHandle;

/// Opaque host pointer carried by [`Value::Handle`]. Never traced or freed by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPtr(pub *mut c_void);

/// Runtime value used by the VM stack, globals, constants, fields and upvalues.
///
/// A `Value` is a small `Copy` datum. Objects are referenced through
/// [`GcHandle`]s into the VM's heap, so copying a value never copies the object.
///
/// Equality derived here is the VM's *raw* equality: numbers compare as IEEE
/// doubles, objects by identity. Language-level equality (`__eq__`, string
/// contents) is layered on top by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Number(f64),
    /// Opaque host pointer.
    Handle(HostPtr),
    /// Reference to a heap object.
    Obj(GcHandle),
}

impl Value {
    #[inline]
    pub fn is_null(self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub fn as_number(self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_obj(self) -> Option<GcHandle> {
        match self {
            Value::Obj(handle) => Some(handle),
            _ => None,
        }
    }

    /// Returns the number as an integer when it has an exact integer representation.
    #[inline]
    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Number(n) if has_int_repr(n) => Some(n as i64),
            _ => None,
        }
    }

    /// Truthiness: `null` and `false` are falsy, everything else is truthy.
    #[inline]
    pub fn is_truthy(self) -> bool {
        !matches!(self, Value::Null | Value::Boolean(false))
    }

    /// Short type label used in tracing output.
    pub fn type_name(self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Number(_) => "Number",
            Value::Handle(_) => "Handle",
            Value::Obj(_) => "Object",
        }
    }
}

#[inline]
pub fn has_int_repr(n: f64) -> bool {
    n.trunc() == n && n >= i64::MIN as f64 && n <= i64::MAX as f64
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<GcHandle> for Value {
    fn from(handle: GcHandle) -> Self {
        Value::Obj(handle)
    }
}

/// Formats a number the way the runtime prints it: integers without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && has_int_repr(n) && n.abs() < 1e17 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Handle(ptr) => write!(f, "<handle {:p}>", ptr.0),
            Value::Obj(handle) => write!(f, "<obj #{}>", handle.index()),
        }
    }
}
