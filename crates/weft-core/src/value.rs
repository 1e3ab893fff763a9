#![forbid(unsafe_code)]

//! Dynamic, deep-equatable values.
//!
//! Everything the runtime memoizes on (node results, hook dependencies,
//! state, context values, capture contributions) is a [`Value`]. Equality
//! is structural throughout: if a node recomputes an equal value, nothing
//! downstream re-evaluates.
//!
//! # Invariants
//!
//! 1. Equality is reflexive, including floats: `Value::Float` compares by
//!    bit pattern, so a `NaN` result is equal to itself and cannot keep
//!    re-invalidating its successors.
//! 2. `Value` is cheap to clone; lists and strings are shared slices.
//! 3. User payloads enter through [`OpaqueValue`], which carries its own
//!    type identity and equality; two opaques of different concrete types
//!    are never equal.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use serde::ser::{Serialize, SerializeSeq, Serializer};

/// Capability interface for user-defined payloads carried inside a
/// [`Value`].
pub trait OpaqueValue: fmt::Debug + 'static {
    /// Stable type label, used for diagnostics and snapshots.
    fn type_name(&self) -> &'static str;

    /// Structural equality against another opaque payload.
    fn eq_value(&self, other: &dyn OpaqueValue) -> bool;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Implements [`OpaqueValue::eq_value`] for a `PartialEq` payload: equal iff
/// the other side is the same concrete type and compares equal.
pub fn opaque_eq<T: PartialEq + 'static>(this: &T, other: &dyn OpaqueValue) -> bool {
    other.as_any().downcast_ref::<T>().is_some_and(|other| this == other)
}

/// A dynamic, immutable, deep-equatable value.
#[derive(Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<[Value]>),
    Opaque(Rc<dyn OpaqueValue>),
}

impl Value {
    /// Wrap a user payload.
    #[must_use]
    pub fn opaque<T: OpaqueValue>(payload: T) -> Self {
        Self::Opaque(Rc::new(payload))
    }

    /// Borrow the payload if this is an opaque of concrete type `T`.
    #[must_use]
    pub fn downcast_ref<T: OpaqueValue>(&self) -> Option<&T> {
        match self {
            Self::Opaque(payload) => payload.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            // Bit equality keeps memoization reflexive under NaN.
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => a.eq_value(&**b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("()"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value:?}"),
            Self::List(values) => f.debug_list().entries(values.iter()).finish(),
            Self::Opaque(payload) => write!(f, "{payload:?}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unit => serializer.serialize_unit(),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Int(value) => serializer.serialize_i64(*value),
            Self::Float(value) => serializer.serialize_f64(*value),
            Self::Str(value) => serializer.serialize_str(value),
            Self::List(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values.iter() {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            Self::Opaque(payload) => serializer.serialize_str(&format!("{payload:?}")),
        }
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Unit
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::List(Rc::from(values))
    }
}

/// A hook dependency array. `None` means "recompute on every evaluation";
/// `Some` arrays compare element-wise by [`Value`] equality.
pub type Deps = Option<Vec<Value>>;

/// Whether a deps transition requires recomputation.
pub(crate) fn deps_changed(previous: &Deps, next: &Deps) -> bool {
    match (previous, next) {
        (Some(previous), Some(next)) => previous != next,
        _ => true,
    }
}

/// Builds a dependency array: `deps![a, b]` is
/// `Some(vec![Value::from(a), Value::from(b)])`. `deps![]` is an empty array
/// (compute once, never again).
#[macro_export]
macro_rules! deps {
    () => {
        ::std::option::Option::Some(::std::vec::Vec::new())
    };
    ($($dep:expr),+ $(,)?) => {
        ::std::option::Option::Some(::std::vec![$($crate::Value::from($dep)),+])
    };
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
