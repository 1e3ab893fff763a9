#![forbid(unsafe_code)]

//! Behaviour-tree results.
//!
//! Node results specialize the engine's dynamic values to a tagged union of
//! success / running / failure, each with an optional payload (a progress
//! value, a reading, whatever the node wants to pass up).

use std::any::Any;

use weft_core::{opaque_eq, OpaqueValue, Value};

/// Outcome of one behaviour-tree node for one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Success(Option<Value>),
    Running(Option<Value>),
    Failure(Option<Value>),
}

impl Status {
    #[must_use]
    pub fn success() -> Self {
        Self::Success(None)
    }

    #[must_use]
    pub fn running() -> Self {
        Self::Running(None)
    }

    #[must_use]
    pub fn failure() -> Self {
        Self::Failure(None)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Success(payload) | Self::Running(payload) | Self::Failure(payload) => {
                payload.as_ref()
            }
        }
    }

    /// Read a status back out of an engine value. Booleans coerce, the way
    /// condition nodes return them: `true` is success, `false` is failure.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(status) = value.downcast_ref::<Status>() {
            return Some(status.clone());
        }
        value.as_bool().map(Self::from)
    }
}

impl From<bool> for Status {
    fn from(value: bool) -> Self {
        if value {
            Self::success()
        } else {
            Self::failure()
        }
    }
}

impl From<Status> for Value {
    fn from(status: Status) -> Self {
        Value::opaque(status)
    }
}

impl OpaqueValue for Status {
    fn type_name(&self) -> &'static str {
        "Status"
    }

    fn eq_value(&self, other: &dyn OpaqueValue) -> bool {
        opaque_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        assert!(Status::success().is_success());
        assert!(Status::running().is_running());
        assert!(Status::failure().is_failure());
        assert!(!Status::running().is_success());
    }

    #[test]
    fn round_trips_through_value() {
        let status = Status::Running(Some(Value::from(0.5)));
        let value = Value::from(status.clone());
        assert_eq!(Status::from_value(&value), Some(status));
    }

    #[test]
    fn booleans_coerce() {
        assert_eq!(Status::from_value(&Value::from(true)), Some(Status::success()));
        assert_eq!(Status::from_value(&Value::from(false)), Some(Status::failure()));
        assert_eq!(Status::from_value(&Value::from(1)), None);
    }

    #[test]
    fn payload_does_not_change_the_tag() {
        let plain = Status::success();
        let loaded = Status::Success(Some(Value::from(7)));
        assert!(loaded.is_success());
        assert_ne!(Value::from(plain), Value::from(loaded));
    }
}
