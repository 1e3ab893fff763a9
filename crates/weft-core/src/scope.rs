#![forbid(unsafe_code)]

//! Long-range bindings: contexts (top-down) and captures (bottom-up).
//!
//! Both are resolved the same way: a provider fibre registers a binding in
//! its scope map, and descendants walk the ancestor chain to the nearest
//! binding. What differs is the direction of data flow.
//!
//! A context binding points at an internal *binding fibre*, a child of the
//! provider whose committed result *is* the provided value. Readers record
//! that fibre as a predecessor, so changing the value invalidates exactly
//! the readers and nothing else.
//!
//! A capture binding points at an internal *collector fibre*, a child of
//! the aggregator whose committed result is the ordered list of
//! contributions from the aggregator's subtree. The collector depends on
//! each contributor, and the aggregator reads the collector, so a changed,
//! added, or removed contribution re-invalidates the aggregator only.

use std::any::Any;
use std::rc::Rc;

use crate::call::CallCx;
use crate::error::Result;
use crate::key::Key;
use crate::props::{descriptor_eq, Descriptor};
use crate::value::Value;

/// Key of a top-down context binding. Equality is by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    name: Rc<str>,
}

impl ContextKey {
    #[must_use]
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        Rc::clone(&self.name)
    }

    /// Reserved child key of the internal binding fibre.
    pub(crate) fn binding_key(&self) -> Key {
        Key::Name(Rc::from(format!("__context.{}", self.name)))
    }
}

/// Key of a bottom-up capture binding. Equality is by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaptureKey {
    name: Rc<str>,
}

impl CaptureKey {
    #[must_use]
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        Rc::clone(&self.name)
    }

    /// Reserved child key of the internal collector fibre.
    pub(crate) fn collector_key(&self) -> Key {
        Key::Name(Rc::from(format!("__capture.{}", self.name)))
    }
}

/// Entry key of a fibre's scope map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ScopeKey {
    Context(ContextKey),
    Capture(CaptureKey),
}

impl ScopeKey {
    pub fn name_rc(&self) -> Rc<str> {
        match self {
            Self::Context(key) => key.name_rc(),
            Self::Capture(key) => key.name_rc(),
        }
    }
}

/// Internal descriptor of a context binding fibre: commits the provided
/// value as its result.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContextValue {
    pub value: Value,
}

impl Descriptor for ContextValue {
    fn type_name(&self) -> &'static str {
        "ContextValue"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, _cx: &mut CallCx<'_>) -> Result<Value> {
        Ok(self.value.clone())
    }
}

/// Internal descriptor of a capture collector fibre: commits the ordered
/// contribution list gathered from the aggregator's subtree.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CaptureCollector {
    pub key: CaptureKey,
}

impl Descriptor for CaptureCollector {
    fn type_name(&self) -> &'static str {
        "CaptureCollector"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        cx.gather_capture_entries()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_compare_by_name() {
        assert_eq!(ContextKey::new("battery"), ContextKey::new("battery"));
        assert_ne!(ContextKey::new("battery"), ContextKey::new("clock"));
        assert_eq!(CaptureKey::new("motor"), CaptureKey::new("motor"));
    }

    #[test]
    fn context_and_capture_scopes_do_not_collide() {
        let context = ScopeKey::Context(ContextKey::new("x"));
        let capture = ScopeKey::Capture(CaptureKey::new("x"));
        assert_ne!(context, capture);
    }

    #[test]
    fn reserved_child_keys_carry_the_binding_name() {
        assert_eq!(
            ContextKey::new("battery").binding_key(),
            Key::from("__context.battery"),
        );
        assert_eq!(
            CaptureKey::new("motor").collector_key(),
            Key::from("__capture.motor"),
        );
    }
}
