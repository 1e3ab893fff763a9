#![forbid(unsafe_code)]

//! Node descriptors.
//!
//! A descriptor is the immutable, equatable description of one node: its
//! evaluation function plus whatever inputs that function closes over.
//! Descriptor equality is what drives memoization: a child whose new
//! descriptor equals its old one (and whose tracked dependencies are
//! unchanged) is not re-evaluated.
//!
//! Descriptors are trait objects: every descriptor provides type identity,
//! dynamic equality, and an evaluation entry point, plus an optional
//! analysis-mode entry point for visualization completeness (by default it
//! delegates to the normal one).

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::call::CallCx;
use crate::error::Result;
use crate::value::Value;

/// An immutable node description: function plus props.
pub trait Descriptor: fmt::Debug + 'static {
    /// Stable type label used in events, snapshots, and errors.
    fn type_name(&self) -> &'static str;

    /// Structural equality against another descriptor. Implement with
    /// [`descriptor_eq`] for `PartialEq` types.
    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Evaluate this node. `cx` is valid only for the duration of this call.
    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value>;

    /// Analysis-mode evaluation: descriptors that normally short-circuit
    /// children may override this to evaluate all of them.
    fn evaluate_analysis(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        self.evaluate(cx)
    }
}

/// Implements [`Descriptor::eq_descriptor`] for a `PartialEq` descriptor:
/// equal iff the other side is the same concrete type and compares equal.
pub fn descriptor_eq<T: PartialEq + 'static>(this: &T, other: &dyn Descriptor) -> bool {
    other.as_any().downcast_ref::<T>().is_some_and(|other| this == other)
}

/// Element-wise descriptor slice equality, for descriptors that hold child
/// descriptor lists.
pub fn descriptor_slice_eq(a: &[Rc<dyn Descriptor>], b: &[Rc<dyn Descriptor>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.eq_descriptor(&**b))
}

/// Conversion into a shared descriptor, so call sites can pass either a
/// concrete descriptor or an already-shared one.
pub trait IntoDescriptor {
    fn into_descriptor(self) -> Rc<dyn Descriptor>;
}

impl<T: Descriptor> IntoDescriptor for T {
    fn into_descriptor(self) -> Rc<dyn Descriptor> {
        Rc::new(self)
    }
}

impl IntoDescriptor for Rc<dyn Descriptor> {
    fn into_descriptor(self) -> Rc<dyn Descriptor> {
        self
    }
}

/// A plain node function: receives the descriptor's props and the call
/// context.
pub type NodeFn = fn(&Value, &mut CallCx<'_>) -> Result<Value>;

/// Descriptor built from a named function and a [`Value`] props payload.
///
/// Equality compares the name, the props, and the function pointer, which is
/// enough for leaf computations and tests. Richer nodes implement
/// [`Descriptor`] directly.
#[derive(Debug, Clone)]
pub struct FnDescriptor {
    name: &'static str,
    props: Value,
    run: NodeFn,
    analysis: Option<NodeFn>,
}

impl FnDescriptor {
    #[must_use]
    pub fn new(name: &'static str, props: impl Into<Value>, run: NodeFn) -> Self {
        Self {
            name,
            props: props.into(),
            run,
            analysis: None,
        }
    }

    /// Attach a separate analysis-mode function.
    #[must_use]
    pub fn with_analysis(mut self, analysis: NodeFn) -> Self {
        self.analysis = Some(analysis);
        self
    }

    #[must_use]
    pub fn props(&self) -> &Value {
        &self.props
    }
}

impl PartialEq for FnDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.run == other.run && self.props == other.props
    }
}

impl Descriptor for FnDescriptor {
    fn type_name(&self) -> &'static str {
        self.name
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        (self.run)(&self.props, cx)
    }

    fn evaluate_analysis(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        match self.analysis {
            Some(analysis) => analysis(&self.props, cx),
            None => self.evaluate(cx),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn double(props: &Value, _cx: &mut CallCx<'_>) -> Result<Value> {
        Ok(Value::Int(props.as_int().unwrap_or(0) * 2))
    }

    fn triple(props: &Value, _cx: &mut CallCx<'_>) -> Result<Value> {
        Ok(Value::Int(props.as_int().unwrap_or(0) * 3))
    }

    #[test]
    fn fn_descriptor_equality() {
        let a = FnDescriptor::new("double", 2, double);
        let b = FnDescriptor::new("double", 2, double);
        let c = FnDescriptor::new("double", 3, double);
        let d = FnDescriptor::new("double", 2, triple);

        assert!(a.eq_descriptor(&b));
        assert!(!a.eq_descriptor(&c));
        assert!(!a.eq_descriptor(&d));
    }

    #[test]
    fn slice_equality_is_elementwise() {
        let a: Vec<Rc<dyn Descriptor>> = vec![
            Rc::new(FnDescriptor::new("double", 1, double)),
            Rc::new(FnDescriptor::new("triple", 1, triple)),
        ];
        let b: Vec<Rc<dyn Descriptor>> = vec![
            Rc::new(FnDescriptor::new("double", 1, double)),
            Rc::new(FnDescriptor::new("triple", 1, triple)),
        ];
        assert!(descriptor_slice_eq(&a, &b));
        assert!(!descriptor_slice_eq(&a, &b[..1].to_vec()));
    }
}
