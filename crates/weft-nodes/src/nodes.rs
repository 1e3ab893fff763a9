#![forbid(unsafe_code)]

//! Composite and leaf behaviour-tree nodes.
//!
//! Composites evaluate their children through the call context, so the
//! engine memoizes each child independently: a sequence whose first child
//! still returns `Running` re-evaluates nothing else. In analysis mode the
//! composites evaluate every child before computing the same result, so a
//! visualizer sees the whole tree.
//!
//! Children are keyed by position. Behaviour trees are structurally static
//! in practice; a node that reorders children should carry its own keyed
//! wrapper nodes.

use std::any::Any;
use std::rc::Rc;

use weft_core::{
    descriptor_eq, descriptor_slice_eq, CallCx, Descriptor, IntoDescriptor, Result, Value,
    WeftError,
};

use crate::status::Status;

fn status_of(value: &Value, node: &'static str) -> Result<Status> {
    Status::from_value(value).ok_or_else(|| {
        WeftError::failure(format!("{node} child returned a non-status value: {value:?}"))
    })
}

/// Evaluate children in order; stop at the first non-success result and
/// return it. All children succeeding is success.
#[derive(Debug, Clone)]
pub struct Sequence {
    children: Vec<Rc<dyn Descriptor>>,
}

impl Sequence {
    #[must_use]
    pub fn new(children: impl IntoIterator<Item = Rc<dyn Descriptor>>) -> Self {
        Self {
            children: children.into_iter().collect(),
        }
    }
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        descriptor_slice_eq(&self.children, &other.children)
    }
}

impl Descriptor for Sequence {
    fn type_name(&self) -> &'static str {
        "Sequence"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        for (index, child) in self.children.iter().enumerate() {
            let result = cx.evaluate_child(index as u64, Rc::clone(child))?;
            if !status_of(&result, "sequence")?.is_success() {
                return Ok(result);
            }
        }
        Ok(Status::success().into())
    }

    fn evaluate_analysis(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        let mut outcome = Status::success().into();
        let mut decided = false;
        for (index, child) in self.children.iter().enumerate() {
            let result = cx.evaluate_child(index as u64, Rc::clone(child))?;
            if !decided && !status_of(&result, "sequence")?.is_success() {
                outcome = result;
                decided = true;
            }
        }
        Ok(outcome)
    }
}

/// Evaluate children in order; stop at the first non-failure result and
/// return it. All children failing is failure.
#[derive(Debug, Clone)]
pub struct Fallback {
    children: Vec<Rc<dyn Descriptor>>,
}

impl Fallback {
    #[must_use]
    pub fn new(children: impl IntoIterator<Item = Rc<dyn Descriptor>>) -> Self {
        Self {
            children: children.into_iter().collect(),
        }
    }
}

impl PartialEq for Fallback {
    fn eq(&self, other: &Self) -> bool {
        descriptor_slice_eq(&self.children, &other.children)
    }
}

impl Descriptor for Fallback {
    fn type_name(&self) -> &'static str {
        "Fallback"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        for (index, child) in self.children.iter().enumerate() {
            let result = cx.evaluate_child(index as u64, Rc::clone(child))?;
            if !status_of(&result, "fallback")?.is_failure() {
                return Ok(result);
            }
        }
        Ok(Status::failure().into())
    }

    fn evaluate_analysis(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        let mut outcome = Status::failure().into();
        let mut decided = false;
        for (index, child) in self.children.iter().enumerate() {
            let result = cx.evaluate_child(index as u64, Rc::clone(child))?;
            if !decided && !status_of(&result, "fallback")?.is_failure() {
                outcome = result;
                decided = true;
            }
        }
        Ok(outcome)
    }
}

/// Leaf returning a fixed status.
#[derive(Debug, Clone, PartialEq)]
pub struct Always {
    status: Status,
}

impl Always {
    #[must_use]
    pub fn new(status: Status) -> Self {
        Self { status }
    }

    #[must_use]
    pub fn success() -> Self {
        Self::new(Status::success())
    }

    #[must_use]
    pub fn running() -> Self {
        Self::new(Status::running())
    }

    #[must_use]
    pub fn failure() -> Self {
        Self::new(Status::failure())
    }
}

impl Descriptor for Always {
    fn type_name(&self) -> &'static str {
        "Always"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, _cx: &mut CallCx<'_>) -> Result<Value> {
        Ok(self.status.clone().into())
    }
}

/// Swap success and failure; running passes through. Payloads are kept.
#[derive(Debug, Clone)]
pub struct Invert {
    child: Rc<dyn Descriptor>,
}

impl Invert {
    #[must_use]
    pub fn new(child: impl IntoDescriptor) -> Self {
        Self {
            child: child.into_descriptor(),
        }
    }
}

impl PartialEq for Invert {
    fn eq(&self, other: &Self) -> bool {
        self.child.eq_descriptor(&*other.child)
    }
}

impl Descriptor for Invert {
    fn type_name(&self) -> &'static str {
        "Invert"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        let result = cx.evaluate_child(0u64, Rc::clone(&self.child))?;
        let inverted = match status_of(&result, "invert")? {
            Status::Success(payload) => Status::Failure(payload),
            Status::Failure(payload) => Status::Success(payload),
            running @ Status::Running(_) => running,
        };
        Ok(inverted.into())
    }
}

/// Gate an action behind a condition: the action runs only while the
/// condition succeeds; otherwise the condition's result comes back.
#[derive(Debug, Clone)]
pub struct Precondition {
    condition: Rc<dyn Descriptor>,
    action: Rc<dyn Descriptor>,
}

impl Precondition {
    #[must_use]
    pub fn new(condition: impl IntoDescriptor, action: impl IntoDescriptor) -> Self {
        Self {
            condition: condition.into_descriptor(),
            action: action.into_descriptor(),
        }
    }
}

impl PartialEq for Precondition {
    fn eq(&self, other: &Self) -> bool {
        self.condition.eq_descriptor(&*other.condition)
            && self.action.eq_descriptor(&*other.action)
    }
}

impl Descriptor for Precondition {
    fn type_name(&self) -> &'static str {
        "Precondition"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        let condition = cx.evaluate_child("condition", Rc::clone(&self.condition))?;
        if !status_of(&condition, "precondition")?.is_success() {
            return Ok(condition);
        }
        cx.evaluate_child("action", Rc::clone(&self.action))
    }

    fn evaluate_analysis(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        let condition = cx.evaluate_child("condition", Rc::clone(&self.condition))?;
        let action = cx.evaluate_child("action", Rc::clone(&self.action))?;
        if status_of(&condition, "precondition")?.is_success() {
            Ok(action)
        } else {
            Ok(condition)
        }
    }
}
