#![forbid(unsafe_code)]

//! Instrumentation: observer callbacks on fibre lifecycle events.
//!
//! Observers carry no semantic load: the external visualizer uses them to
//! render the tree, and tests use [`RecordingObserver`] to assert exactly
//! which fibres were invoked.

use std::cell::RefCell;
use std::rc::Rc;

use crate::key::KeyPath;
use crate::value::Value;

/// Callbacks on fibre lifecycle events. All methods default to no-ops so
/// observers implement only what they need.
pub trait FibreObserver {
    /// A fibre committed for the first time.
    fn on_mount(&self, path: &KeyPath, descriptor: &str) {
        let _ = (path, descriptor);
    }

    /// A fibre's node function is about to run.
    fn on_evaluation(&self, path: &KeyPath, descriptor: &str) {
        let _ = (path, descriptor);
    }

    /// A fibre committed a result different from its previous one.
    fn on_commit(&self, path: &KeyPath, descriptor: &str, result: &Value) {
        let _ = (path, descriptor, result);
    }

    /// A fibre was torn down.
    fn on_unmount(&self, path: &KeyPath, descriptor: &str) {
        let _ = (path, descriptor);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FibreEventKind {
    Mount,
    Evaluation,
    Commit,
    Unmount,
}

/// One recorded lifecycle event.
#[derive(Debug, Clone)]
pub struct FibreEvent {
    pub kind: FibreEventKind,
    pub path: KeyPath,
    pub descriptor: String,
    pub result: Option<Value>,
}

/// Observer that records every event, for tests and debugging.
#[derive(Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<FibreEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// All recorded events, in order.
    #[must_use]
    pub fn events(&self) -> Vec<FibreEvent> {
        self.events.borrow().clone()
    }

    /// Drain and return the recorded events.
    pub fn take(&self) -> Vec<FibreEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    /// Paths of fibres whose node function ran, in invocation order.
    #[must_use]
    pub fn evaluated_paths(&self) -> Vec<KeyPath> {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.kind == FibreEventKind::Evaluation)
            .map(|event| event.path.clone())
            .collect()
    }

    /// Number of recorded events of `kind`.
    #[must_use]
    pub fn count(&self, kind: FibreEventKind) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }

    fn record(&self, kind: FibreEventKind, path: &KeyPath, descriptor: &str, result: Option<&Value>) {
        self.events.borrow_mut().push(FibreEvent {
            kind,
            path: path.clone(),
            descriptor: descriptor.to_owned(),
            result: result.cloned(),
        });
    }
}

impl FibreObserver for RecordingObserver {
    fn on_mount(&self, path: &KeyPath, descriptor: &str) {
        self.record(FibreEventKind::Mount, path, descriptor, None);
    }

    fn on_evaluation(&self, path: &KeyPath, descriptor: &str) {
        self.record(FibreEventKind::Evaluation, path, descriptor, None);
    }

    fn on_commit(&self, path: &KeyPath, descriptor: &str, result: &Value) {
        self.record(FibreEventKind::Commit, path, descriptor, Some(result));
    }

    fn on_unmount(&self, path: &KeyPath, descriptor: &str) {
        self.record(FibreEventKind::Unmount, path, descriptor, None);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
