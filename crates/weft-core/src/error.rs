#![forbid(unsafe_code)]

//! Error kinds surfaced by the runtime.
//!
//! Structural errors (`DuplicateKey`, `HookOrderViolation`, `MissingContext`,
//! `ReentrantTick`, `DisposedAccess`, `DuplicateCapture`) are programming
//! errors: they abort the tick and leave previously committed state intact.
//! `NodeFailure` is a node function raising; it is recorded on the failing
//! fibre and propagates up the evaluation stack to the tick caller.

use std::rc::Rc;

use thiserror::Error;

use crate::fibre::FibreId;
use crate::key::{Key, KeyPath};

pub type Result<T> = std::result::Result<T, WeftError>;

#[derive(Debug, Clone, Error)]
pub enum WeftError {
    #[error("duplicate child key `{key}` under {parent}")]
    DuplicateKey { parent: KeyPath, key: Key },

    #[error("hook order violation at {path}, slot {slot}: {detail}")]
    HookOrderViolation {
        path: KeyPath,
        slot: usize,
        detail: String,
    },

    #[error("no provider for `{name}` above {path}")]
    MissingContext { path: KeyPath, name: Rc<str> },

    #[error("run_tick invoked while a tick is already running")]
    ReentrantTick,

    #[error("operation on a disposed or stale fibre handle {id}")]
    DisposedAccess { id: FibreId },

    #[error("fibre {path} contributed `{name}` more than once in one tick")]
    DuplicateCapture { path: KeyPath, name: Rc<str> },

    #[error("node {path} failed: {message}")]
    NodeFailure { path: KeyPath, message: String },
}

impl WeftError {
    /// A node-level failure raised from inside a node function. The runtime
    /// fills in the key path of the fibre that raised it.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::NodeFailure {
            path: KeyPath::root(),
            message: message.into(),
        }
    }

    /// Whether this is a node-level failure (as opposed to a structural
    /// error in how the tree was driven).
    #[must_use]
    pub fn is_node_failure(&self) -> bool {
        matches!(self, Self::NodeFailure { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_paths() {
        let err = WeftError::DuplicateKey {
            parent: ["a"].into_iter().collect(),
            key: Key::from("b"),
        };
        assert_eq!(err.to_string(), "duplicate child key `b` under /a");

        let err = WeftError::MissingContext {
            path: ["a", "b"].into_iter().collect(),
            name: Rc::from("battery"),
        };
        assert_eq!(err.to_string(), "no provider for `battery` above /a/b");
    }

    #[test]
    fn failure_starts_unattributed() {
        let err = WeftError::failure("boom");
        assert!(err.is_node_failure());
        match err {
            WeftError::NodeFailure { path, message } => {
                assert!(path.is_root());
                assert_eq!(message, "boom");
            }
            _ => unreachable!(),
        }
    }
}
