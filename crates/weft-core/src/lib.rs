#![forbid(unsafe_code)]

//! Incremental reactive runtime for tree-shaped call graphs.
//!
//! A computation is described as a tree of immutable node descriptors. On
//! each tick the runtime re-evaluates only the fibres whose props, tracked
//! state, or predecessor results changed; unchanged subtrees reuse their
//! committed results. Nodes may register in-tree state, run post-commit
//! effects, read long-range values provided by ancestors (contexts), and
//! contribute values that an ancestor aggregates (captures).
//!
//! The pieces:
//!
//! - [`key`]: child keys and globally unique key paths
//! - [`value`]: the dynamic, deep-equatable value model
//! - [`props`]: node descriptors and dispatch
//! - [`fibre`]: fibre records, dirty bits, and the owning arena
//! - [`hooks`]: positional hook slots and state setters
//! - [`call`]: the call context passed into node functions
//! - [`scope`]: context and capture binding resolution
//! - [`runtime`]: the work set, the tick loop, and disposal
//! - [`effects`]: post-commit effect and resource teardown
//! - [`observe`]: instrumentation callbacks
//! - [`export`]: read-only snapshots for visualization

pub mod call;
pub mod effects;
pub mod error;
pub mod export;
pub mod fibre;
pub mod hooks;
pub mod key;
pub mod observe;
pub mod props;
pub mod runtime;
pub mod scope;
pub mod value;

pub use call::CallCx;
pub use effects::Teardown;
pub use error::{Result, WeftError};
pub use export::{FibreSnapshot, TreeSnapshot};
pub use fibre::{Dirty, FibreId, FibreStatus};
pub use hooks::{HookKind, Setter};
pub use key::{Key, KeyPath};
pub use observe::{FibreEvent, FibreEventKind, FibreObserver, RecordingObserver};
pub use props::{
    descriptor_eq, descriptor_slice_eq, Descriptor, FnDescriptor, IntoDescriptor, NodeFn,
};
pub use runtime::{FibreRuntime, InvalidateReason};
pub use scope::{CaptureKey, ContextKey};
pub use value::{opaque_eq, Deps, OpaqueValue, Value};
