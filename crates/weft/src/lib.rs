#![forbid(unsafe_code)]

//! Weft public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use weft_core as core;
pub use weft_nodes as nodes;

pub mod prelude {
    pub use weft_core::{
        deps, CallCx, CaptureKey, ContextKey, Deps, Descriptor, FibreObserver, FibreRuntime,
        FnDescriptor, IntoDescriptor, InvalidateReason, Key, KeyPath, OpaqueValue, Result, Setter,
        Teardown, Value, WeftError,
    };
    pub use weft_nodes::{Always, Fallback, Invert, Precondition, Sequence, Status};
}
