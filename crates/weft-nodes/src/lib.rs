#![forbid(unsafe_code)]

//! Behaviour-tree nodes for the weft evaluation engine.
//!
//! A thin consumer of `weft-core`: node results specialize to
//! [`Status`] (success / running / failure), and the composites
//! ([`Sequence`], [`Fallback`], [`Invert`], [`Precondition`]) evaluate
//! their children through the call context so every child is memoized
//! independently by the engine.

pub mod nodes;
pub mod status;

pub use nodes::{Always, Fallback, Invert, Precondition, Sequence};
pub use status::Status;
