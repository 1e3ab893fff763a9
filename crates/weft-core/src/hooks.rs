#![forbid(unsafe_code)]

//! Hook slots: the positional per-fibre side channel.
//!
//! Each fibre carries a flat list of tagged slots. On each evaluation a
//! cursor walks the list; each `use_*` call consumes the next slot, creating
//! it on the mounting evaluation. The slot kind must match the call kind on
//! every later evaluation, and the count must stay constant; either
//! mismatch is a `HookOrderViolation`.
//!
//! # Invariants
//!
//! 1. Setter writes never mutate a state slot mid-evaluation; they are
//!    buffered in the runtime's write queue and applied at the start of the
//!    next tick.
//! 2. Writing a value equal to the slot's current value is a no-op (no
//!    dirty bit, no re-evaluation).
//! 3. Two writes to the same slot within one tick collapse to the
//!    last-written value.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::effects::Cleanup;
use crate::fibre::FibreId;
use crate::scope::{CaptureKey, ContextKey};
use crate::value::{Deps, Value};

/// A buffered state write targeting one slot.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub fibre: FibreId,
    pub slot: usize,
    pub value: Value,
}

/// The write queue shared between the runtime and every [`Setter`] handle.
pub(crate) type WriteQueue = Rc<RefCell<Vec<PendingWrite>>>;

/// Stable handle for writing a state slot from outside the runtime (or from
/// an effect). Cloning is cheap; equality identifies the target slot.
#[derive(Clone)]
pub struct Setter {
    queue: WriteQueue,
    fibre: FibreId,
    slot: usize,
}

impl Setter {
    pub(crate) fn new(queue: WriteQueue, fibre: FibreId, slot: usize) -> Self {
        Self { queue, fibre, slot }
    }

    /// Enqueue a write. Applied at the start of the next tick; equal values
    /// are dropped there.
    pub fn set(&self, value: impl Into<Value>) {
        self.queue.borrow_mut().push(PendingWrite {
            fibre: self.fibre,
            slot: self.slot,
            value: value.into(),
        });
    }
}

impl PartialEq for Setter {
    fn eq(&self, other: &Self) -> bool {
        self.fibre == other.fibre && self.slot == other.slot
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Setter({} slot {})", self.fibre, self.slot)
    }
}

/// Slot kind tags, used for hook-order checking and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    State,
    Effect,
    Memo,
    Resource,
    ContextRead,
    CaptureEmit,
}

impl HookKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Effect => "effect",
            Self::Memo => "memo",
            Self::Resource => "resource",
            Self::ContextRead => "context read",
            Self::CaptureEmit => "capture emit",
        }
    }
}

pub(crate) struct StateSlot {
    pub value: Value,
    pub setter: Setter,
}

pub(crate) struct EffectSlot {
    pub deps: Deps,
    pub cleanup: Option<Cleanup>,
}

pub(crate) struct MemoSlot {
    pub deps: Deps,
    pub value: Value,
}

pub(crate) struct ResourceSlot {
    pub deps: Deps,
    pub value: Value,
    pub release: Option<Cleanup>,
}

pub(crate) struct ContextReadSlot {
    pub key: ContextKey,
    pub provider: FibreId,
}

pub(crate) struct CaptureEmitSlot {
    pub key: CaptureKey,
    pub collector: FibreId,
    pub value: Value,
}

/// One positional hook slot.
pub(crate) enum HookSlot {
    State(StateSlot),
    Effect(EffectSlot),
    Memo(MemoSlot),
    Resource(ResourceSlot),
    ContextRead(ContextReadSlot),
    CaptureEmit(CaptureEmitSlot),
}

impl HookSlot {
    pub fn kind(&self) -> HookKind {
        match self {
            Self::State(_) => HookKind::State,
            Self::Effect(_) => HookKind::Effect,
            Self::Memo(_) => HookKind::Memo,
            Self::Resource(_) => HookKind::Resource,
            Self::ContextRead(_) => HookKind::ContextRead,
            Self::CaptureEmit(_) => HookKind::CaptureEmit,
        }
    }

    /// One-line slot summary for snapshots and debugging.
    pub fn describe(&self) -> String {
        match self {
            Self::State(slot) => format!("state = {:?}", slot.value),
            Self::Effect(slot) => match &slot.deps {
                Some(deps) => format!("effect ({} deps)", deps.len()),
                None => "effect (every evaluation)".to_owned(),
            },
            Self::Memo(slot) => format!("memo = {:?}", slot.value),
            Self::Resource(slot) => format!("resource = {:?}", slot.value),
            Self::ContextRead(slot) => {
                format!("context `{}` from {}", slot.key.name(), slot.provider)
            }
            Self::CaptureEmit(slot) => format!(
                "capture `{}` -> {} = {:?}",
                slot.key.name(),
                slot.collector,
                slot.value
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
