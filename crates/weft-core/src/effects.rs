#![forbid(unsafe_code)]

//! Post-commit effect and resource teardown machinery.
//!
//! Effect bodies never run during evaluation: when a commit finds an effect
//! slot whose dependencies changed, the slot's previous cleanup and the new
//! body are queued as a [`PendingEffect`]. After the tick's work queue
//! drains, the queue runs in commit order: for each slot, the old cleanup
//! strictly before the new body. The cleanup returned by the body (via
//! [`Teardown`]) is stored back into the slot for the next round or for
//! unmount.
//!
//! Resources are the synchronous sibling: acquisition happens inline during
//! evaluation, but their release tasks are registered the same way and run
//! on dependency change or unmount.

use crate::fibre::Arena;
use crate::hooks::HookSlot;

/// A deferred teardown task.
pub(crate) type Cleanup = Box<dyn FnOnce()>;

/// An effect body, run after commit with a registrar for teardown tasks.
pub(crate) type EffectBody = Box<dyn FnOnce(&mut Teardown)>;

/// Registrar handed to effect bodies and resource factories; tasks
/// registered here run when the slot's dependencies change or its fibre
/// unmounts, in reverse registration order.
#[derive(Default)]
pub struct Teardown {
    tasks: Vec<Box<dyn FnOnce()>>,
}

impl Teardown {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a teardown task.
    pub fn on_dispose(&mut self, task: impl FnOnce() + 'static) {
        self.tasks.push(Box::new(task));
    }

    /// Collapse the registered tasks into a single cleanup, if any.
    pub(crate) fn into_cleanup(self) -> Option<Cleanup> {
        if self.tasks.is_empty() {
            return None;
        }
        let mut tasks = self.tasks;
        Some(Box::new(move || {
            // Reverse registration order: later acquisitions may depend on
            // earlier ones.
            while let Some(task) = tasks.pop() {
                task();
            }
        }))
    }
}

/// An effect slot whose deps changed during this tick, waiting for the
/// post-commit phase.
pub(crate) struct PendingEffect {
    pub fibre: crate::fibre::FibreId,
    pub slot: usize,
    pub cleanup: Option<Cleanup>,
    pub body: EffectBody,
}

/// Puts taken-but-unrun cleanups back into their slots after an aborted
/// tick, so unmount still tears everything down exactly once.
pub(crate) fn restore(arena: &mut Arena, pending: Vec<PendingEffect>) {
    for entry in pending {
        let Some(cleanup) = entry.cleanup else { continue };
        if let Ok(fibre) = arena.get_mut(entry.fibre) {
            if let Some(HookSlot::Effect(slot)) = fibre.hooks.get_mut(entry.slot) {
                slot.cleanup = Some(cleanup);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
