#![forbid(unsafe_code)]

//! The fibre runtime: tree ownership, invalidation, and the tick loop.
//!
//! [`FibreRuntime`] owns the root fibre and a work set of invalidated
//! fibres. A **tick** is one propagation of invalidations to a fixed
//! point:
//!
//! 1. Buffered state-setter writes are applied (equal values dropped).
//! 2. While the work set is non-empty, the shallowest invalidated fibre
//!    (pre-order among siblings) is re-evaluated; its successors are
//!    enqueued only if its committed result changed.
//! 3. Pending effect bodies and cleanups run in commit order.
//! 4. Fibres whose parents dropped them this tick are disposed, children
//!    first.
//!
//! # Invariants
//!
//! 1. Within a tick, a parent is re-evaluated before its children; a child
//!    whose parent did not re-run is still re-evaluated if its own
//!    dependencies changed.
//! 2. A fibre whose inputs did not change commits an equal result, so
//!    propagation reaches a fixed point and every tick terminates.
//! 3. The fibre tree is mutated only by the scheduler; external callers
//!    interact through setter handles, [`FibreRuntime::invalidate`], and
//!    [`FibreRuntime::run_tick`]. Re-entrant ticks are rejected with
//!    `ReentrantTick`.
//! 4. A state setter invoked from within an effect schedules the next tick
//!    rather than extending the current one.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

use ahash::AHashSet;
use tracing::{debug, trace};

use crate::call::CallCx;
use crate::effects::{self, PendingEffect, Teardown};
use crate::error::{Result, WeftError};
use crate::fibre::{Arena, Committed, Dirty, Fibre, FibreId, FibreStatus};
use crate::hooks::{HookSlot, PendingWrite, WriteQueue};
use crate::key::{Key, KeyPath};
use crate::observe::FibreObserver;
use crate::props::{Descriptor, IntoDescriptor};
use crate::scope::CaptureKey;
use crate::value::Value;

/// Reason passed to [`FibreRuntime::invalidate`]; maps onto the fibre's
/// dirty bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateReason {
    PropsChanged,
    PredecessorChanged,
    StateChanged,
}

impl InvalidateReason {
    fn bits(self) -> Dirty {
        match self {
            Self::PropsChanged => Dirty::PROPS_CHANGED,
            Self::PredecessorChanged => Dirty::PREDECESSOR_CHANGED,
            Self::StateChanged => Dirty::STATE_CHANGED,
        }
    }
}

/// Mutable bookkeeping for one in-flight evaluation. Lives on the
/// runtime's evaluation stack so nested evaluations (children, collectors)
/// can see the fresh child order of ancestors mid-evaluation.
pub(crate) struct EvalFrame {
    pub id: FibreId,
    pub mounting: bool,
    pub cursor: usize,
    pub children: Vec<(Key, FibreId)>,
    pub preds: Vec<FibreId>,
    pub captures_used: Vec<CaptureKey>,
    pub effects: Vec<PendingEffect>,
}

impl EvalFrame {
    fn new(id: FibreId, mounting: bool) -> Self {
        Self {
            id,
            mounting,
            cursor: 0,
            children: Vec::new(),
            preds: Vec::new(),
            captures_used: Vec::new(),
            effects: Vec::new(),
        }
    }
}

/// Owns the fibre tree and drives ticks.
pub struct FibreRuntime {
    pub(crate) arena: Arena,
    pub(crate) frames: Vec<EvalFrame>,
    pub(crate) root: FibreId,
    work: Vec<FibreId>,
    queued: AHashSet<FibreId>,
    writes: WriteQueue,
    effects: Vec<PendingEffect>,
    disposal: Vec<FibreId>,
    observers: Vec<Rc<dyn FibreObserver>>,
    analysis: bool,
    in_tick: bool,
    ticks: u64,
}

impl FibreRuntime {
    /// Create a runtime evaluating `root` at the tree root. The first
    /// [`run_tick`](Self::run_tick) mounts and evaluates the whole tree.
    #[must_use]
    pub fn new(root: impl IntoDescriptor) -> Self {
        let descriptor = root.into_descriptor();
        let mut arena = Arena::new();
        let root_id =
            arena.insert_with(|id| Fibre::new(id, KeyPath::root(), None, 0, descriptor));
        let mut runtime = Self {
            arena,
            frames: Vec::new(),
            root: root_id,
            work: Vec::new(),
            queued: AHashSet::new(),
            writes: Rc::new(RefCell::new(Vec::new())),
            effects: Vec::new(),
            disposal: Vec::new(),
            observers: Vec::new(),
            analysis: false,
            in_tick: false,
            ticks: 0,
        };
        runtime.queued.insert(root_id);
        runtime.work.push(root_id);
        runtime
    }

    /// Handle of the root fibre.
    #[must_use]
    pub fn root(&self) -> FibreId {
        self.root
    }

    /// The root's last committed result, if any tick has completed.
    #[must_use]
    pub fn result(&self) -> Option<Value> {
        self.arena
            .get(self.root)
            .ok()
            .and_then(|fibre| fibre.committed.as_ref())
            .map(|committed| committed.value.clone())
    }

    /// Whether invalidations or buffered writes are waiting for a tick.
    #[must_use]
    pub fn needs_tick(&self) -> bool {
        !self.work.is_empty() || !self.writes.borrow().is_empty()
    }

    /// Attach an instrumentation observer.
    pub fn on_event(&mut self, observer: Rc<dyn FibreObserver>) {
        self.observers.push(observer);
    }

    /// Whether descriptors are dispatched through their analysis entry
    /// point this tick.
    #[must_use]
    pub fn analysis_mode(&self) -> bool {
        self.analysis
    }

    /// Switch the analysis dispatch on or off. Flipping the flag marks the
    /// whole tree for re-evaluation so the alternative dispatch reaches
    /// previously short-circuited subtrees.
    pub fn set_analysis_mode(&mut self, analysis: bool) {
        if self.analysis == analysis {
            return;
        }
        self.analysis = analysis;
        for id in self.arena.live_ids() {
            self.mark_dirty(id, Dirty::PROPS_CHANGED);
        }
    }

    /// Resolve a key path to a live fibre handle.
    #[must_use]
    pub fn fibre_at(&self, keys: &[Key]) -> Option<FibreId> {
        let mut cursor = self.root;
        for key in keys {
            cursor = self.arena.get(cursor).ok()?.child_id(key)?;
        }
        Some(cursor)
    }

    /// External invalidation entry point: mark `id` dirty and enroll it in
    /// the work set for the next tick.
    pub fn invalidate(&mut self, id: FibreId, reason: InvalidateReason) -> Result<()> {
        self.arena.get(id)?;
        self.mark_dirty(id, reason.bits());
        Ok(())
    }

    /// The failure recorded by the most recent evaluation of `id`, if that
    /// evaluation raised.
    #[must_use]
    pub fn failure(&self, id: FibreId) -> Option<WeftError> {
        self.arena.get(id).ok().and_then(|fibre| fibre.failure.clone())
    }

    /// Replace the root descriptor. Same descriptor type: a props update.
    /// Different type: the old tree is torn down and a fresh root mounts.
    pub fn update_root(&mut self, descriptor: impl IntoDescriptor) {
        let descriptor = descriptor.into_descriptor();
        let same_type = self
            .arena
            .get(self.root)
            .map(|fibre| fibre.descriptor.as_any().type_id() == descriptor.as_any().type_id())
            .unwrap_or(false);
        if !same_type {
            self.dispose_subtree(self.root);
            let root = self
                .arena
                .insert_with(|id| Fibre::new(id, KeyPath::root(), None, 0, descriptor));
            self.root = root;
            self.mark_dirty(root, Dirty::PROPS_CHANGED);
            return;
        }
        let changed = {
            let fibre = self
                .arena
                .get_mut(self.root)
                .expect("root checked live above");
            let changed = !fibre.descriptor.eq_descriptor(&*descriptor);
            fibre.descriptor = descriptor;
            changed
        };
        if changed {
            self.mark_dirty(self.root, Dirty::PROPS_CHANGED);
        }
    }

    /// Run one tick to its fixed point and return the root's committed
    /// result. Structural errors abort the tick; previously committed
    /// state stays valid.
    pub fn run_tick(&mut self) -> Result<Value> {
        if self.in_tick {
            return Err(WeftError::ReentrantTick);
        }
        self.in_tick = true;
        let result = self.tick_inner();
        self.in_tick = false;
        result
    }

    /// Tear down the whole tree: effect cleanups and resource releases run
    /// children-first. Idempotent; also invoked on drop.
    pub fn dispose(&mut self) {
        if self.in_tick {
            debug!("dispose ignored during a tick");
            return;
        }
        self.dispose_subtree(self.root);
        self.work.clear();
        self.queued.clear();
        self.disposal.clear();
        self.effects.clear();
        self.writes.borrow_mut().clear();
    }

    // ─── Tick internals ──────────────────────────────────────────────────

    fn tick_inner(&mut self) -> Result<Value> {
        self.ticks += 1;
        let tick = self.ticks;
        debug!(tick, "tick start");
        self.apply_writes();
        while let Some(id) = self.pop_next() {
            if let Err(error) = self.evaluate(id) {
                effects::restore(&mut self.arena, mem::take(&mut self.effects));
                debug!(tick, %error, "tick aborted");
                return Err(error);
            }
        }
        self.flush_effects();
        self.flush_disposals();
        debug!(tick, "tick end");
        let root = self.arena.get(self.root)?;
        Ok(root
            .committed
            .as_ref()
            .expect("root commits when the tick drains")
            .value
            .clone())
    }

    fn apply_writes(&mut self) {
        let writes: Vec<PendingWrite> = self.writes.borrow_mut().drain(..).collect();
        for write in writes {
            let applied = match self.arena.get_mut(write.fibre) {
                Ok(fibre) => match fibre.hooks.get_mut(write.slot) {
                    Some(HookSlot::State(slot)) if slot.value != write.value => {
                        slot.value = write.value;
                        true
                    }
                    _ => false,
                },
                Err(_) => {
                    debug!(fibre = %write.fibre, "state write to a disposed fibre dropped");
                    false
                }
            };
            if applied {
                self.mark_dirty(write.fibre, Dirty::STATE_CHANGED);
            }
        }
    }

    /// Pop the next fibre in topological order with respect to the tree:
    /// shallowest first, then pre-order among siblings by child order.
    fn pop_next(&mut self) -> Option<FibreId> {
        let mut index = 0;
        while index < self.work.len() {
            let id = self.work[index];
            let live = match self.arena.get(id) {
                Ok(fibre) => {
                    !fibre.doomed
                        && (fibre.status == FibreStatus::Uninitialized || !fibre.dirty.is_empty())
                }
                Err(_) => false,
            };
            if live {
                index += 1;
            } else {
                self.queued.remove(&id);
                self.work.swap_remove(index);
            }
        }

        let mut best: Option<(usize, (u32, Vec<u32>))> = None;
        for (index, &id) in self.work.iter().enumerate() {
            let Ok(fibre) = self.arena.get(id) else { continue };
            let order = (fibre.depth, self.tree_order(id));
            if best
                .as_ref()
                .map_or(true, |(_, current)| order < *current)
            {
                best = Some((index, order));
            }
        }
        let (index, _) = best?;
        let id = self.work.swap_remove(index);
        self.queued.remove(&id);
        Some(id)
    }

    /// Per-parent child indices from the root down to `id`; lexicographic
    /// comparison yields pre-order.
    fn tree_order(&self, id: FibreId) -> Vec<u32> {
        let mut indices = Vec::new();
        let mut cursor = id;
        while let Ok(fibre) = self.arena.get(cursor) {
            let Some(parent) = fibre.parent else { break };
            let position = self
                .arena
                .get(parent)
                .ok()
                .and_then(|p| p.children.iter().position(|&(_, child)| child == cursor))
                .map_or(u32::MAX, |position| position as u32);
            indices.push(position);
            cursor = parent;
        }
        indices.reverse();
        indices
    }

    // ─── Evaluation ──────────────────────────────────────────────────────

    /// Evaluate one fibre if any dirty bit is set (or it has never
    /// committed); otherwise its prior result stands.
    pub(crate) fn evaluate(&mut self, id: FibreId) -> Result<()> {
        let (descriptor, mounting, path, analysis) = {
            let analysis = self.analysis;
            let fibre = self.arena.get_mut(id)?;
            if fibre.doomed {
                return Ok(());
            }
            if fibre.status == FibreStatus::Active && fibre.dirty.is_empty() {
                return Ok(());
            }
            fibre.failure = None;
            fibre.bindings.clear();
            (
                Rc::clone(&fibre.descriptor),
                fibre.status == FibreStatus::Uninitialized,
                fibre.path.clone(),
                analysis,
            )
        };

        trace!(%path, descriptor = descriptor.type_name(), "evaluate");
        self.notify(|observer| observer.on_evaluation(&path, descriptor.type_name()));

        self.frames.push(EvalFrame::new(id, mounting));
        let frame_index = self.frames.len() - 1;
        let outcome = {
            let mut cx = CallCx::new(self, frame_index, id, path.clone(), mounting);
            if analysis {
                descriptor.evaluate_analysis(&mut cx)
            } else {
                descriptor.evaluate(&mut cx)
            }
        };
        let frame = self.frames.pop().expect("frame pushed above");

        match outcome {
            Ok(value) => self.finalize(id, &path, frame, value),
            Err(error) => {
                effects::restore(&mut self.arena, frame.effects);
                let error = match error {
                    WeftError::NodeFailure {
                        path: origin,
                        message,
                    } if origin.is_root() => WeftError::NodeFailure {
                        path: path.clone(),
                        message,
                    },
                    other => other,
                };
                if let Ok(fibre) = self.arena.get_mut(id) {
                    fibre.failure = Some(error.clone());
                }
                // Dirty bits were not cleared; re-enroll so the next tick
                // retries instead of reusing a result that was never
                // committed.
                if self.queued.insert(id) {
                    self.work.push(id);
                }
                Err(error)
            }
        }
    }

    fn finalize(
        &mut self,
        id: FibreId,
        path: &KeyPath,
        frame: EvalFrame,
        value: Value,
    ) -> Result<()> {
        // Hook slot count is constant while Active.
        {
            let fibre = self.arena.get(id)?;
            if !frame.mounting && frame.cursor != fibre.hooks.len() {
                return Err(WeftError::HookOrderViolation {
                    path: path.clone(),
                    slot: frame.cursor,
                    detail: format!(
                        "evaluation used {} of {} hook slots",
                        frame.cursor,
                        fibre.hooks.len()
                    ),
                });
            }
        }

        // Children present last tick but untouched this tick unmount.
        let removed: Vec<FibreId> = {
            let fibre = self.arena.get(id)?;
            fibre
                .children
                .iter()
                .map(|&(_, child)| child)
                .filter(|child| !frame.children.iter().any(|&(_, kept)| kept == *child))
                .collect()
        };

        // Keep predecessor/successor edges mutual.
        let old_preds = {
            let fibre = self.arena.get_mut(id)?;
            mem::take(&mut fibre.predecessors)
        };
        for &previous in &old_preds {
            if !frame.preds.contains(&previous) {
                if let Ok(fibre) = self.arena.get_mut(previous) {
                    fibre.successors.remove(&id);
                }
            }
        }
        for &added in &frame.preds {
            if !old_preds.contains(&added) {
                if let Ok(fibre) = self.arena.get_mut(added) {
                    fibre.successors.insert(id);
                }
            }
        }

        // Commit under structural equality.
        let (mounted, changed, revision) = {
            let fibre = self.arena.get_mut(id)?;
            let mounted = fibre.status == FibreStatus::Uninitialized;
            let (changed, revision) = match &fibre.committed {
                Some(previous) if previous.value == value => (false, previous.revision),
                Some(previous) => (true, previous.revision + 1),
                None => (true, 1),
            };
            fibre.committed = Some(Committed {
                value: value.clone(),
                revision,
            });
            fibre.predecessors = frame.preds;
            fibre.children = frame.children;
            fibre.dirty = Dirty::empty();
            fibre.status = FibreStatus::Active;
            fibre.bindings.retain(|_, binding| !removed.contains(binding));
            (mounted, changed, revision)
        };

        let descriptor_name = self.arena.get(id)?.descriptor.type_name();
        if mounted {
            trace!(%path, "mount");
            self.notify(|observer| observer.on_mount(path, descriptor_name));
        }
        if changed {
            trace!(%path, revision, "commit");
            self.notify(|observer| observer.on_commit(path, descriptor_name, &value));
            let successors: Vec<FibreId> =
                self.arena.get(id)?.successors.iter().copied().collect();
            for successor in successors {
                self.mark_dirty(successor, Dirty::PREDECESSOR_CHANGED);
            }
        }

        for child in removed {
            self.schedule_disposal(child);
        }
        self.effects.extend(frame.effects);
        Ok(())
    }

    /// Find or mount the child of `parent` under `key` for `descriptor`.
    /// A type change mounts a fresh fibre; the old one unmounts when the
    /// parent commits without it.
    pub(crate) fn reconcile_child(
        &mut self,
        parent: FibreId,
        key: &Key,
        descriptor: Rc<dyn Descriptor>,
    ) -> Result<FibreId> {
        let (parent_path, parent_depth, previous) = {
            let fibre = self.arena.get(parent)?;
            (fibre.path.clone(), fibre.depth, fibre.child_id(key))
        };
        if let Some(existing) = previous {
            if let Ok(child) = self.arena.get(existing) {
                if !child.doomed
                    && child.descriptor.as_any().type_id() == descriptor.as_any().type_id()
                {
                    let props_changed = !child.descriptor.eq_descriptor(&*descriptor);
                    let child = self
                        .arena
                        .get_mut(existing)
                        .expect("child checked live above");
                    child.descriptor = descriptor;
                    if props_changed {
                        child.dirty |= Dirty::PROPS_CHANGED;
                    }
                    return Ok(existing);
                }
            }
        }
        let path = parent_path.child(key.clone());
        trace!(%path, "mount fibre");
        Ok(self.arena.insert_with(|id| {
            Fibre::new(id, path, Some(parent), parent_depth + 1, descriptor)
        }))
    }

    /// The fresh child view of a fibre: its in-flight evaluation frame if
    /// it is mid-evaluation, its committed children otherwise.
    pub(crate) fn current_children_of(&self, id: FibreId) -> Vec<FibreId> {
        if let Some(frame) = self.frames.iter().rev().find(|frame| frame.id == id) {
            return frame.children.iter().map(|&(_, child)| child).collect();
        }
        self.arena
            .get(id)
            .map(|fibre| fibre.children.iter().map(|&(_, child)| child).collect())
            .unwrap_or_default()
    }

    /// Set dirty bits and enroll in the work set. Fibres currently
    /// mid-evaluation are skipped: they observe fresh inputs directly.
    pub(crate) fn mark_dirty(&mut self, id: FibreId, bits: Dirty) {
        if self.frames.iter().any(|frame| frame.id == id) {
            return;
        }
        let Ok(fibre) = self.arena.get_mut(id) else { return };
        if fibre.doomed || fibre.status == FibreStatus::Disposed {
            return;
        }
        fibre.dirty |= bits;
        if self.queued.insert(id) {
            self.work.push(id);
        }
    }

    pub(crate) fn write_queue(&self) -> WriteQueue {
        Rc::clone(&self.writes)
    }

    fn notify(&self, callback: impl Fn(&dyn FibreObserver)) {
        for observer in &self.observers {
            callback(observer.as_ref());
        }
    }

    // ─── Effects and disposal ────────────────────────────────────────────

    fn flush_effects(&mut self) {
        let pending = mem::take(&mut self.effects);
        for entry in pending {
            // A fibre that committed twice this tick queues two entries for
            // the same slot; the second one picks up the first body's
            // cleanup from the slot.
            let cleanup = entry.cleanup.or_else(|| {
                self.arena
                    .get_mut(entry.fibre)
                    .ok()
                    .and_then(|fibre| match fibre.hooks.get_mut(entry.slot) {
                        Some(HookSlot::Effect(slot)) => slot.cleanup.take(),
                        _ => None,
                    })
            });
            if let Some(cleanup) = cleanup {
                cleanup();
            }
            let mut teardown = Teardown::new();
            (entry.body)(&mut teardown);
            if let Ok(fibre) = self.arena.get_mut(entry.fibre) {
                if let Some(HookSlot::Effect(slot)) = fibre.hooks.get_mut(entry.slot) {
                    slot.cleanup = teardown.into_cleanup();
                }
            }
        }
    }

    /// Mark a dropped subtree for end-of-tick teardown and invalidate its
    /// external successors (fibres outside the subtree that read results
    /// from inside it).
    fn schedule_disposal(&mut self, root: FibreId) {
        let mut subtree = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Ok(fibre) = self.arena.get(id) else { continue };
            if fibre.doomed {
                continue;
            }
            subtree.push(id);
            for &(_, child) in &fibre.children {
                stack.push(child);
            }
        }
        if subtree.is_empty() {
            return;
        }
        let members: AHashSet<FibreId> = subtree.iter().copied().collect();
        let mut external = Vec::new();
        for &id in &subtree {
            if let Ok(fibre) = self.arena.get_mut(id) {
                fibre.doomed = true;
            }
            if let Ok(fibre) = self.arena.get(id) {
                for &successor in &fibre.successors {
                    if !members.contains(&successor) {
                        external.push(successor);
                    }
                }
            }
        }
        for successor in external {
            self.mark_dirty(successor, Dirty::PREDECESSOR_CHANGED);
        }
        trace!(root = %root, fibres = subtree.len(), "schedule unmount");
        self.disposal.push(root);
    }

    fn flush_disposals(&mut self) {
        let roots = mem::take(&mut self.disposal);
        for root in roots {
            self.dispose_subtree(root);
        }
    }

    fn dispose_subtree(&mut self, root: FibreId) {
        if !self.arena.contains(root) {
            return;
        }
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Ok(fibre) = self.arena.get(id) else { continue };
            order.push(id);
            for &(_, child) in &fibre.children {
                stack.push(child);
            }
        }
        // Reverse pre-order puts every fibre after its descendants.
        for &id in order.iter().rev() {
            self.dispose_fibre(id);
        }
    }

    fn dispose_fibre(&mut self, id: FibreId) {
        let Some(mut fibre) = self.arena.remove(id) else { return };
        fibre.status = FibreStatus::Disposed;
        trace!(path = %fibre.path, "unmount");
        self.notify(|observer| observer.on_unmount(&fibre.path, fibre.descriptor.type_name()));
        // Slot teardown in reverse order; later slots may depend on
        // earlier ones.
        while let Some(slot) = fibre.hooks.pop() {
            match slot {
                HookSlot::Effect(effect) => {
                    if let Some(cleanup) = effect.cleanup {
                        cleanup();
                    }
                }
                HookSlot::Resource(resource) => {
                    if let Some(release) = resource.release {
                        release();
                    }
                }
                _ => {}
            }
        }
        for predecessor in fibre.predecessors.drain(..) {
            if let Ok(other) = self.arena.get_mut(predecessor) {
                other.successors.remove(&id);
            }
        }
        for successor in fibre.successors.drain() {
            if let Ok(other) = self.arena.get_mut(successor) {
                other.predecessors.retain(|&predecessor| predecessor != id);
            }
        }
    }
}

impl fmt::Debug for FibreRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FibreRuntime")
            .field("live_fibres", &self.arena.live_count())
            .field("queued", &self.work.len())
            .field("ticks", &self.ticks)
            .field("analysis", &self.analysis)
            .finish()
    }
}

impl Drop for FibreRuntime {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
