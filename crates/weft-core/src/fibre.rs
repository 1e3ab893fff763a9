#![forbid(unsafe_code)]

//! Fibre records and the arena that owns them.
//!
//! A fibre is the persistent evaluation record for one node: its descriptor,
//! last committed result, revision counter, hook slots, ordered children,
//! and the two adjacency sets of the dependency graph. Fibres are owned
//! exclusively by the [`Arena`]; parent links, child links, and
//! predecessor/successor links are non-owning [`FibreId`]s.
//!
//! # Invariants
//!
//! 1. A fibre's key path is unique in the tree; siblings never share a key.
//! 2. Predecessor/successor edges are mutual: `X ∈ preds(Y)` iff
//!    `Y ∈ succs(X)`. The runtime maintains both sides when an evaluation
//!    commits and when a fibre is disposed.
//! 3. The revision counter is bumped only when the committed result changes
//!    under structural equality, and increases monotonically.
//! 4. A stale [`FibreId`] (generation mismatch) never aliases a live fibre.

use std::fmt;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::error::{Result, WeftError};
use crate::hooks::HookSlot;
use crate::key::{Key, KeyPath};
use crate::props::Descriptor;
use crate::scope::ScopeKey;
use crate::value::Value;

bitflags::bitflags! {
    /// Why a fibre needs re-evaluation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dirty: u8 {
        /// The descriptor passed by the parent is not equal to the stored one.
        const PROPS_CHANGED = 1 << 0;
        /// A predecessor's committed result changed.
        const PREDECESSOR_CHANGED = 1 << 1;
        /// A buffered state write landed in one of this fibre's slots.
        const STATE_CHANGED = 1 << 2;
    }
}

/// Lifecycle state of a fibre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FibreStatus {
    /// Mounted but never committed.
    Uninitialized,
    /// Committed at least once.
    Active,
    /// Torn down; the record is about to leave the arena.
    Disposed,
}

/// Generational handle to a fibre slot in the arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FibreId(u32, u32);

impl FibreId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self(index, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn generation(self) -> u32 {
        self.1
    }
}

impl fmt::Debug for FibreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FibreId({}v{})", self.0, self.1)
    }
}

impl fmt::Display for FibreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.0, self.1)
    }
}

/// A committed evaluation result.
#[derive(Debug, Clone)]
pub(crate) struct Committed {
    pub value: Value,
    pub revision: u64,
}

/// The per-node evaluation record.
pub(crate) struct Fibre {
    pub id: FibreId,
    pub path: KeyPath,
    pub parent: Option<FibreId>,
    pub depth: u32,
    pub descriptor: Rc<dyn Descriptor>,
    pub status: FibreStatus,
    pub dirty: Dirty,
    /// Set once this fibre's parent stopped evaluating it; the record is
    /// torn down at the end of the tick and must not be re-evaluated.
    pub doomed: bool,
    pub committed: Option<Committed>,
    /// Children in the order of first evaluation within a tick.
    pub children: Vec<(Key, FibreId)>,
    pub hooks: Vec<HookSlot>,
    /// Fibres whose committed results this fibre read, in read order.
    pub predecessors: Vec<FibreId>,
    /// Inverse of `predecessors`, maintained by the runtime.
    pub successors: AHashSet<FibreId>,
    /// Context/capture bindings this fibre provides to its subtree.
    pub bindings: AHashMap<ScopeKey, FibreId>,
    /// Last node-level failure, if the most recent evaluation raised.
    pub failure: Option<WeftError>,
}

impl Fibre {
    pub fn new(
        id: FibreId,
        path: KeyPath,
        parent: Option<FibreId>,
        depth: u32,
        descriptor: Rc<dyn Descriptor>,
    ) -> Self {
        Self {
            id,
            path,
            parent,
            depth,
            descriptor,
            status: FibreStatus::Uninitialized,
            dirty: Dirty::PROPS_CHANGED,
            doomed: false,
            committed: None,
            children: Vec::new(),
            hooks: Vec::new(),
            predecessors: Vec::new(),
            successors: AHashSet::new(),
            bindings: AHashMap::new(),
            failure: None,
        }
    }

    pub fn child_id(&self, key: &Key) -> Option<FibreId> {
        self.children
            .iter()
            .find(|(child_key, _)| child_key == key)
            .map(|(_, id)| *id)
    }

    pub fn revision(&self) -> u64 {
        self.committed.as_ref().map_or(0, |committed| committed.revision)
    }
}

/// Slot arena owning every fibre. Freed slots are recycled with a bumped
/// generation so stale handles fail with `DisposedAccess` instead of
/// aliasing a new fibre.
pub(crate) struct Arena {
    slots: Vec<Option<Fibre>>,
    generations: Vec<u32>,
    free: Vec<usize>,
}

impl Arena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert_with(&mut self, build: impl FnOnce(FibreId) -> Fibre) -> FibreId {
        if let Some(index) = self.free.pop() {
            let generation = self.generations[index].wrapping_add(1);
            self.generations[index] = generation;
            let id = FibreId::new(index as u32, generation);
            self.slots[index] = Some(build(id));
            id
        } else {
            let index = self.slots.len();
            let generation = 1;
            let id = FibreId::new(index as u32, generation);
            self.slots.push(Some(build(id)));
            self.generations.push(generation);
            id
        }
    }

    pub fn contains(&self, id: FibreId) -> bool {
        self.generations.get(id.idx()) == Some(&id.generation())
            && self.slots.get(id.idx()).is_some_and(Option::is_some)
    }

    pub fn get(&self, id: FibreId) -> Result<&Fibre> {
        if !self.contains(id) {
            return Err(WeftError::DisposedAccess { id });
        }
        Ok(self.slots[id.idx()].as_ref().expect("live slot checked by contains"))
    }

    pub fn get_mut(&mut self, id: FibreId) -> Result<&mut Fibre> {
        if !self.contains(id) {
            return Err(WeftError::DisposedAccess { id });
        }
        Ok(self.slots[id.idx()].as_mut().expect("live slot checked by contains"))
    }

    pub fn remove(&mut self, id: FibreId) -> Option<Fibre> {
        if !self.contains(id) {
            return None;
        }
        let fibre = self.slots[id.idx()].take();
        self.free.push(id.idx());
        fibre
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn live_ids(&self) -> Vec<FibreId> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|fibre| fibre.id))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
