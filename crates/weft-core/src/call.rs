#![forbid(unsafe_code)]

//! The call context: the handle a node function evaluates through.
//!
//! A [`CallCx`] is valid only for the duration of one evaluation of one
//! fibre. It mediates child evaluation (reusing or mounting children by
//! key), positional hook dispatch, and context/capture access, and it
//! records which fibres this evaluation read so the runtime can maintain
//! the dependency graph.
//!
//! # Invariants
//!
//! 1. Child keys are unique among siblings within one evaluation
//!    (`DuplicateKey` otherwise).
//! 2. Each `use_*` call consumes the next hook slot; the kind must match on
//!    every evaluation after the mounting one (`HookOrderViolation`
//!    otherwise).
//! 3. Every committed result read through the context (child results,
//!    context values, collected captures) is recorded as a predecessor of
//!    the current fibre.

use std::rc::Rc;

use crate::effects::{PendingEffect, Teardown};
use crate::error::{Result, WeftError};
use crate::fibre::{Dirty, FibreId};
use crate::hooks::{
    CaptureEmitSlot, ContextReadSlot, EffectSlot, HookKind, HookSlot, MemoSlot, ResourceSlot,
    Setter, StateSlot,
};
use crate::key::{Key, KeyPath};
use crate::props::IntoDescriptor;
use crate::runtime::FibreRuntime;
use crate::scope::{CaptureCollector, CaptureKey, ContextKey, ContextValue, ScopeKey};
use crate::value::{deps_changed, Deps, Value};

/// Per-evaluation handle passed to a node function.
pub struct CallCx<'rt> {
    rt: &'rt mut FibreRuntime,
    frame: usize,
    fibre: FibreId,
    path: KeyPath,
    mounting: bool,
}

impl<'rt> CallCx<'rt> {
    pub(crate) fn new(
        rt: &'rt mut FibreRuntime,
        frame: usize,
        fibre: FibreId,
        path: KeyPath,
        mounting: bool,
    ) -> Self {
        Self {
            rt,
            frame,
            fibre,
            path,
            mounting,
        }
    }

    /// Key path of the fibre being evaluated.
    #[must_use]
    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// Whether this tick runs with the analysis dispatch: descriptors that
    /// normally short-circuit children evaluate all of them.
    #[must_use]
    pub fn is_analysis(&self) -> bool {
        self.rt.analysis_mode()
    }

    // ─── Children ────────────────────────────────────────────────────────

    /// Look up or mount the child under `key`, evaluate it (or reuse its
    /// committed result when nothing changed), record it as a predecessor,
    /// and return its committed result.
    pub fn evaluate_child(
        &mut self,
        key: impl Into<Key>,
        descriptor: impl IntoDescriptor,
    ) -> Result<Value> {
        let key = key.into();
        let descriptor = descriptor.into_descriptor();
        self.claim_child_key(&key)?;
        let child = self.rt.reconcile_child(self.fibre, &key, descriptor)?;
        self.rt.frames[self.frame].children.push((key, child));
        self.rt.evaluate(child)?;
        self.add_predecessor(child);
        let fibre = self.rt.arena.get(child)?;
        Ok(fibre
            .committed
            .as_ref()
            .expect("child committed by evaluate")
            .value
            .clone())
    }

    /// Evaluate a descriptor under the current fibre without adding a child
    /// layer: hooks land on the current fibre, exactly as if the
    /// descriptor's function had been called directly.
    pub fn evaluate_inline(&mut self, descriptor: impl IntoDescriptor) -> Result<Value> {
        let descriptor = descriptor.into_descriptor();
        if self.is_analysis() {
            descriptor.evaluate_analysis(self)
        } else {
            descriptor.evaluate(self)
        }
    }

    // ─── Hooks ───────────────────────────────────────────────────────────

    /// In-tree state. Returns the current value and a stable setter whose
    /// writes are buffered and applied at the start of the next tick.
    /// The initial value only matters on the mounting evaluation.
    pub fn use_state(&mut self, initial: impl Into<Value>) -> Result<(Value, Setter)> {
        let slot = self.next_slot();
        if self.claim_slot(slot, HookKind::State)? {
            let fibre = self.rt.arena.get(self.fibre)?;
            let HookSlot::State(state) = &fibre.hooks[slot] else {
                unreachable!("slot kind checked by claim_slot")
            };
            Ok((state.value.clone(), state.setter.clone()))
        } else {
            let setter = Setter::new(self.rt.write_queue(), self.fibre, slot);
            let value = initial.into();
            let fibre = self.rt.arena.get_mut(self.fibre)?;
            fibre.hooks.push(HookSlot::State(StateSlot {
                value: value.clone(),
                setter: setter.clone(),
            }));
            Ok((value, setter))
        }
    }

    /// Post-commit side effect. After a commit in which `deps` changed (or
    /// on mount), the previous cleanup runs, then `body`; teardown tasks
    /// registered by `body` become the next cleanup and run on the next
    /// deps change or on unmount.
    pub fn use_effect(
        &mut self,
        deps: Deps,
        body: impl FnOnce(&mut Teardown) + 'static,
    ) -> Result<()> {
        let slot = self.next_slot();
        let pending = if self.claim_slot(slot, HookKind::Effect)? {
            let fibre = self.rt.arena.get_mut(self.fibre)?;
            let HookSlot::Effect(effect) = &mut fibre.hooks[slot] else {
                unreachable!("slot kind checked by claim_slot")
            };
            if deps_changed(&effect.deps, &deps) {
                effect.deps = deps;
                Some(PendingEffect {
                    fibre: self.fibre,
                    slot,
                    cleanup: effect.cleanup.take(),
                    body: Box::new(body),
                })
            } else {
                None
            }
        } else {
            let fibre = self.rt.arena.get_mut(self.fibre)?;
            fibre.hooks.push(HookSlot::Effect(EffectSlot {
                deps,
                cleanup: None,
            }));
            Some(PendingEffect {
                fibre: self.fibre,
                slot,
                cleanup: None,
                body: Box::new(body),
            })
        };
        if let Some(pending) = pending {
            self.rt.frames[self.frame].effects.push(pending);
        }
        Ok(())
    }

    /// Memoized computation: `compute` runs only when `deps` change.
    pub fn use_memo(&mut self, deps: Deps, compute: impl FnOnce() -> Value) -> Result<Value> {
        let slot = self.next_slot();
        if self.claim_slot(slot, HookKind::Memo)? {
            let cached = {
                let fibre = self.rt.arena.get(self.fibre)?;
                let HookSlot::Memo(memo) = &fibre.hooks[slot] else {
                    unreachable!("slot kind checked by claim_slot")
                };
                if deps_changed(&memo.deps, &deps) {
                    None
                } else {
                    Some(memo.value.clone())
                }
            };
            if let Some(value) = cached {
                return Ok(value);
            }
            let value = compute();
            let fibre = self.rt.arena.get_mut(self.fibre)?;
            let HookSlot::Memo(memo) = &mut fibre.hooks[slot] else {
                unreachable!("slot kind checked by claim_slot")
            };
            memo.deps = deps;
            memo.value = value.clone();
            Ok(value)
        } else {
            let value = compute();
            let fibre = self.rt.arena.get_mut(self.fibre)?;
            fibre.hooks.push(HookSlot::Memo(MemoSlot {
                deps,
                value: value.clone(),
            }));
            Ok(value)
        }
    }

    /// Scoped acquisition. The acquired value is returned synchronously;
    /// teardown tasks registered with the [`Teardown`] run when `deps`
    /// change (before re-acquisition) or on unmount.
    pub fn use_resource(
        &mut self,
        deps: Deps,
        acquire: impl FnOnce(&mut Teardown) -> Value,
    ) -> Result<Value> {
        let slot = self.next_slot();
        if self.claim_slot(slot, HookKind::Resource)? {
            let stale_release = {
                let fibre = self.rt.arena.get_mut(self.fibre)?;
                let HookSlot::Resource(resource) = &mut fibre.hooks[slot] else {
                    unreachable!("slot kind checked by claim_slot")
                };
                if deps_changed(&resource.deps, &deps) {
                    Some(resource.release.take())
                } else {
                    None
                }
            };
            let Some(release) = stale_release else {
                let fibre = self.rt.arena.get(self.fibre)?;
                let HookSlot::Resource(resource) = &fibre.hooks[slot] else {
                    unreachable!("slot kind checked by claim_slot")
                };
                return Ok(resource.value.clone());
            };
            if let Some(release) = release {
                release();
            }
            let mut teardown = Teardown::new();
            let value = acquire(&mut teardown);
            let fibre = self.rt.arena.get_mut(self.fibre)?;
            let HookSlot::Resource(resource) = &mut fibre.hooks[slot] else {
                unreachable!("slot kind checked by claim_slot")
            };
            resource.deps = deps;
            resource.value = value.clone();
            resource.release = teardown.into_cleanup();
            Ok(value)
        } else {
            let mut teardown = Teardown::new();
            let value = acquire(&mut teardown);
            let fibre = self.rt.arena.get_mut(self.fibre)?;
            fibre.hooks.push(HookSlot::Resource(ResourceSlot {
                deps,
                value: value.clone(),
                release: teardown.into_cleanup(),
            }));
            Ok(value)
        }
    }

    // ─── Contexts ────────────────────────────────────────────────────────

    /// Bind `key` to `value` for this fibre's subtree. The value lives in
    /// an internal binding fibre whose revision bumps only when the value
    /// changes, so only readers of this key are invalidated by a change.
    pub fn provide_context(&mut self, key: &ContextKey, value: impl Into<Value>) -> Result<()> {
        let child_key = key.binding_key();
        self.claim_child_key(&child_key)?;
        let descriptor: Rc<dyn crate::props::Descriptor> = Rc::new(ContextValue {
            value: value.into(),
        });
        let binding = self.rt.reconcile_child(self.fibre, &child_key, descriptor)?;
        self.rt.frames[self.frame].children.push((child_key, binding));
        self.rt.evaluate(binding)?;
        self.rt
            .arena
            .get_mut(self.fibre)?
            .bindings
            .insert(ScopeKey::Context(key.clone()), binding);
        Ok(())
    }

    /// Read the value bound by the nearest provider of `key`, recording
    /// the provider as a predecessor. Fails with `MissingContext` when no
    /// ancestor provides the key.
    pub fn use_context(&mut self, key: &ContextKey) -> Result<Value> {
        let slot = self.next_slot();
        let exists = self.claim_slot(slot, HookKind::ContextRead)?;
        let provider = self
            .resolve_scope(&ScopeKey::Context(key.clone()))
            .ok_or_else(|| WeftError::MissingContext {
                path: self.path.clone(),
                name: key.name_rc(),
            })?;
        {
            let fibre = self.rt.arena.get_mut(self.fibre)?;
            if exists {
                let HookSlot::ContextRead(read) = &mut fibre.hooks[slot] else {
                    unreachable!("slot kind checked by claim_slot")
                };
                read.key = key.clone();
                read.provider = provider;
            } else {
                fibre.hooks.push(HookSlot::ContextRead(ContextReadSlot {
                    key: key.clone(),
                    provider,
                }));
            }
        }
        let value = {
            let binding = self.rt.arena.get(provider)?;
            binding
                .committed
                .as_ref()
                .expect("binding fibre commits before readers run")
                .value
                .clone()
        };
        self.add_predecessor(provider);
        Ok(value)
    }

    // ─── Captures ────────────────────────────────────────────────────────

    /// Declare this fibre an aggregator for `key`: descendants evaluated
    /// under it may contribute with [`use_capture`](Self::use_capture), and
    /// after evaluating the subtree this fibre reads the contributions with
    /// [`collect_capture`](Self::collect_capture).
    pub fn provide_capture(&mut self, key: &CaptureKey) -> Result<()> {
        let child_key = key.collector_key();
        self.claim_child_key(&child_key)?;
        let descriptor: Rc<dyn crate::props::Descriptor> =
            Rc::new(CaptureCollector { key: key.clone() });
        let collector = self.rt.reconcile_child(self.fibre, &child_key, descriptor)?;
        self.rt.frames[self.frame].children.push((child_key, collector));
        self.rt
            .arena
            .get_mut(self.fibre)?
            .bindings
            .insert(ScopeKey::Capture(key.clone()), collector);
        Ok(())
    }

    /// Contribute `value` to the nearest aggregator for `key`. At most one
    /// contribution per key per fibre per tick (`DuplicateCapture`
    /// otherwise).
    pub fn use_capture(&mut self, key: &CaptureKey, value: impl Into<Value>) -> Result<()> {
        let slot = self.next_slot();
        let exists = self.claim_slot(slot, HookKind::CaptureEmit)?;
        if self.rt.frames[self.frame].captures_used.contains(key) {
            return Err(WeftError::DuplicateCapture {
                path: self.path.clone(),
                name: key.name_rc(),
            });
        }
        let collector = self
            .resolve_scope(&ScopeKey::Capture(key.clone()))
            .ok_or_else(|| WeftError::MissingContext {
                path: self.path.clone(),
                name: key.name_rc(),
            })?;
        let value = value.into();
        let changed = {
            let fibre = self.rt.arena.get_mut(self.fibre)?;
            if exists {
                let HookSlot::CaptureEmit(emit) = &mut fibre.hooks[slot] else {
                    unreachable!("slot kind checked by claim_slot")
                };
                let changed =
                    emit.collector != collector || emit.value != value || emit.key != *key;
                emit.key = key.clone();
                emit.collector = collector;
                emit.value = value;
                changed
            } else {
                fibre.hooks.push(HookSlot::CaptureEmit(CaptureEmitSlot {
                    key: key.clone(),
                    collector,
                    value,
                }));
                true
            }
        };
        self.rt.frames[self.frame].captures_used.push(key.clone());
        if changed {
            self.rt.mark_dirty(collector, Dirty::STATE_CHANGED);
        }
        Ok(())
    }

    /// Read the contributions gathered for `key` this tick, ordered by
    /// pre-order traversal of the aggregator's subtree in child-key order.
    /// Call after evaluating the subtree; the collector is recorded as a
    /// predecessor so contribution changes re-invalidate the aggregator.
    pub fn collect_capture(&mut self, key: &CaptureKey) -> Result<Vec<Value>> {
        let collector = self
            .resolve_scope(&ScopeKey::Capture(key.clone()))
            .ok_or_else(|| WeftError::MissingContext {
                path: self.path.clone(),
                name: key.name_rc(),
            })?;
        // Contributors may have dropped out of the subtree this tick without
        // touching the collector; force a fresh gather. The result commits
        // under equality, so an unchanged list propagates nothing.
        self.rt.mark_dirty(collector, Dirty::STATE_CHANGED);
        self.rt.evaluate(collector)?;
        self.add_predecessor(collector);
        let fibre = self.rt.arena.get(collector)?;
        let committed = fibre
            .committed
            .as_ref()
            .expect("collector committed by evaluate");
        Ok(committed.value.as_list().unwrap_or(&[]).to_vec())
    }

    /// Pre-order walk of the aggregator's subtree collecting contributions
    /// bound to the current (collector) fibre. Runs as the collector's own
    /// evaluation.
    pub(crate) fn gather_capture_entries(&mut self) -> Result<Value> {
        let collector = self.fibre;
        let Some(aggregator) = self.rt.arena.get(collector)?.parent else {
            return Ok(Value::List(Rc::from(Vec::new())));
        };
        let mut contributors: Vec<(FibreId, Value)> = Vec::new();
        let mut stack: Vec<FibreId> = Vec::new();
        for child in self.rt.current_children_of(aggregator).into_iter().rev() {
            stack.push(child);
        }
        while let Some(id) = stack.pop() {
            if id == collector {
                continue;
            }
            let Ok(fibre) = self.rt.arena.get(id) else {
                continue;
            };
            if fibre.doomed {
                continue;
            }
            for hook in &fibre.hooks {
                if let HookSlot::CaptureEmit(emit) = hook {
                    if emit.collector == collector {
                        contributors.push((id, emit.value.clone()));
                    }
                }
            }
            for child in self.rt.current_children_of(id).into_iter().rev() {
                stack.push(child);
            }
        }
        for &(contributor, _) in &contributors {
            self.add_predecessor(contributor);
        }
        let values: Vec<Value> = contributors.into_iter().map(|(_, value)| value).collect();
        Ok(Value::List(Rc::from(values)))
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn next_slot(&mut self) -> usize {
        let frame = &mut self.rt.frames[self.frame];
        let slot = frame.cursor;
        frame.cursor += 1;
        slot
    }

    /// `Ok(true)`: the slot exists and matches. `Ok(false)`: append
    /// (mounting evaluation only).
    fn claim_slot(&self, slot: usize, expected: HookKind) -> Result<bool> {
        let existing = {
            let fibre = self.rt.arena.get(self.fibre)?;
            fibre.hooks.get(slot).map(HookSlot::kind)
        };
        match existing {
            Some(kind) if kind == expected => Ok(true),
            Some(kind) => Err(WeftError::HookOrderViolation {
                path: self.path.clone(),
                slot,
                detail: format!(
                    "expected {} slot, found {}",
                    expected.label(),
                    kind.label()
                ),
            }),
            None if self.mounting => Ok(false),
            None => Err(WeftError::HookOrderViolation {
                path: self.path.clone(),
                slot,
                detail: format!(
                    "no slot for {} call; the slot count may not grow after mount",
                    expected.label()
                ),
            }),
        }
    }

    fn claim_child_key(&self, key: &Key) -> Result<()> {
        if self.rt.frames[self.frame]
            .children
            .iter()
            .any(|(existing, _)| existing == key)
        {
            return Err(WeftError::DuplicateKey {
                parent: self.path.clone(),
                key: key.clone(),
            });
        }
        Ok(())
    }

    fn resolve_scope(&self, key: &ScopeKey) -> Option<FibreId> {
        let mut cursor = Some(self.fibre);
        while let Some(id) = cursor {
            let fibre = self.rt.arena.get(id).ok()?;
            if let Some(&binding) = fibre.bindings.get(key) {
                if self.rt.arena.contains(binding) {
                    return Some(binding);
                }
            }
            cursor = fibre.parent;
        }
        None
    }

    pub(crate) fn add_predecessor(&mut self, id: FibreId) {
        let frame = &mut self.rt.frames[self.frame];
        if !frame.preds.contains(&id) {
            frame.preds.push(id);
        }
    }
}
