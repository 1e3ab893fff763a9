#![forbid(unsafe_code)]

//! Read-only tree snapshot for the external visualizer.

use serde::Serialize;

use crate::key::{Key, KeyPath};
use crate::runtime::FibreRuntime;
use crate::value::Value;

/// Snapshot of one fibre: identity, descriptor type, committed result, and
/// its dependency and child edges.
#[derive(Debug, Clone, Serialize)]
pub struct FibreSnapshot {
    pub path: KeyPath,
    pub descriptor: String,
    pub result: Option<Value>,
    pub revision: u64,
    pub predecessors: Vec<KeyPath>,
    pub children: Vec<Key>,
    pub hooks: Vec<String>,
}

/// Pre-order snapshot of the whole live tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeSnapshot {
    pub fibres: Vec<FibreSnapshot>,
}

impl TreeSnapshot {
    #[must_use]
    pub fn find(&self, path: &KeyPath) -> Option<&FibreSnapshot> {
        self.fibres.iter().find(|fibre| fibre.path == *path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fibres.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fibres.is_empty()
    }
}

impl FibreRuntime {
    /// Read-only traversal of the live tree in pre-order.
    #[must_use]
    pub fn export(&self) -> TreeSnapshot {
        let mut fibres = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            let Ok(fibre) = self.arena.get(id) else { continue };
            fibres.push(FibreSnapshot {
                path: fibre.path.clone(),
                descriptor: fibre.descriptor.type_name().to_owned(),
                result: fibre
                    .committed
                    .as_ref()
                    .map(|committed| committed.value.clone()),
                revision: fibre.revision(),
                predecessors: fibre
                    .predecessors
                    .iter()
                    .filter_map(|&predecessor| {
                        self.arena
                            .get(predecessor)
                            .ok()
                            .map(|fibre| fibre.path.clone())
                    })
                    .collect(),
                children: fibre.children.iter().map(|(key, _)| key.clone()).collect(),
                hooks: fibre.hooks.iter().map(|slot| slot.describe()).collect(),
            });
            for &(_, child) in fibre.children.iter().rev() {
                stack.push(child);
            }
        }
        TreeSnapshot { fibres }
    }
}
