//! Generational arena holding the shadow tree
//!
//! Shadow nodes reference each other in a cycle-rich way: children point at
//! parents, the fsid index points at arbitrary nodes, notify events carry
//! origin nodes. None of those links are ownership; all of them go through
//! [`NodeId`]s resolved against this arena, so a destroyed node simply stops
//! resolving instead of dangling.

use shadowsync_core::domain::NodeId;

use crate::node::ShadowNode;

struct Slot {
    generation: u32,
    node: Option<ShadowNode>,
}

/// Slot-vector arena with generation-checked lookups
#[derive(Default)]
pub struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node and returns its id
    pub fn insert(&mut self, node: ShadowNode) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId::from_parts(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId::from_parts(index, 0)
        }
    }

    /// Removes a node, invalidating every outstanding id for it
    pub fn remove(&mut self, id: NodeId) -> Option<ShadowNode> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() || slot.node.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.live -= 1;
        slot.node.take()
    }

    pub fn get(&self, id: NodeId) -> Option<&ShadowNode> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut ShadowNode> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_mut()
    }

    /// Resolves an id that is known to be live; panics on a stale id.
    /// Reconciliation uses this for ids it just obtained from the tree.
    pub fn node(&self, id: NodeId) -> &ShadowNode {
        self.get(id).expect("stale NodeId")
    }

    /// Mutable counterpart of [`node`](Self::node)
    pub fn node_mut(&mut self, id: NodeId) -> &mut ShadowNode {
        self.get_mut(id).expect("stale NodeId")
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
