//! Node identity types shared between the engine and its ports
//!
//! Shadow nodes live in a generational arena owned by the engine crate.
//! Ports and callbacks refer to them by [`NodeId`], a copyable index that
//! becomes stale (and resolves to nothing) once the node is destroyed.
//! Parent links and the fsid index hold `NodeId`s, never ownership.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Kind of a shadow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A regular file
    File,
    /// A directory
    Folder,
}

impl NodeKind {
    /// Index into per-kind counter arrays
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            NodeKind::File => 0,
            NodeKind::Folder => 1,
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Folder => write!(f, "folder"),
        }
    }
}

/// Generational index of a shadow node in the engine's arena
///
/// A `NodeId` held across a node's destruction does not dangle: the arena
/// checks the generation on every lookup and reports the slot as vacant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Builds a `NodeId` from its raw parts. Only the arena should mint
    /// new ids; everything else copies existing ones.
    #[must_use]
    pub const fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the arena
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot had when this id was minted
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Opaque handle of the remote counterpart of a shadow node
///
/// The engine never interprets this value; it only stores it, persists it,
/// and uses its presence to decide whether a parent is ready to receive
/// children (reconciliation postpones moves into parents that have no
/// remote counterpart yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(pub u64);

impl Display for RemoteHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Opaque link to an in-flight transfer owned by the upper layer
///
/// The engine clears this when a local change invalidates the transfer;
/// scheduling and teardown of the transfer itself happen above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferSlot(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_roundtrip() {
        let id = NodeId::from_parts(7, 3);
        assert_eq!(id.index(), 7);
        assert_eq!(id.generation(), 3);
        assert_eq!(id.to_string(), "7v3");
    }

    #[test]
    fn test_node_id_equality_includes_generation() {
        let a = NodeId::from_parts(1, 1);
        let b = NodeId::from_parts(1, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_index() {
        assert_eq!(NodeKind::File.index(), 0);
        assert_eq!(NodeKind::Folder.index(), 1);
    }
}
