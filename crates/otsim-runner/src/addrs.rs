//! Address indexes used for frame routing.

use std::collections::HashMap;

use otsim_common::{ExtAddr, NodeId, Rloc16};
use tracing::warn;

/// The dispatcher's address lookup tables.
///
/// Extended addresses are unique per node; an extended address may migrate
/// when a node reports a new one. Rloc16s are only unique within a
/// partition, so that index is multi-valued.
#[derive(Debug, Default)]
pub struct AddressMaps {
    ext: HashMap<u64, NodeId>,
    rloc: HashMap<Rloc16, Vec<NodeId>>,
}

impl AddressMaps {
    /// Create empty maps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Node owning an extended address.
    pub fn node_by_ext_addr(&self, addr: ExtAddr) -> Option<NodeId> {
        if !addr.is_valid() {
            return None;
        }
        self.ext.get(&addr.0).copied()
    }

    /// All nodes currently using an rloc16.
    pub fn nodes_by_rloc16(&self, rloc16: Rloc16) -> &[NodeId] {
        self.rloc.get(&rloc16).map_or(&[], Vec::as_slice)
    }

    /// Move `node` from `old` to `new` in the extended-address index.
    ///
    /// Either address may be the invalid sentinel (absent from the index).
    /// A collision on `new` means two nodes claim one EUI-64; the old
    /// binding is replaced, loudly, rather than corrupting the index.
    pub fn set_ext_addr(&mut self, node: NodeId, old: ExtAddr, new: ExtAddr) {
        if old.is_valid() {
            self.ext.remove(&old.0);
        }
        if new.is_valid() {
            if let Some(&other) = self.ext.get(&new.0) {
                if other != node {
                    warn!(addr = %new, node, other, "extended address collision, rebinding");
                }
            }
            self.ext.insert(new.0, node);
        }
    }

    /// Add `node` under `rloc16`.
    pub fn add_rloc16(&mut self, node: NodeId, rloc16: Rloc16) {
        let nodes = self.rloc.entry(rloc16).or_default();
        if !nodes.contains(&node) {
            nodes.push(node);
        }
    }

    /// Remove `node` from under `rloc16`.
    pub fn remove_rloc16(&mut self, node: NodeId, rloc16: Rloc16) {
        if let Some(nodes) = self.rloc.get_mut(&rloc16) {
            nodes.retain(|&n| n != node);
            if nodes.is_empty() {
                self.rloc.remove(&rloc16);
            }
        }
    }

    /// Drop every binding of a deleted node.
    pub fn remove_node(&mut self, node: NodeId) {
        self.ext.retain(|_, &mut n| n != node);
        self.rloc.retain(|_, nodes| {
            nodes.retain(|&n| n != node);
            !nodes.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otsim_common::INVALID_EXT_ADDR;

    #[test]
    fn ext_addr_binding_and_migration() {
        let mut maps = AddressMaps::new();
        let a = ExtAddr(0x1111);
        let b = ExtAddr(0x2222);

        maps.set_ext_addr(1, INVALID_EXT_ADDR, a);
        assert_eq!(maps.node_by_ext_addr(a), Some(1));

        // The node reports a new address; the old key is released.
        maps.set_ext_addr(1, a, b);
        assert_eq!(maps.node_by_ext_addr(a), None);
        assert_eq!(maps.node_by_ext_addr(b), Some(1));

        // The invalid sentinel never resolves.
        assert_eq!(maps.node_by_ext_addr(INVALID_EXT_ADDR), None);
    }

    #[test]
    fn rloc16_is_multivalued() {
        let mut maps = AddressMaps::new();
        maps.add_rloc16(1, 0x0400);
        maps.add_rloc16(2, 0x0400);
        maps.add_rloc16(1, 0x0400); // idempotent
        assert_eq!(maps.nodes_by_rloc16(0x0400), &[1, 2]);

        maps.remove_rloc16(1, 0x0400);
        assert_eq!(maps.nodes_by_rloc16(0x0400), &[2]);

        maps.remove_rloc16(2, 0x0400);
        assert!(maps.nodes_by_rloc16(0x0400).is_empty());
    }

    #[test]
    fn remove_node_clears_both_indexes() {
        let mut maps = AddressMaps::new();
        maps.set_ext_addr(7, INVALID_EXT_ADDR, ExtAddr(0xABCD));
        maps.add_rloc16(7, 0x0800);
        maps.add_rloc16(8, 0x0800);

        maps.remove_node(7);
        assert_eq!(maps.node_by_ext_addr(ExtAddr(0xABCD)), None);
        assert_eq!(maps.nodes_by_rloc16(0x0800), &[8]);
    }
}
