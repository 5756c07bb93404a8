/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The subchain's fixed membership.
//!
//! The node set is established at startup and never changes. N = 3f+1; the
//! quorum threshold used everywhere (DA proofs, binary-agreement votes, block
//! signatures) is 2f+1.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use indexmap::IndexMap;

use crate::errors::EngineError;
use crate::types::basic::{NodeId, SchainIndex};

/// One member of the subchain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub schain_index: SchainIndex,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl NodeInfo {
    pub fn new(node_id: NodeId, schain_index: SchainIndex, ip: Ipv4Addr, port: u16) -> Self {
        Self {
            node_id,
            schain_index,
            ip,
            port,
        }
    }
}

/// The full node set, indexed by subchain position and by address.
#[derive(Clone, Debug)]
pub struct NodeRegistry {
    by_index: IndexMap<SchainIndex, NodeInfo>,
    by_ip: HashMap<Ipv4Addr, SchainIndex>,
}

impl NodeRegistry {
    /// Build the registry. Positions must be exactly 1..=N with no gaps or
    /// duplicates, and addresses must be unique.
    pub fn new(mut nodes: Vec<NodeInfo>) -> Result<NodeRegistry, EngineError> {
        if nodes.is_empty() {
            return Err(EngineError::invalid_state("empty node set"));
        }
        nodes.sort_by_key(|node| node.schain_index);

        let mut by_index = IndexMap::with_capacity(nodes.len());
        let mut by_ip = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.into_iter().enumerate() {
            if node.schain_index.int() != position as u64 + 1 {
                return Err(EngineError::invalid_state(format!(
                    "node set positions are not contiguous at {}",
                    node.schain_index
                )));
            }
            if by_ip.insert(node.ip, node.schain_index).is_some() {
                return Err(EngineError::invalid_state(format!(
                    "duplicate node address {}",
                    node.ip
                )));
            }
            by_index.insert(node.schain_index, node);
        }
        Ok(NodeRegistry { by_index, by_ip })
    }

    pub fn node_count(&self) -> usize {
        self.by_index.len()
    }

    /// The number of faults tolerated: f in N = 3f+1.
    pub fn max_faulty(&self) -> usize {
        (self.node_count() - 1) / 3
    }

    /// The quorum threshold 2f+1.
    pub fn quorum(&self) -> usize {
        2 * self.max_faulty() + 1
    }

    /// The rebroadcast threshold f+1.
    pub fn over_faulty(&self) -> usize {
        self.max_faulty() + 1
    }

    pub fn by_index(&self, index: SchainIndex) -> Option<&NodeInfo> {
        self.by_index.get(&index)
    }

    pub fn by_ip(&self, ip: Ipv4Addr) -> Option<&NodeInfo> {
        self.by_ip.get(&ip).and_then(|index| self.by_index.get(index))
    }

    pub fn contains_index(&self, index: SchainIndex) -> bool {
        self.by_index.contains_key(&index)
    }

    /// All members in position order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeInfo> {
        self.by_index.values()
    }

    /// All positions 1..=N in order.
    pub fn indices(&self) -> impl Iterator<Item = SchainIndex> + '_ {
        self.by_index.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(index: u64) -> NodeInfo {
        NodeInfo::new(
            NodeId::new(100 + index),
            SchainIndex::new(index),
            Ipv4Addr::new(10, 0, 0, index as u8),
            11000 + index as u16,
        )
    }

    #[test]
    fn quorum_math_for_four_nodes() {
        let registry = NodeRegistry::new(vec![node(2), node(4), node(1), node(3)]).unwrap();
        assert_eq!(registry.node_count(), 4);
        assert_eq!(registry.max_faulty(), 1);
        assert_eq!(registry.quorum(), 3);
        assert_eq!(registry.over_faulty(), 2);
        assert_eq!(
            registry.indices().map(|i| i.int()).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn lookup_by_address() {
        let registry = NodeRegistry::new(vec![node(1), node(2), node(3), node(4)]).unwrap();
        let found = registry.by_ip(Ipv4Addr::new(10, 0, 0, 3)).unwrap();
        assert_eq!(found.schain_index, SchainIndex::new(3));
        assert!(registry.by_ip(Ipv4Addr::new(10, 0, 0, 9)).is_none());
    }

    #[test]
    fn gapped_positions_are_rejected() {
        assert!(NodeRegistry::new(vec![node(1), node(3)]).is_err());
    }
}
