/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A cluster of in-process subchain nodes wired over the channel transport.
//!
//! Each node gets its own in-memory store, scripted host, and signer over a
//! shared group seed. Tests start some or all nodes, drive the hosts'
//! transaction pools, and poll the stores for committed blocks.

use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use schain_consensus::config::Configuration;
use schain_consensus::crypto::SignerHandle;
use schain_consensus::membership::NodeInfo;
use schain_consensus::node::{NodeConfiguration, SchainNode};
use schain_consensus::state::ChainStore;
use schain_consensus::types::basic::{BlockId, BlockTimestamp, ChainId, NodeId, SchainIndex};
use schain_consensus::types::block::CommittedBlock;

use super::crypto::sim_signers;
use super::host::TestHost;
use super::mem_db::MemKv;
use super::network::{mock_network, ChannelNetwork, NetworkHandle};

pub const TEST_CHAIN_ID: ChainId = ChainId::new(1);

pub struct TestCluster {
    pub node_infos: Vec<NodeInfo>,
    pub networks: Vec<Option<ChannelNetwork>>,
    pub handles: Vec<NetworkHandle>,
    pub signers: Vec<SignerHandle>,
    pub kvs: Vec<MemKv>,
    pub hosts: Vec<TestHost>,
    pub nodes: Vec<Option<SchainNode>>,
    pub empty_block_interval_ms: u64,
}

impl TestCluster {
    pub fn new(node_count: usize, empty_block_interval_ms: u64) -> TestCluster {
        let node_infos: Vec<NodeInfo> = (1..=node_count as u64)
            .map(|index| {
                NodeInfo::new(
                    NodeId::new(100 + index),
                    SchainIndex::new(index),
                    Ipv4Addr::new(10, 0, 0, index as u8),
                    11000 + index as u16,
                )
            })
            .collect();

        let ips: Vec<Ipv4Addr> = node_infos.iter().map(|node| node.ip).collect();
        let (networks, handles) = mock_network(&ips);

        let max_faulty = (node_count - 1) / 3;
        let quorum = 2 * max_faulty + 1;

        TestCluster {
            networks: networks.into_iter().map(Some).collect(),
            handles,
            signers: sim_signers([7; 32], node_count, quorum),
            kvs: (0..node_count).map(|_| MemKv::new()).collect(),
            hosts: (0..node_count).map(|_| TestHost::new()).collect(),
            nodes: (0..node_count).map(|_| None).collect(),
            node_infos,
            empty_block_interval_ms,
        }
    }

    pub fn configuration(&self) -> Configuration {
        Configuration::with_empty_block_interval(self.empty_block_interval_ms)
    }

    /// Start one node (0-based position) bootstrapping from genesis.
    pub fn start_node(&mut self, position: usize) {
        self.start_node_with_head(position, BlockId::new(0), BlockTimestamp::new(0, 0));
    }

    /// Start one node with an explicit host head, for bootstrap scenarios.
    pub fn start_node_with_head(
        &mut self,
        position: usize,
        host_head: BlockId,
        host_head_ts: BlockTimestamp,
    ) {
        let network = self.networks[position]
            .take()
            .expect("node already started");
        let node = SchainNode::start(
            NodeConfiguration {
                chain_id: TEST_CHAIN_ID,
                own_index: self.node_infos[position].schain_index,
                nodes: self.node_infos.clone(),
                configuration: self.configuration(),
                last_committed: host_head,
                last_committed_ts: host_head_ts,
            },
            network,
            self.kvs[position].clone(),
            self.signers[position].clone(),
            self.hosts[position].clone(),
        )
        .expect("node start");
        self.nodes[position] = Some(node);
    }

    pub fn start_all(&mut self) {
        for position in 0..self.nodes.len() {
            self.start_node(position);
        }
    }

    pub fn store(&self, position: usize) -> ChainStore<MemKv> {
        ChainStore::new(self.kvs[position].clone())
    }

    /// Poll one node's store until `block_id` is committed.
    pub fn wait_for_block(
        &self,
        position: usize,
        block_id: BlockId,
        timeout: Duration,
    ) -> CommittedBlock {
        let deadline = Instant::now() + timeout;
        let store = self.store(position);
        loop {
            if let Ok(Some(block)) = store.block(block_id) {
                return block;
            }
            if Instant::now() >= deadline {
                panic!(
                    "node {} did not commit block {} within {:?}",
                    position, block_id, timeout
                );
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Wait until every *running* node has committed `block_id`; returns the
    /// blocks in node order.
    pub fn wait_for_block_on_all(&self, block_id: BlockId, timeout: Duration) -> Vec<CommittedBlock> {
        (0..self.nodes.len())
            .filter(|position| self.nodes[*position].is_some())
            .map(|position| self.wait_for_block(position, block_id, timeout))
            .collect()
    }
}
