/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that start a subchain node and the type that keeps it alive.
//!
//! [`SchainNode::start`] wires the engine together — store, transport plane,
//! router, gossip client, driver — runs the startup health check, spawns the
//! long-running threads, and posts the bootstrap operation. Dropping the
//! node requests a cooperative exit and joins every thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::Configuration;
use crate::crypto::SignerHandle;
use crate::driver::{start_driver_loop, DriverCore, SchainDriver};
use crate::errors::EngineError;
use crate::exit::ExitFlag;
use crate::health::run_health_check;
use crate::host::HostExecutor;
use crate::mailbox::Mailbox;
use crate::membership::{NodeInfo, NodeRegistry};
use crate::messages::InternalMessage;
use crate::monitoring::start_monitoring;
use crate::networking::receiving::start_poller;
use crate::networking::router::start_release_loop;
use crate::networking::{ConsensusNetwork, MessageRouter, Network, RoundRegistry};
use crate::proposals::start_gossip_client;
use crate::state::{ChainStore, KVStore};
use crate::types::basic::{BlockId, BlockTimestamp, ChainId, SchainIndex};
use crate::types::block::CommittedBlockList;
use std::time::Duration;

/// Everything that identifies this node and its subchain.
pub struct NodeConfiguration {
    pub chain_id: ChainId,
    pub own_index: SchainIndex,
    pub nodes: Vec<NodeInfo>,
    pub configuration: Configuration,
    /// The host's committed head, for bootstrap reconciliation.
    pub last_committed: BlockId,
    pub last_committed_ts: BlockTimestamp,
}

pub struct SchainNode {
    driver: Arc<SchainDriver>,
    exit: ExitFlag,
    threads: Vec<JoinHandle<()>>,
}

impl SchainNode {
    pub fn start<K: KVStore, N: Network, H: HostExecutor>(
        node_config: NodeConfiguration,
        network: N,
        kv_store: K,
        signer: SignerHandle,
        host: H,
    ) -> Result<SchainNode, EngineError> {
        let registry = NodeRegistry::new(node_config.nodes)?;
        let own = registry
            .by_index(node_config.own_index)
            .ok_or_else(|| {
                EngineError::invalid_state(format!(
                    "node set does not include this node at position {}",
                    node_config.own_index
                ))
            })?
            .clone();

        let config = node_config.configuration;
        let exit = ExitFlag::new();
        let mailbox = Mailbox::new();
        let driver = Arc::new(SchainDriver::new(mailbox.clone(), exit.clone()));

        let network = ConsensusNetwork::new(
            network,
            registry,
            own.schain_index,
            config.packet_loss,
            config.max_delayed_sends,
        );

        run_health_check(&network, &config, &exit)?;

        let rounds = RoundRegistry::new();
        let router = Arc::new(MessageRouter::new(
            mailbox,
            rounds.clone(),
            driver.last_committed_mirror(),
        ));

        let mut threads = Vec::new();

        let (gossip, gossip_thread) =
            start_gossip_client(network.clone(), node_config.chain_id, exit.clone());
        threads.push(gossip_thread);

        let store = ChainStore::new(kv_store);
        let core = DriverCore::new(
            driver.clone(),
            node_config.chain_id,
            own.schain_index,
            own.node_id,
            config.clone(),
            store.clone(),
            network.clone(),
            host,
            signer.clone(),
            rounds,
            router.clone(),
            gossip,
        );
        driver.post_message(
            InternalMessage::Bootstrap {
                last_committed_id: node_config.last_committed,
                last_committed_ts: node_config.last_committed_ts,
            }
            .into(),
        );
        threads.push(start_driver_loop(core));

        threads.push(start_poller(
            network.clone(),
            router.clone(),
            store,
            signer,
            driver.last_committed_mirror(),
            node_config.chain_id,
            BlockId::new(config.catchup_blocks),
            exit.clone(),
        ));
        threads.push(start_release_loop(
            router,
            network,
            exit.clone(),
            Duration::from_millis(config.delayed_send_retry_ms),
        ));
        threads.push(start_monitoring(
            driver.last_commit_time_mirror(),
            config.max_block_processing_ms(),
            exit.clone(),
        ));

        Ok(SchainNode {
            driver,
            exit,
            threads,
        })
    }

    pub fn driver(&self) -> &Arc<SchainDriver> {
        &self.driver
    }

    pub fn last_committed_block_id(&self) -> BlockId {
        self.driver.last_committed_block_id()
    }

    /// Hand the driver a contiguous run of committed blocks downloaded by
    /// the catch-up collaborator.
    pub fn post_catchup_blocks(&self, blocks: CommittedBlockList) {
        self.driver
            .post_message(InternalMessage::CatchupBlocks(blocks).into());
    }

    pub fn request_exit(&self) {
        self.exit.request_exit();
    }
}

impl Drop for SchainNode {
    fn drop(&mut self) {
        // Loops poll the flag at their heads and drain bounded waits, so a
        // request followed by joins shuts everything down cleanly.
        self.exit.request_exit();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}
