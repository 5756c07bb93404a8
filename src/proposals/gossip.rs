/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The gossip client.
//!
//! Proposals and DA proofs are pushed to every peer by a dedicated thread so
//! slow peers never stall the driver loop. The driver enqueues items; the
//! client encodes and broadcasts them, leaning on the delayed-send queues for
//! unreachable peers.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::errors::log_nested;
use crate::exit::ExitFlag;
use crate::messages::GossipMessage;
use crate::networking::{wire, ConsensusNetwork, Network};
use crate::types::basic::ChainId;

/// The driver's sending end.
#[derive(Clone)]
pub struct GossipQueue {
    sender: Sender<GossipMessage>,
}

impl GossipQueue {
    pub fn enqueue(&self, message: GossipMessage) {
        let _ = self.sender.send(message);
    }
}

/// Spawn the gossip client thread.
pub fn start_gossip_client<N: Network>(
    network: ConsensusNetwork<N>,
    chain_id: ChainId,
    exit: ExitFlag,
) -> (GossipQueue, JoinHandle<()>) {
    let (sender, receiver): (Sender<GossipMessage>, Receiver<GossipMessage>) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("gossipClient".to_string())
        .spawn(move || loop {
            if exit.is_set() {
                return;
            }
            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(message) => match wire::encode_gossip(chain_id, &message) {
                    Ok(frame) => network.broadcast(&frame),
                    Err(err) => log_nested("could not encode gossip message", &err),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
        .expect("spawn gossip client");
    (GossipQueue { sender }, handle)
}
