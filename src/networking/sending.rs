/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The sending side of the transport plane.
//!
//! [`ConsensusNetwork`] wraps the user-provided [`Network`] with the fixed
//! membership and per-peer delayed-send queues: a frame that cannot be sent
//! right now goes to the back of its peer's bounded deque, and the release
//! loop retries each queue's head at a steady cadence. When a queue is full
//! the oldest frame is dropped; the protocol tolerates message loss, the
//! queue only smooths transient unreachability.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::membership::NodeRegistry;
use crate::types::basic::{MsgId, SchainIndex};

use super::network::Network;

struct Inner<N: Network> {
    network: Mutex<N>,
    registry: NodeRegistry,
    own_index: SchainIndex,
    packet_loss: u32,
    max_delayed_sends: usize,
    /// One deque per peer, indexed by subchain position - 1.
    delayed: Vec<Mutex<VecDeque<Vec<u8>>>>,
    msg_counter: AtomicU64,
}

/// Shared, clonable handle to the transport plane.
pub struct ConsensusNetwork<N: Network> {
    inner: Arc<Inner<N>>,
}

impl<N: Network> Clone for ConsensusNetwork<N> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<N: Network> ConsensusNetwork<N> {
    pub fn new(
        network: N,
        registry: NodeRegistry,
        own_index: SchainIndex,
        packet_loss: u32,
        max_delayed_sends: usize,
    ) -> Self {
        let delayed = (0..registry.node_count())
            .map(|_| Mutex::new(VecDeque::new()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                network: Mutex::new(network),
                registry,
                own_index,
                packet_loss,
                max_delayed_sends,
                delayed,
                msg_counter: AtomicU64::new(1),
            }),
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.inner.registry
    }

    pub fn own_index(&self) -> SchainIndex {
        self.inner.own_index
    }

    /// The address this node writes into outgoing frames.
    pub fn own_ip(&self) -> Ipv4Addr {
        self.inner
            .registry
            .by_index(self.inner.own_index)
            .map(|node| node.ip)
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    pub fn next_msg_id(&self) -> MsgId {
        MsgId::new(self.inner.msg_counter.fetch_add(1, Ordering::Relaxed))
    }

    fn try_send_now(&self, peer_index: SchainIndex, frame: &[u8]) -> bool {
        if self.inner.packet_loss > 0
            && rand::thread_rng().gen_range(0..100) < self.inner.packet_loss
        {
            // Fault injection: pretend the datagram was sent and lost.
            return true;
        }
        let peer = match self.inner.registry.by_index(peer_index) {
            Some(peer) => peer,
            None => return false,
        };
        let mut network = match self.inner.network.lock() {
            Ok(network) => network,
            Err(_) => return false,
        };
        network.send(peer, frame)
    }

    fn queue_delayed(&self, peer_index: SchainIndex, frame: Vec<u8>) {
        let position = peer_index.int() as usize;
        if position == 0 || position > self.inner.delayed.len() {
            return;
        }
        if let Ok(mut queue) = self.inner.delayed[position - 1].lock() {
            queue.push_back(frame);
            if queue.len() > self.inner.max_delayed_sends {
                queue.pop_front();
            }
        }
    }

    /// Send to one peer, queueing on failure.
    pub fn send_to(&self, peer_index: SchainIndex, frame: &[u8]) {
        if peer_index == self.inner.own_index {
            return;
        }
        if !self.try_send_now(peer_index, frame) {
            self.queue_delayed(peer_index, frame.to_vec());
        }
    }

    /// Send to every peer except this node.
    pub fn broadcast(&self, frame: &[u8]) {
        for index in self.inner.registry.indices() {
            self.send_to(index, frame);
        }
    }

    /// Retry the head of every peer's delayed queue once. Called by the
    /// release loop.
    pub fn retry_delayed_sends(&self) {
        for (position, queue) in self.inner.delayed.iter().enumerate() {
            let peer_index = SchainIndex::new(position as u64 + 1);
            if peer_index == self.inner.own_index {
                continue;
            }
            let head = match queue.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(_) => continue,
            };
            if let Some(frame) = head {
                if !self.try_send_now(peer_index, &frame) {
                    if let Ok(mut queue) = queue.lock() {
                        queue.push_front(frame);
                    }
                }
            }
        }
    }

    /// Total frames waiting in delayed queues, for the commit-time stats.
    pub fn total_delayed_sends(&self) -> usize {
        self.inner
            .delayed
            .iter()
            .map(|queue| queue.lock().map(|queue| queue.len()).unwrap_or(0))
            .sum()
    }

    pub fn recv(&self) -> Option<(Ipv4Addr, Vec<u8>)> {
        self.inner.network.lock().ok()?.recv()
    }

    pub fn probe_peer(&self, peer_index: SchainIndex) -> bool {
        let peer = match self.inner.registry.by_index(peer_index) {
            Some(peer) => peer.clone(),
            None => return false,
        };
        match self.inner.network.lock() {
            Ok(mut network) => network.probe_peer(&peer),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::membership::NodeInfo;
    use crate::types::basic::NodeId;

    use super::*;

    /// A transport that can be switched between accepting and refusing sends.
    struct FlakyNetwork {
        up: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<(SchainIndex, Vec<u8>)>>>,
    }

    impl Network for FlakyNetwork {
        fn send(&mut self, peer: &NodeInfo, frame: &[u8]) -> bool {
            if self.up.load(Ordering::SeqCst) {
                self.sent
                    .lock()
                    .unwrap()
                    .push((peer.schain_index, frame.to_vec()));
                true
            } else {
                false
            }
        }

        fn recv(&mut self) -> Option<(Ipv4Addr, Vec<u8>)> {
            None
        }

        fn probe_peer(&mut self, _peer: &NodeInfo) -> bool {
            self.up.load(Ordering::SeqCst)
        }
    }

    fn registry() -> NodeRegistry {
        NodeRegistry::new(
            (1..=4)
                .map(|i| {
                    NodeInfo::new(
                        NodeId::new(i),
                        SchainIndex::new(i),
                        Ipv4Addr::new(10, 0, 0, i as u8),
                        11000,
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn failed_sends_queue_and_retry() {
        let up = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let network = ConsensusNetwork::new(
            FlakyNetwork {
                up: up.clone(),
                sent: sent.clone(),
            },
            registry(),
            SchainIndex::new(1),
            0,
            256,
        );

        network.broadcast(b"frame");
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(network.total_delayed_sends(), 3);

        up.store(true, Ordering::SeqCst);
        network.retry_delayed_sends();
        assert_eq!(network.total_delayed_sends(), 0);
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[test]
    fn delayed_queue_is_bounded() {
        let network = ConsensusNetwork::new(
            FlakyNetwork {
                up: Arc::new(AtomicBool::new(false)),
                sent: Arc::new(Mutex::new(Vec::new())),
            },
            registry(),
            SchainIndex::new(1),
            0,
            4,
        );

        for i in 0..10u8 {
            network.send_to(SchainIndex::new(2), &[i]);
        }
        // 4 newest frames survive per the drop-oldest policy.
        assert_eq!(network.total_delayed_sends(), 4);
    }

    #[test]
    fn own_index_is_never_a_send_target() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let network = ConsensusNetwork::new(
            FlakyNetwork {
                up: Arc::new(AtomicBool::new(true)),
                sent: sent.clone(),
            },
            registry(),
            SchainIndex::new(2),
            0,
            256,
        );

        network.broadcast(b"frame");
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(peer, _)| *peer != SchainIndex::new(2)));
    }
}
