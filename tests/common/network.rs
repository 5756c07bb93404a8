/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An in-process transport that passes datagrams between nodes over
//! channels. Each stub addresses its peers by IP, exactly like the wire
//! frames do, so the engine's source-address validation is exercised for
//! real. A stub can be muted (its sends vanish) to model a silent node, and
//! a test can inject raw frames to model a Byzantine one.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use schain_consensus::membership::NodeInfo;
use schain_consensus::networking::Network;

type Datagram = (Ipv4Addr, Vec<u8>);

pub struct ChannelNetwork {
    own_ip: Ipv4Addr,
    peers: HashMap<Ipv4Addr, Sender<Datagram>>,
    inbox: Receiver<Datagram>,
    muted: Arc<AtomicBool>,
}

impl Network for ChannelNetwork {
    fn send(&mut self, peer: &NodeInfo, frame: &[u8]) -> bool {
        if self.muted.load(Ordering::SeqCst) {
            // A silent node: the datagram disappears, the send "succeeds".
            return true;
        }
        match self.peers.get(&peer.ip) {
            Some(sender) => {
                let _ = sender.send((self.own_ip, frame.to_vec()));
                true
            }
            None => false,
        }
    }

    fn recv(&mut self) -> Option<Datagram> {
        self.inbox.try_recv().ok()
    }

    fn probe_peer(&mut self, peer: &NodeInfo) -> bool {
        self.peers.contains_key(&peer.ip)
    }
}

/// A test's view of one stub: mute it or impersonate it.
#[derive(Clone)]
pub struct NetworkHandle {
    own_ip: Ipv4Addr,
    peers: HashMap<Ipv4Addr, Sender<Datagram>>,
    muted: Arc<AtomicBool>,
}

impl NetworkHandle {
    pub fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::SeqCst);
    }

    /// Deliver a raw frame to every other node, as if this node had sent it.
    pub fn inject_to_all(&self, frame: &[u8]) {
        for (ip, sender) in &self.peers {
            if *ip != self.own_ip {
                let _ = sender.send((self.own_ip, frame.to_vec()));
            }
        }
    }
}

/// Build one connected stub per address.
pub fn mock_network(ips: &[Ipv4Addr]) -> (Vec<ChannelNetwork>, Vec<NetworkHandle>) {
    let mut senders = HashMap::new();
    let mut inboxes = Vec::new();
    for ip in ips {
        let (sender, receiver) = mpsc::channel();
        senders.insert(*ip, sender);
        inboxes.push((*ip, receiver));
    }

    let mut networks = Vec::new();
    let mut handles = Vec::new();
    for (own_ip, inbox) in inboxes {
        let muted = Arc::new(AtomicBool::new(false));
        networks.push(ChannelNetwork {
            own_ip,
            peers: senders.clone(),
            inbox,
            muted: muted.clone(),
        });
        handles.push(NetworkHandle {
            own_ip,
            peers: senders.clone(),
            muted,
        });
    }
    (networks, handles)
}
