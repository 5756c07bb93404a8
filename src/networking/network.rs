/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer transport.
//!
//! The engine encodes and decodes all wire frames itself; a transport moves
//! opaque datagrams between peers and reports the sender's address with each
//! received one. ZeroMQ is the production implementation; the integration
//! tests use an in-process channel transport.

use std::net::Ipv4Addr;

use crate::membership::NodeInfo;

pub trait Network: Send + 'static {
    /// Try to send one datagram to the peer. Returns false on transient
    /// failure; the caller queues the frame for retry.
    fn send(&mut self, peer: &NodeInfo, frame: &[u8]) -> bool;

    /// Receive one datagram from any peer, with the transport-level source
    /// address. Returns immediately with None if nothing is available.
    fn recv(&mut self) -> Option<(Ipv4Addr, Vec<u8>)>;

    /// Whether the peer is currently reachable. Used only by the startup
    /// health check.
    fn probe_peer(&mut self, peer: &NodeInfo) -> bool;
}
