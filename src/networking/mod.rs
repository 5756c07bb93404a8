/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The transport plane: the pluggable [`Network`](network::Network) trait,
//! the wire codec, the sending side with delayed-send queues, the
//! authenticating read loop, and the deferral-plane router.

pub mod network;

pub mod receiving;

pub mod router;

pub mod sending;

pub mod wire;

pub use network::Network;
pub use router::{MessageRouter, RoundRegistry};
pub use sending::ConsensusNetwork;
