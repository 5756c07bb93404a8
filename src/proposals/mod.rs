/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The proposal / data-availability pipeline: building this node's
//! proposals, accumulating DA shares into proofs, and gossiping both.

pub mod da_proof;

pub mod gossip;

pub mod pending;

pub use da_proof::DaProofAccumulator;
pub use gossip::{start_gossip_client, GossipQueue};
pub use pending::PendingTransactionsAgent;
