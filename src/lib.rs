/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Byzantine-fault-tolerant block-consensus engine for permissioned
//! subchains of fixed membership N = 3f+1.
//!
//! The engine drives agreement on a totally ordered sequence of blocks. Per
//! block, every node builds a proposal from its host's pending transactions
//! and gossips it; nodes that store a proposal return threshold shares which
//! aggregate into a data-availability proof; once 2f+1 proposers are
//! DA-proved, N randomized binary agreements (one per proposer) run in
//! parallel and decide which proposals were available; the lowest proposer
//! that decided one wins, a threshold signature over the decision is
//! collected, and the block is committed to the embedding host.
//!
//! The engine is embedded: the host supplies pending transactions and
//! consumes committed blocks ([`host::HostExecutor`]), persistence is a
//! pluggable key-value store ([`state::KVStore`]), transport is a pluggable
//! datagram carrier ([`networking::Network`]), and threshold cryptography is
//! a pluggable capability ([`crypto::ThresholdSigner`]).

pub mod bin_consensus;

pub mod block_consensus;

pub mod config;

pub mod crypto;

pub mod driver;

pub mod errors;

pub mod exit;

pub mod health;

pub mod host;

pub mod logging;

pub mod mailbox;

pub mod membership;

pub mod messages;

pub mod monitoring;

pub mod networking;

pub mod node;

pub mod proposals;

pub mod state;

pub mod stats;

pub mod types;

// Re-exports of the embedding surface.
pub use config::Configuration;
pub use crypto::{SignerHandle, ThresholdSigner};
pub use host::HostExecutor;
pub use membership::NodeInfo;
pub use networking::Network;
pub use node::{NodeConfiguration, SchainNode};
pub use state::{KVGet, KVStore, WriteBatch};
