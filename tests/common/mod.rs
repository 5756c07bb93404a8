/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Shared scaffolding for the integration tests: an in-process channel
//! transport, an in-memory key-value store, a deterministic simulated
//! threshold scheme, a scripted host executor, and a cluster harness that
//! runs N nodes in threads. Everything lives in memory; the tests leave no
//! artifacts.

pub mod cluster;
pub mod crypto;
pub mod host;
pub mod logging;
pub mod mem_db;
pub mod network;
