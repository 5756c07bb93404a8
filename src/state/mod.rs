/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistence: the pluggable key-value store interface and the typed
//! accessors the engine layers on top of it.

pub mod kv_store;

pub(crate) mod paths;

pub mod stores;

pub use kv_store::{KVGet, KVStore, WriteBatch};
pub use stores::ChainStore;
