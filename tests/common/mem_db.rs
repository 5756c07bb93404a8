/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An in-memory [`KVStore`] backed by a hashmap behind a mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use schain_consensus::state::{KVGet, KVStore, WriteBatch};

#[derive(Clone, Default)]
pub struct MemKv(Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>);

impl MemKv {
    pub fn new() -> MemKv {
        MemKv::default()
    }
}

impl KVGet for MemKv {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(key).cloned()
    }
}

impl KVStore for MemKv {
    type WriteBatch = MemWriteBatch;

    fn write(&mut self, wb: MemWriteBatch) {
        let mut map = self.0.lock().unwrap();
        for (key, value) in wb.writes {
            match value {
                Some(value) => map.insert(key, value),
                None => map.remove(&key),
            };
        }
    }
}

#[derive(Default)]
pub struct MemWriteBatch {
    writes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch::default()
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.writes.push((key.to_vec(), Some(value.to_vec())));
    }

    fn delete(&mut self, key: &[u8]) {
        self.writes.push((key.to_vec(), None));
    }
}
