/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A scripted host executor: a transaction pool fed by the test, and a
//! record of every committed block the engine delivered.

use std::sync::{Arc, Mutex};

use schain_consensus::host::HostExecutor;
use schain_consensus::types::basic::{BlockId, BlockTimestamp};
use schain_consensus::types::transaction::{Transaction, TransactionList};

#[derive(Clone, Debug)]
pub struct DeliveredBlock {
    pub block_id: BlockId,
    pub transactions: TransactionList,
    pub timestamp: BlockTimestamp,
    pub gas_price: u64,
}

#[derive(Default)]
struct HostState {
    pool: Vec<Transaction>,
    delivered: Vec<DeliveredBlock>,
}

#[derive(Clone, Default)]
pub struct TestHost(Arc<Mutex<HostState>>);

impl TestHost {
    pub fn new() -> TestHost {
        TestHost::default()
    }

    pub fn submit_transaction(&self, transaction: Transaction) {
        self.0.lock().unwrap().pool.push(transaction);
    }

    pub fn delivered(&self) -> Vec<DeliveredBlock> {
        self.0.lock().unwrap().delivered.clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.0.lock().unwrap().delivered.len()
    }

    pub fn last_delivered(&self) -> Option<DeliveredBlock> {
        self.0.lock().unwrap().delivered.last().cloned()
    }
}

impl HostExecutor for TestHost {
    fn pull_pending_transactions(&mut self, max: usize) -> Vec<Transaction> {
        let mut state = self.0.lock().unwrap();
        let take = std::cmp::min(max, state.pool.len());
        state.pool.drain(..take).collect()
    }

    fn create_block(
        &mut self,
        transactions: &TransactionList,
        timestamp: BlockTimestamp,
        block_id: BlockId,
        gas_price: u64,
        _state_root: [u8; 32],
    ) {
        self.0.lock().unwrap().delivered.push(DeliveredBlock {
            block_id,
            transactions: transactions.clone(),
            timestamp,
            gas_price,
        });
    }
}
