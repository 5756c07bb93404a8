/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The host-executor seam.
//!
//! The engine is embedded in a state executor that owns the transaction pool
//! and applies committed blocks. The engine pulls pending transactions when
//! building a proposal and hands every committed block to the host exactly
//! once, in strict block-id order. `create_block` fires only after the block
//! is durably persisted; no partial block is ever emitted.

use crate::types::basic::{BlockId, BlockTimestamp};
use crate::types::transaction::{Transaction, TransactionList};

pub trait HostExecutor: Send + 'static {
    /// Drain up to `max` transactions from the host's pending pool.
    fn pull_pending_transactions(&mut self, max: usize) -> Vec<Transaction>;

    /// Apply one committed block. `state_root` is reserved and currently
    /// zero; the engine does not execute transactions.
    fn create_block(
        &mut self,
        transactions: &TransactionList,
        timestamp: BlockTimestamp,
        block_id: BlockId,
        gas_price: u64,
        state_root: [u8; 32],
    );
}
