/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Counters the driver owns and logs at commit time. Observational only;
//! nothing reads them back into protocol decisions.

#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    /// Transactions in all blocks committed by this process.
    pub total_transactions: u64,
    /// Envelopes the driver loop has dispatched.
    pub envelopes_processed: u64,
    /// Blocks committed by this process (catch-up included).
    pub blocks_committed: u64,
}
