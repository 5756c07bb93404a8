/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The monitoring loop.
//!
//! Consensus has no deadlines; liveness comes from the protocol. The monitor
//! only alarms: when the time since the last commit exceeds the per-block
//! budget of max(2 x empty-block interval, 3 s), it logs a warning so
//! operators notice a stuck chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::exit::ExitFlag;
use crate::logging;

pub fn start_monitoring(
    last_commit_time_ms: Arc<AtomicU64>,
    max_block_processing_ms: u64,
    exit: ExitFlag,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("monitoring".to_string())
        .spawn(move || {
            let mut alarmed = false;
            while !exit.is_set() {
                thread::sleep(Duration::from_millis(1000));
                let last = last_commit_time_ms.load(Ordering::SeqCst);
                if last == 0 {
                    continue;
                }
                let stalled_for = logging::now_ms().saturating_sub(last);
                if stalled_for > max_block_processing_ms {
                    if !alarmed {
                        log::warn!("BlockOverdue, {} ms since last commit", stalled_for);
                        alarmed = true;
                    }
                } else {
                    alarmed = false;
                }
            }
        })
        .expect("spawn monitoring")
}
