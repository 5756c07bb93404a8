/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Logging conventions.
//!
//! The engine logs through the [log](https://docs.rs/log) facade; the
//! embedding process chooses the implementation. Messages are CSVs whose
//! first value is the event name in PascalCase, so production logs can be
//! grepped and tabulated. The constants below name the driver's lifecycle
//! events; protocol modules log their own local events inline in the same
//! shape.

use std::time::{SystemTime, UNIX_EPOCH};

pub const BLOCK_COMMIT: &str = "BlockCommit";
pub const BLOCK_CATCHUP: &str = "BlockCatchup";
pub const BLOCK_PROPOSE: &str = "BlockPropose";
pub const BOOTSTRAP: &str = "Bootstrap";
pub const FINALIZE_WAIT: &str = "FinalizeWait";

/// Seconds since the Unix epoch, for event timestamps.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_secs())
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch, for commit-latency bookkeeping.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis() as u64)
        .unwrap_or(0)
}
