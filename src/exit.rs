/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The process-wide cooperative shutdown flag.
//!
//! Every long-running loop polls it at its head and before blocking work; the
//! [`check`](ExitFlag::check) form turns a set flag into the
//! [`ExitRequested`](crate::errors::EngineError::ExitRequested) error, which
//! unwinds to the loop root and is never swallowed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::EngineError;

#[derive(Clone, Default)]
pub struct ExitFlag {
    flag: Arc<AtomicBool>,
}

impl ExitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_exit(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_set() {
            Err(EngineError::ExitRequested)
        } else {
            Ok(())
        }
    }
}
