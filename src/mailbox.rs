/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The driver's FIFO mailbox.
//!
//! Producers on any thread post envelopes; the driver loop drains the whole
//! queue under one short critical section. The wait is bounded so the loop
//! re-checks the exit flag even when the chain is idle.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::messages::Envelope;

#[derive(Clone)]
pub struct Mailbox {
    inner: Arc<(Mutex<VecDeque<Envelope>>, Condvar)>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
        }
    }

    /// Enqueue one envelope. Thread-safe and FIFO per producer.
    pub fn post(&self, envelope: Envelope) {
        let (queue, condvar) = &*self.inner;
        if let Ok(mut queue) = queue.lock() {
            queue.push_back(envelope);
            condvar.notify_all();
        }
    }

    /// Take everything currently queued, waiting up to `timeout` if the
    /// queue is empty. An empty result means the wait timed out.
    pub fn drain(&self, timeout: Duration) -> Vec<Envelope> {
        let (queue, condvar) = &*self.inner;
        let mut queue = match queue.lock() {
            Ok(queue) => queue,
            Err(_) => return Vec::new(),
        };
        if queue.is_empty() {
            let (reacquired, _) = match condvar.wait_timeout(queue, timeout) {
                Ok(result) => result,
                Err(_) => return Vec::new(),
            };
            queue = reacquired;
        }
        queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.0.lock().map(|queue| queue.len()).unwrap_or(0)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::messages::InternalMessage;
    use crate::types::basic::{BlockId, BlockTimestamp};

    use super::*;

    #[test]
    fn posted_envelopes_drain_in_order() {
        let mailbox = Mailbox::new();
        for i in 1..=3 {
            mailbox.post(
                InternalMessage::Bootstrap {
                    last_committed_id: BlockId::new(i),
                    last_committed_ts: BlockTimestamp::new(0, 0),
                }
                .into(),
            );
        }

        let drained = mailbox.drain(Duration::from_millis(10));
        let ids: Vec<u64> = drained
            .iter()
            .map(|envelope| match envelope {
                Envelope::Internal(InternalMessage::Bootstrap {
                    last_committed_id, ..
                }) => last_committed_id.int(),
                _ => panic!("unexpected envelope"),
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(mailbox.drain(Duration::from_millis(1)).is_empty());
    }
}
