/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The deferral plane.
//!
//! Messages can outrun the local node: a peer may already be deciding a
//! future block, or a future round of an agreement instance this node has not
//! reached. Such messages are held in a queue keyed by block id and re-offered
//! whenever the chain advances, instead of being dropped or processed early.
//!
//! Rules for an inbound message with block id `bm` and round `rm`, where
//! `bc = last committed + 1` is the block under decision and `rc` is the
//! destination instance's current round:
//! - `bm > bc` → defer.
//! - round-bearing messages with `rm > rc + 1` → defer.
//! - round-bearing messages with `rm = rc + 1` → defer unless the instance
//!   has decided.
//! - everything else → post to the driver's mailbox.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::exit::ExitFlag;
use crate::mailbox::Mailbox;
use crate::messages::NetworkEnvelope;
use crate::types::basic::{BlockId, ProtocolKey, Round};

use super::network::Network;
use super::sending::ConsensusNetwork;

/// Where each live agreement instance stands, shared between the driver loop
/// (which advances it) and the router (which reads it).
#[derive(Clone, Default)]
pub struct RoundRegistry {
    rounds: Arc<Mutex<HashMap<ProtocolKey, (Round, bool)>>>,
}

impl RoundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, key: ProtocolKey, round: Round, decided: bool) {
        if let Ok(mut rounds) = self.rounds.lock() {
            rounds.insert(key, (round, decided));
        }
    }

    /// (current round, decided) of an instance; an instance nobody has
    /// touched yet is at round 0, undecided.
    pub fn status(&self, key: &ProtocolKey) -> (Round, bool) {
        self.rounds
            .lock()
            .ok()
            .and_then(|rounds| rounds.get(key).copied())
            .unwrap_or((Round::init(), false))
    }

    /// Drop entries for blocks at or below the committed head.
    pub fn prune_through(&self, block_id: BlockId) {
        if let Ok(mut rounds) = self.rounds.lock() {
            rounds.retain(|key, _| key.block_id > block_id);
        }
    }
}

/// The deferred-message queue plus the routing decision.
pub struct MessageRouter {
    mailbox: Mailbox,
    rounds: RoundRegistry,
    last_committed: Arc<AtomicU64>,
    deferred: Mutex<BTreeMap<u64, Vec<NetworkEnvelope>>>,
}

impl MessageRouter {
    pub fn new(mailbox: Mailbox, rounds: RoundRegistry, last_committed: Arc<AtomicU64>) -> Self {
        Self {
            mailbox,
            rounds,
            last_committed,
            deferred: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn rounds(&self) -> &RoundRegistry {
        &self.rounds
    }

    fn current_block(&self) -> BlockId {
        BlockId::new(self.last_committed.load(Ordering::SeqCst)).next()
    }

    fn defer(&self, envelope: NetworkEnvelope) {
        log::trace!("Defer, {}", envelope.message.block_id());
        if let Ok(mut deferred) = self.deferred.lock() {
            deferred
                .entry(envelope.message.block_id().int())
                .or_default()
                .push(envelope);
        }
    }

    /// Route one inbound envelope: post it to the driver or park it.
    pub fn post_or_defer(&self, envelope: NetworkEnvelope) {
        let current = self.current_block();
        let block_id = envelope.message.block_id();

        if block_id > current {
            self.defer(envelope);
            return;
        }

        if let (Some(key), Some(round)) = (
            envelope.message.protocol_key(),
            envelope.message.round(),
        ) {
            let (current_round, decided) = self.rounds.status(&key);
            if round > current_round.next() {
                self.defer(envelope);
                return;
            }
            if round == current_round.next() && !decided {
                self.defer(envelope);
                return;
            }
        }

        self.mailbox.post(envelope.into());
    }

    /// Pull every deferred envelope at or below the block under decision and
    /// re-offer it. Envelopes that are still early go straight back to the
    /// queue.
    pub fn release_eligible(&self) {
        let current = self.current_block();
        let eligible: Vec<NetworkEnvelope> = {
            let mut deferred = match self.deferred.lock() {
                Ok(deferred) => deferred,
                Err(_) => return,
            };
            let keep = deferred.split_off(&(current.int() + 1));
            let eligible = std::mem::replace(&mut *deferred, keep);
            eligible.into_values().flatten().collect()
        };

        if !eligible.is_empty() {
            log::trace!("ReleaseDeferred, {}, {}", current, eligible.len());
        }
        for envelope in eligible {
            self.post_or_defer(envelope);
        }
    }

    /// Deferred envelopes currently parked, for the commit-time stats.
    pub fn total_deferred(&self) -> usize {
        self.deferred
            .lock()
            .map(|deferred| deferred.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

/// Spawn the release loop: re-offer deferred messages and retry delayed
/// sends at a steady cadence until exit is requested.
pub fn start_release_loop<N: Network>(
    router: Arc<MessageRouter>,
    network: ConsensusNetwork<N>,
    exit: ExitFlag,
    cadence: Duration,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("releaseLoop".to_string())
        .spawn(move || {
            while !exit.is_set() {
                router.release_eligible();
                network.retry_delayed_sends();
                thread::sleep(cadence);
            }
        })
        .expect("spawn release loop")
}
