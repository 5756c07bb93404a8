/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-chain driver.
//!
//! The driver sequences the block lifecycle: bootstrap, per-block proposal,
//! DA-proof collection, consensus invocation, finalization, and the next
//! round. Its message loop is the engine's only mutator: every envelope —
//! peer traffic from the router, internal operations the engine posts to
//! itself — is processed to completion before the next, so state transitions
//! inside any one agreement instance are strictly serial.
//!
//! [`SchainDriver`] is the shared handle (mailbox, exit flag, and lock-free
//! mirrors of the committed head for the router and monitoring).
//! [`DriverCore`] is owned by the loop thread and holds everything mutable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::block_consensus::{BlockConsensusAgent, DriverAction, ProtocolContext};
use crate::config::Configuration;
use crate::crypto::{
    block_sig_payload, da_proof_payload, SigShare, SignerHandle, ThresholdSignature,
};
use crate::errors::{log_nested, EngineError};
use crate::exit::ExitFlag;
use crate::host::HostExecutor;
use crate::logging;
use crate::mailbox::Mailbox;
use crate::messages::{
    ConsensusMessage, Envelope, GossipMessage, InternalMessage, NetworkEnvelope, NetworkMessage,
};
use crate::networking::{ConsensusNetwork, MessageRouter, Network, RoundRegistry};
use crate::proposals::{DaProofAccumulator, GossipQueue, PendingTransactionsAgent};
use crate::state::{ChainStore, KVStore};
use crate::stats::Stats;
use crate::types::basic::{BlockId, BlockTimestamp, ChainId, NodeId, SchainIndex};
use crate::types::block::{BlockProposal, CommittedBlock, CommittedBlockList};
use crate::types::da::{DaProof, ProposalVector};

/// Shared handle to the driver.
pub struct SchainDriver {
    mailbox: Mailbox,
    exit: ExitFlag,
    last_committed: Arc<AtomicU64>,
    last_commit_time_ms: Arc<AtomicU64>,
}

impl SchainDriver {
    pub fn new(mailbox: Mailbox, exit: ExitFlag) -> Self {
        Self {
            mailbox,
            exit,
            last_committed: Arc::new(AtomicU64::new(0)),
            last_commit_time_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue an envelope for the driver loop. Thread-safe, FIFO per
    /// producer.
    pub fn post_message(&self, envelope: Envelope) {
        if self.exit.is_set() {
            return;
        }
        self.mailbox.post(envelope);
    }

    pub fn last_committed_block_id(&self) -> BlockId {
        BlockId::new(self.last_committed.load(Ordering::SeqCst))
    }

    pub fn last_committed_mirror(&self) -> Arc<AtomicU64> {
        self.last_committed.clone()
    }

    pub fn last_commit_time_mirror(&self) -> Arc<AtomicU64> {
        self.last_commit_time_ms.clone()
    }

    pub fn exit_flag(&self) -> &ExitFlag {
        &self.exit
    }

    fn record_commit(&self, block_id: BlockId) {
        self.last_committed.store(block_id.int(), Ordering::SeqCst);
        self.last_commit_time_ms
            .store(logging::now_ms(), Ordering::SeqCst);
    }
}

/// Everything the loop thread owns.
pub struct DriverCore<K: KVStore, N: Network, H: HostExecutor> {
    handle: Arc<SchainDriver>,
    chain_id: ChainId,
    own_index: SchainIndex,
    config: Configuration,
    store: ChainStore<K>,
    network: ConsensusNetwork<N>,
    host: H,
    signer: SignerHandle,
    rounds: RoundRegistry,
    router: Arc<MessageRouter>,
    gossip: GossipQueue,
    orchestrator: BlockConsensusAgent,
    pending_agent: PendingTransactionsAgent,
    da_accumulator: DaProofAccumulator,
    stats: Stats,

    bootstrapped: bool,
    last_committed: BlockId,
    last_committed_ts: BlockTimestamp,
    /// DA-proved proposers of the block under decision.
    proposal_vector: ProposalVector,
    consensus_started: bool,
    /// A block signature that aggregated before the winner's proposal or DA
    /// proof was locally available; retried when either arrives.
    parked_commit: Option<(BlockId, SchainIndex, ThresholdSignature)>,
}

impl<K: KVStore, N: Network, H: HostExecutor> DriverCore<K, N, H> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: Arc<SchainDriver>,
        chain_id: ChainId,
        own_index: SchainIndex,
        own_node_id: NodeId,
        config: Configuration,
        store: ChainStore<K>,
        network: ConsensusNetwork<N>,
        host: H,
        signer: SignerHandle,
        rounds: RoundRegistry,
        router: Arc<MessageRouter>,
        gossip: GossipQueue,
    ) -> Self {
        let node_count = network.registry().node_count();
        let quorum = network.registry().quorum();
        let over_faulty = network.registry().over_faulty();
        Self {
            handle,
            chain_id,
            own_index,
            orchestrator: BlockConsensusAgent::new(
                chain_id,
                own_index,
                own_node_id,
                node_count,
                quorum,
                over_faulty,
            ),
            pending_agent: PendingTransactionsAgent::new(
                chain_id,
                own_index,
                own_node_id,
                config.proposal_tx_limit,
                config.known_tx_window_blocks,
                config.empty_block_interval_ms,
            ),
            da_accumulator: DaProofAccumulator::new(quorum),
            proposal_vector: ProposalVector::new(node_count),
            config,
            store,
            network,
            host,
            signer,
            rounds,
            router,
            gossip,
            stats: Stats::default(),
            bootstrapped: false,
            last_committed: BlockId::new(0),
            last_committed_ts: BlockTimestamp::new(0, 0),
            consensus_started: false,
            parked_commit: None,
        }
    }

    fn exit(&self) -> &ExitFlag {
        self.handle.exit_flag()
    }

    /// One envelope, to completion.
    fn dispatch(&mut self, envelope: Envelope) -> Result<(), EngineError> {
        self.exit().check()?;
        self.stats.envelopes_processed += 1;

        match envelope {
            Envelope::Internal(InternalMessage::Bootstrap {
                last_committed_id,
                last_committed_ts,
            }) => self.bootstrap(last_committed_id, last_committed_ts),
            Envelope::Internal(InternalMessage::StartConsensus { block_id, vector }) => {
                self.start_consensus(block_id, vector)
            }
            Envelope::Internal(InternalMessage::CatchupBlocks(blocks)) => {
                self.block_commits_arrived_through_catchup(blocks)
            }
            Envelope::Network(NetworkEnvelope { sender, message }) => match message {
                NetworkMessage::Consensus(msg) => self.consensus_message_arrived(sender, msg),
                NetworkMessage::Gossip(GossipMessage::ProposalPush(proposal)) => {
                    self.proposed_block_arrived(proposal, Some(sender))
                }
                NetworkMessage::Gossip(GossipMessage::DaSigShare(share)) => {
                    self.da_share_arrived(share.block_id, share.proposer_index, share.block_hash, SigShare::new(sender, share.share))
                }
                NetworkMessage::Gossip(GossipMessage::DaProof(proof)) => {
                    self.da_proof_arrived(proof)
                }
            },
        }
    }

    /* ↓↓↓ Bootstrap ↓↓↓ */

    /// One-shot reconciliation of the engine's head with the host's head.
    /// The store may be exactly one block ahead (a snapshot is taken just
    /// before a block is applied): push that block to the host once. Any
    /// other divergence is fatal.
    fn bootstrap(
        &mut self,
        host_head: BlockId,
        host_head_ts: BlockTimestamp,
    ) -> Result<(), EngineError> {
        if self.bootstrapped {
            return Err(EngineError::invalid_state("bootstrap called twice"));
        }
        self.bootstrapped = true;

        let store_head = self.store.read_last_committed_block_id()?;
        log::info!(
            "{}, {}, store head {}, host head {}",
            logging::BOOTSTRAP,
            logging::now_secs(),
            store_head,
            host_head
        );

        let mut head = host_head;
        let mut head_ts = host_head_ts;

        if store_head == host_head.next() {
            match self.store.block(store_head) {
                Ok(Some(block)) => {
                    self.push_block_to_host(&block);
                    head = store_head;
                    head_ts = block.timestamp;
                }
                Ok(None) | Err(_) => {
                    // The snapshot may hold a corrupt copy; catch-up will
                    // re-deliver the block.
                    log::error!("BootstrapBlockUnreadable, {}", store_head);
                }
            }
        } else if store_head < host_head {
            return Err(EngineError::Fatal(format!(
                "store head {} behind host head {}",
                store_head, host_head
            )));
        } else if store_head > host_head.next() {
            return Err(EngineError::Fatal(format!(
                "store head {} more than one past host head {}",
                store_head, host_head
            )));
        }

        self.last_committed = head;
        self.last_committed_ts = head_ts;
        self.handle.record_commit(head);

        self.propose_next_block()?;

        // If a proposal vector was persisted, consensus for the next block
        // had already started before the restart: resume it and re-broadcast
        // everything this node had said.
        let next = self.last_committed.next();
        if let Some(vector) = self.store.proposal_vector(next)? {
            for frame in self.store.outgoing_messages(next)? {
                self.network.broadcast(&frame);
            }
            self.proposal_vector = vector.clone();
            self.consensus_started = true;
            self.handle.post_message(
                InternalMessage::StartConsensus {
                    block_id: next,
                    vector,
                }
                .into(),
            );
        }
        Ok(())
    }

    /* ↓↓↓ Proposing ↓↓↓ */

    /// Propose the next block. After a crash between announcement and
    /// commit, the recorded proposal hash forces reuse of the stored
    /// proposal instead of building a second one.
    fn propose_next_block(&mut self) -> Result<(), EngineError> {
        self.exit().check()?;
        let block_id = self.last_committed.next();

        let proposal = if self.store.have_proposal_hash(block_id, self.own_index) {
            self.store
                .proposal(block_id, self.own_index)?
                .ok_or_else(|| {
                    EngineError::invalid_state(format!(
                        "proposal hash recorded for {} but proposal missing",
                        block_id
                    ))
                })?
        } else {
            let exit = self.handle.exit_flag().clone();
            self.pending_agent.build_proposal(
                block_id,
                self.last_committed_ts,
                &mut self.host,
                &self.signer,
                &exit,
            )
        };

        if proposal.proposer_index != self.own_index {
            return Err(EngineError::invalid_state("stored proposal is not ours"));
        }

        log::debug!(
            "{}, {}, {}, {} txs",
            logging::BLOCK_PROPOSE,
            logging::now_secs(),
            block_id,
            proposal.transactions.len()
        );

        self.proposed_block_arrived(proposal.clone(), None)?;
        self.store
            .check_and_save_hash(block_id, self.own_index, &proposal.hash.to_hex());

        self.gossip
            .enqueue(GossipMessage::ProposalPush(proposal.clone()));

        let own_share = self
            .signer
            .sign_share(&da_proof_payload(block_id, self.own_index, &proposal.hash));
        self.da_share_arrived(block_id, self.own_index, proposal.hash, own_share)
    }

    /// A proposal reached the driver. This node's own proposals are stored
    /// here; peers' were already validated, stored, and answered with a DA
    /// share by the receive path, so only the finalization bookkeeping runs.
    fn proposed_block_arrived(
        &mut self,
        proposal: BlockProposal,
        from: Option<SchainIndex>,
    ) -> Result<(), EngineError> {
        if proposal.block_id <= self.last_committed {
            return Ok(());
        }
        if from.is_none() {
            self.store.save_proposal(&proposal)?;
        }
        self.retry_parked_commit()
    }

    /* ↓↓↓ Data availability ↓↓↓ */

    fn da_share_arrived(
        &mut self,
        block_id: BlockId,
        proposer_index: SchainIndex,
        block_hash: crate::types::block::BlockHash,
        share: SigShare,
    ) -> Result<(), EngineError> {
        if block_id <= self.last_committed {
            return Ok(());
        }
        let proof = self.da_accumulator.add_share(
            block_id,
            proposer_index,
            block_hash,
            share,
            &self.signer,
        );
        if let Some(proof) = proof {
            self.gossip.enqueue(GossipMessage::DaProof(proof.clone()));
            self.da_proof_arrived(proof)?;
        }
        Ok(())
    }

    /// A DA proof was observed (aggregated locally or received from the
    /// proposer). Updates the proposal vector; at 2f+1 DA-proved proposers
    /// the vector is persisted and consensus starts.
    fn da_proof_arrived(&mut self, proof: DaProof) -> Result<(), EngineError> {
        if proof.block_id <= self.last_committed {
            return Ok(());
        }
        let payload = da_proof_payload(proof.block_id, proof.proposer_index, &proof.block_hash);
        if !self.signer.verify_signature(&payload, &proof.signature) {
            log::debug!(
                "DropDaProof, {}, {}, signature does not verify",
                proof.block_id,
                proof.proposer_index
            );
            return Ok(());
        }

        self.store.save_da_proof(&proof)?;
        self.retry_parked_commit()?;

        if proof.block_id != self.last_committed.next() {
            // The router defers future blocks, so this proof is for the
            // block under decision or stale; stale ones were handled above.
            return Ok(());
        }

        self.proposal_vector.set(proof.proposer_index);
        if !self.consensus_started
            && self.proposal_vector.count_ones() >= self.network.registry().quorum()
        {
            let block_id = proof.block_id;
            let vector = self.proposal_vector.clone();
            self.store.save_proposal_vector(block_id, &vector)?;
            self.consensus_started = true;
            self.handle
                .post_message(InternalMessage::StartConsensus { block_id, vector }.into());
        }
        Ok(())
    }

    /* ↓↓↓ Consensus ↓↓↓ */

    fn start_consensus(
        &mut self,
        block_id: BlockId,
        vector: ProposalVector,
    ) -> Result<(), EngineError> {
        self.exit().check()?;
        let mut ctx = ProtocolContext {
            store: &mut self.store,
            network: &self.network,
            signer: &self.signer,
            rounds: &self.rounds,
        };
        let actions =
            self.orchestrator
                .start_consensus(block_id, &vector, self.last_committed, &mut ctx)?;
        self.handle_actions(actions)
    }

    fn consensus_message_arrived(
        &mut self,
        sender: SchainIndex,
        msg: ConsensusMessage,
    ) -> Result<(), EngineError> {
        let mut ctx = ProtocolContext {
            store: &mut self.store,
            network: &self.network,
            signer: &self.signer,
            rounds: &self.rounds,
        };
        let actions = self.orchestrator.process_consensus_message(
            sender,
            &msg,
            self.last_committed,
            &mut ctx,
        )?;
        self.handle_actions(actions)
    }

    fn handle_actions(&mut self, actions: Vec<DriverAction>) -> Result<(), EngineError> {
        for action in actions {
            match action {
                DriverAction::BlockSigned {
                    block_id,
                    winner,
                    signature,
                } => self.finalize_decided_block(block_id, winner, signature)?,
            }
        }
        Ok(())
    }

    /* ↓↓↓ Finalization ↓↓↓ */

    /// A threshold signature over (block, winner) aggregated. Commit the
    /// winner's proposal if it is locally available and DA-proved; otherwise
    /// park the signature until the proposal or proof arrives (through
    /// gossip or the catch-up collaborator).
    fn finalize_decided_block(
        &mut self,
        block_id: BlockId,
        winner: SchainIndex,
        signature: ThresholdSignature,
    ) -> Result<(), EngineError> {
        if block_id <= self.last_committed {
            log::info!(
                "StaleBlockSigned, {}, already committed through catch-up",
                block_id
            );
            return Ok(());
        }

        let proposal = if winner.is_empty_block_proposer() {
            Some(BlockProposal::empty_block(
                self.chain_id,
                block_id,
                self.last_committed_ts,
            ))
        } else {
            // A proposal is trusted for commit only together with its DA
            // proof; the proof also pins the hash the quorum attested.
            let proof = self.store.da_proof(block_id, winner)?;
            let proposal = self.store.proposal(block_id, winner)?;
            match (proof, proposal) {
                (Some(proof), Some(proposal)) if proposal.hash == proof.block_hash => {
                    Some(proposal)
                }
                _ => None,
            }
        };

        match proposal {
            Some(proposal) => self.block_commit_arrived(&proposal, winner, signature),
            None => {
                log::info!(
                    "{}, {}, {}, waiting for winner {} proposal",
                    logging::FINALIZE_WAIT,
                    logging::now_secs(),
                    block_id,
                    winner
                );
                self.parked_commit = Some((block_id, winner, signature));
                Ok(())
            }
        }
    }

    fn retry_parked_commit(&mut self) -> Result<(), EngineError> {
        let (block_id, winner, signature) = match self.parked_commit.clone() {
            Some(parked) => parked,
            None => return Ok(()),
        };
        let have_proposal = self
            .store
            .proposal(block_id, winner)?
            .map(|proposal| {
                self.store
                    .da_proof(block_id, winner)
                    .ok()
                    .flatten()
                    .is_some_and(|proof| proof.block_hash == proposal.hash)
            })
            .unwrap_or(false);
        if have_proposal {
            self.parked_commit = None;
            self.finalize_decided_block(block_id, winner, signature)?;
        }
        Ok(())
    }

    /// The finalize path: verify, build the committed block, persist, emit,
    /// advance, and propose the next block.
    fn block_commit_arrived(
        &mut self,
        proposal: &BlockProposal,
        winner: SchainIndex,
        signature: ThresholdSignature,
    ) -> Result<(), EngineError> {
        self.exit().check()?;
        let block_id = proposal.block_id;

        if block_id <= self.last_committed {
            return Ok(());
        }
        if block_id != self.last_committed.next() && self.last_committed != BlockId::new(0) {
            return Err(EngineError::invalid_state(format!(
                "commit for {} with head {}",
                block_id, self.last_committed
            )));
        }

        let payload = block_sig_payload(self.chain_id, block_id, winner);
        if !self.signer.verify_signature(&payload, &signature) {
            return Err(EngineError::invalid_state(
                "block signature does not verify under the group key",
            ));
        }

        let block = CommittedBlock::from_proposal(proposal, signature);
        self.process_committed_block(&block)?;
        self.propose_next_block()
    }

    fn process_committed_block(&mut self, block: &CommittedBlock) -> Result<(), EngineError> {
        self.exit().check()?;

        self.stats.total_transactions += block.transactions.len() as u64;
        self.stats.blocks_committed += 1;

        log::info!(
            "{}, {}, PRPSR:{}, BID:{}, HASH:{}, TXS:{}, TOTAL_TXS:{}, MSGS:{}, KNWN:{}, DEFERRED:{}, DELAYED:{}",
            logging::BLOCK_COMMIT,
            logging::now_secs(),
            block.proposer_index,
            block.block_id,
            block.hash.abbrev(),
            block.transactions.len(),
            self.stats.total_transactions,
            self.stats.envelopes_processed,
            self.pending_agent.known_transactions(),
            self.router.total_deferred(),
            self.network.total_delayed_sends(),
        );

        self.store.save_block(block)?;
        self.push_block_to_host(block);
        self.exit().check()?;

        self.last_committed = block.block_id;
        self.last_committed_ts = block.timestamp;
        self.handle.record_commit(block.block_id);

        self.pending_agent.on_block_committed(block);
        self.orchestrator
            .on_block_committed(block.block_id, &self.rounds);
        self.da_accumulator.prune_through(block.block_id);
        self.proposal_vector = ProposalVector::new(self.network.registry().node_count());
        self.consensus_started = false;
        let parked_is_stale = matches!(
            &self.parked_commit,
            Some((parked_id, _, _)) if *parked_id <= block.block_id
        );
        if parked_is_stale {
            self.parked_commit = None;
        }
        Ok(())
    }

    fn push_block_to_host(&mut self, block: &CommittedBlock) {
        self.host.create_block(
            &block.transactions,
            block.timestamp,
            block.block_id,
            self.config.min_gas_price,
            [0u8; 32],
        );
    }

    /* ↓↓↓ Catch-up ↓↓↓ */

    /// A contiguous run of committed blocks starting at lastCommitted+1,
    /// delivered by the catch-up collaborator. Each block's signature is
    /// verified before it is applied.
    fn block_commits_arrived_through_catchup(
        &mut self,
        blocks: CommittedBlockList,
    ) -> Result<(), EngineError> {
        if blocks.is_empty() {
            return Ok(());
        }
        let first = blocks.blocks()[0].block_id;
        if first > self.last_committed.next() {
            return Err(EngineError::invalid_state(format!(
                "catch-up run starts at {} with head {}",
                first, self.last_committed
            )));
        }

        let head_before = self.last_committed;
        for block in blocks.blocks() {
            if block.block_id <= self.last_committed {
                continue;
            }
            if block.block_id != self.last_committed.next() {
                return Err(EngineError::invalid_state("catch-up run is not contiguous"));
            }
            let payload = block_sig_payload(self.chain_id, block.block_id, block.proposer_index);
            if !self.signer.verify_signature(&payload, &block.signature) {
                return Err(EngineError::invalid_state(
                    "catch-up block signature does not verify",
                ));
            }
            self.process_committed_block(block)?;
        }

        if head_before < self.last_committed {
            log::info!(
                "{}, {}, {} blocks",
                logging::BLOCK_CATCHUP,
                logging::now_secs(),
                self.last_committed.int() - head_before.int()
            );
            self.propose_next_block()?;
        }
        Ok(())
    }
}

/// Spawn the driver loop thread. It drains the mailbox, dispatches each
/// envelope to completion, and exits when the flag is set. Per-message
/// failures are logged with their cause chain; fatal failures and exit
/// requests unwind the loop.
pub fn start_driver_loop<K: KVStore, N: Network, H: HostExecutor>(
    mut core: DriverCore<K, N, H>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("msgThreadProcLoop".to_string())
        .spawn(move || {
            let exit = core.exit().clone();
            while !exit.is_set() {
                let envelopes = core.handle.mailbox.drain(Duration::from_millis(100));
                for envelope in envelopes {
                    match core.dispatch(envelope) {
                        Ok(()) => {}
                        Err(EngineError::ExitRequested) => return,
                        Err(EngineError::Fatal(what)) => {
                            log::error!("FatalError, {}", what);
                            exit.request_exit();
                            return;
                        }
                        Err(err) => log_nested("message processing failed", &err),
                    }
                }
            }
        })
        .expect("spawn driver loop")
}
