/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block-consensus orchestrator.
//!
//! For each block under decision the agent runs N binary-agreement children,
//! one per proposer. The driver feeds it the proposal vector (each child's
//! input bit) and every consensus frame; the agent turns child outputs into
//! broadcast frames, persists them for post-restart re-broadcast, and feeds
//! this node's own broadcasts back in as votes.
//!
//! Once all N children complete, the winning proposer is the lowest index
//! that decided one (or index 0, the deterministic empty block, if none did).
//! Every node then broadcasts its threshold share over
//! (chain, block, winner); 2f+1 verified shares aggregate into the block
//! signature, which is handed back to the driver as a
//! [`DriverAction::BlockSigned`] — the agent never calls into the driver.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::bin_consensus::{BinConsensusInstance, BinConsensusOutput};
use crate::crypto::{block_sig_payload, coin_payload, SigShare, SignerHandle, ThresholdSignature};
use crate::errors::EngineError;
use crate::messages::{ConsensusMessage, ConsensusMsgType};
use crate::networking::{ConsensusNetwork, Network, RoundRegistry};
use crate::state::{ChainStore, KVStore};
use crate::types::basic::{Bit, BlockId, ChainId, NodeId, ProtocolKey, Round, SchainIndex};
use crate::types::da::ProposalVector;

/// What the driver must do after a routing call.
#[derive(Clone, Debug)]
pub enum DriverAction {
    /// A threshold signature over (block, winner) aggregated; finalize.
    BlockSigned {
        block_id: BlockId,
        winner: SchainIndex,
        signature: ThresholdSignature,
    },
}

/// Shared capabilities the agent borrows for the duration of one call.
pub struct ProtocolContext<'a, K: KVStore, N: Network> {
    pub store: &'a mut ChainStore<K>,
    pub network: &'a ConsensusNetwork<N>,
    pub signer: &'a SignerHandle,
    pub rounds: &'a RoundRegistry,
}

#[derive(Default)]
struct BlockDecisionState {
    instances: HashMap<SchainIndex, BinConsensusInstance>,
    completed: HashSet<SchainIndex>,
    decided_ones: BTreeSet<SchainIndex>,
    winner: Option<SchainIndex>,
    own_share_sent: bool,
    /// Verified block-signature shares, grouped by the winner they claim.
    sig_shares: HashMap<SchainIndex, Vec<SigShare>>,
    signed: bool,
}

pub struct BlockConsensusAgent {
    chain_id: ChainId,
    own_index: SchainIndex,
    own_node_id: NodeId,
    node_count: usize,
    quorum: usize,
    over_faulty: usize,
    blocks: HashMap<BlockId, BlockDecisionState>,
}

impl BlockConsensusAgent {
    pub fn new(
        chain_id: ChainId,
        own_index: SchainIndex,
        own_node_id: NodeId,
        node_count: usize,
        quorum: usize,
        over_faulty: usize,
    ) -> Self {
        Self {
            chain_id,
            own_index,
            own_node_id,
            node_count,
            quorum,
            over_faulty,
            blocks: HashMap::new(),
        }
    }

    /// Begin block consensus: deliver each child its input bit from the
    /// proposal vector.
    pub fn start_consensus<K: KVStore, N: Network>(
        &mut self,
        block_id: BlockId,
        vector: &ProposalVector,
        last_committed: BlockId,
        ctx: &mut ProtocolContext<'_, K, N>,
    ) -> Result<Vec<DriverAction>, EngineError> {
        if block_id <= last_committed {
            log::debug!("ConsensusTooLate, {}, already committed", block_id);
            return Ok(Vec::new());
        }
        log::info!("ConsensusStart, {}, {}", block_id, vector);

        let mut actions = Vec::new();
        for position in 1..=self.node_count as u64 {
            let proposer = SchainIndex::new(position);
            let bit = Bit::from_bool(vector.get(proposer));
            let mut outputs = Vec::new();
            self.instance_mut(block_id, proposer)
                .set_initial_bit(bit, &mut outputs);
            self.process_outputs(block_id, proposer, outputs, ctx, &mut actions)?;
        }
        Ok(actions)
    }

    /// Route one authenticated consensus frame.
    pub fn process_consensus_message<K: KVStore, N: Network>(
        &mut self,
        sender: SchainIndex,
        msg: &ConsensusMessage,
        last_committed: BlockId,
        ctx: &mut ProtocolContext<'_, K, N>,
    ) -> Result<Vec<DriverAction>, EngineError> {
        if msg.block_id <= last_committed {
            return Ok(Vec::new());
        }

        let mut actions = Vec::new();
        match msg.msg_type {
            ConsensusMsgType::BlockSigBroadcast => {
                self.collect_sig_share(msg.block_id, msg.proposer_index, sender, msg, ctx, &mut actions)?;
            }
            ConsensusMsgType::BvbBroadcast | ConsensusMsgType::AuxBroadcast => {
                let proposer = msg.proposer_index;
                let mut outputs = Vec::new();
                let signer = ctx.signer.clone();
                self.instance_mut(msg.block_id, proposer).process_message(
                    sender,
                    msg,
                    signer.as_ref(),
                    &mut outputs,
                );
                self.process_outputs(msg.block_id, proposer, outputs, ctx, &mut actions)?;
            }
        }
        Ok(actions)
    }

    /// Drop all per-block state through the committed head.
    pub fn on_block_committed(&mut self, block_id: BlockId, rounds: &RoundRegistry) {
        self.blocks.retain(|id, _| *id > block_id);
        rounds.prune_through(block_id);
    }

    /// The current round of an instance, for tests and monitoring.
    pub fn round_of(&self, key: &ProtocolKey) -> Round {
        self.blocks
            .get(&key.block_id)
            .and_then(|state| state.instances.get(&key.proposer_index))
            .map(|instance| instance.current_round())
            .unwrap_or(Round::init())
    }

    fn instance_mut(&mut self, block_id: BlockId, proposer: SchainIndex) -> &mut BinConsensusInstance {
        let chain_id = self.chain_id;
        let quorum = self.quorum;
        let over_faulty = self.over_faulty;
        self.blocks
            .entry(block_id)
            .or_default()
            .instances
            .entry(proposer)
            .or_insert_with(|| {
                BinConsensusInstance::new(
                    ProtocolKey::new(block_id, proposer),
                    chain_id,
                    quorum,
                    over_faulty,
                )
            })
    }

    /// Turn child outputs into frames and recursive self-deliveries, until
    /// the work queue is empty.
    fn process_outputs<K: KVStore, N: Network>(
        &mut self,
        block_id: BlockId,
        proposer: SchainIndex,
        outputs: Vec<BinConsensusOutput>,
        ctx: &mut ProtocolContext<'_, K, N>,
        actions: &mut Vec<DriverAction>,
    ) -> Result<(), EngineError> {
        let mut pending: VecDeque<(SchainIndex, BinConsensusOutput)> = outputs
            .into_iter()
            .map(|output| (proposer, output))
            .collect();

        while let Some((proposer, output)) = pending.pop_front() {
            let key = ProtocolKey::new(block_id, proposer);
            match output {
                BinConsensusOutput::SendBvb { round, value } => {
                    let msg = self.build_frame(
                        ConsensusMsgType::BvbBroadcast,
                        block_id,
                        proposer,
                        round,
                        value,
                        crate::crypto::SigShareBytes::empty(),
                        ctx,
                    );
                    self.broadcast_and_self_deliver(msg, ctx, &mut pending)?;
                }
                BinConsensusOutput::SendAux { round, value } => {
                    let payload = coin_payload(self.chain_id, block_id, proposer, round);
                    let share = ctx.signer.sign_share(&payload);
                    let msg = self.build_frame(
                        ConsensusMsgType::AuxBroadcast,
                        block_id,
                        proposer,
                        round,
                        value,
                        share.share,
                        ctx,
                    );
                    self.broadcast_and_self_deliver(msg, ctx, &mut pending)?;
                }
                BinConsensusOutput::RoundAdvanced { round, decided } => {
                    ctx.rounds.update(key, round, decided);
                }
                BinConsensusOutput::Decided { value, round } => {
                    ctx.rounds.update(key, round, true);
                    log::info!("ChildDecided, {}, {}, {}", key, value, round);
                    self.record_child_decision(block_id, proposer, value, ctx, actions)?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_frame<K: KVStore, N: Network>(
        &self,
        msg_type: ConsensusMsgType,
        block_id: BlockId,
        proposer: SchainIndex,
        round: Round,
        value: Bit,
        sig_share: crate::crypto::SigShareBytes,
        ctx: &ProtocolContext<'_, K, N>,
    ) -> ConsensusMessage {
        ConsensusMessage {
            msg_type,
            chain_id: self.chain_id,
            block_id,
            proposer_index: proposer,
            msg_id: ctx.network.next_msg_id(),
            src_node_id: self.own_node_id,
            dst_node_id: NodeId::new(0),
            round,
            value,
            src_ip: ctx.network.own_ip(),
            sig_share,
        }
    }

    /// Persist, broadcast, and count our own vote.
    fn broadcast_and_self_deliver<K: KVStore, N: Network>(
        &mut self,
        msg: ConsensusMessage,
        ctx: &mut ProtocolContext<'_, K, N>,
        pending: &mut VecDeque<(SchainIndex, BinConsensusOutput)>,
    ) -> Result<(), EngineError> {
        let frame = crate::networking::wire::encode_consensus(&msg);
        ctx.store.save_outgoing_message(msg.block_id, &frame)?;
        ctx.network.broadcast(&frame);

        let own_index = self.own_index;
        let signer = ctx.signer.clone();
        let mut outputs = Vec::new();
        self.instance_mut(msg.block_id, msg.proposer_index).process_message(
            own_index,
            &msg,
            signer.as_ref(),
            &mut outputs,
        );
        pending.extend(
            outputs
                .into_iter()
                .map(|output| (msg.proposer_index, output)),
        );
        Ok(())
    }

    fn record_child_decision<K: KVStore, N: Network>(
        &mut self,
        block_id: BlockId,
        proposer: SchainIndex,
        value: Bit,
        ctx: &mut ProtocolContext<'_, K, N>,
        actions: &mut Vec<DriverAction>,
    ) -> Result<(), EngineError> {
        let node_count = self.node_count;
        let state = self.blocks.entry(block_id).or_default();
        state.completed.insert(proposer);
        if value.is_one() {
            state.decided_ones.insert(proposer);
        }
        if state.completed.len() < node_count || state.winner.is_some() {
            return Ok(());
        }

        // Deterministic tie-break: the lowest proposer that decided one.
        let winner = state
            .decided_ones
            .iter()
            .next()
            .copied()
            .unwrap_or(SchainIndex::EMPTY_BLOCK_PROPOSER);
        state.winner = Some(winner);
        log::info!("BlockDecided, {}, winner {}", block_id, winner);

        self.send_own_sig_share(block_id, winner, ctx, actions)
    }

    fn send_own_sig_share<K: KVStore, N: Network>(
        &mut self,
        block_id: BlockId,
        winner: SchainIndex,
        ctx: &mut ProtocolContext<'_, K, N>,
        actions: &mut Vec<DriverAction>,
    ) -> Result<(), EngineError> {
        {
            let state = self.blocks.entry(block_id).or_default();
            if state.own_share_sent {
                return Ok(());
            }
            state.own_share_sent = true;
        }

        let payload = block_sig_payload(self.chain_id, block_id, winner);
        let share = ctx.signer.sign_share(&payload);
        let value = Bit::from_bool(!winner.is_empty_block_proposer());
        let msg = self.build_frame(
            ConsensusMsgType::BlockSigBroadcast,
            block_id,
            winner,
            Round::init(),
            value,
            share.share,
            ctx,
        );
        let frame = crate::networking::wire::encode_consensus(&msg);
        ctx.store.save_outgoing_message(block_id, &frame)?;
        ctx.network.broadcast(&frame);

        let own_index = self.own_index;
        self.collect_sig_share(block_id, winner, own_index, &msg, ctx, actions)
    }

    /// Record one block-signature share, aggregating once a quorum claims the
    /// same winner.
    fn collect_sig_share<K: KVStore, N: Network>(
        &mut self,
        block_id: BlockId,
        claimed_winner: SchainIndex,
        sender: SchainIndex,
        msg: &ConsensusMessage,
        ctx: &mut ProtocolContext<'_, K, N>,
        actions: &mut Vec<DriverAction>,
    ) -> Result<(), EngineError> {
        let payload = block_sig_payload(self.chain_id, block_id, claimed_winner);
        let share = SigShare::new(sender, msg.sig_share.clone());
        if !ctx.signer.verify_share(&payload, &share) {
            log::debug!(
                "DropSigShare, {}, bad share from {} for winner {}",
                block_id,
                sender,
                claimed_winner
            );
            return Ok(());
        }

        let quorum = self.quorum;
        let state = self.blocks.entry(block_id).or_default();
        if state.signed {
            return Ok(());
        }
        let shares = state.sig_shares.entry(claimed_winner).or_default();
        if shares.iter().any(|existing| existing.signer == sender) {
            return Ok(());
        }
        shares.push(share);
        if shares.len() < quorum {
            return Ok(());
        }

        let signature = ctx
            .signer
            .aggregate(&payload, shares.as_slice())
            .map_err(|err| EngineError::invalid_state_caused_by("block signature aggregation", err))?;
        if !ctx.signer.verify_signature(&payload, &signature) {
            return Err(EngineError::invalid_state(
                "aggregated block signature does not verify",
            ));
        }
        state.signed = true;

        log::info!("BlockSigned, {}, winner {}", block_id, claimed_winner);
        actions.push(DriverAction::BlockSigned {
            block_id,
            winner: claimed_winner,
            signature,
        });
        Ok(())
    }
}
