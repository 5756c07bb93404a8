/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! One randomized binary-agreement instance.
//!
//! An instance decides a single bit for its protocol key — "this proposer's
//! block is available" — through rounds of binary-value broadcast (BVB),
//! auxiliary broadcast (AUX), and a common coin:
//!
//! 1. Broadcast `BVB(r, est)`.
//! 2. On f+1 distinct `BVB(r, v)` senders, rebroadcast `BVB(r, v)` once; on
//!    2f+1, admit `v` into the round's binary-value set.
//! 3. When the set first becomes non-empty, broadcast `AUX(r, w)` for one
//!    admitted `w`, carrying this node's share over the round's coin payload.
//! 4. Once 2f+1 AUX messages whose values all lie in the binary-value set
//!    have arrived, obtain the coin `s_r`: rounds 0 and 1 are deterministic
//!    (0 then 1, which terminates unanimous inputs without reconstruction);
//!    later rounds reconstruct the coin from the shares the AUX messages
//!    carried.
//! 5. If the witnessed values are a single `v`: the next estimate is `v`, and
//!    if `v == s_r` the instance decides `v`. Otherwise the next estimate is
//!    `s_r`. Either way the next round begins at step 1.
//!
//! The instance decides at most once, and messages for rounds at or below
//! the decision round are discarded — but deciding does not halt it. A node
//! whose witnessed set was `{0, 1}` while the quorum's was `{v}` ends the
//! round one step behind; if deciders went silent it could never assemble
//! another round quorum. So a decided instance keeps running rounds with its
//! estimate pinned to the decision until the orchestrator drops it at block
//! commit, and the decision itself never changes. Processing is driven
//! entirely by the driver loop, so no internal synchronization is needed.
//!
//! An instance may be created by the first message from a peer, before this
//! node knows its own input bit (the proposal vector may still be filling
//! in). It then tracks peers' progress and joins in from the round it first
//! completes.

use std::collections::{HashMap, HashSet};

use crate::crypto::{coin_bit, coin_payload, SigShare, ThresholdSigner};
use crate::messages::{ConsensusMessage, ConsensusMsgType};
use crate::types::basic::{Bit, ChainId, ProtocolKey, Round, SchainIndex};

/// What the instance wants done after processing one event. The orchestrator
/// turns sends into frames (attaching identity fields and coin shares),
/// persists them, broadcasts them, and feeds them back to the instance as its
/// own vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BinConsensusOutput {
    SendBvb { round: Round, value: Bit },
    SendAux { round: Round, value: Bit },
    RoundAdvanced { round: Round, decided: bool },
    Decided { value: Bit, round: Round },
}

#[derive(Default)]
struct RoundState {
    /// Distinct senders per broadcast value.
    bvb_votes: HashMap<Bit, HashSet<SchainIndex>>,
    /// Values this node has itself broadcast for the round.
    bvb_sent: HashSet<Bit>,
    /// Values admitted by 2f+1 distinct senders.
    bin_values: HashSet<Bit>,
    /// First AUX value witnessed per sender.
    aux_votes: HashMap<SchainIndex, Bit>,
    /// Verified coin shares carried by the round's AUX messages.
    coin_shares: Vec<SigShare>,
    aux_sent: bool,
}

pub struct BinConsensusInstance {
    key: ProtocolKey,
    chain_id: ChainId,
    quorum: usize,
    over_faulty: usize,
    est: Option<Bit>,
    round: Round,
    decided: Option<(Bit, Round)>,
    rounds: HashMap<Round, RoundState>,
}

impl BinConsensusInstance {
    pub fn new(key: ProtocolKey, chain_id: ChainId, quorum: usize, over_faulty: usize) -> Self {
        Self {
            key,
            chain_id,
            quorum,
            over_faulty,
            est: None,
            round: Round::init(),
            decided: None,
            rounds: HashMap::new(),
        }
    }

    pub fn key(&self) -> ProtocolKey {
        self.key
    }

    pub fn current_round(&self) -> Round {
        self.round
    }

    pub fn decided(&self) -> Option<(Bit, Round)> {
        self.decided
    }

    pub fn is_decided(&self) -> bool {
        self.decided.is_some()
    }

    /// Deliver this node's input bit. A no-op if the input already arrived or
    /// the instance moved past round 0 on peers' traffic alone.
    pub fn set_initial_bit(&mut self, bit: Bit, out: &mut Vec<BinConsensusOutput>) {
        if self.est.is_some() || self.round > Round::init() || self.is_decided() {
            return;
        }
        self.est = Some(bit);
        self.rounds
            .entry(Round::init())
            .or_default()
            .bvb_sent
            .insert(bit);
        out.push(BinConsensusOutput::SendBvb {
            round: Round::init(),
            value: bit,
        });
    }

    /// Process one BVB or AUX frame addressed to this instance. Frames for
    /// rounds at or below the decision round are dropped silently.
    pub fn process_message(
        &mut self,
        sender: SchainIndex,
        msg: &ConsensusMessage,
        signer: &dyn ThresholdSigner,
        out: &mut Vec<BinConsensusOutput>,
    ) {
        if let Some((_, decided_round)) = self.decided {
            if msg.round <= decided_round {
                return;
            }
        }

        match msg.msg_type {
            ConsensusMsgType::BvbBroadcast => self.record_bvb(sender, msg.round, msg.value, out),
            ConsensusMsgType::AuxBroadcast => self.record_aux(sender, msg, signer),
            ConsensusMsgType::BlockSigBroadcast => return,
        }

        self.try_complete_round(signer, out);
    }

    fn record_bvb(
        &mut self,
        sender: SchainIndex,
        round: Round,
        value: Bit,
        out: &mut Vec<BinConsensusOutput>,
    ) {
        let over_faulty = self.over_faulty;
        let quorum = self.quorum;
        let state = self.rounds.entry(round).or_default();

        state.bvb_votes.entry(value).or_default().insert(sender);
        let senders = state.bvb_votes[&value].len();

        if senders >= over_faulty && !state.bvb_sent.contains(&value) {
            state.bvb_sent.insert(value);
            out.push(BinConsensusOutput::SendBvb { round, value });
        }

        if senders >= quorum && !state.bin_values.contains(&value) {
            state.bin_values.insert(value);
            if !state.aux_sent {
                state.aux_sent = true;
                out.push(BinConsensusOutput::SendAux { round, value });
            }
        }
    }

    fn record_aux(&mut self, sender: SchainIndex, msg: &ConsensusMessage, signer: &dyn ThresholdSigner) {
        let share = SigShare::new(sender, msg.sig_share.clone());
        let payload = coin_payload(
            self.chain_id,
            self.key.block_id,
            self.key.proposer_index,
            msg.round,
        );
        if !signer.verify_share(&payload, &share) {
            log::debug!(
                "DropAux, {}, {}, bad coin share from {}",
                self.key,
                msg.round,
                sender
            );
            return;
        }

        let state = self.rounds.entry(msg.round).or_default();
        state.aux_votes.entry(sender).or_insert(msg.value);
        if !state.coin_shares.iter().any(|existing| existing.signer == sender) {
            state.coin_shares.push(share);
        }
    }

    /// Run the round-transition check for the current round.
    fn try_complete_round(&mut self, signer: &dyn ThresholdSigner, out: &mut Vec<BinConsensusOutput>) {
        let round = self.round;
        let quorum = self.quorum;

        let state = match self.rounds.get(&round) {
            Some(state) => state,
            None => return,
        };
        if state.bin_values.is_empty() {
            return;
        }

        // The witnessed set: AUX votes whose values the round admitted.
        let matching: Vec<(SchainIndex, Bit)> = state
            .aux_votes
            .iter()
            .filter(|(_, value)| state.bin_values.contains(value))
            .map(|(sender, value)| (*sender, *value))
            .collect();
        if matching.len() < quorum {
            return;
        }

        let coin = match round.int() {
            0 => Bit::Zero,
            1 => Bit::One,
            _ => {
                if state.coin_shares.len() < quorum {
                    return;
                }
                let payload = coin_payload(
                    self.chain_id,
                    self.key.block_id,
                    self.key.proposer_index,
                    round,
                );
                match signer.aggregate(&payload, &state.coin_shares) {
                    Ok(signature) => coin_bit(&signature),
                    Err(err) => {
                        log::warn!("CoinFailure, {}, {}, {}", self.key, round, err);
                        return;
                    }
                }
            }
        };

        let witnessed: HashSet<Bit> = matching.iter().map(|(_, value)| *value).collect();
        let mut next_est = if witnessed.len() == 1 {
            let value = *witnessed.iter().next().expect("witnessed set is non-empty");
            if value == coin && !self.is_decided() {
                self.decided = Some((value, round));
                out.push(BinConsensusOutput::Decided { value, round });
            }
            value
        } else {
            coin
        };
        // Once decided, the estimate is pinned: late rounds exist to carry
        // stragglers to the same decision, never to revisit it.
        if let Some((value, _)) = self.decided {
            next_est = value;
        }

        self.est = Some(next_est);
        self.round = round.next();
        self.rounds
            .entry(self.round)
            .or_default()
            .bvb_sent
            .insert(next_est);
        out.push(BinConsensusOutput::RoundAdvanced {
            round: self.round,
            decided: self.is_decided(),
        });
        out.push(BinConsensusOutput::SendBvb {
            round: self.round,
            value: next_est,
        });
    }
}
