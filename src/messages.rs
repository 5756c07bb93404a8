/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Structured messages processed by the driver loop.
//!
//! Everything the driver dequeues is an [`Envelope`]: either a message that
//! arrived from a peer ([`NetworkEnvelope`], with the sender already
//! authenticated by the receive path), or an internal message the engine
//! posted to itself to run an operation on the loop thread.
//!
//! Network messages split into two families:
//! 1. [`ConsensusMessage`] — the fixed-size binary frames of the agreement
//!    protocol (binary-value broadcast, auxiliary broadcast, block-signature
//!    broadcast).
//! 2. [`GossipMessage`] — borsh-encoded proposal distribution and
//!    data-availability traffic.

use std::net::Ipv4Addr;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::crypto::SigShareBytes;
use crate::types::basic::{
    Bit, BlockId, BlockTimestamp, ChainId, MsgId, NodeId, ProtocolKey, Round, SchainIndex,
};
use crate::types::block::{BlockHash, BlockProposal, CommittedBlockList};
use crate::types::da::{DaProof, ProposalVector};

/// The wire type tag of a consensus frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConsensusMsgType {
    BvbBroadcast,
    AuxBroadcast,
    BlockSigBroadcast,
}

impl ConsensusMsgType {
    pub const fn to_u8(&self) -> u8 {
        match self {
            ConsensusMsgType::BvbBroadcast => 0,
            ConsensusMsgType::AuxBroadcast => 1,
            ConsensusMsgType::BlockSigBroadcast => 2,
        }
    }

    pub const fn from_u8(byte: u8) -> Option<ConsensusMsgType> {
        match byte {
            0 => Some(ConsensusMsgType::BvbBroadcast),
            1 => Some(ConsensusMsgType::AuxBroadcast),
            2 => Some(ConsensusMsgType::BlockSigBroadcast),
            _ => None,
        }
    }
}

/// One fixed-size consensus frame. The meaning of `value` and `sig_share`
/// depends on `msg_type`:
/// - `BvbBroadcast`: `value` is the broadcast bit, `sig_share` is empty.
/// - `AuxBroadcast`: `value` is the witnessed bit, `sig_share` is the
///   sender's share over the round's coin payload.
/// - `BlockSigBroadcast`: `proposer_index` is the winning proposer, `value`
///   is whether any proposer won, `sig_share` is the sender's share over the
///   block-signature payload.
#[derive(Clone, Debug)]
pub struct ConsensusMessage {
    pub msg_type: ConsensusMsgType,
    pub chain_id: ChainId,
    pub block_id: BlockId,
    pub proposer_index: SchainIndex,
    pub msg_id: MsgId,
    pub src_node_id: NodeId,
    pub dst_node_id: NodeId,
    pub round: Round,
    pub value: Bit,
    pub src_ip: Ipv4Addr,
    pub sig_share: SigShareBytes,
}

impl ConsensusMessage {
    /// The binary-agreement instance this frame addresses.
    pub fn protocol_key(&self) -> ProtocolKey {
        ProtocolKey::new(self.block_id, self.proposer_index)
    }

    pub fn is_block_sig(&self) -> bool {
        self.msg_type == ConsensusMsgType::BlockSigBroadcast
    }

    /// Reject frames naming a position outside the fixed membership.
    /// Block-signature frames may name position 0 (the empty-block winner).
    pub fn validate_indices(&self, node_count: u64) -> Result<(), crate::errors::EngineError> {
        let index = self.proposer_index.int();
        let floor = if self.is_block_sig() { 0 } else { 1 };
        if index < floor || index > node_count {
            return Err(crate::errors::EngineError::InvalidSchain(index));
        }
        Ok(())
    }
}

/// A data-availability share sent back to a proposer after storing its
/// proposal.
#[derive(Clone, Debug, BorshDeserialize, BorshSerialize)]
pub struct DaShareMessage {
    pub block_id: BlockId,
    pub proposer_index: SchainIndex,
    pub block_hash: BlockHash,
    pub share: SigShareBytes,
}

/// Proposal distribution and data-availability traffic.
#[derive(Clone, Debug, BorshDeserialize, BorshSerialize)]
pub enum GossipMessage {
    ProposalPush(BlockProposal),
    DaSigShare(DaShareMessage),
    DaProof(DaProof),
}

impl GossipMessage {
    pub fn block_id(&self) -> BlockId {
        match self {
            GossipMessage::ProposalPush(proposal) => proposal.block_id,
            GossipMessage::DaSigShare(share) => share.block_id,
            GossipMessage::DaProof(proof) => proof.block_id,
        }
    }
}

/// Any message received from a peer.
#[derive(Clone, Debug)]
pub enum NetworkMessage {
    Consensus(ConsensusMessage),
    Gossip(GossipMessage),
}

impl NetworkMessage {
    pub fn block_id(&self) -> BlockId {
        match self {
            NetworkMessage::Consensus(msg) => msg.block_id,
            NetworkMessage::Gossip(msg) => msg.block_id(),
        }
    }

    /// The binary-agreement round, for messages that have one. Gossip and
    /// block-signature traffic is ordered by block id alone.
    pub fn round(&self) -> Option<Round> {
        match self {
            NetworkMessage::Consensus(msg) if !msg.is_block_sig() => Some(msg.round),
            _ => None,
        }
    }

    pub fn protocol_key(&self) -> Option<ProtocolKey> {
        match self {
            NetworkMessage::Consensus(msg) if !msg.is_block_sig() => Some(msg.protocol_key()),
            _ => None,
        }
    }
}

/// A network message whose sender has been authenticated against the fixed
/// membership by the receive path.
#[derive(Clone, Debug)]
pub struct NetworkEnvelope {
    pub sender: SchainIndex,
    pub message: NetworkMessage,
}

/// Operations posted to the driver loop by the engine itself.
#[derive(Clone, Debug)]
pub enum InternalMessage {
    /// One-shot startup reconciliation with the host's head.
    Bootstrap {
        last_committed_id: BlockId,
        last_committed_ts: BlockTimestamp,
    },
    /// Begin block consensus with the persisted proposal vector.
    StartConsensus {
        block_id: BlockId,
        vector: ProposalVector,
    },
    /// A contiguous run of committed blocks delivered by the catch-up
    /// collaborator.
    CatchupBlocks(CommittedBlockList),
}

/// Everything the driver mailbox carries.
#[derive(Clone, Debug)]
pub enum Envelope {
    Network(NetworkEnvelope),
    Internal(InternalMessage),
}

impl From<NetworkEnvelope> for Envelope {
    fn from(envelope: NetworkEnvelope) -> Self {
        Envelope::Network(envelope)
    }
}

impl From<InternalMessage> for Envelope {
    fn from(message: InternalMessage) -> Self {
        Envelope::Internal(message)
    }
}
