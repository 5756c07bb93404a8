/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The wire codec.
//!
//! Two frame families share the transport, distinguished by their leading
//! magic number:
//!
//! 1. Consensus frames: fixed-size, all multi-byte fields little-endian:
//!    magic (u64) | chain id (u64) | block id (u64) | proposer index (u64) |
//!    msg type (u8) | msg id (u64) | src node id (u64) | dst node id (u64) |
//!    round (u64) | value (u8) | src ip (u32) | sig share (hex,
//!    null-padded to [`BLS_MAX_SIG_LEN`] bytes).
//! 2. Gossip frames: magic (u64) | chain id (u64) | borsh-encoded
//!    [`GossipMessage`].
//!
//! A frame whose magic matches neither family is dropped silently (the
//! caller sees `Ok(None)`); anything else malformed is a parse error.

use std::net::Ipv4Addr;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::crypto::{SigShareBytes, BLS_MAX_SIG_LEN};
use crate::errors::ParseError;
use crate::messages::{ConsensusMessage, ConsensusMsgType, GossipMessage};
use crate::types::basic::{Bit, BlockId, ChainId, MsgId, NodeId, Round, SchainIndex};

pub const CONSENSUS_MAGIC: u64 = 0x73_63_6e_73_5f_62_66_74;
pub const GOSSIP_MAGIC: u64 = 0x73_63_6e_73_5f_67_73_70;

/// Total length of a consensus frame.
pub const CONSENSUS_FRAME_LEN: usize = 8 * 8 + 1 + 1 + 4 + BLS_MAX_SIG_LEN;

/// A decoded frame of either family.
#[derive(Clone, Debug)]
pub enum WireFrame {
    Consensus(ConsensusMessage),
    Gossip(ChainId, GossipMessage),
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ParseError> {
    if hex.len() % 2 != 0 {
        return Err(ParseError::new("odd-length hex"));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| ParseError::new("non-hex character"))
        })
        .collect()
}

pub fn encode_consensus(msg: &ConsensusMessage) -> Vec<u8> {
    let mut frame = Vec::with_capacity(CONSENSUS_FRAME_LEN);
    frame.extend_from_slice(&CONSENSUS_MAGIC.to_le_bytes());
    frame.extend_from_slice(&msg.chain_id.int().to_le_bytes());
    frame.extend_from_slice(&msg.block_id.int().to_le_bytes());
    frame.extend_from_slice(&msg.proposer_index.int().to_le_bytes());
    frame.push(msg.msg_type.to_u8());
    frame.extend_from_slice(&msg.msg_id.int().to_le_bytes());
    frame.extend_from_slice(&msg.src_node_id.int().to_le_bytes());
    frame.extend_from_slice(&msg.dst_node_id.int().to_le_bytes());
    frame.extend_from_slice(&msg.round.int().to_le_bytes());
    frame.push(msg.value.to_u8());
    frame.extend_from_slice(&u32::from(msg.src_ip).to_le_bytes());

    let share_hex = hex_encode(msg.sig_share.bytes());
    debug_assert!(share_hex.len() <= BLS_MAX_SIG_LEN);
    let mut share_field = [0u8; BLS_MAX_SIG_LEN];
    share_field[..share_hex.len()].copy_from_slice(share_hex.as_bytes());
    frame.extend_from_slice(&share_field);

    debug_assert_eq!(frame.len(), CONSENSUS_FRAME_LEN);
    frame
}

pub fn encode_gossip(chain_id: ChainId, msg: &GossipMessage) -> Result<Vec<u8>, ParseError> {
    let body = msg
        .try_to_vec()
        .map_err(|err| ParseError::with_cause("gossip message encoding", err))?;
    let mut frame = Vec::with_capacity(16 + body.len());
    frame.extend_from_slice(&GOSSIP_MAGIC.to_le_bytes());
    frame.extend_from_slice(&chain_id.int().to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

struct FrameReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> FrameReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }

    fn read_u64(&mut self) -> Result<u64, ParseError> {
        if self.cursor + 8 > self.bytes.len() {
            return Err(ParseError::new("frame truncated"));
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.bytes[self.cursor..self.cursor + 8]);
        self.cursor += 8;
        Ok(u64::from_le_bytes(word))
    }

    fn read_u32(&mut self) -> Result<u32, ParseError> {
        if self.cursor + 4 > self.bytes.len() {
            return Err(ParseError::new("frame truncated"));
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[self.cursor..self.cursor + 4]);
        self.cursor += 4;
        Ok(u32::from_le_bytes(word))
    }

    fn read_u8(&mut self) -> Result<u8, ParseError> {
        if self.cursor >= self.bytes.len() {
            return Err(ParseError::new("frame truncated"));
        }
        let byte = self.bytes[self.cursor];
        self.cursor += 1;
        Ok(byte)
    }
}

/// Decode one received datagram. `Ok(None)` means the magic number matched
/// neither family; the frame is dropped without further note.
pub fn decode(bytes: &[u8]) -> Result<Option<WireFrame>, ParseError> {
    if bytes.len() < 8 {
        return Err(ParseError::new("datagram shorter than a magic number"));
    }
    let mut magic = [0u8; 8];
    magic.copy_from_slice(&bytes[..8]);
    match u64::from_le_bytes(magic) {
        CONSENSUS_MAGIC => decode_consensus(bytes).map(Some),
        GOSSIP_MAGIC => decode_gossip(bytes).map(Some),
        _ => Ok(None),
    }
}

fn decode_consensus(bytes: &[u8]) -> Result<WireFrame, ParseError> {
    if bytes.len() != CONSENSUS_FRAME_LEN {
        return Err(ParseError::new(format!(
            "consensus frame of {} bytes, expected {}",
            bytes.len(),
            CONSENSUS_FRAME_LEN
        )));
    }

    let mut reader = FrameReader::new(bytes);
    let _magic = reader.read_u64()?;
    let chain_id = ChainId::new(reader.read_u64()?);
    let block_id = BlockId::new(reader.read_u64()?);
    let proposer_index = SchainIndex::new(reader.read_u64()?);
    let msg_type_byte = reader.read_u8()?;
    let msg_id = MsgId::new(reader.read_u64()?);
    let src_node_id = NodeId::new(reader.read_u64()?);
    let dst_node_id = NodeId::new(reader.read_u64()?);
    let round = Round::new(reader.read_u64()?);
    let value_byte = reader.read_u8()?;
    let src_ip = Ipv4Addr::from(reader.read_u32()?);

    let msg_type = match ConsensusMsgType::from_u8(msg_type_byte) {
        Some(msg_type) => msg_type,
        None => {
            debug_assert!(false, "unknown consensus message type {}", msg_type_byte);
            return Err(ParseError::new(format!(
                "unknown consensus message type {}",
                msg_type_byte
            )));
        }
    };
    let value = Bit::from_u8(value_byte)
        .ok_or_else(|| ParseError::new(format!("invalid bit value {}", value_byte)))?;

    let share_field = &bytes[reader.cursor..];
    let share_len = share_field
        .iter()
        .position(|byte| *byte == 0)
        .unwrap_or(share_field.len());
    let share_hex = std::str::from_utf8(&share_field[..share_len])
        .map_err(|_| ParseError::new("signature share is not ASCII hex"))?;
    if share_field[share_len..].iter().any(|byte| *byte != 0) {
        return Err(ParseError::new("signature share padding is not null"));
    }
    let sig_share = SigShareBytes::new(hex_decode(share_hex)?);

    Ok(WireFrame::Consensus(ConsensusMessage {
        msg_type,
        chain_id,
        block_id,
        proposer_index,
        msg_id,
        src_node_id,
        dst_node_id,
        round,
        value,
        src_ip,
        sig_share,
    }))
}

fn decode_gossip(bytes: &[u8]) -> Result<WireFrame, ParseError> {
    if bytes.len() < 16 {
        return Err(ParseError::new("gossip frame truncated"));
    }
    let mut chain = [0u8; 8];
    chain.copy_from_slice(&bytes[8..16]);
    let chain_id = ChainId::new(u64::from_le_bytes(chain));
    let msg = GossipMessage::try_from_slice(&bytes[16..])
        .map_err(|err| ParseError::with_cause("could not decode gossip message", err))?;
    Ok(WireFrame::Gossip(chain_id, msg))
}
