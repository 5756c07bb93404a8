/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block proposals, committed blocks, and the canonical block wire format.
//!
//! ## Canonical serialization
//!
//! A serialized block is:
//! 1. An 8-byte little-endian header size.
//! 2. A JSON header (`{proposerIndex, proposerNodeID, blockID, schainID,
//!    timeStamp, timeStampMs, hash, sizes}`), which must begin with `{` and
//!    end with `}`.
//! 3. The transaction payloads concatenated in the order declared by `sizes`.
//!
//! The header's `hash` is SHA-256 over the block's identity fields and
//! transaction payloads. [`CommittedBlock::deserialize`] recomputes it, so a
//! single corrupted byte anywhere in the canonical form is rejected: a flip in
//! the size prefix breaks the brace or length checks, a flip in the header
//! changes a field the hash covers (or breaks the JSON), and a flip in a
//! payload changes the recomputed hash.
//!
//! The threshold signature over the block-consensus decision is deliberately
//! *not* part of the canonical bytes. Honest nodes may aggregate different
//! share subsets into byte-wise different group signatures, and the canonical
//! form is what they must agree on. The signature is stored and transmitted
//! alongside the canonical bytes instead.

use std::fmt::{self, Debug, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::{SigShareBytes, ThresholdSignature};
use crate::errors::ParseError;
use crate::types::basic::{BlockId, BlockTimestamp, ChainId, NodeId, SchainIndex};
use crate::types::transaction::TransactionList;

/// Upper bound on the JSON header of a serialized block.
pub const MAX_HEADER_SIZE: u64 = 1 << 20;

/// SHA-256 hash identifying a block proposal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(64);
        for byte in self.0 {
            hex.push_str(&format!("{:02x}", byte));
        }
        hex
    }

    pub fn from_hex(hex: &str) -> Result<BlockHash, ParseError> {
        if hex.len() != 64 {
            return Err(ParseError::new("block hash hex must be 64 characters"));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk)
                .map_err(|_| ParseError::new("block hash hex is not UTF-8"))?;
            bytes[i] = u8::from_str_radix(pair, 16)
                .map_err(|_| ParseError::new("block hash hex has a non-hex character"))?;
        }
        Ok(BlockHash(bytes))
    }

    /// The first seven hex characters, for log lines.
    pub fn abbrev(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(7);
        hex
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Debug for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute a block's hash over its identity fields and transaction payloads.
pub fn compute_block_hash(
    chain_id: ChainId,
    block_id: BlockId,
    proposer_index: SchainIndex,
    proposer_node_id: NodeId,
    timestamp: BlockTimestamp,
    transactions: &TransactionList,
) -> BlockHash {
    let mut hasher = Sha256::new();
    hasher.update(chain_id.int().to_le_bytes());
    hasher.update(block_id.int().to_le_bytes());
    hasher.update(proposer_index.int().to_le_bytes());
    hasher.update(proposer_node_id.int().to_le_bytes());
    hasher.update(timestamp.sec.to_le_bytes());
    hasher.update(timestamp.ms.to_le_bytes());
    hasher.update((transactions.len() as u64).to_le_bytes());
    for tx in transactions.iter() {
        hasher.update((tx.len() as u64).to_le_bytes());
        hasher.update(tx.payload());
    }
    BlockHash(hasher.finalize().into())
}

/// A block proposal, either built locally or received from a peer. The
/// `signature` is the proposer's own threshold share over the proposal hash;
/// deterministic empty blocks (proposer index 0) carry an empty signature.
#[derive(Clone, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct BlockProposal {
    pub chain_id: ChainId,
    pub block_id: BlockId,
    pub proposer_index: SchainIndex,
    pub proposer_node_id: NodeId,
    pub timestamp: BlockTimestamp,
    pub transactions: TransactionList,
    pub hash: BlockHash,
    pub signature: SigShareBytes,
}

impl BlockProposal {
    pub fn new(
        chain_id: ChainId,
        block_id: BlockId,
        proposer_index: SchainIndex,
        proposer_node_id: NodeId,
        timestamp: BlockTimestamp,
        transactions: TransactionList,
        signature: SigShareBytes,
    ) -> Self {
        let hash = compute_block_hash(
            chain_id,
            block_id,
            proposer_index,
            proposer_node_id,
            timestamp,
            &transactions,
        );
        Self {
            chain_id,
            block_id,
            proposer_index,
            proposer_node_id,
            timestamp,
            transactions,
            hash,
            signature,
        }
    }

    /// The deterministic empty block extending a block with timestamp
    /// `prev_timestamp`. Every honest node builds the identical proposal.
    pub fn empty_block(
        chain_id: ChainId,
        block_id: BlockId,
        prev_timestamp: BlockTimestamp,
    ) -> Self {
        BlockProposal::new(
            chain_id,
            block_id,
            SchainIndex::EMPTY_BLOCK_PROPOSER,
            NodeId::new(0),
            prev_timestamp.next_for_empty_block(),
            TransactionList::empty(),
            SigShareBytes::empty(),
        )
    }

    /// Verifies that `hash` matches the proposal's contents.
    pub fn hash_is_consistent(&self) -> bool {
        self.hash
            == compute_block_hash(
                self.chain_id,
                self.block_id,
                self.proposer_index,
                self.proposer_node_id,
                self.timestamp,
                &self.transactions,
            )
    }
}

/// The JSON header of a canonically serialized block.
#[derive(Serialize, Deserialize)]
struct BlockHeaderJson {
    #[serde(rename = "proposerIndex")]
    proposer_index: u64,
    #[serde(rename = "proposerNodeID")]
    proposer_node_id: u64,
    #[serde(rename = "blockID")]
    block_id: u64,
    #[serde(rename = "schainID")]
    schain_id: u64,
    #[serde(rename = "timeStamp")]
    time_stamp: u64,
    #[serde(rename = "timeStampMs")]
    time_stamp_ms: u32,
    hash: String,
    sizes: Vec<u64>,
}

/// A block proposal that won block consensus, together with the threshold
/// signature over the decision. The append-only block store holds exactly one
/// of these per block id.
#[derive(Clone, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct CommittedBlock {
    pub chain_id: ChainId,
    pub block_id: BlockId,
    pub proposer_index: SchainIndex,
    pub proposer_node_id: NodeId,
    pub timestamp: BlockTimestamp,
    pub transactions: TransactionList,
    pub hash: BlockHash,
    pub signature: ThresholdSignature,
}

impl CommittedBlock {
    pub fn from_proposal(proposal: &BlockProposal, signature: ThresholdSignature) -> Self {
        Self {
            chain_id: proposal.chain_id,
            block_id: proposal.block_id,
            proposer_index: proposal.proposer_index,
            proposer_node_id: proposal.proposer_node_id,
            timestamp: proposal.timestamp,
            transactions: proposal.transactions.clone(),
            hash: proposal.hash,
            signature,
        }
    }

    /// The canonical wire form (header size, JSON header, payloads). The
    /// threshold signature is not included.
    pub fn serialize(&self) -> Vec<u8> {
        let header = BlockHeaderJson {
            proposer_index: self.proposer_index.int(),
            proposer_node_id: self.proposer_node_id.int(),
            block_id: self.block_id.int(),
            schain_id: self.chain_id.int(),
            time_stamp: self.timestamp.sec,
            time_stamp_ms: self.timestamp.ms,
            hash: self.hash.to_hex(),
            sizes: self.transactions.payload_sizes(),
        };
        // Serializing a plain struct to a string cannot fail.
        let header = serde_json::to_string(&header).expect("block header serialization");
        debug_assert!(header.starts_with('{') && header.ends_with('}'));

        let mut out =
            Vec::with_capacity(8 + header.len() + self.transactions.total_payload_size());
        out.extend_from_slice(&(header.len() as u64).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        self.transactions.serialize_payloads_into(&mut out);
        out
    }

    /// Parse the canonical wire form, verifying structure and the block hash,
    /// and attach the out-of-band threshold signature.
    pub fn deserialize(
        bytes: &[u8],
        signature: ThresholdSignature,
    ) -> Result<CommittedBlock, ParseError> {
        if bytes.len() < 8 + 2 {
            return Err(ParseError::new(format!(
                "serialized block too small: {} bytes",
                bytes.len()
            )));
        }

        let mut size_bytes = [0u8; 8];
        size_bytes.copy_from_slice(&bytes[..8]);
        let header_size = u64::from_le_bytes(size_bytes);

        if header_size < 2 || header_size + 8 > bytes.len() as u64 {
            return Err(ParseError::new(format!("invalid header size {}", header_size)));
        }
        if header_size > MAX_HEADER_SIZE {
            return Err(ParseError::new("header size too large"));
        }
        let header_size = header_size as usize;

        let header_bytes = &bytes[8..8 + header_size];
        if header_bytes[0] != b'{' {
            return Err(ParseError::new("block header does not start with {"));
        }
        if header_bytes[header_size - 1] != b'}' {
            return Err(ParseError::new("block header does not end with }"));
        }

        let header: BlockHeaderJson = serde_json::from_slice(header_bytes)
            .map_err(|err| ParseError::with_cause("could not parse block header", err))?;

        let declared_hash = BlockHash::from_hex(&header.hash)?;
        let transactions =
            TransactionList::deserialize_payloads(&header.sizes, bytes, 8 + header_size)?;

        let chain_id = ChainId::new(header.schain_id);
        let block_id = BlockId::new(header.block_id);
        let proposer_index = SchainIndex::new(header.proposer_index);
        let proposer_node_id = NodeId::new(header.proposer_node_id);
        let timestamp = BlockTimestamp::new(header.time_stamp, header.time_stamp_ms);

        let computed_hash = compute_block_hash(
            chain_id,
            block_id,
            proposer_index,
            proposer_node_id,
            timestamp,
            &transactions,
        );
        if computed_hash != declared_hash {
            return Err(ParseError::new("block hash mismatch"));
        }

        Ok(CommittedBlock {
            chain_id,
            block_id,
            proposer_index,
            proposer_node_id,
            timestamp,
            transactions,
            hash: declared_hash,
            signature,
        })
    }
}

/// A contiguous run of committed blocks, as delivered through catch-up.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CommittedBlockList(Vec<CommittedBlock>);

impl CommittedBlockList {
    pub fn new(blocks: Vec<CommittedBlock>) -> Self {
        Self(blocks)
    }

    pub fn blocks(&self) -> &[CommittedBlock] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// An 8-byte count, then per block: the canonical bytes and the threshold
    /// signature, each with an 8-byte little-endian length prefix.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.0.len() as u64).to_le_bytes());
        for block in &self.0 {
            let block_bytes = block.serialize();
            let sig_bytes = block.signature.bytes();
            out.extend_from_slice(&(block_bytes.len() as u64).to_le_bytes());
            out.extend_from_slice(&block_bytes);
            out.extend_from_slice(&(sig_bytes.len() as u64).to_le_bytes());
            out.extend_from_slice(sig_bytes);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<CommittedBlockList, ParseError> {
        let read_u64 = |cursor: usize| -> Result<(u64, usize), ParseError> {
            if cursor + 8 > bytes.len() {
                return Err(ParseError::new("committed block list truncated"));
            }
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[cursor..cursor + 8]);
            Ok((u64::from_le_bytes(word), cursor + 8))
        };

        let (count, mut cursor) = read_u64(0)?;
        let mut blocks = Vec::new();
        for _ in 0..count {
            let (block_len, next) = read_u64(cursor)?;
            cursor = next;
            let block_end = cursor
                .checked_add(block_len as usize)
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| ParseError::new("committed block list truncated"))?;
            let block_bytes = &bytes[cursor..block_end];
            cursor = block_end;

            let (sig_len, next) = read_u64(cursor)?;
            cursor = next;
            let sig_end = cursor
                .checked_add(sig_len as usize)
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| ParseError::new("committed block list truncated"))?;
            let signature = ThresholdSignature::new(bytes[cursor..sig_end].to_vec());
            cursor = sig_end;

            blocks.push(CommittedBlock::deserialize(block_bytes, signature)?);
        }
        if cursor != bytes.len() {
            return Err(ParseError::new("trailing bytes after committed block list"));
        }
        Ok(CommittedBlockList::new(blocks))
    }
}
