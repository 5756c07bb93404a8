/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The threshold-signature seam.
//!
//! The engine treats threshold cryptography as a capability: signing a share,
//! verifying a peer's share, aggregating a quorum of shares into a group
//! signature, and verifying a group signature under the chain's group key.
//! Production deployments plug in a BLS implementation; the integration tests
//! use a deterministic simulated scheme. Everything the engine itself fixes
//! lives here: the byte bounds, the canonical signing payloads, and the
//! common-coin extraction.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use crate::types::basic::{Bit, BlockId, ChainId, Round, SchainIndex};
use crate::types::block::BlockHash;

/// Upper bound on a signature share or group signature on the wire. Frames
/// reserve exactly this many bytes, null-padded.
pub const BLS_MAX_SIG_LEN: usize = 128;

/// Raw share bytes, bounded by [`BLS_MAX_SIG_LEN`].
#[derive(Clone, PartialEq, Eq, Debug, Default, BorshDeserialize, BorshSerialize)]
pub struct SigShareBytes(Vec<u8>);

impl SigShareBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        debug_assert!(bytes.len() <= BLS_MAX_SIG_LEN);
        Self(bytes)
    }

    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One validator's threshold share over some payload.
#[derive(Clone, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct SigShare {
    pub signer: SchainIndex,
    pub share: SigShareBytes,
}

impl SigShare {
    pub fn new(signer: SchainIndex, share: SigShareBytes) -> Self {
        Self { signer, share }
    }
}

/// An aggregated group signature that verifies under the chain's group key.
#[derive(Clone, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct ThresholdSignature(Vec<u8>);

impl ThresholdSignature {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug)]
pub struct CryptoError(String);

impl CryptoError {
    pub fn new(what: impl Into<String>) -> Self {
        Self(what.into())
    }
}

impl Display for CryptoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "crypto error: {}", self.0)
    }
}

impl Error for CryptoError {}

/// Threshold-signature primitives supplied by the embedding process. All
/// methods must be safe to call from multiple threads.
pub trait ThresholdSigner: Send + Sync + 'static {
    /// This node's share over `payload`.
    fn sign_share(&self, payload: &[u8]) -> SigShare;

    /// Whether `share` is a correct share over `payload` from its claimed
    /// signer.
    fn verify_share(&self, payload: &[u8], share: &SigShare) -> bool;

    /// Combine at least a quorum of distinct, verified shares into a group
    /// signature.
    fn aggregate(
        &self,
        payload: &[u8],
        shares: &[SigShare],
    ) -> Result<ThresholdSignature, CryptoError>;

    /// Whether `signature` verifies over `payload` under the group key.
    fn verify_signature(&self, payload: &[u8], signature: &ThresholdSignature) -> bool;
}

/// Shared handle to the signer capability.
pub type SignerHandle = Arc<dyn ThresholdSigner>;

fn payload(tag: u8, fields: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8 * fields.len());
    out.push(tag);
    for field in fields {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out
}

/// Payload of a data-availability share: attests possession of the proposal
/// with the given hash.
pub fn da_proof_payload(
    block_id: BlockId,
    proposer_index: SchainIndex,
    hash: &BlockHash,
) -> Vec<u8> {
    let mut out = payload(b'D', &[block_id.int(), proposer_index.int()]);
    out.extend_from_slice(&hash.bytes());
    out
}

/// Payload of a proposer's signature over its own proposal.
pub fn proposal_payload(hash: &BlockHash) -> Vec<u8> {
    let mut out = vec![b'P'];
    out.extend_from_slice(&hash.bytes());
    out
}

/// Payload of the block-consensus decision signature.
pub fn block_sig_payload(
    chain_id: ChainId,
    block_id: BlockId,
    winner_index: SchainIndex,
) -> Vec<u8> {
    payload(b'B', &[chain_id.int(), block_id.int(), winner_index.int()])
}

/// Payload of the common coin for one binary-agreement round.
pub fn coin_payload(
    chain_id: ChainId,
    block_id: BlockId,
    proposer_index: SchainIndex,
    round: Round,
) -> Vec<u8> {
    payload(
        b'C',
        &[
            chain_id.int(),
            block_id.int(),
            proposer_index.int(),
            round.int(),
        ],
    )
}

/// Extract a coin bit from a reconstructed group signature: the low-order bit
/// of SHA-256 over its bytes.
pub fn coin_bit(signature: &ThresholdSignature) -> Bit {
    let digest = Sha256::digest(signature.bytes());
    Bit::from_bool(digest[31] & 1 == 1)
}
