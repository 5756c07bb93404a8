/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The data-availability share accumulator.
//!
//! Every node that stores a proposal sends its threshold share over
//! (block, proposer, hash) back to the proposer. The proposer accumulates
//! verified shares here; the 2f+1st share aggregates into the DA proof, and
//! the accumulator entry is erased. Duplicate shares are dropped, and shares
//! are grouped by the hash they attest so an equivocating proposer cannot mix
//! quorums across two different proposals.

use std::collections::HashMap;

use crate::crypto::{da_proof_payload, SigShare, SignerHandle};
use crate::types::basic::{BlockId, SchainIndex};
use crate::types::block::BlockHash;
use crate::types::da::DaProof;

pub struct DaProofAccumulator {
    quorum: usize,
    shares: HashMap<(BlockId, SchainIndex), HashMap<BlockHash, Vec<SigShare>>>,
}

impl DaProofAccumulator {
    pub fn new(quorum: usize) -> Self {
        Self {
            quorum,
            shares: HashMap::new(),
        }
    }

    /// Add one verified share; returns the DA proof when the quorum is
    /// complete. Invalid and duplicate shares return None.
    pub fn add_share(
        &mut self,
        block_id: BlockId,
        proposer_index: SchainIndex,
        block_hash: BlockHash,
        share: SigShare,
        signer: &SignerHandle,
    ) -> Option<DaProof> {
        let payload = da_proof_payload(block_id, proposer_index, &block_hash);
        if !signer.verify_share(&payload, &share) {
            log::debug!(
                "DropDaShare, {}, {}, bad share from {}",
                block_id,
                proposer_index,
                share.signer
            );
            return None;
        }

        let by_hash = self.shares.entry((block_id, proposer_index)).or_default();
        let shares = by_hash.entry(block_hash).or_default();
        if shares.iter().any(|existing| existing.signer == share.signer) {
            return None;
        }
        shares.push(share);
        if shares.len() < self.quorum {
            return None;
        }

        let signature = match signer.aggregate(&payload, shares.as_slice()) {
            Ok(signature) => signature,
            Err(err) => {
                log::warn!("DaAggregateFailure, {}, {}, {}", block_id, proposer_index, err);
                return None;
            }
        };
        debug_assert!(signer.verify_signature(&payload, &signature));
        self.shares.remove(&(block_id, proposer_index));

        Some(DaProof {
            block_id,
            proposer_index,
            block_hash,
            signature,
        })
    }

    /// Drop accumulator entries for blocks at or below the committed head.
    pub fn prune_through(&mut self, block_id: BlockId) {
        self.shares.retain(|(id, _), _| *id > block_id);
    }
}
