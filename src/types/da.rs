/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Data-availability proofs and per-block proposal vectors.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::crypto::ThresholdSignature;
use crate::types::basic::{BlockId, SchainIndex};
use crate::types::block::BlockHash;

/// A threshold signature over (block id, proposer index, proposal hash),
/// attesting that at least 2f+1 nodes hold the proposal.
#[derive(Clone, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct DaProof {
    pub block_id: BlockId,
    pub proposer_index: SchainIndex,
    pub block_hash: BlockHash,
    pub signature: ThresholdSignature,
}

/// Bit vector for one block: bit i is set iff a DA proof for proposer i has
/// been observed locally. Persisted before consensus starts so that a restart
/// resumes with the same input.
#[derive(Clone, PartialEq, Eq, Debug, BorshDeserialize, BorshSerialize)]
pub struct ProposalVector {
    bits: Vec<bool>,
}

impl ProposalVector {
    pub fn new(node_count: usize) -> Self {
        Self {
            bits: vec![false; node_count],
        }
    }

    pub fn node_count(&self) -> usize {
        self.bits.len()
    }

    /// Whether proposer `index` (1-based) has a DA proof.
    pub fn get(&self, index: SchainIndex) -> bool {
        let position = index.int() as usize;
        position >= 1 && position <= self.bits.len() && self.bits[position - 1]
    }

    /// Record a DA proof for proposer `index`. Out-of-range indices are
    /// ignored; membership is fixed at startup.
    pub fn set(&mut self, index: SchainIndex) {
        let position = index.int() as usize;
        if position >= 1 && position <= self.bits.len() {
            self.bits[position - 1] = true;
        }
    }

    pub fn count_ones(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }
}

impl Display for ProposalVector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for bit in &self.bits {
            f.write_str(if *bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}
