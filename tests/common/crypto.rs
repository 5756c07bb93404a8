/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A deterministic simulated threshold scheme.
//!
//! Every node of a test chain derives shares from the same group seed:
//! a share is a keyed hash over (signer, payload), and the "group signature"
//! is a keyed hash over the payload alone, so aggregation yields the same
//! bytes no matter which quorum subset contributed — exactly the property
//! the engine's common coin and block signatures rely on. This is a
//! simulation for tests, not cryptography.

use std::sync::Arc;

use schain_consensus::crypto::{
    CryptoError, SigShare, SigShareBytes, SignerHandle, ThresholdSignature, ThresholdSigner,
};
use schain_consensus::types::basic::SchainIndex;
use sha2::{Digest, Sha256};

pub struct SimThresholdScheme {
    group_seed: [u8; 32],
    own_index: SchainIndex,
    quorum: usize,
}

impl SimThresholdScheme {
    pub fn new(group_seed: [u8; 32], own_index: SchainIndex, quorum: usize) -> Self {
        Self {
            group_seed,
            own_index,
            quorum,
        }
    }

    fn share_bytes(&self, signer: SchainIndex, payload: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(b"share");
        hasher.update(self.group_seed);
        hasher.update(signer.int().to_le_bytes());
        hasher.update(payload);
        hasher.finalize().to_vec()
    }

    fn group_bytes(&self, payload: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(b"group");
        hasher.update(self.group_seed);
        hasher.update(payload);
        hasher.finalize().to_vec()
    }
}

impl ThresholdSigner for SimThresholdScheme {
    fn sign_share(&self, payload: &[u8]) -> SigShare {
        SigShare::new(
            self.own_index,
            SigShareBytes::new(self.share_bytes(self.own_index, payload)),
        )
    }

    fn verify_share(&self, payload: &[u8], share: &SigShare) -> bool {
        share.share.bytes() == self.share_bytes(share.signer, payload).as_slice()
    }

    fn aggregate(
        &self,
        payload: &[u8],
        shares: &[SigShare],
    ) -> Result<ThresholdSignature, CryptoError> {
        let mut signers: Vec<SchainIndex> = shares.iter().map(|share| share.signer).collect();
        signers.sort();
        signers.dedup();
        if signers.len() < self.quorum {
            return Err(CryptoError::new(format!(
                "{} distinct shares, need {}",
                signers.len(),
                self.quorum
            )));
        }
        if shares
            .iter()
            .any(|share| !self.verify_share(payload, share))
        {
            return Err(CryptoError::new("invalid share in aggregation set"));
        }
        Ok(ThresholdSignature::new(self.group_bytes(payload)))
    }

    fn verify_signature(&self, payload: &[u8], signature: &ThresholdSignature) -> bool {
        signature.bytes() == self.group_bytes(payload).as_slice()
    }
}

/// One signer handle per subchain position, all sharing the group seed.
pub fn sim_signers(group_seed: [u8; 32], node_count: usize, quorum: usize) -> Vec<SignerHandle> {
    (1..=node_count as u64)
        .map(|index| {
            Arc::new(SimThresholdScheme::new(
                group_seed,
                SchainIndex::new(index),
                quorum,
            )) as SignerHandle
        })
        .collect()
}
