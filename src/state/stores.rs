/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed accessors over the raw key-value store.
//!
//! Each group of methods is one logical store: committed blocks (with the
//! last-committed pointer maintained atomically alongside), block proposals,
//! proposal hashes (the double-proposing guard), proposal vectors, DA proofs,
//! and outgoing consensus frames kept for re-broadcast after a restart.
//!
//! A value that is present but cannot be decoded means the database is
//! corrupt, which is fatal.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::crypto::ThresholdSignature;
use crate::errors::EngineError;
use crate::types::basic::{BlockId, SchainIndex};
use crate::types::block::{BlockProposal, CommittedBlock};
use crate::types::da::{DaProof, ProposalVector};

use super::kv_store::{KVStore, WriteBatch};
use super::paths;

#[derive(Clone)]
pub struct ChainStore<K: KVStore> {
    kv: K,
}

impl<K: KVStore> ChainStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    fn put(&mut self, key: Vec<u8>, value: &[u8]) {
        let mut wb = K::WriteBatch::new();
        wb.set(&key, value);
        self.kv.write(wb);
    }

    fn get_decoded<T: BorshDeserialize>(
        &self,
        key: &[u8],
        what: &str,
    ) -> Result<Option<T>, EngineError> {
        match self.kv.get(key) {
            None => Ok(None),
            Some(bytes) => T::try_from_slice(&bytes)
                .map(Some)
                .map_err(|_| EngineError::Fatal(format!("corrupt {} in store", what))),
        }
    }

    /* ↓↓↓ Committed blocks ↓↓↓ */

    /// Persist a committed block and advance the last-committed pointer in
    /// one atomic batch.
    pub fn save_block(&mut self, block: &CommittedBlock) -> Result<(), EngineError> {
        let id = block.block_id.int();
        let mut wb = K::WriteBatch::new();
        wb.set(&paths::key1(&paths::BLOCK, id), &block.serialize());
        wb.set(
            &paths::key1(&paths::BLOCK_SIG, id),
            &block
                .signature
                .try_to_vec()
                .map_err(|_| EngineError::Fatal("block signature encoding".to_string()))?,
        );
        wb.set(&paths::LAST_COMMITTED, &id.to_be_bytes());
        self.kv.write(wb);
        Ok(())
    }

    pub fn block(&self, block_id: BlockId) -> Result<Option<CommittedBlock>, EngineError> {
        let bytes = match self.kv.get(&paths::key1(&paths::BLOCK, block_id.int())) {
            None => return Ok(None),
            Some(bytes) => bytes,
        };
        let signature: ThresholdSignature = self
            .get_decoded(&paths::key1(&paths::BLOCK_SIG, block_id.int()), "block signature")?
            .ok_or_else(|| {
                EngineError::Fatal(format!("block {} stored without signature", block_id))
            })?;
        CommittedBlock::deserialize(&bytes, signature)
            .map(Some)
            .map_err(|err| {
                EngineError::Fatal(format!("corrupt block {} in store: {}", block_id, err))
            })
    }

    pub fn read_last_committed_block_id(&self) -> Result<BlockId, EngineError> {
        match self.kv.get(&paths::LAST_COMMITTED) {
            None => Ok(BlockId::new(0)),
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| EngineError::Fatal("corrupt last-committed pointer".to_string()))?;
                Ok(BlockId::new(u64::from_be_bytes(bytes)))
            }
        }
    }

    /* ↓↓↓ Block proposals ↓↓↓ */

    pub fn save_proposal(&mut self, proposal: &BlockProposal) -> Result<(), EngineError> {
        let bytes = proposal
            .try_to_vec()
            .map_err(|_| EngineError::Fatal("proposal encoding".to_string()))?;
        self.put(
            paths::key2(
                &paths::PROPOSAL,
                proposal.block_id.int(),
                proposal.proposer_index.int(),
            ),
            &bytes,
        );
        Ok(())
    }

    pub fn proposal(
        &self,
        block_id: BlockId,
        proposer_index: SchainIndex,
    ) -> Result<Option<BlockProposal>, EngineError> {
        self.get_decoded(
            &paths::key2(&paths::PROPOSAL, block_id.int(), proposer_index.int()),
            "proposal",
        )
    }

    /* ↓↓↓ Proposal hashes ↓↓↓ */

    /// Record the hash of a proposal this node is about to announce. Returns
    /// false (without writing) if a hash for (block, proposer) is already
    /// recorded, which is what prevents proposing twice across a restart.
    pub fn check_and_save_hash(
        &mut self,
        block_id: BlockId,
        proposer_index: SchainIndex,
        hash_hex: &str,
    ) -> bool {
        let key = paths::key2(&paths::PROPOSAL_HASH, block_id.int(), proposer_index.int());
        if self.kv.get(&key).is_some() {
            return false;
        }
        self.put(key, hash_hex.as_bytes());
        true
    }

    pub fn have_proposal_hash(&self, block_id: BlockId, proposer_index: SchainIndex) -> bool {
        self.kv
            .get(&paths::key2(
                &paths::PROPOSAL_HASH,
                block_id.int(),
                proposer_index.int(),
            ))
            .is_some()
    }

    /* ↓↓↓ Proposal vectors ↓↓↓ */

    pub fn save_proposal_vector(
        &mut self,
        block_id: BlockId,
        vector: &ProposalVector,
    ) -> Result<(), EngineError> {
        let bytes = vector
            .try_to_vec()
            .map_err(|_| EngineError::Fatal("proposal vector encoding".to_string()))?;
        self.put(paths::key1(&paths::PROPOSAL_VECTOR, block_id.int()), &bytes);
        Ok(())
    }

    pub fn proposal_vector(&self, block_id: BlockId) -> Result<Option<ProposalVector>, EngineError> {
        self.get_decoded(
            &paths::key1(&paths::PROPOSAL_VECTOR, block_id.int()),
            "proposal vector",
        )
    }

    /* ↓↓↓ DA proofs ↓↓↓ */

    pub fn save_da_proof(&mut self, proof: &DaProof) -> Result<(), EngineError> {
        let bytes = proof
            .try_to_vec()
            .map_err(|_| EngineError::Fatal("DA proof encoding".to_string()))?;
        self.put(
            paths::key2(&paths::DA_PROOF, proof.block_id.int(), proof.proposer_index.int()),
            &bytes,
        );
        Ok(())
    }

    pub fn da_proof(
        &self,
        block_id: BlockId,
        proposer_index: SchainIndex,
    ) -> Result<Option<DaProof>, EngineError> {
        self.get_decoded(
            &paths::key2(&paths::DA_PROOF, block_id.int(), proposer_index.int()),
            "DA proof",
        )
    }

    pub fn have_da_proof(&self, block_id: BlockId, proposer_index: SchainIndex) -> bool {
        self.kv
            .get(&paths::key2(
                &paths::DA_PROOF,
                block_id.int(),
                proposer_index.int(),
            ))
            .is_some()
    }

    /* ↓↓↓ Outgoing consensus frames ↓↓↓ */

    /// Append an outgoing frame for `block_id`, so a restarted node can
    /// re-broadcast everything it had said about the block under decision.
    pub fn save_outgoing_message(
        &mut self,
        block_id: BlockId,
        frame: &[u8],
    ) -> Result<(), EngineError> {
        let key = paths::key1(&paths::OUTGOING_MSGS, block_id.int());
        let mut frames: Vec<Vec<u8>> = self.get_decoded(&key, "outgoing messages")?.unwrap_or_default();
        frames.push(frame.to_vec());
        let bytes = frames
            .try_to_vec()
            .map_err(|_| EngineError::Fatal("outgoing message encoding".to_string()))?;
        self.put(key, &bytes);
        Ok(())
    }

    pub fn outgoing_messages(&self, block_id: BlockId) -> Result<Vec<Vec<u8>>, EngineError> {
        Ok(self
            .get_decoded(&paths::key1(&paths::OUTGOING_MSGS, block_id.int()), "outgoing messages")?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use crate::crypto::SigShareBytes;
    use crate::state::kv_store::KVGet;
    use crate::types::basic::{BlockTimestamp, ChainId, NodeId};
    use crate::types::transaction::TransactionList;

    use super::*;

    #[derive(Clone, Default)]
    struct MemKv(Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>);

    impl KVGet for MemKv {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.0.lock().unwrap().get(key).cloned()
        }
    }

    impl KVStore for MemKv {
        type WriteBatch = MemWriteBatch;

        fn write(&mut self, wb: MemWriteBatch) {
            let mut map = self.0.lock().unwrap();
            for (key, value) in wb.0 {
                match value {
                    Some(value) => map.insert(key, value),
                    None => map.remove(&key),
                };
            }
        }
    }

    #[derive(Default)]
    struct MemWriteBatch(Vec<(Vec<u8>, Option<Vec<u8>>)>);

    impl WriteBatch for MemWriteBatch {
        fn new() -> Self {
            Self::default()
        }

        fn set(&mut self, key: &[u8], value: &[u8]) {
            self.0.push((key.to_vec(), Some(value.to_vec())));
        }

        fn delete(&mut self, key: &[u8]) {
            self.0.push((key.to_vec(), None));
        }
    }

    fn proposal(block_id: u64, proposer: u64) -> BlockProposal {
        BlockProposal::new(
            ChainId::new(1),
            BlockId::new(block_id),
            SchainIndex::new(proposer),
            NodeId::new(proposer),
            BlockTimestamp::new(1000, 0),
            TransactionList::empty(),
            SigShareBytes::empty(),
        )
    }

    #[test]
    fn blocks_round_trip_and_advance_the_head() {
        let mut store = ChainStore::new(MemKv::default());
        assert_eq!(store.read_last_committed_block_id().unwrap(), BlockId::new(0));

        let block =
            CommittedBlock::from_proposal(&proposal(1, 2), ThresholdSignature::new(vec![9; 16]));
        store.save_block(&block).unwrap();

        assert_eq!(store.read_last_committed_block_id().unwrap(), BlockId::new(1));
        assert_eq!(store.block(BlockId::new(1)).unwrap().unwrap(), block);
        assert!(store.block(BlockId::new(2)).unwrap().is_none());
    }

    #[test]
    fn hash_guard_rejects_second_save() {
        let mut store = ChainStore::new(MemKv::default());
        assert!(!store.have_proposal_hash(BlockId::new(5), SchainIndex::new(1)));
        assert!(store.check_and_save_hash(BlockId::new(5), SchainIndex::new(1), "abcd"));
        assert!(!store.check_and_save_hash(BlockId::new(5), SchainIndex::new(1), "ffff"));
        assert!(store.have_proposal_hash(BlockId::new(5), SchainIndex::new(1)));
    }

    #[test]
    fn outgoing_messages_accumulate_in_order() {
        let mut store = ChainStore::new(MemKv::default());
        store.save_outgoing_message(BlockId::new(3), b"one").unwrap();
        store.save_outgoing_message(BlockId::new(3), b"two").unwrap();
        assert_eq!(
            store.outgoing_messages(BlockId::new(3)).unwrap(),
            vec![b"one".to_vec(), b"two".to_vec()]
        );
        assert!(store.outgoing_messages(BlockId::new(4)).unwrap().is_empty());
    }
}
