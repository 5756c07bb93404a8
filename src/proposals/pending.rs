/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Building this node's block proposals from the host's pending pool.
//!
//! The agent remembers the partial hashes of transactions in recently
//! committed blocks (a sliding window) so a transaction the chain already
//! ordered is not proposed again, and enforces the timestamp rule: a
//! proposal's timestamp is the wall clock, but never at or below the
//! predecessor's (the empty-successor rule with millisecond carry).
//!
//! With an empty pool the agent waits up to the empty-block interval for
//! transactions to show up before it settles for an empty proposal. This is
//! what paces an idle chain at one (empty) block per interval, and what lets
//! a proposer that does have transactions spread its proposal well before
//! the empty ones exist.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use crate::crypto::{proposal_payload, SignerHandle};
use crate::exit::ExitFlag;
use crate::host::HostExecutor;
use crate::types::basic::{BlockId, BlockTimestamp, ChainId, NodeId, SchainIndex};
use crate::types::block::{BlockProposal, CommittedBlock};
use crate::types::transaction::{PartialHash, Transaction, TransactionList};

const POOL_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct PendingTransactionsAgent {
    chain_id: ChainId,
    own_index: SchainIndex,
    own_node_id: NodeId,
    tx_limit: usize,
    window_blocks: u64,
    empty_block_interval_ms: u64,
    known: HashMap<PartialHash, BlockId>,
}

impl PendingTransactionsAgent {
    pub fn new(
        chain_id: ChainId,
        own_index: SchainIndex,
        own_node_id: NodeId,
        tx_limit: usize,
        window_blocks: u64,
        empty_block_interval_ms: u64,
    ) -> Self {
        Self {
            chain_id,
            own_index,
            own_node_id,
            tx_limit,
            window_blocks,
            empty_block_interval_ms,
            known: HashMap::new(),
        }
    }

    pub fn known_transactions(&self) -> usize {
        self.known.len()
    }

    fn pull_fresh<H: HostExecutor>(&self, host: &mut H) -> Vec<Transaction> {
        host.pull_pending_transactions(self.tx_limit)
            .into_iter()
            .filter(|tx| !self.known.contains_key(&tx.partial_hash()))
            .collect()
    }

    /// Build and sign this node's proposal for `block_id`.
    pub fn build_proposal<H: HostExecutor>(
        &mut self,
        block_id: BlockId,
        prev_timestamp: BlockTimestamp,
        host: &mut H,
        signer: &SignerHandle,
        exit: &ExitFlag,
    ) -> BlockProposal {
        let mut fresh = self.pull_fresh(host);

        let deadline = Instant::now() + Duration::from_millis(self.empty_block_interval_ms);
        while fresh.is_empty() && Instant::now() < deadline && !exit.is_set() {
            thread::sleep(POOL_POLL_INTERVAL);
            fresh = self.pull_fresh(host);
        }

        let timestamp = std::cmp::max(BlockTimestamp::now(), prev_timestamp.next_for_empty_block());

        let mut proposal = BlockProposal::new(
            self.chain_id,
            block_id,
            self.own_index,
            self.own_node_id,
            timestamp,
            TransactionList::new(fresh),
            crate::crypto::SigShareBytes::empty(),
        );
        proposal.signature = signer.sign_share(&proposal_payload(&proposal.hash)).share;
        proposal
    }

    /// Remember a committed block's transactions and slide the window.
    pub fn on_block_committed(&mut self, block: &CommittedBlock) {
        for tx in block.transactions.iter() {
            self.known.insert(tx.partial_hash(), block.block_id);
        }
        let committed = block.block_id;
        let window = self.window_blocks;
        self.known
            .retain(|_, seen_at| seen_at.int() + window >= committed.int());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::crypto::{CryptoError, SigShare, SigShareBytes, ThresholdSignature, ThresholdSigner};

    use super::*;

    struct NullSigner;

    impl ThresholdSigner for NullSigner {
        fn sign_share(&self, _payload: &[u8]) -> SigShare {
            SigShare::new(SchainIndex::new(1), SigShareBytes::new(vec![1]))
        }

        fn verify_share(&self, _payload: &[u8], _share: &SigShare) -> bool {
            true
        }

        fn aggregate(
            &self,
            _payload: &[u8],
            _shares: &[SigShare],
        ) -> Result<ThresholdSignature, CryptoError> {
            Ok(ThresholdSignature::new(vec![1]))
        }

        fn verify_signature(&self, _payload: &[u8], _signature: &ThresholdSignature) -> bool {
            true
        }
    }

    struct PoolHost {
        pool: Vec<Transaction>,
    }

    impl HostExecutor for PoolHost {
        fn pull_pending_transactions(&mut self, max: usize) -> Vec<Transaction> {
            let take = std::cmp::min(max, self.pool.len());
            self.pool.drain(..take).collect()
        }

        fn create_block(
            &mut self,
            _transactions: &TransactionList,
            _timestamp: BlockTimestamp,
            _block_id: BlockId,
            _gas_price: u64,
            _state_root: [u8; 32],
        ) {
        }
    }

    fn agent() -> PendingTransactionsAgent {
        PendingTransactionsAgent::new(
            ChainId::new(1),
            SchainIndex::new(1),
            NodeId::new(1),
            100,
            4,
            0,
        )
    }

    #[test]
    fn committed_transactions_are_not_reproposed() {
        let signer: SignerHandle = Arc::new(NullSigner);
        let exit = ExitFlag::new();
        let mut agent = agent();
        let tx = Transaction::new(vec![1, 2, 3]);
        let mut host = PoolHost {
            pool: vec![tx.clone(), Transaction::new(vec![4, 5])],
        };

        let first = agent.build_proposal(
            BlockId::new(1),
            BlockTimestamp::new(10, 0),
            &mut host,
            &signer,
            &exit,
        );
        assert_eq!(first.transactions.len(), 2);

        agent.on_block_committed(&CommittedBlock::from_proposal(
            &first,
            ThresholdSignature::new(vec![1]),
        ));

        host.pool = vec![tx, Transaction::new(vec![6])];
        let second = agent.build_proposal(
            BlockId::new(2),
            first.timestamp,
            &mut host,
            &signer,
            &exit,
        );
        assert_eq!(second.transactions.len(), 1);
        assert_eq!(second.transactions.transactions()[0].payload(), &[6]);
    }

    #[test]
    fn timestamps_strictly_increase() {
        let signer: SignerHandle = Arc::new(NullSigner);
        let exit = ExitFlag::new();
        let mut agent = agent();
        let mut host = PoolHost { pool: Vec::new() };

        // A predecessor timestamp far in the future forces the +1 ms rule.
        let future = BlockTimestamp::new(u32::MAX as u64 + 10, 999);
        let proposal = agent.build_proposal(BlockId::new(1), future, &mut host, &signer, &exit);
        assert_eq!(proposal.timestamp, BlockTimestamp::new(u32::MAX as u64 + 11, 0));
    }

    #[test]
    fn empty_pool_waits_for_the_interval() {
        let signer: SignerHandle = Arc::new(NullSigner);
        let exit = ExitFlag::new();
        let mut agent = PendingTransactionsAgent::new(
            ChainId::new(1),
            SchainIndex::new(1),
            NodeId::new(1),
            100,
            4,
            60,
        );
        let mut host = PoolHost { pool: Vec::new() };

        let begin = Instant::now();
        let proposal =
            agent.build_proposal(BlockId::new(1), BlockTimestamp::new(10, 0), &mut host, &signer, &exit);
        assert!(proposal.transactions.is_empty());
        assert!(begin.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn known_window_slides() {
        let signer: SignerHandle = Arc::new(NullSigner);
        let exit = ExitFlag::new();
        let mut agent = agent();
        let mut host = PoolHost {
            pool: vec![Transaction::new(vec![9])],
        };

        let proposal = agent.build_proposal(
            BlockId::new(1),
            BlockTimestamp::new(10, 0),
            &mut host,
            &signer,
            &exit,
        );
        agent.on_block_committed(&CommittedBlock::from_proposal(
            &proposal,
            ThresholdSignature::new(vec![1]),
        ));
        assert_eq!(agent.known_transactions(), 1);

        // Committing an empty block far past the window evicts the entry.
        let late = BlockProposal::empty_block(
            ChainId::new(1),
            BlockId::new(10),
            BlockTimestamp::new(20, 0),
        );
        agent.on_block_committed(&CommittedBlock::from_proposal(
            &late,
            ThresholdSignature::new(vec![1]),
        ));
        assert_eq!(agent.known_transactions(), 0);
    }
}
