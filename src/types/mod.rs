/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Identifier newtypes, transactions, blocks, and data-availability types.

pub mod basic;

pub mod block;

pub mod da;

pub mod transaction;

pub use basic::{
    Bit, BlockId, BlockTimestamp, ChainId, MsgId, NodeId, ProtocolKey, Round, SchainIndex,
};
pub use block::{BlockHash, BlockProposal, CommittedBlock, CommittedBlockList};
pub use da::{DaProof, ProposalVector};
pub use transaction::{PartialHash, Transaction, TransactionList};
