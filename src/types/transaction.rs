/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Opaque application transactions and ordered transaction lists.
//!
//! The engine never inspects transaction contents. A transaction is a byte
//! string identified by its partial hash (the first 8 bytes of SHA-256 over
//! the payload), which the pending-transaction agent uses to filter
//! duplicates out of new proposals.
//!
//! The standalone serialization written here (length prefix, payload,
//! partial-hash checksum) is used wherever a transaction travels or is stored
//! on its own. Inside a serialized block, payloads are concatenated raw and
//! their lengths are declared by the block header instead.

use std::fmt::{self, Debug, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use crate::errors::ParseError;

/// Number of leading SHA-256 bytes used to identify a transaction.
pub const PARTIAL_HASH_LEN: usize = 8;

/// The first [`PARTIAL_HASH_LEN`] bytes of SHA-256 over a transaction payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct PartialHash([u8; PARTIAL_HASH_LEN]);

impl PartialHash {
    pub const fn bytes(&self) -> [u8; PARTIAL_HASH_LEN] {
        self.0
    }
}

impl Debug for PartialHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// An opaque application transaction.
#[derive(Clone, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Transaction(Vec<u8>);

impl Transaction {
    pub fn new(payload: Vec<u8>) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn partial_hash(&self) -> PartialHash {
        let digest = Sha256::digest(&self.0);
        let mut bytes = [0u8; PARTIAL_HASH_LEN];
        bytes.copy_from_slice(&digest[..PARTIAL_HASH_LEN]);
        PartialHash(bytes)
    }

    /// Number of bytes [`serialize_into`](Self::serialize_into) appends.
    pub fn serialized_size(&self) -> usize {
        8 + self.0.len() + PARTIAL_HASH_LEN
    }

    /// Append the standalone serialization: 8-byte little-endian payload
    /// length, the payload, and the partial-hash checksum.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.0.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.0);
        out.extend_from_slice(&self.partial_hash().bytes());
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        self.serialize_into(&mut out);
        out
    }

    /// Read one standalone-serialized transaction starting at `offset`.
    /// Returns the transaction and the offset one past its checksum.
    pub fn deserialize_from(bytes: &[u8], offset: usize) -> Result<(Transaction, usize), ParseError> {
        let remaining = bytes.len().saturating_sub(offset);
        if remaining < 8 {
            return Err(ParseError::new("transaction length prefix truncated"));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[offset..offset + 8]);
        let payload_len = u64::from_le_bytes(len_bytes) as usize;

        let payload_start = offset + 8;
        let checksum_start = payload_start
            .checked_add(payload_len)
            .ok_or_else(|| ParseError::new("transaction length overflows"))?;
        let end = checksum_start + PARTIAL_HASH_LEN;
        if end > bytes.len() {
            return Err(ParseError::new(format!(
                "transaction payload of {} bytes exceeds buffer",
                payload_len
            )));
        }

        let transaction = Transaction::new(bytes[payload_start..checksum_start].to_vec());
        if bytes[checksum_start..end] != transaction.partial_hash().bytes() {
            return Err(ParseError::new("transaction checksum mismatch"));
        }
        Ok((transaction, end))
    }

    /// Deserialize a buffer holding exactly one transaction.
    pub fn deserialize(bytes: &[u8]) -> Result<Transaction, ParseError> {
        let (transaction, end) = Self::deserialize_from(bytes, 0)?;
        if end != bytes.len() {
            return Err(ParseError::new("trailing bytes after transaction"));
        }
        Ok(transaction)
    }
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Transaction({} bytes, {:?})", self.0.len(), self.partial_hash())
    }
}

/// An ordered sequence of transactions.
#[derive(Clone, PartialEq, Eq, Debug, Default, BorshDeserialize, BorshSerialize)]
pub struct TransactionList(Vec<Transaction>);

impl TransactionList {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self(transactions)
    }

    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.0.iter()
    }

    /// Payload lengths in order, as declared by a block header.
    pub fn payload_sizes(&self) -> Vec<u64> {
        self.0.iter().map(|tx| tx.len() as u64).collect()
    }

    /// Total payload bytes a block body needs for this list.
    pub fn total_payload_size(&self) -> usize {
        self.0.iter().map(Transaction::len).sum()
    }

    /// Append raw concatenated payloads (the block-body form).
    pub fn serialize_payloads_into(&self, out: &mut Vec<u8>) {
        for tx in &self.0 {
            out.extend_from_slice(tx.payload());
        }
    }

    /// Rebuild a list from a block body given the header-declared sizes.
    pub fn deserialize_payloads(
        sizes: &[u64],
        bytes: &[u8],
        offset: usize,
    ) -> Result<TransactionList, ParseError> {
        let mut cursor = offset;
        let mut transactions = Vec::with_capacity(sizes.len());
        for size in sizes {
            let size = *size as usize;
            let end = cursor
                .checked_add(size)
                .ok_or_else(|| ParseError::new("transaction size overflows"))?;
            if end > bytes.len() {
                return Err(ParseError::new("declared transaction sizes exceed buffer"));
            }
            transactions.push(Transaction::new(bytes[cursor..end].to_vec()));
            cursor = end;
        }
        if cursor != bytes.len() {
            return Err(ParseError::new("trailing bytes after transaction payloads"));
        }
        Ok(TransactionList::new(transactions))
    }

    /// Standalone serialization: an 8-byte little-endian count followed by
    /// each transaction's standalone form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            8 + self.0.iter().map(Transaction::serialized_size).sum::<usize>(),
        );
        out.extend_from_slice(&(self.0.len() as u64).to_le_bytes());
        for tx in &self.0 {
            tx.serialize_into(&mut out);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<TransactionList, ParseError> {
        if bytes.len() < 8 {
            return Err(ParseError::new("transaction list count truncated"));
        }
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[..8]);
        let count = u64::from_le_bytes(count_bytes);

        let mut cursor = 8;
        let mut transactions = Vec::new();
        for _ in 0..count {
            let (tx, next) = Transaction::deserialize_from(bytes, cursor)?;
            transactions.push(tx);
            cursor = next;
        }
        if cursor != bytes.len() {
            return Err(ParseError::new("trailing bytes after transaction list"));
        }
        Ok(TransactionList::new(transactions))
    }
}
