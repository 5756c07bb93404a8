/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Inert identifier types shared across the engine.
//!
//! These follow the newtype pattern: they are sent around, compared, and
//! persisted, but have no active behavior of their own. Methods that the rest
//! of the crate needs (arithmetic on block ids, the empty-block timestamp
//! successor rule) are defined here.

use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{Add, AddAssign};
use std::time::{SystemTime, UNIX_EPOCH};

use borsh::{BorshDeserialize, BorshSerialize};

/// Id of the subchain. Every message and block carries it; a mismatch is an
/// authentication failure, not a parse failure.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct ChainId(u64);

impl ChainId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Globally unique id of a node, assigned at chain creation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Height of a block in the chain. Block ids are monotonic from 1; id 0 means
/// "nothing committed yet".
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockId(u64);

impl BlockId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// The id of the block that extends this one.
    pub const fn next(&self) -> BlockId {
        BlockId(self.0 + 1)
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockId {
    type Output = BlockId;

    fn add(self, rhs: u64) -> Self::Output {
        BlockId(self.0 + rhs)
    }
}

impl AddAssign<u64> for BlockId {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs
    }
}

/// Position of a node within the subchain's fixed membership. Valid positions
/// run 1..=N; position 0 is reserved for the deterministic empty block that is
/// committed when no proposer wins.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct SchainIndex(u64);

impl SchainIndex {
    pub const EMPTY_BLOCK_PROPOSER: SchainIndex = SchainIndex(0);

    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub const fn is_empty_block_proposer(&self) -> bool {
        self.0 == 0
    }
}

impl Display for SchainIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for SchainIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Per-node monotonic message counter, used to tell retransmissions apart in
/// the logs. Carries no protocol meaning.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct MsgId(u64);

impl MsgId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for MsgId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Round number of one binary-agreement instance.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Round(u64);

impl Round {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn init() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> Round {
        Round(self.0 + 1)
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A binary-agreement value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub enum Bit {
    Zero,
    One,
}

impl Bit {
    pub fn from_bool(b: bool) -> Bit {
        if b {
            Bit::One
        } else {
            Bit::Zero
        }
    }

    pub const fn is_one(&self) -> bool {
        matches!(self, Bit::One)
    }

    pub const fn to_u8(&self) -> u8 {
        match self {
            Bit::Zero => 0,
            Bit::One => 1,
        }
    }

    pub const fn from_u8(byte: u8) -> Option<Bit> {
        match byte {
            0 => Some(Bit::Zero),
            1 => Some(Bit::One),
            _ => None,
        }
    }
}

impl Display for Bit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.to_u8(), f)
    }
}

/// Identifies one binary-agreement instance: the block being decided and the
/// proposer whose availability the instance agrees on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct ProtocolKey {
    pub block_id: BlockId,
    pub proposer_index: SchainIndex,
}

impl ProtocolKey {
    pub const fn new(block_id: BlockId, proposer_index: SchainIndex) -> Self {
        Self {
            block_id,
            proposer_index,
        }
    }
}

impl Display for ProtocolKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_id, self.proposer_index)
    }
}

/// A block timestamp with millisecond precision, ordered lexicographically by
/// (seconds, milliseconds). Committed timestamps are strictly increasing.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, BorshDeserialize, BorshSerialize,
)]
pub struct BlockTimestamp {
    pub sec: u64,
    pub ms: u32,
}

impl BlockTimestamp {
    pub const fn new(sec: u64, ms: u32) -> Self {
        Self { sec, ms }
    }

    /// Current wall-clock time.
    pub fn now() -> BlockTimestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        BlockTimestamp {
            sec: since_epoch.as_secs(),
            ms: since_epoch.subsec_millis(),
        }
    }

    /// The timestamp of an empty block extending a block with this timestamp:
    /// one millisecond later, carrying into the seconds field at 1000 ms.
    pub const fn next_for_empty_block(&self) -> BlockTimestamp {
        if self.ms >= 999 {
            BlockTimestamp {
                sec: self.sec + 1,
                ms: 0,
            }
        } else {
            BlockTimestamp {
                sec: self.sec,
                ms: self.ms + 1,
            }
        }
    }
}

impl Display for BlockTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.sec, self.ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_timestamp_increments_by_one_ms() {
        let ts = BlockTimestamp::new(1577836800, 250);
        assert_eq!(
            ts.next_for_empty_block(),
            BlockTimestamp::new(1577836800, 251)
        );
    }

    #[test]
    fn empty_block_timestamp_carries_at_999_ms() {
        let ts = BlockTimestamp::new(1577836800, 999);
        assert_eq!(ts.next_for_empty_block(), BlockTimestamp::new(1577836801, 0));
    }

    #[test]
    fn timestamps_order_lexicographically() {
        assert!(BlockTimestamp::new(10, 999) < BlockTimestamp::new(11, 0));
        assert!(BlockTimestamp::new(10, 1) < BlockTimestamp::new(10, 2));
    }
}
