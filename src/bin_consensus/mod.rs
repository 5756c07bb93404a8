/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Randomized binary Byzantine agreement, one instance per
//! (block, proposer) protocol key.

pub mod instance;

pub use instance::{BinConsensusInstance, BinConsensusOutput};
