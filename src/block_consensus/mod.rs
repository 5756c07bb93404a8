/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block consensus: N parallel binary agreements multiplexed into one block
//! decision plus a threshold block signature.

pub mod agent;

pub use agent::{BlockConsensusAgent, DriverAction, ProtocolContext};
