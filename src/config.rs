/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Engine configuration.
//!
//! The embedding binary hands the engine one JSON blob. Only
//! `emptyBlockIntervalMs` is required; every other knob has a default chosen
//! to match long-standing production behavior.

use std::path::PathBuf;

use serde::Deserialize;

use crate::errors::ParseError;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Target interval between empty blocks, in milliseconds. Doubles as the
    /// base of the per-block monitoring budget.
    pub empty_block_interval_ms: u64,

    /// Messages for block ids at or below this are dropped on receipt (the
    /// catch-up skip window).
    #[serde(default)]
    pub catchup_blocks: u64,

    /// Percentage (0..=100) of outgoing consensus sends to drop, for
    /// test-time fault injection.
    #[serde(default)]
    pub packet_loss: u32,

    /// Cap of each peer's delayed-send queue; the oldest entry is dropped
    /// when a new one would exceed it.
    #[serde(default = "defaults::max_delayed_sends")]
    pub max_delayed_sends: usize,

    /// Cadence of the deferred-message release loop and of delayed-send
    /// retries, in milliseconds.
    #[serde(default = "defaults::delayed_send_retry_ms")]
    pub delayed_send_retry_ms: u64,

    /// Most transactions pulled from the host's pending pool per proposal.
    #[serde(default = "defaults::proposal_tx_limit")]
    pub proposal_tx_limit: usize,

    /// How many recent committed blocks' transactions are remembered for
    /// duplicate filtering.
    #[serde(default = "defaults::known_tx_window_blocks")]
    pub known_tx_window_blocks: u64,

    /// Gas price reported to the host with each committed block.
    #[serde(default = "defaults::min_gas_price")]
    pub min_gas_price: u64,

    /// Once 2/3 of peers are reachable, the health check waits this long for
    /// stragglers before declaring the node ready.
    #[serde(default = "defaults::health_connect_grace_secs")]
    pub health_connect_grace_secs: u64,

    /// Hard deadline for reaching 2/3 of peers; past it the health check
    /// fails with exit code 110.
    #[serde(default = "defaults::health_fail_timeout_secs")]
    pub health_fail_timeout_secs: u64,

    /// Marker file reflecting health-check state (1 starting, 2 ready,
    /// 0 failed). `None` disables the marker.
    #[serde(default)]
    pub health_check_file: Option<PathBuf>,
}

mod defaults {
    pub fn max_delayed_sends() -> usize {
        256
    }

    pub fn delayed_send_retry_ms() -> u64 {
        100
    }

    pub fn proposal_tx_limit() -> usize {
        1024
    }

    pub fn known_tx_window_blocks() -> u64 {
        256
    }

    pub fn min_gas_price() -> u64 {
        1000
    }

    pub fn health_connect_grace_secs() -> u64 {
        5
    }

    pub fn health_fail_timeout_secs() -> u64 {
        15000
    }
}

impl Configuration {
    pub fn from_json(json: &str) -> Result<Configuration, ParseError> {
        let config: Configuration = serde_json::from_str(json)
            .map_err(|err| ParseError::with_cause("could not parse configuration", err))?;
        if config.packet_loss > 100 {
            return Err(ParseError::new("packetLoss must be between 0 and 100"));
        }
        Ok(config)
    }

    /// A configuration with every default, for embedding processes that do
    /// not carry a JSON blob.
    pub fn with_empty_block_interval(empty_block_interval_ms: u64) -> Configuration {
        Configuration {
            empty_block_interval_ms,
            catchup_blocks: 0,
            packet_loss: 0,
            max_delayed_sends: defaults::max_delayed_sends(),
            delayed_send_retry_ms: defaults::delayed_send_retry_ms(),
            proposal_tx_limit: defaults::proposal_tx_limit(),
            known_tx_window_blocks: defaults::known_tx_window_blocks(),
            min_gas_price: defaults::min_gas_price(),
            health_connect_grace_secs: defaults::health_connect_grace_secs(),
            health_fail_timeout_secs: defaults::health_fail_timeout_secs(),
            health_check_file: None,
        }
    }

    /// The per-block wall-clock budget used by monitoring to alarm. Consensus
    /// itself has no deadline.
    pub fn max_block_processing_ms(&self) -> u64 {
        std::cmp::max(2 * self.empty_block_interval_ms, 3000)
    }
}
