/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The startup health check.
//!
//! Before consensus threads start, the node probes its peers. With every peer
//! reachable it proceeds at once; with at least 2/3 of the subchain reachable
//! it waits a short grace period for stragglers and proceeds; otherwise it
//! keeps probing until the (configurable) hard deadline, then fails with exit
//! code 110. A marker file mirrors the state for orchestration tooling:
//! 1 starting, 2 ready, 0 failed.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Configuration;
use crate::errors::EngineError;
use crate::exit::ExitFlag;
use crate::networking::{ConsensusNetwork, Network};

/// The process exit status the embedding binary should use when the health
/// check fails.
pub const HEALTH_CHECK_EXIT_CODE: i32 = 110;

#[derive(Clone, Copy)]
enum HealthState {
    Starting = 1,
    Ready = 2,
    Failed = 0,
}

fn write_marker(path: Option<&Path>, state: HealthState) {
    if let Some(path) = path {
        if let Err(err) = fs::write(path, format!("{}", state as u8)) {
            log::warn!("HealthMarkerFailure, {}, {}", path.display(), err);
        }
    }
}

pub fn run_health_check<N: Network>(
    network: &ConsensusNetwork<N>,
    config: &Configuration,
    exit: &ExitFlag,
) -> Result<(), EngineError> {
    let marker = config.health_check_file.as_deref();
    write_marker(marker, HealthState::Starting);

    let node_count = network.registry().node_count();
    let own_index = network.own_index();
    let begin = Instant::now();
    log::info!("HealthCheckStart, {}, waiting to connect to peers", node_count);

    loop {
        exit.check()?;

        let reachable = network
            .registry()
            .indices()
            .filter(|index| *index != own_index)
            .filter(|index| network.probe_peer(*index))
            .count();

        if reachable + 1 >= node_count {
            break;
        }
        if 3 * (reachable + 1) >= 2 * node_count
            && begin.elapsed() > Duration::from_secs(config.health_connect_grace_secs)
        {
            break;
        }
        if begin.elapsed() > Duration::from_secs(config.health_fail_timeout_secs) {
            write_marker(marker, HealthState::Failed);
            log::error!("HealthCheckFailure, could not connect to 2/3 of peers");
            return Err(EngineError::Fatal(format!(
                "health check failed, exit code {}",
                HEALTH_CHECK_EXIT_CODE
            )));
        }

        thread::sleep(Duration::from_secs(1));
    }

    write_marker(marker, HealthState::Ready);
    Ok(())
}
