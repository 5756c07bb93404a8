/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! End-to-end consensus on an in-process cluster of four nodes (f = 1):
//! ordinary progress with transactions, progress with a silent node, and
//! progress despite an injected Byzantine auxiliary broadcast. The nodes use
//! the channel transport, the in-memory store, and the simulated threshold
//! scheme from [`common`]; nothing touches the file system or real sockets.

mod common;

use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use log::LevelFilter;
use schain_consensus::crypto::{coin_payload, ThresholdSigner};
use schain_consensus::messages::{ConsensusMessage, ConsensusMsgType};
use schain_consensus::networking::wire;
use schain_consensus::types::basic::{Bit, BlockId, MsgId, NodeId, Round, SchainIndex};
use schain_consensus::types::transaction::Transaction;

use common::cluster::{TestCluster, TEST_CHAIN_ID};
use common::logging::setup_logger;

const COMMIT_TIMEOUT: Duration = Duration::from_secs(60);

fn wait_for_delivery(cluster: &TestCluster, position: usize, count: usize) {
    let deadline = Instant::now() + COMMIT_TIMEOUT;
    while cluster.hosts[position].delivered_count() < count {
        assert!(
            Instant::now() < deadline,
            "host {} received only {} of {} blocks",
            position,
            cluster.hosts[position].delivered_count(),
            count
        );
        thread::sleep(Duration::from_millis(20));
    }
}

/// Three transactions submitted to node 1 commit as block 1, proposed by
/// node 1, in submission order, on every node, with one host delivery each.
#[test]
fn transactions_commit_in_submission_order() {
    setup_logger(LevelFilter::Info);

    let mut cluster = TestCluster::new(4, 200);
    let payloads: Vec<Vec<u8>> = vec![vec![0xA1; 10], vec![0xB2; 20], vec![0xC3; 30]];
    for payload in &payloads {
        cluster.hosts[0].submit_transaction(Transaction::new(payload.clone()));
    }

    cluster.start_all();
    let blocks = cluster.wait_for_block_on_all(BlockId::new(1), COMMIT_TIMEOUT);

    // Agreement: identical committed block everywhere.
    for pair in blocks.windows(2) {
        assert_eq!(pair[0], pair[1]);
    }

    let block = &blocks[0];
    assert_eq!(block.proposer_index, SchainIndex::new(1));
    let committed: Vec<&[u8]> = block
        .transactions
        .iter()
        .map(|tx| tx.payload())
        .collect();
    let submitted: Vec<&[u8]> = payloads.iter().map(|payload| payload.as_slice()).collect();
    assert_eq!(committed, submitted);

    // The host saw the same block, exactly once, as its first delivery.
    wait_for_delivery(&cluster, 0, 1);
    let delivered = cluster.hosts[0].delivered();
    assert_eq!(delivered[0].block_id, BlockId::new(1));
    assert_eq!(delivered[0].transactions, block.transactions);
    assert_eq!(delivered[0].timestamp, block.timestamp);
}

/// With node 4 silent throughout, the chain still reaches block 5 and every
/// winner is one of the live proposers. Committed timestamps strictly
/// increase and host deliveries arrive in block order.
#[test]
fn chain_progresses_with_a_silent_node() {
    setup_logger(LevelFilter::Info);

    let mut cluster = TestCluster::new(4, 150);
    cluster.handles[3].mute();
    cluster.start_all();

    let blocks = cluster.wait_for_block_on_all(BlockId::new(5), COMMIT_TIMEOUT);
    for pair in blocks.windows(2) {
        assert_eq!(pair[0], pair[1]);
    }
    let winner = blocks[0].proposer_index;
    assert!(
        winner >= SchainIndex::new(1) && winner <= SchainIndex::new(3),
        "block 5 won by silent or empty proposer {}",
        winner
    );

    let mut prev_timestamp = None;
    for id in 1..=5 {
        let block = cluster.wait_for_block(0, BlockId::new(id), COMMIT_TIMEOUT);
        if let Some(prev) = prev_timestamp {
            assert!(block.timestamp > prev, "timestamps not strictly increasing");
        }
        prev_timestamp = Some(block.timestamp);
    }

    wait_for_delivery(&cluster, 0, 5);
    let delivered = cluster.hosts[0].delivered();
    for (position, delivery) in delivered.iter().take(5).enumerate() {
        assert_eq!(delivery.block_id, BlockId::new(position as u64 + 1));
    }
}

/// Node 3 sends an auxiliary broadcast for a value no binary-value quorum
/// supports (proposer 4 is silent, so honest inputs for its instance are all
/// zero). Honest nodes never witness the value and the chain decides anyway.
#[test]
fn byzantine_aux_without_support_is_dropped() {
    setup_logger(LevelFilter::Info);

    let mut cluster = TestCluster::new(4, 150);
    cluster.handles[3].mute();

    let coin = coin_payload(
        TEST_CHAIN_ID,
        BlockId::new(1),
        SchainIndex::new(4),
        Round::init(),
    );
    let rogue_share = cluster.signers[2].sign_share(&coin);
    let rogue_aux = ConsensusMessage {
        msg_type: ConsensusMsgType::AuxBroadcast,
        chain_id: TEST_CHAIN_ID,
        block_id: BlockId::new(1),
        proposer_index: SchainIndex::new(4),
        msg_id: MsgId::new(9999),
        src_node_id: NodeId::new(103),
        dst_node_id: NodeId::new(0),
        round: Round::init(),
        value: Bit::One,
        src_ip: Ipv4Addr::new(10, 0, 0, 3),
        sig_share: rogue_share.share,
    };
    cluster.handles[2].inject_to_all(&wire::encode_consensus(&rogue_aux));

    cluster.start_all();
    let blocks = cluster.wait_for_block_on_all(BlockId::new(1), COMMIT_TIMEOUT);

    for pair in blocks.windows(2) {
        assert_eq!(pair[0], pair[1]);
    }
    assert_ne!(blocks[0].proposer_index, SchainIndex::new(4));
}
