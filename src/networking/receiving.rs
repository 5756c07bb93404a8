/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The network read loop.
//!
//! The poller thread pulls datagrams off the transport, decodes them, and
//! authenticates them against the fixed membership before anything else sees
//! them: the chain id must match, the claimed source address must equal the
//! transport-level peer address, and that address must belong to a member.
//! Authenticated envelopes go to the router, which posts or defers them.
//!
//! The poller also serves proposal pushes directly: a peer's proposal is
//! validated, stored, and answered with this node's DA share without waiting
//! for the driver loop (which may be blocked building this node's own
//! proposal). The envelope is still routed afterwards so the driver can run
//! its own bookkeeping over the stored proposal.
//!
//! Failures here are local by design: a bad frame is logged and dropped, and
//! the loop keeps reading.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::crypto::{da_proof_payload, proposal_payload, SigShare, SignerHandle};
use crate::errors::{log_nested, EngineError, ParseError};
use crate::exit::ExitFlag;
use crate::messages::{DaShareMessage, GossipMessage, NetworkEnvelope, NetworkMessage};
use crate::state::{ChainStore, KVStore};
use crate::types::basic::{BlockId, ChainId};
use crate::types::block::BlockProposal;

use super::network::Network;
use super::router::MessageRouter;
use super::sending::ConsensusNetwork;
use super::wire::{self, WireFrame};

/// Spawn the poller thread.
#[allow(clippy::too_many_arguments)]
pub fn start_poller<K: KVStore, N: Network>(
    network: ConsensusNetwork<N>,
    router: Arc<MessageRouter>,
    mut store: ChainStore<K>,
    signer: SignerHandle,
    last_committed: Arc<AtomicU64>,
    chain_id: ChainId,
    catchup_blocks: BlockId,
    exit: ExitFlag,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("networkReadLoop".to_string())
        .spawn(move || {
            while !exit.is_set() {
                match network.recv() {
                    Some((peer_ip, datagram)) => {
                        match authenticate(&network, chain_id, peer_ip, &datagram) {
                            Ok(Some(envelope)) => {
                                if envelope.message.block_id() <= catchup_blocks {
                                    continue;
                                }
                                if let NetworkMessage::Gossip(GossipMessage::ProposalPush(
                                    proposal,
                                )) = &envelope.message
                                {
                                    let head =
                                        BlockId::new(last_committed.load(Ordering::SeqCst));
                                    match serve_proposal_push(
                                        &network, &mut store, &signer, chain_id, head, proposal,
                                    ) {
                                        Ok(()) => {}
                                        Err(err) => {
                                            log_nested("dropping peer proposal", &err);
                                            continue;
                                        }
                                    }
                                }
                                router.post_or_defer(envelope);
                            }
                            Ok(None) => {}
                            Err(err) => log_nested("dropping network message", &err),
                        }
                    }
                    None => thread::sleep(Duration::from_millis(1)),
                }
            }
        })
        .expect("spawn poller")
}

/// Validate, store, and answer one peer proposal with this node's DA share.
fn serve_proposal_push<K: KVStore, N: Network>(
    network: &ConsensusNetwork<N>,
    store: &mut ChainStore<K>,
    signer: &SignerHandle,
    chain_id: ChainId,
    last_committed: BlockId,
    proposal: &BlockProposal,
) -> Result<(), EngineError> {
    if proposal.block_id <= last_committed {
        return Ok(());
    }
    if proposal.chain_id != chain_id {
        return Err(EngineError::InvalidChain {
            expected: chain_id,
            got: proposal.chain_id,
        });
    }
    if !network.registry().contains_index(proposal.proposer_index) {
        return Err(EngineError::InvalidSchain(proposal.proposer_index.int()));
    }
    if !proposal.hash_is_consistent() {
        return Err(ParseError::new("proposal hash does not match its contents").into());
    }
    let proposer_share = SigShare::new(proposal.proposer_index, proposal.signature.clone());
    if !signer.verify_share(&proposal_payload(&proposal.hash), &proposer_share) {
        return Err(ParseError::new("proposal signature does not verify").into());
    }

    store.save_proposal(proposal)?;

    let share = signer.sign_share(&da_proof_payload(
        proposal.block_id,
        proposal.proposer_index,
        &proposal.hash,
    ));
    let reply = GossipMessage::DaSigShare(DaShareMessage {
        block_id: proposal.block_id,
        proposer_index: proposal.proposer_index,
        block_hash: proposal.hash,
        share: share.share,
    });
    let frame = wire::encode_gossip(chain_id, &reply)?;
    network.send_to(proposal.proposer_index, &frame);
    Ok(())
}

/// Decode and authenticate one datagram. `Ok(None)` means a silent drop
/// (foreign magic number).
fn authenticate<N: Network>(
    network: &ConsensusNetwork<N>,
    chain_id: ChainId,
    peer_ip: Ipv4Addr,
    datagram: &[u8],
) -> Result<Option<NetworkEnvelope>, EngineError> {
    let frame = match wire::decode(datagram)? {
        Some(frame) => frame,
        None => return Ok(None),
    };

    let sender = network
        .registry()
        .by_ip(peer_ip)
        .ok_or(EngineError::InvalidSourceIp(peer_ip))?
        .schain_index;

    let message = match frame {
        WireFrame::Consensus(msg) => {
            if msg.chain_id != chain_id {
                return Err(EngineError::InvalidChain {
                    expected: chain_id,
                    got: msg.chain_id,
                });
            }
            if msg.src_ip != peer_ip {
                return Err(EngineError::InvalidSourceIp(msg.src_ip));
            }
            msg.validate_indices(network.registry().node_count() as u64)?;
            NetworkMessage::Consensus(msg)
        }
        WireFrame::Gossip(msg_chain_id, msg) => {
            if msg_chain_id != chain_id {
                return Err(EngineError::InvalidChain {
                    expected: chain_id,
                    got: msg_chain_id,
                });
            }
            NetworkMessage::Gossip(msg)
        }
    };

    Ok(Some(NetworkEnvelope { sender, message }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    use crate::crypto::SigShareBytes;
    use crate::mailbox::Mailbox;
    use crate::membership::{NodeInfo, NodeRegistry};
    use crate::messages::{ConsensusMessage, ConsensusMsgType};
    use crate::networking::router::RoundRegistry;
    use crate::types::basic::{Bit, MsgId, NodeId, Round, SchainIndex};

    use super::*;

    struct NullNetwork;

    impl Network for NullNetwork {
        fn send(&mut self, _peer: &NodeInfo, _frame: &[u8]) -> bool {
            true
        }

        fn recv(&mut self) -> Option<(Ipv4Addr, Vec<u8>)> {
            None
        }

        fn probe_peer(&mut self, _peer: &NodeInfo) -> bool {
            true
        }
    }

    fn network() -> ConsensusNetwork<NullNetwork> {
        let registry = NodeRegistry::new(
            (1..=4)
                .map(|i| {
                    NodeInfo::new(
                        NodeId::new(i),
                        SchainIndex::new(i),
                        Ipv4Addr::new(10, 0, 0, i as u8),
                        11000,
                    )
                })
                .collect(),
        )
        .unwrap();
        ConsensusNetwork::new(NullNetwork, registry, SchainIndex::new(1), 0, 256)
    }

    fn frame(chain: u64, src_ip: Ipv4Addr) -> Vec<u8> {
        wire::encode_consensus(&ConsensusMessage {
            msg_type: ConsensusMsgType::BvbBroadcast,
            chain_id: ChainId::new(chain),
            block_id: BlockId::new(1),
            proposer_index: SchainIndex::new(2),
            msg_id: MsgId::new(1),
            src_node_id: NodeId::new(2),
            dst_node_id: NodeId::new(1),
            round: Round::init(),
            value: Bit::Zero,
            src_ip,
            sig_share: SigShareBytes::empty(),
        })
    }

    #[test]
    fn authenticated_frame_becomes_an_envelope() {
        let network = network();
        let peer_ip = Ipv4Addr::new(10, 0, 0, 2);
        let envelope = authenticate(&network, ChainId::new(1), peer_ip, &frame(1, peer_ip))
            .unwrap()
            .unwrap();
        assert_eq!(envelope.sender, SchainIndex::new(2));
    }

    #[test]
    fn wrong_chain_is_rejected() {
        let network = network();
        let peer_ip = Ipv4Addr::new(10, 0, 0, 2);
        assert!(matches!(
            authenticate(&network, ChainId::new(1), peer_ip, &frame(9, peer_ip)),
            Err(EngineError::InvalidChain { .. })
        ));
    }

    #[test]
    fn spoofed_source_ip_is_rejected() {
        let network = network();
        let peer_ip = Ipv4Addr::new(10, 0, 0, 2);
        let spoofed = frame(1, Ipv4Addr::new(10, 0, 0, 3));
        assert!(matches!(
            authenticate(&network, ChainId::new(1), peer_ip, &spoofed),
            Err(EngineError::InvalidSourceIp(_))
        ));
    }

    #[test]
    fn unknown_peer_is_rejected() {
        let network = network();
        let outsider = Ipv4Addr::new(10, 0, 0, 9);
        assert!(matches!(
            authenticate(&network, ChainId::new(1), outsider, &frame(1, outsider)),
            Err(EngineError::InvalidSourceIp(_))
        ));
    }

    #[test]
    fn messages_inside_the_skip_window_are_dropped() {
        let network = network();
        let mailbox = Mailbox::new();
        let router = Arc::new(MessageRouter::new(
            mailbox.clone(),
            RoundRegistry::new(),
            Arc::new(AtomicU64::new(5)),
        ));

        let peer_ip = Ipv4Addr::new(10, 0, 0, 2);
        let envelope = authenticate(&network, ChainId::new(1), peer_ip, &frame(1, peer_ip))
            .unwrap()
            .unwrap();
        // Block 1 is inside a skip window of 2.
        if envelope.message.block_id() > BlockId::new(2) {
            router.post_or_defer(envelope);
        }
        assert_eq!(mailbox.len(), 0);
        assert_eq!(router.total_deferred(), 0);
    }
}
