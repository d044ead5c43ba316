/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that owns a node's [`Consensus`] engine.
//!
//! Every consensus message received from the network, every message the engine broadcasts to itself,
//! and every timeout expiry is handled on this thread, one at a time and in arrival order, so the
//! engine needs no lock.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    events::*,
    networking::{
        receiving::{ConsensusMessageReceiveError, ConsensusMessageStub},
        sending::ConsensusSender,
        Network,
    },
    types::crypto_primitives::Keypair,
};

use super::{
    implementation::Consensus, interfaces::ConsensusChain, messages::ConsensusMessage,
};

/// Upper bound on how long the thread blocks waiting for a message, so that it notices shutdown
/// signals promptly even when no timeout is pending.
const MAX_WAIT: Duration = Duration::from_millis(50);

pub(crate) fn start_consensus<C: ConsensusChain + Send + 'static, N: Network + 'static>(
    mut consensus: Consensus<C, Keypair, ConsensusSender<N>>,
    mut msg_stub: ConsensusMessageStub,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(err) = consensus.initialize() {
            log::warn!("Failed to start round 0 at height {}: {:?}", consensus.height(), err);
        }

        loop {
            match shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Consensus thread disconnected from main thread")
                }
            }

            let now = Instant::now();
            let deadline = consensus
                .next_deadline()
                .map_or(now + MAX_WAIT, |deadline| deadline.min(now + MAX_WAIT));

            match msg_stub.recv(consensus.height(), deadline) {
                Ok((origin, msg)) => on_receive_msg(&mut consensus, origin, msg, &event_publisher),
                Err(ConsensusMessageReceiveError::Timeout) => (),
                Err(ConsensusMessageReceiveError::Disconnected) => {
                    panic!("The poller thread was disconnected from the consensus thread")
                }
            }

            if let Err(err) = consensus.tick(Instant::now()) {
                log::warn!("Failed to handle timeout at height {}: {:?}", consensus.height(), err);
            }
        }
    })
}

fn on_receive_msg<C: ConsensusChain, N: Network>(
    consensus: &mut Consensus<C, Keypair, ConsensusSender<N>>,
    origin: VerifyingKey,
    msg: ConsensusMessage,
    event_publisher: &Option<Sender<Event>>,
) {
    let result = match msg {
        ConsensusMessage::Proposal(proposal) => {
            Event::publish(
                event_publisher,
                Event::ReceiveProposal(ReceiveProposalEvent {
                    timestamp: SystemTime::now(),
                    origin,
                    proposal: proposal.clone(),
                }),
            );
            consensus.on_message_proposal(proposal)
        }
        ConsensusMessage::Prevote(prevote) => {
            Event::publish(
                event_publisher,
                Event::ReceivePrevote(ReceivePrevoteEvent {
                    timestamp: SystemTime::now(),
                    origin,
                    prevote: prevote.clone(),
                }),
            );
            consensus.on_message_prevote(prevote)
        }
        ConsensusMessage::Precommit(precommit) => {
            Event::publish(
                event_publisher,
                Event::ReceivePrecommit(ReceivePrecommitEvent {
                    timestamp: SystemTime::now(),
                    origin,
                    precommit: precommit.clone(),
                }),
            );
            consensus.on_message_precommit(precommit)
        }
    };

    if let Err(err) = result {
        log::warn!("Dropped consensus message at height {}: {:?}", consensus.height(), err);
    }
}
