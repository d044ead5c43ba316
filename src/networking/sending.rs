/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use std::sync::mpsc::Sender;

use ed25519_dalek::VerifyingKey;

use crate::consensus::{ConsensusMessage, ConsensusNetwork};

use super::{messages::Message, network::Network};

/// Handle for broadcasting messages to the [`Network`].
///
/// It can be used to broadcast instances of any type that implement the [`Into<Message>`] trait.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn broadcast<S: Into<Message>>(&mut self, msg: S) {
        self.network.broadcast(msg.into())
    }
}

/// The [`ConsensusNetwork`] of a node's consensus engine: broadcasts to every peer, and feeds the
/// message back into the engine's own inbox so that it counts its own votes.
pub(crate) struct ConsensusSender<N: Network> {
    sender: SenderHandle<N>,
    loopback: Sender<(VerifyingKey, ConsensusMessage)>,
    me: VerifyingKey,
}

impl<N: Network> ConsensusSender<N> {
    pub(crate) fn new(
        network: N,
        loopback: Sender<(VerifyingKey, ConsensusMessage)>,
        me: VerifyingKey,
    ) -> Self {
        Self {
            sender: SenderHandle::new(network),
            loopback,
            me,
        }
    }
}

impl<N: Network> ConsensusNetwork for ConsensusSender<N> {
    fn broadcast(&mut self, message: ConsensusMessage) {
        self.sender.broadcast(message.clone());
        // The inbox only goes away when the consensus thread itself is shutting down.
        let _ = self.loopback.send((self.me, message));
    }
}
