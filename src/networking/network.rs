/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use ed25519_dalek::VerifyingKey;

use super::messages::Message;

/// The peer-to-peer transport that a node sends and receives [`Message`]s through.
pub trait Network: Clone + Send {
    /// Send a message to all peers without blocking. The local node does not need to receive it.
    fn broadcast(&mut self, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}
