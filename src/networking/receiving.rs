/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.

use std::{
    collections::{BTreeMap, VecDeque},
    mem,
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::Instant,
};

use ed25519_dalek::VerifyingKey;

use crate::{
    consensus::ConsensusMessage,
    types::data_types::{BufferSize, Height},
};

use super::{
    messages::{BlockMessage, Message},
    network::Network,
};

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into receiver
/// handles.
///
/// The kinds of messages that the poller polls are:
/// 1. Consensus messages (processed by the consensus driver thread), and
/// 2. Block messages (processed by the block processor thread).
///
/// Also returns a sender into the consensus message channel, which the consensus engine uses to
/// receive its own broadcasts.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Sender<(VerifyingKey, ConsensusMessage)>,
    Receiver<(VerifyingKey, ConsensusMessage)>,
    Receiver<(VerifyingKey, BlockMessage)>,
) {
    let (to_consensus_msg_receiver, consensus_msg_receiver) = mpsc::channel();
    let (to_block_msg_receiver, block_msg_receiver) = mpsc::channel();
    let loopback = to_consensus_msg_receiver.clone();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::ConsensusMessage(c_msg) => {
                    let _ = to_consensus_msg_receiver.send((origin, c_msg));
                }
                Message::BlockMessage(b_msg) => {
                    let _ = to_block_msg_receiver.send((origin, b_msg));
                }
            }
        } else {
            thread::yield_now()
        }
    });

    (
        poller_thread,
        loopback,
        consensus_msg_receiver,
        block_msg_receiver,
    )
}

/// A receiving end for [`ConsensusMessage`]s.
///
/// ## Height-aware buffering
///
/// `recv` returns messages for **only** the current height. Messages for lower heights are discarded,
/// and messages for higher heights are cached and returned once the engine reaches their height. This
/// keeps validators that finish a height slightly later than their peers from losing the first
/// messages of the next height.
///
/// ## Buffer management
///
/// If the buffer grows beyond the capacity given to [`new`](Self::new), some future-height messages are
/// removed to make space for the new message. Highest-height messages are removed first.
pub(crate) struct ConsensusMessageStub {
    receiver: Receiver<(VerifyingKey, ConsensusMessage)>,
    msg_buffer: ConsensusMessageBuffer,
}

impl ConsensusMessageStub {
    pub(crate) fn new(
        receiver: Receiver<(VerifyingKey, ConsensusMessage)>,
        msg_buffer_capacity: BufferSize,
    ) -> ConsensusMessageStub {
        Self {
            receiver,
            msg_buffer: ConsensusMessageBuffer::new(msg_buffer_capacity),
        }
    }

    /// Receive a message for `cur_height`, waiting until `deadline` at the latest.
    pub(crate) fn recv(
        &mut self,
        cur_height: Height,
        deadline: Instant,
    ) -> Result<(VerifyingKey, ConsensusMessage), ConsensusMessageReceiveError> {
        // Clear buffer of messages with heights lower than the current one.
        self.msg_buffer.remove_expired_msgs(cur_height);

        if let Some((sender, msg)) = self.msg_buffer.get_msg(&cur_height) {
            return Ok((sender, msg));
        }

        while Instant::now() < deadline {
            match self.receiver.recv_timeout(deadline - Instant::now()) {
                Ok((sender, msg)) => {
                    let height = msg.height();
                    if height == cur_height {
                        return Ok((sender, msg));
                    }
                    if height > cur_height {
                        self.msg_buffer.insert(msg, sender);
                    }
                }
                Err(RecvTimeoutError::Timeout) => thread::yield_now(),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ConsensusMessageReceiveError::Disconnected)
                }
            }
        }

        Err(ConsensusMessageReceiveError::Timeout)
    }
}

#[derive(Debug)]
pub(crate) enum ConsensusMessageReceiveError {
    Timeout,
    Disconnected,
}

/// Message buffer for [`ConsensusMessage`]s of future heights.
///
/// Its size is bounded by its capacity, and when the capacity is reached messages for the highest
/// heights may be removed.
struct ConsensusMessageBuffer {
    buffer_capacity: BufferSize,
    buffer: BTreeMap<Height, VecDeque<(VerifyingKey, ConsensusMessage)>>,
    buffer_size: BufferSize,
}

impl ConsensusMessageBuffer {
    fn new(buffer_capacity: BufferSize) -> Self {
        Self {
            buffer_capacity,
            buffer: BTreeMap::new(),
            buffer_size: BufferSize::new(0),
        }
    }

    /// Try inserting the message into the buffer.
    ///
    /// If caching the message would grow the buffer beyond its capacity, then either:
    /// 1. The message is dropped, if its height is not lower than every height already buffered, or
    /// 2. Just enough highest-height messages are removed to make space for it.
    ///
    /// Returns whether the message was inserted.
    fn insert(&mut self, msg: ConsensusMessage, sender: VerifyingKey) -> bool {
        let bytes_requested = mem::size_of::<VerifyingKey>() as u64 + msg.size();
        let height = msg.height();

        let buffer_will_be_overloaded = self
            .buffer_size
            .int()
            .checked_add(bytes_requested)
            .map_or(true, |new_size| new_size > self.buffer_capacity.int());
        let make_space = match self.buffer.keys().next_back() {
            None => true,
            Some(max_height) => height < *max_height,
        };

        if buffer_will_be_overloaded {
            if !make_space {
                return false;
            }
            self.remove_highest_msgs(bytes_requested);
            if self.buffer_size.int() + bytes_requested > self.buffer_capacity.int() {
                return false;
            }
        }

        self.buffer
            .entry(height)
            .or_default()
            .push_back((sender, msg));
        self.buffer_size += bytes_requested;
        true
    }

    /// If there are messages for `height` in the buffer, remove and return the one at the front of the
    /// queue.
    fn get_msg(&mut self, height: &Height) -> Option<(VerifyingKey, ConsensusMessage)> {
        let msg_queue = self.buffer.get_mut(height)?;
        let (sender, msg) = msg_queue.pop_front()?;
        self.buffer_size -= mem::size_of::<VerifyingKey>() as u64 + msg.size();
        if msg_queue.is_empty() {
            self.buffer.remove(height);
        }
        Some((sender, msg))
    }

    /// Remove just enough highest-height messages to free up (at least) `bytes_to_remove` bytes.
    fn remove_highest_msgs(&mut self, bytes_to_remove: u64) {
        let verifying_key_size = mem::size_of::<VerifyingKey>() as u64;
        let mut bytes_removed = 0;

        while bytes_removed < bytes_to_remove {
            let Some(mut entry) = self.buffer.last_entry() else {
                break;
            };
            match entry.get_mut().pop_back() {
                Some((_, msg)) => bytes_removed += msg.size() + verifying_key_size,
                None => (),
            }
            if entry.get().is_empty() {
                entry.remove();
            }
        }

        self.buffer_size -= bytes_removed;
    }

    /// Remove all messages for heights lower than `cur_height`.
    fn remove_expired_msgs(&mut self, cur_height: Height) {
        let retained = self.buffer.split_off(&cur_height);
        let expired_size: u64 = self
            .buffer
            .values()
            .flatten()
            .map(|(_, msg)| msg.size() + mem::size_of::<VerifyingKey>() as u64)
            .sum();
        self.buffer_size -= expired_size;
        self.buffer = retained;
    }
}
