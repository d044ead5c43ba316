/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Round-based BFT consensus that decides one block per height.
//!
//! [`Consensus`] is a plain state machine: it reacts to messages and timeout expiries passed to it and
//! talks to the outside world only through the [`ConsensusChain`], [`ConsensusMiner`] and
//! [`ConsensusNetwork`] traits. Inside a node, it is owned by a single [driver](driver) thread.

pub mod implementation;

pub mod interfaces;

pub mod message_log;

pub mod messages;

pub mod timeouts;

pub(crate) mod driver;

pub use implementation::{Consensus, ConsensusError};

pub use interfaces::{ConsensusChain, ConsensusMiner, ConsensusNetwork};

pub use message_log::{one_third, two_thirds, MessageLog, ROUND_HORIZON};

pub use messages::{ConsensusMessage, Precommit, Prevote, Proposal};

pub use timeouts::{ScheduledTimeout, Step, TimeoutConfiguration};
