/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a node.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the node](NodeSpec) with:
//!   1. `NodeSpec::builder` to construct a `NodeSpecBuilder`,
//!   2. The setters of the `NodeSpecBuilder`, and
//!   3. The `NodeSpecBuilder::build` method to construct a [NodeSpec],
//! - The function to [start](NodeSpec::start) a [Node] given its specification,
//! - [The type](Node) which keeps the node alive.
//!
//! ## Threads
//!
//! A running node consists of four threads:
//! 1. The poller, which receives messages from the [`Network`] and routes them to the next two
//!    threads.
//! 2. The block processor, which feeds blocks and block inventories received from peers into the
//!    [`Blockchain`].
//! 3. The consensus driver, which owns the [consensus engine](crate::consensus::Consensus).
//! 4. The event bus, which fires the registered event handlers. It is only started if at least one
//!    handler is registered or `log_events` is enabled.
//!
//! ## Starting a node
//!
//! ```ignore
//! let node =
//!     NodeSpec::builder()
//!     .network(network)
//!     .kv_store(kv_store)
//!     .tx_verifier(tx_verifier)
//!     .configuration(configuration)
//!     .on_decide(decide_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! The node's [configuration](Configuration) can also be defined using the builder pattern:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .chain_params(chain_params)
//!     .timeout_config(TimeoutConfiguration::default())
//!     .msg_buffer_capacity(BufferSize::new(1024))
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use ed25519_dalek::{SigningKey, VerifyingKey};
use typed_builder::TypedBuilder;

use crate::{
    blockchain::{Blockchain, BlockchainError, TxVerifier},
    consensus::{driver::start_consensus, Consensus, TimeoutConfiguration},
    event_bus::*,
    events::*,
    networking::{
        receiving::{start_polling, ConsensusMessageStub},
        sending::ConsensusSender,
        BlockMessage, Network,
    },
    params::ChainParams,
    store::KVStore,
    types::{crypto_primitives::Keypair, data_types::BufferSize},
};

/// How long the block processor waits for a block message before checking for a shutdown signal.
const BLOCK_PROCESSOR_POLL: Duration = Duration::from_millis(50);

/// Stores the user-defined parameters required to start the node, that is:
/// 1. The node's [keypair](ed25519_dalek::SigningKey), used to sign blocks and consensus messages.
/// 2. The [parameters](ChainParams) of the chain, which every node of a network must agree on.
/// 3. The durations of the consensus step [timeouts](TimeoutConfiguration).
/// 4. The capacity of the buffer that holds consensus messages for future heights. If this capacity
///    is about to be exceeded, messages for the highest heights are removed to make space.
/// 5. The "Log Events" flag. If set to `true`, every event is logged by the default
///    [loggers](crate::logging).
#[derive(TypedBuilder)]
pub struct Configuration {
    #[builder(setter(doc = "Set the node's keypair, used to sign blocks and messages. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the parameters of the chain. Required."))]
    pub chain_params: ChainParams,
    #[builder(default, setter(doc = "Set the durations of the consensus step timeouts. Optional."))]
    pub timeout_config: TimeoutConfiguration,
    #[builder(
        default = BufferSize::new(1024 * 1024),
        setter(doc = "Set the maximum number of bytes of future-height consensus messages that the node buffers. Optional.")
    )]
    pub msg_buffer_capacity: BufferSize,
    #[builder(default = false, setter(doc = "Enable logging of events? Optional."))]
    pub log_events: bool,
}

/// Stores all necessary parameters and trait implementations required to run the [Node].
#[derive(TypedBuilder)]
pub struct NodeSpec<K: KVStore, V: TxVerifier + 'static, N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. Required."))]
    network: N,
    #[builder(setter(doc = "Set the key-value store the chain is persisted in. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the verifier of the transactions carried by blocks. Required."))]
    tx_verifier: V,
    #[builder(setter(doc = "Set the [configuration](Configuration) of the node. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&InsertBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is added to the block tree. Optional."))]
    on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateTipEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateTipEvent>),
    doc = "Register a handler closure to be invoked after the tip of the best chain moves. Optional."))]
    on_update_tip: Option<HandlerPtr<UpdateTipEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&JustifyBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<JustifyBlockEvent>),
    doc = "Register a handler closure to be invoked after a block becomes the justified head. Optional."))]
    on_justify_block: Option<HandlerPtr<JustifyBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FinalizeBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FinalizeBlockEvent>),
    doc = "Register a handler closure to be invoked after a block becomes the finalized head. Optional."))]
    on_finalize_block: Option<HandlerPtr<FinalizeBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the node broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrevoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrevoteEvent>),
    doc = "Register a handler closure to be invoked after the node broadcasts a prevote. Optional."))]
    on_prevote: Option<HandlerPtr<PrevoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrecommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrecommitEvent>),
    doc = "Register a handler closure to be invoked after the node broadcasts a precommit. Optional."))]
    on_precommit: Option<HandlerPtr<PrecommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the node receives a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceivePrevoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceivePrevoteEvent>),
    doc = "Register a handler closure to be invoked after the node receives a prevote. Optional."))]
    on_receive_prevote: Option<HandlerPtr<ReceivePrevoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceivePrecommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceivePrecommitEvent>),
    doc = "Register a handler closure to be invoked after the node receives a precommit. Optional."))]
    on_receive_precommit: Option<HandlerPtr<ReceivePrecommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the node starts a round. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundTimeoutEvent>),
    doc = "Register a handler closure to be invoked after a step timeout expires. Optional."))]
    on_round_timeout: Option<HandlerPtr<RoundTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DecideEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DecideEvent>),
    doc = "Register a handler closure to be invoked after consensus decides a block. Optional."))]
    on_decide: Option<HandlerPtr<DecideEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposerSlashingEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposerSlashingEvent>),
    doc = "Register a handler closure to be invoked after a producer is caught signing two blocks for one slot. Optional."))]
    on_proposer_slashing: Option<HandlerPtr<ProposerSlashingEvent>>,
}

impl<K: KVStore, V: TxVerifier + 'static, N: Network + 'static> NodeSpec<K, V, N> {
    /// Opens the chain, starts all threads and channels associated with running a node, and returns the
    /// handles to them in a [Node] struct.
    pub fn start(self) -> Result<Node<K, V>, BlockchainError> {
        let Configuration {
            me,
            chain_params,
            timeout_config,
            msg_buffer_capacity,
            log_events,
        } = self.configuration;

        let event_handlers = EventHandlers::new(
            log_events,
            UserHandlers {
                on_insert_block: self.on_insert_block,
                on_update_tip: self.on_update_tip,
                on_justify_block: self.on_justify_block,
                on_finalize_block: self.on_finalize_block,
                on_propose: self.on_propose,
                on_prevote: self.on_prevote,
                on_precommit: self.on_precommit,
                on_receive_proposal: self.on_receive_proposal,
                on_receive_prevote: self.on_receive_prevote,
                on_receive_precommit: self.on_receive_precommit,
                on_start_round: self.on_start_round,
                on_round_timeout: self.on_round_timeout,
                on_decide: self.on_decide,
                on_proposer_slashing: self.on_proposer_slashing,
            },
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let keypair = Keypair::new(me);
        let blockchain = Arc::new(Blockchain::new(
            self.kv_store,
            chain_params,
            keypair.clone(),
            self.tx_verifier,
            event_publisher.clone(),
        )?);

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, loopback, consensus_msgs, block_msgs) =
            start_polling(self.network.clone(), poller_shutdown_receiver);

        let (block_processor_shutdown, block_processor_shutdown_receiver) = mpsc::channel();
        let block_processor = start_block_processor(
            Arc::clone(&blockchain),
            block_msgs,
            block_processor_shutdown_receiver,
        );

        let (justified, _) = blockchain.state().get_justified_head();
        let me: VerifyingKey = keypair.public();
        let consensus = Consensus::new(
            justified.height + 1,
            Arc::clone(&blockchain),
            keypair,
            ConsensusSender::new(self.network, loopback, me),
            timeout_config,
            event_publisher.clone(),
        );
        let (consensus_shutdown, consensus_shutdown_receiver) = mpsc::channel();
        let consensus = start_consensus(
            consensus,
            ConsensusMessageStub::new(consensus_msgs, msg_buffer_capacity),
            consensus_shutdown_receiver,
            event_publisher,
        );

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                );
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Ok(Node {
            blockchain,
            poller: Some(poller),
            poller_shutdown,
            block_processor: Some(block_processor),
            block_processor_shutdown,
            consensus: Some(consensus),
            consensus_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a node. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Node<K: KVStore, V: TxVerifier + 'static> {
    blockchain: Arc<Blockchain<K, V>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    block_processor: Option<JoinHandle<()>>,
    block_processor_shutdown: Sender<()>,
    consensus: Option<JoinHandle<()>>,
    consensus_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore, V: TxVerifier + 'static> Node<K, V> {
    /// Get the [`Blockchain`] this node runs, e.g., to register [notifees](crate::blockchain::BlockchainNotifee)
    /// or to read the chain.
    pub fn blockchain(&self) -> &Blockchain<K, V> {
        &self.blockchain
    }
}

impl<K: KVStore, V: TxVerifier + 'static> Drop for Node<K, V> {
    fn drop(&mut self) {
        // The order of thread shutdown in this function is important. The consensus and block
        // processor threads receive messages from the poller, and assume that the poller lives longer
        // than them. Every thread may publish events, so the event bus goes last.

        self.consensus_shutdown.send(()).unwrap();
        self.consensus.take().unwrap().join().unwrap();

        self.block_processor_shutdown.send(()).unwrap();
        self.block_processor.take().unwrap().join().unwrap();

        self.poller_shutdown.send(()).unwrap();
        self.poller.take().unwrap().join().unwrap();

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| shutdown.send(()).unwrap());
        if let Some(event_bus) = self.event_bus.take() {
            event_bus.join().unwrap();
        }
    }
}

/// Spawn the block processor thread, which feeds the blocks and block inventories received from peers
/// into `blockchain`. Rejected blocks are logged and dropped.
fn start_block_processor<K: KVStore, V: TxVerifier + 'static>(
    blockchain: Arc<Blockchain<K, V>>,
    block_msgs: Receiver<(VerifyingKey, BlockMessage)>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Block processor thread disconnected from main thread")
            }
        }

        match block_msgs.recv_timeout(BLOCK_PROCESSOR_POLL) {
            Ok((origin, BlockMessage::Block(block))) => {
                if let Err(err) = blockchain.process_block(&block) {
                    log::warn!(
                        "Rejected block {} from {:?}: {:?}",
                        block.hash(),
                        origin,
                        err
                    );
                }
            }
            Ok((origin, BlockMessage::BlockInv(inv))) => {
                if let Err(err) = blockchain.process_block_inv(&inv) {
                    log::warn!("Rejected block inventory from {:?}: {:?}", origin, err);
                    continue;
                }
                for block in &inv.blocks {
                    if let Err(err) = blockchain.process_block(block) {
                        log::warn!(
                            "Rejected block {} of inventory from {:?}: {:?}",
                            block.hash(),
                            origin,
                            err
                        );
                        break;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => {
                panic!("The poller thread was disconnected from the block processor thread")
            }
        }
    })
}
