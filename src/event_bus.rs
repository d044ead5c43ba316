/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) published by the other threads of a
//! node and fires the handlers registered for them.
//!
//! Every kind of event has a list of handlers: the user-defined handler passed to
//! [`NodeSpec`](crate::node::NodeSpec), if any, preceded by the default [logger](crate::logging) if
//! `log_events` is enabled.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::events::*;
use crate::logging::Logger;

/// Pointer to a handler closure, parametrized by the argument (in practice, the event type).
pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) insert_block_handlers: Vec<HandlerPtr<InsertBlockEvent>>,
    pub(crate) update_tip_handlers: Vec<HandlerPtr<UpdateTipEvent>>,
    pub(crate) justify_block_handlers: Vec<HandlerPtr<JustifyBlockEvent>>,
    pub(crate) finalize_block_handlers: Vec<HandlerPtr<FinalizeBlockEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) prevote_handlers: Vec<HandlerPtr<PrevoteEvent>>,
    pub(crate) precommit_handlers: Vec<HandlerPtr<PrecommitEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) receive_prevote_handlers: Vec<HandlerPtr<ReceivePrevoteEvent>>,
    pub(crate) receive_precommit_handlers: Vec<HandlerPtr<ReceivePrecommitEvent>>,
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) round_timeout_handlers: Vec<HandlerPtr<RoundTimeoutEvent>>,
    pub(crate) decide_handlers: Vec<HandlerPtr<DecideEvent>>,
    pub(crate) proposer_slashing_handlers: Vec<HandlerPtr<ProposerSlashingEvent>>,
}

/// The user-defined handlers of a node, one optional handler per kind of event.
#[derive(Default)]
pub(crate) struct UserHandlers {
    pub(crate) on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
    pub(crate) on_update_tip: Option<HandlerPtr<UpdateTipEvent>>,
    pub(crate) on_justify_block: Option<HandlerPtr<JustifyBlockEvent>>,
    pub(crate) on_finalize_block: Option<HandlerPtr<FinalizeBlockEvent>>,
    pub(crate) on_propose: Option<HandlerPtr<ProposeEvent>>,
    pub(crate) on_prevote: Option<HandlerPtr<PrevoteEvent>>,
    pub(crate) on_precommit: Option<HandlerPtr<PrecommitEvent>>,
    pub(crate) on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) on_receive_prevote: Option<HandlerPtr<ReceivePrevoteEvent>>,
    pub(crate) on_receive_precommit: Option<HandlerPtr<ReceivePrecommitEvent>>,
    pub(crate) on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    pub(crate) on_round_timeout: Option<HandlerPtr<RoundTimeoutEvent>>,
    pub(crate) on_decide: Option<HandlerPtr<DecideEvent>>,
    pub(crate) on_proposer_slashing: Option<HandlerPtr<ProposerSlashingEvent>>,
}

impl EventHandlers {
    pub(crate) fn new(log_events: bool, user_handlers: UserHandlers) -> EventHandlers {
        EventHandlers {
            insert_block_handlers: handlers(log_events, user_handlers.on_insert_block),
            update_tip_handlers: handlers(log_events, user_handlers.on_update_tip),
            justify_block_handlers: handlers(log_events, user_handlers.on_justify_block),
            finalize_block_handlers: handlers(log_events, user_handlers.on_finalize_block),
            propose_handlers: handlers(log_events, user_handlers.on_propose),
            prevote_handlers: handlers(log_events, user_handlers.on_prevote),
            precommit_handlers: handlers(log_events, user_handlers.on_precommit),
            receive_proposal_handlers: handlers(log_events, user_handlers.on_receive_proposal),
            receive_prevote_handlers: handlers(log_events, user_handlers.on_receive_prevote),
            receive_precommit_handlers: handlers(log_events, user_handlers.on_receive_precommit),
            start_round_handlers: handlers(log_events, user_handlers.on_start_round),
            round_timeout_handlers: handlers(log_events, user_handlers.on_round_timeout),
            decide_handlers: handlers(log_events, user_handlers.on_decide),
            proposer_slashing_handlers: handlers(log_events, user_handlers.on_proposer_slashing),
        }
    }

    /// Check whether no handler at all is registered, in which case no event bus is needed.
    pub(crate) fn is_empty(&self) -> bool {
        self.insert_block_handlers.is_empty()
            && self.update_tip_handlers.is_empty()
            && self.justify_block_handlers.is_empty()
            && self.finalize_block_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.prevote_handlers.is_empty()
            && self.precommit_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_prevote_handlers.is_empty()
            && self.receive_precommit_handlers.is_empty()
            && self.start_round_handlers.is_empty()
            && self.round_timeout_handlers.is_empty()
            && self.decide_handlers.is_empty()
            && self.proposer_slashing_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertBlock(insert_block_event) => self
                .insert_block_handlers
                .iter()
                .for_each(|handler| handler(&insert_block_event)),

            Event::UpdateTip(update_tip_event) => self
                .update_tip_handlers
                .iter()
                .for_each(|handler| handler(&update_tip_event)),

            Event::JustifyBlock(justify_block_event) => self
                .justify_block_handlers
                .iter()
                .for_each(|handler| handler(&justify_block_event)),

            Event::FinalizeBlock(finalize_block_event) => self
                .finalize_block_handlers
                .iter()
                .for_each(|handler| handler(&finalize_block_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Prevote(prevote_event) => self
                .prevote_handlers
                .iter()
                .for_each(|handler| handler(&prevote_event)),

            Event::Precommit(precommit_event) => self
                .precommit_handlers
                .iter()
                .for_each(|handler| handler(&precommit_event)),

            Event::ReceiveProposal(receive_proposal_event) => self
                .receive_proposal_handlers
                .iter()
                .for_each(|handler| handler(&receive_proposal_event)),

            Event::ReceivePrevote(receive_prevote_event) => self
                .receive_prevote_handlers
                .iter()
                .for_each(|handler| handler(&receive_prevote_event)),

            Event::ReceivePrecommit(receive_precommit_event) => self
                .receive_precommit_handlers
                .iter()
                .for_each(|handler| handler(&receive_precommit_event)),

            Event::StartRound(start_round_event) => self
                .start_round_handlers
                .iter()
                .for_each(|handler| handler(&start_round_event)),

            Event::RoundTimeout(round_timeout_event) => self
                .round_timeout_handlers
                .iter()
                .for_each(|handler| handler(&round_timeout_event)),

            Event::Decide(decide_event) => self
                .decide_handlers
                .iter()
                .for_each(|handler| handler(&decide_event)),

            Event::ProposerSlashing(proposer_slashing_event) => self
                .proposer_slashing_handlers
                .iter()
                .for_each(|handler| handler(&proposer_slashing_event)),
        }
    }
}

fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

/// Spawn the event bus thread, which fires the handlers of every event received from
/// `event_subscriber` until it is signalled to shut down.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Event bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // Every publisher has shut down. Keep waiting for the shutdown signal.
            Err(TryRecvError::Disconnected) => thread::yield_now(),
        }
    })
}
