/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-round step timeouts.
//!
//! Each step of a round gets a timeout whose duration grows linearly with the round number, so that
//! validators whose clocks or links are slow eventually spend long enough in one round to reach a
//! decision together.

use std::time::{Duration, Instant};

use typed_builder::TypedBuilder;

use crate::types::data_types::{Height, Round};

/// The step of a round that the engine is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    Propose,
    Prevote,
    Precommit,
}

/// Durations of the step timeouts. The timeout of `step` in `round` lasts
/// `step + step_delta * round`.
#[derive(Clone, Debug, TypedBuilder)]
pub struct TimeoutConfiguration {
    #[builder(default = Duration::from_secs(3))]
    pub propose: Duration,
    #[builder(default = Duration::from_millis(500))]
    pub propose_delta: Duration,
    #[builder(default = Duration::from_secs(1))]
    pub prevote: Duration,
    #[builder(default = Duration::from_millis(500))]
    pub prevote_delta: Duration,
    #[builder(default = Duration::from_secs(1))]
    pub precommit: Duration,
    #[builder(default = Duration::from_millis(500))]
    pub precommit_delta: Duration,
}

impl TimeoutConfiguration {
    /// Get the duration of the timeout of `step` in `round`.
    pub fn duration(&self, step: Step, round: Round) -> Duration {
        let (base, delta) = match step {
            Step::Propose => (self.propose, self.propose_delta),
            Step::Prevote => (self.prevote, self.prevote_delta),
            Step::Precommit => (self.precommit, self.precommit_delta),
        };
        let round = u32::try_from(round).unwrap_or(u32::MAX);
        base.saturating_add(delta.saturating_mul(round))
    }
}

impl Default for TimeoutConfiguration {
    fn default() -> Self {
        TimeoutConfiguration::builder().build()
    }
}

/// A timeout that fires at `deadline` for `step` of `round` at `height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledTimeout {
    pub height: Height,
    pub round: Round,
    pub step: Step,
    pub deadline: Instant,
}

impl ScheduledTimeout {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}
