//! Run disciplines.
//!
//! The asynchronous discipline drains the time-ordered queue until it is empty. The synchronous discipline executes
//! rounds with a barrier between them until every node has halted or the round cap is reached.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::algorithm::Phase;
use crate::communication::Communication;
use crate::config::Mode;
use crate::message::SimTime;
use crate::log_info;

/// Scheduler lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    /// Nodes are being initialized.
    #[default]
    Initializing,
    /// Messages are being delivered.
    Running,
    /// The run has finished.
    Done,
}

impl Display for SchedulerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Initializing => f.write_str("initializing"),
            SchedulerState::Running => f.write_str("running"),
            SchedulerState::Done => f.write_str("done"),
        }
    }
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunOutcome {
    /// Clock value when the run stopped.
    pub final_time: SimTime,
    /// Number of executed rounds (synchronous discipline only).
    pub rounds: Option<u64>,
    /// Number of delivered messages (asynchronous) or node steps (synchronous).
    pub events: u64,
    /// Whether the round cap stopped the run before every node halted.
    pub cap_reached: bool,
}

/// Drives a run to completion.
pub struct Scheduler {
    state: SchedulerState,
    max_rounds: u64,
}

impl Scheduler {
    /// Creates a scheduler. `max_rounds` is the last round the synchronous discipline executes.
    pub fn new(max_rounds: u64) -> Self {
        Self {
            state: SchedulerState::Initializing,
            max_rounds,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Initializes every node and runs the discipline of `comm` to completion.
    pub fn run(&mut self, comm: &mut Communication) -> RunOutcome {
        self.state = SchedulerState::Initializing;
        log_info!(comm.now(), "initializing {} nodes with {}", comm.network().len(), comm.algorithm().name());
        for idx in 0..comm.network().len() {
            comm.invoke_at(idx, Phase::Init);
        }

        self.state = SchedulerState::Running;
        let outcome = match comm.mode() {
            Mode::Async => self.run_async(comm),
            Mode::Sync => self.run_sync(comm),
        };
        self.state = SchedulerState::Done;
        log_info!(outcome.final_time, "simulation finished");
        outcome
    }

    fn run_async(&mut self, comm: &mut Communication) -> RunOutcome {
        let mut events = 0;
        while let Some(message) = comm.next_message() {
            comm.deliver(message);
            events += 1;
        }
        RunOutcome {
            final_time: comm.now(),
            rounds: None,
            events,
            cap_reached: false,
        }
    }

    fn run_sync(&mut self, comm: &mut Communication) -> RunOutcome {
        let mut events = 0;
        let mut rounds = 0;
        let mut halted = is_halted(comm);
        for round in 0..=self.max_rounds {
            if halted {
                break;
            }
            comm.set_clock(SimTime::Round(round));
            for idx in 0..comm.network().len() {
                if comm.network().nodes()[idx].is_active() {
                    events += 1;
                }
                comm.deliver_round(idx, round);
            }
            comm.end_round(round);
            rounds = round + 1;
            halted = is_halted(comm);
        }
        let cap_reached = !halted;
        if cap_reached {
            log_info!(comm.now(), "reached the maximum number of rounds ({}), stopping", self.max_rounds);
        }
        RunOutcome {
            final_time: comm.now(),
            rounds: Some(rounds),
            events,
            cap_reached,
        }
    }
}

// collapsed nodes count as halted
fn is_halted(comm: &Communication) -> bool {
    comm.network().nodes().iter().all(|n| n.state().is_absorbing())
}
