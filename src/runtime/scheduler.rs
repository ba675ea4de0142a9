//! Cooperative batch scheduler
//!
//! The guest runs in batches of single steps. Between batches the scheduler
//! waits for the next frame tick, and that is the only point where a stop
//! request is observed.

use super::{Guest, RunState, RuntimeError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Requests a stop from outside the scheduler, e.g. another task.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every step of the batch ran and the program wants more.
    Yielded { steps: usize },
    /// The program finished after `steps` steps.
    Halted { steps: usize },
    /// Nothing ran: the session is stopped or a stop was requested.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Halted,
    Stopped,
    BatchLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Batches that executed at least one step
    pub batches: usize,
    pub steps: usize,
    pub outcome: RunOutcome,
}

pub struct Scheduler {
    guest: Guest,
    steps_per_batch: usize,
    frame_interval: Duration,
    stop: StopHandle,
}

impl Scheduler {
    pub fn new(guest: Guest) -> Self {
        let steps_per_batch = guest.config().steps_per_batch.max(1);
        let frame_interval = guest.config().frame_interval();
        Self {
            guest,
            steps_per_batch,
            frame_interval,
            stop: StopHandle::default(),
        }
    }

    pub fn with_steps_per_batch(mut self, steps: usize) -> Self {
        self.steps_per_batch = steps.max(1);
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn guest(&self) -> &Guest {
        &self.guest
    }

    pub fn guest_mut(&mut self) -> &mut Guest {
        &mut self.guest
    }

    pub fn into_guest(self) -> Guest {
        self.guest
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        self.guest.run_state() == RunState::Running
    }

    /// Mark the session running. Does nothing if it already is.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.stop.clear();
        self.guest.set_run_state(RunState::Running);
    }

    pub fn stop(&mut self) {
        self.guest.set_run_state(RunState::Stopped);
    }

    /// Run up to `steps_per_batch` steps.
    ///
    /// The vsync hook fires first, whether or not anything runs. When the
    /// program halts the session stops, "OK" is printed and vsync fires
    /// again. A step error also stops the session and is returned.
    pub fn run_batch(&mut self) -> Result<BatchOutcome, RuntimeError> {
        self.guest.session().hooks().vsync();

        if self.stop.take() {
            debug!("stop requested");
            self.stop();
            return Ok(BatchOutcome::Stopped);
        }
        if !self.is_running() {
            return Ok(BatchOutcome::Stopped);
        }

        for step in 0..self.steps_per_batch {
            match self.guest.execute_one_step() {
                Ok(true) => {}
                Ok(false) => {
                    self.stop();
                    let hooks = self.guest.session().hooks();
                    hooks.put_str("OK\n");
                    hooks.vsync();
                    return Ok(BatchOutcome::Halted { steps: step + 1 });
                }
                Err(err) => {
                    self.stop();
                    return Err(err);
                }
            }
        }
        Ok(BatchOutcome::Yielded {
            steps: self.steps_per_batch,
        })
    }

    /// Start the session and run batches until the program halts or is
    /// stopped.
    pub async fn run(&mut self) -> Result<RunSummary, RuntimeError> {
        self.run_until(None).await
    }

    /// Like [`run`](Self::run), giving up after `max_batches` batches. The
    /// session is left running then, so a later call continues.
    pub async fn run_until(
        &mut self,
        max_batches: Option<usize>,
    ) -> Result<RunSummary, RuntimeError> {
        self.start();

        let mut ticker = (!self.frame_interval.is_zero()).then(|| {
            let mut ticker = tokio::time::interval(self.frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut summary = RunSummary {
            batches: 0,
            steps: 0,
            outcome: RunOutcome::Stopped,
        };

        loop {
            if max_batches.is_some_and(|max| summary.batches >= max) {
                summary.outcome = RunOutcome::BatchLimit;
                break;
            }
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => tokio::task::yield_now().await,
            }

            match self.run_batch()? {
                BatchOutcome::Yielded { steps } => {
                    summary.batches += 1;
                    summary.steps += steps;
                }
                BatchOutcome::Halted { steps } => {
                    summary.batches += 1;
                    summary.steps += steps;
                    summary.outcome = RunOutcome::Halted;
                    break;
                }
                BatchOutcome::Stopped => {
                    summary.outcome = RunOutcome::Stopped;
                    break;
                }
            }
        }

        info!(
            batches = summary.batches,
            steps = summary.steps,
            outcome = ?summary.outcome,
            "run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_handle_is_shared() {
        let handle = StopHandle::default();
        let other = handle.clone();
        assert!(!handle.is_requested());

        other.stop();
        assert!(handle.is_requested());
        assert!(handle.take());
        assert!(!other.is_requested());
        assert!(!handle.take());
    }
}
