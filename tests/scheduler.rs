mod common;

use common::*;
use nekohost::runtime::{
    BatchOutcome, BridgeError, ExternalFunction, Hooks, RunOutcome, RunState, RuntimeError,
    Scheduler,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn loaded(hooks: Hooks, program: &str) -> Scheduler {
    let mut guest = boot(hooks);
    assert!(guest.set_source(0, "main.bas", program).unwrap());
    Scheduler::new(guest)
}

#[tokio::test]
async fn runs_until_the_program_halts() {
    let transcript = Transcript::default();
    let mut scheduler = loaded(transcript.hooks(), "hi");

    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Halted);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.steps, 3);
    assert_eq!(transcript.text(), "hiOK\n");
    assert_eq!(scheduler.guest().run_state(), RunState::Stopped);
}

#[tokio::test]
async fn batches_are_bounded() {
    let vsyncs = Counter::default();
    let tick = vsyncs.clone();
    let transcript = Transcript::default();
    let hooks = transcript.hooks().on_vsync(move || tick.bump());
    let mut scheduler = loaded(hooks, "hi").with_steps_per_batch(1);

    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Halted);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.steps, 3);
    // one per batch, plus one after the halt
    assert_eq!(vsyncs.get(), 4);
}

#[tokio::test]
async fn batch_limit_leaves_the_session_running() {
    let transcript = Transcript::default();
    let mut scheduler = loaded(transcript.hooks(), "abcdef").with_steps_per_batch(1);

    let summary = scheduler.run_until(Some(2)).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::BatchLimit);
    assert_eq!(transcript.text(), "ab");
    assert!(scheduler.is_running());

    let summary = scheduler.run().await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Halted);
    assert_eq!(transcript.text(), "abcdefOK\n");
}

#[tokio::test]
async fn stop_is_observed_between_batches() {
    let transcript = Transcript::default();
    let mut scheduler = loaded(transcript.hooks(), "a!bcde").with_steps_per_batch(2);
    let stop = scheduler.stop_handle();
    scheduler
        .guest_mut()
        .register(ExternalFunction::procedure0("BREAK", move |_| {
            stop.stop();
            Ok(())
        }))
        .unwrap();

    let summary = scheduler.run().await.unwrap();

    // The batch that requested the stop still ran to completion.
    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.steps, 2);
    assert_eq!(transcript.text(), "a");
    assert!(!scheduler.is_running());
    assert!(!scheduler.stop_handle().is_requested());
}

#[tokio::test]
async fn state_changes_are_reported_once() {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let hooks = Hooks::new().on_state_change(move |s| sink.lock().unwrap().push(s));
    let mut scheduler = loaded(hooks, "xyz");

    scheduler.start();
    scheduler.start();
    scheduler.run().await.unwrap();

    assert_eq!(
        *states.lock().unwrap(),
        vec![RunState::Running, RunState::Stopped]
    );
}

#[tokio::test]
async fn step_errors_stop_the_session() {
    let mut scheduler = loaded(Hooks::new(), "ab?c");

    let err = scheduler.run().await.unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::Bridge(BridgeError::UnknownFunction(99))
    ));
    assert_eq!(scheduler.guest().run_state(), RunState::Stopped);
}

#[test]
fn stopped_session_runs_nothing() {
    let vsyncs = Counter::default();
    let tick = vsyncs.clone();
    let transcript = Transcript::default();
    let mut scheduler = loaded(transcript.hooks().on_vsync(move || tick.bump()), "abc");

    assert_eq!(scheduler.run_batch().unwrap(), BatchOutcome::Stopped);
    assert_eq!(vsyncs.get(), 1);
    assert_eq!(transcript.text(), "");

    scheduler.start();
    assert_eq!(
        scheduler.run_batch().unwrap(),
        BatchOutcome::Halted { steps: 4 }
    );
}

#[tokio::test]
async fn paced_by_the_frame_interval() {
    let transcript = Transcript::default();
    let mut scheduler = loaded(transcript.hooks(), "ab")
        .with_steps_per_batch(1)
        .with_frame_interval(Duration::from_millis(1));

    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Halted);
    assert_eq!(summary.batches, 3);
    assert_eq!(transcript.text(), "abOK\n");
}

#[test]
fn rejected_source_stops_and_flushes() {
    let vsyncs = Counter::default();
    let tick = vsyncs.clone();
    let mut guest = boot(Hooks::new().on_vsync(move || tick.bump()));

    assert!(!guest.set_source(7, "main.bas", "abc").unwrap());
    assert_eq!(guest.run_state(), RunState::Stopped);
    assert_eq!(vsyncs.get(), 1);
}
