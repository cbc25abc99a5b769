//! Guided acquisition sequencer
//!
//! A pure state machine walks a [`TrialPlan`] through instruct, countdown,
//! recording and rest phases; [`spawn_guided_session`] drives it against the
//! tokio clock and forwards recording/marker requests to the processing
//! service. Whether the plan completes or is aborted, the session ends with
//! exactly one `StopRecording`.

use crate::service::ProcessorCommand;
use eeg_core::duration_ms;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

pub const SESSION_START_MARKER: &str = "GUIDED_SESSION_START";
pub const SESSION_END_MARKER: &str = "GUIDED_SESSION_END";
pub const SESSION_ABORTED_MARKER: &str = "GUIDED_SESSION_ABORTED";

/// Prompted action of one trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuidedAction {
    Fixation,
    Up,
    Down,
    Left,
    Right,
    BlinkOnce,
    BlinkTwice,
    BlinkThree,
}

impl GuidedAction {
    /// Actions drawn for the shuffled part of a plan
    pub const PRIMARY: [GuidedAction; 7] = [
        GuidedAction::Fixation,
        GuidedAction::Up,
        GuidedAction::Down,
        GuidedAction::Left,
        GuidedAction::Right,
        GuidedAction::BlinkTwice,
        GuidedAction::BlinkThree,
    ];

    /// Separator inserted after every primary action
    pub const INTERLEAVED: GuidedAction = GuidedAction::BlinkOnce;

    /// Marker stem, e.g. `BLINK_TWICE`
    pub fn label(&self) -> &'static str {
        match self {
            GuidedAction::Fixation => "FIXATION",
            GuidedAction::Up => "UP",
            GuidedAction::Down => "DOWN",
            GuidedAction::Left => "LEFT",
            GuidedAction::Right => "RIGHT",
            GuidedAction::BlinkOnce => "BLINK_ONCE",
            GuidedAction::BlinkTwice => "BLINK_TWICE",
            GuidedAction::BlinkThree => "BLINK_THREE",
        }
    }

    pub fn is_blink(&self) -> bool {
        matches!(
            self,
            GuidedAction::BlinkOnce | GuidedAction::BlinkTwice | GuidedAction::BlinkThree
        )
    }

    /// Prompt shown during the instruct phase
    pub fn instruction(&self) -> String {
        let words: Vec<String> = self
            .label()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_string() + &chars.as_str().to_lowercase(),
                    None => String::new(),
                }
            })
            .collect();
        let title = words.join(" ");
        match self {
            GuidedAction::Fixation => "Relax & Look Straight".to_string(),
            a if a.is_blink() => format!("Action: {}", title),
            _ => format!("Action: Look {}", title),
        }
    }

    pub fn start_marker(&self) -> String {
        format!("{}_START", self.label())
    }

    pub fn end_marker(&self) -> String {
        format!("{}_END", self.label())
    }
}

impl fmt::Display for GuidedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered list of trials for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialPlan {
    actions: Vec<GuidedAction>,
}

impl TrialPlan {
    /// Explicit, deterministic plan
    pub fn from_actions(actions: Vec<GuidedAction>) -> Self {
        Self { actions }
    }

    /// Leading fixation, then `trial_count` shuffled primary actions each followed by a blink
    pub fn randomized<R: Rng + ?Sized>(trial_count: usize, rng: &mut R) -> Self {
        let mut drawn = Vec::with_capacity(trial_count + GuidedAction::PRIMARY.len());
        while drawn.len() < trial_count {
            let mut round = GuidedAction::PRIMARY;
            round.shuffle(rng);
            drawn.extend_from_slice(&round);
        }
        drawn.truncate(trial_count);

        let mut actions = Vec::with_capacity(1 + 2 * trial_count);
        actions.push(GuidedAction::Fixation);
        for action in drawn {
            actions.push(action);
            actions.push(GuidedAction::INTERLEAVED);
        }
        Self { actions }
    }

    pub fn seeded(trial_count: usize, seed: u64) -> Self {
        Self::randomized(trial_count, &mut StdRng::seed_from_u64(seed))
    }

    pub fn actions(&self) -> &[GuidedAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Phase durations of a guided session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerTimings {
    #[serde(with = "duration_ms")]
    pub lead_in: Duration,
    #[serde(with = "duration_ms")]
    pub instruct: Duration,
    pub countdown_from: u32,
    #[serde(with = "duration_ms")]
    pub countdown_tick: Duration,
    #[serde(with = "duration_ms")]
    pub trial: Duration,
    #[serde(with = "duration_ms")]
    pub rest: Duration,
    pub trial_count: usize,
}

impl Default for SequencerTimings {
    fn default() -> Self {
        Self {
            lead_in: Duration::from_millis(1000),
            instruct: Duration::from_millis(2000),
            countdown_from: 3,
            countdown_tick: Duration::from_millis(1000),
            trial: Duration::from_millis(1500),
            rest: Duration::from_millis(1500),
            trial_count: 30,
        }
    }
}

impl SequencerTimings {
    /// Wall time of one trial from instruction to end of rest
    pub fn trial_span(&self) -> Duration {
        self.instruct + self.countdown_tick * self.countdown_from + self.trial + self.rest
    }
}

/// Outputs of the sequencer, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerEvent {
    Started,
    Instruction {
        trial: usize,
        action: GuidedAction,
        text: String,
    },
    Countdown(u32),
    Recording {
        trial: usize,
        action: GuidedAction,
    },
    Rest,
    Marker(String),
    StartRecording,
    StopRecording,
    Finished {
        aborted: bool,
    },
}

impl SequencerEvent {
    /// Processor request implied by this event, if any
    pub fn command(&self) -> Option<ProcessorCommand> {
        match self {
            SequencerEvent::StartRecording => Some(ProcessorCommand::StartRecording),
            SequencerEvent::StopRecording => Some(ProcessorCommand::StopRecording),
            SequencerEvent::Marker(label) => Some(ProcessorCommand::AddMarker(label.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    LeadIn,
    Instruct,
    /// Remaining countdown values still to show
    Countdown(u32),
    Recording,
    Rest,
}

#[derive(Debug, Clone)]
struct Running {
    plan: TrialPlan,
    next_trial: usize,
    phase: Phase,
    deadline: Instant,
}

/// Timer-free guided session state machine
#[derive(Debug, Clone, Default)]
pub struct GuidedSequencer {
    timings: SequencerTimings,
    running: Option<Running>,
}

impl GuidedSequencer {
    pub fn new(timings: SequencerTimings) -> Self {
        Self {
            timings,
            running: None,
        }
    }

    pub fn timings(&self) -> &SequencerTimings {
        &self.timings
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// When [`GuidedSequencer::advance`] next has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        self.running.as_ref().map(|r| r.deadline)
    }

    /// Begin a session; no-op while one is running
    pub fn start(&mut self, plan: TrialPlan, now: Instant) -> Vec<SequencerEvent> {
        if self.running.is_some() {
            debug!("guided session already running");
            return Vec::new();
        }
        info!(trials = plan.len(), "guided session started");
        self.running = Some(Running {
            plan,
            next_trial: 0,
            phase: Phase::LeadIn,
            deadline: now + self.timings.lead_in,
        });
        vec![
            SequencerEvent::Started,
            SequencerEvent::StartRecording,
            SequencerEvent::Marker(SESSION_START_MARKER.to_string()),
        ]
    }

    /// Run every phase transition due at or before `now`
    pub fn advance(&mut self, now: Instant) -> Vec<SequencerEvent> {
        let mut events = Vec::new();
        while let Some(deadline) = self.next_deadline() {
            if deadline > now {
                break;
            }
            self.step(deadline, &mut events);
        }
        events
    }

    /// Abort: pending phases are cancelled and the completion path runs once
    pub fn stop(&mut self, _now: Instant) -> Vec<SequencerEvent> {
        if self.running.is_none() {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.finish(true, &mut events);
        events
    }

    fn step(&mut self, at: Instant, events: &mut Vec<SequencerEvent>) {
        let timings = self.timings.clone();
        let Some(run) = self.running.as_mut() else {
            return;
        };
        let exhausted = run.next_trial >= run.plan.len();
        let phase = run.phase;
        match phase {
            Phase::LeadIn | Phase::Rest if exhausted => self.finish(false, events),
            Phase::LeadIn | Phase::Rest => {
                let trial = run.next_trial;
                let action = run.plan.actions()[trial];
                events.push(SequencerEvent::Instruction {
                    trial,
                    action,
                    text: action.instruction(),
                });
                run.phase = Phase::Instruct;
                run.deadline = at + timings.instruct;
            }
            Phase::Instruct => {
                run.phase = Phase::Countdown(timings.countdown_from);
                run.deadline = at;
            }
            Phase::Countdown(remaining) if remaining > 0 => {
                events.push(SequencerEvent::Countdown(remaining));
                run.phase = Phase::Countdown(remaining - 1);
                run.deadline = at + timings.countdown_tick;
            }
            Phase::Countdown(_) => {
                let trial = run.next_trial;
                let action = run.plan.actions()[trial];
                events.push(SequencerEvent::Recording { trial, action });
                events.push(SequencerEvent::Marker(action.start_marker()));
                run.phase = Phase::Recording;
                run.deadline = at + timings.trial;
            }
            Phase::Recording => {
                let action = run.plan.actions()[run.next_trial];
                events.push(SequencerEvent::Marker(action.end_marker()));
                events.push(SequencerEvent::Rest);
                run.next_trial += 1;
                run.phase = Phase::Rest;
                run.deadline = at + timings.rest;
            }
        }
    }

    fn finish(&mut self, aborted: bool, events: &mut Vec<SequencerEvent>) {
        if self.running.take().is_none() {
            return;
        }
        let marker = if aborted {
            SESSION_ABORTED_MARKER
        } else {
            SESSION_END_MARKER
        };
        info!(aborted, "guided session finished");
        events.push(SequencerEvent::Marker(marker.to_string()));
        events.push(SequencerEvent::StopRecording);
        events.push(SequencerEvent::Finished { aborted });
    }
}

/// Handle to a running guided session task
pub struct GuidedSessionHandle {
    stop: Option<oneshot::Sender<()>>,
    events: broadcast::Sender<SequencerEvent>,
    task: JoinHandle<()>,
}

impl GuidedSessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SequencerEvent> {
        self.events.subscribe()
    }

    /// Abort the session and wait for its completion events to be sent
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.task.await;
    }

    /// Wait for the session to end on its own
    pub async fn join(self) {
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Drive a guided session on the tokio clock, forwarding requests to `commands`
///
/// Dropping the handle without calling `join` aborts the session.
pub fn spawn_guided_session(
    plan: TrialPlan,
    timings: SequencerTimings,
    commands: mpsc::Sender<ProcessorCommand>,
) -> GuidedSessionHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let (events, _) = broadcast::channel(64);
    let sender = events.clone();

    let task = tokio::spawn(async move {
        let mut sequencer = GuidedSequencer::new(timings);
        dispatch(sequencer.start(plan, Instant::now()), &commands, &sender).await;

        while let Some(deadline) = sequencer.next_deadline() {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    dispatch(sequencer.advance(Instant::now()), &commands, &sender).await;
                }
                _ = &mut stop_rx => {
                    dispatch(sequencer.stop(Instant::now()), &commands, &sender).await;
                    break;
                }
            }
        }
    });

    GuidedSessionHandle {
        stop: Some(stop_tx),
        events,
        task,
    }
}

async fn dispatch(
    events: Vec<SequencerEvent>,
    commands: &mpsc::Sender<ProcessorCommand>,
    sink: &broadcast::Sender<SequencerEvent>,
) {
    for event in events {
        if let Some(command) = event.command() {
            if commands.send(command).await.is_err() {
                debug!("processing service gone, guided command dropped");
            }
        }
        let _ = sink.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_timings() -> SequencerTimings {
        SequencerTimings {
            lead_in: Duration::from_millis(10),
            instruct: Duration::from_millis(20),
            countdown_from: 3,
            countdown_tick: Duration::from_millis(10),
            trial: Duration::from_millis(15),
            rest: Duration::from_millis(15),
            trial_count: 2,
        }
    }

    fn run_to_end(seq: &mut GuidedSequencer) -> Vec<SequencerEvent> {
        let mut events = Vec::new();
        while let Some(deadline) = seq.next_deadline() {
            events.extend(seq.advance(deadline));
        }
        events
    }

    fn markers(events: &[SequencerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SequencerEvent::Marker(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn stops(events: &[SequencerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SequencerEvent::StopRecording))
            .count()
    }

    #[test]
    fn test_instruction_text() {
        assert_eq!(GuidedAction::Fixation.instruction(), "Relax & Look Straight");
        assert_eq!(GuidedAction::BlinkTwice.instruction(), "Action: Blink Twice");
        assert_eq!(GuidedAction::Up.instruction(), "Action: Look Up");
        assert_eq!(GuidedAction::Left.start_marker(), "LEFT_START");
    }

    #[test]
    fn test_seeded_plan_layout() {
        let plan = TrialPlan::seeded(30, 42);
        assert_eq!(plan.len(), 61);
        assert_eq!(plan.actions()[0], GuidedAction::Fixation);
        for pair in plan.actions()[1..].chunks(2) {
            assert!(GuidedAction::PRIMARY.contains(&pair[0]));
            assert_eq!(pair[1], GuidedAction::BlinkOnce);
        }
        assert_eq!(plan, TrialPlan::seeded(30, 42));
    }

    #[test]
    fn test_every_primary_in_first_round() {
        let plan = TrialPlan::seeded(7, 3);
        let drawn: Vec<_> = plan.actions()[1..].iter().step_by(2).copied().collect();
        for action in GuidedAction::PRIMARY {
            assert!(drawn.contains(&action));
        }
    }

    #[test]
    fn test_natural_completion_order() {
        let mut seq = GuidedSequencer::new(short_timings());
        let plan = TrialPlan::from_actions(vec![GuidedAction::Fixation, GuidedAction::Up]);
        let mut events = seq.start(plan, Instant::now());
        events.extend(run_to_end(&mut seq));

        assert_eq!(
            markers(&events),
            vec![
                "GUIDED_SESSION_START",
                "FIXATION_START",
                "FIXATION_END",
                "UP_START",
                "UP_END",
                "GUIDED_SESSION_END"
            ]
        );
        assert_eq!(stops(&events), 1);
        let tail = &events[events.len() - 2..];
        assert_eq!(
            tail,
            &[SequencerEvent::StopRecording, SequencerEvent::Finished { aborted: false }]
        );
        assert!(!seq.is_running());
    }

    #[test]
    fn test_countdown_sequence() {
        let mut seq = GuidedSequencer::new(short_timings());
        let t0 = Instant::now();
        seq.start(TrialPlan::from_actions(vec![GuidedAction::Down]), t0);
        let events = seq.advance(t0 + Duration::from_millis(10 + 20 + 30));
        let counts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                SequencerEvent::Countdown(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![3, 2, 1]);
        assert!(events.contains(&SequencerEvent::Marker("DOWN_START".into())));
    }

    #[test]
    fn test_trial_spacing() {
        let timings = SequencerTimings::default();
        let mut seq = GuidedSequencer::new(timings.clone());
        let t0 = Instant::now();
        seq.start(TrialPlan::from_actions(vec![GuidedAction::Up, GuidedAction::Down]), t0);
        seq.advance(t0 + timings.lead_in);
        let second = t0 + timings.lead_in + timings.trial_span();
        let events = seq.advance(second);
        assert!(matches!(
            events.last(),
            Some(SequencerEvent::Instruction { trial: 1, action: GuidedAction::Down, .. })
        ));
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let mut seq = GuidedSequencer::new(short_timings());
        let now = Instant::now();
        assert_eq!(seq.start(TrialPlan::seeded(2, 1), now).len(), 3);
        assert!(seq.start(TrialPlan::seeded(2, 1), now).is_empty());
    }

    #[test]
    fn test_abort_fires_single_stop_at_any_point() {
        let timings = short_timings();
        let plan = TrialPlan::seeded(timings.trial_count, 9);
        let total_ms = 10 + plan.len() as u64 * timings.trial_span().as_millis() as u64;
        for cut in (0..total_ms).step_by(7) {
            let mut seq = GuidedSequencer::new(timings.clone());
            let t0 = Instant::now();
            let mut events = seq.start(plan.clone(), t0);
            events.extend(seq.advance(t0 + Duration::from_millis(cut)));
            events.extend(seq.stop(t0 + Duration::from_millis(cut)));
            events.extend(seq.stop(t0 + Duration::from_millis(cut + 1)));
            events.extend(run_to_end(&mut seq));

            assert_eq!(stops(&events), 1, "cut at {}ms", cut);
            assert_eq!(markers(&events).last().unwrap(), SESSION_ABORTED_MARKER);
            assert_eq!(events.last(), Some(&SequencerEvent::Finished { aborted: true }));
        }
    }

    #[test]
    fn test_empty_plan_completes() {
        let mut seq = GuidedSequencer::new(short_timings());
        let mut events = seq.start(TrialPlan::from_actions(Vec::new()), Instant::now());
        events.extend(run_to_end(&mut seq));
        assert_eq!(stops(&events), 1);
        assert_eq!(events.last(), Some(&SequencerEvent::Finished { aborted: false }));
    }

    async fn collect_commands(rx: &mut mpsc::Receiver<ProcessorCommand>) -> Vec<ProcessorCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_forwards_commands() {
        let (tx, mut rx) = mpsc::channel(128);
        let plan = TrialPlan::from_actions(vec![GuidedAction::Right]);
        let handle = spawn_guided_session(plan, short_timings(), tx);
        handle.join().await;

        let commands = collect_commands(&mut rx).await;
        assert!(matches!(commands.first(), Some(ProcessorCommand::StartRecording)));
        assert!(matches!(commands.last(), Some(ProcessorCommand::StopRecording)));
        let labels: Vec<String> = commands
            .iter()
            .filter_map(|c| match c {
                ProcessorCommand::AddMarker(l) => Some(l.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            labels,
            vec!["GUIDED_SESSION_START", "RIGHT_START", "RIGHT_END", "GUIDED_SESSION_END"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_stop_aborts_once() {
        let (tx, mut rx) = mpsc::channel(128);
        let handle = spawn_guided_session(TrialPlan::seeded(3, 5), SequencerTimings::default(), tx);
        let mut events = handle.subscribe();
        tokio::time::sleep(Duration::from_millis(4500)).await;
        handle.stop().await;

        let commands = collect_commands(&mut rx).await;
        let stops = commands
            .iter()
            .filter(|c| matches!(c, ProcessorCommand::StopRecording))
            .count();
        assert_eq!(stops, 1);

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert_eq!(last, Some(SequencerEvent::Finished { aborted: true }));
    }
}
