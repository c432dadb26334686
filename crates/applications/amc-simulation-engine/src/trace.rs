//! Append-only simulation trace

use serde::{Deserialize, Serialize};

use amc_core::{AmcError, JobId, Result, Time};

/// What happened at a simulated instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EventKind {
    Release { job: JobId, deadline: Time },
    Dispatch { job: JobId },
    Preempt { job: JobId, by: JobId },
    Complete { job: JobId, response_time: Time },
    Discard { job: JobId },
    DeadlineMiss { job: JobId, deadline: Time },
    ModeSwitch { trigger: JobId },
}

impl EventKind {
    /// Job the event is about (the trigger for a mode switch)
    pub fn job(&self) -> JobId {
        match *self {
            EventKind::Release { job, .. }
            | EventKind::Dispatch { job }
            | EventKind::Preempt { job, .. }
            | EventKind::Complete { job, .. }
            | EventKind::Discard { job }
            | EventKind::DeadlineMiss { job, .. } => job,
            EventKind::ModeSwitch { trigger } => trigger,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Release { .. } => "release",
            EventKind::Dispatch { .. } => "dispatch",
            EventKind::Preempt { .. } => "preempt",
            EventKind::Complete { .. } => "complete",
            EventKind::Discard { .. } => "discard",
            EventKind::DeadlineMiss { .. } => "deadline-miss",
            EventKind::ModeSwitch { .. } => "mode-switch",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Release { job, deadline } => {
                write!(f, "release {job} (deadline {deadline})")
            }
            EventKind::Dispatch { job } => write!(f, "dispatch {job}"),
            EventKind::Preempt { job, by } => write!(f, "preempt {job} by {by}"),
            EventKind::Complete { job, response_time } => {
                write!(f, "complete {job} (response time {response_time})")
            }
            EventKind::Discard { job } => write!(f, "discard {job}"),
            EventKind::DeadlineMiss { job, deadline } => {
                write!(f, "DEADLINE MISS {job} (deadline {deadline})")
            }
            EventKind::ModeSwitch { trigger } => {
                write!(f, "mode-switch LO -> HI (trigger {trigger})")
            }
        }
    }
}

/// Timestamped trace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub time: Time,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Ordered event log of one simulation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationTrace {
    events: Vec<TraceEvent>,
}

impl SimulationTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Time must never go backwards.
    pub fn push(&mut self, time: Time, kind: EventKind) -> Result<()> {
        if let Some(last) = self.events.last() {
            if time < last.time {
                return Err(AmcError::inconsistency(
                    time,
                    format!("{} appended after an event at t={}", kind.label(), last.time),
                ));
            }
        }
        self.events.push(TraceEvent { time, kind });
        Ok(())
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TraceEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events with the given label (`"release"`, `"mode-switch"`, ...)
    pub fn count(&self, label: &str) -> usize {
        self.events.iter().filter(|e| e.kind.label() == label).count()
    }
}

impl std::fmt::Display for SimulationTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for event in &self.events {
            writeln!(f, "[{:06}] {}", event.time, event.kind)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a SimulationTrace {
    type Item = &'a TraceEvent;
    type IntoIter = std::slice::Iter<'a, TraceEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
