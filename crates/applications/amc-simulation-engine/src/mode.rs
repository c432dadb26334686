//! Criticality-mode state machine
//!
//! LO -> HI only. The switch is triggered by a HI job that exhausts its LO
//! budget without completing, and happens at most once per run.

use serde::{Deserialize, Serialize};
use tracing::info;

use amc_core::{Criticality, Job, JobId, Task, Time};

/// System-wide criticality mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    #[serde(rename = "LO")]
    Lo,
    #[serde(rename = "HI")]
    Hi,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Lo => write!(f, "LO"),
            Mode::Hi => write!(f, "HI"),
        }
    }
}

/// The LO -> HI transition, recorded once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSwitch {
    pub trigger: JobId,
    pub time: Time,
}

/// Mode tracker consulted by the simulator on every event
#[derive(Debug, Clone, Default)]
pub struct ModeController {
    mode: Mode,
    switch: Option<ModeSwitch>,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The transition, if it already happened
    pub fn switch(&self) -> Option<ModeSwitch> {
        self.switch
    }

    /// Whether jobs of the given criticality may be released or run
    pub fn admits(&self, criticality: Criticality) -> bool {
        match self.mode {
            Mode::Lo => true,
            Mode::Hi => criticality == Criticality::Hi,
        }
    }

    /// Execution budget a job of `task` is allowed to consume in the current mode
    pub fn budget(&self, task: &Task) -> Time {
        match (self.mode, task.wcet_hi()) {
            (Mode::Hi, Some(wcet_hi)) => wcet_hi,
            _ => task.wcet_lo,
        }
    }

    /// Check a running job against its LO budget.
    ///
    /// Fires when a HI job has consumed its whole LO budget and still needs
    /// more. Returns the transition the first time only; afterwards the
    /// machine stays in HI.
    pub fn observe(&mut self, job: &Job, wcet_lo: Time, now: Time) -> Option<ModeSwitch> {
        if self.mode == Mode::Hi || job.criticality != Criticality::Hi {
            return None;
        }
        if job.executed < wcet_lo || job.is_finished() {
            return None;
        }

        let switch = ModeSwitch {
            trigger: job.id,
            time: now,
        };
        info!(trigger = %job.id, time = now, "criticality switch LO -> HI");
        self.mode = Mode::Hi;
        self.switch = Some(switch);
        Some(switch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hi_task() -> Task {
        Task::hi(1, 10, 10, 2, 4, 0)
    }

    /// A job of `task` demanding `demand` that has already run for `executed`
    fn job_of(task: &Task, demand: Time, executed: Time) -> Job {
        let mut job = Job::new(task, 0, 0, demand);
        job.execute(executed);
        job
    }

    #[test]
    fn test_initial_mode_admits_everything() {
        let modes = ModeController::new();
        assert_eq!(modes.mode(), Mode::Lo);
        assert!(modes.admits(Criticality::Lo));
        assert!(modes.admits(Criticality::Hi));
        assert_eq!(modes.switch(), None);
    }

    #[test]
    fn test_switch_on_lo_budget_exhaustion() {
        let hi = hi_task();
        let lo = Task::lo(2, 20, 20, 5, 1);
        let mut modes = ModeController::new();

        // Within budget
        assert_eq!(modes.observe(&job_of(&hi, 3, 1), 2, 1), None);
        // Budget exhausted but job done: no overrun
        assert_eq!(modes.observe(&job_of(&hi, 2, 2), 2, 2), None);
        // LO jobs never trigger
        assert_eq!(modes.observe(&job_of(&lo, 6, 5), 2, 5), None);

        let overrunning = job_of(&hi, 3, 2);
        let switch = modes.observe(&overrunning, 2, 2);
        assert_eq!(
            switch,
            Some(ModeSwitch {
                trigger: overrunning.id,
                time: 2
            })
        );
        assert_eq!(modes.mode(), Mode::Hi);
        assert!(!modes.admits(Criticality::Lo));
        assert!(modes.admits(Criticality::Hi));
    }

    #[test]
    fn test_switch_happens_once() {
        let hi = hi_task();
        let other = Task::hi(3, 40, 40, 4, 6, 2);
        let mut modes = ModeController::new();

        assert!(modes.observe(&job_of(&hi, 3, 2), 2, 2).is_some());
        assert!(modes.observe(&job_of(&other, 6, 4), 4, 9).is_none());
        assert_eq!(modes.switch().map(|s| s.trigger.task), Some(hi.id));
        assert_eq!(modes.mode(), Mode::Hi);
    }

    #[test]
    fn test_budget_follows_mode() {
        let hi = hi_task();
        let lo = Task::lo(2, 20, 20, 5, 1);
        let mut modes = ModeController::new();

        assert_eq!(modes.budget(&hi), 2);
        assert_eq!(modes.budget(&lo), 5);

        modes.observe(&job_of(&hi, 3, 2), 2, 2);
        assert_eq!(modes.budget(&hi), 4);
        assert_eq!(modes.budget(&lo), 5);
    }
}
