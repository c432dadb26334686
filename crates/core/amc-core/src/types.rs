//! Core types shared by the analyzer and the simulator

use serde::{Deserialize, Serialize};

/// Simulated time and durations, in abstract integral units (cycles, us, ...)
pub type Time = u64;

/// Fixed priority rank. Lower value = higher priority.
pub type Priority = u32;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Criticality of a task, and by extension the system-wide mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criticality {
    #[serde(rename = "LO")]
    Lo,
    #[serde(rename = "HI")]
    Hi,
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criticality::Lo => write!(f, "LO"),
            Criticality::Hi => write!(f, "HI"),
        }
    }
}

/// Criticality level of a task together with the budgets only that level has.
///
/// A LO task has no HI budget at all, so there is nothing to read by mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CriticalityLevel {
    Lo,
    Hi { wcet_hi: Time },
}

/// An immutable mixed-criticality periodic task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub period: Time,
    pub deadline: Time,
    pub wcet_lo: Time,
    pub priority: Priority,
    pub level: CriticalityLevel,
}

impl Task {
    /// Create a LO-criticality task
    pub fn lo(id: u32, period: Time, deadline: Time, wcet_lo: Time, priority: Priority) -> Self {
        Task {
            id: TaskId(id),
            name: format!("T{id}"),
            period,
            deadline,
            wcet_lo,
            priority,
            level: CriticalityLevel::Lo,
        }
    }

    /// Create a HI-criticality task
    pub fn hi(
        id: u32,
        period: Time,
        deadline: Time,
        wcet_lo: Time,
        wcet_hi: Time,
        priority: Priority,
    ) -> Self {
        Task {
            level: CriticalityLevel::Hi { wcet_hi },
            ..Task::lo(id, period, deadline, wcet_lo, priority)
        }
    }

    /// Rename the task (builder style)
    pub fn named(self, name: impl Into<String>) -> Self {
        Task {
            name: name.into(),
            ..self
        }
    }

    pub fn criticality(&self) -> Criticality {
        match self.level {
            CriticalityLevel::Lo => Criticality::Lo,
            CriticalityLevel::Hi { .. } => Criticality::Hi,
        }
    }

    pub fn is_hi(&self) -> bool {
        matches!(self.level, CriticalityLevel::Hi { .. })
    }

    /// HI budget, present only for HI tasks
    pub fn wcet_hi(&self) -> Option<Time> {
        match self.level {
            CriticalityLevel::Lo => None,
            CriticalityLevel::Hi { wcet_hi } => Some(wcet_hi),
        }
    }

    /// LO-mode utilization C_LO / T
    pub fn utilization_lo(&self) -> f64 {
        self.wcet_lo as f64 / self.period as f64
    }

    /// HI-mode utilization C_HI / T (zero for LO tasks, which are dropped in HI mode)
    pub fn utilization_hi(&self) -> f64 {
        self.wcet_hi().map_or(0.0, |c| c as f64 / self.period as f64)
    }
}

/// Identifier of one release of a task: the `index`-th job (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId {
    pub task: TaskId,
    pub index: u64,
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.task, self.index)
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Ready,
    Running,
    Completed,
    Discarded,
    DeadlineMissed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Discarded | JobState::DeadlineMissed
        )
    }
}

/// One periodic instance of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub priority: Priority,
    pub criticality: Criticality,
    pub release: Time,
    pub absolute_deadline: Time,
    pub demand: Time,         // Execution this job actually needs
    pub remaining_time: Time, // Demand not yet executed
    pub executed: Time,
    pub state: JobState,
}

impl Job {
    /// Release the `index`-th job of `task` at `release` with the given execution demand
    pub fn new(task: &Task, index: u64, release: Time, demand: Time) -> Self {
        Job {
            id: JobId {
                task: task.id,
                index,
            },
            priority: task.priority,
            criticality: task.criticality(),
            release,
            absolute_deadline: release.saturating_add(task.deadline),
            demand,
            remaining_time: demand,
            executed: 0,
            state: JobState::Ready,
        }
    }

    /// Run the job for `delta` time units (clamped to what is left)
    pub fn execute(&mut self, delta: Time) {
        let step = delta.min(self.remaining_time);
        self.remaining_time -= step;
        self.executed += step;
    }

    pub fn is_finished(&self) -> bool {
        self.remaining_time == 0
    }

    /// Response time if the job completes at `now`
    pub fn response_time(&self, now: Time) -> Time {
        now.saturating_sub(self.release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_levels() {
        let a = Task::hi(1, 10, 10, 2, 4, 0);
        let b = Task::lo(2, 20, 20, 5, 1).named("logger");

        assert!(a.is_hi());
        assert_eq!(a.wcet_hi(), Some(4));
        assert_eq!(a.criticality(), Criticality::Hi);

        assert!(!b.is_hi());
        assert_eq!(b.wcet_hi(), None);
        assert_eq!(b.name, "logger");
        assert_eq!(b.utilization_hi(), 0.0);
        assert!((b.utilization_lo() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_job_execution() {
        let task = Task::hi(1, 10, 8, 2, 4, 0);
        let mut job = Job::new(&task, 3, 30, 3);

        assert_eq!(job.id.to_string(), "T1#3");
        assert_eq!(job.absolute_deadline, 38);
        assert_eq!(job.state, JobState::Ready);

        job.execute(2);
        assert_eq!(job.remaining_time, 1);
        assert_eq!(job.executed, 2);
        assert!(!job.is_finished());

        // Clamped to remaining demand
        job.execute(5);
        assert!(job.is_finished());
        assert_eq!(job.executed, 3);
        assert_eq!(job.response_time(33), 3);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Ready.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Discarded.is_terminal());
        assert!(JobState::DeadlineMissed.is_terminal());
    }
}
